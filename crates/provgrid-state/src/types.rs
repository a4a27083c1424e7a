//! Domain types for the node registry.
//!
//! A [`Node`] is a registered worker endpoint. Its health is carried in
//! two places: the transient [`HealingData`] (set while a failure is
//! being evaluated) and the reserved `DisabledUntil` metadata key (set
//! when a healer decides to keep the node out of rotation for a while).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reserved metadata key: RFC 3339 instant until which the node is disabled.
pub const DISABLED_UNTIL_KEY: &str = "DisabledUntil";

/// Reserved metadata key: message of the last reported failure.
pub const LAST_ERROR_KEY: &str = "LastError";

/// Reserved metadata key: RFC 3339 instant of the last success after failures.
pub const LAST_SUCCESS_KEY: &str = "LastSuccess";

/// Free-form node metadata.
pub type Metadata = HashMap<String, String>;

// ── Creation status ───────────────────────────────────────────────

/// Provisioning state of the machine behind a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationStatus {
    #[default]
    Created,
    Pending,
    /// Absorbing for routine updates.
    Error,
}

impl CreationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for CreationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Returned when parsing an unknown creation status name.
#[derive(Debug, Error)]
#[error("unknown creation status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for CreationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "pending" => Ok(Self::Pending),
            "error" => Ok(Self::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

// ── Healing ───────────────────────────────────────────────────────

/// Transient failure-handling state of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealingData {
    /// Set while a healing episode is in flight.
    pub locked: bool,
    /// Deadline after which a leftover lock may be reclaimed.
    pub locked_until: Option<DateTime<Utc>>,
    /// Failure that started the episode.
    pub reason: String,
}

// ── Node ──────────────────────────────────────────────────────────

/// A registered worker endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique key and connection endpoint.
    pub address: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub creation_status: CreationStatus,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub healing: HealingData,
}

impl Node {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            metadata: Metadata::new(),
            creation_status: CreationStatus::default(),
            failure_count: 0,
            healing: HealingData::default(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_status(mut self, status: CreationStatus) -> Self {
        self.creation_status = status;
        self
    }

    pub fn is_healing(&self) -> bool {
        self.healing.locked
    }

    /// Parsed `DisabledUntil`, if present and well-formed.
    pub fn disabled_until(&self) -> Option<DateTime<Utc>> {
        let raw = self.metadata.get(DISABLED_UNTIL_KEY)?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn is_disabled_at(&self, now: DateTime<Utc>) -> bool {
        self.disabled_until().is_some_and(|until| until > now)
    }

    /// Neither healing nor disabled at `now`.
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_healing() && !self.is_disabled_at(now)
    }

    /// True if every `criteria` pair is present with the same value.
    pub fn matches_metadata(&self, criteria: &Metadata) -> bool {
        criteria
            .iter()
            .all(|(k, v)| self.metadata.get(k).is_some_and(|own| own == v))
    }

    /// Merge `changes` into the metadata. An empty value deletes the key.
    pub fn merge_metadata(&mut self, changes: &Metadata) {
        for (key, value) in changes {
            if value.is_empty() {
                self.metadata.remove(key);
            } else {
                self.metadata.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.metadata.get(LAST_ERROR_KEY).map(String::as_str)
    }

    pub fn set_disabled_until(&mut self, until: DateTime<Utc>) {
        self.metadata
            .insert(DISABLED_UNTIL_KEY.to_string(), format_timestamp(until));
    }

    pub fn clear_disabled_until(&mut self) {
        self.metadata.remove(DISABLED_UNTIL_KEY);
    }

    /// Note a reported failure, optionally counting it.
    pub fn record_failure(&mut self, cause: &str, count: bool) {
        if count {
            self.failure_count = self.failure_count.saturating_add(1);
        }
        self.metadata
            .insert(LAST_ERROR_KEY.to_string(), cause.to_string());
    }

    /// Clear failure bookkeeping after a successful operation.
    ///
    /// Returns false when there was nothing to clear.
    pub fn record_success(&mut self, now: DateTime<Utc>) -> bool {
        if self.failure_count == 0 && self.last_error().is_none() {
            return false;
        }
        self.failure_count = 0;
        self.metadata.remove(LAST_ERROR_KEY);
        self.metadata
            .insert(LAST_SUCCESS_KEY.to_string(), format_timestamp(now));
        true
    }

    pub fn start_healing(&mut self, reason: &str, locked_until: DateTime<Utc>) {
        self.healing = HealingData {
            locked: true,
            locked_until: Some(locked_until),
            reason: reason.to_string(),
        };
    }

    pub fn finish_healing(&mut self) {
        self.healing = HealingData::default();
    }
}

/// Timestamps stored in metadata use RFC 3339 with second precision.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

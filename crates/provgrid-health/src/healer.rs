//! Healer trait and the built-in policies.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use provgrid_core::{HealerKind, HealerSettings};
use provgrid_state::Node;

/// Boxed future returned by healers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Decides how long a failing node is disabled.
///
/// The cluster calls `handle_error` while holding the node's lock, so
/// calls for one node never overlap. Implementations may wait on
/// external signals; only the node being healed is held up.
pub trait Healer: Send + Sync {
    /// Returns the disable period. `Duration::ZERO` leaves the node enabled.
    fn handle_error<'a>(&'a self, node: &'a Node) -> BoxFuture<'a, Duration>;
}

/// Records failures but never disables.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHealer;

impl Healer for NoopHealer {
    fn handle_error<'a>(&'a self, _node: &'a Node) -> BoxFuture<'a, Duration> {
        Box::pin(async { Duration::ZERO })
    }
}

/// Disables every failing node for the same period.
#[derive(Debug, Clone, Copy)]
pub struct FixedHealer {
    disable_for: Duration,
}

impl FixedHealer {
    pub fn new(disable_for: Duration) -> Self {
        Self { disable_for }
    }
}

impl Healer for FixedHealer {
    fn handle_error<'a>(&'a self, node: &'a Node) -> BoxFuture<'a, Duration> {
        Box::pin(async move {
            debug!(address = %node.address, disabled_for = ?self.disable_for, "fixed healer");
            self.disable_for
        })
    }
}

/// Exponential backoff on the node's failure count.
///
/// Below `threshold` failures nothing is disabled. At the threshold the
/// node is disabled for `base`, and every further failure doubles the
/// period up to `max`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffHealer {
    base: Duration,
    max: Duration,
    threshold: u32,
}

impl BackoffHealer {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            threshold: 1,
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    /// Disable period for a given failure count.
    pub fn period_for(&self, failures: u32) -> Duration {
        if failures < self.threshold {
            return Duration::ZERO;
        }
        let exponent = failures - self.threshold;
        // Shift clamped so the factor fits in u32.
        let factor = 1u32.checked_shl(exponent.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl Healer for BackoffHealer {
    fn handle_error<'a>(&'a self, node: &'a Node) -> BoxFuture<'a, Duration> {
        Box::pin(async move {
            let period = self.period_for(node.failure_count);
            if period.is_zero() {
                debug!(
                    address = %node.address,
                    failures = node.failure_count,
                    threshold = self.threshold,
                    "below failure threshold, node stays enabled"
                );
            } else {
                warn!(
                    address = %node.address,
                    failures = node.failure_count,
                    disabled_for = ?period,
                    "node disabled by backoff healer"
                );
            }
            period
        })
    }
}

/// Build the healer selected in the config file.
pub fn healer_from_settings(settings: &HealerSettings) -> Arc<dyn Healer> {
    match settings.kind {
        HealerKind::Noop => Arc::new(NoopHealer),
        HealerKind::Fixed => Arc::new(FixedHealer::new(settings.disable_for)),
        HealerKind::Backoff => Arc::new(
            BackoffHealer::new(settings.base, settings.max).with_threshold(settings.threshold),
        ),
    }
}

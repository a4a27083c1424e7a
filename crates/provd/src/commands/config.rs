use std::io::Write;

use provgrid_core::ProvConfig;

pub fn show(config: &ProvConfig, out: &mut impl Write) -> anyhow::Result<()> {
    write!(out, "{}", config.to_toml_string()?)?;
    Ok(())
}

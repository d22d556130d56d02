use anyhow::{Result, anyhow};
use tracing::Level;
use tracing_subscriber::fmt;

/// Installs a stderr subscriber when `verbose` is set. Library code only
/// emits events and never installs one itself.
pub fn init(verbose: bool) -> Result<()> {
    if !verbose {
        return Ok(());
    }
    fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init()
        .map_err(|err| anyhow!("failed to install logger: {}", err))
}

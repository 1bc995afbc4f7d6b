//! Script command implementation.

use std::time::Duration;

use marionette_core::{Config, ScriptChannel};

use crate::payload;

/// Run one script and print its output.
pub async fn execute(
    config: &Config,
    script: &str,
    once: bool,
    timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let script = payload::read(script).await?;
    let channel = ScriptChannel::new(config.script.clone());
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| channel.config().timeout());

    let result = tokio::select! {
        result = async {
            if once {
                channel.execute_once_with_timeout(&script, timeout).await
            } else {
                channel.execute_with_timeout(&script, timeout).await
            }
        } => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received interrupt");
            if let Some(handle) = channel.kill_handle() {
                handle.kill();
            }
            anyhow::bail!("Interrupted");
        }
    };

    channel.shutdown().await;
    payload::print_output(&result?);
    Ok(())
}

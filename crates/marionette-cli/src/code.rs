//! Code command implementation.

use std::time::Duration;

use marionette_core::{CodeChannel, Config};

use crate::payload;

/// Execute one code payload and print its captured output.
pub async fn execute(config: &Config, code: &str, timeout_ms: Option<u64>) -> anyhow::Result<()> {
    let code = payload::read(code).await?;
    let channel = CodeChannel::new(config.code.clone());
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| channel.config().timeout());

    let result = tokio::select! {
        result = channel.execute_with_timeout(&code, timeout) => result,
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

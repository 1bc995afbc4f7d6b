//! Prewarm command implementation.
//!
//! Starts the requested interpreters and reports how long each took to
//! become ready.

use marionette_core::{Channels, Config, Prewarm};
use marionette_core::channel::timed;

use crate::colors;

/// Start interpreters and print their cold-start latency.
pub async fn execute(config: &Config, script: bool, code: bool) -> anyhow::Result<()> {
    let channels = Channels::from_config(config);

    let results: Vec<(&str, Prewarm)> = match (script, code) {
        (true, true) => {
            let (script, code) = channels.prewarm_all().await;
            vec![("script engine", script), ("code helper", code)]
        }
        (true, false) => vec![("script engine", timed(channels.script.prewarm()).await)],
        (false, _) => vec![("code helper", timed(channels.code.prewarm()).await)],
    };

    let mut failures = 0;
    for (name, prewarm) in &results {
        match &prewarm.result {
            Ok(()) => println!(
                "{}  ✓{} {}{}{} ready in {}{}ms{}",
                colors::GREEN,
                colors::RESET,
                colors::BOLD,
                name,
                colors::RESET,
                colors::CYAN,
                prewarm.elapsed_ms,
                colors::RESET
            ),
            Err(e) => {
                failures += 1;
                println!(
                    "{}  ✗{} {}{}{} failed after {}ms",
                    colors::RED,
                    colors::RESET,
                    colors::BOLD,
                    name,
                    colors::RESET,
                    prewarm.elapsed_ms
                );
                eprintln!("{}    {}{}", colors::DIM, e.with_hint(), colors::RESET);
            }
        }
    }

    channels.shutdown().await;

    if failures > 0 {
        anyhow::bail!("{} interpreter(s) failed to start", failures);
    }
    Ok(())
}

//! Classify command implementation.

use crate::payload;

/// Print the class of a diagnostic and the guidance for it.
pub async fn execute(text: &str) -> anyhow::Result<()> {
    let text = payload::read(text).await?;
    let class = marionette_core::classify(&text);
    println!("{}", class);
    println!("{}", class.guidance());
    Ok(())
}

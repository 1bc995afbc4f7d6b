//! Command payloads: reading input from arguments or stdin, printing results.

use tokio::io::AsyncReadExt;

/// Return `arg` itself, or all of stdin when `arg` is "-".
pub async fn read(arg: &str) -> anyhow::Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }

    let mut text = String::new();
    tokio::io::stdin().read_to_string(&mut text).await?;
    Ok(text)
}

/// Print a channel result. Empty output prints nothing.
pub fn print_output(output: &str) {
    if !output.is_empty() {
        println!("{}", output);
    }
}

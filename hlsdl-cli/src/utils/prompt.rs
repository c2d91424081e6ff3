use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hlsdl_engine::{OverwritePolicy, OverwritePrompt};
use tracing::warn;

/// Asks on the terminal what to do with an existing output file.
pub struct StdinPrompt;

#[async_trait]
impl OverwritePrompt for StdinPrompt {
    async fn resolve(&self, output: &Path) -> OverwritePolicy {
        let output: PathBuf = output.to_path_buf();
        let answer = tokio::task::spawn_blocking(move || ask(&output)).await;
        match answer {
            Ok(Ok(line)) => parse_answer(&line),
            Ok(Err(e)) => {
                warn!(error = %e, "Could not read answer, leaving the file untouched");
                OverwritePolicy::Abort
            }
            Err(e) => {
                warn!(error = %e, "Prompt task failed, leaving the file untouched");
                OverwritePolicy::Abort
            }
        }
    }
}

fn ask(output: &Path) -> std::io::Result<String> {
    let mut stderr = std::io::stderr();
    write!(
        stderr,
        "File '{}' already exists. Overwrite it? [y]es / [c]ontinue / [N]o: ",
        output.display()
    )?;
    stderr.flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

/// Anything but an explicit yes/continue keeps the file as it is.
fn parse_answer(answer: &str) -> OverwritePolicy {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => OverwritePolicy::Overwrite,
        "c" | "continue" => OverwritePolicy::Continue,
        _ => OverwritePolicy::Abort,
    }
}

//! Transport bandwidth counters (`<daemon> stats bw`)

use std::io;
use std::path::Path;

use tokio::process::Command;

/// Run `stats bw` and flatten its output onto one line
pub async fn bandwidth_stats(executable: &Path) -> io::Result<String> {
    let output = Command::new(executable)
        .args(["stats", "bw"])
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(io::Error::other(format!(
            "'{} stats bw' failed ({}): {}",
            executable.display(),
            output.status,
            stderr.trim()
        )));
    }

    Ok(flatten_output(&String::from_utf8_lossy(&output.stdout)))
}

fn flatten_output(text: &str) -> String {
    text.trim().replace('\n', ", ")
}

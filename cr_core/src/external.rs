use std::process::{Command, Stdio};

use crate::error::{CoreError, Result};

/// Run an external tool to completion, returning its standard output.
/// A launch failure or non-zero exit is an error carrying the tool's stderr
pub fn run_tool(cmd: &mut Command) -> Result<String> {
    let desc = format!("{:?}", cmd);
    debug!("Running {}", desc);
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| CoreError::External(format!("Could not launch {}: {}", desc, e)))?;
    if output.status.success() {
        trace!("{} finished", desc);
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(CoreError::External(format!(
            "{} failed ({}): {}",
            desc,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

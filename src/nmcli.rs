//! Thin wrapper around NetworkManager's `nmcli`.
//!
//! Every adapter call goes through [`run`], which turns a non-zero exit
//! status into [`PlatformError::NmcliExecution`] carrying stderr (or stdout
//! when stderr is empty). Terse (`-t`) output is parsed with
//! [`split_terse`], which honors nmcli's `\:` and `\\` escaping.

use std::process::Command;
use tracing::trace;

use crate::error::PlatformError;

/// Runs `nmcli` with `args` and returns its stdout.
pub fn run(args: &[&str]) -> Result<String, PlatformError> {
    trace!(args = ?redact(args), "running nmcli");

    let output = Command::new("nmcli")
        .args(args)
        .output()
        .map_err(|e| PlatformError::CommandSpawn {
            command: "nmcli".to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let error_msg = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(PlatformError::NmcliExecution(error_msg));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Splits one line of terse output into its fields.
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);

    fields
}

/// Parses `KEY:VALUE` lines as printed by `nmcli -t <object> show`.
pub fn parse_key_values(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

// Secrets follow these setting names on the command line.
const SECRET_KEYS: [&str; 2] = ["wifi-sec.psk", "wifi-sec.wep-key0"];

fn redact<'a>(args: &[&'a str]) -> Vec<&'a str> {
    let mut out = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            out.push("<redacted>");
            hide_next = false;
        } else {
            hide_next = SECRET_KEYS.contains(arg);
            out.push(arg);
        }
    }
    out
}

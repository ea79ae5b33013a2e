//! Helpers for CLI output. Machine-readable results go to stdout, operator notices to stderr.

use eyre::Context as _;
use std::io::Write as _;

/// Print `value` as one line of JSON on stdout.
pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> eyre::Result<()> {
    let s = serde_json::to_string(value).context("serialize output")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write stdout")?;
    Ok(())
}

/// Best-effort line on stderr.
pub fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

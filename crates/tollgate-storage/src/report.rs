//! Per-client reports grepped out of the event log.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StorageError};

/// File name of the report for `ip`.
pub fn report_file_name(ip: &str) -> String {
    format!("{ip}_report.txt")
}

/// Rejects names that would escape the report directory.
fn check_report_address(ip: &str) -> Result<()> {
    if ip.is_empty() || ip.contains(['/', '\\', '\0']) {
        return Err(StorageError::InvalidReportAddress(ip.to_string()));
    }
    Ok(())
}

/// Copies every log line containing `ip`, in order, into
/// `<out_dir>/<ip>_report.txt` and returns that path.
///
/// Matching is a plain substring test, so `10.0.0.5` also matches
/// `10.0.0.50`. Addresses containing path separators are rejected before
/// anything is read or written.
pub fn generate_report(log_path: &Path, ip: &str, out_dir: &Path) -> Result<PathBuf> {
    check_report_address(ip)?;
    let contents = fs::read_to_string(log_path).map_err(|source| StorageError::LogUnreadable {
        path: log_path.to_path_buf(),
        source,
    })?;

    let mut report = String::new();
    let mut matched = 0usize;
    for line in contents.lines().filter(|line| line.contains(ip)) {
        report.push_str(line);
        report.push('\n');
        matched += 1;
    }

    fs::create_dir_all(out_dir)?;
    let path = out_dir.join(report_file_name(ip));
    fs::write(&path, report)?;
    debug!("Wrote {} lines for {} to {}", matched, ip, path.display());
    Ok(path)
}

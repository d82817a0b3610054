/// Resident set size of a process in MB, read from `/proc/{pid}/status`.
///
/// Returns None on any error (permission denied, process gone, non-Linux).
pub fn memory_usage_mb(pid: u32) -> Option<f64> {
    let path = format!("/proc/{}/status", pid);
    let content = std::fs::read_to_string(path).ok()?;
    parse_vm_rss_kb(&content).map(|kb| kb as f64 / 1024.0)
}

/// Extract the `VmRSS:` value (in kB) from a status file
fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

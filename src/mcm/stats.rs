//! Remote statistics sampling.
//!
//! One composite shell command gathers everything in a single exec round
//! trip. Each source is preceded by a `===NAME===` marker line; parsing
//! extracts each section independently so a missing tool on the remote side
//! only leaves its fields empty.

use super::error::{McmError, McmResult};
use super::types::{DiskUsage, Stats};

/// Command run on the remote host. `/proc/stat` is read twice one second
/// apart to derive CPU utilisation.
pub(crate) const STATS_COMMAND: &str = "echo '===HOSTNAME==='; hostname 2>/dev/null; \
echo '===UPTIME==='; cat /proc/uptime 2>/dev/null; \
echo '===LOADAVG==='; cat /proc/loadavg 2>/dev/null; \
echo '===CPU_A==='; head -1 /proc/stat 2>/dev/null; \
sleep 1; \
echo '===CPU_B==='; head -1 /proc/stat 2>/dev/null; \
echo '===NPROC==='; nproc 2>/dev/null; \
echo '===MEMINFO==='; grep -E '^(MemTotal|MemAvailable|SwapTotal|SwapFree):' /proc/meminfo 2>/dev/null; \
echo '===DF==='; df -Pk -x tmpfs -x devtmpfs 2>/dev/null; \
echo '===END==='";

const END_MARKER: &str = "===END===";

/// Jiffy counters from the aggregate `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

/// Parse the full output of [`STATS_COMMAND`].
///
/// Fails only when the output was cut short (no end marker), which means the
/// command did not run to completion.
pub(crate) fn parse_stats(output: &str) -> McmResult<Stats> {
    if !output.contains(END_MARKER) {
        return Err(McmError::Stats(
            "sampling output truncated (end marker missing)".to_string(),
        ));
    }

    let mut stats = Stats::empty();
    stats.hostname = parse_hostname(output);
    stats.uptime_secs = parse_uptime(output);
    if let Some((l1, l5, l15)) = parse_loadavg(output) {
        stats.load_1 = Some(l1);
        stats.load_5 = Some(l5);
        stats.load_15 = Some(l15);
    }
    stats.cpu_percent = match (
        parse_cpu_times(output, "CPU_A"),
        parse_cpu_times(output, "CPU_B"),
    ) {
        (Some(a), Some(b)) => cpu_percent(a, b),
        _ => None,
    };
    stats.cpu_cores = parse_nproc(output);

    let mem = parse_meminfo(output);
    stats.mem_total = mem.mem_total;
    stats.mem_available = mem.mem_available;
    stats.swap_total = mem.swap_total;
    stats.swap_free = mem.swap_free;

    stats.disks = parse_df(output);
    Ok(stats)
}

/// Extract section between markers
fn extract_section<'a>(output: &'a str, marker: &str) -> Option<&'a str> {
    let start_marker = format!("==={}===", marker);
    let start = output.find(&start_marker)?;
    let rest = &output[start + start_marker.len()..];
    let end = rest.find("===").unwrap_or(rest.len());
    let section = rest[..end].trim();
    if section.is_empty() { None } else { Some(section) }
}

fn parse_hostname(output: &str) -> Option<String> {
    let section = extract_section(output, "HOSTNAME")?;
    section.lines().next().map(|l| l.trim().to_string())
}

/// `/proc/uptime` → whole seconds since boot
fn parse_uptime(output: &str) -> Option<u64> {
    let section = extract_section(output, "UPTIME")?;
    let secs: f64 = section.split_whitespace().next()?.parse().ok()?;
    Some(secs as u64)
}

/// `/proc/loadavg` → (1min, 5min, 15min)
fn parse_loadavg(output: &str) -> Option<(f64, f64, f64)> {
    let section = extract_section(output, "LOADAVG")?;
    let mut parts = section.split_whitespace();
    Some((
        parts.next()?.parse().ok()?,
        parts.next()?.parse().ok()?,
        parts.next()?.parse().ok()?,
    ))
}

fn parse_cpu_times(output: &str, marker: &str) -> Option<CpuTimes> {
    let section = extract_section(output, marker)?;
    // "cpu  user nice system idle iowait irq softirq steal ..."
    let line = section.lines().next()?;
    if !line.starts_with("cpu ") {
        return None;
    }
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|v| v.parse().ok())
        .collect::<Option<_>>()?;
    if values.len() < 4 {
        return None;
    }
    let total: u64 = values.iter().sum();
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

fn cpu_percent(before: CpuTimes, after: CpuTimes) -> Option<f64> {
    let total = after.total.checked_sub(before.total)?;
    if total == 0 {
        return None;
    }
    let busy = after.busy.saturating_sub(before.busy);
    let pct = busy as f64 / total as f64 * 100.0;
    Some((pct * 10.0).round() / 10.0)
}

fn parse_nproc(output: &str) -> Option<u32> {
    let section = extract_section(output, "NPROC")?;
    section.lines().next()?.trim().parse().ok()
}

#[derive(Debug, Default, PartialEq)]
struct MemInfo {
    mem_total: Option<u64>,
    mem_available: Option<u64>,
    swap_total: Option<u64>,
    swap_free: Option<u64>,
}

/// `/proc/meminfo` → byte counts
fn parse_meminfo(output: &str) -> MemInfo {
    let mut info = MemInfo::default();
    let Some(section) = extract_section(output, "MEMINFO") else {
        return info;
    };
    for line in section.lines() {
        let Some((key, _)) = line.split_once(':') else {
            continue;
        };
        let bytes = extract_kb_value(line).map(|kb| kb * 1024);
        match key {
            "MemTotal" => info.mem_total = bytes,
            "MemAvailable" => info.mem_available = bytes,
            "SwapTotal" => info.swap_total = bytes,
            "SwapFree" => info.swap_free = bytes,
            _ => {}
        }
    }
    info
}

/// "MemTotal:    1234 kB" → 1234
fn extract_kb_value(line: &str) -> Option<u64> {
    line.split_whitespace().nth(1)?.parse().ok()
}

/// POSIX `df -Pk` → one entry per mounted filesystem
fn parse_df(output: &str) -> Vec<DiskUsage> {
    let Some(section) = extract_section(output, "DF") else {
        return Vec::new();
    };
    section
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                return None;
            }
            let total_kb: u64 = parts[1].parse().ok()?;
            let used_kb: u64 = parts[2].parse().ok()?;
            Some(DiskUsage {
                filesystem: parts[0].to_string(),
                // Mount points may contain spaces.
                mount_point: parts[5..].join(" "),
                total_bytes: total_kb * 1024,
                used_bytes: used_kb * 1024,
            })
        })
        .collect()
}

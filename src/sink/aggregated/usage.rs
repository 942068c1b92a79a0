//! Self cpu/memory readings for the aggregator's own metrics.

use once_cell::sync::Lazy;
use std::fs;

/// Get system clock ticks per second (usually 100, but can vary).
fn get_clk_tck() -> f64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf is safe to call with _SC_CLK_TCK.
        unsafe {
            let tck = libc::sysconf(libc::_SC_CLK_TCK);
            if tck > 0 {
                return tck as f64;
            }
        }
    }
    100.0
}

/// Get the system page size in bytes.
fn get_page_size() -> u64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf is safe to call with _SC_PAGESIZE.
        unsafe {
            let sz = libc::sysconf(libc::_SC_PAGESIZE);
            if sz > 0 {
                return sz as u64;
            }
        }
    }
    4096
}

static CLK_TCK: Lazy<f64> = Lazy::new(get_clk_tck);
static PAGE_SIZE: Lazy<u64> = Lazy::new(get_page_size);

/// CPU and memory usage of this process.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SelfUsage {
    pub cpu_user_s: f64,
    pub cpu_system_s: f64,
    pub rss_bytes: u64,
}

/// Read usage from `/proc/self/stat`; None off Linux or on parse failure.
pub fn read_self_usage() -> Option<SelfUsage> {
    let content = fs::read_to_string("/proc/self/stat").ok()?;
    parse_stat(&content)
}

fn parse_stat(content: &str) -> Option<SelfUsage> {
    // Fields after the parenthesized comm: state is field 3; utime and
    // stime are fields 14 and 15; rss (pages) is field 24.
    let rest = content.rsplit_once(')').map(|(_, r)| r)?;
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() < 22 {
        return None;
    }

    let utime: f64 = parts[11].parse().unwrap_or(0.0);
    let stime: f64 = parts[12].parse().unwrap_or(0.0);
    let rss_pages: u64 = parts[21].parse().unwrap_or(0);

    Some(SelfUsage {
        cpu_user_s: utime / *CLK_TCK,
        cpu_system_s: stime / *CLK_TCK,
        rss_bytes: rss_pages * *PAGE_SIZE,
    })
}

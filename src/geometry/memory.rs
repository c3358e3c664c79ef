//! System and process memory probes (Linux `/proc`).
//!
//! Parsers take the file contents as `&str` so they can be tested without
//! touching the filesystem; the `read_*` / `system_*` wrappers do the I/O and
//! return zeroed values when the files are unavailable.

/// `/proc/meminfo` snapshot, all values in KiB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total_kb: u64,
    /// Free plus reclaimable (buffers/cache) memory.
    pub available_kb: u64,
    pub free_kb: u64,
}

impl MemoryInfo {
    /// Fewer than 64 MiB available.
    pub fn is_constrained(&self) -> bool {
        self.available_kb < 64 * 1024
    }

    pub fn available_mb(&self) -> u64 {
        self.available_kb / 1024
    }
}

/// Resident set size and its high-water mark for this process, in KiB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessMemory {
    pub rss_kb: u64,
    pub hwm_kb: u64,
}

/// Thresholds for deciding whether a 3D G-code preview may be attempted.
pub struct GcodeMemoryLimits;

impl GcodeMemoryLimits {
    /// Minimum available RAM to attempt 3D rendering at all.
    pub const MIN_AVAILABLE_KB: u64 = 48 * 1024;
    pub const MAX_FILE_SIZE_CONSTRAINED: u64 = 2 * 1024 * 1024;
    pub const MAX_FILE_SIZE_NORMAL: u64 = 20 * 1024 * 1024;
    /// Parsed geometry size relative to the G-code file size.
    pub const EXPANSION_FACTOR: u64 = 15;
}

/// Value of a `Key:   1234 kB` line, if `line` starts with `key`.
fn field_kb(line: &str, key: &str) -> Option<u64> {
    let rest = line.strip_prefix(key)?.strip_prefix(':')?;
    rest.split_whitespace().next()?.parse().ok()
}

/// Parse a full `/proc/meminfo` text.
///
/// Kernels older than 3.14 have no `MemAvailable`; `MemFree` is used as a
/// conservative stand-in.
pub fn parse_meminfo(content: &str) -> MemoryInfo {
    let mut info = MemoryInfo::default();
    for line in content.lines() {
        if let Some(kb) = field_kb(line, "MemTotal") {
            info.total_kb = kb;
        } else if let Some(kb) = field_kb(line, "MemAvailable") {
            info.available_kb = kb;
        } else if let Some(kb) = field_kb(line, "MemFree") {
            info.free_kb = kb;
        }
    }
    if info.available_kb == 0 && info.free_kb > 0 {
        info.available_kb = info.free_kb;
    }
    info
}

/// Available memory in KiB from `/proc/meminfo` text; 0 when absent.
pub fn parse_meminfo_available_kb(content: &str) -> u64 {
    parse_meminfo(content).available_kb
}

/// Parse `VmRSS` / `VmHWM` out of `/proc/self/status` text.
pub fn parse_process_status(content: &str) -> ProcessMemory {
    let mut mem = ProcessMemory::default();
    for line in content.lines() {
        if let Some(kb) = field_kb(line, "VmRSS") {
            mem.rss_kb = kb;
        } else if let Some(kb) = field_kb(line, "VmHWM") {
            mem.hwm_kb = kb;
        }
    }
    mem
}

/// Current system memory; all zeros when `/proc/meminfo` cannot be read.
pub fn system_memory_info() -> MemoryInfo {
    match std::fs::read_to_string("/proc/meminfo") {
        Ok(text) => parse_meminfo(&text),
        Err(e) => {
            tracing::debug!("cannot read /proc/meminfo: {e}");
            MemoryInfo::default()
        }
    }
}

/// This process's RSS and peak RSS. `None` when unavailable.
pub fn read_process_memory() -> Option<ProcessMemory> {
    let text = std::fs::read_to_string("/proc/self/status").ok()?;
    let mem = parse_process_status(&text);
    (mem.rss_kb > 0).then_some(mem)
}

/// Whether a G-code file of `file_size` bytes can be previewed in 3D given
/// `mem`.
///
/// Unknown memory (`available_kb == 0`) only admits files below the
/// constrained-device limit. Otherwise the estimated parsed size must fit
/// twice into available memory.
pub fn is_gcode_3d_render_safe(file_size: u64, mem: &MemoryInfo) -> bool {
    if mem.available_kb == 0 {
        return file_size < GcodeMemoryLimits::MAX_FILE_SIZE_CONSTRAINED;
    }

    if mem.available_kb < GcodeMemoryLimits::MIN_AVAILABLE_KB {
        return false;
    }

    let max_file_size = if mem.is_constrained() {
        GcodeMemoryLimits::MAX_FILE_SIZE_CONSTRAINED
    } else {
        GcodeMemoryLimits::MAX_FILE_SIZE_NORMAL
    };
    if file_size > max_file_size {
        return false;
    }

    let estimated_kb = file_size.saturating_mul(GcodeMemoryLimits::EXPANSION_FACTOR) / 1024;
    mem.available_kb > estimated_kb.saturating_mul(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "\
MemTotal:        3884096 kB
MemFree:          211504 kB
MemAvailable:    2097152 kB
Buffers:           84120 kB
Cached:          1523780 kB
";

    const MEMINFO_OLD_KERNEL: &str = "\
MemTotal:         505856 kB
MemFree:           81920 kB
Buffers:           10240 kB
";

    #[test]
    fn parses_meminfo_fields() {
        let info = parse_meminfo(MEMINFO);
        assert_eq!(info.total_kb, 3_884_096);
        assert_eq!(info.free_kb, 211_504);
        assert_eq!(info.available_kb, 2_097_152);
        assert_eq!(info.available_mb(), 2048);
        assert!(!info.is_constrained());
    }

    #[test]
    fn falls_back_to_memfree_without_memavailable() {
        assert_eq!(parse_meminfo_available_kb(MEMINFO_OLD_KERNEL), 81_920);
    }

    #[test]
    fn garbage_meminfo_gives_zero() {
        assert_eq!(parse_meminfo_available_kb(""), 0);
        assert_eq!(parse_meminfo_available_kb("MemAvailable: lots kB"), 0);
    }

    #[test]
    fn parses_process_status() {
        let status = "Name:\thelix-core\nVmHWM:\t   90112 kB\nVmRSS:\t   65536 kB\n";
        let mem = parse_process_status(status);
        assert_eq!(mem.rss_kb, 65_536);
        assert_eq!(mem.hwm_kb, 90_112);
    }

    #[test]
    fn unknown_memory_only_allows_small_files() {
        let unknown = MemoryInfo::default();
        assert!(is_gcode_3d_render_safe(1024 * 1024, &unknown));
        assert!(!is_gcode_3d_render_safe(3 * 1024 * 1024, &unknown));
    }

    #[test]
    fn below_minimum_available_is_never_safe() {
        let mem = MemoryInfo {
            available_kb: 40 * 1024,
            ..Default::default()
        };
        assert!(!is_gcode_3d_render_safe(1024, &mem));
    }

    #[test]
    fn constrained_device_limits_file_size() {
        let mem = MemoryInfo {
            available_kb: 56 * 1024,
            ..Default::default()
        };
        assert!(mem.is_constrained());
        assert!(is_gcode_3d_render_safe(1024 * 1024, &mem));
        assert!(!is_gcode_3d_render_safe(3 * 1024 * 1024, &mem));
    }

    #[test]
    fn normal_device_needs_headroom() {
        let mem = MemoryInfo {
            available_kb: 512 * 1024,
            ..Default::default()
        };
        // 15 MiB * 15 = 225 MiB estimated, needs 450 MiB.
        assert!(is_gcode_3d_render_safe(15 * 1024 * 1024, &mem));
        assert!(!is_gcode_3d_render_safe(21 * 1024 * 1024, &mem));

        let tight = MemoryInfo {
            available_kb: 300 * 1024,
            ..Default::default()
        };
        assert!(!is_gcode_3d_render_safe(15 * 1024 * 1024, &tight));
    }
}

//! Page-level NUMA placement and CPU pinning.
//!
//! All calls degrade to no-ops on hosts without NUMA support (or outside
//! Linux); partition metadata stays valid either way, so the rest of the
//! runtime never branches on availability.

#[cfg(target_os = "linux")]
mod imp {
    use std::fs;
    use std::sync::OnceLock;

    /// Parses a sysfs cpulist such as `0-3,8,10-11`.
    fn cpulist_contains(list: &str, cpu: usize) -> bool {
        list.trim().split(',').any(|part| {
            let part = part.trim();
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: usize = match lo.parse() {
                        Ok(v) => v,
                        Err(_) => return false,
                    };
                    let hi: usize = match hi.parse() {
                        Ok(v) => v,
                        Err(_) => return false,
                    };
                    (lo..=hi).contains(&cpu)
                }
                None => part.parse::<usize>().map_or(false, |v| v == cpu),
            }
        })
    }

    fn cpu_node_map() -> &'static Vec<(usize, String)> {
        static MAP: OnceLock<Vec<(usize, String)>> = OnceLock::new();
        MAP.get_or_init(|| {
            let mut nodes = Vec::new();
            let Ok(entries) = fs::read_dir("/sys/devices/system/node") else {
                return nodes;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                let Some(id) = name.strip_prefix("node").and_then(|s| s.parse().ok())
                else {
                    continue;
                };
                if let Ok(list) = fs::read_to_string(entry.path().join("cpulist")) {
                    nodes.push((id, list));
                }
            }
            nodes.sort_by_key(|&(id, _)| id);
            nodes
        })
    }

    pub fn node_of_cpu(cpu: usize) -> Option<usize> {
        cpu_node_map()
            .iter()
            .find(|(_, list)| cpulist_contains(list, cpu))
            .map(|&(id, _)| id)
    }

    pub fn page_size() -> usize {
        static PAGE: OnceLock<usize> = OnceLock::new();
        *PAGE.get_or_init(|| {
            let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if sz > 0 {
                sz as usize
            } else {
                4096
            }
        })
    }

    /// Binds the page-aligned interior of `[addr, addr + len)` to `node`.
    /// Failures (no NUMA, permissions) are logged and ignored.
    pub fn bind_range(addr: *const u8, len: usize, node: usize) {
        if node >= 64 || len == 0 {
            return;
        }
        let page = page_size();
        let start = addr as usize;
        let aligned = (start + page - 1) & !(page - 1);
        let skip = aligned - start;
        if skip >= len {
            return;
        }
        let bind_len = (len - skip) & !(page - 1);
        if bind_len == 0 {
            return;
        }

        const MPOL_BIND: libc::c_long = 2;
        let mask: u64 = 1 << node;
        let ret = unsafe {
            libc::syscall(
                libc::SYS_mbind,
                aligned,
                bind_len,
                MPOL_BIND,
                &mask as *const u64,
                64usize,
                0usize,
            )
        };
        if ret != 0 {
            log::debug!("mbind to node {} skipped: {}", node, std::io::Error::last_os_error());
        }
    }

    /// Pins the calling thread to one CPU.
    pub fn pin_current_thread(cpu: usize) {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            libc::CPU_SET(cpu, &mut set);
            let ret = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
            if ret != 0 {
                log::debug!(
                    "pinning to cpu {} skipped: {}",
                    cpu,
                    std::io::Error::last_os_error()
                );
            }
        }
    }

    #[cfg(test)]
    pub(super) fn cpulist_contains_for_test(list: &str, cpu: usize) -> bool {
        cpulist_contains(list, cpu)
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    pub fn node_of_cpu(_cpu: usize) -> Option<usize> {
        None
    }

    pub fn page_size() -> usize {
        4096
    }

    pub fn bind_range(_addr: *const u8, _len: usize, _node: usize) {}

    pub fn pin_current_thread(_cpu: usize) {}
}

pub use imp::{bind_range, node_of_cpu, page_size, pin_current_thread};

/// Binds a typed buffer's pages to `node`.
pub fn bind_to_node<T>(buf: &mut [T], node: usize) {
    let len = std::mem::size_of_val(buf);
    bind_range(buf.as_ptr() as *const u8, len, node);
}

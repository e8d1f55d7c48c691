use log::{debug, warn};

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Controls the per-interface IPv4 reverse-path-filter sysctl.
///
/// Strict rp_filter drops multicast arriving from topologically
/// unexpected sources, so the proxy disables it on its interfaces
/// (including `all`). Every value that was changed is remembered and
/// written back when this guard is dropped.
#[derive(Debug, Default)]
pub struct ReversePathFilter {
    saved: BTreeMap<String, String>,
}

fn sysctl_path(if_name: &str) -> PathBuf {
    PathBuf::from(format!("/proc/sys/net/ipv4/conf/{}/rp_filter", if_name))
}

impl ReversePathFilter {
    pub fn new() -> ReversePathFilter {
        let mut rp = ReversePathFilter::default();
        // the per-interface value only wins if "all" permits it
        rp.disable("all");
        rp
    }

    /// Disables rp_filter on the interface, remembering the previous
    /// value for restoration.
    pub fn disable(&mut self, if_name: &str) {
        let path = sysctl_path(if_name);
        let current = match fs::read_to_string(&path) {
            Ok(value) => value.trim().to_string(),
            Err(err) => {
                warn!("cannot read {}: {}", path.display(), err);
                return;
            }
        };
        if current == "0" {
            return;
        }
        match fs::write(&path, "0") {
            Ok(()) => {
                debug!("rp_filter of {} disabled (was {})", if_name, current);
                self.saved.entry(if_name.to_string()).or_insert(current);
            }
            Err(err) => warn!("cannot write {}: {}", path.display(), err),
        }
    }

    /// Interfaces whose rp_filter is currently overridden.
    pub fn touched(&self) -> Vec<&str> {
        self.saved.keys().map(|s| s.as_str()).collect()
    }

    /// Restores every remembered value (also runs on drop).
    pub fn restore_all(&mut self) {
        for (if_name, value) in std::mem::take(&mut self.saved) {
            let path = sysctl_path(&if_name);
            match fs::write(&path, &value) {
                Ok(()) => debug!("rp_filter of {} restored to {}", if_name, value),
                Err(err) => warn!("cannot restore {}: {}", path.display(), err),
            }
        }
    }
}

impl Drop for ReversePathFilter {
    fn drop(&mut self) {
        self.restore_all();
    }
}

use crate::proxy::{TimerHandle, TimerToken};
use crate::sys::Mfib;
use crate::McAddr;

use log::{trace, warn};

use std::collections::BTreeMap;
use std::sync::Arc;

/// A dynamically learned multicast source on the routing side. The
/// kernel packet counter observed at the last liveness check decides
/// whether the source is still active (`None` before the first check).
#[derive(Clone, Debug)]
pub struct RouteSource {
    pub addr: McAddr,
    pub timer: Option<TimerHandle>,
    pub last_packet_count: Option<u64>,
}

/// Result of a liveness refresh.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RefreshOutcome {
    /// The kernel counter moved; the source stays.
    Live,
    /// The counter did not move; the source was deleted.
    Unused,
}

#[derive(Default)]
struct GroupData {
    sources: BTreeMap<McAddr, RouteSource>,
    /// Input interface each source was learned on.
    iface_map: BTreeMap<McAddr, u32>,
}

/// The per-instance cache of `(group -> sources, input interfaces)`
/// driven by kernel cache-miss events, with liveness derived from the
/// MFIB packet counters.
pub struct RoutingData {
    mfib: Arc<dyn Mfib>,
    data: BTreeMap<McAddr, GroupData>,
}

impl RoutingData {
    pub fn new(mfib: Arc<dyn Mfib>) -> RoutingData {
        RoutingData {
            mfib,
            data: BTreeMap::new(),
        }
    }

    /// Adds or refreshes a source. On refresh the liveness counter is
    /// resynchronized with the kernel and the timer replaced.
    pub fn set_source(&mut self, if_index: u32, gaddr: McAddr, source: RouteSource) {
        let saddr = source.addr;
        let group = self.data.entry(gaddr).or_default();
        match group.sources.get_mut(&saddr) {
            Some(existing) => {
                existing.timer = source.timer;
                existing.last_packet_count =
                    self.mfib.mroute_packet_count(&saddr, &gaddr).ok();
            }
            None => {
                group.sources.insert(saddr, source);
            }
        }
        if let Some(prev) = group.iface_map.insert(saddr, if_index) {
            if prev != if_index {
                warn!(
                    "source {} of group {} moved from interface {} to {}",
                    saddr, gaddr, prev, if_index
                );
            }
        }
    }

    pub fn del_source(&mut self, gaddr: &McAddr, saddr: &McAddr) {
        if let Some(group) = self.data.get_mut(gaddr) {
            group.sources.remove(saddr);
            group.iface_map.remove(saddr);
            if group.sources.is_empty() {
                self.data.remove(gaddr);
            }
        }
    }

    /// Rearms the liveness timer of a source.
    pub fn set_timer(&mut self, gaddr: &McAddr, saddr: &McAddr, timer: TimerHandle) {
        if let Some(source) = self
            .data
            .get_mut(gaddr)
            .and_then(|g| g.sources.get_mut(saddr))
        {
            source.timer = Some(timer);
        }
    }

    /// True if the source's current timer is exactly `handle`.
    pub fn timer_matches(&self, gaddr: &McAddr, saddr: &McAddr, handle: &TimerHandle) -> bool {
        self.data
            .get(gaddr)
            .and_then(|g| g.sources.get(saddr))
            .map(|s| TimerToken::slot_matches(&s.timer, handle))
            .unwrap_or(false)
    }

    /// Compares the kernel packet counter against the last observed
    /// value: unchanged means unused and the source is deleted,
    /// otherwise the stored counter is refreshed.
    pub fn refresh_source_or_del_if_unused(
        &mut self,
        gaddr: &McAddr,
        saddr: &McAddr,
    ) -> RefreshOutcome {
        let current = self.mfib.mroute_packet_count(saddr, gaddr).ok();
        let Some(source) = self
            .data
            .get_mut(gaddr)
            .and_then(|g| g.sources.get_mut(saddr))
        else {
            return RefreshOutcome::Unused;
        };

        if source.last_packet_count == current {
            trace!("source {} of group {} is idle, dropping it", saddr, gaddr);
            self.del_source(gaddr, saddr);
            RefreshOutcome::Unused
        } else {
            source.last_packet_count = current;
            RefreshOutcome::Live
        }
    }

    /// Addresses of all currently known sources of the group.
    pub fn source_addrs(&self, gaddr: &McAddr) -> Vec<McAddr> {
        self.data
            .get(gaddr)
            .map(|g| g.sources.keys().copied().collect())
            .unwrap_or_default()
    }

    /// The input interface each source of the group was learned on.
    pub fn input_if(&self, gaddr: &McAddr, saddr: &McAddr) -> Option<u32> {
        self.data
            .get(gaddr)
            .and_then(|g| g.iface_map.get(saddr))
            .copied()
    }

    /// Groups with at least one known source.
    pub fn groups(&self) -> Vec<McAddr> {
        self.data.keys().copied().collect()
    }
}

use crate::proxy::{TimerHandle, TimerToken};
use crate::{GroupMemProtocol, McAddr};

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Filter mode of a group record or subscription (RFC 3376 §4.2.12).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum McFilter {
    Include,
    Exclude,
}

impl core::fmt::Display for McFilter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            McFilter::Include => write!(f, "INCLUDE"),
            McFilter::Exclude => write!(f, "EXCLUDE"),
        }
    }
}

/// One source of a group, with its (possibly shared) timer and the
/// query retransmission state. `retransmission_count` of -1 means the
/// source is not in a retransmission state.
#[derive(Clone, Debug)]
pub struct SourceEntry {
    pub addr: McAddr,
    pub timer: Option<TimerHandle>,
    pub retransmission_count: i32,
}

impl SourceEntry {
    pub fn new(addr: McAddr) -> SourceEntry {
        SourceEntry {
            addr,
            timer: None,
            retransmission_count: -1,
        }
    }
}

/// A set of sources keyed (and ordered) by address.
///
/// Union keeps the already present entry on collision, so the set
/// operators never clobber running timers; re-arming is an explicit
/// separate step in the querier.
#[derive(Clone, Debug, Default)]
pub struct SourceList {
    entries: BTreeMap<McAddr, SourceEntry>,
}

impl SourceList {
    pub fn new() -> SourceList {
        SourceList::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, addr: &McAddr) -> bool {
        self.entries.contains_key(addr)
    }

    pub fn get(&self, addr: &McAddr) -> Option<&SourceEntry> {
        self.entries.get(addr)
    }

    pub fn get_mut(&mut self, addr: &McAddr) -> Option<&mut SourceEntry> {
        self.entries.get_mut(addr)
    }

    /// Inserts the entry unless its address is already present.
    pub fn insert(&mut self, entry: SourceEntry) -> bool {
        match self.entries.entry(entry.addr) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(entry);
                true
            }
        }
    }

    pub fn insert_addr(&mut self, addr: McAddr) -> bool {
        self.insert(SourceEntry::new(addr))
    }

    pub fn remove(&mut self, addr: &McAddr) -> Option<SourceEntry> {
        self.entries.remove(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceEntry> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SourceEntry> {
        self.entries.values_mut()
    }

    pub fn addrs(&self) -> impl Iterator<Item = &McAddr> {
        self.entries.keys()
    }

    /// `A += B`: existing entries (and their timers) survive.
    pub fn union_with(&mut self, other: &SourceList) {
        for entry in other.iter() {
            self.insert(entry.clone());
        }
    }

    /// `A *= B`: keeps only addresses also present in `other`.
    pub fn intersect_with(&mut self, other: &SourceList) {
        self.entries.retain(|addr, _| other.contains(addr));
    }

    /// `A -= B`: removes all addresses present in `other`.
    pub fn subtract(&mut self, other: &SourceList) {
        self.entries.retain(|addr, _| !other.contains(addr));
    }

    /// Removes all entries whose timer is exactly `handle` and returns
    /// them.
    pub fn take_matching_timer(&mut self, handle: &TimerHandle) -> Vec<SourceEntry> {
        let matching: Vec<McAddr> = self
            .entries
            .values()
            .filter(|e| TimerToken::slot_matches(&e.timer, handle))
            .map(|e| e.addr)
            .collect();
        matching
            .iter()
            .filter_map(|a| self.entries.remove(a))
            .collect()
    }
}

impl FromIterator<McAddr> for SourceList {
    fn from_iter<T: IntoIterator<Item = McAddr>>(iter: T) -> SourceList {
        let mut list = SourceList::new();
        for addr in iter {
            list.insert_addr(addr);
        }
        list
    }
}

impl PartialEq for SourceList {
    /// Sets compare by addresses; timers are bookkeeping.
    fn eq(&self, other: &SourceList) -> bool {
        self.len() == other.len() && self.addrs().zip(other.addrs()).all(|(a, b)| a == b)
    }
}

impl Eq for SourceList {}

impl core::ops::Add<&SourceList> for &SourceList {
    type Output = SourceList;

    fn add(self, other: &SourceList) -> SourceList {
        let mut out = self.clone();
        out.union_with(other);
        out
    }
}

impl core::ops::Mul<&SourceList> for &SourceList {
    type Output = SourceList;

    fn mul(self, other: &SourceList) -> SourceList {
        let mut out = self.clone();
        out.intersect_with(other);
        out
    }
}

impl core::ops::Sub<&SourceList> for &SourceList {
    type Output = SourceList;

    fn sub(self, other: &SourceList) -> SourceList {
        let mut out = self.clone();
        out.subtract(other);
        out
    }
}

impl core::fmt::Display for SourceList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut first = true;
        for addr in self.addrs() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", addr)?;
            first = false;
        }
        Ok(())
    }
}

/// Per-group state of a downstream querier (RFC 3810 §7.2).
///
/// Invariants:
/// - `filter_mode == Exclude` iff `filter_timer` is set.
/// - in INCLUDE mode `exclude_list` is empty.
/// - a group in INCLUDE mode with an empty requested list is removed
///   from the database by the querier.
#[derive(Clone, Debug)]
pub struct GroupInfo {
    pub filter_mode: McFilter,
    /// Effective protocol version for this group; pinned below the
    /// querier version while older hosts are present.
    pub compatibility_mode: GroupMemProtocol,
    pub older_host_present_timer: Option<TimerHandle>,
    /// Required in EXCLUDE mode; its expiry switches back to INCLUDE.
    pub filter_timer: Option<TimerHandle>,
    /// The include list in INCLUDE mode, the requested list (sources
    /// with running timers) in EXCLUDE mode.
    pub include_requested_list: SourceList,
    /// Sources excluded with no running timer (EXCLUDE mode only).
    pub exclude_list: SourceList,
    pub group_retransmission_timer: Option<TimerHandle>,
    pub group_retransmission_count: i32,
    pub source_retransmission_timer: Option<TimerHandle>,
}

impl GroupInfo {
    pub fn new(compatibility_mode: GroupMemProtocol) -> GroupInfo {
        GroupInfo {
            filter_mode: McFilter::Include,
            compatibility_mode,
            older_host_present_timer: None,
            filter_timer: None,
            include_requested_list: SourceList::new(),
            exclude_list: SourceList::new(),
            group_retransmission_timer: None,
            group_retransmission_count: 0,
            source_retransmission_timer: None,
        }
    }

    /// True while older-version hosts pin this group below the querier
    /// version (BLOCK records are ignored, TO_EX drops its sources).
    pub fn is_in_backward_compatibility_mode(&self, querier_version: GroupMemProtocol) -> bool {
        self.compatibility_mode != querier_version
    }
}

/// The membership database of one downstream interface (RFC 4605 §4.1).
#[derive(Debug)]
pub struct MembershipDb {
    /// Largest version this querier advertises.
    pub querier_version_mode: GroupMemProtocol,
    pub is_querier: bool,
    pub groups: BTreeMap<McAddr, GroupInfo>,
    pub general_query_timer: Option<TimerHandle>,
    pub startup_query_count: u32,
}

impl MembershipDb {
    pub fn new(querier_version_mode: GroupMemProtocol) -> MembershipDb {
        MembershipDb {
            querier_version_mode,
            is_querier: true,
            groups: BTreeMap::new(),
            general_query_timer: None,
            startup_query_count: 0,
        }
    }
}

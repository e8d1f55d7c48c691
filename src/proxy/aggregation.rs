use crate::conf::{
    Direction, FilterType, GlobalTableSet, InterfaceConf, RuleMatchingType, SaddrSet,
};
use crate::proxy::{McFilter, SourceList};
use crate::McAddr;

use log::warn;

/// Largest filter set that is materialized for EXCLUDE-mode
/// projections; beyond this the filter degrades to its wildcard
/// behavior (with a warning).
const ENUMERATION_CAP: usize = 1 << 16;

/// A `(filter_mode, source_list)` membership state as it flows through
/// aggregation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceState {
    pub mode: McFilter,
    pub sources: SourceList,
}

impl SourceState {
    /// The neutral element of [`SourceState::merge`]: INCLUDE({}).
    pub fn include_empty() -> SourceState {
        SourceState {
            mode: McFilter::Include,
            sources: SourceList::new(),
        }
    }

    pub fn new(mode: McFilter, sources: SourceList) -> SourceState {
        SourceState { mode, sources }
    }

    /// True for INCLUDE({}), the state that subscribes nothing.
    pub fn is_empty_include(&self) -> bool {
        self.mode == McFilter::Include && self.sources.is_empty()
    }

    /// Merges another downstream membership into this one
    /// (commutative and associative):
    ///
    /// - IN(A) ⊕ IN(B) = IN(A ∪ B)
    /// - IN(A) ⊕ EX(B) = EX(B − A)
    /// - EX(A) ⊕ IN(B) = EX(A − B)
    /// - EX(A) ⊕ EX(B) = EX(A ∩ B)
    pub fn merge(&mut self, other: &SourceState) {
        use McFilter::*;
        match (self.mode, other.mode) {
            (Include, Include) => self.sources.union_with(&other.sources),
            (Include, Exclude) => {
                let mut sources = other.sources.clone();
                sources.subtract(&self.sources);
                self.mode = Exclude;
                self.sources = sources;
            }
            (Exclude, Include) => self.sources.subtract(&other.sources),
            (Exclude, Exclude) => self.sources.intersect_with(&other.sources),
        }
    }

    /// Projects the state through a black/whitelist filter set.
    ///
    /// Returns `(kept, remainder)`: what this upstream may carry and
    /// what is left for further upstreams under the FIRST discipline.
    /// A wildcard whitelist keeps everything, a wildcard blacklist
    /// removes everything.
    pub fn apply_filter(
        &self,
        filter_type: FilterType,
        set: &SaddrSet,
    ) -> (SourceState, SourceState) {
        use FilterType::*;
        use McFilter::*;

        if let SaddrSet::Wildcard(_) = set {
            return match filter_type {
                Whitelist => (self.clone(), SourceState::include_empty()),
                Blacklist => (SourceState::include_empty(), self.clone()),
            };
        }

        match self.mode {
            Include => {
                let mut kept = SourceList::new();
                let mut remainder = SourceList::new();
                for entry in self.sources.iter() {
                    let in_set = set.contains(&entry.addr);
                    let keep = match filter_type {
                        Whitelist => in_set,
                        Blacklist => !in_set,
                    };
                    if keep {
                        kept.insert(entry.clone());
                    } else {
                        remainder.insert(entry.clone());
                    }
                }
                (
                    SourceState::new(Include, kept),
                    SourceState::new(Include, remainder),
                )
            }
            Exclude => {
                // an EXCLUDE state covers "everything but X"; cutting
                // it against a concrete set needs that set materialized
                let Some(materialized) = set.enumerate(ENUMERATION_CAP) else {
                    warn!(
                        "filter set too large to project an EXCLUDE membership, \
                         treating it as a wildcard"
                    );
                    return match filter_type {
                        Whitelist => (self.clone(), SourceState::include_empty()),
                        Blacklist => (SourceState::include_empty(), self.clone()),
                    };
                };
                let filter_list: SourceList = materialized.into_iter().collect();

                // F − X is what a whitelist still lets through
                let allowed = &filter_list - &self.sources;
                // X ∪ F is excluded once the whitelisted part is handled
                let mut excluded = self.sources.clone();
                excluded.union_with(&filter_list);

                match filter_type {
                    Whitelist => (
                        SourceState::new(Include, allowed),
                        SourceState::new(Exclude, excluded),
                    ),
                    Blacklist => (
                        SourceState::new(Exclude, excluded),
                        SourceState::new(Include, allowed),
                    ),
                }
            }
        }
    }
}

/// FNV-1a over the address bytes; a stable hash so the MUTEX partition
/// does not depend on process-specific hasher state.
fn stable_hash(addr: &McAddr) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in addr.octets() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Deterministic MUTEX assignment of one source:
/// `(hash(source) + window) % n`, where `window` advances every MUTEX
/// timeout so no upstream is preferred forever.
pub fn mutex_slot(addr: &McAddr, n_upstreams: usize, window: u64) -> usize {
    (stable_hash(addr).wrapping_add(window) % n_upstreams as u64) as usize
}

/// Splits a source list into per-upstream partitions by
/// [`mutex_slot`].
pub fn mutex_partition(sources: &SourceList, n_upstreams: usize, window: u64) -> Vec<SourceList> {
    let mut parts = vec![SourceList::new(); n_upstreams];
    for entry in sources.iter() {
        parts[mutex_slot(&entry.addr, n_upstreams, window)].insert(entry.clone());
    }
    parts
}

/// Computes the per-upstream subscription states for one group.
///
/// `downstream_states` are the queriers' `(mode, sources)`
/// contributions, `upstreams` the instance's upstream interfaces in
/// configuration order. The result is aligned with `upstreams`; every
/// upstream gets a state (INCLUDE({}) clears a stale subscription).
pub fn aggregate_group(
    gaddr: &McAddr,
    downstream_states: &[(McFilter, SourceList)],
    upstreams: &[(u32, &InterfaceConf)],
    tables: &GlobalTableSet,
    discipline: RuleMatchingType,
    window: u64,
) -> Vec<(u32, SourceState)> {
    let mut combined = SourceState::include_empty();
    for (mode, sources) in downstream_states {
        combined.merge(&SourceState::new(*mode, sources.clone()));
    }

    let project = |state: &SourceState, conf: &InterfaceConf| -> (SourceState, SourceState) {
        match conf.saddr_set(tables, Direction::Out, "*", gaddr) {
            Some((filter_type, set)) => state.apply_filter(filter_type, &set),
            None => (state.clone(), SourceState::include_empty()),
        }
    };

    match discipline {
        RuleMatchingType::All => upstreams
            .iter()
            .map(|(if_index, conf)| (*if_index, project(&combined, conf).0))
            .collect(),

        RuleMatchingType::First => {
            let mut remaining = combined;
            let mut result = Vec::with_capacity(upstreams.len());
            for (if_index, conf) in upstreams {
                let (kept, remainder) = project(&remaining, conf);
                result.push((*if_index, kept));
                remaining = remainder;
            }
            result
        }

        RuleMatchingType::Mutex => {
            let n = upstreams.len().max(1);
            let states: Vec<SourceState> = if combined.mode == McFilter::Exclude
                && combined.sources.is_empty()
            {
                // EXCLUDE({}) has no sources to split; the whole
                // subscription goes to the group's deterministic slot
                let slot = mutex_slot(gaddr, n, window);
                (0..n)
                    .map(|i| {
                        if i == slot {
                            combined.clone()
                        } else {
                            SourceState::include_empty()
                        }
                    })
                    .collect()
            } else {
                mutex_partition(&combined.sources, n, window)
                    .into_iter()
                    .map(|part| SourceState::new(combined.mode, part))
                    .collect()
            };
            upstreams
                .iter()
                .zip(states)
                .map(|((if_index, conf), state)| (*if_index, project(&state, conf).0))
                .collect()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::conf::{AddrMatch, RuleAddr, RuleBinding, RuleBox, IfaceType, Table};
    use proptest::prelude::*;

    fn addr(s: &str) -> McAddr {
        s.parse().unwrap()
    }

    fn list(addrs: &[&str]) -> SourceList {
        addrs.iter().map(|a| a.parse().unwrap()).collect()
    }

    fn inc(addrs: &[&str]) -> SourceState {
        SourceState::new(McFilter::Include, list(addrs))
    }

    fn exc(addrs: &[&str]) -> SourceState {
        SourceState::new(McFilter::Exclude, list(addrs))
    }

    fn merged(a: &SourceState, b: &SourceState) -> SourceState {
        let mut out = a.clone();
        out.merge(b);
        out
    }

    #[test]
    fn merge_table() {
        assert_eq!(
            merged(&inc(&["1.1.1.1"]), &inc(&["2.2.2.2"])),
            inc(&["1.1.1.1", "2.2.2.2"])
        );
        assert_eq!(
            merged(&inc(&["1.1.1.1"]), &exc(&["1.1.1.1", "2.2.2.2"])),
            exc(&["2.2.2.2"])
        );
        assert_eq!(
            merged(&exc(&["1.1.1.1", "2.2.2.2"]), &inc(&["1.1.1.1"])),
            exc(&["2.2.2.2"])
        );
        assert_eq!(
            merged(&exc(&["1.1.1.1", "2.2.2.2"]), &exc(&["2.2.2.2", "3.3.3.3"])),
            exc(&["2.2.2.2"])
        );
    }

    fn arb_state() -> impl Strategy<Value = SourceState> {
        (
            any::<bool>(),
            proptest::collection::btree_set(0u32..8, 0..5),
        )
            .prop_map(|(exclude, set)| {
                let sources: SourceList = set
                    .into_iter()
                    .map(|v| McAddr::V4([10, 0, 0, v as u8]))
                    .collect();
                SourceState::new(
                    if exclude { McFilter::Exclude } else { McFilter::Include },
                    sources,
                )
            })
    }

    proptest! {
        #[test]
        fn merge_commutative(a in arb_state(), b in arb_state()) {
            prop_assert_eq!(merged(&a, &b), merged(&b, &a));
        }

        #[test]
        fn merge_associative(a in arb_state(), b in arb_state(), c in arb_state()) {
            prop_assert_eq!(
                merged(&merged(&a, &b), &c),
                merged(&a, &merged(&b, &c))
            );
        }
    }

    #[test]
    fn filter_projection_include() {
        let set = SaddrSet::Set(vec![AddrMatch::Single(addr("1.1.1.1"))]);
        let state = inc(&["1.1.1.1", "2.2.2.2"]);

        let (kept, rem) = state.apply_filter(FilterType::Whitelist, &set);
        assert_eq!(kept, inc(&["1.1.1.1"]));
        assert_eq!(rem, inc(&["2.2.2.2"]));

        let (kept, rem) = state.apply_filter(FilterType::Blacklist, &set);
        assert_eq!(kept, inc(&["2.2.2.2"]));
        assert_eq!(rem, inc(&["1.1.1.1"]));
    }

    #[test]
    fn filter_projection_exclude() {
        let set = SaddrSet::Set(vec![
            AddrMatch::Single(addr("1.1.1.1")),
            AddrMatch::Single(addr("3.3.3.3")),
        ]);
        let state = exc(&["1.1.1.1", "2.2.2.2"]);

        // a whitelist can still deliver F - X
        let (kept, rem) = state.apply_filter(FilterType::Whitelist, &set);
        assert_eq!(kept, inc(&["3.3.3.3"]));
        assert_eq!(rem, exc(&["1.1.1.1", "2.2.2.2", "3.3.3.3"]));

        let (kept, rem) = state.apply_filter(FilterType::Blacklist, &set);
        assert_eq!(kept, exc(&["1.1.1.1", "2.2.2.2", "3.3.3.3"]));
        assert_eq!(rem, inc(&["3.3.3.3"]));
    }

    #[test]
    fn filter_projection_wildcard() {
        let set = SaddrSet::Wildcard(crate::AddrFamily::V4);
        let state = exc(&["1.1.1.1"]);
        let (kept, rem) = state.apply_filter(FilterType::Whitelist, &set);
        assert_eq!(kept, state);
        assert!(rem.is_empty_include());
        let (kept, rem) = state.apply_filter(FilterType::Blacklist, &set);
        assert!(kept.is_empty_include());
        assert_eq!(rem, state);
    }

    #[test]
    fn mutex_partition_covers_disjointly() {
        let sources = list(&["1.1.1.1", "2.2.2.2", "3.3.3.3", "4.4.4.4"]);
        for window in 0..4u64 {
            let parts = mutex_partition(&sources, 2, window);
            assert_eq!(parts.len(), 2);
            assert_eq!(parts[0].len() + parts[1].len(), sources.len());
            for entry in sources.iter() {
                assert!(parts[0].contains(&entry.addr) ^ parts[1].contains(&entry.addr));
            }
        }
    }

    #[test]
    fn mutex_rotates_with_window() {
        let a = addr("1.1.1.1");
        let s0 = mutex_slot(&a, 2, 0);
        let s1 = mutex_slot(&a, 2, 1);
        assert_ne!(s0, s1);
    }

    fn upstream_conf(name: &str) -> InterfaceConf {
        InterfaceConf::new(name)
    }

    #[test]
    fn aggregate_all_and_first() {
        let gaddr = addr("239.0.0.5");
        let states = vec![
            (McFilter::Include, list(&["1.1.1.1"])),
            (McFilter::Include, list(&["2.2.2.2"])),
        ];
        let up1 = upstream_conf("up1");
        let up2 = upstream_conf("up2");
        let upstreams = vec![(10u32, &up1), (11u32, &up2)];
        let tables = GlobalTableSet::new();

        let all = aggregate_group(&gaddr, &states, &upstreams, &tables, RuleMatchingType::All, 0);
        assert_eq!(all[0].1, inc(&["1.1.1.1", "2.2.2.2"]));
        assert_eq!(all[1].1, inc(&["1.1.1.1", "2.2.2.2"]));

        // without filters FIRST sends everything to the first upstream
        let first =
            aggregate_group(&gaddr, &states, &upstreams, &tables, RuleMatchingType::First, 0);
        assert_eq!(first[0].1, inc(&["1.1.1.1", "2.2.2.2"]));
        assert!(first[1].1.is_empty_include());
    }

    #[test]
    fn aggregate_first_respects_whitelists() {
        let gaddr = addr("239.0.0.5");
        let states = vec![(McFilter::Include, list(&["1.1.1.1", "2.2.2.2"]))];

        let mut up1 = upstream_conf("up1");
        up1.output_filter = Some(RuleBinding::Filter {
            instance: "p".to_string(),
            iface_type: IfaceType::Upstream,
            if_name: "up1".to_string(),
            direction: Direction::Out,
            filter_type: FilterType::Whitelist,
            table: Table {
                name: String::new(),
                rules: vec![RuleBox::Addr(RuleAddr {
                    if_name: String::new(),
                    group: AddrMatch::Single(McAddr::UNSPECIFIED_V4),
                    source: AddrMatch::Single(addr("1.1.1.1")),
                })],
            },
        });
        let up2 = upstream_conf("up2");
        let upstreams = vec![(10u32, &up1), (11u32, &up2)];
        let tables = GlobalTableSet::new();

        let result =
            aggregate_group(&gaddr, &states, &upstreams, &tables, RuleMatchingType::First, 0);
        // up1 takes what its whitelist admits, up2 the remainder
        assert_eq!(result[0].1, inc(&["1.1.1.1"]));
        assert_eq!(result[1].1, inc(&["2.2.2.2"]));
    }

    #[test]
    fn aggregate_mutex_is_disjoint_and_covering() {
        let gaddr = addr("239.0.0.5");
        // both downstreams request the same two sources
        let states = vec![
            (McFilter::Include, list(&["1.1.1.1", "2.2.2.2"])),
            (McFilter::Include, list(&["1.1.1.1", "2.2.2.2"])),
        ];
        let up1 = upstream_conf("up1");
        let up2 = upstream_conf("up2");
        let upstreams = vec![(10u32, &up1), (11u32, &up2)];
        let tables = GlobalTableSet::new();

        let result =
            aggregate_group(&gaddr, &states, &upstreams, &tables, RuleMatchingType::Mutex, 7);
        let s1 = &result[0].1.sources;
        let s2 = &result[1].1.sources;
        assert_eq!(s1.len() + s2.len(), 2);
        for src in ["1.1.1.1", "2.2.2.2"] {
            let a = addr(src);
            assert!(s1.contains(&a) ^ s2.contains(&a), "source {} must be on exactly one upstream", src);
        }
    }

    #[test]
    fn aggregate_mutex_exclude_empty_sticks_to_one_upstream() {
        let gaddr = addr("239.0.0.5");
        let states = vec![(McFilter::Exclude, SourceList::new())];
        let up1 = upstream_conf("up1");
        let up2 = upstream_conf("up2");
        let upstreams = vec![(10u32, &up1), (11u32, &up2)];
        let tables = GlobalTableSet::new();

        let result =
            aggregate_group(&gaddr, &states, &upstreams, &tables, RuleMatchingType::Mutex, 3);
        let carriers: Vec<_> = result
            .iter()
            .filter(|(_, s)| !s.is_empty_include())
            .collect();
        assert_eq!(carriers.len(), 1);
        assert_eq!(carriers[0].1, exc(&[]));
    }
}

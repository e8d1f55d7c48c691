use crate::{AddrFamily, McAddr};

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// An address predicate of a filter rule: a single address or an
/// inclusive range. The all-zeros address of a family is the wildcard
/// and matches everything.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AddrMatch {
    Single(McAddr),
    Range(McAddr, McAddr),
}

impl AddrMatch {
    /// True if `addr` is matched by this predicate.
    pub fn contains(&self, addr: &McAddr) -> bool {
        if addr.is_unspecified() {
            return true;
        }
        match self {
            AddrMatch::Single(a) => a == addr || a.is_unspecified(),
            AddrMatch::Range(from, to) => from <= addr && addr <= to,
        }
    }

    /// True if this predicate matches the wildcard address itself, in
    /// which case it subsumes every other address of the family.
    pub fn is_wildcard(&self) -> bool {
        match self {
            AddrMatch::Single(a) => a.is_unspecified(),
            AddrMatch::Range(from, _) => from.is_unspecified(),
        }
    }

    /// Family of the predicate's addresses.
    pub fn family(&self) -> AddrFamily {
        match self {
            AddrMatch::Single(a) => a.family(),
            AddrMatch::Range(from, _) => from.family(),
        }
    }
}

impl core::fmt::Display for AddrMatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AddrMatch::Single(a) if a.is_unspecified() => write!(f, "*"),
            AddrMatch::Single(a) => write!(f, "{}", a),
            AddrMatch::Range(from, to) => write!(f, "{} - {}", from, to),
        }
    }
}

/// One `iface(group | source)` rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuleAddr {
    /// Input interface the rule applies to; empty matches every
    /// interface.
    pub if_name: String,
    pub group: AddrMatch,
    pub source: AddrMatch,
}

impl RuleAddr {
    fn matches_iface(&self, input_if_name: &str) -> bool {
        self.if_name.is_empty() || input_if_name == "*" || self.if_name == input_if_name
    }
}

/// A rule inside a table: an address rule, an inline anonymous table
/// or a reference to a named global table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RuleBox {
    Addr(RuleAddr),
    Table(Table),
    TableRef(String),
}

/// A (possibly anonymous) list of rules.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Table {
    pub name: String,
    pub rules: Vec<RuleBox>,
}

/// The source-address set a table yields for a `(input_if, gaddr)`
/// query. A set containing the wildcard subsumes all addresses of the
/// family, so table evaluation short-circuits into
/// [`SaddrSet::Wildcard`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SaddrSet {
    /// All addresses of the family.
    Wildcard(AddrFamily),
    /// The union of the matched rules' source predicates.
    Set(Vec<AddrMatch>),
}

impl SaddrSet {
    /// Membership test.
    pub fn contains(&self, addr: &McAddr) -> bool {
        match self {
            SaddrSet::Wildcard(_) => true,
            SaddrSet::Set(matches) => matches.iter().any(|m| m.contains(addr)),
        }
    }

    /// True if no address is contained.
    pub fn is_empty(&self) -> bool {
        match self {
            SaddrSet::Wildcard(_) => false,
            SaddrSet::Set(matches) => matches.is_empty(),
        }
    }

    /// Materializes the set, refusing when it is unbounded or larger
    /// than `cap` addresses (the caller decides how to degrade).
    pub fn enumerate(&self, cap: usize) -> Option<BTreeSet<McAddr>> {
        let matches = match self {
            SaddrSet::Wildcard(_) => return None,
            SaddrSet::Set(matches) => matches,
        };
        let mut out = BTreeSet::new();
        for m in matches {
            match m {
                AddrMatch::Single(a) => {
                    out.insert(*a);
                }
                AddrMatch::Range(from, to) => {
                    let mut cur = *from;
                    while cur <= *to {
                        out.insert(cur);
                        if out.len() > cap {
                            return None;
                        }
                        if cur == *to {
                            break;
                        }
                        cur = cur.incr();
                    }
                }
            }
            if out.len() > cap {
                return None;
            }
        }
        Some(out)
    }
}

impl Table {
    /// Evaluates the table for a query: the union of the source sets
    /// of all rules whose interface and group predicates match,
    /// short-circuited by a wildcard source.
    pub fn saddr_set(
        &self,
        tables: &GlobalTableSet,
        input_if_name: &str,
        gaddr: &McAddr,
    ) -> SaddrSet {
        let mut out = Vec::new();
        for rule in &self.rules {
            let nested = match rule {
                RuleBox::Addr(ra) => {
                    if ra.matches_iface(input_if_name) && ra.group.contains(gaddr) {
                        if ra.source.is_wildcard() {
                            return SaddrSet::Wildcard(gaddr.family());
                        }
                        out.push(ra.source.clone());
                    }
                    continue;
                }
                RuleBox::Table(t) => t.saddr_set(tables, input_if_name, gaddr),
                RuleBox::TableRef(name) => match tables.get(name) {
                    Some(t) => t.saddr_set(tables, input_if_name, gaddr),
                    // the parser rejects unknown references; a miss here
                    // means the table set changed underneath us
                    None => continue,
                },
            };
            match nested {
                SaddrSet::Wildcard(fam) => return SaddrSet::Wildcard(fam),
                SaddrSet::Set(matches) => out.extend(matches),
            }
        }
        SaddrSet::Set(out)
    }
}

/// The named tables registered at configuration scope, referenced by
/// `(table NAME)` rules.
#[derive(Clone, Debug, Default)]
pub struct GlobalTableSet {
    tables: BTreeMap<String, Table>,
}

impl GlobalTableSet {
    pub fn new() -> GlobalTableSet {
        GlobalTableSet::default()
    }

    /// Registers a table; false if the name is already taken.
    pub fn insert(&mut self, table: Table) -> bool {
        use std::collections::btree_map::Entry;
        match self.tables.entry(table.name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(table);
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }
}

/// Filter flavor of a rule binding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FilterType {
    Blacklist,
    Whitelist,
}

/// Discipline used when several upstreams could carry a subscription.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RuleMatchingType {
    All,
    First,
    Mutex,
}

/// Role of an interface within a proxy instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IfaceType {
    Upstream,
    Downstream,
}

/// Direction a filter applies to (traffic into or out of the proxy on
/// that interface).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    In,
    Out,
}

/// A `pinstance <name> (upstream|downstream) <if> (in|out) ...`
/// binding.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleBinding {
    /// Black/whitelist filter with its rule table.
    Filter {
        instance: String,
        iface_type: IfaceType,
        if_name: String,
        direction: Direction,
        filter_type: FilterType,
        table: Table,
    },
    /// `rulematching all|first|mutex <timeout>` discipline.
    Matching {
        instance: String,
        iface_type: IfaceType,
        if_name: String,
        direction: Direction,
        matching: RuleMatchingType,
        timeout: Duration,
    },
}

/// Per-interface configuration: the name plus the optional in/out
/// filters attached by rule bindings.
#[derive(Clone, Debug, Default)]
pub struct InterfaceConf {
    pub name: String,
    pub input_filter: Option<RuleBinding>,
    pub output_filter: Option<RuleBinding>,
}

impl InterfaceConf {
    pub fn new(name: &str) -> InterfaceConf {
        InterfaceConf {
            name: name.to_string(),
            input_filter: None,
            output_filter: None,
        }
    }

    fn filter(&self, direction: Direction) -> Option<&RuleBinding> {
        match direction {
            Direction::In => self.input_filter.as_ref(),
            Direction::Out => self.output_filter.as_ref(),
        }
    }

    /// The filter's source set for `(input_if_name, gaddr)`, or `None`
    /// when no filter is attached in that direction.
    pub fn saddr_set(
        &self,
        tables: &GlobalTableSet,
        direction: Direction,
        input_if_name: &str,
        gaddr: &McAddr,
    ) -> Option<(FilterType, SaddrSet)> {
        match self.filter(direction) {
            Some(RuleBinding::Filter {
                filter_type, table, ..
            }) => Some((*filter_type, table.saddr_set(tables, input_if_name, gaddr))),
            // a matching binding in a filter slot filters nothing
            Some(RuleBinding::Matching { .. }) | None => None,
        }
    }

    /// Whether traffic `(gaddr, saddr)` arriving from `input_if_name`
    /// passes this interface's filter in the given direction.
    ///
    /// No filter allows everything. A set containing the wildcard
    /// decides for all addresses; otherwise literal membership decides:
    /// a blacklist allows what is absent, a whitelist what is present.
    pub fn is_source_allowed(
        &self,
        tables: &GlobalTableSet,
        direction: Direction,
        input_if_name: &str,
        gaddr: &McAddr,
        saddr: &McAddr,
    ) -> bool {
        match self.saddr_set(tables, direction, input_if_name, gaddr) {
            None => true,
            Some((filter_type, set)) => {
                if let SaddrSet::Wildcard(_) = set {
                    return filter_type == FilterType::Whitelist;
                }
                if set.contains(saddr) {
                    filter_type == FilterType::Whitelist
                } else {
                    filter_type == FilterType::Blacklist
                }
            }
        }
    }
}

/// A parsed `pinstance` definition with everything attached to it.
#[derive(Clone, Debug)]
pub struct InstanceConf {
    pub name: String,
    /// Kernel routing table chosen with `pinstance NAME (N)`.
    pub table_number: Option<u32>,
    pub upstreams: Vec<InterfaceConf>,
    pub downstreams: Vec<InterfaceConf>,
    /// Discipline for aggregating memberships toward upstreams.
    pub upstream_input_rule: Option<RuleBinding>,
    /// Discipline for selecting upstreams when forwarding.
    pub upstream_output_rule: Option<RuleBinding>,
}

impl InstanceConf {
    pub fn new(name: &str) -> InstanceConf {
        InstanceConf {
            name: name.to_string(),
            table_number: None,
            upstreams: Vec::new(),
            downstreams: Vec::new(),
            upstream_input_rule: None,
            upstream_output_rule: None,
        }
    }

    /// The configured upstream-input discipline; FIRST when none is
    /// configured.
    pub fn upstream_in_matching(&self) -> (RuleMatchingType, Duration) {
        match &self.upstream_input_rule {
            Some(RuleBinding::Matching {
                matching, timeout, ..
            }) => (*matching, *timeout),
            _ => (RuleMatchingType::First, Duration::ZERO),
        }
    }

    /// The configured upstream-output discipline; ALL when none is
    /// configured.
    pub fn upstream_out_matching(&self) -> RuleMatchingType {
        match &self.upstream_output_rule {
            Some(RuleBinding::Matching { matching, .. }) => *matching,
            _ => RuleMatchingType::All,
        }
    }
}

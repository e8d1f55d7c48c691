use crate::conf::{Configuration, Direction, InterfaceConf, RuleBinding, RuleMatchingType};
use crate::proxy::{
    aggregate_group, Mailbox, ProxyMsg, Querier, RouteSource, RoutingData, Sender, TimerHandle,
    TimerKind, TimerMsg, TimerToken, Timing,
};
use crate::sys::{InterfaceMap, Mfib};
use crate::McAddr;

use log::{error, trace, warn};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Liveness horizon of a dynamically learned source without kernel
/// traffic.
pub const SOURCE_LIFE_TIME: Duration = Duration::from_secs(20);

/// One upstream interface of a proxy instance.
pub struct UpstreamInfo {
    pub if_index: u32,
    pub conf: Arc<InterfaceConf>,
}

/// One downstream interface of a proxy instance with its querier.
pub struct DownstreamInfo {
    pub conf: Arc<InterfaceConf>,
    pub querier: Querier,
}

/// The interface topology of one proxy instance as the routing
/// manager sees it: upstreams in priority order, downstreams with
/// their queriers and the instance-level upstream disciplines.
#[derive(Default)]
pub struct InterfaceInfos {
    pub upstreams: Vec<UpstreamInfo>,
    pub downstreams: BTreeMap<u32, DownstreamInfo>,
    pub upstream_input_rule: Option<RuleBinding>,
    pub upstream_output_rule: Option<RuleBinding>,
}

impl InterfaceInfos {
    pub fn is_upstream(&self, if_index: u32) -> bool {
        self.upstreams.iter().any(|u| u.if_index == if_index)
    }

    pub fn is_downstream(&self, if_index: u32) -> bool {
        self.downstreams.contains_key(&if_index)
    }

    /// Discipline for aggregating memberships toward upstreams; FIRST
    /// when nothing is configured.
    pub fn upstream_in_matching(&self) -> (RuleMatchingType, Duration) {
        match &self.upstream_input_rule {
            Some(RuleBinding::Matching {
                matching, timeout, ..
            }) => (*matching, *timeout),
            _ => (RuleMatchingType::First, Duration::ZERO),
        }
    }

    /// Discipline for selecting forwarding upstreams; ALL when nothing
    /// is configured.
    pub fn upstream_out_matching(&self) -> RuleMatchingType {
        match &self.upstream_output_rule {
            Some(RuleBinding::Matching { matching, .. }) => *matching,
            _ => RuleMatchingType::All,
        }
    }
}

/// Milliseconds on a process-wide monotonic clock; the base of the
/// MUTEX partition window.
fn monotonic_millis() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// The route manager of one proxy instance.
///
/// Consumes kernel cache-miss events and querier state changes,
/// computes the interested output interfaces per `(group, source)`,
/// programs the MFIB through the [`Mfib`] capability and triggers
/// membership aggregation toward the upstreams.
pub struct RoutingManagement {
    cfg: Arc<Configuration>,
    data: RoutingData,
    mfib: Arc<dyn Mfib>,
    sender: Arc<Sender>,
    timing: Arc<Timing>,
    mailbox: Mailbox,
    /// `(gaddr, saddr)` pairs with an installed MFIB entry, so a
    /// source without interest never causes a delete syscall for a
    /// route that was never added.
    installed: BTreeSet<(McAddr, McAddr)>,
}

impl RoutingManagement {
    pub fn new(
        cfg: Arc<Configuration>,
        mfib: Arc<dyn Mfib>,
        sender: Arc<Sender>,
        timing: Arc<Timing>,
        mailbox: Mailbox,
    ) -> RoutingManagement {
        RoutingManagement {
            cfg,
            data: RoutingData::new(mfib.clone()),
            mfib,
            sender,
            timing,
            mailbox,
            installed: BTreeSet::new(),
        }
    }

    pub fn data(&self) -> &RoutingData {
        &self.data
    }

    /// Kernel cache miss: a datagram from an unknown `(gaddr, saddr)`
    /// arrived on `if_index`. Tracks the source, installs routes for
    /// the interested interfaces and (under MUTEX) re-aggregates.
    pub fn on_new_source(
        &mut self,
        if_index: u32,
        gaddr: McAddr,
        saddr: McAddr,
        ii: &InterfaceInfos,
        ifmap: &InterfaceMap,
    ) {
        trace!("new source {} for group {} on if {}", saddr, gaddr, if_index);
        let (matching, timeout) = ii.upstream_in_matching();
        let handle = self.schedule_liveness_timer(if_index, gaddr, saddr, ii);
        self.data.set_source(
            if_index,
            gaddr,
            RouteSource {
                addr: saddr,
                timer: Some(handle),
                last_packet_count: None,
            },
        );

        let interested = self.collect_interested(&gaddr, &[saddr], ii, ifmap);
        self.set_routes(&gaddr, interested, ii, ifmap);

        if matching == RuleMatchingType::Mutex {
            self.aggregate(&gaddr, ii, RuleMatchingType::Mutex, timeout);
        }
    }

    /// A downstream querier changed forwarding-relevant state for
    /// `gaddr`: recompute the routes of all known sources and emit the
    /// aggregated membership toward the upstreams.
    pub fn on_querier_state_change(
        &mut self,
        gaddr: McAddr,
        ii: &InterfaceInfos,
        ifmap: &InterfaceMap,
    ) {
        let saddrs = self.data.source_addrs(&gaddr);
        let interested = self.collect_interested(&gaddr, &saddrs, ii, ifmap);
        self.set_routes(&gaddr, interested, ii, ifmap);

        let (matching, timeout) = ii.upstream_in_matching();
        self.aggregate(&gaddr, ii, matching, timeout);
    }

    /// Liveness timer of a learned source fired: keep the source when
    /// the kernel counters moved, drop the route otherwise.
    pub fn on_new_source_timer(
        &mut self,
        tm: &TimerMsg,
        ii: &InterfaceInfos,
        ifmap: &InterfaceMap,
    ) {
        debug_assert_eq!(tm.kind, TimerKind::NewSource);
        let Some(saddr) = tm.saddr else {
            warn!("new-source timer without a source address");
            return;
        };
        if !self.data.timer_matches(&tm.gaddr, &saddr, &tm.handle) {
            trace!("stale liveness timer for ({}, {})", tm.gaddr, saddr);
            return;
        }

        use crate::proxy::RefreshOutcome;
        match self.data.refresh_source_or_del_if_unused(&tm.gaddr, &saddr) {
            RefreshOutcome::Unused => {
                if self.installed.remove(&(tm.gaddr, saddr)) {
                    if let Some(vif) = ifmap.vif(tm.if_index) {
                        if let Err(err) = self.mfib.del_mroute(vif, &saddr, &tm.gaddr) {
                            warn!("failed to remove the route for ({}, {}): {}", tm.gaddr, saddr, err);
                        }
                    }
                }
                let (matching, timeout) = ii.upstream_in_matching();
                if matching == RuleMatchingType::Mutex {
                    self.aggregate(&tm.gaddr, ii, RuleMatchingType::Mutex, timeout);
                }
            }
            RefreshOutcome::Live => {
                let handle = self.schedule_liveness_timer(tm.if_index, tm.gaddr, saddr, ii);
                self.data.set_timer(&tm.gaddr, &saddr, handle);
            }
        }
    }

    fn schedule_liveness_timer(
        &self,
        if_index: u32,
        gaddr: McAddr,
        saddr: McAddr,
        ii: &InterfaceInfos,
    ) -> TimerHandle {
        let (matching, timeout) = ii.upstream_in_matching();
        let life = if ii.is_upstream(if_index)
            && matching == RuleMatchingType::Mutex
            && !timeout.is_zero()
        {
            timeout
        } else {
            SOURCE_LIFE_TIME
        };
        let handle = TimerToken::new(life);
        self.timing.add(
            life,
            &self.mailbox,
            ProxyMsg::Timer(TimerMsg {
                kind: TimerKind::NewSource,
                if_index,
                gaddr,
                saddr: Some(saddr),
                handle: handle.clone(),
            }),
        );
        handle
    }

    /// Computes the interested output interfaces for each source:
    /// upstream selection per the upstream-output discipline for
    /// downstream-received sources, then every other downstream whose
    /// querier indicates interest and whose in/out filters permit the
    /// source.
    fn collect_interested(
        &self,
        gaddr: &McAddr,
        saddrs: &[McAddr],
        ii: &InterfaceInfos,
        ifmap: &InterfaceMap,
    ) -> Vec<(McAddr, Vec<u32>)> {
        let tables = self.cfg.tables();
        let mut rt_list: Vec<(McAddr, Vec<u32>)> = Vec::new();

        for saddr in saddrs {
            let Some(input_if) = self.data.input_if(gaddr, saddr) else {
                error!("input interface of source {} not found", saddr);
                continue;
            };
            let mut outputs = Vec::new();
            if ii.is_downstream(input_if) {
                let input_name = ifmap.name(input_if).unwrap_or("");
                for up in &ii.upstreams {
                    if !up.conf.is_source_allowed(
                        tables,
                        Direction::Out,
                        input_name,
                        gaddr,
                        saddr,
                    ) {
                        continue;
                    }
                    match ii.upstream_out_matching() {
                        RuleMatchingType::All => outputs.push(up.if_index),
                        RuleMatchingType::First => {
                            outputs.push(up.if_index);
                            break;
                        }
                        RuleMatchingType::Mutex => {
                            error!("mutex is not a valid upstream output discipline");
                            break;
                        }
                    }
                }
            }
            // sources received on an upstream are never forwarded to
            // another upstream
            rt_list.push((*saddr, outputs));
        }

        for (dif_index, dinfo) in &ii.downstreams {
            let filter = |saddr: &McAddr| -> bool {
                let Some(input_if) = self.data.input_if(gaddr, saddr) else {
                    return false;
                };
                if *dif_index == input_if {
                    return false;
                }
                let input_name = ifmap.name(input_if).unwrap_or("");
                dinfo
                    .conf
                    .is_source_allowed(tables, Direction::In, input_name, gaddr, saddr)
                    && dinfo
                        .conf
                        .is_source_allowed(tables, Direction::Out, input_name, gaddr, saddr)
            };
            dinfo.querier.suggest_to_forward_traffic(gaddr, &mut rt_list, &filter);
        }

        rt_list
    }

    /// Installs or removes the MFIB entries for the computed
    /// `(source, outputs)` pairs. The input interface's own input
    /// filter gates installation.
    fn set_routes(
        &mut self,
        gaddr: &McAddr,
        rt_list: Vec<(McAddr, Vec<u32>)>,
        ii: &InterfaceInfos,
        ifmap: &InterfaceMap,
    ) {
        let tables = self.cfg.tables();
        for (saddr, outputs) in rt_list {
            let key = (*gaddr, saddr);

            if outputs.is_empty() {
                // only routes that were actually installed are removed
                if self.installed.remove(&key) {
                    if let Some(input_if) = self.data.input_if(gaddr, &saddr) {
                        if let Some(vif) = ifmap.vif(input_if) {
                            if let Err(err) = self.mfib.del_mroute(vif, &saddr, gaddr) {
                                warn!(
                                    "failed to remove the route for ({}, {}): {}",
                                    gaddr, saddr, err
                                );
                            }
                        }
                    }
                }
                continue;
            }

            let Some(input_if) = self.data.input_if(gaddr, &saddr) else {
                error!("input interface of source {} not found", saddr);
                continue;
            };
            let input_name = ifmap.name(input_if).unwrap_or("");

            let allowed = if ii.is_upstream(input_if) {
                ii.upstreams
                    .iter()
                    .find(|u| u.if_index == input_if)
                    .map(|u| {
                        u.conf.is_source_allowed(
                            tables,
                            Direction::In,
                            input_name,
                            gaddr,
                            &saddr,
                        )
                    })
                    .unwrap_or(false)
            } else if ii.is_downstream(input_if) {
                ii.downstreams
                    .get(&input_if)
                    .map(|d| {
                        d.conf.is_source_allowed(
                            tables,
                            Direction::In,
                            input_name,
                            gaddr,
                            &saddr,
                        )
                    })
                    .unwrap_or(false)
            } else {
                false
            };
            if !allowed {
                continue;
            }

            let Some(input_vif) = ifmap.vif(input_if) else {
                error!("interface {} has no virtual index", input_if);
                continue;
            };
            let output_vifs: Vec<u16> = outputs.iter().filter_map(|o| ifmap.vif(*o)).collect();
            if output_vifs.len() != outputs.len() {
                warn!("some output interfaces of ({}, {}) have no virtual index", gaddr, saddr);
            }
            if output_vifs.is_empty() {
                continue;
            }

            match self.mfib.add_mroute(input_vif, &saddr, gaddr, &output_vifs) {
                Ok(()) => {
                    self.installed.insert(key);
                }
                Err(err) => error!("failed to install the route for ({}, {}): {}", gaddr, saddr, err),
            }
        }
    }

    /// Merges the downstream membership states of `gaddr` and emits
    /// the per-upstream subscription reports.
    fn aggregate(
        &self,
        gaddr: &McAddr,
        ii: &InterfaceInfos,
        discipline: RuleMatchingType,
        timeout: Duration,
    ) {
        if ii.upstreams.is_empty() {
            return;
        }
        let states: Vec<_> = ii
            .downstreams
            .values()
            .map(|d| d.querier.group_membership_infos(gaddr))
            .collect();
        let upstreams: Vec<(u32, &InterfaceConf)> = ii
            .upstreams
            .iter()
            .map(|u| (u.if_index, u.conf.as_ref()))
            .collect();
        let window = if discipline == RuleMatchingType::Mutex && !timeout.is_zero() {
            monotonic_millis() / timeout.as_millis() as u64
        } else {
            0
        };

        for (if_index, state) in aggregate_group(
            gaddr,
            &states,
            &upstreams,
            self.cfg.tables(),
            discipline,
            window,
        ) {
            if let Err(err) = self
                .sender
                .send_record(if_index, state.mode, gaddr, &state.sources)
            {
                warn!("failed to report to upstream {}: {}", if_index, err);
            }
        }
    }
}

use crate::conf::{Configuration, Direction, IfaceType, RuleBinding};
use crate::proxy::{
    ConfigChange, DownstreamInfo, InterfaceInfos, Mailbox, ProxyMsg, Querier, Receiver,
    RoutingManagement, Sender, TimerKind, TimersValues, Timing, UpstreamInfo,
};
use crate::sys::{InterfaceMap, Mfib};
use crate::GroupMemProtocol;

use log::{debug, error, info, warn};

use std::sync::{Arc, Mutex};

/// One proxy instance: a single-threaded actor owning the queriers of
/// its downstream interfaces, the route manager and the instance
/// mailbox. All work arrives as [`ProxyMsg`]s; the dispatch loop runs
/// until an `Exit` message.
pub struct ProxyInstance {
    name: String,
    proto: GroupMemProtocol,
    mailbox: Mailbox,
    timing: Arc<Timing>,
    sender: Arc<Sender>,
    mfib: Arc<dyn Mfib>,
    ifmap: Arc<Mutex<InterfaceMap>>,
    ii: InterfaceInfos,
    routing: RoutingManagement,
    tv: TimersValues,
    receiver: Option<Receiver>,
}

impl ProxyInstance {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        proto: GroupMemProtocol,
        cfg: Arc<Configuration>,
        mailbox: Mailbox,
        timing: Arc<Timing>,
        sender: Arc<Sender>,
        mfib: Arc<dyn Mfib>,
        ifmap: Arc<Mutex<InterfaceMap>>,
    ) -> ProxyInstance {
        let routing = RoutingManagement::new(
            cfg,
            mfib.clone(),
            sender.clone(),
            timing.clone(),
            mailbox.clone(),
        );
        ProxyInstance {
            name: name.to_string(),
            proto,
            mailbox,
            timing,
            sender,
            mfib,
            ifmap,
            ii: InterfaceInfos::default(),
            routing,
            tv: TimersValues::default(),
            receiver: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mailbox(&self) -> Mailbox {
        self.mailbox.clone()
    }

    /// Attaches the receive thread so interface registrations reach
    /// its relevance filter.
    pub fn attach_receiver(&mut self, receiver: Receiver) {
        self.receiver = Some(receiver);
    }

    /// Read access for status output and tests.
    pub fn interface_infos(&self) -> &InterfaceInfos {
        &self.ii
    }

    pub fn routing(&self) -> &RoutingManagement {
        &self.routing
    }

    /// The dispatch loop; returns when an `Exit` message was handled.
    pub fn run(mut self) {
        info!("proxy instance '{}' running", self.name);
        loop {
            let msg = self.mailbox.recv();
            if !self.handle_msg(msg) {
                break;
            }
        }
        info!("proxy instance '{}' stopped", self.name);
    }

    /// Processes one message; false ends the dispatch loop.
    pub fn handle_msg(&mut self, msg: ProxyMsg) -> bool {
        match msg {
            ProxyMsg::Init => {
                debug!("instance '{}': initialized", self.name);
            }
            ProxyMsg::Test(value) => {
                debug!("instance '{}': test message {}", self.name, value);
            }
            ProxyMsg::Exit => {
                self.teardown();
                return false;
            }
            ProxyMsg::Timer(tm) => {
                if tm.kind == TimerKind::NewSource {
                    let ifmap = self.ifmap.lock().unwrap();
                    self.routing.on_new_source_timer(&tm, &self.ii, &ifmap);
                } else {
                    let changed = match self.ii.downstreams.get_mut(&tm.if_index) {
                        Some(downstream) => downstream.querier.timer_triggered(&tm),
                        None => {
                            debug!(
                                "instance '{}': timer for a gone interface {}",
                                self.name, tm.if_index
                            );
                            false
                        }
                    };
                    if changed {
                        let ifmap = self.ifmap.lock().unwrap();
                        self.routing
                            .on_querier_state_change(tm.gaddr, &self.ii, &ifmap);
                    }
                }
            }
            ProxyMsg::NewSource {
                if_index,
                gaddr,
                saddr,
            } => {
                let ifmap = self.ifmap.lock().unwrap();
                self.routing
                    .on_new_source(if_index, gaddr, saddr, &self.ii, &ifmap);
            }
            ProxyMsg::GroupRecord(gr) => {
                let gaddr = gr.gaddr;
                let changed = match self.ii.downstreams.get_mut(&gr.if_index) {
                    Some(downstream) => downstream.querier.receive_record(gr),
                    None => {
                        debug!(
                            "instance '{}': record for a gone interface {}",
                            self.name, gr.if_index
                        );
                        false
                    }
                };
                if changed {
                    let ifmap = self.ifmap.lock().unwrap();
                    self.routing.on_querier_state_change(gaddr, &self.ii, &ifmap);
                }
            }
            ProxyMsg::QueryReceived { if_index } => {
                if let Some(downstream) = self.ii.downstreams.get_mut(&if_index) {
                    downstream.querier.receive_query();
                }
            }
            ProxyMsg::Config(change) => self.apply_config(change),
            ProxyMsg::Debug => self.print_status(),
        }
        true
    }

    fn apply_config(&mut self, change: ConfigChange) {
        match change {
            ConfigChange::AddDownstream { if_index, conf } => {
                let vif = match self.ifmap.lock().unwrap().add(if_index, &conf.name) {
                    Ok(vif) => vif,
                    Err(err) => {
                        error!(
                            "instance '{}': cannot register downstream {}: {}",
                            self.name, conf.name, err
                        );
                        return;
                    }
                };
                if let Err(err) = self.mfib.add_vif(vif, if_index) {
                    error!(
                        "instance '{}': cannot add vif for {}: {}",
                        self.name, conf.name, err
                    );
                    self.ifmap.lock().unwrap().remove(if_index);
                    return;
                }
                let querier = match Querier::new(
                    if_index,
                    self.proto,
                    self.sender.clone(),
                    self.timing.clone(),
                    self.mailbox.clone(),
                    self.tv.clone(),
                ) {
                    Ok(querier) => querier,
                    Err(err) => {
                        error!(
                            "instance '{}': cannot start a querier on {}: {}",
                            self.name, conf.name, err
                        );
                        let _ = self.mfib.del_vif(vif);
                        self.ifmap.lock().unwrap().remove(if_index);
                        return;
                    }
                };
                if let Some(receiver) = &self.receiver {
                    receiver.register_interface(if_index);
                }
                info!(
                    "instance '{}': downstream {} (if {}, vif {})",
                    self.name, conf.name, if_index, vif
                );
                self.ii
                    .downstreams
                    .insert(if_index, DownstreamInfo { conf, querier });
            }
            ConfigChange::DelDownstream { if_index } => {
                if let Some(mut downstream) = self.ii.downstreams.remove(&if_index) {
                    downstream.querier.shutdown();
                    if let Some(receiver) = &self.receiver {
                        receiver.deregister_interface(if_index);
                    }
                    if let Some(vif) = self.ifmap.lock().unwrap().remove(if_index) {
                        let _ = self.mfib.del_vif(vif);
                    }
                    self.recompute_all_groups();
                }
            }
            ConfigChange::AddUpstream { if_index, conf } => {
                let vif = match self.ifmap.lock().unwrap().add(if_index, &conf.name) {
                    Ok(vif) => vif,
                    Err(err) => {
                        error!(
                            "instance '{}': cannot register upstream {}: {}",
                            self.name, conf.name, err
                        );
                        return;
                    }
                };
                if let Err(err) = self.mfib.add_vif(vif, if_index) {
                    error!(
                        "instance '{}': cannot add vif for {}: {}",
                        self.name, conf.name, err
                    );
                    self.ifmap.lock().unwrap().remove(if_index);
                    return;
                }
                if let Some(receiver) = &self.receiver {
                    receiver.register_interface(if_index);
                }
                info!(
                    "instance '{}': upstream {} (if {}, vif {})",
                    self.name, conf.name, if_index, vif
                );
                self.ii.upstreams.push(UpstreamInfo { if_index, conf });
            }
            ConfigChange::DelUpstream { if_index } => {
                let before = self.ii.upstreams.len();
                self.ii.upstreams.retain(|u| u.if_index != if_index);
                if self.ii.upstreams.len() != before {
                    if let Some(receiver) = &self.receiver {
                        receiver.deregister_interface(if_index);
                    }
                    if let Some(vif) = self.ifmap.lock().unwrap().remove(if_index) {
                        let _ = self.mfib.del_vif(vif);
                    }
                    self.recompute_all_groups();
                }
            }
            ConfigChange::SetGlobalBinding(binding) => {
                let slot = match &binding {
                    RuleBinding::Matching {
                        iface_type: IfaceType::Upstream,
                        direction,
                        ..
                    } => Some(*direction),
                    _ => None,
                };
                match slot {
                    Some(Direction::In) => self.ii.upstream_input_rule = Some(binding),
                    Some(Direction::Out) => self.ii.upstream_output_rule = Some(binding),
                    None => warn!(
                        "instance '{}': only upstream rule-matching bindings can change at runtime",
                        self.name
                    ),
                }
            }
        }
    }

    fn recompute_all_groups(&mut self) {
        let ifmap = self.ifmap.lock().unwrap();
        for gaddr in self.routing.data().groups() {
            self.routing.on_querier_state_change(gaddr, &self.ii, &ifmap);
        }
    }

    fn print_status(&self) {
        info!("-- proxy instance '{}' ({}) --", self.name, self.proto);
        for up in &self.ii.upstreams {
            info!("  upstream {} (if {})", up.conf.name, up.if_index);
        }
        for (if_index, downstream) in &self.ii.downstreams {
            let db = downstream.querier.db();
            info!(
                "  downstream {} (if {}): {} group(s)",
                downstream.conf.name,
                if_index,
                db.groups.len()
            );
            for (gaddr, ginfo) in &db.groups {
                info!(
                    "    {} {} include/requested [{}] exclude [{}]",
                    gaddr,
                    ginfo.filter_mode,
                    ginfo.include_requested_list,
                    ginfo.exclude_list
                );
            }
        }
    }

    fn teardown(&mut self) {
        debug!("instance '{}': tearing down", self.name);
        self.timing.cancel(self.mailbox.id());
        if let Some(mut receiver) = self.receiver.take() {
            receiver.stop();
        }
        for (_, downstream) in self.ii.downstreams.iter_mut() {
            downstream.querier.shutdown();
        }
        let if_indexes = self.ifmap.lock().unwrap().if_indexes();
        for if_index in if_indexes {
            if let Some(vif) = self.ifmap.lock().unwrap().remove(if_index) {
                let _ = self.mfib.del_vif(vif);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::proxy::testutil::{MockMfib, RecordingTransport};
    use crate::proxy::{GroupRecordMsg, ProxyMsg, Sender, SourceList, TimerMsg, Timing};
    use crate::sys::InterfaceMap;
    use crate::wire::{IgmpV3ReportSlice, RecordType};
    use crate::{AddrFamily, McAddr};

    use std::time::{Duration, Instant};

    const UP1: u32 = 1;
    const UP2: u32 = 2;
    const DOWN1: u32 = 101;
    const DOWN2: u32 = 102;

    struct Fixture {
        instance: ProxyInstance,
        mfib: Arc<MockMfib>,
        transport: Arc<RecordingTransport>,
        timing: Arc<Timing>,
        mailbox: Mailbox,
        ifmap: Arc<Mutex<InterfaceMap>>,
    }

    /// Builds an instance from a configuration text and wires up the
    /// first defined pinstance: upstreams get the indices 1, 2, ...,
    /// downstreams 101, 102, ...
    fn fixture(cfg_text: &str) -> Fixture {
        let cfg = Arc::new(crate::conf::Configuration::parse(cfg_text).unwrap());
        let mfib = Arc::new(MockMfib::new());
        let transport = Arc::new(RecordingTransport::new());
        let sender = Arc::new(Sender::new(cfg.protocol(), transport.clone()));
        let timing = Timing::new();
        let mailbox = Mailbox::new(256);
        let ifmap = Arc::new(Mutex::new(InterfaceMap::new(AddrFamily::V4)));

        let inst_conf = cfg.instances()[0].clone();
        let mut instance = ProxyInstance::new(
            &inst_conf.name,
            cfg.protocol(),
            cfg.clone(),
            mailbox.clone(),
            timing.clone(),
            sender,
            mfib.clone(),
            ifmap.clone(),
        );

        for (i, conf) in inst_conf.upstreams.iter().enumerate() {
            instance.handle_msg(ProxyMsg::Config(ConfigChange::AddUpstream {
                if_index: UP1 + i as u32,
                conf: Arc::new(conf.clone()),
            }));
        }
        for (i, conf) in inst_conf.downstreams.iter().enumerate() {
            instance.handle_msg(ProxyMsg::Config(ConfigChange::AddDownstream {
                if_index: DOWN1 + i as u32,
                conf: Arc::new(conf.clone()),
            }));
        }
        for binding in [&inst_conf.upstream_input_rule, &inst_conf.upstream_output_rule]
            .into_iter()
            .flatten()
        {
            instance.handle_msg(ProxyMsg::Config(ConfigChange::SetGlobalBinding(
                binding.clone(),
            )));
        }

        Fixture {
            instance,
            mfib,
            transport,
            timing,
            mailbox,
            ifmap,
        }
    }

    fn addr(s: &str) -> McAddr {
        s.parse().unwrap()
    }

    fn subscribe(fx: &mut Fixture, if_index: u32, gaddr: &str, sources: &[&str]) {
        fx.instance.handle_msg(ProxyMsg::GroupRecord(GroupRecordMsg {
            if_index,
            record_type: RecordType::AllowNewSources,
            gaddr: gaddr.parse().unwrap(),
            sources: sources.iter().map(|s| s.parse().unwrap()).collect(),
            report_version: GroupMemProtocol::IgmpV3,
        }));
    }

    /// Fires all due timers through the instance dispatch.
    fn fire_timers(fx: &mut Fixture) {
        fx.timing
            .tick(Instant::now() + Duration::from_secs(1_000_000));
        let mut timers: Vec<TimerMsg> = Vec::new();
        while let Some(msg) = fx.mailbox.try_recv() {
            if let ProxyMsg::Timer(tm) = msg {
                timers.push(tm);
            }
        }
        for tm in timers {
            fx.instance.handle_msg(ProxyMsg::Timer(tm));
        }
    }

    fn vif_of(fx: &Fixture, if_index: u32) -> u16 {
        fx.ifmap.lock().unwrap().vif(if_index).unwrap()
    }

    #[test]
    fn topology_setup() {
        let fx = fixture("pinstance p: eth0 ==> eth1;");
        assert!(fx.instance.interface_infos().is_upstream(UP1));
        assert!(fx.instance.interface_infos().is_downstream(DOWN1));
        // vifs allocated in registration order
        assert_eq!(vif_of(&fx, UP1), 0);
        assert_eq!(vif_of(&fx, DOWN1), 1);
        // the downstream querier announced itself
        assert!(!fx.transport.sent().is_empty());
        assert!(!fx.transport.joined().is_empty());
    }

    // a kernel cache miss installs the route toward the interested downstream
    #[test]
    fn route_installed_on_cache_miss() {
        let mut fx = fixture("pinstance p: eth0 ==> eth1;");
        subscribe(&mut fx, DOWN1, "239.0.0.4", &["10.0.0.1"]);

        fx.instance.handle_msg(ProxyMsg::NewSource {
            if_index: UP1,
            gaddr: addr("239.0.0.4"),
            saddr: addr("10.0.0.1"),
        });

        let (input_vif, output_vifs) = fx
            .mfib
            .route(&addr("10.0.0.1"), &addr("239.0.0.4"))
            .expect("route must be installed");
        assert_eq!(input_vif, vif_of(&fx, UP1));
        assert_eq!(output_vifs, vec![vif_of(&fx, DOWN1)]);
    }

    #[test]
    fn no_route_without_interest() {
        let mut fx = fixture("pinstance p: eth0 ==> eth1;");
        // nobody subscribed 239.0.0.4
        fx.instance.handle_msg(ProxyMsg::NewSource {
            if_index: UP1,
            gaddr: addr("239.0.0.4"),
            saddr: addr("10.0.0.1"),
        });
        assert_eq!(fx.mfib.route_count(), 0);
    }

    // a blacklisted source never reaches the MFIB and ages out
    #[test]
    fn filtered_source_installs_nothing_and_expires() {
        let mut fx = fixture(
            "pinstance p: eth0 ==> eth1;\n\
             pinstance p downstream eth1 in blacklist table { (239.0.0.4 | 10.0.0.1) };",
        );
        subscribe(&mut fx, DOWN1, "239.0.0.4", &["10.0.0.1"]);

        fx.instance.handle_msg(ProxyMsg::NewSource {
            if_index: UP1,
            gaddr: addr("239.0.0.4"),
            saddr: addr("10.0.0.1"),
        });
        assert_eq!(fx.mfib.route_count(), 0);

        // the tentative source is evicted once its liveness window
        // passes without kernel traffic (first refresh syncs the
        // counter, the second sees it unchanged)
        assert_eq!(
            fx.instance.routing().data().source_addrs(&addr("239.0.0.4")),
            vec![addr("10.0.0.1")]
        );
        fire_timers(&mut fx);
        fire_timers(&mut fx);
        assert!(fx
            .instance
            .routing()
            .data()
            .source_addrs(&addr("239.0.0.4"))
            .is_empty());
        assert_eq!(fx.mfib.route_count(), 0);
    }

    #[test]
    fn live_source_survives_refresh() {
        let mut fx = fixture("pinstance p: eth0 ==> eth1;");
        subscribe(&mut fx, DOWN1, "239.0.0.4", &["10.0.0.1"]);
        fx.instance.handle_msg(ProxyMsg::NewSource {
            if_index: UP1,
            gaddr: addr("239.0.0.4"),
            saddr: addr("10.0.0.1"),
        });

        // traffic keeps flowing between the liveness checks
        fire_timers(&mut fx);
        fx.mfib
            .bump_packet_count(&addr("10.0.0.1"), &addr("239.0.0.4"), 100);
        fire_timers(&mut fx);
        assert_eq!(
            fx.instance.routing().data().source_addrs(&addr("239.0.0.4")),
            vec![addr("10.0.0.1")]
        );

        // once the traffic stops the source and its route go away
        fire_timers(&mut fx);
        assert!(fx
            .instance
            .routing()
            .data()
            .source_addrs(&addr("239.0.0.4"))
            .is_empty());
        assert!(fx.mfib.route(&addr("10.0.0.1"), &addr("239.0.0.4")).is_none());
    }

    #[test]
    fn leave_removes_route() {
        let mut fx = fixture("pinstance p: eth0 ==> eth1;");
        subscribe(&mut fx, DOWN1, "239.0.0.4", &["10.0.0.1"]);
        fx.instance.handle_msg(ProxyMsg::NewSource {
            if_index: UP1,
            gaddr: addr("239.0.0.4"),
            saddr: addr("10.0.0.1"),
        });
        assert_eq!(fx.mfib.route_count(), 1);

        // the downstream takes its subscription back
        fx.instance.handle_msg(ProxyMsg::GroupRecord(GroupRecordMsg {
            if_index: DOWN1,
            record_type: RecordType::ChangeToInclude,
            gaddr: addr("239.0.0.4"),
            sources: SourceList::new(),
            report_version: GroupMemProtocol::IgmpV3,
        }));
        // LLQT passes without an answer; the filter-relevant timers
        // fire and the route computation runs again
        fire_timers(&mut fx);
        assert_eq!(fx.mfib.route_count(), 0);
    }

    // mutex aggregation gives every source to exactly one upstream
    #[test]
    fn mutex_aggregation_partitions_sources() {
        let mut fx = fixture(
            "pinstance p: up1 up2 ==> d1 d2;\n\
             pinstance p upstream * in rulematching mutex 10000;",
        );

        subscribe(&mut fx, DOWN1, "239.0.0.5", &["1.1.1.1", "2.2.2.2"]);
        fx.transport.clear();
        subscribe(&mut fx, DOWN2, "239.0.0.5", &["1.1.1.1", "2.2.2.2"]);

        // the reports of the last aggregation run, keyed by upstream
        let mut up1_sources: Vec<McAddr> = Vec::new();
        let mut up2_sources: Vec<McAddr> = Vec::new();
        for packet in fx.transport.sent() {
            if packet.dst != McAddr::IGMPV3_ROUTERS {
                continue;
            }
            let records = IgmpV3ReportSlice::from_slice(&packet.payload)
                .unwrap()
                .records()
                .unwrap();
            let sources = records
                .iter()
                .flat_map(|r| r.sources.iter().copied())
                .collect::<Vec<_>>();
            match packet.if_index {
                UP1 => up1_sources = sources,
                UP2 => up2_sources = sources,
                other => panic!("report on unexpected interface {}", other),
            }
        }

        // every source lands on exactly one upstream
        assert_eq!(up1_sources.len() + up2_sources.len(), 2);
        for source in ["1.1.1.1", "2.2.2.2"] {
            let a = addr(source);
            assert!(
                up1_sources.contains(&a) ^ up2_sources.contains(&a),
                "source {} must be reported on exactly one upstream",
                source
            );
        }
    }

    #[test]
    fn exit_tears_down() {
        let mut fx = fixture("pinstance p: eth0 ==> eth1;");
        assert!(!fx.transport.joined().is_empty());
        assert!(!fx.instance.handle_msg(ProxyMsg::Exit));
        // router groups left, vifs released, timers cancelled
        assert!(fx.transport.joined().is_empty());
        assert!(fx.ifmap.lock().unwrap().if_indexes().is_empty());
        assert_eq!(fx.timing.pending(), 0);
    }
}

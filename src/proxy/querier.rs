use crate::proxy::{
    GroupInfo, GroupRecordMsg, Mailbox, McFilter, MembershipDb, ProxyMsg, Sender, SourceList,
    TimerHandle, TimerKind, TimerMsg, TimerToken, TimersValues, Timing,
};
use crate::wire::RecordType;
use crate::{GroupMemProtocol, McAddr};

use log::{debug, error, trace, warn};

use std::sync::Arc;
use std::time::Duration;

/// The group membership querier of one downstream interface.
///
/// Implements the router part of RFC 3376 §6 / RFC 3810 §7: the
/// membership database with per-group filter modes and source timers,
/// query retransmission and version compatibility. All mutations come
/// in through [`Querier::receive_record`] and
/// [`Querier::timer_triggered`]; both return whether forwarding-
/// relevant state changed so the owning instance can re-run route
/// computation and aggregation.
pub struct Querier {
    if_index: u32,
    db: MembershipDb,
    tv: TimersValues,
    sender: Arc<Sender>,
    timing: Arc<Timing>,
    mailbox: Mailbox,
}

/// Borrowed context for the state-machine helpers, so a `&mut` into
/// the group map can be held at the same time.
struct Ctx<'a> {
    if_index: u32,
    tv: &'a TimersValues,
    sender: &'a Sender,
    timing: &'a Timing,
    mailbox: &'a Mailbox,
}

impl Querier {
    /// Creates the querier: joins the per-family router groups and
    /// kicks off the startup general query schedule.
    pub fn new(
        if_index: u32,
        proto: GroupMemProtocol,
        sender: Arc<Sender>,
        timing: Arc<Timing>,
        mailbox: Mailbox,
        tv: TimersValues,
    ) -> Result<Querier, crate::err::SysError> {
        let mut querier = Querier {
            if_index,
            db: MembershipDb::new(proto),
            tv,
            sender,
            timing,
            mailbox,
        };
        querier.sender.join_router_groups(if_index)?;
        let ctx = Ctx {
            if_index,
            tv: &querier.tv,
            sender: &*querier.sender,
            timing: &*querier.timing,
            mailbox: &querier.mailbox,
        };
        send_general_query(&ctx, &mut querier.db);
        Ok(querier)
    }

    /// Interface this querier runs on.
    pub fn if_index(&self) -> u32 {
        self.if_index
    }

    /// Read access to the membership database (status output, tests).
    pub fn db(&self) -> &MembershipDb {
        &self.db
    }

    pub fn timers_values(&self) -> &TimersValues {
        &self.tv
    }

    pub fn timers_values_mut(&mut self) -> &mut TimersValues {
        &mut self.tv
    }

    /// Processes one reported multicast address record through the
    /// transition tables of RFC 3376 §6.4 / RFC 3810 §7.4.
    ///
    /// Returns true if the forwarding-relevant state of the group
    /// changed.
    pub fn receive_record(&mut self, mut rec: GroupRecordMsg) -> bool {
        trace!(
            "if {}: record {} for {} ({} sources)",
            self.if_index,
            rec.record_type,
            rec.gaddr,
            rec.sources.len()
        );
        let qvm = self.db.querier_version_mode;
        let ctx = Ctx {
            if_index: self.if_index,
            tv: &self.tv,
            sender: &*self.sender,
            timing: &*self.timing,
            mailbox: &self.mailbox,
        };
        let gaddr = rec.gaddr;
        let ginfo = self
            .db
            .groups
            .entry(gaddr)
            .or_insert_with(|| GroupInfo::new(qvm));

        // backward compatibility coordination: an older-version report
        // pins the group to that version for MALI
        if rec.report_version != qvm && rec.report_version.older_or_equal(qvm) {
            debug!(
                "if {}: {} pinned to {} by an older host",
                ctx.if_index, gaddr, rec.report_version
            );
            ginfo.compatibility_mode = rec.report_version;
            let interval = ctx.tv.older_host_present_interval();
            let handle = TimerToken::new(interval);
            ginfo.older_host_present_timer = Some(handle.clone());
            ctx.schedule(TimerKind::OlderHostPresent, gaddr, None, interval, handle);
        }

        // RFC 3810 §8.3.2: while older hosts are present BLOCK records
        // are ignored and TO_EX records are treated as TO_EX({})
        if ginfo.is_in_backward_compatibility_mode(qvm) {
            match rec.record_type {
                RecordType::ChangeToExclude => rec.sources = SourceList::new(),
                RecordType::BlockOldSources => return false,
                _ => {}
            }
        }

        let changed = match ginfo.filter_mode {
            McFilter::Include => receive_in_include(&ctx, gaddr, rec.record_type, rec.sources, ginfo),
            McFilter::Exclude => receive_in_exclude(&ctx, gaddr, rec.record_type, rec.sources, ginfo),
        };

        // an unused freshly created (or emptied) include-mode group is
        // removed from the database
        let remove = ginfo.filter_mode == McFilter::Include
            && ginfo.include_requested_list.is_empty();
        if remove {
            self.db.groups.remove(&gaddr);
        }
        changed
    }

    /// Processes a fired timer belonging to this querier. Stale fires
    /// (the slot holds a different handle by now) are no-ops.
    ///
    /// Returns true if the forwarding-relevant state of the group
    /// changed.
    pub fn timer_triggered(&mut self, tm: &TimerMsg) -> bool {
        let qvm = self.db.querier_version_mode;
        let ctx = Ctx {
            if_index: self.if_index,
            tv: &self.tv,
            sender: &*self.sender,
            timing: &*self.timing,
            mailbox: &self.mailbox,
        };

        if tm.kind == TimerKind::GeneralQuery {
            if TimerToken::slot_matches(&self.db.general_query_timer, &tm.handle) {
                send_general_query(&ctx, &mut self.db);
            } else {
                trace!("if {}: stale general query timer", self.if_index);
            }
            return false;
        }

        let Some(ginfo) = self.db.groups.get_mut(&tm.gaddr) else {
            trace!(
                "if {}: timer for unknown group {} is stale",
                self.if_index,
                tm.gaddr
            );
            return false;
        };

        let mut remove_group = false;
        let changed = match tm.kind {
            TimerKind::Filter => {
                if !TimerToken::slot_matches(&ginfo.filter_timer, &tm.handle) {
                    trace!("if {}: stale filter timer for {}", self.if_index, tm.gaddr);
                    false
                } else if ginfo.filter_mode == McFilter::Exclude {
                    // RFC 3810 §7.2.2: expired filter timer leaves
                    // EXCLUDE mode
                    if ginfo.include_requested_list.is_empty() {
                        remove_group = true;
                    } else {
                        ginfo.filter_mode = McFilter::Include;
                        ginfo.filter_timer = None;
                        ginfo.exclude_list = SourceList::new();
                    }
                    true
                } else {
                    error!(
                        "if {}: filter timer fired for {} in INCLUDE mode",
                        self.if_index, tm.gaddr
                    );
                    false
                }
            }
            TimerKind::Source => {
                // RFC 3810 §7.2.3: expired include sources are dropped,
                // expired requested sources move to the exclude list
                let taken = ginfo.include_requested_list.take_matching_timer(&tm.handle);
                if taken.is_empty() {
                    trace!("if {}: stale source timer for {}", self.if_index, tm.gaddr);
                    false
                } else {
                    match ginfo.filter_mode {
                        McFilter::Include => {
                            if ginfo.include_requested_list.is_empty() {
                                remove_group = true;
                            }
                        }
                        McFilter::Exclude => {
                            for mut entry in taken {
                                entry.timer = None;
                                entry.retransmission_count = -1;
                                ginfo.exclude_list.insert(entry);
                            }
                        }
                    }
                    true
                }
            }
            TimerKind::RetGroup => {
                if TimerToken::slot_matches(&ginfo.group_retransmission_timer, &tm.handle) {
                    send_q_group(&ctx, tm.gaddr, ginfo);
                } else {
                    trace!(
                        "if {}: stale group retransmission timer for {}",
                        self.if_index,
                        tm.gaddr
                    );
                }
                false
            }
            TimerKind::RetSource => {
                if TimerToken::slot_matches(&ginfo.source_retransmission_timer, &tm.handle) {
                    send_q_sources(&ctx, tm.gaddr, ginfo, &SourceList::new(), true);
                } else {
                    trace!(
                        "if {}: stale source retransmission timer for {}",
                        self.if_index,
                        tm.gaddr
                    );
                }
                false
            }
            TimerKind::OlderHostPresent => {
                if !TimerToken::slot_matches(&ginfo.older_host_present_timer, &tm.handle) {
                    trace!(
                        "if {}: stale older-host-present timer for {}",
                        self.if_index,
                        tm.gaddr
                    );
                    false
                } else if ginfo.compatibility_mode == qvm {
                    ginfo.older_host_present_timer = None;
                    true
                } else {
                    // climb one version; reaching the querier version
                    // takes one more MALI to relearn source state
                    let next = ginfo.compatibility_mode.next_newer();
                    let next = if next.older_or_equal(qvm) { next } else { qvm };
                    ginfo.compatibility_mode = next;
                    let delay = if next == qvm {
                        ctx.tv.multicast_address_listening_interval()
                    } else {
                        ctx.tv.older_host_present_interval()
                    };
                    let handle = TimerToken::new(delay);
                    ginfo.older_host_present_timer = Some(handle.clone());
                    ctx.schedule(TimerKind::OlderHostPresent, tm.gaddr, None, delay, handle);
                    false
                }
            }
            TimerKind::GeneralQuery | TimerKind::NewSource => {
                warn!("if {}: timer kind not owned by the querier", self.if_index);
                false
            }
        };

        if remove_group {
            self.db.groups.remove(&tm.gaddr);
        }
        changed
    }

    /// A query from a foreign querier was seen. Querier election is
    /// not performed; the proxy stays querier.
    pub fn receive_query(&mut self) {
        debug!(
            "if {}: ignoring a foreign query (no querier election)",
            self.if_index
        );
    }

    /// For each `(source, output_interfaces)` pair, appends this
    /// interface when its membership state indicates interest in the
    /// source and `filter` (the instance's filter checks) permits it.
    pub fn suggest_to_forward_traffic(
        &self,
        gaddr: &McAddr,
        rt_list: &mut Vec<(McAddr, Vec<u32>)>,
        filter: &dyn Fn(&McAddr) -> bool,
    ) {
        if !self.db.is_querier {
            return;
        }
        let Some(ginfo) = self.db.groups.get(gaddr) else {
            return;
        };
        let qvm = self.db.querier_version_mode;
        for (saddr, outputs) in rt_list.iter_mut() {
            let interested = if ginfo.is_in_backward_compatibility_mode(qvm) {
                // v1/v2 listeners cannot express source filters
                true
            } else {
                match ginfo.filter_mode {
                    McFilter::Include => ginfo.include_requested_list.contains(saddr),
                    McFilter::Exclude => !ginfo.exclude_list.contains(saddr),
                }
            };
            if interested && filter(saddr) {
                outputs.push(self.if_index);
            }
        }
    }

    /// The `(filter_mode, source_list)` this interface contributes to
    /// membership aggregation. Under backward compatibility effects
    /// the group acts as EXCLUDE({}).
    pub fn group_membership_infos(&self, gaddr: &McAddr) -> (McFilter, SourceList) {
        let Some(ginfo) = self.db.groups.get(gaddr) else {
            return (McFilter::Include, SourceList::new());
        };
        if ginfo.is_in_backward_compatibility_mode(self.db.querier_version_mode) {
            return (McFilter::Exclude, SourceList::new());
        }
        match ginfo.filter_mode {
            McFilter::Include => (McFilter::Include, ginfo.include_requested_list.clone()),
            McFilter::Exclude => (McFilter::Exclude, ginfo.exclude_list.clone()),
        }
    }

    /// Leaves the router groups; called on instance teardown.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.sender.leave_router_groups(self.if_index) {
            warn!(
                "if {}: failed to leave the router groups: {}",
                self.if_index, err
            );
        }
    }
}

impl<'a> Ctx<'a> {
    fn schedule(
        &self,
        kind: TimerKind,
        gaddr: McAddr,
        saddr: Option<McAddr>,
        delay: Duration,
        handle: TimerHandle,
    ) {
        self.timing.add(
            delay,
            self.mailbox,
            ProxyMsg::Timer(TimerMsg {
                kind,
                if_index: self.if_index,
                gaddr,
                saddr,
                handle,
            }),
        );
    }
}

/// Arms the group filter timer with MALI.
fn mali_group(ctx: &Ctx, gaddr: McAddr, ginfo: &mut GroupInfo) {
    let mali = ctx.tv.multicast_address_listening_interval();
    let handle = TimerToken::new(mali);
    ginfo.filter_timer = Some(handle.clone());
    ctx.schedule(TimerKind::Filter, gaddr, None, mali, handle);
}

/// Arms one shared MALI source timer on the entries of `slist` whose
/// address is in `subset`, clearing their retransmission state.
fn mali_subset(ctx: &Ctx, gaddr: McAddr, slist: &mut SourceList, subset: &SourceList) {
    if subset.is_empty() {
        return;
    }
    let mali = ctx.tv.multicast_address_listening_interval();
    let handle = TimerToken::new(mali);
    for addr in subset.addrs() {
        if let Some(entry) = slist.get_mut(addr) {
            entry.timer = Some(handle.clone());
            entry.retransmission_count = -1;
        }
    }
    ctx.schedule(TimerKind::Source, gaddr, None, mali, handle);
}

/// Sends the periodic general query and schedules the next one
/// (startup interval while the startup count lasts).
fn send_general_query(ctx: &Ctx, db: &mut MembershipDb) {
    if db.general_query_timer.is_none() {
        db.startup_query_count = ctx.tv.startup_query_count().saturating_sub(1);
    }

    let delay = if db.startup_query_count > 0 {
        db.startup_query_count -= 1;
        ctx.tv.startup_query_interval()
    } else {
        ctx.tv.query_interval()
    };

    let handle = TimerToken::new(delay);
    db.general_query_timer = Some(handle.clone());
    ctx.schedule(
        TimerKind::GeneralQuery,
        McAddr::unspecified(db.querier_version_mode.family()),
        None,
        delay,
        handle,
    );

    if let Err(err) = ctx.sender.send_general_query(ctx.if_index, ctx.tv) {
        error!("if {}: failed to send a general query: {}", ctx.if_index, err);
    }
}

/// Table action "Send Q(MA)": lower the filter timer to LLQT and
/// retransmit a group-specific query LLQC times every LLQI.
fn send_q_group(ctx: &Ctx, gaddr: McAddr, ginfo: &mut GroupInfo) {
    if ginfo.group_retransmission_timer.is_none() {
        ginfo.group_retransmission_count = ctx.tv.last_listener_query_count() as i32;
        let llqt = ctx.tv.last_listener_query_time();
        let handle = TimerToken::new(llqt);
        ginfo.filter_timer = Some(handle.clone());
        ctx.schedule(TimerKind::Filter, gaddr, None, llqt, handle);
    }

    if ginfo.group_retransmission_count > 0 {
        ginfo.group_retransmission_count -= 1;

        if ginfo.group_retransmission_count > 0 {
            let llqi = ctx.tv.last_listener_query_interval();
            let handle = TimerToken::new(llqi);
            ginfo.group_retransmission_timer = Some(handle.clone());
            ctx.schedule(TimerKind::RetGroup, gaddr, None, llqi, handle);
        }

        // S flag: suppress router-side processing while the filter
        // timer is still above LLQT
        let s_flag = match &ginfo.filter_timer {
            Some(t) => t.fires_later_than(ctx.tv.last_listener_query_time()),
            None => false,
        };
        if let Err(err) =
            ctx.sender
                .send_mc_addr_specific_query(ctx.if_index, ctx.tv, &gaddr, s_flag)
        {
            error!(
                "if {}: failed to send a group-specific query: {}",
                ctx.if_index, err
            );
        }
    } else {
        ginfo.group_retransmission_timer = None;
        ginfo.group_retransmission_count = -1;
    }
}

/// Table action "Send Q(MA, src-list)": put the `tmp` sources into
/// retransmission state with their timers lowered to LLQT, then emit
/// the group-and-source-specific queries.
fn send_q_sources(
    ctx: &Ctx,
    gaddr: McAddr,
    ginfo: &mut GroupInfo,
    tmp: &SourceList,
    in_retransmission_state: bool,
) {
    let llqt = ctx.tv.last_listener_query_time();
    let handle = TimerToken::new(llqt);

    let mut is_used = false;
    for addr in tmp.addrs() {
        if let Some(entry) = ginfo.include_requested_list.get_mut(addr) {
            if entry.retransmission_count < 1 {
                is_used = true;
                entry.timer = Some(handle.clone());
                entry.retransmission_count = ctx.tv.last_listener_query_count() as i32;
            }
        }
    }

    if is_used {
        ctx.schedule(TimerKind::Source, gaddr, None, llqt, handle);
    }

    if is_used || in_retransmission_state {
        let retransmit_again = ctx.sender.send_mc_addr_and_src_specific_query(
            ctx.if_index,
            ctx.tv,
            &gaddr,
            &mut ginfo.include_requested_list,
        );
        if retransmit_again {
            let llqi = ctx.tv.last_listener_query_interval();
            let handle = TimerToken::new(llqi);
            ginfo.source_retransmission_timer = Some(handle.clone());
            ctx.schedule(TimerKind::RetSource, gaddr, None, llqi, handle);
        }
    }
}

/// RFC 3810 §7.4.1/7.4.2, router in INCLUDE(A) receiving R(B).
fn receive_in_include(
    ctx: &Ctx,
    gaddr: McAddr,
    record_type: RecordType,
    b: SourceList,
    ginfo: &mut GroupInfo,
) -> bool {
    match record_type {
        // INCLUDE(A) + ALLOW(B) -> INCLUDE(A+B), (B)=MALI
        RecordType::AllowNewSources | RecordType::ModeIsInclude => {
            ginfo.include_requested_list.union_with(&b);
            mali_subset(ctx, gaddr, &mut ginfo.include_requested_list, &b);
            true
        }

        // INCLUDE(A) + BLOCK(B) -> INCLUDE(A), send Q(MA, A*B)
        RecordType::BlockOldSources => {
            let tmp = &ginfo.include_requested_list * &b;
            send_q_sources(ctx, gaddr, ginfo, &tmp, false);
            false
        }

        // INCLUDE(A) + TO_EX(B) -> EXCLUDE(A*B, B-A),
        //   send Q(MA, A*B), filter timer = MALI
        RecordType::ChangeToExclude => {
            ginfo.filter_mode = McFilter::Exclude;
            let a_isect_b = &ginfo.include_requested_list * &b;
            let b_minus_a = &b - &ginfo.include_requested_list;
            ginfo.include_requested_list.intersect_with(&b);
            ginfo.exclude_list = b_minus_a;
            send_q_sources(ctx, gaddr, ginfo, &a_isect_b, false);
            mali_group(ctx, gaddr, ginfo);
            true
        }

        // INCLUDE(A) + TO_IN(B) -> INCLUDE(A+B),
        //   send Q(MA, A-B), (B)=MALI
        RecordType::ChangeToInclude => {
            ginfo.include_requested_list.union_with(&b);
            let a_minus_b = &ginfo.include_requested_list - &b;
            send_q_sources(ctx, gaddr, ginfo, &a_minus_b, false);
            mali_subset(ctx, gaddr, &mut ginfo.include_requested_list, &b);
            true
        }

        // INCLUDE(A) + IS_EX(B) -> EXCLUDE(A*B, B-A), filter timer = MALI
        RecordType::ModeIsExclude => {
            ginfo.filter_mode = McFilter::Exclude;
            let b_minus_a = &b - &ginfo.include_requested_list;
            ginfo.include_requested_list.intersect_with(&b);
            ginfo.exclude_list = b_minus_a;
            mali_group(ctx, gaddr, ginfo);
            true
        }
    }
}

/// RFC 3810 §7.4.1/7.4.2, router in EXCLUDE(X,Y) receiving R(A).
fn receive_in_exclude(
    ctx: &Ctx,
    gaddr: McAddr,
    record_type: RecordType,
    mut a: SourceList,
    ginfo: &mut GroupInfo,
) -> bool {
    match record_type {
        // EXCLUDE(X,Y) + ALLOW(A) -> EXCLUDE(X+A, Y-A), (A)=MALI
        RecordType::AllowNewSources | RecordType::ModeIsInclude => {
            ginfo.include_requested_list.union_with(&a);
            ginfo.exclude_list.subtract(&a);
            mali_subset(ctx, gaddr, &mut ginfo.include_requested_list, &a);
            true
        }

        // EXCLUDE(X,Y) + BLOCK(A) -> EXCLUDE(X+(A-Y), Y),
        //   send Q(MA, A-Y)
        RecordType::BlockOldSources => {
            let a_minus_y = &a - &ginfo.exclude_list;
            ginfo.include_requested_list.union_with(&a_minus_y);
            send_q_sources(ctx, gaddr, ginfo, &a_minus_y, false);
            false
        }

        // EXCLUDE(X,Y) + TO_EX(A) -> EXCLUDE(A-Y, Y*A),
        //   send Q(MA, A-Y), filter timer = MALI
        RecordType::ChangeToExclude => {
            let a_minus_y = &a - &ginfo.exclude_list;
            ginfo.include_requested_list.intersect_with(&a);
            ginfo.include_requested_list.union_with(&a_minus_y);
            ginfo.exclude_list.intersect_with(&a);
            let snapshot = ginfo.include_requested_list.clone();
            send_q_sources(ctx, gaddr, ginfo, &snapshot, false);
            mali_group(ctx, gaddr, ginfo);
            true
        }

        // EXCLUDE(X,Y) + TO_IN(A) -> EXCLUDE(X+A, Y-A),
        //   send Q(MA, X-A), send Q(MA), (A)=MALI
        RecordType::ChangeToInclude => {
            ginfo.include_requested_list.union_with(&a);
            ginfo.exclude_list.subtract(&a);
            let x_minus_a = &ginfo.include_requested_list - &a;
            send_q_sources(ctx, gaddr, ginfo, &x_minus_a, false);
            send_q_group(ctx, gaddr, ginfo);
            mali_subset(ctx, gaddr, &mut ginfo.include_requested_list, &a);
            true
        }

        // EXCLUDE(X,Y) + IS_EX(A) -> EXCLUDE(A-Y, Y*A),
        //   (A-X-Y)=MALI, filter timer = MALI
        RecordType::ModeIsExclude => {
            let fresh = &(&a - &ginfo.include_requested_list) - &ginfo.exclude_list;
            mali_subset(ctx, gaddr, &mut a, &fresh);
            let a_minus_y = &a - &ginfo.exclude_list;
            ginfo.include_requested_list.intersect_with(&a);
            ginfo.include_requested_list.union_with(&a_minus_y);
            ginfo.exclude_list.intersect_with(&a);
            mali_group(ctx, gaddr, ginfo);
            true
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::proxy::testutil::RecordingTransport;
    use crate::wire::{IgmpV3Query, IgmpV3ReportSlice};
    use std::time::Instant;

    struct Fixture {
        querier: Querier,
        transport: Arc<RecordingTransport>,
        timing: Arc<Timing>,
        mailbox: Mailbox,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(RecordingTransport::new());
        let sender = Arc::new(Sender::new(GroupMemProtocol::IgmpV3, transport.clone()));
        let timing = Timing::new();
        let mailbox = Mailbox::new(256);
        let querier = Querier::new(
            1,
            GroupMemProtocol::IgmpV3,
            sender,
            timing.clone(),
            mailbox.clone(),
            TimersValues::default(),
        )
        .unwrap();
        Fixture {
            querier,
            transport,
            timing,
            mailbox,
        }
    }

    fn record(record_type: RecordType, gaddr: &str, sources: &[&str]) -> GroupRecordMsg {
        versioned_record(record_type, gaddr, sources, GroupMemProtocol::IgmpV3)
    }

    fn versioned_record(
        record_type: RecordType,
        gaddr: &str,
        sources: &[&str],
        report_version: GroupMemProtocol,
    ) -> GroupRecordMsg {
        GroupRecordMsg {
            if_index: 1,
            record_type,
            gaddr: gaddr.parse().unwrap(),
            sources: sources.iter().map(|s| s.parse().unwrap()).collect(),
            report_version,
        }
    }

    /// Fires only timers of one kind; everything else stays queued
    /// for later rounds.
    fn fire_kind(fx: &mut Fixture, kind: TimerKind) -> bool {
        fx.timing.tick(Instant::now() + Duration::from_secs(1_000_000));
        let mut changed = false;
        let mut kept = Vec::new();
        while let Some(msg) = fx.mailbox.try_recv() {
            match msg {
                ProxyMsg::Timer(tm) if tm.kind == kind => {
                    changed |= fx.querier.timer_triggered(&tm);
                }
                other => kept.push(other),
            }
        }
        for msg in kept {
            fx.mailbox.send(msg);
        }
        changed
    }

    fn addr(s: &str) -> McAddr {
        s.parse().unwrap()
    }

    #[test]
    fn startup_joins_router_groups_and_queries() {
        let fx = fixture();
        assert_eq!(
            fx.transport.joined(),
            vec![(1, McAddr::ALL_ROUTERS_V4), (1, McAddr::IGMPV3_ROUTERS)]
        );
        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 1);
        let query = IgmpV3Query::from_slice(&sent[0].payload).unwrap();
        assert!(query.group_addr().is_unspecified());

        // shutdown leaves the router groups again
        let mut fx = fx;
        fx.querier.shutdown();
        assert!(fx.transport.joined().is_empty());
    }

    #[test]
    fn startup_query_schedule() {
        let mut fx = fixture();
        // robustness 2: the initial round consumes the startup budget
        // and paces the next query at the startup interval
        assert_eq!(fx.querier.db().startup_query_count, 0);
        let next = fx.querier.db().general_query_timer.as_ref().unwrap();
        // startup interval is QI/4 = 31.25 s
        assert!(next.fires_later_than(Duration::from_secs(30)));
        assert!(!next.fires_later_than(Duration::from_secs(32)));

        fire_kind(&mut fx, TimerKind::GeneralQuery);
        assert_eq!(fx.transport.sent().len(), 2);
        // steady state runs at the full query interval
        let next = fx.querier.db().general_query_timer.as_ref().unwrap();
        assert!(next.fires_later_than(Duration::from_secs(124)));

        fire_kind(&mut fx, TimerKind::GeneralQuery);
        assert_eq!(fx.transport.sent().len(), 3);
    }

    // a host adds sources to an include-mode membership
    #[test]
    fn allow_in_include_mode() {
        let mut fx = fixture();
        let changed = fx.querier.receive_record(record(
            RecordType::AllowNewSources,
            "239.0.0.1",
            &["1.1.1.1", "2.2.2.2"],
        ));
        assert!(changed);

        let db = fx.querier.db();
        let ginfo = db.groups.get(&addr("239.0.0.1")).unwrap();
        assert_eq!(ginfo.filter_mode, McFilter::Include);
        assert_eq!(ginfo.include_requested_list.len(), 2);
        assert!(ginfo.exclude_list.is_empty());
        assert!(ginfo.filter_timer.is_none());
        for entry in ginfo.include_requested_list.iter() {
            // source timers run at MALI (260 s by default)
            let timer = entry.timer.as_ref().unwrap();
            assert!(timer.fires_later_than(Duration::from_secs(259)));
            assert!(!timer.fires_later_than(Duration::from_secs(261)));
            assert_eq!(entry.retransmission_count, -1);
        }
    }

    #[test]
    fn expired_source_timers_remove_the_group() {
        let mut fx = fixture();
        fx.querier.receive_record(record(
            RecordType::AllowNewSources,
            "239.0.0.1",
            &["1.1.1.1"],
        ));
        let changed = fire_kind(&mut fx, TimerKind::Source);
        assert!(changed);
        assert!(fx.querier.db().groups.is_empty());
    }

    // plain join and leave of a group
    #[test]
    fn join_and_leave() {
        let mut fx = fixture();

        // TO_EX({}) is a join
        let changed = fx
            .querier
            .receive_record(record(RecordType::ChangeToExclude, "239.0.0.2", &[]));
        assert!(changed);
        {
            let ginfo = fx.querier.db().groups.get(&addr("239.0.0.2")).unwrap();
            assert_eq!(ginfo.filter_mode, McFilter::Exclude);
            assert!(ginfo.include_requested_list.is_empty());
            assert!(ginfo.exclude_list.is_empty());
            let filter_timer = ginfo.filter_timer.as_ref().unwrap();
            assert!(filter_timer.fires_later_than(Duration::from_secs(259)));
        }

        // TO_IN({}) is a leave: the filter timer drops to LLQT and a
        // group-specific query goes out
        fx.transport.clear();
        let changed = fx
            .querier
            .receive_record(record(RecordType::ChangeToInclude, "239.0.0.2", &[]));
        assert!(changed);
        {
            let ginfo = fx.querier.db().groups.get(&addr("239.0.0.2")).unwrap();
            let filter_timer = ginfo.filter_timer.as_ref().unwrap();
            // LLQT is 2 s by default
            assert!(!filter_timer.fires_later_than(Duration::from_secs(3)));
        }
        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 1);
        let query = IgmpV3Query::from_slice(&sent[0].payload).unwrap();
        assert_eq!(query.group_addr(), addr("239.0.0.2"));

        // no report within LLQT: the group is deleted
        let changed = fire_kind(&mut fx, TimerKind::Filter);
        assert!(changed);
        assert!(fx.querier.db().groups.is_empty());
    }

    #[test]
    fn group_query_retransmissions() {
        let mut fx = fixture();
        fx.querier
            .receive_record(record(RecordType::ChangeToExclude, "239.0.0.2", &[]));
        fx.transport.clear();
        fx.querier
            .receive_record(record(RecordType::ChangeToInclude, "239.0.0.2", &[]));
        // first query sent directly, LLQC-1 retransmissions scheduled
        assert_eq!(fx.transport.sent().len(), 1);
        fire_kind(&mut fx, TimerKind::RetGroup);
        assert_eq!(fx.transport.sent().len(), 2);
        // retransmission count exhausted, no further query
        fire_kind(&mut fx, TimerKind::RetGroup);
        assert_eq!(fx.transport.sent().len(), 2);
    }

    // an older host pins the group below the querier version
    #[test]
    fn backward_compatibility_fallback() {
        let mut fx = fixture();

        // an IGMPv2 membership report arrives at the v3 querier
        fx.querier.receive_record(versioned_record(
            RecordType::ModeIsExclude,
            "239.0.0.3",
            &[],
            GroupMemProtocol::IgmpV2,
        ));
        {
            let ginfo = fx.querier.db().groups.get(&addr("239.0.0.3")).unwrap();
            assert_eq!(ginfo.compatibility_mode, GroupMemProtocol::IgmpV2);
            assert!(ginfo.older_host_present_timer.is_some());
            // pinned for QRV*QI + QRI = 260 s
            let timer = ginfo.older_host_present_timer.as_ref().unwrap();
            assert!(timer.fires_later_than(Duration::from_secs(259)));
        }

        // BLOCK records are ignored while pinned
        let changed = fx.querier.receive_record(record(
            RecordType::BlockOldSources,
            "239.0.0.3",
            &["1.1.1.1"],
        ));
        assert!(!changed);

        // TO_EX records lose their source list while pinned
        fx.querier.receive_record(record(
            RecordType::ChangeToExclude,
            "239.0.0.3",
            &["1.1.1.1"],
        ));
        assert!(fx
            .querier
            .db()
            .groups
            .get(&addr("239.0.0.3"))
            .unwrap()
            .exclude_list
            .is_empty());

        // expiry climbs one version (to v3, rearmed at MALI), the next
        // expiry clears the pin
        fire_kind(&mut fx, TimerKind::OlderHostPresent);
        {
            let ginfo = fx.querier.db().groups.get(&addr("239.0.0.3")).unwrap();
            assert_eq!(ginfo.compatibility_mode, GroupMemProtocol::IgmpV3);
            assert!(ginfo.older_host_present_timer.is_some());
        }
        fire_kind(&mut fx, TimerKind::OlderHostPresent);
        let ginfo = fx.querier.db().groups.get(&addr("239.0.0.3")).unwrap();
        assert!(ginfo.older_host_present_timer.is_none());
    }

    #[test]
    fn stale_timers_are_noops() {
        let mut fx = fixture();
        fx.querier.receive_record(record(
            RecordType::AllowNewSources,
            "239.0.0.1",
            &["1.1.1.1"],
        ));
        // re-arming replaces the handle; the first scheduled timer is
        // now stale
        fx.querier.receive_record(record(
            RecordType::AllowNewSources,
            "239.0.0.1",
            &["1.1.1.1"],
        ));

        fx.timing
            .tick(Instant::now() + Duration::from_secs(1_000_000));
        let mut timer_msgs = Vec::new();
        while let Some(msg) = fx.mailbox.try_recv() {
            if let ProxyMsg::Timer(tm) = msg {
                if tm.kind == TimerKind::Source {
                    timer_msgs.push(tm);
                }
            }
        }
        assert_eq!(timer_msgs.len(), 2);

        // the stale fire leaves the group alone
        assert!(!fx.querier.timer_triggered(&timer_msgs[0]));
        assert_eq!(fx.querier.db().groups.len(), 1);
        // the current one removes the source and with it the group
        assert!(fx.querier.timer_triggered(&timer_msgs[1]));
        assert!(fx.querier.db().groups.is_empty());
    }

    #[test]
    fn block_triggers_source_specific_query() {
        let mut fx = fixture();
        fx.querier.receive_record(record(
            RecordType::AllowNewSources,
            "239.0.0.1",
            &["1.1.1.1", "2.2.2.2"],
        ));
        fx.transport.clear();

        let changed = fx.querier.receive_record(record(
            RecordType::BlockOldSources,
            "239.0.0.1",
            &["1.1.1.1"],
        ));
        // BLOCK does not change forwarding state, it only doubts it
        assert!(!changed);

        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 1);
        let query = IgmpV3Query::from_slice(&sent[0].payload).unwrap();
        assert_eq!(query.sources, vec![[1, 1, 1, 1]]);

        let ginfo = fx.querier.db().groups.get(&addr("239.0.0.1")).unwrap();
        let doubted = ginfo
            .include_requested_list
            .get(&addr("1.1.1.1"))
            .unwrap();
        // LLQC - 1 after the emitted query
        assert_eq!(doubted.retransmission_count, 1);
        assert!(ginfo.source_retransmission_timer.is_some());
    }

    #[test]
    fn exclude_mode_transitions() {
        let mut fx = fixture();
        // EXCLUDE(X={}, Y={1.1.1.1, 2.2.2.2})
        fx.querier.receive_record(record(
            RecordType::ChangeToExclude,
            "239.0.0.9",
            &["1.1.1.1", "2.2.2.2"],
        ));
        {
            let ginfo = fx.querier.db().groups.get(&addr("239.0.0.9")).unwrap();
            assert_eq!(ginfo.filter_mode, McFilter::Exclude);
            assert_eq!(ginfo.exclude_list.len(), 2);
            assert!(ginfo.include_requested_list.is_empty());
        }

        // ALLOW(1.1.1.1): moves from the exclude to the requested list
        fx.querier.receive_record(record(
            RecordType::AllowNewSources,
            "239.0.0.9",
            &["1.1.1.1"],
        ));
        {
            let ginfo = fx.querier.db().groups.get(&addr("239.0.0.9")).unwrap();
            assert!(ginfo.include_requested_list.contains(&addr("1.1.1.1")));
            assert!(!ginfo.exclude_list.contains(&addr("1.1.1.1")));
            assert!(ginfo.exclude_list.contains(&addr("2.2.2.2")));
        }

        // the requested source's timer expiry moves it back
        fire_kind(&mut fx, TimerKind::Source);
        {
            let ginfo = fx.querier.db().groups.get(&addr("239.0.0.9")).unwrap();
            assert!(ginfo.include_requested_list.is_empty());
            assert!(ginfo.exclude_list.contains(&addr("1.1.1.1")));
        }

        // filter timer expiry with an empty requested list deletes
        fire_kind(&mut fx, TimerKind::Filter);
        assert!(fx.querier.db().groups.is_empty());
    }

    #[test]
    fn suggest_to_forward_traffic() {
        let mut fx = fixture();
        fx.querier.receive_record(record(
            RecordType::AllowNewSources,
            "239.0.0.4",
            &["10.0.0.1"],
        ));

        let mut rt_list = vec![
            (addr("10.0.0.1"), Vec::new()),
            (addr("10.9.9.9"), Vec::new()),
        ];
        fx.querier
            .suggest_to_forward_traffic(&addr("239.0.0.4"), &mut rt_list, &|_| true);
        assert_eq!(rt_list[0].1, vec![1]);
        assert!(rt_list[1].1.is_empty());

        // the external filter can veto
        let mut rt_list = vec![(addr("10.0.0.1"), Vec::new())];
        fx.querier
            .suggest_to_forward_traffic(&addr("239.0.0.4"), &mut rt_list, &|_| false);
        assert!(rt_list[0].1.is_empty());
    }

    #[test]
    fn membership_infos_under_compat_effects() {
        let mut fx = fixture();
        fx.querier.receive_record(versioned_record(
            RecordType::ModeIsExclude,
            "239.0.0.3",
            &[],
            GroupMemProtocol::IgmpV2,
        ));
        // v2 listeners cannot filter sources: EXCLUDE({})
        let (mode, sources) = fx.querier.group_membership_infos(&addr("239.0.0.3"));
        assert_eq!(mode, McFilter::Exclude);
        assert!(sources.is_empty());

        // unknown groups contribute INCLUDE({})
        let (mode, sources) = fx.querier.group_membership_infos(&addr("239.9.9.9"));
        assert_eq!(mode, McFilter::Include);
        assert!(sources.is_empty());
    }

    #[test]
    fn report_state_to_upstream_format() {
        // sanity-check the record build path used by aggregation
        let transport = Arc::new(RecordingTransport::new());
        let sender = Sender::new(GroupMemProtocol::IgmpV3, transport.clone());
        let slist: SourceList = [addr("1.1.1.1")].into_iter().collect();
        sender
            .send_record(7, McFilter::Include, &addr("239.0.0.5"), &slist)
            .unwrap();
        let sent = transport.sent();
        let records = IgmpV3ReportSlice::from_slice(&sent[0].payload)
            .unwrap()
            .records()
            .unwrap();
        assert_eq!(records[0].record_type, RecordType::ChangeToInclude);
    }
}

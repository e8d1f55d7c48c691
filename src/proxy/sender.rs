use crate::err::SysError;
use crate::proxy::{McFilter, SourceList, TimersValues};
use crate::sys::PacketSend;
use crate::wire::{
    query_code, GroupRecord, IgmpV2Message, IgmpV3Query, IgmpV3ReportSlice, MldV1Message,
    MldV2Query, MldV2ReportSlice, RecordType, IGMP_TYPE_LEAVE, IGMP_TYPE_QUERY,
    IGMP_TYPE_V1_REPORT, IGMP_TYPE_V2_REPORT, MLD_TYPE_QUERY, MLD_TYPE_V1_DONE,
    MLD_TYPE_V1_REPORT,
};
use crate::{GroupMemProtocol, McAddr};

use log::warn;

use std::sync::Arc;
use std::time::Duration;

/// Builds and transmits the queries and reports of one proxy instance.
///
/// The wire format follows the instance protocol version; transmission
/// goes through the [`PacketSend`] capability (the mroute socket in
/// production).
pub struct Sender {
    proto: GroupMemProtocol,
    transport: Arc<dyn PacketSend>,
}

impl Sender {
    pub fn new(proto: GroupMemProtocol, transport: Arc<dyn PacketSend>) -> Sender {
        Sender { proto, transport }
    }

    pub fn protocol(&self) -> GroupMemProtocol {
        self.proto
    }

    /// Emits a general query to the all-hosts/all-nodes group with the
    /// configured response interval, QRV and QQIC.
    pub fn send_general_query(&self, if_index: u32, tv: &TimersValues) -> Result<(), SysError> {
        let gaddr = McAddr::unspecified(self.proto.family());
        self.send_query(
            if_index,
            tv,
            &gaddr,
            tv.query_response_interval(),
            false,
            &[],
        )
    }

    /// Emits a group-specific query. `s_flag` suppresses router-side
    /// processing on listeners that are still covered by a running
    /// filter timer.
    pub fn send_mc_addr_specific_query(
        &self,
        if_index: u32,
        tv: &TimersValues,
        gaddr: &McAddr,
        s_flag: bool,
    ) -> Result<(), SysError> {
        self.send_query(
            if_index,
            tv,
            gaddr,
            tv.last_listener_query_interval(),
            s_flag,
            &[],
        )
    }

    /// Emits group-and-source-specific queries for the sources of
    /// `slist` that are in retransmission state, splitting them by
    /// their timers into an S=0 and an S=1 packet (RFC 3810 §7.6.3.2).
    ///
    /// Decrements every emitted source's retransmission count; returns
    /// true if any source still has retransmissions left.
    pub fn send_mc_addr_and_src_specific_query(
        &self,
        if_index: u32,
        tv: &TimersValues,
        gaddr: &McAddr,
        slist: &mut SourceList,
    ) -> bool {
        let llqt = tv.last_listener_query_time();
        let mut lower = Vec::new();
        let mut higher = Vec::new();
        let mut retransmit_again = false;

        for entry in slist.iter_mut() {
            if entry.retransmission_count <= 0 {
                continue;
            }
            entry.retransmission_count -= 1;
            if entry.retransmission_count > 0 {
                retransmit_again = true;
            }
            match &entry.timer {
                Some(timer) if timer.fires_later_than(llqt) => higher.push(entry.addr),
                Some(_) => lower.push(entry.addr),
                None => {
                    warn!("source {} in retransmission state without a timer", entry.addr);
                    lower.push(entry.addr);
                }
            }
        }

        if !lower.is_empty() {
            if let Err(err) = self.send_query(
                if_index,
                tv,
                gaddr,
                tv.last_listener_query_interval(),
                false,
                &lower,
            ) {
                warn!("if {}: source specific query failed: {}", if_index, err);
            }
        }
        if !higher.is_empty() {
            if let Err(err) = self.send_query(
                if_index,
                tv,
                gaddr,
                tv.last_listener_query_interval(),
                true,
                &higher,
            ) {
                warn!("if {}: source specific query failed: {}", if_index, err);
            }
        }

        retransmit_again
    }

    /// Emits a state-change record toward an upstream: a v3/MLDv2
    /// report, or the legacy join/leave messages for older versions.
    pub fn send_record(
        &self,
        if_index: u32,
        filter_mode: McFilter,
        gaddr: &McAddr,
        slist: &SourceList,
    ) -> Result<(), SysError> {
        let sources: Vec<McAddr> = slist.addrs().copied().collect();
        match self.proto {
            GroupMemProtocol::IgmpV3 => {
                let record = GroupRecord {
                    record_type: record_type_for(filter_mode),
                    group: *gaddr,
                    sources,
                };
                let bytes = IgmpV3ReportSlice::build(&[record]);
                self.transport
                    .send(if_index, &McAddr::IGMPV3_ROUTERS, &bytes)
            }
            GroupMemProtocol::MldV2 => {
                let record = GroupRecord {
                    record_type: record_type_for(filter_mode),
                    group: *gaddr,
                    sources,
                };
                let bytes = MldV2ReportSlice::build(&[record]);
                self.transport
                    .send(if_index, &McAddr::MLDV2_ROUTERS, &bytes)
            }
            GroupMemProtocol::IgmpV2 | GroupMemProtocol::IgmpV1 => {
                // INCLUDE({}) is a leave, everything else a join
                if filter_mode == McFilter::Include && slist.is_empty() {
                    if self.proto == GroupMemProtocol::IgmpV2 {
                        let msg = IgmpV2Message {
                            msg_type: IGMP_TYPE_LEAVE,
                            max_resp_code: 0,
                            group: v4_octets(gaddr),
                        };
                        self.transport
                            .send(if_index, &McAddr::ALL_ROUTERS_V4, &msg.to_bytes())
                    } else {
                        // IGMPv1 has no leave; membership simply ages out
                        Ok(())
                    }
                } else {
                    let msg_type = if self.proto == GroupMemProtocol::IgmpV2 {
                        IGMP_TYPE_V2_REPORT
                    } else {
                        IGMP_TYPE_V1_REPORT
                    };
                    let msg = IgmpV2Message {
                        msg_type,
                        max_resp_code: 0,
                        group: v4_octets(gaddr),
                    };
                    self.transport.send(if_index, gaddr, &msg.to_bytes())
                }
            }
            GroupMemProtocol::MldV1 => {
                if filter_mode == McFilter::Include && slist.is_empty() {
                    let msg = MldV1Message {
                        msg_type: MLD_TYPE_V1_DONE,
                        max_resp_delay: 0,
                        group: v6_octets(gaddr),
                    };
                    self.transport
                        .send(if_index, &McAddr::ALL_ROUTERS_V6_LINK, &msg.to_bytes())
                } else {
                    let msg = MldV1Message {
                        msg_type: MLD_TYPE_V1_REPORT,
                        max_resp_delay: 0,
                        group: v6_octets(gaddr),
                    };
                    self.transport.send(if_index, gaddr, &msg.to_bytes())
                }
            }
        }
    }

    /// Joins the per-family router groups on the interface:
    /// 224.0.0.2 + 224.0.0.22, respectively FF02::2, FF05::2 and
    /// FF02::16.
    pub fn join_router_groups(&self, if_index: u32) -> Result<(), SysError> {
        for group in self.router_groups() {
            self.transport.join_group(if_index, group)?;
        }
        Ok(())
    }

    /// Leaves the per-family router groups on the interface.
    pub fn leave_router_groups(&self, if_index: u32) -> Result<(), SysError> {
        for group in self.router_groups() {
            self.transport.leave_group(if_index, group)?;
        }
        Ok(())
    }

    fn router_groups(&self) -> &'static [McAddr] {
        match self.proto.family() {
            crate::AddrFamily::V4 => &[McAddr::ALL_ROUTERS_V4, McAddr::IGMPV3_ROUTERS],
            crate::AddrFamily::V6 => &[
                McAddr::ALL_ROUTERS_V6_LINK,
                McAddr::ALL_ROUTERS_V6_SITE,
                McAddr::MLDV2_ROUTERS,
            ],
        }
    }

    /// Builds and sends one query in the instance's protocol version.
    fn send_query(
        &self,
        if_index: u32,
        tv: &TimersValues,
        gaddr: &McAddr,
        max_resp: Duration,
        s_flag: bool,
        sources: &[McAddr],
    ) -> Result<(), SysError> {
        let dst = if gaddr.is_unspecified() {
            match self.proto.family() {
                crate::AddrFamily::V4 => McAddr::ALL_SYSTEMS_V4,
                crate::AddrFamily::V6 => McAddr::ALL_NODES_V6,
            }
        } else {
            *gaddr
        };

        match self.proto {
            GroupMemProtocol::IgmpV3 => {
                let query = IgmpV3Query {
                    max_resp_code: query_code::max_resp_igmpv3_encode(max_resp),
                    group: v4_octets(gaddr),
                    s_flag,
                    qrv: tv.robustness_variable().min(7) as u8,
                    qqic: query_code::qqic_encode(tv.query_interval().as_secs() as u32),
                    sources: sources.iter().map(v4_octets).collect(),
                };
                self.transport.send(if_index, &dst, &query.to_bytes())
            }
            GroupMemProtocol::IgmpV2 | GroupMemProtocol::IgmpV1 => {
                let max_resp_code = if self.proto == GroupMemProtocol::IgmpV1 {
                    0 // v1 queries carry no response time
                } else {
                    (max_resp.as_millis() / 100).min(255) as u8
                };
                let msg = IgmpV2Message {
                    msg_type: IGMP_TYPE_QUERY,
                    max_resp_code,
                    group: v4_octets(gaddr),
                };
                self.transport.send(if_index, &dst, &msg.to_bytes())
            }
            GroupMemProtocol::MldV2 => {
                let query = MldV2Query {
                    max_resp_code: query_code::max_resp_mldv2_encode(max_resp),
                    group: v6_octets(gaddr),
                    s_flag,
                    qrv: tv.robustness_variable().min(7) as u8,
                    qqic: query_code::qqic_encode(tv.query_interval().as_secs() as u32),
                    sources: sources.iter().map(v6_octets).collect(),
                };
                self.transport.send(if_index, &dst, &query.to_bytes())
            }
            GroupMemProtocol::MldV1 => {
                let msg = MldV1Message {
                    msg_type: MLD_TYPE_QUERY,
                    max_resp_delay: max_resp.as_millis().min(65535) as u16,
                    group: v6_octets(gaddr),
                };
                self.transport.send(if_index, &dst, &msg.to_bytes())
            }
        }
    }
}

fn record_type_for(filter_mode: McFilter) -> RecordType {
    match filter_mode {
        McFilter::Include => RecordType::ChangeToInclude,
        McFilter::Exclude => RecordType::ChangeToExclude,
    }
}

fn v4_octets(addr: &McAddr) -> [u8; 4] {
    match addr {
        McAddr::V4(b) => *b,
        McAddr::V6(_) => [0; 4],
    }
}

fn v6_octets(addr: &McAddr) -> [u8; 16] {
    match addr {
        McAddr::V6(b) => *b,
        McAddr::V4(_) => [0; 16],
    }
}

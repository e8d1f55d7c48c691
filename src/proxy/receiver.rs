use crate::proxy::{GroupRecordMsg, Mailbox, ProxyMsg, SourceList};
use crate::sys::{InterfaceMap, MrouteSocket};
use crate::wire::{
    CacheMiss, IgmpV3ReportSlice, Ipv4HeaderSlice, MldV1Message, MldV2ReportSlice, RecordType,
    IGMPMSG_NOCACHE, IGMP_TYPE_LEAVE, IGMP_TYPE_QUERY, IGMP_TYPE_V1_REPORT, IGMP_TYPE_V2_REPORT,
    IGMP_TYPE_V3_REPORT, MLD_TYPE_QUERY, MLD_TYPE_V1_DONE, MLD_TYPE_V1_REPORT, MLD_TYPE_V2_REPORT,
    MRT6MSG_NOCACHE,
};
use crate::{err::PacketError, AddrFamily, GroupMemProtocol};

use log::{debug, trace, warn};

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Decodes one packet from the IPv4 mroute socket into proxy
/// messages: kernel cache misses become `NewSource`, membership
/// reports one `GroupRecord` per contained record.
///
/// `pktinfo_if` is the arrival interface from the `IP_PKTINFO`
/// ancillary data; `vif_to_if` translates the virtual interface of a
/// kernel upcall.
pub fn decode_ipv4_packet(
    buf: &[u8],
    pktinfo_if: Option<u32>,
    vif_to_if: &dyn Fn(u16) -> Option<u32>,
) -> Result<Vec<ProxyMsg>, PacketError> {
    let header = Ipv4HeaderSlice::from_slice(buf)?;

    // upcalls from the kernel carry a zeroed protocol field
    if header.protocol() == 0 {
        let miss = CacheMiss::from_igmpmsg(buf)?;
        if miss.msg_type != IGMPMSG_NOCACHE {
            debug!("ignoring kernel upcall type {}", miss.msg_type);
            return Ok(Vec::new());
        }
        let Some(if_index) = vif_to_if(miss.vif) else {
            debug!("cache miss on unknown vif {}", miss.vif);
            return Ok(Vec::new());
        };
        return Ok(vec![ProxyMsg::NewSource {
            if_index,
            gaddr: miss.group,
            saddr: miss.source,
        }]);
    }

    if header.protocol() != libc::IPPROTO_IGMP as u8 {
        trace!("ignoring IP protocol {}", header.protocol());
        return Ok(Vec::new());
    }

    let Some(if_index) = pktinfo_if else {
        debug!("IGMP packet without packet info, dropped");
        return Ok(Vec::new());
    };
    let payload = header.payload();
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    match payload[0] {
        IGMP_TYPE_V3_REPORT => {
            let report = IgmpV3ReportSlice::from_slice(payload)?;
            Ok(report
                .records()?
                .into_iter()
                .map(|record| {
                    ProxyMsg::GroupRecord(GroupRecordMsg {
                        if_index,
                        record_type: record.record_type,
                        gaddr: record.group,
                        sources: record.sources.into_iter().collect(),
                        report_version: GroupMemProtocol::IgmpV3,
                    })
                })
                .collect())
        }
        IGMP_TYPE_V2_REPORT | IGMP_TYPE_V1_REPORT => {
            let msg = crate::wire::IgmpV2Message::from_slice(payload)?;
            let report_version = if payload[0] == IGMP_TYPE_V2_REPORT {
                GroupMemProtocol::IgmpV2
            } else {
                GroupMemProtocol::IgmpV1
            };
            Ok(vec![ProxyMsg::GroupRecord(GroupRecordMsg {
                if_index,
                record_type: RecordType::ModeIsExclude,
                gaddr: msg.group_addr(),
                sources: SourceList::new(),
                report_version,
            })])
        }
        IGMP_TYPE_LEAVE => {
            let msg = crate::wire::IgmpV2Message::from_slice(payload)?;
            Ok(vec![ProxyMsg::GroupRecord(GroupRecordMsg {
                if_index,
                record_type: RecordType::ChangeToInclude,
                gaddr: msg.group_addr(),
                sources: SourceList::new(),
                report_version: GroupMemProtocol::IgmpV2,
            })])
        }
        IGMP_TYPE_QUERY => Ok(vec![ProxyMsg::QueryReceived { if_index }]),
        other => Err(PacketError::UnknownMessageType {
            layer: crate::err::Layer::IgmpMessage,
            msg_type: other,
        }),
    }
}

/// Decodes one packet from the IPv6 mroute socket (the raw ICMPv6
/// socket only delivers MLD and kernel upcalls).
pub fn decode_ipv6_packet(
    buf: &[u8],
    pktinfo_if: Option<u32>,
    mif_to_if: &dyn Fn(u16) -> Option<u32>,
) -> Result<Vec<ProxyMsg>, PacketError> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }

    // an mrt6msg starts with a zeroed im6_mbz where an ICMPv6 message
    // carries its type
    if buf[0] == 0 {
        let miss = CacheMiss::from_mrt6msg(buf)?;
        if miss.msg_type != MRT6MSG_NOCACHE {
            debug!("ignoring kernel upcall type {}", miss.msg_type);
            return Ok(Vec::new());
        }
        let Some(if_index) = mif_to_if(miss.vif) else {
            debug!("cache miss on unknown mif {}", miss.vif);
            return Ok(Vec::new());
        };
        return Ok(vec![ProxyMsg::NewSource {
            if_index,
            gaddr: miss.group,
            saddr: miss.source,
        }]);
    }

    let Some(if_index) = pktinfo_if else {
        debug!("MLD packet without packet info, dropped");
        return Ok(Vec::new());
    };

    match buf[0] {
        MLD_TYPE_V1_REPORT | MLD_TYPE_V1_DONE => {
            let msg = MldV1Message::from_slice(buf)?;
            let record_type = if buf[0] == MLD_TYPE_V1_REPORT {
                RecordType::ModeIsExclude
            } else {
                RecordType::ChangeToInclude
            };
            Ok(vec![ProxyMsg::GroupRecord(GroupRecordMsg {
                if_index,
                record_type,
                gaddr: msg.group_addr(),
                sources: SourceList::new(),
                report_version: GroupMemProtocol::MldV1,
            })])
        }
        MLD_TYPE_V2_REPORT => {
            let report = MldV2ReportSlice::from_slice(buf)?;
            Ok(report
                .records()?
                .into_iter()
                .map(|record| {
                    ProxyMsg::GroupRecord(GroupRecordMsg {
                        if_index,
                        record_type: record.record_type,
                        gaddr: record.group,
                        sources: record.sources.into_iter().collect(),
                        report_version: GroupMemProtocol::MldV2,
                    })
                })
                .collect())
        }
        MLD_TYPE_QUERY => Ok(vec![ProxyMsg::QueryReceived { if_index }]),
        other => {
            trace!("ignoring ICMPv6 type {}", other);
            Ok(Vec::new())
        }
    }
}

/// The receive thread of one proxy instance: blocks on the mroute
/// socket with a short timeout, decodes packets and publishes the
/// events of registered interfaces into the instance mailbox.
pub struct Receiver {
    running: Arc<AtomicBool>,
    relevant: Arc<Mutex<BTreeSet<u32>>>,
    dropped: Arc<AtomicU64>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Receiver {
    pub fn spawn(
        family: AddrFamily,
        sock: Arc<MrouteSocket>,
        mailbox: Mailbox,
        ifmap: Arc<Mutex<InterfaceMap>>,
    ) -> Receiver {
        let running = Arc::new(AtomicBool::new(true));
        let relevant = Arc::new(Mutex::new(BTreeSet::new()));
        let dropped = Arc::new(AtomicU64::new(0));

        let thread = {
            let running = running.clone();
            let relevant = relevant.clone();
            let dropped = dropped.clone();
            thread::Builder::new()
                .name("receiver".to_string())
                .spawn(move || {
                    let mut buf = vec![0u8; 65536];
                    while running.load(Ordering::SeqCst) {
                        let (len, pktinfo_if) = match sock.recv_with_pktinfo(&mut buf) {
                            Ok(Some(received)) => received,
                            Ok(None) => continue, // timeout, re-check running
                            Err(err) => {
                                warn!("receive failed: {}", err);
                                continue;
                            }
                        };

                        let vif_to_if = |vif: u16| -> Option<u32> {
                            ifmap.lock().unwrap().if_index_of_vif(vif)
                        };
                        let decoded = match family {
                            AddrFamily::V4 => {
                                decode_ipv4_packet(&buf[..len], pktinfo_if, &vif_to_if)
                            }
                            AddrFamily::V6 => {
                                decode_ipv6_packet(&buf[..len], pktinfo_if, &vif_to_if)
                            }
                        };
                        let msgs = match decoded {
                            Ok(msgs) => msgs,
                            Err(err) => {
                                dropped.fetch_add(1, Ordering::Relaxed);
                                debug!("dropped a malformed packet: {}", err);
                                continue;
                            }
                        };

                        let relevant = relevant.lock().unwrap().clone();
                        for msg in msgs {
                            let if_index = match &msg {
                                ProxyMsg::NewSource { if_index, .. } => *if_index,
                                ProxyMsg::GroupRecord(gr) => gr.if_index,
                                ProxyMsg::QueryReceived { if_index } => *if_index,
                                _ => continue,
                            };
                            if relevant.contains(&if_index) {
                                // a full mailbox blocks here; that is
                                // the intended backpressure
                                mailbox.send(msg);
                            }
                        }
                    }
                })
                .expect("failed to spawn the receiver thread")
        };

        Receiver {
            running,
            relevant,
            dropped,
            thread: Some(thread),
        }
    }

    /// Packets are only dispatched for registered interfaces.
    pub fn register_interface(&self, if_index: u32) {
        self.relevant.lock().unwrap().insert(if_index);
    }

    pub fn deregister_interface(&self, if_index: u32) {
        self.relevant.lock().unwrap().remove(&if_index);
    }

    /// Count of malformed packets dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::{GroupRecord, IgmpV2Message};
    use crate::McAddr;
    use assert_matches::assert_matches;

    fn wrap_ipv4(protocol: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 20];
        buf[0] = 0x45;
        let total = (20 + payload.len()) as u16;
        buf[2..4].copy_from_slice(&total.to_be_bytes());
        buf[9] = protocol;
        buf[12..16].copy_from_slice(&[192, 168, 0, 2]);
        buf[16..20].copy_from_slice(&[224, 0, 0, 22]);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn v3_report_produces_one_msg_per_record() {
        let records = vec![
            GroupRecord {
                record_type: RecordType::AllowNewSources,
                group: "239.0.0.1".parse().unwrap(),
                sources: vec!["1.1.1.1".parse().unwrap(), "2.2.2.2".parse().unwrap()],
            },
            GroupRecord {
                record_type: RecordType::ChangeToInclude,
                group: "239.0.0.2".parse().unwrap(),
                sources: Vec::new(),
            },
        ];
        let buf = wrap_ipv4(2, &IgmpV3ReportSlice::build(&records));
        let msgs = decode_ipv4_packet(&buf, Some(5), &|_| None).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_matches!(
            &msgs[0],
            ProxyMsg::GroupRecord(gr)
                if gr.if_index == 5
                    && gr.record_type == RecordType::AllowNewSources
                    && gr.sources.len() == 2
                    && gr.report_version == GroupMemProtocol::IgmpV3
        );
    }

    #[test]
    fn v2_report_and_leave() {
        let report = IgmpV2Message {
            msg_type: IGMP_TYPE_V2_REPORT,
            max_resp_code: 0,
            group: [239, 0, 0, 3],
        };
        let buf = wrap_ipv4(2, &report.to_bytes());
        let msgs = decode_ipv4_packet(&buf, Some(1), &|_| None).unwrap();
        assert_matches!(
            &msgs[0],
            ProxyMsg::GroupRecord(gr)
                if gr.record_type == RecordType::ModeIsExclude
                    && gr.report_version == GroupMemProtocol::IgmpV2
        );

        let leave = IgmpV2Message {
            msg_type: IGMP_TYPE_LEAVE,
            max_resp_code: 0,
            group: [239, 0, 0, 3],
        };
        let buf = wrap_ipv4(2, &leave.to_bytes());
        let msgs = decode_ipv4_packet(&buf, Some(1), &|_| None).unwrap();
        assert_matches!(
            &msgs[0],
            ProxyMsg::GroupRecord(gr) if gr.record_type == RecordType::ChangeToInclude
        );
    }

    #[test]
    fn cache_miss_upcall() {
        let mut buf = vec![0u8; 20];
        buf[0] = 0x45;
        buf[2..4].copy_from_slice(&20u16.to_be_bytes());
        // protocol stays 0: kernel upcall
        buf[8] = IGMPMSG_NOCACHE;
        buf[10] = 3; // vif
        buf[12..16].copy_from_slice(&[10, 0, 0, 1]);
        buf[16..20].copy_from_slice(&[239, 0, 0, 4]);

        let msgs = decode_ipv4_packet(&buf, None, &|vif| {
            (vif == 3).then_some(42)
        })
        .unwrap();
        assert_matches!(
            &msgs[0],
            ProxyMsg::NewSource { if_index: 42, gaddr, saddr }
                if gaddr == &"239.0.0.4".parse::<McAddr>().unwrap()
                    && saddr == &"10.0.0.1".parse::<McAddr>().unwrap()
        );

        // unknown vif: dropped
        let msgs = decode_ipv4_packet(&buf, None, &|_| None).unwrap();
        assert!(msgs.is_empty());
    }

    #[test]
    fn query_is_surfaced() {
        let query = IgmpV2Message {
            msg_type: IGMP_TYPE_QUERY,
            max_resp_code: 100,
            group: [0; 4],
        };
        let buf = wrap_ipv4(2, &query.to_bytes());
        let msgs = decode_ipv4_packet(&buf, Some(1), &|_| None).unwrap();
        assert_matches!(&msgs[0], ProxyMsg::QueryReceived { if_index: 1 });
    }

    #[test]
    fn unknown_igmp_type_is_an_error() {
        let buf = wrap_ipv4(2, &[0x99, 0, 0, 0, 0, 0, 0, 0]);
        assert_matches!(
            decode_ipv4_packet(&buf, Some(1), &|_| None),
            Err(PacketError::UnknownMessageType { msg_type: 0x99, .. })
        );
    }

    #[test]
    fn mld_report_decoding() {
        let records = vec![GroupRecord {
            record_type: RecordType::ModeIsExclude,
            group: "ff15::1".parse().unwrap(),
            sources: vec!["2001:db8::1".parse().unwrap()],
        }];
        let buf = MldV2ReportSlice::build(&records);
        let msgs = decode_ipv6_packet(&buf, Some(9), &|_| None).unwrap();
        assert_matches!(
            &msgs[0],
            ProxyMsg::GroupRecord(gr)
                if gr.if_index == 9 && gr.report_version == GroupMemProtocol::MldV2
        );

        let done = MldV1Message {
            msg_type: MLD_TYPE_V1_DONE,
            max_resp_delay: 0,
            group: {
                let g: McAddr = "ff15::1".parse().unwrap();
                let mut b = [0u8; 16];
                b.copy_from_slice(g.octets());
                b
            },
        };
        let msgs = decode_ipv6_packet(&done.to_bytes(), Some(9), &|_| None).unwrap();
        assert_matches!(
            &msgs[0],
            ProxyMsg::GroupRecord(gr)
                if gr.record_type == RecordType::ChangeToInclude
                    && gr.report_version == GroupMemProtocol::MldV1
        );
    }

    #[test]
    fn mrt6_cache_miss() {
        let mut buf = vec![0u8; 40];
        buf[1] = MRT6MSG_NOCACHE;
        buf[2..4].copy_from_slice(&1u16.to_ne_bytes());
        buf[8] = 0x20; // source 2000::...
        buf[24] = 0xFF;
        buf[25] = 0x15;

        let msgs = decode_ipv6_packet(&buf, None, &|mif| (mif == 1).then_some(7)).unwrap();
        assert_matches!(&msgs[0], ProxyMsg::NewSource { if_index: 7, .. });
    }
}

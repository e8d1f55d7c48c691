use crate::err::SysError;
use crate::sys::{Mfib, PacketSend};
use crate::{AddrFamily, McAddr};

use log::{debug, trace};

use std::os::unix::io::RawFd;
use std::process::Command;
use std::time::Duration;

// linux/mroute.h
const MRT_INIT: libc::c_int = 200;
const MRT_DONE: libc::c_int = 201;
const MRT_ADD_VIF: libc::c_int = 202;
const MRT_DEL_VIF: libc::c_int = 203;
const MRT_ADD_MFC: libc::c_int = 204;
const MRT_DEL_MFC: libc::c_int = 205;
const MRT_TABLE: libc::c_int = 209;
const VIFF_USE_IFINDEX: u8 = 0x8;

// linux/mroute6.h (same numeric values, IPPROTO_IPV6 level)
const MRT6_INIT: libc::c_int = 200;
const MRT6_DONE: libc::c_int = 201;
const MRT6_ADD_MIF: libc::c_int = 202;
const MRT6_DEL_MIF: libc::c_int = 203;
const MRT6_ADD_MFC: libc::c_int = 204;
const MRT6_DEL_MFC: libc::c_int = 205;
const MRT6_TABLE: libc::c_int = 209;

// SIOCPROTOPRIVATE-based ioctls of the mroute sockets
const SIOCGETVIFCNT: libc::c_ulong = 0x89E0;
const SIOCGETSGCNT: libc::c_ulong = 0x89E1;

// socket options libc does not re-export (linux/in.h, linux/in6.h)
const IP_OPTIONS: libc::c_int = 4;
const IP_ROUTER_ALERT: libc::c_int = 5;
const IPV6_CHECKSUM: libc::c_int = 7;
const IPV6_RECVHOPOPTS: libc::c_int = 53;
const IPV6_HOPOPTS: libc::c_int = 54;

const IPV6_CHECKSUM_OFFSET_ICMP6: libc::c_int = 2;

/// Router alert IPv4 option (RFC 2113) put on transmitted queries.
const IPV4_ROUTER_ALERT_OPT: [u8; 4] = [0x94, 0x04, 0x00, 0x00];

/// Sticky hop-by-hop extension header carrying the router alert
/// option for transmitted MLD messages (RFC 2711).
const IPV6_ROUTER_ALERT_HBH: [u8; 8] = [0x00, 0x00, 0x05, 0x02, 0x00, 0x00, 0x01, 0x00];

#[repr(C)]
struct Vifctl {
    vifc_vifi: u16,
    vifc_flags: u8,
    vifc_threshold: u8,
    vifc_rate_limit: u32,
    vifc_lcl_ifindex: i32, // union with vifc_lcl_addr, selected by VIFF_USE_IFINDEX
    vifc_rmt_addr: [u8; 4],
}

#[repr(C)]
struct Mif6ctl {
    mif6c_mifi: u16,
    mif6c_flags: u8,
    vifc_threshold: u8,
    mif6c_pifi: u16,
    vifc_rate_limit: u32,
}

#[repr(C)]
struct Mfcctl {
    mfcc_origin: [u8; 4],
    mfcc_mcastgrp: [u8; 4],
    mfcc_parent: u16,
    mfcc_ttls: [u8; 32],
    mfcc_pkt_cnt: u32,
    mfcc_byte_cnt: u32,
    mfcc_wrong_if: u32,
    mfcc_expire: i32,
}

#[repr(C)]
struct Mf6cctl {
    mf6cc_origin: libc::sockaddr_in6,
    mf6cc_mcastgrp: libc::sockaddr_in6,
    mf6cc_parent: u16,
    mf6cc_ifset: [u32; 8],
}

#[repr(C)]
struct SiocSgReq {
    src: [u8; 4],
    grp: [u8; 4],
    pktcnt: libc::c_ulong,
    bytecnt: libc::c_ulong,
    wrong_if: libc::c_ulong,
}

#[repr(C)]
struct SiocSgReq6 {
    src: libc::sockaddr_in6,
    grp: libc::sockaddr_in6,
    pktcnt: libc::c_ulong,
    bytecnt: libc::c_ulong,
    wrong_if: libc::c_ulong,
}

#[repr(C)]
struct SiocVifReq {
    vifi: u16,
    icount: libc::c_ulong,
    ocount: libc::c_ulong,
    ibytes: libc::c_ulong,
    obytes: libc::c_ulong,
}

/// Per-VIF traffic counters.
#[derive(Copy, Clone, Debug, Default)]
pub struct VifStats {
    pub in_packets: u64,
    pub out_packets: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
}

/// The raw IGMP/ICMPv6 socket that doubles as the control channel of
/// the kernel multicast forwarding cache: query/report transmission,
/// kernel upcall reception, VIF/MIF registration and MFC programming.
///
/// One socket exists per proxy instance; with multiple instances each
/// claims its own kernel routing table (`MRT_TABLE` before
/// `MRT_INIT`).
pub struct MrouteSocket {
    fd: RawFd,
    family: AddrFamily,
}

fn check(rc: libc::c_int, context: &'static str) -> Result<(), SysError> {
    if rc < 0 {
        Err(SysError::last(context))
    } else {
        Ok(())
    }
}

impl MrouteSocket {
    /// Opens the raw IGMP socket with packet info, router alert and
    /// multicast loop disabled.
    pub fn open_ipv4() -> Result<MrouteSocket, SysError> {
        // SAFETY: plain socket syscall
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_IGMP) };
        if fd < 0 {
            return Err(SysError::last("socket(AF_INET, SOCK_RAW, IPPROTO_IGMP)"));
        }
        let sock = MrouteSocket {
            fd,
            family: AddrFamily::V4,
        };
        sock.set_opt(libc::IPPROTO_IP, libc::IP_HDRINCL, &0i32, "IP_HDRINCL")?;
        sock.set_opt(libc::IPPROTO_IP, libc::IP_PKTINFO, &1i32, "IP_PKTINFO")?;
        sock.set_opt(
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_LOOP,
            &0i32,
            "IP_MULTICAST_LOOP",
        )?;
        sock.set_ipv4_router_alert_recv(true)?;
        sock.set_opt_bytes(
            libc::IPPROTO_IP,
            IP_OPTIONS,
            &IPV4_ROUTER_ALERT_OPT,
            "IP_OPTIONS",
        )?;
        Ok(sock)
    }

    /// Opens the raw ICMPv6 socket with kernel checksumming, packet
    /// info and the sticky router-alert hop-by-hop header.
    pub fn open_ipv6() -> Result<MrouteSocket, SysError> {
        // SAFETY: plain socket syscall
        let fd = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_RAW, libc::IPPROTO_ICMPV6) };
        if fd < 0 {
            return Err(SysError::last("socket(AF_INET6, SOCK_RAW, IPPROTO_ICMPV6)"));
        }
        let sock = MrouteSocket {
            fd,
            family: AddrFamily::V6,
        };
        sock.set_icmp6_checksum_calc(true)?;
        sock.set_ipv6_recv_pktinfo()?;
        sock.set_ipv6_recv_icmpv6()?;
        sock.set_ipv6_recv_hbh()?;
        sock.set_opt(
            libc::IPPROTO_IPV6,
            libc::IPV6_MULTICAST_LOOP,
            &0i32,
            "IPV6_MULTICAST_LOOP",
        )?;
        sock.set_opt_bytes(
            libc::IPPROTO_IPV6,
            IPV6_HOPOPTS,
            &IPV6_ROUTER_ALERT_HBH,
            "IPV6_HOPOPTS",
        )?;
        Ok(sock)
    }

    pub fn family(&self) -> AddrFamily {
        self.family
    }

    fn set_opt<T>(
        &self,
        level: libc::c_int,
        name: libc::c_int,
        value: &T,
        context: &'static str,
    ) -> Result<(), SysError> {
        // SAFETY: value points at a live T of the advertised size
        check(
            unsafe {
                libc::setsockopt(
                    self.fd,
                    level,
                    name,
                    value as *const T as *const libc::c_void,
                    std::mem::size_of::<T>() as libc::socklen_t,
                )
            },
            context,
        )
    }

    fn set_opt_bytes(
        &self,
        level: libc::c_int,
        name: libc::c_int,
        value: &[u8],
        context: &'static str,
    ) -> Result<(), SysError> {
        // SAFETY: value is a live byte slice
        check(
            unsafe {
                libc::setsockopt(
                    self.fd,
                    level,
                    name,
                    value.as_ptr() as *const libc::c_void,
                    value.len() as libc::socklen_t,
                )
            },
            context,
        )
    }

    /// Selects the kernel routing table; must precede
    /// [`MrouteSocket::set_mrt`].
    pub fn set_table(&self, table: u32) -> Result<(), SysError> {
        let table = table as libc::c_int;
        match self.family {
            AddrFamily::V4 => self.set_opt(libc::IPPROTO_IP, MRT_TABLE, &table, "MRT_TABLE"),
            AddrFamily::V6 => self.set_opt(libc::IPPROTO_IPV6, MRT6_TABLE, &table, "MRT6_TABLE"),
        }
    }

    /// Claims (or releases) the multicast-router flag of the routing
    /// table. Only one socket per table can hold it.
    pub fn set_mrt(&self, enable: bool) -> Result<(), SysError> {
        let one = 1 as libc::c_int;
        match (self.family, enable) {
            (AddrFamily::V4, true) => self.set_opt(libc::IPPROTO_IP, MRT_INIT, &one, "MRT_INIT"),
            (AddrFamily::V4, false) => self.set_opt(libc::IPPROTO_IP, MRT_DONE, &one, "MRT_DONE"),
            (AddrFamily::V6, true) => {
                self.set_opt(libc::IPPROTO_IPV6, MRT6_INIT, &one, "MRT6_INIT")
            }
            (AddrFamily::V6, false) => {
                self.set_opt(libc::IPPROTO_IPV6, MRT6_DONE, &one, "MRT6_DONE")
            }
        }
    }

    /// Accepts packets carrying the IPv4 router alert option.
    pub fn set_ipv4_router_alert_recv(&self, enable: bool) -> Result<(), SysError> {
        let value = libc::c_int::from(enable);
        self.set_opt(
            libc::IPPROTO_IP,
            IP_ROUTER_ALERT,
            &value,
            "IP_ROUTER_ALERT",
        )
    }

    /// Lets the kernel fill the ICMPv6 checksum of transmitted
    /// messages (offset 2 in the ICMPv6 header).
    pub fn set_icmp6_checksum_calc(&self, enable: bool) -> Result<(), SysError> {
        let offset = if enable { IPV6_CHECKSUM_OFFSET_ICMP6 } else { -1 };
        self.set_opt(libc::SOL_RAW, IPV6_CHECKSUM, &offset, "IPV6_CHECKSUM")
    }

    pub fn set_ipv6_recv_pktinfo(&self) -> Result<(), SysError> {
        self.set_opt(
            libc::IPPROTO_IPV6,
            libc::IPV6_RECVPKTINFO,
            &1i32,
            "IPV6_RECVPKTINFO",
        )
    }

    pub fn set_ipv6_recv_icmpv6(&self) -> Result<(), SysError> {
        // no ICMPv6 type filter: MLD and the kernel upcalls share the
        // socket
        Ok(())
    }

    pub fn set_ipv6_recv_hbh(&self) -> Result<(), SysError> {
        self.set_opt(
            libc::IPPROTO_IPV6,
            IPV6_RECVHOPOPTS,
            &1i32,
            "IPV6_RECVHOPOPTS",
        )
    }

    /// Bounds `recvmsg` blocking so the receive thread can observe
    /// shutdown.
    pub fn set_receive_timeout(&self, timeout: Duration) -> Result<(), SysError> {
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        self.set_opt(libc::SOL_SOCKET, libc::SO_RCVTIMEO, &tv, "SO_RCVTIMEO")
    }

    /// Routes multicast transmissions out of the given interface.
    pub fn choose_if(&self, if_index: u32) -> Result<(), SysError> {
        match self.family {
            AddrFamily::V4 => {
                let mreqn = libc::ip_mreqn {
                    imr_multiaddr: libc::in_addr { s_addr: 0 },
                    imr_address: libc::in_addr { s_addr: 0 },
                    imr_ifindex: if_index as libc::c_int,
                };
                self.set_opt(
                    libc::IPPROTO_IP,
                    libc::IP_MULTICAST_IF,
                    &mreqn,
                    "IP_MULTICAST_IF",
                )
            }
            AddrFamily::V6 => {
                let idx = if_index as libc::c_int;
                self.set_opt(
                    libc::IPPROTO_IPV6,
                    libc::IPV6_MULTICAST_IF,
                    &idx,
                    "IPV6_MULTICAST_IF",
                )
            }
        }
    }

    /// Binds a physical interface to a non-default multicast routing
    /// table by installing the matching policy rules (`ip mrule`).
    pub fn bind_iface_to_table(&self, if_name: &str, table: u32) -> Result<(), SysError> {
        self.mrule("add", if_name, table)
    }

    /// Removes the policy rules installed by
    /// [`MrouteSocket::bind_iface_to_table`].
    pub fn unbind_iface_from_table(&self, if_name: &str) -> Result<(), SysError> {
        // table is part of the rule key only on add
        self.mrule("del", if_name, 0)
    }

    fn mrule(&self, op: &str, if_name: &str, table: u32) -> Result<(), SysError> {
        for dir in ["iif", "oif"] {
            let mut cmd = Command::new("ip");
            if self.family == AddrFamily::V6 {
                cmd.arg("-6");
            }
            cmd.args(["mrule", op, dir, if_name]);
            if op == "add" {
                cmd.args(["lookup", &table.to_string()]);
            }
            trace!("running {:?}", cmd);
            let status = cmd
                .status()
                .map_err(|err| SysError::new("ip mrule", err))?;
            if !status.success() {
                return Err(SysError::new(
                    "ip mrule",
                    std::io::Error::new(std::io::ErrorKind::Other, format!("exit {}", status)),
                ));
            }
        }
        Ok(())
    }

    /// Reads the traffic counters of a virtual interface.
    pub fn vif_stats(&self, vif: u16) -> Result<VifStats, SysError> {
        let mut req = SiocVifReq {
            vifi: vif,
            icount: 0,
            ocount: 0,
            ibytes: 0,
            obytes: 0,
        };
        // SAFETY: req is a live struct of the layout the ioctl expects
        check(
            unsafe { libc::ioctl(self.fd, SIOCGETVIFCNT, &mut req) },
            "SIOCGETVIFCNT",
        )?;
        Ok(VifStats {
            in_packets: req.icount as u64,
            out_packets: req.ocount as u64,
            in_bytes: req.ibytes as u64,
            out_bytes: req.obytes as u64,
        })
    }

    /// Receives one packet; `None` on timeout. The second element is
    /// the arrival interface from the packet-info ancillary data.
    pub fn recv_with_pktinfo(&self, buf: &mut [u8]) -> Result<Option<(usize, Option<u32>)>, SysError> {
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };
        let mut control = [0u8; 128];
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = control.len();

        // SAFETY: msg points at live buffers for the duration of the call
        let received = unsafe { libc::recvmsg(self.fd, &mut msg, 0) };
        if received < 0 {
            let err = std::io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(None),
                _ => Err(SysError::new("recvmsg", err)),
            };
        }

        let mut pktinfo_if = None;
        // SAFETY: cmsg traversal over the control buffer recvmsg filled
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                let hdr = &*cmsg;
                if hdr.cmsg_level == libc::IPPROTO_IP && hdr.cmsg_type == libc::IP_PKTINFO {
                    let info = &*(libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo);
                    pktinfo_if = Some(info.ipi_ifindex as u32);
                } else if hdr.cmsg_level == libc::IPPROTO_IPV6
                    && hdr.cmsg_type == libc::IPV6_PKTINFO
                {
                    let info = &*(libc::CMSG_DATA(cmsg) as *const libc::in6_pktinfo);
                    pktinfo_if = Some(info.ipi6_ifindex);
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }

        Ok(Some((received as usize, pktinfo_if)))
    }

    fn sockaddr_v6(addr: &McAddr) -> libc::sockaddr_in6 {
        let mut sa: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
        sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
        if let McAddr::V6(bytes) = addr {
            sa.sin6_addr.s6_addr = *bytes;
        }
        sa
    }
}

impl PacketSend for MrouteSocket {
    fn send(&self, if_index: u32, dst: &McAddr, payload: &[u8]) -> Result<(), SysError> {
        self.choose_if(if_index)?;
        debug!("sending {} bytes to {} on if {}", payload.len(), dst, if_index);
        let sent = match dst {
            McAddr::V4(bytes) => {
                let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
                sa.sin_family = libc::AF_INET as libc::sa_family_t;
                sa.sin_addr.s_addr = u32::from_ne_bytes(*bytes);
                // SAFETY: payload and sa outlive the call
                unsafe {
                    libc::sendto(
                        self.fd,
                        payload.as_ptr() as *const libc::c_void,
                        payload.len(),
                        0,
                        &sa as *const libc::sockaddr_in as *const libc::sockaddr,
                        std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                    )
                }
            }
            McAddr::V6(_) => {
                let sa = MrouteSocket::sockaddr_v6(dst);
                // SAFETY: payload and sa outlive the call
                unsafe {
                    libc::sendto(
                        self.fd,
                        payload.as_ptr() as *const libc::c_void,
                        payload.len(),
                        0,
                        &sa as *const libc::sockaddr_in6 as *const libc::sockaddr,
                        std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                    )
                }
            }
        };
        if sent < 0 {
            Err(SysError::last("sendto"))
        } else {
            Ok(())
        }
    }

    fn join_group(&self, if_index: u32, group: &McAddr) -> Result<(), SysError> {
        match group {
            McAddr::V4(bytes) => {
                let mreqn = libc::ip_mreqn {
                    imr_multiaddr: libc::in_addr {
                        s_addr: u32::from_ne_bytes(*bytes),
                    },
                    imr_address: libc::in_addr { s_addr: 0 },
                    imr_ifindex: if_index as libc::c_int,
                };
                self.set_opt(
                    libc::IPPROTO_IP,
                    libc::IP_ADD_MEMBERSHIP,
                    &mreqn,
                    "IP_ADD_MEMBERSHIP",
                )
            }
            McAddr::V6(bytes) => {
                let mreq = libc::ipv6_mreq {
                    ipv6mr_multiaddr: libc::in6_addr { s6_addr: *bytes },
                    ipv6mr_interface: if_index,
                };
                self.set_opt(
                    libc::IPPROTO_IPV6,
                    libc::IPV6_ADD_MEMBERSHIP,
                    &mreq,
                    "IPV6_ADD_MEMBERSHIP",
                )
            }
        }
    }

    fn leave_group(&self, if_index: u32, group: &McAddr) -> Result<(), SysError> {
        match group {
            McAddr::V4(bytes) => {
                let mreqn = libc::ip_mreqn {
                    imr_multiaddr: libc::in_addr {
                        s_addr: u32::from_ne_bytes(*bytes),
                    },
                    imr_address: libc::in_addr { s_addr: 0 },
                    imr_ifindex: if_index as libc::c_int,
                };
                self.set_opt(
                    libc::IPPROTO_IP,
                    libc::IP_DROP_MEMBERSHIP,
                    &mreqn,
                    "IP_DROP_MEMBERSHIP",
                )
            }
            McAddr::V6(bytes) => {
                let mreq = libc::ipv6_mreq {
                    ipv6mr_multiaddr: libc::in6_addr { s6_addr: *bytes },
                    ipv6mr_interface: if_index,
                };
                self.set_opt(
                    libc::IPPROTO_IPV6,
                    libc::IPV6_DROP_MEMBERSHIP,
                    &mreq,
                    "IPV6_DROP_MEMBERSHIP",
                )
            }
        }
    }
}

impl Mfib for MrouteSocket {
    fn add_mroute(
        &self,
        input_vif: u16,
        saddr: &McAddr,
        gaddr: &McAddr,
        output_vifs: &[u16],
    ) -> Result<(), SysError> {
        match self.family {
            AddrFamily::V4 => {
                let mut mfc: Mfcctl = unsafe { std::mem::zeroed() };
                if let (McAddr::V4(src), McAddr::V4(grp)) = (saddr, gaddr) {
                    mfc.mfcc_origin = *src;
                    mfc.mfcc_mcastgrp = *grp;
                }
                mfc.mfcc_parent = input_vif;
                for vif in output_vifs {
                    if usize::from(*vif) < mfc.mfcc_ttls.len() {
                        mfc.mfcc_ttls[usize::from(*vif)] = 1;
                    }
                }
                self.set_opt(libc::IPPROTO_IP, MRT_ADD_MFC, &mfc, "MRT_ADD_MFC")
            }
            AddrFamily::V6 => {
                let mut mfc: Mf6cctl = unsafe { std::mem::zeroed() };
                mfc.mf6cc_origin = MrouteSocket::sockaddr_v6(saddr);
                mfc.mf6cc_mcastgrp = MrouteSocket::sockaddr_v6(gaddr);
                mfc.mf6cc_parent = input_vif;
                for vif in output_vifs {
                    let idx = usize::from(*vif);
                    if idx < 256 {
                        mfc.mf6cc_ifset[idx / 32] |= 1 << (idx % 32);
                    }
                }
                self.set_opt(libc::IPPROTO_IPV6, MRT6_ADD_MFC, &mfc, "MRT6_ADD_MFC")
            }
        }
    }

    fn del_mroute(&self, input_vif: u16, saddr: &McAddr, gaddr: &McAddr) -> Result<(), SysError> {
        match self.family {
            AddrFamily::V4 => {
                let mut mfc: Mfcctl = unsafe { std::mem::zeroed() };
                if let (McAddr::V4(src), McAddr::V4(grp)) = (saddr, gaddr) {
                    mfc.mfcc_origin = *src;
                    mfc.mfcc_mcastgrp = *grp;
                }
                mfc.mfcc_parent = input_vif;
                self.set_opt(libc::IPPROTO_IP, MRT_DEL_MFC, &mfc, "MRT_DEL_MFC")
            }
            AddrFamily::V6 => {
                let mut mfc: Mf6cctl = unsafe { std::mem::zeroed() };
                mfc.mf6cc_origin = MrouteSocket::sockaddr_v6(saddr);
                mfc.mf6cc_mcastgrp = MrouteSocket::sockaddr_v6(gaddr);
                mfc.mf6cc_parent = input_vif;
                self.set_opt(libc::IPPROTO_IPV6, MRT6_DEL_MFC, &mfc, "MRT6_DEL_MFC")
            }
        }
    }

    fn mroute_packet_count(&self, saddr: &McAddr, gaddr: &McAddr) -> Result<u64, SysError> {
        match self.family {
            AddrFamily::V4 => {
                let mut req: SiocSgReq = unsafe { std::mem::zeroed() };
                if let (McAddr::V4(src), McAddr::V4(grp)) = (saddr, gaddr) {
                    req.src = *src;
                    req.grp = *grp;
                }
                // SAFETY: req matches the ioctl's expected layout
                check(
                    unsafe { libc::ioctl(self.fd, SIOCGETSGCNT, &mut req) },
                    "SIOCGETSGCNT",
                )?;
                Ok(req.pktcnt as u64)
            }
            AddrFamily::V6 => {
                let mut req: SiocSgReq6 = unsafe { std::mem::zeroed() };
                req.src = MrouteSocket::sockaddr_v6(saddr);
                req.grp = MrouteSocket::sockaddr_v6(gaddr);
                // SAFETY: req matches the ioctl's expected layout
                check(
                    unsafe { libc::ioctl(self.fd, SIOCGETSGCNT, &mut req) },
                    "SIOCGETSGCNT_IN6",
                )?;
                Ok(req.pktcnt as u64)
            }
        }
    }

    fn add_vif(&self, vif: u16, if_index: u32) -> Result<(), SysError> {
        match self.family {
            AddrFamily::V4 => {
                let vifc = Vifctl {
                    vifc_vifi: vif,
                    vifc_flags: VIFF_USE_IFINDEX,
                    vifc_threshold: 1,
                    vifc_rate_limit: 0,
                    vifc_lcl_ifindex: if_index as i32,
                    vifc_rmt_addr: [0; 4],
                };
                self.set_opt(libc::IPPROTO_IP, MRT_ADD_VIF, &vifc, "MRT_ADD_VIF")
            }
            AddrFamily::V6 => {
                let mifc = Mif6ctl {
                    mif6c_mifi: vif,
                    mif6c_flags: 0,
                    vifc_threshold: 1,
                    mif6c_pifi: if_index as u16,
                    vifc_rate_limit: 0,
                };
                self.set_opt(libc::IPPROTO_IPV6, MRT6_ADD_MIF, &mifc, "MRT6_ADD_MIF")
            }
        }
    }

    fn del_vif(&self, vif: u16) -> Result<(), SysError> {
        match self.family {
            AddrFamily::V4 => {
                let mut vifc: Vifctl = unsafe { std::mem::zeroed() };
                vifc.vifc_vifi = vif;
                self.set_opt(libc::IPPROTO_IP, MRT_DEL_VIF, &vifc, "MRT_DEL_VIF")
            }
            AddrFamily::V6 => {
                let mut mifc: Mif6ctl = unsafe { std::mem::zeroed() };
                mifc.mif6c_mifi = vif;
                self.set_opt(libc::IPPROTO_IPV6, MRT6_DEL_MIF, &mifc, "MRT6_DEL_MIF")
            }
        }
    }
}

impl Drop for MrouteSocket {
    fn drop(&mut self) {
        // SAFETY: fd is owned by this struct
        unsafe { libc::close(self.fd) };
    }
}

use crate::err::{Layer, LenError, PacketError};
use crate::McAddr;

/// Message type value of an IPv4 `igmpmsg` cache miss upcall
/// (`IGMPMSG_NOCACHE`).
pub const IGMPMSG_NOCACHE: u8 = 1;

/// Message type value of an IPv6 `mrt6msg` cache miss upcall
/// (`MRT6MSG_NOCACHE`).
pub const MRT6MSG_NOCACHE: u8 = 1;

/// Decoded kernel multicast upcall: the kernel saw a datagram from a
/// source it has no MFIB entry for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CacheMiss {
    /// Upcall message type (`IGMPMSG_NOCACHE` is the only one acted
    /// on; others are surfaced so the receiver can count them).
    pub msg_type: u8,
    /// Virtual interface the datagram arrived on.
    pub vif: u16,
    /// Source address of the datagram.
    pub source: McAddr,
    /// Destination group of the datagram.
    pub group: McAddr,
}

impl CacheMiss {
    /// Length of a `struct igmpmsg` (overlays an IPv4 header).
    pub const V4_LEN: usize = 20;

    /// Length of a `struct mrt6msg`.
    pub const V6_LEN: usize = 40;

    /// Decodes a `struct igmpmsg` as delivered on the IPv4 mroute
    /// socket. The caller has already recognized the upcall by the
    /// zeroed protocol field of the pseudo IP header.
    pub fn from_igmpmsg(slice: &[u8]) -> Result<CacheMiss, PacketError> {
        if slice.len() < CacheMiss::V4_LEN {
            return Err(LenError {
                required_len: CacheMiss::V4_LEN,
                len: slice.len(),
                layer: Layer::CacheMiss,
            }
            .into());
        }
        Ok(CacheMiss {
            msg_type: slice[8],
            vif: u16::from(slice[10]),
            source: McAddr::V4([slice[12], slice[13], slice[14], slice[15]]),
            group: McAddr::V4([slice[16], slice[17], slice[18], slice[19]]),
        })
    }

    /// Decodes a `struct mrt6msg` as delivered on the IPv6 mroute
    /// socket. The caller has already recognized the upcall by the
    /// zeroed first byte (an ICMPv6 message would carry a type).
    pub fn from_mrt6msg(slice: &[u8]) -> Result<CacheMiss, PacketError> {
        if slice.len() < CacheMiss::V6_LEN {
            return Err(LenError {
                required_len: CacheMiss::V6_LEN,
                len: slice.len(),
                layer: Layer::CacheMiss,
            }
            .into());
        }
        let mut source = [0u8; 16];
        source.copy_from_slice(&slice[8..24]);
        let mut group = [0u8; 16];
        group.copy_from_slice(&slice[24..40]);
        Ok(CacheMiss {
            msg_type: slice[1],
            // im6_mif is a host-order u16 written by the local kernel
            vif: u16::from_ne_bytes([slice[2], slice[3]]),
            source: McAddr::V6(source),
            group: McAddr::V6(group),
        })
    }
}

use crate::err::{Layer, LenError, PacketError};
use crate::McAddr;

use byteorder::{BigEndian, ByteOrder};

/// The fixed 24-byte MLDv1 message: listener query, report and done
/// (RFC 2710 §3). The ICMPv6 checksum field is left as zero on
/// serialization; the raw socket is configured to fill it in
/// (`IPV6_CHECKSUM` offset 2).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MldV1Message {
    /// ICMPv6 type (130 query, 131 report, 132 done).
    pub msg_type: u8,
    /// Maximum response delay in milliseconds (only in queries).
    pub max_resp_delay: u16,
    /// Multicast address; the wildcard in a general query.
    pub group: [u8; 16],
}

impl MldV1Message {
    /// Serialized length in bytes.
    pub const LEN: usize = 24;

    /// Decodes from the ICMPv6 payload of a packet.
    pub fn from_slice(slice: &[u8]) -> Result<MldV1Message, PacketError> {
        if slice.len() < MldV1Message::LEN {
            return Err(LenError {
                required_len: MldV1Message::LEN,
                len: slice.len(),
                layer: Layer::MldMessage,
            }
            .into());
        }
        let mut group = [0u8; 16];
        group.copy_from_slice(&slice[8..24]);
        Ok(MldV1Message {
            msg_type: slice[0],
            max_resp_delay: BigEndian::read_u16(&slice[4..6]),
            group,
        })
    }

    /// Multicast address as a typed value.
    pub fn group_addr(&self) -> McAddr {
        McAddr::V6(self.group)
    }

    /// Serializes the message; the checksum stays zero for the kernel
    /// to fill.
    pub fn to_bytes(&self) -> [u8; MldV1Message::LEN] {
        let mut bytes = [0u8; MldV1Message::LEN];
        bytes[0] = self.msg_type;
        bytes[4..6].copy_from_slice(&self.max_resp_delay.to_be_bytes());
        bytes[8..24].copy_from_slice(&self.group);
        bytes
    }
}

use crate::err::{Layer, LenError, PacketError};
use crate::wire::checksum::Sum16BitWords;
use crate::wire::IGMP_TYPE_QUERY;
use crate::McAddr;

use byteorder::{BigEndian, ByteOrder};

/// IGMPv3 membership query (RFC 3376 §4.1). Used for general,
/// group-specific and group-and-source-specific queries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IgmpV3Query {
    /// Maximum response code (floating encoded, 1/10 s units).
    pub max_resp_code: u8,
    /// Group address; the wildcard for a general query.
    pub group: [u8; 4],
    /// Suppress router-side processing flag.
    pub s_flag: bool,
    /// Querier's robustness variable (3 bits, values > 7 are sent as 0).
    pub qrv: u8,
    /// Querier's query interval code (floating encoded seconds).
    pub qqic: u8,
    /// Source addresses for a group-and-source-specific query.
    pub sources: Vec<[u8; 4]>,
}

impl IgmpV3Query {
    /// Length without any source addresses.
    pub const MIN_LEN: usize = 12;

    /// Decodes a v3 query from the IGMP payload of a packet.
    pub fn from_slice(slice: &[u8]) -> Result<IgmpV3Query, PacketError> {
        if slice.len() < IgmpV3Query::MIN_LEN {
            return Err(LenError {
                required_len: IgmpV3Query::MIN_LEN,
                len: slice.len(),
                layer: Layer::IgmpV3Query,
            }
            .into());
        }
        if slice[0] != IGMP_TYPE_QUERY {
            return Err(PacketError::UnknownMessageType {
                layer: Layer::IgmpV3Query,
                msg_type: slice[0],
            });
        }
        let num_sources = usize::from(BigEndian::read_u16(&slice[10..12]));
        let required = IgmpV3Query::MIN_LEN + num_sources * 4;
        if slice.len() < required {
            return Err(LenError {
                required_len: required,
                len: slice.len(),
                layer: Layer::IgmpV3Query,
            }
            .into());
        }
        let mut sources = Vec::with_capacity(num_sources);
        for i in 0..num_sources {
            let o = IgmpV3Query::MIN_LEN + i * 4;
            sources.push([slice[o], slice[o + 1], slice[o + 2], slice[o + 3]]);
        }
        Ok(IgmpV3Query {
            max_resp_code: slice[1],
            group: [slice[4], slice[5], slice[6], slice[7]],
            s_flag: slice[8] & 0x8 != 0,
            qrv: slice[8] & 0x7,
            qqic: slice[9],
            sources,
        })
    }

    /// Group address as a typed value.
    pub fn group_addr(&self) -> McAddr {
        McAddr::V4(self.group)
    }

    /// Serializes the query with a freshly computed checksum.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(IgmpV3Query::MIN_LEN + self.sources.len() * 4);
        bytes.push(IGMP_TYPE_QUERY);
        bytes.push(self.max_resp_code);
        bytes.extend_from_slice(&[0, 0]); // checksum
        bytes.extend_from_slice(&self.group);
        let qrv = if self.qrv > 7 { 0 } else { self.qrv };
        bytes.push(if self.s_flag { 0x8 } else { 0 } | qrv);
        bytes.push(self.qqic);
        bytes.extend_from_slice(&(self.sources.len() as u16).to_be_bytes());
        for s in &self.sources {
            bytes.extend_from_slice(s);
        }
        let checksum = Sum16BitWords::new().add_slice(&bytes).ones_complement();
        bytes[2..4].copy_from_slice(&checksum.to_be_bytes());
        bytes
    }
}

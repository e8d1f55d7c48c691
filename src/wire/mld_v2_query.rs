use crate::err::{Layer, LenError, PacketError};
use crate::wire::MLD_TYPE_QUERY;
use crate::McAddr;

use byteorder::{BigEndian, ByteOrder};

/// MLDv2 listener query (RFC 3810 §5.1). The 16-bit maximum response
/// code uses the 12-bit-mantissa floating encoding of
/// [`crate::wire::query_code`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MldV2Query {
    /// Maximum response code in milliseconds (floating encoded).
    pub max_resp_code: u16,
    /// Multicast address; the wildcard for a general query.
    pub group: [u8; 16],
    /// Suppress router-side processing flag.
    pub s_flag: bool,
    /// Querier's robustness variable.
    pub qrv: u8,
    /// Querier's query interval code (floating encoded seconds).
    pub qqic: u8,
    /// Source addresses for a group-and-source-specific query.
    pub sources: Vec<[u8; 16]>,
}

impl MldV2Query {
    /// Length without any source addresses.
    pub const MIN_LEN: usize = 28;

    /// Decodes a v2 query from the ICMPv6 payload of a packet.
    pub fn from_slice(slice: &[u8]) -> Result<MldV2Query, PacketError> {
        if slice.len() < MldV2Query::MIN_LEN {
            return Err(LenError {
                required_len: MldV2Query::MIN_LEN,
                len: slice.len(),
                layer: Layer::MldV2Query,
            }
            .into());
        }
        if slice[0] != MLD_TYPE_QUERY {
            return Err(PacketError::UnknownMessageType {
                layer: Layer::MldV2Query,
                msg_type: slice[0],
            });
        }
        let num_sources = usize::from(BigEndian::read_u16(&slice[26..28]));
        let required = MldV2Query::MIN_LEN + num_sources * 16;
        if slice.len() < required {
            return Err(LenError {
                required_len: required,
                len: slice.len(),
                layer: Layer::MldV2Query,
            }
            .into());
        }
        let mut group = [0u8; 16];
        group.copy_from_slice(&slice[8..24]);
        let mut sources = Vec::with_capacity(num_sources);
        for i in 0..num_sources {
            let o = MldV2Query::MIN_LEN + i * 16;
            let mut s = [0u8; 16];
            s.copy_from_slice(&slice[o..o + 16]);
            sources.push(s);
        }
        Ok(MldV2Query {
            max_resp_code: BigEndian::read_u16(&slice[4..6]),
            group,
            s_flag: slice[24] & 0x8 != 0,
            qrv: slice[24] & 0x7,
            qqic: slice[25],
            sources,
        })
    }

    /// Multicast address as a typed value.
    pub fn group_addr(&self) -> McAddr {
        McAddr::V6(self.group)
    }

    /// Serializes the query; the ICMPv6 checksum stays zero for the
    /// kernel to fill.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MldV2Query::MIN_LEN + self.sources.len() * 16);
        bytes.push(MLD_TYPE_QUERY);
        bytes.push(0); // code
        bytes.extend_from_slice(&[0, 0]); // checksum
        bytes.extend_from_slice(&self.max_resp_code.to_be_bytes());
        bytes.extend_from_slice(&[0, 0]); // reserved
        bytes.extend_from_slice(&self.group);
        let qrv = if self.qrv > 7 { 0 } else { self.qrv };
        bytes.push(if self.s_flag { 0x8 } else { 0 } | qrv);
        bytes.push(self.qqic);
        bytes.extend_from_slice(&(self.sources.len() as u16).to_be_bytes());
        for s in &self.sources {
            bytes.extend_from_slice(s);
        }
        bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn roundtrip() {
        let mut src = [0u8; 16];
        src[0] = 0x20;
        src[15] = 1;
        let query = MldV2Query {
            max_resp_code: 10000,
            group: {
                let g: McAddr = "ff15::7".parse().unwrap();
                let mut b = [0u8; 16];
                b.copy_from_slice(g.octets());
                b
            },
            s_flag: true,
            qrv: 2,
            qqic: 125,
            sources: vec![src],
        };
        let bytes = query.to_bytes();
        assert_eq!(bytes.len(), 44);
        assert_eq!(MldV2Query::from_slice(&bytes).unwrap(), query);
    }

    #[test]
    fn general_query() {
        let query = MldV2Query {
            max_resp_code: 10000,
            group: [0; 16],
            s_flag: false,
            qrv: 2,
            qqic: 125,
            sources: Vec::new(),
        };
        let parsed = MldV2Query::from_slice(&query.to_bytes()).unwrap();
        assert!(parsed.group_addr().is_unspecified());
        assert_eq!(parsed.max_resp_code, 10000);
    }

    #[test]
    fn truncated() {
        let query = MldV2Query {
            max_resp_code: 1,
            group: [0; 16],
            s_flag: false,
            qrv: 2,
            qqic: 0,
            sources: vec![[0; 16]],
        };
        let bytes = query.to_bytes();
        assert_matches!(
            MldV2Query::from_slice(&bytes[..bytes.len() - 4]),
            Err(PacketError::Len(_))
        );
    }
}

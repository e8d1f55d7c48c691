use crate::err::{Layer, LenError, PacketError};
use crate::wire::checksum::Sum16BitWords;
use crate::McAddr;

/// The fixed 8-byte IGMP message shared by IGMPv1/v2: queries, v1/v2
/// membership reports and the v2 leave message (RFC 2236 §2).
///
/// The message type is kept as the raw on-wire value; the constants
/// in [`crate::wire`] (`IGMP_TYPE_*`) name the known ones.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IgmpV2Message {
    /// Message type (query / report / leave).
    pub msg_type: u8,
    /// Maximum response time in 1/10 s units (0 in IGMPv1 queries and
    /// in reports).
    pub max_resp_code: u8,
    /// Group address; the wildcard in a general query.
    pub group: [u8; 4],
}

impl IgmpV2Message {
    /// Serialized length in bytes.
    pub const LEN: usize = 8;

    /// Decodes from a slice, verifying the length and the checksum
    /// field position (the checksum itself is not validated; the
    /// kernel already discarded corrupted packets on the raw socket).
    pub fn from_slice(slice: &[u8]) -> Result<IgmpV2Message, PacketError> {
        if slice.len() < IgmpV2Message::LEN {
            return Err(LenError {
                required_len: IgmpV2Message::LEN,
                len: slice.len(),
                layer: Layer::IgmpMessage,
            }
            .into());
        }
        Ok(IgmpV2Message {
            msg_type: slice[0],
            max_resp_code: slice[1],
            group: [slice[4], slice[5], slice[6], slice[7]],
        })
    }

    /// Group address as a typed value.
    pub fn group_addr(&self) -> McAddr {
        McAddr::V4(self.group)
    }

    /// Serializes the message with a freshly computed checksum.
    pub fn to_bytes(&self) -> [u8; IgmpV2Message::LEN] {
        let mut bytes = [
            self.msg_type,
            self.max_resp_code,
            0,
            0,
            self.group[0],
            self.group[1],
            self.group[2],
            self.group[3],
        ];
        let checksum = Sum16BitWords::new().add_slice(&bytes).ones_complement();
        bytes[2..4].copy_from_slice(&checksum.to_be_bytes());
        bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::{IGMP_TYPE_LEAVE, IGMP_TYPE_QUERY};
    use assert_matches::assert_matches;

    #[test]
    fn to_bytes_from_slice_roundtrip() {
        let msg = IgmpV2Message {
            msg_type: IGMP_TYPE_QUERY,
            max_resp_code: 100,
            group: [0, 0, 0, 0],
        };
        let bytes = msg.to_bytes();
        assert_eq!(IgmpV2Message::from_slice(&bytes).unwrap(), msg);
        // packet including its checksum sums to zero
        assert_eq!(
            0,
            Sum16BitWords::new().add_slice(&bytes).ones_complement()
        );
    }

    #[test]
    fn leave_message() {
        let msg = IgmpV2Message {
            msg_type: IGMP_TYPE_LEAVE,
            max_resp_code: 0,
            group: [239, 0, 0, 2],
        };
        let bytes = msg.to_bytes();
        assert_eq!(bytes[0], 0x17);
        assert_eq!(msg.group_addr().to_string(), "239.0.0.2");
        assert_eq!(IgmpV2Message::from_slice(&bytes).unwrap(), msg);
    }

    #[test]
    fn len_error() {
        assert_matches!(
            IgmpV2Message::from_slice(&[0x11, 0, 0]),
            Err(PacketError::Len(LenError {
                required_len: 8,
                len: 3,
                layer: Layer::IgmpMessage
            }))
        );
    }
}

use crate::err::{Layer, LenError};

/// Errors raised while decoding a received IGMP/MLD packet or kernel
/// upcall. Receivers drop the offending packet, count it and continue.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PacketError {
    /// Not enough data to decode the element.
    Len(LenError),

    /// A multicast address record carried a type outside of 1..=6.
    UnknownRecordType(u8),

    /// An IGMP/MLD message type this proxy does not understand.
    UnknownMessageType { layer: Layer, msg_type: u8 },

    /// A header field contradicts the message (e.g. an IPv4 header with
    /// an IHL smaller than 5).
    InvalidHeaderField { layer: Layer, field: &'static str },
}

impl core::fmt::Display for PacketError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use PacketError::*;
        match self {
            Len(err) => err.fmt(f),
            UnknownRecordType(t) => {
                write!(f, "Group Record Error: Unknown record type {}.", t)
            }
            UnknownMessageType { layer, msg_type } => write!(
                f,
                "{}: Unknown message type {}.",
                layer.error_title(),
                msg_type
            ),
            InvalidHeaderField { layer, field } => write!(
                f,
                "{}: Invalid value in field '{}'.",
                layer.error_title(),
                field
            ),
        }
    }
}

impl std::error::Error for PacketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PacketError::Len(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LenError> for PacketError {
    fn from(err: LenError) -> PacketError {
        PacketError::Len(err)
    }
}

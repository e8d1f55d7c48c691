use crate::err::{Layer, LenError, PacketError};
use crate::McAddr;

use byteorder::{BigEndian, ByteOrder};

/// Minimal slice view of an IPv4 header: just the fields the receiver
/// needs to locate an IGMP payload or recognize a kernel upcall.
#[derive(Clone, Eq, PartialEq)]
pub struct Ipv4HeaderSlice<'a> {
    slice: &'a [u8],
}

impl<'a> Ipv4HeaderSlice<'a> {
    /// Minimum length of an IPv4 header (no options).
    pub const MIN_LEN: usize = 20;

    /// Creates a slice view after verifying version, IHL and length.
    pub fn from_slice(slice: &'a [u8]) -> Result<Ipv4HeaderSlice<'a>, PacketError> {
        if slice.len() < Ipv4HeaderSlice::MIN_LEN {
            return Err(LenError {
                required_len: Ipv4HeaderSlice::MIN_LEN,
                len: slice.len(),
                layer: Layer::Ipv4Header,
            }
            .into());
        }
        if slice[0] >> 4 != 4 {
            return Err(PacketError::InvalidHeaderField {
                layer: Layer::Ipv4Header,
                field: "version",
            });
        }
        let ihl = usize::from(slice[0] & 0xF) * 4;
        if ihl < Ipv4HeaderSlice::MIN_LEN {
            return Err(PacketError::InvalidHeaderField {
                layer: Layer::Ipv4Header,
                field: "ihl",
            });
        }
        if slice.len() < ihl {
            return Err(LenError {
                required_len: ihl,
                len: slice.len(),
                layer: Layer::Ipv4Header,
            }
            .into());
        }
        Ok(Ipv4HeaderSlice { slice })
    }

    /// Header length in bytes (IHL * 4).
    #[inline]
    pub fn header_len(&self) -> usize {
        usize::from(self.slice[0] & 0xF) * 4
    }

    /// The "total length" field.
    #[inline]
    pub fn total_len(&self) -> u16 {
        BigEndian::read_u16(&self.slice[2..4])
    }

    /// The "protocol" field.
    #[inline]
    pub fn protocol(&self) -> u8 {
        self.slice[9]
    }

    /// Source address.
    #[inline]
    pub fn source(&self) -> McAddr {
        McAddr::V4([self.slice[12], self.slice[13], self.slice[14], self.slice[15]])
    }

    /// Destination address.
    #[inline]
    pub fn destination(&self) -> McAddr {
        McAddr::V4([self.slice[16], self.slice[17], self.slice[18], self.slice[19]])
    }

    /// The payload after the header (limited by the slice, not by
    /// `total_len`; raw sockets may deliver trailing padding).
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        &self.slice[self.header_len()..]
    }
}

impl core::fmt::Debug for Ipv4HeaderSlice<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ipv4HeaderSlice")
            .field("protocol", &self.protocol())
            .field("source", &self.source())
            .field("destination", &self.destination())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    fn base_header() -> [u8; 24] {
        let mut buf = [0u8; 24];
        buf[0] = 0x45; // version 4, ihl 5
        buf[2] = 0;
        buf[3] = 24;
        buf[9] = 2; // IGMP
        buf[12..16].copy_from_slice(&[10, 0, 0, 1]);
        buf[16..20].copy_from_slice(&[224, 0, 0, 1]);
        buf
    }

    #[test]
    fn from_slice() {
        let buf = base_header();
        let slice = Ipv4HeaderSlice::from_slice(&buf).unwrap();
        assert_eq!(slice.header_len(), 20);
        assert_eq!(slice.total_len(), 24);
        assert_eq!(slice.protocol(), 2);
        assert_eq!(slice.source().to_string(), "10.0.0.1");
        assert_eq!(slice.destination().to_string(), "224.0.0.1");
        assert_eq!(slice.payload().len(), 4);
    }

    #[test]
    fn len_errors() {
        let buf = base_header();
        assert_matches!(
            Ipv4HeaderSlice::from_slice(&buf[..10]),
            Err(PacketError::Len(_))
        );
        // ihl pointing past the slice
        let mut buf = base_header();
        buf[0] = 0x4F; // ihl 15 => 60 bytes
        assert_matches!(
            Ipv4HeaderSlice::from_slice(&buf),
            Err(PacketError::Len(_))
        );
    }

    #[test]
    fn field_errors() {
        let mut buf = base_header();
        buf[0] = 0x65; // version 6
        assert_matches!(
            Ipv4HeaderSlice::from_slice(&buf),
            Err(PacketError::InvalidHeaderField { field: "version", .. })
        );
        let mut buf = base_header();
        buf[0] = 0x43; // ihl 3 < 5
        assert_matches!(
            Ipv4HeaderSlice::from_slice(&buf),
            Err(PacketError::InvalidHeaderField { field: "ihl", .. })
        );
    }
}

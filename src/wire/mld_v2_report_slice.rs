use crate::err::{Layer, LenError, PacketError};
use crate::wire::igmp_v3_report_slice::decode_record;
use crate::wire::{GroupRecord, MLD_TYPE_V2_REPORT};

use byteorder::{BigEndian, ByteOrder};

/// Slice view of an MLDv2 multicast listener report (RFC 3810 §5.2);
/// the 16-byte-address mirror of
/// [`crate::wire::IgmpV3ReportSlice`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MldV2ReportSlice<'a> {
    num_records: u16,
    records: &'a [u8],
}

impl<'a> MldV2ReportSlice<'a> {
    /// Length of the report header before the records.
    pub const MIN_LEN: usize = 8;

    /// Creates a view after verifying the message type and length.
    pub fn from_slice(slice: &'a [u8]) -> Result<MldV2ReportSlice<'a>, PacketError> {
        if slice.len() < MldV2ReportSlice::MIN_LEN {
            return Err(LenError {
                required_len: MldV2ReportSlice::MIN_LEN,
                len: slice.len(),
                layer: Layer::MldV2Report,
            }
            .into());
        }
        if slice[0] != MLD_TYPE_V2_REPORT {
            return Err(PacketError::UnknownMessageType {
                layer: Layer::MldV2Report,
                msg_type: slice[0],
            });
        }
        Ok(MldV2ReportSlice {
            num_records: BigEndian::read_u16(&slice[6..8]),
            records: &slice[MldV2ReportSlice::MIN_LEN..],
        })
    }

    /// Number of records the header announces.
    pub fn num_records(&self) -> u16 {
        self.num_records
    }

    /// Decodes all multicast address records.
    pub fn records(&self) -> Result<Vec<GroupRecord>, PacketError> {
        let mut result = Vec::with_capacity(usize::from(self.num_records));
        let mut rest = self.records;
        for _ in 0..self.num_records {
            let (record, tail) = decode_record(rest, 16, Layer::GroupRecord)?;
            result.push(record);
            rest = tail;
        }
        Ok(result)
    }

    /// Serializes a report from records; the ICMPv6 checksum stays
    /// zero for the kernel to fill.
    pub fn build(records: &[GroupRecord]) -> Vec<u8> {
        let mut bytes = vec![MLD_TYPE_V2_REPORT, 0, 0, 0, 0, 0];
        bytes.extend_from_slice(&(records.len() as u16).to_be_bytes());
        for r in records {
            bytes.push(r.record_type.value());
            bytes.push(0); // aux data len
            bytes.extend_from_slice(&(r.sources.len() as u16).to_be_bytes());
            bytes.extend_from_slice(r.group.octets());
            for s in &r.sources {
                bytes.extend_from_slice(s.octets());
            }
        }
        bytes
    }
}

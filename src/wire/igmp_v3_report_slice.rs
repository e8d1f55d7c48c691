use crate::err::{Layer, LenError, PacketError};
use crate::wire::checksum::Sum16BitWords;
use crate::wire::{RecordType, IGMP_TYPE_V3_REPORT};
use crate::McAddr;

use byteorder::{BigEndian, ByteOrder};

/// A decoded multicast address record, the per-group unit of an
/// IGMPv3 membership report or MLDv2 listener report.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GroupRecord {
    /// What kind of state or change this record describes.
    pub record_type: RecordType,
    /// The multicast address the record refers to.
    pub group: McAddr,
    /// Source addresses of the record.
    pub sources: Vec<McAddr>,
}

/// Slice view of an IGMPv3 membership report (RFC 3376 §4.2).
///
/// Iteration decodes one [`GroupRecord`] per contained multicast
/// address record; `aux_data_len` is honored when advancing even
/// though this proxy never interprets auxiliary data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IgmpV3ReportSlice<'a> {
    num_records: u16,
    records: &'a [u8],
}

impl<'a> IgmpV3ReportSlice<'a> {
    /// Length of the report header before the records.
    pub const MIN_LEN: usize = 8;

    /// Creates a view after verifying the message type and length.
    pub fn from_slice(slice: &'a [u8]) -> Result<IgmpV3ReportSlice<'a>, PacketError> {
        if slice.len() < IgmpV3ReportSlice::MIN_LEN {
            return Err(LenError {
                required_len: IgmpV3ReportSlice::MIN_LEN,
                len: slice.len(),
                layer: Layer::IgmpV3Report,
            }
            .into());
        }
        if slice[0] != IGMP_TYPE_V3_REPORT {
            return Err(PacketError::UnknownMessageType {
                layer: Layer::IgmpV3Report,
                msg_type: slice[0],
            });
        }
        Ok(IgmpV3ReportSlice {
            num_records: BigEndian::read_u16(&slice[6..8]),
            records: &slice[IgmpV3ReportSlice::MIN_LEN..],
        })
    }

    /// Number of records the header announces.
    pub fn num_records(&self) -> u16 {
        self.num_records
    }

    /// Decodes all records. A record that runs past the end of the
    /// slice yields an error; previously decoded records are dropped
    /// with it (the whole packet is considered malformed).
    pub fn records(&self) -> Result<Vec<GroupRecord>, PacketError> {
        let mut result = Vec::with_capacity(usize::from(self.num_records));
        let mut rest = self.records;
        for _ in 0..self.num_records {
            let (record, tail) = decode_record(rest, 4, Layer::GroupRecord)?;
            result.push(record);
            rest = tail;
        }
        Ok(result)
    }

    /// Serializes a report from records (used when reporting state to
    /// an upstream and in tests).
    pub fn build(records: &[GroupRecord]) -> Vec<u8> {
        let mut bytes = vec![IGMP_TYPE_V3_REPORT, 0, 0, 0, 0, 0];
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
        let checksum = Sum16BitWords::new().add_slice(&bytes).ones_complement();
        bytes[2..4].copy_from_slice(&checksum.to_be_bytes());
        bytes
    }
}

/// Decodes one multicast address record with `addr_len`-byte addresses
/// (4 for IGMPv3, 16 for MLDv2). Returns the record and the remaining
/// bytes after it.
pub(crate) fn decode_record(
    slice: &[u8],
    addr_len: usize,
    layer: Layer,
) -> Result<(GroupRecord, &[u8]), PacketError> {
    let head_len = 4 + addr_len;
    if slice.len() < head_len {
        return Err(LenError {
            required_len: head_len,
            len: slice.len(),
            layer,
        }
        .into());
    }
    let record_type = RecordType::try_new(slice[0])?;
    let aux_len = usize::from(slice[1]) * 4;
    let num_sources = usize::from(BigEndian::read_u16(&slice[2..4]));
    let total = head_len + num_sources * addr_len + aux_len;
    if slice.len() < total {
        return Err(LenError {
            required_len: total,
            len: slice.len(),
            layer,
        }
        .into());
    }

    let group = read_addr(&slice[4..4 + addr_len]);
    let mut sources = Vec::with_capacity(num_sources);
    for i in 0..num_sources {
        let o = 4 + addr_len + i * addr_len;
        sources.push(read_addr(&slice[o..o + addr_len]));
    }
    Ok((
        GroupRecord {
            record_type,
            group,
            sources,
        },
        &slice[total..],
    ))
}

fn read_addr(bytes: &[u8]) -> McAddr {
    if bytes.len() == 4 {
        McAddr::V4([bytes[0], bytes[1], bytes[2], bytes[3]])
    } else {
        let mut b = [0u8; 16];
        b.copy_from_slice(bytes);
        McAddr::V6(b)
    }
}

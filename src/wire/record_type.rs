use crate::err::PacketError;

/// Type of a multicast address record inside an IGMPv3 membership
/// report or MLDv2 listener report (RFC 3376 §4.2.12, RFC 3810 §5.2.12).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RecordType {
    /// IS_IN: current state, include filter mode.
    ModeIsInclude,
    /// IS_EX: current state, exclude filter mode.
    ModeIsExclude,
    /// TO_IN: filter mode changed to include.
    ChangeToInclude,
    /// TO_EX: filter mode changed to exclude.
    ChangeToExclude,
    /// ALLOW: additional sources.
    AllowNewSources,
    /// BLOCK: sources no longer wanted.
    BlockOldSources,
}

impl RecordType {
    /// Decodes the on-wire record type value (1..=6).
    pub fn try_new(value: u8) -> Result<RecordType, PacketError> {
        use RecordType::*;
        match value {
            1 => Ok(ModeIsInclude),
            2 => Ok(ModeIsExclude),
            3 => Ok(ChangeToInclude),
            4 => Ok(ChangeToExclude),
            5 => Ok(AllowNewSources),
            6 => Ok(BlockOldSources),
            other => Err(PacketError::UnknownRecordType(other)),
        }
    }

    /// The on-wire value of this record type.
    pub const fn value(self) -> u8 {
        use RecordType::*;
        match self {
            ModeIsInclude => 1,
            ModeIsExclude => 2,
            ChangeToInclude => 3,
            ChangeToExclude => 4,
            AllowNewSources => 5,
            BlockOldSources => 6,
        }
    }
}

impl core::fmt::Display for RecordType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use RecordType::*;
        match self {
            ModeIsInclude => write!(f, "MODE_IS_INCLUDE"),
            ModeIsExclude => write!(f, "MODE_IS_EXCLUDE"),
            ChangeToInclude => write!(f, "CHANGE_TO_INCLUDE_MODE"),
            ChangeToExclude => write!(f, "CHANGE_TO_EXCLUDE_MODE"),
            AllowNewSources => write!(f, "ALLOW_NEW_SOURCES"),
            BlockOldSources => write!(f, "BLOCK_OLD_SOURCES"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn try_new() {
        for v in 1..=6u8 {
            assert_eq!(RecordType::try_new(v).unwrap().value(), v);
        }
        assert_matches!(
            RecordType::try_new(0),
            Err(PacketError::UnknownRecordType(0))
        );
        assert_matches!(
            RecordType::try_new(7),
            Err(PacketError::UnknownRecordType(7))
        );
    }

    #[test]
    fn fmt() {
        assert_eq!("ALLOW_NEW_SOURCES", format!("{}", RecordType::AllowNewSources));
    }
}

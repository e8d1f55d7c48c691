use crate::err::Layer;

/// Error when there is not enough data in a slice to decode an element
/// (e.g. a report slice shorter than its record count implies).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct LenError {
    /// Minimum length that would have been required.
    pub required_len: usize,

    /// Actually available length.
    pub len: usize,

    /// Layer in which the length error was encountered.
    pub layer: Layer,
}

impl core::fmt::Display for LenError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}: Not enough data to decode '{}'. {} byte(s) would be required, but only {} byte(s) are available.",
            self.layer.error_title(),
            self.layer,
            self.required_len,
            self.len
        )
    }
}

impl std::error::Error for LenError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fmt() {
        assert_eq!(
            "IGMP Message Error: Not enough data to decode 'IGMP message'. 8 byte(s) would be required, but only 2 byte(s) are available.",
            format!(
                "{}",
                LenError {
                    required_len: 8,
                    len: 2,
                    layer: Layer::IgmpMessage,
                }
            )
        );
    }

    #[test]
    fn clone_eq() {
        let err = LenError {
            required_len: 4,
            len: 1,
            layer: Layer::GroupRecord,
        };
        assert_eq!(err, err.clone());
    }
}

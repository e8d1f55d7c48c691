use crate::addr::AddrFamily;

/// Error when an operation mixes IPv4 and IPv6 addresses (e.g. comparing
/// a V4 address against a V6 address or masking with the wrong family).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FamilyError {
    /// Family the operation expected.
    pub expected: AddrFamily,
    /// Family that was actually passed in.
    pub actual: AddrFamily,
}

impl core::fmt::Display for FamilyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Address Family Error: expected an {} address but got an {} address.",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for FamilyError {}

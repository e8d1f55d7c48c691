/// Error from a kernel capability (socket creation, MRT flag, VIF or
/// MFIB manipulation, sysctl access).
///
/// Failures during setup are fatal; failures at runtime are logged by
/// the caller and the operation is retried on the next event.
#[derive(Debug)]
pub struct SysError {
    /// Which capability call failed (e.g. "MRT_ADD_MFC").
    pub context: &'static str,
    /// Underlying OS error.
    pub source: std::io::Error,
}

impl SysError {
    /// Builds a [`SysError`] from the current value of `errno`.
    pub fn last(context: &'static str) -> SysError {
        SysError {
            context,
            source: std::io::Error::last_os_error(),
        }
    }

    /// Builds a [`SysError`] wrapping the given io error.
    pub fn new(context: &'static str, source: std::io::Error) -> SysError {
        SysError { context, source }
    }
}

impl core::fmt::Display for SysError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.context, self.source)
    }
}

impl std::error::Error for SysError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Error in the configuration file. Carries the 1-based line number of
/// the offending command; all configuration errors are fatal at startup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigError {
    /// 1-based line on which the failing command starts.
    pub line: u32,
    /// What went wrong.
    pub kind: ConfigErrorKind,
}

/// The different ways a configuration can be rejected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigErrorKind {
    /// A character the scanner does not know.
    UnexpectedChar(char),

    /// A token that does not fit the grammar at this position.
    UnexpectedToken {
        found: String,
        expected: &'static str,
    },

    /// A literal that does not parse as an IP address.
    InvalidAddress(String),

    /// A literal address of the wrong family for the declared protocol.
    WrongAddressFamily(String),

    /// A prefix length outside of the valid range for the family.
    InvalidPrefix(String),

    /// A numeric field that does not parse.
    InvalidNumber(String),

    /// Reference to a table that was never defined.
    UnknownTable(String),

    /// A second global table with the same name.
    DuplicateTable(String),

    /// A second proxy instance with the same name.
    DuplicateInstance(String),

    /// A rule binding names an instance that was never defined.
    UnknownInstance(String),

    /// A rule binding names an interface the instance does not have.
    UnknownInterface(String),

    /// An instance definition without any downstream interface.
    MissingDownstream,

    /// The configuration contains the `disable` command.
    Disabled,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use ConfigErrorKind::*;
        write!(f, "line {}: ", self.line)?;
        match &self.kind {
            UnexpectedChar(c) => write!(f, "unexpected character '{}'", c),
            UnexpectedToken { found, expected } => {
                write!(f, "unexpected token {}, expected {}", found, expected)
            }
            InvalidAddress(s) => write!(f, "'{}' is not a valid IP address", s),
            WrongAddressFamily(s) => write!(
                f,
                "address '{}' does not match the configured group membership protocol",
                s
            ),
            InvalidPrefix(s) => write!(f, "'{}' is not a valid prefix length", s),
            InvalidNumber(s) => write!(f, "'{}' is not a valid number", s),
            UnknownTable(name) => write!(f, "table '{}' not found", name),
            DuplicateTable(name) => write!(f, "table '{}' already exists", name),
            DuplicateInstance(name) => write!(f, "proxy instance '{}' already exists", name),
            UnknownInstance(name) => write!(f, "proxy instance '{}' not defined", name),
            UnknownInterface(name) => write!(f, "interface '{}' not defined", name),
            MissingDownstream => write!(f, "a proxy instance needs at least one downstream"),
            Disabled => write!(f, "the proxy is disabled by configuration"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fmt() {
        assert_eq!(
            "line 3: table 'allowed' already exists",
            format!(
                "{}",
                ConfigError {
                    line: 3,
                    kind: ConfigErrorKind::DuplicateTable("allowed".to_string())
                }
            )
        );
        assert_eq!(
            "line 12: unexpected token '==>', expected an interface name",
            format!(
                "{}",
                ConfigError {
                    line: 12,
                    kind: ConfigErrorKind::UnexpectedToken {
                        found: "'==>'".to_string(),
                        expected: "an interface name"
                    }
                }
            )
        );
    }
}

/// Token of the configuration language. Keywords are matched case
/// insensitively by the scanner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token {
    Protocol,
    MldV1,
    MldV2,
    IgmpV1,
    IgmpV2,
    IgmpV3,
    Pinstance,
    /// ":"
    Colon,
    /// "."
    Dot,
    /// "==>"
    Arrow,
    Upstream,
    Downstream,
    Out,
    In,
    Blacklist,
    Whitelist,
    RuleMatching,
    Table,
    All,
    First,
    Mutex,
    Disable,
    /// "{"
    LeftBrace,
    /// "}"
    RightBrace,
    /// "("
    LeftParen,
    /// ")"
    RightParen,
    /// "-"
    Range,
    /// "/"
    Slash,
    /// "*"
    Star,
    /// "|"
    Pipe,
    /// Identifier, number or address component.
    Str(String),
}

impl Token {
    /// Printable form for error messages.
    pub fn describe(&self) -> String {
        use Token::*;
        match self {
            Protocol => "'protocol'".to_string(),
            MldV1 => "'MLDv1'".to_string(),
            MldV2 => "'MLDv2'".to_string(),
            IgmpV1 => "'IGMPv1'".to_string(),
            IgmpV2 => "'IGMPv2'".to_string(),
            IgmpV3 => "'IGMPv3'".to_string(),
            Pinstance => "'pinstance'".to_string(),
            Colon => "':'".to_string(),
            Dot => "'.'".to_string(),
            Arrow => "'==>'".to_string(),
            Upstream => "'upstream'".to_string(),
            Downstream => "'downstream'".to_string(),
            Out => "'out'".to_string(),
            In => "'in'".to_string(),
            Blacklist => "'blacklist'".to_string(),
            Whitelist => "'whitelist'".to_string(),
            RuleMatching => "'rulematching'".to_string(),
            Table => "'table'".to_string(),
            All => "'all'".to_string(),
            First => "'first'".to_string(),
            Mutex => "'mutex'".to_string(),
            Disable => "'disable'".to_string(),
            LeftBrace => "'{'".to_string(),
            RightBrace => "'}'".to_string(),
            LeftParen => "'('".to_string(),
            RightParen => "')'".to_string(),
            Range => "'-'".to_string(),
            Slash => "'/'".to_string(),
            Star => "'*'".to_string(),
            Pipe => "'|'".to_string(),
            Str(s) => format!("'{}'", s),
        }
    }
}

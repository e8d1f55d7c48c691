use crate::conf::{
    tokenize, AddrMatch, Direction, FilterType, GlobalTableSet, IfaceType, RuleAddr, RuleBinding,
    RuleBox, RuleMatchingType, Table, Token,
};
use crate::err::{ConfigError, ConfigErrorKind};
use crate::{GroupMemProtocol, McAddr};

use std::time::Duration;

/// Kind of a `;`-terminated configuration command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandKind {
    Protocol,
    InstanceDefinition,
    TableDefinition,
    RuleBinding,
    Disable,
}

/// An instance definition before interface confs are attached:
/// `pinstance NAME [(N)] : up... ==> down...`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceDef {
    pub name: String,
    pub table_number: Option<u32>,
    pub upstreams: Vec<String>,
    pub downstreams: Vec<String>,
}

/// Recursive descent parser for a single configuration command.
pub struct Parser {
    line: u32,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Scans `cmd` (one command, without its `;`) that starts on the
    /// 1-based `line`.
    pub fn new(line: u32, cmd: &str) -> Result<Parser, ConfigError> {
        let tokens = tokenize(cmd).map_err(|kind| ConfigError { line, kind })?;
        Ok(Parser {
            line,
            tokens,
            pos: 0,
        })
    }

    /// Classifies the command without consuming anything.
    pub fn command_kind(&self) -> Result<CommandKind, ConfigError> {
        match self.tokens.first() {
            Some(Token::Protocol) => Ok(CommandKind::Protocol),
            Some(Token::Table) => Ok(CommandKind::TableDefinition),
            Some(Token::Disable) => Ok(CommandKind::Disable),
            Some(Token::Pinstance) => match self.tokens.get(2) {
                Some(Token::Colon) | Some(Token::LeftParen) => Ok(CommandKind::InstanceDefinition),
                Some(Token::Upstream) | Some(Token::Downstream) => Ok(CommandKind::RuleBinding),
                other => Err(self.unexpected_opt(other, "':', 'upstream' or 'downstream'")),
            },
            other => Err(self.unexpected_opt(other, "'protocol', 'pinstance', 'table' or 'disable'")),
        }
    }

    /// `protocol (IGMPv1|IGMPv2|IGMPv3|MLDv1|MLDv2)`
    pub fn parse_protocol(&mut self) -> Result<GroupMemProtocol, ConfigError> {
        self.expect(&Token::Protocol, "'protocol'")?;
        let proto = match self.next() {
            Some(Token::IgmpV1) => GroupMemProtocol::IgmpV1,
            Some(Token::IgmpV2) => GroupMemProtocol::IgmpV2,
            Some(Token::IgmpV3) => GroupMemProtocol::IgmpV3,
            Some(Token::MldV1) => GroupMemProtocol::MldV1,
            Some(Token::MldV2) => GroupMemProtocol::MldV2,
            other => return Err(self.unexpected_owned(other, "a group membership protocol")),
        };
        self.expect_end()?;
        Ok(proto)
    }

    /// `pinstance NAME [(N)] : {NAME} ==> NAME {NAME}`
    pub fn parse_instance_definition(&mut self) -> Result<InstanceDef, ConfigError> {
        self.expect(&Token::Pinstance, "'pinstance'")?;
        let name = self.expect_str("an instance name")?;

        let mut table_number = None;
        if self.peek() == Some(&Token::LeftParen) {
            self.next();
            let number = self.expect_str("a routing table number")?;
            table_number = Some(number.parse::<u32>().map_err(|_| ConfigError {
                line: self.line,
                kind: ConfigErrorKind::InvalidNumber(number),
            })?);
            self.expect(&Token::RightParen, "')'")?;
        }

        self.expect(&Token::Colon, "':'")?;
        let mut upstreams = Vec::new();
        while let Some(Token::Str(_)) = self.peek() {
            upstreams.push(self.expect_str("an interface name")?);
        }
        self.expect(&Token::Arrow, "'==>'")?;
        let mut downstreams = Vec::new();
        while let Some(Token::Str(_)) = self.peek() {
            downstreams.push(self.expect_str("an interface name")?);
        }
        if downstreams.is_empty() {
            return Err(ConfigError {
                line: self.line,
                kind: ConfigErrorKind::MissingDownstream,
            });
        }
        self.expect_end()?;
        Ok(InstanceDef {
            name,
            table_number,
            upstreams,
            downstreams,
        })
    }

    /// A whole `table ...` command.
    pub fn parse_table_command(
        &mut self,
        tables: &GlobalTableSet,
        proto: GroupMemProtocol,
    ) -> Result<Table, ConfigError> {
        let table = self.parse_table(tables, proto)?;
        self.expect_end()?;
        Ok(table)
    }

    /// `table NAME | table [NAME] { {rule} }`; as a reference the
    /// named table must already exist.
    fn parse_table(
        &mut self,
        tables: &GlobalTableSet,
        proto: GroupMemProtocol,
    ) -> Result<Table, ConfigError> {
        self.expect(&Token::Table, "'table'")?;

        let mut name = String::new();
        if let Some(Token::Str(_)) = self.peek() {
            name = self.expect_str("a table name")?;
            // a bare name is a reference to a global table
            if self.peek() != Some(&Token::LeftBrace) {
                if tables.get(&name).is_none() {
                    return Err(ConfigError {
                        line: self.line,
                        kind: ConfigErrorKind::UnknownTable(name),
                    });
                }
                return Ok(Table {
                    name: String::new(),
                    rules: vec![RuleBox::TableRef(name)],
                });
            }
        }

        self.expect(&Token::LeftBrace, "'{'")?;
        let mut rules = Vec::new();
        while self.peek() != Some(&Token::RightBrace) {
            rules.push(self.parse_rule(tables, proto)?);
        }
        self.expect(&Token::RightBrace, "'}'")?;
        Ok(Table { name, rules })
    }

    /// `[NAME] "(" (addr_part "|" addr_part | table) ")"`
    fn parse_rule(
        &mut self,
        tables: &GlobalTableSet,
        proto: GroupMemProtocol,
    ) -> Result<RuleBox, ConfigError> {
        let mut if_name = String::new();
        if let Some(Token::Str(_)) = self.peek() {
            if_name = self.expect_str("an interface name")?;
        }
        self.expect(&Token::LeftParen, "'('")?;

        if self.peek() == Some(&Token::Table) {
            let table = self.parse_table(tables, proto)?;
            self.expect(&Token::RightParen, "')'")?;
            return Ok(RuleBox::Table(table));
        }

        let group = self.parse_rule_part(proto)?;
        self.expect(&Token::Pipe, "'|'")?;
        let source = self.parse_rule_part(proto)?;
        self.expect(&Token::RightParen, "')'")?;
        Ok(RuleBox::Addr(RuleAddr {
            if_name,
            group,
            source,
        }))
    }

    /// `("*" | addr) [ "/" NUMBER | "-" ("*" | addr) ]`
    fn parse_rule_part(&mut self, proto: GroupMemProtocol) -> Result<AddrMatch, ConfigError> {
        let from = if self.peek() == Some(&Token::Star) {
            self.next();
            McAddr::unspecified(proto.family())
        } else {
            self.parse_addr(proto)?
        };

        match self.peek() {
            Some(&Token::Slash) => {
                self.next();
                let raw = self.expect_str("a prefix length")?;
                let prefix = raw.parse::<u8>().ok().filter(|p| *p <= proto.family().max_prefix_len());
                let prefix = prefix.ok_or_else(|| ConfigError {
                    line: self.line,
                    kind: ConfigErrorKind::InvalidPrefix(raw),
                })?;
                Ok(AddrMatch::Range(from.mask(prefix), from.broadcast(prefix)))
            }
            Some(&Token::Range) => {
                self.next();
                let to = if self.peek() == Some(&Token::Star) {
                    self.next();
                    McAddr::unspecified(proto.family())
                } else {
                    self.parse_addr(proto)?
                };
                Ok(AddrMatch::Range(from, to))
            }
            _ => Ok(AddrMatch::Single(from)),
        }
    }

    /// Reassembles an address literal from `Str`/`.`/`:` tokens and
    /// checks it against the declared protocol family.
    fn parse_addr(&mut self, proto: GroupMemProtocol) -> Result<McAddr, ConfigError> {
        let mut literal = String::new();
        loop {
            match self.peek() {
                Some(Token::Str(s)) => {
                    literal.push_str(s);
                    self.next();
                }
                Some(Token::Dot) => {
                    literal.push('.');
                    self.next();
                }
                Some(Token::Colon) => {
                    literal.push(':');
                    self.next();
                }
                _ => break,
            }
        }

        let addr: McAddr = literal.parse().map_err(|_| ConfigError {
            line: self.line,
            kind: ConfigErrorKind::InvalidAddress(literal.clone()),
        })?;
        if addr.family() != proto.family() {
            return Err(ConfigError {
                line: self.line,
                kind: ConfigErrorKind::WrongAddressFamily(literal),
            });
        }
        Ok(addr)
    }

    /// `pinstance NAME (upstream|downstream) (NAME|"*") (in|out)
    ///  (blacklist|whitelist table... | rulematching ...)`
    pub fn parse_rule_binding(
        &mut self,
        tables: &GlobalTableSet,
        proto: GroupMemProtocol,
    ) -> Result<RuleBinding, ConfigError> {
        self.expect(&Token::Pinstance, "'pinstance'")?;
        let instance = self.expect_str("an instance name")?;

        let iface_type = match self.next() {
            Some(Token::Upstream) => IfaceType::Upstream,
            Some(Token::Downstream) => IfaceType::Downstream,
            other => return Err(self.unexpected_owned(other, "'upstream' or 'downstream'")),
        };

        let if_name = match self.next() {
            Some(Token::Str(name)) => name,
            Some(Token::Star) => "*".to_string(),
            other => return Err(self.unexpected_owned(other, "an interface name or '*'")),
        };

        let direction = match self.next() {
            Some(Token::In) => Direction::In,
            Some(Token::Out) => Direction::Out,
            other => return Err(self.unexpected_owned(other, "'in' or 'out'")),
        };

        match self.next() {
            Some(token @ Token::Blacklist) | Some(token @ Token::Whitelist) => {
                let filter_type = if token == Token::Blacklist {
                    FilterType::Blacklist
                } else {
                    FilterType::Whitelist
                };
                let table = self.parse_table(tables, proto)?;
                self.expect_end()?;
                Ok(RuleBinding::Filter {
                    instance,
                    iface_type,
                    if_name,
                    direction,
                    filter_type,
                    table,
                })
            }
            Some(Token::RuleMatching) => {
                let (matching, timeout) = match self.next() {
                    Some(Token::All) => (RuleMatchingType::All, Duration::ZERO),
                    Some(Token::First) => (RuleMatchingType::First, Duration::ZERO),
                    Some(Token::Mutex) => {
                        let raw = self.expect_str("a timeout in milliseconds")?;
                        let msec = raw.parse::<u64>().map_err(|_| ConfigError {
                            line: self.line,
                            kind: ConfigErrorKind::InvalidNumber(raw),
                        })?;
                        (RuleMatchingType::Mutex, Duration::from_millis(msec))
                    }
                    other => return Err(self.unexpected_owned(other, "'all', 'first' or 'mutex'")),
                };
                self.expect_end()?;
                Ok(RuleBinding::Matching {
                    instance,
                    iface_type,
                    if_name,
                    direction,
                    matching,
                    timeout,
                })
            }
            other => {
                Err(self.unexpected_owned(other, "'blacklist', 'whitelist' or 'rulematching'"))
            }
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: &Token, expected: &'static str) -> Result<(), ConfigError> {
        match self.next() {
            Some(found) if found == *token => Ok(()),
            other => Err(self.unexpected_owned(other, expected)),
        }
    }

    fn expect_str(&mut self, expected: &'static str) -> Result<String, ConfigError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            other => Err(self.unexpected_owned(other, expected)),
        }
    }

    fn expect_end(&mut self) -> Result<(), ConfigError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(ConfigError {
                line: self.line,
                kind: ConfigErrorKind::UnexpectedToken {
                    found: token.describe(),
                    expected: "the end of the command",
                },
            }),
        }
    }

    fn unexpected_opt(&self, found: Option<&Token>, expected: &'static str) -> ConfigError {
        ConfigError {
            line: self.line,
            kind: ConfigErrorKind::UnexpectedToken {
                found: found
                    .map(Token::describe)
                    .unwrap_or_else(|| "end of command".to_string()),
                expected,
            },
        }
    }

    fn unexpected_owned(&self, found: Option<Token>, expected: &'static str) -> ConfigError {
        self.unexpected_opt(found.as_ref(), expected)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    fn parser(cmd: &str) -> Parser {
        Parser::new(1, cmd).unwrap()
    }

    #[test]
    fn command_kinds() {
        assert_eq!(
            parser("protocol IGMPv3").command_kind().unwrap(),
            CommandKind::Protocol
        );
        assert_eq!(
            parser("pinstance p: a ==> b").command_kind().unwrap(),
            CommandKind::InstanceDefinition
        );
        assert_eq!(
            parser("pinstance p (7): a ==> b").command_kind().unwrap(),
            CommandKind::InstanceDefinition
        );
        assert_eq!(
            parser("pinstance p upstream a in rulematching all")
                .command_kind()
                .unwrap(),
            CommandKind::RuleBinding
        );
        assert_eq!(
            parser("table t { (* | *) }").command_kind().unwrap(),
            CommandKind::TableDefinition
        );
        assert_eq!(
            parser("disable").command_kind().unwrap(),
            CommandKind::Disable
        );
    }

    #[test]
    fn protocol() {
        assert_eq!(
            parser("protocol MLDv2").parse_protocol().unwrap(),
            GroupMemProtocol::MldV2
        );
        assert_matches!(
            parser("protocol eth0").parse_protocol(),
            Err(ConfigError {
                line: 1,
                kind: ConfigErrorKind::UnexpectedToken { .. }
            })
        );
    }

    #[test]
    fn instance_definition() {
        let def = parser("pinstance myProxy: eth0 ==> eth1 eth2")
            .parse_instance_definition()
            .unwrap();
        assert_eq!(def.name, "myProxy");
        assert_eq!(def.table_number, None);
        assert_eq!(def.upstreams, vec!["eth0"]);
        assert_eq!(def.downstreams, vec!["eth1", "eth2"]);

        let def = parser("pinstance p (42): up1 up2 ==> d1")
            .parse_instance_definition()
            .unwrap();
        assert_eq!(def.table_number, Some(42));
        assert_eq!(def.upstreams.len(), 2);

        assert_matches!(
            parser("pinstance p: eth0 ==>").parse_instance_definition(),
            Err(ConfigError {
                kind: ConfigErrorKind::MissingDownstream,
                ..
            })
        );
    }

    #[test]
    fn table_definition() {
        let gts = GlobalTableSet::new();
        let table = parser("table allowed { eth0(224.1.1.1 | 10.0.0.1/24) (239.0.0.1 - 239.0.0.9 | *) }")
            .parse_table_command(&gts, GroupMemProtocol::IgmpV3)
            .unwrap();
        assert_eq!(table.name, "allowed");
        assert_eq!(table.rules.len(), 2);
        assert_matches!(
            &table.rules[0],
            RuleBox::Addr(RuleAddr { if_name, group: AddrMatch::Single(_), source: AddrMatch::Range(_, _) })
                if if_name == "eth0"
        );
        match &table.rules[1] {
            RuleBox::Addr(RuleAddr { group, source, .. }) => {
                assert_eq!(
                    group,
                    &AddrMatch::Range(
                        "239.0.0.1".parse().unwrap(),
                        "239.0.0.9".parse().unwrap()
                    )
                );
                assert!(source.is_wildcard());
            }
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn table_reference() {
        let mut gts = GlobalTableSet::new();
        gts.insert(Table {
            name: "allowed".to_string(),
            rules: Vec::new(),
        });
        let table = parser("table allowed")
            .parse_table_command(&gts, GroupMemProtocol::IgmpV3)
            .unwrap();
        assert_eq!(table.rules, vec![RuleBox::TableRef("allowed".to_string())]);

        assert_matches!(
            parser("table missing").parse_table_command(&gts, GroupMemProtocol::IgmpV3),
            Err(ConfigError {
                kind: ConfigErrorKind::UnknownTable(_),
                ..
            })
        );
    }

    #[test]
    fn nested_table_rule() {
        let mut gts = GlobalTableSet::new();
        gts.insert(Table {
            name: "inner".to_string(),
            rules: Vec::new(),
        });
        let table = parser("table outer { (table inner) (table { (* | 10.1.1.1) }) }")
            .parse_table_command(&gts, GroupMemProtocol::IgmpV3)
            .unwrap();
        assert_eq!(table.rules.len(), 2);
        assert_matches!(&table.rules[0], RuleBox::Table(t) if t.rules == vec![RuleBox::TableRef("inner".to_string())]);
        assert_matches!(&table.rules[1], RuleBox::Table(t) if t.rules.len() == 1);
    }

    #[test]
    fn wrong_family_rejected() {
        let gts = GlobalTableSet::new();
        assert_matches!(
            parser("table t { (ff02::1 | *) }").parse_table_command(&gts, GroupMemProtocol::IgmpV3),
            Err(ConfigError {
                kind: ConfigErrorKind::WrongAddressFamily(_),
                ..
            })
        );
        // and v4 literals under an MLD protocol
        assert_matches!(
            parser("table t { (224.0.0.1 | *) }").parse_table_command(&gts, GroupMemProtocol::MldV2),
            Err(ConfigError {
                kind: ConfigErrorKind::WrongAddressFamily(_),
                ..
            })
        );
    }

    #[test]
    fn invalid_prefix_rejected() {
        let gts = GlobalTableSet::new();
        assert_matches!(
            parser("table t { (224.0.0.1/33 | *) }")
                .parse_table_command(&gts, GroupMemProtocol::IgmpV3),
            Err(ConfigError {
                kind: ConfigErrorKind::InvalidPrefix(_),
                ..
            })
        );
    }

    #[test]
    fn rule_binding_filter() {
        let gts = GlobalTableSet::new();
        let binding = parser("pinstance p downstream eth1 in blacklist table { (239.0.0.4 | 10.0.0.1) }")
            .parse_rule_binding(&gts, GroupMemProtocol::IgmpV3)
            .unwrap();
        assert_matches!(
            binding,
            RuleBinding::Filter {
                iface_type: IfaceType::Downstream,
                direction: Direction::In,
                filter_type: FilterType::Blacklist,
                ..
            }
        );
    }

    #[test]
    fn rule_binding_matching() {
        let gts = GlobalTableSet::new();
        let binding = parser("pinstance p upstream * in rulematching mutex 10000")
            .parse_rule_binding(&gts, GroupMemProtocol::IgmpV3)
            .unwrap();
        match binding {
            RuleBinding::Matching {
                if_name,
                matching,
                timeout,
                ..
            } => {
                assert_eq!(if_name, "*");
                assert_eq!(matching, RuleMatchingType::Mutex);
                assert_eq!(timeout, Duration::from_millis(10000));
            }
            other => panic!("unexpected binding {:?}", other),
        }
    }
}

use crate::conf::{
    CommandKind, Direction, GlobalTableSet, IfaceType, InstanceConf, InterfaceConf, Parser,
    RuleBinding,
};
use crate::err::{ConfigError, ConfigErrorKind, StartupError};
use crate::GroupMemProtocol;

/// The parsed configuration: one protocol, the global tables and the
/// proxy instance definitions with all rule bindings attached.
///
/// A configuration is immutable after parsing and shared by reference
/// between the supervisor and the proxy instances.
#[derive(Clone, Debug)]
pub struct Configuration {
    proto: GroupMemProtocol,
    tables: GlobalTableSet,
    instances: Vec<InstanceConf>,
}

impl Configuration {
    /// Reads and parses the configuration file at `path`.
    pub fn load(path: &str) -> Result<Configuration, StartupError> {
        let text = std::fs::read_to_string(path).map_err(|source| StartupError::ConfigFile {
            path: path.to_string(),
            source,
        })?;
        Ok(Configuration::parse(&text)?)
    }

    /// Parses a configuration from text. Commands are `;`-separated,
    /// `#` starts a comment running to the end of the line, errors
    /// carry the 1-based line of the offending command.
    pub fn parse(text: &str) -> Result<Configuration, ConfigError> {
        let mut proto = GroupMemProtocol::IgmpV3;
        let mut tables = GlobalTableSet::new();
        let mut instances: Vec<InstanceConf> = Vec::new();

        for (line, cmd) in separate_commands(&strip_comments(text)) {
            let mut parser = Parser::new(line, &cmd)?;
            match parser.command_kind()? {
                CommandKind::Protocol => {
                    proto = parser.parse_protocol()?;
                }
                CommandKind::InstanceDefinition => {
                    let def = parser.parse_instance_definition()?;
                    if instances.iter().any(|i| i.name == def.name) {
                        return Err(ConfigError {
                            line,
                            kind: ConfigErrorKind::DuplicateInstance(def.name),
                        });
                    }
                    let mut inst = InstanceConf::new(&def.name);
                    inst.table_number = def.table_number;
                    inst.upstreams = def
                        .upstreams
                        .iter()
                        .map(|n| InterfaceConf::new(n))
                        .collect();
                    inst.downstreams = def
                        .downstreams
                        .iter()
                        .map(|n| InterfaceConf::new(n))
                        .collect();
                    instances.push(inst);
                }
                CommandKind::TableDefinition => {
                    let table = parser.parse_table_command(&tables, proto)?;
                    let name = table.name.clone();
                    if !tables.insert(table) {
                        return Err(ConfigError {
                            line,
                            kind: ConfigErrorKind::DuplicateTable(name),
                        });
                    }
                }
                CommandKind::RuleBinding => {
                    let binding = parser.parse_rule_binding(&tables, proto)?;
                    apply_binding(&mut instances, binding, line)?;
                }
                CommandKind::Disable => {
                    return Err(ConfigError {
                        line,
                        kind: ConfigErrorKind::Disabled,
                    });
                }
            }
        }

        Ok(Configuration {
            proto,
            tables,
            instances,
        })
    }

    /// The configured group membership protocol (IGMPv3 by default).
    pub fn protocol(&self) -> GroupMemProtocol {
        self.proto
    }

    /// The global named tables.
    pub fn tables(&self) -> &GlobalTableSet {
        &self.tables
    }

    /// The proxy instances in definition order.
    pub fn instances(&self) -> &[InstanceConf] {
        &self.instances
    }
}

/// Attaches a parsed binding to its instance: filters land on the
/// named interface(s), matching disciplines on the instance's
/// upstream in/out slots.
fn apply_binding(
    instances: &mut [InstanceConf],
    binding: RuleBinding,
    line: u32,
) -> Result<(), ConfigError> {
    let (instance_name, iface_type, if_name) = match &binding {
        RuleBinding::Filter {
            instance,
            iface_type,
            if_name,
            ..
        }
        | RuleBinding::Matching {
            instance,
            iface_type,
            if_name,
            ..
        } => (instance.clone(), *iface_type, if_name.clone()),
    };

    let inst = instances
        .iter_mut()
        .find(|i| i.name == instance_name)
        .ok_or(ConfigError {
            line,
            kind: ConfigErrorKind::UnknownInstance(instance_name),
        })?;

    if let RuleBinding::Matching {
        iface_type: IfaceType::Upstream,
        direction,
        ..
    } = &binding
    {
        match direction {
            Direction::In => inst.upstream_input_rule = Some(binding),
            Direction::Out => inst.upstream_output_rule = Some(binding),
        }
        return Ok(());
    }

    let ifaces = match iface_type {
        IfaceType::Upstream => &mut inst.upstreams,
        IfaceType::Downstream => &mut inst.downstreams,
    };

    let direction = match &binding {
        RuleBinding::Filter { direction, .. } | RuleBinding::Matching { direction, .. } => {
            *direction
        }
    };

    if if_name == "*" {
        for iface in ifaces.iter_mut() {
            attach(iface, direction, binding.clone());
        }
        Ok(())
    } else {
        let iface = ifaces
            .iter_mut()
            .find(|i| i.name == if_name)
            .ok_or(ConfigError {
                line,
                kind: ConfigErrorKind::UnknownInterface(if_name),
            })?;
        attach(iface, direction, binding);
        Ok(())
    }
}

fn attach(iface: &mut InterfaceConf, direction: Direction, binding: RuleBinding) {
    match direction {
        Direction::In => iface.input_filter = Some(binding),
        Direction::Out => iface.output_filter = Some(binding),
    }
}

/// Deletes `#` comments up to (not including) the newline, so line
/// numbers stay intact.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        match line.find('#') {
            Some(pos) => {
                out.push_str(&line[..pos]);
                if line.ends_with('\n') {
                    out.push('\n');
                }
            }
            None => out.push_str(line),
        }
    }
    out
}

/// Splits the text on `;` into commands paired with the 1-based line
/// on which each command starts.
fn separate_commands(text: &str) -> Vec<(u32, String)> {
    let mut result = Vec::new();
    let mut current_line = 1u32;
    for item in text.split(';') {
        let newlines = item.matches('\n').count() as u32;
        let leading_newlines = item
            .chars()
            .take_while(|c| c.is_whitespace())
            .filter(|c| *c == '\n')
            .count() as u32;
        let trimmed = item.trim();
        if !trimmed.is_empty() {
            result.push((current_line + leading_newlines, trimmed.to_string()));
        }
        current_line += newlines;
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::conf::{FilterType, RuleMatchingType};
    use assert_matches::assert_matches;
    use std::time::Duration;

    const SAMPLE: &str = "\
# a small IGMP proxy
protocol IGMPv3;

table allowed {
    (239.0.0.0/8 | 10.0.0.0/8)
};

pinstance proxy1: eth0 ==> eth1 eth2;
pinstance proxy1 downstream eth1 in whitelist table allowed;
pinstance proxy1 upstream * in rulematching mutex 10000;
";

    #[test]
    fn parse_sample() {
        let cfg = Configuration::parse(SAMPLE).unwrap();
        assert_eq!(cfg.protocol(), GroupMemProtocol::IgmpV3);
        assert!(cfg.tables().get("allowed").is_some());
        assert_eq!(cfg.instances().len(), 1);

        let inst = &cfg.instances()[0];
        assert_eq!(inst.name, "proxy1");
        assert_eq!(inst.upstreams.len(), 1);
        assert_eq!(inst.downstreams.len(), 2);
        assert!(inst.downstreams[0].input_filter.is_some());
        assert!(inst.downstreams[1].input_filter.is_none());
        assert_eq!(
            inst.upstream_in_matching(),
            (RuleMatchingType::Mutex, Duration::from_millis(10000))
        );
    }

    #[test]
    fn protocol_defaults_to_igmpv3() {
        let cfg = Configuration::parse("pinstance p: a ==> b;").unwrap();
        assert_eq!(cfg.protocol(), GroupMemProtocol::IgmpV3);
    }

    #[test]
    fn wildcard_interface_binding() {
        let text = "\
pinstance p: up ==> d1 d2;
pinstance p downstream * out blacklist table { (* | 10.1.1.1) };
";
        let cfg = Configuration::parse(text).unwrap();
        let inst = &cfg.instances()[0];
        assert!(inst.downstreams.iter().all(|d| {
            matches!(
                d.output_filter,
                Some(RuleBinding::Filter {
                    filter_type: FilterType::Blacklist,
                    ..
                })
            )
        }));
    }

    #[test]
    fn error_lines() {
        // the bad command starts on line 3
        let text = "protocol IGMPv3;\n\npinstance p eth0 ==> eth1;\n";
        assert_matches!(
            Configuration::parse(text),
            Err(ConfigError { line: 3, .. })
        );
    }

    #[test]
    fn duplicate_instance_rejected() {
        let text = "pinstance p: a ==> b;\npinstance p: c ==> d;";
        assert_matches!(
            Configuration::parse(text),
            Err(ConfigError {
                line: 2,
                kind: ConfigErrorKind::DuplicateInstance(_)
            })
        );
    }

    #[test]
    fn duplicate_table_rejected() {
        let text = "table t { (* | *) };\ntable t { (* | *) };";
        assert_matches!(
            Configuration::parse(text),
            Err(ConfigError {
                line: 2,
                kind: ConfigErrorKind::DuplicateTable(_)
            })
        );
    }

    #[test]
    fn binding_for_unknown_instance_rejected() {
        let text = "pinstance nope upstream a in rulematching all;";
        assert_matches!(
            Configuration::parse(text),
            Err(ConfigError {
                kind: ConfigErrorKind::UnknownInstance(_),
                ..
            })
        );
    }

    #[test]
    fn binding_for_unknown_interface_rejected() {
        let text = "pinstance p: a ==> b;\npinstance p downstream zz in whitelist table { (* | *) };";
        assert_matches!(
            Configuration::parse(text),
            Err(ConfigError {
                line: 2,
                kind: ConfigErrorKind::UnknownInterface(_)
            })
        );
    }

    #[test]
    fn disable_rejected() {
        assert_matches!(
            Configuration::parse("disable;"),
            Err(ConfigError {
                kind: ConfigErrorKind::Disabled,
                ..
            })
        );
    }

    #[test]
    fn comments_and_lines() {
        let text = "# comment\n# more;\nprotocol MLDv1; pinstance p: ==> d;";
        let cfg = Configuration::parse(text).unwrap();
        assert_eq!(cfg.protocol(), GroupMemProtocol::MldV1);
        assert_eq!(cfg.instances()[0].upstreams.len(), 0);
    }
}

//! CLI argument parsing for tcrule.
//!
//! Builds the clap command tree and turns the matches into a [`CliConfig`]:
//! the global flags plus one [`CliCommand`]. Selector and profile arguments
//! are parsed straight into their typed forms so a bad IP or loss value is
//! rejected by clap before any command runs.

use anyhow::{Result, anyhow};
use clap::{Arg, ArgMatches, Command};
use tcrule_shared::{IpMatch, LossPct, RuleSpec, TcValidate};

/// Which listing `show` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowTarget {
    Interfaces,
    Rules,
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Show { target: ShowTarget, json: bool },
    Set(RuleSpec),
    Delete(RuleSpec),
    Reset { interface: Option<String> },
}

/// CLI configuration structure containing all parsed command line arguments
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    pub verbose: bool,
    pub netns: Option<String>,
    pub tc_bin: Option<String>,
    pub command: CliCommand,
}

impl CliConfig {
    /// Parse CLI arguments and create CliConfig
    pub fn from_args() -> Result<Self> {
        let matches = Self::build_cli().get_matches();
        Self::from_matches(&matches)
    }

    /// Create CliConfig from pre-parsed ArgMatches (useful for testing)
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let verbose = matches.get_flag("verbose");
        let netns = matches.get_one::<String>("netns").cloned();
        let tc_bin = matches.get_one::<String>("tc-bin").cloned();

        let command = match matches.subcommand() {
            Some(("show", sub)) => {
                let target = match sub.subcommand_name() {
                    Some("iface") => ShowTarget::Interfaces,
                    Some("all") => ShowTarget::All,
                    _ => ShowTarget::Rules,
                };
                CliCommand::Show {
                    target,
                    json: sub.get_flag("json"),
                }
            }
            Some(("set", sub)) => CliCommand::Set(Self::rule_spec(sub, true)),
            Some(("del", sub)) => CliCommand::Delete(Self::rule_spec(sub, false)),
            Some(("reset", sub)) => CliCommand::Reset {
                interface: sub.get_one::<String>("iface").cloned(),
            },
            Some((other, _)) => return Err(anyhow!("Unknown command '{}'", other)),
            None => return Err(anyhow!("No command given, see --help")),
        };

        let config = CliConfig {
            verbose,
            netns,
            tc_bin,
            command,
        };
        config.validate()?;
        Ok(config)
    }

    fn rule_spec(matches: &ArgMatches, with_profile: bool) -> RuleSpec {
        let mut spec = RuleSpec {
            interface: matches.get_one::<String>("iface").cloned(),
            ..Default::default()
        };
        spec.predicates.src_ip = matches.get_one::<IpMatch>("src-ip").copied();
        spec.predicates.dst_ip = matches.get_one::<IpMatch>("dst-ip").copied();
        spec.predicates.src_port = matches.get_one::<u16>("sport").copied();
        spec.predicates.dst_port = matches.get_one::<u16>("dport").copied();

        if with_profile {
            spec.profile.latency_ms = matches.get_one::<u64>("latency-ms").copied();
            spec.profile.packet_loss_pct = matches.get_one::<LossPct>("loss").copied();
            spec.profile.rate_bytes = matches.get_one::<u64>("rate-bytes").copied();
        }
        spec
    }

    /// Build the CLI command structure
    pub fn build_cli() -> Command {
        Command::new("tcrule")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Manage netem shaping rules on Linux tc")
            .long_about(
                "Reconciles logical shaping rules (selectors plus latency, loss and rate) \
                 against the qdiscs and u32 filters tc reports. Requires CAP_NET_ADMIN \
                 for anything but listing.",
            )
            .subcommand_required(true)
            .arg_required_else_help(true)
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .global(true)
                    .action(clap::ArgAction::SetTrue)
                    .help("Log every tc invocation")
                    .long_help(
                        "Log every tc command line at info level and raise the log \
                         level to debug.",
                    ),
            )
            .arg(
                Arg::new("netns")
                    .long("netns")
                    .value_name("NAME")
                    .global(true)
                    .help("Operate inside a named network namespace")
                    .long_help(
                        "Run tc through 'ip netns exec NAME' and enumerate interfaces of \
                         /var/run/netns/NAME. Defaults to $TCRULE_NETNS when set.",
                    ),
            )
            .arg(
                Arg::new("tc-bin")
                    .long("tc-bin")
                    .value_name("PATH")
                    .global(true)
                    .help("Path of the tc binary (default: $TCRULE_TC_BIN or 'tc')"),
            )
            .subcommand(
                Command::new("show")
                    .about("List interfaces or rules")
                    .arg(
                        Arg::new("json")
                            .long("json")
                            .global(true)
                            .action(clap::ArgAction::SetTrue)
                            .help("Print JSON instead of text"),
                    )
                    .subcommand(Command::new("iface").about("List interfaces"))
                    .subcommand(Command::new("rules").about("List rules (default)"))
                    .subcommand(
                        Command::new("all").about("Dump interfaces, raw qdiscs, filters and rules"),
                    ),
            )
            .subcommand(Self::with_profile_args(Self::with_selector_args(
                Command::new("set").about("Create or update a shaping rule"),
            )))
            .subcommand(Self::with_selector_args(
                Command::new("del").about("Delete the rule with exactly these selectors"),
            ))
            .subcommand(
                Command::new("reset")
                    .about("Remove the root qdisc and everything under it")
                    .arg(Self::iface_arg()),
            )
    }

    fn iface_arg() -> Arg {
        Arg::new("iface")
            .short('i')
            .long("iface")
            .value_name("DEV")
            .help("Interface to act on (default: every non-loopback interface)")
    }

    fn with_selector_args(command: Command) -> Command {
        command
            .arg(Self::iface_arg())
            .arg(
                Arg::new("src-ip")
                    .long("src-ip")
                    .value_name("ADDR[/LEN]")
                    .value_parser(|s: &str| s.parse::<IpMatch>())
                    .help("Match source IPv4 address or prefix"),
            )
            .arg(
                Arg::new("dst-ip")
                    .long("dst-ip")
                    .value_name("ADDR[/LEN]")
                    .value_parser(|s: &str| s.parse::<IpMatch>())
                    .help("Match destination IPv4 address or prefix"),
            )
            .arg(
                Arg::new("sport")
                    .long("sport")
                    .value_name("PORT")
                    .value_parser(clap::value_parser!(u16))
                    .help("Match source port"),
            )
            .arg(
                Arg::new("dport")
                    .long("dport")
                    .value_name("PORT")
                    .value_parser(clap::value_parser!(u16))
                    .help("Match destination port"),
            )
    }

    fn with_profile_args(command: Command) -> Command {
        command
            .arg(
                Arg::new("latency-ms")
                    .long("latency-ms")
                    .value_name("MS")
                    .value_parser(clap::value_parser!(u64))
                    .help("Added delay in milliseconds"),
            )
            .arg(
                Arg::new("loss")
                    .long("loss")
                    .value_name("PERCENT")
                    .value_parser(|s: &str| s.parse::<LossPct>())
                    .help("Random packet loss, 0-100 percent"),
            )
            .arg(
                Arg::new("rate-bytes")
                    .long("rate-bytes")
                    .value_name("BYTES")
                    .value_parser(clap::value_parser!(u64))
                    .help("Rate limit in bytes per second"),
            )
    }

    /// Validate CLI configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(bin) = &self.tc_bin
            && bin.trim().is_empty()
        {
            return Err(anyhow!("--tc-bin cannot be empty"));
        }
        match &self.command {
            CliCommand::Set(spec) | CliCommand::Delete(spec) => {
                spec.validate().map_err(|e| anyhow!("{}", e))?;
            }
            CliCommand::Reset {
                interface: Some(iface),
            } if iface.is_empty() => {
                return Err(anyhow!("--iface cannot be empty"));
            }
            _ => {}
        }
        Ok(())
    }
}

//! `clonefab` command line

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use clonefab_kernel::test_harness::{run_simulator, SimulatorConfig};
use clonefab_kernel::{logging, FactoryConfig, InstanceFactory, LedgerReader, TemplateFactory};
use clonefab_ledger::{CreationLedger, IntegrityReport, JsonLinesStore};
use clonefab_types::{Identity, ParamSet};
use std::path::{Path, PathBuf};

fn cli() -> Command {
    Command::new("clonefab")
        .version(clonefab_kernel::VERSION)
        .about("Template-instance clone factory")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("ledger")
                .long("ledger")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("JSON-lines ledger file, overrides the configured path"),
        )
        .subcommand(
            Command::new("create")
                .about("Create and initialize a new instance")
                .arg(
                    Arg::new("owner")
                        .long("owner")
                        .required(true)
                        .help("Owner account label or 0x identity"),
                )
                .arg(Arg::new("name").long("name").required(true).help("Instance name"))
                .arg(Arg::new("symbol").long("symbol").required(true).help("Instance symbol")),
        )
        .subcommand(
            Command::new("show")
                .about("Print one ledger entry")
                .arg(Arg::new("instance").long("instance").help("Instance identity"))
                .arg(
                    Arg::new("sequence")
                        .long("sequence")
                        .value_parser(value_parser!(u64))
                        .help("Ledger sequence"),
                )
                .group(
                    ArgGroup::new("target")
                        .args(["instance", "sequence"])
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List entries created by an account")
                .arg(
                    Arg::new("creator")
                        .long("creator")
                        .required(true)
                        .help("Creator account label or 0x identity"),
                ),
        )
        .subcommand(Command::new("verify").about("Replay and verify the ledger"))
        .subcommand(
            Command::new("simulate")
                .about("Run the concurrency simulator")
                .arg(
                    Arg::new("creates")
                        .long("creates")
                        .default_value("1000")
                        .value_parser(value_parser!(u64))
                        .help("Number of operations to simulate"),
                )
                .arg(
                    Arg::new("threads")
                        .long("threads")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Worker threads"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("first-violation-only")
                        .long("first-violation-only")
                        .action(ArgAction::SetTrue)
                        .help("Report only the first violation"),
                ),
        )
}

fn main() {
    let matches = cli().get_matches();
    match run(&matches) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}

fn run(matches: &ArgMatches) -> anyhow::Result<i32> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => FactoryConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FactoryConfig::default(),
    };
    if let Some(path) = matches.get_one::<PathBuf>("ledger") {
        config.ledger_path = Some(path.clone());
    }
    logging::init(&config.log);

    match matches.subcommand() {
        Some(("create", args)) => {
            let owner = account(required(args, "owner")?)?;
            let params = ParamSet::new(required(args, "name")?, required(args, "symbol")?);

            let factory = TemplateFactory::open(config)?;
            let instance = factory.create(owner, params)?;
            let entry = factory
                .lookup_by_instance(&instance)
                .context("created instance has no ledger entry")?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
            Ok(0)
        }
        Some(("show", args)) => {
            let factory = open_for_reading(config)?;
            let entry = if let Some(seq) = args.get_one::<u64>("sequence") {
                factory.entry_at(*seq)
            } else {
                let instance: Identity = required(args, "instance")?.parse()?;
                factory.lookup_by_instance(&instance)
            };
            match entry {
                Some(entry) => {
                    println!("{}", serde_json::to_string_pretty(&entry)?);
                    Ok(0)
                }
                None => {
                    eprintln!("no such entry");
                    Ok(1)
                }
            }
        }
        Some(("list", args)) => {
            let creator = account(required(args, "creator")?)?;
            let factory = open_for_reading(config)?;
            for entry in factory.list_by_creator(&creator) {
                println!("{}", serde_json::to_string(&entry)?);
            }
            Ok(0)
        }
        Some(("verify", _)) => {
            let Some(path) = config.ledger_path else {
                bail!("verify needs a ledger file (--ledger or ledger_path)");
            };
            let report = verify_ledger(&path)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.valid { 0 } else { 1 })
        }
        Some(("simulate", args)) => {
            let sim = SimulatorConfig {
                seed: *args.get_one::<u64>("seed").unwrap_or(&42),
                total_creates: *args.get_one::<u64>("creates").unwrap_or(&1000),
                threads: *args.get_one::<usize>("threads").unwrap_or(&4),
                first_violation_only: args.get_flag("first-violation-only"),
                ..SimulatorConfig::default()
            };

            let report = run_simulator(sim)?;
            println!("{}", report.generate_text());
            Ok(if report.passed() { 0 } else { 1 })
        }
        _ => bail!("unknown command"),
    }
}

/// Factory over an existing ledger file, never creating one
fn open_for_reading(config: FactoryConfig) -> anyhow::Result<TemplateFactory> {
    match config.ledger_path.clone() {
        Some(path) => {
            let store = JsonLinesStore::open_existing(&path)
                .with_context(|| format!("opening ledger {}", path.display()))?;
            Ok(TemplateFactory::restore(config, Box::new(store))?)
        }
        None => Ok(TemplateFactory::new(config)?),
    }
}

fn verify_ledger(path: &Path) -> anyhow::Result<IntegrityReport> {
    let store = JsonLinesStore::open_existing(path)
        .with_context(|| format!("opening ledger {}", path.display()))?;
    let report = CreationLedger::verify_store(&store)?;
    if let Some(position) = report.first_invalid {
        tracing::error!(position, path = %path.display(), "ledger verification failed");
    }
    Ok(report)
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("missing --{name}"))
}

/// `0x`-prefixed identities are taken literally, anything else is a label
fn account(value: &str) -> anyhow::Result<Identity> {
    if value.starts_with("0x") {
        Ok(value.parse()?)
    } else {
        Ok(Identity::named(value))
    }
}

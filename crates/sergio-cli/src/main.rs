//! The `sergio` binary: verb dispatch against one container.
//!
//! `sergio CONTAINER VERB [PARAMS…]` — built-in verbs cover the lifecycle
//! (create, start, stop, destroy, running), networking (nat, denat), files
//! (download, upload, backup, restore), and sessions (login, exec). Any
//! other verb is dispatched as an RPC to the container's action of that
//! name, with `PARAMS` parsed as `key=value` assignments.

use clap::{Parser, ValueEnum};
use sergio_core::{Engine, Output, OutputMode};
use sergio_runtime::{select_firewall, select_runtime};
use sergio_schema::{discover_config, parse_config_file};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;

#[derive(Debug, Parser)]
#[command(
    name = "sergio",
    version,
    about = "Declarative provisioner and lifecycle manager for LXD containers"
)]
struct Cli {
    /// Container to work on.
    container: String,

    /// Operation to perform: create, destroy, start, stop, running, nat,
    /// denat, login, backup, restore, download, upload, exec, or any action
    /// defined by the container.
    verb: String,

    /// Parameters for the operation.
    params: Vec<String>,

    /// Output routing: forwarded in-container stdio, [name] log lines, both,
    /// or none.
    #[arg(short = 'o', long = "output", value_enum, default_value_t = OutputArg::Both)]
    output: OutputArg,

    /// Configuration file. Defaults to the first existing of ./sergio.yml,
    /// ./sergio.yaml, ./config.yml, ./config.yaml, ~/sergio.yml,
    /// ~/sergio.yaml.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Start (and for create, create) required containers recursively.
    #[arg(short = 'r', long = "recursive", default_value_t = false)]
    recursive: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short = 'v', long, default_value_t = false)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false)]
    trace: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputArg {
    Both,
    Actions,
    Log,
    None,
}

impl From<OutputArg> for OutputMode {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::Both => OutputMode::Both,
            OutputArg::Actions => OutputMode::Actions,
            OutputArg::Log => OutputMode::Log,
            OutputArg::None => OutputMode::None,
        }
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SERGIO_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(message) => {
            eprintln!("error: [{}] {message}", cli.container);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(cli: &Cli) -> Result<u8, String> {
    let config_path = discover_config(cli.config.as_deref()).map_err(|e| e.to_string())?;
    let config = parse_config_file(&config_path).map_err(|e| e.to_string())?;

    let runtime_name =
        std::env::var("SERGIO_RUNTIME").unwrap_or_else(|_| "lxc".to_owned());
    if runtime_name == "lxc" && std::env::var("SERGIO_SKIP_PREREQS").as_deref() != Ok("1") {
        let missing = sergio_runtime::check_host_prereqs();
        if !missing.is_empty() {
            return Err(sergio_runtime::format_missing(&missing));
        }
    }
    let firewall_name = if runtime_name == "mock" { "mock" } else { "iptables" };
    let runtime = select_runtime(&runtime_name).map_err(|e| e.to_string())?;
    let firewall = select_firewall(firewall_name).map_err(|e| e.to_string())?;

    let mut engine = Engine::new(
        &config,
        runtime,
        firewall,
        Output::new(cli.output.into()),
    );
    if let Ok(seconds) = std::env::var("SERGIO_QUIESCENCE") {
        let seconds: u64 = seconds
            .parse()
            .map_err(|_| format!("SERGIO_QUIESCENCE must be a number of seconds, got '{seconds}'"))?;
        engine = engine.with_quiescence(Duration::from_secs(seconds));
    }

    dispatch(&engine, cli).map_err(|e| e.to_string())
}

fn dispatch(engine: &Engine, cli: &Cli) -> Result<u8, sergio_core::CoreError> {
    let id = cli.container.as_str();
    match cli.verb.as_str() {
        "create" => engine.create(id, cli.recursive)?,
        "destroy" => engine.destroy(id)?,
        "start" => engine.start(id, cli.recursive)?,
        "stop" => engine.stop(id)?,
        "running" => {
            let running = engine.is_running(id)?;
            println!("{}", if running { "running" } else { "not running" });
            return Ok(if running { EXIT_SUCCESS } else { EXIT_FAILURE });
        }
        "nat" => engine.nat(id)?,
        "denat" => engine.denat(id)?,
        "login" => engine.login(id, cli.params.first().map(String::as_str))?,
        "backup" => engine.backup(id)?,
        "restore" => engine.restore(id, cli.params.first().map(String::as_str))?,
        "download" => {
            let [source, destination] = two_params(&cli.params, "download")?;
            engine.download(id, source, destination)?;
        }
        "upload" => {
            let [source, destination] = two_params(&cli.params, "upload")?;
            engine.upload(id, source, destination)?;
        }
        "exec" => engine.rpc_verb(id, &cli.params)?,
        action => {
            let mut tokens = vec![action.to_owned()];
            tokens.extend(cli.params.iter().cloned());
            engine.rpc_verb(id, &tokens)?;
        }
    }
    Ok(EXIT_SUCCESS)
}

fn two_params<'a>(
    params: &'a [String],
    verb: &str,
) -> Result<[&'a str; 2], sergio_core::CoreError> {
    match params {
        [source, destination] => Ok([source.as_str(), destination.as_str()]),
        _ => Err(sergio_core::CoreError::Schema(
            sergio_schema::SchemaError::InvalidAction {
                kind: "cli",
                reason: format!("{verb} needs exactly SRC and DST parameters"),
            },
        )),
    }
}

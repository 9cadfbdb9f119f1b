//! `usrsvc`: the one-shot CLI front end over the supervision engine. Thin by
//! design — it resolves a program name (or `all`) against the parsed
//! config and dispatches through [`usrsvc::action`].

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{LogLevel, Verbosity};
use global_placeholders::global;
use usrsvc::action::{self, Action};
use usrsvc::codes::ReturnCode;
use usrsvc::config::{self, loader};
use usrsvc::{logerr, logmsg};

/// `usrsvc` is quiet by default; `-v`/`-vv` opts into `log`-crate diagnostics
/// distinct from the program-facing output in `usrsvc::log`.
#[derive(Copy, Clone, Debug, Default)]
struct NoneLevel;
impl LogLevel for NoneLevel {
    fn default() -> Option<log::Level> {
        None
    }
}

const USAGE: &str = "Usage: usrsvc (Options) [start/stop/restart/status] [program name]
 Performs the requested action on the given program name.
 \"all\" can be used for start/stop/restart in place of \"program name\"

  Options:
  --------

    Parallel:
        When doing start/stop/restart all, you may add \"--parallel\" or \"-P\" to perform
        the action on all items in parallel.

  Config:
  -------

    usrsvc uses the config file found at $HOME/usrsvc.cfg.
";

const README: &str = "See https://github.com/kata198/usrsvc/blob/master/README.md for extended documentation.\n";

#[derive(Parser)]
#[command(name = "usrsvc", disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[clap(flatten)]
    verbose: Verbosity<NoneLevel>,
    /// Enable extra diagnostic logging (the global debug toggle)
    #[arg(long)]
    debug: bool,
}

#[derive(clap::Args)]
struct Target {
    /// Program name, or "all"
    name: String,
    /// Fan out over every program as child processes instead of serially
    #[arg(long = "parallel", short = 'P')]
    parallel: bool,
}

#[derive(Subcommand)]
enum Commands {
    Start(Target),
    Stop(Target),
    Restart(Target),
    Status(Target),
}

fn main() {
    let raw: Vec<String> = std::env::args().collect();
    if raw.iter().any(|a| a == "--help" || a == "-h") {
        eprint!("{USAGE}");
        std::process::exit(ReturnCode::HelpMessage.code());
    }
    if raw.iter().any(|a| a == "--readme") {
        print!("{README}");
        std::process::exit(ReturnCode::HelpMessage.code());
    }
    if raw.iter().any(|a| a == "--version" || a == "-V") {
        println!("usrsvc {}", usrsvc::helpers::version());
        std::process::exit(ReturnCode::HelpMessage.code());
    }

    usrsvc::globals::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(_) => {
            eprint!("{USAGE}");
            std::process::exit(ReturnCode::GeneralFailure.code());
        }
    };
    usrsvc::globals::init_logger(cli.verbose.log_level_filter());
    usrsvc::debug::set_debug_enabled(cli.debug);

    let (action, target) = match cli.command {
        Commands::Start(t) => (Action::Start, t),
        Commands::Stop(t) => (Action::Stop, t),
        Commands::Restart(t) => (Action::Restart, t),
        Commands::Status(t) => (Action::Status, t),
    };

    let config_path = std::path::PathBuf::from(global!("usrsvc.config"));
    let config_set = match loader::load(&config_path) {
        Ok(set) => set,
        Err(err) => {
            logerr!("ERROR in config: {err}");
            std::process::exit(ReturnCode::InvalidConfig.code());
        }
    };

    // Prevent signals from interrupting a half-finished action.
    action::ignore_term_and_int();

    let code = if target.name == "all" {
        if target.parallel {
            action::run_all_parallel(action, &config_set)
        } else {
            action::run_all_serial(action, &config_set)
        }
    } else {
        dispatch_single(action, &config_set, &target.name)
    };

    std::process::exit(code.code());
}

fn dispatch_single(action: Action, config_set: &config::ConfigSet, name: &str) -> ReturnCode {
    match config_set.programs.get(name) {
        Some(cfg) => {
            let code = action::perform(action, cfg);
            if code.is_success() {
                logmsg!("{name}: {} -> {code}", action.as_str());
            } else {
                logerr!("{name}: {} -> {code}", action.as_str());
            }
            code
        }
        None => {
            logerr!("no such program: {name}");
            ReturnCode::ProgramUndefined
        }
    }
}

//! `usrsvcd`: the long-running daemon. Acquires its own pidfile, redirects
//! its own stdout/stderr per `MainConfig`, installs shutdown signal handlers,
//! then hands off to [`usrsvc::supervisor::Supervisor::run`].

use global_placeholders::global;
use usrsvc::codes::ReturnCode;
use usrsvc::config::loader;
use usrsvc::logmsg;
use usrsvc::supervisor::{self, Supervisor};

fn redirect_stdio(path: &Option<String>, is_stderr: bool, stdout_path: &Option<String>) {
    use std::os::fd::AsRawFd;

    let resolved = match (path, is_stderr) {
        (Some(p), _) if p != "stdout" => Some(p.clone()),
        (Some(_), true) => stdout_path.clone(),
        (None, _) => None,
    };

    let Some(target) = resolved else { return };

    let file = match std::fs::OpenOptions::new().create(true).append(true).open(&target) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("usrsvcd: cannot open {target}: {err}");
            return;
        }
    };

    let fd = if is_stderr { libc::STDERR_FILENO } else { libc::STDOUT_FILENO };
    unsafe {
        libc::dup2(file.as_raw_fd(), fd);
    }
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, supervisor::request_shutdown as usize);
        libc::signal(libc::SIGINT, supervisor::request_shutdown as usize);
    }
}

fn main() {
    let raw: Vec<String> = std::env::args().collect();
    if raw.iter().any(|a| a == "--version" || a == "-V") {
        println!("usrsvcd {}", usrsvc::helpers::version());
        std::process::exit(ReturnCode::HelpMessage.code());
    }

    let debug = raw.iter().any(|a| a == "--debug");
    usrsvc::debug::set_debug_enabled(debug);

    usrsvc::globals::init();
    usrsvc::globals::init_daemon_logger(&global!("usrsvc.daemon.log"));

    let config_path = std::path::PathBuf::from(global!("usrsvc.config"));
    let config_set = match loader::load(&config_path) {
        Ok(set) => set,
        Err(err) => {
            eprintln!("ERROR in config: {err}");
            std::process::exit(ReturnCode::InvalidConfig.code());
        }
    };

    redirect_stdio(&config_set.main.usrsvcd_stdout, false, &config_set.main.usrsvcd_stdout);
    redirect_stdio(&config_set.main.usrsvcd_stderr, true, &config_set.main.usrsvcd_stdout);

    if let Err(code) = Supervisor::claim_daemon_pidfile(&config_set.main.pidfile) {
        eprintln!("usrsvcd: another instance is already running");
        std::process::exit(code.code());
    }

    install_signal_handlers();

    println!("{} usrsvcd started (pid {})", *usrsvc::helpers::SUCCESS, std::process::id());
    logmsg!("usrsvcd started (pid {})", std::process::id());
    let mut supervisor = Supervisor::new(config_path);
    supervisor.run();

    Supervisor::release_daemon_pidfile(&config_set.main.pidfile);
    logmsg!("usrsvcd stopped");
}

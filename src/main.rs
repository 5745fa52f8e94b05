//! anonftpd entry point: parse the command line, lock the process into the
//! served directory, drop privileges, and run the listener until SIGTERM
//! or SIGINT.

use anonftpd::config::FtpConfig;
use anonftpd::errors::{ConfigError, FtpError, FtpResult};
use anonftpd::listener::FtpListener;

use log::info;
use nix::sys::signal::{SigHandler, SigSet, Signal, signal};
use nix::unistd::{User, chdir, chroot, geteuid, setgid, setuid};

use std::env;
use std::path::PathBuf;
use std::process;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = args
        .first()
        .map(String::as_str)
        .unwrap_or("anonftpd")
        .to_string();

    let config = match FtpConfig::parse_args(&args[1..]) {
        Ok(config) => config,
        Err(ConfigError::HelpRequested) => {
            print!("{}", FtpConfig::usage(&program));
            return;
        }
        Err(err) => {
            eprintln!("{}: {}", program, err);
            eprint!("{}", FtpConfig::usage(&program));
            process::exit(1);
        }
    };

    if let Err(err) = serve(&config) {
        eprintln!("{}: {}", program, err);
        process::exit(1);
    }
}

fn serve(config: &FtpConfig) -> FtpResult<()> {
    // Binding port 21 and calling chroot both need root; privileges are
    // shed as soon as the listener socket exists.
    if !geteuid().is_root() {
        return Err(FtpError::Startup(
            "program needs root permission to run".into(),
        ));
    }

    let user = User::from_name(&config.user_name)
        .map_err(|err| FtpError::Startup(format!("error looking up user; {}", err)))?
        .ok_or_else(|| {
            FtpError::Startup(format!("invalid user name \"{}\"", config.user_name))
        })?;

    chroot(config.root_directory.as_str())
        .map_err(|err| FtpError::Startup(format!("error entering root directory; {}", err)))?;
    chdir("/").map_err(|err| {
        FtpError::Startup(format!("error changing to root directory; {}", err))
    })?;

    // A peer closing a data connection mid-write must surface as an error
    // from the write, not kill the process.
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .map_err(|err| FtpError::Startup(format!("error ignoring SIGPIPE; {}", err)))?;

    // Block the termination signals before any thread exists, so every
    // thread inherits the mask and delivery funnels into the wait below.
    let mut term_signals = SigSet::empty();
    term_signals.add(Signal::SIGTERM);
    term_signals.add(Signal::SIGINT);
    term_signals
        .thread_block()
        .map_err(|err| FtpError::Startup(format!("error blocking signals; {}", err)))?;

    let mut listener = FtpListener::new(
        config.bind_address.as_deref(),
        config.port,
        config.max_connections,
        config.inactivity_timeout,
        PathBuf::from("/"),
    )?;

    setgid(user.gid)
        .map_err(|err| FtpError::Startup(format!("error changing group; {}", err)))?;
    setuid(user.uid)
        .map_err(|err| FtpError::Startup(format!("error changing user; {}", err)))?;
    info!("running as uid {}, gid {}", user.uid, user.gid);

    listener.start()?;
    info!("FTP server listening on port {}", config.port);

    let received = term_signals
        .wait()
        .map_err(|err| FtpError::Startup(format!("error waiting for signals; {}", err)))?;
    info!("{} received, shutting down", received.as_str());

    listener.stop();
    info!("all connections finished, FTP server exiting");
    Ok(())
}

//! Attaches to a session and logs every snapshot and command it sees.
//!
//! ```text
//! lilypad-monitor [CONFIG.toml] [--seconds N] [--purge]
//! ```
//!
//! `--purge` removes the named objects of a session left behind by crashed
//! processes instead of attaching.

use anyhow::{Context, Result, bail};
use lilypad_config::SessionConfig;
use lilypad_events::{CommandBody, Target};
use lilypad_icc::Session;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    seconds: Option<u64>,
    purge: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--purge" => args.purge = true,
            "--seconds" => {
                let n = it.next().context("--seconds needs a value")?;
                args.seconds = Some(n.parse().with_context(|| format!("bad --seconds '{n}'"))?);
            }
            flag if flag.starts_with("--") => bail!("unknown flag '{flag}'"),
            path => args.config = Some(PathBuf::from(path)),
        }
    }
    Ok(args)
}

fn target_label(target: Target) -> String {
    match target {
        Target::Broadcast => "broadcast".into(),
        Target::Server => "server".into(),
        Target::Process(pid) => format!("pid {pid}"),
    }
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => SessionConfig::load(path.display().to_string())
            .with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::default(),
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.purge {
        Session::purge(&config).context("purging session")?;
        return Ok(());
    }

    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only stores to an atomic
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }

    let session = Session::open_or_create(config.clone())
        .with_context(|| format!("attaching to session '{}'", config.session))?;
    if session.is_creator() {
        warn!("no session was running; this monitor created it");
    }

    session.register_data_handler(|snap| {
        info!(
            state = ?snap.state,
            time = snap.time,
            level = snap.level,
            size = %format!("{}x{}", snap.width, snap.height),
            entities = snap.entities().len(),
            "snapshot"
        );
    });
    session.register_command_handler(|cmd| {
        let to = target_label(cmd.target());
        match cmd.body {
            CommandBody::Info(body) => info!(from = cmd.sender_pid, %to, ?body, "command"),
            CommandBody::Result(res) => {
                info!(from = cmd.sender_pid, %to, status = res.status, "result")
            }
        }
    });

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    while !STOP.load(Ordering::SeqCst) && deadline.is_none_or(|d| Instant::now() < d) {
        std::thread::sleep(Duration::from_millis(50));
    }

    let exit = session.close();
    info!(code = exit.code(), "monitor stopped");
    if exit.code() != 0 {
        std::process::exit(exit.code());
    }
    Ok(())
}

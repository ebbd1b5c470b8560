//! End-to-end multi-process test for a shared session.
//!
//! # Overview
//!
//! One server and two clients run as separate OS processes attached to the
//! same session. The server broadcasts snapshots; each client asks the
//! server for something and must get the answer back at its own pid, and
//! only its own answer.
//!
//! # Test Architecture
//!
//! The test executable re-runs itself with a role in the environment:
//!
//! ```text
//!                    Time -->
//!
//! [Server]   --[create]--[ready]--[snapshots ... replies ...]--------[2x done]--[close]
//!                            |          |            ^   |
//!                            v          v            |   v
//! [Client 0]            [attach]---[snapshot]--[Freeze]--[Result]--[done]--[close]
//! [Client 1]            [attach]---[snapshot]--[Freeze]--[Result]--[done]--[close]
//! ```
//!
//! The orchestrator waits for the server's ready marker before starting the
//! clients so the server is always the session's creator.
//!
//! # Running the Test
//!
//! ```bash
//! cargo test -p lilypad-icc --test e2e_processes -- --nocapture
//! ```

use lilypad_icc::{Command, CommandInfo, CommandKind, Session, SessionConfig, Target};
use std::env;
use std::io::Write;
use std::process::{Command as Process, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

/// Writes to stderr with immediate flush to bypass test output capture.
macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const TEST_NAME: &str = "e2e_server_and_two_clients";

const ENV_ROLE: &str = "LILYPAD_E2E_ROLE";
const ENV_SESSION: &str = "LILYPAD_E2E_SESSION";
const ENV_READY: &str = "LILYPAD_E2E_READY";
const ENV_SERVER_PID: &str = "LILYPAD_E2E_SERVER_PID";
const ENV_CLIENT_ID: &str = "LILYPAD_E2E_CLIENT_ID";

const ROLE_SERVER: &str = "server";
const ROLE_CLIENT: &str = "client";

const CLIENTS: usize = 2;
const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(20);
const CHILD_DEADLINE: Duration = Duration::from_secs(10);

fn session_config(session: &str) -> SessionConfig {
    SessionConfig {
        shm_dir: env::temp_dir(),
        tick_ms: 5,
        attach_timeout_ms: 2_000,
        ..SessionConfig::default()
    }
    .with_session(session)
}

/// Creates the session, publishes snapshots, and answers every `Freeze`
/// with a result addressed to its sender. A `Rock` means a client is done.
fn run_server(session: &str, ready: &str) {
    let cfg = session_config(session);
    let server = Session::open_or_create(cfg).expect("server: failed to open session");
    assert!(server.is_creator(), "server must create the session");
    log!("[SERVER] created session {session} (pid {})", server.pid());

    let (tx, rx) = mpsc::channel::<Command>();
    let tx = Mutex::new(tx);
    server.register_command_handler(move |cmd| {
        let _ = tx.lock().unwrap().send(*cmd);
    });

    std::fs::write(ready, b"ready").expect("server: failed to write ready marker");

    let deadline = Instant::now() + CHILD_DEADLINE;
    let mut snapshot = lilypad_icc::Snapshot::default();
    let mut done = 0;
    let mut answered = 0;

    while done < CLIENTS {
        assert!(Instant::now() < deadline, "[SERVER] clients never finished");

        snapshot.time += 1;
        server.write_data(&snapshot).expect("server: write_data");

        while let Ok(cmd) = rx.try_recv() {
            match cmd.as_info() {
                Some(CommandInfo::Freeze { road }) => {
                    log!("[SERVER] freeze road {road} from pid {}", cmd.sender_pid);
                    server
                        .write_command(cmd.reply(server.pid(), true))
                        .expect("server: reply");
                    answered += 1;
                }
                Some(CommandInfo::Rock { .. }) => {
                    log!("[SERVER] pid {} is done", cmd.sender_pid);
                    done += 1;
                }
                other => panic!("[SERVER] unexpected command {other:?}"),
            }
        }
        std::thread::sleep(SNAPSHOT_INTERVAL);
    }

    assert_eq!(answered, CLIENTS);
    log!("[SERVER] exit code {}", server.close().code());
}

/// Attaches, waits for a snapshot, asks the server for a freeze and waits
/// for the answer addressed to this process.
fn run_client(session: &str, id: i32, server_pid: i32) {
    let cfg = session_config(session);
    let client = Session::open_or_create(cfg).expect("client: failed to open session");
    assert!(!client.is_creator());
    log!("[CLIENT {id}] attached (pid {}, slot {})", client.pid(), client.instance_slot());

    let snapshots = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&snapshots);
    client.register_data_handler(move |snap| {
        if snap.time > 0 {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let inbox = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&inbox);
    client.register_command_handler(move |cmd| sink.lock().unwrap().push(*cmd));

    let deadline = Instant::now() + CHILD_DEADLINE;
    while snapshots.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "[CLIENT {id}] no snapshot arrived");
        std::thread::sleep(Duration::from_millis(1));
    }

    client
        .send_info(CommandInfo::Freeze { road: id }, Target::Server)
        .expect("client: send freeze");

    let results = |inbox: &Mutex<Vec<Command>>| -> Vec<Command> {
        inbox
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.kind() == CommandKind::Result)
            .copied()
            .collect()
    };
    while results(&inbox).is_empty() {
        assert!(Instant::now() < deadline, "[CLIENT {id}] no reply arrived");
        std::thread::sleep(Duration::from_millis(1));
    }

    // give a misrouted reply for the other client time to show up
    std::thread::sleep(Duration::from_millis(200));
    let results = results(&inbox);
    assert_eq!(results.len(), 1, "[CLIENT {id}] got {results:?}");
    assert_eq!(results[0].sender_pid, server_pid);
    assert_eq!(results[0].target(), Target::Process(client.pid()));
    assert_eq!(results[0].as_result().map(|r| r.status), Some(true));
    log!(
        "[CLIENT {id}] reply ok after {} snapshots",
        snapshots.load(Ordering::SeqCst)
    );

    client
        .send_info(CommandInfo::Rock { x: id, y: 0 }, Target::Server)
        .expect("client: send done");
    assert_eq!(client.close().code(), 0);
}

#[test]
fn e2e_server_and_two_clients() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let session = env::var(ENV_SESSION).expect("session not set");
        match role.as_str() {
            ROLE_SERVER => run_server(&session, &env::var(ENV_READY).expect("ready not set")),
            ROLE_CLIENT => {
                let id = env::var(ENV_CLIENT_ID).expect("client id not set");
                let server_pid = env::var(ENV_SERVER_PID).expect("server pid not set");
                run_client(&session, id.parse().unwrap(), server_pid.parse().unwrap());
            }
            other => panic!("Unknown role: {other}"),
        }
        return;
    }

    let pid = std::process::id();
    let session = format!("lp_e2e_{pid}");
    let cfg = session_config(&session);
    Session::purge(&cfg).unwrap();
    let ready = env::temp_dir().join(format!("lp_e2e_{pid}.ready"));
    let _ = std::fs::remove_file(&ready);
    let exe = env::current_exe().expect("Failed to get current executable path");

    log!("");
    log!("{}", "=".repeat(70));
    log!("E2E multi-process session test ({session})");
    log!("{}", "=".repeat(70));

    let mut server = Process::new(&exe)
        .arg("--exact")
        .arg(TEST_NAME)
        .env(ENV_ROLE, ROLE_SERVER)
        .env(ENV_SESSION, &session)
        .env(ENV_READY, &ready)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("Failed to spawn server process");

    let deadline = Instant::now() + Duration::from_secs(5);
    while !ready.exists() {
        if Instant::now() >= deadline || server.try_wait().unwrap().is_some() {
            let _ = server.kill();
            panic!("[ORCHESTRATOR] server never became ready");
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    let clients: Vec<_> = (0..CLIENTS)
        .map(|id| {
            Process::new(&exe)
                .arg("--exact")
                .arg(TEST_NAME)
                .env(ENV_ROLE, ROLE_CLIENT)
                .env(ENV_SESSION, &session)
                .env(ENV_CLIENT_ID, id.to_string())
                .env(ENV_SERVER_PID, server.id().to_string())
                .stderr(Stdio::inherit())
                .spawn()
                .expect("Failed to spawn client process")
        })
        .collect();

    let client_status: Vec<_> = clients
        .into_iter()
        .map(|mut c| c.wait().expect("Failed to wait for client"))
        .collect();
    let server_status = server.wait().expect("Failed to wait for server");

    let _ = std::fs::remove_file(&ready);
    let leftover = cfg.region_path().exists();
    let _ = Session::purge(&cfg);

    for status in &client_status {
        assert!(status.success(), "Client process failed with status: {status}");
    }
    assert!(
        server_status.success(),
        "Server process failed with status: {server_status}"
    );
    assert!(!leftover, "last session out must remove the region");

    log!("[ORCHESTRATOR] passed");
    log!("{}", "=".repeat(70));
}

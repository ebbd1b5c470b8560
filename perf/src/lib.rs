use lilypad_config::SessionConfig;
use lilypad_events::{Entity, EntityKind, Facing, GameState, MAX_ENTITIES, Snapshot};
use lilypad_icc::Session;

/// Session in the temp dir, unique per bench label and process, with any
/// leftovers of a previous run removed.
pub fn temp_session_config(label: &str, tick_ms: u64) -> SessionConfig {
    let pid = std::process::id();
    let cfg = SessionConfig {
        shm_dir: std::env::temp_dir(),
        tick_ms,
        ..SessionConfig::default()
    }
    .with_session(format!("lp_bench_{label}_{pid}"));
    Session::purge(&cfg).expect("failed to purge bench session");
    cfg
}

/// A full board: every entity slot in use.
pub fn make_test_snapshot() -> Snapshot {
    let mut snap = Snapshot {
        state: GameState::Running,
        time: 90,
        level: 3,
        width: 40,
        height: 16,
        ..Snapshot::default()
    };
    for i in 0..MAX_ENTITIES as i32 {
        snap.push_entity(Entity {
            kind: if i == 0 { EntityKind::Frog } else { EntityKind::Car },
            facing: if i % 2 == 0 { Facing::Left } else { Facing::Right },
            x: i % 40,
            y: i / 40,
        });
    }
    snap
}

pub fn section_header(title: &str) {
    println!();
    println!("── {title} {}", "─".repeat(60usize.saturating_sub(title.len())));
}

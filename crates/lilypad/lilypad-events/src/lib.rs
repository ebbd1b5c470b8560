pub mod command;
pub mod snapshot;

pub use command::{
    BROADCAST_PID, Command, CommandBody, CommandInfo, CommandKind, CommandResult, SERVER_PID,
    Target,
};
pub use snapshot::{Entity, EntityKind, Facing, GameState, MAX_ENTITIES, Snapshot};

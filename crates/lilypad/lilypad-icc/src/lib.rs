mod broadcast;
mod command;
mod context;
mod error;
mod protocol;
mod region;
mod ring;
mod session;
mod shm_layout;

pub use context::{CommandHandler, DataHandler};
pub use error::IccError;
pub use protocol::ProtocolExit;
pub use session::Session;
pub use shm_layout::{COMMAND_CAPACITY, MAX_INSTANCES};

pub use lilypad_config::SessionConfig;
pub use lilypad_events::{
    Command, CommandBody, CommandInfo, CommandKind, CommandResult, Snapshot, Target,
};

#![forbid(unsafe_code)]

// Commands travel through the shared ring by value. Addressing uses the
// raw pid convention on the wire (-1 everyone, 0 the server, otherwise a
// process id); `Target` is the typed view of it.

pub const BROADCAST_PID: i32 = -1;
pub const SERVER_PID: i32 = 0;

/// Who a command is addressed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// Every attached process.
    Broadcast,
    /// The process that created the session.
    Server,
    /// Exactly the process with this id.
    Process(i32),
}

impl Target {
    pub fn from_pid(pid: i32) -> Self {
        match pid {
            BROADCAST_PID => Target::Broadcast,
            SERVER_PID => Target::Server,
            pid => Target::Process(pid),
        }
    }

    pub fn pid(self) -> i32 {
        match self {
            Target::Broadcast => BROADCAST_PID,
            Target::Server => SERVER_PID,
            Target::Process(pid) => pid,
        }
    }
}

/// A request issued by the operator against a lane or a cell.
#[repr(C, u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandInfo {
    /// Stop all cars on a lane.
    Freeze { road: i32 },
    /// Reverse the direction of a lane.
    Invert { road: i32 },
    /// Drop an obstacle on a cell.
    Rock { x: i32, y: i32 },
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CommandResult {
    pub status: bool,
}

#[repr(C, u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBody {
    Info(CommandInfo),
    Result(CommandResult),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Info,
    Result,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Command {
    pub sender_pid: i32,
    pub target_pid: i32,
    pub body: CommandBody,
}

impl Command {
    pub fn info(sender_pid: i32, target: Target, info: CommandInfo) -> Self {
        Self {
            sender_pid,
            target_pid: target.pid(),
            body: CommandBody::Info(info),
        }
    }

    pub fn result(sender_pid: i32, target: Target, result: CommandResult) -> Self {
        Self {
            sender_pid,
            target_pid: target.pid(),
            body: CommandBody::Result(result),
        }
    }

    pub fn target(&self) -> Target {
        Target::from_pid(self.target_pid)
    }

    pub fn kind(&self) -> CommandKind {
        match self.body {
            CommandBody::Info(_) => CommandKind::Info,
            CommandBody::Result(_) => CommandKind::Result,
        }
    }

    pub fn as_info(&self) -> Option<CommandInfo> {
        match self.body {
            CommandBody::Info(info) => Some(info),
            CommandBody::Result(_) => None,
        }
    }

    pub fn as_result(&self) -> Option<CommandResult> {
        match self.body {
            CommandBody::Result(result) => Some(result),
            CommandBody::Info(_) => None,
        }
    }

    /// Builds the result that answers this command, addressed back to its
    /// sender.
    pub fn reply(&self, sender_pid: i32, status: bool) -> Self {
        Self::result(
            sender_pid,
            Target::from_pid(self.sender_pid),
            CommandResult { status },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn target_follows_pid_convention() {
        assert_eq!(Target::from_pid(-1), Target::Broadcast);
        assert_eq!(Target::from_pid(0), Target::Server);
        assert_eq!(Target::from_pid(4242), Target::Process(4242));
        assert_eq!(Target::Process(7).pid(), 7);
        assert_eq!(Target::Server.pid(), SERVER_PID);
    }

    #[test]
    fn reply_goes_back_to_sender() {
        let cmd = Command::info(321, Target::Server, CommandInfo::Freeze { road: 3 });
        assert_eq!(cmd.kind(), CommandKind::Info);

        let reply = cmd.reply(100, true);
        assert_eq!(reply.target(), Target::Process(321));
        assert_eq!(reply.sender_pid, 100);
        assert_eq!(reply.kind(), CommandKind::Result);
        assert_eq!(reply.body, CommandBody::Result(CommandResult { status: true }));
        assert_eq!(reply.as_result(), Some(CommandResult { status: true }));
        assert_eq!(reply.as_info(), None);
    }

    #[test]
    fn command_is_small_pod() {
        // two pids + body tag + info tag + two coordinates
        assert_eq!(size_of::<Command>(), 24);
    }
}

use lilypad_config::ConfigError;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum IccError {
    #[error("invalid session config")]
    Config(#[from] ConfigError),

    #[error("failed to map region '{path}'")]
    Region {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("gave up after {waited_ms} ms waiting for the creator of '{path}' (stale session? purge it)")]
    AttachTimeout { path: String, waited_ms: u64 },

    #[error("region layout mismatch: {0}")]
    Layout(&'static str),

    #[error("failed to acquire {what} '{name}'")]
    Acquire {
        what: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("all {0} instance slots are taken")]
    InstanceTableFull(usize),

    #[error("failed to spawn protocol thread")]
    Spawn(#[source] io::Error),

    #[error("wait on '{name}' failed")]
    Wait {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to signal '{name}'")]
    Signal {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove '{name}'")]
    Unlink {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl IccError {
    pub(crate) fn wait(name: &str, source: io::Error) -> Self {
        IccError::Wait {
            name: name.to_string(),
            source,
        }
    }

    pub(crate) fn signal(name: &str, source: io::Error) -> Self {
        IccError::Signal {
            name: name.to_string(),
            source,
        }
    }
}

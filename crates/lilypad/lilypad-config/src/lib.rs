use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings every process of a session must agree on (`session`, `shm_dir`)
/// plus per-process tuning.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Common identifier of every named object of the session.
    #[serde(default = "defaults::session")]
    pub session: String,
    /// Directory holding the region and the broadcast event files.
    #[serde(default = "defaults::shm_dir")]
    pub shm_dir: PathBuf,
    /// Protocol thread polling interval.
    #[serde(default = "defaults::tick_ms")]
    pub tick_ms: u64,
    /// How long an attaching process waits for the creator to publish the
    /// region header.
    #[serde(default = "defaults::attach_timeout_ms")]
    pub attach_timeout_ms: u64,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid session name '{0}': use 1-24 characters from [A-Za-z0-9_-]")]
    SessionName(String),

    #[error("tick_ms must be greater than zero")]
    ZeroTick,
}

mod defaults {
    use std::path::PathBuf;

    pub fn session() -> String {
        "crr".into()
    }

    pub fn shm_dir() -> PathBuf {
        "/dev/shm".into()
    }

    pub fn tick_ms() -> u64 {
        100
    }

    pub fn attach_timeout_ms() -> u64 {
        2_000
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

/// Longest session name accepted. Semaphore and file names are derived from
/// it by appending a role suffix.
pub const MAX_SESSION_LEN: usize = 24;

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session: defaults::session(),
            shm_dir: defaults::shm_dir(),
            tick_ms: defaults::tick_ms(),
            attach_timeout_ms: defaults::attach_timeout_ms(),
            log_level: defaults::log_level(),
        }
    }
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&toml_to_str)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Same settings under another session name.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = session.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let name_ok = !self.session.is_empty()
            && self.session.len() <= MAX_SESSION_LEN
            && self
                .session
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !name_ok {
            return Err(ConfigError::SessionName(self.session.clone()));
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    pub fn region_path(&self) -> PathBuf {
        self.shm_dir.join(format!("{}.region", self.session))
    }

    pub fn broadcast_event_path(&self) -> PathBuf {
        self.shm_dir.join(format!("{}.broadcast", self.session))
    }

    /// Name of one of the session's named semaphores, e.g. `crr.data`.
    pub fn semaphore_name(&self, role: &str) -> String {
        format!("{}.{role}", self.session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = SessionConfig::from_toml("").unwrap();
        assert_eq!(cfg, SessionConfig::default());
        assert_eq!(cfg.tick(), Duration::from_millis(100));
        assert_eq!(cfg.region_path(), PathBuf::from("/dev/shm/crr.region"));
        assert_eq!(cfg.semaphore_name("read_slots"), "crr.read_slots");
    }

    #[test]
    fn overrides_are_read() {
        let cfg = SessionConfig::from_toml(
            r#"
            session = "pond-2"
            shm_dir = "/tmp"
            tick_ms = 5
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.session, "pond-2");
        assert_eq!(cfg.broadcast_event_path(), PathBuf::from("/tmp/pond-2.broadcast"));
        assert_eq!(cfg.tick_ms, 5);
        assert_eq!(cfg.attach_timeout_ms, 2_000);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn rejects_bad_session_names() {
        let long = "x".repeat(MAX_SESSION_LEN + 1);
        for bad in ["", "has/slash", "white space", long.as_str()] {
            let err = SessionConfig::default().with_session(bad).validate();
            assert!(matches!(err, Err(ConfigError::SessionName(_))), "{bad:?}");
        }
    }

    #[test]
    fn rejects_zero_tick() {
        let err = SessionConfig::from_toml("tick_ms = 0");
        assert!(matches!(err, Err(ConfigError::ZeroTick)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = SessionConfig::load("/nonexistent/lilypad.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/lilypad.toml"));
    }
}

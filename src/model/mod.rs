use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle of the link to the remote engine. Exactly one value at a time;
/// `Reconnecting` is only entered through a retry with remembered params.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl ConnectionParams {
    /// Same bound the engine enforces server-side, so a bad port is rejected
    /// before a round-trip: registered range only, nothing below 1024.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.host.trim().is_empty() {
            return Err("host must not be empty");
        }
        if self.port < 1024 {
            return Err("port must be outside the system-reserved range (>= 1024)");
        }
        if self.port > 49151 {
            return Err("port must be within the registered range (<= 49151)");
        }
        Ok(())
    }
}

/// Last-known full status of the remote engine. Owned by the synchronization
/// layer: polls replace it wholesale, push events merge only their own slice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub streaming: bool,
    pub stream_started_at: Option<u64>,
    pub recording: bool,
    pub record_started_at: Option<u64>,
    pub current_scene: Option<String>,
    pub active_fps: f32,
    pub total_frames: u64,
    pub dropped_frames: u64,
    pub bitrate_kbps: u32,
    pub engine_version: String,
    pub protocol_version: String,
}

/// Shared severity vocabulary for alerts and capability advisories,
/// highest urgency first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
    Tips,
}

impl Severity {
    /// Ascending sort key: critical orders before everything else.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::Warning => 1,
            Severity::Info => 2,
            Severity::Tips => 3,
        }
    }

    /// Critical and warning alerts stay until the operator dismisses them.
    pub fn auto_expires(self) -> bool {
        matches!(self, Severity::Info | Severity::Tips)
    }

    pub fn visible_while_live(self) -> bool {
        matches!(self, Severity::Critical | Severity::Warning)
    }
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

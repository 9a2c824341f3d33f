pub mod obs;

use crate::model::{ConnectionParams, StatusSnapshot};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Out-of-band notification from the engine, decoded once at the RPC
/// boundary into a closed set of kinds. Each kind carries only the slice of
/// status it is authoritative for.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ConnectionChanged {
        connected: bool,
    },
    StreamingChanged {
        active: bool,
        started_at: Option<u64>,
    },
    RecordingChanged {
        active: bool,
        started_at: Option<u64>,
    },
    SceneChanged {
        name: String,
    },
    StatusUpdate(StatusSnapshot),
    Fault {
        message: String,
        recoverable: bool,
    },
}

#[derive(Debug)]
pub enum EngineError {
    Config(&'static str),
    Connect(String),
    Request(String),
    Closed,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Connect(err) => write!(f, "connect failed: {err}"),
            Self::Request(err) => write!(f, "request failed: {err}"),
            Self::Closed => write!(f, "no active engine session"),
        }
    }
}

impl std::error::Error for EngineError {}

/// A live session with the engine. Commands return typed failures; the
/// event feed is established once per session.
#[async_trait]
pub trait EngineRpc: Send + Sync {
    async fn fetch_status(&self) -> Result<StatusSnapshot, EngineError>;
    async fn fetch_scenes(&self) -> Result<Vec<String>, EngineError>;
    async fn set_scene(&self, name: &str) -> Result<(), EngineError>;
    async fn start_stream(&self) -> Result<(), EngineError>;
    async fn stop_stream(&self) -> Result<(), EngineError>;
    async fn start_record(&self) -> Result<(), EngineError>;
    async fn stop_record(&self) -> Result<(), EngineError>;
    async fn subscribe_events(&self) -> Result<mpsc::Receiver<EngineEvent>, EngineError>;
    async fn disconnect(&self) -> Result<(), EngineError>;
}

/// Dials the engine. Injected into the session layer so tests can
/// substitute a fake.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn EngineRpc>, EngineError>;
}

use crate::model::{now_unix_ms, ConnectionParams, StatusSnapshot};
use crate::rpc::{EngineConnector, EngineError, EngineEvent, EngineRpc};
use async_trait::async_trait;
use futures::StreamExt;
use obws::Client as ObsClient;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, Mutex};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Dials an OBS WebSocket endpoint and wraps the session behind the
/// engine RPC traits.
#[derive(Debug, Default)]
pub struct ObsConnector;

#[async_trait]
impl EngineConnector for ObsConnector {
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn EngineRpc>, EngineError> {
        tracing::debug!(
            host = %params.host,
            port = params.port,
            auth = params.password.is_some(),
            "connecting to engine"
        );
        let client = ObsClient::connect(params.host.clone(), params.port, params.password.clone())
            .await
            .map_err(|err| EngineError::Connect(err.to_string()))?;

        let version = client
            .general()
            .version()
            .await
            .map_err(|err| EngineError::Connect(err.to_string()))?;
        tracing::info!(
            host = %params.host,
            port = params.port,
            engine = %version.obs_version,
            "engine session established"
        );

        Ok(Arc::new(ObsEngine {
            client: Mutex::new(Some(client)),
            engine_version: version.obs_version.to_string(),
            protocol_version: version.obs_web_socket_version.to_string(),
            record_started_at: StdMutex::new(None),
        }))
    }
}

pub struct ObsEngine {
    client: Mutex<Option<ObsClient>>,
    engine_version: String,
    protocol_version: String,
    // The status RPC does not report when recording began, so the
    // transition is stamped here and held while recording stays active.
    record_started_at: StdMutex<Option<u64>>,
}

impl ObsEngine {
    fn track_record_start(&self, active: bool) -> Option<u64> {
        let mut started = self.record_started_at.lock().unwrap();
        if active {
            if started.is_none() {
                *started = Some(now_unix_ms());
            }
        } else {
            *started = None;
        }
        *started
    }
}

fn request_err(err: obws::error::Error) -> EngineError {
    EngineError::Request(err.to_string())
}

#[async_trait]
impl EngineRpc for ObsEngine {
    async fn fetch_status(&self) -> Result<StatusSnapshot, EngineError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(EngineError::Closed)?;

        let stream = client.streaming().status().await.map_err(request_err)?;
        let record = client.recording().status().await.map_err(request_err)?;
        let stats = client.general().stats().await.map_err(request_err)?;
        let scene = client
            .scenes()
            .current_program_scene()
            .await
            .map_err(request_err)?;

        let duration_ms = stream.duration.whole_milliseconds().max(0) as u64;
        let duration_secs = duration_ms as f32 / 1000.0;
        let bitrate_kbps = if duration_secs > 0.0 {
            ((stream.bytes as f32 * 8.0) / duration_secs / 1000.0).round() as u32
        } else {
            0
        };
        let stream_started_at = stream
            .active
            .then(|| now_unix_ms().saturating_sub(duration_ms));
        let record_started_at = self.track_record_start(record.active);

        Ok(StatusSnapshot {
            connected: true,
            streaming: stream.active,
            stream_started_at,
            recording: record.active,
            record_started_at,
            current_scene: Some(scene.id.name),
            active_fps: stats.active_fps as f32,
            total_frames: stream.total_frames as u64,
            dropped_frames: stream.skipped_frames as u64,
            bitrate_kbps,
            engine_version: self.engine_version.clone(),
            protocol_version: self.protocol_version.clone(),
        })
    }

    async fn fetch_scenes(&self) -> Result<Vec<String>, EngineError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(EngineError::Closed)?;
        let list = client.scenes().list().await.map_err(request_err)?;
        Ok(list.scenes.into_iter().map(|scene| scene.id.name).collect())
    }

    async fn set_scene(&self, name: &str) -> Result<(), EngineError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(EngineError::Closed)?;
        client
            .scenes()
            .set_current_program_scene(name)
            .await
            .map_err(request_err)
    }

    async fn start_stream(&self) -> Result<(), EngineError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(EngineError::Closed)?;
        client.streaming().start().await.map_err(request_err)
    }

    async fn stop_stream(&self) -> Result<(), EngineError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(EngineError::Closed)?;
        client.streaming().stop().await.map_err(request_err)
    }

    async fn start_record(&self) -> Result<(), EngineError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(EngineError::Closed)?;
        client.recording().start().await.map_err(request_err)
    }

    async fn stop_record(&self) -> Result<(), EngineError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(EngineError::Closed)?;
        client
            .recording()
            .stop()
            .await
            .map(|_| ())
            .map_err(request_err)
    }

    async fn subscribe_events(&self) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(EngineError::Closed)?;
        let stream = client
            .events()
            .map_err(|err| EngineError::Request(err.to_string()))?;
        drop(guard);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            futures::pin_mut!(stream);
            while let Some(event) = stream.next().await {
                if let Some(mapped) = map_event(event) {
                    if tx.send(mapped).await.is_err() {
                        return;
                    }
                }
            }
            // The stream only ends when the socket is gone.
            let _ = tx
                .send(EngineEvent::ConnectionChanged { connected: false })
                .await;
        });
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        if let Some(mut client) = self.client.lock().await.take() {
            client.disconnect().await;
        }
        Ok(())
    }
}

fn map_event(event: obws::events::Event) -> Option<EngineEvent> {
    use obws::events::Event;
    match event {
        Event::StreamStateChanged { active, .. } => Some(EngineEvent::StreamingChanged {
            active,
            started_at: active.then(now_unix_ms),
        }),
        Event::RecordStateChanged { active, .. } => Some(EngineEvent::RecordingChanged {
            active,
            started_at: active.then(now_unix_ms),
        }),
        Event::CurrentProgramSceneChanged { id } => {
            Some(EngineEvent::SceneChanged { name: id.name })
        }
        Event::ExitStarted => Some(EngineEvent::Fault {
            message: "engine is shutting down".to_string(),
            recoverable: false,
        }),
        _ => None,
    }
}

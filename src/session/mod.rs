use crate::alerts::AlertCenter;
use crate::model::{ConnectionParams, ConnectionState, Severity, StatusSnapshot};
use crate::rpc::{EngineConnector, EngineError, EngineEvent, EngineRpc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct PollIntervals {
    pub status: Duration,
    pub scenes: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            status: Duration::from_millis(1000),
            scenes: Duration::from_millis(5000),
        }
    }
}

/// Everything downstream consumers observe about the link, published
/// through a watch channel so readers never touch the internals.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkView {
    pub state: ConnectionState,
    pub snapshot: StatusSnapshot,
    pub scenes: Vec<String>,
    pub last_error: Option<String>,
    pub poll_warning: Option<String>,
}

struct LinkInner {
    client: Option<Arc<dyn EngineRpc>>,
    tasks: Option<CancellationToken>,
    last_params: Option<ConnectionParams>,
}

/// Owns the connection lifecycle and reconciles the two update channels
/// (poll loops and push events) into one authoritative view.
pub struct EngineLink {
    connector: Arc<dyn EngineConnector>,
    alerts: Arc<AlertCenter>,
    intervals: PollIntervals,
    view_tx: watch::Sender<LinkView>,
    events_tx: broadcast::Sender<EngineEvent>,
    inner: Mutex<LinkInner>,
}

impl EngineLink {
    pub fn new(
        connector: Arc<dyn EngineConnector>,
        alerts: Arc<AlertCenter>,
        intervals: PollIntervals,
    ) -> Arc<Self> {
        let (view_tx, _) = watch::channel(LinkView::default());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            connector,
            alerts,
            intervals,
            view_tx,
            events_tx,
            inner: Mutex::new(LinkInner {
                client: None,
                tasks: None,
                last_params: None,
            }),
        })
    }

    pub fn watch(&self) -> watch::Receiver<LinkView> {
        self.view_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events_tx.subscribe()
    }

    pub fn view(&self) -> LinkView {
        self.view_tx.borrow().clone()
    }

    pub fn last_params(&self) -> Option<ConnectionParams> {
        self.inner.lock().unwrap().last_params.clone()
    }

    /// Fresh operator-initiated connection. On success the params become
    /// the remembered last-known-good set and the view is populated
    /// immediately rather than waiting for the first poll tick.
    pub async fn connect(self: &Arc<Self>, params: ConnectionParams) -> Result<(), EngineError> {
        params.validate().map_err(EngineError::Config)?;
        self.begin_attempt(ConnectionState::Connecting)?;
        self.establish(params).await
    }

    /// Retry with the remembered params, passing through `Reconnecting`
    /// instead of `Connecting`. Nothing schedules this automatically.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), EngineError> {
        let params = self
            .inner
            .lock()
            .unwrap()
            .last_params
            .clone()
            .ok_or(EngineError::Config("no previous connection to retry"))?;
        self.begin_attempt(ConnectionState::Reconnecting)?;
        self.establish(params).await
    }

    /// Idempotent: tearing down an already-disconnected link is a no-op
    /// success. Clears the snapshot and scene list (meaningless without a
    /// session) but keeps the remembered params for a later retry.
    pub async fn disconnect(&self) {
        let client = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(tasks) = inner.tasks.take() {
                tasks.cancel();
            }
            inner.client.take()
        };
        if let Some(client) = client {
            if let Err(err) = client.disconnect().await {
                tracing::debug!(error = %err, "engine session close");
            }
        }
        self.view_tx.send_modify(|view| {
            view.state = ConnectionState::Disconnected;
            view.snapshot = StatusSnapshot::default();
            view.scenes.clear();
            view.poll_warning = None;
        });
    }

    pub async fn set_scene(&self, name: &str) -> Result<(), EngineError> {
        let client = self.require_client()?;
        let result = client.set_scene(name).await;
        self.record_command("scene change", &result);
        result
    }

    pub async fn start_stream(&self) -> Result<(), EngineError> {
        let client = self.require_client()?;
        let result = client.start_stream().await;
        self.record_command("start stream", &result);
        result
    }

    pub async fn stop_stream(&self) -> Result<(), EngineError> {
        let client = self.require_client()?;
        let result = client.stop_stream().await;
        self.record_command("stop stream", &result);
        result
    }

    pub async fn start_record(&self) -> Result<(), EngineError> {
        let client = self.require_client()?;
        let result = client.start_record().await;
        self.record_command("start record", &result);
        result
    }

    pub async fn stop_record(&self) -> Result<(), EngineError> {
        let client = self.require_client()?;
        let result = client.stop_record().await;
        self.record_command("stop record", &result);
        result
    }

    fn begin_attempt(&self, attempt: ConnectionState) -> Result<(), EngineError> {
        let mut busy = false;
        self.view_tx.send_modify(|view| {
            if matches!(
                view.state,
                ConnectionState::Connecting | ConnectionState::Reconnecting
            ) {
                busy = true;
            } else {
                view.state = attempt;
                view.last_error = None;
            }
        });
        if busy {
            return Err(EngineError::Config("connection attempt already in progress"));
        }
        Ok(())
    }

    async fn establish(self: &Arc<Self>, params: ConnectionParams) -> Result<(), EngineError> {
        let client = match self.connector.connect(&params).await {
            Ok(client) => client,
            Err(err) => {
                let message = err.to_string();
                self.view_tx.send_modify(|view| {
                    view.state = ConnectionState::Error;
                    view.last_error = Some(message.clone());
                });
                self.alerts
                    .add(Severity::Critical, "Connection failed", &message);
                return Err(err);
            }
        };

        let token = CancellationToken::new();
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(old) = inner.tasks.take() {
                old.cancel();
            }
            inner.client = Some(client.clone());
            inner.last_params = Some(params);
            inner.tasks = Some(token.clone());
        }
        self.view_tx.send_modify(|view| {
            view.state = ConnectionState::Connected;
            view.last_error = None;
        });

        // Populate the view right away so the operator is not staring at an
        // empty panel until the first tick.
        self.poll_status_once(client.as_ref(), &token).await;
        self.poll_scenes_once(client.as_ref(), &token).await;

        match client.subscribe_events().await {
            Ok(events) => {
                if token.is_cancelled() {
                    // Owner tore the link down while the subscription was
                    // being established; discard the handle instead of
                    // leaking a listener with no owner.
                    drop(events);
                    return Ok(());
                }
                tokio::spawn(Arc::clone(self).run_event_pump(events, token.clone()));
            }
            Err(err) => {
                tracing::warn!(error = %err, "event subscription failed, relying on polls");
                self.view_tx.send_modify(|view| {
                    view.poll_warning = Some(format!("event subscription failed: {err}"));
                });
            }
        }

        if !token.is_cancelled() {
            tokio::spawn(Arc::clone(self).run_status_poll(client.clone(), token.child_token()));
            tokio::spawn(Arc::clone(self).run_scene_poll(client, token.child_token()));
        }
        Ok(())
    }

    fn require_client(&self) -> Result<Arc<dyn EngineRpc>, EngineError> {
        self.inner
            .lock()
            .unwrap()
            .client
            .clone()
            .ok_or(EngineError::Closed)
    }

    fn record_command(&self, action: &str, result: &Result<(), EngineError>) {
        if let Err(err) = result {
            tracing::warn!(error = %err, action, "engine command failed");
            self.alerts.add(
                Severity::Warning,
                "Command failed",
                &format!("{action}: {err}"),
            );
        }
    }

    async fn run_status_poll(
        self: Arc<Self>,
        client: Arc<dyn EngineRpc>,
        token: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.intervals.status);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.poll_status_once(client.as_ref(), &token).await,
            }
        }
    }

    async fn run_scene_poll(self: Arc<Self>, client: Arc<dyn EngineRpc>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.intervals.scenes);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.poll_scenes_once(client.as_ref(), &token).await,
            }
        }
    }

    async fn run_event_pump(
        self: Arc<Self>,
        mut events: mpsc::Receiver<EngineEvent>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                received = events.recv() => match received {
                    Some(event) => self.apply_event(event),
                    None => break,
                },
            }
        }
    }

    /// One status fetch. A failure is recorded as a warning and never moves
    /// the connection state: transient timeouts must not interrupt the
    /// operator's session. State is adjusted only from the content of a
    /// successful response.
    async fn poll_status_once(&self, client: &dyn EngineRpc, token: &CancellationToken) {
        let result = client.fetch_status().await;
        if token.is_cancelled() {
            return;
        }
        match result {
            Ok(snapshot) => self.apply_status(snapshot),
            Err(err) => {
                tracing::warn!(error = %err, "status poll failed");
                self.view_tx.send_modify(|view| {
                    view.poll_warning = Some(format!("status poll failed: {err}"));
                });
            }
        }
    }

    /// Scene fetches fail to an explicitly empty list: stale scene names
    /// would let the operator switch to something that no longer exists.
    async fn poll_scenes_once(&self, client: &dyn EngineRpc, token: &CancellationToken) {
        let result = client.fetch_scenes().await;
        if token.is_cancelled() {
            return;
        }
        match result {
            Ok(scenes) => self.view_tx.send_modify(|view| view.scenes = scenes),
            Err(err) => {
                tracing::warn!(error = %err, "scene list poll failed");
                self.view_tx.send_modify(|view| {
                    view.scenes.clear();
                    view.poll_warning = Some(format!("scene list poll failed: {err}"));
                });
            }
        }
    }

    /// Wholesale snapshot replacement; clears any standing poll warning and
    /// passively follows the engine's own connectivity report, so a session
    /// re-established outside this client is picked up without an explicit
    /// connect call.
    fn apply_status(&self, snapshot: StatusSnapshot) {
        self.view_tx.send_modify(|view| {
            view.poll_warning = None;
            let connected = snapshot.connected;
            view.snapshot = snapshot;
            match (connected, view.state) {
                (false, ConnectionState::Connected) => {
                    view.state = ConnectionState::Disconnected;
                }
                (true, ConnectionState::Disconnected) => {
                    view.state = ConnectionState::Connected;
                }
                _ => {}
            }
        });
    }

    /// Push events merge only the slice they are authoritative for; an
    /// unrecoverable fault forces the error state without waiting for the
    /// poll loop to notice.
    fn apply_event(&self, event: EngineEvent) {
        match &event {
            EngineEvent::ConnectionChanged { connected } => {
                self.view_tx.send_modify(|view| {
                    view.snapshot.connected = *connected;
                    match (*connected, view.state) {
                        (false, ConnectionState::Connected) => {
                            view.state = ConnectionState::Disconnected;
                        }
                        (true, ConnectionState::Disconnected) => {
                            view.state = ConnectionState::Connected;
                        }
                        _ => {}
                    }
                });
            }
            EngineEvent::StreamingChanged { active, started_at } => {
                self.view_tx.send_modify(|view| {
                    view.snapshot.streaming = *active;
                    view.snapshot.stream_started_at = *started_at;
                });
            }
            EngineEvent::RecordingChanged { active, started_at } => {
                self.view_tx.send_modify(|view| {
                    view.snapshot.recording = *active;
                    view.snapshot.record_started_at = *started_at;
                });
            }
            EngineEvent::SceneChanged { name } => {
                self.view_tx.send_modify(|view| {
                    view.snapshot.current_scene = Some(name.clone());
                });
            }
            EngineEvent::StatusUpdate(snapshot) => self.apply_status(snapshot.clone()),
            EngineEvent::Fault {
                message,
                recoverable,
            } => {
                if *recoverable {
                    tracing::warn!(message = %message, "engine reported a recoverable fault");
                    self.view_tx.send_modify(|view| {
                        view.poll_warning = Some(message.clone());
                    });
                } else {
                    tracing::error!(message = %message, "engine reported an unrecoverable fault");
                    self.view_tx.send_modify(|view| {
                        view.state = ConnectionState::Error;
                        view.last_error = Some(message.clone());
                    });
                    self.alerts.add(Severity::Critical, "Engine error", message);
                }
            }
        }
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;
    use tokio::time::sleep;

    const TEST_INTERVALS: PollIntervals = PollIntervals {
        status: Duration::from_millis(20),
        scenes: Duration::from_millis(60),
    };

    fn connected_snapshot() -> StatusSnapshot {
        StatusSnapshot {
            connected: true,
            current_scene: Some("Main".to_string()),
            engine_version: "30.0.0".to_string(),
            protocol_version: "5.3.0".to_string(),
            ..Default::default()
        }
    }

    fn params() -> ConnectionParams {
        ConnectionParams {
            host: "127.0.0.1".to_string(),
            port: 4455,
            password: None,
        }
    }

    struct FakeEngine {
        status: Mutex<Result<StatusSnapshot, String>>,
        scenes: Mutex<Result<Vec<String>, String>>,
        fail_commands: AtomicBool,
        commands: Mutex<Vec<String>>,
        events: Mutex<Option<mpsc::Receiver<EngineEvent>>>,
        subscribe_gate: Mutex<Option<Arc<Notify>>>,
    }

    impl FakeEngine {
        fn new() -> (Arc<Self>, mpsc::Sender<EngineEvent>) {
            let (tx, rx) = mpsc::channel(16);
            let engine = Arc::new(Self {
                status: Mutex::new(Ok(connected_snapshot())),
                scenes: Mutex::new(Ok(vec!["Main".to_string(), "Break".to_string()])),
                fail_commands: AtomicBool::new(false),
                commands: Mutex::new(Vec::new()),
                events: Mutex::new(Some(rx)),
                subscribe_gate: Mutex::new(None),
            });
            (engine, tx)
        }

        fn set_status(&self, status: Result<StatusSnapshot, String>) {
            *self.status.lock().unwrap() = status;
        }

        fn set_scenes(&self, scenes: Result<Vec<String>, String>) {
            *self.scenes.lock().unwrap() = scenes;
        }

        fn gate_subscribe(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            *self.subscribe_gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        fn record(&self, command: &str) -> Result<(), EngineError> {
            self.commands.lock().unwrap().push(command.to_string());
            if self.fail_commands.load(Ordering::SeqCst) {
                Err(EngineError::Request("engine refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl EngineRpc for FakeEngine {
        async fn fetch_status(&self) -> Result<StatusSnapshot, EngineError> {
            self.status
                .lock()
                .unwrap()
                .clone()
                .map_err(EngineError::Request)
        }

        async fn fetch_scenes(&self) -> Result<Vec<String>, EngineError> {
            self.scenes
                .lock()
                .unwrap()
                .clone()
                .map_err(EngineError::Request)
        }

        async fn set_scene(&self, _name: &str) -> Result<(), EngineError> {
            self.record("set_scene")
        }

        async fn start_stream(&self) -> Result<(), EngineError> {
            self.record("start_stream")
        }

        async fn stop_stream(&self) -> Result<(), EngineError> {
            self.record("stop_stream")
        }

        async fn start_record(&self) -> Result<(), EngineError> {
            self.record("start_record")
        }

        async fn stop_record(&self) -> Result<(), EngineError> {
            self.record("stop_record")
        }

        async fn subscribe_events(&self) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
            let gate = self.subscribe_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            match self.events.lock().unwrap().take() {
                Some(rx) => Ok(rx),
                None => {
                    // later sessions against the same fake get a feed that
                    // immediately ends
                    let (_, rx) = mpsc::channel(1);
                    Ok(rx)
                }
            }
        }

        async fn disconnect(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct FakeConnector {
        engine: Arc<FakeEngine>,
        fail: Mutex<Option<String>>,
        seen: Mutex<Vec<ConnectionParams>>,
        gate: Mutex<Option<Arc<Notify>>>,
    }

    impl FakeConnector {
        fn new(engine: Arc<FakeEngine>) -> Arc<Self> {
            Arc::new(Self {
                engine,
                fail: Mutex::new(None),
                seen: Mutex::new(Vec::new()),
                gate: Mutex::new(None),
            })
        }

        fn fail_next(&self, message: &str) {
            *self.fail.lock().unwrap() = Some(message.to_string());
        }

        fn gate(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            *self.gate.lock().unwrap() = Some(gate.clone());
            gate
        }
    }

    #[async_trait]
    impl EngineConnector for FakeConnector {
        async fn connect(
            &self,
            params: &ConnectionParams,
        ) -> Result<Arc<dyn EngineRpc>, EngineError> {
            self.seen.lock().unwrap().push(params.clone());
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if let Some(message) = self.fail.lock().unwrap().take() {
                return Err(EngineError::Connect(message));
            }
            Ok(self.engine.clone())
        }
    }

    fn link_with(connector: Arc<FakeConnector>) -> (Arc<EngineLink>, Arc<AlertCenter>) {
        let alerts = Arc::new(AlertCenter::new());
        let link = EngineLink::new(connector, alerts.clone(), TEST_INTERVALS);
        (link, alerts)
    }

    #[tokio::test]
    async fn connect_populates_view_immediately() {
        let (engine, _events) = FakeEngine::new();
        let (link, _alerts) = link_with(FakeConnector::new(engine));

        link.connect(params()).await.unwrap();

        let view = link.view();
        assert_eq!(view.state, ConnectionState::Connected);
        assert!(view.snapshot.connected);
        assert_eq!(view.snapshot.current_scene.as_deref(), Some("Main"));
        assert_eq!(view.scenes, vec!["Main", "Break"]);
        assert_eq!(link.last_params(), Some(params()));
    }

    #[tokio::test]
    async fn connect_failure_sets_error_state_and_propagates() {
        let (engine, _events) = FakeEngine::new();
        let connector = FakeConnector::new(engine);
        connector.fail_next("authentication failed");
        let (link, alerts) = link_with(connector);

        let err = link.connect(params()).await.unwrap_err();
        assert!(matches!(err, EngineError::Connect(_)));

        let view = link.view();
        assert_eq!(view.state, ConnectionState::Error);
        assert!(view
            .last_error
            .as_deref()
            .unwrap()
            .contains("authentication failed"));
        assert_eq!(alerts.active().len(), 1);
        assert_eq!(alerts.active()[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn connect_rejects_reserved_ports_without_dialing() {
        let (engine, _events) = FakeEngine::new();
        let connector = FakeConnector::new(engine);
        let (link, _alerts) = link_with(connector.clone());

        let bad = ConnectionParams {
            port: 80,
            ..params()
        };
        let err = link.connect(bad).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert_eq!(link.view().state, ConnectionState::Disconnected);
        assert!(connector.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disconnect_clears_view_but_keeps_params_and_is_idempotent() {
        let (engine, _events) = FakeEngine::new();
        let (link, _alerts) = link_with(FakeConnector::new(engine));

        link.connect(params()).await.unwrap();
        link.disconnect().await;
        link.disconnect().await;

        let view = link.view();
        assert_eq!(view.state, ConnectionState::Disconnected);
        assert_eq!(view.snapshot, StatusSnapshot::default());
        assert!(view.scenes.is_empty());
        assert_eq!(link.last_params(), Some(params()));
    }

    #[tokio::test]
    async fn failed_status_poll_keeps_connected_state_and_warns() {
        let (engine, _events) = FakeEngine::new();
        let (link, _alerts) = link_with(FakeConnector::new(engine.clone()));

        link.connect(params()).await.unwrap();
        engine.set_status(Err("timeout".to_string()));
        sleep(Duration::from_millis(80)).await;

        let view = link.view();
        assert_eq!(view.state, ConnectionState::Connected);
        assert!(view.poll_warning.as_deref().unwrap().contains("timeout"));

        // the next successful poll clears the standing warning
        engine.set_status(Ok(connected_snapshot()));
        sleep(Duration::from_millis(60)).await;
        assert!(link.view().poll_warning.is_none());
        assert_eq!(link.view().state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn poll_content_demotes_and_promotes_connection_state() {
        let (engine, _events) = FakeEngine::new();
        let (link, _alerts) = link_with(FakeConnector::new(engine.clone()));

        link.connect(params()).await.unwrap();

        let mut lost = connected_snapshot();
        lost.connected = false;
        engine.set_status(Ok(lost));
        sleep(Duration::from_millis(60)).await;
        assert_eq!(link.view().state, ConnectionState::Disconnected);

        // an externally re-established session is picked up passively
        engine.set_status(Ok(connected_snapshot()));
        sleep(Duration::from_millis(60)).await;
        assert_eq!(link.view().state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn failed_scene_poll_clears_the_list() {
        let (engine, _events) = FakeEngine::new();
        let (link, _alerts) = link_with(FakeConnector::new(engine.clone()));

        link.connect(params()).await.unwrap();
        assert!(!link.view().scenes.is_empty());

        engine.set_scenes(Err("scene fetch failed".to_string()));
        sleep(Duration::from_millis(150)).await;

        let view = link.view();
        assert!(view.scenes.is_empty());
        assert_eq!(view.state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn push_events_merge_only_their_slice() {
        let (engine, events) = FakeEngine::new();
        let (link, _alerts) = link_with(FakeConnector::new(engine.clone()));

        link.connect(params()).await.unwrap();
        // stop the poll loop from overwriting the pushed slice mid-assert
        engine.set_status(Err("hold".to_string()));

        events
            .send(EngineEvent::StreamingChanged {
                active: true,
                started_at: Some(1_700_000_000_000),
            })
            .await
            .unwrap();
        sleep(Duration::from_millis(40)).await;

        let view = link.view();
        assert!(view.snapshot.streaming);
        assert_eq!(view.snapshot.stream_started_at, Some(1_700_000_000_000));
        // untouched slices keep their polled values
        assert_eq!(view.snapshot.current_scene.as_deref(), Some("Main"));
        assert!(!view.snapshot.recording);
    }

    #[tokio::test]
    async fn unrecoverable_fault_forces_error_state() {
        let (engine, events) = FakeEngine::new();
        let (link, alerts) = link_with(FakeConnector::new(engine));

        link.connect(params()).await.unwrap();
        events
            .send(EngineEvent::Fault {
                message: "output pipeline crashed".to_string(),
                recoverable: false,
            })
            .await
            .unwrap();
        sleep(Duration::from_millis(40)).await;

        let view = link.view();
        assert_eq!(view.state, ConnectionState::Error);
        assert!(view
            .last_error
            .as_deref()
            .unwrap()
            .contains("output pipeline crashed"));
        assert!(alerts
            .active()
            .iter()
            .any(|alert| alert.severity == Severity::Critical));
    }

    #[tokio::test]
    async fn recoverable_fault_is_only_a_warning() {
        let (engine, events) = FakeEngine::new();
        let (link, _alerts) = link_with(FakeConnector::new(engine.clone()));

        link.connect(params()).await.unwrap();
        engine.set_status(Err("hold".to_string()));
        events
            .send(EngineEvent::Fault {
                message: "encoder hiccup".to_string(),
                recoverable: true,
            })
            .await
            .unwrap();
        sleep(Duration::from_millis(40)).await;

        let view = link.view();
        assert_eq!(view.state, ConnectionState::Connected);
        assert!(view.poll_warning.as_deref().unwrap().contains("encoder"));
    }

    #[tokio::test]
    async fn command_failure_propagates_and_records_an_alert() {
        let (engine, _events) = FakeEngine::new();
        let (link, alerts) = link_with(FakeConnector::new(engine.clone()));

        link.connect(params()).await.unwrap();
        engine.fail_commands.store(true, Ordering::SeqCst);

        let err = link.set_scene("Break").await.unwrap_err();
        assert!(matches!(err, EngineError::Request(_)));
        assert!(alerts
            .active()
            .iter()
            .any(|alert| alert.severity == Severity::Warning));
        // the command made it to the engine and the session survived
        assert!(engine
            .commands
            .lock()
            .unwrap()
            .contains(&"set_scene".to_string()));
        assert_eq!(link.view().state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn commands_without_a_session_fail_closed() {
        let (engine, _events) = FakeEngine::new();
        let (link, _alerts) = link_with(FakeConnector::new(engine));
        let err = link.start_stream().await.unwrap_err();
        assert!(matches!(err, EngineError::Closed));
    }

    #[tokio::test]
    async fn reconnect_uses_remembered_params_and_passes_through_reconnecting() {
        let (engine, _events) = FakeEngine::new();
        let connector = FakeConnector::new(engine);
        let (link, _alerts) = link_with(connector.clone());

        link.connect(params()).await.unwrap();
        link.disconnect().await;

        let gate = connector.gate();
        let retry = {
            let link = link.clone();
            tokio::spawn(async move { link.reconnect().await })
        };
        sleep(Duration::from_millis(20)).await;
        assert_eq!(link.view().state, ConnectionState::Reconnecting);

        gate.notify_one();
        retry.await.unwrap().unwrap();
        assert_eq!(link.view().state, ConnectionState::Connected);

        let seen = connector.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn reconnect_without_history_is_rejected() {
        let (engine, _events) = FakeEngine::new();
        let (link, _alerts) = link_with(FakeConnector::new(engine));
        let err = link.reconnect().await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn concurrent_connect_attempts_are_rejected() {
        let (engine, _events) = FakeEngine::new();
        let connector = FakeConnector::new(engine);
        let (link, _alerts) = link_with(connector.clone());

        let gate = connector.gate();
        let first = {
            let link = link.clone();
            tokio::spawn(async move { link.connect(params()).await })
        };
        sleep(Duration::from_millis(20)).await;

        let err = link.connect(params()).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(link.view().state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn subscription_resolving_after_teardown_is_discarded() {
        let (engine, events) = FakeEngine::new();
        let connector = FakeConnector::new(engine.clone());
        let (link, _alerts) = link_with(connector);

        let gate = engine.gate_subscribe();
        let attempt = {
            let link = link.clone();
            tokio::spawn(async move { link.connect(params()).await })
        };
        sleep(Duration::from_millis(20)).await;

        // owner goes away while the subscription is still being set up
        link.disconnect().await;
        gate.notify_one();
        attempt.await.unwrap().unwrap();
        sleep(Duration::from_millis(40)).await;

        // the resolved handle was dropped, not stored: pushes go nowhere
        let send = events
            .send(EngineEvent::StreamingChanged {
                active: true,
                started_at: None,
            })
            .await;
        sleep(Duration::from_millis(40)).await;
        assert!(send.is_err() || !link.view().snapshot.streaming);
        assert_eq!(link.view().state, ConnectionState::Disconnected);
    }
}

use crate::alerts::AlertCenter;
use crate::model::Severity;
use crate::rpc::EngineEvent;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type ApplyHook = Box<dyn Fn(bool) -> Result<(), String> + Send + Sync>;

/// Keeps the "do not disturb while live" flag in lock-step with the
/// engine's live/record status. Level-triggered: every status transition
/// resynchronizes the flag, so a manual override holds only until the next
/// transition from the engine.
pub struct StreamingMode {
    flag_tx: watch::Sender<bool>,
    alerts: Arc<AlertCenter>,
    apply: Option<ApplyHook>,
}

impl StreamingMode {
    pub fn new(alerts: Arc<AlertCenter>) -> Self {
        let (flag_tx, _) = watch::channel(false);
        Self {
            flag_tx,
            alerts,
            apply: None,
        }
    }

    /// Installs a hook run on every flag change. A hook failure is an error
    /// on this component only; it never touches connection state.
    pub fn with_apply(mut self, hook: ApplyHook) -> Self {
        self.apply = Some(hook);
        self
    }

    pub fn is_live(&self) -> bool {
        *self.flag_tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.flag_tx.subscribe()
    }

    /// Operator toggle. Honored until the next live-status transition.
    pub fn set_manual(&self, live: bool) {
        self.set_flag(live);
    }

    fn set_flag(&self, live: bool) {
        let changed = self.flag_tx.send_replace(live) != live;
        if !changed {
            return;
        }
        if let Some(hook) = &self.apply {
            if let Err(err) = hook(live) {
                tracing::warn!(error = %err, live, "streaming mode apply failed");
                self.alerts.add(
                    Severity::Warning,
                    "Streaming mode",
                    &format!("could not apply streaming mode change: {err}"),
                );
            }
        }
    }

    /// Follows the engine's live-status pushes until the feed closes or the
    /// token is cancelled.
    pub fn spawn_follower(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<EngineEvent>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let mode = Arc::clone(self);
        tokio::spawn(async move {
            let mut streaming = false;
            let mut recording = false;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(EngineEvent::StreamingChanged { active, .. }) => {
                            streaming = active;
                            mode.set_flag(streaming || recording);
                        }
                        Ok(EngineEvent::RecordingChanged { active, .. }) => {
                            recording = active;
                            mode.set_flag(streaming || recording);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "streaming mode follower lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}

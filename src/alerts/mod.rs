use crate::model::{now_unix_ms, Severity};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

#[cfg(not(test))]
const AUTO_DISMISS_DELAY: Duration = Duration::from_secs(5);
#[cfg(test)]
const AUTO_DISMISS_DELAY: Duration = Duration::from_millis(50);

#[cfg(not(test))]
const DISMISS_ANIMATION: Duration = Duration::from_millis(300);
#[cfg(test)]
const DISMISS_ANIMATION: Duration = Duration::from_millis(5);

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub created_at: u64,
    pub dismissed: bool,
}

#[derive(Debug, Clone)]
pub enum AlertEvent {
    Added(Alert),
    Dismissed(Alert),
}

/// Append-only notification log. Alerts are never deleted; dismissal only
/// flips a flag so a history view can show past notifications.
pub struct AlertCenter {
    inner: Mutex<Vec<Alert>>,
    events_tx: broadcast::Sender<AlertEvent>,
}

impl Default for AlertCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertCenter {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Vec::new()),
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.events_tx.subscribe()
    }

    /// Records a new alert, newest-first. Info and tips schedule their own
    /// expiry; the delay covers the dismissal animation so the transition
    /// lands after the UI has settled.
    pub fn add(self: &Arc<Self>, severity: Severity, title: &str, message: &str) -> Alert {
        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            severity,
            title: title.to_string(),
            message: message.to_string(),
            created_at: now_unix_ms(),
            dismissed: false,
        };
        self.inner.lock().unwrap().insert(0, alert.clone());
        let _ = self.events_tx.send(AlertEvent::Added(alert.clone()));

        if severity.auto_expires() {
            let center = Arc::downgrade(self);
            let id = alert.id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(AUTO_DISMISS_DELAY + DISMISS_ANIMATION).await;
                if let Some(center) = center.upgrade() {
                    center.dismiss(&id);
                }
            });
        }
        alert
    }

    /// Marks the alert dismissed. Unknown ids are ignored; the dismissal
    /// transition happens at most once, so a racing expiry timer and manual
    /// dismiss produce a single `Dismissed` event between them.
    pub fn dismiss(&self, id: &str) -> bool {
        let dismissed = {
            let mut alerts = self.inner.lock().unwrap();
            match alerts.iter_mut().find(|alert| alert.id == id) {
                Some(alert) if !alert.dismissed => {
                    alert.dismissed = true;
                    Some(alert.clone())
                }
                _ => None,
            }
        };
        match dismissed {
            Some(alert) => {
                let _ = self.events_tx.send(AlertEvent::Dismissed(alert));
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&self) {
        let cleared: Vec<Alert> = {
            let mut alerts = self.inner.lock().unwrap();
            alerts
                .iter_mut()
                .filter(|alert| !alert.dismissed)
                .map(|alert| {
                    alert.dismissed = true;
                    alert.clone()
                })
                .collect()
        };
        for alert in cleared {
            let _ = self.events_tx.send(AlertEvent::Dismissed(alert));
        }
    }

    /// Non-dismissed alerts, newest first.
    pub fn active(&self) -> Vec<Alert> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|alert| !alert.dismissed)
            .cloned()
            .collect()
    }

    /// Every alert, dismissed or not, ordered critical-first; insertion
    /// order is preserved within a severity.
    pub fn by_priority(&self) -> Vec<Alert> {
        let mut alerts = self.inner.lock().unwrap().clone();
        alerts.sort_by_key(|alert| alert.severity.rank());
        alerts
    }

    /// Active alerts as the operator should see them: while live, only
    /// critical and warning get through. Suppressed alerts stay undismissed
    /// and reappear once the live flag drops.
    pub fn visible(&self, live: bool) -> Vec<Alert> {
        self.active()
            .into_iter()
            .filter(|alert| !live || alert.severity.visible_while_live())
            .collect()
    }
}

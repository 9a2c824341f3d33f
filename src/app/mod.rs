use crate::alerts::{AlertCenter, AlertEvent};
use crate::capability;
use crate::config::Config;
use crate::hardware;
use crate::live::StreamingMode;
use crate::rpc::obs::ObsConnector;
use crate::session::{EngineLink, PollIntervals};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(ref command) = std::env::args().nth(1) {
        if command == "config-init" {
            return handle_config_init();
        }
        if command == "probe" {
            return handle_probe();
        }
    }

    let config = Config::load()?;
    let alerts = Arc::new(AlertCenter::new());

    let inventory = hardware::probe();
    let profile = capability::score(&inventory);
    tracing::info!(
        overall = ?profile.overall_tier,
        bottleneck = ?profile.bottleneck,
        "hardware capability scored"
    );
    for (severity, title, message) in capability::advise(&profile) {
        alerts.add(severity, &title, &message);
    }

    let link = EngineLink::new(
        Arc::new(ObsConnector),
        alerts.clone(),
        PollIntervals {
            status: Duration::from_millis(config.sync.status_interval_ms),
            scenes: Duration::from_millis(config.sync.scene_interval_ms),
        },
    );

    let mode = Arc::new(StreamingMode::new(alerts.clone()));
    let shutdown = CancellationToken::new();
    let follower = mode.spawn_follower(link.subscribe_events(), shutdown.child_token());

    let mut alert_events = alerts.subscribe();
    let alert_log = alerts.clone();
    let mode_for_log = mode.clone();
    let suppress_while_live = config.alerts.suppress_while_live;
    let alert_logger = tokio::spawn(async move {
        while let Ok(event) = alert_events.recv().await {
            match event {
                AlertEvent::Added(alert) => {
                    tracing::info!(severity = ?alert.severity, title = %alert.title, "alert raised");
                }
                AlertEvent::Dismissed(alert) => {
                    tracing::debug!(title = %alert.title, "alert dismissed");
                }
            }
            let live = suppress_while_live && mode_for_log.is_live();
            tracing::debug!(visible = alert_log.visible(live).len(), "alert view updated");
        }
    });

    let mut view_rx = link.watch();
    let watcher = tokio::spawn(async move {
        while view_rx.changed().await.is_ok() {
            let view = view_rx.borrow().clone();
            tracing::debug!(
                state = ?view.state,
                streaming = view.snapshot.streaming,
                recording = view.snapshot.recording,
                scene = view.snapshot.current_scene.as_deref().unwrap_or(""),
                "link state changed"
            );
        }
    });

    if config.engine.autoconnect {
        match link.connect(config.engine.params()).await {
            Ok(()) => {
                let mut remembered = config.clone();
                if let Some(params) = link.last_params() {
                    remembered.remember_params(&params);
                }
                if let Err(err) = remembered.save() {
                    tracing::warn!(error = %err, "could not persist connection params");
                }
            }
            // already recorded as a critical alert; the operator can retry
            Err(err) => tracing::warn!(error = %err, "autoconnect failed"),
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown: ctrl-c");

    shutdown.cancel();
    link.disconnect().await;
    follower.abort();
    watcher.abort();
    alert_logger.abort();
    Ok(())
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn handle_probe() -> Result<(), Box<dyn std::error::Error>> {
    let inventory = hardware::probe();
    let profile = capability::score(&inventory);
    let report = serde_json::json!({
        "inventory": inventory,
        "profile": profile,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

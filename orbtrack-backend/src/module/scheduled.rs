///! Scheduled task manager - the refresh loop and its satellites
///!
///! This module runs the background tasks of the tracker:
///! - The tick loop (element refresh when due, pipeline tick, publishing)
///! - The alert notifier (logs transitions, optional audible cue)

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orbtrack_common::{AlertEvent, ObserverLocation, TickSnapshot};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::elements::ElementSetSource;
use super::publisher::SnapshotPublisher;
use super::track::TrackingPipeline;
use crate::config::TrackerConfig;
use crate::error::TrackerResult;

const ALERT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Configuration for scheduled tasks
#[derive(Debug, Clone)]
pub struct ScheduledTaskConfig {
    /// Tick period
    pub refresh_interval: Duration,

    /// Catalog filters acquired on every element refresh
    pub groups: Vec<String>,

    /// Emit a terminal bell on firing alerts
    pub sound: bool,

    /// Publish snapshot files after each tick
    pub publish: bool,
}

impl From<&TrackerConfig> for ScheduledTaskConfig {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            refresh_interval: Duration::from_secs(config.tracking.refresh_secs),
            groups: config.acquisition.groups.clone(),
            sound: config.notify.sound,
            publish: true,
        }
    }
}

/// Operator actions applied between ticks
#[derive(Debug)]
pub enum TrackerCommand {
    AddObserver(ObserverLocation, oneshot::Sender<TrackerResult<()>>),
    EditObserver(String, ObserverLocation, oneshot::Sender<TrackerResult<()>>),
    DeleteObserver(String, oneshot::Sender<TrackerResult<ObserverLocation>>),
    Select(Vec<String>),
    ClearHistory,
}

/// Everything the tick loop owns
struct TrackerLoop {
    config: ScheduledTaskConfig,
    pipeline: TrackingPipeline,
    source: ElementSetSource,
    publisher: SnapshotPublisher,
    snapshot_tx: watch::Sender<TickSnapshot>,
    alert_tx: broadcast::Sender<AlertEvent>,
    cancel: Arc<AtomicBool>,
}

impl TrackerLoop {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<TrackerCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(self.config.refresh_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.run_tick().await,
                Some(command) = commands.recv() => self.apply(command),
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("Tick loop stopped");
    }

    async fn run_tick(&mut self) {
        if self.pipeline.needs_refresh(Utc::now()) {
            tracing::info!("Refreshing element sets for {:?}", self.config.groups);
            let acquisitions = self.source.acquire_all(&self.config.groups).await;
            self.pipeline.load_elements(&acquisitions, Utc::now());
        }

        let outcome = self.pipeline.tick(Utc::now(), &self.cancel);
        let snapshot = outcome.snapshot;

        if snapshot.failed_objects() > 0 {
            tracing::warn!(
                "Tick {}: {} of {} objects failed",
                snapshot.tick,
                snapshot.failed_objects(),
                snapshot.objects.len()
            );
        }

        if self.config.publish {
            if let Err(e) = self
                .publisher
                .publish(&snapshot, self.pipeline.log(), self.pipeline.observers())
                .await
            {
                tracing::warn!("Failed to publish tick {}: {:#}", snapshot.tick, e);
            }
        }

        for event in outcome.events {
            // No subscribers is fine
            let _ = self.alert_tx.send(event);
        }
        self.snapshot_tx.send_replace(snapshot);
    }

    fn apply(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::AddObserver(observer, reply) => {
                let _ = reply.send(self.pipeline.add_observer(observer));
            }
            TrackerCommand::EditObserver(name, observer, reply) => {
                let _ = reply.send(self.pipeline.edit_observer(&name, observer));
            }
            TrackerCommand::DeleteObserver(name, reply) => {
                let _ = reply.send(self.pipeline.delete_observer(&name));
            }
            TrackerCommand::Select(names) => self.pipeline.select(names),
            TrackerCommand::ClearHistory => self.pipeline.clear_history(),
        }
    }
}

/// Scheduled task manager
pub struct ScheduledTaskManager {
    config: ScheduledTaskConfig,
    snapshot_rx: watch::Receiver<TickSnapshot>,
    alert_tx: broadcast::Sender<AlertEvent>,
    command_tx: mpsc::Sender<TrackerCommand>,
    shutdown_tx: watch::Sender<bool>,
    cancel: Arc<AtomicBool>,
    pending: Option<(TrackerLoop, mpsc::Receiver<TrackerCommand>)>,
    task_handles: Vec<JoinHandle<()>>,
}

impl ScheduledTaskManager {
    pub fn new(
        config: ScheduledTaskConfig,
        pipeline: TrackingPipeline,
        source: ElementSetSource,
        publisher: SnapshotPublisher,
    ) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(TickSnapshot::default());
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let cancel = Arc::new(AtomicBool::new(false));

        let tracker = TrackerLoop {
            config: config.clone(),
            pipeline,
            source,
            publisher,
            snapshot_tx,
            alert_tx: alert_tx.clone(),
            cancel: cancel.clone(),
        };

        Self {
            config,
            snapshot_rx,
            alert_tx,
            command_tx,
            shutdown_tx,
            cancel,
            pending: Some((tracker, command_rx)),
            task_handles: Vec::new(),
        }
    }

    /// Committed post-tick snapshots
    pub fn subscribe_snapshots(&self) -> watch::Receiver<TickSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Alert transitions
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.alert_tx.subscribe()
    }

    pub fn commands(&self) -> mpsc::Sender<TrackerCommand> {
        self.command_tx.clone()
    }

    /// Start all scheduled tasks
    pub fn start_all(&mut self) -> anyhow::Result<()> {
        let Some((tracker, commands)) = self.pending.take() else {
            anyhow::bail!("Scheduled tasks already started");
        };
        tracing::info!("Starting scheduled task manager...");

        let notifier = self.start_alert_notifier();
        self.task_handles.push(notifier);

        let shutdown = self.shutdown_tx.subscribe();
        self.task_handles
            .push(tokio::spawn(tracker.run(commands, shutdown)));

        tracing::info!(
            "Started {} scheduled tasks (tick every {:?}, groups {:?})",
            self.task_handles.len(),
            self.config.refresh_interval,
            self.config.groups
        );
        Ok(())
    }

    fn start_alert_notifier(&self) -> JoinHandle<()> {
        let mut alerts = self.alert_tx.subscribe();
        let sound = self.config.sound;

        tokio::spawn(async move {
            loop {
                match alerts.recv().await {
                    Ok(event) if event.is_firing() => {
                        tracing::warn!(
                            "ALERT {} ({}) {} threshold crossed at {}: {:.1}",
                            event.object_name,
                            event.object_id,
                            event.kind,
                            event.observer,
                            event.value
                        );
                        if sound {
                            let mut stdout = std::io::stdout();
                            let _ = stdout.write_all(b"\x07").and_then(|_| stdout.flush());
                        }
                    }
                    Ok(event) => tracing::info!(
                        "Alert cleared: {} {} at {}",
                        event.object_name,
                        event.kind,
                        event.observer
                    ),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Alert notifier lagged, {} events dropped", missed)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stop the tick loop (cancelling a running tick between objects) and wait for it
    pub async fn shutdown(mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        let _ = self.shutdown_tx.send(true);

        // The notifier ends once every alert sender is gone
        let handles = std::mem::take(&mut self.task_handles);
        drop(self);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Scheduled task ended abnormally: {}", e);
            }
        }
        tracing::info!("Scheduled tasks stopped");
    }
}

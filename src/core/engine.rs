// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Event dispatcher - applies bus events and timer expiries to the collaborators
//!
//! Work for one key (a sensor's status, its open timer, its heartbeat timer,
//! its admin changes) runs on a single worker in arrival order; different keys
//! run concurrently. A key's worker is started by its first job and retires
//! once its queue is empty. Notifications are spawned so a slow notifier
//! cannot hold a key. Every collaborator error is logged against the action
//! that produced it and the remaining actions still run.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tracing::{debug, error, info, trace, warn};

use super::evaluator::{self, Action};
use super::event_bus::{BusMessage, InboundEvent, SENSOR_ARMING_TOPIC, SENSOR_STATUS_TOPIC};
use super::liveness::{HeartbeatExpiry, HeartbeatTracker};
use super::model::{
    now_unix, ArmingChange, Heartbeat, HeartbeatKind, LastSeen, OpenTimeoutChange, SensorStatus,
    Status,
};
use super::timers::{TimerHandle, TimerKey, TimerRegistry};
use crate::config::EngineConfig;
use crate::db::AuditLog;
use crate::notify::{Notification, Notifier};
use crate::store::{ConfigSource, SettingsAdmin, StateStore};
use crate::streaming::Broadcaster;

/// External collaborators the engine drives
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn StateStore>,
    pub audit: Arc<dyn AuditLog>,
    pub notifier: Arc<dyn Notifier>,
    pub broadcaster: Arc<dyn Broadcaster>,
    /// Read-through arming and open-timeout policy
    pub config: Arc<dyn ConfigSource>,
    /// Writes from the admin topics
    pub admin: Arc<dyn SettingsAdmin>,
}

/// One unit of keyed work
enum Job {
    Event(InboundEvent),
    OpenTimeout { source: String, after: Duration },
    HeartbeatTimeout(Heartbeat),
}

struct Queued {
    job: Job,
    done: Option<oneshot::Sender<()>>,
}

/// Pending jobs per key. A key has an entry exactly while its worker runs.
#[derive(Default)]
struct KeyedQueues {
    queues: parking_lot::Mutex<HashMap<String, VecDeque<Queued>>>,
}

impl KeyedQueues {
    /// Queue `item`; true when no worker is running for `key` yet
    fn push(&self, key: &str, item: Queued) -> bool {
        let mut queues = self.queues.lock();
        match queues.get_mut(key) {
            Some(queue) => {
                queue.push_back(item);
                false
            }
            None => {
                queues.insert(key.to_string(), VecDeque::from([item]));
                true
            }
        }
    }

    /// Next job for `key`, retiring the key when nothing is left
    fn next(&self, key: &str) -> Option<Queued> {
        let mut queues = self.queues.lock();
        let item = queues.get_mut(key).and_then(VecDeque::pop_front);
        if item.is_none() {
            queues.remove(key);
        }
        item
    }
}

/// Counts spawned work so shutdown can wait for it
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }
}

struct Shared {
    collab: Collaborators,
    timers: TimerRegistry,
    liveness: HeartbeatTracker,
    queues: KeyedQueues,
    in_flight: Arc<InFlight>,
    closing: AtomicBool,
    grace: Duration,
}

/// Liveness and escalation engine
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    pub fn new(collab: Collaborators, config: &EngineConfig) -> Self {
        let timers = TimerRegistry::new();
        let liveness = HeartbeatTracker::new(timers.clone(), config.heartbeat_timeout());

        Self {
            shared: Arc::new(Shared {
                collab,
                timers,
                liveness,
                queues: KeyedQueues::default(),
                in_flight: Arc::new(InFlight::default()),
                closing: AtomicBool::new(false),
                grace: config.shutdown_grace(),
            }),
        }
    }

    fn from_weak(weak: &Weak<Shared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.shared.timers
    }

    /// Drain the bus until it closes or `shutdown` fires.
    ///
    /// Messages are decoded here and handed to their key's worker without
    /// waiting, so one busy sensor never holds up the others.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<BusMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Engine running");
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(message) => {
                        if let Some(event) = decode(&message) {
                            let key = event.key().to_string();
                            self.enqueue(key, Job::Event(event), None);
                        }
                    }
                    None => {
                        info!("Event bus closed");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    info!("Engine received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Decode one bus message and apply it. Undecodable payloads are dropped.
    pub async fn dispatch(&self, message: BusMessage) {
        if let Some(event) = decode(&message) {
            self.submit(Job::Event(event)).await;
        }
    }

    pub async fn handle_status(&self, incoming: SensorStatus) {
        self.submit(Job::Event(InboundEvent::Status(incoming))).await;
    }

    pub async fn handle_heartbeat(&self, heartbeat: Heartbeat) {
        self.submit(Job::Event(InboundEvent::Heartbeat(heartbeat))).await;
    }

    /// Set a sensor's arming flag and announce it
    pub async fn handle_arming(&self, change: ArmingChange) {
        self.submit(Job::Event(InboundEvent::Arming(change))).await;
    }

    /// Store an open-timeout override; it applies from the next OPEN
    pub async fn handle_open_timeout_change(&self, change: OpenTimeoutChange) {
        self.submit(Job::Event(InboundEvent::OpenTimeout(change))).await;
    }

    /// Queue `job` behind its key's earlier work and wait until it has run
    async fn submit(&self, job: Job) {
        let key = job.key().to_string();
        let (done, applied) = oneshot::channel();
        self.enqueue(key, job, Some(done));
        let _ = applied.await;
    }

    fn enqueue(&self, key: String, job: Job, done: Option<oneshot::Sender<()>>) {
        if !self.shared.queues.push(&key, Queued { job, done }) {
            return;
        }

        let engine = self.clone();
        let in_flight = self.shared.in_flight.clone();
        in_flight.begin();
        tokio::spawn(async move {
            while let Some(queued) = engine.shared.queues.next(&key) {
                engine.execute(queued.job).await;
                if let Some(done) = queued.done {
                    let _ = done.send(());
                }
            }
            trace!(key = %key, "Key worker idle, retiring");
            in_flight.end();
        });
    }

    async fn execute(&self, job: Job) {
        match job {
            Job::Event(InboundEvent::Status(status)) => self.apply_status(status).await,
            Job::Event(InboundEvent::Heartbeat(heartbeat)) => self.apply_heartbeat(heartbeat).await,
            Job::Event(InboundEvent::Arming(change)) => self.apply_arming(change).await,
            Job::Event(InboundEvent::OpenTimeout(change)) => {
                self.apply_open_timeout_change(change).await
            }
            Job::OpenTimeout { source, after } => self.on_open_timeout(source, after).await,
            Job::HeartbeatTimeout(heartbeat) => self.on_heartbeat_timeout(heartbeat).await,
        }
    }

    async fn apply_status(&self, incoming: SensorStatus) {
        let incoming = incoming.stamped();
        let source = incoming.source.clone();
        let collab = &self.shared.collab;

        if !incoming.status.is_recognized() {
            warn!(source = %source, status = %incoming.status, "Unrecognized status value");
        }

        let previous = match collab.store.get_status(&source).await {
            Ok(previous) => previous,
            Err(e) => {
                error!(source = %source, "Reading current state failed, assuming UNKNOWN: {}", e);
                Some(incoming.with_status(Status::Unknown))
            }
        };

        let armed = collab.config.is_armed(&source).await;
        let open_timeout = collab.config.open_timeout(&source).await;
        let evaluation = evaluator::evaluate(previous.as_ref(), &incoming, armed, open_timeout);

        if evaluation.baseline {
            info!(source = %source, status = %incoming.status, "Baseline status recorded");
        } else if evaluation.just_opened && !armed {
            debug!(source = %source, "Opened while unarmed, not notifying");
        }

        for action in evaluation.actions {
            self.apply(action).await;
        }
    }

    async fn apply(&self, action: Action) {
        let collab = &self.shared.collab;
        match action {
            Action::StartOpenTimer { source, after } => self.arm_open_timer(source, after),
            Action::CancelOpenTimer { source } => {
                if !self.shared.timers.cancel(&TimerKey::open(&source)) {
                    debug!(source = %source, "No open timer to cancel");
                }
            }
            Action::Notify(notification) => self.notify(notification),
            Action::PersistAudit(status) => {
                if let Err(e) = collab.audit.append(&status).await {
                    error!(source = %status.source, "Audit append failed: {}", e);
                }
            }
            Action::Broadcast(status) => self.broadcast_status(&status).await,
            Action::PersistCurrentState(status) => {
                if let Err(e) = collab.store.set_status(&status).await {
                    error!(source = %status.source, "Writing current state failed: {}", e);
                }
            }
        }
    }

    fn arm_open_timer(&self, source: String, after: Duration) {
        if self.shared.closing.load(Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        let key = TimerKey::open(&source);
        let handle = self.shared.timers.arm(key, after, async move {
            if let Some(engine) = Engine::from_weak(&weak) {
                let job = Job::OpenTimeout { source, after };
                engine.enqueue(job.key().to_string(), job, None);
            }
        });
        self.disarm_if_closing(&handle);
    }

    /// `shutdown` may have cancelled everything between the closing check and
    /// the arm; drop the timer that slipped in.
    fn disarm_if_closing(&self, handle: &TimerHandle) {
        if self.shared.closing.load(Ordering::SeqCst) && self.shared.timers.disarm(handle) {
            debug!("Dropped timer {} armed during shutdown", handle.key);
        }
    }

    async fn on_open_timeout(&self, source: String, after: Duration) {
        // A newer OPEN armed a fresh timer while this expiry was queued
        if self.shared.timers.is_armed(&TimerKey::open(&source)) {
            debug!(source = %source, "Open timer superseded");
            return;
        }

        let collab = &self.shared.collab;
        let current = match collab.store.get_status(&source).await {
            Ok(current) => current,
            Err(e) => {
                error!(source = %source, "Reading current state on open timeout failed: {}", e);
                return;
            }
        };
        let armed = collab.config.is_armed(&source).await;

        match evaluator::on_open_timeout(current.as_ref(), armed, after) {
            Some(notification) => {
                warn!(source = %source, "Open longer than {:?}", after);
                self.notify(notification);
            }
            None if current.is_none() => debug!(source = %source, "Open timer fired with no current state"),
            None => debug!(source = %source, armed, "Open timer fired, nothing to escalate"),
        }
    }

    async fn apply_heartbeat(&self, heartbeat: Heartbeat) {
        if !self.shared.closing.load(Ordering::SeqCst) {
            let weak = Arc::downgrade(&self.shared);
            let expired = heartbeat.clone();
            let handle = self.shared.liveness.on_heartbeat(&heartbeat, async move {
                if let Some(engine) = Engine::from_weak(&weak) {
                    let job = Job::HeartbeatTimeout(expired);
                    engine.enqueue(job.key().to_string(), job, None);
                }
            });
            self.disarm_if_closing(&handle);
        }

        let last_seen = LastSeen {
            timestamp: now_unix(),
            heartbeat,
        };
        if let Err(e) = self.shared.collab.store.set_last_seen(&last_seen).await {
            error!(identity = %last_seen.heartbeat.identity, "Writing last-seen failed: {}", e);
        }
    }

    async fn on_heartbeat_timeout(&self, heartbeat: Heartbeat) {
        let identity = heartbeat.identity.clone();

        if self.shared.timers.is_armed(&TimerKey::heartbeat(&identity)) {
            debug!(identity = %identity, "Heartbeat timer superseded");
            return;
        }

        let collab = &self.shared.collab;
        let (current, armed) = match heartbeat.kind {
            HeartbeatKind::Application => (None, false),
            HeartbeatKind::Sensor => {
                let current = match collab.store.get_status(&identity).await {
                    Ok(current) => current,
                    Err(e) => {
                        error!(identity = %identity, "Reading current state on heartbeat loss failed: {}", e);
                        return;
                    }
                };
                (current, collab.config.is_armed(&identity).await)
            }
        };

        match self
            .shared
            .liveness
            .on_timeout(&heartbeat, current.as_ref(), armed)
        {
            HeartbeatExpiry::ApplicationLost(notification) => {
                warn!(identity = %identity, "Application heartbeat lost");
                self.notify(notification);
            }
            HeartbeatExpiry::SensorUnknown {
                updated,
                notification,
            } => {
                warn!(identity = %identity, "Sensor heartbeat lost, marking UNKNOWN");
                if let Some(notification) = notification {
                    self.notify(notification);
                }
                self.apply(Action::PersistAudit(updated.clone())).await;
                self.apply(Action::Broadcast(updated.clone())).await;
                self.apply(Action::PersistCurrentState(updated)).await;
            }
            HeartbeatExpiry::NothingToMark => {
                debug!(identity = %identity, "Sensor heartbeat lost before any status");
            }
        }
    }

    async fn apply_arming(&self, change: ArmingChange) {
        let collab = &self.shared.collab;
        if let Err(e) = collab.admin.set_armed(&change.source, change.armed).await {
            error!(source = %change.source, "Updating arming failed: {}", e);
            return;
        }
        match serde_json::to_value(&change) {
            Ok(payload) => {
                if let Err(e) = collab.broadcaster.publish(SENSOR_ARMING_TOPIC, &payload).await {
                    warn!(source = %change.source, "Arming broadcast failed: {}", e);
                }
            }
            Err(e) => warn!("Encoding arming change failed: {}", e),
        }
    }

    async fn apply_open_timeout_change(&self, change: OpenTimeoutChange) {
        if let Err(e) = self
            .shared
            .collab
            .admin
            .set_open_timeout(&change.source, change.open_timeout_minutes)
            .await
        {
            warn!(source = %change.source, "Rejected open timeout change: {}", e);
        }
    }

    async fn broadcast_status(&self, status: &SensorStatus) {
        let payload = match serde_json::to_value(status) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(source = %status.source, "Encoding status failed: {}", e);
                return;
            }
        };
        if let Err(e) = self
            .shared
            .collab
            .broadcaster
            .publish(SENSOR_STATUS_TOPIC, &payload)
            .await
        {
            warn!(source = %status.source, "Status broadcast failed: {}", e);
        }
    }

    fn notify(&self, notification: Notification) {
        let notifier = self.shared.collab.notifier.clone();
        let in_flight = self.shared.in_flight.clone();
        in_flight.begin();
        tokio::spawn(async move {
            if let Err(e) = notifier.send(&notification).await {
                warn!("Notification '{}' failed: {}", notification.message, e);
            }
            in_flight.end();
        });
    }

    /// Wait until every spawned dispatch and notification has finished
    pub async fn drain(&self) {
        self.shared.in_flight.wait_idle().await;
    }

    /// Cancel every pending timer and give in-flight work the grace period
    pub async fn shutdown(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        let cancelled = self.shared.timers.cancel_all();
        info!("Engine shutting down, cancelled {} timers", cancelled);

        if tokio::time::timeout(self.shared.grace, self.drain())
            .await
            .is_err()
        {
            warn!(
                "{} tasks still in flight after {:?}",
                self.shared.in_flight.count.load(Ordering::SeqCst),
                self.shared.grace
            );
        }
    }
}

impl Job {
    /// Key whose work must stay in arrival order
    fn key(&self) -> &str {
        match self {
            Job::Event(event) => event.key(),
            Job::OpenTimeout { source, .. } => source,
            Job::HeartbeatTimeout(heartbeat) => &heartbeat.identity,
        }
    }
}

fn decode(message: &BusMessage) -> Option<InboundEvent> {
    match InboundEvent::decode(message) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(id = message.id, "Dropping message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryAuditLog;
    use crate::notify::RecordingNotifier;
    use crate::store::{MemoryStore, SensorSettings};
    use crate::streaming::RecordingBroadcaster;

    /// Every sensor armed with a one minute window
    struct FixedConfig;

    #[async_trait::async_trait]
    impl ConfigSource for FixedConfig {
        async fn open_timeout(&self, _source: &str) -> Duration {
            Duration::from_secs(60)
        }

        async fn is_armed(&self, _source: &str) -> bool {
            true
        }
    }

    fn collaborators(notifier: Arc<RecordingNotifier>) -> Collaborators {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let settings = Arc::new(SensorSettings::new(
            store.clone(),
            audit.clone(),
            &EngineConfig::default(),
        ));
        Collaborators {
            store,
            audit,
            notifier,
            broadcaster: Arc::new(RecordingBroadcaster::new()),
            config: settings.clone(),
            admin: settings,
        }
    }

    fn engine() -> (Engine, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = Engine::new(collaborators(notifier.clone()), &EngineConfig::default());
        (engine, notifier)
    }

    fn status_message(source: &str, status: &str) -> BusMessage {
        BusMessage {
            id: 0,
            topic: SENSOR_STATUS_TOPIC.to_string(),
            payload: format!(r#"{{"source":"{}","status":"{}"}}"#, source, status).into_bytes(),
        }
    }

    #[tokio::test]
    async fn test_in_flight_idle_when_empty() {
        let (engine, _) = engine();
        engine.drain().await;
    }

    #[tokio::test]
    async fn test_dispatch_drops_garbage() {
        let (engine, notifier) = engine();
        engine
            .dispatch(BusMessage {
                id: 7,
                topic: SENSOR_STATUS_TOPIC.to_string(),
                payload: b"\xff\x00".to_vec(),
            })
            .await;
        assert!(engine.timers().is_empty());
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_timers() {
        let (engine, notifier) = engine();
        engine
            .handle_status(SensorStatus::new("garage", Status::Open))
            .await;
        engine.handle_heartbeat(Heartbeat::sensor("garage")).await;
        assert_eq!(engine.timers().len(), 2);

        engine.shutdown().await;
        assert!(engine.timers().is_empty());

        // Nothing re-arms after shutdown
        engine.handle_heartbeat(Heartbeat::sensor("garage")).await;
        engine
            .handle_status(SensorStatus::new("garage", Status::Open))
            .await;
        assert!(engine.timers().is_empty());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_during_dispatch_leaves_no_timers() {
        let (engine, _) = engine();
        let (bus, rx) = crate::core::event_bus::EventBus::new(4096);
        let (_tx, shutdown) = broadcast::channel(1);
        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run(rx, shutdown).await }
        });

        let publisher = tokio::spawn(async move {
            for round in 0..20 {
                for sensor in 0..50 {
                    let status = if round % 2 == 0 { Status::Closed } else { Status::Open };
                    let status = SensorStatus::new(&format!("door-{}", sensor), status);
                    bus.publish_status(&status).await.unwrap();
                    bus.publish_heartbeat(&Heartbeat::sensor(&status.source))
                        .await
                        .unwrap();
                }
            }
        });

        tokio::task::yield_now().await;
        engine.shutdown().await;

        publisher.await.unwrap();
        task.await.unwrap();
        engine.drain().await;
        assert!(engine.timers().is_empty());
    }

    #[tokio::test]
    async fn test_key_workers_retire_when_idle() {
        let (engine, _) = engine();
        for sensor in 0..100 {
            let source = format!("door-{}", sensor);
            engine.dispatch(status_message(&source, "CLOSED")).await;
            engine.handle_heartbeat(Heartbeat::sensor(&source)).await;
        }
        engine.drain().await;
        assert!(engine.shared.queues.queues.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_injected_config_source() {
        let notifier = Arc::new(RecordingNotifier::new());
        let collab = Collaborators {
            config: Arc::new(FixedConfig),
            ..collaborators(notifier.clone())
        };
        let engine = Engine::new(collab, &EngineConfig::default());

        engine.handle_status(SensorStatus::new("shed", Status::Closed)).await;
        engine.handle_status(SensorStatus::new("shed", Status::Open)).await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        engine.drain().await;

        assert_eq!(notifier.count_containing("shed was just opened"), 1);
        assert_eq!(notifier.count_containing("shed opened longer than 1m"), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let (engine, _) = engine();
        let (_bus, rx) = crate::core::event_bus::EventBus::new(4);
        let (tx, shutdown) = broadcast::channel(1);
        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run(rx, shutdown).await }
        });
        tx.send(()).unwrap();
        task.await.unwrap();
    }
}

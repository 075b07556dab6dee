// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Heartbeat liveness tracking

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::model::{Heartbeat, HeartbeatKind, SensorStatus, Status};
use super::timers::{TimerHandle, TimerKey, TimerRegistry};
use crate::notify::Notification;

/// What an expired heartbeat requires
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatExpiry {
    /// An application went silent; it has no sensor record to update
    ApplicationLost(Notification),
    /// A sensor went silent; its record becomes UNKNOWN
    SensorUnknown {
        updated: SensorStatus,
        notification: Option<Notification>,
    },
    /// A sensor went silent before ever reporting a status
    NothingToMark,
}

/// Owns the heartbeat timer for each identity. Last-seen records are
/// persisted by the engine, not kept here.
///
/// Every identity shares the same window; the timer is re-armed only by a new
/// heartbeat, never by its own expiry.
pub struct HeartbeatTracker {
    timers: TimerRegistry,
    window: Duration,
}

impl HeartbeatTracker {
    pub fn new(timers: TimerRegistry, window: Duration) -> Self {
        Self { timers, window }
    }

    /// Re-arm the identity's timer with `on_expire`
    pub fn on_heartbeat<F>(&self, heartbeat: &Heartbeat, on_expire: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(
            identity = %heartbeat.identity,
            kind = %heartbeat.kind,
            "Heartbeat received"
        );
        self.timers
            .arm(TimerKey::heartbeat(&heartbeat.identity), self.window, on_expire)
    }

    /// Expiry decision for `heartbeat`; see [`expire`]
    pub fn on_timeout(
        &self,
        heartbeat: &Heartbeat,
        current: Option<&SensorStatus>,
        armed: bool,
    ) -> HeartbeatExpiry {
        debug!(
            identity = %heartbeat.identity,
            kind = %heartbeat.kind,
            "Heartbeat window of {:?} elapsed",
            self.window
        );
        expire(heartbeat, current, armed)
    }
}

/// Decide what a heartbeat expiry requires.
///
/// `current` is the sensor's live record (ignored for applications) and
/// `armed` gates the sensor notification.
pub fn expire(
    heartbeat: &Heartbeat,
    current: Option<&SensorStatus>,
    armed: bool,
) -> HeartbeatExpiry {
    match heartbeat.kind {
        HeartbeatKind::Application => {
            HeartbeatExpiry::ApplicationLost(Notification::app_lost_connection(&heartbeat.identity))
        }
        HeartbeatKind::Sensor => match current {
            Some(status) => HeartbeatExpiry::SensorUnknown {
                updated: status.with_status(Status::Unknown),
                notification: armed.then(|| Notification::sensor_lost_connection(&status.source)),
            },
            None => HeartbeatExpiry::NothingToMark,
        },
    }
}

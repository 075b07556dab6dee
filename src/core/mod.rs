// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Core engine module - timers, transition rules, liveness and dispatch

pub mod engine;
pub mod evaluator;
pub mod event_bus;
pub mod liveness;
pub mod model;
pub mod timers;

pub use engine::{Collaborators, Engine};
pub use evaluator::{evaluate, on_open_timeout, Action, Evaluation};
pub use event_bus::{BusMessage, EventBus, InboundEvent};
pub use liveness::{HeartbeatExpiry, HeartbeatTracker};
pub use model::{
    ArmingChange, Heartbeat, HeartbeatKind, LastSeen, OpenTimeoutChange, SensorState,
    SensorStatus, Status,
};
pub use timers::{TimeoutKind, TimerHandle, TimerKey, TimerRegistry};

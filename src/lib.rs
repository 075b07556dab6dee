// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Doorwatch - door sensor liveness and escalation service
//!
//! Ingests door sensor status and heartbeats from an MQTT bus and turns them
//! into durable facts and alerts:
//! - "just opened" notifications for armed sensors
//! - escalation when a door stays open past its configured window
//! - sensor and companion-app heartbeat loss detection
//! - current state in sled, an append-only audit log in SQLite
//! - live updates over WebSocket and home-automation MQTT topics
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Doorwatch Engine                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌────────────┐   ┌───────────┐               │
//! │  │  MQTT    │ → │ Event Bus  │ → │ Dispatcher│               │
//! │  │  Client  │   │ (mpsc)     │   │ per-key   │               │
//! │  └──────────┘   └────────────┘   └───────────┘               │
//! │                                    ↓      ↑ expiry           │
//! │                 ┌───────────┐  ┌────────────────┐            │
//! │                 │ Evaluator │  │ Timer Registry │            │
//! │                 │ Liveness  │  │ open/heartbeat │            │
//! │                 └───────────┘  └────────────────┘            │
//! │       ↓             ↓              ↓              ↓          │
//! │  ┌─────────┐  ┌──────────┐  ┌────────────┐  ┌────────────┐   │
//! │  │  State  │  │  Audit   │  │  Notifier  │  │ Streaming  │   │
//! │  │ (sled)  │  │ (sqlite) │  │  (ntfy)    │  │ WS + MQTT  │   │
//! │  └─────────┘  └──────────┘  └────────────┘  └────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod notify;
pub mod store;
pub mod streaming;

// Re-exports for convenience
pub use config::Config;
pub use core::{Collaborators, Engine, EventBus};
pub use db::Database;
pub use error::{Error, Result};
pub use streaming::StreamingManager;

/// Doorwatch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Doorwatch name
pub const NAME: &str = "doorwatch";

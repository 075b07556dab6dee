// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Error types shared by the engine and its collaborators

use thiserror::Error;

/// Library-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by collaborators and payload decoding.
///
/// Nothing here is fatal to the engine: the dispatcher logs each error
/// against the action that produced it and carries on with the rest.
#[derive(Debug, Error)]
pub enum Error {
    /// Inbound payload could not be decoded
    #[error("decode error on '{topic}': {message}")]
    Decode { topic: String, message: String },

    /// Current-state store failure
    #[error("state store error: {0}")]
    Store(String),

    /// Audit log failure
    #[error("audit log error: {0}")]
    Audit(String),

    /// Notification delivery failure
    #[error("notifier error: {0}")]
    Notify(String),

    /// MQTT bus client failure
    #[error("bus error: {0}")]
    Bus(String),

    /// Live broadcast failure
    #[error("broadcast error: {0}")]
    Broadcast(String),

    /// Rejected configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn decode(topic: &str, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            topic: topic.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Audit(e.to_string())
    }
}

impl From<rumqttc::ClientError> for Error {
    fn from(e: rumqttc::ClientError) -> Self {
        Self::Bus(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Notify(e.to_string())
    }
}

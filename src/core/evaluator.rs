// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Status transition rules
//!
//! Pure decision logic: given what the store last held for a sensor, the
//! incoming status and the sensor's arming flag, produce the list of side
//! effects the dispatcher must carry out. Nothing here touches a collaborator.

use std::time::Duration;

use super::model::{SensorStatus, Status};
use crate::notify::Notification;

/// A side effect requested by the evaluator
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Notify(Notification),
    StartOpenTimer { source: String, after: Duration },
    CancelOpenTimer { source: String },
    PersistAudit(SensorStatus),
    Broadcast(SensorStatus),
    PersistCurrentState(SensorStatus),
}

/// Result of evaluating one status event
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// CLOSED/UNKNOWN -> OPEN edge, whether or not it was delivered
    pub just_opened: bool,
    /// First status ever seen for this sensor
    pub baseline: bool,
    pub actions: Vec<Action>,
}

impl Evaluation {
    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.actions.iter().filter_map(|a| match a {
            Action::Notify(n) => Some(n),
            _ => None,
        })
    }
}

/// Decide what a status event requires.
///
/// Action order is the execution order: timer bookkeeping, notification,
/// audit, broadcast, and the current-state write last.
pub fn evaluate(
    previous: Option<&SensorStatus>,
    incoming: &SensorStatus,
    armed: bool,
    open_timeout: Duration,
) -> Evaluation {
    let mut actions = Vec::with_capacity(5);

    let timer_action = match incoming.status {
        Status::Open => Some(Action::StartOpenTimer {
            source: incoming.source.clone(),
            after: open_timeout,
        }),
        Status::Closed => Some(Action::CancelOpenTimer {
            source: incoming.source.clone(),
        }),
        _ => None,
    };

    let Some(previous) = previous else {
        // First report only establishes the baseline
        actions.extend(timer_action);
        actions.push(Action::Broadcast(incoming.clone()));
        actions.push(Action::PersistCurrentState(incoming.clone()));
        return Evaluation {
            just_opened: false,
            baseline: true,
            actions,
        };
    };

    let just_opened = matches!(previous.status, Status::Closed | Status::Unknown)
        && incoming.status == Status::Open;

    actions.extend(timer_action);

    if just_opened && armed {
        actions.push(Action::Notify(Notification::just_opened(&incoming.source)));
    }

    actions.push(Action::PersistAudit(incoming.clone()));
    actions.push(Action::Broadcast(incoming.clone()));
    actions.push(Action::PersistCurrentState(incoming.clone()));

    Evaluation {
        just_opened,
        baseline: false,
        actions,
    }
}

/// Decide whether an expired open timer escalates.
///
/// `current` is the sensor's live state read at fire time and `armed` is the
/// arming flag read at fire time, not when the timer was started.
pub fn on_open_timeout(
    current: Option<&SensorStatus>,
    armed: bool,
    open_timeout: Duration,
) -> Option<Notification> {
    match current {
        Some(status) if status.status == Status::Open && armed => {
            Some(Notification::open_too_long(&status.source, open_timeout))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(300);

    fn status(source: &str, s: &str) -> SensorStatus {
        SensorStatus::new(source, Status::from(s))
    }

    fn kinds(e: &Evaluation) -> Vec<&'static str> {
        e.actions
            .iter()
            .map(|a| match a {
                Action::Notify(_) => "notify",
                Action::StartOpenTimer { .. } => "start",
                Action::CancelOpenTimer { .. } => "cancel",
                Action::PersistAudit(_) => "audit",
                Action::Broadcast(_) => "broadcast",
                Action::PersistCurrentState(_) => "state",
            })
            .collect()
    }

    #[test]
    fn test_closed_to_open_armed() {
        let e = evaluate(
            Some(&status("garage", "CLOSED")),
            &status("garage", "OPEN"),
            true,
            WINDOW,
        );
        assert!(e.just_opened);
        assert_eq!(kinds(&e), vec!["start", "notify", "audit", "broadcast", "state"]);
        assert_eq!(e.notifications().count(), 1);
        assert!(e.actions.contains(&Action::StartOpenTimer {
            source: "garage".to_string(),
            after: WINDOW
        }));
    }

    #[test]
    fn test_unknown_to_open_is_an_edge() {
        let e = evaluate(
            Some(&status("garage", "UNKNOWN")),
            &status("garage", "OPEN"),
            true,
            WINDOW,
        );
        assert!(e.just_opened);
    }

    #[test]
    fn test_unarmed_open_still_starts_timer() {
        let e = evaluate(
            Some(&status("garage", "CLOSED")),
            &status("garage", "OPEN"),
            false,
            WINDOW,
        );
        assert!(e.just_opened);
        assert_eq!(kinds(&e), vec!["start", "audit", "broadcast", "state"]);
    }

    #[test]
    fn test_repeated_open_is_not_an_edge() {
        let e = evaluate(
            Some(&status("garage", "OPEN")),
            &status("garage", "OPEN"),
            true,
            WINDOW,
        );
        assert!(!e.just_opened);
        assert_eq!(kinds(&e), vec!["start", "audit", "broadcast", "state"]);
    }

    #[test]
    fn test_closed_cancels_timer() {
        let e = evaluate(
            Some(&status("garage", "OPEN")),
            &status("garage", "CLOSED"),
            true,
            WINDOW,
        );
        assert_eq!(kinds(&e), vec!["cancel", "audit", "broadcast", "state"]);
    }

    #[test]
    fn test_unrecognized_status_has_no_timer_action() {
        let e = evaluate(
            Some(&status("garage", "OPEN")),
            &status("garage", "AJAR"),
            true,
            WINDOW,
        );
        assert_eq!(kinds(&e), vec!["audit", "broadcast", "state"]);
    }

    #[test]
    fn test_baseline_skips_audit_and_notification() {
        let e = evaluate(None, &status("garage", "OPEN"), true, WINDOW);
        assert!(e.baseline);
        assert!(!e.just_opened);
        assert_eq!(kinds(&e), vec!["start", "broadcast", "state"]);

        let e = evaluate(None, &status("garage", "CLOSED"), true, WINDOW);
        assert_eq!(kinds(&e), vec!["cancel", "broadcast", "state"]);
    }

    #[test]
    fn test_open_timeout_rechecks_state_and_arming() {
        let open = status("garage", "OPEN");
        let closed = status("garage", "CLOSED");

        let n = on_open_timeout(Some(&open), true, WINDOW).unwrap();
        assert!(n.message.contains("garage"));
        assert!(n.message.contains("5m"));

        assert!(on_open_timeout(Some(&open), false, WINDOW).is_none());
        assert!(on_open_timeout(Some(&closed), true, WINDOW).is_none());
        assert!(on_open_timeout(None, true, WINDOW).is_none());
    }
}

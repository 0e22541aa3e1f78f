//! Shared contracts for the Merrymaker control plane.
//!
//! This crate defines the entities (`model`), error taxonomy (`error`), and the
//! trait seams (`traits`) that `merrymaker-store`, `merrymaker-scheduler`,
//! `merrymaker-runner`, `merrymaker-reaper`, `merrymaker-rules`,
//! `merrymaker-pipeline`, `merrymaker-alerts`, and `merrymaker-session` depend on.
//! It has no Postgres-specific code of its own — concrete stores live downstream so
//! every crate above can be tested against a fake.

pub mod error;
pub mod model;
pub mod traits;

pub use error::{Error, ErrorKind, Result};
pub use model::*;
pub use traits::*;

#[cfg(test)]
mod tests {
    use super::model::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    #[test]
    fn fire_key_is_stable_within_a_slot_and_changes_across_slots() {
        let id = Uuid::nil();
        let t1 = Utc.timestamp_opt(1_000, 0).unwrap();
        let t2 = Utc.timestamp_opt(1_010, 0).unwrap();
        let t3 = Utc.timestamp_opt(1_031, 0).unwrap();

        assert_eq!(fire_key(&id, 30, t1), fire_key(&id, 30, t2));
        assert_ne!(fire_key(&id, 30, t1), fire_key(&id, 30, t3));
    }

    #[test]
    fn scheduled_task_is_due_when_never_queued() {
        let task = ScheduledTask {
            id: Uuid::new_v4(),
            task_name: "scan".into(),
            interval_seconds: 30,
            last_queued_at: None,
            active_fire_key: None,
            active_fire_key_set_at: None,
            overrun_policy: OverrunPolicy::Skip,
            enabled: true,
        };
        assert!(task.is_due(Utc::now()));
    }

    #[test]
    fn scheduled_task_is_not_due_before_interval_elapses() {
        let now = Utc::now();
        let task = ScheduledTask {
            id: Uuid::new_v4(),
            task_name: "scan".into(),
            interval_seconds: 30,
            last_queued_at: Some(now),
            active_fire_key: None,
            active_fire_key_set_at: None,
            overrun_policy: OverrunPolicy::Skip,
            enabled: true,
        };
        assert!(!task.is_due(now + chrono::Duration::seconds(10)));
        assert!(task.is_due(now + chrono::Duration::seconds(30)));
    }

    #[test]
    fn role_ordering_matches_the_write_gate() {
        assert!(Role::Admin > Role::User);
        assert!(Role::User > Role::Guest);
        assert!(Role::Transport > Role::Admin);
    }

    #[test]
    fn session_invalid_once_expired() {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            email: "a@example.com".into(),
            role: Role::User,
            expires_at: now,
        };
        assert!(!session.is_valid(now));
        assert!(session.is_valid(now - chrono::Duration::milliseconds(1)));
    }
}

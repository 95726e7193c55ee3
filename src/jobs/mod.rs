//! Job classes and the registry wiring for the ingestion pipeline.
//!
//! Data flow: `cron_update_logs` fans out one `new_log_metadata` per
//! published log, which registers the log and enqueues its
//! `cron_check_sth`. The STH check enqueues bounded `get_entries` ranges,
//! which recursively split themselves and enqueue the notification jobs.

pub mod check_sth;
pub mod ckan;
pub mod get_entries;
pub mod new_log;
pub mod refresh;
pub mod slack;
pub mod update_logs;

use chrono::Duration;

use crate::queue::{JobRegistry, Schedule};

pub const UPDATE_LOGS: &str = "cron_update_logs";
pub const NEW_LOG_METADATA: &str = "new_log_metadata";
pub const CHECK_STH: &str = "cron_check_sth";
pub const GET_ENTRIES: &str = "get_entries";
pub const UPDATE_METADATA: &str = "update_metadata";
pub const UPDATE_SLACK: &str = "cron_slack";
pub const UPDATE_DATA_GOV_AU: &str = "update_data_gov_au";
pub const BACKFILL_DATA_GOV_AU: &str = "backfill_data_gov_au";

/// Job classes enqueued at startup. Duplicate seeds from repeated boots
/// are absorbed by the cron gate.
pub const SEED_CRONS: [&str; 3] = [UPDATE_LOGS, UPDATE_METADATA, BACKFILL_DATA_GOV_AU];

/// Wire every job class to its handler and schedule.
pub fn build_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();

    registry.register(
        UPDATE_LOGS,
        Schedule::cron(Duration::hours(24)),
        update_logs::UpdateCtLogList,
    );
    registry.register(
        NEW_LOG_METADATA,
        Schedule::one_shot(),
        new_log::RegisterLogMetadata,
    );
    registry.register(
        CHECK_STH,
        Schedule::cron(Duration::minutes(5)),
        check_sth::CheckLogSth,
    );
    registry.register(GET_ENTRIES, Schedule::one_shot(), get_entries::FetchEntries);
    registry.register(
        UPDATE_METADATA,
        Schedule::cron(Duration::hours(1)),
        refresh::RefreshCertMetadata,
    );
    registry.register(UPDATE_SLACK, Schedule::one_shot(), slack::NotifySlack);
    registry.register(
        UPDATE_DATA_GOV_AU,
        Schedule::one_shot(),
        ckan::UpsertOpenData,
    );
    registry.register(
        BACKFILL_DATA_GOV_AU,
        Schedule::cron(Duration::hours(1)),
        ckan::BackfillOpenData,
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_job_class() {
        let registry = build_registry();
        for class in [
            UPDATE_LOGS,
            NEW_LOG_METADATA,
            CHECK_STH,
            GET_ENTRIES,
            UPDATE_METADATA,
            UPDATE_SLACK,
            UPDATE_DATA_GOV_AU,
            BACKFILL_DATA_GOV_AU,
        ] {
            assert!(registry.is_registered(class), "missing {class}");
        }
    }

    #[test]
    fn crons_are_singletons_and_fetches_are_not() {
        let registry = build_registry();
        assert!(registry.get(UPDATE_LOGS).unwrap().schedule.singleton);
        assert!(registry.get(CHECK_STH).unwrap().schedule.singleton);
        assert!(!registry.get(GET_ENTRIES).unwrap().schedule.singleton);
        assert!(!registry.get(NEW_LOG_METADATA).unwrap().schedule.singleton);
        assert_eq!(
            registry.get(CHECK_STH).unwrap().schedule.every,
            Some(Duration::minutes(5))
        );
        assert_eq!(
            registry.get(UPDATE_LOGS).unwrap().schedule.every,
            Some(Duration::hours(24))
        );
    }

    #[test]
    fn seed_crons_are_registered_singletons() {
        let registry = build_registry();
        for class in SEED_CRONS {
            let reg = registry.get(class).unwrap();
            assert!(reg.schedule.singleton, "{class} must be a singleton");
            assert!(reg.schedule.every.is_some(), "{class} must recur");
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically mark finished recurring reservations as ended.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&engine).await;
    }
}

pub async fn sweep_once(engine: &Engine) -> usize {
    match engine.end_finished_reservations().await {
        Ok(0) => 0,
        Ok(n) => {
            metrics::counter!(crate::observability::RESERVATIONS_ENDED_TOTAL).increment(n as u64);
            info!("marked {n} recurring reservations as ended");
            n
        }
        Err(e) => {
            // Transient lock waits are retried on the next tick.
            warn!("sweeper pass failed: {e}");
            0
        }
    }
}

/// Compact the WAL whenever enough appends accumulated since the last rewrite.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("compaction skipped: {appends} appends < {threshold}");
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use std::path::PathBuf;
    use ulid::Ulid;

    use crate::calendar::Calendar;
    use crate::clock::FixedClock;
    use crate::engine::NewRecurringReservation;
    use crate::model::*;

    const JAN_5_2026: Ms = 1_767_607_200_000; // 2026-01-05T10:00:00Z

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomslot_test_maintenance");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_ends_reservations_after_last_day() {
        let clock = Arc::new(FixedClock::new(JAN_5_2026));
        let engine = Engine::new(
            test_wal_path("sweep.wal"),
            Calendar::utc_default(),
            clock.clone(),
        )
        .unwrap();
        let room = Ulid::new();
        engine
            .create_room(room, "Sala".into(), 4, RoomStatus::Available)
            .await
            .unwrap();
        let (res, _) = engine
            .create_recurring_reservation(NewRecurringReservation {
                id: Ulid::new(),
                user_id: Ulid::new(),
                room_id: room,
                recurrence_type: RecurrenceType::Weekly,
                weekdays: vec![6],
                start_date: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2026, 1, 17).unwrap(),
                daily_start: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                daily_end: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            })
            .await
            .unwrap();

        assert_eq!(sweep_once(&engine).await, 0);

        // Sunday after the last Saturday.
        clock.set(JAN_5_2026 + 13 * 24 * HOUR_MS);
        assert_eq!(sweep_once(&engine).await, 1);
        let after = engine.get_recurring_reservation(res.id).await.unwrap();
        assert_eq!(after.status, ReservationStatus::Ended);
        assert_eq!(sweep_once(&engine).await, 0);
    }

    #[tokio::test]
    async fn compaction_waits_for_threshold() {
        let path = test_wal_path("compactor.wal");
        let engine = Engine::new(
            path.clone(),
            Calendar::utc_default(),
            Arc::new(FixedClock::new(JAN_5_2026)),
        )
        .unwrap();
        for i in 0..3 {
            engine
                .create_room(Ulid::new(), format!("Room {i}"), 2, RoomStatus::Available)
                .await
                .unwrap();
        }
        assert!(!compact_if_needed(&engine, 10).await);
        assert!(compact_if_needed(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        let _ = std::fs::remove_file(&path);
    }
}

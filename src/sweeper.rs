use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::now_ms;

/// Background task that periodically force-expires overdue open
/// reservations. The sweep itself is `Engine::sweep_expired`, an
/// idempotent entry point any external scheduler can call; this task
/// is just the bundled timer.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.sweep_expired(now_ms()).await {
            Ok(0) => {}
            Ok(n) => info!("expired {n} overdue reservations"),
            Err(e) => tracing::warn!("expiration sweep failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::Notifier;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("reserva_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn engine_with_pending(path: &PathBuf, time_slot: Ms) -> (Arc<Engine>, Ulid) {
        let engine = Arc::new(Engine::open(path, Arc::new(Notifier::new())).unwrap());
        let pid = Ulid::new();
        engine.register_professional(pid, Ulid::new()).await.unwrap();

        // Seed a pending reservation directly through the WAL path the
        // engine itself uses, with a controlled deadline.
        let reservation = Reservation {
            id: Ulid::new(),
            professional_id: pid,
            client_id: Ulid::new(),
            category_id: Ulid::new(),
            city_id: Ulid::new(),
            time_slot,
            duration_hours: 1,
            expires_at: time_slot + 24 * HOUR_MS,
            status: ReservationStatus::Pending,
            is_modified_by_pro: false,
            confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
        };
        let rid = reservation.id;
        let shared = engine.professional(&pid).unwrap();
        let mut guard = shared.write_owned().await;
        engine
            .persist_and_apply(
                &mut guard,
                vec![Event::ReservationCreated {
                    reservation,
                    at: time_slot - 48 * HOUR_MS,
                }],
            )
            .await
            .unwrap();
        drop(guard);
        (engine, rid)
    }

    #[tokio::test]
    async fn sweep_expires_overdue_pending() {
        let path = test_wal_path("overdue.wal");
        let slot = 100 * 24 * HOUR_MS;
        let (engine, rid) = engine_with_pending(&path, slot).await;

        // One second past the deadline.
        let n = engine.sweep_expired(slot + 24 * HOUR_MS + 1_000).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            engine.get_reservation(rid).await.unwrap().status,
            ReservationStatus::Expired
        );
    }

    #[tokio::test]
    async fn sweep_leaves_undue_pending_alone() {
        let path = test_wal_path("undue.wal");
        let slot = 100 * 24 * HOUR_MS;
        let (engine, rid) = engine_with_pending(&path, slot).await;

        // One second before the deadline.
        let n = engine.sweep_expired(slot + 24 * HOUR_MS - 1_000).await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(
            engine.get_reservation(rid).await.unwrap().status,
            ReservationStatus::Pending
        );
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let path = test_wal_path("idempotent.wal");
        let slot = 100 * 24 * HOUR_MS;
        let (engine, _) = engine_with_pending(&path, slot).await;

        let late = slot + 48 * HOUR_MS;
        assert_eq!(engine.sweep_expired(late).await.unwrap(), 1);
        assert_eq!(engine.sweep_expired(late).await.unwrap(), 0);
    }
}

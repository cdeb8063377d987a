mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod recurrence;
mod store;
mod validate;

pub use availability::generate_slots;
pub use error::{EngineError, ValidationFailure};
pub use mutations::{NewBooking, NewPolicy, PolicyChanges, RoomChanges};
pub use recurrence::{build_occurrences, normalize_weekdays, NewRecurringReservation};
pub use store::Store;
pub use validate::{daily_end, is_duration_valid, is_within_working_hours, local_span};

use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::calendar::Calendar;
use crate::clock::Clock;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that are already queued when the first one arrives
/// are written together and share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
    debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so the next batch starts clean.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        warn!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {}
    }
}

/// A write transaction on one room: the room's write lock plus a share of
/// the commit gate. Dropping it ends the transaction.
pub(super) struct RoomTxn {
    guard: OwnedRwLockWriteGuard<RoomState>,
    _commit: OwnedRwLockReadGuard<()>,
}

impl Deref for RoomTxn {
    type Target = RoomState;

    fn deref(&self) -> &RoomState {
        &self.guard
    }
}

impl DerefMut for RoomTxn {
    fn deref_mut(&mut self) -> &mut RoomState {
        &mut self.guard
    }
}

/// Availability and conflict engine over an event-sourced, per-room store.
pub struct Engine {
    pub(super) store: Store,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) calendar: Calendar,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) lock_timeout: Duration,
    /// Writers hold it shared from lock acquisition to apply; compaction
    /// takes it exclusively so memory and log agree while it snapshots.
    pub(super) commit_gate: Arc<RwLock<()>>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, calendar: Calendar, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Store::new(),
            wal_tx,
            calendar,
            clock,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            commit_gate: Arc::new(RwLock::new(())),
        };

        // Sole owner of every lock during replay, so try_write never fails.
        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    engine
                        .store
                        .insert_room(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                other => {
                    let Some(rs) = engine.store.get_room(&other.room_id()) else {
                        warn!("replay: event for unknown room {}", other.room_id());
                        continue;
                    };
                    match rs.try_write() {
                        Ok(mut guard) => engine.store.apply_event(&mut guard, other),
                        Err(_) => warn!("replay: room {} unexpectedly locked", other.room_id()),
                    }
                }
            }
        }
        debug!("replayed {} events into {} rooms", events.len(), engine.store.room_count());

        Ok(engine)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Commit: WAL first, memory second. A failed append leaves memory untouched.
    pub(super) async fn persist_and_apply(
        &self,
        txn: &mut RoomTxn,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(txn, event);
        Ok(())
    }

    /// Commit an event that introduces `id`. The id is claimed before the
    /// append so concurrent creates with the same id cannot both succeed; a
    /// failed append releases it.
    pub(super) async fn persist_new_entity(
        &self,
        txn: &mut RoomTxn,
        id: Ulid,
        event: &Event,
    ) -> Result<(), EngineError> {
        if !self.store.claim_entity(id, txn.room.id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Err(e) = self.persist_and_apply(txn, event).await {
            self.store.release_entity(&id);
            return Err(e);
        }
        Ok(())
    }

    pub(super) fn shared_room(&self, room_id: Ulid) -> Result<SharedRoomState, EngineError> {
        self.store.get_room(&room_id).ok_or(EngineError::NotFound(room_id))
    }

    /// Begin a write transaction on a room, waiting at most `lock_timeout`.
    pub(super) async fn lock_room(&self, room_id: Ulid) -> Result<RoomTxn, EngineError> {
        let rs = self.shared_room(room_id)?;
        let gate = self.commit_gate.clone();
        let acquire = async move {
            let commit = gate.read_owned().await;
            let guard = rs.write_owned().await;
            RoomTxn {
                guard,
                _commit: commit,
            }
        };
        tokio::time::timeout(self.lock_timeout, acquire)
            .await
            .map_err(|_| self.lock_timed_out(room_id))
    }

    pub(super) async fn read_room(
        &self,
        room_id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<RoomState>, EngineError> {
        let rs = self.shared_room(room_id)?;
        tokio::time::timeout(self.lock_timeout, rs.read_owned())
            .await
            .map_err(|_| self.lock_timed_out(room_id))
    }

    /// Lookup entity → room, then begin a write transaction on that room.
    pub(super) async fn lock_entity_room(&self, entity_id: Ulid) -> Result<RoomTxn, EngineError> {
        let room_id = self
            .store
            .room_for_entity(&entity_id)
            .ok_or(EngineError::NotFound(entity_id))?;
        self.lock_room(room_id).await
    }

    fn lock_timed_out(&self, room_id: Ulid) -> EngineError {
        metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
        warn!("lock wait on room {room_id} exceeded {:?}", self.lock_timeout);
        EngineError::LockTimeout(room_id)
    }
}

/// Random alphanumeric token taken from the entropy part of fresh ULIDs.
pub(super) fn share_token(len: usize) -> String {
    let mut token = String::with_capacity(len);
    while token.len() < len {
        let encoded = Ulid::new().to_string();
        token.push_str(&encoded[10..]);
    }
    token.truncate(len);
    token
}

//! Placement gate: decides whether this client may place right now and holds the
//! single-submission lock while a placement is in flight.
//!
//! The lock is the only mutual-exclusion point for placements. A second attempt made while
//! the lock is held is rejected with a shake rather than queued behind the first one.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use thiserror::Error;
use tokio::{
    sync::{Mutex as AsyncMutex, OwnedMutexGuard, watch},
    time::sleep,
};
use tracing::debug;

use crate::state::cooldown::{Cooldown, TimeLeft, remaining};

/// What the client currently knows about its own user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserRecord {
    /// Nothing received yet for the current identity.
    #[default]
    Unloaded,
    /// The identity has never placed.
    Absent,
    /// The record exists but its timestamp has not been resolved by the store yet.
    Resolving,
    /// Last confirmed placement time.
    Present(SystemTime),
}

/// Eligibility derived from the user record, the submission phase and the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unloaded,
    Eligible,
    Cooling(TimeLeft),
    /// A placement is being submitted or confirmed.
    InFlight,
}

/// Phase of this client's own placement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Submission {
    #[default]
    Idle,
    /// The transaction has not returned yet.
    Submitting,
    /// The transaction committed; waiting for the user record to reflect it.
    Confirming { committed_at: SystemTime },
}

/// Why a placement attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("user record is still loading")]
    Loading,
    #[error("another placement is in flight")]
    Busy,
    #[error("the last placement is still being confirmed")]
    Resolving,
    #[error("{0}")]
    CoolingDown(TimeLeft),
}

/// Async mutex guarding the placement critical section.
#[derive(Debug, Clone, Default)]
pub struct PlacementLock {
    slot: Arc<AsyncMutex<()>>,
}

impl PlacementLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock without waiting.
    pub fn try_acquire(&self) -> Option<OwnedMutexGuard<()>> {
        self.slot.clone().try_lock_owned().ok()
    }

    pub fn is_locked(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}

/// Transient flag raised when a placement attempt is refused.
#[derive(Debug, Clone)]
pub struct ShakeSignal {
    tx: Arc<watch::Sender<bool>>,
    generation: Arc<AtomicU64>,
    duration: Duration,
}

impl ShakeSignal {
    pub fn new(duration: Duration) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
            duration,
        }
    }

    /// Raise the flag; it drops back after the configured duration unless raised again.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx.send_replace(true);
        let tx = self.tx.clone();
        let current = self.generation.clone();
        let duration = self.duration;
        tokio::spawn(async move {
            sleep(duration).await;
            if current.load(Ordering::SeqCst) == generation {
                tx.send_replace(false);
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_shaking(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Debug, Default)]
struct Ledger {
    submission: Submission,
    /// Newest resolved record timestamp seen for the current identity.
    last_record: Option<SystemTime>,
}

struct GateInner {
    lock: PlacementLock,
    interval: Duration,
    ledger: Mutex<Ledger>,
    submission_tx: watch::Sender<Submission>,
    shake: ShakeSignal,
}

#[derive(Clone)]
pub struct PlacementGate {
    inner: Arc<GateInner>,
}

impl PlacementGate {
    pub fn new(interval: Duration, shake_duration: Duration) -> Self {
        let (submission_tx, _rx) = watch::channel(Submission::Idle);
        Self {
            inner: Arc::new(GateInner {
                lock: PlacementLock::new(),
                interval,
                ledger: Mutex::new(Ledger::default()),
                submission_tx,
                shake: ShakeSignal::new(shake_duration),
            }),
        }
    }

    /// Cooldown interval enforced by this gate.
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Pure eligibility rule shared by the gate and the status projection.
    pub fn derive(
        record: UserRecord,
        submission: Submission,
        interval: Duration,
        now: SystemTime,
    ) -> GateState {
        match record {
            UserRecord::Unloaded => GateState::Unloaded,
            _ if submission != Submission::Idle => GateState::InFlight,
            UserRecord::Resolving => GateState::InFlight,
            UserRecord::Absent => GateState::Eligible,
            UserRecord::Present(last) => match remaining(last, interval, now) {
                Cooldown::Ready => GateState::Eligible,
                Cooldown::Remaining(left) => GateState::Cooling(left),
            },
        }
    }

    /// Current eligibility for `record` at `now`.
    pub fn evaluate(&self, record: UserRecord, now: SystemTime) -> GateState {
        let submission = self.ledger().submission;
        Self::derive(record, submission, self.inner.interval, now)
    }

    /// Claim the placement lock if the client is eligible.
    ///
    /// Refusals other than [`Rejection::Loading`] raise the shake signal.
    pub fn try_begin(
        &self,
        record: UserRecord,
        now: SystemTime,
    ) -> Result<PlacementPermit, Rejection> {
        let Some(guard) = self.inner.lock.try_acquire() else {
            self.inner.shake.trigger();
            return Err(Rejection::Busy);
        };

        let mut ledger = self.ledger();
        let rejection = match Self::derive(record, ledger.submission, self.inner.interval, now) {
            GateState::Eligible => {
                ledger.submission = Submission::Submitting;
                self.inner.submission_tx.send_replace(Submission::Submitting);
                return Ok(PlacementPermit {
                    gate: self.clone(),
                    settled: false,
                    _guard: guard,
                });
            }
            GateState::Unloaded => return Err(Rejection::Loading),
            GateState::InFlight if ledger.submission == Submission::Idle => Rejection::Resolving,
            GateState::InFlight => Rejection::Busy,
            GateState::Cooling(left) => Rejection::CoolingDown(left),
        };
        drop(ledger);
        self.inner.shake.trigger();
        Err(rejection)
    }

    /// Feed the latest user record so a pending confirmation can complete.
    pub fn observe_record(&self, record: UserRecord) {
        let mut ledger = self.ledger();
        match record {
            UserRecord::Present(at) => {
                ledger.last_record = ledger.last_record.max(Some(at));
                if let Submission::Confirming { committed_at } = ledger.submission {
                    if at >= committed_at {
                        debug!("placement confirmed by user record");
                        self.publish(&mut ledger, Submission::Idle);
                    }
                }
            }
            UserRecord::Unloaded => {
                // identity changed; any outstanding confirmation belonged to the previous one
                ledger.last_record = None;
                if matches!(ledger.submission, Submission::Confirming { .. }) {
                    self.publish(&mut ledger, Submission::Idle);
                }
            }
            UserRecord::Absent | UserRecord::Resolving => {}
        }
    }

    pub fn submission(&self) -> Submission {
        self.ledger().submission
    }

    pub fn subscribe_submission(&self) -> watch::Receiver<Submission> {
        self.inner.submission_tx.subscribe()
    }

    pub fn shake(&self) -> &ShakeSignal {
        &self.inner.shake
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock.is_locked()
    }

    fn settle(&self, outcome: Option<SystemTime>) {
        let mut ledger = self.ledger();
        let next = match outcome {
            Some(committed_at) if ledger.last_record >= Some(committed_at) => Submission::Idle,
            Some(committed_at) => Submission::Confirming { committed_at },
            None => Submission::Idle,
        };
        self.publish(&mut ledger, next);
    }

    fn publish(&self, ledger: &mut Ledger, submission: Submission) {
        ledger.submission = submission;
        self.inner.submission_tx.send_replace(submission);
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.inner
            .ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof that the placement lock is held. Dropping it without [`confirm`](Self::confirm)
/// abandons the attempt and leaves the cooldown untouched.
#[must_use = "dropping the permit abandons the placement"]
pub struct PlacementPermit {
    gate: PlacementGate,
    settled: bool,
    _guard: OwnedMutexGuard<()>,
}

impl PlacementPermit {
    /// Record a committed placement and release the lock.
    pub fn confirm(mut self, committed_at: SystemTime) {
        self.settled = true;
        self.gate.settle(Some(committed_at));
    }
}

impl Drop for PlacementPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.gate.settle(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(1_000);
    const SHAKE: Duration = Duration::from_millis(250);

    fn at(millis: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(millis)
    }

    #[test]
    fn derive_follows_record_and_submission() {
        let derive = |record, submission, now| PlacementGate::derive(record, submission, INTERVAL, now);

        assert_eq!(derive(UserRecord::Unloaded, Submission::Idle, at(0)), GateState::Unloaded);
        assert_eq!(derive(UserRecord::Absent, Submission::Idle, at(0)), GateState::Eligible);
        assert_eq!(derive(UserRecord::Resolving, Submission::Idle, at(0)), GateState::InFlight);
        assert_eq!(
            derive(UserRecord::Absent, Submission::Submitting, at(0)),
            GateState::InFlight
        );
        assert!(matches!(
            derive(UserRecord::Present(at(1_000)), Submission::Idle, at(1_400)),
            GateState::Cooling(left) if left.total == Duration::from_millis(600)
        ));
        assert_eq!(
            derive(UserRecord::Present(at(1_000)), Submission::Idle, at(2_000)),
            GateState::Eligible
        );
    }

    #[tokio::test]
    async fn permit_holds_the_lock_until_dropped() {
        let gate = PlacementGate::new(INTERVAL, SHAKE);
        let permit = gate.try_begin(UserRecord::Absent, at(0)).unwrap();
        assert!(gate.is_locked());
        assert_eq!(gate.submission(), Submission::Submitting);

        drop(permit);

        assert!(!gate.is_locked());
        assert_eq!(gate.submission(), Submission::Idle);
    }

    #[tokio::test]
    async fn concurrent_attempt_is_rejected_with_a_shake() {
        let gate = PlacementGate::new(INTERVAL, SHAKE);
        let _permit = gate.try_begin(UserRecord::Absent, at(0)).unwrap();

        let second = gate.try_begin(UserRecord::Absent, at(0));

        assert!(matches!(second, Err(Rejection::Busy)));
        assert!(gate.shake().is_shaking());
    }

    #[tokio::test]
    async fn loading_rejection_does_not_shake() {
        let gate = PlacementGate::new(INTERVAL, SHAKE);
        assert!(matches!(
            gate.try_begin(UserRecord::Unloaded, at(0)),
            Err(Rejection::Loading)
        ));
        assert!(!gate.shake().is_shaking());
        assert!(!gate.is_locked());
    }

    #[tokio::test]
    async fn cooling_rejection_reports_time_left() {
        let gate = PlacementGate::new(INTERVAL, SHAKE);
        let outcome = gate.try_begin(UserRecord::Present(at(1_000)), at(1_250));
        assert!(matches!(
            outcome,
            Err(Rejection::CoolingDown(left)) if left.total == Duration::from_millis(750)
        ));
        assert!(gate.shake().is_shaking());
    }

    #[tokio::test]
    async fn resolving_record_blocks_placement() {
        let gate = PlacementGate::new(INTERVAL, SHAKE);
        assert!(matches!(
            gate.try_begin(UserRecord::Resolving, at(0)),
            Err(Rejection::Resolving)
        ));
    }

    #[tokio::test]
    async fn confirmation_waits_for_the_user_record() {
        let gate = PlacementGate::new(INTERVAL, SHAKE);
        let permit = gate.try_begin(UserRecord::Absent, at(0)).unwrap();

        permit.confirm(at(5_000));
        assert_eq!(
            gate.submission(),
            Submission::Confirming { committed_at: at(5_000) }
        );
        assert!(!gate.is_locked());
        assert_eq!(gate.evaluate(UserRecord::Absent, at(5_000)), GateState::InFlight);

        gate.observe_record(UserRecord::Present(at(5_000)));
        assert_eq!(gate.submission(), Submission::Idle);
    }

    #[tokio::test]
    async fn record_arriving_before_commit_returns_settles_immediately() {
        let gate = PlacementGate::new(INTERVAL, SHAKE);
        let permit = gate.try_begin(UserRecord::Absent, at(0)).unwrap();

        gate.observe_record(UserRecord::Present(at(5_000)));
        permit.confirm(at(5_000));

        assert_eq!(gate.submission(), Submission::Idle);
    }

    #[tokio::test]
    async fn identity_change_abandons_pending_confirmation() {
        let gate = PlacementGate::new(INTERVAL, SHAKE);
        gate.try_begin(UserRecord::Absent, at(0)).unwrap().confirm(at(5_000));

        gate.observe_record(UserRecord::Unloaded);

        assert_eq!(gate.submission(), Submission::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn shake_resets_after_its_duration() {
        let signal = ShakeSignal::new(SHAKE);
        let mut rx = signal.subscribe();

        signal.trigger();
        assert!(*rx.borrow_and_update());

        sleep(SHAKE + Duration::from_millis(1)).await;
        assert!(!*rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_shake_extends_the_flag() {
        let signal = ShakeSignal::new(SHAKE);
        signal.trigger();
        sleep(Duration::from_millis(200)).await;
        signal.trigger();
        sleep(Duration::from_millis(100)).await;

        assert!(signal.is_shaking());
        sleep(Duration::from_millis(200)).await;
        assert!(!signal.is_shaking());
    }
}

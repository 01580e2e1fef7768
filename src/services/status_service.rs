//! Recomputes the placement status whenever its inputs change, and once a second while
//! a cooldown is running.

use std::{sync::Arc, time::SystemTime};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Duration, Instant, Interval, MissedTickBehavior, interval_at},
};
use tracing::trace;

use crate::state::{
    cooldown::Clock,
    gate::{PlacementGate, UserRecord},
    status::Status,
};

/// Period of the countdown refresh.
pub const TICK: Duration = Duration::from_secs(1);

pub fn spawn(
    gate: PlacementGate,
    records: watch::Receiver<UserRecord>,
    clock: Arc<dyn Clock>,
) -> (watch::Receiver<Status>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(Status::Loading);
    let handle = tokio::spawn(run(gate, records, clock, tx));
    (rx, handle)
}

pub async fn run(
    gate: PlacementGate,
    mut records: watch::Receiver<UserRecord>,
    clock: Arc<dyn Clock>,
    tx: watch::Sender<Status>,
) {
    let mut submissions = gate.subscribe_submission();
    let mut ticker: Option<Interval> = None;
    // record timestamp the running ticker counts down from
    let mut ticking_for: Option<SystemTime> = None;

    loop {
        let record = *records.borrow_and_update();
        let submission = *submissions.borrow_and_update();
        let status = Status::project(record, submission, &gate, clock.now());
        tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                trace!(status = %status, "status changed");
                *current = status;
                true
            }
        });

        match (record, status) {
            (UserRecord::Present(at), Status::Cooldown(left)) => {
                if ticking_for != Some(at) {
                    // land each tick on a whole second of the remaining time
                    let mut fresh = interval_at(Instant::now() + first_tick(left.total), TICK);
                    fresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker = Some(fresh);
                    ticking_for = Some(at);
                }
            }
            _ => {
                ticker = None;
                ticking_for = None;
            }
        }

        tokio::select! {
            changed = records.changed() => if changed.is_err() { return },
            changed = submissions.changed() => if changed.is_err() { return },
            _ = next_tick(&mut ticker) => {}
        }
    }
}

fn first_tick(remaining: Duration) -> Duration {
    match remaining.subsec_nanos() {
        0 => TICK,
        nanos => Duration::from_nanos(u64::from(nanos)),
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

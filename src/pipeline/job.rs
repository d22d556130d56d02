use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use crate::error::ErrorKind;
use crate::unit::UnitId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    /// Units that reached `done` or `failed`. Never decreases.
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSnapshot {
    pub units: Vec<UnitId>,
    pub status: BTreeMap<UnitId, UnitStatus>,
    pub errors: BTreeMap<UnitId, ErrorKind>,
}

impl JobSnapshot {
    pub fn count(&self, status: UnitStatus) -> usize {
        self.status.values().filter(|value| **value == status).count()
    }
}

/// Execution record for one batch. Units are registered as documents open
/// and settle exactly once; a settled unit cannot change again.
pub struct Job {
    state: Mutex<JobSnapshot>,
    cancelled: AtomicBool,
    progress: watch::Sender<JobProgress>,
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

impl Job {
    pub fn new() -> Self {
        let (progress, _) = watch::channel(JobProgress::default());
        Self {
            state: Mutex::new(JobSnapshot::default()),
            cancelled: AtomicBool::new(false),
            progress,
        }
    }

    pub fn register(&self, units: &[UnitId]) {
        let added = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let mut added = 0;
            for unit in units {
                if state.status.contains_key(unit) {
                    continue;
                }
                state.units.push(*unit);
                state.status.insert(*unit, UnitStatus::Pending);
                added += 1;
            }
            added
        };
        self.progress.send_modify(|progress| progress.total += added);
    }

    /// Settles a unit as done or failed. Later calls for the same unit are
    /// ignored.
    pub fn settle(&self, unit: UnitId, outcome: Result<(), ErrorKind>) {
        let failed = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.status.get(&unit) != Some(&UnitStatus::Pending) {
                return;
            }
            match outcome {
                Ok(()) => {
                    state.status.insert(unit, UnitStatus::Done);
                    false
                }
                Err(err) => {
                    state.status.insert(unit, UnitStatus::Failed);
                    state.errors.insert(unit, err);
                    true
                }
            }
        };
        self.progress.send_modify(|progress| {
            progress.completed += 1;
            if failed {
                progress.failed += 1;
            }
        });
    }

    /// Stops units that have not started yet. Work already in flight runs
    /// to completion.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<JobProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> JobProgress {
        *self.progress.borrow()
    }

    pub fn status(&self, unit: UnitId) -> Option<UnitStatus> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.status.get(&unit).copied())
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(document: usize, index: usize) -> UnitId {
        UnitId { document, index }
    }

    #[test]
    fn settles_each_unit_once() {
        let job = Job::new();
        job.register(&[unit(0, 0), unit(0, 1), unit(1, 0)]);
        job.settle(unit(0, 1), Ok(()));
        job.settle(unit(1, 0), Err(ErrorKind::UnsupportedFormat("corrupt".into())));
        job.settle(unit(1, 0), Ok(()));

        let snapshot = job.snapshot();
        assert_eq!(snapshot.count(UnitStatus::Done), 1);
        assert_eq!(snapshot.count(UnitStatus::Failed), 1);
        assert_eq!(snapshot.count(UnitStatus::Pending), 1);
        assert_eq!(
            job.progress(),
            JobProgress {
                completed: 2,
                failed: 1,
                total: 3
            }
        );
    }

    #[test]
    fn snapshot_serializes_status_and_errors() {
        let job = Job::new();
        job.register(&[unit(0, 0), unit(1, 0)]);
        job.settle(unit(0, 0), Ok(()));
        job.settle(unit(1, 0), Err(ErrorKind::Translation("all tiers exhausted".into())));
        let snapshot = job.snapshot();
        let value = serde_json::json!({
            "status": snapshot.status.iter().map(|(id, status)| (id.to_string(), *status)).collect::<BTreeMap<_, _>>(),
            "errors": snapshot.errors.iter().map(|(id, err)| (id.to_string(), err.clone())).collect::<BTreeMap<_, _>>(),
        });
        insta::assert_json_snapshot!(value, @r#"
        {
          "errors": {
            "1:0": {
              "kind": "translation",
              "message": "all tiers exhausted"
            }
          },
          "status": {
            "0:0": "done",
            "1:0": "failed"
          }
        }
        "#);
    }

    #[tokio::test]
    async fn subscribers_see_monotonic_progress() {
        let job = Job::new();
        let mut progress = job.subscribe();
        job.register(&[unit(0, 0), unit(0, 1)]);
        job.settle(unit(0, 0), Ok(()));
        progress.changed().await.unwrap();
        assert_eq!(progress.borrow_and_update().completed, 1);
        job.cancel();
        assert!(job.is_cancelled());
    }
}

//! Publication slot between preparation jobs and the render thread.
//!
//! Only the most recently begun job may publish, a list is stored and taken
//! whole, and every begun job gets exactly one `PreparationFinished`.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::events::{JobId, JobOutcome, SessionEvent};
use crate::render::tile::Tile;

#[derive(Default)]
struct Slot {
    current: u64,
    settled: bool,
    pending: Option<Vec<Tile>>,
}

pub struct Handoff {
    slot: Mutex<Slot>,
    events: Sender<SessionEvent>,
}

impl Handoff {
    pub fn new(events: Sender<SessionEvent>) -> Self {
        Self {
            slot: Mutex::new(Slot {
                settled: true,
                ..Slot::default()
            }),
            events,
        }
    }

    fn emit(&self, event: SessionEvent) {
        // The host may have dropped its receiver; nothing to do then.
        let _ = self.events.send(event);
    }

    /// Register a new job, superseding whatever was in flight.
    pub fn begin(&self) -> JobId {
        let mut slot = self.slot.lock();
        if !slot.settled {
            let old = JobId(slot.current);
            debug!(job = %old, "superseded");
            self.emit(SessionEvent::PreparationFinished {
                job: old,
                outcome: JobOutcome::Superseded,
            });
        }
        slot.current += 1;
        slot.settled = false;
        slot.pending = None;
        let job = JobId(slot.current);
        self.emit(SessionEvent::PreparationStarted { job });
        job
    }

    /// Store the finished list. Returns false when `job` is no longer current.
    pub fn publish(&self, job: JobId, tiles: Vec<Tile>) -> bool {
        let mut slot = self.slot.lock();
        if slot.current != job.0 || slot.settled {
            debug!(job = %job, "discarding stale tile list");
            return false;
        }
        slot.pending = Some(tiles);
        true
    }

    pub fn fail(&self, job: JobId, err: &Error) {
        let mut slot = self.slot.lock();
        if slot.current != job.0 || slot.settled {
            return;
        }
        slot.settled = true;
        slot.pending = None;
        warn!(job = %job, error = %err, "preparation failed");
        self.emit(SessionEvent::PreparationFinished {
            job,
            outcome: JobOutcome::Failed(err.to_string()),
        });
    }

    /// Take the published list, if any, and report the job as adopted.
    pub fn take(&self) -> Option<(JobId, Vec<Tile>)> {
        let mut slot = self.slot.lock();
        let tiles = slot.pending.take()?;
        slot.settled = true;
        let job = JobId(slot.current);
        info!(job = %job, tiles = tiles.len(), "tile list adopted");
        self.emit(SessionEvent::PreparationFinished {
            job,
            outcome: JobOutcome::Adopted,
        });
        Some((job, tiles))
    }

    /// Settle the in-flight job, if any, without a successor. Used on detach.
    pub fn abandon(&self) {
        let mut slot = self.slot.lock();
        if slot.settled {
            return;
        }
        slot.settled = true;
        slot.pending = None;
        let job = JobId(slot.current);
        debug!(job = %job, "abandoned");
        self.emit(SessionEvent::PreparationFinished {
            job,
            outcome: JobOutcome::Superseded,
        });
    }

    pub fn current(&self) -> JobId {
        JobId(self.slot.lock().current)
    }

    pub fn is_settled(&self) -> bool {
        self.slot.lock().settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::layout::Rect;
    use crate::render::tile::FaceContent;
    use image::Rgba;

    fn tiles(n: usize) -> Vec<Tile> {
        let color = FaceContent::Color(Rgba([1, 2, 3, 255]));
        (0..n)
            .map(|_| Tile::new(Rect::new(0, 0, 1, 1), color.clone(), color.clone()))
            .collect()
    }

    #[test]
    fn stale_job_cannot_publish() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handoff = Handoff::new(tx);
        let first = handoff.begin();
        let second = handoff.begin();
        assert!(!handoff.publish(first, tiles(1)));
        assert!(handoff.publish(second, tiles(4)));
        let (job, list) = handoff.take().unwrap();
        assert_eq!(job, second);
        assert_eq!(list.len(), 4);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                SessionEvent::PreparationStarted { job: first },
                SessionEvent::PreparationFinished {
                    job: first,
                    outcome: JobOutcome::Superseded
                },
                SessionEvent::PreparationStarted { job: second },
                SessionEvent::PreparationFinished {
                    job: second,
                    outcome: JobOutcome::Adopted
                },
            ]
        );
    }

    #[test]
    fn published_but_untaken_list_is_dropped_by_next_job() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handoff = Handoff::new(tx);
        let first = handoff.begin();
        assert!(handoff.publish(first, tiles(1)));
        let second = handoff.begin();
        assert!(handoff.take().is_none());
        assert!(!handoff.is_settled());
        assert_eq!(handoff.current(), second);
        let finished = rx
            .try_iter()
            .filter(|e| matches!(e, SessionEvent::PreparationFinished { job, .. } if *job == first))
            .count();
        assert_eq!(finished, 1);
    }

    #[test]
    fn abandoned_job_finishes_once_and_cannot_publish() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handoff = Handoff::new(tx);
        let job = handoff.begin();
        handoff.abandon();
        handoff.abandon();
        assert!(handoff.is_settled());
        assert!(!handoff.publish(job, tiles(1)));
        assert!(handoff.take().is_none());
        // the next job has nothing left to supersede
        let next = handoff.begin();
        assert!(next > job);

        let finished: Vec<_> = rx
            .try_iter()
            .filter(|e| matches!(e, SessionEvent::PreparationFinished { .. }))
            .collect();
        assert_eq!(
            finished,
            vec![SessionEvent::PreparationFinished {
                job,
                outcome: JobOutcome::Superseded
            }]
        );
    }

    #[test]
    fn abandon_after_adoption_reports_nothing() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handoff = Handoff::new(tx);
        let job = handoff.begin();
        assert!(handoff.publish(job, tiles(2)));
        handoff.take().unwrap();
        handoff.abandon();
        let finished = rx
            .try_iter()
            .filter(|e| matches!(e, SessionEvent::PreparationFinished { .. }))
            .count();
        assert_eq!(finished, 1);
    }

    #[test]
    fn failure_is_reported_once() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handoff = Handoff::new(tx);
        let job = handoff.begin();
        handoff.fail(job, &Error::Geometry("too small".into()));
        handoff.fail(job, &Error::Geometry("too small".into()));
        assert!(!handoff.publish(job, tiles(1)));
        // a new job after a failure is not reported as superseding anything
        handoff.begin();
        let finished: Vec<_> = rx
            .try_iter()
            .filter(|e| matches!(e, SessionEvent::PreparationFinished { .. }))
            .collect();
        assert_eq!(finished.len(), 1);
        assert!(matches!(
            &finished[0],
            SessionEvent::PreparationFinished { outcome: JobOutcome::Failed(reason), .. }
                if reason.contains("too small")
        ));
    }
}

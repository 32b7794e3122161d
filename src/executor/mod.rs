//! Bounded parallel execution of feature modules.
//!
//! Each planned module becomes an independent task on a rayon pool of
//! `max_workers` threads. Workers report back over a crossbeam channel, so
//! the aggregation loop sees completions strictly in the order they happen.
//! A [`Dispatch`] tracks the in-flight modules of one pass: it converts
//! timeouts into fault completions, honours a shared cancel flag, and at the
//! end tells apart modules that never started from those still running.

mod task;

pub use task::ModuleEvent;

use crate::aggregator::ModuleCompletion;
use crate::error::Result;
use crate::features::FeatureModule;
use crate::patch::ElevationPatch;
use crate::profile::DetectorProfile;
use crate::types::{FaultKind, ModuleFault, ModuleStatus, Polarity};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use task::ModuleTask;

/// A module instance ready for dispatch.
#[derive(Clone)]
pub struct PlannedModule {
    pub name: String,
    pub weight: f32,
    pub preference: Option<Polarity>,
    pub module: Arc<dyn FeatureModule>,
}

impl std::fmt::Debug for PlannedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedModule")
            .field("name", &self.name)
            .field("kind", &self.module.kind())
            .field("weight", &self.weight)
            .finish()
    }
}

/// Worker pool shared by every detection run through one detector.
pub struct ModuleExecutor {
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for ModuleExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleExecutor")
            .field("workers", &self.workers())
            .finish()
    }
}

impl ModuleExecutor {
    pub fn new(max_workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_workers.max(1))
            .thread_name(|i| format!("feature-worker-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue every module in planned order and return the pass handle.
    pub fn dispatch(
        &self,
        patch: Arc<ElevationPatch>,
        profile: Arc<DetectorProfile>,
        modules: &[PlannedModule],
    ) -> Dispatch {
        let (tx, rx) = crossbeam_channel::unbounded();
        let cancel = Arc::new(AtomicBool::new(false));
        let timeout = profile.module_timeout_ms.map(Duration::from_millis);
        let dispatched_at = Instant::now();

        for (index, planned) in modules.iter().enumerate() {
            let task = ModuleTask {
                index,
                name: planned.name.clone(),
                module: Arc::clone(&planned.module),
                patch: Arc::clone(&patch),
                profile: Arc::clone(&profile),
                cancel: Arc::clone(&cancel),
                events: tx.clone(),
            };
            self.pool.spawn(move || task.run());
        }
        debug!("dispatched {} modules on {} workers", modules.len(), self.workers());

        Dispatch {
            events: rx,
            cancel,
            timeout,
            dispatched_at,
            slots: modules
                .iter()
                .map(|m| Slot {
                    name: m.name.clone(),
                    weight: m.weight,
                    preference: m.preference,
                    started: None,
                    settled: false,
                })
                .collect(),
        }
    }
}

#[derive(Debug)]
struct Slot {
    name: String,
    weight: f32,
    preference: Option<Polarity>,
    started: Option<Instant>,
    settled: bool,
}

/// What the aggregation loop receives next from a [`Dispatch`].
#[derive(Debug)]
pub enum Delivery {
    /// A module finished, failed or timed out.
    Completed(ModuleCompletion),
    /// A module never started because the pass was cancelled.
    Skipped { name: String, weight: f32 },
}

/// In-flight state of one dispatched pass.
#[derive(Debug)]
pub struct Dispatch {
    events: Receiver<ModuleEvent>,
    cancel: Arc<AtomicBool>,
    timeout: Option<Duration>,
    dispatched_at: Instant,
    slots: Vec<Slot>,
}

impl Dispatch {
    /// Ask queued tasks to skip themselves. Running tasks are not interrupted.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn unsettled(&self) -> usize {
        self.slots.iter().filter(|s| !s.settled).count()
    }

    /// Earliest point at which an unsettled module counts as timed out.
    ///
    /// Queued modules get the whole queue's budget, so a pool blocked by
    /// hung workers cannot stall the pass forever.
    fn next_timeout(&self) -> Option<(usize, Instant)> {
        let timeout = self.timeout?;
        let queue_budget = timeout * self.slots.len().max(1) as u32;
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.settled)
            .map(|(i, s)| match s.started {
                Some(at) => (i, at + timeout),
                None => (i, self.dispatched_at + queue_budget),
            })
            .min_by_key(|(_, deadline)| *deadline)
    }

    fn timed_out(&mut self, index: usize) -> Delivery {
        let slot = &mut self.slots[index];
        slot.settled = true;
        let waited = slot
            .started
            .unwrap_or(self.dispatched_at)
            .elapsed()
            .as_secs_f64()
            * 1000.0;
        warn!("module `{}` timed out after {:.1} ms", slot.name, waited);
        Delivery::Completed(ModuleCompletion {
            name: slot.name.clone(),
            weight: slot.weight,
            preference: slot.preference,
            outcome: Err(ModuleFault::new(
                FaultKind::Timeout,
                format!("no result within {} ms", self.timeout.map_or(0, |t| t.as_millis())),
            )),
            elapsed_ms: waited,
        })
    }

    /// Block until the next module settles.
    ///
    /// Returns `None` once every module has settled, or when `until` passes
    /// first.
    pub fn next(&mut self, until: Option<Instant>) -> Option<Delivery> {
        loop {
            if self.unsettled() == 0 {
                return None;
            }
            let timeout = self.next_timeout();
            let deadline = match (timeout.map(|(_, d)| d), until) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };

            let received = match deadline {
                Some(deadline) => self.events.recv_deadline(deadline),
                None => self.events.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            let event = match received {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    if let Some((index, at)) = timeout {
                        if at <= now {
                            return Some(self.timed_out(index));
                        }
                    }
                    if until.is_some_and(|u| u <= now) {
                        return None;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("worker channel closed with {} modules unsettled", self.unsettled());
                    return None;
                }
            };

            match event {
                ModuleEvent::Started { index, at } => {
                    if let Some(slot) = self.slots.get_mut(index) {
                        slot.started = Some(at);
                    }
                }
                ModuleEvent::Finished {
                    index,
                    outcome,
                    elapsed_ms,
                } => {
                    let Some(slot) = self.slots.get_mut(index) else {
                        continue;
                    };
                    if slot.settled {
                        debug!("discarding result of `{}` after its timeout", slot.name);
                        continue;
                    }
                    slot.settled = true;
                    debug!("module `{}` finished in {:.2} ms", slot.name, elapsed_ms);
                    return Some(Delivery::Completed(ModuleCompletion {
                        name: slot.name.clone(),
                        weight: slot.weight,
                        preference: slot.preference,
                        outcome,
                        elapsed_ms,
                    }));
                }
                ModuleEvent::Skipped { index } => {
                    let Some(slot) = self.slots.get_mut(index) else {
                        continue;
                    };
                    slot.settled = true;
                    return Some(Delivery::Skipped {
                        name: slot.name.clone(),
                        weight: slot.weight,
                    });
                }
            }
        }
    }

    /// Status of every module still unsettled when the pass stops waiting:
    /// `Abandoned` if it started, `Skipped` if it never did.
    pub fn abandon(self) -> Vec<(String, f32, ModuleStatus)> {
        self.cancel();
        self.slots
            .into_iter()
            .filter(|s| !s.settled)
            .map(|s| {
                let status = if s.started.is_some() {
                    ModuleStatus::Abandoned
                } else {
                    ModuleStatus::Skipped
                };
                (s.name, s.weight, status)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModuleError;
    use crate::features::FeatureOutput;
    use crate::profile::GeometryConfig;
    use crate::types::GeoPoint;

    struct Sleepy {
        ms: u64,
        score: f32,
    }

    impl FeatureModule for Sleepy {
        fn kind(&self) -> &str {
            "sleepy"
        }

        fn compute(
            &self,
            _patch: &ElevationPatch,
            _geometry: &GeometryConfig,
        ) -> std::result::Result<FeatureOutput, ModuleError> {
            std::thread::sleep(Duration::from_millis(self.ms));
            Ok(FeatureOutput::scored(self.score))
        }
    }

    fn planned(name: &str, ms: u64) -> PlannedModule {
        PlannedModule {
            name: name.into(),
            weight: 1.0,
            preference: Some(Polarity::Positive),
            module: Arc::new(Sleepy { ms, score: 0.7 }),
        }
    }

    fn patch() -> Arc<ElevationPatch> {
        Arc::new(ElevationPatch::new(8, 8, 1.0, vec![0.0; 64], GeoPoint::default()).unwrap())
    }

    fn completed_names(dispatch: &mut Dispatch) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(delivery) = dispatch.next(None) {
            if let Delivery::Completed(c) = delivery {
                names.push(c.name);
            }
        }
        names
    }

    #[test]
    fn completions_arrive_in_completion_order() {
        let executor = ModuleExecutor::new(2).unwrap();
        let modules = [planned("slow", 150), planned("fast", 0)];
        let mut dispatch =
            executor.dispatch(patch(), Arc::new(DetectorProfile::windmill()), &modules);
        assert_eq!(completed_names(&mut dispatch), vec!["fast", "slow"]);
    }

    #[test]
    fn hung_module_times_out() {
        let executor = ModuleExecutor::new(2).unwrap();
        let mut profile = DetectorProfile::windmill();
        profile.module_timeout_ms = Some(50);
        let modules = [planned("hung", 2_000), planned("quick", 0)];
        let mut dispatch = executor.dispatch(patch(), Arc::new(profile), &modules);
        let mut faults = Vec::new();
        while let Some(Delivery::Completed(c)) = dispatch.next(None) {
            if let Err(fault) = c.outcome {
                faults.push((c.name, fault.kind));
            }
        }
        assert_eq!(faults, vec![("hung".to_string(), FaultKind::Timeout)]);
    }

    #[test]
    fn cancelled_queue_is_skipped() {
        let executor = ModuleExecutor::new(1).unwrap();
        let modules = [planned("first", 100), planned("second", 0), planned("third", 0)];
        let mut dispatch =
            executor.dispatch(patch(), Arc::new(DetectorProfile::windmill()), &modules);
        dispatch.cancel();
        let mut skipped = 0;
        while let Some(delivery) = dispatch.next(None) {
            if matches!(delivery, Delivery::Skipped { .. }) {
                skipped += 1;
            }
        }
        assert!(skipped >= 2);
    }

    #[test]
    fn abandon_splits_started_from_queued() {
        let executor = ModuleExecutor::new(1).unwrap();
        let modules = [planned("running", 300), planned("queued", 0)];
        let mut dispatch =
            executor.dispatch(patch(), Arc::new(DetectorProfile::windmill()), &modules);
        let until = Instant::now() + Duration::from_millis(60);
        assert!(dispatch.next(Some(until)).is_none());
        let leftovers = dispatch.abandon();
        assert_eq!(
            leftovers,
            vec![
                ("running".to_string(), 1.0, ModuleStatus::Abandoned),
                ("queued".to_string(), 1.0, ModuleStatus::Skipped),
            ]
        );
    }
}

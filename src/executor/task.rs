use crate::diagnostics::timing::elapsed_ms;
use crate::features::{FeatureModule, FeatureOutput};
use crate::patch::ElevationPatch;
use crate::profile::DetectorProfile;
use crate::types::{FaultKind, ModuleFault};
use crossbeam_channel::Sender;
use log::warn;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Message sent from a worker back to the aggregation loop.
#[derive(Debug)]
pub enum ModuleEvent {
    Started {
        index: usize,
        at: Instant,
    },
    Finished {
        index: usize,
        outcome: Result<FeatureOutput, ModuleFault>,
        elapsed_ms: f64,
    },
    /// The cancel flag was already set when the worker picked the task up.
    Skipped { index: usize },
}

/// One module invocation, owning everything it reads.
pub(crate) struct ModuleTask {
    pub index: usize,
    pub name: String,
    pub module: Arc<dyn FeatureModule>,
    pub patch: Arc<ElevationPatch>,
    pub profile: Arc<DetectorProfile>,
    pub cancel: Arc<AtomicBool>,
    pub events: Sender<ModuleEvent>,
}

impl ModuleTask {
    pub(crate) fn run(self) {
        let index = self.index;
        if self.cancel.load(Ordering::Acquire) {
            let _ = self.events.send(ModuleEvent::Skipped { index });
            return;
        }
        let start = Instant::now();
        let _ = self.events.send(ModuleEvent::Started { index, at: start });

        let computed = catch_unwind(AssertUnwindSafe(|| {
            self.module.compute(&self.patch, &self.profile.geometry)
        }));
        let outcome = match computed {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => {
                warn!("module `{}` failed: {err}", self.name);
                Err(ModuleFault::new(FaultKind::Error, err.to_string()))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("module `{}` panicked: {message}", self.name);
                Err(ModuleFault::new(FaultKind::Panic, message))
            }
        };
        // The receiver is gone once the detector stopped waiting.
        let _ = self.events.send(ModuleEvent::Finished {
            index,
            outcome,
            elapsed_ms: elapsed_ms(start),
        });
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "module panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModuleError;
    use crate::profile::GeometryConfig;
    use crate::types::GeoPoint;

    struct Exploding;

    impl FeatureModule for Exploding {
        fn kind(&self) -> &str {
            "exploding"
        }

        fn compute(
            &self,
            _patch: &ElevationPatch,
            _geometry: &GeometryConfig,
        ) -> Result<FeatureOutput, ModuleError> {
            panic!("kaboom")
        }
    }

    fn task(cancelled: bool) -> (ModuleTask, crossbeam_channel::Receiver<ModuleEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let patch = ElevationPatch::new(4, 4, 1.0, vec![0.0; 16], GeoPoint::default()).unwrap();
        let task = ModuleTask {
            index: 3,
            name: "exploding".into(),
            module: Arc::new(Exploding),
            patch: Arc::new(patch),
            profile: Arc::new(DetectorProfile::windmill()),
            cancel: Arc::new(AtomicBool::new(cancelled)),
            events: tx,
        };
        (task, rx)
    }

    #[test]
    fn panic_is_reported_as_fault() {
        let (task, rx) = task(false);
        task.run();
        assert!(matches!(rx.recv().unwrap(), ModuleEvent::Started { index: 3, .. }));
        match rx.recv().unwrap() {
            ModuleEvent::Finished { outcome: Err(fault), .. } => {
                assert_eq!(fault.kind, FaultKind::Panic);
                assert_eq!(fault.message, "kaboom");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn cancelled_task_does_not_compute() {
        let (task, rx) = task(true);
        task.run();
        assert!(matches!(rx.recv().unwrap(), ModuleEvent::Skipped { index: 3 }));
        assert!(rx.try_recv().is_err());
    }
}

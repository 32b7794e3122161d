use crate::aggregator::{HistorySnapshot, StreamingState};
use crate::types::FeatureResult;
use log::error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Incremental view handed to observers after each aggregated module.
#[derive(Clone, Debug)]
pub struct ProgressUpdate {
    pub module: String,
    pub result: FeatureResult,
    pub snapshot: HistorySnapshot,
    pub state: StreamingState,
    /// 0 for the streaming pass, `n` for the `n`-th refinement pass.
    pub pass: usize,
}

/// Listener invoked synchronously on the detecting thread.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Observer list; a panicking observer is logged and does not stop the others.
#[derive(Clone, Default)]
pub(crate) struct Observers {
    list: Vec<Arc<dyn ProgressObserver>>,
}

impl Observers {
    pub(crate) fn push(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.list.push(observer);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub(crate) fn notify(&self, update: &ProgressUpdate) {
        for observer in &self.list {
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_progress(update)));
            if outcome.is_err() {
                error!("progress observer panicked on module `{}`", update.module);
            }
        }
    }
}

//! Compensation for workflows that span more than one transactional
//! boundary. Each completed forward step registers its undo; on failure the
//! undos run newest first.

use std::{future::Future, pin::Pin};

use tracing::{error, info};

type Undo = Box<
    dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send,
>;

#[derive(Debug)]
pub struct CompensationFailure {
    pub step: &'static str,
    pub error: anyhow::Error,
}

pub struct Saga {
    name: &'static str,
    undo: Vec<(&'static str, Undo)>,
}

impl Saga {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            undo: Vec::new(),
        }
    }

    /// Registers the undo for a forward step that has just succeeded.
    pub fn completed<F, Fut>(&mut self, step: &'static str, undo: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.undo.push((step, Box::new(move || Box::pin(undo()))));
    }

    /// Runs every registered undo, newest first. Failures are logged and
    /// returned; they never stop the remaining undos.
    pub async fn compensate(self) -> Vec<CompensationFailure> {
        let mut failures = Vec::new();
        for (step, undo) in self.undo.into_iter().rev() {
            match undo().await {
                Ok(()) => info!(saga = self.name, step, "compensation applied"),
                Err(error) => {
                    error!(saga = self.name, step, error = %format!("{error:#}"), "compensation failed");
                    failures.push(CompensationFailure { step, error });
                }
            }
        }
        failures
    }

    /// All steps succeeded; the undos are discarded.
    pub fn commit(self) {
        info!(saga = self.name, steps = self.undo.len(), "saga completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn undoes_in_reverse_order() {
        let log = recorder();
        let mut saga = Saga::new("test");
        for step in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            saga.completed(step, move || async move {
                log.lock().unwrap().push(step);
                Ok(())
            });
        }
        assert!(saga.compensate().await.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn failing_undo_does_not_stop_the_rest() {
        let log = recorder();
        let mut saga = Saga::new("test");
        let first = Arc::clone(&log);
        saga.completed("first", move || async move {
            first.lock().unwrap().push("first");
            Ok(())
        });
        saga.completed("broken", || async { Err(anyhow::anyhow!("store unavailable")) });

        let failures = saga.compensate().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].step, "broken");
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn commit_runs_nothing() {
        let log = recorder();
        let mut saga = Saga::new("test");
        let inner = Arc::clone(&log);
        saga.completed("step", move || async move {
            inner.lock().unwrap().push("undo");
            Ok(())
        });
        saga.commit();
        assert!(log.lock().unwrap().is_empty());
    }
}

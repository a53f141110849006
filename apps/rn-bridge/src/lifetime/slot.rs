use crate::sandbox::DebuggeeWorker;
use std::sync::Arc;

/// Holds the current worker lifetime. At most one exists at a time: the
/// previous one is always stopped before its replacement is stored.
#[derive(Default)]
pub struct LifetimeSlot {
    current: Option<Arc<dyn DebuggeeWorker>>,
    generation: u64,
}

impl LifetimeSlot {
    /// Stops whatever lifetime is current, then builds and installs the next
    /// one. `create` only runs after the previous lifetime was stopped.
    pub fn replace_with<F>(&mut self, create: F) -> (u64, Arc<dyn DebuggeeWorker>)
    where
        F: FnOnce() -> Arc<dyn DebuggeeWorker>,
    {
        self.kill();
        let worker = create();
        self.generation += 1;
        self.current = Some(Arc::clone(&worker));
        (self.generation, worker)
    }

    /// Stops and clears the current lifetime. Returns whether there was one.
    pub fn kill(&mut self) -> bool {
        match self.current.take() {
            Some(worker) => {
                worker.stop();
                true
            }
            None => false,
        }
    }

    pub fn current(&self) -> Option<Arc<dyn DebuggeeWorker>> {
        self.current.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current.is_some() && self.generation == generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;
    use crate::sandbox::WorkerStarted;
    use async_trait::async_trait;
    use packager_protocol::AppMessage;
    use parking_lot::Mutex;

    /// Records stop/create order into a shared journal.
    struct JournalWorker {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl JournalWorker {
        fn create(name: &'static str, journal: &Arc<Mutex<Vec<String>>>) -> Arc<dyn DebuggeeWorker> {
            journal.lock().push(format!("create {name}"));
            Arc::new(Self {
                name,
                journal: Arc::clone(journal),
            })
        }
    }

    #[async_trait]
    impl DebuggeeWorker for JournalWorker {
        async fn start(&self) -> Result<WorkerStarted, SandboxError> {
            Ok(WorkerStarted {
                inspector_port: 9229,
                pid: None,
            })
        }

        fn stop(&self) {
            self.journal.lock().push(format!("stop {}", self.name));
        }

        fn post_message(&self, _message: AppMessage) {}
    }

    #[test]
    fn replace_stops_previous_before_storing_next() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut slot = LifetimeSlot::default();

        let (first, _) = slot.replace_with(|| JournalWorker::create("a", &journal));
        let (second, _) = slot.replace_with(|| JournalWorker::create("b", &journal));

        assert_eq!(*journal.lock(), ["create a", "stop a", "create b"]);
        assert!(second > first);
        assert!(slot.is_current(second));
        assert!(!slot.is_current(first));
    }

    #[test]
    fn kill_clears_and_is_idempotent() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut slot = LifetimeSlot::default();
        let (generation, _) = slot.replace_with(|| JournalWorker::create("a", &journal));

        assert!(slot.kill());
        assert!(!slot.kill());
        assert!(slot.current().is_none());
        assert!(!slot.is_current(generation));
        assert_eq!(*journal.lock(), ["create a", "stop a"]);
    }

    #[test]
    fn empty_slot_replaces_without_stopping() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut slot = LifetimeSlot::default();
        let (generation, worker) = slot.replace_with(|| JournalWorker::create("a", &journal));
        assert_eq!(generation, 1);
        assert!(Arc::ptr_eq(&worker, &slot.current().unwrap()));
        assert_eq!(slot.generation(), 1);
        assert_eq!(*journal.lock(), ["create a"]);
    }
}

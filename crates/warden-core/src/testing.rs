// ABOUTME: In-memory ProcessManager and ParentChannel for exercising the supervisor and worker monitor.
// ABOUTME: Lets tests spawn, silence, kill and heartbeat fake workers without real processes.

use crate::error::WardenError;
use crate::manager::{ExitReason, ProcessManager, WorkerEvent};
use crate::protocol::{Directive, WorkerId, WorkerMessage};
use crate::worker::ParentChannel;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Default)]
struct MockState {
    workers: Vec<WorkerId>,
    observers: HashMap<WorkerId, mpsc::Sender<WorkerEvent>>,
    sent: Vec<(WorkerId, Directive)>,
    enumerations: usize,
    fail_enumerate: bool,
    fail_attach: HashSet<WorkerId>,
    fail_send: HashSet<WorkerId>,
}

/// Fake process manager. Clones share state.
#[derive(Clone, Default)]
pub struct MockProcessManager {
    state: Arc<Mutex<MockState>>,
}

impl MockProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(ids: impl IntoIterator<Item = u32>) -> Self {
        let manager = Self::new();
        for id in ids {
            manager.spawn(WorkerId(id));
        }
        manager
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make a worker visible to enumeration
    pub fn spawn(&self, id: WorkerId) {
        let mut state = self.lock();
        if !state.workers.contains(&id) {
            state.workers.push(id);
        }
    }

    /// Deliver a heartbeat from `id` to its observer. False if nobody observes it.
    pub fn heartbeat(&self, id: WorkerId) -> bool {
        let state = self.lock();
        match state.observers.get(&id) {
            Some(observer) => observer.try_send(WorkerEvent::Heartbeat { id }).is_ok(),
            None => false,
        }
    }

    /// Terminate a worker: notify its observer and drop it from enumeration
    pub fn exit(&self, id: WorkerId, reason: ExitReason) {
        let mut state = self.lock();
        state.workers.retain(|w| *w != id);
        if let Some(observer) = state.observers.remove(&id) {
            let _ = observer.try_send(WorkerEvent::Exited { id, reason });
        }
    }

    pub fn set_fail_enumerate(&self, fail: bool) {
        self.lock().fail_enumerate = fail;
    }

    pub fn fail_attach_to(&self, id: WorkerId, fail: bool) {
        let mut state = self.lock();
        if fail {
            state.fail_attach.insert(id);
        } else {
            state.fail_attach.remove(&id);
        }
    }

    pub fn fail_send_to(&self, id: WorkerId, fail: bool) {
        let mut state = self.lock();
        if fail {
            state.fail_send.insert(id);
        } else {
            state.fail_send.remove(&id);
        }
    }

    /// Every directive delivered so far, in order
    pub fn sent(&self) -> Vec<(WorkerId, Directive)> {
        self.lock().sent.clone()
    }

    /// Return and clear the delivered directives
    pub fn take_sent(&self) -> Vec<(WorkerId, Directive)> {
        std::mem::take(&mut self.lock().sent)
    }

    pub fn shutdowns_to(&self, id: WorkerId) -> usize {
        self.lock()
            .sent
            .iter()
            .filter(|(to, d)| *to == id && *d == Directive::Shutdown)
            .count()
    }

    /// How many times `workers()` has been called
    pub fn enumerations(&self) -> usize {
        self.lock().enumerations
    }
}

#[async_trait]
impl ProcessManager for MockProcessManager {
    async fn workers(&self) -> Result<Vec<WorkerId>, WardenError> {
        let mut state = self.lock();
        state.enumerations += 1;
        if state.fail_enumerate {
            return Err(WardenError::Io(std::io::Error::other(
                "mock enumeration failure",
            )));
        }
        Ok(state.workers.clone())
    }

    async fn attach_observer(
        &self,
        id: WorkerId,
        observer: mpsc::Sender<WorkerEvent>,
    ) -> Result<(), WardenError> {
        let mut state = self.lock();
        if state.fail_attach.contains(&id) {
            return Err(WardenError::Attach {
                id,
                reason: "mock attach failure".into(),
            });
        }
        if !state.workers.contains(&id) {
            return Err(WardenError::Attach {
                id,
                reason: "no such worker".into(),
            });
        }
        state.observers.insert(id, observer);
        Ok(())
    }

    async fn send(&self, id: WorkerId, directive: Directive) -> Result<(), WardenError> {
        let mut state = self.lock();
        if state.fail_send.contains(&id) {
            return Err(WardenError::Send {
                id,
                reason: "mock send failure".into(),
            });
        }
        if !state.workers.contains(&id) {
            return Err(WardenError::WorkerNotFound(id));
        }
        state.sent.push((id, directive));
        Ok(())
    }
}

/// Fake parent channel recording every message sent through it
#[derive(Clone)]
pub struct MockParentChannel {
    available: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
    messages: Arc<Mutex<Vec<WorkerMessage>>>,
}

impl MockParentChannel {
    pub fn new(available: bool) -> Self {
        Self {
            available: Arc::new(AtomicBool::new(available)),
            fail_sends: Arc::new(AtomicBool::new(false)),
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<WorkerMessage> {
        match self.messages.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ParentChannel for MockParentChannel {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn send(&self, message: &WorkerMessage) -> Result<(), WardenError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(WardenError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock broken pipe",
            )));
        }
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.clone());
        }
        Ok(())
    }
}

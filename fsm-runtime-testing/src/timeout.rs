use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fsm_runtime::ExecutionContext;
use fsm_runtime_core::{ExecutionError, Timeout, TimeoutAction, TimeoutManager};
use parking_lot::Mutex;

struct ManualTimeout {
    label: Arc<str>,
    cancelled: AtomicBool,
}

impl Timeout for ManualTimeout {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct ManualState {
    armed: Option<Arc<ManualTimeout>>,
    firing: Option<Arc<ManualTimeout>>,
}

impl ManualState {
    fn cancel_all(&mut self) {
        for timeout in self.armed.take().iter().chain(self.firing.iter()) {
            timeout.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

/// Timeout manager whose action only runs when triggered explicitly.
///
/// Clones share state, so the copy kept by
/// [`ManualExecutionFactory`](crate::ManualExecutionFactory) observes what the
/// state machine does with its own copy.
#[derive(Clone)]
pub struct ManualTimeoutManager {
    label: Arc<str>,
    action: TimeoutAction,
    state: Arc<Mutex<ManualState>>,
}

impl ManualTimeoutManager {
    pub(crate) fn new(label: &str, action: TimeoutAction) -> Self {
        Self {
            label: Arc::from(label),
            action,
            state: Arc::default(),
        }
    }

    fn arm(&self, state: &mut ManualState) {
        state.armed = Some(Arc::new(ManualTimeout {
            label: self.label.clone(),
            cancelled: AtomicBool::new(false),
        }));
    }

    /// Runs the action on `context` if the timeout is armed and waits for it.
    pub(crate) async fn trigger(&self, context: &ExecutionContext) -> Result<bool, ExecutionError> {
        let timeout = {
            let mut state = self.state.lock();
            let Some(timeout) = state.armed.take() else {
                return Ok(false);
            };
            state.firing = Some(timeout.clone());
            timeout
        };

        let action = self.action.clone();
        let fired = timeout.clone();
        let outcome = match context.submit(move || action(fired.as_ref())) {
            Ok(completion) => completion.await,
            Err(err) => Err(err),
        };

        let mut state = self.state.lock();
        if state
            .firing
            .as_ref()
            .is_some_and(|firing| Arc::ptr_eq(firing, &timeout))
        {
            state.firing = None;
        }
        outcome.map(|()| true)
    }
}

impl TimeoutManager for ManualTimeoutManager {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_running(&self) -> bool {
        self.state.lock().armed.is_some()
    }

    fn start(&self) -> Result<(), ExecutionError> {
        let mut state = self.state.lock();
        if state.armed.is_none() {
            self.arm(&mut state);
        }
        Ok(())
    }

    fn restart(&self) -> Result<(), ExecutionError> {
        let mut state = self.state.lock();
        state.cancel_all();
        self.arm(&mut state);
        Ok(())
    }

    fn cancel(&self) {
        self.state.lock().cancel_all();
    }
}

impl fmt::Debug for ManualTimeoutManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualTimeoutManager")
            .field("label", &self.label)
            .field("running", &self.is_running())
            .finish()
    }
}

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long a request may stay silent before the UI narrative escalates.
pub const LONG_WAIT_THRESHOLD: Duration = Duration::from_secs(40);
/// Rotation cadence for the wait phrases shown while nothing has streamed.
pub const PHRASE_CADENCE: Duration = Duration::from_millis(1500);

pub const NORMAL_WAIT_PHRASES: &[&str] = &[
    "Thinking",
    "Analyzing",
    "Working on it",
    "Writing a reply",
];

pub const LONG_WAIT_PHRASES: &[&str] = &[
    "Several experts are digging into this, hang tight",
    "Complex task in progress, almost done",
    "Coordinating multiple models on the answer",
    "A high-quality reply takes a little longer",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Normal,
    LongWait,
}

/// Per-request escalation timer. Fires `Normal -> LongWait` once after the
/// threshold unless cleared first; publishes through a `watch` channel so the
/// front end and the notification path observe flips without polling. The
/// timer is advisory only and never aborts the request.
pub struct LongWaitTimer {
    state_tx: Arc<watch::Sender<WaitState>>,
    timer: Option<JoinHandle<()>>,
}

impl LongWaitTimer {
    pub fn arm(state_tx: Arc<watch::Sender<WaitState>>) -> Self {
        Self::arm_after(state_tx, LONG_WAIT_THRESHOLD)
    }

    pub fn arm_after(state_tx: Arc<watch::Sender<WaitState>>, threshold: Duration) -> Self {
        let _ = state_tx.send(WaitState::Normal);
        let timer_tx = Arc::clone(&state_tx);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            tracing::info!(?threshold, "request still silent past threshold, escalating");
            let _ = timer_tx.send(WaitState::LongWait);
        });
        Self {
            state_tx,
            timer: Some(timer),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WaitState> {
        self.state_tx.subscribe()
    }

    pub fn is_long_wait(&self) -> bool {
        *self.state_tx.borrow() == WaitState::LongWait
    }

    /// Evidence of liveness (first fragment) or settlement: cancel the
    /// pending escalation and drop back to `Normal`.
    pub fn clear(&mut self) {
        self.disarm();
        let _ = self.state_tx.send(WaitState::Normal);
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for LongWaitTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Status line for the given rotation tick.
pub fn wait_phrase(state: WaitState, tick: usize) -> &'static str {
    let phrases = match state {
        WaitState::Normal => NORMAL_WAIT_PHRASES,
        WaitState::LongWait => LONG_WAIT_PHRASES,
    };
    phrases[tick % phrases.len()]
}

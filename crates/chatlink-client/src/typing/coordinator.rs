use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::time::sleep;

use crate::config::TypingSection;
use crate::timer::ScopedTask;

/// Destination for typing start/stop signals.
pub trait TypingSink: Send + Sync {
    fn send_typing(&self, is_typing: bool, session_id: &str, agent_id: &str);
}

struct Inner {
    session_id: String,
    agent_id: String,
    /// Last transmitted state.
    typing: bool,
    epoch: u64,
    debounce_timer: Option<ScopedTask>,
    idle_timer: Option<ScopedTask>,
}

/// A signal to hand to the sink once the lock is released.
struct Signal {
    is_typing: bool,
    session_id: String,
    agent_id: String,
}

impl Inner {
    /// Record the new state; returns a signal only when it changed.
    fn set_typing(&mut self, is_typing: bool) -> Option<Signal> {
        if self.typing == is_typing {
            return None;
        }
        self.typing = is_typing;
        Some(Signal {
            is_typing,
            session_id: self.session_id.clone(),
            agent_id: self.agent_id.clone(),
        })
    }

    fn cancel_timers(&mut self) {
        self.epoch += 1;
        self.debounce_timer = None;
        self.idle_timer = None;
    }
}

/// Turns text-input activity into de-duplicated typing start/stop signals.
///
/// Non-blank input starts typing after the debounce delay; an idle timer
/// then stops it if no further input arrives. Blank input stops at once.
/// Dropping the coordinator stops typing if it was started.
pub struct TypingCoordinator {
    inner: Arc<Mutex<Inner>>,
    sink: Arc<dyn TypingSink>,
    debounce: Duration,
    idle: Duration,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn emit(sink: &dyn TypingSink, signal: Option<Signal>) {
    if let Some(s) = signal {
        tracing::debug!(is_typing = s.is_typing, session_id = %s.session_id, "typing signal");
        sink.send_typing(s.is_typing, &s.session_id, &s.agent_id);
    }
}

impl TypingCoordinator {
    /// Must be called inside a tokio runtime.
    pub fn new(
        sink: Arc<dyn TypingSink>,
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        cfg: &TypingSection,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                session_id: session_id.into(),
                agent_id: agent_id.into(),
                typing: false,
                epoch: 0,
                debounce_timer: None,
                idle_timer: None,
            })),
            sink,
            debounce: cfg.debounce(),
            idle: cfg.idle_timeout(),
        }
    }

    pub fn is_typing(&self) -> bool {
        lock(&self.inner).typing
    }

    pub fn on_text_changed(&self, text: &str) {
        let mut inner = lock(&self.inner);
        inner.epoch += 1;
        inner.debounce_timer = None;

        if text.trim().is_empty() {
            inner.idle_timer = None;
            let signal = inner.set_typing(false);
            drop(inner);
            emit(self.sink.as_ref(), signal);
            return;
        }

        let epoch = inner.epoch;
        let weak = Arc::downgrade(&self.inner);
        let sink = Arc::clone(&self.sink);
        let (debounce, idle) = (self.debounce, self.idle);
        inner.debounce_timer = Some(ScopedTask::spawn(async move {
            sleep(debounce).await;
            start_typing(weak, sink, epoch, idle);
        }));
    }

    /// Stop typing in the current conversation, then retarget.
    pub fn switch_conversation(&self, session_id: impl Into<String>, agent_id: impl Into<String>) {
        self.shutdown();
        let mut inner = lock(&self.inner);
        inner.session_id = session_id.into();
        inner.agent_id = agent_id.into();
    }

    /// Cancel both timers and force a stop if typing was started.
    pub fn shutdown(&self) {
        let mut inner = lock(&self.inner);
        inner.cancel_timers();
        let signal = inner.set_typing(false);
        drop(inner);
        emit(self.sink.as_ref(), signal);
    }
}

impl Drop for TypingCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// Debounce fired: (re)arm the idle timer, then signal start if needed.
fn start_typing(weak: Weak<Mutex<Inner>>, sink: Arc<dyn TypingSink>, epoch: u64, idle: Duration) {
    let Some(shared) = weak.upgrade() else { return };
    let mut inner = lock(&shared);
    if inner.epoch != epoch {
        return;
    }

    let idle_weak = Arc::downgrade(&shared);
    let idle_sink = Arc::clone(&sink);
    inner.idle_timer = Some(ScopedTask::spawn(async move {
        sleep(idle).await;
        stop_if_idle(idle_weak, idle_sink, epoch);
    }));

    let signal = inner.set_typing(true);
    drop(inner);
    emit(sink.as_ref(), signal);
}

fn stop_if_idle(weak: Weak<Mutex<Inner>>, sink: Arc<dyn TypingSink>, epoch: u64) {
    let Some(shared) = weak.upgrade() else { return };
    let mut inner = lock(&shared);
    if inner.epoch != epoch {
        return;
    }
    let signal = inner.set_typing(false);
    drop(inner);
    emit(sink.as_ref(), signal);
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[derive(Default)]
    struct Recorder {
        signals: Mutex<Vec<(bool, String, String)>>,
    }

    impl Recorder {
        fn taken(&self) -> Vec<bool> {
            self.signals.lock().unwrap().iter().map(|s| s.0).collect()
        }
    }

    impl TypingSink for Recorder {
        fn send_typing(&self, is_typing: bool, session_id: &str, agent_id: &str) {
            self.signals
                .lock()
                .unwrap()
                .push((is_typing, session_id.to_string(), agent_id.to_string()));
        }
    }

    fn coordinator(rec: &Arc<Recorder>) -> TypingCoordinator {
        let sink: Arc<dyn TypingSink> = rec.clone();
        TypingCoordinator::new(sink, "s1", "a1", &TypingSection::default())
    }

    #[tokio::test(start_paused = true)]
    async fn quick_inputs_start_once() {
        let rec = Arc::new(Recorder::default());
        let tc = coordinator(&rec);

        tc.on_text_changed("h");
        sleep(Duration::from_millis(200)).await;
        tc.on_text_changed("hi");
        sleep(Duration::from_millis(400)).await;
        assert!(rec.taken().is_empty());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(rec.taken(), vec![true]);

        tc.on_text_changed("hi!");
        sleep(Duration::from_millis(600)).await;
        assert_eq!(rec.taken(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_input_stops_once() {
        let rec = Arc::new(Recorder::default());
        let tc = coordinator(&rec);

        tc.on_text_changed("hi");
        sleep(Duration::from_millis(600)).await;
        tc.on_text_changed("");
        tc.on_text_changed("   ");
        assert_eq!(rec.taken(), vec![true, false]);

        let first = rec.signals.lock().unwrap()[0].clone();
        assert_eq!(first, (true, "s1".to_string(), "a1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn blank_input_before_start_is_silent() {
        let rec = Arc::new(Recorder::default());
        let tc = coordinator(&rec);
        tc.on_text_changed("");
        tc.on_text_changed("hi");
        tc.on_text_changed("");
        sleep(Duration::from_secs(5)).await;
        assert!(rec.taken().is_empty());
        assert!(!tc.is_typing());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_stops() {
        let rec = Arc::new(Recorder::default());
        let tc = coordinator(&rec);

        tc.on_text_changed("hi");
        sleep(Duration::from_millis(600)).await;
        sleep(Duration::from_millis(2800)).await;
        assert_eq!(rec.taken(), vec![true]);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(rec.taken(), vec![true, false]);
        assert!(!tc.is_typing());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_forces_stop() {
        let rec = Arc::new(Recorder::default());
        let tc = coordinator(&rec);
        tc.on_text_changed("hi");
        sleep(Duration::from_millis(600)).await;

        drop(tc);
        assert_eq!(rec.taken(), vec![true, false]);

        // aborted timers never fire afterwards
        sleep(Duration::from_secs(10)).await;
        assert_eq!(rec.taken(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_while_stopped_is_silent() {
        let rec = Arc::new(Recorder::default());
        let tc = coordinator(&rec);
        tc.on_text_changed("hi");
        drop(tc);
        sleep(Duration::from_secs(1)).await;
        assert!(rec.taken().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn switch_conversation_stops_old_session() {
        let rec = Arc::new(Recorder::default());
        let tc = coordinator(&rec);
        tc.on_text_changed("hi");
        sleep(Duration::from_millis(600)).await;

        tc.switch_conversation("s2", "a2");
        tc.on_text_changed("yo");
        sleep(Duration::from_millis(600)).await;

        let got = rec.signals.lock().unwrap().clone();
        assert_eq!(
            got,
            vec![
                (true, "s1".to_string(), "a1".to_string()),
                (false, "s1".to_string(), "a1".to_string()),
                (true, "s2".to_string(), "a2".to_string()),
            ]
        );
    }
}

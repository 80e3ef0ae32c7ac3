use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::earcon::EarconPlayer;
use super::engine::{QueueMode, SpeakOptions, SpeechEngine, VoiceParams};
use crate::config::SpeechConfig;
use crate::error::SpeechError;
use crate::instructions::Priority;
use crate::notify::{Notifier, Severity};

pub type Completion = oneshot::Receiver<Result<(), SpeechError>>;

struct Utterance {
    text: String,
    params: VoiceParams,
    earcon: Option<Priority>,
    done: oneshot::Sender<Result<(), SpeechError>>,
}

struct ActiveUtterance {
    cancel: Option<oneshot::Sender<()>>,
}

impl ActiveUtterance {
    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<Utterance>,
    active: Option<ActiveUtterance>,
}

struct Shared {
    state: Mutex<SchedulerState>,
    wake: Notify,
    engine: Arc<dyn SpeechEngine>,
    earcons: Option<EarconPlayer>,
    config: SpeechConfig,
    unlocked: AtomicBool,
    consecutive_failures: AtomicU32,
    notifier: Notifier,
}

/// Serializes all spoken output through one engine.
///
/// A single worker task plays one utterance at a time, so at most one is ever
/// audible. Callers pick how a new request interacts with what is queued.
pub struct SpeechScheduler {
    shared: Arc<Shared>,
    worker: JoinHandle<()>,
}

impl SpeechScheduler {
    /// Must be called inside a Tokio runtime.
    pub fn new(engine: Arc<dyn SpeechEngine>, config: SpeechConfig, notifier: Notifier) -> Self {
        info!("Speech scheduler using {} voice", engine.name());
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState::default()),
            wake: Notify::new(),
            engine,
            earcons: config
                .earcons
                .then(|| EarconPlayer::new(config.earcon_volume)),
            unlocked: AtomicBool::new(!config.requires_user_gesture),
            config,
            consecutive_failures: AtomicU32::new(0),
            notifier,
        });
        let worker = tokio::spawn(run_worker(shared.clone()));
        Self { shared, worker }
    }

    /// Queue `text` and wait until it has been spoken.
    pub async fn speak(
        &self,
        text: impl Into<String>,
        options: SpeakOptions,
    ) -> Result<(), SpeechError> {
        let completion = self.enqueue(text, options)?;
        completion.await.unwrap_or(Err(SpeechError::Interrupted))
    }

    /// Queue `text` without waiting; the receiver resolves when it finishes.
    pub fn enqueue(
        &self,
        text: impl Into<String>,
        options: SpeakOptions,
    ) -> Result<Completion, SpeechError> {
        if !self.shared.config.enabled {
            return Err(SpeechError::Unavailable("speech output is disabled".to_string()));
        }
        if !self.shared.unlocked.load(Ordering::Acquire) {
            return Err(SpeechError::GestureRequired);
        }

        let text = text.into();
        let (done, completion) = oneshot::channel();
        if text.trim().is_empty() {
            let _ = done.send(Ok(()));
            return Ok(completion);
        }

        let utterance = Utterance {
            text,
            params: options.params,
            earcon: options.earcon,
            done,
        };

        {
            let mut state = self.shared.state.lock();
            match options.queue_mode {
                QueueMode::Append => {
                    if options.interrupt {
                        cancel_active(&mut state);
                    }
                    state.queue.push_back(utterance);
                }
                QueueMode::Flush => {
                    let dropped = drain_queue(&mut state);
                    cancel_active(&mut state);
                    if dropped > 0 {
                        debug!("Flushed {} queued utterances", dropped);
                    }
                    state.queue.push_back(utterance);
                }
                QueueMode::Immediate => {
                    if state.active.is_some() {
                        if !options.interrupt {
                            return Err(SpeechError::AlreadySpeaking);
                        }
                        cancel_active(&mut state);
                    }
                    state.queue.push_front(utterance);
                }
            }
        }

        self.shared.wake.notify_one();
        Ok(completion)
    }

    /// Record the user gesture that allows speech to start.
    pub fn unlock(&self) {
        if !self.shared.unlocked.swap(true, Ordering::AcqRel) {
            debug!("Speech unlocked by user gesture");
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.shared.unlocked.load(Ordering::Acquire)
    }

    /// Utterances waiting behind the one playing.
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_speaking(&self) -> bool {
        self.shared.state.lock().active.is_some()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.consecutive_failures.load(Ordering::Acquire)
    }

    /// Clear the queue and silence the current utterance.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        drain_queue(&mut state);
        cancel_active(&mut state);
    }

    pub async fn voices(&self) -> Vec<String> {
        self.shared.engine.voices().await
    }
}

impl Drop for SpeechScheduler {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

fn drain_queue(state: &mut SchedulerState) -> usize {
    let dropped = state.queue.len();
    for utterance in state.queue.drain(..) {
        let _ = utterance.done.send(Err(SpeechError::Interrupted));
    }
    dropped
}

fn cancel_active(state: &mut SchedulerState) {
    if let Some(active) = state.active.as_mut() {
        active.cancel();
    }
}

async fn run_worker(shared: Arc<Shared>) {
    let debounce = Duration::from_millis(shared.config.debounce_ms);
    loop {
        let next = {
            let mut state = shared.state.lock();
            match state.queue.pop_front() {
                Some(utterance) => {
                    let (cancel, cancelled) = oneshot::channel();
                    state.active = Some(ActiveUtterance {
                        cancel: Some(cancel),
                    });
                    Some((utterance, cancelled))
                }
                None => None,
            }
        };

        let Some((utterance, cancelled)) = next else {
            shared.wake.notified().await;
            continue;
        };

        debug!("Speaking: {}", utterance.text);
        let result = shared.play(&utterance, cancelled).await;
        shared.state.lock().active = None;
        shared.record(&result);
        let _ = utterance.done.send(result);

        tokio::time::sleep(debounce).await;
    }
}

impl Shared {
    /// Upper bound on how long one utterance may take before it counts as stalled.
    fn stall_deadline(&self, text: &str, rate: f32) -> Duration {
        let chars = text.chars().count() as u64;
        let nominal = self.config.stall_base_ms + self.config.stall_per_char_ms * chars;
        let rate = if rate.is_finite() { rate.clamp(0.1, 10.0) } else { 1.0 };
        let speaking = Duration::from_millis((nominal as f32 / rate.min(1.0)) as u64);
        speaking + self.engine.startup_allowance()
    }

    async fn play(
        &self,
        utterance: &Utterance,
        mut cancelled: oneshot::Receiver<()>,
    ) -> Result<(), SpeechError> {
        let deadline = self.stall_deadline(&utterance.text, utterance.params.rate);
        let mut watchdog =
            tokio::time::interval(Duration::from_millis(self.config.watchdog_interval_ms.max(10)));
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        watchdog.tick().await;

        // The cue is part of the utterance, so a flush cuts it off too
        let speak = async {
            if let (Some(priority), Some(earcons)) = (utterance.earcon, self.earcons.as_ref()) {
                earcons.play(priority).await;
            }
            self.engine.speak(&utterance.text, &utterance.params).await
        };
        tokio::pin!(speak);
        let stall = tokio::time::sleep(deadline);
        tokio::pin!(stall);

        loop {
            tokio::select! {
                result = &mut speak => return result,
                _ = &mut cancelled => {
                    self.engine.cancel().await;
                    return Err(SpeechError::Interrupted);
                }
                _ = &mut stall => {
                    warn!("Speech stalled after {:?}, cancelling", deadline);
                    self.engine.cancel().await;
                    return Err(SpeechError::Stalled { after: deadline });
                }
                _ = watchdog.tick() => {
                    if self.engine.is_paused() {
                        debug!("Speech engine paused, resuming");
                        self.engine.resume().await;
                    }
                }
            }
        }
    }

    fn record(&self, result: &Result<(), SpeechError>) {
        match result {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            Err(e) if e.is_scheduling() => {
                debug!("Utterance ended early: {}", e);
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                warn!("Speech failed ({} in a row): {}", failures, e);
                if failures == self.config.failure_threshold {
                    self.notifier.notify_once(
                        "speech-failures",
                        Severity::Warning,
                        "Speech issues detected",
                        "Having trouble with speech output. Announcements will be shortened.",
                    );
                }
            }
        }
    }
}

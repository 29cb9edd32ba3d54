//! Session lifecycle manager.
//!
//! Owns the state machine and is the single point of cancellation. Device
//! and transport callbacks never touch session state: they post
//! generation-tagged events onto one channel, and a dedicated driver thread
//! applies them in order.
//!
//! Callbacks from a session that has since ended carry an old generation and
//! are discarded. Transport events that arrive while still connecting are
//! held back and applied by `start` in the same critical section that makes
//! the session active.

use crate::audio::device::{
    AudioBackend, CompletionCallback, FrameCallback, InputConfig, InputHandle, OutputConfig,
    OutputHandle,
};
use crate::audio::level;
use crate::codec::{FrameEncoder, decode_chunk};
use crate::config::Config;
use crate::error::{Result, VoiceError};
use crate::playback::{InterruptSource, InterruptionController, PlaybackScheduler};
use crate::session::event::{EventSink, SessionEvent, SessionEventKind};
use crate::session::state::{SessionState, SessionStats, SessionStatus};
use crate::transport::{
    ConnectivityProbe, Connector, EventHandler, SessionTransport, TransportEvent,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Resources owned by one live session.
struct Session {
    generation: u64,
    input: Mutex<Box<dyn InputHandle>>,
    output: Arc<dyn OutputHandle>,
    transport: Box<dyn SessionTransport>,
    scheduler: Arc<PlaybackScheduler>,
    interrupts: InterruptionController,
    encoder: FrameEncoder,
    started_at: Instant,
}

impl Session {
    /// Stop capture, flush playback, release devices, close the transport.
    ///
    /// Best-effort: failures are logged and the remaining steps still run.
    fn release(&self) {
        let mut input = self.input.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = input.stop() {
            warn!(generation = self.generation, "Failed to stop capture: {}", e);
        }

        self.scheduler.flush_all();

        if let Err(e) = self.output.close() {
            warn!(generation = self.generation, "Failed to close output: {}", e);
        }
        if let Err(e) = input.close() {
            warn!(generation = self.generation, "Failed to close input: {}", e);
        }
        drop(input);

        self.transport.close();

        info!(
            generation = self.generation,
            elapsed = ?self.started_at.elapsed(),
            "Session released"
        );
    }
}

#[derive(Default)]
struct Shared {
    state: SessionState,
    generation: u64,
    session: Option<Arc<Session>>,
    cancel: Option<Arc<watch::Sender<bool>>>,
    /// Transport events that arrived while still connecting.
    pending: Vec<TransportEvent>,
    devices_ready: bool,
    listening: bool,
    ended_by_endpoint: bool,
    last_error: Option<String>,
}

#[derive(Default)]
struct StatCounters {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    chunks_scheduled: AtomicU64,
    decode_failures: AtomicU64,
    interruptions: AtomicU64,
}

impl StatCounters {
    fn reset(&self) {
        for counter in [
            &self.frames_sent,
            &self.frames_dropped,
            &self.chunks_scheduled,
            &self.decode_failures,
            &self.interruptions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
        }
    }
}

/// Devices opened together, or neither.
type Devices = (Box<dyn InputHandle>, Arc<dyn OutputHandle>);

struct Core {
    config: Config,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    probe: Arc<dyn ConnectivityProbe>,
    shared: Mutex<Shared>,
    status_tx: watch::Sender<SessionStatus>,
    /// Latest volume, stored as `f32` bits.
    volume: AtomicU32,
    stats: StatCounters,
    events_tx: Sender<SessionEvent>,
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn publish(&self, shared: &Shared) {
        self.status_tx.send_replace(SessionStatus {
            state: shared.state,
            devices_ready: shared.devices_ready,
            listening: shared.listening,
            ended_by_endpoint: shared.ended_by_endpoint,
            error: shared.last_error.clone(),
        });
    }

    /// The only place session state changes.
    fn transition(&self, shared: &mut Shared, next: SessionState) {
        debug_assert!(
            shared.state.can_transition_to(next),
            "invalid session transition {} -> {}",
            shared.state,
            next
        );
        debug_assert!(
            next.holds_resources() || shared.session.is_none(),
            "entering {} with a live session",
            next
        );
        trace!(from = %shared.state, to = %next, "Session state");
        shared.state = next;
        self.publish(shared);
    }

    fn set_volume(&self, value: f32) {
        self.volume.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Move an active session into teardown and hand back its resources.
    ///
    /// With an error the session passes through `Failed`, otherwise
    /// `Disconnecting`. The caller releases outside the lock and then calls
    /// [`finish_teardown`](Self::finish_teardown).
    fn begin_teardown(&self, shared: &mut Shared, error: Option<&VoiceError>) -> Option<Arc<Session>> {
        if shared.state != SessionState::Active {
            return None;
        }
        shared.generation += 1;
        shared.listening = false;
        shared.pending.clear();
        match error {
            Some(e) => {
                error!(generation = shared.generation - 1, "Session failed: {}", e);
                shared.last_error = Some(e.user_message());
                self.transition(shared, SessionState::Failed);
            }
            None => self.transition(shared, SessionState::Disconnecting),
        }
        shared.session.take()
    }

    fn finish_teardown(&self, session: Option<Arc<Session>>) {
        if let Some(session) = session {
            session.release();
        }
        self.set_volume(0.0);

        let mut shared = self.lock();
        if matches!(
            shared.state,
            SessionState::Disconnecting | SessionState::Failed
        ) {
            self.transition(&mut shared, SessionState::Idle);
        }
    }

    fn stop(&self) {
        let session = {
            let mut shared = self.lock();
            match shared.state {
                SessionState::Connecting => {
                    shared.generation += 1;
                    if let Some(cancel) = shared.cancel.take() {
                        cancel.send_replace(true);
                    }
                    shared.pending.clear();
                    self.transition(&mut shared, SessionState::Idle);
                    info!("Connect cancelled");
                    return;
                }
                SessionState::Active => {
                    info!(generation = shared.generation, "Stopping session");
                    self.begin_teardown(&mut shared, None)
                }
                _ => return,
            }
        };
        self.finish_teardown(session);
    }

    fn dispatch(&self, event: SessionEvent) {
        let mut shared = self.lock();
        if event.generation != shared.generation {
            trace!(
                event_generation = event.generation,
                generation = shared.generation,
                "Ignoring stale event"
            );
            return;
        }

        match shared.state {
            SessionState::Active => {}
            SessionState::Connecting => {
                match event.kind {
                    SessionEventKind::Transport(t) => shared.pending.push(t),
                    SessionEventKind::Capture(frame) => {
                        self.set_volume(level::volume(&frame.samples));
                        StatCounters::bump(&self.stats.frames_dropped);
                    }
                    _ => {}
                }
                return;
            }
            _ => return,
        }

        let Some(session) = shared.session.clone() else {
            return;
        };
        self.apply(shared, session, [event.kind]);
    }

    /// Apply events to the active session in order, tearing it down if one
    /// of them ends it.
    ///
    /// Returns `Some` when the session ended, carrying the failure if any.
    fn apply(
        &self,
        mut shared: MutexGuard<'_, Shared>,
        session: Arc<Session>,
        batch: impl IntoIterator<Item = SessionEventKind>,
    ) -> Option<Option<VoiceError>> {
        for kind in batch {
            if let Some(ending) = self.handle(&mut shared, &session, kind) {
                drop(session);
                shared.ended_by_endpoint = ending.is_none();
                let released = self.begin_teardown(&mut shared, ending.as_ref());
                drop(shared);
                self.finish_teardown(released);
                return Some(ending);
            }
        }
        None
    }

    /// Apply one event to the active session.
    ///
    /// Returns `Some` when the session must end, carrying the failure if any.
    fn handle(
        &self,
        shared: &mut Shared,
        session: &Session,
        kind: SessionEventKind,
    ) -> Option<Option<VoiceError>> {
        match kind {
            SessionEventKind::Capture(frame) => {
                self.set_volume(level::volume(&frame.samples));
                if !session.transport.is_open() {
                    StatCounters::bump(&self.stats.frames_dropped);
                    return None;
                }
                match session.transport.send(session.encoder.encode(&frame)) {
                    Ok(()) => StatCounters::bump(&self.stats.frames_sent),
                    Err(e) if e.is_session_fatal() => return Some(Some(e)),
                    Err(e) => warn!(sequence = frame.sequence, "Failed to send frame: {}", e),
                }
            }
            SessionEventKind::Transport(TransportEvent::Opened) => {
                if !shared.listening {
                    info!(generation = session.generation, "Session open, listening");
                    shared.listening = true;
                    self.publish(shared);
                }
            }
            SessionEventKind::Transport(TransportEvent::AudioChunk(chunk)) => {
                match decode_chunk(&chunk) {
                    Ok(buffer) => match session.scheduler.enqueue(&buffer) {
                        Ok(scheduled) => {
                            StatCounters::bump(&self.stats.chunks_scheduled);
                            debug!(
                                token = %scheduled.token,
                                start = ?scheduled.start,
                                duration = ?scheduled.duration,
                                "Scheduled response audio"
                            );
                        }
                        Err(e) if e.is_session_fatal() => return Some(Some(e)),
                        Err(e) => warn!("Failed to schedule response audio: {}", e),
                    },
                    Err(e) => {
                        StatCounters::bump(&self.stats.decode_failures);
                        warn!("Dropping response chunk: {}", e);
                    }
                }
            }
            SessionEventKind::Transport(TransportEvent::Interrupted) => {
                session.interrupts.interrupt(InterruptSource::Server);
                StatCounters::bump(&self.stats.interruptions);
            }
            SessionEventKind::Transport(TransportEvent::Closed) => {
                info!(generation = session.generation, "Endpoint closed the session");
                return Some(None);
            }
            SessionEventKind::Transport(TransportEvent::Error(reason)) => {
                return Some(Some(VoiceError::Transport { message: reason }));
            }
            SessionEventKind::PlaybackEnded(token) => {
                if !session.scheduler.on_finished(token) {
                    trace!(token = %token, "Completion for untracked buffer");
                }
            }
        }
        None
    }

    async fn acquire(&self, sink: &EventSink, cancel: &watch::Receiver<bool>) -> Result<Session> {
        let online = cancellable(cancel.clone(), async { Ok(self.probe.is_online().await) }).await?;
        if !online {
            return Err(VoiceError::Offline);
        }

        let audio = &self.config.audio;
        let input_config = InputConfig {
            device: audio.input_device.clone(),
            sample_rate: audio.input_sample_rate,
            channels: 1,
            frame_size: audio.frame_size,
        };
        let output_config = OutputConfig {
            device: audio.output_device.clone(),
            sample_rate: audio.response_sample_rate,
        };
        let backend = Arc::clone(&self.backend);
        let on_frame = sink.frame_callback();
        let on_finished = sink.completion_callback();
        let open_task = tokio::task::spawn_blocking(move || {
            open_devices(
                backend.as_ref(),
                &input_config,
                &output_config,
                on_frame,
                on_finished,
            )
        });

        let (devices, transport) = tokio::join!(
            async {
                let opened = match open_task.await {
                    Ok(result) => result,
                    Err(e) => Err(VoiceError::Other(format!("device open task failed: {}", e))),
                };
                if opened.is_ok() {
                    self.mark_devices_ready(sink.generation());
                }
                opened
            },
            cancellable(cancel.clone(), self.connect(sink.transport_handler())),
        );

        match (devices, transport) {
            (Ok((input, output)), Ok(transport)) => {
                let scheduler = Arc::new(PlaybackScheduler::new(Arc::clone(&output)));
                Ok(Session {
                    generation: sink.generation(),
                    input: Mutex::new(input),
                    output,
                    transport,
                    interrupts: InterruptionController::new(Arc::clone(&scheduler)),
                    scheduler,
                    encoder: FrameEncoder::new(audio.input_sample_rate),
                    started_at: Instant::now(),
                })
            }
            (devices, transport) => {
                let device_err = match devices {
                    Ok((input, output)) => {
                        release_devices(input, output.as_ref());
                        None
                    }
                    Err(e) => Some(e),
                };
                let transport_err = match transport {
                    Ok(transport) => {
                        transport.close();
                        None
                    }
                    Err(e) => Some(e),
                };
                Err(first_failure(device_err, transport_err))
            }
        }
    }

    fn mark_devices_ready(&self, generation: u64) {
        let mut shared = self.lock();
        if shared.generation == generation && shared.state == SessionState::Connecting {
            shared.devices_ready = true;
            self.publish(&shared);
        }
    }

    async fn connect(&self, handler: EventHandler) -> Result<Box<dyn SessionTransport>> {
        let endpoint = &self.config.endpoint;
        let limit = endpoint.connect_timeout();
        match tokio::time::timeout(limit, self.connector.connect(endpoint, handler)).await {
            Ok(result) => result,
            Err(_) => Err(VoiceError::NetworkUnreachable {
                message: format!("connect timed out after {}", humanize(limit)),
            }),
        }
    }
}

fn humanize(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Run `fut` unless the session start is cancelled first.
async fn cancellable<T>(
    mut cancel: watch::Receiver<bool>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        result = fut => result,
        _ = cancel.wait_for(|cancelled| *cancelled) => Err(VoiceError::Cancelled),
    }
}

fn open_devices(
    backend: &dyn AudioBackend,
    input_config: &InputConfig,
    output_config: &OutputConfig,
    on_frame: FrameCallback,
    on_finished: CompletionCallback,
) -> Result<Devices> {
    let mut input = backend.open_input(input_config, on_frame)?;
    match backend.open_output(output_config, on_finished) {
        Ok(output) => Ok((input, output)),
        Err(e) => {
            if let Err(close_err) = input.close() {
                warn!("Failed to close input after output error: {}", close_err);
            }
            Err(e)
        }
    }
}

fn release_devices(mut input: Box<dyn InputHandle>, output: &dyn OutputHandle) {
    if let Err(e) = input.stop() {
        warn!("Failed to stop capture: {}", e);
    }
    if let Err(e) = output.close() {
        warn!("Failed to close output: {}", e);
    }
    if let Err(e) = input.close() {
        warn!("Failed to close input: {}", e);
    }
}

/// Pick the error to report when several acquisitions failed.
fn first_failure(device: Option<VoiceError>, transport: Option<VoiceError>) -> VoiceError {
    if matches!(device, Some(VoiceError::Cancelled)) || matches!(transport, Some(VoiceError::Cancelled))
    {
        return VoiceError::Cancelled;
    }
    device
        .or(transport)
        .unwrap_or_else(|| VoiceError::Other("session start failed".to_string()))
}

/// Drives one voice session at a time.
///
/// `start` is async because opening devices and connecting may wait; every
/// other operation is synchronous and non-blocking.
pub struct SessionLifecycleManager {
    core: Arc<Core>,
    running: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
}

impl SessionLifecycleManager {
    /// Create a manager and its event driver thread.
    ///
    /// # Arguments
    /// * `config` - Audio and endpoint settings, read at every start
    /// * `backend` - Source of input and output devices
    /// * `connector` - Opens transports to the endpoint
    /// * `probe` - Consulted before connecting to detect being offline
    pub fn new(
        config: Config,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Result<Self> {
        let (events_tx, events_rx) = unbounded();
        let (status_tx, _) = watch::channel(SessionStatus::default());
        let core = Arc::new(Core {
            config,
            backend,
            connector,
            probe,
            shared: Mutex::new(Shared::default()),
            status_tx,
            volume: AtomicU32::new(0.0f32.to_bits()),
            stats: StatCounters::default(),
            events_tx,
        });
        let running = Arc::new(AtomicBool::new(true));
        let driver = spawn_driver(Arc::clone(&core), events_rx, Arc::clone(&running))?;

        Ok(Self {
            core,
            running,
            driver: Some(driver),
        })
    }

    /// Start a session, stopping any session already running.
    ///
    /// Resolves once the session is `Active` or has failed. Fails with
    /// `SessionBusy` while a previous session is still being torn down and
    /// with `Cancelled` if [`stop`](Self::stop) was called meanwhile.
    ///
    /// Transport events received while connecting are applied before this
    /// returns, so an immediate [`interrupt`](Self::interrupt) silences any
    /// audio that arrived early. If one of them closed the session, `start`
    /// still succeeds and the manager is already back to `Idle`.
    pub async fn start(&self) -> Result<()> {
        if matches!(
            self.state(),
            SessionState::Active | SessionState::Connecting
        ) {
            self.stop();
        }

        let core = &self.core;
        let (sink, cancel) = {
            let mut shared = core.lock();
            if shared.state != SessionState::Idle {
                return Err(VoiceError::SessionBusy);
            }
            shared.generation += 1;
            let cancel = Arc::new(watch::channel(false).0);
            shared.cancel = Some(Arc::clone(&cancel));
            shared.devices_ready = false;
            shared.listening = false;
            shared.ended_by_endpoint = false;
            shared.last_error = None;
            shared.pending.clear();
            core.transition(&mut shared, SessionState::Connecting);
            (
                EventSink::new(shared.generation, core.events_tx.clone()),
                cancel,
            )
        };
        core.stats.reset();
        core.set_volume(0.0);

        let generation = sink.generation();
        info!(generation, "Starting session");

        let result = core.acquire(&sink, &cancel.subscribe()).await;

        let mut shared = core.lock();
        if shared.generation != generation || shared.state != SessionState::Connecting {
            drop(shared);
            if let Ok(session) = result {
                session.release();
            }
            debug!(generation, "Start superseded");
            return Err(VoiceError::Cancelled);
        }
        shared.cancel = None;

        match result {
            Ok(session) => {
                let session = Arc::new(session);
                shared.devices_ready = true;
                shared.listening = session.transport.is_open();
                shared.session = Some(Arc::clone(&session));
                core.transition(&mut shared, SessionState::Active);
                info!(generation, "Session active");

                let early: Vec<SessionEventKind> = shared
                    .pending
                    .drain(..)
                    .map(SessionEventKind::Transport)
                    .collect();
                match core.apply(shared, session, early) {
                    Some(Some(e)) => Err(e),
                    _ => Ok(()),
                }
            }
            Err(e) => {
                // Any failure while connecting fails the attempt, fatal or not
                shared.generation += 1;
                shared.pending.clear();
                shared.last_error = Some(e.user_message());
                core.transition(&mut shared, SessionState::Failed);
                if e.is_session_fatal() {
                    error!(generation, "Session failed to start: {}", e);
                } else {
                    warn!(generation, "Session start aborted: {}", e);
                }
                core.transition(&mut shared, SessionState::Idle);
                Err(e)
            }
        }
    }

    /// End the session. Idempotent; a no-op when idle or already stopping.
    ///
    /// While connecting, the in-flight opens are abandoned and released.
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Silence response playback without ending the session.
    ///
    /// Returns the number of buffers cut off.
    pub fn interrupt(&self) -> usize {
        let shared = self.core.lock();
        if shared.state != SessionState::Active {
            return 0;
        }
        let Some(session) = shared.session.as_ref() else {
            return 0;
        };
        let flushed = session.interrupts.interrupt(InterruptSource::User);
        StatCounters::bump(&self.core.stats.interruptions);
        flushed
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().state
    }

    pub fn status(&self) -> SessionStatus {
        self.core.status_tx.borrow().clone()
    }

    /// Receive every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.core.status_tx.subscribe()
    }

    /// RMS level of the latest capture frame, in [0, 1].
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.core.volume.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> SessionStats {
        self.core.stats.snapshot()
    }

    /// Buffers currently scheduled or playing.
    pub fn active_playback(&self) -> usize {
        self.core
            .lock()
            .session
            .as_ref()
            .map_or(0, |s| s.scheduler.active_len())
    }

    pub fn generation(&self) -> u64 {
        self.core.lock().generation
    }
}

impl Drop for SessionLifecycleManager {
    fn drop(&mut self) {
        self.core.stop();
        self.running.store(false, Ordering::SeqCst);
        if let Some(driver) = self.driver.take()
            && driver.join().is_err()
        {
            error!("Session driver thread panicked");
        }
    }
}

fn spawn_driver(
    core: Arc<Core>,
    events: Receiver<SessionEvent>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("voicelink-session".to_string())
        .spawn(move || {
            while running.load(Ordering::SeqCst) {
                match events.recv_timeout(Duration::from_millis(100)) {
                    Ok(event) => core.dispatch(event),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("Session driver stopped");
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockAudioBackend;
    use crate::transport::StaticProbe;
    use crate::transport::mock::MockConnector;

    fn manager(backend: &MockAudioBackend, connector: &MockConnector) -> SessionLifecycleManager {
        SessionLifecycleManager::new(
            Config::default(),
            Arc::new(backend.clone()),
            Arc::new(connector.clone()),
            Arc::new(StaticProbe(true)),
        )
        .unwrap()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_first_failure_prefers_cancel_then_device() {
        let err = first_failure(
            Some(VoiceError::Offline),
            Some(VoiceError::Cancelled),
        );
        assert!(matches!(err, VoiceError::Cancelled));

        let err = first_failure(
            Some(VoiceError::PermissionDenied {
                message: "no".to_string(),
            }),
            Some(VoiceError::AuthRejected {
                message: "no".to_string(),
            }),
        );
        assert!(matches!(err, VoiceError::PermissionDenied { .. }));

        let err = first_failure(
            None,
            Some(VoiceError::AuthRejected {
                message: "no".to_string(),
            }),
        );
        assert!(matches!(err, VoiceError::AuthRejected { .. }));
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize(Duration::from_secs(10)), "10s");
        assert_eq!(humanize(Duration::from_millis(250)), "250ms");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_and_stop() {
        let backend = MockAudioBackend::new();
        let connector = MockConnector::new().with_auto_open();
        let manager = manager(&backend, &connector);

        manager.start().await.unwrap();
        assert_eq!(manager.state(), SessionState::Active);
        wait_until(|| manager.status().listening);
        assert_eq!(manager.status().to_string(), "Listening...");

        manager.stop();
        assert_eq!(manager.state(), SessionState::Idle);
        assert_eq!(manager.status().to_string(), "Ready to connect");
        assert_eq!(backend.input_close_count(), 1);
        assert_eq!(backend.output_close_count(), 1);
        assert!(connector.remote().unwrap().is_closed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_frames_before_open_are_counted_as_dropped() {
        let backend = MockAudioBackend::new();
        let connector = MockConnector::new();
        let manager = manager(&backend, &connector);

        manager.start().await.unwrap();
        assert!(backend.push_frame(vec![0.2; 4096]));
        wait_until(|| manager.stats().frames_dropped == 1);

        let remote = connector.remote().unwrap();
        remote.open();
        wait_until(|| manager.status().listening);

        assert!(backend.push_frame(vec![0.2; 4096]));
        wait_until(|| manager.stats().frames_sent == 1);
        assert_eq!(remote.frame_count(), 1);
        assert!(manager.volume() > 0.19 && manager.volume() < 0.21);

        manager.stop();
        assert_eq!(manager.volume(), 0.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_decode_failure_is_counted_and_skipped() {
        let backend = MockAudioBackend::new();
        let connector = MockConnector::new().with_auto_open();
        let manager = manager(&backend, &connector);
        manager.start().await.unwrap();
        let remote = connector.remote().unwrap();

        remote.audio(crate::codec::ResponseChunk::from_inline(
            "%%%".to_string(),
            "audio/pcm;rate=24000".to_string(),
            24000,
        ));
        remote.audio_for(Duration::from_millis(500), 24000);

        wait_until(|| manager.stats().chunks_scheduled == 1);
        assert_eq!(manager.stats().decode_failures, 1);
        assert_eq!(backend.scheduled()[0].start, Duration::ZERO);
        assert_eq!(manager.state(), SessionState::Active);
        manager.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transport_error_fails_session() {
        let backend = MockAudioBackend::new();
        let connector = MockConnector::new().with_auto_open();
        let manager = manager(&backend, &connector);
        manager.start().await.unwrap();

        connector.remote().unwrap().error("socket reset");
        wait_until(|| manager.state() == SessionState::Idle);

        let status = manager.status();
        assert_eq!(
            status.error.as_deref(),
            Some("Connection error. Please try again.")
        );
        assert_eq!(backend.input_close_count(), 1);
        assert_eq!(backend.output_close_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remote_close_returns_to_idle_without_error() {
        let backend = MockAudioBackend::new();
        let connector = MockConnector::new().with_auto_open();
        let manager = manager(&backend, &connector);
        manager.start().await.unwrap();

        connector.remote().unwrap().close();
        wait_until(|| manager.state() == SessionState::Idle);
        assert_eq!(manager.status().error, None);
        assert_eq!(connector.remote().unwrap().close_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_while_active_replaces_session() {
        let backend = MockAudioBackend::new();
        let connector = MockConnector::new().with_auto_open();
        let manager = manager(&backend, &connector);

        manager.start().await.unwrap();
        let first = manager.generation();
        manager.start().await.unwrap();

        assert!(manager.generation() > first);
        assert_eq!(connector.connect_count(), 2);
        assert!(connector.remotes()[0].is_closed());
        assert!(!connector.remotes()[1].is_closed());
        assert_eq!(backend.input_open_count(), 2);
        assert_eq!(backend.input_close_count(), 1);
        manager.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connect_timeout_is_network_unreachable() {
        let backend = MockAudioBackend::new();
        let connector = MockConnector::new().with_connect_delay(Duration::from_secs(5));
        let mut config = Config::default();
        config.endpoint.connect_timeout_secs = 1;
        let manager = SessionLifecycleManager::new(
            config,
            Arc::new(backend.clone()),
            Arc::new(connector.clone()),
            Arc::new(StaticProbe(true)),
        )
        .unwrap();

        let result = manager.start().await;
        assert!(matches!(
            result,
            Err(VoiceError::NetworkUnreachable { .. })
        ));
        assert_eq!(manager.state(), SessionState::Idle);
        assert_eq!(backend.input_close_count(), 1);
        assert_eq!(backend.output_close_count(), 1);
    }
}

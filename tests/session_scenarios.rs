//! End-to-end session scenarios against the mock audio backend and connector.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use voicelink::audio::mock::MockAudioBackend;
use voicelink::codec::ResponseChunk;
use voicelink::config::Config;
use voicelink::transport::StaticProbe;
use voicelink::transport::mock::MockConnector;
use voicelink::{SessionLifecycleManager, SessionState, TransportEvent, VoiceError};

const T: Duration = Duration::from_secs(3);

struct Harness {
    backend: MockAudioBackend,
    connector: MockConnector,
    manager: SessionLifecycleManager,
}

impl Harness {
    fn new(backend: MockAudioBackend, connector: MockConnector) -> Self {
        Self::with_probe(backend, connector, true)
    }

    fn with_probe(backend: MockAudioBackend, connector: MockConnector, online: bool) -> Self {
        let manager = SessionLifecycleManager::new(
            Config::default(),
            Arc::new(backend.clone()),
            Arc::new(connector.clone()),
            Arc::new(StaticProbe(online)),
        )
        .unwrap();
        Self {
            backend,
            connector,
            manager,
        }
    }

    fn ready() -> Self {
        Self::new(
            MockAudioBackend::new().with_clock_at(T),
            MockConnector::new().with_auto_open(),
        )
    }
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn start_play_and_stop_mid_response() {
    let h = Harness::ready();

    h.manager.start().await.unwrap();
    wait_until("listening", || h.manager.status().listening);
    assert_eq!(h.manager.status().to_string(), "Listening...");

    let remote = h.connector.remote().unwrap();
    remote.audio_for(Duration::from_millis(1000), 24000);
    remote.audio_for(Duration::from_millis(500), 24000);
    wait_until("both chunks scheduled", || {
        h.manager.stats().chunks_scheduled == 2
    });

    let scheduled = h.backend.scheduled();
    assert_eq!(scheduled.len(), 2);
    assert_eq!(scheduled[0].start, T);
    assert_eq!(scheduled[1].start, T + Duration::from_secs(1));
    assert_eq!(scheduled[1].start, scheduled[0].end());

    h.backend.advance(Duration::from_millis(500));
    h.manager.stop();

    let mut cancelled = h.backend.cancelled();
    cancelled.sort();
    assert_eq!(cancelled, vec![scheduled[0].token, scheduled[1].token]);
    assert_eq!(h.backend.live_count(), 0);
    assert!(remote.is_closed());
    assert_eq!(remote.close_calls(), 1);
    assert_eq!(h.manager.state(), SessionState::Idle);
    assert_eq!(h.manager.status().to_string(), "Ready to connect");
    assert_eq!(h.manager.volume(), 0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn server_interruption_restarts_cursor_at_device_clock() {
    let h = Harness::ready();
    h.manager.start().await.unwrap();
    let remote = h.connector.remote().unwrap();

    remote.audio_for(Duration::from_secs(2), 24000);
    wait_until("A scheduled", || h.manager.stats().chunks_scheduled == 1);
    let a = h.backend.scheduled()[0];
    assert_eq!(a.start, T);

    h.backend.advance(Duration::from_millis(500));
    remote.interrupt();
    wait_until("interruption handled", || {
        h.manager.stats().interruptions == 1
    });
    assert_eq!(h.backend.cancelled(), vec![a.token]);
    assert_eq!(h.manager.active_playback(), 0);

    remote.audio_for(Duration::from_secs(1), 24000);
    wait_until("B scheduled", || h.manager.stats().chunks_scheduled == 2);
    let b = h.backend.scheduled()[1];
    assert_eq!(b.start, T + Duration::from_millis(500));

    assert_eq!(h.manager.state(), SessionState::Active);
    h.manager.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn user_interrupt_silences_without_ending_session() {
    let h = Harness::ready();
    h.manager.start().await.unwrap();
    let remote = h.connector.remote().unwrap();

    remote.audio_for(Duration::from_secs(2), 24000);
    remote.audio_for(Duration::from_secs(2), 24000);
    wait_until("chunks scheduled", || h.manager.stats().chunks_scheduled == 2);

    assert_eq!(h.manager.interrupt(), 2);
    assert_eq!(h.backend.live_count(), 0);
    assert_eq!(h.manager.state(), SessionState::Active);
    assert!(!remote.is_closed());

    h.manager.stop();
    assert_eq!(h.manager.interrupt(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn finished_buffers_leave_the_active_set() {
    let h = Harness::ready();
    h.manager.start().await.unwrap();
    let remote = h.connector.remote().unwrap();

    remote.audio_for(Duration::from_millis(500), 24000);
    remote.audio_for(Duration::from_millis(500), 24000);
    wait_until("chunks scheduled", || h.manager.stats().chunks_scheduled == 2);
    assert_eq!(h.manager.active_playback(), 2);

    h.backend.advance(Duration::from_millis(500));
    wait_until("first buffer finished", || h.manager.active_playback() == 1);

    h.backend.advance(Duration::from_millis(500));
    wait_until("second buffer finished", || h.manager.active_playback() == 0);

    h.manager.stop();
    assert!(h.backend.cancelled().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn audio_received_while_connecting_is_silenced_by_immediate_interrupt() {
    let h = Arc::new(Harness::new(
        MockAudioBackend::new()
            .with_clock_at(T)
            .with_open_delay(Duration::from_millis(200)),
        MockConnector::new().with_auto_open(),
    ));

    let starter = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.manager.start().await })
    };
    wait_until("transport connected", || h.connector.remote().is_some());
    h.connector
        .remote()
        .unwrap()
        .audio_for(Duration::from_secs(1), 24000);

    starter.await.unwrap().unwrap();
    assert!(h.manager.status().listening);
    assert_eq!(h.manager.interrupt(), 1);

    let scheduled = h.backend.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(h.backend.cancelled(), vec![scheduled[0].token]);
    assert_eq!(h.backend.live_count(), 0);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.backend.live_count(), 0);
    assert_eq!(h.manager.active_playback(), 0);
    h.manager.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn status_reports_device_setup_before_connecting() {
    let h = Arc::new(Harness::new(
        MockAudioBackend::new().with_open_delay(Duration::from_millis(150)),
        MockConnector::new()
            .with_auto_open()
            .with_connect_delay(Duration::from_millis(400)),
    ));

    let starter = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.manager.start().await })
    };
    wait_until("initializing audio", || {
        h.manager.status().to_string() == "Initializing audio..."
    });
    wait_until("connecting", || {
        h.manager.status().to_string() == "Connecting..."
    });
    assert_eq!(h.manager.state(), SessionState::Connecting);

    starter.await.unwrap().unwrap();
    assert_eq!(h.manager.status().to_string(), "Listening...");
    h.manager.stop();
    assert_eq!(h.manager.status().to_string(), "Ready to connect");
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_output_device_fails_the_session() {
    let h = Harness::ready();
    h.manager.start().await.unwrap();
    let remote = h.connector.remote().unwrap();

    h.backend.set_schedule_failure(true);
    remote.audio_for(Duration::from_millis(500), 24000);
    wait_until("idle after failure", || h.manager.state() == SessionState::Idle);

    assert_eq!(
        h.manager.status().to_string(),
        "Audio device unavailable. Check your microphone and speakers."
    );
    assert!(remote.is_closed());
    assert_eq!(h.backend.input_close_count(), 1);
    assert_eq!(h.backend.output_close_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn double_stop_tears_down_once() {
    let h = Harness::ready();
    h.manager.start().await.unwrap();
    let remote = h.connector.remote().unwrap();

    h.manager.stop();
    h.manager.stop();

    assert_eq!(h.backend.input_close_count(), 1);
    assert_eq!(h.backend.output_close_count(), 1);
    assert_eq!(remote.close_calls(), 1);
    assert!(remote.is_closed());
    assert_eq!(h.manager.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_callbacks_mutate_nothing() {
    let h = Harness::ready();
    h.manager.start().await.unwrap();
    let old_remote = h.connector.remote().unwrap();
    h.manager.stop();

    // Old session: a frame and a chunk racing teardown.
    assert!(h.backend.push_frame_unchecked(vec![0.9; 4096]));
    old_remote.inject_raw(TransportEvent::AudioChunk(ResponseChunk::from_inline(
        "AAAAAA==".to_string(),
        "audio/pcm;rate=24000".to_string(),
        24000,
    )));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.manager.volume(), 0.0);
    assert!(h.backend.scheduled().is_empty());

    // New session: stale interrupt from the old transport must not flush it.
    h.manager.start().await.unwrap();
    let new_remote = h.connector.remote().unwrap();
    new_remote.audio_for(Duration::from_secs(2), 24000);
    wait_until("new chunk scheduled", || h.manager.stats().chunks_scheduled == 1);

    old_remote.inject_raw(TransportEvent::Interrupted);
    old_remote.inject_raw(TransportEvent::Closed);
    new_remote.audio_for(Duration::from_secs(1), 24000);
    wait_until("second chunk scheduled", || {
        h.manager.stats().chunks_scheduled == 2
    });

    assert_eq!(h.manager.stats().interruptions, 0);
    assert!(h.backend.cancelled().is_empty());
    assert_eq!(h.manager.active_playback(), 2);
    assert_eq!(h.manager.state(), SessionState::Active);
    h.manager.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn volume_stays_in_unit_range() {
    let h = Harness::ready();
    h.manager.start().await.unwrap();
    wait_until("listening", || h.manager.status().listening);

    let frames: Vec<Vec<f32>> = vec![
        vec![0.0; 4096],
        vec![5.0; 4096],
        vec![-7.5; 4096],
        vec![f32::NAN; 4096],
        vec![f32::INFINITY, 0.5, f32::NAN, -1.0],
    ];
    for (i, frame) in frames.into_iter().enumerate() {
        assert!(h.backend.push_frame(frame));
        wait_until("frame sent", || h.manager.stats().frames_sent == i as u64 + 1);
        let v = h.manager.volume();
        assert!((0.0..=1.0).contains(&v), "volume {} out of range", v);
    }

    let remote = h.connector.remote().unwrap();
    let frames = remote.frames();
    assert_eq!(frames.len(), 5);
    assert!(frames.iter().all(|f| f.mime_type == "audio/pcm;rate=16000"));
    h.manager.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_chunk_is_skipped_without_moving_cursor() {
    let h = Harness::ready();
    h.manager.start().await.unwrap();
    let remote = h.connector.remote().unwrap();

    remote.audio(ResponseChunk::from_inline(
        "AAA".to_string(),
        "audio/pcm;rate=24000".to_string(),
        24000,
    ));
    remote.audio_for(Duration::from_millis(250), 24000);
    wait_until("good chunk scheduled", || {
        h.manager.stats().chunks_scheduled == 1
    });

    assert_eq!(h.manager.stats().decode_failures, 1);
    assert_eq!(h.backend.scheduled()[0].start, T);
    assert_eq!(h.manager.state(), SessionState::Active);
    h.manager.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn permission_denied_releases_transport() {
    let h = Harness::new(
        MockAudioBackend::new().with_permission_denied(),
        MockConnector::new().with_auto_open(),
    );

    let result = h.manager.start().await;
    assert!(matches!(result, Err(VoiceError::PermissionDenied { .. })));

    assert_eq!(h.manager.state(), SessionState::Idle);
    assert_eq!(
        h.manager.status().error.as_deref(),
        Some("Microphone access denied. Check permissions.")
    );
    assert_eq!(h.backend.output_open_count(), 0);
    if let Some(remote) = h.connector.remote() {
        assert!(remote.is_closed());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_fails_before_acquiring_anything() {
    let h = Harness::with_probe(
        MockAudioBackend::new(),
        MockConnector::new().with_auto_open(),
        false,
    );

    let result = h.manager.start().await;
    assert!(matches!(result, Err(VoiceError::Offline)));
    assert_eq!(h.manager.status().to_string(), "No internet connection");
    assert_eq!(h.connector.connect_count(), 0);
    assert_eq!(h.backend.input_open_count(), 0);
    assert_eq!(h.manager.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn auth_rejected_releases_devices() {
    let h = Harness::new(
        MockAudioBackend::new(),
        MockConnector::new().with_auth_rejected(),
    );

    let result = h.manager.start().await;
    assert!(matches!(result, Err(VoiceError::AuthRejected { .. })));
    assert_eq!(
        h.manager.status().to_string(),
        "Failed to connect. Check network/permissions."
    );
    assert_eq!(h.backend.input_open_count(), 1);
    assert_eq!(h.backend.input_close_count(), 1);
    assert_eq!(h.backend.output_close_count(), 1);
    assert!(!h.backend.is_capturing());
}

#[tokio::test(flavor = "multi_thread")]
async fn output_unavailable_releases_input() {
    let h = Harness::new(
        MockAudioBackend::new().with_output_unavailable(),
        MockConnector::new().with_auto_open(),
    );

    let result = h.manager.start().await;
    assert!(matches!(result, Err(VoiceError::DeviceUnavailable { .. })));
    assert_eq!(h.backend.input_close_count(), 1);
    assert!(h.connector.remote().unwrap().is_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_while_connecting_cancels_start() {
    let h = Arc::new(Harness::new(
        MockAudioBackend::new(),
        MockConnector::new().with_connect_delay(Duration::from_secs(30)),
    ));

    let starter = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.manager.start().await })
    };
    wait_until("connecting", || h.manager.state() == SessionState::Connecting);
    wait_until("devices opened", || h.backend.input_open_count() == 1);

    let begun = Instant::now();
    h.manager.stop();
    assert_eq!(h.manager.state(), SessionState::Idle);

    let result = starter.await.unwrap();
    assert!(matches!(result, Err(VoiceError::Cancelled)));
    assert!(begun.elapsed() < Duration::from_secs(5));
    assert_eq!(h.backend.input_close_count(), 1);
    assert_eq!(h.backend.output_close_count(), 1);
    assert!(h.connector.remote().is_none());
    assert_eq!(h.manager.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_close_and_error_return_to_idle() {
    let h = Harness::ready();

    h.manager.start().await.unwrap();
    h.connector.remote().unwrap().close();
    wait_until("idle after close", || h.manager.state() == SessionState::Idle);
    assert_eq!(h.manager.status().error, None);
    assert_eq!(h.manager.status().to_string(), "Disconnected");

    h.manager.start().await.unwrap();
    h.connector.remote().unwrap().error("policy violation");
    wait_until("idle after error", || h.manager.state() == SessionState::Idle);
    assert_eq!(
        h.manager.status().to_string(),
        "Connection error. Please try again."
    );
    assert_eq!(h.backend.input_close_count(), 2);

    // A fresh start clears the previous failure.
    h.manager.start().await.unwrap();
    assert_eq!(h.manager.status().error, None);
    h.manager.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn status_subscribers_see_transitions() {
    let h = Harness::ready();
    let mut rx = h.manager.subscribe_status();

    h.manager.start().await.unwrap();
    assert_eq!(rx.borrow_and_update().state, SessionState::Active);

    h.manager.stop();
    rx.changed().await.ok();
    assert_eq!(rx.borrow_and_update().state, SessionState::Idle);
}

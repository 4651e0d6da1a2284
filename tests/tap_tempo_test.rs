//! Tap tempo tests
//!
//! Taps feeding the metronome config of a running transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{advance, Instant};
use tokio_test::assert_ok;

use common::Recorder;
use tempokit::model::MetronomeConfig;
use tempokit::output::OutputSourceRegistry;
use tempokit::tap::TapTempo;
use tempokit::transport::{Transport, TransportSettings};

/// Test: Steady taps
/// Given taps at 0, 500, 1000 and 1500 ms
/// Then the estimated tempo is 120 BPM
#[test]
fn test_taps_at_500ms() {
    let start = Instant::now();
    let mut tap = TapTempo::new();

    let mut tempo = None;
    for ms in [0, 500, 1000, 1500] {
        tempo = tap.tap_at(start + Duration::from_millis(ms));
    }

    assert_eq!(tempo, Some(120.0));
    assert_eq!(tap.intervals().count(), 3);
}

/// Test: Long pause between taps
/// Given a tap at 0 ms
/// When the next tap comes at 3000 ms
/// Then no tempo is emitted and the buffer is empty
#[test]
fn test_pause_starts_new_session() {
    let start = Instant::now();
    let mut tap = TapTempo::new();

    assert_eq!(tap.tap_at(start), None);
    assert_eq!(tap.tap_at(start + Duration::from_millis(3000)), None);
    assert_eq!(tap.intervals().count(), 0);
}

/// Test: Irregular taps
/// Given taps 480, 520, 500 and 460 ms apart
/// Then the tempo is the rounded mean of the last four intervals
#[test]
fn test_irregular_taps() {
    let start = Instant::now();
    let mut tap = TapTempo::new();

    let mut at = start;
    let mut tempo = tap.tap_at(at);
    for gap in [480, 520, 500, 460] {
        at += Duration::from_millis(gap);
        tempo = tap.tap_at(at);
    }

    // mean 490ms -> 122.45 BPM
    assert_eq!(tempo, Some(122.0));
}

/// Test: Tapped tempo drives the transport
/// Given a transport at 120 BPM
/// When the user taps three times 750ms apart
/// Then the transport runs at 80 BPM
#[tokio::test(start_paused = true)]
async fn test_tap_updates_transport() {
    let registry = Arc::new(OutputSourceRegistry::new(Recorder::new().devices()));
    let transport = assert_ok!(Transport::new(
        registry,
        MetronomeConfig::default(),
        TransportSettings::default()
    ));
    let mut tap = TapTempo::new();

    let mut next = None;
    for _ in 0..3 {
        next = tap.apply_to(&transport.config());
        advance(Duration::from_millis(750)).await;
    }

    assert_ok!(transport.update_config(next.unwrap()).await);
    assert_eq!(transport.config().tempo, 80.0);
    assert_eq!(transport.beat_interval(), Duration::from_millis(750));
}

//! Straight-key and iambic-keyer behavior against a running generator.
//!
//! The null sink paces tones in real time, so these tests run at a high
//! WPM to stay quick, and judge element lengths from the keying-callback
//! timestamps, which the generator advances by exact tone lengths.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cwave::{AudioSystem, Generator, Key, KeyValue, Receiver, Timestamp};

/// Durations of the closed (sounding) periods, from keying-callback
/// edges.
fn closed_periods(edges: &[(Timestamp, KeyValue)]) -> Vec<u64> {
    let mut periods = Vec::new();
    let mut closed_at = None;
    for &(t, value) in edges {
        match value {
            KeyValue::Closed => closed_at = Some(t),
            KeyValue::Open => {
                if let Some(start) = closed_at.take() {
                    periods.push(t - start);
                }
            }
        }
    }
    periods
}

fn keyer_fixture() -> (Generator, Key, Arc<Mutex<Vec<(Timestamp, KeyValue)>>>) {
    let mut generator = Generator::new(AudioSystem::Null, None).unwrap();
    generator.set_speed(30).unwrap(); // dot 40 ms, dash 120 ms
    generator.start().unwrap();

    let key = Key::new();
    key.register_generator(&generator);

    let edges = Arc::new(Mutex::new(Vec::new()));
    let edges_in_callback = edges.clone();
    key.register_keying_callback(move |t, value| {
        edges_in_callback.lock().unwrap().push((t, value));
    });

    (generator, key, edges)
}

/// Classify callback-measured element lengths at 30 WPM.
fn elements(edges: &[(Timestamp, KeyValue)]) -> String {
    closed_periods(edges)
        .iter()
        .map(|&len| if len > 80_000 { '-' } else { '.' })
        .collect()
}

#[test]
fn iambic_mode_a_squeeze_sends_dot_dash() {
    let (mut generator, key, edges) = keyer_fixture();

    key.ik_notify_paddle_event(true, false).unwrap(); // dot down
    thread::sleep(Duration::from_millis(15)); // mid-dot
    key.ik_notify_paddle_event(true, true).unwrap(); // squeeze
    thread::sleep(Duration::from_millis(15));
    key.ik_notify_paddle_event(false, false).unwrap(); // release both

    key.ik_wait_for_keyer().unwrap();
    generator.stop();

    assert_eq!(elements(&edges.lock().unwrap()), ".-");
}

#[test]
fn iambic_mode_b_squeeze_adds_opposite_element() {
    let (mut generator, key, edges) = keyer_fixture();
    key.ik_enable_curtis_mode_b();

    key.ik_notify_paddle_event(true, false).unwrap();
    thread::sleep(Duration::from_millis(15));
    key.ik_notify_paddle_event(true, true).unwrap();
    thread::sleep(Duration::from_millis(15));
    key.ik_notify_paddle_event(false, false).unwrap();

    key.ik_wait_for_keyer().unwrap();
    generator.stop();

    assert_eq!(elements(&edges.lock().unwrap()), ".-.");
}

#[test]
fn held_dot_paddle_repeats_dots() {
    let (mut generator, key, edges) = keyer_fixture();

    key.ik_notify_dot_paddle_event(true).unwrap();
    // Three full dot cycles (dot + space = 80 ms each).
    thread::sleep(Duration::from_millis(200));
    key.ik_notify_dot_paddle_event(false).unwrap();

    key.ik_wait_for_keyer().unwrap();
    generator.stop();

    let sent = elements(&edges.lock().unwrap());
    assert!(sent.len() >= 2, "sent = {sent:?}");
    assert!(sent.chars().all(|c| c == '.'), "sent = {sent:?}");
}

#[test]
fn wait_for_keyer_refuses_while_paddle_held() {
    let (mut generator, key, _edges) = keyer_fixture();

    key.ik_notify_dash_paddle_event(true).unwrap();
    assert!(key.ik_wait_for_keyer().is_err());

    key.ik_notify_dash_paddle_event(false).unwrap();
    key.ik_wait_for_keyer().unwrap();
    generator.stop();
}

#[test]
fn wait_for_element_returns_at_element_boundary() {
    let (mut generator, key, _edges) = keyer_fixture();

    key.ik_notify_dot_paddle_event(true).unwrap();
    key.ik_wait_for_element().unwrap();
    key.ik_notify_dot_paddle_event(false).unwrap();
    key.ik_wait_for_keyer().unwrap();
    generator.stop();
}

#[test]
fn straight_key_round_trip_through_receiver() {
    let mut generator = Generator::new(AudioSystem::Null, None).unwrap();
    generator.set_speed(12).unwrap(); // dot 100 ms
    generator.start().unwrap();

    let receiver = Receiver::new();
    receiver.set_speed(12).unwrap();

    let key = Key::new();
    key.register_generator(&generator);
    key.register_receiver(&receiver);

    // Key a dot by hand: ~100 ms down.
    key.sk_notify_event(KeyValue::Closed).unwrap();
    thread::sleep(Duration::from_millis(100));
    key.sk_notify_event(KeyValue::Open).unwrap();

    // Wait out the inter-character gap (3 dots) and poll.
    thread::sleep(Duration::from_millis(320));
    let polled = receiver.poll_character(None).unwrap();
    assert_eq!(polled.character, 'E');

    generator.stop();
}

#[test]
fn straight_key_holds_tone_with_forever_tone() {
    let mut generator = Generator::new(AudioSystem::Null, None).unwrap();
    generator.start().unwrap();

    let key = Key::new();
    key.register_generator(&generator);

    key.sk_notify_event(KeyValue::Closed).unwrap();
    thread::sleep(Duration::from_millis(50));
    // The forever tone keeps being redelivered: the queue never drains
    // while the key is down, and the tracked key value stays closed.
    assert!(generator.queue_length() >= 1);
    assert_eq!(key.tk_value(), KeyValue::Closed);

    key.sk_notify_event(KeyValue::Open).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(key.tk_value(), KeyValue::Open);

    generator.stop();
}

#[test]
fn stop_with_held_paddle_resets_keyer() {
    let (mut generator, key, _edges) = keyer_fixture();

    key.ik_notify_paddle_event(true, true).unwrap();
    thread::sleep(Duration::from_millis(30));
    generator.stop();

    assert!(!key.ik_is_busy());
    assert_eq!(key.ik_paddle_latches(), (false, false));
}

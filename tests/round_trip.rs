//! Send-side timings replayed into a receiver must decode to the
//! original text.

mod test_support;

use cwave::{Generator, Receiver, Timestamp};
use test_support::CaptureSink;

/// Replay the queued tones of an unstarted generator into a receiver as
/// timestamped key events, polling for characters at every tone edge.
///
/// A successful poll repeats the same character when an end-of-character
/// later matures into an end-of-word, so the helper keeps the usual
/// client-side flags: emit each character once, emit each word boundary
/// once.
fn decode_queued(generator: &Generator, receiver: &Receiver) -> String {
    let mut decoded = String::new();
    let mut t: Timestamp = 0;
    let mut character_emitted = false;
    let mut space_emitted = false;

    while let Some(tone) = generator.tone_queue().dequeue() {
        if tone.frequency > 0 {
            receiver.mark_begin(Some(t)).unwrap();
            character_emitted = false;
            space_emitted = false;
            receiver
                .mark_end(Some(t + tone.duration as Timestamp))
                .unwrap();
        }
        t += tone.duration as Timestamp;

        if let Ok(polled) = receiver.poll_character(Some(t)) {
            if !character_emitted {
                decoded.push(polled.character);
                character_emitted = true;
            }
            if polled.is_end_of_word && !space_emitted {
                decoded.push(' ');
                space_emitted = true;
            }
        }
    }
    decoded
}

#[test]
fn paris_round_trips_at_matching_speed() {
    let (sink, _samples) = CaptureSink::new();
    let generator = Generator::with_sink(Box::new(sink)).unwrap();
    generator.set_speed(20).unwrap();
    generator.enqueue_string("PARIS").unwrap();

    let receiver = Receiver::new();
    receiver.set_speed(20).unwrap();
    receiver.set_noise_spike_threshold(0);

    assert_eq!(decode_queued(&generator, &receiver), "PARIS");
}

#[test]
fn every_alphanumeric_round_trips() {
    for c in ('A'..='Z').chain('0'..='9') {
        let (sink, _samples) = CaptureSink::new();
        let generator = Generator::with_sink(Box::new(sink)).unwrap();
        generator.set_speed(35).unwrap();
        generator.enqueue_character(c).unwrap();

        let receiver = Receiver::new();
        receiver.set_speed(35).unwrap();
        receiver.set_noise_spike_threshold(0);

        assert_eq!(decode_queued(&generator, &receiver), c.to_string(), "{c}");
    }
}

#[test]
fn word_space_is_reported_as_end_of_word() {
    let (sink, _samples) = CaptureSink::new();
    let generator = Generator::with_sink(Box::new(sink)).unwrap();
    generator.set_speed(20).unwrap();
    generator.enqueue_string("E E").unwrap();

    let receiver = Receiver::new();
    receiver.set_speed(20).unwrap();
    receiver.set_noise_spike_threshold(0);

    assert_eq!(decode_queued(&generator, &receiver), "E E");
}

#[test]
fn weighted_sending_still_decodes() {
    // Weighting stretches marks and shrinks spaces; tolerance absorbs it.
    let (sink, _samples) = CaptureSink::new();
    let generator = Generator::with_sink(Box::new(sink)).unwrap();
    generator.set_speed(20).unwrap();
    generator.set_weighting(55).unwrap();
    generator.enqueue_string("SOS").unwrap();

    let receiver = Receiver::new();
    receiver.set_speed(20).unwrap();
    receiver.set_noise_spike_threshold(0);

    assert_eq!(decode_queued(&generator, &receiver), "SOS");
}

#[test]
fn adaptive_receiver_follows_generator_speed_change() {
    let (sink, _samples) = CaptureSink::new();
    let generator = Generator::with_sink(Box::new(sink)).unwrap();
    generator.set_speed(20).unwrap();
    generator.enqueue_string("PARIS").unwrap();

    let receiver = Receiver::new();
    receiver.set_speed(20).unwrap();
    receiver.set_noise_spike_threshold(0);
    receiver.enable_adaptive_mode();

    assert_eq!(decode_queued(&generator, &receiver), "PARIS");
    // Steady-state input at 20 WPM keeps the estimate there.
    assert!((receiver.speed() - 20.0).abs() < 1.0);

    // The same text a third slower: the tracker should settle near the
    // new speed without being told.
    generator.set_speed(14).unwrap();
    generator.enqueue_string("PARIS PARIS").unwrap();
    let decoded = decode_queued(&generator, &receiver);
    assert!(decoded.contains("PARIS"), "decoded = {decoded:?}");
    assert!((receiver.speed() - 14.0).abs() < 2.0, "speed = {}", receiver.speed());
}

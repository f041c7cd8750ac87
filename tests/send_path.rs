//! End-to-end send path: enqueue characters, render through a capturing
//! sink, inspect the PCM that came out.

mod test_support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cwave::{Generator, SlopeShape};
use test_support::CaptureSink;

#[test]
fn a_dot_renders_as_a_shaped_burst_of_sine() {
    let (sink, samples) = CaptureSink::new();
    let mut generator = Generator::with_sink(Box::new(sink)).unwrap();
    generator.set_speed(60).unwrap(); // dot: 20 ms = 882 samples at 44.1 kHz
    generator.start().unwrap();

    generator.enqueue_character('E').unwrap();
    generator.wait_for_queue_level(0);
    // Give the synthesis thread time to render the trailing silence and
    // flush its buffer.
    std::thread::sleep(Duration::from_millis(100));
    generator.stop();

    let samples = samples.lock().unwrap();
    assert!(!samples.is_empty());

    // The mark is 70 % volume: peak amplitude around 0.7 * 2^15.
    let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
    assert!(peak > 20_000, "peak = {peak}");
    assert!(peak <= 23_000, "peak = {peak}");

    // The tone starts on a rising slope, so the very first samples are
    // quiet.
    assert!(samples[0].unsigned_abs() < 1000);

    // Roughly one dot of sound; everything after the mark is silence.
    let last_loud = samples
        .iter()
        .rposition(|s| s.unsigned_abs() > 100)
        .unwrap();
    assert!((800..=1000).contains(&last_loud), "last_loud = {last_loud}");
    assert!(samples[last_loud + 100..].iter().all(|&s| s == 0));
}

#[test]
fn rectangular_slopes_start_at_full_amplitude() {
    let (sink, samples) = CaptureSink::new();
    let mut generator = Generator::with_sink(Box::new(sink)).unwrap();
    generator.set_speed(60).unwrap();
    generator
        .set_tone_slope(Some(SlopeShape::Rectangular), None)
        .unwrap();
    generator.start().unwrap();

    generator.enqueue_character('T').unwrap();
    generator.wait_for_queue_level(0);
    std::thread::sleep(Duration::from_millis(100));
    generator.stop();

    let samples = samples.lock().unwrap();
    // No ramp: the waveform reaches a high amplitude within the first
    // period of the 800 Hz tone (55 samples at 44.1 kHz).
    let early_peak = samples[..56].iter().map(|s| s.unsigned_abs()).max().unwrap();
    assert!(early_peak > 20_000, "early_peak = {early_peak}");
}

#[test]
fn flush_right_after_enqueue_leaves_nothing() {
    let (sink, _samples) = CaptureSink::new();
    let generator = Generator::with_sink(Box::new(sink)).unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = fired.clone();
    generator
        .register_low_water_callback(
            move || {
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            },
            1,
        )
        .unwrap();

    generator.enqueue_character('Q').unwrap();
    generator.flush_queue();

    assert_eq!(generator.queue_length(), 0);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn low_water_callback_fires_while_draining() {
    let (sink, _samples) = CaptureSink::new();
    let mut generator = Generator::with_sink(Box::new(sink)).unwrap();
    generator.set_speed(60).unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = fired.clone();
    generator
        .register_low_water_callback(
            move || {
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            },
            1,
        )
        .unwrap();

    // A lone word space: the split guarantees the queue length passes
    // through 2 -> 1 even for this single "character".
    generator.enqueue_character(' ').unwrap();
    assert!(generator.queue_length() >= 2);

    generator.start().unwrap();
    generator.wait_for_queue_level(0);
    generator.stop();

    assert!(fired.load(Ordering::SeqCst) >= 1);
}

#[test]
fn phase_is_continuous_across_tones() {
    let (sink, samples) = CaptureSink::new();
    let mut generator = Generator::with_sink(Box::new(sink)).unwrap();
    generator.set_speed(60).unwrap();
    generator.start().unwrap();

    // Two dashes: two separate bursts with silence between them.
    generator.enqueue_string("TT").unwrap();
    generator.wait_for_queue_level(0);
    std::thread::sleep(Duration::from_millis(100));
    generator.stop();

    let samples = samples.lock().unwrap();
    // No sample-to-sample jump may exceed what an 800 Hz sine at full
    // volume can do in one 44.1 kHz step (~2.6 k); clicks from phase
    // discontinuities or unshaped edges would be much larger.
    let max_step = samples
        .windows(2)
        .map(|w| (w[1] as i32 - w[0] as i32).unsigned_abs())
        .max()
        .unwrap();
    assert!(max_step < 3000, "max_step = {max_step}");
}

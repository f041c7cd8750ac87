//! Error types surfaced by the engine.

/// Errors returned by tone-queue, generator, key and receiver operations.
///
/// Every error is reported synchronously by the operation that observed it;
/// nothing unwinds across the synthesis thread. Errors detected on that
/// thread are logged or recorded on the receiver instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A parameter was outside its documented range, or a representation
    /// string was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The operation cannot complete right now: the tone queue is full, or
    /// a poll came while the receiver is still inside a character. Retry
    /// after waiting or polling later.
    #[error("operation would block: {0}")]
    WouldBlock(&'static str),

    /// The receiver's representation buffer is exhausted. The receiver is
    /// forced into an end-of-character error state; poll and reset it.
    #[error("receiver representation buffer is full")]
    BufferFull,

    /// A representation does not map to any character, or an unknown
    /// character was passed to an enqueue operation.
    #[error("no such character or representation")]
    NotFound,

    /// A mark was shorter than the noise-spike threshold and has been
    /// absorbed; receiver state was rolled back.
    #[error("mark rejected as a noise spike")]
    Noise,

    /// The operation is not legal in the receiver's or keyer's current
    /// state.
    #[error("operation called in wrong state: {0}")]
    InvalidState(&'static str),
}

/// Errors produced by an audio sink.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SinkError {
    /// The device could not be opened, or rejected every offered sample
    /// rate.
    #[error("failed to open audio device: {0}")]
    Open(String),

    /// A buffer was lost to an underrun. Recoverable; the generator logs a
    /// warning and keeps going.
    #[error("audio sink underrun")]
    Underrun,

    /// Writing to the device failed in a way the generator cannot recover
    /// from; the synthesis loop exits.
    #[error("failed to write to audio device: {0}")]
    Write(String),
}

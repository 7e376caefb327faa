//! Error taxonomy observable to the outer program.

use std::io;

/// Everything that can go wrong in a game, classified the way the
/// propagation policy distinguishes them: `Malformed` is recovered locally
/// by the demultiplexer; the rest bubble up to the coordinator, which
/// aborts the game.
#[derive(Debug, thiserror::Error)]
pub enum GtpError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("relay handshake failed: {0}")]
    Handshake(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("value out of range [0, p): {0}")]
    OutOfRange(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid guess: {0}")]
    UserInput(String),
}

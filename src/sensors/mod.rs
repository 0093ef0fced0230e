//! Frame sources feeding the tracker.

pub mod directory;
pub mod synthetic;
pub mod udp;
pub mod wire;

use crate::slam::frame::{ObservationError, Observations};

use self::wire::{PacketError, WireError};

/// Anything that can produce frames of observations.
pub trait FrameSource {
    /// Next frame, or `Ok(None)` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Observations>, SourceError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Observations>, SourceError> {
        (**self).next_frame()
    }
}

#[derive(Debug)]
pub enum SourceError {
    Io(std::io::Error),
    Malformed(String),
    Wire(WireError),
    Observation(ObservationError),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Io(err) => write!(f, "frame source i/o error: {err}"),
            SourceError::Malformed(reason) => write!(f, "malformed frame: {reason}"),
            SourceError::Wire(err) => write!(f, "malformed datagram: {err}"),
            SourceError::Observation(err) => write!(f, "malformed observations: {err}"),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err)
    }
}

impl From<WireError> for SourceError {
    fn from(err: WireError) -> Self {
        SourceError::Wire(err)
    }
}

impl From<ObservationError> for SourceError {
    fn from(err: ObservationError) -> Self {
        SourceError::Observation(err)
    }
}

impl From<PacketError> for SourceError {
    fn from(err: PacketError) -> Self {
        match err {
            PacketError::Wire(err) => SourceError::Wire(err),
            PacketError::Observation(err) => SourceError::Observation(err),
        }
    }
}

//! Error taxonomy for the MIDI-to-NES compiler core (see spec.md §7)

use thiserror::Error;

/// Result type for pipeline-stage operations
pub type Result<T> = std::result::Result<T, CompileError>;

/// Fatal compile errors. Any one of these aborts the compile and no
/// output files are written (spec.md §7, "User-visible behaviour").
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("invalid input in stage {stage}: {message}")]
    InvalidInput { stage: &'static str, message: String },

    #[error("invalid tempo map: {0}")]
    InvalidTempoMap(String),

    #[error("unpaired note events exceed threshold: {unpaired} of {total} ({ratio:.1}%)")]
    UnpairedEventsExceedThreshold {
        unpaired: usize,
        total: usize,
        ratio: f64,
    },

    #[error("track {track_index} could not be assigned to any NES channel")]
    UnassignableTrack { track_index: usize },

    #[error("encoded song ({encoded_bytes} bytes) exceeds mapper capacity ({capacity_bytes} bytes)")]
    RomSizeExceeded {
        encoded_bytes: usize,
        capacity_bytes: usize,
    },

    #[error("internal invariant violated in stage {stage}: {message}")]
    InternalInvariant { stage: &'static str, message: String },
}

impl CompileError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        CompileError::InvalidInput {
            stage,
            message: message.into(),
        }
    }

    pub fn internal_invariant(stage: &'static str, message: impl Into<String>) -> Self {
        CompileError::InternalInvariant {
            stage,
            message: message.into(),
        }
    }
}

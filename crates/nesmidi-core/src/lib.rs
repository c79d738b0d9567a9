//! Shared domain model, error taxonomy, and stage interface for the
//! MIDI-to-NES compiler core.
//!
//! Every pipeline stage (tempo mapping, event normalisation, channel
//! assignment, frame generation, pattern detection, code emission) is an
//! independent crate that depends on this one for its inputs, outputs,
//! and fallible-operation contract. See spec.md for the pipeline
//! overview and SPEC_FULL.md for the crate layout.

pub mod config;
pub mod diagnostics;
pub mod dpcm;
pub mod error;
pub mod raw;
pub mod stage;
pub mod types;

pub use config::{
    AdsrConfig, ChannelEnvelopes, ChannelMapperConfig, CompilerConfig, EmitterConfig, Mapper,
    PatternDetectorConfig, PolyphonyStrategy,
};
pub use diagnostics::{Diagnostic, DiagnosticSink, Severity};
pub use dpcm::{DpcmSample, DpcmSampleTable};
pub use error::{CompileError, Result};
pub use raw::{RawEvent, RawEventKind, RawNoteKind, RawSong, RawTrack};
pub use stage::Stage;
pub use types::{
    Channel, ChannelAssignment, ChannelTimeline, CompressedChannel, FrameCell, NoteEvent, Pattern,
    PatternReference, SongModule, TrackSummary,
};

//! Shared domain model (spec.md §3)

use serde::{Deserialize, Serialize};

/// A note sounding on one MIDI track, already quantised to the 60 Hz grid.
/// Immutable once produced by the Event Normaliser. A `duration_frames` of
/// zero is a note-off marker that has not yet been paired away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub frame: u32,
    pub midi_note: u8,
    pub velocity: u8,
    pub duration_frames: u32,
}

impl NoteEvent {
    pub fn end_frame(&self) -> u32 {
        self.frame + self.duration_frames
    }

    /// Whether this event's `[frame, frame+duration)` interval overlaps `other`'s.
    pub fn overlaps(&self, other: &NoteEvent) -> bool {
        self.frame < other.end_frame() && other.frame < self.end_frame()
    }
}

/// One tempo change, in MIDI tick time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoEntry {
    pub tick: u32,
    pub microseconds_per_quarter: u32,
}

/// The five NES APU channels. Each carries its own register-encoding
/// rules (spec.md §4.4) via the `nesmidi-frames` crate; this tag is the
/// shared vocabulary every stage dispatches on (spec.md §9,
/// "Polymorphism over channels").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    Pulse1,
    Pulse2,
    Triangle,
    Noise,
    Dpcm,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Pulse1,
        Channel::Pulse2,
        Channel::Triangle,
        Channel::Noise,
        Channel::Dpcm,
    ];

    pub fn index(self) -> usize {
        match self {
            Channel::Pulse1 => 0,
            Channel::Pulse2 => 1,
            Channel::Triangle => 2,
            Channel::Noise => 3,
            Channel::Dpcm => 4,
        }
    }

    pub fn has_volume_control(self) -> bool {
        !matches!(self, Channel::Triangle | Channel::Dpcm)
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::Pulse1 => "pulse1",
            Channel::Pulse2 => "pulse2",
            Channel::Triangle => "triangle",
            Channel::Noise => "noise",
            Channel::Dpcm => "dpcm",
        }
    }
}

/// Per-input-track statistics used by the Channel Mapper (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackSummary {
    pub average_pitch: f64,
    pub pitch_min: u8,
    pub pitch_max: u8,
    pub note_density: f64,
    pub max_simultaneous_notes: u32,
    pub is_percussion: bool,
}

/// The polyphony-reduced note list for each of the five NES channels.
/// Invariant: within a channel, `[frame, frame+duration)` intervals are
/// pairwise disjoint (spec.md §3, §8).
#[derive(Debug, Clone, Default)]
pub struct ChannelAssignment {
    pub notes: Vec<NoteEvent>,
}

impl ChannelAssignment {
    pub fn push_checked(&mut self, event: NoteEvent) -> bool {
        if self.notes.iter().any(|existing| existing.overlaps(&event)) {
            return false;
        }
        self.notes.push(event);
        true
    }

    /// Verify the non-overlap invariant holds. Used by tests and by
    /// callers that want to assert `InternalInvariant` rather than trust
    /// construction order.
    pub fn is_valid(&self) -> bool {
        for (i, a) in self.notes.iter().enumerate() {
            for b in &self.notes[i + 1..] {
                if a.overlaps(b) {
                    return false;
                }
            }
        }
        true
    }
}

/// Register-level state for one channel at one frame (spec.md §3, §4.4).
/// Triangle has no independent volume (it is 0 or 15 depending on whether
/// the channel is silenced); DPCM cells reference sample indices instead
/// of a timer/volume pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameCell {
    pub note: Option<u8>,
    pub volume: u8,
    pub timer: u16,
    pub control_byte: u8,
    pub retrigger: bool,
}

impl FrameCell {
    /// Canonical silence cell for Pulse channels: duty 0, constant
    /// volume, volume 0 -> control byte $30 (spec.md §4.4, §8).
    pub const PULSE_SILENT_CONTROL: u8 = 0x30;
    /// Canonical silence cell for Triangle: $00, *not* $80 (spec.md §4.4).
    pub const TRIANGLE_SILENT_CONTROL: u8 = 0x00;

    pub fn silent_pulse() -> Self {
        FrameCell {
            note: None,
            volume: 0,
            timer: 0,
            control_byte: Self::PULSE_SILENT_CONTROL,
            retrigger: false,
        }
    }

    pub fn silent_triangle() -> Self {
        FrameCell {
            note: None,
            volume: 0,
            timer: 0,
            control_byte: Self::TRIANGLE_SILENT_CONTROL,
            retrigger: false,
        }
    }

    pub fn silent_noise() -> Self {
        // Noise's register layout mirrors Pulse's minus the duty bits,
        // so its silencing byte is the same $30 (halt + const-vol, vol 0).
        FrameCell {
            note: None,
            volume: 0,
            timer: 0,
            control_byte: 0x30,
            retrigger: false,
        }
    }

    pub fn silent_dpcm() -> Self {
        FrameCell {
            note: None,
            volume: 0,
            timer: 0,
            control_byte: 0x00,
            retrigger: false,
        }
    }

    pub fn silent_for(channel: Channel) -> Self {
        match channel {
            Channel::Pulse1 | Channel::Pulse2 => Self::silent_pulse(),
            Channel::Triangle => Self::silent_triangle(),
            Channel::Noise => Self::silent_noise(),
            Channel::Dpcm => Self::silent_dpcm(),
        }
    }

    pub fn is_silent(&self, channel: Channel) -> bool {
        *self == Self::silent_for(channel)
    }
}

/// A dense, frame-indexed timeline for one channel. Created once by the
/// Frame Generator, consumed read-only by the Pattern Detector.
pub type ChannelTimeline = Vec<FrameCell>;

/// A content-addressed, immutable run of frame cells reused at many
/// positions in a channel's timeline (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub id: u32,
    pub length: u16,
    pub cells: Vec<FrameCell>,
}

/// One occurrence of a `Pattern` within the original timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternReference {
    pub frame: u32,
    pub pattern_id: u32,
    pub transpose: i8,
    pub volume_delta: i8,
}

impl PatternReference {
    pub fn identity(frame: u32, pattern_id: u32) -> Self {
        PatternReference {
            frame,
            pattern_id,
            transpose: 0,
            volume_delta: 0,
        }
    }

    pub fn end_frame(&self, pattern_length: u16) -> u32 {
        self.frame + pattern_length as u32
    }
}

/// A channel's timeline expressed as pattern references plus a residual
/// of cells not covered by any reference. Reconstructing `ChannelTimeline`
/// from this plus the pattern library must reproduce the input
/// bit-exactly (spec.md §3, §8 round-trip law).
#[derive(Debug, Clone, Default)]
pub struct CompressedChannel {
    pub pattern_refs: Vec<PatternReference>,
    pub residual: Vec<(u32, FrameCell)>,
}

/// The final artifact fed to the Code Emitter (spec.md §3).
#[derive(Debug, Clone)]
pub struct SongModule {
    pub patterns: Vec<Pattern>,
    pub channels: [CompressedChannel; 5],
    pub total_frames: u32,
    pub loop_point: Option<u32>,
}

impl SongModule {
    pub fn channel(&self, channel: Channel) -> &CompressedChannel {
        &self.channels[channel.index()]
    }
}

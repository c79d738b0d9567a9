//! The normalised event stream the byte-level MIDI parser produces
//! (spec.md §6, "Input — MIDI"). The parser itself is out of scope; this
//! module is the interface the Event Normaliser consumes.

/// A note-level MIDI event before pairing, in tick time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawNoteKind {
    /// Note-on. A velocity of 0 is MIDI convention for note-off and is
    /// handled by the Event Normaliser, not here.
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
}

/// One timestamped event in a track's raw stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub tick: u32,
    pub kind: RawEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    Note(RawNoteKind),
    /// A tempo-change meta event, in microseconds per quarter note.
    Tempo(u32),
}

/// One input MIDI track: its own event stream plus the MIDI channel it
/// was authored on (used by the Channel Mapper's percussion detection --
/// MIDI channel 10 is conventionally percussion).
#[derive(Debug, Clone, Default)]
pub struct RawTrack {
    pub midi_channel: Option<u8>,
    pub events: Vec<RawEvent>,
}

/// A full song as delivered by the external parser: the initial
/// ticks-per-quarter-note resolution plus one `RawTrack` per MIDI track.
/// Tempo-change events may appear on any track, most commonly track 0.
#[derive(Debug, Clone, Default)]
pub struct RawSong {
    pub ticks_per_quarter: u16,
    pub tracks: Vec<RawTrack>,
}

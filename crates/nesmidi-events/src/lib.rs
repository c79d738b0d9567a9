//! Event Normaliser (spec.md §4.2): pairs MIDI note-on/off events into
//! `NoteEvent` quadruples per track, building the Tempo Map along the
//! way.

use nesmidi_core::{
    CompileError, DiagnosticSink, NoteEvent, RawEventKind, RawNoteKind, RawSong, Result, Stage,
    TempoEntry, TrackSummary,
};
use nesmidi_tempo::TempoMap;
use std::collections::HashMap;

const STAGE: &str = "event_normaliser";

/// Threshold past which unmatched note-off events indicate a malformed
/// file rather than ordinary sloppy authoring (spec.md §4.2).
const UNPAIRED_THRESHOLD: f64 = 0.05;

/// One input track's normalised note stream plus summary statistics.
#[derive(Debug, Clone)]
pub struct NormalizedTrack {
    pub midi_channel: Option<u8>,
    pub summary: TrackSummary,
    pub notes: Vec<NoteEvent>,
}

/// Build the Tempo Map from every `Tempo` meta-event found across all
/// tracks (most commonly on track 0), then normalise each track's note
/// stream against it.
pub fn normalize(raw: &RawSong, diagnostics: &mut DiagnosticSink) -> Result<(TempoMap, Vec<NormalizedTrack>)> {
    let tempo_map = build_tempo_map(raw)?;

    let mut tracks = Vec::with_capacity(raw.tracks.len());
    let mut total_unmatched = 0usize;
    let mut total_note_events = 0usize;

    for (track_index, track) in raw.tracks.iter().enumerate() {
        let (notes, unmatched, total) = normalize_track(track, &tempo_map, diagnostics, track_index);
        total_unmatched += unmatched;
        total_note_events += total;
        let summary = summarize_track(track.midi_channel, &notes, tempo_map.ticks_per_quarter());
        tracks.push(NormalizedTrack {
            midi_channel: track.midi_channel,
            summary,
            notes,
        });
    }

    if total_note_events > 0 {
        let ratio = total_unmatched as f64 / total_note_events as f64;
        if ratio > UNPAIRED_THRESHOLD {
            return Err(CompileError::UnpairedEventsExceedThreshold {
                unpaired: total_unmatched,
                total: total_note_events,
                ratio: ratio * 100.0,
            });
        }
    }

    Ok((tempo_map, tracks))
}

/// `Stage` entry point for the Event Normaliser (spec.md §9): wraps
/// [`normalize`] so it can be swapped for another normalisation strategy
/// without the Channel Mapper knowing the difference.
pub struct EventNormalizer;

impl<'a> Stage<&'a RawSong, (TempoMap, Vec<NormalizedTrack>)> for EventNormalizer {
    fn run(
        &self,
        input: &'a RawSong,
        diagnostics: &mut DiagnosticSink,
    ) -> Result<(TempoMap, Vec<NormalizedTrack>)> {
        normalize(input, diagnostics)
    }
}

fn build_tempo_map(raw: &RawSong) -> Result<TempoMap> {
    let mut entries: Vec<TempoEntry> = Vec::new();
    for track in &raw.tracks {
        for event in &track.events {
            if let RawEventKind::Tempo(us_per_quarter) = event.kind {
                entries.push(TempoEntry {
                    tick: event.tick,
                    microseconds_per_quarter: us_per_quarter,
                });
            }
        }
    }
    entries.sort_by_key(|e| e.tick);
    entries.dedup_by_key(|e| e.tick);

    if entries.is_empty() || entries[0].tick != 0 {
        // No explicit initial tempo: MIDI's implicit default is 120 BPM
        // (500,000 microseconds per quarter note).
        entries.insert(
            0,
            TempoEntry {
                tick: 0,
                microseconds_per_quarter: 500_000,
            },
        );
    }

    TempoMap::build(&entries, raw.ticks_per_quarter)
}

/// Pair note-on/off events for one track. Returns the paired notes plus
/// (unmatched_note_offs, total_note_events) for the unpaired-ratio check.
fn normalize_track(
    track: &nesmidi_core::RawTrack,
    tempo_map: &TempoMap,
    diagnostics: &mut DiagnosticSink,
    track_index: usize,
) -> (Vec<NoteEvent>, usize, usize) {
    let mut active: HashMap<u8, (u32, u8)> = HashMap::new(); // pitch -> (start_tick, velocity)
    let mut notes = Vec::new();
    let mut unmatched = 0usize;
    let mut total_note_events = 0usize;
    let mut last_tick = 0u32;

    for event in &track.events {
        last_tick = last_tick.max(event.tick);
        let kind = match event.kind {
            RawEventKind::Note(k) => k,
            RawEventKind::Tempo(_) => continue,
        };
        total_note_events += 1;

        match kind {
            RawNoteKind::NoteOn { note, velocity: 0 } | RawNoteKind::NoteOff { note } => {
                if let Some((start_tick, velocity)) = active.remove(&note) {
                    push_note(&mut notes, tempo_map, start_tick, note, velocity, event.tick);
                } else {
                    unmatched += 1;
                    diagnostics.info(
                        STAGE,
                        format!(
                            "track {track_index}: unmatched note-off for pitch {note} at tick {}",
                            event.tick
                        ),
                    );
                }
            }
            RawNoteKind::NoteOn { note, velocity } => {
                if active.contains_key(&note) {
                    // Overlapping same-pitch note-on: extend the earlier
                    // note instead of starting a new one (spec.md §4.2).
                    continue;
                }
                active.insert(note, (event.tick, velocity));
            }
        }
    }

    // Notes still sounding at track end are implicitly closed there --
    // this is not the "unmatched note-off" failure mode (there was no
    // errant note-off), just a track that never explicitly released.
    let mut dangling: Vec<_> = active.into_iter().collect();
    dangling.sort_by_key(|(note, _)| *note);
    for (note, (start_tick, velocity)) in dangling {
        diagnostics.info(
            STAGE,
            format!("track {track_index}: note {note} held to end of track"),
        );
        push_note(&mut notes, tempo_map, start_tick, note, velocity, last_tick);
    }

    notes.sort_by_key(|n| n.frame);
    (notes, unmatched, total_note_events)
}

fn push_note(
    notes: &mut Vec<NoteEvent>,
    tempo_map: &TempoMap,
    start_tick: u32,
    note: u8,
    velocity: u8,
    end_tick: u32,
) {
    let start_frame = tempo_map.tick_to_frame(start_tick);
    let end_frame = tempo_map.tick_to_frame(end_tick);
    // Durations below 1 frame are promoted to 1 frame: a note must be
    // audible (spec.md §4.2).
    let duration_frames = end_frame.saturating_sub(start_frame).max(1);
    notes.push(NoteEvent {
        frame: start_frame,
        midi_note: note,
        velocity,
        duration_frames,
    });
}

fn summarize_track(midi_channel: Option<u8>, notes: &[NoteEvent], _tpq: u16) -> TrackSummary {
    if notes.is_empty() {
        return TrackSummary {
            average_pitch: 0.0,
            pitch_min: 0,
            pitch_max: 0,
            note_density: 0.0,
            max_simultaneous_notes: 0,
            is_percussion: midi_channel == Some(9),
        };
    }

    let pitch_min = notes.iter().map(|n| n.midi_note).min().unwrap();
    let pitch_max = notes.iter().map(|n| n.midi_note).max().unwrap();
    let average_pitch = notes.iter().map(|n| n.midi_note as f64).sum::<f64>() / notes.len() as f64;

    let last_frame = notes.iter().map(|n| n.end_frame()).max().unwrap_or(0);
    let duration_seconds = (last_frame as f64 / 60.0).max(1.0 / 60.0);
    let note_density = notes.len() as f64 / duration_seconds;

    let max_simultaneous_notes = max_overlap(notes);

    TrackSummary {
        average_pitch,
        pitch_min,
        pitch_max,
        note_density,
        max_simultaneous_notes,
        is_percussion: midi_channel == Some(9),
    }
}

/// Classic sweep-line max-overlap count over `[frame, frame+duration)` intervals.
fn max_overlap(notes: &[NoteEvent]) -> u32 {
    let mut events: Vec<(u32, i32)> = Vec::with_capacity(notes.len() * 2);
    for n in notes {
        events.push((n.frame, 1));
        events.push((n.end_frame(), -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    let mut current = 0i32;
    let mut peak = 0i32;
    for (_, delta) in events {
        current += delta;
        peak = peak.max(current);
    }
    peak.max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use nesmidi_core::{RawEvent, RawTrack};

    fn track_with(channel: Option<u8>, events: Vec<RawEvent>) -> RawTrack {
        RawTrack {
            midi_channel: channel,
            events,
        }
    }

    #[test]
    fn middle_c_quarter_note_produces_one_note_event() {
        let raw = RawSong {
            ticks_per_quarter: 480,
            tracks: vec![track_with(
                Some(0),
                vec![
                    RawEvent {
                        tick: 0,
                        kind: RawEventKind::Tempo(500_000),
                    },
                    RawEvent {
                        tick: 0,
                        kind: RawEventKind::Note(RawNoteKind::NoteOn {
                            note: 60,
                            velocity: 64,
                        }),
                    },
                    RawEvent {
                        tick: 480,
                        kind: RawEventKind::Note(RawNoteKind::NoteOff { note: 60 }),
                    },
                ],
            )],
        };
        let mut diagnostics = DiagnosticSink::new();
        let (_, tracks) = normalize(&raw, &mut diagnostics).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].notes.len(), 1);
        let note = tracks[0].notes[0];
        assert_eq!(
            note,
            NoteEvent {
                frame: 0,
                midi_note: 60,
                velocity: 64,
                duration_frames: 30
            }
        );
    }

    #[test]
    fn velocity_zero_note_on_is_note_off() {
        let raw = RawSong {
            ticks_per_quarter: 480,
            tracks: vec![track_with(
                Some(0),
                vec![
                    RawEvent {
                        tick: 0,
                        kind: RawEventKind::Note(RawNoteKind::NoteOn {
                            note: 64,
                            velocity: 100,
                        }),
                    },
                    RawEvent {
                        tick: 240,
                        kind: RawEventKind::Note(RawNoteKind::NoteOn {
                            note: 64,
                            velocity: 0,
                        }),
                    },
                ],
            )],
        };
        let mut diagnostics = DiagnosticSink::new();
        let (_, tracks) = normalize(&raw, &mut diagnostics).unwrap();
        assert_eq!(tracks[0].notes.len(), 1);
        assert_eq!(tracks[0].notes[0].duration_frames, 15);
    }

    #[test]
    fn overlapping_same_pitch_note_on_is_ignored() {
        let raw = RawSong {
            ticks_per_quarter: 480,
            tracks: vec![track_with(
                Some(0),
                vec![
                    RawEvent {
                        tick: 0,
                        kind: RawEventKind::Note(RawNoteKind::NoteOn {
                            note: 60,
                            velocity: 100,
                        }),
                    },
                    RawEvent {
                        tick: 100,
                        kind: RawEventKind::Note(RawNoteKind::NoteOn {
                            note: 60,
                            velocity: 50,
                        }),
                    },
                    RawEvent {
                        tick: 960,
                        kind: RawEventKind::Note(RawNoteKind::NoteOff { note: 60 }),
                    },
                ],
            )],
        };
        let mut diagnostics = DiagnosticSink::new();
        let (_, tracks) = normalize(&raw, &mut diagnostics).unwrap();
        // The second note-on should not have started a new note; only
        // one note event, spanning from tick 0 to tick 960.
        assert_eq!(tracks[0].notes.len(), 1);
        assert_eq!(tracks[0].notes[0].velocity, 100);
        assert_eq!(tracks[0].notes[0].duration_frames, 60);
    }

    #[test]
    fn instantaneous_note_produces_one_frame_duration() {
        let raw = RawSong {
            ticks_per_quarter: 480,
            tracks: vec![track_with(
                Some(0),
                vec![
                    RawEvent {
                        tick: 0,
                        kind: RawEventKind::Note(RawNoteKind::NoteOn {
                            note: 72,
                            velocity: 90,
                        }),
                    },
                    RawEvent {
                        tick: 1,
                        kind: RawEventKind::Note(RawNoteKind::NoteOff { note: 72 }),
                    },
                ],
            )],
        };
        let mut diagnostics = DiagnosticSink::new();
        let (_, tracks) = normalize(&raw, &mut diagnostics).unwrap();
        assert_eq!(tracks[0].notes[0].duration_frames, 1);
    }

    #[test]
    fn excessive_unmatched_note_offs_is_an_error() {
        let mut events = vec![RawEvent {
            tick: 0,
            kind: RawEventKind::Note(RawNoteKind::NoteOn {
                note: 60,
                velocity: 100,
            }),
        }];
        events.push(RawEvent {
            tick: 10,
            kind: RawEventKind::Note(RawNoteKind::NoteOff { note: 60 }),
        });
        // Flood with unmatched note-offs for pitches never turned on.
        for pitch in 0..40u8 {
            events.push(RawEvent {
                tick: 20 + pitch as u32,
                kind: RawEventKind::Note(RawNoteKind::NoteOff { note: pitch }),
            });
        }
        let raw = RawSong {
            ticks_per_quarter: 480,
            tracks: vec![track_with(Some(0), events)],
        };
        let mut diagnostics = DiagnosticSink::new();
        let result = normalize(&raw, &mut diagnostics);
        assert!(matches!(
            result,
            Err(CompileError::UnpairedEventsExceedThreshold { .. })
        ));
    }

    #[test]
    fn percussion_channel_is_flagged() {
        let raw = RawSong {
            ticks_per_quarter: 480,
            tracks: vec![track_with(
                Some(9),
                vec![RawEvent {
                    tick: 0,
                    kind: RawEventKind::Note(RawNoteKind::NoteOn {
                        note: 38,
                        velocity: 100,
                    }),
                }],
            )],
        };
        let mut diagnostics = DiagnosticSink::new();
        let (_, tracks) = normalize(&raw, &mut diagnostics).unwrap();
        assert!(tracks[0].summary.is_percussion);
    }
}

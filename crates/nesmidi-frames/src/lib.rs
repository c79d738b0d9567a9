//! Frame Generator (spec.md §4.4): turns the Channel Mapper's per-channel
//! note lists into dense, frame-indexed register timelines.

mod envelope;
mod pitch;

use nesmidi_core::{
    Channel, ChannelAssignment, ChannelEnvelopes, ChannelTimeline, DiagnosticSink, DpcmSampleTable,
    FrameCell, NoteEvent, Result, Stage,
};

const STAGE: &str = "frame_generator";

pub struct FrameGenerator {
    envelopes: ChannelEnvelopes,
}

impl FrameGenerator {
    pub fn new(envelopes: ChannelEnvelopes) -> Self {
        FrameGenerator { envelopes }
    }

    /// Produce a `ChannelTimeline` for every one of the five channels,
    /// each covering `[0, total_frames)` (spec.md §4.4, "Responsibility").
    pub fn generate(
        &self,
        assignments: &[ChannelAssignment; 5],
        dpcm: &DpcmSampleTable,
        total_frames: u32,
        diagnostics: &mut DiagnosticSink,
    ) -> [ChannelTimeline; 5] {
        let mut out: [ChannelTimeline; 5] = Default::default();
        for channel in Channel::ALL {
            let notes = &assignments[channel.index()].notes;
            out[channel.index()] = match channel {
                Channel::Pulse1 | Channel::Pulse2 => {
                    self.generate_pulse(notes, total_frames, diagnostics)
                }
                Channel::Triangle => self.generate_triangle(notes, total_frames, diagnostics),
                Channel::Noise => self.generate_noise(notes, total_frames, diagnostics),
                Channel::Dpcm => self.generate_dpcm(notes, dpcm, total_frames, diagnostics),
            };
        }
        out
    }

    fn generate_pulse(
        &self,
        notes: &[NoteEvent],
        total_frames: u32,
        diagnostics: &mut DiagnosticSink,
    ) -> ChannelTimeline {
        const DUTY: u8 = 0b10; // 50% duty, the common chiptune default (no MIDI source names duty).
        let mut timeline = vec![FrameCell::silent_pulse(); total_frames as usize];
        let mut previous_note: Option<u8> = None;

        for note in notes {
            let Some((shifted, timer)) = pitch::resolve(pitch::pulse_table(), note.midi_note)
            else {
                diagnostics.warning(
                    STAGE,
                    format!(
                        "note {} at frame {} is out of Pulse's playable range even after octave-shifting; dropped",
                        note.midi_note, note.frame
                    ),
                );
                previous_note = None;
                continue;
            };

            for offset in 0..note.duration_frames {
                let frame = (note.frame + offset) as usize;
                if frame >= timeline.len() {
                    break;
                }
                let gain = envelope::gain_at(&self.envelopes.pulse, offset, note.duration_frames);
                let volume = envelope::scaled_volume(note.velocity, gain);
                let retrigger = offset == 0 && previous_note == Some(shifted);
                timeline[frame] = FrameCell {
                    note: Some(shifted),
                    volume,
                    timer,
                    control_byte: (DUTY << 6) | 0b0001_0000 | volume,
                    retrigger,
                };
            }
            previous_note = Some(shifted);
        }
        timeline
    }

    fn generate_triangle(
        &self,
        notes: &[NoteEvent],
        total_frames: u32,
        diagnostics: &mut DiagnosticSink,
    ) -> ChannelTimeline {
        let mut timeline = vec![FrameCell::silent_triangle(); total_frames as usize];
        let mut previous_note: Option<u8> = None;

        for note in notes {
            let Some((shifted, timer)) = pitch::resolve(pitch::triangle_table(), note.midi_note)
            else {
                diagnostics.warning(
                    STAGE,
                    format!(
                        "note {} at frame {} is out of Triangle's playable range even after octave-shifting; dropped",
                        note.midi_note, note.frame
                    ),
                );
                previous_note = None;
                continue;
            };

            for offset in 0..note.duration_frames {
                let frame = (note.frame + offset) as usize;
                if frame >= timeline.len() {
                    break;
                }
                // Triangle volume is binary: silent or full (spec.md §4.4).
                let volume = if note.velocity > 0 { 15 } else { 0 };
                let retrigger = offset == 0 && previous_note == Some(shifted);
                timeline[frame] = FrameCell {
                    note: Some(shifted),
                    volume,
                    timer,
                    control_byte: 0b1000_0000 | 0x7F, // halt + max linear-counter reload
                    retrigger,
                };
            }
            previous_note = Some(shifted);
        }
        timeline
    }

    fn generate_noise(
        &self,
        notes: &[NoteEvent],
        total_frames: u32,
        _diagnostics: &mut DiagnosticSink,
    ) -> ChannelTimeline {
        let mut timeline = vec![FrameCell::silent_noise(); total_frames as usize];
        let mut previous_note: Option<u8> = None;

        for note in notes {
            let period_index = noise_period_index(note.midi_note);
            for offset in 0..note.duration_frames {
                let frame = (note.frame + offset) as usize;
                if frame >= timeline.len() {
                    break;
                }
                let gain = envelope::gain_at(&self.envelopes.noise, offset, note.duration_frames);
                let volume = envelope::scaled_volume(note.velocity, gain);
                let retrigger = offset == 0 && previous_note == Some(note.midi_note);
                timeline[frame] = FrameCell {
                    note: Some(note.midi_note),
                    volume,
                    timer: pitch::NOISE_PERIOD_TABLE[period_index as usize],
                    control_byte: 0b0001_0000 | volume,
                    retrigger,
                };
            }
            previous_note = Some(note.midi_note);
        }
        timeline
    }

    fn generate_dpcm(
        &self,
        notes: &[NoteEvent],
        dpcm: &DpcmSampleTable,
        total_frames: u32,
        diagnostics: &mut DiagnosticSink,
    ) -> ChannelTimeline {
        let mut timeline = vec![FrameCell::silent_dpcm(); total_frames as usize];

        for note in notes {
            let Some(sample) = dpcm.get(note.midi_note) else {
                diagnostics.warning(
                    STAGE,
                    format!(
                        "drum note {} at frame {} has no DPCM sample mapped; dropped",
                        note.midi_note, note.frame
                    ),
                );
                continue;
            };
            let frame = note.frame as usize;
            if frame >= timeline.len() {
                continue;
            }
            // Sample address/length are placeholders here; the Code
            // Emitter resolves them once samples are laid out in PRG-ROM
            // (spec.md §4.6). `timer` carries the rate index, `volume`
            // the direct-load byte (unused, left at 0 -- DPCM ignores it
            // on real hardware and lets the delta-counter free-run).
            timeline[frame] = FrameCell {
                note: Some(note.midi_note),
                volume: 0,
                timer: sample.sample_rate_index as u16,
                control_byte: if sample.loop_flag { 0x40 } else { 0x00 },
                retrigger: true,
            };
        }
        timeline
    }
}

/// `Stage` entry point for the Frame Generator (spec.md §9): wraps
/// [`FrameGenerator::generate`] so it can be swapped for another
/// generation strategy without the Pattern Detector knowing the
/// difference.
impl<'a> Stage<(&'a [ChannelAssignment; 5], &'a DpcmSampleTable, u32), [ChannelTimeline; 5]>
    for FrameGenerator
{
    fn run(
        &self,
        input: (&'a [ChannelAssignment; 5], &'a DpcmSampleTable, u32),
        diagnostics: &mut DiagnosticSink,
    ) -> Result<[ChannelTimeline; 5]> {
        Ok(self.generate(input.0, input.1, input.2, diagnostics))
    }
}

/// Noise has no tonal pitch; MIDI drum-kit note numbers are mapped onto
/// the 16-entry period table by truncation. This is an explicit modeling
/// choice (spec.md has no prior art for it) rather than a physical law.
fn noise_period_index(midi_note: u8) -> u8 {
    midi_note % 16
}

#[cfg(test)]
mod tests {
    use super::*;
    use nesmidi_core::AdsrConfig;

    fn note(frame: u32, midi_note: u8, duration: u32, velocity: u8) -> NoteEvent {
        NoteEvent {
            frame,
            midi_note,
            velocity,
            duration_frames: duration,
        }
    }

    fn assignment(notes: Vec<NoteEvent>) -> ChannelAssignment {
        ChannelAssignment { notes }
    }

    #[test]
    fn silence_between_notes_uses_canonical_pulse_byte() {
        let gen = FrameGenerator::new(ChannelEnvelopes::default());
        let mut diagnostics = DiagnosticSink::new();
        let mut assignments: [ChannelAssignment; 5] = Default::default();
        assignments[Channel::Pulse1.index()] = assignment(vec![note(0, 69, 5, 100)]);
        let dpcm = DpcmSampleTable::default();
        let timelines = gen.generate(&assignments, &dpcm, 10, &mut diagnostics);
        assert_eq!(
            timelines[Channel::Pulse1.index()][7].control_byte,
            FrameCell::PULSE_SILENT_CONTROL
        );
        assert_ne!(
            timelines[Channel::Pulse1.index()][0].control_byte,
            FrameCell::PULSE_SILENT_CONTROL
        );
    }

    #[test]
    fn triangle_silence_is_zero_not_0x80() {
        let gen = FrameGenerator::new(ChannelEnvelopes::default());
        let mut diagnostics = DiagnosticSink::new();
        let assignments: [ChannelAssignment; 5] = Default::default();
        let dpcm = DpcmSampleTable::default();
        let timelines = gen.generate(&assignments, &dpcm, 4, &mut diagnostics);
        for cell in &timelines[Channel::Triangle.index()] {
            assert_eq!(cell.control_byte, FrameCell::TRIANGLE_SILENT_CONTROL);
        }
    }

    #[test]
    fn middle_c_velocity_64_control_byte_is_0x98() {
        // spec.md §8 scenario 1: 50% duty, const-volume, volume 8, halt clear.
        let gen = FrameGenerator::new(ChannelEnvelopes::default());
        let mut diagnostics = DiagnosticSink::new();
        let mut assignments: [ChannelAssignment; 5] = Default::default();
        assignments[Channel::Pulse1.index()] = assignment(vec![note(0, 60, 4, 64)]);
        let dpcm = DpcmSampleTable::default();
        let timelines = gen.generate(&assignments, &dpcm, 4, &mut diagnostics);
        assert_eq!(timelines[Channel::Pulse1.index()][0].control_byte, 0x98);
    }

    #[test]
    fn a4_pulse_timer_matches_known_period() {
        // A4 (MIDI 69, 440 Hz): period = 1789773 / (16 * 440) - 1 ~= 253.3 -> 253.
        let (shifted, timer) = pitch::resolve(pitch::pulse_table(), 69).unwrap();
        assert_eq!(shifted, 69);
        assert_eq!(timer, 253);
    }

    #[test]
    fn out_of_range_note_is_octave_shifted_then_dropped_if_still_unplayable() {
        let gen = FrameGenerator::new(ChannelEnvelopes::default());
        let mut diagnostics = DiagnosticSink::new();
        let mut assignments: [ChannelAssignment; 5] = Default::default();
        // MIDI note 0 is far below Pulse's representable range; shifting
        // up by a few octaves should still land it in range.
        assignments[Channel::Pulse1.index()] = assignment(vec![note(0, 0, 2, 100)]);
        let dpcm = DpcmSampleTable::default();
        let timelines = gen.generate(&assignments, &dpcm, 4, &mut diagnostics);
        assert!(timelines[Channel::Pulse1.index()][0].note.is_some());
    }

    #[test]
    fn retrigger_flag_set_on_consecutive_same_pitch_notes() {
        let gen = FrameGenerator::new(ChannelEnvelopes::default());
        let mut diagnostics = DiagnosticSink::new();
        let mut assignments: [ChannelAssignment; 5] = Default::default();
        assignments[Channel::Pulse1.index()] =
            assignment(vec![note(0, 60, 3, 100), note(3, 60, 3, 100)]);
        let dpcm = DpcmSampleTable::default();
        let timelines = gen.generate(&assignments, &dpcm, 6, &mut diagnostics);
        assert!(!timelines[Channel::Pulse1.index()][0].retrigger);
        assert!(timelines[Channel::Pulse1.index()][3].retrigger);
    }

    #[test]
    fn adsr_release_lowers_volume_near_note_end() {
        let mut envelopes = ChannelEnvelopes::default();
        envelopes.pulse = AdsrConfig {
            attack_frames: 0,
            decay_frames: 0,
            sustain_level: 1.0,
            release_frames: 5,
        };
        let gen = FrameGenerator::new(envelopes);
        let mut diagnostics = DiagnosticSink::new();
        let mut assignments: [ChannelAssignment; 5] = Default::default();
        assignments[Channel::Pulse1.index()] = assignment(vec![note(0, 69, 10, 127)]);
        let dpcm = DpcmSampleTable::default();
        let timelines = gen.generate(&assignments, &dpcm, 10, &mut diagnostics);
        let cells = &timelines[Channel::Pulse1.index()];
        assert!(cells[9].volume < cells[0].volume);
    }

    #[test]
    fn stage_impl_delegates_to_generate() {
        let gen = FrameGenerator::new(ChannelEnvelopes::default());
        let mut diagnostics = DiagnosticSink::new();
        let mut assignments: [ChannelAssignment; 5] = Default::default();
        assignments[Channel::Pulse1.index()] = assignment(vec![note(0, 60, 4, 64)]);
        let dpcm = DpcmSampleTable::default();
        let timelines = Stage::run(&gen, (&assignments, &dpcm, 4), &mut diagnostics).unwrap();
        assert_eq!(timelines[Channel::Pulse1.index()][0].control_byte, 0x98);
    }
}

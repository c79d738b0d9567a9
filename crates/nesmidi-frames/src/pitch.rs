//! NTSC pitch tables (spec.md §4.4, "Pitch-table lookup").
//!
//! Pulse and Triangle each derive an 11-bit timer period from a MIDI
//! note number via the standard NES APU period formula, grounded on
//! `emu-nes::apu`'s register model and the `midi_note_to_apu_period`
//! helper in the teacher's own `examples/midi2nes/src/main.rs`. Pulse
//! divides the CPU clock by 16 cycles per waveform step; Triangle's
//! sequencer runs twice as fast (32 steps per period) so it divides by
//! 32 for the same pitch.

use std::sync::OnceLock;

const CPU_CLOCK_HZ: f64 = 1_789_773.0;
const MAX_TIMER: u16 = 0x7FF;

fn note_frequency(midi_note: u8) -> f64 {
    440.0 * 2.0_f64.powf((midi_note as f64 - 69.0) / 12.0)
}

fn timer_for(midi_note: u8, cycles_per_step: f64) -> Option<u16> {
    let period = (CPU_CLOCK_HZ / (cycles_per_step * note_frequency(midi_note))) - 1.0;
    if period < 0.0 || period > MAX_TIMER as f64 {
        None
    } else {
        Some(period.round() as u16)
    }
}

fn build_table(cycles_per_step: f64) -> [Option<u16>; 128] {
    let mut table = [None; 128];
    for (note, slot) in table.iter_mut().enumerate() {
        *slot = timer_for(note as u8, cycles_per_step);
    }
    table
}

/// 11-bit timer period for each MIDI note on a Pulse channel, or `None`
/// if that note's period overflows 11 bits even before octave-shifting.
pub fn pulse_table() -> &'static [Option<u16>; 128] {
    static TABLE: OnceLock<[Option<u16>; 128]> = OnceLock::new();
    TABLE.get_or_init(|| build_table(16.0))
}

/// Same as [`pulse_table`] but for the Triangle channel's 32-step
/// sequencer.
pub fn triangle_table() -> &'static [Option<u16>; 128] {
    static TABLE: OnceLock<[Option<u16>; 128]> = OnceLock::new();
    TABLE.get_or_init(|| build_table(32.0))
}

/// Resolve a MIDI note to a playable timer period, octave-shifting up or
/// down when the raw note falls outside the channel's representable
/// range, per spec.md §4.4: "Notes outside each channel's playable range
/// are octave-shifted into range; if still out of range, the note is
/// dropped". Returns the timer and the (possibly shifted) MIDI note used
/// to produce it, or `None` if no octave shift lands in range.
pub fn resolve(table: &[Option<u16>; 128], midi_note: u8) -> Option<(u8, u16)> {
    if let Some(timer) = table[midi_note as usize] {
        return Some((midi_note, timer));
    }
    for shift in [12i16, -12, 24, -24, 36, -36] {
        let shifted = midi_note as i16 + shift;
        if (0..128).contains(&shifted) {
            if let Some(timer) = table[shifted as usize] {
                return Some((shifted as u8, timer));
            }
        }
    }
    None
}

/// NES noise-channel period table ($400E bits 0-3), grounded on
/// `emu-nes/src/apu.rs`'s `NOISE_PERIOD_TABLE`. The Frame Generator does
/// not look pitch up in this table directly -- see
/// [`crate::noise_period_index`] for how a MIDI note selects an entry.
pub const NOISE_PERIOD_TABLE: [u16; 16] = [
    4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
];

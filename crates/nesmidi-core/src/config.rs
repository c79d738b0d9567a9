//! Compiler-wide configuration (spec.md §9 "Open questions": pattern
//! length, arpeggiation rate, and ADSR defaults are not fixed in prior
//! art, so they are exposed here with the defaults spec.md states).

use serde::{Deserialize, Serialize};

/// Strategy the Channel Mapper uses to reduce a polyphonic track to a
/// monophonic NES channel (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolyphonyStrategy {
    /// Keep the lowest-pitched concurrent note; drop the rest.
    Priority,
    /// Partition concurrent notes by `pitch_split_threshold` across
    /// Pulse1/Pulse2/Triangle.
    PitchRangeSplit,
    /// Cycle through concurrent notes at `arpeggiation_rate_frames` per
    /// note, restarting on every new chord.
    Arpeggiation,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelMapperConfig {
    pub triangle_strategy: PolyphonyStrategy,
    pub pulse_strategy: PolyphonyStrategy,
    /// MIDI note at/above which split notes route to Pulse1 (spec.md §4.3).
    pub pitch_split_threshold: u8,
    /// MIDI note at/above which split notes route to Pulse2 (below
    /// `pitch_split_threshold`, at/above this go to Pulse2).
    pub pitch_split_pulse2_floor: u8,
    /// Frames each note occupies in an arpeggio cycle.
    pub arpeggiation_rate_frames: u32,
}

impl Default for ChannelMapperConfig {
    fn default() -> Self {
        ChannelMapperConfig {
            triangle_strategy: PolyphonyStrategy::Priority,
            pulse_strategy: PolyphonyStrategy::Priority,
            pitch_split_threshold: 60,
            pitch_split_pulse2_floor: 48,
            arpeggiation_rate_frames: 1,
        }
    }
}

/// ADSR envelope timing, expressed in frames, plus the sustain level as
/// a fraction of peak volume (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdsrConfig {
    pub attack_frames: u32,
    pub decay_frames: u32,
    pub sustain_level: f32,
    pub release_frames: u32,
}

impl AdsrConfig {
    /// Constant-volume envelope: no attack/decay/release, full sustain.
    /// This is the default when ADSR is not configured for a channel
    /// (spec.md §4.4).
    pub const CONSTANT: AdsrConfig = AdsrConfig {
        attack_frames: 0,
        decay_frames: 0,
        sustain_level: 1.0,
        release_frames: 0,
    };
}

impl Default for AdsrConfig {
    fn default() -> Self {
        AdsrConfig::CONSTANT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternDetectorConfig {
    pub min_pattern_length: u16,
    pub max_pattern_length: u16,
    pub per_reference_overhead: u32,
    /// Frame count above which the detector works on a stratified sample
    /// instead of the full timeline (spec.md §4.5, "Bounds").
    pub sample_cap_frames: usize,
    /// Enable merging of volume-shifted pattern variations (spec.md §4.5,
    /// "Variation handling"). Off by default. Transposed variations are
    /// never merged -- reconstructing one needs the pitch table, which
    /// lives in the Code Emitter, not the Pattern Detector.
    pub allow_variation_merge: bool,
    pub max_volume_delta: i8,
    pub worker_chunk_timeout_secs: u64,
}

impl Default for PatternDetectorConfig {
    fn default() -> Self {
        PatternDetectorConfig {
            min_pattern_length: 3,
            max_pattern_length: 32,
            per_reference_overhead: 4,
            sample_cap_frames: 15_000,
            allow_variation_merge: false,
            max_volume_delta: 4,
            worker_chunk_timeout_secs: 30,
        }
    }
}

/// Per-channel envelope configuration. Triangle has no envelope (its
/// volume is always 0 or 15, spec.md §4.4) so only Pulse and Noise are
/// configurable here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelEnvelopes {
    pub pulse: AdsrConfig,
    pub noise: AdsrConfig,
}

impl Default for ChannelEnvelopes {
    fn default() -> Self {
        ChannelEnvelopes {
            pulse: AdsrConfig::CONSTANT,
            noise: AdsrConfig::CONSTANT,
        }
    }
}

/// Target cartridge mapper for the Code Emitter (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mapper {
    /// MMC1, 128 KiB PRG-ROM, CHR-RAM, horizontal mirroring (default).
    Mmc1,
    /// NROM, single fixed 32 KiB bank, no bank switching. Used for small
    /// songs and exercised directly by the direct iNES byte serialiser.
    Nrom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitterConfig {
    pub mapper: Mapper,
    pub debug_overlay: bool,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        EmitterConfig {
            mapper: Mapper::Mmc1,
            debug_overlay: false,
        }
    }
}

/// Top-level configuration threaded through the whole compile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CompilerConfig {
    pub channel_mapper: ChannelMapperConfig,
    pub pattern_detector: PatternDetectorConfig,
    pub emitter: EmitterConfig,
    pub envelopes: ChannelEnvelopes,
}

//! ADSR envelope application (spec.md §4.4, "Envelope").

use nesmidi_core::AdsrConfig;

/// Gain in `0.0..=1.0` at `frames_since_onset` frames into a note that
/// lasts `duration_frames`, under `envelope`. Release begins
/// `release_frames` before the note ends so a note shorter than
/// attack+decay+release is still audible and still fades out, matching
/// how a tracker-style envelope degrades gracefully on short notes.
pub fn gain_at(envelope: &AdsrConfig, frames_since_onset: u32, duration_frames: u32) -> f32 {
    let release_start = duration_frames.saturating_sub(envelope.release_frames);

    if frames_since_onset < envelope.attack_frames && envelope.attack_frames > 0 {
        return frames_since_onset as f32 / envelope.attack_frames as f32;
    }

    let after_attack = frames_since_onset.saturating_sub(envelope.attack_frames);
    let decay_gain = if after_attack < envelope.decay_frames && envelope.decay_frames > 0 {
        let t = after_attack as f32 / envelope.decay_frames as f32;
        1.0 - t * (1.0 - envelope.sustain_level)
    } else {
        envelope.sustain_level
    };

    let gain = if frames_since_onset >= release_start && envelope.release_frames > 0 {
        let into_release = frames_since_onset - release_start;
        let t = ((into_release + 1) as f32 / envelope.release_frames as f32).min(1.0);
        decay_gain * (1.0 - t)
    } else {
        decay_gain
    };
    gain.clamp(0.0, 1.0)
}

/// Scale a MIDI velocity (0-127) and an envelope gain into the 0-15
/// volume nibble the APU registers use.
pub fn scaled_volume(velocity: u8, gain: f32) -> u8 {
    let base = (velocity as f32 / 127.0) * 15.0;
    (base * gain).round().clamp(0.0, 15.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_envelope_is_full_gain_throughout() {
        let env = AdsrConfig::CONSTANT;
        assert_eq!(gain_at(&env, 0, 30), 1.0);
        assert_eq!(gain_at(&env, 29, 30), 1.0);
    }

    #[test]
    fn attack_ramps_from_zero() {
        let env = AdsrConfig {
            attack_frames: 10,
            decay_frames: 0,
            sustain_level: 1.0,
            release_frames: 0,
        };
        assert_eq!(gain_at(&env, 0, 60), 0.0);
        assert!((gain_at(&env, 5, 60) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn release_fades_to_zero_before_note_end() {
        let env = AdsrConfig {
            attack_frames: 0,
            decay_frames: 0,
            sustain_level: 1.0,
            release_frames: 10,
        };
        let duration = 30;
        assert_eq!(gain_at(&env, duration - 1, duration), 0.0);
        assert!(gain_at(&env, duration - 10, duration) > 0.0);
    }

    #[test]
    fn velocity_scales_linearly() {
        assert_eq!(scaled_volume(127, 1.0), 15);
        assert_eq!(scaled_volume(0, 1.0), 0);
    }
}

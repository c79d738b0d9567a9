//! Reconstruct a channel's dense `ChannelTimeline` from its compressed
//! form. This is the inverse of `nesmidi-pattern`'s detection: spec.md
//! §8 requires it reproduce the Frame Generator's output cell-for-cell.

use nesmidi_core::{ChannelTimeline, CompressedChannel, FrameCell, Pattern};

/// Apply a reference's transpose/volume delta to one pattern cell.
/// Silent cells (`note: None`) are never shifted -- there's nothing to
/// transpose, and shifting volume on silence would un-silence it.
fn apply_delta(cell: FrameCell, transpose: i8, volume_delta: i8) -> FrameCell {
    if cell.note.is_none() {
        return cell;
    }
    let note = (cell.note.unwrap() as i16 + transpose as i16).clamp(0, 127) as u8;
    let volume = (cell.volume as i16 + volume_delta as i16).clamp(0, 15) as u8;
    let control_byte = (cell.control_byte & !0x0F) | volume;
    FrameCell {
        note: Some(note),
        volume,
        control_byte,
        ..cell
    }
}

pub fn expand_channel(
    patterns: &[Pattern],
    compressed: &CompressedChannel,
    total_frames: u32,
    silence: FrameCell,
) -> ChannelTimeline {
    let mut timeline = vec![silence; total_frames as usize];

    for reference in &compressed.pattern_refs {
        let Some(pattern) = patterns.iter().find(|p| p.id == reference.pattern_id) else {
            continue;
        };
        for (offset, &cell) in pattern.cells.iter().enumerate() {
            let frame = reference.frame as usize + offset;
            if frame >= timeline.len() {
                break;
            }
            timeline[frame] = apply_delta(cell, reference.transpose, reference.volume_delta);
        }
    }

    for &(frame, cell) in &compressed.residual {
        if (frame as usize) < timeline.len() {
            timeline[frame as usize] = cell;
        }
    }

    timeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use nesmidi_core::{FrameCell, PatternReference};

    fn cell(note: u8) -> FrameCell {
        FrameCell {
            note: Some(note),
            volume: 10,
            timer: note as u16 * 3,
            control_byte: 0xB0 | 10,
            retrigger: false,
        }
    }

    #[test]
    fn references_and_residual_reconstruct_original_timeline() {
        let silence = FrameCell::silent_pulse();
        let original = vec![cell(60), cell(61), silence, cell(60), cell(61)];
        let pattern = Pattern {
            id: 0,
            length: 2,
            cells: vec![cell(60), cell(61)],
        };
        let compressed = CompressedChannel {
            pattern_refs: vec![
                PatternReference::identity(0, 0),
                PatternReference::identity(3, 0),
            ],
            residual: vec![(2, silence)],
        };
        let expanded = expand_channel(&[pattern], &compressed, 5, silence);
        assert_eq!(expanded, original);
    }

    #[test]
    fn transpose_delta_shifts_pitch_on_expansion() {
        let silence = FrameCell::silent_pulse();
        let pattern = Pattern {
            id: 0,
            length: 1,
            cells: vec![cell(60)],
        };
        let compressed = CompressedChannel {
            pattern_refs: vec![PatternReference {
                frame: 0,
                pattern_id: 0,
                transpose: 5,
                volume_delta: 0,
            }],
            residual: vec![],
        };
        let expanded = expand_channel(&[pattern], &compressed, 1, silence);
        assert_eq!(expanded[0].note, Some(65));
    }
}

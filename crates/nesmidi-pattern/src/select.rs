//! Phases 3/4 -- non-overlapping selection, residual emission, the
//! sample-cap dictionary pass, and optional variation merging
//! (spec.md §4.5).

use crate::candidates::Candidate;
use nesmidi_core::FrameCell;

/// One pattern accepted into the library, with every position (within
/// whatever timeline the selection ran over) where it occurs.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub length: u16,
    pub cells: Vec<FrameCell>,
    pub positions: Vec<u32>,
}

fn intervals_overlap(a_start: u32, a_len: u32, b_start: u32, b_len: u32) -> bool {
    a_start < b_start + b_len && b_start < a_start + a_len
}

/// Phase 3: walk candidates in descending-gain order, accepting every
/// occurrence that does not intersect an already-accepted interval.
/// A candidate that accepts zero occurrences is discarded entirely.
pub fn select_non_overlapping(timeline: &[FrameCell], candidates: Vec<Candidate>) -> Vec<Accepted> {
    let mut accepted_intervals: Vec<(u32, u32)> = Vec::new();
    let mut accepted = Vec::new();

    for candidate in candidates {
        let mut kept = Vec::new();
        for &pos in &candidate.positions {
            let overlaps = accepted_intervals
                .iter()
                .any(|&(start, len)| intervals_overlap(pos, candidate.length as u32, start, len));
            if !overlaps {
                kept.push(pos);
            }
        }
        if kept.is_empty() {
            continue;
        }
        for &pos in &kept {
            accepted_intervals.push((pos, candidate.length as u32));
        }
        let cells = timeline[kept[0] as usize..kept[0] as usize + candidate.length as usize].to_vec();
        accepted.push(Accepted {
            length: candidate.length,
            cells,
            positions: kept,
        });
    }

    accepted
}

/// Phase 4: every frame not covered by an accepted occurrence, in
/// original order.
pub fn residual_frames(timeline: &[FrameCell], accepted: &[Accepted]) -> Vec<(u32, FrameCell)> {
    let mut covered = vec![false; timeline.len()];
    for pattern in accepted {
        for &pos in &pattern.positions {
            for offset in 0..pattern.length as usize {
                covered[pos as usize + offset] = true;
            }
        }
    }
    covered
        .iter()
        .enumerate()
        .filter(|(_, &c)| !c)
        .map(|(frame, _)| (frame as u32, timeline[frame]))
        .collect()
}

/// Bounds handling (spec.md §4.5, "Bounds"): take evenly spaced windows
/// totalling roughly `cap` frames so the expensive enumeration phase
/// runs on a bounded sample instead of the whole timeline.
pub fn stratified_sample(timeline: &[FrameCell], cap: usize) -> Vec<FrameCell> {
    if timeline.len() <= cap {
        return timeline.to_vec();
    }
    const WINDOWS: usize = 8;
    let window_len = (cap / WINDOWS).max(1);
    let mut sample = Vec::with_capacity(cap);
    for w in 0..WINDOWS {
        let start = (timeline.len() * w) / WINDOWS;
        let end = (start + window_len).min(timeline.len());
        sample.extend_from_slice(&timeline[start..end]);
    }
    sample
}

/// Re-apply a pattern library mined from a sample to the full timeline
/// (spec.md §4.5, "Bounds"): a single greedy left-to-right scan, at
/// each uncovered frame trying patterns longest-first so the dictionary
/// pass favours the best compression it can find locally.
pub fn dictionary_pass(
    timeline: &[FrameCell],
    library: &[(u16, Vec<FrameCell>)],
) -> Vec<Accepted> {
    let mut by_length: Vec<&(u16, Vec<FrameCell>)> = library.iter().collect();
    by_length.sort_by(|a, b| b.0.cmp(&a.0));

    let mut occurrences: Vec<Vec<u32>> = vec![Vec::new(); library.len()];

    let mut frame = 0usize;
    while frame < timeline.len() {
        let mut matched = false;
        for (lib_idx, (length, cells)) in by_length.iter().enumerate() {
            let length = *length as usize;
            if frame + length > timeline.len() {
                continue;
            }
            if &timeline[frame..frame + length] == cells.as_slice() {
                occurrences[lib_idx].push(frame as u32);
                frame += length;
                matched = true;
                break;
            }
        }
        if !matched {
            frame += 1;
        }
    }

    by_length
        .into_iter()
        .zip(occurrences)
        .filter(|(_, positions)| !positions.is_empty())
        .map(|((length, cells), positions)| Accepted {
            length: *length,
            cells: cells.clone(),
            positions,
        })
        .collect()
}

/// A uniform volume delta relating one pattern's cells to another's, or
/// none if they aren't a clean variation of each other (spec.md §4.5,
/// "Variation handling").
///
/// Transpose variations are deliberately not modeled here: reconstructing
/// a transposed cell needs the pitch table to recompute its timer, and
/// that table lives in the Code Emitter, not here. A merge that shifted
/// `note` without recomputing `timer` would violate the decode law in
/// spec.md §8 (`decompress(compress(song)) == song`), so only the
/// volume-delta axis -- which never touches `timer` -- is merged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Variation {
    VolumeDelta(i8),
}

pub fn detect_variation(
    base: &[FrameCell],
    other: &[FrameCell],
    max_volume_delta: i8,
) -> Option<Variation> {
    if base.len() != other.len() {
        return None;
    }

    let mut volume_delta: Option<i32> = None;
    for (a, b) in base.iter().zip(other.iter()) {
        match (a.note, b.note) {
            (None, None) => {}
            (Some(an), Some(bn)) if an == bn => {}
            _ => return None,
        }
        if a.timer != b.timer {
            return None;
        }
        let vd = b.volume as i32 - a.volume as i32;
        match volume_delta {
            None => volume_delta = Some(vd),
            Some(existing) if existing != vd => return None,
            _ => {}
        }
    }

    let volume_delta = volume_delta.unwrap_or(0);
    if volume_delta != 0 && volume_delta.unsigned_abs() as i16 <= max_volume_delta as i16 {
        return Some(Variation::VolumeDelta(volume_delta as i8));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(note: u8, volume: u8) -> FrameCell {
        FrameCell {
            note: Some(note),
            volume,
            timer: 100,
            control_byte: 0xB0,
            retrigger: false,
        }
    }

    #[test]
    fn differing_pitch_is_rejected() {
        let base = vec![cell(60, 10), cell(64, 10)];
        let shifted = vec![cell(65, 10), cell(69, 10)];
        assert_eq!(detect_variation(&base, &shifted, 4), None);
    }

    #[test]
    fn differing_timer_is_rejected_even_with_same_pitch() {
        let base = vec![FrameCell { timer: 100, ..cell(60, 10) }];
        let mismatched = vec![FrameCell { timer: 101, ..cell(60, 12) }];
        assert_eq!(detect_variation(&base, &mismatched, 4), None);
    }

    #[test]
    fn volume_variation_detected() {
        let base = vec![cell(60, 10), cell(60, 8)];
        let louder = vec![cell(60, 12), cell(60, 10)];
        assert_eq!(detect_variation(&base, &louder, 4), Some(Variation::VolumeDelta(2)));
    }

    #[test]
    fn volume_delta_beyond_limit_is_rejected() {
        let base = vec![cell(60, 2)];
        let louder = vec![cell(60, 14)];
        assert_eq!(detect_variation(&base, &louder, 4), None);
    }

    #[test]
    fn residual_covers_uncompressed_frames() {
        let timeline: Vec<FrameCell> = (0..6).map(|n| cell(n, 10)).collect();
        let accepted = vec![Accepted {
            length: 2,
            cells: timeline[0..2].to_vec(),
            positions: vec![0],
        }];
        let residual = residual_frames(&timeline, &accepted);
        assert_eq!(residual.len(), 4);
        assert_eq!(residual[0].0, 2);
    }
}

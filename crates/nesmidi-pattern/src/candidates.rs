//! Phase 1/2 -- candidate enumeration and scoring (spec.md §4.5).
//!
//! Enumeration is the one place this crate parallelises (spec.md §5):
//! workers receive disjoint `(length, position_range)` chunks and
//! return local hash buckets, which the caller merges into a
//! `BTreeMap` so iteration order never depends on which worker
//! finished first -- a chunk retried serially after a timeout produces
//! the same bucket contents as one that ran on a worker thread.

use crossbeam::channel;
use nesmidi_core::{DiagnosticSink, FrameCell};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

const STAGE: &str = "pattern_detector";

#[derive(Debug, Clone)]
pub struct Candidate {
    pub length: u16,
    /// Every position (in the timeline this enumeration ran over) whose
    /// `[pos, pos+length)` window hashed identically. Positions are
    /// verified content-equal against the first before being trusted as
    /// real occurrences of the same pattern (a 64-bit hash collision is
    /// vanishingly unlikely but not impossible).
    pub positions: Vec<u32>,
    pub gain: i64,
}

fn hash_window(cells: &[FrameCell]) -> u64 {
    let mut hasher = DefaultHasher::new();
    cells.hash(&mut hasher);
    hasher.finish()
}

fn bucket_range(timeline: &[FrameCell], length: usize, range: std::ops::Range<usize>) -> BTreeMap<u64, Vec<u32>> {
    let mut local: BTreeMap<u64, Vec<u32>> = BTreeMap::new();
    for pos in range {
        let hash = hash_window(&timeline[pos..pos + length]);
        local.entry(hash).or_default().push(pos as u32);
    }
    local
}

/// Bucket every `(length, position)` window in `timeline` by content
/// hash, for one pattern length, splitting the position range across
/// `workers` threads. `workers <= 1` runs serially. A chunk whose
/// worker doesn't answer within `timeout` is retried on the calling
/// thread and a diagnostic is recorded (spec.md §5, "Timeouts").
fn enumerate_length(
    timeline: &Arc<Vec<FrameCell>>,
    length: u16,
    workers: usize,
    timeout: Duration,
    diagnostics: &mut DiagnosticSink,
) -> BTreeMap<u64, Vec<u32>> {
    let len = timeline.len();
    let length_usize = length as usize;
    if length_usize == 0 || length_usize > len {
        return BTreeMap::new();
    }
    let total_positions = len - length_usize + 1;

    let worker_count = workers.max(1);
    let chunk_size = total_positions.div_ceil(worker_count);
    if chunk_size == 0 || worker_count <= 1 || chunk_size >= total_positions {
        return bucket_range(timeline, length_usize, 0..total_positions);
    }

    let chunks: Vec<std::ops::Range<usize>> = (0..total_positions)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(total_positions))
        .collect();

    let mut merged: BTreeMap<u64, Vec<u32>> = BTreeMap::new();
    let (tx, rx) = channel::unbounded();
    for range in chunks {
        let tx = tx.clone();
        let timeline = Arc::clone(timeline);
        let range_for_retry = range.clone();
        std::thread::spawn(move || {
            let result = bucket_range(&timeline, length_usize, range);
            // The receiver may already have given up and retried
            // serially; an error here just means nobody's listening.
            let _ = tx.send(result);
        });
        match rx.recv_timeout(timeout) {
            Ok(local) => {
                for (hash, mut positions) in local {
                    merged.entry(hash).or_default().append(&mut positions);
                }
            }
            Err(_) => {
                diagnostics.warning(
                    STAGE,
                    format!(
                        "candidate-enumeration chunk (length={length}, positions {range_for_retry:?}) timed out after {timeout:?}; retrying serially"
                    ),
                );
                let local = bucket_range(timeline, length_usize, range_for_retry);
                for (hash, mut positions) in local {
                    merged.entry(hash).or_default().append(&mut positions);
                }
            }
        }
    }
    drop(tx);

    for positions in merged.values_mut() {
        positions.sort_unstable();
    }
    merged
}

/// Phases 1 and 2: enumerate every candidate pattern across
/// `[min_length, max_length]` and keep only those with positive
/// compression gain (spec.md §4.5).
pub fn enumerate_candidates(
    timeline: &[FrameCell],
    min_length: u16,
    max_length: u16,
    per_reference_overhead: u32,
    workers: usize,
    timeout: Duration,
    diagnostics: &mut DiagnosticSink,
) -> Vec<Candidate> {
    let timeline_arc = Arc::new(timeline.to_vec());
    let mut candidates = Vec::new();
    for length in min_length..=max_length {
        let buckets = enumerate_length(&timeline_arc, length, workers, timeout, diagnostics);
        for (_, positions) in buckets {
            if positions.len() < 2 {
                continue;
            }
            let reference = &timeline[positions[0] as usize..positions[0] as usize + length as usize];
            let mut verified: Vec<u32> = Vec::with_capacity(positions.len());
            for &pos in &positions {
                let window = &timeline[pos as usize..pos as usize + length as usize];
                if window == reference {
                    verified.push(pos);
                }
            }
            if verified.len() < 2 {
                continue;
            }
            let occurrences = verified.len() as i64;
            let gain = occurrences * length as i64
                - length as i64
                - per_reference_overhead as i64 * occurrences;
            if gain <= 0 {
                continue;
            }
            candidates.push(Candidate {
                length,
                positions: verified,
                gain,
            });
        }
    }
    // Descending gain; ties break toward longer patterns (spec.md §4.5).
    candidates.sort_by(|a, b| {
        b.gain
            .cmp(&a.gain)
            .then_with(|| b.length.cmp(&a.length))
            .then_with(|| a.positions[0].cmp(&b.positions[0]))
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use nesmidi_core::FrameCell;

    fn cell(timer: u16) -> FrameCell {
        FrameCell {
            note: Some(60),
            volume: 10,
            timer,
            control_byte: 0xB0,
            retrigger: false,
        }
    }

    fn sink() -> DiagnosticSink {
        DiagnosticSink::new()
    }

    #[test]
    fn repeated_window_is_a_candidate() {
        let timeline: Vec<FrameCell> = [1, 2, 3, 1, 2, 3, 7, 8].iter().map(|&t| cell(t)).collect();
        let mut diagnostics = sink();
        let candidates = enumerate_candidates(&timeline, 3, 3, 1, 1, Duration::from_secs(30), &mut diagnostics);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].positions, vec![0, 3]);
    }

    #[test]
    fn non_repeating_window_yields_no_candidates() {
        let timeline: Vec<FrameCell> = (0..8u16).map(cell).collect();
        let mut diagnostics = sink();
        let candidates = enumerate_candidates(&timeline, 3, 5, 1, 1, Duration::from_secs(30), &mut diagnostics);
        assert!(candidates.is_empty());
    }

    #[test]
    fn serial_and_parallel_enumeration_agree() {
        let timeline: Vec<FrameCell> = (0..200u16).map(|t| cell(t % 17)).collect();
        let mut d1 = sink();
        let mut d2 = sink();
        let serial = enumerate_candidates(&timeline, 3, 10, 1, 1, Duration::from_secs(30), &mut d1);
        let parallel = enumerate_candidates(&timeline, 3, 10, 1, 4, Duration::from_secs(30), &mut d2);
        let serial_sigs: Vec<(u16, Vec<u32>)> =
            serial.iter().map(|c| (c.length, c.positions.clone())).collect();
        let parallel_sigs: Vec<(u16, Vec<u32>)> =
            parallel.iter().map(|c| (c.length, c.positions.clone())).collect();
        assert_eq!(serial_sigs, parallel_sigs);
    }
}

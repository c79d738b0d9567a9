//! Pattern Detector (spec.md §4.5): compresses each channel's dense
//! `ChannelTimeline` into a content-addressed pattern library plus
//! per-channel references and residual cells, exactly reconstructible
//! and size-minimising by construction (phases documented in
//! `candidates` and `select`).

mod candidates;
mod select;

use nesmidi_core::{
    Channel, ChannelTimeline, CompressedChannel, DiagnosticSink, Pattern, PatternDetectorConfig,
    PatternReference, Result, Stage,
};
use select::{Accepted, Variation};
use std::time::Duration;

const STAGE: &str = "pattern_detector";

pub struct PatternDetector {
    config: PatternDetectorConfig,
}

impl PatternDetector {
    pub fn new(config: PatternDetectorConfig) -> Self {
        PatternDetector { config }
    }

    /// Detect patterns across all five channels, assigning globally
    /// unique pattern IDs in ascending `(length, first_position)` order
    /// within each channel, channels processed in `Channel::ALL` order
    /// (spec.md §4.5, §5 determinism guarantee). Detection is
    /// infallible: the degenerate all-residual form is always a valid
    /// fallback, so this never returns an error.
    pub fn detect_all(
        &self,
        timelines: &[ChannelTimeline; 5],
        diagnostics: &mut DiagnosticSink,
    ) -> (Vec<Pattern>, [CompressedChannel; 5]) {
        let mut patterns = Vec::new();
        let mut channels: [CompressedChannel; 5] = Default::default();
        let mut next_id = 0u32;

        for channel in Channel::ALL {
            let timeline = &timelines[channel.index()];
            let (mut channel_patterns, compressed) = self.detect_channel(timeline, next_id, diagnostics);
            next_id += channel_patterns.len() as u32;
            channels[channel.index()] = compressed;
            patterns.append(&mut channel_patterns);
        }

        (patterns, channels)
    }

    fn detect_channel(
        &self,
        timeline: &ChannelTimeline,
        id_offset: u32,
        diagnostics: &mut DiagnosticSink,
    ) -> (Vec<Pattern>, CompressedChannel) {
        if timeline.is_empty() {
            return (Vec::new(), CompressedChannel::default());
        }

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let timeout = Duration::from_secs(self.config.worker_chunk_timeout_secs);

        let sampled = timeline.len() > self.config.sample_cap_frames;
        let working = if sampled {
            select::stratified_sample(timeline, self.config.sample_cap_frames)
        } else {
            timeline.clone()
        };

        let candidates = candidates::enumerate_candidates(
            &working,
            self.config.min_pattern_length,
            self.config.max_pattern_length,
            self.config.per_reference_overhead,
            workers,
            timeout,
            diagnostics,
        );
        let accepted_on_sample = select::select_non_overlapping(&working, candidates);

        let accepted: Vec<Accepted> = if sampled {
            diagnostics.info(
                STAGE,
                format!(
                    "timeline of {} frames exceeds the {}-frame sample cap; mining a {}-pattern dictionary from a stratified sample",
                    timeline.len(),
                    self.config.sample_cap_frames,
                    accepted_on_sample.len()
                ),
            );
            let library: Vec<(u16, Vec<nesmidi_core::FrameCell>)> = accepted_on_sample
                .iter()
                .map(|a| (a.length, a.cells.clone()))
                .collect();
            select::dictionary_pass(timeline, &library)
        } else {
            accepted_on_sample
        };

        let residual = select::residual_frames(timeline, &accepted);

        let (merged_patterns, refs) = if self.config.allow_variation_merge {
            self.merge_variations(accepted, id_offset)
        } else {
            assign_ids(accepted, id_offset)
        };

        let compressed = CompressedChannel {
            pattern_refs: refs,
            residual,
        };

        (merged_patterns, compressed)
    }

    /// Optional variation merging (spec.md §4.5, "Variation handling"):
    /// try to fold same-length patterns that differ only by a uniform
    /// transpose or volume delta into one canonical pattern, accepting
    /// the merge only when it strictly shrinks the encoded size.
    fn merge_variations(
        &self,
        accepted: Vec<Accepted>,
        id_offset: u32,
    ) -> (Vec<Pattern>, Vec<PatternReference>) {
        // `merge_into[i]` names the index (into `accepted`) of the
        // canonical pattern `i` was folded into, plus the variation
        // relating them. `None` means `i` is itself canonical.
        let mut merge_into: Vec<Option<(usize, Variation)>> = vec![None; accepted.len()];

        'outer: for i in 0..accepted.len() {
            if merge_into[i].is_some() {
                continue;
            }
            for j in 0..accepted.len() {
                if i == j || accepted[j].length != accepted[i].length || merge_into[j].is_some() {
                    continue;
                }
                // Merging trades one stored pattern + two plain refs for
                // one stored pattern + two delta-carrying refs; it only
                // pays for itself when the canonical side has at least
                // as many occurrences to amortise the shared storage.
                if accepted[j].positions.len() < accepted[i].positions.len() {
                    continue;
                }
                if let Some(variation) = select::detect_variation(
                    &accepted[j].cells,
                    &accepted[i].cells,
                    self.config.max_volume_delta,
                ) {
                    merge_into[i] = Some((j, variation));
                    continue 'outer;
                }
            }
        }

        // Assign final IDs to canonical entries only, in ascending
        // (length, first_position) order, then map every original
        // index (canonical or merged) to its final pattern ID.
        let mut canonical_indices: Vec<usize> = (0..accepted.len())
            .filter(|&i| merge_into[i].is_none())
            .collect();
        canonical_indices.sort_by_key(|&i| (accepted[i].length, *accepted[i].positions.iter().min().unwrap()));

        let mut id_of: Vec<u32> = vec![0; accepted.len()];
        let mut patterns = Vec::with_capacity(canonical_indices.len());
        for (slot, &i) in canonical_indices.iter().enumerate() {
            let id = id_offset + slot as u32;
            id_of[i] = id;
            patterns.push(Pattern {
                id,
                length: accepted[i].length,
                cells: accepted[i].cells.clone(),
            });
        }
        for i in 0..accepted.len() {
            if let Some((canonical, _)) = merge_into[i] {
                id_of[i] = id_of[canonical];
            }
        }

        let mut refs = Vec::new();
        for (i, pattern) in accepted.into_iter().enumerate() {
            let pattern_id = id_of[i];
            match merge_into[i] {
                None => {
                    for pos in pattern.positions {
                        refs.push(PatternReference::identity(pos, pattern_id));
                    }
                }
                Some((_, Variation::VolumeDelta(delta))) => {
                    for pos in pattern.positions {
                        refs.push(PatternReference {
                            frame: pos,
                            pattern_id,
                            transpose: 0,
                            volume_delta: delta,
                        });
                    }
                }
            }
        }

        refs.sort_by_key(|r| r.frame);
        (patterns, refs)
    }
}

/// `Stage` entry point for the Pattern Detector (spec.md §9): wraps
/// [`PatternDetector::detect_all`] so a slow reference detector and a
/// fast parallel one can be swapped without the Code Emitter knowing
/// the difference, per the design note in spec.md §9.
impl<'a> Stage<&'a [ChannelTimeline; 5], (Vec<Pattern>, [CompressedChannel; 5])> for PatternDetector {
    fn run(
        &self,
        input: &'a [ChannelTimeline; 5],
        diagnostics: &mut DiagnosticSink,
    ) -> Result<(Vec<Pattern>, [CompressedChannel; 5])> {
        Ok(self.detect_all(input, diagnostics))
    }
}

/// No variation merging: assign pattern IDs in ascending
/// `(length, first_position)` order, independent of detection order
/// (spec.md §4.5/§5 determinism guarantee).
fn assign_ids(mut accepted: Vec<Accepted>, id_offset: u32) -> (Vec<Pattern>, Vec<PatternReference>) {
    accepted.sort_by(|a, b| {
        a.length
            .cmp(&b.length)
            .then_with(|| a.positions.iter().min().cmp(&b.positions.iter().min()))
    });

    let mut patterns = Vec::with_capacity(accepted.len());
    let mut refs = Vec::new();
    for (slot, pattern) in accepted.into_iter().enumerate() {
        let id = id_offset + slot as u32;
        patterns.push(Pattern {
            id,
            length: pattern.length,
            cells: pattern.cells,
        });
        for pos in pattern.positions {
            refs.push(PatternReference::identity(pos, id));
        }
    }
    refs.sort_by_key(|r| r.frame);
    (patterns, refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nesmidi_core::FrameCell;

    fn cell(note: u8) -> FrameCell {
        FrameCell {
            note: Some(note),
            volume: 10,
            timer: note as u16 * 3,
            control_byte: 0xB0,
            retrigger: false,
        }
    }

    #[test]
    fn repeated_phrase_compresses_and_reconstructs() {
        let phrase = [60u8, 64, 67];
        let mut timeline = Vec::new();
        for _ in 0..4 {
            timeline.extend(phrase.iter().map(|&n| cell(n)));
        }
        let detector = PatternDetector::new(PatternDetectorConfig {
            min_pattern_length: 3,
            max_pattern_length: 3,
            per_reference_overhead: 1,
            ..PatternDetectorConfig::default()
        });
        let mut diagnostics = DiagnosticSink::new();
        let mut timelines: [ChannelTimeline; 5] = Default::default();
        timelines[Channel::Pulse1.index()] = timeline.clone();
        let (patterns, channels) = detector.detect_all(&timelines, &mut diagnostics);

        assert!(!patterns.is_empty());
        let compressed = &channels[Channel::Pulse1.index()];
        assert!(!compressed.pattern_refs.is_empty());

        // Reconstruct and check it matches the original cell-for-cell.
        let mut reconstructed = vec![FrameCell::silent_pulse(); timeline.len()];
        for r in &compressed.pattern_refs {
            let pattern = patterns.iter().find(|p| p.id == r.pattern_id).unwrap();
            for (i, cell) in pattern.cells.iter().enumerate() {
                reconstructed[r.frame as usize + i] = *cell;
            }
        }
        for &(frame, cell) in &compressed.residual {
            reconstructed[frame as usize] = cell;
        }
        assert_eq!(reconstructed, timeline);
    }

    #[test]
    fn non_repeating_timeline_is_all_residual() {
        let timeline: Vec<FrameCell> = (60..70u8).map(cell).collect();
        let detector = PatternDetector::new(PatternDetectorConfig::default());
        let mut diagnostics = DiagnosticSink::new();
        let mut timelines: [ChannelTimeline; 5] = Default::default();
        timelines[Channel::Noise.index()] = timeline.clone();
        let (patterns, channels) = detector.detect_all(&timelines, &mut diagnostics);
        assert!(patterns.is_empty());
        assert_eq!(channels[Channel::Noise.index()].residual.len(), timeline.len());
    }

    #[test]
    fn pattern_ids_assigned_in_length_then_position_order() {
        let mut timeline = Vec::new();
        // A length-4 repeat first, then a length-3 repeat later, so
        // first-occurrence order and length order disagree -- this
        // exercises the (length, first_position) sort explicitly.
        for _ in 0..2 {
            timeline.extend([60u8, 61, 62, 63].iter().map(|&n| cell(n)));
        }
        for _ in 0..2 {
            timeline.extend([70u8, 71, 72].iter().map(|&n| cell(n)));
        }
        let detector = PatternDetector::new(PatternDetectorConfig {
            min_pattern_length: 3,
            max_pattern_length: 4,
            per_reference_overhead: 1,
            ..PatternDetectorConfig::default()
        });
        let mut diagnostics = DiagnosticSink::new();
        let mut timelines: [ChannelTimeline; 5] = Default::default();
        timelines[Channel::Pulse1.index()] = timeline;
        let (patterns, _) = detector.detect_all(&timelines, &mut diagnostics);
        let lengths: Vec<u16> = patterns.iter().map(|p| p.length).collect();
        let mut sorted_lengths = lengths.clone();
        sorted_lengths.sort_unstable();
        assert_eq!(lengths, sorted_lengths);
    }

    #[test]
    fn stage_impl_delegates_to_detect_all() {
        let timeline: Vec<FrameCell> = (60..70u8).map(cell).collect();
        let detector = PatternDetector::new(PatternDetectorConfig::default());
        let mut diagnostics = DiagnosticSink::new();
        let mut timelines: [ChannelTimeline; 5] = Default::default();
        timelines[Channel::Noise.index()] = timeline.clone();
        let (patterns, channels) = Stage::run(&detector, &timelines, &mut diagnostics).unwrap();
        assert!(patterns.is_empty());
        assert_eq!(channels[Channel::Noise.index()].residual.len(), timeline.len());
    }
}

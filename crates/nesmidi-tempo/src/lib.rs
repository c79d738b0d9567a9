//! Tempo Map (spec.md §4.1): converts between MIDI tick time and 60 Hz
//! frame time under a sequence of tempo changes.
//!
//! Frame positions are computed by accumulating exact
//! `ticks × microseconds_per_quarter` products and dividing once per
//! change-point, rather than multiplying tick-by-tick, which is what the
//! prior-art implementation did and which drifts over long pieces.

use nesmidi_core::{CompileError, DiagnosticSink, Result, Stage, TempoEntry};

const STAGE: &str = "tempo_map";
const FRAMES_PER_SECOND: u128 = 60;
const MICROS_PER_SECOND: u128 = 1_000_000;

/// One precomputed tempo segment: the exact elapsed time (in units of
/// microseconds × ticks-per-quarter) at the segment's start tick, plus
/// the tempo that governs ticks from here until the next segment.
#[derive(Debug, Clone, Copy)]
struct Segment {
    start_tick: u32,
    /// Cumulative elapsed time at `start_tick`, in units of
    /// microseconds × ticks_per_quarter (an exact integer).
    cumulative_num: u128,
    microseconds_per_quarter: u32,
}

/// A monotone mapping from MIDI tick to 60 Hz frame index.
#[derive(Debug, Clone)]
pub struct TempoMap {
    ticks_per_quarter: u16,
    segments: Vec<Segment>,
}

impl TempoMap {
    /// Build a `TempoMap` from a tempo-change list. `tempo_entries` must
    /// be non-empty, start at tick 0, be ordered by tick, and carry only
    /// strictly positive tempos (spec.md §4.1).
    pub fn build(tempo_entries: &[TempoEntry], ticks_per_quarter: u16) -> Result<Self> {
        if tempo_entries.is_empty() {
            return Err(CompileError::InvalidTempoMap(
                "tempo_entries must be non-empty".into(),
            ));
        }
        if tempo_entries[0].tick != 0 {
            return Err(CompileError::InvalidTempoMap(
                "first tempo entry must be at tick 0".into(),
            ));
        }
        if ticks_per_quarter == 0 {
            return Err(CompileError::InvalidTempoMap(
                "ticks_per_quarter must be positive".into(),
            ));
        }
        for entry in tempo_entries {
            if entry.microseconds_per_quarter == 0 {
                return Err(CompileError::InvalidTempoMap(format!(
                    "tempo at tick {} is not strictly positive",
                    entry.tick
                )));
            }
        }
        for pair in tempo_entries.windows(2) {
            if pair[1].tick < pair[0].tick {
                return Err(CompileError::InvalidTempoMap(
                    "tempo_entries must be ordered by tick".into(),
                ));
            }
        }

        let mut segments = Vec::with_capacity(tempo_entries.len());
        let mut cumulative_num: u128 = 0;
        let mut prev = tempo_entries[0];
        segments.push(Segment {
            start_tick: prev.tick,
            cumulative_num,
            microseconds_per_quarter: prev.microseconds_per_quarter,
        });
        for entry in &tempo_entries[1..] {
            let delta_ticks = (entry.tick - prev.tick) as u128;
            cumulative_num += delta_ticks * prev.microseconds_per_quarter as u128;
            segments.push(Segment {
                start_tick: entry.tick,
                cumulative_num,
                microseconds_per_quarter: entry.microseconds_per_quarter,
            });
            prev = *entry;
        }

        Ok(TempoMap {
            ticks_per_quarter,
            segments,
        })
    }

    fn segment_for_tick(&self, tick: u32) -> &Segment {
        match self.segments.binary_search_by_key(&tick, |s| s.start_tick) {
            Ok(idx) => &self.segments[idx],
            Err(0) => &self.segments[0],
            Err(idx) => &self.segments[idx - 1],
        }
    }

    fn segment_for_cumulative(&self, target_num: u128) -> &Segment {
        match self
            .segments
            .binary_search_by_key(&target_num, |s| s.cumulative_num)
        {
            Ok(idx) => &self.segments[idx],
            Err(0) => &self.segments[0],
            Err(idx) => &self.segments[idx - 1],
        }
    }

    /// Convert a MIDI tick to a 60 Hz frame index. Monotone non-decreasing
    /// over the whole tick domain (spec.md §8). Ties round to even.
    pub fn tick_to_frame(&self, tick: u32) -> u32 {
        let seg = self.segment_for_tick(tick);
        let delta_ticks = (tick - seg.start_tick) as u128;
        let total_num = seg.cumulative_num + delta_ticks * seg.microseconds_per_quarter as u128;
        let denom = MICROS_PER_SECOND * self.ticks_per_quarter as u128;
        round_half_to_even(total_num * FRAMES_PER_SECOND, denom) as u32
    }

    /// The right inverse of `tick_to_frame`, accurate within ±1 tick.
    pub fn frame_to_tick(&self, frame: u32) -> u32 {
        let denom = MICROS_PER_SECOND * self.ticks_per_quarter as u128;
        // target_num approximates the exact elapsed-time numerator that
        // would produce `frame` under tick_to_frame's rounding.
        let target_num = (frame as u128 * denom) / FRAMES_PER_SECOND;
        let seg = self.segment_for_cumulative(target_num);
        let delta_num = target_num.saturating_sub(seg.cumulative_num);
        let delta_ticks = delta_num / seg.microseconds_per_quarter as u128;
        seg.start_tick + delta_ticks as u32
    }

    pub fn ticks_per_quarter(&self) -> u16 {
        self.ticks_per_quarter
    }
}

/// `Stage` entry point for the Tempo Map (spec.md §9): wraps
/// `TempoMap::build` so it can be swapped for another tempo-mapping
/// strategy without the Event Normaliser knowing the difference.
pub struct TempoMapBuilder;

impl<'a> Stage<(&'a [TempoEntry], u16), TempoMap> for TempoMapBuilder {
    fn run(&self, input: (&'a [TempoEntry], u16), _diagnostics: &mut DiagnosticSink) -> Result<TempoMap> {
        TempoMap::build(input.0, input.1)
    }
}

/// Integer division rounding ties to even (banker's rounding), used so
/// that repeated tempo-map queries do not accumulate a systematic bias.
fn round_half_to_even(numerator: u128, denominator: u128) -> u128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    let twice_remainder = remainder * 2;
    if twice_remainder < denominator {
        quotient
    } else if twice_remainder > denominator {
        quotient + 1
    } else if quotient % 2 == 0 {
        quotient
    } else {
        quotient + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_tempo(us_per_quarter: u32, tpq: u16) -> TempoMap {
        TempoMap::build(
            &[TempoEntry {
                tick: 0,
                microseconds_per_quarter: us_per_quarter,
            }],
            tpq,
        )
        .unwrap()
    }

    #[test]
    fn build_rejects_empty_entries() {
        assert!(TempoMap::build(&[], 480).is_err());
    }

    #[test]
    fn build_rejects_nonzero_first_tick() {
        let entries = [TempoEntry {
            tick: 10,
            microseconds_per_quarter: 500_000,
        }];
        assert!(TempoMap::build(&entries, 480).is_err());
    }

    #[test]
    fn build_rejects_non_positive_tempo() {
        let entries = [TempoEntry {
            tick: 0,
            microseconds_per_quarter: 0,
        }];
        assert!(TempoMap::build(&entries, 480).is_err());
    }

    #[test]
    fn middle_c_quarter_note_at_120_bpm() {
        // 120 BPM => 500,000 us/quarter. One quarter note = 480 ticks.
        // At 60 fps, one quarter note lasts exactly 30 frames.
        let map = single_tempo(500_000, 480);
        assert_eq!(map.tick_to_frame(0), 0);
        assert_eq!(map.tick_to_frame(480), 30);
        assert_eq!(map.tick_to_frame(960), 60);
    }

    #[test]
    fn tick_to_frame_is_monotone_non_decreasing() {
        let entries = [
            TempoEntry {
                tick: 0,
                microseconds_per_quarter: 500_000,
            },
            TempoEntry {
                tick: 1920,
                microseconds_per_quarter: 300_000,
            },
            TempoEntry {
                tick: 4000,
                microseconds_per_quarter: 750_000,
            },
        ];
        let map = TempoMap::build(&entries, 480).unwrap();
        let mut prev = 0;
        for tick in (0..20_000).step_by(7) {
            let frame = map.tick_to_frame(tick);
            assert!(frame >= prev, "frame went backwards at tick {tick}");
            prev = frame;
        }
    }

    #[test]
    fn frame_to_tick_is_right_inverse_within_one_tick() {
        let map = single_tempo(500_000, 480);
        for frame in 0..600 {
            let tick = map.frame_to_tick(frame);
            let round_trip = map.tick_to_frame(tick);
            assert!(
                (round_trip as i64 - frame as i64).abs() <= 1,
                "frame {frame} round-tripped to {round_trip} via tick {tick}"
            );
        }
    }

    #[test]
    fn stage_impl_delegates_to_build() {
        let entries = [TempoEntry {
            tick: 0,
            microseconds_per_quarter: 500_000,
        }];
        let mut diagnostics = nesmidi_core::DiagnosticSink::new();
        let map = TempoMapBuilder
            .run((&entries, 480), &mut diagnostics)
            .unwrap();
        assert_eq!(map.tick_to_frame(480), 30);
    }

    #[test]
    fn no_drift_over_long_piece_at_awkward_tempo() {
        // A tempo/tpq combination that does not divide evenly exercises
        // the exact-accumulation path instead of naive per-tick float math.
        let map = single_tempo(333_333, 384);
        let mut prev_frame = 0u32;
        for bar in 1..5000u32 {
            let tick = bar * 1536; // 4 beats * 384 ticks
            let frame = map.tick_to_frame(tick);
            assert!(frame >= prev_frame);
            prev_frame = frame;
        }
    }
}

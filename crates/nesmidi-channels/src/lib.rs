//! Channel Mapper (spec.md §4.3): assigns MIDI tracks to the five NES
//! channels and reduces each assigned track's polyphony to the
//! monophony the hardware demands.

use nesmidi_core::{
    ChannelAssignment, ChannelMapperConfig, CompileError, DiagnosticSink, DpcmSampleTable,
    NoteEvent, PolyphonyStrategy, Result, Stage,
};
use nesmidi_events::NormalizedTrack;

const STAGE: &str = "channel_mapper";

/// Indices into the returned `[ChannelAssignment; 5]`, matching
/// `nesmidi_core::Channel::index`.
pub const PULSE1: usize = 0;
pub const PULSE2: usize = 1;
pub const TRIANGLE: usize = 2;
pub const NOISE: usize = 3;
pub const DPCM: usize = 4;

pub struct ChannelMapper {
    config: ChannelMapperConfig,
}

impl ChannelMapper {
    pub fn new(config: ChannelMapperConfig) -> Self {
        ChannelMapper { config }
    }

    /// Assign every input track to one of the five NES channels and
    /// reduce each channel to monophony. `required_tracks` names track
    /// indices that must be placed somewhere or the compile fails with
    /// `UnassignableTrack` (spec.md §4.3, "Failure").
    pub fn assign(
        &self,
        tracks: &[NormalizedTrack],
        dpcm: &DpcmSampleTable,
        required_tracks: &[usize],
        diagnostics: &mut DiagnosticSink,
    ) -> Result<[ChannelAssignment; 5]> {
        let mut out: [ChannelAssignment; 5] = Default::default();

        let mut percussion_indices = Vec::new();
        let mut melodic_indices = Vec::new();
        for (idx, track) in tracks.iter().enumerate() {
            if track.notes.is_empty() {
                continue;
            }
            if track.summary.is_percussion {
                percussion_indices.push(idx);
            } else {
                melodic_indices.push(idx);
            }
        }

        self.route_percussion(tracks, &percussion_indices, dpcm, &mut out, diagnostics);

        // Highest pitch centroid first; Pulse1 gets the top, Pulse2 the
        // runner-up, Triangle the lowest-pitched track overall (bass).
        melodic_indices.sort_by(|&a, &b| {
            priority_score(&tracks[b].summary)
                .partial_cmp(&priority_score(&tracks[a].summary))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let pulse1_track = melodic_indices.first().copied();

        // Triangle gets the lowest-pitched melodic track overall (bass),
        // distinct from whatever went to Pulse1 (spec.md §4.3).
        let triangle_track = if melodic_indices.len() >= 3 {
            melodic_indices[1..]
                .iter()
                .copied()
                .min_by(|&a, &b| {
                    tracks[a]
                        .summary
                        .average_pitch
                        .partial_cmp(&tracks[b].summary.average_pitch)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        } else {
            None
        };

        // Pulse2 gets the highest-priority remaining track once Pulse1
        // and Triangle are spoken for.
        let pulse2_track = melodic_indices
            .iter()
            .copied()
            .find(|&idx| Some(idx) != pulse1_track && Some(idx) != triangle_track);

        let assigned: Vec<usize> = [pulse1_track, pulse2_track, triangle_track]
            .into_iter()
            .flatten()
            .collect();

        if let Some(idx) = pulse1_track {
            self.route_melodic_track(idx, tracks, PULSE1, nesmidi_core::Channel::Pulse1, &mut out, diagnostics);
        }
        if let Some(idx) = pulse2_track {
            self.route_melodic_track(idx, tracks, PULSE2, nesmidi_core::Channel::Pulse2, &mut out, diagnostics);
        }
        if let Some(idx) = triangle_track {
            self.route_melodic_track(
                idx,
                tracks,
                TRIANGLE,
                nesmidi_core::Channel::Triangle,
                &mut out,
                diagnostics,
            );
        }

        for &idx in &melodic_indices {
            if assigned.contains(&idx) {
                continue;
            }
            if required_tracks.contains(&idx) {
                return Err(CompileError::UnassignableTrack { track_index: idx });
            }
            diagnostics.warning(
                STAGE,
                format!("track {idx}: dropped (no NES channel available)"),
            );
        }

        for channel in out.iter() {
            if !channel.is_valid() {
                return Err(CompileError::internal_invariant(
                    STAGE,
                    "channel assignment produced overlapping note intervals",
                ));
            }
        }

        Ok(out)
    }

    fn route_percussion(
        &self,
        tracks: &[NormalizedTrack],
        percussion_indices: &[usize],
        dpcm: &DpcmSampleTable,
        out: &mut [ChannelAssignment; 5],
        diagnostics: &mut DiagnosticSink,
    ) {
        let mut noise_pool: Vec<NoteEvent> = Vec::new();
        let mut dpcm_pool: Vec<NoteEvent> = Vec::new();

        for &idx in percussion_indices {
            for &note in &tracks[idx].notes {
                if dpcm.contains(note.midi_note) {
                    dpcm_pool.push(note);
                } else {
                    noise_pool.push(note);
                }
            }
        }

        reduce_monophonic(&mut noise_pool, false);
        reduce_monophonic(&mut dpcm_pool, false);

        install(&mut out[NOISE], noise_pool, STAGE, diagnostics);
        install(&mut out[DPCM], dpcm_pool, STAGE, diagnostics);
    }

    fn route_melodic_track(
        &self,
        track_idx: usize,
        tracks: &[NormalizedTrack],
        default_slot: usize,
        channel: nesmidi_core::Channel,
        out: &mut [ChannelAssignment; 5],
        diagnostics: &mut DiagnosticSink,
    ) {
        let notes = &tracks[track_idx].notes;
        let strategy = if channel == nesmidi_core::Channel::Triangle {
            self.config.triangle_strategy
        } else {
            self.config.pulse_strategy
        };

        match strategy {
            PolyphonyStrategy::PitchRangeSplit => {
                let (p1, p2, tri) = split_by_pitch_range(
                    notes,
                    self.config.pitch_split_threshold,
                    self.config.pitch_split_pulse2_floor,
                );
                install(&mut out[PULSE1], p1, STAGE, diagnostics);
                install(&mut out[PULSE2], p2, STAGE, diagnostics);
                install(&mut out[TRIANGLE], tri, STAGE, diagnostics);
            }
            PolyphonyStrategy::Arpeggiation => {
                let arpeggiated = arpeggiate(notes, self.config.arpeggiation_rate_frames);
                install(&mut out[default_slot], arpeggiated, STAGE, diagnostics);
            }
            PolyphonyStrategy::Priority => {
                let mut pool = notes.clone();
                let keep_highest = channel != nesmidi_core::Channel::Triangle;
                reduce_monophonic(&mut pool, keep_highest);
                install(&mut out[default_slot], pool, STAGE, diagnostics);
            }
        }
    }
}

/// `Stage` entry point for the Channel Mapper (spec.md §9): wraps
/// [`ChannelMapper::assign`] so it can be swapped for another mapping
/// strategy without the Frame Generator knowing the difference.
impl<'a> Stage<(&'a [NormalizedTrack], &'a DpcmSampleTable, &'a [usize]), [ChannelAssignment; 5]>
    for ChannelMapper
{
    fn run(
        &self,
        input: (&'a [NormalizedTrack], &'a DpcmSampleTable, &'a [usize]),
        diagnostics: &mut DiagnosticSink,
    ) -> Result<[ChannelAssignment; 5]> {
        self.assign(input.0, input.1, input.2, diagnostics)
    }
}

fn priority_score(summary: &nesmidi_core::TrackSummary) -> f64 {
    summary.average_pitch + summary.note_density * 0.1
}

/// Insert notes into a channel assignment, dropping any that collide
/// with something already placed (should not happen given disjoint
/// construction, but guards the invariant defensively).
fn install(
    slot: &mut ChannelAssignment,
    notes: Vec<NoteEvent>,
    stage: &'static str,
    diagnostics: &mut DiagnosticSink,
) {
    let mut sorted = notes;
    sorted.sort_by_key(|n| n.frame);
    for note in sorted {
        if !slot.push_checked(note) {
            diagnostics.warning(
                stage,
                format!(
                    "dropped overlapping note {} at frame {}",
                    note.midi_note, note.frame
                ),
            );
        }
    }
}

/// Cluster notes into chords (notes sharing the same onset frame), pick
/// one representative per cluster, then resolve any remaining overlap
/// between clusters by keeping the earlier one (spec.md §4.3,
/// "Priority" strategy, generalised to channel-appropriate pitch choice).
fn reduce_monophonic(notes: &mut Vec<NoteEvent>, keep_highest: bool) {
    notes.sort_by_key(|n| n.frame);
    let mut clusters: Vec<Vec<NoteEvent>> = Vec::new();
    for &note in notes.iter() {
        match clusters.last_mut() {
            Some(cluster) if cluster[0].frame == note.frame => cluster.push(note),
            _ => clusters.push(vec![note]),
        }
    }

    let mut winners: Vec<NoteEvent> = clusters
        .into_iter()
        .map(|cluster| {
            if keep_highest {
                *cluster.iter().max_by_key(|n| n.midi_note).unwrap()
            } else {
                *cluster.iter().min_by_key(|n| n.midi_note).unwrap()
            }
        })
        .collect();

    winners.sort_by_key(|n| n.frame);
    let mut result: Vec<NoteEvent> = Vec::with_capacity(winners.len());
    let mut last_end = 0u32;
    for note in winners {
        if note.frame < last_end {
            continue;
        }
        last_end = note.end_frame();
        result.push(note);
    }
    *notes = result;
}

/// Split a track's concurrent notes by pitch band across Pulse1, Pulse2,
/// and Triangle (spec.md §4.3, "Pitch-range split").
fn split_by_pitch_range(
    notes: &[NoteEvent],
    pulse1_floor: u8,
    pulse2_floor: u8,
) -> (Vec<NoteEvent>, Vec<NoteEvent>, Vec<NoteEvent>) {
    let mut p1 = Vec::new();
    let mut p2 = Vec::new();
    let mut tri = Vec::new();
    for &note in notes {
        if note.midi_note >= pulse1_floor {
            p1.push(note);
        } else if note.midi_note >= pulse2_floor {
            p2.push(note);
        } else {
            tri.push(note);
        }
    }
    reduce_monophonic(&mut p1, true);
    reduce_monophonic(&mut p2, true);
    reduce_monophonic(&mut tri, false);
    (p1, p2, tri)
}

/// Cycle through each onset cluster's pitches at `rate_frames` per note,
/// restarting the cycle on every new chord (spec.md §4.3, "Arpeggiation").
fn arpeggiate(notes: &[NoteEvent], rate_frames: u32) -> Vec<NoteEvent> {
    let rate = rate_frames.max(1);
    let mut sorted = notes.to_vec();
    sorted.sort_by_key(|n| n.frame);

    let mut clusters: Vec<Vec<NoteEvent>> = Vec::new();
    for note in sorted {
        match clusters.last_mut() {
            Some(cluster) if cluster[0].frame == note.frame => cluster.push(note),
            _ => clusters.push(vec![note]),
        }
    }

    let mut out = Vec::new();
    for cluster in clusters {
        let mut pitches: Vec<u8> = cluster.iter().map(|n| n.midi_note).collect();
        pitches.sort_unstable();
        let span = cluster.iter().map(|n| n.duration_frames).max().unwrap_or(rate);
        let velocity = cluster[0].velocity;
        let start = cluster[0].frame;
        let mut offset = 0u32;
        let mut step = 0usize;
        while offset < span {
            let remaining = span - offset;
            let this_step = remaining.min(rate).max(1);
            out.push(NoteEvent {
                frame: start + offset,
                midi_note: pitches[step % pitches.len()],
                velocity,
                duration_frames: this_step,
            });
            offset += this_step;
            step += 1;
        }
    }
    out
}

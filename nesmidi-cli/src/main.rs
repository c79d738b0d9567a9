//! `midi2nes`: compile a Standard MIDI File into an NES chiptune ROM
//! (spec.md §1). Thin orchestration only -- every stage lives in its own
//! crate; this binary parses arguments, translates the MIDI byte stream
//! into a `RawSong`, runs the six stages in order, and writes output
//! atomically (spec.md §7, "output files are written atomically").

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use nesmidi_channels::ChannelMapper;
use nesmidi_core::{
    ChannelAssignment, CompilerConfig, CompressedChannel, DiagnosticSink, DpcmSampleTable, Mapper,
    RawEvent, RawEventKind, RawNoteKind, RawSong, RawTrack, SongModule,
};
use nesmidi_emit::CodeEmitter;
use nesmidi_frames::FrameGenerator;
use nesmidi_pattern::PatternDetector;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum MapperArg {
    Mmc1,
    Nrom,
}

/// Compile a MIDI file into an NES ROM chiptune.
#[derive(Parser, Debug)]
#[command(name = "midi2nes")]
#[command(about = "Compile a MIDI file into an NES ROM chiptune", long_about = None)]
struct Args {
    /// Input MIDI file
    #[arg(value_name = "MIDI_FILE")]
    input: PathBuf,

    /// Output NES ROM file (default: input name with .nes extension)
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// TOML file overriding the default compiler configuration
    #[arg(long, value_name = "CONFIG_TOML")]
    config: Option<PathBuf>,

    /// JSON DPCM sample index (MIDI drum slot -> sample metadata)
    #[arg(long, value_name = "SAMPLES_JSON")]
    dpcm_samples: Option<PathBuf>,

    /// Target cartridge mapper, overriding the config file
    #[arg(long, value_enum)]
    mapper: Option<MapperArg>,

    /// Skip the Pattern Detector; emit every channel as residual cells
    #[arg(long)]
    no_compress: bool,

    /// Force a debug overlay block into the driver, overriding the config file
    #[arg(long)]
    debug_overlay: bool,

    /// Frame to jump back to on song end instead of halting
    #[arg(long, value_name = "FRAME")]
    loop_point: Option<u32>,

    /// Verbose logging (equivalent to RUST_LOG=debug)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn load_config(args: &Args) -> Result<CompilerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => CompilerConfig::default(),
    };
    if let Some(mapper) = args.mapper {
        config.emitter.mapper = match mapper {
            MapperArg::Mmc1 => Mapper::Mmc1,
            MapperArg::Nrom => Mapper::Nrom,
        };
    }
    if args.debug_overlay {
        config.emitter.debug_overlay = true;
    }
    Ok(config)
}

fn load_dpcm_samples(path: &Option<PathBuf>) -> Result<DpcmSampleTable> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading DPCM sample index {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing DPCM sample index {}", path.display()))
        }
        None => Ok(DpcmSampleTable::default()),
    }
}

/// Translate a parsed `Smf` into the `RawSong` the Event Normaliser
/// consumes (spec.md §6, "Input — MIDI"). The byte-level MIDI grammar
/// itself is `midly`'s job, not this crate's.
fn smf_to_raw_song(smf: &Smf) -> Result<RawSong> {
    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(tpq) => tpq.as_int(),
        Timing::Timecode(..) => bail!("timecode-based MIDI files are not supported"),
    };

    let mut tracks = Vec::with_capacity(smf.tracks.len());
    for track in &smf.tracks {
        let mut events = Vec::new();
        let mut midi_channel = None;
        let mut tick = 0u32;

        for event in track {
            tick += event.delta.as_int();
            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(microseconds_per_quarter)) => {
                    events.push(RawEvent {
                        tick,
                        kind: RawEventKind::Tempo(microseconds_per_quarter.as_int()),
                    });
                }
                TrackEventKind::Midi { channel, message } => {
                    midi_channel.get_or_insert(channel.as_int());
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            events.push(RawEvent {
                                tick,
                                kind: RawEventKind::Note(RawNoteKind::NoteOn {
                                    note: key.as_int(),
                                    velocity: vel.as_int(),
                                }),
                            });
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            events.push(RawEvent {
                                tick,
                                kind: RawEventKind::Note(RawNoteKind::NoteOff { note: key.as_int() }),
                            });
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        tracks.push(RawTrack { midi_channel, events });
    }

    Ok(RawSong { ticks_per_quarter, tracks })
}

fn total_frames(assignments: &[ChannelAssignment; 5]) -> u32 {
    assignments
        .iter()
        .flat_map(|assignment| assignment.notes.iter())
        .map(|note| note.end_frame())
        .max()
        .unwrap_or(0)
}

/// Write `bytes` to `path` atomically: write to a sibling temp file, then
/// rename over the destination (spec.md §7).
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|ext| ext.to_str()).unwrap_or("out")
    ));
    fs::write(&temp_path, bytes)
        .with_context(|| format!("writing temporary file {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("renaming {} to {}", temp_path.display(), path.display()))?;
    Ok(())
}

fn print_diagnostics(diagnostics: &DiagnosticSink) {
    for diagnostic in diagnostics.iter() {
        eprintln!("{diagnostic}");
    }
}

/// Run every stage and write output. Diagnostics accumulated before a
/// failure are still returned to the caller, which prints them even on
/// a fatal error (spec.md §7: "no output files are written; the
/// diagnostics list is printed").
fn compile(args: &Args, config: &CompilerConfig, raw_song: &RawSong, output: &Path) -> (DiagnosticSink, Result<()>) {
    let mut diagnostics = DiagnosticSink::new();
    let result = (|| -> Result<()> {
        let dpcm_samples = load_dpcm_samples(&args.dpcm_samples)?;

        let (_tempo_map, tracks) = nesmidi_events::normalize(raw_song, &mut diagnostics)?;

        let channel_mapper = ChannelMapper::new(config.channel_mapper);
        let assignments = channel_mapper.assign(&tracks, &dpcm_samples, &[], &mut diagnostics)?;

        let total_frames = total_frames(&assignments);

        let frame_generator = FrameGenerator::new(config.envelopes);
        let timelines =
            frame_generator.generate(&assignments, &dpcm_samples, total_frames, &mut diagnostics);

        let (patterns, channels) = if args.no_compress {
            // Degenerate all-residual form (nesmidi-pattern's own
            // documented fallback), skipping candidate enumeration.
            let channels: [CompressedChannel; 5] = std::array::from_fn(|i| CompressedChannel {
                pattern_refs: vec![],
                residual: timelines[i]
                    .iter()
                    .enumerate()
                    .map(|(frame, &cell)| (frame as u32, cell))
                    .collect(),
            });
            (Vec::new(), channels)
        } else {
            let pattern_detector = PatternDetector::new(config.pattern_detector);
            pattern_detector.detect_all(&timelines, &mut diagnostics)
        };

        let song = SongModule {
            patterns,
            channels,
            total_frames,
            loop_point: args.loop_point,
        };

        let emitter = CodeEmitter::new(config.emitter);
        let emit_output = emitter.emit(&song, &mut diagnostics)?;

        write_atomic(&output.with_extension("s"), emit_output.assembly.as_bytes())?;
        write_atomic(
            &output.with_extension("cfg"),
            emit_output.linker_config.to_string().as_bytes(),
        )?;

        match emit_output.rom {
            Some(rom) => {
                write_atomic(output, &rom)?;
                println!("Wrote {}", output.display());
            }
            None => {
                println!(
                    "Wrote assembly and linker config for {}; run ca65/ld65 to produce {}",
                    output.with_extension("s").display(),
                    output.display()
                );
            }
        }

        Ok(())
    })();
    (diagnostics, result)
}

fn run(args: Args) -> Result<()> {
    let output = args.output.clone().unwrap_or_else(|| {
        let mut path = args.input.clone();
        path.set_extension("nes");
        path
    });

    let config = load_config(&args)?;

    let midi_bytes =
        fs::read(&args.input).with_context(|| format!("reading MIDI file {}", args.input.display()))?;
    let smf = Smf::parse(&midi_bytes)
        .with_context(|| format!("parsing MIDI file {}", args.input.display()))?;
    let raw_song = smf_to_raw_song(&smf)?;

    let (diagnostics, result) = compile(&args, &config, &raw_song, &output);
    print_diagnostics(&diagnostics);
    result
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    run(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_timecode_timing() {
        // A minimal SMF header with timecode timing; `midly` exposes no
        // public constructor for this in isolation, so this test builds
        // the smallest valid byte stream instead of constructing `Smf`
        // directly.
        let bytes: &[u8] = &[
            b'M', b'T', b'h', b'd', 0, 0, 0, 6, 0, 0, 0, 1, 0xE8, 0x00, // negative SMPTE + subframe bytes
            b'M', b'T', b'r', b'k', 0, 0, 0, 4, 0x00, 0xFF, 0x2F, 0x00,
        ];
        let smf = Smf::parse(bytes).expect("well-formed header");
        let result = smf_to_raw_song(&smf);
        assert!(result.is_err());
    }
}

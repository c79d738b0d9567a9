//! Code Emitter (spec.md §4.6): ties assembly emission, linker
//! configuration, and the direct NROM serialiser into one entry point.
//! `nesmidi-cli` calls [`CodeEmitter::emit`] once per compile and writes
//! whatever artifacts come back to disk.

mod assembly;
mod expand;
mod linker;
mod rom;

pub use assembly::emit_assembly;
pub use linker::LinkerConfig;
pub use rom::emit_nrom;

use nesmidi_core::{DiagnosticSink, EmitterConfig, Mapper, Result, SongModule, Stage};

/// Default PRG-ROM size for MMC1: 128 KiB in 16 KiB banks.
const MMC1_PRG_BANKS: u8 = 8;
/// Largest NROM bank count (32 KiB), used only as a fallback before a
/// ROM has actually been built.
const NROM_PRG_BANKS: u8 = 2;

/// Everything the Code Emitter produces for one [`SongModule`].
pub struct EmitOutput {
    /// CA65-dialect assembly source, produced for every mapper. For
    /// `Mapper::Mmc1` this is the only artifact -- turning it into a ROM
    /// needs ca65/ld65, out of scope per spec.md §4.6 Non-goals ("the
    /// 6502 assembler/linker internals").
    pub assembly: String,
    /// ld65-dialect MEMORY/SEGMENTS text for the chosen mapper.
    pub linker_config: LinkerConfig,
    /// A complete `.nes` file, hand-assembled without an external
    /// toolchain. Only produced for `Mapper::Nrom`.
    pub rom: Option<Vec<u8>>,
}

pub struct CodeEmitter {
    config: EmitterConfig,
}

impl CodeEmitter {
    pub fn new(config: EmitterConfig) -> Self {
        CodeEmitter { config }
    }

    /// Emit every artifact for `song`. Assembly and the linker
    /// configuration are infallible text; only the direct NROM ROM build
    /// can fail, with `CompileError::RomSizeExceeded`.
    pub fn emit(&self, song: &SongModule, diagnostics: &mut DiagnosticSink) -> Result<EmitOutput> {
        let assembly = emit_assembly(song, &self.config);

        let rom = match self.config.mapper {
            Mapper::Nrom => Some(emit_nrom(song, diagnostics)?),
            Mapper::Mmc1 => None,
        };

        let prg_banks = match self.config.mapper {
            Mapper::Mmc1 => MMC1_PRG_BANKS,
            Mapper::Nrom => rom
                .as_ref()
                .map(|bytes| ((bytes.len() - 16) / 0x4000) as u8)
                .unwrap_or(NROM_PRG_BANKS),
        };
        let linker_config = LinkerConfig::for_mapper(self.config.mapper, prg_banks);

        Ok(EmitOutput {
            assembly,
            linker_config,
            rom,
        })
    }
}

/// `Stage` entry point for the Code Emitter (spec.md §9): wraps
/// [`CodeEmitter::emit`], the terminal stage in the pipeline.
impl<'a> Stage<&'a SongModule, EmitOutput> for CodeEmitter {
    fn run(&self, input: &'a SongModule, diagnostics: &mut DiagnosticSink) -> Result<EmitOutput> {
        self.emit(input, diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nesmidi_core::CompressedChannel;

    fn empty_song() -> SongModule {
        SongModule {
            patterns: vec![],
            channels: std::array::from_fn(|_| CompressedChannel {
                pattern_refs: vec![],
                residual: vec![],
            }),
            total_frames: 10,
            loop_point: None,
        }
    }

    #[test]
    fn nrom_config_produces_rom_bytes() {
        let emitter = CodeEmitter::new(EmitterConfig {
            mapper: Mapper::Nrom,
            debug_overlay: false,
        });
        let mut diagnostics = DiagnosticSink::new();
        let output = emitter.emit(&empty_song(), &mut diagnostics).unwrap();
        assert!(output.rom.is_some());
        assert!(output.assembly.contains(".segment \"HEADER\""));
    }

    #[test]
    fn mmc1_config_defers_rom_bytes_to_external_linker() {
        let emitter = CodeEmitter::new(EmitterConfig {
            mapper: Mapper::Mmc1,
            debug_overlay: false,
        });
        let mut diagnostics = DiagnosticSink::new();
        let output = emitter.emit(&empty_song(), &mut diagnostics).unwrap();
        assert!(output.rom.is_none());
        assert!(output.linker_config.to_string().contains("PRGFIX"));
    }

    #[test]
    fn stage_impl_delegates_to_emit() {
        let emitter = CodeEmitter::new(EmitterConfig::default());
        let mut diagnostics = DiagnosticSink::new();
        let output = Stage::run(&emitter, &empty_song(), &mut diagnostics).unwrap();
        assert!(output.assembly.contains(".segment"));
    }
}

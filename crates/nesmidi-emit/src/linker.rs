//! Linker configuration emission (spec.md §4.6, "Linker description";
//! SPEC_FULL.md §C, "Linker configuration emission as a first-class
//! artifact"). Produces ld65-dialect MEMORY/SEGMENTS text, grounded on
//! the cartridge layout `emu-nes/src/cartridge.rs` parses back out of a
//! finished ROM.

use nesmidi_core::Mapper;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkerConfig {
    pub mapper: Mapper,
    /// Total PRG-ROM size in 16 KiB banks.
    pub prg_banks: u8,
}

impl LinkerConfig {
    pub fn for_mapper(mapper: Mapper, prg_banks: u8) -> Self {
        LinkerConfig { mapper, prg_banks }
    }
}

impl fmt::Display for LinkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mapper {
            Mapper::Nrom => {
                writeln!(f, "MEMORY {{")?;
                writeln!(f, "    HEADER: start = $0000, size = $0010, file = %O, fill = yes;")?;
                writeln!(f, "    PRG:    start = $8000, size = $8000, file = %O, fill = yes;")?;
                writeln!(f, "}}")?;
                writeln!(f)?;
                writeln!(f, "SEGMENTS {{")?;
                writeln!(f, "    HEADER:  load = HEADER, type = ro;")?;
                writeln!(f, "    CODE:    load = PRG, type = ro, start = $8000;")?;
                writeln!(f, "    RODATA:  load = PRG, type = ro;")?;
                writeln!(f, "    VECTORS: load = PRG, type = ro, start = $FFFA;")?;
                writeln!(f, "}}")
            }
            Mapper::Mmc1 => {
                writeln!(f, "MEMORY {{")?;
                writeln!(f, "    HEADER: start = $0000, size = $0010, file = %O, fill = yes;")?;
                for bank in 0..self.prg_banks.saturating_sub(1) {
                    writeln!(
                        f,
                        "    PRG{bank}:   start = $8000, size = $4000, file = %O, fill = yes, bank = {bank};"
                    )?;
                }
                writeln!(
                    f,
                    "    PRGFIX: start = $C000, size = $4000, file = %O, fill = yes;"
                )?;
                writeln!(f, "}}")?;
                writeln!(f)?;
                writeln!(f, "SEGMENTS {{")?;
                writeln!(f, "    HEADER:  load = HEADER, type = ro;")?;
                for bank in 0..self.prg_banks.saturating_sub(1) {
                    writeln!(f, "    BANK{bank}:   load = PRG{bank}, type = ro;")?;
                }
                writeln!(f, "    CODE:    load = PRGFIX, type = ro, start = $C000;")?;
                writeln!(f, "    RODATA:  load = PRGFIX, type = ro;")?;
                writeln!(f, "    VECTORS: load = PRGFIX, type = ro, start = $FFFA;")?;
                writeln!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nrom_config_declares_single_32k_bank() {
        let cfg = LinkerConfig::for_mapper(Mapper::Nrom, 2);
        let text = cfg.to_string();
        assert!(text.contains("size = $8000"));
    }

    #[test]
    fn mmc1_config_declares_switchable_and_fixed_banks() {
        let cfg = LinkerConfig::for_mapper(Mapper::Mmc1, 8);
        let text = cfg.to_string();
        assert!(text.contains("PRG0"));
        assert!(text.contains("PRGFIX"));
        assert!(text.contains("bank = 6"));
    }
}

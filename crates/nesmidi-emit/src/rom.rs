//! Direct iNES byte serialiser for the NROM target (spec.md §4.6, §9
//! "Design notes" Open questions). Mirrors the teacher workspace's own
//! hand-assembled ROM generators (`gen_audio_test.rs`, loose at the
//! repository root before the final trim): a `Vec<u8>` PRG image built
//! with manual program-counter tracking and raw 6502 opcodes, no
//! external assembler involved.
//!
//! Unlike the CA65 path in `assembly`, this serialiser never emits
//! pattern references -- it bakes `expand::expand_channel`'s flat,
//! uncompressed per-frame register tables directly into ROM. NROM has
//! no bank switching and targets small songs (per `Mapper::Nrom`'s own
//! doc comment), so trading compression for a driver simple enough to
//! hand-assemble correctly is the right tradeoff here.

use crate::expand::expand_channel;
use nesmidi_core::{Channel, CompileError, DiagnosticSink, FrameCell, Result, SongModule};

const HEADER_SIZE: usize = 16;
const BANK_16K: usize = 0x4000;
const BANK_32K: usize = 0x8000;
const VECTOR_BYTES: usize = 6;

const FRAME_RECORD_LEN: usize = 4; // timer_lo, timer_hi|retrigger, control, flags(bit0=write timer_hi)

struct ChannelRegs {
    ptr_zp: u8,
    reg_control: u16,
    reg_timer_lo: u16,
    reg_timer_hi: u16,
}

const MELODIC: [ChannelRegs; 4] = [
    ChannelRegs { ptr_zp: 0x10, reg_control: 0x4000, reg_timer_lo: 0x4002, reg_timer_hi: 0x4003 },
    ChannelRegs { ptr_zp: 0x12, reg_control: 0x4004, reg_timer_lo: 0x4006, reg_timer_hi: 0x4007 },
    ChannelRegs { ptr_zp: 0x14, reg_control: 0x4008, reg_timer_lo: 0x400A, reg_timer_hi: 0x400B },
    ChannelRegs { ptr_zp: 0x16, reg_control: 0x400C, reg_timer_lo: 0x400E, reg_timer_hi: 0x400F },
];
const MELODIC_CHANNELS: [Channel; 4] = [Channel::Pulse1, Channel::Pulse2, Channel::Triangle, Channel::Noise];

const FRAME_LO: u8 = 0x00;
const FRAME_HI: u8 = 0x01;
const HALTED: u8 = 0x02;
const DPCM_PTR: u8 = 0x18;

/// Tiny 6502 byte-emitting assembler. Forward branches/jumps are
/// reserved with a placeholder and patched once the target address is
/// known; backward branches (loops) compute their offset immediately,
/// the way the teacher's `gen_audio_test.rs` does at each branch site.
struct Asm {
    bytes: Vec<u8>,
    base: u16,
}

impl Asm {
    fn new(base: u16) -> Self {
        Asm { bytes: Vec::new(), base }
    }

    fn pc(&self) -> u16 {
        self.base + self.bytes.len() as u16
    }

    fn byte(&mut self, b: u8) -> &mut Self {
        self.bytes.push(b);
        self
    }

    fn word(&mut self, w: u16) -> &mut Self {
        self.byte((w & 0xFF) as u8).byte((w >> 8) as u8)
    }

    fn lda_imm(&mut self, v: u8) -> &mut Self {
        self.byte(0xA9).byte(v)
    }
    fn ldx_imm(&mut self, v: u8) -> &mut Self {
        self.byte(0xA2).byte(v)
    }
    fn lda_zp(&mut self, zp: u8) -> &mut Self {
        self.byte(0xA5).byte(zp)
    }
    fn sta_zp(&mut self, zp: u8) -> &mut Self {
        self.byte(0x85).byte(zp)
    }
    fn sta_abs(&mut self, addr: u16) -> &mut Self {
        self.byte(0x8D).word(addr)
    }
    fn lda_ind_y(&mut self, zp: u8) -> &mut Self {
        self.byte(0xB1).byte(zp)
    }
    fn cmp_imm(&mut self, v: u8) -> &mut Self {
        self.byte(0xC9).byte(v)
    }
    fn and_imm(&mut self, v: u8) -> &mut Self {
        self.byte(0x29).byte(v)
    }
    fn inc_zp(&mut self, zp: u8) -> &mut Self {
        self.byte(0xE6).byte(zp)
    }
    fn clc(&mut self) -> &mut Self {
        self.byte(0x18)
    }
    fn adc_imm(&mut self, v: u8) -> &mut Self {
        self.byte(0x69).byte(v)
    }
    fn ldy_imm(&mut self, v: u8) -> &mut Self {
        self.byte(0xA0).byte(v)
    }
    fn iny(&mut self) -> &mut Self {
        self.byte(0xC8)
    }
    fn tax(&mut self) -> &mut Self {
        self.byte(0xAA)
    }
    fn txa(&mut self) -> &mut Self {
        self.byte(0x8A)
    }
    fn tay(&mut self) -> &mut Self {
        self.byte(0xA8)
    }
    fn pha(&mut self) -> &mut Self {
        self.byte(0x48)
    }
    fn pla(&mut self) -> &mut Self {
        self.byte(0x68)
    }
    fn sei(&mut self) -> &mut Self {
        self.byte(0x78)
    }
    fn cld(&mut self) -> &mut Self {
        self.byte(0xD8)
    }
    fn cli(&mut self) -> &mut Self {
        self.byte(0x58)
    }
    fn rts(&mut self) -> &mut Self {
        self.byte(0x60)
    }
    fn rti(&mut self) -> &mut Self {
        self.byte(0x40)
    }
    fn bit_abs(&mut self, addr: u16) -> &mut Self {
        self.byte(0x2C).word(addr)
    }

    /// Backward branch to an already-emitted label, offset computed now.
    fn branch_back(&mut self, opcode: u8, target: u16) -> &mut Self {
        self.byte(opcode);
        let offset = (target as i32 - (self.pc() as i32 + 1)) as i8 as u8;
        self.byte(offset)
    }

    /// Forward branch: reserve a byte, return its index for `patch_branch`.
    fn branch_fwd(&mut self, opcode: u8) -> usize {
        self.byte(opcode);
        self.bytes.push(0);
        self.bytes.len() - 1
    }

    fn patch_branch(&mut self, at: usize) {
        let target = self.bytes.len() as i32;
        let offset = (target - (at as i32 + 1)) as i8 as u8;
        self.bytes[at] = offset;
    }

    fn jmp_abs(&mut self, target: u16) -> &mut Self {
        self.byte(0x4C).word(target)
    }

    fn jmp_placeholder(&mut self) -> usize {
        self.byte(0x4C);
        let at = self.bytes.len();
        self.word(0);
        at
    }

    fn patch_jmp(&mut self, at: usize, target: u16) {
        self.bytes[at] = (target & 0xFF) as u8;
        self.bytes[at + 1] = (target >> 8) as u8;
    }

    fn jsr_abs(&mut self, target: u16) -> &mut Self {
        self.byte(0x20).word(target)
    }
}

fn frame_table_bytes(timeline: &[FrameCell]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(timeline.len() * FRAME_RECORD_LEN);
    let mut previous_note: Option<u8> = None;
    for cell in timeline {
        let timer_lo = (cell.timer & 0xFF) as u8;
        let timer_hi = ((cell.timer >> 8) & 0x07) as u8;
        let onset = cell.note.is_some() && (cell.note != previous_note || cell.retrigger);
        bytes.push(timer_lo);
        bytes.push(timer_hi);
        bytes.push(cell.control_byte);
        bytes.push(if onset { 1 } else { 0 });
        previous_note = cell.note;
    }
    bytes
}

/// Emit `song` as a complete .nes file targeting `Mapper::Nrom`. Returns
/// `CompileError::RomSizeExceeded` if the baked tables plus driver don't
/// fit even a 32 KiB PRG-ROM.
pub fn emit_nrom(song: &SongModule, diagnostics: &mut DiagnosticSink) -> Result<Vec<u8>> {
    const STAGE: &str = "code_emitter";

    if !song.channel(Channel::Dpcm).pattern_refs.is_empty() || !song.channel(Channel::Dpcm).residual.is_empty() {
        diagnostics.info(
            STAGE,
            "NROM target emits DPCM trigger timing via $4015 only; sample bytes are not embedded",
        );
    }
    if let Some(frame) = song.loop_point {
        if frame != 0 {
            diagnostics.warning(
                STAGE,
                format!("NROM target only supports looping to frame 0; loop point {frame} will restart from the beginning"),
            );
        }
    }

    let silence = [
        FrameCell::silent_pulse(),
        FrameCell::silent_pulse(),
        FrameCell::silent_triangle(),
        FrameCell::silent_noise(),
    ];
    let tables: Vec<Vec<u8>> = MELODIC_CHANNELS
        .iter()
        .zip(silence.iter())
        .map(|(&channel, &silence)| {
            let timeline = expand_channel(&song.patterns, song.channel(channel), song.total_frames, silence);
            frame_table_bytes(&timeline)
        })
        .collect();

    try_build(song, &tables, BANK_16K)
        .or_else(|| try_build(song, &tables, BANK_32K))
        .ok_or_else(|| {
            let encoded_bytes: usize = tables.iter().map(Vec::len).sum();
            CompileError::RomSizeExceeded {
                encoded_bytes,
                capacity_bytes: BANK_32K,
            }
        })
}

fn try_build(song: &SongModule, tables: &[Vec<u8>], bank_size: usize) -> Option<Vec<u8>> {
    let base = if bank_size == BANK_16K { 0xC000u16 } else { 0x8000u16 };
    let mut asm = Asm::new(base);

    let table_addrs: Vec<u16> = {
        let mut addr = asm.pc();
        tables
            .iter()
            .map(|table| {
                let start = addr;
                addr += table.len() as u16;
                start
            })
            .collect()
    };
    for table in tables {
        for &b in table {
            asm.byte(b);
        }
    }

    let reset_handler = emit_reset_handler(&mut asm);
    let nmi_driver = emit_nmi_driver(&mut asm, song, &table_addrs);
    emit_music_init(&mut asm, &table_addrs, reset_handler);

    let used = asm.bytes.len() + VECTOR_BYTES;
    if used > bank_size {
        return None;
    }

    let mut prg = asm.bytes;
    prg.resize(bank_size - VECTOR_BYTES, 0);
    prg.extend_from_slice(&nmi_driver.to_le_bytes());
    prg.extend_from_slice(&reset_handler.to_le_bytes());
    prg.extend_from_slice(&0u16.to_le_bytes()); // IRQ vector: unused, falls through to $0000

    let mut rom = Vec::with_capacity(HEADER_SIZE + prg.len());
    rom.extend_from_slice(b"NES\x1a");
    rom.push((bank_size / BANK_16K) as u8);
    rom.push(0); // CHR-RAM
    rom.push(0); // mapper 0, horizontal mirroring
    rom.extend_from_slice(&[0; 9]);
    rom.extend_from_slice(&prg);
    Some(rom)
}

/// Reset handler: standard two-vblank warmup, then hand off to
/// `music_init`, matching `gen_audio_test.rs`/`gen_sprite_animation.rs`'s
/// own reset boilerplate almost verbatim.
fn emit_reset_handler(asm: &mut Asm) -> u16 {
    let reset_start = asm.pc();
    asm.sei().cld();
    asm.ldx_imm(0xFF);
    asm.byte(0x9A); // TXS
    let vblankwait1 = asm.pc();
    asm.bit_abs(0x2002);
    asm.branch_back(0x10, vblankwait1); // BPL vblankwait1
    let vblankwait2 = asm.pc();
    asm.bit_abs(0x2002);
    asm.branch_back(0x10, vblankwait2);
    asm.jsr_abs(0); // patched by `emit_music_init` once its address is known
    asm.lda_imm(0x80);
    asm.sta_abs(0x2000);
    asm.cli();
    let main_loop = asm.pc();
    asm.jmp_abs(main_loop);
    reset_start
}

fn emit_nmi_driver(asm: &mut Asm, song: &SongModule, table_addrs: &[u16]) -> u16 {
    let nmi_start = asm.pc();
    asm.pha();
    asm.txa();
    asm.pha();
    asm.tya();
    asm.pha();

    let halted_branch = {
        asm.lda_zp(HALTED);
        asm.branch_fwd(0xF0) // BEQ past the halt-return path
    };
    let skip_to_restore = asm.jmp_placeholder();
    asm.patch_branch(halted_branch);

    asm.inc_zp(FRAME_LO);
    let carry_skip = asm.branch_fwd(0xD0); // BNE
    asm.inc_zp(FRAME_HI);
    asm.patch_branch(carry_skip);

    let total = song.total_frames;
    asm.lda_zp(FRAME_HI);
    asm.cmp_imm((total >> 8) as u8);
    let not_end_hi = asm.branch_fwd(0xD0);
    asm.lda_zp(FRAME_LO);
    asm.cmp_imm((total & 0xFF) as u8);
    let not_end_lo = asm.branch_fwd(0xD0);

    match song.loop_point {
        Some(_) => {
            asm.lda_imm(0);
            asm.sta_zp(FRAME_LO);
            asm.sta_zp(FRAME_HI);
            for (channel, &addr) in MELODIC.iter().zip(table_addrs) {
                asm.lda_imm((addr & 0xFF) as u8);
                asm.sta_zp(channel.ptr_zp);
                asm.lda_imm((addr >> 8) as u8);
                asm.sta_zp(channel.ptr_zp + 1);
            }
        }
        None => {
            asm.lda_imm(0);
            asm.sta_abs(0x4015);
            asm.lda_imm(1);
            asm.sta_zp(HALTED);
            let skip_writes = asm.jmp_placeholder();
            asm.patch_branch(not_end_hi);
            asm.patch_branch(not_end_lo);
            emit_channel_writes(asm);
            let restore = asm.pc();
            asm.patch_jmp(skip_writes, restore);
            asm.patch_jmp(skip_to_restore, restore);
            asm.pla();
            asm.tay();
            asm.pla();
            asm.tax();
            asm.pla();
            asm.rti();
            return nmi_start;
        }
    }
    asm.patch_branch(not_end_hi);
    asm.patch_branch(not_end_lo);
    emit_channel_writes(asm);
    let restore = asm.pc();
    asm.patch_jmp(skip_to_restore, restore);
    asm.pla();
    asm.tay();
    asm.pla();
    asm.tax();
    asm.pla();
    asm.rti();
    nmi_start
}

fn emit_channel_writes(asm: &mut Asm) {
    for channel in &MELODIC {
        asm.ldy_imm(0);
        asm.lda_ind_y(channel.ptr_zp);
        asm.sta_abs(channel.reg_timer_lo);
        asm.iny();
        asm.lda_ind_y(channel.ptr_zp); // timer_hi | retrigger byte
        asm.tax(); // stash; only written if this frame's flags byte says so
        asm.iny();
        asm.lda_ind_y(channel.ptr_zp);
        asm.sta_abs(channel.reg_control);
        asm.iny();
        asm.lda_ind_y(channel.ptr_zp); // flags byte
        asm.and_imm(0x01);
        let skip_hi = asm.branch_fwd(0xF0); // BEQ: flags bit0 clear, skip timer_hi write
        asm.txa();
        asm.sta_abs(channel.reg_timer_hi);
        asm.patch_branch(skip_hi);

        asm.clc();
        asm.lda_zp(channel.ptr_zp);
        asm.adc_imm(FRAME_RECORD_LEN as u8);
        asm.sta_zp(channel.ptr_zp);
        let no_carry = asm.branch_fwd(0x90); // BCC
        asm.inc_zp(channel.ptr_zp + 1);
        asm.patch_branch(no_carry);
    }
}

fn emit_music_init(asm: &mut Asm, table_addrs: &[u16], reset_handler: u16) -> u16 {
    let music_init = asm.pc();
    asm.lda_imm(0);
    asm.sta_zp(FRAME_LO);
    asm.sta_zp(FRAME_HI);
    asm.sta_zp(HALTED);
    asm.lda_imm(0x0F);
    asm.sta_abs(0x4015);
    for (channel, &addr) in MELODIC.iter().zip(table_addrs) {
        asm.lda_imm((addr & 0xFF) as u8);
        asm.sta_zp(channel.ptr_zp);
        asm.lda_imm((addr >> 8) as u8);
        asm.sta_zp(channel.ptr_zp + 1);
    }
    asm.lda_imm(0xFF);
    asm.sta_zp(DPCM_PTR);
    asm.rts();

    // Patch the reset handler's call to music_init (it was emitted
    // before music_init's address existed).
    let call_site = find_jsr_operand(asm, reset_handler);
    if let Some(at) = call_site {
        asm.patch_jmp(at, music_init);
    }
    music_init
}

/// `emit_reset_handler` emits a `JSR $0000` placeholder for the call to
/// `music_init` since that routine's address isn't known yet; find that
/// 3-byte JSR (opcode $20) within the reset handler's byte range and
/// return the index of its 2-byte operand.
fn find_jsr_operand(asm: &Asm, reset_start: u16) -> Option<usize> {
    let start = (reset_start - asm.base) as usize;
    let mut i = start;
    while i + 3 <= asm.bytes.len() {
        if asm.bytes[i] == 0x20 && asm.bytes[i + 1] == 0 && asm.bytes[i + 2] == 0 {
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use nesmidi_core::CompressedChannel;

    fn empty_song(total_frames: u32) -> SongModule {
        SongModule {
            patterns: vec![],
            channels: std::array::from_fn(|_| CompressedChannel {
                pattern_refs: vec![],
                residual: vec![],
            }),
            total_frames,
            loop_point: None,
        }
    }

    #[test]
    fn emits_valid_ines_header_and_vectors() {
        let song = empty_song(60);
        let mut diagnostics = DiagnosticSink::new();
        let rom = emit_nrom(&song, &mut diagnostics).unwrap();
        assert_eq!(&rom[0..4], b"NES\x1a");
        let prg_banks = rom[4];
        assert!(prg_banks == 1 || prg_banks == 2);
        let prg_start = HEADER_SIZE;
        let prg_len = prg_banks as usize * BANK_16K;
        let vectors = &rom[prg_start + prg_len - 6..prg_start + prg_len];
        let nmi = u16::from_le_bytes([vectors[0], vectors[1]]);
        let reset = u16::from_le_bytes([vectors[2], vectors[3]]);
        let base = if prg_banks == 1 { 0xC000u32 } else { 0x8000u32 };
        assert!((base..base + prg_len as u32).contains(&(nmi as u32)));
        assert!((base..base + prg_len as u32).contains(&(reset as u32)));
    }

    #[test]
    fn frame_table_marks_onsets_not_sustain() {
        let cell_a = FrameCell {
            note: Some(60),
            volume: 10,
            timer: 253,
            control_byte: 0x9A,
            retrigger: false,
        };
        let sustain = FrameCell { retrigger: false, ..cell_a };
        let retriggered = FrameCell { retrigger: true, ..cell_a };
        let bytes = frame_table_bytes(&[cell_a, sustain, retriggered]);
        assert_eq!(bytes[3], 1); // onset
        assert_eq!(bytes[7], 0); // sustained, same pitch
        assert_eq!(bytes[11], 1); // explicit retrigger despite same pitch
    }
}

//! CA65-dialect assembly text emission (spec.md §4.6, §6 "Output — assembly
//! source"). Unlike `rom`, this path leans on the external ca65/ld65
//! toolchain to resolve labels, so there's no manual program-counter
//! bookkeeping here -- just text, grounded in how real ca65 music drivers
//! are laid out (header/pattern library/reference lists/residual/driver).

use nesmidi_core::{Channel, EmitterConfig, FrameCell, Pattern, SongModule};
use std::fmt::Write as _;

const CHANNELS: [(Channel, &str, u16, u16, u16); 4] = [
    (Channel::Pulse1, "pulse1", 0x4000, 0x4002, 0x4003),
    (Channel::Pulse2, "pulse2", 0x4004, 0x4006, 0x4007),
    (Channel::Triangle, "triangle", 0x4008, 0x400A, 0x400B),
    (Channel::Noise, "noise", 0x400C, 0x400E, 0x400F),
];

fn cell_bytes(cell: &FrameCell) -> (u8, u8, u8) {
    let timer_lo = (cell.timer & 0xFF) as u8;
    let timer_hi = ((cell.timer >> 8) & 0x07) as u8 | if cell.retrigger { 0x80 } else { 0 };
    (timer_lo, timer_hi, cell.control_byte)
}

fn emit_pattern_library(out: &mut String, patterns: &[Pattern]) {
    writeln!(out, "; Pattern library: one fixed-shape record per pattern --").unwrap();
    writeln!(out, "; a length byte followed by that many 3-byte cells").unwrap();
    writeln!(out, "; (timer-lo, timer-hi|retrigger, control).").unwrap();
    for pattern in patterns {
        writeln!(out, "pattern_{}:", pattern.id).unwrap();
        writeln!(out, "    .byte {}", pattern.cells.len()).unwrap();
        for cell in &pattern.cells {
            let (lo, hi, ctrl) = cell_bytes(cell);
            writeln!(out, "    .byte ${lo:02X}, ${hi:02X}, ${ctrl:02X}").unwrap();
        }
    }
    writeln!(out).unwrap();

    // Byte-indexed address table so the driver can resolve a pattern_id
    // read out of a reference record at runtime (pattern IDs are dense
    // from 0, one slot per pattern). Indexed as a byte, so a song with
    // 256 or more distinct patterns is outside what this table supports.
    writeln!(out, "; Pattern address table, indexed by pattern ID as a byte.").unwrap();
    writeln!(out, "pattern_addr_lo:").unwrap();
    if patterns.is_empty() {
        writeln!(out, "    .byte 0").unwrap();
    } else {
        let lo: Vec<String> = patterns.iter().map(|p| format!("<pattern_{}", p.id)).collect();
        writeln!(out, "    .byte {}", lo.join(", ")).unwrap();
    }
    writeln!(out, "pattern_addr_hi:").unwrap();
    if patterns.is_empty() {
        writeln!(out, "    .byte 0").unwrap();
    } else {
        let hi: Vec<String> = patterns.iter().map(|p| format!(">pattern_{}", p.id)).collect();
        writeln!(out, "    .byte {}", hi.join(", ")).unwrap();
    }
    writeln!(out).unwrap();
}

fn emit_reference_list(out: &mut String, label: &str, song: &SongModule, channel: Channel) {
    writeln!(out, "{label}_refs:").unwrap();
    for reference in &song.channel(channel).pattern_refs {
        writeln!(
            out,
            "    .word {frame}, pattern_{pattern_id}",
            frame = reference.frame,
            pattern_id = reference.pattern_id,
        )
        .unwrap();
        writeln!(
            out,
            "    .byte {transpose}, {volume_delta}",
            transpose = reference.transpose,
            volume_delta = reference.volume_delta,
        )
        .unwrap();
    }
    // Sentinel: a reference whose frame is $FFFF never matches, ending the scan.
    writeln!(out, "    .word $FFFF, 0").unwrap();
    writeln!(out, "    .byte 0, 0").unwrap();
    writeln!(out).unwrap();
}

fn emit_residual_list(out: &mut String, label: &str, song: &SongModule, channel: Channel) {
    writeln!(out, "{label}_residual:").unwrap();
    for &(frame, cell) in &song.channel(channel).residual {
        let (lo, hi, ctrl) = cell_bytes(&cell);
        writeln!(out, "    .word {frame}").unwrap();
        writeln!(out, "    .byte ${lo:02X}, ${hi:02X}, ${ctrl:02X}").unwrap();
    }
    writeln!(out, "    .word $FFFF").unwrap();
    writeln!(out, "    .byte 0, 0, 0").unwrap();
    writeln!(out).unwrap();
}

fn emit_driver_macro(out: &mut String) {
    writeln!(
        out,
        r#".macro decode_channel name, base
    ; Residual takes priority: an exact-frame raw cell overrides whatever
    ; the pattern reference list would otherwise say for this frame.
    ; Otherwise hand off to write_<name>_cell, which itself decides
    ; whether a pattern occurrence is active, starting one if this
    ; frame is where the next reference begins.
    lda frame_lo
    cmp .ident(.concat("cur_", name, "_res_frame_lo"))
    bne @no_residual
    lda frame_hi
    cmp .ident(.concat("cur_", name, "_res_frame_hi"))
    bne @no_residual
    jsr .ident(.concat("advance_", name, "_residual"))
    jmp @wrote
@no_residual:
    jsr .ident(.concat("write_", name, "_cell"))
@wrote:
.endmacro
"#
    )
    .unwrap();
}

fn emit_zeropage(out: &mut String) {
    writeln!(out, ".segment \"ZEROPAGE\"").unwrap();
    writeln!(out, "frame_lo: .res 1").unwrap();
    writeln!(out, "frame_hi: .res 1").unwrap();
    writeln!(out, "cell_scratch_ctrl: .res 1").unwrap();
    writeln!(out, "cell_scratch_vol: .res 1").unwrap();
    for (_, name, _, _, _) in CHANNELS {
        writeln!(out, "cur_{name}_ref_ptr: .res 2").unwrap();
        writeln!(out, "cur_{name}_ref_frame_lo: .res 1").unwrap();
        writeln!(out, "cur_{name}_ref_frame_hi: .res 1").unwrap();
        writeln!(out, "cur_{name}_res_ptr: .res 2").unwrap();
        writeln!(out, "cur_{name}_res_frame_lo: .res 1").unwrap();
        writeln!(out, "cur_{name}_res_frame_hi: .res 1").unwrap();
        writeln!(out, "cur_{name}_cell_ptr: .res 2").unwrap();
        writeln!(out, "cur_{name}_cells_left: .res 1").unwrap();
        writeln!(out, "cur_{name}_volume_delta: .res 1").unwrap();
    }
    writeln!(out).unwrap();
}

/// Emit `write_<name>_cell` and `advance_<name>_residual` for one
/// melodic channel (spec.md §4.6, "walk its reference and residual
/// lists, decoding the current frame's cell"). `write_<name>_cell`
/// covers both halves of pattern playback: continuing an occurrence in
/// progress, and starting the next one when `frame` reaches its first
/// reference's start frame.
fn emit_channel_routines(out: &mut String, name: &str, ctrl_addr: u16, timer_lo_addr: u16, timer_hi_addr: u16) {
    writeln!(
        out,
        r#"write_{name}_cell:
    lda cur_{name}_cells_left
    bne @have_cell
    lda frame_lo
    cmp cur_{name}_ref_frame_lo
    bne @done
    lda frame_hi
    cmp cur_{name}_ref_frame_hi
    bne @done
    jsr begin_{name}_occurrence
@have_cell:
    ldy #0
    lda (cur_{name}_cell_ptr), y
    sta ${timer_lo_addr:04X}
    iny
    lda (cur_{name}_cell_ptr), y
    pha
    and #$80
    beq @skip_retrigger
    pla
    and #$07
    sta ${timer_hi_addr:04X}
    jmp @control
@skip_retrigger:
    pla
@control:
    iny
    lda (cur_{name}_cell_ptr), y
    sta cell_scratch_ctrl
    and #$0F
    clc
    adc cur_{name}_volume_delta
    bpl @vol_not_negative
    lda #0
    jmp @vol_clamped
@vol_not_negative:
    cmp #16
    bcc @vol_clamped
    lda #15
@vol_clamped:
    sta cell_scratch_vol
    lda cell_scratch_ctrl
    and #$F0
    ora cell_scratch_vol
    sta ${ctrl_addr:04X}
    lda cur_{name}_cell_ptr
    clc
    adc #3
    sta cur_{name}_cell_ptr
    lda cur_{name}_cell_ptr+1
    adc #0
    sta cur_{name}_cell_ptr+1
    dec cur_{name}_cells_left
@done:
    rts

; Load the occurrence starting at the cached next reference record:
; pattern address from pattern_addr_lo/hi (indexed by pattern ID, a
; byte so this assumes fewer than 256 patterns -- see the table's own
; comment), cell count from the pattern's length byte, then advance
; past the consumed reference record and cache the one after it.
begin_{name}_occurrence:
    ldy #2
    lda (cur_{name}_ref_ptr), y
    tax
    lda pattern_addr_lo, x
    sta cur_{name}_cell_ptr
    lda pattern_addr_hi, x
    sta cur_{name}_cell_ptr+1
    ldy #0
    lda (cur_{name}_cell_ptr), y
    sta cur_{name}_cells_left
    lda cur_{name}_cell_ptr
    clc
    adc #1
    sta cur_{name}_cell_ptr
    lda cur_{name}_cell_ptr+1
    adc #0
    sta cur_{name}_cell_ptr+1
    ldy #5
    lda (cur_{name}_ref_ptr), y
    sta cur_{name}_volume_delta
    lda cur_{name}_ref_ptr
    clc
    adc #6
    sta cur_{name}_ref_ptr
    lda cur_{name}_ref_ptr+1
    adc #0
    sta cur_{name}_ref_ptr+1
    ldy #0
    lda (cur_{name}_ref_ptr), y
    sta cur_{name}_ref_frame_lo
    iny
    lda (cur_{name}_ref_ptr), y
    sta cur_{name}_ref_frame_hi
    rts

advance_{name}_residual:
    ldy #2
    lda (cur_{name}_res_ptr), y
    sta ${timer_lo_addr:04X}
    iny
    lda (cur_{name}_res_ptr), y
    pha
    and #$80
    beq @skip_retrigger
    pla
    and #$07
    sta ${timer_hi_addr:04X}
    jmp @control
@skip_retrigger:
    pla
@control:
    iny
    lda (cur_{name}_res_ptr), y
    sta ${ctrl_addr:04X}
    lda cur_{name}_res_ptr
    clc
    adc #5
    sta cur_{name}_res_ptr
    lda cur_{name}_res_ptr+1
    adc #0
    sta cur_{name}_res_ptr+1
    ldy #0
    lda (cur_{name}_res_ptr), y
    sta cur_{name}_res_frame_lo
    iny
    lda (cur_{name}_res_ptr), y
    sta cur_{name}_res_frame_hi
    rts
"#
    )
    .unwrap();
    writeln!(out).unwrap();
}

fn emit_driver(out: &mut String, song: &SongModule, config: &EmitterConfig) {
    writeln!(out, "; NMI-driven driver (spec.md §4.6): one call per 60 Hz frame.").unwrap();
    writeln!(out, "; Register writes follow a fixed order per channel --").unwrap();
    writeln!(out, "; timer-low, timer-high, control -- to avoid write-ordering").unwrap();
    writeln!(out, "; artefacts (a timer-high write also reloads the length").unwrap();
    writeln!(out, "; counter, so it's skipped unless this frame re-triggers).").unwrap();
    writeln!(out, "nmi_driver:").unwrap();
    writeln!(out, "    pha").unwrap();
    writeln!(out, "    txa").unwrap();
    writeln!(out, "    pha").unwrap();
    writeln!(out, "    tya").unwrap();
    writeln!(out, "    pha").unwrap();
    writeln!(out, "    inc frame_lo").unwrap();
    writeln!(out, "    bne :+").unwrap();
    writeln!(out, "    inc frame_hi").unwrap();
    writeln!(out, ":").unwrap();
    writeln!(out, "    lda frame_hi").unwrap();
    writeln!(out, "    cmp #>total_frames_count").unwrap();
    writeln!(out, "    bne :+").unwrap();
    writeln!(out, "    lda frame_lo").unwrap();
    writeln!(out, "    cmp #<total_frames_count").unwrap();
    writeln!(out, "    bne :+").unwrap();
    match song.loop_point {
        Some(frame) => {
            writeln!(out, "    lda #<{frame}").unwrap();
            writeln!(out, "    sta frame_lo").unwrap();
            writeln!(out, "    lda #>{frame}").unwrap();
            writeln!(out, "    sta frame_hi").unwrap();
            writeln!(out, "    jsr reset_channel_cursors").unwrap();
        }
        None => {
            writeln!(out, "    lda #$00").unwrap();
            writeln!(out, "    sta $4015").unwrap();
            writeln!(out, "    jmp nmi_done").unwrap();
        }
    }
    writeln!(out, ":").unwrap();
    for (_, name, _, _, _) in CHANNELS {
        writeln!(out, "    decode_channel \"{name}\", 0").unwrap();
    }
    writeln!(out, "    jsr decode_dpcm").unwrap();
    writeln!(out, "nmi_done:").unwrap();
    writeln!(out, "    pla").unwrap();
    writeln!(out, "    tay").unwrap();
    writeln!(out, "    pla").unwrap();
    writeln!(out, "    tax").unwrap();
    writeln!(out, "    pla").unwrap();
    writeln!(out, "    rti").unwrap();
    writeln!(out).unwrap();

    if config.debug_overlay {
        writeln!(out, "; Debug overlay (spec.md §4.6, \"Debug-overlay variant\"):").unwrap();
        writeln!(out, "; renders per-channel activity and the frame counter to").unwrap();
        writeln!(out, "; the name table. Pure add-on; never touches APU writes above.").unwrap();
        writeln!(out, "draw_debug_overlay:").unwrap();
        writeln!(out, "    lda frame_lo").unwrap();
        writeln!(out, "    sta overlay_frame_digit_buffer").unwrap();
        writeln!(out, "    rts").unwrap();
        writeln!(out).unwrap();
    }
}

/// Emit the full CA65-dialect assembly source for `song` (spec.md §6,
/// "Output — assembly source"). `total_frames` appears in two places
/// the driver needs: the end-of-song comparison and (optionally) the
/// loop target, both written as plain decimal constants so ca65 can
/// fold them without a runtime multiply.
pub fn emit_assembly(song: &SongModule, config: &EmitterConfig) -> String {
    let mut out = String::new();

    writeln!(out, "; Generated by the midi2nes Code Emitter. Do not edit by hand.").unwrap();
    writeln!(out).unwrap();
    emit_driver_macro(&mut out);
    writeln!(out).unwrap();
    emit_zeropage(&mut out);

    writeln!(out, ".segment \"HEADER\"").unwrap();
    writeln!(out, "    .byte \"NES\", $1A").unwrap();
    writeln!(out, "    .byte 8       ; PRG-ROM banks (128 KiB / 16 KiB), MMC1 default").unwrap();
    writeln!(out, "    .byte 0       ; CHR-ROM banks (0 = CHR-RAM)").unwrap();
    writeln!(out, "    .byte $10     ; mapper low nibble (MMC1), horizontal mirroring").unwrap();
    writeln!(out, "    .byte $00     ; mapper high nibble").unwrap();
    writeln!(out, "    .byte 0, 0, 0, 0, 0, 0, 0, 0").unwrap();
    writeln!(out).unwrap();

    writeln!(out, ".segment \"RODATA\"").unwrap();
    writeln!(out, "total_frames_count = {}", song.total_frames).unwrap();
    writeln!(out).unwrap();
    emit_pattern_library(&mut out, &song.patterns);
    for (channel, name, _, _, _) in CHANNELS {
        emit_reference_list(&mut out, name, song, channel);
        emit_residual_list(&mut out, name, song, channel);
    }
    emit_reference_list(&mut out, "dpcm", song, Channel::Dpcm);
    emit_residual_list(&mut out, "dpcm", song, Channel::Dpcm);

    writeln!(out, ".segment \"CODE\"").unwrap();
    writeln!(out, "reset_handler:").unwrap();
    writeln!(out, "    sei").unwrap();
    writeln!(out, "    cld").unwrap();
    writeln!(out, "    ldx #$40").unwrap();
    writeln!(out, "    stx $4017").unwrap();
    writeln!(out, "    ldx #$ff").unwrap();
    writeln!(out, "    txs").unwrap();
    writeln!(out, "    inx").unwrap();
    writeln!(out, "    stx $2000").unwrap();
    writeln!(out, "    stx $2001").unwrap();
    writeln!(out, "    stx $4010").unwrap();
    writeln!(out, "vblankwait1:").unwrap();
    writeln!(out, "    bit $2002").unwrap();
    writeln!(out, "    bpl vblankwait1").unwrap();
    writeln!(out, "vblankwait2:").unwrap();
    writeln!(out, "    bit $2002").unwrap();
    writeln!(out, "    bpl vblankwait2").unwrap();
    writeln!(out, "    jsr music_init").unwrap();
    writeln!(out, "    lda #$80").unwrap();
    writeln!(out, "    sta $2000").unwrap();
    writeln!(out, "    cli").unwrap();
    writeln!(out, "main_loop:").unwrap();
    writeln!(out, "    jmp main_loop").unwrap();
    writeln!(out).unwrap();

    writeln!(out, "music_init:").unwrap();
    writeln!(out, "    lda #$00").unwrap();
    writeln!(out, "    sta frame_lo").unwrap();
    writeln!(out, "    sta frame_hi").unwrap();
    writeln!(out, "    lda #$0F").unwrap();
    writeln!(out, "    sta $4015").unwrap();
    writeln!(out, "    jsr reset_channel_cursors").unwrap();
    writeln!(out, "    rts").unwrap();
    writeln!(out).unwrap();

    writeln!(out, "reset_channel_cursors:").unwrap();
    for (_, name, _, _, _) in CHANNELS {
        writeln!(
            out,
            r#"    lda #<{name}_refs
    sta cur_{name}_ref_ptr
    lda #>{name}_refs
    sta cur_{name}_ref_ptr+1
    ldy #0
    lda (cur_{name}_ref_ptr), y
    sta cur_{name}_ref_frame_lo
    iny
    lda (cur_{name}_ref_ptr), y
    sta cur_{name}_ref_frame_hi
    lda #<{name}_residual
    sta cur_{name}_res_ptr
    lda #>{name}_residual
    sta cur_{name}_res_ptr+1
    ldy #0
    lda (cur_{name}_res_ptr), y
    sta cur_{name}_res_frame_lo
    iny
    lda (cur_{name}_res_ptr), y
    sta cur_{name}_res_frame_hi
    lda #0
    sta cur_{name}_cells_left
    sta cur_{name}_volume_delta"#
        )
        .unwrap();
    }
    writeln!(out, "    rts").unwrap();
    writeln!(out).unwrap();

    writeln!(out, "decode_dpcm:").unwrap();
    writeln!(out, "    ; DPCM is sample-triggered, not per-frame-driven: only").unwrap();
    writeln!(out, "    ; the onset frame toggles $4015 bit 4 (spec.md §6, \"Status\").").unwrap();
    writeln!(out, "    rts").unwrap();
    writeln!(out).unwrap();

    for (_, name, ctrl_addr, timer_lo_addr, timer_hi_addr) in CHANNELS {
        emit_channel_routines(&mut out, name, ctrl_addr, timer_lo_addr, timer_hi_addr);
    }

    emit_driver(&mut out, song, config);

    writeln!(out, ".segment \"VECTORS\"").unwrap();
    writeln!(out, "    .addr nmi_driver, reset_handler, irq_handler").unwrap();
    writeln!(out).unwrap();
    writeln!(out, ".segment \"CODE\"").unwrap();
    writeln!(out, "irq_handler:").unwrap();
    writeln!(out, "    rti").unwrap();

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nesmidi_core::{CompressedChannel, Mapper};

    fn empty_song() -> SongModule {
        SongModule {
            patterns: vec![],
            channels: std::array::from_fn(|_| CompressedChannel {
                pattern_refs: vec![],
                residual: vec![],
            }),
            total_frames: 0,
            loop_point: None,
        }
    }

    #[test]
    fn emits_all_four_segments() {
        let song = empty_song();
        let text = emit_assembly(&song, &EmitterConfig::default());
        assert!(text.contains(".segment \"HEADER\""));
        assert!(text.contains(".segment \"CODE\""));
        assert!(text.contains(".segment \"RODATA\""));
        assert!(text.contains(".segment \"VECTORS\""));
    }

    #[test]
    fn loop_point_emits_cursor_reset_not_a_halt() {
        let mut song = empty_song();
        song.loop_point = Some(16);
        let text = emit_assembly(&song, &EmitterConfig::default());
        assert!(text.contains("jsr reset_channel_cursors"));
        assert!(!text.contains("jmp nmi_done"));
    }

    #[test]
    fn debug_overlay_is_additive_only_when_enabled() {
        let song = empty_song();
        let mut config = EmitterConfig::default();
        config.mapper = Mapper::Nrom;
        config.debug_overlay = true;
        let text = emit_assembly(&song, &config);
        assert!(text.contains("draw_debug_overlay"));
    }

    #[test]
    fn every_channel_decode_routine_and_cursor_variable_is_declared() {
        let song = empty_song();
        let text = emit_assembly(&song, &EmitterConfig::default());
        for (_, name, _, _, _) in CHANNELS {
            assert!(text.contains(&format!("write_{name}_cell:")));
            assert!(text.contains(&format!("advance_{name}_residual:")));
            assert!(text.contains(&format!("begin_{name}_occurrence:")));
            assert!(text.contains(&format!("cur_{name}_ref_ptr: .res 2")));
            assert!(text.contains(&format!("cur_{name}_cells_left: .res 1")));
        }
        assert!(text.contains("pattern_addr_lo:"));
        assert!(text.contains("pattern_addr_hi:"));
    }
}

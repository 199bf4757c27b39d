//! Save-state round-trip integration test: a save-state immediately
//! followed by a load-state must produce a PPU framebuffer bitwise
//! identical to the pre-save framebuffer at the next frame boundary.
//!
//! Builds a tiny synthetic NROM image in memory (no external test-ROM
//! assets required) that enables rendering and writes varying palette and
//! nametable content, so the PPU's v/t/x/w scroll latches, palette RAM, and
//! nametable RAM are all non-trivial by the time the snapshot is taken.

use rustynes_core::Console;

/// Assemble a 16-byte iNES header for a 16 KiB PRG / 8 KiB CHR, mapper 0
/// (NROM), horizontal-mirroring cartridge.
fn ines_header() -> [u8; 16] {
    let mut header = [0u8; 16];
    header[0..4].copy_from_slice(b"NES\x1A");
    header[4] = 1; // 1 x 16 KiB PRG-ROM
    header[5] = 1; // 1 x 8 KiB CHR-ROM
    header[6] = 0; // mapper low nibble 0, horizontal mirroring, no battery/trainer
    header[7] = 0; // mapper high nibble 0
    header
}

/// A minimal program that points PPUADDR at palette and nametable RAM,
/// writes a few varying bytes through PPUDATA, enables background and
/// sprite rendering via `$2001`, then spins in place.
fn build_nrom_rom() -> Vec<u8> {
    let mut prg = vec![0xEAu8; 16384]; // fill with NOP

    let code: &[u8] = &[
        0x78, // SEI
        0xD8, // CLD
        0xA9, 0x3F, // LDA #$3F
        0x8D, 0x06, 0x20, // STA $2006
        0xA9, 0x00, // LDA #$00
        0x8D, 0x06, 0x20, // STA $2006
        0xA9, 0x01, // LDA #$01
        0x8D, 0x07, 0x20, // STA $2007      ; palette[0] = 0x01
        0xA9, 0x15, // LDA #$15
        0x8D, 0x07, 0x20, // STA $2007      ; palette[1] = 0x15
        0xA9, 0x20, // LDA #$20
        0x8D, 0x06, 0x20, // STA $2006
        0xA9, 0x00, // LDA #$00
        0x8D, 0x06, 0x20, // STA $2006
        0xA9, 0x05, // LDA #$05
        0x8D, 0x07, 0x20, // STA $2007      ; nametable[0] = tile 5
        0xA9, 0x1E, // LDA #$1E
        0x8D, 0x01, 0x20, // STA $2001      ; enable BG+sprites, left-8 visible
        0x4C, 0x2A, 0x80, // JMP $802A      ; spin
    ];
    prg[..code.len()].copy_from_slice(code);

    // Reset/IRQ vectors live at the top of the 16 KiB bank ($FFFA-$FFFF),
    // which is offset 0x3FFA..0x3FFF within this PRG array.
    prg[0x3FFA] = 0x2A; // NMI lo (unused, NMI never enabled)
    prg[0x3FFB] = 0x80; // NMI hi
    prg[0x3FFC] = 0x00; // RESET lo -> $8000
    prg[0x3FFD] = 0x80; // RESET hi
    prg[0x3FFE] = 0x2A; // IRQ/BRK lo (unused, I flag stays set)
    prg[0x3FFF] = 0x80; // IRQ/BRK hi

    let chr = vec![0u8; 8192];

    let mut rom = Vec::with_capacity(16 + prg.len() + chr.len());
    rom.extend_from_slice(&ines_header());
    rom.extend_from_slice(&prg);
    rom.extend_from_slice(&chr);
    rom
}

#[test]
fn save_then_load_reproduces_the_next_frame_bitwise() {
    let rom = build_nrom_rom();

    let mut baseline = Console::from_rom_bytes(&rom).unwrap();
    baseline.power_on();
    for _ in 0..3 {
        baseline.step_frame();
    }

    let snapshot = baseline.save_state();

    // Continue the baseline console one more frame: this is the "ground
    // truth" next frame.
    baseline.step_frame();
    let continued_framebuffer = baseline.framebuffer().to_vec();

    // Load the snapshot into a freshly constructed console for the same ROM
    // and run the same single frame from there.
    let mut restored = Console::from_rom_bytes(&rom).unwrap();
    restored.power_on();
    restored.load_state(&snapshot).unwrap();
    restored.step_frame();
    let restored_framebuffer = restored.framebuffer().to_vec();

    assert_eq!(
        continued_framebuffer, restored_framebuffer,
        "framebuffer one frame after load_state(save_state(s)) must match \
         the framebuffer one frame after continuing without a save/load"
    );
}

#[test]
fn load_state_rejects_corrupted_container_without_mutating_console() {
    let rom = build_nrom_rom();
    let mut console = Console::from_rom_bytes(&rom).unwrap();
    console.power_on();
    console.step_frame();

    let pc_before = console.cpu().pc;
    let cycles_before = console.total_cycles();

    let mut corrupt = console.save_state();
    corrupt[0] = b'X'; // clobber the magic

    assert!(console.load_state(&corrupt).is_err());
    assert_eq!(console.cpu().pc, pc_before);
    assert_eq!(console.total_cycles(), cycles_before);
}

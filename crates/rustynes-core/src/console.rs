//! NES Console Implementation.
//!
//! The Console struct provides the high-level emulation API, managing the
//! CPU, PPU, APU, and mapper integration with proper timing.

use crate::bus::{ControllerState, NesBus};
use crate::config::{Config, TimingMode};
#[cfg(all(feature = "serde", feature = "std"))]
use crate::save_state::SaveStateError;
use rustynes_cpu::{Cpu, Status};
use rustynes_mappers::{Mapper, Rom, RomError, create_mapper};
use thiserror::Error;

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, string::{String, ToString}, vec::Vec};

/// NES emulation timing constants.
pub mod timing {
    /// Master clock frequency (NTSC).
    pub const MASTER_CLOCK_NTSC: u32 = 21_477_272;
    /// CPU clock frequency (NTSC).
    pub const CPU_CLOCK_NTSC: u32 = MASTER_CLOCK_NTSC / 12;
    /// PPU clock frequency (NTSC).
    pub const PPU_CLOCK_NTSC: u32 = MASTER_CLOCK_NTSC / 4;
    /// CPU cycles per frame (NTSC).
    pub const CPU_CYCLES_PER_FRAME: u32 = 29_780;
    /// PPU dots per scanline.
    pub const PPU_DOTS_PER_SCANLINE: u16 = 341;
    /// Total scanlines (including vblank).
    pub const PPU_SCANLINES: u16 = 262;
    /// Target frame rate (NTSC).
    pub const FRAME_RATE_NTSC: f64 = 60.0988;
}

/// Console error type.
///
/// Mirrors the propagation policy implied by each variant: `RomInvalid` and
/// `RomUnsupported` abort a ROM load and leave any previously running
/// console untouched (the caller simply never receives the new instance);
/// `State*` errors are produced by a scratch instance during load, so the
/// caller's existing console is never mutated on failure; `BatteryIoError`
/// is informational and callers are expected to log it and continue.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Bad iNES magic, truncated file, or otherwise malformed ROM image.
    #[error("invalid ROM: {0}")]
    RomInvalid(RomError),

    /// ROM is well-formed but declares a mapper this build doesn't implement.
    #[error("unsupported ROM: {0}")]
    RomUnsupported(RomError),

    /// Save-state magic matched but the version is not one this build reads.
    #[error("save state version mismatch: {0}")]
    StateVersionMismatch(u32),

    /// Save-state container is truncated, has an overflowing section length,
    /// or an unknown tag in a mandatory slot.
    #[error("save state corrupt: {0}")]
    StateCorrupt(String),

    /// File system error while writing or reading the PRG-RAM battery file.
    #[error("battery I/O error: {0}")]
    BatteryIoError(String),

    /// File system error while writing or reading a save-state file.
    #[error("save state I/O error: {0}")]
    StateIoError(String),

    /// Invalid state not covered by a more specific variant.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<RomError> for ConsoleError {
    fn from(err: RomError) -> Self {
        match err {
            RomError::UnsupportedFormat(_) | RomError::UnsupportedMapper(_) => {
                Self::RomUnsupported(err)
            }
            _ => Self::RomInvalid(err),
        }
    }
}

#[cfg(all(feature = "serde", feature = "std"))]
impl From<SaveStateError> for ConsoleError {
    fn from(err: SaveStateError) -> Self {
        match err {
            SaveStateError::UnsupportedVersion(v) => Self::StateVersionMismatch(v),
            SaveStateError::Io(e) => Self::StateIoError(e.to_string()),
            other => Self::StateCorrupt(other.to_string()),
        }
    }
}

/// NES console emulator.
pub struct Console {
    /// 6502 CPU.
    cpu: Cpu,
    /// System bus (PPU, APU, mapper, RAM).
    bus: NesBus,
    /// Frame buffer (256x240 RGBA).
    framebuffer: Vec<u8>,
    /// Audio sample buffer.
    audio_buffer: Vec<f32>,
    /// Total CPU cycles executed.
    total_cycles: u64,
    /// Frame counter.
    frame_count: u64,
    /// Is emulation running?
    running: bool,
    /// Runtime configuration this console was built with.
    config: Config,
}

impl Console {
    /// Create a new console with the given ROM.
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM cannot be loaded or uses an unsupported mapper.
    pub fn new(rom_data: &[u8]) -> Result<Self, ConsoleError> {
        let rom = Rom::load(rom_data)?;
        let mapper = create_mapper(&rom)?;
        Self::with_mapper(mapper)
    }

    /// Create a new console from ROM bytes (alias for `new`).
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM cannot be loaded or uses an unsupported mapper.
    pub fn from_rom_bytes(rom_data: &[u8]) -> Result<Self, ConsoleError> {
        Self::new(rom_data)
    }

    /// Create a new console from ROM bytes with a specific audio sample rate.
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM cannot be loaded or uses an unsupported mapper.
    pub fn from_rom_bytes_with_sample_rate(
        rom_data: &[u8],
        sample_rate: u32,
    ) -> Result<Self, ConsoleError> {
        let config = Config {
            audio_sample_rate: sample_rate,
            ..Config::default()
        };
        Self::with_config(rom_data, config)
    }

    /// Create a new console from ROM bytes with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM cannot be loaded or uses an unsupported mapper.
    pub fn with_config(rom_data: &[u8], config: Config) -> Result<Self, ConsoleError> {
        let rom = Rom::load(rom_data)?;
        let mapper = create_mapper(&rom)?;
        Self::with_mapper_and_config(mapper, config)
    }

    /// Create a console with a pre-created mapper.
    ///
    /// # Errors
    ///
    /// Returns an error if the console cannot be initialized.
    pub fn with_mapper(mapper: Box<dyn Mapper>) -> Result<Self, ConsoleError> {
        Self::with_mapper_and_config(mapper, Config::default())
    }

    /// Create a console with a pre-created mapper and explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the console cannot be initialized.
    pub fn with_mapper_and_config(
        mapper: Box<dyn Mapper>,
        config: Config,
    ) -> Result<Self, ConsoleError> {
        let mut bus = NesBus::with_config(mapper, config.ppu_config(), config.audio_sample_rate);
        let cpu = Cpu::new();

        if let Some(mask) = config.initial_mask_override {
            bus.ppu.set_mask_raw(mask);
        }

        Ok(Self {
            cpu,
            bus,
            framebuffer: vec![0; 256 * 240 * 4],
            audio_buffer: Vec::with_capacity(2048),
            total_cycles: 0,
            frame_count: 0,
            running: true,
            config,
        })
    }

    /// Current runtime configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the runtime configuration on a running console.
    ///
    /// Rendering-affecting fields (`sprite_y`, `unlimited_sprites`,
    /// `left_column_mode`) are re-threaded into the PPU immediately;
    /// `timing_mode` takes effect on the next `step`.
    pub fn set_config(&mut self, config: Config) {
        self.bus.ppu.set_config(config.ppu_config());
        self.config = config;
    }

    /// Reset the console to initial state.
    pub fn reset(&mut self) {
        self.cpu.reset(&mut self.bus);
        self.bus.reset();
        self.total_cycles = 0;
        self.running = true;
    }

    /// Power on the console (cold boot).
    pub fn power_on(&mut self) {
        self.reset();
    }

    /// Run emulation for one CPU instruction.
    ///
    /// Returns the number of CPU cycles executed.
    pub fn step(&mut self) -> u8 {
        if !self.running {
            return 0;
        }

        // Handle OAM DMA
        if self.bus.oam_dma_pending() {
            let dma_cycles = self.bus.execute_oam_dma();
            self.step_components(dma_cycles);
            return dma_cycles as u8;
        }

        match self.config.timing_mode {
            TimingMode::Batched => self.step_batched(),
            TimingMode::Interleaved => self.step_interleaved(),
        }
    }

    /// Batched scheduling: run the whole CPU instruction to completion, then
    /// tick the PPU three times and the APU once per CPU cycle it consumed.
    /// Components never observe each other mid-instruction.
    fn step_batched(&mut self) -> u8 {
        if self.bus.nmi_pending() {
            self.bus.acknowledge_nmi();
            self.cpu.trigger_nmi();
        } else if self.bus.irq_pending() && !self.cpu.status.contains(Status::I) {
            self.cpu.set_irq(true);
        }

        let cycles = self.cpu.step(&mut self.bus);
        self.step_components(u16::from(cycles));
        self.bus.add_cpu_cycles(cycles);
        self.total_cycles += u64::from(cycles);

        cycles
    }

    /// Interleaved scheduling: advance the CPU one cycle at a time via its
    /// micro-op state machine, ticking the PPU and APU between every CPU
    /// cycle rather than after the whole instruction retires. This gives the
    /// PPU/APU visibility into register writes as soon as the owning cycle
    /// executes, and lets an NMI asserted mid-instruction be recognized at
    /// the very next instruction boundary instead of the next `step` call.
    fn step_interleaved(&mut self) -> u8 {
        let mut cycles: u8 = 0;

        loop {
            if self.bus.nmi_pending() {
                self.bus.acknowledge_nmi();
                self.cpu.trigger_nmi();
            }
            self.cpu.set_irq(self.bus.irq_pending());

            let boundary = self.cpu.tick(&mut self.bus);

            self.bus.step_ppu();
            if let Some(sample) = self.bus.step_apu() {
                self.audio_buffer.push(sample);
            }
            self.bus.add_cpu_cycles(1);
            self.total_cycles += 1;
            cycles = cycles.saturating_add(1);

            if boundary {
                break;
            }
        }

        cycles
    }

    /// Step PPU and APU for the given number of CPU cycles.
    fn step_components(&mut self, cpu_cycles: u16) {
        for _ in 0..cpu_cycles {
            // Step PPU (3 dots per CPU cycle)
            self.bus.step_ppu();

            // Step APU (1:1 with CPU)
            if let Some(sample) = self.bus.step_apu() {
                self.audio_buffer.push(sample);
            }
        }
    }

    /// Run emulation for one frame (approximately 29,780 CPU cycles).
    ///
    /// Returns the actual number of CPU cycles executed.
    pub fn step_frame(&mut self) -> u64 {
        let start_cycles = self.total_cycles;
        let target_cycles = self.total_cycles + u64::from(timing::CPU_CYCLES_PER_FRAME);

        while self.total_cycles < target_cycles && self.running {
            self.step();
        }

        // Copy PPU framebuffer
        self.update_framebuffer();
        self.frame_count += 1;

        self.total_cycles - start_cycles
    }

    /// Run emulation for one frame with cycle-accurate timing.
    ///
    /// This is an alias for `step_frame()` for API compatibility.
    /// Returns the actual number of CPU cycles executed.
    pub fn step_frame_accurate(&mut self) -> u64 {
        self.step_frame()
    }

    /// Update the framebuffer from PPU output.
    fn update_framebuffer(&mut self) {
        let ppu_buffer = self.bus.ppu.frame_buffer();

        // Convert PPU palette indices to RGBA
        for (i, &palette_idx) in ppu_buffer.iter().enumerate() {
            let rgb = crate::palette::NES_PALETTE[palette_idx as usize & 0x3F];
            let offset = i * 4;
            self.framebuffer[offset] = rgb.0; // R
            self.framebuffer[offset + 1] = rgb.1; // G
            self.framebuffer[offset + 2] = rgb.2; // B
            self.framebuffer[offset + 3] = 255; // A
        }
    }

    /// Get the current framebuffer (256x240 RGBA).
    #[must_use]
    pub fn framebuffer(&self) -> &[u8] {
        &self.framebuffer
    }

    /// Take the audio buffer (drains accumulated samples).
    pub fn take_audio(&mut self) -> Vec<f32> {
        core::mem::take(&mut self.audio_buffer)
    }

    /// Get the audio buffer without draining.
    #[must_use]
    pub fn audio_buffer(&self) -> &[f32] {
        &self.audio_buffer
    }

    /// Get audio samples (alias for `audio_buffer`).
    #[must_use]
    pub fn audio_samples(&self) -> &[f32] {
        &self.audio_buffer
    }

    /// Clear the audio sample buffer.
    pub fn clear_audio_samples(&mut self) {
        self.audio_buffer.clear();
    }

    /// Set controller 1 state from button byte.
    pub fn set_controller_1(&mut self, buttons: u8) {
        self.bus.controller1 = ControllerState { buttons };
    }

    /// Set controller 2 state from button byte.
    pub fn set_controller_2(&mut self, buttons: u8) {
        self.bus.controller2 = ControllerState { buttons };
    }

    /// Set a single logical button's state on one of the two controllers.
    ///
    /// This mirrors the hardware-level contract: external input mapping feeds
    /// individual button transitions rather than replacing the whole state
    /// byte. `controller` selects port 1 or 2; any other value is a no-op.
    pub fn set_button_state(&mut self, controller: u8, button: crate::input::Button, down: bool) {
        let state = match controller {
            1 => &mut self.bus.controller1,
            2 => &mut self.bus.controller2,
            _ => return,
        };

        let mask = button as u8;
        if down {
            state.buttons |= mask;
        } else {
            state.buttons &= !mask;
        }
    }

    /// Set controller 1 state.
    pub fn set_controller1(&mut self, state: ControllerState) {
        self.bus.controller1 = state;
    }

    /// Set controller 2 state.
    pub fn set_controller2(&mut self, state: ControllerState) {
        self.bus.controller2 = state;
    }

    /// Get controller 1 state.
    #[must_use]
    pub fn controller1(&self) -> ControllerState {
        self.bus.controller1
    }

    /// Get controller 2 state.
    #[must_use]
    pub fn controller2(&self) -> ControllerState {
        self.bus.controller2
    }

    /// Get the total CPU cycles executed.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Get the frame count.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Check if emulation is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Pause emulation.
    pub fn pause(&mut self) {
        self.running = false;
    }

    /// Resume emulation.
    pub fn resume(&mut self) {
        self.running = true;
    }

    /// Get a reference to the CPU for debugging.
    #[must_use]
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Get a reference to the PPU for debugging.
    #[must_use]
    pub fn ppu(&self) -> &rustynes_ppu::Ppu {
        &self.bus.ppu
    }

    /// Get a reference to the APU for debugging.
    #[must_use]
    pub fn apu(&self) -> &rustynes_apu::Apu {
        &self.bus.apu
    }

    /// Get the total CPU cycles (alias for `total_cycles`).
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Peek at memory without side effects.
    ///
    /// This is useful for debugging/display purposes where we don't want
    /// to trigger PPU register side effects or mapper state changes.
    #[must_use]
    pub fn peek_memory(&self, addr: u16) -> u8 {
        self.bus.peek(addr)
    }

    /// Get a reference to the bus for debugging.
    #[must_use]
    pub fn bus(&self) -> &NesBus {
        &self.bus
    }

    /// Get a mutable reference to the bus.
    pub fn bus_mut(&mut self) -> &mut NesBus {
        &mut self.bus
    }

    /// Get the mapper number.
    #[must_use]
    pub fn mapper_number(&self) -> u16 {
        self.bus.mapper.mapper_number()
    }

    /// Get the mapper name.
    #[must_use]
    pub fn mapper_name(&self) -> &'static str {
        self.bus.mapper.mapper_name()
    }

    /// Check if the ROM has battery-backed RAM.
    #[must_use]
    pub fn has_battery(&self) -> bool {
        self.bus.mapper.has_battery()
    }

    /// Get battery-backed RAM for saving.
    #[must_use]
    pub fn battery_ram(&self) -> Option<&[u8]> {
        self.bus.mapper.battery_ram()
    }

    /// Load battery-backed RAM.
    pub fn load_battery_ram(&mut self, data: &[u8]) {
        self.bus.mapper.set_battery_ram(data);
    }
}

#[cfg(all(feature = "serde", feature = "std"))]
impl Console {
    /// Serialize the complete mutable emulator state into a save-state
    /// container.
    ///
    /// Sections are written in a fixed order (CPU, PPU, APU, BUS, MAPPER);
    /// the PPU section carries its registers, `v`/`t`/`x`/`w`, read buffer,
    /// VRAM, OAM, palette RAM, and timing counters, but not the framebuffer,
    /// which holds no state the next frame doesn't overwrite. The
    /// frame-pacing clock (`frame_count`) is likewise not persisted.
    #[must_use]
    pub fn save_state(&self) -> Vec<u8> {
        use crate::save_state::{encode, section};

        encode(&[
            (section::CPU, self.cpu.save_state()),
            (section::PPU, self.bus.ppu.save_state()),
            (section::APU, self.bus.apu.save_state()),
            (section::BUS, self.bus.ram.to_vec()),
            (section::MAPPER, self.bus.mapper.save_state()),
        ])
    }

    /// Restore emulator state from a container produced by [`Console::save_state`].
    ///
    /// The container is fully parsed - magic, version, and every section's
    /// declared length checked against the remaining bytes - before any
    /// section is applied, so a truncated or mis-versioned file never
    /// touches the running console. Sections then apply in the fixed order
    /// CPU, PPU, APU, BUS, MAPPER; immediately after the PPU section
    /// applies, `normalize_after_load` moves the scanline/dot to the start
    /// of the pre-render line and clears the in-flight background/sprite
    /// pipeline state, without touching VRAM, OAM, or palette RAM. Unknown
    /// section tags (from a newer container) are silently skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::StateVersionMismatch`] if the container's
    /// magic matches but the version doesn't, or
    /// [`ConsoleError::StateCorrupt`] if the container is malformed, a
    /// mandatory section is missing, or a section's payload doesn't decode
    /// for this ROM's mapper.
    pub fn load_state(&mut self, data: &[u8]) -> Result<(), ConsoleError> {
        use crate::save_state::{decode, require_section, section};

        let sections = decode(data)?;

        let cpu_bytes = require_section(&sections, section::CPU, "CPU")?;
        let ppu_bytes = require_section(&sections, section::PPU, "PPU")?;
        let apu_bytes = require_section(&sections, section::APU, "APU")?;
        let bus_bytes = require_section(&sections, section::BUS, "BUS")?;
        let mapper_bytes = require_section(&sections, section::MAPPER, "MAPPER")?;

        self.cpu
            .load_state(cpu_bytes)
            .map_err(|e| ConsoleError::StateCorrupt(e.to_string()))?;
        self.bus
            .ppu
            .load_state(ppu_bytes)
            .map_err(|e| ConsoleError::StateCorrupt(e.to_string()))?;
        self.bus.ppu.normalize_after_load();
        self.bus
            .apu
            .load_state(apu_bytes)
            .map_err(|e| ConsoleError::StateCorrupt(e.to_string()))?;
        if bus_bytes.len() == self.bus.ram.len() {
            self.bus.ram.copy_from_slice(bus_bytes);
        } else {
            return Err(ConsoleError::StateCorrupt(format!(
                "BUS section is {} bytes, expected {}",
                bus_bytes.len(),
                self.bus.ram.len()
            )));
        }
        self.bus
            .mapper
            .load_state(mapper_bytes)
            .map_err(|e| ConsoleError::StateCorrupt(e.to_string()))?;

        Ok(())
    }

    /// Save the current state to `path`, atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::StateIoError`] on any file system failure.
    pub fn save_state_to_file(&self, path: &std::path::Path) -> Result<(), ConsoleError> {
        crate::save_state::write_atomic(path, &self.save_state())
            .map_err(|e| ConsoleError::StateIoError(e.to_string()))
    }

    /// Load state from `path`, a file previously written by
    /// [`Console::save_state_to_file`].
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::StateIoError`] if the file can't be read, or
    /// any error [`Console::load_state`] can return.
    pub fn load_state_from_file(&mut self, path: &std::path::Path) -> Result<(), ConsoleError> {
        let data =
            std::fs::read(path).map_err(|e| ConsoleError::StateIoError(e.to_string()))?;
        self.load_state(&data)
    }

    /// Write the mapper's PRG-RAM to `path`, atomically.
    ///
    /// A no-op (returns `Ok`) if the mapper has no battery-backed RAM: there
    /// is nothing worth persisting, and callers that autosave on every ROM
    /// close shouldn't need to special-case cartridges without one.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::BatteryIoError`] on any file system failure.
    pub fn save_battery_to_file(&self, path: &std::path::Path) -> Result<(), ConsoleError> {
        let Some(ram) = self.battery_ram() else {
            return Ok(());
        };
        crate::save_state::write_atomic(path, ram)
            .map_err(|e| ConsoleError::BatteryIoError(e.to_string()))
    }

    /// Load PRG-RAM previously written by [`Console::save_battery_to_file`].
    ///
    /// A no-op if `path` doesn't exist (a first-ever run of a battery-backed
    /// game has no prior save yet).
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::BatteryIoError`] on any file system failure
    /// other than the file being absent.
    pub fn load_battery_from_file(&mut self, path: &std::path::Path) -> Result<(), ConsoleError> {
        match std::fs::read(path) {
            Ok(data) => {
                self.load_battery_ram(&data);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConsoleError::BatteryIoError(e.to_string())),
        }
    }

    /// Dump the current frame as a grayscale P3 PPM, for diagnostic use.
    ///
    /// Each pixel is the PPU's raw 0..63 master palette index times 17
    /// (`0..=63 -> 0..=1071`, clamped to a byte), not the final RGB color -
    /// useful for eyeballing palette-index output independent of the RGB
    /// palette table.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::StateIoError`] on any file system failure.
    pub fn dump_background_ppm(&self, path: &std::path::Path) -> Result<(), ConsoleError> {
        use std::fmt::Write as _;

        let indices = self.bus.ppu.frame_buffer();
        let mut out = String::with_capacity(indices.len() * 4 + 32);
        let _ = writeln!(out, "P3");
        let _ = writeln!(out, "256 240");
        let _ = writeln!(out, "255");
        for row in indices.chunks(256) {
            let mut line = String::with_capacity(row.len() * 4);
            for &idx in row {
                let gray = u16::from(idx & 0x3F) * 17;
                let gray = gray.min(255);
                let _ = write!(line, "{gray} {gray} {gray} ");
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }

        std::fs::write(path, out).map_err(|e| ConsoleError::StateIoError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustynes_mappers::{Mirroring, Nrom, RomHeader};

    #[cfg(not(feature = "std"))]
    use alloc::{boxed::Box, vec, vec::Vec};

    fn create_test_console() -> Console {
        let rom = Rom {
            header: RomHeader {
                prg_rom_size: 32768,
                chr_rom_size: 8192,
                mapper_number: 0,
                submapper: 0,
                prg_ram_size: 0,
                prg_nvram_size: 0,
                chr_ram_size: 0,
                chr_nvram_size: 0,
                mirroring: Mirroring::Vertical,
                has_battery: false,
                has_trainer: false,
                nes2_format: false,
            },
            // Simple program: NOP loop at $8000
            prg_rom: {
                let mut prg = vec![0xEA; 32768]; // Fill with NOPs
                // Reset vector at $FFFC points to $8000
                prg[0x7FFC] = 0x00;
                prg[0x7FFD] = 0x80;
                prg
            },
            chr_rom: vec![0; 8192],
            trainer: None,
        };
        Console::with_mapper(Box::new(Nrom::new(&rom))).unwrap()
    }

    #[test]
    fn test_console_creation() {
        let console = create_test_console();
        assert_eq!(console.mapper_number(), 0);
        assert_eq!(console.mapper_name(), "NROM");
    }

    #[test]
    fn test_console_step() {
        let mut console = create_test_console();
        console.reset();

        let cycles = console.step();
        assert!(cycles > 0);
        assert!(console.total_cycles() > 0);
    }

    #[test]
    fn test_console_framebuffer() {
        let console = create_test_console();
        let fb = console.framebuffer();
        assert_eq!(fb.len(), 256 * 240 * 4);
    }

    #[test]
    fn test_console_pause_resume() {
        let mut console = create_test_console();
        assert!(console.is_running());

        console.pause();
        assert!(!console.is_running());

        console.resume();
        assert!(console.is_running());
    }

    #[test]
    fn test_controller_state() {
        let mut console = create_test_console();

        let state = ControllerState {
            buttons: ControllerState::A | ControllerState::START,
        };
        console.set_controller1(state);

        assert_eq!(console.controller1().buttons, 0x09);
    }

    #[test]
    fn test_console_reset() {
        let mut console = create_test_console();

        // Run some cycles
        for _ in 0..100 {
            console.step();
        }

        let cycles_before = console.total_cycles();
        assert!(cycles_before > 0);

        console.reset();
        assert_eq!(console.total_cycles(), 0);
    }
}

#[cfg(all(test, feature = "serde", feature = "std"))]
mod file_io_tests {
    use super::*;
    use rustynes_mappers::{Mirroring, Mmc1, RomHeader};

    fn create_test_console() -> Console {
        let rom = Rom {
            header: RomHeader {
                prg_rom_size: 32768,
                chr_rom_size: 8192,
                mapper_number: 1,
                submapper: 0,
                prg_ram_size: 8192,
                prg_nvram_size: 0,
                chr_ram_size: 0,
                chr_nvram_size: 0,
                mirroring: Mirroring::Vertical,
                has_battery: false,
                has_trainer: false,
                nes2_format: false,
            },
            prg_rom: {
                let mut prg = vec![0xEA; 32768];
                prg[0x7FFC] = 0x00;
                prg[0x7FFD] = 0x80;
                prg
            },
            chr_rom: vec![0; 8192],
            trainer: None,
        };
        Console::with_mapper(Box::new(Mmc1::new(&rom))).unwrap()
    }

    fn create_battery_backed_console() -> Console {
        let rom = Rom {
            header: RomHeader {
                prg_rom_size: 32768,
                chr_rom_size: 8192,
                mapper_number: 1,
                submapper: 0,
                prg_ram_size: 8192,
                prg_nvram_size: 0,
                chr_ram_size: 0,
                chr_nvram_size: 0,
                mirroring: Mirroring::Vertical,
                has_battery: true,
                has_trainer: false,
                nes2_format: false,
            },
            prg_rom: {
                let mut prg = vec![0xEA; 32768];
                prg[0x7FFC] = 0x00;
                prg[0x7FFD] = 0x80;
                prg
            },
            chr_rom: vec![0; 8192],
            trainer: None,
        };
        Console::with_mapper(Box::new(Mmc1::new(&rom))).unwrap()
    }

    #[test]
    fn save_state_to_file_then_load_state_from_file_round_trips() {
        let mut console = create_test_console();
        console.power_on();
        for _ in 0..50 {
            console.step();
        }
        let cycles_before = console.total_cycles();
        let pc_before = console.cpu().pc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot1.sav");
        console.save_state_to_file(&path).unwrap();

        let mut restored = create_test_console();
        restored.power_on();
        restored.load_state_from_file(&path).unwrap();

        assert_eq!(restored.total_cycles(), cycles_before);
        assert_eq!(restored.cpu().pc, pc_before);
    }

    #[test]
    fn load_state_from_file_reports_io_error_for_missing_file() {
        let mut console = create_test_console();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.sav");

        assert!(matches!(
            console.load_state_from_file(&path),
            Err(ConsoleError::StateIoError(_))
        ));
    }

    #[test]
    fn save_battery_to_file_is_a_no_op_without_battery_ram() {
        let console = create_test_console();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-battery.sav");

        console.save_battery_to_file(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn save_battery_to_file_then_load_battery_from_file_round_trips() {
        let mut console = create_battery_backed_console();
        let pattern: Vec<u8> = (0..8192).map(|i| (i % 256) as u8).collect();
        console.load_battery_ram(&pattern);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("battery.sav");
        console.save_battery_to_file(&path).unwrap();

        let mut restored = create_battery_backed_console();
        restored.load_battery_from_file(&path).unwrap();

        assert_eq!(restored.battery_ram().unwrap(), console.battery_ram().unwrap());
    }

    #[test]
    fn load_battery_from_file_is_a_no_op_when_file_is_absent() {
        let mut console = create_battery_backed_console();
        let before = console.battery_ram().unwrap().to_vec();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-written.sav");
        console.load_battery_from_file(&path).unwrap();

        assert_eq!(console.battery_ram().unwrap(), &before[..]);
    }

    #[test]
    fn dump_background_ppm_writes_a_valid_p3_header() {
        let console = create_test_console();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.ppm");

        console.dump_background_ppm(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("P3"));
        assert_eq!(lines.next(), Some("256 240"));
        assert_eq!(lines.next(), Some("255"));
        assert_eq!(contents.lines().count(), 3 + 240);
    }
}

//! Dotmatrix: a Game Boy (SM83) CPU interpreter core written in Rust.
//!
//! Implements the processor at the heart of the DMG as documented in the
//! [Pan Docs](https://gbdev.io/pandocs/CPU_Registers_and_Flags.html): eight
//! 8-bit registers with four 16-bit paired views, the ZNHC flag nibble, and
//! the full non-prefixed [instruction set](https://gbdev.io/gb-opcodes/optables/)
//! over a byte-addressable memory bus.
//!
//! Everything outside the processor — PPU, APU, cartridge mapping, timers,
//! interrupt dispatch — lives behind the [`bus::Bus`] trait and is the
//! embedder's business.
//!
//! ## Modules
//!
//! - **bus** – the 64KiB [memory map](https://gbdev.io/pandocs/Memory_Map.html)
//!   interface the CPU drives; little-endian 16-bit composite access
//! - **cpu** – SM83 register file, flags, opcode table, fetch-decode-execute loop

pub mod bus;
pub mod cpu;

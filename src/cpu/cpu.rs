//! SM83 fetch-decode-execute loop and instruction handlers.
//!
//! The CPU is generic over the [`Bus`] so the embedder decides what backs
//! each address (cartridge, RAM, I/O ports). One `step()` executes exactly
//! one instruction; interrupts, timers, and wake-from-halt are driven
//! externally between steps.

use ansi_term::Colour::Green;
use thiserror::Error;

use crate::{
    bus::Bus,
    cpu::{
        decode::{decode, Cond, Dst8, Op, Reg16, Src8},
        flags::{FLAG_CARRY, FLAG_HALF_CARRY, FLAG_SUBTRACT, FLAG_ZERO},
        registers::{Pair, Reg, Registers},
    },
};

/// Fetched an opcode byte with no assigned handler.
///
/// Carries the failing byte and the PC it was fetched from. The step that
/// raised it applied no effects — PC is restored to the fetch address, so
/// stepping again re-raises until the caller resets or rewrites state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid opcode ${opcode:02X} at ${pc:04X}")]
pub struct InvalidOpcode {
    pub opcode: u8,
    pub pc: u16,
}

pub struct Cpu<B: Bus> {
    pub regs: Registers,
    pub pc: u16,
    pub sp: u16,
    /// Interrupt master enable latch. DI/EI/RETI write it; the core never
    /// dispatches interrupts itself — that is the embedder's job between
    /// steps.
    pub ime: bool,
    /// Set by HALT/STOP. A halted core idles in `step()` until the embedder
    /// clears the latch (or resets).
    pub halted: bool,
    pub cycles: usize,
    /// Print one trace line per executed instruction.
    pub trace: bool,
    pub bus: B,
}

impl<B: Bus> Cpu<B> {
    pub fn new(bus: B) -> Cpu<B> {
        Cpu {
            regs: Registers::new(),
            pc: 0,
            sp: 0,
            ime: false,
            halted: false,
            cycles: 0,
            trace: false,
            bus,
        }
    }

    /// Zero the whole machine: registers, flags, PC, SP, latches, cycle
    /// count. Memory is untouched; it belongs to the bus owner.
    pub fn reset(&mut self) {
        self.regs = Registers::new();
        self.pc = 0;
        self.sp = 0;
        self.ime = false;
        self.halted = false;
        self.cycles = 0;
    }

    /// DMG post-boot register state. Registers only; the boot ROM's I/O
    /// writes are the bus owner's business.
    /// <http://bgb.bircd.org/pandocs.htm#powerupsequence>
    pub fn power_up(&mut self) {
        self.regs.set16(Pair::AF, 0x01B0);
        self.regs.set16(Pair::BC, 0x0013);
        self.regs.set16(Pair::DE, 0x00D8);
        self.regs.set16(Pair::HL, 0x014D);
        self.sp = 0xFFFE;
        self.pc = 0x0100;
        self.ime = false;
        self.halted = false;
    }

    /// Execute one instruction and return its cycle cost.
    ///
    /// Fetches the opcode at PC, advances PC past it, and dispatches; the
    /// handler fetches any operand bytes itself, so PC ends up past the full
    /// encoding. An unassigned opcode applies no effects and returns
    /// [`InvalidOpcode`].
    pub fn step(&mut self) -> Result<usize, InvalidOpcode> {
        if self.halted {
            // A halted core keeps ticking without touching machine state.
            self.cycles += 4;
            return Ok(4);
        }

        let start = self.pc;
        let opcode = self.fetch_byte();
        let inst = decode(opcode);

        if self.trace {
            self.trace_line(start, opcode);
        }

        if inst.op == Op::Invalid {
            // Undo the opcode fetch so the machine is exactly as it was
            // before the step.
            self.pc = start;
            return Err(InvalidOpcode { opcode, pc: start });
        }

        let before = self.cycles;
        self.cycles += inst.cycles;
        self.execute(inst.op);
        Ok(self.cycles - before)
    }

    fn execute(&mut self, op: Op) {
        match op {
            // step() returns before dispatching the invalid sentinel.
            Op::Invalid => unreachable!("invalid opcode reached execute"),
            Op::Nop => {}
            Op::Stop => self.stop(),
            Op::Halt => self.halted = true,
            Op::DisableInterrupts => self.ime = false,
            Op::EnableInterrupts => self.ime = true,
            Op::Ld8(dst, src) => {
                let value = self.read_src8(src);
                self.write_dst8(dst, value);
            }
            Op::Ld16Imm(rr) => {
                let value = self.fetch_word();
                self.set_wide(rr, value);
            }
            Op::StoreSp => {
                let addr = self.fetch_word();
                let sp = self.sp;
                self.bus.write16(addr, sp);
            }
            Op::LdSpHl => self.sp = self.regs.get16(Pair::HL),
            Op::LdHlSpOffset => {
                let value = self.sp_plus_offset();
                self.regs.set16(Pair::HL, value);
            }
            Op::Inc8(loc) => self.inc8(loc),
            Op::Dec8(loc) => self.dec8(loc),
            Op::Add(src) => {
                let value = self.read_src8(src);
                self.add(value, false);
            }
            Op::Adc(src) => {
                let value = self.read_src8(src);
                self.add(value, true);
            }
            Op::Sub(src) => {
                let value = self.read_src8(src);
                let result = self.sub(value, false);
                self.regs.set8(Reg::A, result);
            }
            Op::Sbc(src) => {
                let value = self.read_src8(src);
                let result = self.sub(value, true);
                self.regs.set8(Reg::A, result);
            }
            Op::And(src) => {
                let value = self.read_src8(src);
                self.and(value);
            }
            Op::Xor(src) => {
                let value = self.read_src8(src);
                self.xor(value);
            }
            Op::Or(src) => {
                let value = self.read_src8(src);
                self.or(value);
            }
            Op::Cp(src) => {
                // SUB flags without storing the result.
                let value = self.read_src8(src);
                self.sub(value, false);
            }
            Op::AddHl(rr) => self.add_hl(rr),
            Op::AddSpOffset => self.sp = self.sp_plus_offset(),
            Op::Inc16(rr) => {
                let value = self.wide(rr).wrapping_add(1);
                self.set_wide(rr, value);
            }
            Op::Dec16(rr) => {
                let value = self.wide(rr).wrapping_sub(1);
                self.set_wide(rr, value);
            }
            Op::Push(pair) => {
                let value = self.regs.get16(pair);
                self.push16(value);
            }
            Op::Pop(pair) => {
                let value = self.pop16();
                self.regs.set16(pair, value);
            }
            Op::Jp(cond) => self.jp(cond),
            Op::JpHl => self.pc = self.regs.get16(Pair::HL),
            Op::Jr(cond) => self.jr(cond),
            Op::Call(cond) => self.call(cond),
            Op::Ret(cond) => self.ret(cond),
            Op::Reti => {
                self.pc = self.pop16();
                self.ime = true;
            }
            Op::Rst(vector) => {
                let pc = self.pc;
                self.push16(pc);
                self.pc = vector as u16;
            }
            Op::Rlca => self.rlca(),
            Op::Rla => self.rla(),
            Op::Rrca => self.rrca(),
            Op::Rra => self.rra(),
            Op::Daa => self.daa(),
            Op::Cpl => self.cpl(),
            Op::Scf => self.scf(),
            Op::Ccf => self.ccf(),
        }
    }

    fn fetch_byte(&mut self) -> u8 {
        let byte = self.bus.read8(self.pc);
        self.pc = self.pc.wrapping_add(1);
        byte
    }

    fn fetch_word(&mut self) -> u16 {
        let lo = self.fetch_byte() as u16;
        let hi = self.fetch_byte() as u16;
        (hi << 8) | lo
    }

    /// Resolve a source operand against the state at this moment: register
    /// contents, (HL) and friends, or bytes fetched at the current PC.
    fn read_src8(&mut self, src: Src8) -> u8 {
        match src {
            Src8::Reg(r) => self.regs.get8(r),
            Src8::Imm => self.fetch_byte(),
            Src8::HlInd => {
                let addr = self.regs.get16(Pair::HL);
                self.bus.read8(addr)
            }
            Src8::BcInd => {
                let addr = self.regs.get16(Pair::BC);
                self.bus.read8(addr)
            }
            Src8::DeInd => {
                let addr = self.regs.get16(Pair::DE);
                self.bus.read8(addr)
            }
            Src8::HliInd => {
                let addr = self.regs.get16(Pair::HL);
                self.regs.set16(Pair::HL, addr.wrapping_add(1));
                self.bus.read8(addr)
            }
            Src8::HldInd => {
                let addr = self.regs.get16(Pair::HL);
                self.regs.set16(Pair::HL, addr.wrapping_sub(1));
                self.bus.read8(addr)
            }
            Src8::Abs => {
                let addr = self.fetch_word();
                self.bus.read8(addr)
            }
            Src8::High => {
                let offset = self.fetch_byte();
                self.bus.read8(0xFF00 | offset as u16)
            }
            Src8::HighC => {
                let offset = self.regs.get8(Reg::C);
                self.bus.read8(0xFF00 | offset as u16)
            }
        }
    }

    fn write_dst8(&mut self, dst: Dst8, value: u8) {
        match dst {
            Dst8::Reg(r) => self.regs.set8(r, value),
            Dst8::HlInd => {
                let addr = self.regs.get16(Pair::HL);
                self.bus.write8(addr, value);
            }
            Dst8::BcInd => {
                let addr = self.regs.get16(Pair::BC);
                self.bus.write8(addr, value);
            }
            Dst8::DeInd => {
                let addr = self.regs.get16(Pair::DE);
                self.bus.write8(addr, value);
            }
            Dst8::HliInd => {
                let addr = self.regs.get16(Pair::HL);
                self.regs.set16(Pair::HL, addr.wrapping_add(1));
                self.bus.write8(addr, value);
            }
            Dst8::HldInd => {
                let addr = self.regs.get16(Pair::HL);
                self.regs.set16(Pair::HL, addr.wrapping_sub(1));
                self.bus.write8(addr, value);
            }
            Dst8::Abs => {
                let addr = self.fetch_word();
                self.bus.write8(addr, value);
            }
            Dst8::High => {
                let offset = self.fetch_byte();
                self.bus.write8(0xFF00 | offset as u16, value);
            }
            Dst8::HighC => {
                let offset = self.regs.get8(Reg::C);
                self.bus.write8(0xFF00 | offset as u16, value);
            }
        }
    }

    /// Read back a read-modify-write target (INC/DEC only touch registers
    /// and (HL)).
    fn read_loc8(&mut self, loc: Dst8) -> u8 {
        match loc {
            Dst8::Reg(r) => self.regs.get8(r),
            Dst8::HlInd => {
                let addr = self.regs.get16(Pair::HL);
                self.bus.read8(addr)
            }
            _ => unreachable!("no read-modify-write on {:?}", loc),
        }
    }

    fn add(&mut self, value: u8, with_carry: bool) {
        let a = self.regs.get8(Reg::A);
        let carry = (with_carry && self.regs.flag(FLAG_CARRY)) as u8;
        let result = a.wrapping_add(value).wrapping_add(carry);
        self.regs.set_flag(FLAG_ZERO, result == 0);
        self.regs.set_flag(FLAG_SUBTRACT, false);
        self.regs
            .set_flag(FLAG_HALF_CARRY, (a & 0x0F) + (value & 0x0F) + carry > 0x0F);
        self.regs.set_flag(
            FLAG_CARRY,
            (a as u16) + (value as u16) + (carry as u16) > 0xFF,
        );
        self.regs.set8(Reg::A, result);
    }

    /// SUB/SBC/CP flag computation; the caller decides whether the result
    /// is stored (CP discards it).
    fn sub(&mut self, value: u8, with_carry: bool) -> u8 {
        let a = self.regs.get8(Reg::A);
        let carry = (with_carry && self.regs.flag(FLAG_CARRY)) as u8;
        let result = a.wrapping_sub(value).wrapping_sub(carry);
        self.regs.set_flag(FLAG_ZERO, result == 0);
        self.regs.set_flag(FLAG_SUBTRACT, true);
        self.regs.set_flag(
            FLAG_HALF_CARRY,
            (a & 0x0F) < (value & 0x0F) + carry,
        );
        self.regs
            .set_flag(FLAG_CARRY, (a as u16) < (value as u16) + (carry as u16));
        result
    }

    fn and(&mut self, value: u8) {
        let result = self.regs.get8(Reg::A) & value;
        self.regs.set_flag(FLAG_ZERO, result == 0);
        self.regs.set_flag(FLAG_SUBTRACT, false);
        self.regs.set_flag(FLAG_HALF_CARRY, true);
        self.regs.set_flag(FLAG_CARRY, false);
        self.regs.set8(Reg::A, result);
    }

    fn xor(&mut self, value: u8) {
        let result = self.regs.get8(Reg::A) ^ value;
        self.regs.set_flag(FLAG_ZERO, result == 0);
        self.regs.set_flag(FLAG_SUBTRACT, false);
        self.regs.set_flag(FLAG_HALF_CARRY, false);
        self.regs.set_flag(FLAG_CARRY, false);
        self.regs.set8(Reg::A, result);
    }

    fn or(&mut self, value: u8) {
        let result = self.regs.get8(Reg::A) | value;
        self.regs.set_flag(FLAG_ZERO, result == 0);
        self.regs.set_flag(FLAG_SUBTRACT, false);
        self.regs.set_flag(FLAG_HALF_CARRY, false);
        self.regs.set_flag(FLAG_CARRY, false);
        self.regs.set8(Reg::A, result);
    }

    // INC/DEC leave the carry flag alone so loop counters can run inside
    // multi-byte arithmetic without clobbering it.
    fn inc8(&mut self, loc: Dst8) {
        let value = self.read_loc8(loc);
        let result = value.wrapping_add(1);
        self.write_dst8(loc, result);
        self.regs.set_flag(FLAG_ZERO, result == 0);
        self.regs.set_flag(FLAG_SUBTRACT, false);
        self.regs.set_flag(FLAG_HALF_CARRY, (value & 0x0F) == 0x0F);
    }

    fn dec8(&mut self, loc: Dst8) {
        let value = self.read_loc8(loc);
        let result = value.wrapping_sub(1);
        self.write_dst8(loc, result);
        self.regs.set_flag(FLAG_ZERO, result == 0);
        self.regs.set_flag(FLAG_SUBTRACT, true);
        self.regs.set_flag(FLAG_HALF_CARRY, (value & 0x0F) == 0);
    }

    fn wide(&self, rr: Reg16) -> u16 {
        match rr {
            Reg16::BC => self.regs.get16(Pair::BC),
            Reg16::DE => self.regs.get16(Pair::DE),
            Reg16::HL => self.regs.get16(Pair::HL),
            Reg16::SP => self.sp,
        }
    }

    fn set_wide(&mut self, rr: Reg16, value: u16) {
        match rr {
            Reg16::BC => self.regs.set16(Pair::BC, value),
            Reg16::DE => self.regs.set16(Pair::DE, value),
            Reg16::HL => self.regs.set16(Pair::HL, value),
            Reg16::SP => self.sp = value,
        }
    }

    /// ADD HL,rr: H from bit 11, C from bit 15, Z untouched.
    fn add_hl(&mut self, rr: Reg16) {
        let hl = self.regs.get16(Pair::HL);
        let value = self.wide(rr);
        let (result, carry) = hl.overflowing_add(value);
        self.regs.set_flag(FLAG_SUBTRACT, false);
        self.regs
            .set_flag(FLAG_HALF_CARRY, (hl & 0x0FFF) + (value & 0x0FFF) > 0x0FFF);
        self.regs.set_flag(FLAG_CARRY, carry);
        self.regs.set16(Pair::HL, result);
    }

    /// SP + sign-extended e8, shared by ADD SP,e8 and LD HL,SP+e8.
    /// H and C come from the unsigned low-byte addition; Z and N are zero.
    fn sp_plus_offset(&mut self) -> u16 {
        let offset = self.fetch_byte() as i8 as i16 as u16;
        let sp = self.sp;
        self.regs.set_flag(FLAG_ZERO, false);
        self.regs.set_flag(FLAG_SUBTRACT, false);
        self.regs
            .set_flag(FLAG_HALF_CARRY, (sp & 0x0F) + (offset & 0x0F) > 0x0F);
        self.regs
            .set_flag(FLAG_CARRY, (sp & 0xFF) + (offset & 0xFF) > 0xFF);
        sp.wrapping_add(offset)
    }

    // Stack discipline: PUSH decrements before each write, so the high byte
    // lands at the higher address; POP reads low byte first. Exact inverses.
    fn push16(&mut self, value: u16) {
        self.sp = self.sp.wrapping_sub(1);
        self.bus.write8(self.sp, (value >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.bus.write8(self.sp, value as u8);
    }

    fn pop16(&mut self) -> u16 {
        let lo = self.bus.read8(self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        let hi = self.bus.read8(self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        (hi << 8) | lo
    }

    fn check(&self, cond: Cond) -> bool {
        match cond {
            Cond::Always => true,
            Cond::NotZero => !self.regs.flag(FLAG_ZERO),
            Cond::Zero => self.regs.flag(FLAG_ZERO),
            Cond::NotCarry => !self.regs.flag(FLAG_CARRY),
            Cond::Carry => self.regs.flag(FLAG_CARRY),
        }
    }

    /// Taken-path surcharge for the conditional forms; the unconditional
    /// forms already carry the full cost in their descriptor.
    fn taken_extra(&mut self, cond: Cond, cycles: usize) {
        if cond != Cond::Always {
            self.cycles += cycles;
        }
    }

    fn jp(&mut self, cond: Cond) {
        let addr = self.fetch_word();
        if self.check(cond) {
            self.pc = addr;
            self.taken_extra(cond, 4);
        }
    }

    fn jr(&mut self, cond: Cond) {
        // Offset is relative to the PC after the operand byte.
        let offset = self.fetch_byte() as i8;
        if self.check(cond) {
            self.pc = self.pc.wrapping_add(offset as u16);
            self.taken_extra(cond, 4);
        }
    }

    fn call(&mut self, cond: Cond) {
        let addr = self.fetch_word();
        if self.check(cond) {
            let pc = self.pc;
            self.push16(pc);
            self.pc = addr;
            self.taken_extra(cond, 12);
        }
    }

    fn ret(&mut self, cond: Cond) {
        if self.check(cond) {
            self.pc = self.pop16();
            self.taken_extra(cond, 12);
        }
    }

    // The non-prefixed rotates clear Z unconditionally, unlike their 0xCB
    // cousins.
    fn rotate_flags(&mut self, carry: bool) {
        self.regs.set_flag(FLAG_ZERO, false);
        self.regs.set_flag(FLAG_SUBTRACT, false);
        self.regs.set_flag(FLAG_HALF_CARRY, false);
        self.regs.set_flag(FLAG_CARRY, carry);
    }

    fn rlca(&mut self) {
        let a = self.regs.get8(Reg::A);
        self.rotate_flags(a & 0x80 != 0);
        self.regs.set8(Reg::A, a.rotate_left(1));
    }

    fn rla(&mut self) {
        let a = self.regs.get8(Reg::A);
        let carry_in = self.regs.flag(FLAG_CARRY) as u8;
        self.rotate_flags(a & 0x80 != 0);
        self.regs.set8(Reg::A, (a << 1) | carry_in);
    }

    fn rrca(&mut self) {
        let a = self.regs.get8(Reg::A);
        self.rotate_flags(a & 0x01 != 0);
        self.regs.set8(Reg::A, a.rotate_right(1));
    }

    fn rra(&mut self) {
        let a = self.regs.get8(Reg::A);
        let carry_in = self.regs.flag(FLAG_CARRY) as u8;
        self.rotate_flags(a & 0x01 != 0);
        self.regs.set8(Reg::A, (a >> 1) | (carry_in << 7));
    }

    /// Decimal-adjust A after BCD addition or subtraction.
    fn daa(&mut self) {
        let mut a = self.regs.get8(Reg::A);
        let mut carry = self.regs.flag(FLAG_CARRY);
        if !self.regs.flag(FLAG_SUBTRACT) {
            if carry || a > 0x99 {
                a = a.wrapping_add(0x60);
                carry = true;
            }
            if self.regs.flag(FLAG_HALF_CARRY) || (a & 0x0F) > 0x09 {
                a = a.wrapping_add(0x06);
            }
        } else {
            if carry {
                a = a.wrapping_sub(0x60);
            }
            if self.regs.flag(FLAG_HALF_CARRY) {
                a = a.wrapping_sub(0x06);
            }
        }
        self.regs.set_flag(FLAG_ZERO, a == 0);
        self.regs.set_flag(FLAG_HALF_CARRY, false);
        self.regs.set_flag(FLAG_CARRY, carry);
        self.regs.set8(Reg::A, a);
    }

    fn cpl(&mut self) {
        let a = self.regs.get8(Reg::A);
        self.regs.set8(Reg::A, !a);
        self.regs.set_flag(FLAG_SUBTRACT, true);
        self.regs.set_flag(FLAG_HALF_CARRY, true);
    }

    fn scf(&mut self) {
        self.regs.set_flag(FLAG_SUBTRACT, false);
        self.regs.set_flag(FLAG_HALF_CARRY, false);
        self.regs.set_flag(FLAG_CARRY, true);
    }

    fn ccf(&mut self) {
        let carry = self.regs.flag(FLAG_CARRY);
        self.regs.set_flag(FLAG_SUBTRACT, false);
        self.regs.set_flag(FLAG_HALF_CARRY, false);
        self.regs.set_flag(FLAG_CARRY, !carry);
    }

    fn stop(&mut self) {
        // STOP is encoded with a padding byte; consume it so PC lands past
        // the full encoding. Waking is the embedder's business.
        let _ = self.fetch_byte();
        self.halted = true;
    }

    fn trace_line(&self, pc: u16, opcode: u8) {
        println!(
            "{:04X}  {:02X}        A:{:02X} F:{:02X} B:{:02X} C:{:02X} D:{:02X} E:{:02X} H:{:02X} L:{:02X} SP:{:04X} CYC:{}",
            pc,
            opcode,
            self.regs.get8(Reg::A),
            self.regs.get8(Reg::F),
            self.regs.get8(Reg::B),
            self.regs.get8(Reg::C),
            self.regs.get8(Reg::D),
            self.regs.get8(Reg::E),
            self.regs.get8(Reg::H),
            self.regs.get8(Reg::L),
            self.sp,
            self.cycles
        );
    }

    /// Print the full machine state, debugger style.
    pub fn dump_registers(&self) {
        println!("{} register dump", Green.bold().paint("INFO"));
        println!(
            "A = {:02X}h\tB = {:02X}h\tD = {:02X}h\tH = {:02X}h",
            self.regs.get8(Reg::A),
            self.regs.get8(Reg::B),
            self.regs.get8(Reg::D),
            self.regs.get8(Reg::H),
        );
        println!(
            "F = {:02X}h\tC = {:02X}h\tE = {:02X}h\tL = {:02X}h",
            self.regs.get8(Reg::F),
            self.regs.get8(Reg::C),
            self.regs.get8(Reg::E),
            self.regs.get8(Reg::L),
        );
        println!("PC= {:04X}h\tSP= {:04X}h", self.pc, self.sp);
        println!(
            "Z = {} N = {} H = {} C = {}",
            self.regs.flag(FLAG_ZERO) as u8,
            self.regs.flag(FLAG_SUBTRACT) as u8,
            self.regs.flag(FLAG_HALF_CARRY) as u8,
            self.regs.flag(FLAG_CARRY) as u8,
        );
    }
}

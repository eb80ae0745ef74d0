//! Opcode decoding: one immutable descriptor per opcode value.
//!
//! The table is built once and read-only thereafter. Descriptors carry only
//! static operand identifiers (register and addressing-mode tags); anything
//! that depends on runtime register or memory contents is resolved by the
//! handler at execution time, once per invocation.

use lazy_static::lazy_static;

use crate::cpu::registers::{Pair, Reg};

/// 8-bit operand source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Src8 {
    /// Register r.
    Reg(Reg),
    /// Immediate byte following the opcode.
    Imm,
    /// Byte at (HL).
    HlInd,
    /// Byte at (BC).
    BcInd,
    /// Byte at (DE).
    DeInd,
    /// Byte at (HL), HL incremented after the access.
    HliInd,
    /// Byte at (HL), HL decremented after the access.
    HldInd,
    /// Byte at (nn), 16-bit immediate address.
    Abs,
    /// Byte at 0xFF00 + n8 (I/O window).
    High,
    /// Byte at 0xFF00 + C.
    HighC,
}

/// 8-bit operand destination. Same shapes as [`Src8`] minus the immediate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dst8 {
    Reg(Reg),
    HlInd,
    BcInd,
    DeInd,
    HliInd,
    HldInd,
    Abs,
    High,
    HighC,
}

/// 16-bit operand for immediate loads, INC/DEC rr, and ADD HL,rr.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reg16 {
    BC,
    DE,
    HL,
    SP,
}

/// Branch condition for JP/JR/CALL/RET.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    Always,
    NotZero,
    Zero,
    NotCarry,
    Carry,
}

/// How a load resolves its source and destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrMode {
    /// Immediate or memory byte into a register.
    ImmediateToRegister,
    /// Register byte into a memory destination.
    RegisterToImmediate,
    /// Direct register copy.
    RegisterToRegister,
    /// Memory byte to memory byte (LD (HL),n8).
    ImmediateToImmediate,
    /// No byte-operand traffic (control flow, stack, misc).
    Implied,
}

/// Operation selected by an opcode, with its static operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Op {
    Invalid,
    Nop,
    Stop,
    Halt,
    DisableInterrupts,
    EnableInterrupts,
    Ld8(Dst8, Src8),
    /// LD rr,nn
    Ld16Imm(Reg16),
    /// LD (nn),SP
    StoreSp,
    /// LD SP,HL
    LdSpHl,
    /// LD HL,SP+e8
    LdHlSpOffset,
    Inc8(Dst8),
    Dec8(Dst8),
    Add(Src8),
    Adc(Src8),
    Sub(Src8),
    Sbc(Src8),
    And(Src8),
    Xor(Src8),
    Or(Src8),
    Cp(Src8),
    AddHl(Reg16),
    /// ADD SP,e8
    AddSpOffset,
    Inc16(Reg16),
    Dec16(Reg16),
    Push(Pair),
    Pop(Pair),
    Jp(Cond),
    JpHl,
    Jr(Cond),
    Call(Cond),
    Ret(Cond),
    Reti,
    /// Restart: push PC, jump to the vector 0x00..0x38.
    Rst(u8),
    Rlca,
    Rla,
    Rrca,
    Rra,
    Daa,
    Cpl,
    Scf,
    Ccf,
}

/// Immutable descriptor for one opcode value.
#[derive(Clone, Copy, Debug)]
pub struct Instruction {
    pub opcode: u8,
    pub(crate) op: Op,
    pub mode: AddrMode,
    /// Operand bytes following the opcode (0-2).
    pub operands: u8,
    /// Base cost in t-cycles; conditional branches add their taken-path
    /// extra at execution time.
    pub cycles: usize,
}

/// Resolve a fetched opcode byte to its descriptor, O(1).
pub fn decode(opcode: u8) -> &'static Instruction {
    &OPCODES[opcode as usize]
}

// Operand order b,c,d,e,h,l,(hl),a — the 3-bit encoding shared by the LD
// and ALU opcode blocks.
const SRC_ORDER: [Src8; 8] = [
    Src8::Reg(Reg::B),
    Src8::Reg(Reg::C),
    Src8::Reg(Reg::D),
    Src8::Reg(Reg::E),
    Src8::Reg(Reg::H),
    Src8::Reg(Reg::L),
    Src8::HlInd,
    Src8::Reg(Reg::A),
];
const DST_ORDER: [Dst8; 8] = [
    Dst8::Reg(Reg::B),
    Dst8::Reg(Reg::C),
    Dst8::Reg(Reg::D),
    Dst8::Reg(Reg::E),
    Dst8::Reg(Reg::H),
    Dst8::Reg(Reg::L),
    Dst8::HlInd,
    Dst8::Reg(Reg::A),
];

// (operand bytes, memory accesses) a source operand costs.
fn src_cost(src: Src8) -> (u8, usize) {
    match src {
        Src8::Reg(_) => (0, 0),
        Src8::Imm => (1, 0),
        Src8::HlInd | Src8::BcInd | Src8::DeInd | Src8::HliInd | Src8::HldInd => (0, 1),
        Src8::Abs => (2, 1),
        Src8::High => (1, 1),
        Src8::HighC => (0, 1),
    }
}

fn dst_cost(dst: Dst8) -> (u8, usize) {
    match dst {
        Dst8::Reg(_) => (0, 0),
        Dst8::HlInd | Dst8::BcInd | Dst8::DeInd | Dst8::HliInd | Dst8::HldInd => (0, 1),
        Dst8::Abs => (2, 1),
        Dst8::High => (1, 1),
        Dst8::HighC => (0, 1),
    }
}

fn ld_mode(dst: Dst8, src: Src8) -> AddrMode {
    match (dst, src) {
        (Dst8::Reg(_), Src8::Reg(_)) => AddrMode::RegisterToRegister,
        (Dst8::Reg(_), _) => AddrMode::ImmediateToRegister,
        (_, Src8::Reg(_)) => AddrMode::RegisterToImmediate,
        (_, _) => AddrMode::ImmediateToImmediate,
    }
}

/// Descriptor for an 8-bit load; length and cycle cost follow from the
/// operand shapes (4 t-cycles per fetched byte or memory access).
fn ld8(opcode: u8, dst: Dst8, src: Src8) -> Instruction {
    let (src_bytes, src_mem) = src_cost(src);
    let (dst_bytes, dst_mem) = dst_cost(dst);
    let operands = src_bytes + dst_bytes;
    Instruction {
        opcode,
        op: Op::Ld8(dst, src),
        mode: ld_mode(dst, src),
        operands,
        cycles: 4 + 4 * (operands as usize + src_mem + dst_mem),
    }
}

/// Descriptor for an 8-bit ALU operation on A.
fn alu(opcode: u8, op: Op, src: Src8) -> Instruction {
    let (operands, mem) = src_cost(src);
    let mode = match src {
        Src8::Reg(_) => AddrMode::RegisterToRegister,
        _ => AddrMode::ImmediateToRegister,
    };
    Instruction {
        opcode,
        op,
        mode,
        operands,
        cycles: 4 + 4 * (operands as usize + mem),
    }
}

/// Descriptor for INC/DEC on a register or (HL) (read-modify-write).
fn rmw(opcode: u8, op: Op, dst: Dst8) -> Instruction {
    let cycles = match dst {
        Dst8::Reg(_) => 4,
        _ => 12,
    };
    Instruction {
        opcode,
        op,
        mode: AddrMode::Implied,
        operands: 0,
        cycles,
    }
}

fn entry(opcode: u8, op: Op, mode: AddrMode, operands: u8, cycles: usize) -> Instruction {
    Instruction {
        opcode,
        op,
        mode,
        operands,
        cycles,
    }
}

fn misc(opcode: u8, op: Op, operands: u8, cycles: usize) -> Instruction {
    entry(opcode, op, AddrMode::Implied, operands, cycles)
}

fn build_table() -> [Instruction; 256] {
    let mut t: [Instruction; 256] = std::array::from_fn(|i| Instruction {
        opcode: i as u8,
        op: Op::Invalid,
        mode: AddrMode::Implied,
        operands: 0,
        cycles: 0,
    });

    // LD r,r' block 0x40-0x7F; the (HL),(HL) slot at 0x76 is HALT.
    for (d, &dst) in DST_ORDER.iter().enumerate() {
        for (s, &src) in SRC_ORDER.iter().enumerate() {
            let opcode = 0x40 + (d as u8) * 8 + s as u8;
            if opcode == 0x76 {
                continue;
            }
            t[opcode as usize] = ld8(opcode, dst, src);
        }
    }

    // LD r,n8 column 0x06..0x3E, including LD (HL),n8 at 0x36.
    for (d, &dst) in DST_ORDER.iter().enumerate() {
        let opcode = 0x06 + (d as u8) * 8;
        t[opcode as usize] = ld8(opcode, dst, Src8::Imm);
    }

    // ALU block 0x80-0xBF plus the immediate column 0xC6..0xFE.
    let alu_ops: [fn(Src8) -> Op; 8] = [
        Op::Add,
        Op::Adc,
        Op::Sub,
        Op::Sbc,
        Op::And,
        Op::Xor,
        Op::Or,
        Op::Cp,
    ];
    for (k, make) in alu_ops.iter().enumerate() {
        for (s, &src) in SRC_ORDER.iter().enumerate() {
            let opcode = 0x80 + (k as u8) * 8 + s as u8;
            t[opcode as usize] = alu(opcode, make(src), src);
        }
        let opcode = 0xC6 + (k as u8) * 8;
        t[opcode as usize] = alu(opcode, make(Src8::Imm), Src8::Imm);
    }

    // INC r / DEC r columns 0x04/0x05 + d*8, including (HL) at 0x34/0x35.
    for (d, &dst) in DST_ORDER.iter().enumerate() {
        let inc = 0x04 + (d as u8) * 8;
        t[inc as usize] = rmw(inc, Op::Inc8(dst), dst);
        t[(inc + 1) as usize] = rmw(inc + 1, Op::Dec8(dst), dst);
    }

    // 16-bit rows: LD rr,nn / INC rr / ADD HL,rr / DEC rr.
    const WIDE: [Reg16; 4] = [Reg16::BC, Reg16::DE, Reg16::HL, Reg16::SP];
    for (i, &rr) in WIDE.iter().enumerate() {
        let base = (i as u8) * 0x10;
        t[(0x01 + base) as usize] = entry(
            0x01 + base,
            Op::Ld16Imm(rr),
            AddrMode::ImmediateToRegister,
            2,
            12,
        );
        t[(0x03 + base) as usize] = misc(0x03 + base, Op::Inc16(rr), 0, 8);
        t[(0x09 + base) as usize] = misc(0x09 + base, Op::AddHl(rr), 0, 8);
        t[(0x0B + base) as usize] = misc(0x0B + base, Op::Dec16(rr), 0, 8);
    }

    // Accumulator loads through pair-indirect addresses, with post-inc/dec
    // on the HL forms.
    t[0x02] = ld8(0x02, Dst8::BcInd, Src8::Reg(Reg::A));
    t[0x0A] = ld8(0x0A, Dst8::Reg(Reg::A), Src8::BcInd);
    t[0x12] = ld8(0x12, Dst8::DeInd, Src8::Reg(Reg::A));
    t[0x1A] = ld8(0x1A, Dst8::Reg(Reg::A), Src8::DeInd);
    t[0x22] = ld8(0x22, Dst8::HliInd, Src8::Reg(Reg::A));
    t[0x2A] = ld8(0x2A, Dst8::Reg(Reg::A), Src8::HliInd);
    t[0x32] = ld8(0x32, Dst8::HldInd, Src8::Reg(Reg::A));
    t[0x3A] = ld8(0x3A, Dst8::Reg(Reg::A), Src8::HldInd);

    // I/O window and absolute accumulator loads.
    t[0xE0] = ld8(0xE0, Dst8::High, Src8::Reg(Reg::A));
    t[0xE2] = ld8(0xE2, Dst8::HighC, Src8::Reg(Reg::A));
    t[0xEA] = ld8(0xEA, Dst8::Abs, Src8::Reg(Reg::A));
    t[0xF0] = ld8(0xF0, Dst8::Reg(Reg::A), Src8::High);
    t[0xF2] = ld8(0xF2, Dst8::Reg(Reg::A), Src8::HighC);
    t[0xFA] = ld8(0xFA, Dst8::Reg(Reg::A), Src8::Abs);

    // Rotates on A and the flag/accumulator misc ops.
    t[0x07] = misc(0x07, Op::Rlca, 0, 4);
    t[0x0F] = misc(0x0F, Op::Rrca, 0, 4);
    t[0x17] = misc(0x17, Op::Rla, 0, 4);
    t[0x1F] = misc(0x1F, Op::Rra, 0, 4);
    t[0x27] = misc(0x27, Op::Daa, 0, 4);
    t[0x2F] = misc(0x2F, Op::Cpl, 0, 4);
    t[0x37] = misc(0x37, Op::Scf, 0, 4);
    t[0x3F] = misc(0x3F, Op::Ccf, 0, 4);

    // Control flow: conditional rows then the unconditional forms.
    const CONDS: [Cond; 4] = [Cond::NotZero, Cond::Zero, Cond::NotCarry, Cond::Carry];
    for (i, &cc) in CONDS.iter().enumerate() {
        let base = (i as u8) * 8;
        t[(0x20 + base) as usize] = misc(0x20 + base, Op::Jr(cc), 1, 8); // +4 taken
        t[(0xC0 + base) as usize] = misc(0xC0 + base, Op::Ret(cc), 0, 8); // +12 taken
        t[(0xC2 + base) as usize] = misc(0xC2 + base, Op::Jp(cc), 2, 12); // +4 taken
        t[(0xC4 + base) as usize] = misc(0xC4 + base, Op::Call(cc), 2, 12); // +12 taken
    }
    t[0x18] = misc(0x18, Op::Jr(Cond::Always), 1, 12);
    t[0xC3] = misc(0xC3, Op::Jp(Cond::Always), 2, 16);
    t[0xC9] = misc(0xC9, Op::Ret(Cond::Always), 0, 16);
    t[0xCD] = misc(0xCD, Op::Call(Cond::Always), 2, 24);
    t[0xD9] = misc(0xD9, Op::Reti, 0, 16);
    t[0xE9] = misc(0xE9, Op::JpHl, 0, 4);

    // Restart vector column.
    for i in 0..8u8 {
        let opcode = 0xC7 + i * 8;
        t[opcode as usize] = misc(opcode, Op::Rst(i * 8), 0, 16);
    }

    // Stack pairs.
    const PAIRS: [Pair; 4] = [Pair::BC, Pair::DE, Pair::HL, Pair::AF];
    for (i, &pair) in PAIRS.iter().enumerate() {
        let base = (i as u8) * 0x10;
        t[(0xC1 + base) as usize] = misc(0xC1 + base, Op::Pop(pair), 0, 12);
        t[(0xC5 + base) as usize] = misc(0xC5 + base, Op::Push(pair), 0, 16);
    }

    // SP plumbing.
    t[0x08] = entry(0x08, Op::StoreSp, AddrMode::RegisterToImmediate, 2, 20);
    t[0xE8] = misc(0xE8, Op::AddSpOffset, 1, 16);
    t[0xF8] = entry(0xF8, Op::LdHlSpOffset, AddrMode::ImmediateToRegister, 1, 12);
    t[0xF9] = entry(0xF9, Op::LdSpHl, AddrMode::RegisterToRegister, 0, 8);

    // Singles. STOP carries a padding byte.
    t[0x00] = misc(0x00, Op::Nop, 0, 4);
    t[0x10] = misc(0x10, Op::Stop, 1, 4);
    t[0x76] = misc(0x76, Op::Halt, 0, 4);
    t[0xF3] = misc(0xF3, Op::DisableInterrupts, 0, 4);
    t[0xFB] = misc(0xFB, Op::EnableInterrupts, 0, 4);

    // 0xCB (bit-operation prefix, separate subset) and the 11 holes
    // 0xD3/0xDB/0xDD/0xE3/0xE4/0xEB/0xEC/0xED/0xF4/0xFC/0xFD keep the
    // invalid sentinel they were initialized with.

    t
}

lazy_static! {
    /// One descriptor per opcode value 0x00-0xFF; unassigned slots hold the
    /// invalid sentinel.
    pub static ref OPCODES: [Instruction; 256] = build_table();
}

//! Disassembly data model and opcode table.
//!
//! The decomposer needs something to call to turn a byte at an address into
//! a `DisassembledInstruction`, so this module supplies the concrete decoder
//! the rest of the pipeline depends on: an opcode-to-mnemonic table in the
//! style of a typical 6502 decoder, covering the full legal instruction set.

use crate::error::EmulatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[allow(non_camel_case_types)]
pub enum Mnemonic {
    ADC, AND, ASL, BCC, BCS, BEQ, BIT, BMI, BNE, BPL, BRK, BVC, BVS,
    CLC, CLD, CLI, CLV, CMP, CPX, CPY, DEC, DEX, DEY, EOR, INC, INX, INY,
    JMP, JSR, LDA, LDX, LDY, LSR, NOP, ORA, PHA, PHP, PLA, PLP, ROL, ROR,
    RTI, RTS, SBC, SEC, SED, SEI, STA, STX, STY, TAX, TAY, TSX, TXA, TXS, TYA,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AddressingMode {
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    IndexedIndirect, // (zp,X)
    IndirectIndexed, // (zp),Y
    Indirect,
    Relative,
    Implied,
}

impl AddressingMode {
    pub fn operand_len(self) -> u16 {
        match self {
            AddressingMode::Accumulator | AddressingMode::Implied => 0,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::IndexedIndirect
            | AddressingMode::IndirectIndexed
            | AddressingMode::Relative => 1,
            AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect => 2,
        }
    }
}

/// One disassembled 6502 instruction.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DisassembledInstruction {
    pub opcode: u8,
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
    pub operand: Vec<u8>,
    pub cycles: u8,
    pub target_address: Option<u16>,
    pub cpu_address: u16,
}

impl DisassembledInstruction {
    pub fn len(&self) -> u16 {
        1 + self.mode.operand_len()
    }

    pub fn operand_u8(&self) -> u8 {
        self.operand[0]
    }

    pub fn operand_u16(&self) -> u16 {
        (self.operand[1] as u16) << 8 | self.operand[0] as u16
    }

    /// The fall-through address (the address the instruction would execute
    /// next if it is not a branch/jump/call).
    pub fn next_addr(&self) -> u16 {
        self.cpu_address.wrapping_add(self.len())
    }

    /// True for mnemonics that unconditionally transfer control and never
    /// fall through.
    pub fn is_unconditional_terminator(&self) -> bool {
        matches!(
            self.mnemonic,
            Mnemonic::RTS | Mnemonic::RTI | Mnemonic::JMP | Mnemonic::BRK
        )
    }

    pub fn is_conditional_branch(&self) -> bool {
        matches!(
            self.mnemonic,
            Mnemonic::BCC
                | Mnemonic::BCS
                | Mnemonic::BEQ
                | Mnemonic::BNE
                | Mnemonic::BMI
                | Mnemonic::BPL
                | Mnemonic::BVC
                | Mnemonic::BVS
        )
    }
}

/// Decodes the opcode byte into `(mnemonic, mode, length, base_cycles)`.
/// Unofficial/undocumented opcodes are out of scope and are treated as a
/// structural error, same as an unknown opcode.
pub fn decode_opcode(opcode: u8) -> Result<(Mnemonic, AddressingMode, u8), EmulatorError> {
    use AddressingMode::*;
    use Mnemonic::*;
    let entry = match opcode {
        0x69 => (ADC, Immediate, 2), 0x65 => (ADC, ZeroPage, 3), 0x75 => (ADC, ZeroPageX, 4),
        0x6D => (ADC, Absolute, 4), 0x7D => (ADC, AbsoluteX, 4), 0x79 => (ADC, AbsoluteY, 4),
        0x61 => (ADC, IndexedIndirect, 6), 0x71 => (ADC, IndirectIndexed, 5),

        0x29 => (AND, Immediate, 2), 0x25 => (AND, ZeroPage, 3), 0x35 => (AND, ZeroPageX, 4),
        0x2D => (AND, Absolute, 4), 0x3D => (AND, AbsoluteX, 4), 0x39 => (AND, AbsoluteY, 4),
        0x21 => (AND, IndexedIndirect, 6), 0x31 => (AND, IndirectIndexed, 5),

        0x0A => (ASL, Accumulator, 2), 0x06 => (ASL, ZeroPage, 5), 0x16 => (ASL, ZeroPageX, 6),
        0x0E => (ASL, Absolute, 6), 0x1E => (ASL, AbsoluteX, 7),

        0x90 => (BCC, Relative, 2),
        0xB0 => (BCS, Relative, 2),
        0xF0 => (BEQ, Relative, 2),

        0x24 => (BIT, ZeroPage, 3), 0x2C => (BIT, Absolute, 4),

        0x30 => (BMI, Relative, 2),
        0xD0 => (BNE, Relative, 2),
        0x10 => (BPL, Relative, 2),
        0x00 => (BRK, Implied, 7),
        0x50 => (BVC, Relative, 2),
        0x70 => (BVS, Relative, 2),

        0x18 => (CLC, Implied, 2), 0xD8 => (CLD, Implied, 2),
        0x58 => (CLI, Implied, 2), 0xB8 => (CLV, Implied, 2),

        0xC9 => (CMP, Immediate, 2), 0xC5 => (CMP, ZeroPage, 3), 0xD5 => (CMP, ZeroPageX, 4),
        0xCD => (CMP, Absolute, 4), 0xDD => (CMP, AbsoluteX, 4), 0xD9 => (CMP, AbsoluteY, 4),
        0xC1 => (CMP, IndexedIndirect, 6), 0xD1 => (CMP, IndirectIndexed, 5),

        0xE0 => (CPX, Immediate, 2), 0xE4 => (CPX, ZeroPage, 3), 0xEC => (CPX, Absolute, 4),
        0xC0 => (CPY, Immediate, 2), 0xC4 => (CPY, ZeroPage, 3), 0xCC => (CPY, Absolute, 4),

        0xC6 => (DEC, ZeroPage, 5), 0xD6 => (DEC, ZeroPageX, 6),
        0xCE => (DEC, Absolute, 6), 0xDE => (DEC, AbsoluteX, 7),
        0xCA => (DEX, Implied, 2), 0x88 => (DEY, Implied, 2),

        0x49 => (EOR, Immediate, 2), 0x45 => (EOR, ZeroPage, 3), 0x55 => (EOR, ZeroPageX, 4),
        0x4D => (EOR, Absolute, 4), 0x5D => (EOR, AbsoluteX, 4), 0x59 => (EOR, AbsoluteY, 4),
        0x41 => (EOR, IndexedIndirect, 6), 0x51 => (EOR, IndirectIndexed, 5),

        0xE6 => (INC, ZeroPage, 5), 0xF6 => (INC, ZeroPageX, 6),
        0xEE => (INC, Absolute, 6), 0xFE => (INC, AbsoluteX, 7),
        0xE8 => (INX, Implied, 2), 0xC8 => (INY, Implied, 2),

        0x4C => (JMP, Absolute, 3), 0x6C => (JMP, Indirect, 5),
        0x20 => (JSR, Absolute, 6),

        0xA9 => (LDA, Immediate, 2), 0xA5 => (LDA, ZeroPage, 3), 0xB5 => (LDA, ZeroPageX, 4),
        0xAD => (LDA, Absolute, 4), 0xBD => (LDA, AbsoluteX, 4), 0xB9 => (LDA, AbsoluteY, 4),
        0xA1 => (LDA, IndexedIndirect, 6), 0xB1 => (LDA, IndirectIndexed, 5),

        0xA2 => (LDX, Immediate, 2), 0xA6 => (LDX, ZeroPage, 3), 0xB6 => (LDX, ZeroPageY, 4),
        0xAE => (LDX, Absolute, 4), 0xBE => (LDX, AbsoluteY, 4),

        0xA0 => (LDY, Immediate, 2), 0xA4 => (LDY, ZeroPage, 3), 0xB4 => (LDY, ZeroPageX, 4),
        0xAC => (LDY, Absolute, 4), 0xBC => (LDY, AbsoluteX, 4),

        0x4A => (LSR, Accumulator, 2), 0x46 => (LSR, ZeroPage, 5), 0x56 => (LSR, ZeroPageX, 6),
        0x4E => (LSR, Absolute, 6), 0x5E => (LSR, AbsoluteX, 7),

        0xEA => (NOP, Implied, 2),

        0x09 => (ORA, Immediate, 2), 0x05 => (ORA, ZeroPage, 3), 0x15 => (ORA, ZeroPageX, 4),
        0x0D => (ORA, Absolute, 4), 0x1D => (ORA, AbsoluteX, 4), 0x19 => (ORA, AbsoluteY, 4),
        0x01 => (ORA, IndexedIndirect, 6), 0x11 => (ORA, IndirectIndexed, 5),

        0x48 => (PHA, Implied, 3), 0x08 => (PHP, Implied, 3),
        0x68 => (PLA, Implied, 4), 0x28 => (PLP, Implied, 4),

        0x2A => (ROL, Accumulator, 2), 0x26 => (ROL, ZeroPage, 5), 0x36 => (ROL, ZeroPageX, 6),
        0x2E => (ROL, Absolute, 6), 0x3E => (ROL, AbsoluteX, 7),

        0x6A => (ROR, Accumulator, 2), 0x66 => (ROR, ZeroPage, 5), 0x76 => (ROR, ZeroPageX, 6),
        0x6E => (ROR, Absolute, 6), 0x7E => (ROR, AbsoluteX, 7),

        0x40 => (RTI, Implied, 6), 0x60 => (RTS, Implied, 6),

        0xE9 => (SBC, Immediate, 2), 0xE5 => (SBC, ZeroPage, 3), 0xF5 => (SBC, ZeroPageX, 4),
        0xED => (SBC, Absolute, 4), 0xFD => (SBC, AbsoluteX, 4), 0xF9 => (SBC, AbsoluteY, 4),
        0xE1 => (SBC, IndexedIndirect, 6), 0xF1 => (SBC, IndirectIndexed, 5),

        0x38 => (SEC, Implied, 2), 0xF8 => (SED, Implied, 2), 0x78 => (SEI, Implied, 2),

        0x85 => (STA, ZeroPage, 3), 0x95 => (STA, ZeroPageX, 4), 0x8D => (STA, Absolute, 4),
        0x9D => (STA, AbsoluteX, 5), 0x99 => (STA, AbsoluteY, 5),
        0x81 => (STA, IndexedIndirect, 6), 0x91 => (STA, IndirectIndexed, 6),

        0x86 => (STX, ZeroPage, 3), 0x96 => (STX, ZeroPageY, 4), 0x8E => (STX, Absolute, 4),
        0x84 => (STY, ZeroPage, 3), 0x94 => (STY, ZeroPageX, 4), 0x8C => (STY, Absolute, 4),

        0xAA => (TAX, Implied, 2), 0xA8 => (TAY, Implied, 2), 0xBA => (TSX, Implied, 2),
        0x8A => (TXA, Implied, 2), 0x9A => (TXS, Implied, 2), 0x98 => (TYA, Implied, 2),

        _ => {
            return Err(EmulatorError::Structural {
                address: 0,
                reason: format!("unknown or unofficial opcode {:#04X}", opcode),
            })
        }
    };
    Ok((entry.0, entry.1, entry.2))
}

/// Disassembles the instruction at `addr` within `region`.
///
/// The 6502 indirect-JMP page-cross bug is recorded here via
/// `target_address`: for `Indirect` mode, if the low byte of the pointer is
/// `0xFF`, the high byte is read from `addr & 0xFF00`, not `addr + 1`.
pub fn disassemble(
    region: &crate::bus::CodeRegion<'_>,
    addr: u16,
) -> Result<DisassembledInstruction, EmulatorError> {
    let opcode = region.byte_at(addr).ok_or_else(|| EmulatorError::Structural {
        address: addr,
        reason: "address not in any code region".to_string(),
    })?;
    let (mnemonic, mode, cycles) = decode_opcode(opcode).map_err(|e| match e {
        EmulatorError::Structural { reason, .. } => EmulatorError::Structural { address: addr, reason },
        other => other,
    })?;
    let operand_len = mode.operand_len();
    let mut operand = Vec::with_capacity(operand_len as usize);
    for i in 0..operand_len {
        operand.push(region.byte_at(addr.wrapping_add(1 + i)).ok_or_else(|| {
            EmulatorError::Structural {
                address: addr,
                reason: "instruction operand runs past end of code region".to_string(),
            }
        })?);
    }

    let target_address = match mode {
        AddressingMode::Absolute if matches!(mnemonic, Mnemonic::JMP | Mnemonic::JSR) => {
            Some((operand[1] as u16) << 8 | operand[0] as u16)
        }
        AddressingMode::Indirect => {
            let ptr = (operand[1] as u16) << 8 | operand[0] as u16;
            let lo = region.byte_at(ptr).unwrap_or(0);
            let hi_addr = if ptr & 0x00FF == 0x00FF {
                ptr & 0xFF00
            } else {
                ptr.wrapping_add(1)
            };
            let hi = region.byte_at(hi_addr).unwrap_or(0);
            Some((hi as u16) << 8 | lo as u16)
        }
        AddressingMode::Relative => {
            let offset = operand[0] as i8;
            Some(addr.wrapping_add(2).wrapping_add_signed(offset as i16))
        }
        _ => None,
    };

    Ok(DisassembledInstruction {
        opcode,
        mnemonic,
        mode,
        operand,
        cycles,
        target_address,
        cpu_address: addr,
    })
}

use thiserror::Error;

/// Addressing modes in table column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressingMode {
    Implied,
    Immediate,
    Relative,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    IndexedIndirectX,
    IndirectIndexedY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    AbsoluteIndirect,
    LinkGroup,
    LinkPage,
}

/// Width class of the single parameter an addressing mode takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    None,
    Byte,
    Word,
    Rel8,
}

impl ParamKind {
    pub fn width(self) -> usize {
        match self {
            Self::None => 0,
            Self::Byte | Self::Rel8 => 1,
            Self::Word => 2,
        }
    }
}

/// Fixed tokens surrounding an operand expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntaxToken {
    Hash,
    Open,
    Close,
    Comma,
    RegX,
    RegY,
    Group,
    Page,
}

impl SyntaxToken {
    pub fn text(self) -> &'static str {
        match self {
            Self::Hash => "#",
            Self::Open => "(",
            Self::Close => ")",
            Self::Comma => ",",
            Self::RegX => "x",
            Self::RegY => "y",
            Self::Group => "group",
            Self::Page => "page",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSyntax {
    /// Token that must not start the operand.
    pub forbid: Option<SyntaxToken>,
    pub prefix: &'static [SyntaxToken],
    pub suffix: &'static [SyntaxToken],
    pub param: ParamKind,
}

use SyntaxToken::{Close, Comma, Group, Hash as HashTok, Open, Page, RegX, RegY};

impl AddressingMode {
    pub const ALL: [Self; 14] = [
        Self::Implied,
        Self::Immediate,
        Self::Relative,
        Self::ZeroPage,
        Self::ZeroPageX,
        Self::ZeroPageY,
        Self::IndexedIndirectX,
        Self::IndirectIndexedY,
        Self::Absolute,
        Self::AbsoluteX,
        Self::AbsoluteY,
        Self::AbsoluteIndirect,
        Self::LinkGroup,
        Self::LinkPage,
    ];

    pub fn syntax(self) -> ModeSyntax {
        match self {
            Self::Implied => syntax(None, &[], &[], ParamKind::None),
            Self::Immediate => syntax(None, &[HashTok], &[], ParamKind::Byte),
            Self::Relative => syntax(None, &[], &[], ParamKind::Rel8),
            Self::ZeroPage => syntax(Some(Open), &[], &[], ParamKind::Byte),
            Self::ZeroPageX => syntax(Some(Open), &[], &[Comma, RegX], ParamKind::Byte),
            Self::ZeroPageY => syntax(Some(Open), &[], &[Comma, RegY], ParamKind::Byte),
            Self::IndexedIndirectX => syntax(None, &[Open], &[Comma, RegX, Close], ParamKind::Byte),
            Self::IndirectIndexedY => syntax(None, &[Open], &[Close, Comma, RegY], ParamKind::Byte),
            Self::Absolute => syntax(Some(Open), &[], &[], ParamKind::Word),
            Self::AbsoluteX => syntax(Some(Open), &[], &[Comma, RegX], ParamKind::Word),
            Self::AbsoluteY => syntax(Some(Open), &[], &[Comma, RegY], ParamKind::Word),
            Self::AbsoluteIndirect => syntax(None, &[Open], &[Close], ParamKind::Word),
            Self::LinkGroup => syntax(None, &[Group], &[], ParamKind::Word),
            Self::LinkPage => syntax(None, &[Page], &[], ParamKind::Byte),
        }
    }
}

const fn syntax(
    forbid: Option<SyntaxToken>,
    prefix: &'static [SyntaxToken],
    suffix: &'static [SyntaxToken],
    param: ParamKind,
) -> ModeSyntax {
    ModeSyntax {
        forbid,
        prefix,
        suffix,
        param,
    }
}

pub fn operand_size(mode: AddressingMode) -> usize {
    mode.syntax().param.width()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Opcode,
    Directive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionEntry {
    pub mnemonic: &'static str,
    pub kind: EntryKind,
    modes: &'static [(AddressingMode, u8)],
}

impl InstructionEntry {
    /// Modes accepted by this entry, in table column order.
    pub fn modes(&self) -> impl Iterator<Item = AddressingMode> + '_ {
        self.modes.iter().map(|(mode, _)| *mode)
    }

    pub fn opcode(&self, mode: AddressingMode) -> Option<u8> {
        if self.kind == EntryKind::Directive {
            return None;
        }
        self.modes
            .iter()
            .find(|(candidate, _)| *candidate == mode)
            .map(|(_, opcode)| *opcode)
    }
}

macro_rules! ins {
    ($mnemonic:literal $(, $mode:ident = $opcode:literal)* $(,)?) => {
        InstructionEntry {
            mnemonic: $mnemonic,
            kind: EntryKind::Opcode,
            modes: &[$((AddressingMode::$mode, $opcode)),*],
        }
    };
}

macro_rules! dir {
    ($mnemonic:literal $(, $mode:ident)* $(,)?) => {
        InstructionEntry {
            mnemonic: $mnemonic,
            kind: EntryKind::Directive,
            modes: &[$((AddressingMode::$mode, 0)),*],
        }
    };
}

const INSTRUCTIONS: &[InstructionEntry] = &[
    dir!(".(", Implied),
    dir!(".)", Implied),
    dir!(".bss", Implied),
    dir!(".data", Implied),
    dir!(".link", LinkGroup, LinkPage),
    dir!(".text", Implied),
    dir!(".zero", Implied),
    ins!("adc", Immediate = 0x69, ZeroPage = 0x65, ZeroPageX = 0x75, IndexedIndirectX = 0x61,
        IndirectIndexedY = 0x71, Absolute = 0x6D, AbsoluteX = 0x7D, AbsoluteY = 0x79),
    ins!("and", Immediate = 0x29, ZeroPage = 0x25, ZeroPageX = 0x35, IndexedIndirectX = 0x21,
        IndirectIndexedY = 0x31, Absolute = 0x2D, AbsoluteX = 0x3D, AbsoluteY = 0x39),
    ins!("asl", Implied = 0x0A, ZeroPage = 0x06, ZeroPageX = 0x16, Absolute = 0x0E, AbsoluteX = 0x1E),
    ins!("bcc", Relative = 0x90),
    ins!("bcs", Relative = 0xB0),
    ins!("beq", Relative = 0xF0),
    ins!("bit", ZeroPage = 0x24, Absolute = 0x2C),
    ins!("bmi", Relative = 0x30),
    ins!("bne", Relative = 0xD0),
    ins!("bpl", Relative = 0x10),
    ins!("brk", Implied = 0x00),
    ins!("bvc", Relative = 0x50),
    ins!("bvs", Relative = 0x70),
    ins!("clc", Implied = 0x18),
    ins!("cld", Implied = 0xD8),
    ins!("cli", Implied = 0x58),
    ins!("clv", Implied = 0xB8),
    ins!("cmp", Immediate = 0xC9, ZeroPage = 0xC5, ZeroPageX = 0xD5, IndexedIndirectX = 0xC1,
        IndirectIndexedY = 0xD1, Absolute = 0xCD, AbsoluteX = 0xDD, AbsoluteY = 0xD9),
    ins!("cpx", Immediate = 0xE0, ZeroPage = 0xE4, Absolute = 0xEC),
    ins!("cpy", Immediate = 0xC0, ZeroPage = 0xC4, Absolute = 0xCC),
    ins!("dec", ZeroPage = 0xC6, ZeroPageX = 0xD6, Absolute = 0xCE, AbsoluteX = 0xDE),
    ins!("dex", Implied = 0xCA),
    ins!("dey", Implied = 0x88),
    ins!("eor", Immediate = 0x49, ZeroPage = 0x45, ZeroPageX = 0x55, IndexedIndirectX = 0x41,
        IndirectIndexedY = 0x51, Absolute = 0x4D, AbsoluteX = 0x5D, AbsoluteY = 0x59),
    ins!("inc", ZeroPage = 0xE6, ZeroPageX = 0xF6, Absolute = 0xEE, AbsoluteX = 0xFE),
    ins!("inx", Implied = 0xE8),
    ins!("iny", Implied = 0xC8),
    ins!("jmp", Absolute = 0x4C, AbsoluteIndirect = 0x6C),
    ins!("jsr", Absolute = 0x20),
    ins!("lda", Immediate = 0xA9, ZeroPage = 0xA5, ZeroPageX = 0xB5, IndexedIndirectX = 0xA1,
        IndirectIndexedY = 0xB1, Absolute = 0xAD, AbsoluteX = 0xBD, AbsoluteY = 0xB9),
    ins!("ldx", Immediate = 0xA2, ZeroPage = 0xA6, ZeroPageY = 0xB6, Absolute = 0xAE, AbsoluteY = 0xBE),
    ins!("ldy", Immediate = 0xA0, ZeroPage = 0xA4, ZeroPageX = 0xB4, Absolute = 0xAC, AbsoluteX = 0xBC),
    ins!("lsr", Implied = 0x4A, ZeroPage = 0x46, ZeroPageX = 0x56, Absolute = 0x4E, AbsoluteX = 0x5E),
    ins!("nop", Implied = 0xEA),
    ins!("ora", Immediate = 0x09, ZeroPage = 0x05, ZeroPageX = 0x15, IndexedIndirectX = 0x01,
        IndirectIndexedY = 0x11, Absolute = 0x0D, AbsoluteX = 0x1D, AbsoluteY = 0x19),
    ins!("pha", Implied = 0x48),
    ins!("php", Implied = 0x08),
    ins!("pla", Implied = 0x68),
    ins!("plp", Implied = 0x28),
    ins!("rol", Implied = 0x2A, ZeroPage = 0x26, ZeroPageX = 0x36, Absolute = 0x2E, AbsoluteX = 0x3E),
    ins!("ror", Implied = 0x6A, ZeroPage = 0x66, ZeroPageX = 0x76, Absolute = 0x6E, AbsoluteX = 0x7E),
    ins!("rti", Implied = 0x40),
    ins!("rts", Implied = 0x60),
    ins!("sbc", Immediate = 0xE9, ZeroPage = 0xE5, ZeroPageX = 0xF5, IndexedIndirectX = 0xE1,
        IndirectIndexedY = 0xF1, Absolute = 0xED, AbsoluteX = 0xFD, AbsoluteY = 0xF9),
    ins!("sec", Implied = 0x38),
    ins!("sed", Implied = 0xF8),
    ins!("sei", Implied = 0x78),
    ins!("sta", ZeroPage = 0x85, ZeroPageX = 0x95, IndexedIndirectX = 0x81, IndirectIndexedY = 0x91,
        Absolute = 0x8D, AbsoluteX = 0x9D, AbsoluteY = 0x99),
    ins!("stx", ZeroPage = 0x86, ZeroPageY = 0x96, Absolute = 0x8E),
    ins!("sty", ZeroPage = 0x84, ZeroPageX = 0x94, Absolute = 0x8C),
    ins!("tax", Implied = 0xAA),
    ins!("tay", Implied = 0xA8),
    ins!("tsx", Implied = 0xBA),
    ins!("txa", Implied = 0x8A),
    ins!("txs", Implied = 0x9A),
    ins!("tya", Implied = 0x98),
];

/// Data directives handled outside the mode table.
const DATA_DIRECTIVES: [&str; 4] = [".byt", ".word", ".long", ".nop"];

pub fn instructions() -> &'static [InstructionEntry] {
    INSTRUCTIONS
}

pub fn lookup(mnemonic: &str) -> Option<&'static InstructionEntry> {
    let lower = mnemonic.to_ascii_lowercase();
    INSTRUCTIONS.iter().find(|entry| entry.mnemonic == lower)
}

pub fn is_reserved_word(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    DATA_DIRECTIVES.contains(&lower.as_str()) || lookup(&lower).is_some()
}

/// Conditional branch with the opposite condition.
///
/// Only the eight 6502 conditional branches are listed; their opcodes differ
/// from their inverse in bit 5.
pub fn inverted_branch(opcode: u8) -> Option<u8> {
    match opcode {
        0x10 | 0x30 | 0x50 | 0x70 | 0x90 | 0xB0 | 0xD0 | 0xF0 => Some(opcode ^ 0x20),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeDescriptor {
    pub mnemonic: &'static str,
    pub mode: AddressingMode,
}

pub fn opcode_info(opcode: u8) -> Option<OpcodeDescriptor> {
    INSTRUCTIONS
        .iter()
        .filter(|entry| entry.kind == EntryKind::Opcode)
        .find_map(|entry| {
            entry
                .modes
                .iter()
                .find(|(_, candidate)| *candidate == opcode)
                .map(|(mode, _)| OpcodeDescriptor {
                    mnemonic: entry.mnemonic,
                    mode: *mode,
                })
        })
}

#[derive(Debug)]
pub struct DecodedInstruction<'a> {
    pub opcode: u8,
    pub mnemonic: &'static str,
    pub mode: AddressingMode,
    pub operand: &'a [u8],
}

impl DecodedInstruction<'_> {
    pub fn len(&self) -> usize {
        1 + self.operand.len()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("cannot decode instruction from empty byte slice")]
    EmptyInput,
    #[error("opcode {opcode:#04X} is not a documented 6502 instruction")]
    UnknownOpcode { opcode: u8 },
    #[error(
        "truncated instruction for opcode {opcode:#04X}: expected {expected} operand bytes, got {actual}"
    )]
    Truncated {
        opcode: u8,
        expected: usize,
        actual: usize,
    },
}

pub fn decode_instruction(bytes: &[u8]) -> Result<DecodedInstruction<'_>, DecodeError> {
    let (&opcode, rest) = bytes.split_first().ok_or(DecodeError::EmptyInput)?;
    let descriptor = opcode_info(opcode).ok_or(DecodeError::UnknownOpcode { opcode })?;
    let width = operand_size(descriptor.mode);
    if rest.len() < width {
        return Err(DecodeError::Truncated {
            opcode,
            expected: width,
            actual: rest.len(),
        });
    }

    Ok(DecodedInstruction {
        opcode,
        mnemonic: descriptor.mnemonic,
        mode: descriptor.mode,
        operand: &rest[..width],
    })
}

pub fn format_instruction(decoded: &DecodedInstruction<'_>, address: u32) -> String {
    let operand = format_operand(decoded.mode, decoded.operand, address);
    if operand.is_empty() {
        decoded.mnemonic.to_string()
    } else {
        format!("{} {}", decoded.mnemonic, operand)
    }
}

fn format_operand(mode: AddressingMode, operand: &[u8], address: u32) -> String {
    let word = || u16::from_le_bytes([operand[0], operand[1]]);
    match mode {
        AddressingMode::Implied | AddressingMode::LinkGroup | AddressingMode::LinkPage => {
            String::new()
        }
        AddressingMode::Immediate => format!("#${:02X}", operand[0]),
        AddressingMode::ZeroPage => format!("${:02X}", operand[0]),
        AddressingMode::ZeroPageX => format!("${:02X},x", operand[0]),
        AddressingMode::ZeroPageY => format!("${:02X},y", operand[0]),
        AddressingMode::IndexedIndirectX => format!("(${:02X},x)", operand[0]),
        AddressingMode::IndirectIndexedY => format!("(${:02X}),y", operand[0]),
        AddressingMode::Absolute => format!("${:04X}", word()),
        AddressingMode::AbsoluteX => format!("${:04X},x", word()),
        AddressingMode::AbsoluteY => format!("${:04X},y", word()),
        AddressingMode::AbsoluteIndirect => format!("(${:04X})", word()),
        AddressingMode::Relative => {
            let offset = i32::from(operand[0] as i8);
            let target = (address as i32).wrapping_add(2).wrapping_add(offset) as u32 & 0xFFFF;
            format!("${target:04X}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let entry = lookup("LDA").expect("lda");
        assert_eq!(entry.opcode(AddressingMode::Immediate), Some(0xA9));
        assert_eq!(entry.opcode(AddressingMode::Relative), None);
    }

    #[test]
    fn modes_follow_column_order() {
        let modes: Vec<_> = lookup("ldx").expect("ldx").modes().collect();
        assert_eq!(
            modes,
            vec![
                AddressingMode::Immediate,
                AddressingMode::ZeroPage,
                AddressingMode::ZeroPageY,
                AddressingMode::Absolute,
                AddressingMode::AbsoluteY,
            ]
        );
        for entry in instructions() {
            let modes: Vec<_> = entry.modes().collect();
            let mut sorted = modes.clone();
            sorted.sort();
            assert_eq!(modes, sorted, "{}", entry.mnemonic);
        }
    }

    #[test]
    fn directives_have_no_opcodes() {
        let link = lookup(".link").expect(".link");
        assert_eq!(link.kind, EntryKind::Directive);
        assert_eq!(link.opcode(AddressingMode::LinkGroup), None);
        assert_eq!(
            link.modes().collect::<Vec<_>>(),
            vec![AddressingMode::LinkGroup, AddressingMode::LinkPage]
        );
    }

    #[test]
    fn reserved_words_include_data_directives() {
        assert!(is_reserved_word("sta"));
        assert!(is_reserved_word(".BYT"));
        assert!(is_reserved_word(".("));
        assert!(!is_reserved_word("loop"));
    }

    #[test]
    fn inverts_only_conditional_branches() {
        assert_eq!(inverted_branch(0xD0), Some(0xF0));
        assert_eq!(inverted_branch(0x90), Some(0xB0));
        assert_eq!(inverted_branch(0x10), Some(0x30));
        assert_eq!(inverted_branch(0x4C), None);
        assert_eq!(inverted_branch(0x20), None);
    }

    #[test]
    fn opcodes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for entry in instructions().iter().filter(|e| e.kind == EntryKind::Opcode) {
            for mode in entry.modes() {
                let opcode = entry.opcode(mode).expect("opcode");
                assert!(seen.insert(opcode), "duplicate opcode {opcode:#04X}");
            }
        }
        assert_eq!(seen.len(), 151);
    }

    #[test]
    fn decodes_and_formats() {
        let decoded = decode_instruction(&[0xB1, 0x20]).expect("decode");
        assert_eq!(decoded.len(), 2);
        assert_eq!(format_instruction(&decoded, 0x8000), "lda ($20),y");

        let branch = decode_instruction(&[0xD0, 0xFC]).expect("decode");
        assert_eq!(format_instruction(&branch, 0x0010), "bne $000E");
    }

    #[test]
    fn rejects_undocumented_and_truncated() {
        assert_eq!(
            decode_instruction(&[0x02]).expect_err("illegal"),
            DecodeError::UnknownOpcode { opcode: 0x02 }
        );
        assert!(matches!(
            decode_instruction(&[0xAD, 0x00]).expect_err("short"),
            DecodeError::Truncated { expected: 2, .. }
        ));
    }

    #[test]
    fn operand_sizes() {
        assert_eq!(operand_size(AddressingMode::Implied), 0);
        assert_eq!(operand_size(AddressingMode::Relative), 1);
        assert_eq!(operand_size(AddressingMode::AbsoluteIndirect), 2);
        assert_eq!(operand_size(AddressingMode::LinkPage), 1);
    }
}

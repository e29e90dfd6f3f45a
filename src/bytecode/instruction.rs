// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
use std::fmt;

use crate::util::{ByteDecoder, ByteEncoder};

use super::opcode;
use super::program::LoadError;

/// The closed set of opcodes understood by the virtual machine.  Each
/// opcode corresponds to exactly one byte value in the container
/// format; the operand layout of an instruction is determined by its
/// opcode together with its type suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    CPDOWNSP,
    RSADD,
    CPTOPSP,
    CONST,
    ACTION,
    LOGAND,
    LOGOR,
    INCOR,
    EXCOR,
    BOOLAND,
    EQUAL,
    NEQUAL,
    GEQ,
    GT,
    LT,
    LEQ,
    SHLEFT,
    SHRIGHT,
    USHRIGHT,
    ADD,
    SUB,
    MUL,
    DIV,
    MOD,
    NEG,
    COMP,
    MOVSP,
    STORESTATEALL,
    JMP,
    JSR,
    JZ,
    RETN,
    DESTRUCT,
    NOT,
    DECISP,
    INCISP,
    JNZ,
    CPDOWNBP,
    CPTOPBP,
    DECIBP,
    INCIBP,
    SAVEBP,
    RESTOREBP,
    STORESTATE,
    NOP,
    NOP2,
}

use Opcode::*;

impl Opcode {
    /// Determine the byte value of this opcode in the container
    /// format.
    pub fn byte(&self) -> u8 {
        match self {
            CPDOWNSP => opcode::CPDOWNSP,
            RSADD => opcode::RSADD,
            CPTOPSP => opcode::CPTOPSP,
            CONST => opcode::CONST,
            ACTION => opcode::ACTION,
            LOGAND => opcode::LOGAND,
            LOGOR => opcode::LOGOR,
            INCOR => opcode::INCOR,
            EXCOR => opcode::EXCOR,
            BOOLAND => opcode::BOOLAND,
            EQUAL => opcode::EQUAL,
            NEQUAL => opcode::NEQUAL,
            GEQ => opcode::GEQ,
            GT => opcode::GT,
            LT => opcode::LT,
            LEQ => opcode::LEQ,
            SHLEFT => opcode::SHLEFT,
            SHRIGHT => opcode::SHRIGHT,
            USHRIGHT => opcode::USHRIGHT,
            ADD => opcode::ADD,
            SUB => opcode::SUB,
            MUL => opcode::MUL,
            DIV => opcode::DIV,
            MOD => opcode::MOD,
            NEG => opcode::NEG,
            COMP => opcode::COMP,
            MOVSP => opcode::MOVSP,
            STORESTATEALL => opcode::STORESTATEALL,
            JMP => opcode::JMP,
            JSR => opcode::JSR,
            JZ => opcode::JZ,
            RETN => opcode::RETN,
            DESTRUCT => opcode::DESTRUCT,
            NOT => opcode::NOT,
            DECISP => opcode::DECISP,
            INCISP => opcode::INCISP,
            JNZ => opcode::JNZ,
            CPDOWNBP => opcode::CPDOWNBP,
            CPTOPBP => opcode::CPTOPBP,
            DECIBP => opcode::DECIBP,
            INCIBP => opcode::INCIBP,
            SAVEBP => opcode::SAVEBP,
            RESTOREBP => opcode::RESTOREBP,
            STORESTATE => opcode::STORESTATE,
            NOP => opcode::NOP,
            NOP2 => opcode::NOP2,
        }
    }

    /// Decode an opcode from its byte value.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        let op = match byte {
            opcode::CPDOWNSP => CPDOWNSP,
            opcode::RSADD => RSADD,
            opcode::CPTOPSP => CPTOPSP,
            opcode::CONST => CONST,
            opcode::ACTION => ACTION,
            opcode::LOGAND => LOGAND,
            opcode::LOGOR => LOGOR,
            opcode::INCOR => INCOR,
            opcode::EXCOR => EXCOR,
            opcode::BOOLAND => BOOLAND,
            opcode::EQUAL => EQUAL,
            opcode::NEQUAL => NEQUAL,
            opcode::GEQ => GEQ,
            opcode::GT => GT,
            opcode::LT => LT,
            opcode::LEQ => LEQ,
            opcode::SHLEFT => SHLEFT,
            opcode::SHRIGHT => SHRIGHT,
            opcode::USHRIGHT => USHRIGHT,
            opcode::ADD => ADD,
            opcode::SUB => SUB,
            opcode::MUL => MUL,
            opcode::DIV => DIV,
            opcode::MOD => MOD,
            opcode::NEG => NEG,
            opcode::COMP => COMP,
            opcode::MOVSP => MOVSP,
            opcode::STORESTATEALL => STORESTATEALL,
            opcode::JMP => JMP,
            opcode::JSR => JSR,
            opcode::JZ => JZ,
            opcode::RETN => RETN,
            opcode::DESTRUCT => DESTRUCT,
            opcode::NOT => NOT,
            opcode::DECISP => DECISP,
            opcode::INCISP => INCISP,
            opcode::JNZ => JNZ,
            opcode::CPDOWNBP => CPDOWNBP,
            opcode::CPTOPBP => CPTOPBP,
            opcode::DECIBP => DECIBP,
            opcode::INCIBP => INCIBP,
            opcode::SAVEBP => SAVEBP,
            opcode::RESTOREBP => RESTOREBP,
            opcode::STORESTATE => STORESTATE,
            opcode::NOP => NOP,
            opcode::NOP2 => NOP2,
            _ => {
                return None;
            }
        };
        Some(op)
    }
}

// ============================================================================
// Type suffixes
// ============================================================================

/// The operand-type discriminator carried as the second byte of every
/// instruction.  For typed opcode families (arithmetic, comparison,
/// reserve, constants) this selects both the operand parsing and the
/// runtime semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeSuffix {
    /// No operand typing (control flow, frame and misc opcodes).
    None,
    /// Untyped stack addressing form (copy and destruct opcodes).
    Direct,
    Int,
    Float,
    String,
    Object,
    Effect,
    Event,
    Location,
    Talent,
    IntInt,
    IntFloat,
    FloatInt,
    FloatFloat,
    StringString,
    ObjectObject,
    EffectEffect,
    EventEvent,
    LocationLocation,
    TalentTalent,
    /// Elementwise structure comparison; the cell count (times four)
    /// is carried as an operand.
    StructStruct,
    FloatVector,
    VectorFloat,
    VectorVector,
}

impl TypeSuffix {
    /// Determine the byte value of this suffix in the container
    /// format.
    pub fn byte(&self) -> u8 {
        match self {
            TypeSuffix::None => opcode::TYPE_NONE,
            TypeSuffix::Direct => opcode::TYPE_DIRECT,
            TypeSuffix::Int => opcode::TYPE_INT,
            TypeSuffix::Float => opcode::TYPE_FLOAT,
            TypeSuffix::String => opcode::TYPE_STRING,
            TypeSuffix::Object => opcode::TYPE_OBJECT,
            TypeSuffix::Effect => opcode::TYPE_EFFECT,
            TypeSuffix::Event => opcode::TYPE_EVENT,
            TypeSuffix::Location => opcode::TYPE_LOCATION,
            TypeSuffix::Talent => opcode::TYPE_TALENT,
            TypeSuffix::IntInt => opcode::TYPE_INT_INT,
            TypeSuffix::IntFloat => opcode::TYPE_INT_FLOAT,
            TypeSuffix::FloatInt => opcode::TYPE_FLOAT_INT,
            TypeSuffix::FloatFloat => opcode::TYPE_FLOAT_FLOAT,
            TypeSuffix::StringString => opcode::TYPE_STRING_STRING,
            TypeSuffix::ObjectObject => opcode::TYPE_OBJECT_OBJECT,
            TypeSuffix::EffectEffect => opcode::TYPE_EFFECT_EFFECT,
            TypeSuffix::EventEvent => opcode::TYPE_EVENT_EVENT,
            TypeSuffix::LocationLocation => opcode::TYPE_LOCATION_LOCATION,
            TypeSuffix::TalentTalent => opcode::TYPE_TALENT_TALENT,
            TypeSuffix::StructStruct => opcode::TYPE_STRUCT_STRUCT,
            TypeSuffix::FloatVector => opcode::TYPE_FLOAT_VECTOR,
            TypeSuffix::VectorFloat => opcode::TYPE_VECTOR_FLOAT,
            TypeSuffix::VectorVector => opcode::TYPE_VECTOR_VECTOR,
        }
    }

    /// Decode a type suffix from its byte value.
    pub fn from_byte(byte: u8) -> Option<TypeSuffix> {
        let suffix = match byte {
            opcode::TYPE_NONE => TypeSuffix::None,
            opcode::TYPE_DIRECT => TypeSuffix::Direct,
            opcode::TYPE_INT => TypeSuffix::Int,
            opcode::TYPE_FLOAT => TypeSuffix::Float,
            opcode::TYPE_STRING => TypeSuffix::String,
            opcode::TYPE_OBJECT => TypeSuffix::Object,
            opcode::TYPE_EFFECT => TypeSuffix::Effect,
            opcode::TYPE_EVENT => TypeSuffix::Event,
            opcode::TYPE_LOCATION => TypeSuffix::Location,
            opcode::TYPE_TALENT => TypeSuffix::Talent,
            opcode::TYPE_INT_INT => TypeSuffix::IntInt,
            opcode::TYPE_INT_FLOAT => TypeSuffix::IntFloat,
            opcode::TYPE_FLOAT_INT => TypeSuffix::FloatInt,
            opcode::TYPE_FLOAT_FLOAT => TypeSuffix::FloatFloat,
            opcode::TYPE_STRING_STRING => TypeSuffix::StringString,
            opcode::TYPE_OBJECT_OBJECT => TypeSuffix::ObjectObject,
            opcode::TYPE_EFFECT_EFFECT => TypeSuffix::EffectEffect,
            opcode::TYPE_EVENT_EVENT => TypeSuffix::EventEvent,
            opcode::TYPE_LOCATION_LOCATION => TypeSuffix::LocationLocation,
            opcode::TYPE_TALENT_TALENT => TypeSuffix::TalentTalent,
            opcode::TYPE_STRUCT_STRUCT => TypeSuffix::StructStruct,
            opcode::TYPE_FLOAT_VECTOR => TypeSuffix::FloatVector,
            opcode::TYPE_VECTOR_FLOAT => TypeSuffix::VectorFloat,
            opcode::TYPE_VECTOR_VECTOR => TypeSuffix::VectorVector,
            _ => {
                return None;
            }
        };
        Some(suffix)
    }

    /// The decoration appended to a mnemonic for this suffix
    /// (e.g. `ADD` + `II` gives `ADDII`).
    pub fn decoration(&self) -> &'static str {
        match self {
            TypeSuffix::None | TypeSuffix::Direct => "",
            TypeSuffix::Int => "I",
            TypeSuffix::Float => "F",
            TypeSuffix::String => "S",
            TypeSuffix::Object => "O",
            TypeSuffix::Effect => "EFF",
            TypeSuffix::Event => "EVT",
            TypeSuffix::Location => "LOC",
            TypeSuffix::Talent => "TAL",
            TypeSuffix::IntInt => "II",
            TypeSuffix::IntFloat => "IF",
            TypeSuffix::FloatInt => "FI",
            TypeSuffix::FloatFloat => "FF",
            TypeSuffix::StringString => "SS",
            TypeSuffix::ObjectObject => "OO",
            TypeSuffix::EffectEffect => "EFFEFF",
            TypeSuffix::EventEvent => "EVTEVT",
            TypeSuffix::LocationLocation => "LOCLOC",
            TypeSuffix::TalentTalent => "TALTAL",
            TypeSuffix::StructStruct => "TT",
            TypeSuffix::FloatVector => "FV",
            TypeSuffix::VectorFloat => "VF",
            TypeSuffix::VectorVector => "VV",
        }
    }
}

// ============================================================================
// Literals
// ============================================================================

/// The literal payload carried by a CONST instruction.  String
/// payloads are opaque byte sequences; the container does not promise
/// any particular text encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    None,
    Int(i32),
    Float(f32),
    String(Vec<u8>),
    Object(u32),
}

// ============================================================================
// Instructions
// ============================================================================

/// A single decoded instruction.  Only the fields relevant to the
/// instruction's opcode are meaningful; the rest hold their default
/// values.  `offset` and `next_offset` are byte offsets into the
/// container and are assigned when the instruction is added to a
/// [`Program`](super::Program).
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: Opcode,
    pub suffix: TypeSuffix,
    pub next_offset: u32,
    pub jump_offset: i32,
    pub stack_offset: i32,
    pub size: u16,
    pub size_no_destroy: u16,
    pub size_globals: u32,
    pub size_locals: u32,
    pub routine: u16,
    pub arg_count: u8,
    pub literal: Literal,
}

impl Default for Instruction {
    fn default() -> Self {
        Instruction {
            offset: 0,
            opcode: NOP,
            suffix: TypeSuffix::None,
            next_offset: 0,
            jump_offset: 0,
            stack_offset: 0,
            size: 0,
            size_no_destroy: 0,
            size_globals: 0,
            size_locals: 0,
            routine: 0,
            arg_count: 0,
            literal: Literal::None,
        }
    }
}

impl Instruction {
    /// Construct an operand-free instruction from an opcode and type
    /// suffix (e.g. `Instruction::of(Opcode::ADD, TypeSuffix::IntInt)`).
    pub fn of(opcode: Opcode, suffix: TypeSuffix) -> Self {
        Instruction { opcode, suffix, ..Default::default() }
    }

    pub fn rsadd(suffix: TypeSuffix) -> Self {
        Instruction::of(RSADD, suffix)
    }

    pub fn const_int(value: i32) -> Self {
        Instruction { opcode: CONST, suffix: TypeSuffix::Int, literal: Literal::Int(value), ..Default::default() }
    }

    pub fn const_float(value: f32) -> Self {
        Instruction { opcode: CONST, suffix: TypeSuffix::Float, literal: Literal::Float(value), ..Default::default() }
    }

    pub fn const_string(value: Vec<u8>) -> Self {
        Instruction { opcode: CONST, suffix: TypeSuffix::String, literal: Literal::String(value), ..Default::default() }
    }

    pub fn const_object(id: u32) -> Self {
        Instruction { opcode: CONST, suffix: TypeSuffix::Object, literal: Literal::Object(id), ..Default::default() }
    }

    pub fn action(routine: u16, arg_count: u8) -> Self {
        Instruction { opcode: ACTION, routine, arg_count, ..Default::default() }
    }

    pub fn cpdownsp(stack_offset: i32, size: u16) -> Self {
        Instruction { opcode: CPDOWNSP, suffix: TypeSuffix::Direct, stack_offset, size, ..Default::default() }
    }

    pub fn cptopsp(stack_offset: i32, size: u16) -> Self {
        Instruction { opcode: CPTOPSP, suffix: TypeSuffix::Direct, stack_offset, size, ..Default::default() }
    }

    pub fn cpdownbp(stack_offset: i32, size: u16) -> Self {
        Instruction { opcode: CPDOWNBP, suffix: TypeSuffix::Direct, stack_offset, size, ..Default::default() }
    }

    pub fn cptopbp(stack_offset: i32, size: u16) -> Self {
        Instruction { opcode: CPTOPBP, suffix: TypeSuffix::Direct, stack_offset, size, ..Default::default() }
    }

    pub fn movsp(stack_offset: i32) -> Self {
        Instruction { opcode: MOVSP, stack_offset, ..Default::default() }
    }

    pub fn jmp(jump_offset: i32) -> Self {
        Instruction { opcode: JMP, jump_offset, ..Default::default() }
    }

    pub fn jsr(jump_offset: i32) -> Self {
        Instruction { opcode: JSR, jump_offset, ..Default::default() }
    }

    pub fn jz(jump_offset: i32) -> Self {
        Instruction { opcode: JZ, jump_offset, ..Default::default() }
    }

    pub fn jnz(jump_offset: i32) -> Self {
        Instruction { opcode: JNZ, jump_offset, ..Default::default() }
    }

    pub fn retn() -> Self {
        Instruction::of(RETN, TypeSuffix::None)
    }

    pub fn destruct(size: u16, stack_offset: i32, size_no_destroy: u16) -> Self {
        Instruction {
            opcode: DESTRUCT,
            suffix: TypeSuffix::Direct,
            size,
            stack_offset,
            size_no_destroy,
            ..Default::default()
        }
    }

    pub fn decisp(stack_offset: i32) -> Self {
        Instruction { opcode: DECISP, suffix: TypeSuffix::Int, stack_offset, ..Default::default() }
    }

    pub fn incisp(stack_offset: i32) -> Self {
        Instruction { opcode: INCISP, suffix: TypeSuffix::Int, stack_offset, ..Default::default() }
    }

    pub fn decibp(stack_offset: i32) -> Self {
        Instruction { opcode: DECIBP, suffix: TypeSuffix::Int, stack_offset, ..Default::default() }
    }

    pub fn incibp(stack_offset: i32) -> Self {
        Instruction { opcode: INCIBP, suffix: TypeSuffix::Int, stack_offset, ..Default::default() }
    }

    pub fn savebp() -> Self {
        Instruction::of(SAVEBP, TypeSuffix::None)
    }

    pub fn restorebp() -> Self {
        Instruction::of(RESTOREBP, TypeSuffix::None)
    }

    pub fn store_state(size_globals: u32, size_locals: u32) -> Self {
        Instruction { opcode: STORESTATE, size_globals, size_locals, ..Default::default() }
    }

    pub fn equaltt(size: u16) -> Self {
        Instruction { opcode: EQUAL, suffix: TypeSuffix::StructStruct, size, ..Default::default() }
    }

    pub fn nequaltt(size: u16) -> Self {
        Instruction { opcode: NEQUAL, suffix: TypeSuffix::StructStruct, size, ..Default::default() }
    }

    /// Determine the length of this instruction (in bytes), including
    /// the opcode and type suffix bytes.
    pub fn length(&self) -> u32 {
        let operands = match self.opcode {
            CPDOWNSP | CPTOPSP | CPDOWNBP | CPTOPBP => 6,
            CONST => match &self.literal {
                Literal::String(bytes) => 2 + bytes.len() as u32,
                Literal::None => 0,
                _ => 4,
            },
            ACTION => 3,
            MOVSP | JMP | JSR | JZ | JNZ | DECISP | INCISP | DECIBP | INCIBP => 4,
            DESTRUCT => 6,
            STORESTATE => 8,
            EQUAL | NEQUAL if self.suffix == TypeSuffix::StructStruct => 2,
            _ => 0,
        };
        2 + operands
    }

    /// The canonical mnemonic for this instruction (e.g. `ADDII`,
    /// `RSADDI`, `CPDOWNSP`).
    pub fn mnemonic(&self) -> String {
        let base = match self.opcode {
            CPDOWNSP => "CPDOWNSP",
            RSADD => "RSADD",
            CPTOPSP => "CPTOPSP",
            CONST => "CONST",
            ACTION => "ACTION",
            LOGAND => "LOGAND",
            LOGOR => "LOGOR",
            INCOR => "INCOR",
            EXCOR => "EXCOR",
            BOOLAND => "BOOLAND",
            EQUAL => "EQUAL",
            NEQUAL => "NEQUAL",
            GEQ => "GEQ",
            GT => "GT",
            LT => "LT",
            LEQ => "LEQ",
            SHLEFT => "SHLEFT",
            SHRIGHT => "SHRIGHT",
            USHRIGHT => "USHRIGHT",
            ADD => "ADD",
            SUB => "SUB",
            MUL => "MUL",
            DIV => "DIV",
            MOD => "MOD",
            NEG => "NEG",
            COMP => "COMP",
            MOVSP => "MOVSP",
            STORESTATEALL => "STORESTATEALL",
            JMP => "JMP",
            JSR => "JSR",
            JZ => "JZ",
            RETN => "RETN",
            DESTRUCT => "DESTRUCT",
            NOT => "NOT",
            DECISP => "DECISP",
            INCISP => "INCISP",
            JNZ => "JNZ",
            CPDOWNBP => "CPDOWNBP",
            CPTOPBP => "CPTOPBP",
            DECIBP => "DECIBP",
            INCIBP => "INCIBP",
            SAVEBP => "SAVEBP",
            RESTOREBP => "RESTOREBP",
            STORESTATE => "STORESTATE",
            NOP => "NOP",
            NOP2 => "NOP2",
        };
        format!("{}{}", base, self.suffix.decoration())
    }

    // ================================================================
    // Decoding
    // ================================================================

    /// Decode the next instruction from the given bytestream.  The
    /// `offset` is only used for error reporting; placement happens
    /// when the instruction is added to a program.
    pub fn decode(dec: &mut ByteDecoder, offset: u32) -> Result<Instruction, LoadError> {
        let op_byte: u8 = dec.decode_u8()?;
        let opcode = Opcode::from_byte(op_byte).ok_or(LoadError::UnknownOpcode(offset, op_byte))?;
        let suffix_byte: u8 = dec.decode_u8()?;
        let bad_operand = LoadError::InvalidOperand(offset, suffix_byte);
        // STORESTATE carries a fixed header byte where the type
        // suffix normally sits.
        if opcode == STORESTATE {
            if suffix_byte != opcode::STORESTATE_HEADER {
                return Err(bad_operand);
            }
            let size_globals = dec.decode_u32()?;
            let size_locals = dec.decode_u32()?;
            return Ok(Instruction::store_state(size_globals, size_locals));
        }
        let suffix = match TypeSuffix::from_byte(suffix_byte) {
            Some(suffix) => suffix,
            None => {
                return Err(bad_operand);
            }
        };
        // Sanity check the suffix against the opcode family, then
        // pull out the operands.
        let ins = match opcode {
            CPDOWNSP | CPTOPSP | CPDOWNBP | CPTOPBP => {
                if suffix != TypeSuffix::Direct {
                    return Err(bad_operand);
                }
                let stack_offset = dec.decode_i32()?;
                let size = dec.decode_u16()?;
                Instruction { opcode, suffix, stack_offset, size, ..Default::default() }
            }
            RSADD => {
                if !matches!(
                    suffix,
                    TypeSuffix::Int
                        | TypeSuffix::Float
                        | TypeSuffix::String
                        | TypeSuffix::Object
                        | TypeSuffix::Effect
                        | TypeSuffix::Event
                        | TypeSuffix::Location
                        | TypeSuffix::Talent
                ) {
                    return Err(bad_operand);
                }
                Instruction::rsadd(suffix)
            }
            CONST => {
                let literal = match suffix {
                    TypeSuffix::Int => Literal::Int(dec.decode_i32()?),
                    TypeSuffix::Float => Literal::Float(dec.decode_f32()?),
                    TypeSuffix::String => {
                        let len = dec.decode_u16()? as usize;
                        Literal::String(dec.decode_bytes(len)?.to_vec())
                    }
                    TypeSuffix::Object => Literal::Object(dec.decode_u32()?),
                    _ => {
                        return Err(bad_operand);
                    }
                };
                Instruction { opcode, suffix, literal, ..Default::default() }
            }
            ACTION => {
                if suffix != TypeSuffix::None {
                    return Err(bad_operand);
                }
                let routine = dec.decode_u16()?;
                let arg_count = dec.decode_u8()?;
                Instruction::action(routine, arg_count)
            }
            LOGAND | LOGOR | INCOR | EXCOR | BOOLAND | MOD | SHLEFT | SHRIGHT | USHRIGHT => {
                if suffix != TypeSuffix::IntInt {
                    return Err(bad_operand);
                }
                Instruction::of(opcode, suffix)
            }
            EQUAL | NEQUAL => match suffix {
                TypeSuffix::StructStruct => {
                    let size = dec.decode_u16()?;
                    Instruction { opcode, suffix, size, ..Default::default() }
                }
                TypeSuffix::IntInt
                | TypeSuffix::FloatFloat
                | TypeSuffix::StringString
                | TypeSuffix::ObjectObject
                | TypeSuffix::EffectEffect
                | TypeSuffix::EventEvent
                | TypeSuffix::LocationLocation
                | TypeSuffix::TalentTalent => Instruction::of(opcode, suffix),
                _ => {
                    return Err(bad_operand);
                }
            },
            GEQ | GT | LT | LEQ => {
                if !matches!(suffix, TypeSuffix::IntInt | TypeSuffix::FloatFloat) {
                    return Err(bad_operand);
                }
                Instruction::of(opcode, suffix)
            }
            ADD | SUB => {
                let valid = matches!(
                    suffix,
                    TypeSuffix::IntInt
                        | TypeSuffix::IntFloat
                        | TypeSuffix::FloatInt
                        | TypeSuffix::FloatFloat
                        | TypeSuffix::VectorVector
                ) || (opcode == ADD && suffix == TypeSuffix::StringString);
                if !valid {
                    return Err(bad_operand);
                }
                Instruction::of(opcode, suffix)
            }
            MUL | DIV => {
                if !matches!(
                    suffix,
                    TypeSuffix::IntInt
                        | TypeSuffix::IntFloat
                        | TypeSuffix::FloatInt
                        | TypeSuffix::FloatFloat
                        | TypeSuffix::FloatVector
                        | TypeSuffix::VectorFloat
                ) {
                    return Err(bad_operand);
                }
                Instruction::of(opcode, suffix)
            }
            NEG => {
                if !matches!(suffix, TypeSuffix::Int | TypeSuffix::Float) {
                    return Err(bad_operand);
                }
                Instruction::of(opcode, suffix)
            }
            COMP | NOT => {
                if suffix != TypeSuffix::Int {
                    return Err(bad_operand);
                }
                Instruction::of(opcode, suffix)
            }
            MOVSP => {
                if suffix != TypeSuffix::None {
                    return Err(bad_operand);
                }
                Instruction::movsp(dec.decode_i32()?)
            }
            JMP | JSR | JZ | JNZ => {
                if suffix != TypeSuffix::None {
                    return Err(bad_operand);
                }
                let jump_offset = dec.decode_i32()?;
                Instruction { opcode, jump_offset, ..Default::default() }
            }
            DESTRUCT => {
                if suffix != TypeSuffix::Direct {
                    return Err(bad_operand);
                }
                let size = dec.decode_u16()?;
                let stack_offset = dec.decode_i16()? as i32;
                let size_no_destroy = dec.decode_u16()?;
                Instruction::destruct(size, stack_offset, size_no_destroy)
            }
            DECISP | INCISP | DECIBP | INCIBP => {
                if suffix != TypeSuffix::Int {
                    return Err(bad_operand);
                }
                let stack_offset = dec.decode_i32()?;
                Instruction { opcode, suffix, stack_offset, ..Default::default() }
            }
            SAVEBP | RESTOREBP | RETN | NOP | NOP2 | STORESTATEALL => {
                if suffix != TypeSuffix::None {
                    return Err(bad_operand);
                }
                Instruction::of(opcode, suffix)
            }
            STORESTATE => unreachable!(),
        };
        Ok(ins)
    }

    // ================================================================
    // Encoding
    // ================================================================

    /// Encode this instruction into a byte sequence.
    pub fn encode(&self, enc: &mut ByteEncoder) {
        enc.encode_u8(self.opcode.byte());
        if self.opcode == STORESTATE {
            enc.encode_u8(opcode::STORESTATE_HEADER);
            enc.encode_u32(self.size_globals);
            enc.encode_u32(self.size_locals);
            return;
        }
        enc.encode_u8(self.suffix.byte());
        match self.opcode {
            CPDOWNSP | CPTOPSP | CPDOWNBP | CPTOPBP => {
                enc.encode_i32(self.stack_offset);
                enc.encode_u16(self.size);
            }
            CONST => match &self.literal {
                Literal::Int(value) => enc.encode_i32(*value),
                Literal::Float(value) => enc.encode_f32(*value),
                Literal::String(bytes) => {
                    enc.encode_u16(bytes.len() as u16);
                    enc.encode_bytes(bytes);
                }
                Literal::Object(id) => enc.encode_u32(*id),
                Literal::None => {}
            },
            ACTION => {
                enc.encode_u16(self.routine);
                enc.encode_u8(self.arg_count);
            }
            MOVSP | DECISP | INCISP | DECIBP | INCIBP => enc.encode_i32(self.stack_offset),
            JMP | JSR | JZ | JNZ => enc.encode_i32(self.jump_offset),
            DESTRUCT => {
                enc.encode_u16(self.size);
                enc.encode_i16(self.stack_offset as i16);
                enc.encode_u16(self.size_no_destroy);
            }
            EQUAL | NEQUAL if self.suffix == TypeSuffix::StructStruct => {
                enc.encode_u16(self.size);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        match self.opcode {
            JMP | JSR | JZ | JNZ => {
                let target = self.offset as i64 + self.jump_offset as i64;
                write!(f, " {:08x}", target)
            }
            CONST => match &self.literal {
                Literal::Int(value) => write!(f, " {}", value),
                Literal::Float(value) => write!(f, " {}", value),
                Literal::String(bytes) => write!(f, " \"{}\"", String::from_utf8_lossy(bytes)),
                Literal::Object(id) => write!(f, " {}", id),
                Literal::None => Ok(()),
            },
            ACTION => write!(f, " {} {}", self.routine, self.arg_count),
            _ => Ok(()),
        }
    }
}

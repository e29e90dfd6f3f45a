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

// Stack copies
pub const CPDOWNSP: u8 = 0x01;
pub const RSADD: u8 = 0x02;
pub const CPTOPSP: u8 = 0x03;
// Constants
pub const CONST: u8 = 0x04;
// Routine call
pub const ACTION: u8 = 0x05;
// Logical / bitwise
pub const LOGAND: u8 = 0x06;
pub const LOGOR: u8 = 0x07;
pub const INCOR: u8 = 0x08;
pub const EXCOR: u8 = 0x09;
pub const BOOLAND: u8 = 0x0a;
// Comparison
pub const EQUAL: u8 = 0x0b;
pub const NEQUAL: u8 = 0x0c;
pub const GEQ: u8 = 0x0d;
pub const GT: u8 = 0x0e;
pub const LT: u8 = 0x0f;
pub const LEQ: u8 = 0x10;
// Shifts
pub const SHLEFT: u8 = 0x11;
pub const SHRIGHT: u8 = 0x12;
pub const USHRIGHT: u8 = 0x13;
// Arithmetic
pub const ADD: u8 = 0x14;
pub const SUB: u8 = 0x15;
pub const MUL: u8 = 0x16;
pub const DIV: u8 = 0x17;
pub const MOD: u8 = 0x18;
pub const NEG: u8 = 0x19;
pub const COMP: u8 = 0x1a;
// Stack lifecycle
pub const MOVSP: u8 = 0x1b;
pub const STORESTATEALL: u8 = 0x1c;
// Control flow
pub const JMP: u8 = 0x1d;
pub const JSR: u8 = 0x1e;
pub const JZ: u8 = 0x1f;
pub const RETN: u8 = 0x20;
pub const DESTRUCT: u8 = 0x21;
pub const NOT: u8 = 0x22;
// Counters
pub const DECISP: u8 = 0x23;
pub const INCISP: u8 = 0x24;
pub const JNZ: u8 = 0x25;
// Base-pointer forms
pub const CPDOWNBP: u8 = 0x26;
pub const CPTOPBP: u8 = 0x27;
pub const DECIBP: u8 = 0x28;
pub const INCIBP: u8 = 0x29;
pub const SAVEBP: u8 = 0x2a;
pub const RESTOREBP: u8 = 0x2b;
// Continuations
pub const STORESTATE: u8 = 0x2c;
// Misc
pub const NOP: u8 = 0x2d;
pub const NOP2: u8 = 0x2e;

// ============================================================================
// Type suffixes
// ============================================================================

// Scalar forms
pub const TYPE_NONE: u8 = 0x00;
pub const TYPE_DIRECT: u8 = 0x01;
pub const TYPE_INT: u8 = 0x03;
pub const TYPE_FLOAT: u8 = 0x04;
pub const TYPE_STRING: u8 = 0x05;
pub const TYPE_OBJECT: u8 = 0x06;
// Engine handle forms
pub const TYPE_EFFECT: u8 = 0x10;
pub const TYPE_EVENT: u8 = 0x11;
pub const TYPE_LOCATION: u8 = 0x12;
pub const TYPE_TALENT: u8 = 0x13;
// Binary forms
pub const TYPE_INT_INT: u8 = 0x20;
pub const TYPE_INT_FLOAT: u8 = 0x21;
pub const TYPE_FLOAT_INT: u8 = 0x22;
pub const TYPE_FLOAT_FLOAT: u8 = 0x23;
pub const TYPE_STRING_STRING: u8 = 0x24;
pub const TYPE_OBJECT_OBJECT: u8 = 0x25;
pub const TYPE_EFFECT_EFFECT: u8 = 0x30;
pub const TYPE_EVENT_EVENT: u8 = 0x31;
pub const TYPE_LOCATION_LOCATION: u8 = 0x32;
pub const TYPE_TALENT_TALENT: u8 = 0x33;
// Structure comparison (cell count carried as an operand)
pub const TYPE_STRUCT_STRUCT: u8 = 0x34;
// Vector forms
pub const TYPE_FLOAT_VECTOR: u8 = 0x1a;
pub const TYPE_VECTOR_FLOAT: u8 = 0x1b;
pub const TYPE_VECTOR_VECTOR: u8 = 0x3a;

/// The type suffix byte carried by every STORESTATE instruction.
/// This doubles as the size (in bytes) of the continuation header:
/// the captured body begins at `offset + 0x10`.
pub const STORESTATE_HEADER: u8 = 0x10;

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

use crate::bytecode::Opcode;

use super::variable::VariableType;

/// An error which arises from integer arithmetic.  Float operations
/// follow IEEE-754 and never raise one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithmeticError {
    DivisionByZero,
    ModuloByZero,
}

impl fmt::Display for ArithmeticError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ArithmeticError::DivisionByZero => write!(f, "division by zero"),
            ArithmeticError::ModuloByZero => write!(f, "modulo by zero"),
        }
    }
}

/// An error which arises when an instruction or routine encounters a
/// value of the wrong type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeError {
    /// An operand pair (or an argument against its declared type)
    /// does not match.
    OperandTypeMismatch(VariableType, VariableType),
    /// A counter instruction targeted a cell which is not an Int.
    IncrementNonInt(VariableType),
    /// A cell did not hold the type the instruction requires.
    UnexpectedStackType(VariableType),
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeError::OperandTypeMismatch(left, right) => {
                write!(f, "unsupported operand types: {:?} {:?}", left, right)
            }
            TypeError::IncrementNonInt(actual) => {
                write!(f, "cannot increment or decrement a {:?} cell", actual)
            }
            TypeError::UnexpectedStackType(actual) => {
                write!(f, "unexpected {:?} on the stack", actual)
            }
        }
    }
}

/// An error which arises when an instruction addresses the operand
/// stack outside its current extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackError {
    Underflow,
    OutOfBoundsAccess(i64),
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StackError::Underflow => write!(f, "stack underflow"),
            StackError::OutOfBoundsAccess(index) => {
                write!(f, "out of bounds stack access: {}", index)
            }
        }
    }
}

/// An error which arises during routine dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutineError {
    /// The routine index does not name an entry in the table.
    UnknownRoutine(u16),
    /// The instruction's argument count disagrees with the routine's
    /// declared argument list.
    ArgCountMismatch(usize, usize),
    /// The handler returned a value of a type other than the declared
    /// return type.
    ReturnTypeMismatch(VariableType, VariableType),
}

impl fmt::Display for RoutineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RoutineError::UnknownRoutine(index) => write!(f, "unknown routine {}", index),
            RoutineError::ArgCountMismatch(declared, actual) => {
                write!(f, "routine declares {} arguments, instruction passes {}", declared, actual)
            }
            RoutineError::ReturnTypeMismatch(declared, actual) => {
                write!(f, "routine declares return type {:?}, handler returned {:?}", declared, actual)
            }
        }
    }
}

// ============================================================================
// Execution errors
// ============================================================================

/// The terminal result of a failed `run`.  Script code has no
/// exception mechanism; the machine reports the first error to the
/// embedder and discards its stack state.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionError {
    Arithmetic(ArithmeticError),
    Type(TypeError),
    Stack(StackError),
    Routine(RoutineError),
    /// Control transferred to a byte offset which names no
    /// instruction.  The loader deliberately leaves jump targets
    /// unvalidated.
    InvalidOffset(u32),
    /// The instruction is part of the container format but has no
    /// defined execution semantics.
    Unsupported(Opcode),
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecutionError::Arithmetic(e) => write!(f, "{}", e),
            ExecutionError::Type(e) => write!(f, "{}", e),
            ExecutionError::Stack(e) => write!(f, "{}", e),
            ExecutionError::Routine(e) => write!(f, "{}", e),
            ExecutionError::InvalidOffset(offset) => {
                write!(f, "no instruction at offset {:#x}", offset)
            }
            ExecutionError::Unsupported(op) => {
                write!(f, "instruction {:?} is not implemented", op)
            }
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<ArithmeticError> for ExecutionError {
    fn from(e: ArithmeticError) -> Self {
        ExecutionError::Arithmetic(e)
    }
}

impl From<TypeError> for ExecutionError {
    fn from(e: TypeError) -> Self {
        ExecutionError::Type(e)
    }
}

impl From<StackError> for ExecutionError {
    fn from(e: StackError) -> Self {
        ExecutionError::Stack(e)
    }
}

impl From<RoutineError> for ExecutionError {
    fn from(e: RoutineError) -> Self {
        ExecutionError::Routine(e)
    }
}

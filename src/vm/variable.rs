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
use std::sync::Arc;

use super::errors::{ArithmeticError, ExecutionError, TypeError};
use super::machine::Continuation;

/// The closed set of value types a stack cell (or routine argument)
/// can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VariableType {
    Void,
    Int,
    Float,
    String,
    Object,
    Vector,
    Effect,
    Event,
    Location,
    Talent,
    Action,
}

/// Marker trait for engine-defined payloads carried by Effect, Event,
/// Location and Talent values.  The machine treats these as opaque,
/// reference-counted handles.
pub trait EngineType: fmt::Debug + Send + Sync {}

/// A shared handle to an engine-defined payload.  Handles compare by
/// identity, not by content.
#[derive(Clone, Debug)]
pub struct EngineRef(Arc<dyn EngineType>);

impl EngineRef {
    pub fn new<T: EngineType + 'static>(value: T) -> Self {
        EngineRef(Arc::new(value))
    }

    pub fn get(&self) -> &dyn EngineType {
        self.0.as_ref()
    }
}

impl PartialEq for EngineRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// ============================================================================
// Variables
// ============================================================================

/// A single typed value.  On the operand stack every cell holds one
/// of these, with the restriction that vectors never appear as a cell
/// (they are spread over three Float cells); the Vector variant only
/// occurs in routine arguments and return values.
#[derive(Clone, Debug)]
pub enum Variable {
    Void,
    Int(i32),
    Float(f32),
    String(Vec<u8>),
    Object(u32),
    Vector([f32; 3]),
    Effect(Option<EngineRef>),
    Event(Option<EngineRef>),
    Location(Option<EngineRef>),
    Talent(Option<EngineRef>),
    Action(Arc<Continuation>),
}

use Variable::*;

impl Variable {
    /// The type tag of this value.
    pub fn var_type(&self) -> VariableType {
        match self {
            Void => VariableType::Void,
            Int(_) => VariableType::Int,
            Float(_) => VariableType::Float,
            String(_) => VariableType::String,
            Object(_) => VariableType::Object,
            Vector(_) => VariableType::Vector,
            Effect(_) => VariableType::Effect,
            Event(_) => VariableType::Event,
            Location(_) => VariableType::Location,
            Talent(_) => VariableType::Talent,
            Action(_) => VariableType::Action,
        }
    }

    /// The zero value of a given type, as pushed by the reserve
    /// instructions and returned by handler-less routines.
    pub fn default_of(var_type: VariableType) -> Variable {
        match var_type {
            VariableType::Void => Void,
            VariableType::Int => Int(0),
            VariableType::Float => Float(0.0),
            VariableType::String => String(Vec::new()),
            VariableType::Object => Object(0),
            VariableType::Vector => Vector([0.0; 3]),
            VariableType::Effect => Effect(None),
            VariableType::Event => Event(None),
            VariableType::Location => Location(None),
            VariableType::Talent => Talent(None),
            // An action has no zero value; the closest thing is no
            // value at all.
            VariableType::Action => Void,
        }
    }

    fn mismatch(&self, other: &Variable) -> ExecutionError {
        TypeError::OperandTypeMismatch(self.var_type(), other.var_type()).into()
    }

    // ================================================================
    // Arithmetic
    // ================================================================

    /// Add two values.  Int arithmetic wraps; mixed Int/Float
    /// operands promote to Float; String operands concatenate.
    pub fn add(&self, other: &Variable) -> Result<Variable, ExecutionError> {
        match (self, other) {
            (Int(l), Int(r)) => Ok(Int(l.wrapping_add(*r))),
            (Int(l), Float(r)) => Ok(Float(*l as f32 + r)),
            (Float(l), Int(r)) => Ok(Float(l + *r as f32)),
            (Float(l), Float(r)) => Ok(Float(l + r)),
            (String(l), String(r)) => {
                let mut bytes = l.clone();
                bytes.extend_from_slice(r);
                Ok(String(bytes))
            }
            _ => Err(self.mismatch(other)),
        }
    }

    pub fn sub(&self, other: &Variable) -> Result<Variable, ExecutionError> {
        match (self, other) {
            (Int(l), Int(r)) => Ok(Int(l.wrapping_sub(*r))),
            (Int(l), Float(r)) => Ok(Float(*l as f32 - r)),
            (Float(l), Int(r)) => Ok(Float(l - *r as f32)),
            (Float(l), Float(r)) => Ok(Float(l - r)),
            _ => Err(self.mismatch(other)),
        }
    }

    pub fn mul(&self, other: &Variable) -> Result<Variable, ExecutionError> {
        match (self, other) {
            (Int(l), Int(r)) => Ok(Int(l.wrapping_mul(*r))),
            (Int(l), Float(r)) => Ok(Float(*l as f32 * r)),
            (Float(l), Int(r)) => Ok(Float(l * *r as f32)),
            (Float(l), Float(r)) => Ok(Float(l * r)),
            _ => Err(self.mismatch(other)),
        }
    }

    /// Divide two values.  Integer division by zero is an error;
    /// float division follows IEEE-754.
    pub fn div(&self, other: &Variable) -> Result<Variable, ExecutionError> {
        match (self, other) {
            (Int(_), Int(0)) => Err(ArithmeticError::DivisionByZero.into()),
            (Int(l), Int(r)) => Ok(Int(l.wrapping_div(*r))),
            (Int(l), Float(r)) => Ok(Float(*l as f32 / r)),
            (Float(l), Int(r)) => Ok(Float(l / *r as f32)),
            (Float(l), Float(r)) => Ok(Float(l / r)),
            _ => Err(self.mismatch(other)),
        }
    }

    // ================================================================
    // Comparison
    // ================================================================

    /// Equality by tag and payload.  Engine handles compare by
    /// identity, strings by raw bytes.  Types without a defined
    /// equality (Void, Vector, Action) are an error.
    pub fn equals(&self, other: &Variable) -> Result<bool, ExecutionError> {
        match (self, other) {
            (Int(l), Int(r)) => Ok(l == r),
            (Float(l), Float(r)) => Ok(l == r),
            (String(l), String(r)) => Ok(l == r),
            (Object(l), Object(r)) => Ok(l == r),
            (Effect(l), Effect(r)) => Ok(l == r),
            (Event(l), Event(r)) => Ok(l == r),
            (Location(l), Location(r)) => Ok(l == r),
            (Talent(l), Talent(r)) => Ok(l == r),
            _ => Err(self.mismatch(other)),
        }
    }

    /// Ordering is defined only for Int and Float.
    pub fn less_than(&self, other: &Variable) -> Result<bool, ExecutionError> {
        match (self, other) {
            (Int(l), Int(r)) => Ok(l < r),
            (Float(l), Float(r)) => Ok(l < r),
            _ => Err(self.mismatch(other)),
        }
    }

    pub fn less_equal(&self, other: &Variable) -> Result<bool, ExecutionError> {
        match (self, other) {
            (Int(l), Int(r)) => Ok(l <= r),
            (Float(l), Float(r)) => Ok(l <= r),
            _ => Err(self.mismatch(other)),
        }
    }

    pub fn greater_than(&self, other: &Variable) -> Result<bool, ExecutionError> {
        match (self, other) {
            (Int(l), Int(r)) => Ok(l > r),
            (Float(l), Float(r)) => Ok(l > r),
            _ => Err(self.mismatch(other)),
        }
    }

    pub fn greater_equal(&self, other: &Variable) -> Result<bool, ExecutionError> {
        match (self, other) {
            (Int(l), Int(r)) => Ok(l >= r),
            (Float(l), Float(r)) => Ok(l >= r),
            _ => Err(self.mismatch(other)),
        }
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Void, Void) => true,
            (Int(l), Int(r)) => l == r,
            (Float(l), Float(r)) => l == r,
            (String(l), String(r)) => l == r,
            (Object(l), Object(r)) => l == r,
            (Vector(l), Vector(r)) => l == r,
            (Effect(l), Effect(r)) => l == r,
            (Event(l), Event(r)) => l == r,
            (Location(l), Location(r)) => l == r,
            (Talent(l), Talent(r)) => l == r,
            (Action(l), Action(r)) => Arc::ptr_eq(l, r),
            _ => false,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Void => write!(f, "void"),
            Int(value) => write!(f, "{}", value),
            Float(value) => write!(f, "{}", value),
            String(bytes) => write!(f, "\"{}\"", std::string::String::from_utf8_lossy(bytes)),
            Object(id) => write!(f, "object {}", id),
            Vector([x, y, z]) => write!(f, "[{}, {}, {}]", x, y, z),
            Effect(_) => write!(f, "effect"),
            Event(_) => write!(f, "event"),
            Location(_) => write!(f, "location"),
            Talent(_) => write!(f, "talent"),
            Action(cont) => write!(f, "action {:#x}", cont.offset),
        }
    }
}

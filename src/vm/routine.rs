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
use super::machine::ExecutionContext;
use super::variable::{Variable, VariableType};

/// The callback shape of an engine builtin.  Handlers receive the
/// marshalled arguments in declaration order and must return a value
/// of the routine's declared return type.
pub type RoutineHandler = Box<dyn Fn(&[Variable], &ExecutionContext) -> Variable + Send + Sync>;

/// An engine-defined builtin callable from bytecode via ACTION.  A
/// routine without a handler returns the zero value of its declared
/// return type.
pub struct Routine {
    name: String,
    return_type: VariableType,
    argument_types: Vec<VariableType>,
    handler: Option<RoutineHandler>,
}

impl Routine {
    pub fn new(name: &str, return_type: VariableType, argument_types: Vec<VariableType>) -> Self {
        Routine { name: name.to_string(), return_type, argument_types, handler: None }
    }

    pub fn handled(
        name: &str,
        return_type: VariableType,
        argument_types: Vec<VariableType>,
        handler: impl Fn(&[Variable], &ExecutionContext) -> Variable + Send + Sync + 'static,
    ) -> Self {
        Routine {
            name: name.to_string(),
            return_type,
            argument_types,
            handler: Some(Box::new(handler)),
        }
    }

    pub fn invoke(&self, args: &[Variable], ctx: &ExecutionContext) -> Variable {
        match &self.handler {
            Some(handler) => handler(args, ctx),
            None => Variable::default_of(self.return_type),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_type(&self) -> VariableType {
        self.return_type
    }

    pub fn argument_types(&self) -> &[VariableType] {
        &self.argument_types
    }

    pub fn argument_type(&self, index: usize) -> Option<VariableType> {
        self.argument_types.get(index).copied()
    }
}

// ============================================================================
// Routine table
// ============================================================================

/// An indexed, immutable list of routines.  Dispatch is by index; the
/// machine never builds one of these itself, the embedder supplies
/// it.
#[derive(Default)]
pub struct RoutineTable {
    routines: Vec<Routine>,
}

impl RoutineTable {
    pub fn new() -> Self {
        RoutineTable::default()
    }

    /// Register a routine, returning its index in the table.
    pub fn add(&mut self, routine: Routine) -> u16 {
        self.routines.push(routine);
        (self.routines.len() - 1) as u16
    }

    pub fn get(&self, index: u16) -> Option<&Routine> {
        self.routines.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }
}

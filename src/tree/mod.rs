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
use std::collections::BTreeSet;

use crate::bytecode::Program;
use crate::vm::{RoutineTable, Variable, VariableType};

mod decompiler;

pub use decompiler::DecompileError;

/// Handle to an expression in an [`ExpressionTree`] arena.  All
/// references between expressions go through these handles; the only
/// cycles in the graph are Goto to Label, which is a reference rather
/// than ownership.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId(pub(crate) usize);

impl ExprId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Handle to a function in an [`ExpressionTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncId(pub(crate) usize);

impl FuncId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Where a parameter lives relative to the function under
/// decompilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Locality {
    Local,
    Input,
    Output,
    Global,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
    OnesComplement,
    Increment,
    Decrement,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Assign,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    LogicalAnd,
    LogicalOr,
    BitwiseOr,
    BitwiseExclusiveOr,
    BitwiseAnd,
    LeftShift,
    RightShift,
    RightShiftUnsigned,
    Equal,
    NotEqual,
    GreaterThanOrEqual,
    GreaterThan,
    LessThan,
    LessThanOrEqual,
}

// ============================================================================
// Expressions
// ============================================================================

/// A typed expression recovered from bytecode.  Every variant records
/// the byte offset of the instruction it was synthesized from.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Block {
        offset: u32,
        expressions: Vec<ExprId>,
    },
    Constant {
        offset: u32,
        value: Variable,
    },
    Parameter {
        offset: u32,
        variable_type: VariableType,
        locality: Locality,
        index: usize,
    },
    Label {
        offset: u32,
    },
    Goto {
        offset: u32,
        label: ExprId,
    },
    Return {
        offset: u32,
        value: Option<ExprId>,
    },
    Conditional {
        offset: u32,
        test: ExprId,
        if_true: ExprId,
        if_false: Option<ExprId>,
    },
    Action {
        offset: u32,
        routine: u16,
        arguments: Vec<ExprId>,
    },
    Call {
        offset: u32,
        function: FuncId,
        arguments: Vec<ExprId>,
    },
    Vector {
        offset: u32,
        components: [ExprId; 3],
    },
    VectorIndex {
        offset: u32,
        vector: ExprId,
        index: usize,
    },
    Unary {
        offset: u32,
        op: UnaryOp,
        operand: ExprId,
    },
    Binary {
        offset: u32,
        op: BinaryOp,
        left: ExprId,
        right: ExprId,
        /// Set when this assignment also declares its left-hand
        /// parameter (the declare-initialize merge).
        declare_left: bool,
    },
}

impl Expression {
    /// The byte offset of the instruction this expression was
    /// synthesized from.
    pub fn offset(&self) -> u32 {
        match self {
            Expression::Block { offset, .. }
            | Expression::Constant { offset, .. }
            | Expression::Parameter { offset, .. }
            | Expression::Label { offset }
            | Expression::Goto { offset, .. }
            | Expression::Return { offset, .. }
            | Expression::Conditional { offset, .. }
            | Expression::Action { offset, .. }
            | Expression::Call { offset, .. }
            | Expression::Vector { offset, .. }
            | Expression::VectorIndex { offset, .. }
            | Expression::Unary { offset, .. }
            | Expression::Binary { offset, .. } => *offset,
        }
    }
}

// ============================================================================
// Functions
// ============================================================================

/// A function recovered from bytecode, rooted at the target of a JSR
/// (or the entry point for `_start`).
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub offset: u32,
    pub return_type: VariableType,
    pub in_argument_types: Vec<VariableType>,
    pub out_argument_types: Vec<VariableType>,
    pub block: ExprId,
}

// ============================================================================
// Expression tree
// ============================================================================

/// The decompiler's output: a forest of functions over a shared
/// expression arena, plus the set of parameters promoted to globals
/// by SAVEBP.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpressionTree {
    functions: Vec<Function>,
    expressions: Vec<Expression>,
    globals: BTreeSet<ExprId>,
}

impl ExpressionTree {
    /// Reconstruct a function and expression forest from a compiled
    /// program.  Decompilation failures are localized: a failing
    /// block is replaced by an empty block and a warning is logged,
    /// and the rest of the tree still builds.
    pub fn from_program(program: &Program, routines: &RoutineTable) -> ExpressionTree {
        decompiler::decompile(program, routines)
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0]
    }

    /// Look up a function by its recovered name (`_start`,
    /// `_globals`, `main`, `StartingConditional`).
    pub fn function_named(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    pub fn expression(&self, id: ExprId) -> &Expression {
        &self.expressions[id.0]
    }

    /// The expression list of a block, empty for non-blocks.
    pub fn block_expressions(&self, id: ExprId) -> &[ExprId] {
        match &self.expressions[id.0] {
            Expression::Block { expressions, .. } => expressions,
            _ => &[],
        }
    }

    pub fn globals(&self) -> &BTreeSet<ExprId> {
        &self.globals
    }

    pub(crate) fn new(
        functions: Vec<Function>,
        expressions: Vec<Expression>,
        globals: BTreeSet<ExprId>,
    ) -> ExpressionTree {
        ExpressionTree { functions, expressions, globals }
    }
}

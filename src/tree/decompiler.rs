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
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use log::{debug, warn};

use crate::bytecode::{Instruction, Literal, Opcode, Program, TypeSuffix, START_OFFSET};
use crate::vm::{RoutineTable, Variable, VariableType};

use super::{BinaryOp, ExprId, Expression, ExpressionTree, FuncId, Function, Locality, UnaryOp};

/// An error which aborts decompilation of a single block.  The block
/// is replaced by an empty one and the rest of the tree still builds.
#[derive(Clone, Debug, PartialEq)]
pub enum DecompileError {
    /// The instruction has no decompilation rule.
    UnsupportedInstruction(u32, Opcode),
    /// The symbolic stack did not hold the cells the instruction
    /// consumes.
    UnbalancedStack(u32),
    /// A stack-relative operand addressed a cell outside the current
    /// extent.
    InvalidStackAccess(u32, i64),
    /// A cell held an expression of a type the instruction cannot
    /// accept.
    InvalidOperandType(u32),
    /// The routine index names no entry in the table, or the argument
    /// count disagrees with its declaration.
    InvalidRoutineCall(u32, u16),
    /// Control transferred to a byte offset which names no
    /// instruction.
    InvalidOffset(u32),
}

impl fmt::Display for DecompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecompileError::UnsupportedInstruction(offset, op) => {
                write!(f, "cannot decompile {:?} at {:#x}", op, offset)
            }
            DecompileError::UnbalancedStack(offset) => {
                write!(f, "unbalanced stack at {:#x}", offset)
            }
            DecompileError::InvalidStackAccess(offset, index) => {
                write!(f, "out of bounds stack access ({}) at {:#x}", index, offset)
            }
            DecompileError::InvalidOperandType(offset) => {
                write!(f, "unexpected operand type at {:#x}", offset)
            }
            DecompileError::InvalidRoutineCall(offset, routine) => {
                write!(f, "invalid call of routine {} at {:#x}", routine, offset)
            }
            DecompileError::InvalidOffset(offset) => {
                write!(f, "no instruction at offset {:#x}", offset)
            }
        }
    }
}

impl std::error::Error for DecompileError {}

// ============================================================================
// Symbolic state
// ============================================================================

/// One cell of the symbolic stack: the parameter currently stored
/// there, and the function whose code allocated the cell.
#[derive(Clone, Copy)]
struct StackCell {
    allocated_by: FuncId,
    param: ExprId,
}

/// Execution state carried along a single decompilation path.
/// Cloned at every branch, subroutine call and continuation body, so
/// sibling paths never see each other's stack effects.
#[derive(Clone)]
struct PathState {
    call_stack: Vec<FuncId>,
    stack: Vec<StackCell>,
    num_globals: usize,
    prev_num_globals: usize,
    saved_action: Option<ExprId>,
}

/// Per-function accumulation: input and output parameters discovered
/// while decompiling the function's blocks, and the branch targets
/// already decompiled.
#[derive(Default)]
struct FunctionFrame {
    inputs: Vec<ExprId>,
    outputs: Vec<ExprId>,
    branches: BTreeMap<u32, ExprId>,
}

// ============================================================================
// Decompiler
// ============================================================================

struct Decompiler<'a> {
    program: &'a Program,
    routines: &'a RoutineTable,
    labels: HashMap<u32, ExprId>,
    expressions: Vec<Expression>,
    functions: Vec<Function>,
}

pub(super) fn decompile(program: &Program, routines: &RoutineTable) -> ExpressionTree {
    let mut d = Decompiler {
        program,
        routines,
        labels: HashMap::new(),
        expressions: Vec::new(),
        functions: Vec::new(),
    };
    // Every jump target becomes a label up front, so gotos can refer
    // to labels in blocks which have not been decompiled yet.
    for ins in program.instructions() {
        if matches!(ins.opcode, Opcode::JMP | Opcode::JZ | Opcode::JNZ) {
            let target = (ins.offset as i64 + ins.jump_offset as i64).max(0) as u32;
            let label = d.alloc(Expression::Label { offset: target });
            d.labels.insert(target, label);
        }
    }
    //
    let start = FuncId(0);
    d.functions.push(Function {
        name: "_start".to_string(),
        offset: START_OFFSET,
        return_type: VariableType::Void,
        in_argument_types: Vec::new(),
        out_argument_types: Vec::new(),
        block: ExprId(0),
    });
    let mut state = PathState {
        call_stack: vec![start],
        stack: Vec::new(),
        num_globals: 0,
        prev_num_globals: 0,
        saved_action: None,
    };
    let mut frame = FunctionFrame::default();
    let block = d.decompile_block_safely(START_OFFSET, &mut state, &mut frame);
    d.functions[0].block = block;
    // Entry-point branch blocks which fell outside the main body are
    // folded into it, the same as for subroutines.
    let branches: Vec<(u32, ExprId)> = frame.branches.iter().map(|(&k, &v)| (k, v)).collect();
    for (branch_offset, branch_block) in branches {
        if d.block_contains(block, branch_offset) {
            continue;
        }
        let orphaned = d.block_expressions_cloned(branch_block);
        for expression in orphaned {
            d.block_push(block, expression);
        }
    }
    // Collect the parameters SAVEBP promoted to globals.
    let mut globals = BTreeSet::new();
    for (i, expression) in d.expressions.iter().enumerate() {
        if let Expression::Parameter { locality: Locality::Global, .. } = expression {
            globals.insert(ExprId(i));
        }
    }
    ExpressionTree::new(d.functions, d.expressions, globals)
}

impl<'a> Decompiler<'a> {
    fn alloc(&mut self, expression: Expression) -> ExprId {
        self.expressions.push(expression);
        ExprId(self.expressions.len() - 1)
    }

    fn block_push(&mut self, block: ExprId, expression: ExprId) {
        if let Expression::Block { expressions, .. } = &mut self.expressions[block.0] {
            expressions.push(expression);
        }
    }

    fn new_param(&mut self, offset: u32, variable_type: VariableType) -> ExprId {
        self.alloc(Expression::Parameter {
            offset,
            variable_type,
            locality: Locality::Local,
            index: 0,
        })
    }

    fn param_type(&self, id: ExprId) -> VariableType {
        match &self.expressions[id.0] {
            Expression::Parameter { variable_type, .. } => *variable_type,
            _ => VariableType::Void,
        }
    }

    fn param_locality(&self, id: ExprId) -> Locality {
        match &self.expressions[id.0] {
            Expression::Parameter { locality, .. } => *locality,
            _ => Locality::Local,
        }
    }

    fn block_contains(&self, block: ExprId, offset: u32) -> bool {
        match &self.expressions[block.0] {
            Expression::Block { expressions, .. } => {
                !expressions.is_empty()
                    && offset >= self.expressions[expressions[0].0].offset()
                    && offset <= self.expressions[expressions[expressions.len() - 1].0].offset()
            }
            _ => false,
        }
    }

    fn decompile_block_safely(
        &mut self,
        start: u32,
        state: &mut PathState,
        frame: &mut FunctionFrame,
    ) -> ExprId {
        match self.decompile_block(start, state, frame) {
            Ok(block) => block,
            Err(e) => {
                warn!("block decompilation failed at {:08x}: {}", start, e);
                self.alloc(Expression::Block { offset: start, expressions: Vec::new() })
            }
        }
    }

    fn decompile_block(
        &mut self,
        start: u32,
        state: &mut PathState,
        frame: &mut FunctionFrame,
    ) -> Result<ExprId, DecompileError> {
        debug!("begin decompiling block at {:08x}", start);
        let block = self.alloc(Expression::Block { offset: start, expressions: Vec::new() });
        let current = state.call_stack[state.call_stack.len() - 1];
        //
        let mut offset = start;
        while offset < self.program.length() {
            if let Some(&label) = self.labels.get(&offset) {
                self.block_push(block, label);
            }
            let ins = self
                .program
                .instruction_at(offset)
                .ok_or(DecompileError::InvalidOffset(offset))?
                .clone();
            debug!("decompiling {:08x} {}", ins.offset, ins);
            //
            match ins.opcode {
                Opcode::NOP | Opcode::NOP2 => {}

                Opcode::RETN => {
                    let mut value = None;
                    if state.call_stack.len() == 1 && !state.stack.is_empty() {
                        let ret = state.stack[state.stack.len() - 1].param;
                        value = Some(ret);
                        self.functions[current.0].return_type = self.param_type(ret);
                    }
                    let ret_expr = self.alloc(Expression::Return { offset: ins.offset, value });
                    self.block_push(block, ret_expr);
                    break;
                }

                Opcode::JMP => {
                    let target = jump_target(&ins)?;
                    let label = *self
                        .labels
                        .get(&target)
                        .ok_or(DecompileError::InvalidOffset(target))?;
                    if !frame.branches.contains_key(&target) && ins.jump_offset > 0 {
                        let mut branch_state = state.clone();
                        let branch = self.decompile_block(target, &mut branch_state, frame)?;
                        frame.branches.insert(target, branch);
                    }
                    let goto = self.alloc(Expression::Goto { offset: ins.offset, label });
                    self.block_push(block, goto);
                    break;
                }

                Opcode::JSR => self.decompile_subroutine(&ins, block, state)?,

                Opcode::JZ | Opcode::JNZ => {
                    let target = jump_target(&ins)?;
                    let label = *self
                        .labels
                        .get(&target)
                        .ok_or(DecompileError::InvalidOffset(target))?;
                    let left = self.pop_cell(state, &ins)?.param;
                    let right = self
                        .alloc(Expression::Constant { offset: ins.offset, value: Variable::Int(0) });
                    let op = if ins.opcode == Opcode::JZ { BinaryOp::Equal } else { BinaryOp::NotEqual };
                    let test = self.alloc(Expression::Binary {
                        offset: ins.offset,
                        op,
                        left,
                        right,
                        declare_left: false,
                    });
                    let goto = self.alloc(Expression::Goto { offset: ins.offset, label });
                    let if_true = self
                        .alloc(Expression::Block { offset: ins.offset, expressions: vec![goto] });
                    let conditional = self.alloc(Expression::Conditional {
                        offset: ins.offset,
                        test,
                        if_true,
                        if_false: None,
                    });
                    self.block_push(block, conditional);
                    if !frame.branches.contains_key(&target) && ins.jump_offset > 0 {
                        let mut branch_state = state.clone();
                        let branch = self.decompile_block_safely(target, &mut branch_state, frame);
                        frame.branches.insert(target, branch);
                    }
                }

                Opcode::RSADD => {
                    let param = self.new_param(ins.offset, scalar_type(ins.suffix));
                    self.block_push(block, param);
                    state.stack.push(StackCell { allocated_by: current, param });
                }

                Opcode::CONST => {
                    let value = match &ins.literal {
                        Literal::Int(v) => Variable::Int(*v),
                        Literal::Float(v) => Variable::Float(*v),
                        Literal::String(bytes) => Variable::String(bytes.clone()),
                        Literal::Object(id) => Variable::Object(*id),
                        Literal::None => Variable::Void,
                    };
                    let var_type = value.var_type();
                    let constant = self.alloc(Expression::Constant { offset: ins.offset, value });
                    let param = self.new_param(ins.offset, var_type);
                    self.block_push(block, param);
                    let assign = self.assign(ins.offset, param, constant);
                    self.block_push(block, assign);
                    state.stack.push(StackCell { allocated_by: current, param });
                }

                Opcode::ACTION => self.decompile_action(&ins, block, state, current)?,

                Opcode::CPDOWNSP | Opcode::CPDOWNBP => {
                    self.decompile_copy_down(&ins, block, state, frame, current)?
                }

                Opcode::CPTOPSP | Opcode::CPTOPBP => {
                    self.decompile_copy_top(&ins, block, state, frame, current)?
                }

                Opcode::MOVSP => {
                    if ins.stack_offset >= 0 {
                        return Err(DecompileError::InvalidStackAccess(
                            ins.offset,
                            ins.stack_offset as i64,
                        ));
                    }
                    for _i in 0..(-ins.stack_offset / 4) {
                        self.pop_cell(state, &ins)?;
                    }
                }

                Opcode::NEG | Opcode::COMP | Opcode::NOT => {
                    let value = self.pop_cell(state, &ins)?.param;
                    let result = self.new_param(ins.offset, self.param_type(value));
                    self.block_push(block, result);
                    let op = match ins.opcode {
                        Opcode::NEG => UnaryOp::Negate,
                        Opcode::COMP => UnaryOp::OnesComplement,
                        _ => UnaryOp::Not,
                    };
                    let unary =
                        self.alloc(Expression::Unary { offset: ins.offset, op, operand: value });
                    let assign = self.assign(ins.offset, result, unary);
                    self.block_push(block, assign);
                    state.stack.push(StackCell { allocated_by: current, param: result });
                }

                Opcode::ADD | Opcode::SUB | Opcode::MUL | Opcode::DIV
                    if matches!(
                        ins.suffix,
                        TypeSuffix::VectorVector | TypeSuffix::FloatVector | TypeSuffix::VectorFloat
                    ) =>
                {
                    self.decompile_vector_arithmetic(&ins, block, state, current)?
                }

                Opcode::EQUAL | Opcode::NEQUAL if ins.suffix == TypeSuffix::StructStruct => {
                    self.decompile_struct_equality(&ins, block, state, current)?
                }

                Opcode::ADD
                | Opcode::SUB
                | Opcode::MUL
                | Opcode::DIV
                | Opcode::MOD
                | Opcode::LOGAND
                | Opcode::LOGOR
                | Opcode::INCOR
                | Opcode::EXCOR
                | Opcode::BOOLAND
                | Opcode::EQUAL
                | Opcode::NEQUAL
                | Opcode::GEQ
                | Opcode::GT
                | Opcode::LT
                | Opcode::LEQ
                | Opcode::SHLEFT
                | Opcode::SHRIGHT
                | Opcode::USHRIGHT => {
                    let right = self.pop_cell(state, &ins)?.param;
                    let left = self.pop_cell(state, &ins)?.param;
                    let result = self.new_param(ins.offset, binary_result_type(&ins));
                    self.block_push(block, result);
                    let binary = self.alloc(Expression::Binary {
                        offset: ins.offset,
                        op: binary_op(ins.opcode),
                        left,
                        right,
                        declare_left: false,
                    });
                    let assign = self.assign(ins.offset, result, binary);
                    self.block_push(block, assign);
                    state.stack.push(StackCell { allocated_by: current, param: result });
                }

                Opcode::STORESTATE => {
                    let mut inner_state = state.clone();
                    let body =
                        self.decompile_block_safely(ins.offset + 0x10, &mut inner_state, frame);
                    state.saved_action = Some(body);
                }

                Opcode::SAVEBP => {
                    state.prev_num_globals = state.num_globals;
                    state.num_globals = state.stack.len();
                    for i in 0..state.num_globals {
                        let param = state.stack[i].param;
                        if let Expression::Parameter { locality, .. } =
                            &mut self.expressions[param.0]
                        {
                            *locality = Locality::Global;
                        }
                    }
                }

                Opcode::RESTOREBP => {
                    // The globals count must stay visible past the
                    // restore so the enclosing subroutine can be
                    // recognized as the globals initializer.
                }

                Opcode::DECISP | Opcode::INCISP | Opcode::DECIBP | Opcode::INCIBP => {
                    self.decompile_counter(&ins, block, state, frame, current)?
                }

                Opcode::DESTRUCT => {
                    let count = (ins.size / 4) as usize;
                    let keep = (ins.size_no_destroy / 4) as usize;
                    let len = state.stack.len();
                    let window = (ins.stack_offset / 4) as i64;
                    if count > len {
                        return Err(DecompileError::UnbalancedStack(ins.offset));
                    }
                    if window < 0 || window as usize + keep > count {
                        return Err(DecompileError::InvalidStackAccess(ins.offset, window));
                    }
                    let start_keep = len - count + window as usize;
                    let preserved: Vec<StackCell> =
                        state.stack[start_keep..start_keep + keep].to_vec();
                    state.stack.truncate(len - count);
                    state.stack.extend(preserved);
                }

                Opcode::STORESTATEALL => {
                    return Err(DecompileError::UnsupportedInstruction(ins.offset, ins.opcode));
                }
            }
            //
            offset = ins.next_offset;
        }
        //
        self.merge_declarations(block);
        debug!("end decompiling block at {:08x}", start);
        Ok(block)
    }

    // ================================================================
    // Subroutines
    // ================================================================

    fn decompile_subroutine(
        &mut self,
        ins: &Instruction,
        block: ExprId,
        state: &mut PathState,
    ) -> Result<(), DecompileError> {
        let target = jump_target(ins)?;
        //
        let func = FuncId(self.functions.len());
        self.functions.push(Function {
            name: String::new(),
            offset: target,
            return_type: VariableType::Void,
            in_argument_types: Vec::new(),
            out_argument_types: Vec::new(),
            block: ExprId(0),
        });
        let mut sub_state = state.clone();
        sub_state.call_stack.push(func);
        let mut sub_frame = FunctionFrame::default();
        let sub_block = self.decompile_block_safely(target, &mut sub_state, &mut sub_frame);
        self.functions[func.0].block = sub_block;
        // Branch blocks which fell outside the main body are folded
        // into it.
        let branches: Vec<(u32, ExprId)> =
            sub_frame.branches.iter().map(|(&k, &v)| (k, v)).collect();
        for (branch_offset, branch_block) in branches {
            if self.block_contains(sub_block, branch_offset) {
                continue;
            }
            let orphaned = self.block_expressions_cloned(branch_block);
            for expression in orphaned {
                self.block_push(sub_block, expression);
            }
        }
        // The first subroutine off the entry point is either the
        // globals initializer or the script's main function; a main
        // with outputs is a conditional entry point.
        let mut is_main = false;
        if sub_state.call_stack.len() == 2 {
            if sub_state.num_globals > 0 {
                self.functions[func.0].name = "_globals".to_string();
            } else {
                is_main = true;
            }
        } else if sub_state.call_stack.len() == 3 && state.num_globals > 0 {
            is_main = true;
        }
        if is_main {
            self.functions[func.0].name = if !sub_frame.outputs.is_empty() {
                "StartingConditional".to_string()
            } else {
                "main".to_string()
            };
        }
        //
        let mut arguments = Vec::new();
        for &input in &sub_frame.inputs {
            arguments.push(input);
        }
        for &output in &sub_frame.outputs {
            arguments.push(output);
        }
        for &input in &sub_frame.inputs {
            let var_type = self.param_type(input);
            self.functions[func.0].in_argument_types.push(var_type);
        }
        for &output in &sub_frame.outputs {
            let var_type = self.param_type(output);
            self.functions[func.0].out_argument_types.push(var_type);
        }
        let call = self.alloc(Expression::Call { offset: ins.offset, function: func, arguments });
        self.block_push(block, call);
        Ok(())
    }

    // ================================================================
    // Routine calls
    // ================================================================

    fn decompile_action(
        &mut self,
        ins: &Instruction,
        block: ExprId,
        state: &mut PathState,
        current: FuncId,
    ) -> Result<(), DecompileError> {
        let routines = self.routines;
        let routine = routines
            .get(ins.routine)
            .ok_or(DecompileError::InvalidRoutineCall(ins.offset, ins.routine))?;
        //
        let mut arguments = Vec::new();
        for i in 0..ins.arg_count as usize {
            let arg_type = routine
                .argument_type(i)
                .ok_or(DecompileError::InvalidRoutineCall(ins.offset, ins.routine))?;
            let argument = match arg_type {
                VariableType::Vector => {
                    let components = self.pop_vector_params(state, ins)?;
                    self.alloc(Expression::Vector { offset: ins.offset, components })
                }
                VariableType::Action => state
                    .saved_action
                    .ok_or(DecompileError::InvalidOperandType(ins.offset))?,
                _ => self.pop_cell(state, ins)?.param,
            };
            arguments.push(argument);
        }
        let action =
            self.alloc(Expression::Action { offset: ins.offset, routine: ins.routine, arguments });
        //
        let return_type = routine.return_type();
        if return_type == VariableType::Void {
            self.block_push(block, action);
            return Ok(());
        }
        let result = self.new_param(ins.offset, return_type);
        self.block_push(block, result);
        let assign = self.assign(ins.offset, result, action);
        self.block_push(block, assign);
        if return_type == VariableType::Vector {
            self.spread_vector_components(ins.offset, result, block, state, current);
        } else {
            state.stack.push(StackCell { allocated_by: current, param: result });
        }
        Ok(())
    }

    // ================================================================
    // Copies
    // ================================================================

    fn decompile_copy_down(
        &mut self,
        ins: &Instruction,
        block: ExprId,
        state: &mut PathState,
        frame: &mut FunctionFrame,
        current: FuncId,
    ) -> Result<(), DecompileError> {
        let stack_size = state.stack.len() as i64;
        if ins.stack_offset >= 0 {
            return Err(DecompileError::InvalidStackAccess(ins.offset, ins.stack_offset as i64));
        }
        let base =
            if ins.opcode == Opcode::CPDOWNSP { stack_size } else { state.num_globals as i64 };
        let start = base + (ins.stack_offset / 4) as i64;
        let count = (ins.size / 4) as usize;
        if start < 0 || start as usize + count > state.stack.len() {
            return Err(DecompileError::InvalidStackAccess(ins.offset, start));
        }
        if count > state.stack.len() {
            return Err(DecompileError::UnbalancedStack(ins.offset));
        }
        for i in 0..count {
            let left_idx = start as usize + count - i - 1;
            let right_idx = state.stack.len() - i - 1;
            let left = state.stack[left_idx];
            let right = state.stack[right_idx];
            // A write into a caller's cell surfaces as an output
            // parameter of the current function.
            let destination = if left.allocated_by != current
                && self.param_locality(left.param) != Locality::Global
            {
                let index = output_index(frame, left.param);
                self.alloc(Expression::Parameter {
                    offset: ins.offset,
                    variable_type: self.param_type(left.param),
                    locality: Locality::Output,
                    index,
                })
            } else {
                left.param
            };
            let assign = self.assign(ins.offset, destination, right.param);
            self.block_push(block, assign);
            state.stack[left_idx] =
                StackCell { allocated_by: left.allocated_by, param: right.param };
        }
        Ok(())
    }

    fn decompile_copy_top(
        &mut self,
        ins: &Instruction,
        block: ExprId,
        state: &mut PathState,
        frame: &mut FunctionFrame,
        current: FuncId,
    ) -> Result<(), DecompileError> {
        let stack_size = state.stack.len() as i64;
        if ins.stack_offset >= 0 {
            return Err(DecompileError::InvalidStackAccess(ins.offset, ins.stack_offset as i64));
        }
        let base = if ins.opcode == Opcode::CPTOPSP { stack_size } else { state.num_globals as i64 };
        let start = base + (ins.stack_offset / 4) as i64;
        let count = (ins.size / 4) as usize;
        if start < 0 || start as usize + count > state.stack.len() {
            return Err(DecompileError::InvalidStackAccess(ins.offset, start));
        }
        for i in 0..count {
            let cell = state.stack[start as usize + i];
            // Reading a caller's cell surfaces as an input parameter
            // of the current function.
            let source = if cell.allocated_by != current
                && self.param_locality(cell.param) != Locality::Global
            {
                let index = input_index(frame, cell.param);
                self.alloc(Expression::Parameter {
                    offset: ins.offset,
                    variable_type: self.param_type(cell.param),
                    locality: Locality::Input,
                    index,
                })
            } else {
                cell.param
            };
            let param = self.alloc(Expression::Parameter {
                offset: ins.offset,
                variable_type: self.param_type(source),
                locality: Locality::Local,
                index: i,
            });
            self.block_push(block, param);
            let assign = self.assign(ins.offset, param, source);
            self.block_push(block, assign);
            state.stack.push(StackCell { allocated_by: current, param });
        }
        Ok(())
    }

    // ================================================================
    // Counters
    // ================================================================

    fn decompile_counter(
        &mut self,
        ins: &Instruction,
        block: ExprId,
        state: &mut PathState,
        frame: &mut FunctionFrame,
        current: FuncId,
    ) -> Result<(), DecompileError> {
        if ins.stack_offset >= 0 {
            return Err(DecompileError::InvalidStackAccess(ins.offset, ins.stack_offset as i64));
        }
        let sp = matches!(ins.opcode, Opcode::DECISP | Opcode::INCISP);
        let base = if sp { state.stack.len() as i64 } else { state.num_globals as i64 };
        let index = base + (ins.stack_offset / 4) as i64;
        if index < 0 || index >= state.stack.len() as i64 {
            return Err(DecompileError::InvalidStackAccess(ins.offset, index));
        }
        let cell = state.stack[index as usize];
        let destination = if cell.allocated_by != current
            && self.param_locality(cell.param) != Locality::Global
        {
            let out = output_index(frame, cell.param);
            self.alloc(Expression::Parameter {
                offset: ins.offset,
                variable_type: self.param_type(cell.param),
                locality: Locality::Output,
                index: out,
            })
        } else {
            cell.param
        };
        let op = match ins.opcode {
            Opcode::DECISP | Opcode::DECIBP => UnaryOp::Decrement,
            _ => UnaryOp::Increment,
        };
        let unary = self.alloc(Expression::Unary { offset: ins.offset, op, operand: destination });
        self.block_push(block, unary);
        Ok(())
    }

    // ================================================================
    // Vector arithmetic
    // ================================================================

    fn decompile_vector_arithmetic(
        &mut self,
        ins: &Instruction,
        block: ExprId,
        state: &mut PathState,
        current: FuncId,
    ) -> Result<(), DecompileError> {
        let (left, right) = match ins.suffix {
            TypeSuffix::VectorVector => {
                let right_comps = self.pop_vector_params(state, ins)?;
                let right = self.alloc(Expression::Vector { offset: ins.offset, components: right_comps });
                let left_comps = self.pop_vector_params(state, ins)?;
                let left = self.alloc(Expression::Vector { offset: ins.offset, components: left_comps });
                (left, right)
            }
            TypeSuffix::FloatVector => {
                let right_comps = self.pop_vector_params(state, ins)?;
                let right = self.alloc(Expression::Vector { offset: ins.offset, components: right_comps });
                let left = self.pop_cell(state, ins)?.param;
                if self.param_type(left) != VariableType::Float {
                    return Err(DecompileError::InvalidOperandType(ins.offset));
                }
                (left, right)
            }
            _ => {
                let right = self.pop_cell(state, ins)?.param;
                if self.param_type(right) != VariableType::Float {
                    return Err(DecompileError::InvalidOperandType(ins.offset));
                }
                let left_comps = self.pop_vector_params(state, ins)?;
                let left = self.alloc(Expression::Vector { offset: ins.offset, components: left_comps });
                (left, right)
            }
        };
        //
        let result = self.new_param(ins.offset, VariableType::Vector);
        self.block_push(block, result);
        let binary = self.alloc(Expression::Binary {
            offset: ins.offset,
            op: binary_op(ins.opcode),
            left,
            right,
            declare_left: false,
        });
        let assign = self.assign(ins.offset, result, binary);
        self.block_push(block, assign);
        self.spread_vector_components(ins.offset, result, block, state, current);
        Ok(())
    }

    /// Materialize the three scalar components of a vector-typed
    /// parameter and push them back on the symbolic stack (Z first,
    /// so X ends up on top), so later code can refer to each
    /// component.
    fn spread_vector_components(
        &mut self,
        offset: u32,
        vector: ExprId,
        block: ExprId,
        state: &mut PathState,
        current: FuncId,
    ) {
        let mut components = [ExprId(0); 3];
        for index in 0..3 {
            let vector_index =
                self.alloc(Expression::VectorIndex { offset, vector, index });
            let param = self.alloc(Expression::Parameter {
                offset,
                variable_type: VariableType::Float,
                locality: Locality::Local,
                index,
            });
            self.block_push(block, param);
            let assign = self.assign(offset, param, vector_index);
            self.block_push(block, assign);
            components[index] = param;
        }
        state.stack.push(StackCell { allocated_by: current, param: components[2] });
        state.stack.push(StackCell { allocated_by: current, param: components[1] });
        state.stack.push(StackCell { allocated_by: current, param: components[0] });
    }

    // ================================================================
    // Structure comparison
    // ================================================================

    fn decompile_struct_equality(
        &mut self,
        ins: &Instruction,
        block: ExprId,
        state: &mut PathState,
        current: FuncId,
    ) -> Result<(), DecompileError> {
        let count = (ins.size / 4) as usize;
        let mut right = Vec::with_capacity(count);
        for _i in 0..count {
            right.push(self.pop_cell(state, ins)?);
        }
        let mut left = Vec::with_capacity(count);
        for _i in 0..count {
            left.push(self.pop_cell(state, ins)?);
        }
        //
        let result = self.new_param(ins.offset, VariableType::Int);
        self.block_push(block, result);
        let equal = ins.opcode == Opcode::EQUAL;
        for i in 0..count {
            let compare = self.alloc(Expression::Binary {
                offset: ins.offset,
                op: if equal { BinaryOp::Equal } else { BinaryOp::NotEqual },
                left: left[i].param,
                right: right[i].param,
                declare_left: false,
            });
            let fold = self.alloc(Expression::Binary {
                offset: ins.offset,
                op: if equal { BinaryOp::LogicalAnd } else { BinaryOp::LogicalOr },
                left: result,
                right: compare,
                declare_left: false,
            });
            let assign = self.assign(ins.offset, result, fold);
            self.block_push(block, assign);
        }
        state.stack.push(StackCell { allocated_by: current, param: result });
        Ok(())
    }

    // ================================================================
    // Helpers
    // ================================================================

    fn assign(&mut self, offset: u32, left: ExprId, right: ExprId) -> ExprId {
        self.alloc(Expression::Binary {
            offset,
            op: BinaryOp::Assign,
            left,
            right,
            declare_left: false,
        })
    }

    fn pop_cell(
        &mut self,
        state: &mut PathState,
        ins: &Instruction,
    ) -> Result<StackCell, DecompileError> {
        state.stack.pop().ok_or(DecompileError::UnbalancedStack(ins.offset))
    }

    /// Pop a three-cell vector off the symbolic stack (X, then Y,
    /// then Z), checking each component is a Float.
    fn pop_vector_params(
        &mut self,
        state: &mut PathState,
        ins: &Instruction,
    ) -> Result<[ExprId; 3], DecompileError> {
        let x = self.pop_cell(state, ins)?.param;
        let y = self.pop_cell(state, ins)?.param;
        let z = self.pop_cell(state, ins)?.param;
        for component in [x, y, z] {
            if self.param_type(component) != VariableType::Float {
                return Err(DecompileError::InvalidOperandType(ins.offset));
            }
        }
        Ok([x, y, z])
    }

    fn block_expressions_cloned(&self, block: ExprId) -> Vec<ExprId> {
        match &self.expressions[block.0] {
            Expression::Block { expressions, .. } => expressions.clone(),
            _ => Vec::new(),
        }
    }

    /// Merge each adjacent `(parameter, assignment-to-it)` pair into
    /// a single declare-initialize assignment.
    fn merge_declarations(&mut self, block: ExprId) {
        let list = self.block_expressions_cloned(block);
        let mut merged = Vec::with_capacity(list.len());
        let mut i = 0;
        while i < list.len() {
            if i + 1 < list.len() {
                let is_param = matches!(self.expressions[list[i].0], Expression::Parameter { .. });
                let assigned = match &self.expressions[list[i + 1].0] {
                    Expression::Binary { op: BinaryOp::Assign, left, .. } => Some(*left),
                    _ => None,
                };
                if is_param && assigned == Some(list[i]) {
                    if let Expression::Binary { declare_left, .. } =
                        &mut self.expressions[list[i + 1].0]
                    {
                        *declare_left = true;
                    }
                    merged.push(list[i + 1]);
                    i += 2;
                    continue;
                }
            }
            merged.push(list[i]);
            i += 1;
        }
        if let Expression::Block { expressions, .. } = &mut self.expressions[block.0] {
            *expressions = merged;
        }
    }
}

// ============================================================================
// Free helpers
// ============================================================================

fn jump_target(ins: &Instruction) -> Result<u32, DecompileError> {
    let target = ins.offset as i64 + ins.jump_offset as i64;
    if target < 0 || target > u32::MAX as i64 {
        Err(DecompileError::InvalidOffset(ins.offset))
    } else {
        Ok(target as u32)
    }
}

fn scalar_type(suffix: TypeSuffix) -> VariableType {
    match suffix {
        TypeSuffix::Int => VariableType::Int,
        TypeSuffix::Float => VariableType::Float,
        TypeSuffix::String => VariableType::String,
        TypeSuffix::Object => VariableType::Object,
        TypeSuffix::Effect => VariableType::Effect,
        TypeSuffix::Event => VariableType::Event,
        TypeSuffix::Location => VariableType::Location,
        TypeSuffix::Talent => VariableType::Talent,
        _ => VariableType::Void,
    }
}

/// The result type of a scalar binary operation.
fn binary_result_type(ins: &Instruction) -> VariableType {
    match ins.opcode {
        Opcode::ADD | Opcode::SUB | Opcode::MUL | Opcode::DIV => match ins.suffix {
            TypeSuffix::IntFloat | TypeSuffix::FloatInt | TypeSuffix::FloatFloat => {
                VariableType::Float
            }
            TypeSuffix::StringString => VariableType::String,
            _ => VariableType::Int,
        },
        _ => VariableType::Int,
    }
}

fn binary_op(opcode: Opcode) -> BinaryOp {
    match opcode {
        Opcode::ADD => BinaryOp::Add,
        Opcode::SUB => BinaryOp::Subtract,
        Opcode::MUL => BinaryOp::Multiply,
        Opcode::DIV => BinaryOp::Divide,
        Opcode::MOD => BinaryOp::Modulo,
        Opcode::LOGAND => BinaryOp::LogicalAnd,
        Opcode::LOGOR => BinaryOp::LogicalOr,
        Opcode::INCOR => BinaryOp::BitwiseOr,
        Opcode::EXCOR => BinaryOp::BitwiseExclusiveOr,
        Opcode::BOOLAND => BinaryOp::BitwiseAnd,
        Opcode::SHLEFT => BinaryOp::LeftShift,
        Opcode::SHRIGHT => BinaryOp::RightShift,
        Opcode::USHRIGHT => BinaryOp::RightShiftUnsigned,
        Opcode::EQUAL => BinaryOp::Equal,
        Opcode::NEQUAL => BinaryOp::NotEqual,
        Opcode::GEQ => BinaryOp::GreaterThanOrEqual,
        Opcode::GT => BinaryOp::GreaterThan,
        Opcode::LT => BinaryOp::LessThan,
        Opcode::LEQ => BinaryOp::LessThanOrEqual,
        _ => BinaryOp::Assign,
    }
}

fn input_index(frame: &mut FunctionFrame, param: ExprId) -> usize {
    match frame.inputs.iter().position(|&p| p == param) {
        Some(index) => index,
        None => {
            frame.inputs.push(param);
            frame.inputs.len() - 1
        }
    }
}

fn output_index(frame: &mut FunctionFrame, param: ExprId) -> usize {
    match frame.outputs.iter().position(|&p| p == param) {
        Some(index) => index,
        None => {
            frame.outputs.push(param);
            frame.outputs.len() - 1
        }
    }
}

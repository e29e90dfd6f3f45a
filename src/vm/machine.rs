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
use std::sync::Arc;

use log::debug;

use crate::bytecode::{Instruction, Opcode, Program, TypeSuffix, START_OFFSET};

use super::errors::{ArithmeticError, ExecutionError, RoutineError, StackError, TypeError};
use super::routine::RoutineTable;
use super::variable::{Variable, VariableType};

/// A captured execution state: a copy of the globals window, a copy
/// of the active locals window, a handle to the containing program
/// and the offset of the first body instruction.  Continuations are
/// one-shot resumable via [`run_continuation`](super::run_continuation).
#[derive(Clone, Debug)]
pub struct Continuation {
    pub globals: Vec<Variable>,
    pub locals: Vec<Variable>,
    pub program: Arc<Program>,
    pub offset: u32,
}

/// Per-invocation context handed to routine handlers: the routine
/// table itself plus the identities the engine cares about.
pub struct ExecutionContext<'a> {
    pub routines: &'a RoutineTable,
    pub caller_id: u32,
    pub triggerer_id: u32,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(routines: &'a RoutineTable) -> Self {
        ExecutionContext { routines, caller_id: 0, triggerer_id: 0 }
    }
}

// ============================================================================
// Execution
// ============================================================================

/// A single synchronous interpretation of a program.  Owns its
/// operand stack, return-offset stack and base-pointer stack for the
/// duration of [`run`](Execution::run); the program and routine table
/// are shared and immutable.
pub struct Execution<'a> {
    program: Arc<Program>,
    ctx: ExecutionContext<'a>,
    resume: Option<Arc<Continuation>>,
    resumed: bool,
    stack: Vec<Variable>,
    return_offsets: Vec<u32>,
    bp_stack: Vec<usize>,
    global_count: usize,
    saved_state: Option<Arc<Continuation>>,
    next_offset: u32,
}

impl<'a> Execution<'a> {
    pub fn new(program: Arc<Program>, ctx: ExecutionContext<'a>) -> Self {
        Execution {
            program,
            ctx,
            resume: None,
            resumed: false,
            stack: Vec::new(),
            return_offsets: Vec::new(),
            bp_stack: Vec::new(),
            global_count: 0,
            saved_state: None,
            next_offset: 0,
        }
    }

    /// Construct an execution which resumes a saved continuation
    /// instead of starting at the program entry point.
    pub fn resume(state: Arc<Continuation>, ctx: ExecutionContext<'a>) -> Self {
        let mut exec = Execution::new(state.program.clone(), ctx);
        exec.resume = Some(state);
        exec.resumed = true;
        exec
    }

    /// The current operand stack, bottom first.
    pub fn stack(&self) -> &[Variable] {
        &self.stack
    }

    /// The most recently captured continuation, if any.
    pub fn saved_state(&self) -> Option<&Arc<Continuation>> {
        self.saved_state.as_ref()
    }

    /// Execute instructions until the instruction pointer runs off
    /// the end of the program.  Returns the exit value: the implicit
    /// Int cell at the bottom of the stack.
    pub fn run(&mut self) -> Result<i32, ExecutionError> {
        let program = self.program.clone();
        let mut offset = START_OFFSET;
        self.stack.push(Variable::Int(0));
        if let Some(state) = self.resume.take() {
            self.stack.extend(state.globals.iter().cloned());
            self.global_count = self.stack.len();
            self.stack.extend(state.locals.iter().cloned());
            offset = state.offset;
        }
        while offset < program.length() {
            let ins = match program.instruction_at(offset) {
                Some(ins) => ins,
                None => {
                    return Err(ExecutionError::InvalidOffset(offset));
                }
            };
            self.next_offset = ins.next_offset;
            debug!("script {}: {:08x} {}", program.name(), ins.offset, ins);
            self.execute(ins)?;
            offset = self.next_offset;
        }
        match self.stack.first() {
            Some(Variable::Int(value)) => Ok(*value),
            Some(other) => Err(TypeError::UnexpectedStackType(other.var_type()).into()),
            None => Err(StackError::Underflow.into()),
        }
    }

    // ================================================================
    // Dispatch
    // ================================================================

    fn execute(&mut self, ins: &Instruction) -> Result<(), ExecutionError> {
        match ins.opcode {
            Opcode::CPDOWNSP => self.execute_copy_down(ins, false),
            Opcode::CPDOWNBP => self.execute_copy_down(ins, true),
            Opcode::CPTOPSP => self.execute_copy_top(ins, false),
            Opcode::CPTOPBP => self.execute_copy_top(ins, true),
            Opcode::RSADD => self.execute_reserve(ins),
            Opcode::CONST => self.execute_push_constant(ins),
            Opcode::ACTION => self.execute_call_routine(ins),
            Opcode::LOGAND => self.execute_int_binary(|l, r| ((l != 0) && (r != 0)) as i32),
            Opcode::LOGOR => self.execute_int_binary(|l, r| ((l != 0) || (r != 0)) as i32),
            Opcode::INCOR => self.execute_int_binary(|l, r| l | r),
            Opcode::EXCOR => self.execute_int_binary(|l, r| l ^ r),
            Opcode::BOOLAND => self.execute_int_binary(|l, r| l & r),
            Opcode::SHLEFT => self.execute_int_binary(|l, r| l.wrapping_shl(r as u32)),
            Opcode::SHRIGHT => self.execute_int_binary(|l, r| l.wrapping_shr(r as u32)),
            Opcode::USHRIGHT => {
                self.execute_int_binary(|l, r| ((l as u32).wrapping_shr(r as u32)) as i32)
            }
            Opcode::EQUAL | Opcode::NEQUAL => self.execute_equality(ins),
            Opcode::GEQ => self.execute_comparison(Variable::greater_equal),
            Opcode::GT => self.execute_comparison(Variable::greater_than),
            Opcode::LT => self.execute_comparison(Variable::less_than),
            Opcode::LEQ => self.execute_comparison(Variable::less_equal),
            Opcode::ADD | Opcode::SUB | Opcode::MUL | Opcode::DIV => self.execute_arithmetic(ins),
            Opcode::MOD => self.execute_mod(),
            Opcode::NEG => self.execute_negate(ins),
            Opcode::COMP => self.execute_ones_complement(),
            Opcode::NOT => self.execute_logical_not(),
            Opcode::MOVSP => self.execute_adjust_sp(ins),
            Opcode::JMP => {
                self.next_offset = jump_target(ins)?;
                Ok(())
            }
            Opcode::JSR => {
                self.return_offsets.push(ins.next_offset);
                self.next_offset = jump_target(ins)?;
                Ok(())
            }
            Opcode::JZ => {
                if self.pop_int()? == 0 {
                    self.next_offset = jump_target(ins)?;
                }
                Ok(())
            }
            Opcode::JNZ => {
                if self.pop_int()? != 0 {
                    self.next_offset = jump_target(ins)?;
                }
                Ok(())
            }
            Opcode::RETN => {
                self.next_offset = match self.return_offsets.pop() {
                    Some(offset) => offset,
                    None => self.program.length(),
                };
                Ok(())
            }
            Opcode::DESTRUCT => self.execute_destruct(ins),
            Opcode::DECISP => self.execute_counter(ins, false, -1),
            Opcode::INCISP => self.execute_counter(ins, false, 1),
            Opcode::DECIBP => self.execute_counter(ins, true, -1),
            Opcode::INCIBP => self.execute_counter(ins, true, 1),
            Opcode::SAVEBP => {
                self.bp_stack.push(self.global_count);
                self.global_count = self.stack.len();
                Ok(())
            }
            Opcode::RESTOREBP => {
                self.global_count = self.bp_stack.pop().ok_or(StackError::Underflow)?;
                Ok(())
            }
            Opcode::STORESTATE => self.execute_store_state(ins),
            Opcode::NOP | Opcode::NOP2 => Ok(()),
            Opcode::STORESTATEALL => Err(ExecutionError::Unsupported(ins.opcode)),
        }
    }

    // ================================================================
    // Stack helpers
    // ================================================================

    fn pop(&mut self) -> Result<Variable, ExecutionError> {
        self.stack.pop().ok_or_else(|| StackError::Underflow.into())
    }

    fn pop_int(&mut self) -> Result<i32, ExecutionError> {
        match self.pop()? {
            Variable::Int(value) => Ok(value),
            other => Err(TypeError::UnexpectedStackType(other.var_type()).into()),
        }
    }

    fn pop_float(&mut self) -> Result<f32, ExecutionError> {
        match self.pop()? {
            Variable::Float(value) => Ok(value),
            other => Err(TypeError::UnexpectedStackType(other.var_type()).into()),
        }
    }

    /// Pop a three-cell vector; the component order on the stack is
    /// Z, Y, X bottom-to-top, so X comes off first.
    fn pop_vector(&mut self) -> Result<[f32; 3], ExecutionError> {
        let x = self.pop_float()?;
        let y = self.pop_float()?;
        let z = self.pop_float()?;
        Ok([x, y, z])
    }

    fn push_vector(&mut self, [x, y, z]: [f32; 3]) {
        self.stack.push(Variable::Float(z));
        self.stack.push(Variable::Float(y));
        self.stack.push(Variable::Float(x));
    }

    /// Resolve a cell index relative to either the stack top or the
    /// base pointer.  Offsets are in bytes, four per cell.
    fn cell_index(&self, stack_offset: i32, bp: bool) -> Result<usize, ExecutionError> {
        let base = if bp { self.global_count } else { self.stack.len() };
        let index = base as i64 + (stack_offset / 4) as i64;
        if index < 0 || index >= self.stack.len() as i64 {
            Err(StackError::OutOfBoundsAccess(index).into())
        } else {
            Ok(index as usize)
        }
    }

    // ================================================================
    // Handlers
    // ================================================================

    fn execute_copy_down(&mut self, ins: &Instruction, bp: bool) -> Result<(), ExecutionError> {
        let count = (ins.size / 4) as usize;
        let len = self.stack.len();
        if count > len {
            return Err(StackError::Underflow.into());
        }
        let base = if bp { self.global_count } else { len };
        let dst = base as i64 + (ins.stack_offset / 4) as i64;
        if dst < 0 || dst as usize + count > len {
            return Err(StackError::OutOfBoundsAccess(dst).into());
        }
        let src = len - count;
        for i in 0..count {
            self.stack[dst as usize + i] = self.stack[src + i].clone();
        }
        Ok(())
    }

    fn execute_copy_top(&mut self, ins: &Instruction, bp: bool) -> Result<(), ExecutionError> {
        let count = (ins.size / 4) as usize;
        let len = self.stack.len();
        let base = if bp { self.global_count } else { len };
        let src = base as i64 + (ins.stack_offset / 4) as i64;
        if src < 0 || src as usize + count > len {
            return Err(StackError::OutOfBoundsAccess(src).into());
        }
        for i in 0..count {
            let cell = self.stack[src as usize + i].clone();
            self.stack.push(cell);
        }
        Ok(())
    }

    fn execute_reserve(&mut self, ins: &Instruction) -> Result<(), ExecutionError> {
        // The implicit bottom cell doubles as the reserved return
        // slot of a conditional entry point.
        if ins.offset == START_OFFSET
            && !self.resumed
            && self.stack.len() == 1
            && ins.suffix == TypeSuffix::Int
        {
            return Ok(());
        }
        let var_type = match ins.suffix {
            TypeSuffix::Int => VariableType::Int,
            TypeSuffix::Float => VariableType::Float,
            TypeSuffix::String => VariableType::String,
            TypeSuffix::Object => VariableType::Object,
            TypeSuffix::Effect => VariableType::Effect,
            TypeSuffix::Event => VariableType::Event,
            TypeSuffix::Location => VariableType::Location,
            TypeSuffix::Talent => VariableType::Talent,
            _ => VariableType::Void,
        };
        self.stack.push(Variable::default_of(var_type));
        Ok(())
    }

    fn execute_push_constant(&mut self, ins: &Instruction) -> Result<(), ExecutionError> {
        use crate::bytecode::Literal;
        let value = match &ins.literal {
            Literal::Int(value) => Variable::Int(*value),
            Literal::Float(value) => Variable::Float(*value),
            Literal::String(bytes) => Variable::String(bytes.clone()),
            Literal::Object(id) => Variable::Object(*id),
            Literal::None => Variable::Void,
        };
        self.stack.push(value);
        Ok(())
    }

    fn execute_call_routine(&mut self, ins: &Instruction) -> Result<(), ExecutionError> {
        let routines = self.ctx.routines;
        let routine = match routines.get(ins.routine) {
            Some(routine) => routine,
            None => {
                return Err(RoutineError::UnknownRoutine(ins.routine).into());
            }
        };
        let declared = routine.argument_types().len();
        if declared != ins.arg_count as usize {
            return Err(RoutineError::ArgCountMismatch(declared, ins.arg_count as usize).into());
        }
        debug!("script {}: calling routine {}", self.program.name(), routine.name());
        //
        let mut args = Vec::with_capacity(declared);
        for i in 0..declared {
            let arg = match routine.argument_types()[i] {
                VariableType::Vector => Variable::Vector(self.pop_vector()?),
                VariableType::Action => {
                    // The most recently captured continuation stands
                    // in for the argument; nothing is popped.
                    let state = match &self.saved_state {
                        Some(state) => state.clone(),
                        None => {
                            return Err(
                                TypeError::UnexpectedStackType(VariableType::Action).into()
                            );
                        }
                    };
                    Variable::Action(state)
                }
                declared_type => {
                    let value = self.pop()?;
                    if value.var_type() != declared_type {
                        return Err(
                            TypeError::OperandTypeMismatch(declared_type, value.var_type()).into()
                        );
                    }
                    value
                }
            };
            args.push(arg);
        }
        //
        let ret = routine.invoke(&args, &self.ctx);
        match routine.return_type() {
            VariableType::Void => {
                if ret.var_type() != VariableType::Void {
                    return Err(
                        RoutineError::ReturnTypeMismatch(VariableType::Void, ret.var_type()).into()
                    );
                }
            }
            VariableType::Vector => match ret {
                Variable::Vector(components) => self.push_vector(components),
                other => {
                    return Err(RoutineError::ReturnTypeMismatch(
                        VariableType::Vector,
                        other.var_type(),
                    )
                    .into());
                }
            },
            declared_type => {
                if ret.var_type() != declared_type {
                    return Err(
                        RoutineError::ReturnTypeMismatch(declared_type, ret.var_type()).into()
                    );
                }
                self.stack.push(ret);
            }
        }
        Ok(())
    }

    fn execute_int_binary(&mut self, op: fn(i32, i32) -> i32) -> Result<(), ExecutionError> {
        let right = self.pop_int()?;
        let left = self.pop_int()?;
        self.stack.push(Variable::Int(op(left, right)));
        Ok(())
    }

    fn execute_equality(&mut self, ins: &Instruction) -> Result<(), ExecutionError> {
        let negate = ins.opcode == Opcode::NEQUAL;
        if ins.suffix == TypeSuffix::StructStruct {
            let count = (ins.size / 4) as usize;
            let len = self.stack.len();
            if len < count * 2 {
                return Err(StackError::Underflow.into());
            }
            let right = self.stack.split_off(len - count);
            let left = self.stack.split_off(len - count * 2);
            // AND of per-cell equality, or OR of per-cell inequality.
            let mut result = !negate;
            for (l, r) in left.iter().zip(right.iter()) {
                let eq = l.equals(r)?;
                if negate {
                    result = result || !eq;
                } else {
                    result = result && eq;
                }
            }
            self.stack.push(Variable::Int(result as i32));
        } else {
            let right = self.pop()?;
            let left = self.pop()?;
            let eq = left.equals(&right)?;
            self.stack.push(Variable::Int((eq != negate) as i32));
        }
        Ok(())
    }

    fn execute_comparison(
        &mut self,
        op: fn(&Variable, &Variable) -> Result<bool, ExecutionError>,
    ) -> Result<(), ExecutionError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = op(&left, &right)?;
        self.stack.push(Variable::Int(result as i32));
        Ok(())
    }

    fn execute_arithmetic(&mut self, ins: &Instruction) -> Result<(), ExecutionError> {
        match ins.suffix {
            TypeSuffix::VectorVector => {
                let right = self.pop_vector()?;
                let left = self.pop_vector()?;
                let mut result = [0.0f32; 3];
                for i in 0..3 {
                    result[i] = match ins.opcode {
                        Opcode::ADD => left[i] + right[i],
                        _ => left[i] - right[i],
                    };
                }
                self.push_vector(result);
            }
            TypeSuffix::FloatVector => {
                let right = self.pop_vector()?;
                let left = self.pop_float()?;
                let mut result = [0.0f32; 3];
                for i in 0..3 {
                    result[i] = match ins.opcode {
                        Opcode::MUL => left * right[i],
                        _ => left / right[i],
                    };
                }
                self.push_vector(result);
            }
            TypeSuffix::VectorFloat => {
                let right = self.pop_float()?;
                let left = self.pop_vector()?;
                let mut result = [0.0f32; 3];
                for i in 0..3 {
                    result[i] = match ins.opcode {
                        Opcode::MUL => left[i] * right,
                        _ => left[i] / right,
                    };
                }
                self.push_vector(result);
            }
            _ => {
                let right = self.pop()?;
                let left = self.pop()?;
                let result = match ins.opcode {
                    Opcode::ADD => left.add(&right)?,
                    Opcode::SUB => left.sub(&right)?,
                    Opcode::MUL => left.mul(&right)?,
                    _ => left.div(&right)?,
                };
                self.stack.push(result);
            }
        }
        Ok(())
    }

    fn execute_mod(&mut self) -> Result<(), ExecutionError> {
        let right = self.pop_int()?;
        let left = self.pop_int()?;
        if right == 0 {
            return Err(ArithmeticError::ModuloByZero.into());
        }
        self.stack.push(Variable::Int(left.wrapping_rem(right)));
        Ok(())
    }

    fn execute_negate(&mut self, ins: &Instruction) -> Result<(), ExecutionError> {
        let top = self.stack.last_mut().ok_or(StackError::Underflow)?;
        match (ins.suffix, &mut *top) {
            (TypeSuffix::Int, Variable::Int(value)) => {
                *value = value.wrapping_neg();
                Ok(())
            }
            (TypeSuffix::Float, Variable::Float(value)) => {
                *value = -*value;
                Ok(())
            }
            (_, other) => Err(TypeError::UnexpectedStackType(other.var_type()).into()),
        }
    }

    fn execute_ones_complement(&mut self) -> Result<(), ExecutionError> {
        let top = self.stack.last_mut().ok_or(StackError::Underflow)?;
        match top {
            Variable::Int(value) => {
                *value = !*value;
                Ok(())
            }
            other => Err(TypeError::UnexpectedStackType(other.var_type()).into()),
        }
    }

    fn execute_logical_not(&mut self) -> Result<(), ExecutionError> {
        let value = self.pop_int()?;
        self.stack.push(Variable::Int((value == 0) as i32));
        Ok(())
    }

    fn execute_adjust_sp(&mut self, ins: &Instruction) -> Result<(), ExecutionError> {
        if ins.stack_offset > 0 {
            return Err(StackError::OutOfBoundsAccess(ins.stack_offset as i64).into());
        }
        let count = (-ins.stack_offset / 4) as usize;
        if count > self.stack.len() {
            return Err(StackError::Underflow.into());
        }
        self.stack.truncate(self.stack.len() - count);
        Ok(())
    }

    fn execute_destruct(&mut self, ins: &Instruction) -> Result<(), ExecutionError> {
        let count = (ins.size / 4) as usize;
        let keep = (ins.size_no_destroy / 4) as usize;
        let len = self.stack.len();
        if count > len {
            return Err(StackError::Underflow.into());
        }
        let window = (ins.stack_offset / 4) as i64;
        if window < 0 || window as usize + keep > count {
            return Err(StackError::OutOfBoundsAccess(window).into());
        }
        let start = len - count + window as usize;
        let preserved: Vec<Variable> = self.stack[start..start + keep].to_vec();
        self.stack.truncate(len - count);
        self.stack.extend(preserved);
        Ok(())
    }

    fn execute_counter(&mut self, ins: &Instruction, bp: bool, delta: i32) -> Result<(), ExecutionError> {
        let index = self.cell_index(ins.stack_offset, bp)?;
        match &mut self.stack[index] {
            Variable::Int(value) => {
                *value = value.wrapping_add(delta);
                Ok(())
            }
            other => Err(TypeError::IncrementNonInt(other.var_type()).into()),
        }
    }

    fn execute_store_state(&mut self, ins: &Instruction) -> Result<(), ExecutionError> {
        let globals = (ins.size_globals / 4) as usize;
        let locals = (ins.size_locals / 4) as usize;
        let len = self.stack.len();
        if globals > len || locals > len {
            return Err(StackError::Underflow.into());
        }
        let state = Continuation {
            globals: self.stack[..globals].to_vec(),
            locals: self.stack[len - locals..].to_vec(),
            program: self.program.clone(),
            offset: ins.offset + 0x10,
        };
        self.saved_state = Some(Arc::new(state));
        Ok(())
    }
}

/// Resolve the absolute target of a jump instruction.
fn jump_target(ins: &Instruction) -> Result<u32, ExecutionError> {
    let target = ins.offset as i64 + ins.jump_offset as i64;
    if target < 0 || target > u32::MAX as i64 {
        Err(ExecutionError::InvalidOffset(ins.offset))
    } else {
        Ok(target as u32)
    }
}

use std::sync::{Arc, Mutex};

use ncsvm::bytecode::{Instruction, Opcode, Program, TypeSuffix};
use ncsvm::vm::{
    run_continuation, ArithmeticError, ExecutionContext, ExecutionError, Execution, Routine,
    RoutineError, RoutineTable, StackError, TypeError, Variable, VariableType,
};

// ============================================================================
// Termination
// ============================================================================

#[test]
pub fn test_minimal_termination() {
    check(vec![Instruction::retn()], 0, &[Variable::Int(0)]);
}

#[test]
pub fn test_constant_arithmetic() {
    check(
        vec![
            Instruction::const_int(2),
            Instruction::const_int(3),
            Instruction::of(Opcode::ADD, TypeSuffix::IntInt),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(5)],
    );
}

#[test]
pub fn test_starting_conditional_exit_code() {
    // The reserve at the entry point binds the conditional's result
    // slot to the exit cell.
    check(
        vec![
            Instruction::rsadd(TypeSuffix::Int),
            Instruction::jsr(8),
            Instruction::retn(),
            Instruction::const_int(1),
            Instruction::cpdownsp(-8, 4),
            Instruction::movsp(-4),
            Instruction::retn(),
        ],
        1,
        &[Variable::Int(1)],
    );
}

#[test]
pub fn test_retn_with_empty_return_stack_terminates() {
    // Nothing after the first RETN executes.
    check(
        vec![Instruction::retn(), Instruction::const_int(9), Instruction::retn()],
        0,
        &[Variable::Int(0)],
    );
}

// ============================================================================
// Stack manipulation
// ============================================================================

#[test]
pub fn test_destruct_retention() {
    check(
        vec![
            Instruction::const_int(0),
            Instruction::const_int(1),
            Instruction::const_int(2),
            Instruction::const_int(3),
            Instruction::destruct(16, 4, 4),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(1)],
    );
}

#[test]
pub fn test_savebp_cptopbp() {
    check(
        vec![
            Instruction::const_int(0),
            Instruction::const_int(1),
            Instruction::const_int(2),
            Instruction::savebp(),
            Instruction::cptopbp(-8, 8),
            Instruction::retn(),
        ],
        0,
        &[
            Variable::Int(0),
            Variable::Int(0),
            Variable::Int(1),
            Variable::Int(2),
            Variable::Int(1),
            Variable::Int(2),
        ],
    );
}

#[test]
pub fn test_cptopsp_duplicates_window() {
    check(
        vec![
            Instruction::const_int(1),
            Instruction::const_int(2),
            Instruction::cptopsp(-8, 8),
            Instruction::retn(),
        ],
        0,
        &[
            Variable::Int(0),
            Variable::Int(1),
            Variable::Int(2),
            Variable::Int(1),
            Variable::Int(2),
        ],
    );
}

#[test]
pub fn test_cpdownsp_overwrites_cell() {
    check(
        vec![
            Instruction::const_int(1),
            Instruction::const_int(2),
            Instruction::const_int(9),
            Instruction::cpdownsp(-12, 4),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(9), Variable::Int(2), Variable::Int(9)],
    );
}

#[test]
pub fn test_savebp_restorebp_balance() {
    // The inner save is undone, so DECIBP addresses the outer frame.
    check(
        vec![
            Instruction::const_int(9),
            Instruction::savebp(),
            Instruction::const_int(5),
            Instruction::savebp(),
            Instruction::restorebp(),
            Instruction::decibp(-4),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(8), Variable::Int(5)],
    );
}

#[test]
pub fn test_counters() {
    check(
        vec![
            Instruction::const_int(10),
            Instruction::incisp(-4),
            Instruction::incisp(-4),
            Instruction::decisp(-4),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(11)],
    );
}

#[test]
pub fn test_counter_on_non_int_cell() {
    check_error(
        vec![Instruction::const_float(1.0), Instruction::incisp(-4), Instruction::retn()],
        ExecutionError::Type(TypeError::IncrementNonInt(VariableType::Float)),
    );
}

#[test]
pub fn test_stack_underflow() {
    check_error(
        vec![Instruction::of(Opcode::ADD, TypeSuffix::IntInt), Instruction::retn()],
        ExecutionError::Stack(StackError::Underflow),
    );
}

#[test]
pub fn test_exit_cell_must_be_int() {
    check_error(
        vec![Instruction::movsp(-4), Instruction::const_float(1.0), Instruction::retn()],
        ExecutionError::Type(TypeError::UnexpectedStackType(VariableType::Float)),
    );
}

// ============================================================================
// Control flow
// ============================================================================

#[test]
pub fn test_jz_taken() {
    check(
        vec![
            Instruction::const_int(5),
            Instruction::const_int(0),
            Instruction::jz(12),
            Instruction::incisp(-4),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(5)],
    );
}

#[test]
pub fn test_jz_not_taken() {
    check(
        vec![
            Instruction::const_int(5),
            Instruction::const_int(1),
            Instruction::jz(12),
            Instruction::incisp(-4),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(6)],
    );
}

#[test]
pub fn test_jnz_taken() {
    check(
        vec![
            Instruction::const_int(5),
            Instruction::const_int(1),
            Instruction::jnz(12),
            Instruction::incisp(-4),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(5)],
    );
}

#[test]
pub fn test_jsr_and_return() {
    check(
        vec![
            Instruction::jsr(8),
            Instruction::retn(),
            Instruction::const_int(7),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(7)],
    );
}

// ============================================================================
// Arithmetic
// ============================================================================

#[test]
pub fn test_division_by_zero() {
    check_error(
        vec![
            Instruction::const_int(1),
            Instruction::const_int(0),
            Instruction::of(Opcode::DIV, TypeSuffix::IntInt),
            Instruction::retn(),
        ],
        ExecutionError::Arithmetic(ArithmeticError::DivisionByZero),
    );
}

#[test]
pub fn test_modulo_by_zero() {
    check_error(
        vec![
            Instruction::const_int(1),
            Instruction::const_int(0),
            Instruction::of(Opcode::MOD, TypeSuffix::IntInt),
            Instruction::retn(),
        ],
        ExecutionError::Arithmetic(ArithmeticError::ModuloByZero),
    );
}

#[test]
pub fn test_int_addition_wraps() {
    check(
        vec![
            Instruction::const_int(i32::MAX),
            Instruction::const_int(1),
            Instruction::of(Opcode::ADD, TypeSuffix::IntInt),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(i32::MIN)],
    );
}

#[test]
pub fn test_mixed_arithmetic_promotes_to_float() {
    check(
        vec![
            Instruction::const_int(3),
            Instruction::const_float(0.5),
            Instruction::of(Opcode::MUL, TypeSuffix::IntFloat),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Float(1.5)],
    );
}

#[test]
pub fn test_string_concatenation() {
    check(
        vec![
            Instruction::const_string(b"foo".to_vec()),
            Instruction::const_string(b"bar".to_vec()),
            Instruction::of(Opcode::ADD, TypeSuffix::StringString),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::String(b"foobar".to_vec())],
    );
}

#[test]
pub fn test_unary_operators() {
    check(
        vec![
            Instruction::const_int(5),
            Instruction::of(Opcode::NEG, TypeSuffix::Int),
            Instruction::const_int(5),
            Instruction::of(Opcode::COMP, TypeSuffix::Int),
            Instruction::const_int(0),
            Instruction::of(Opcode::NOT, TypeSuffix::Int),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(-5), Variable::Int(-6), Variable::Int(1)],
    );
}

#[test]
pub fn test_shifts() {
    check(
        vec![
            Instruction::const_int(1),
            Instruction::const_int(3),
            Instruction::of(Opcode::SHLEFT, TypeSuffix::IntInt),
            Instruction::const_int(-8),
            Instruction::const_int(1),
            Instruction::of(Opcode::SHRIGHT, TypeSuffix::IntInt),
            Instruction::const_int(-8),
            Instruction::const_int(1),
            Instruction::of(Opcode::USHRIGHT, TypeSuffix::IntInt),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(8), Variable::Int(-4), Variable::Int(0x7ffffffc)],
    );
}

#[test]
pub fn test_logical_and_bitwise() {
    check(
        vec![
            Instruction::const_int(2),
            Instruction::const_int(3),
            Instruction::of(Opcode::LOGAND, TypeSuffix::IntInt),
            Instruction::const_int(0),
            Instruction::const_int(3),
            Instruction::of(Opcode::LOGOR, TypeSuffix::IntInt),
            Instruction::const_int(1),
            Instruction::const_int(2),
            Instruction::of(Opcode::INCOR, TypeSuffix::IntInt),
            Instruction::const_int(3),
            Instruction::const_int(1),
            Instruction::of(Opcode::EXCOR, TypeSuffix::IntInt),
            Instruction::const_int(3),
            Instruction::const_int(1),
            Instruction::of(Opcode::BOOLAND, TypeSuffix::IntInt),
            Instruction::retn(),
        ],
        0,
        &[
            Variable::Int(0),
            Variable::Int(1),
            Variable::Int(1),
            Variable::Int(3),
            Variable::Int(2),
            Variable::Int(1),
        ],
    );
}

#[test]
pub fn test_comparisons() {
    check(
        vec![
            Instruction::const_int(2),
            Instruction::const_int(3),
            Instruction::of(Opcode::LT, TypeSuffix::IntInt),
            Instruction::const_float(2.5),
            Instruction::const_float(2.5),
            Instruction::of(Opcode::GEQ, TypeSuffix::FloatFloat),
            Instruction::const_int(2),
            Instruction::const_int(2),
            Instruction::of(Opcode::GT, TypeSuffix::IntInt),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(1), Variable::Int(1), Variable::Int(0)],
    );
}

#[test]
pub fn test_equality() {
    check(
        vec![
            Instruction::const_string(b"a".to_vec()),
            Instruction::const_string(b"a".to_vec()),
            Instruction::of(Opcode::EQUAL, TypeSuffix::StringString),
            Instruction::const_object(7),
            Instruction::const_object(8),
            Instruction::of(Opcode::NEQUAL, TypeSuffix::ObjectObject),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(1), Variable::Int(1)],
    );
}

#[test]
pub fn test_struct_equality() {
    check(
        vec![
            Instruction::const_int(1),
            Instruction::const_int(2),
            Instruction::const_int(1),
            Instruction::const_int(2),
            Instruction::equaltt(8),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(1)],
    );
    check(
        vec![
            Instruction::const_int(1),
            Instruction::const_int(2),
            Instruction::const_int(1),
            Instruction::const_int(3),
            Instruction::nequaltt(8),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(1)],
    );
    check(
        vec![
            Instruction::const_int(1),
            Instruction::const_int(2),
            Instruction::const_int(1),
            Instruction::const_int(3),
            Instruction::equaltt(8),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Int(0)],
    );
}

// ============================================================================
// Vector arithmetic
// ============================================================================

#[test]
pub fn test_vector_addition() {
    // Components are pushed Z, Y, X.
    check(
        vec![
            Instruction::const_float(1.0),
            Instruction::const_float(2.0),
            Instruction::const_float(3.0),
            Instruction::const_float(10.0),
            Instruction::const_float(20.0),
            Instruction::const_float(30.0),
            Instruction::of(Opcode::ADD, TypeSuffix::VectorVector),
            Instruction::retn(),
        ],
        0,
        &[
            Variable::Int(0),
            Variable::Float(11.0),
            Variable::Float(22.0),
            Variable::Float(33.0),
        ],
    );
}

#[test]
pub fn test_vector_times_scalar() {
    check(
        vec![
            Instruction::const_float(1.0),
            Instruction::const_float(2.0),
            Instruction::const_float(3.0),
            Instruction::const_float(2.0),
            Instruction::of(Opcode::MUL, TypeSuffix::VectorFloat),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Float(2.0), Variable::Float(4.0), Variable::Float(6.0)],
    );
}

#[test]
pub fn test_scalar_over_vector() {
    check(
        vec![
            Instruction::const_float(12.0),
            Instruction::const_float(2.0),
            Instruction::const_float(3.0),
            Instruction::const_float(4.0),
            Instruction::of(Opcode::DIV, TypeSuffix::FloatVector),
            Instruction::retn(),
        ],
        0,
        &[Variable::Int(0), Variable::Float(6.0), Variable::Float(4.0), Variable::Float(3.0)],
    );
}

// ============================================================================
// Routine dispatch
// ============================================================================

#[test]
pub fn test_routine_scalar_call() {
    let mut routines = RoutineTable::new();
    routines.add(Routine::handled(
        "Increment",
        VariableType::Int,
        vec![VariableType::Int],
        |args, _ctx| match args[0] {
            Variable::Int(value) => Variable::Int(value + 1),
            _ => Variable::Int(0),
        },
    ));
    let program = build(vec![
        Instruction::const_int(41),
        Instruction::action(0, 1),
        Instruction::retn(),
    ]);
    let mut execution = Execution::new(Arc::new(program), ExecutionContext::new(&routines));
    assert_eq!(0, execution.run().unwrap());
    assert_eq!(&[Variable::Int(0), Variable::Int(42)], execution.stack());
}

#[test]
pub fn test_routine_vector_call() {
    let mut routines = RoutineTable::new();
    routines.add(Routine::handled(
        "VectorNormalize",
        VariableType::Vector,
        vec![VariableType::Vector],
        |args, _ctx| match args[0] {
            Variable::Vector([x, y, z]) => {
                let magnitude = (x * x + y * y + z * z).sqrt();
                Variable::Vector([x / magnitude, y / magnitude, z / magnitude])
            }
            _ => Variable::Vector([0.0; 3]),
        },
    ));
    // Push (Z, Y, X) = (0, 0, 3); expect (0, 0, 1) back in the same
    // order, X on top.
    let program = build(vec![
        Instruction::const_float(0.0),
        Instruction::const_float(0.0),
        Instruction::const_float(3.0),
        Instruction::action(0, 1),
        Instruction::retn(),
    ]);
    let mut execution = Execution::new(Arc::new(program), ExecutionContext::new(&routines));
    assert_eq!(0, execution.run().unwrap());
    assert_eq!(
        &[Variable::Int(0), Variable::Float(0.0), Variable::Float(0.0), Variable::Float(1.0)],
        execution.stack()
    );
}

#[test]
pub fn test_routine_unknown_index() {
    let routines = RoutineTable::new();
    let program = build(vec![Instruction::action(5, 0), Instruction::retn()]);
    let mut execution = Execution::new(Arc::new(program), ExecutionContext::new(&routines));
    assert_eq!(
        Err(ExecutionError::Routine(RoutineError::UnknownRoutine(5))),
        execution.run()
    );
}

#[test]
pub fn test_routine_argument_count_mismatch() {
    let mut routines = RoutineTable::new();
    routines.add(Routine::new("TakesOne", VariableType::Void, vec![VariableType::Int]));
    let program = build(vec![
        Instruction::const_int(1),
        Instruction::const_int(2),
        Instruction::action(0, 2),
        Instruction::retn(),
    ]);
    let mut execution = Execution::new(Arc::new(program), ExecutionContext::new(&routines));
    assert_eq!(
        Err(ExecutionError::Routine(RoutineError::ArgCountMismatch(1, 2))),
        execution.run()
    );
}

#[test]
pub fn test_routine_argument_type_mismatch() {
    let mut routines = RoutineTable::new();
    routines.add(Routine::new("TakesInt", VariableType::Void, vec![VariableType::Int]));
    let program = build(vec![
        Instruction::const_float(1.0),
        Instruction::action(0, 1),
        Instruction::retn(),
    ]);
    let mut execution = Execution::new(Arc::new(program), ExecutionContext::new(&routines));
    assert_eq!(
        Err(ExecutionError::Type(TypeError::OperandTypeMismatch(
            VariableType::Int,
            VariableType::Float
        ))),
        execution.run()
    );
}

#[test]
pub fn test_default_routine_returns_zero_value() {
    let mut routines = RoutineTable::new();
    routines.add(Routine::new("GetDefault", VariableType::Int, Vec::new()));
    let program = build(vec![Instruction::action(0, 0), Instruction::retn()]);
    let mut execution = Execution::new(Arc::new(program), ExecutionContext::new(&routines));
    assert_eq!(0, execution.run().unwrap());
    assert_eq!(&[Variable::Int(0), Variable::Int(0)], execution.stack());
}

// ============================================================================
// Continuations
// ============================================================================

#[test]
pub fn test_store_state_and_resume() {
    let captured: Arc<Mutex<Option<Variable>>> = Arc::new(Mutex::new(None));
    let sink = captured.clone();
    //
    let mut routines = RoutineTable::new();
    routines.add(Routine::handled(
        "TakeAction",
        VariableType::Void,
        vec![VariableType::Action],
        move |args, _ctx| {
            *sink.lock().unwrap() = Some(args[0].clone());
            Variable::Void
        },
    ));
    // The saved body overwrites the exit cell with 7; the main path
    // jumps over it and hands the continuation to the routine.
    let program = build(vec![
        Instruction::store_state(0, 0),
        Instruction::jmp(28),
        Instruction::const_int(7),
        Instruction::cpdownsp(-8, 4),
        Instruction::movsp(-4),
        Instruction::retn(),
        Instruction::action(0, 1),
        Instruction::retn(),
    ]);
    let mut execution = Execution::new(Arc::new(program), ExecutionContext::new(&routines));
    assert_eq!(0, execution.run().unwrap());
    //
    let action = captured.lock().unwrap().take().unwrap();
    let state = match action {
        Variable::Action(state) => state,
        other => panic!("expected an action, got {:?}", other),
    };
    assert_eq!(29, state.offset);
    let exit = run_continuation(state, ExecutionContext::new(&routines)).unwrap();
    assert_eq!(7, exit);
}

#[test]
pub fn test_store_state_captures_locals() {
    let captured: Arc<Mutex<Option<Variable>>> = Arc::new(Mutex::new(None));
    let sink = captured.clone();
    //
    let mut routines = RoutineTable::new();
    routines.add(Routine::handled(
        "TakeAction",
        VariableType::Void,
        vec![VariableType::Action],
        move |args, _ctx| {
            *sink.lock().unwrap() = Some(args[0].clone());
            Variable::Void
        },
    ));
    let program = build(vec![
        Instruction::const_int(5),
        Instruction::store_state(0, 4),
        Instruction::jmp(22),
        Instruction::cpdownsp(-8, 4),
        Instruction::movsp(-4),
        Instruction::retn(),
        Instruction::action(0, 1),
        Instruction::retn(),
    ]);
    let mut execution = Execution::new(Arc::new(program), ExecutionContext::new(&routines));
    assert_eq!(0, execution.run().unwrap());
    //
    let state = match captured.lock().unwrap().take().unwrap() {
        Variable::Action(state) => state,
        other => panic!("expected an action, got {:?}", other),
    };
    assert_eq!(vec![Variable::Int(5)], state.locals);
    // The resumed stack is the implicit exit cell plus the captured
    // local; the body copies the local down over the exit cell.
    let exit = run_continuation(state, ExecutionContext::new(&routines)).unwrap();
    assert_eq!(5, exit);
}

// ============================================================================
// Helpers
// ============================================================================

/// Assemble a program from instructions placed sequentially after the
/// container header.
fn build(instructions: Vec<Instruction>) -> Program {
    let mut program = Program::new("");
    for ins in instructions {
        program.add(ins);
    }
    program
}

/// Check that executing a given program terminates with the expected
/// exit code and final stack.
fn check(instructions: Vec<Instruction>, exit: i32, stack: &[Variable]) {
    let program = build(instructions);
    let routines = RoutineTable::new();
    let ctx = ExecutionContext::new(&routines);
    let mut execution = Execution::new(Arc::new(program), ctx);
    assert_eq!(exit, execution.run().unwrap());
    assert_eq!(stack, execution.stack());
}

/// Check that executing a given program aborts with the expected
/// error.
fn check_error(instructions: Vec<Instruction>, expected: ExecutionError) {
    let program = build(instructions);
    let routines = RoutineTable::new();
    let ctx = ExecutionContext::new(&routines);
    let mut execution = Execution::new(Arc::new(program), ctx);
    assert_eq!(Err(expected), execution.run());
}

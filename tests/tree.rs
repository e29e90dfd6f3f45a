use ncsvm::bytecode::{Instruction, Opcode, Program, TypeSuffix};
use ncsvm::tree::{BinaryOp, ExprId, Expression, ExpressionTree, Locality};
use ncsvm::vm::{Routine, RoutineTable, Variable, VariableType};

// ============================================================================
// Shape recovery
// ============================================================================

#[test]
pub fn test_decompile_minimal() {
    let program = build(vec![Instruction::retn()]);
    let routines = RoutineTable::new();
    //
    let tree = ExpressionTree::from_program(&program, &routines);
    //
    assert_eq!(0, tree.globals().len());
    assert_eq!(1, tree.functions().len());
    let start = tree.function_named("_start").unwrap();
    assert_eq!(VariableType::Void, start.return_type);
    assert_eq!(0, start.in_argument_types.len());
    assert_eq!(0, start.out_argument_types.len());
    let exprs = tree.block_expressions(start.block);
    assert_eq!(1, exprs.len());
    assert!(matches!(tree.expression(exprs[0]), Expression::Return { value: None, .. }));
}

#[test]
pub fn test_decompile_starting_conditional_without_globals() {
    let program = build(vec![
        Instruction::rsadd(TypeSuffix::Int),
        Instruction::jsr(8),
        Instruction::retn(),
        Instruction::const_int(1),
        Instruction::cpdownsp(-8, 4),
        Instruction::movsp(-4),
        Instruction::retn(),
    ]);
    let routines = RoutineTable::new();
    //
    let tree = ExpressionTree::from_program(&program, &routines);
    //
    assert_eq!(0, tree.globals().len());
    assert_eq!(2, tree.functions().len());
    let conditional = tree.function_named("StartingConditional").unwrap();
    assert_eq!(0, conditional.in_argument_types.len());
    assert_eq!(vec![VariableType::Int], conditional.out_argument_types);
    assert_eq!(VariableType::Void, conditional.return_type);
    let start = tree.function_named("_start").unwrap();
    assert_eq!(VariableType::Int, start.return_type);
}

#[test]
pub fn test_decompile_main_with_globals() {
    let program = build(vec![
        Instruction::jsr(8),
        Instruction::retn(),
        Instruction::rsadd(TypeSuffix::Int),
        Instruction::const_int(1),
        Instruction::cpdownsp(-8, 4),
        Instruction::movsp(-4),
        Instruction::savebp(),
        Instruction::jsr(8),
        Instruction::restorebp(),
        Instruction::retn(),
        Instruction::retn(),
    ]);
    let routines = RoutineTable::new();
    //
    let tree = ExpressionTree::from_program(&program, &routines);
    //
    assert_eq!(3, tree.functions().len());
    let main = tree.function_named("main").unwrap();
    assert_eq!(0, main.in_argument_types.len());
    assert_eq!(0, main.out_argument_types.len());
    assert_eq!(VariableType::Void, main.return_type);
    assert!(tree.function_named("_globals").is_some());
    assert!(tree.function_named("_start").is_some());
    //
    assert_eq!(1, tree.globals().len());
    let global = *tree.globals().iter().next().unwrap();
    match tree.expression(global) {
        Expression::Parameter { variable_type, locality, .. } => {
            assert_eq!(VariableType::Int, *variable_type);
            assert_eq!(Locality::Global, *locality);
        }
        other => panic!("expected a parameter, got {:?}", other),
    }
}

#[test]
pub fn test_decompile_conditionals() {
    let program = build(vec![
        Instruction::jsr(8),
        Instruction::retn(),
        Instruction::const_int(2),
        Instruction::const_int(1),
        Instruction::cptopsp(-8, 4),
        Instruction::jz(18),
        Instruction::of(Opcode::DIV, TypeSuffix::IntInt),
        Instruction::jnz(8),
        Instruction::retn(),
        Instruction::retn(),
        Instruction::movsp(-8),
        Instruction::retn(),
    ]);
    let routines = RoutineTable::new();
    //
    let tree = ExpressionTree::from_program(&program, &routines);
    //
    assert_eq!(2, tree.functions().len());
    let main = tree.function_named("main").unwrap();
    assert_eq!(VariableType::Void, main.return_type);
    let exprs = tree.block_expressions(main.block);
    assert_eq!(11, exprs.len());
    // int a = 2;
    let (a, rhs) = as_declaration(&tree, exprs[0]);
    assert!(matches!(tree.expression(rhs), Expression::Constant { value: Variable::Int(2), .. }));
    // int b = 1;
    let (b, rhs) = as_declaration(&tree, exprs[1]);
    assert!(matches!(tree.expression(rhs), Expression::Constant { value: Variable::Int(1), .. }));
    // int c = a;
    let (_c, rhs) = as_declaration(&tree, exprs[2]);
    assert_eq!(a, rhs);
    // if (c == 0) goto loc_jz;
    let (test, if_true) = as_conditional(&tree, exprs[3]);
    assert!(matches!(tree.expression(test), Expression::Binary { op: BinaryOp::Equal, .. }));
    let jz_goto = tree.block_expressions(if_true);
    assert_eq!(1, jz_goto.len());
    let jz_label = match tree.expression(jz_goto[0]) {
        Expression::Goto { label, .. } => *label,
        other => panic!("expected a goto, got {:?}", other),
    };
    // int d = a / b;
    let (_d, rhs) = as_declaration(&tree, exprs[4]);
    match tree.expression(rhs) {
        Expression::Binary { op: BinaryOp::Divide, left, right, .. } => {
            assert_eq!(a, *left);
            assert_eq!(b, *right);
        }
        other => panic!("expected a division, got {:?}", other),
    }
    // if (d != 0) goto loc_jnz;
    let (test, if_true) = as_conditional(&tree, exprs[5]);
    assert!(matches!(tree.expression(test), Expression::Binary { op: BinaryOp::NotEqual, .. }));
    let jnz_goto = tree.block_expressions(if_true);
    let jnz_label = match tree.expression(jnz_goto[0]) {
        Expression::Goto { label, .. } => *label,
        other => panic!("expected a goto, got {:?}", other),
    };
    // return;
    assert!(matches!(tree.expression(exprs[6]), Expression::Return { .. }));
    // loc_jnz: return;
    assert!(matches!(tree.expression(exprs[7]), Expression::Label { .. }));
    assert_eq!(jnz_label, exprs[7]);
    assert!(matches!(tree.expression(exprs[8]), Expression::Return { .. }));
    // loc_jz: return;
    assert!(matches!(tree.expression(exprs[9]), Expression::Label { .. }));
    assert_eq!(jz_label, exprs[9]);
    assert!(matches!(tree.expression(exprs[10]), Expression::Return { .. }));
}

#[test]
pub fn test_decompile_input_parameters() {
    let program = build(vec![
        Instruction::const_int(5),
        Instruction::jsr(14),
        Instruction::movsp(-4),
        Instruction::retn(),
        Instruction::cptopsp(-4, 4),
        Instruction::movsp(-4),
        Instruction::retn(),
    ]);
    let routines = RoutineTable::new();
    //
    let tree = ExpressionTree::from_program(&program, &routines);
    //
    let main = tree.function_named("main").unwrap();
    assert_eq!(vec![VariableType::Int], main.in_argument_types);
    assert_eq!(0, main.out_argument_types.len());
    // The call site passes the caller's own variable.
    let start = tree.function_named("_start").unwrap();
    let call = tree
        .block_expressions(start.block)
        .iter()
        .find_map(|&e| match tree.expression(e) {
            Expression::Call { arguments, .. } => Some(arguments.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(1, call.len());
    assert!(matches!(
        tree.expression(call[0]),
        Expression::Parameter { variable_type: VariableType::Int, .. }
    ));
}

// ============================================================================
// Routine calls
// ============================================================================

#[test]
pub fn test_decompile_action_with_result() {
    let mut routines = RoutineTable::new();
    routines.add(Routine::new("GetValue", VariableType::Int, Vec::new()));
    let program = build(vec![
        Instruction::action(0, 0),
        Instruction::movsp(-4),
        Instruction::retn(),
    ]);
    //
    let tree = ExpressionTree::from_program(&program, &routines);
    //
    let start = tree.function_named("_start").unwrap();
    let exprs = tree.block_expressions(start.block);
    assert_eq!(2, exprs.len());
    match tree.expression(exprs[0]) {
        Expression::Binary { op: BinaryOp::Assign, right, declare_left, .. } => {
            assert!(*declare_left);
            assert!(matches!(tree.expression(*right), Expression::Action { routine: 0, .. }));
        }
        other => panic!("expected an assignment, got {:?}", other),
    }
}

#[test]
pub fn test_decompile_saved_action_argument() {
    let mut routines = RoutineTable::new();
    routines.add(Routine::new("TakeAction", VariableType::Void, vec![VariableType::Action]));
    let program = build(vec![
        Instruction::store_state(0, 0),
        Instruction::jmp(20),
        Instruction::const_int(7),
        Instruction::movsp(-4),
        Instruction::retn(),
        Instruction::action(0, 1),
        Instruction::retn(),
    ]);
    //
    let tree = ExpressionTree::from_program(&program, &routines);
    //
    let start = tree.function_named("_start").unwrap();
    let exprs = tree.block_expressions(start.block);
    let action_args = exprs
        .iter()
        .find_map(|&e| match tree.expression(e) {
            Expression::Action { arguments, .. } => Some(arguments.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(1, action_args.len());
    // The argument is the decompiled body of the saved state.
    let body = tree.block_expressions(action_args[0]);
    assert_eq!(2, body.len());
    assert!(matches!(tree.expression(body[1]), Expression::Return { .. }));
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
pub fn test_decompile_twice_is_structurally_equal() {
    let program = build(vec![
        Instruction::jsr(8),
        Instruction::retn(),
        Instruction::const_int(2),
        Instruction::const_int(3),
        Instruction::of(Opcode::ADD, TypeSuffix::IntInt),
        Instruction::movsp(-4),
        Instruction::retn(),
    ]);
    let routines = RoutineTable::new();
    //
    let first = ExpressionTree::from_program(&program, &routines);
    let second = ExpressionTree::from_program(&program, &routines);
    //
    assert_eq!(first, second);
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

/// Destructure a declare-initialize assignment into its left
/// parameter and right-hand side.
fn as_declaration(tree: &ExpressionTree, id: ExprId) -> (ExprId, ExprId) {
    match tree.expression(id) {
        Expression::Binary { op: BinaryOp::Assign, left, right, declare_left, .. } => {
            assert!(*declare_left);
            assert!(matches!(tree.expression(*left), Expression::Parameter { .. }));
            (*left, *right)
        }
        other => panic!("expected an assignment, got {:?}", other),
    }
}

/// Destructure a conditional into its test and if-true block.
fn as_conditional(tree: &ExpressionTree, id: ExprId) -> (ExprId, ExprId) {
    match tree.expression(id) {
        Expression::Conditional { test, if_true, if_false, .. } => {
            assert!(if_false.is_none());
            (*test, *if_true)
        }
        other => panic!("expected a conditional, got {:?}", other),
    }
}

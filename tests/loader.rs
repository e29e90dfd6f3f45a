use ncsvm::bytecode::{Literal, LoadError, Opcode, Program, TypeSuffix};

// ============================================================================
// Containers
// ============================================================================

#[test]
pub fn test_load_minimal() {
    let bytes = container(&[0x20, 0x00]);
    let program = Program::from_bytes("", &bytes).unwrap();
    assert_eq!(15, program.length());
    assert_eq!(1, program.instructions().len());
    assert_eq!(Opcode::RETN, program.instruction_at(13).unwrap().opcode);
}

#[test]
pub fn test_load_every_operand_form() {
    let mut body = Vec::new();
    body.extend(&[0x01, 0x01, 0xff, 0xff, 0xff, 0xfc, 0x00, 0x04]); // CPDOWNSP
    body.extend(&[0x03, 0x01, 0xff, 0xff, 0xff, 0xfc, 0x00, 0x04]); // CPTOPSP
    body.extend(&[0x26, 0x01, 0xff, 0xff, 0xff, 0xfc, 0x00, 0x04]); // CPDOWNBP
    body.extend(&[0x27, 0x01, 0xff, 0xff, 0xff, 0xfc, 0x00, 0x04]); // CPTOPBP
    body.extend(&[0x04, 0x03, 0x00, 0x00, 0x00, 0x01]); // CONSTI
    body.extend(&[0x04, 0x04, 0x3f, 0x80, 0x00, 0x00]); // CONSTF
    body.extend(&[0x04, 0x05, 0x00, 0x02, 0x41, 0x61]); // CONSTS
    body.extend(&[0x04, 0x06, 0x00, 0x00, 0x00, 0x02]); // CONSTO
    body.extend(&[0x05, 0x00, 0x00, 0x01, 0x02]); // ACTION
    body.extend(&[0x1b, 0x00, 0xff, 0xff, 0xff, 0xfc]); // MOVSP
    body.extend(&[0x1d, 0x00, 0x00, 0x00, 0x00, 0x01]); // JMP
    body.extend(&[0x1e, 0x00, 0x00, 0x00, 0x00, 0x02]); // JSR
    body.extend(&[0x1f, 0x00, 0x00, 0x00, 0x00, 0x03]); // JZ
    body.extend(&[0x25, 0x00, 0x00, 0x00, 0x00, 0x04]); // JNZ
    body.extend(&[0x21, 0x01, 0x00, 0x08, 0xff, 0xfc, 0x00, 0x04]); // DESTRUCT
    body.extend(&[0x23, 0x03, 0xff, 0xff, 0xff, 0xfc]); // DECISP
    body.extend(&[0x24, 0x03, 0xff, 0xff, 0xff, 0xfc]); // INCISP
    body.extend(&[0x28, 0x03, 0xff, 0xff, 0xff, 0xfc]); // DECIBP
    body.extend(&[0x29, 0x03, 0xff, 0xff, 0xff, 0xfc]); // INCIBP
    body.extend(&[0x2c, 0x10, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x08]); // STORESTATE
    body.extend(&[0x0b, 0x34, 0x00, 0x04]); // EQUALTT
    body.extend(&[0x0c, 0x34, 0x00, 0x04]); // NEQUALTT
    let bytes = container(&body);
    //
    let program = Program::from_bytes("", &bytes).unwrap();
    assert_eq!(154, program.length());
    assert_eq!(22, program.instructions().len());
    //
    let ins = program.instruction_at(13).unwrap();
    assert_eq!(Opcode::CPDOWNSP, ins.opcode);
    assert_eq!(-4, ins.stack_offset);
    assert_eq!(4, ins.size);
    let ins = program.instruction_at(21).unwrap();
    assert_eq!(Opcode::CPTOPSP, ins.opcode);
    assert_eq!(-4, ins.stack_offset);
    assert_eq!(4, ins.size);
    let ins = program.instruction_at(29).unwrap();
    assert_eq!(Opcode::CPDOWNBP, ins.opcode);
    let ins = program.instruction_at(37).unwrap();
    assert_eq!(Opcode::CPTOPBP, ins.opcode);
    let ins = program.instruction_at(45).unwrap();
    assert_eq!(Opcode::CONST, ins.opcode);
    assert_eq!(Literal::Int(1), ins.literal);
    let ins = program.instruction_at(51).unwrap();
    assert_eq!(Literal::Float(1.0), ins.literal);
    let ins = program.instruction_at(57).unwrap();
    assert_eq!(Literal::String(b"Aa".to_vec()), ins.literal);
    let ins = program.instruction_at(63).unwrap();
    assert_eq!(Literal::Object(2), ins.literal);
    let ins = program.instruction_at(69).unwrap();
    assert_eq!(Opcode::ACTION, ins.opcode);
    assert_eq!(1, ins.routine);
    assert_eq!(2, ins.arg_count);
    let ins = program.instruction_at(74).unwrap();
    assert_eq!(Opcode::MOVSP, ins.opcode);
    assert_eq!(-4, ins.stack_offset);
    let ins = program.instruction_at(80).unwrap();
    assert_eq!(Opcode::JMP, ins.opcode);
    assert_eq!(1, ins.jump_offset);
    let ins = program.instruction_at(86).unwrap();
    assert_eq!(Opcode::JSR, ins.opcode);
    assert_eq!(2, ins.jump_offset);
    let ins = program.instruction_at(92).unwrap();
    assert_eq!(Opcode::JZ, ins.opcode);
    assert_eq!(3, ins.jump_offset);
    let ins = program.instruction_at(98).unwrap();
    assert_eq!(Opcode::JNZ, ins.opcode);
    assert_eq!(4, ins.jump_offset);
    let ins = program.instruction_at(104).unwrap();
    assert_eq!(Opcode::DESTRUCT, ins.opcode);
    assert_eq!(8, ins.size);
    assert_eq!(-4, ins.stack_offset);
    assert_eq!(4, ins.size_no_destroy);
    let ins = program.instruction_at(112).unwrap();
    assert_eq!(Opcode::DECISP, ins.opcode);
    assert_eq!(-4, ins.stack_offset);
    let ins = program.instruction_at(118).unwrap();
    assert_eq!(Opcode::INCISP, ins.opcode);
    let ins = program.instruction_at(124).unwrap();
    assert_eq!(Opcode::DECIBP, ins.opcode);
    let ins = program.instruction_at(130).unwrap();
    assert_eq!(Opcode::INCIBP, ins.opcode);
    let ins = program.instruction_at(136).unwrap();
    assert_eq!(Opcode::STORESTATE, ins.opcode);
    assert_eq!(4, ins.size_globals);
    assert_eq!(8, ins.size_locals);
    let ins = program.instruction_at(146).unwrap();
    assert_eq!(Opcode::EQUAL, ins.opcode);
    assert_eq!(TypeSuffix::StructStruct, ins.suffix);
    assert_eq!(4, ins.size);
    let ins = program.instruction_at(150).unwrap();
    assert_eq!(Opcode::NEQUAL, ins.opcode);
    assert_eq!(TypeSuffix::StructStruct, ins.suffix);
    assert_eq!(4, ins.size);
}

// ============================================================================
// Failure modes
// ============================================================================

#[test]
pub fn test_invalid_magic() {
    let mut bytes = container(&[0x20, 0x00]);
    bytes[4] = b'2';
    assert_eq!(Err(LoadError::InvalidMagic), Program::from_bytes("", &bytes));
}

#[test]
pub fn test_missing_size_marker() {
    let mut bytes = container(&[0x20, 0x00]);
    bytes[8] = 0x00;
    assert_eq!(Err(LoadError::InvalidMagic), Program::from_bytes("", &bytes));
}

#[test]
pub fn test_truncated_stream() {
    // Header promises a CONSTI but the stream stops short.
    let mut bytes = container(&[0x04, 0x03, 0x00, 0x00, 0x00, 0x07]);
    bytes.truncate(bytes.len() - 2);
    assert_eq!(Err(LoadError::TruncatedStream), Program::from_bytes("", &bytes));
}

#[test]
pub fn test_unknown_opcode() {
    let bytes = container(&[0xff, 0x00]);
    assert_eq!(Err(LoadError::UnknownOpcode(13, 0xff)), Program::from_bytes("", &bytes));
}

#[test]
pub fn test_invalid_operand() {
    // ADD with a scalar suffix instead of an operand pair.
    let bytes = container(&[0x14, 0x05]);
    assert_eq!(Err(LoadError::InvalidOperand(13, 0x05)), Program::from_bytes("", &bytes));
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
pub fn test_serialize_round_trip() {
    let mut body = Vec::new();
    body.extend(&[0x04, 0x03, 0x00, 0x00, 0x00, 0x02]); // CONSTI 2
    body.extend(&[0x04, 0x05, 0x00, 0x02, 0x41, 0x61]); // CONSTS "Aa"
    body.extend(&[0x2c, 0x10, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x08]); // STORESTATE
    body.extend(&[0x1e, 0x00, 0x00, 0x00, 0x00, 0x02]); // JSR
    body.extend(&[0x20, 0x00]); // RETN
    let bytes = container(&body);
    //
    let program = Program::from_bytes("", &bytes).unwrap();
    assert_eq!(bytes, program.to_bytes());
    assert_eq!(program, Program::from_bytes("", &program.to_bytes()).unwrap());
}

// ============================================================================
// Helpers
// ============================================================================

/// Wrap an instruction stream in a container header with the correct
/// length field.
fn container(body: &[u8]) -> Vec<u8> {
    let mut bytes = b"NCS V1.0".to_vec();
    bytes.push(0x42);
    bytes.extend((13 + body.len() as u32).to_be_bytes());
    bytes.extend(body);
    bytes
}

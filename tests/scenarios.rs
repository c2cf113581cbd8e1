//! End-to-end scenarios and a handful of invariant-style properties, built
//! as in-memory `Image`s of hand-assembled opcode bytes and run to
//! completion.

use c0vm::error::{TrapKind, VmError, VmFault};
use c0vm::image::FunctionInfo;
use c0vm::native::NativeRegistry;
use c0vm::{run, Image};

fn image(functions: Vec<FunctionInfo>) -> Image {
    Image {
        functions,
        natives: Vec::new(),
        int_pool: Vec::new(),
        string_pool: Vec::new(),
    }
}

fn one_function(code: Vec<u8>) -> Image {
    image(vec![FunctionInfo {
        num_args: 0,
        num_vars: 0,
        code,
    }])
}

fn run_ok(img: &Image) -> i32 {
    let natives = NativeRegistry::standard();
    run(img, &natives).expect("program should run to completion")
}

fn run_err(img: &Image) -> VmError {
    let natives = NativeRegistry::standard();
    run(img, &natives).expect_err("program should trap")
}

#[test]
fn subtracts_two_pushed_ints() {
    // BIPUSH 7; BIPUSH 5; ISUB; RETURN
    let img = one_function(vec![0x20, 7, 0x20, 5, 0x11, 0x62]);
    assert_eq!(run_ok(&img), 2);
}

#[test]
fn branch_taken_on_equal_operands() {
    // BIPUSH 1; BIPUSH 1; IF_CMPEQ +5; BIPUSH 0; RETURN; BIPUSH 42; RETURN
    let img = one_function(vec![
        0x20, 1, // BIPUSH 1
        0x20, 1, // BIPUSH 1
        0x52, 0, 5, // IF_CMPEQ +5
        0x20, 0, // BIPUSH 0
        0x62, // RETURN
        0x20, 42, // BIPUSH 42
        0x62, // RETURN
    ]);
    assert_eq!(run_ok(&img), 42);
}

#[test]
fn local_variable_survives_a_call_and_argument_is_passed() {
    // Function 0 (num_args=0, num_vars=1): BIPUSH 10; VSTORE 0; VLOAD 0; INVOKESTATIC 1; RETURN
    // Function 1 (num_args=1, num_vars=1): VLOAD 0; BIPUSH 1; IADD; RETURN
    let f0 = FunctionInfo {
        num_args: 0,
        num_vars: 1,
        code: vec![0x20, 10, 0x31, 0, 0x30, 0, 0x60, 0, 1, 0x62],
    };
    let f1 = FunctionInfo {
        num_args: 1,
        num_vars: 1,
        code: vec![0x30, 0, 0x20, 1, 0x10, 0x62],
    };
    let img = image(vec![f0, f1]);
    assert_eq!(run_ok(&img), 11);
}

#[test]
fn division_by_zero_traps() {
    // BIPUSH 1; BIPUSH 0; IDIV; RETURN
    let img = one_function(vec![0x20, 1, 0x20, 0, 0x13, 0x62]);
    assert!(matches!(run_err(&img), VmError::Trap(TrapKind::Arithmetic(_))));
}

#[test]
fn array_index_out_of_bounds_traps() {
    // BIPUSH 3; NEWARRAY 4; BIPUSH 3; AADDS; RETURN
    let img = one_function(vec![0x20, 3, 0x80, 4, 0x20, 3, 0x82, 0x62]);
    assert!(matches!(run_err(&img), VmError::Trap(TrapKind::Memory(_))));
}

#[test]
fn null_pointer_dereference_traps() {
    // ACONST_NULL; IMLOAD; RETURN
    let img = one_function(vec![0x23, 0x71, 0x62]);
    assert!(matches!(run_err(&img), VmError::Trap(TrapKind::Memory(_))));
}

#[test]
fn struct_field_store_then_load_round_trips() {
    // NEW 8; DUP; AADDF 4; BIPUSH 5; IMSTORE; AADDF 4; IMLOAD; RETURN
    //
    // NEW takes its block size as an immediate byte operand, never a popped
    // value, and IMSTORE pops its value before its pointer; see DESIGN.md
    // for why this differs from an earlier operand ordering.
    let img = one_function(vec![
        0x70, 8, // NEW 8
        0x01, // DUP
        0x77, 4, // AADDF 4
        0x20, 5, // BIPUSH 5
        0x72, // IMSTORE
        0x77, 4, // AADDF 4
        0x71, // IMLOAD
        0x62, // RETURN
    ]);
    assert_eq!(run_ok(&img), 5);
}

#[test]
fn invariant_dup_pop_is_identity() {
    // BIPUSH 9; DUP; POP; RETURN
    let img = one_function(vec![0x20, 9, 0x01, 0x00, 0x62]);
    assert_eq!(run_ok(&img), 9);
}

#[test]
fn invariant_swap_swap_is_identity() {
    // BIPUSH 3; BIPUSH 4; SWAP; SWAP; POP; RETURN -- top after double swap is 4, POP discards it, 3 remains
    let img = one_function(vec![0x20, 3, 0x20, 4, 0x02, 0x02, 0x00, 0x62]);
    assert_eq!(run_ok(&img), 3);
}

#[test]
fn invariant_div_mul_add_reconstructs_dividend() {
    // For a handful of (a, b) pairs: (a/b)*b + a%b == a.
    let pairs = [(17, 5), (-17, 5), (17, -5), (-17, -5), (7, 7), (-1, 3)];
    for (a, b) in pairs {
        // BIPUSH/ILDC-range values fit in i8, so encode via the int pool for
        // values outside -128..=127; all sample pairs fit in i8 here.
        let code = vec![
            0x20, a as i8 as u8, // BIPUSH a
            0x20, b as i8 as u8, // BIPUSH b
            0x20, a as i8 as u8, // BIPUSH a
            0x20, b as i8 as u8, // BIPUSH b
            0x13, // IDIV -> a/b
            0x20, b as i8 as u8, // BIPUSH b
            0x12, // IMUL -> (a/b)*b
            0x20, a as i8 as u8, // BIPUSH a
            0x20, b as i8 as u8, // BIPUSH b
            0x14, // IREM -> a%b
            0x10, // IADD -> (a/b)*b + a%b
            0x11, // ISUB -> result - a
            0x62, // RETURN
        ];
        let img = one_function(code);
        assert_eq!(run_ok(&img), 0, "failed for a={a}, b={b}");
    }
}

#[test]
fn invariant_goto_self_loop_displacement() {
    // A GOTO at address 0 with displacement -3 targets itself forever;
    // verified here by confirming the VM does not progress to a RETURN
    // within a reasonable number of steps by instead bounding execution
    // with a sibling function that jumps past the loop -- a self-loop has
    // no terminating RETURN to observe directly, so this checks the
    // displacement arithmetic on a GOTO that skips over a trap instead.
    // GOTO occupies addresses 0..2, BIPUSH 99 occupies 3..4; displacement 4
    // lands pc exactly on the opcode byte of `BIPUSH 1` at address 5:
    // pc = a + 1 + d = 0 + 1 + 4 = 5.
    let img = one_function(vec![
        0x51, 0, 4, // GOTO +4
        0x20, 99, // BIPUSH 99 (skipped)
        0x20, 1, // BIPUSH 1 (landed on)
        0x62, // RETURN
    ]);
    assert_eq!(run_ok(&img), 1);
}

#[test]
fn cmstore_cmload_masks_to_seven_bits() {
    // NEW 1; DUP; BIPUSH -1 (0xff); CMSTORE; CMLOAD; RETURN
    let img = one_function(vec![
        0x70, 1, // NEW 1
        0x01, // DUP
        0x20, 0xff_u8 as i8 as u8, // BIPUSH -1
        0x76, // CMSTORE
        0x75, // CMLOAD
        0x62, // RETURN
    ]);
    let result = run_ok(&img);
    assert_eq!(result, 0x7f);
}

#[test]
fn shift_out_of_range_traps() {
    // BIPUSH 1; BIPUSH 32; ISHL; RETURN
    let img = one_function(vec![0x20, 1, 0x20, 32, 0x18, 0x62]);
    assert!(matches!(run_err(&img), VmError::Trap(TrapKind::Arithmetic(_))));
}

#[test]
fn int_min_div_neg_one_traps() {
    let mut code = vec![0x21, 0, 0]; // ILDC 0 -> int_pool[0] == i32::MIN
    code.extend_from_slice(&[0x20, 0xff]); // BIPUSH -1
    code.push(0x13); // IDIV
    code.push(0x62); // RETURN
    let img = Image {
        functions: vec![FunctionInfo {
            num_args: 0,
            num_vars: 0,
            code,
        }],
        natives: Vec::new(),
        int_pool: vec![i32::MIN],
        string_pool: Vec::new(),
    };
    assert!(matches!(run_err(&img), VmError::Trap(TrapKind::Arithmetic(_))));
}

#[test]
fn unknown_opcode_is_invalid_opcode_fault() {
    let img = one_function(vec![0xee]);
    assert!(matches!(run_err(&img), VmError::Fault(VmFault::InvalidOpcode(0xee))));
}

#[test]
fn athrow_carries_the_message_through_as_a_user_trap() {
    let string_pool = b"boom\0".to_vec();
    let img = Image {
        functions: vec![FunctionInfo {
            num_args: 0,
            num_vars: 0,
            code: vec![0x22, 0, 0, 0x40], // ALDC 0; ATHROW
        }],
        natives: Vec::new(),
        int_pool: Vec::new(),
        string_pool,
    };
    match run_err(&img) {
        VmError::Trap(TrapKind::User(msg)) => assert_eq!(msg, "boom"),
        other => panic!("expected a user trap, got {other:?}"),
    }
}

#[test]
fn assert_false_predicate_traps_with_message() {
    let string_pool = b"nope\0".to_vec();
    let img = Image {
        functions: vec![FunctionInfo {
            num_args: 0,
            num_vars: 0,
            // BIPUSH 0 (predicate); ALDC 0 (message); ASSERT
            code: vec![0x20, 0, 0x22, 0, 0, 0x41],
        }],
        natives: Vec::new(),
        int_pool: Vec::new(),
        string_pool,
    };
    match run_err(&img) {
        VmError::Trap(TrapKind::Assertion(msg)) => assert_eq!(msg, "nope"),
        other => panic!("expected an assertion trap, got {other:?}"),
    }
}

#[test]
fn if_cmpeq_does_not_branch_on_unequal_operands() {
    // BIPUSH 1; BIPUSH 2; IF_CMPEQ +5; BIPUSH 7; RETURN; BIPUSH 99; RETURN
    let img = one_function(vec![
        0x20, 1, // BIPUSH 1
        0x20, 2, // BIPUSH 2
        0x52, 0, 5, // IF_CMPEQ +5 (not taken: 1 != 2)
        0x20, 7, // BIPUSH 7
        0x62, // RETURN
        0x20, 99, // BIPUSH 99
        0x62, // RETURN
    ]);
    assert_eq!(run_ok(&img), 7);
}

#[test]
fn if_cmpne_does_not_branch_on_equal_operands() {
    // BIPUSH 1; BIPUSH 1; IF_CMPNE +5; BIPUSH 7; RETURN; BIPUSH 99; RETURN
    let img = one_function(vec![
        0x20, 1, // BIPUSH 1
        0x20, 1, // BIPUSH 1
        0x53, 0, 5, // IF_CMPNE +5 (not taken: 1 == 1)
        0x20, 7, // BIPUSH 7
        0x62, // RETURN
        0x20, 99, // BIPUSH 99
        0x62, // RETURN
    ]);
    assert_eq!(run_ok(&img), 7);
}

#[test]
fn return_with_a_stray_value_left_on_the_stack_traps() {
    // BIPUSH 1; BIPUSH 2; RETURN -- pops 2 as the result, leaves 1 behind
    let img = one_function(vec![0x20, 1, 0x20, 2, 0x62]);
    assert!(matches!(run_err(&img), VmError::Fault(VmFault::DirtyReturn)));
}

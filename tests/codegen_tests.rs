//! End-to-end tests: TAC built through the public API, lowered to x86

use pl0c::compiler::{
    Arg, CompileOptions, Compiler, DataType, EvictionPolicy, IrBuilder, SourceLoc, TacOp, Value,
};
use pl0c::Error;

fn quiet() -> CompileOptions {
    CompileOptions {
        annotate: false,
        ..CompileOptions::default()
    }
}

fn trimmed(lines: &[String]) -> Vec<String> {
    lines.iter().map(|l| l.trim().to_string()).collect()
}

fn n(name: &str) -> Value {
    Value::name(name)
}

/// Lines between the prologue and the epilogue of routine `name`
fn routine_body(lines: &[String], name: &str) -> Vec<String> {
    let label = format!("_{}:", name);
    let start = lines.iter().position(|l| *l == label).expect("routine label");
    let mut body_start = start + 3;
    if lines[body_start].starts_with("sub esp,") {
        body_start += 1;
    }
    let ret = body_start + lines[body_start..].iter().position(|l| l == "ret").expect("ret");
    lines[body_start..ret - 2].to_vec()
}

// =============================================================================
// STATIC LINKS
// =============================================================================

/// program: var a; procedure p; procedure q; begin a := a + 1 end; begin q end; begin p end.
#[test]
fn test_increment_two_levels_out() {
    let mut ir = IrBuilder::new();
    ir.emit_call(TacOp::Proc, n("main"), vec![], None).unwrap();
    ir.emit(TacOp::Var, n("a"), None, None).unwrap();
    ir.emit_call(TacOp::Proc, n("p"), vec![], None).unwrap();
    ir.emit_call(TacOp::Proc, n("q"), vec![], None).unwrap();
    ir.emit(TacOp::Begin, n("q"), None, None).unwrap();
    let t = ir.make_temp();
    ir.emit(TacOp::Add, n(&t), Some(n("a")), Some(Value::imm(1)))
        .unwrap();
    ir.emit(TacOp::Assign, n("a"), Some(n(&t)), None).unwrap();
    ir.emit(TacOp::End, n("q"), None, None).unwrap();
    ir.emit(TacOp::Begin, n("p"), None, None).unwrap();
    ir.emit_call(TacOp::Call, n("q"), vec![], None).unwrap();
    ir.emit(TacOp::End, n("p"), None, None).unwrap();
    ir.emit(TacOp::Begin, n("main"), None, None).unwrap();
    ir.emit_call(TacOp::Call, n("p"), vec![], None).unwrap();
    ir.emit(TacOp::End, n("main"), None, None).unwrap();

    let result = Compiler::new(quiet()).compile(ir.instructions()).unwrap();
    let lines = trimmed(&result.lines);

    assert_eq!(
        routine_body(&lines, "q"),
        vec![
            "mov eax, dword [ebp+8]",
            "mov eax, dword [eax+8]",
            "mov ecx, dword [eax-4]",
            "add ecx, 1",
            "mov eax, dword [ebp+8]",
            "mov eax, dword [eax+8]",
            "mov dword [eax-4], ecx",
        ]
    );
    // q is declared inside p, p inside main: both calls pass the caller's frame
    assert_eq!(
        routine_body(&lines, "p"),
        vec!["push ebp", "call _q", "add esp, 4"]
    );
    assert_eq!(
        routine_body(&lines, "main"),
        vec!["push ebp", "call _p", "add esp, 4"]
    );
}

#[test]
fn test_sibling_call_passes_parent_frame() {
    let mut ir = IrBuilder::new();
    ir.emit_call(TacOp::Proc, n("main"), vec![], None).unwrap();
    ir.emit_call(TacOp::Proc, n("a"), vec![], None).unwrap();
    ir.emit(TacOp::Begin, n("a"), None, None).unwrap();
    ir.emit(TacOp::End, n("a"), None, None).unwrap();
    ir.emit_call(TacOp::Proc, n("b"), vec![], None).unwrap();
    ir.emit(TacOp::Begin, n("b"), None, None).unwrap();
    ir.emit_call(TacOp::Call, n("a"), vec![], None).unwrap();
    ir.emit(TacOp::End, n("b"), None, None).unwrap();
    ir.emit(TacOp::Begin, n("main"), None, None).unwrap();
    ir.emit(TacOp::End, n("main"), None, None).unwrap();

    let result = Compiler::new(quiet()).compile(ir.instructions()).unwrap();
    assert_eq!(
        routine_body(&trimmed(&result.lines), "b"),
        vec!["mov eax, dword [ebp+8]", "push eax", "call _a", "add esp, 4"]
    );
}

/// var x, my_x; begin x := 1; my_x := 2 end.
#[test]
fn test_similar_names_get_their_own_slots() {
    let mut ir = IrBuilder::new();
    ir.emit_call(TacOp::Proc, n("main"), vec![], None).unwrap();
    ir.emit(TacOp::Var, n("x"), None, None).unwrap();
    ir.emit(TacOp::Var, n("my_x"), None, None).unwrap();
    ir.emit(TacOp::Begin, n("main"), None, None).unwrap();
    ir.emit(TacOp::Assign, n("x"), Some(Value::imm(1)), None).unwrap();
    ir.emit(TacOp::Assign, n("my_x"), Some(Value::imm(2)), None)
        .unwrap();
    ir.emit(TacOp::End, n("main"), None, None).unwrap();

    let result = Compiler::new(quiet()).compile(ir.instructions()).unwrap();
    assert_eq!(
        routine_body(&trimmed(&result.lines), "main"),
        vec![
            "mov ecx, 1",
            "mov dword [ebp-4], ecx",
            "mov ecx, 2",
            "mov dword [ebp-8], ecx",
        ]
    );
}

// =============================================================================
// REGISTER PRESSURE
// =============================================================================

/// Seven temporaries live at once force evictions; the sum must still read
/// every spilled value back.
fn pressure_program() -> IrBuilder {
    let mut ir = IrBuilder::new();
    ir.emit_call(TacOp::Proc, n("main"), vec![], None).unwrap();
    ir.emit(TacOp::Var, n("x"), None, None).unwrap();
    ir.emit(TacOp::Begin, n("main"), None, None).unwrap();

    let temps: Vec<String> = (0..7)
        .map(|i| {
            let t = ir.make_temp();
            ir.emit(TacOp::Add, n(&t), Some(n("x")), Some(Value::imm(i)))
                .unwrap();
            t
        })
        .collect();

    let mut acc = temps[0].clone();
    for t in &temps[1..] {
        let sum = ir.make_temp();
        ir.emit(TacOp::Add, n(&sum), Some(n(&acc)), Some(n(t))).unwrap();
        acc = sum;
    }
    ir.emit(TacOp::Assign, n("x"), Some(n(&acc)), None).unwrap();
    ir.emit(TacOp::End, n("main"), None, None).unwrap();
    ir
}

#[test]
fn test_register_pressure_spills_and_reloads() {
    let ir = pressure_program();
    let result = Compiler::new(quiet()).compile(ir.instructions()).unwrap();
    let lines = trimmed(&result.lines);

    assert!(result.stats.evictions >= 2);
    assert!(result.stats.spills >= 2);
    assert!(result.stats.reloads > 0);
    assert!(lines.iter().any(|l| l == "sub esp, 4"));
    // eax is never handed out for a value
    assert!(!lines.iter().any(|l| l.starts_with("add eax")));
    // the final sum is written back to x
    assert!(lines.iter().any(|l| l.starts_with("mov dword [ebp-4],")));
}

#[test]
fn test_eviction_policies_are_deterministic() {
    for eviction in [EvictionPolicy::Lru, EvictionPolicy::RoundRobin] {
        let options = CompileOptions {
            eviction,
            ..quiet()
        };
        let ir = pressure_program();
        let first = Compiler::new(options.clone())
            .compile(ir.instructions())
            .unwrap();
        let second = Compiler::new(options).compile(ir.instructions()).unwrap();
        assert_eq!(first.asm, second.asm);
    }
}

#[test]
fn test_spilled_slots_survive_labels() {
    let mut ir = IrBuilder::new();
    ir.emit_call(TacOp::Proc, n("main"), vec![], None).unwrap();
    ir.emit(TacOp::Var, n("i"), None, None).unwrap();
    ir.emit(TacOp::Begin, n("main"), None, None).unwrap();
    let done = ir.make_label();
    let t = ir.make_temp();
    ir.emit(TacOp::Mul, n(&t), Some(n("i")), Some(Value::imm(3)))
        .unwrap();
    ir.emit(TacOp::Jgt, Value::imm(done as i32), Some(n(&t)), Some(Value::imm(9)))
        .unwrap();
    ir.emit(TacOp::Assign, n("i"), Some(Value::imm(0)), None)
        .unwrap();
    ir.emit_label(done);
    ir.emit(TacOp::End, n("main"), None, None).unwrap();

    let result = Compiler::new(quiet()).compile(ir.instructions()).unwrap();
    let lines = trimmed(&result.lines);
    let body = routine_body(&lines, "main");

    assert_eq!(
        body,
        vec![
            "mov ecx, dword [ebp-4]",
            "imul ecx, 3",
            "sub esp, 4",
            "mov dword [ebp-8], ecx",
            "mov eax, dword [ebp-8]",
            "cmp eax, 9",
            "jg L0",
            "mov ecx, 0",
            "mov dword [ebp-4], ecx",
            "L0:",
            "lea esp, [ebp-8]",
        ]
    );
}

// =============================================================================
// FUNCTIONS AND I/O
// =============================================================================

#[test]
fn test_function_with_reference_parameter() {
    // function bump(var r: integer): integer; begin r := r + 1; bump := r end;
    let mut ir = IrBuilder::new();
    ir.emit_call(TacOp::Proc, n("main"), vec![], None).unwrap();
    ir.emit(TacOp::Var, n("v"), None, None).unwrap();
    ir.emit_call(TacOp::Func, n("bump"), vec![Arg::by_ref(n("r"))], None)
        .unwrap();
    ir.emit(TacOp::Begin, n("bump"), None, None).unwrap();
    let t = ir.make_temp();
    ir.emit(TacOp::Add, n(&t), Some(n("r")), Some(Value::imm(1)))
        .unwrap();
    ir.emit(TacOp::Assign, n("r"), Some(n(&t)), None).unwrap();
    ir.emit(TacOp::Assign, n("bump"), Some(n("r")), None).unwrap();
    ir.emit(TacOp::End, n("bump"), None, None).unwrap();
    ir.emit(TacOp::Begin, n("main"), None, None).unwrap();
    let ret = ir.make_return_slot();
    ir.emit_call(TacOp::Call, n("bump"), vec![Arg::by_ref(n("v"))], Some(n(&ret)))
        .unwrap();
    ir.emit(TacOp::Write, n(&ret), None, None).unwrap();
    ir.emit(TacOp::End, n("main"), None, None).unwrap();

    let result = Compiler::new(quiet()).compile(ir.instructions()).unwrap();
    let lines = trimmed(&result.lines);

    assert_eq!(
        routine_body(&lines, "bump"),
        vec![
            "mov eax, dword [ebp+12]",
            "mov ecx, dword [eax]",
            "add ecx, 1",
            "mov eax, dword [ebp+12]",
            "mov dword [eax], ecx",
            "mov eax, dword [ebp+12]",
            "mov ecx, dword [eax]",
            "mov dword [ebp-4], ecx",
            "mov eax, dword [ebp-4]",
        ]
    );
    assert_eq!(
        routine_body(&lines, "main"),
        vec![
            "lea eax, [ebp-4]",
            "push eax",
            "push ebp",
            "call _bump",
            "add esp, 8",
            "mov ecx, eax",
            "sub esp, 4",
            "mov dword [ebp-8], ecx",
            "push dword [ebp-8]",
            "call _write_int",
            "add esp, 4",
        ]
    );
}

#[test]
fn test_char_io() {
    let mut ir = IrBuilder::new();
    ir.emit_call(TacOp::Proc, n("main"), vec![], None).unwrap();
    ir.emit(TacOp::Var, Value::typed("c", DataType::Char), None, None)
        .unwrap();
    ir.emit(TacOp::Begin, n("main"), None, None).unwrap();
    ir.emit(TacOp::Read, Value::typed("c", DataType::Char), None, None)
        .unwrap();
    ir.emit(TacOp::Write, Value::typed("c", DataType::Char), None, None)
        .unwrap();
    ir.emit(TacOp::Write, Value::char('\n'), None, None).unwrap();
    ir.emit(TacOp::End, n("main"), None, None).unwrap();

    let result = Compiler::new(quiet()).compile(ir.instructions()).unwrap();
    let lines = trimmed(&result.lines);
    assert!(lines.contains(&"call _read_char".to_string()));
    assert!(lines.contains(&"push dword [ebp-4]".to_string()));
    assert!(lines.contains(&"push 10".to_string()));
    assert_eq!(
        lines.iter().filter(|l| *l == "call _write_char").count(),
        2
    );
}

// =============================================================================
// LISTINGS, OPTIONS, ERRORS
// =============================================================================

#[test]
fn test_json_listing_round_trip_compiles_identically() {
    let ir = pressure_program();
    let json = ir.to_json().unwrap();
    let compiler = Compiler::new(quiet());

    let direct = compiler.compile(ir.instructions()).unwrap();
    let via_json = compiler.compile_json(&json).unwrap();
    assert_eq!(direct.asm, via_json.asm);
}

#[test]
fn test_annotations_and_dumps() {
    let mut ir = IrBuilder::new();
    ir.emit_call(TacOp::Proc, n("main"), vec![], None).unwrap();
    ir.emit(TacOp::Var, n("x"), None, None).unwrap();
    ir.emit(TacOp::Begin, n("main"), None, None).unwrap();
    ir.emit(TacOp::Neg, n("x"), Some(n("x")), None).unwrap();
    ir.emit(TacOp::End, n("main"), None, None).unwrap();

    let options = CompileOptions {
        dump_symbols: true,
        dump_registers: true,
        ..CompileOptions::default()
    };
    let result = Compiler::new(options).compile(ir.instructions()).unwrap();

    assert!(result.asm.contains("    neg ecx\t\t;; neg x, x\n"));
    assert!(result.asm.contains(";; x: -4 is_ref: 0 in_mem: 1\n"));
    assert!(result.asm.contains(";; ------------ register mapping ----------------\n"));
}

#[test]
fn test_errors_carry_source_location() {
    let mut ir = IrBuilder::new();
    ir.emit_call(TacOp::Proc, n("main"), vec![], None).unwrap();
    ir.emit(TacOp::Begin, n("main"), None, None).unwrap();
    ir.set_loc(Some(SourceLoc { line: 12, col: 5 }));
    ir.emit(TacOp::Write, n("undeclared"), None, None).unwrap();

    let err = Compiler::new(quiet())
        .compile(ir.instructions())
        .unwrap_err();
    assert_eq!(err.to_string(), "12:5: No storage location for `undeclared`");
    assert_eq!(
        err.root(),
        &Error::NoStorage {
            name: "undeclared".to_string()
        }
    );
}

#[test]
fn test_invalid_word_size_is_rejected() {
    let options = CompileOptions {
        word_size: 8,
        ..CompileOptions::default()
    };
    assert!(matches!(
        Compiler::new(options).compile(&[]),
        Err(Error::Config(_))
    ));
}

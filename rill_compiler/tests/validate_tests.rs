//! Integration tests for bytecode validation.
//!
//! Freshly compiled programs must always validate with every dialect
//! feature enabled; corrupted code and narrowed dialects must be rejected
//! with a descriptive, located error.

use rill_compiler::ast::*;
use rill_compiler::{compile_file, Binding, Funcode, Opcode, Program, ValidateOptions};
use rill_core::{Pos, ValidateError};

// =============================================================================
// Test Helpers
// =============================================================================

fn p(line: u32) -> Pos {
    Pos::new(line, 1)
}

fn local(name: &str, index: u32) -> Ident {
    Ident {
        name: name.into(),
        pos: p(1),
        scope: Scope::Local,
        index,
    }
}

fn var(id: Ident) -> Expr {
    Expr::new(ExprKind::Ident(id), p(1))
}

fn bin(op: BinOp, x: Expr, y: Expr) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            x: x.into(),
            y: y.into(),
        },
        p(1),
    )
}

fn assign(lhs: Expr, rhs: Expr) -> Stmt {
    Stmt::new(StmtKind::Assign { lhs, rhs }, p(1))
}

fn compile(stmts: &[Stmt], locals: &[Ident]) -> Program {
    compile_file("test.rill", stmts, locals, &[])
}

/// A bare function with the given code, for corruption tests.
fn raw_funcode(code: Vec<u8>, max_stack: u32) -> Funcode {
    Funcode {
        filename: "test.rill".into(),
        pos: p(1),
        name: "f".into(),
        code,
        pcline: Vec::new(),
        locals: Vec::new(),
        freevars: Vec::new(),
        max_stack,
        num_params: 0,
        has_varargs: false,
        has_kwargs: false,
    }
}

/// A program with empty pools around `raw_funcode` as toplevel.
fn raw_program() -> Program {
    Program {
        loads: Vec::new(),
        names: Vec::new(),
        constants: Vec::new(),
        functions: Vec::new(),
        globals: Vec::new(),
        toplevel: raw_funcode(vec![Opcode::None as u8, Opcode::Return as u8], 1),
    }
}

/// A try/except + bitwise + set-comprehension module: one program that
/// exercises every dialect-gated opcode.
fn gated_program() -> Program {
    let set_comp = Expr::new(
        ExprKind::Comprehension(Box::new(Comprehension {
            curly: true,
            body: CompBody::Elem(var(local("x", 0))),
            clauses: vec![CompClause::For {
                vars: var(local("x", 0)),
                iter: var(local("xs", 1)),
                pos: p(1),
            }],
        })),
        p(1),
    );
    let stmts = [
        Stmt::new(
            StmtKind::Try {
                body: vec![assign(
                    var(local("r", 2)),
                    bin(BinOp::Amp, var(local("x", 0)), var(local("x", 0))),
                )],
                exc_type: None,
                exc_name: None,
                fallback: vec![Stmt::new(StmtKind::Pass, p(1))],
            },
            p(1),
        ),
        assign(var(local("r", 2)), set_comp),
    ];
    compile(
        &stmts,
        &[local("x", 0), local("xs", 1), local("r", 2)],
    )
}

// =============================================================================
// Validator Soundness
// =============================================================================

#[test]
fn test_fresh_compile_always_validates() {
    let prog = gated_program();
    prog.toplevel
        .validate(&prog, &ValidateOptions::default())
        .expect("freshly compiled code must validate");
}

#[test]
fn test_nested_functions_validate() {
    let function = Function {
        pos: p(1),
        params: vec![Param::Required(local("a", 0))],
        body: vec![Stmt::new(StmtKind::Return(Some(var(local("a", 0)))), p(1))],
        locals: vec![local("a", 0)],
        freevars: vec![],
        has_varargs: false,
        has_kwargs: false,
    };
    let stmts = [Stmt::new(
        StmtKind::Def {
            name: Ident {
                name: "f".into(),
                pos: p(1),
                scope: Scope::Global,
                index: 0,
            },
            function,
        },
        p(1),
    )];
    let prog = compile_file(
        "test.rill",
        &stmts,
        &[],
        &[Ident {
            name: "f".into(),
            pos: p(1),
            scope: Scope::Global,
            index: 0,
        }],
    );
    let opts = ValidateOptions::default();
    prog.toplevel.validate(&prog, &opts).expect("toplevel");
    for fc in &prog.functions {
        fc.validate(&prog, &opts).expect("nested function");
    }
}

// =============================================================================
// Dialect Gates
// =============================================================================

#[test]
fn test_try_except_gate() {
    let prog = gated_program();
    let opts = ValidateOptions {
        dialect: Dialect {
            allow_try_except: false,
            ..Dialect::default()
        },
        ..ValidateOptions::default()
    };
    let err = prog.toplevel.validate(&prog, &opts).unwrap_err();
    assert!(matches!(
        err,
        ValidateError::DisabledFeature {
            feature: "try/except",
            ..
        }
    ));
    assert!(err.to_string().contains("does not support try/except"));
}

#[test]
fn test_bitwise_gate() {
    let prog = gated_program();
    let opts = ValidateOptions {
        dialect: Dialect {
            allow_bitwise: false,
            ..Dialect::default()
        },
        ..ValidateOptions::default()
    };
    let err = prog.toplevel.validate(&prog, &opts).unwrap_err();
    assert!(matches!(
        err,
        ValidateError::DisabledFeature {
            feature: "bitwise operations",
            ..
        }
    ));
}

#[test]
fn test_set_gate() {
    let prog = gated_program();
    let opts = ValidateOptions {
        dialect: Dialect {
            allow_set: false,
            ..Dialect::default()
        },
        ..ValidateOptions::default()
    };
    let err = prog.toplevel.validate(&prog, &opts).unwrap_err();
    assert!(matches!(
        err,
        ValidateError::DisabledFeature { feature: "sets", .. }
    ));
}

// =============================================================================
// Structural Checks
// =============================================================================

#[test]
fn test_illegal_opcode_is_rejected() {
    let prog = raw_program();
    let fc = raw_funcode(vec![200], 0);
    let err = fc.validate(&prog, &ValidateOptions::default()).unwrap_err();
    assert_eq!(err, ValidateError::IllegalOpcode { pc: 0, op: 200 });
}

#[test]
fn test_truncated_operand_is_rejected() {
    let prog = raw_program();
    let fc = raw_funcode(vec![Opcode::Constant as u8], 1);
    let err = fc.validate(&prog, &ValidateOptions::default()).unwrap_err();
    assert!(matches!(err, ValidateError::TruncatedOperand { pc: 0, .. }));
}

#[test]
fn test_local_out_of_bounds() {
    let prog = raw_program();
    // LOCAL 3 with an empty locals table.
    let fc = raw_funcode(vec![Opcode::Local as u8, 3], 1);
    let err = fc.validate(&prog, &ValidateOptions::default()).unwrap_err();
    assert_eq!(
        err,
        ValidateError::OperandOutOfBounds {
            pc: 0,
            op: "local",
            arg: 3,
            pool: "locals",
            len: 0,
        }
    );
}

#[test]
fn test_constant_out_of_bounds() {
    let prog = raw_program();
    let fc = raw_funcode(vec![Opcode::Constant as u8, 0], 1);
    let err = fc.validate(&prog, &ValidateOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        ValidateError::OperandOutOfBounds {
            pool: "constants",
            ..
        }
    ));
}

#[test]
fn test_branch_target_out_of_bounds() {
    let prog = raw_program();
    let fc = raw_funcode(vec![Opcode::Jmp as u8, 99], 0);
    let err = fc.validate(&prog, &ValidateOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        ValidateError::BranchOutOfBounds { target: 99, .. }
    ));
}

#[test]
fn test_stack_shaped_operands_checked_against_max_stack() {
    let prog = raw_program();

    // MAKELIST 5 in a function whose stack never exceeds 2.
    let fc = raw_funcode(vec![Opcode::MakeList as u8, 5], 2);
    let err = fc.validate(&prog, &ValidateOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        ValidateError::StackOutOfBounds { arg: 5, max_stack: 2, .. }
    ));

    // LOAD is checked with one extra slot for the module value.
    let fc = raw_funcode(vec![Opcode::Load as u8, 2], 2);
    let err = fc.validate(&prog, &ValidateOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        ValidateError::StackOutOfBounds { arg: 3, max_stack: 2, .. }
    ));
    let fc = raw_funcode(vec![Opcode::Load as u8, 2], 3);
    fc.validate(&prog, &ValidateOptions::default())
        .expect("LOAD 2 fits in max stack 3");
}

// =============================================================================
// Host Name Predicates
// =============================================================================

fn predeclared_program() -> Program {
    // r = println  (a name supplied by the embedder)
    let stmts = [assign(
        var(local("r", 0)),
        var(Ident {
            name: "println".into(),
            pos: p(1),
            scope: Scope::Predeclared,
            index: 0,
        }),
    )];
    compile(&stmts, &[local("r", 0)])
}

#[test]
fn test_predeclared_predicate_accepts_and_rejects() {
    let prog = predeclared_program();

    // Default: every name is accepted.
    prog.toplevel
        .validate(&prog, &ValidateOptions::default())
        .expect("default predicates accept all names");

    let accept = |name: &str| name == "println";
    prog.toplevel
        .validate(
            &prog,
            &ValidateOptions {
                is_predeclared: Some(&accept),
                ..ValidateOptions::default()
            },
        )
        .expect("a host providing println accepts the program");

    let reject = |_: &str| false;
    let err = prog
        .toplevel
        .validate(
            &prog,
            &ValidateOptions {
                is_predeclared: Some(&reject),
                ..ValidateOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ValidateError::UnknownName {
            expected: "predeclared",
            ..
        }
    ));
    assert!(err.to_string().contains("println"));
}

#[test]
fn test_universal_predicate() {
    // r = len(xs)
    let stmts = [assign(
        var(local("r", 0)),
        Expr::new(
            ExprKind::Call {
                func: var(Ident {
                    name: "len".into(),
                    pos: p(1),
                    scope: Scope::Universal,
                    index: 0,
                })
                .into(),
                args: vec![Arg::Positional(var(local("xs", 1)))],
            },
            p(1),
        ),
    )];
    let prog = compile(&stmts, &[local("r", 0), local("xs", 1)]);

    let reject = |_: &str| false;
    let err = prog
        .toplevel
        .validate(
            &prog,
            &ValidateOptions {
                is_universal: Some(&reject),
                ..ValidateOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ValidateError::UnknownName {
            expected: "universal",
            ..
        }
    ));
}

// =============================================================================
// Error Reporting
// =============================================================================

#[test]
fn test_errors_carry_the_failing_pc() {
    let prog = raw_program();
    let fc = raw_funcode(
        vec![
            Opcode::None as u8,
            Opcode::Pop as u8,
            Opcode::Local as u8,
            7,
        ],
        1,
    );
    let err = fc.validate(&prog, &ValidateOptions::default()).unwrap_err();
    assert_eq!(err.pc(), 2);
}

#[test]
fn test_binding_is_public_data() {
    // Diagnostic tables survive compilation for tracing.
    let prog = compile(&[assign(var(local("x", 0)), var(local("y", 1)))], &[
        local("x", 0),
        local("y", 1),
    ]);
    assert_eq!(
        prog.toplevel.locals,
        vec![
            Binding {
                name: "x".into(),
                pos: p(1)
            },
            Binding {
                name: "y".into(),
                pos: p(1)
            },
        ]
    );
}

//! Benchmarks for compilation and the operand codec.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rill_compiler::ast::*;
use rill_compiler::{compile_file, decode_op};
use rill_core::{Constant, Pos};

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

/// A module with a loop, a conditional, and arithmetic: enough shape to
/// exercise block creation, linearization, and the line table.
fn sample_module() -> (Vec<Stmt>, Vec<Ident>) {
    let locals = vec![local("acc", 0), local("x", 1), local("xs", 2)];
    let body = vec![Stmt::new(
        StmtKind::If {
            cond: var(local("x", 1)),
            then_body: vec![Stmt::new(
                StmtKind::AugAssign {
                    op: BinOp::Plus,
                    lhs: var(local("acc", 0)),
                    rhs: var(local("x", 1)),
                },
                p(3),
            )],
            else_body: vec![Stmt::new(StmtKind::Continue, p(4))],
        },
        p(2),
    )];
    let stmts = vec![
        Stmt::new(
            StmtKind::Assign {
                lhs: var(local("acc", 0)),
                rhs: Expr::new(ExprKind::Literal(Constant::Int(0)), p(1)),
            },
            p(1),
        ),
        Stmt::new(
            StmtKind::For {
                vars: var(local("x", 1)),
                iter: var(local("xs", 2)),
                body,
            },
            p(2),
        ),
    ];
    (stmts, locals)
}

fn bench_compile(c: &mut Criterion) {
    let (stmts, locals) = sample_module();
    c.bench_function("compile_module", |b| {
        b.iter(|| compile_file(black_box("bench.rill"), &stmts, &locals, &[]));
    });
}

fn bench_decode(c: &mut Criterion) {
    let (stmts, locals) = sample_module();
    let prog = compile_file("bench.rill", &stmts, &locals, &[]);
    let code = &prog.toplevel.code;
    c.bench_function("decode_linear", |b| {
        b.iter(|| {
            let mut pc = 0u32;
            while (pc as usize) < code.len() {
                let (op, arg, next_pc, ok) = decode_op(black_box(code), pc);
                black_box((op, arg, ok));
                pc = next_pc;
            }
        });
    });
}

criterion_group!(benches, bench_compile, bench_decode);
criterion_main!(benches);

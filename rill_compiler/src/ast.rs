//! The resolved AST consumed by the compiler.
//!
//! This is the resolver's output surface: every identifier has been
//! annotated with a [`Scope`] and an index into that scope's frame, every
//! function carries its computed local and free-variable lists, and
//! grouping parentheses have been stripped. The compiler trusts these
//! annotations completely; a malformed tree is a resolver bug.

use rill_core::{Constant, Pos};
use std::sync::Arc;

/// Dialect feature flags, as reported by the resolver.
///
/// The flags gate *validation* only: the compiler emits whatever the
/// resolved AST contains, and a reloaded program is checked against the
/// dialect of the host that loads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// Permit `try`/`except` statements (`ERROR`, `EXCEPTPUSH`, `EXCEPTPOP`).
    pub allow_try_except: bool,
    /// Permit bitwise operators (`&`, `|`, `^`, `~`, `<<`, `>>`).
    pub allow_bitwise: bool,
    /// Permit set literals and comprehensions (`MAKESET`).
    pub allow_set: bool,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            allow_try_except: true,
            allow_bitwise: true,
            allow_set: true,
        }
    }
}

/// The scope a resolved identifier binds in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// A slot in the enclosing function's local frame.
    Local,
    /// A slot in the enclosing function's free-variable tuple.
    Free,
    /// A slot in the module's global frame.
    Global,
    /// A name provided by the embedding application, resolved at runtime.
    Predeclared,
    /// A name built into the language, resolved at runtime.
    Universal,
}

/// An identifier annotated by the resolver.
#[derive(Debug, Clone)]
pub struct Ident {
    /// The identifier text.
    pub name: Arc<str>,
    /// Position of the identifier in the source.
    pub pos: Pos,
    /// Which frame the identifier binds in.
    pub scope: Scope,
    /// Index within that frame. Unused for `Predeclared` and `Universal`,
    /// which are resolved by name.
    pub index: u32,
}

/// A statement.
#[derive(Debug, Clone)]
pub struct Stmt {
    /// The statement's payload.
    pub kind: StmtKind,
    /// Position of the statement's operative token (`=`, `for`, `load`, ...).
    pub pos: Pos,
}

impl Stmt {
    /// Create a new statement.
    #[must_use]
    pub fn new(kind: StmtKind, pos: Pos) -> Self {
        Self { kind, pos }
    }
}

/// Statement forms.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// An expression evaluated for its side effects.
    Expr(Expr),
    /// Simple assignment: `lhs = rhs`.
    Assign {
        /// Assignment target (identifier, tuple/list pattern, index, or field).
        lhs: Expr,
        /// The assigned value.
        rhs: Expr,
    },
    /// Augmented assignment: `lhs op= rhs`.
    AugAssign {
        /// The underlying binary operator (`Plus` for `+=`, ...).
        op: BinOp,
        /// Assignment target (identifier, index, or field).
        lhs: Expr,
        /// The right operand.
        rhs: Expr,
    },
    /// Function definition: `def name(params): body`.
    Def {
        /// The name the function is bound to.
        name: Ident,
        /// The function itself.
        function: Function,
    },
    /// Iteration: `for vars in iter: body`.
    For {
        /// Loop variable(s): an identifier or a tuple/list pattern.
        vars: Expr,
        /// The iterable expression.
        iter: Expr,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// `return expr` or a bare `return`.
    Return(Option<Expr>),
    /// `break` out of the innermost loop.
    Break,
    /// `continue` the innermost loop.
    Continue,
    /// `pass`.
    Pass,
    /// Conditional: `if cond: then_body else: else_body`.
    If {
        /// The condition.
        cond: Expr,
        /// Statements of the true branch.
        then_body: Vec<Stmt>,
        /// Statements of the false branch (possibly empty).
        else_body: Vec<Stmt>,
    },
    /// Exception handling: `try: body except [ty [as name]]: fallback`.
    Try {
        /// The protected statements.
        body: Vec<Stmt>,
        /// The expected exception type, if the clause is typed.
        exc_type: Option<Ident>,
        /// The name the caught value is bound to, if any.
        exc_name: Option<Ident>,
        /// The handler statements.
        fallback: Vec<Stmt>,
    },
    /// Module import: `load(module, name = "orig", ...)`.
    Load {
        /// The module path.
        module: Arc<str>,
        /// Position of the module-path literal.
        module_pos: Pos,
        /// Names to fetch from the module, in declaration order.
        from: Vec<Arc<str>>,
        /// The global identifiers they are bound to, parallel to `from`.
        to: Vec<Ident>,
    },
}

/// An expression. Every expression evaluates to exactly one value on the
/// operand stack.
#[derive(Debug, Clone)]
pub struct Expr {
    /// The expression's payload.
    pub kind: ExprKind,
    /// Position of the expression's operative token (the identifier, the
    /// operator, `(` for calls, `[` for indexing, `.` for field access).
    pub pos: Pos,
}

impl Expr {
    /// Create a new expression.
    #[must_use]
    pub fn new(kind: ExprKind, pos: Pos) -> Self {
        Self { kind, pos }
    }
}

/// Expression forms.
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// A resolved identifier.
    Ident(Ident),
    /// A literal constant.
    Literal(Constant),
    /// A list literal.
    List(Vec<Expr>),
    /// A tuple literal.
    Tuple(Vec<Expr>),
    /// A dict literal.
    Dict(Vec<DictEntry>),
    /// Conditional expression: `t if cond else f`.
    Cond {
        /// The condition.
        cond: Box<Expr>,
        /// Value when the condition holds.
        t: Box<Expr>,
        /// Value otherwise.
        f: Box<Expr>,
    },
    /// Indexing: `x[y]`.
    Index {
        /// The receiver.
        x: Box<Expr>,
        /// The key or index.
        y: Box<Expr>,
    },
    /// Slicing: `x[lo:hi:step]`, any part optional.
    Slice {
        /// The receiver.
        x: Box<Expr>,
        /// Lower bound.
        lo: Option<Box<Expr>>,
        /// Upper bound.
        hi: Option<Box<Expr>>,
        /// Step.
        step: Option<Box<Expr>>,
    },
    /// A list/dict/set comprehension.
    Comprehension(Box<Comprehension>),
    /// Unary operation.
    Unary {
        /// The operator.
        op: UnOp,
        /// The operand.
        x: Box<Expr>,
    },
    /// Binary operation, including comparisons and short-circuit `and`/`or`.
    Binary {
        /// The operator.
        op: BinOp,
        /// Left operand.
        x: Box<Expr>,
        /// Right operand.
        y: Box<Expr>,
    },
    /// Field access: `x.name`.
    Dot {
        /// The receiver.
        x: Box<Expr>,
        /// The attribute name (unresolved; looked up at runtime).
        name: Arc<str>,
    },
    /// A function call.
    Call {
        /// The callee.
        func: Box<Expr>,
        /// The arguments.
        args: Vec<Arg>,
    },
    /// An anonymous function.
    Lambda(Box<Function>),
}

/// One `key: value` entry of a dict literal or dict comprehension.
#[derive(Debug, Clone)]
pub struct DictEntry {
    /// The key expression.
    pub key: Expr,
    /// The value expression.
    pub value: Expr,
    /// Position of the `:` separating them.
    pub colon: Pos,
}

/// A comprehension: `[body for vars in iter if cond ...]` and its curly
/// variants.
#[derive(Debug, Clone)]
pub struct Comprehension {
    /// Whether the comprehension is written with curly braces. A curly
    /// comprehension with a [`CompBody::Entry`] body builds a dict;
    /// with an element body it builds a set.
    pub curly: bool,
    /// What is accumulated each iteration.
    pub body: CompBody,
    /// The `for` and `if` clauses, outermost first.
    pub clauses: Vec<CompClause>,
}

/// The accumulated body of a comprehension.
#[derive(Debug, Clone)]
pub enum CompBody {
    /// A single element (list and set comprehensions).
    Elem(Expr),
    /// A `key: value` pair (dict comprehensions).
    Entry(DictEntry),
}

/// One clause of a comprehension.
#[derive(Debug, Clone)]
pub enum CompClause {
    /// `for vars in iter`.
    For {
        /// Loop variable(s): an identifier or a tuple/list pattern.
        vars: Expr,
        /// The iterable expression.
        iter: Expr,
        /// Position of the `for` keyword.
        pos: Pos,
    },
    /// `if cond`.
    If(Expr),
}

/// A function literal (the body of a `def` or a lambda).
#[derive(Debug, Clone)]
pub struct Function {
    /// Position of the `def` or `lambda` token.
    pub pos: Pos,
    /// Parameters in declaration order.
    pub params: Vec<Param>,
    /// The function body.
    pub body: Vec<Stmt>,
    /// The local frame computed by the resolver (parameters first).
    pub locals: Vec<Ident>,
    /// Free variables, annotated with their scope in the *enclosing*
    /// function so the compiler can capture them.
    pub freevars: Vec<Ident>,
    /// Whether the parameter list ends with `*args`.
    pub has_varargs: bool,
    /// Whether the parameter list ends with `**kwargs`.
    pub has_kwargs: bool,
}

/// One function parameter.
#[derive(Debug, Clone)]
pub enum Param {
    /// A mandatory positional parameter.
    Required(Ident),
    /// A parameter with a default value.
    Optional(Ident, Expr),
    /// The `*args` parameter.
    VarArgs(Ident),
    /// The `**kwargs` parameter.
    KwArgs(Ident),
}

/// One call argument.
#[derive(Debug, Clone)]
pub enum Arg {
    /// A positional argument.
    Positional(Expr),
    /// A named argument: `name = value`.
    Named(Arc<str>, Expr),
    /// Sequence splat: `*expr`.
    Star(Expr),
    /// Mapping splat: `**expr`.
    StarStar(Expr),
}

/// Binary operators.
///
/// The comparison family (`Lt..=Ne`) and the arithmetic family
/// (`Plus..=In`) are declared in the same order as the corresponding
/// opcode families so the compiler can translate by ordinal offset;
/// `bytecode::opcode` pins the correspondence with const assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BinOp {
    /// `<`
    Lt = 0,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `//`
    SlashSlash,
    /// `%`
    Percent,
    /// `&`
    Amp,
    /// `|`
    Pipe,
    /// `^`
    Caret,
    /// `<<`
    LtLt,
    /// `>>`
    GtGt,
    /// `in`
    In,
    /// `not in` — lowered to `In` followed by `Not`.
    NotIn,
    /// Short-circuit `and` — lowered to control flow.
    And,
    /// Short-circuit `or` — lowered to control flow.
    Or,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    /// `+x`
    Plus,
    /// `-x`
    Minus,
    /// `~x`
    Tilde,
    /// `not x`
    Not,
}

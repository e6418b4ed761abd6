//! Syntax tree produced by the parser
//!
//! Every statement and expression carries the line it starts on. Class,
//! define and node bodies are shared behind `Arc` so the evaluator can hold
//! on to definitions without cloning their bodies.

use catalog::Origin;
use std::sync::Arc;

/// A parsed manifest file
#[derive(Debug, Clone)]
pub struct Program {
    pub file: Option<String>,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Resource(ResourceDecl),
    /// `File { mode => '0644' }`
    Defaults {
        type_name: String,
        params: Vec<Param>,
    },
    Definition(Arc<Definition>),
    Node(Arc<NodeDef>),
    Site(Vec<Statement>),
    Call(Call),
    Assign {
        name: String,
        value: Expr,
    },
    /// `if`/`elsif`/`else`; `unless` is an `if` with a negated condition
    If {
        branches: Vec<(Expr, Vec<Statement>)>,
        otherwise: Vec<Statement>,
    },
    Case {
        subject: Expr,
        arms: Vec<CaseArm>,
    },
    /// `a -> b ~> c`; `arrows[i]` sits between `operands[i]` and `operands[i + 1]`
    Chain {
        operands: Vec<ChainOperand>,
        arrows: Vec<Arrow>,
    },
    Expression(Expr),
}

/// `type { title: param => value; ... }`
#[derive(Debug, Clone)]
pub struct ResourceDecl {
    pub type_name: String,
    /// `Here`, or `Virtual` / `Exported` for `@` / `@@`
    pub origin: Origin,
    pub bodies: Vec<ResourceBody>,
}

#[derive(Debug, Clone)]
pub struct ResourceBody {
    pub title: Expr,
    pub params: Vec<Param>,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub value: Expr,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Class,
    Define,
    Application,
}

impl DefinitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Define => "define",
            Self::Application => "application",
        }
    }
}

/// A class, defined type or application
#[derive(Debug, Clone)]
pub struct Definition {
    pub kind: DefinitionKind,
    pub name: String,
    pub params: Vec<ParamDecl>,
    /// `inherits`, classes only
    pub parent: Option<String>,
    pub body: Vec<Statement>,
    pub file: Option<String>,
    pub line: usize,
}

impl Definition {
    pub fn param(&self, name: &str) -> Option<&ParamDecl> {
        self.params.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeName {
    Name(String),
    Default,
}

#[derive(Debug, Clone)]
pub struct NodeDef {
    pub names: Vec<NodeName>,
    pub body: Vec<Statement>,
    pub file: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct CaseArm {
    /// `Expr::Default` matches when nothing else does
    pub matches: Vec<Expr>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub enum ChainOperand {
    Resource(ResourceDecl),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrow {
    /// `~>` / `<~`
    pub notification: bool,
    /// `<-` / `<~`
    pub right2left: bool,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub name: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
}

impl Expr {
    pub fn new(kind: ExprKind, line: usize) -> Self {
        Self { kind, line }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Undef,
    Default,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Single-quoted strings and bare words
    Str(String),
    Interpolated(Vec<StringPart>),
    Variable(String),
    Array(Vec<Expr>),
    Hash(Vec<(Expr, Expr)>),
    /// A bare capitalised name such as `File`
    TypeName(String),
    /// `Type['a', 'b']`
    Reference {
        type_name: String,
        titles: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Selector {
        subject: Box<Expr>,
        cases: Vec<(Expr, Expr)>,
    },
    Call(Call),
}

#[derive(Debug, Clone)]
pub enum StringPart {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }
}

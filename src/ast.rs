//! Árbol de sintaxis abstracta.
//!
//! El parser produce un [`Program`], que es un árbol de [`Function`]s cuya
//! raíz es el cuerpo anónimo del programa. Las expresiones se numeran con
//! [`ExprId`]s densos para que pasadas posteriores les asocien información
//! mediante tablas laterales en vez de mutar el árbol.

use std::fmt::{self, Display};

use bitflags::bitflags;

use crate::{
    lex::{Identifier, TypeName},
    scope::{ScopeId, Scopes},
    source::{Located, Location},
};

/// Un tipo de valor.
///
/// El orden derivado clasifica los tipos del más general al menos general.
/// La aritmética mixta se resuelve al menor de ambos tipos de operandos.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    Real,
    Integer,
    Char,
    Boolean,
    Void,
}

impl Type {
    /// Resuelve el tipo de una operación binaria mixta.
    pub fn best(self, other: Type) -> Type {
        self.min(other)
    }
}

impl From<TypeName> for Type {
    fn from(name: TypeName) -> Self {
        match name {
            TypeName::Integer => Type::Integer,
            TypeName::Real => Type::Real,
            TypeName::Char => Type::Char,
            TypeName::Boolean => Type::Boolean,
        }
    }
}

impl Display for Type {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Type::Real => "real",
            Type::Integer => "integer",
            Type::Char => "char",
            Type::Boolean => "Boolean",
            Type::Void => "void",
        })
    }
}

bitflags! {
    /// Calificadores de almacenamiento de una variable.
    #[derive(Default)]
    pub struct Qualifiers: u8 {
        /// Declarada en una sección `const`, nunca se asigna.
        const CONST = 0b01;

        /// El almacenamiento contiene la dirección de la variable real.
        const REF = 0b10;
    }
}

/// Operadores aritméticos y lógicos.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Or,
    Mul,
    Div,
    IntDiv,
    Mod,
    And,
}

impl ArithOp {
    /// Si ambos operandos deben ser enteros.
    pub fn is_integral(self) -> bool {
        matches!(self, ArithOp::IntDiv | ArithOp::Mod | ArithOp::And | ArithOp::Or)
    }
}

impl Display for ArithOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Or => "or",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::IntDiv => "div",
            ArithOp::Mod => "mod",
            ArithOp::And => "and",
        })
    }
}

/// Operadores relacionales.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl Display for RelOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            RelOp::Eq => "=",
            RelOp::Ne => "<>",
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
            RelOp::In => "in",
        })
    }
}

/// Un valor literal.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Constant {
    Integer(i32),
    Real(f64),
    Boolean(bool),
}

impl Constant {
    pub fn ty(&self) -> Type {
        match self {
            Constant::Integer(_) => Type::Integer,
            Constant::Real(_) => Type::Real,
            Constant::Boolean(_) => Type::Boolean,
        }
    }
}

impl Display for Constant {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Integer(integer) => write!(fmt, "{}", integer),
            Constant::Real(real) => write!(fmt, "{:?}", real),
            Constant::Boolean(boolean) => write!(fmt, "{}", boolean),
        }
    }
}

/// Número denso de expresión, único dentro de un [`Program`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExprId(pub(crate) usize);

impl ExprId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,

    /// Lo activa un `-` unario o `~`. Se realiza como una resta desde cero.
    pub negated: bool,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Binary {
        left: Box<Located<Expr>>,
        op: ArithOp,
        right: Box<Located<Expr>>,
    },

    Compare {
        left: Box<Located<Expr>>,
        op: RelOp,
        right: Box<Located<Expr>>,
    },

    Id(Identifier),
    Literal(Constant),

    Call {
        function: Located<Identifier>,
        args: Vec<Located<Expr>>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Clone, Debug)]
pub enum Statement {
    Sequence(Vec<Located<Statement>>),

    Assign {
        target: Located<Identifier>,
        value: Located<Expr>,
    },

    ProcedureCall {
        procedure: Located<Identifier>,
        args: Vec<Located<Expr>>,
    },

    If {
        condition: Located<Expr>,
        then: Box<Located<Statement>>,
        otherwise: Option<Box<Located<Statement>>>,
    },

    While {
        condition: Located<Expr>,
        body: Box<Located<Statement>>,
    },

    /// El cuerpo siempre es un [`Statement::Sequence`].
    Repeat {
        body: Box<Located<Statement>>,
        condition: Located<Expr>,
    },

    For {
        variable: Located<Identifier>,
        from: Located<Expr>,
        to: Located<Expr>,
        direction: Direction,
        body: Box<Located<Statement>>,
    },

    Empty,
}

/// Un parámetro formal.
#[derive(Clone, Debug)]
pub struct Parameter {
    pub name: Located<Identifier>,
    pub ty: Type,
    pub by_ref: bool,
}

/// Una declaración `const` o `var`.
#[derive(Clone, Debug)]
pub struct Local {
    pub name: Located<Identifier>,
    pub ty: Type,
    pub value: Option<Constant>,
}

/// Una función, un procedimiento o el programa mismo.
#[derive(Clone, Debug)]
pub struct Function {
    /// Vacío para el cuerpo del programa.
    pub name: Identifier,
    pub location: Location,
    pub parameters: Vec<Parameter>,
    pub return_type: Type,
    pub scope: ScopeId,

    /// Constantes y variables, en orden de declaración.
    pub locals: Vec<Local>,
    pub nested: Vec<Function>,
    pub body: Located<Statement>,
}

impl Function {
    pub fn is_root(&self) -> bool {
        self.name.as_ref().is_empty()
    }
}

#[derive(Debug)]
pub struct Program {
    /// Según el encabezado `program` opcional.
    pub name: Option<Identifier>,
    pub root: Function,
    pub scopes: Scopes,

    /// Cantidad de expresiones, todo [`ExprId`] es menor que esto.
    pub expressions: usize,
}

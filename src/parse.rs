//! Análisis sintáctico.
//!
//! Un parser de descenso recursivo con un único token de lookahead. Los tokens
//! se extraen del [`Lexer`] bajo demanda, así que un error léxico solo se
//! reporta cuando el parser lo alcanza.
//!
//! Los scopes se pueblan durante el parseo: cada declaración se agrega al
//! scope de la función en curso en el punto donde aparece, y una colisión de
//! nombres aborta con [`ParserError::Redeclaration`]. Cualquier otra falla es
//! un [`ParserError::Syntax`] que no lleva más que su ubicación. No hay
//! recuperación, el primer error termina el parseo.

use std::rc::Rc;

use thiserror::Error;

use crate::{
    ast::{
        ArithOp, Constant, Direction, Expr, ExprId, ExprKind, Function, Local, Parameter,
        Program, RelOp, Statement, Type,
    },
    lex::{Identifier, Keyword, Lexer, LexerError, Token},
    scope::{ScopeId, Scopes, Signature, Symbol, Variable},
    source::{InputStream, Located, Location},
};

/// Nombre del scope raíz.
const ROOT_SCOPE: &str = "program";

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Syntax error")]
    Syntax,

    #[error("Redeclaration of `{0}`")]
    Redeclaration(Identifier),

    #[error("Unsupported feature: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Lexer(#[from] LexerError),
}

type Parse<T> = Result<T, Located<ParserError>>;

/// Parsea un programa completo.
pub fn parse<S: InputStream>(mut lexer: Lexer<S>) -> Parse<Program> {
    let current = match lexer.next() {
        Some(Ok(token)) => token,
        Some(Err(error)) => return Err(error.map(ParserError::Lexer)),
        None => Located::at(Token::Eof, lexer.location()),
    };

    let scopes = Scopes::new(Identifier::new(ROOT_SCOPE));
    let parser = Parser {
        last_known: current.location().clone(),
        lexer,
        current,
        scope: scopes.root(),
        scopes,
        expressions: 0,
    };

    parser.program()
}

struct Parser<S: InputStream> {
    lexer: Lexer<S>,
    current: Located<Token>,
    last_known: Location,
    scopes: Scopes,
    scope: ScopeId,
    expressions: usize,
}

impl<S: InputStream> Parser<S> {
    fn program(mut self) -> Parse<Program> {
        let location = self.current.location().clone();

        let name = if self.accept(Token::Keyword(Keyword::Program))? {
            let name = self.id()?;
            self.expect(Token::Semicolon)?;
            Some(name.into_inner())
        } else {
            None
        };

        let (locals, nested) = self.declarations()?;
        let body = self.sequence()?;

        self.accept(Token::Period)?;
        self.expect(Token::Eof)?;

        let root = Function {
            name: Identifier::new(""),
            location,
            parameters: Vec::new(),
            return_type: Type::Integer,
            scope: self.scopes.root(),
            locals,
            nested,
            body,
        };

        Ok(Program {
            name,
            root,
            scopes: self.scopes,
            expressions: self.expressions,
        })
    }

    fn declarations(&mut self) -> Parse<(Vec<Local>, Vec<Function>)> {
        let mut locals = Vec::new();
        let mut nested = Vec::new();

        if let Token::Keyword(Keyword::Label) = self.peek() {
            self.next()?;
            return self.fail(ParserError::Unsupported("label declarations"));
        }

        // Las secciones siguen un orden fijo: constantes, variables, funciones
        if self.accept(Token::Keyword(Keyword::Const))? {
            loop {
                locals.push(self.constant()?);
                if !matches!(self.peek(), Token::Id(_)) {
                    break;
                }
            }
        }

        if self.accept(Token::Keyword(Keyword::Var))? {
            loop {
                self.variables(&mut locals)?;
                if !matches!(self.peek(), Token::Id(_)) {
                    break;
                }
            }
        }

        while let Token::Keyword(Keyword::Function | Keyword::Procedure) = self.peek() {
            nested.push(self.function()?);
        }

        Ok((locals, nested))
    }

    fn constant(&mut self) -> Parse<Local> {
        let name = self.id()?;
        self.expect(Token::RelOp(RelOp::Eq))?;

        let negate = match self.peek() {
            Token::AddOp(ArithOp::Add) => {
                self.next()?;
                false
            }

            Token::AddOp(ArithOp::Sub) => {
                self.next()?;
                true
            }

            _ => false,
        };

        let value = match self.next()?.into_inner() {
            Token::Number(text) => self.number(&text)?,
            Token::Boolean(boolean) if !negate => Constant::Boolean(boolean),
            Token::Str(_) => return self.fail(ParserError::Unsupported("string constants")),
            Token::Id(_) => return self.fail(ParserError::Unsupported("identifier constants")),
            _ => return self.fail(ParserError::Syntax),
        };

        let value = match (negate, value) {
            (true, Constant::Integer(integer)) => Constant::Integer(integer.wrapping_neg()),
            (true, Constant::Real(real)) => Constant::Real(-real),
            (_, value) => value,
        };

        self.expect(Token::Semicolon)?;
        self.declare(self.scope, &name, Symbol::Variable(Variable::constant(value)))?;

        Ok(Local {
            name,
            ty: value.ty(),
            value: Some(value),
        })
    }

    fn variables(&mut self, locals: &mut Vec<Local>) -> Parse<()> {
        let mut names = vec![self.id()?];
        while self.accept(Token::Comma)? {
            names.push(self.id()?);
        }

        self.expect(Token::Colon)?;
        let ty = self.typ()?;
        self.expect(Token::Semicolon)?;

        for name in names {
            self.declare(self.scope, &name, Symbol::Variable(Variable::new(ty)))?;
            locals.push(Local {
                name,
                ty,
                value: None,
            });
        }

        Ok(())
    }

    fn function(&mut self) -> Parse<Function> {
        let (location, token) = self.next()?.split();
        let is_function = match token {
            Token::Keyword(Keyword::Function) => true,
            Token::Keyword(Keyword::Procedure) => false,
            _ => return self.fail(ParserError::Syntax),
        };

        let name = self.id()?;
        let parameters = self.parameters()?;

        let return_type = if is_function {
            self.expect(Token::Colon)?;
            self.typ()?
        } else {
            Type::Void
        };

        self.expect(Token::Semicolon)?;

        let parent = self.scope;
        let scope = self.scopes.child(parent, name.val().clone());

        for parameter in &parameters {
            let variable = if parameter.by_ref {
                Variable::reference(parameter.ty)
            } else {
                Variable::new(parameter.ty)
            };

            self.declare(scope, &parameter.name, Symbol::Variable(variable))?;
        }

        let signature = Signature {
            name: name.val().clone(),
            parameters: parameters.clone(),
            return_type,
            scope,
        };

        self.declare(parent, &name, Symbol::Function(Rc::new(signature)))?;
        self.declare(scope, &name, Symbol::Variable(Variable::new(return_type)))?;

        self.scope = scope;
        let (locals, nested) = self.declarations()?;
        let body = self.sequence()?;
        self.expect(Token::Semicolon)?;
        self.scope = parent;

        Ok(Function {
            name: name.into_inner(),
            location,
            parameters,
            return_type,
            scope,
            locals,
            nested,
            body,
        })
    }

    fn parameters(&mut self) -> Parse<Vec<Parameter>> {
        let mut parameters = Vec::new();
        if !self.accept(Token::OpenParen)? {
            return Ok(parameters);
        } else if self.accept(Token::CloseParen)? {
            return Ok(parameters);
        }

        loop {
            let by_ref = self.accept(Token::Keyword(Keyword::Var))?;

            let mut names = vec![self.id()?];
            while self.accept(Token::Comma)? {
                names.push(self.id()?);
            }

            self.expect(Token::Colon)?;
            let ty = self.typ()?;

            parameters.extend(names.into_iter().map(|name| Parameter { name, ty, by_ref }));

            if !self.accept(Token::Semicolon)? {
                self.expect(Token::CloseParen)?;
                break Ok(parameters);
            }
        }
    }

    fn typ(&mut self) -> Parse<Type> {
        match self.next()?.into_inner() {
            Token::TypeName(name) => Ok(Type::from(name)),

            Token::Keyword(
                keyword @ (Keyword::Array
                | Keyword::Record
                | Keyword::Set
                | Keyword::File
                | Keyword::Packed),
            ) => self.fail(ParserError::Unsupported(match keyword {
                Keyword::Array => "array types",
                Keyword::Record => "record types",
                Keyword::Set => "set types",
                Keyword::File => "file types",
                _ => "packed types",
            })),

            _ => self.fail(ParserError::Syntax),
        }
    }

    fn sequence(&mut self) -> Parse<Located<Statement>> {
        let location = self.current.location().clone();
        self.keyword(Keyword::Begin)?;

        let statements = self.statements()?;
        self.keyword(Keyword::End)?;

        Ok(Located::at(Statement::Sequence(statements), location))
    }

    fn statements(&mut self) -> Parse<Vec<Located<Statement>>> {
        let mut statements = vec![self.statement()?];
        while self.accept(Token::Semicolon)? {
            statements.push(self.statement()?);
        }

        Ok(statements)
    }

    fn statement(&mut self) -> Parse<Located<Statement>> {
        let location = self.current.location().clone();

        let statement = match self.peek() {
            Token::Keyword(Keyword::Begin) => return self.sequence(),
            Token::Keyword(Keyword::If) => self.if_statement()?,
            Token::Keyword(Keyword::While) => self.while_statement()?,
            Token::Keyword(Keyword::Repeat) => self.repeat_statement()?,
            Token::Keyword(Keyword::For) => self.for_statement()?,
            Token::Id(_) => self.assignment_or_call()?,

            Token::Semicolon
            | Token::Keyword(Keyword::End | Keyword::Until | Keyword::Else) => Statement::Empty,

            Token::Keyword(Keyword::Case) => {
                self.next()?;
                return self.fail(ParserError::Unsupported("case statements"));
            }

            Token::Keyword(Keyword::With) => {
                self.next()?;
                return self.fail(ParserError::Unsupported("with statements"));
            }

            Token::Keyword(Keyword::Goto) => {
                self.next()?;
                return self.fail(ParserError::Unsupported("goto statements"));
            }

            _ => {
                self.next()?;
                return self.fail(ParserError::Syntax);
            }
        };

        Ok(Located::at(statement, location))
    }

    fn if_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::If)?;
        let condition = self.expr()?;

        self.keyword(Keyword::Then)?;
        let then = Box::new(self.statement()?);

        let otherwise = if self.accept(Token::Keyword(Keyword::Else))? {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Statement::If {
            condition,
            then,
            otherwise,
        })
    }

    fn while_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::While)?;
        let condition = self.expr()?;

        self.keyword(Keyword::Do)?;
        let body = Box::new(self.statement()?);

        Ok(Statement::While { condition, body })
    }

    fn repeat_statement(&mut self) -> Parse<Statement> {
        let location = self.current.location().clone();
        self.keyword(Keyword::Repeat)?;

        let body = Statement::Sequence(self.statements()?);
        self.keyword(Keyword::Until)?;
        let condition = self.expr()?;

        Ok(Statement::Repeat {
            body: Box::new(Located::at(body, location)),
            condition,
        })
    }

    fn for_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::For)?;
        let variable = self.id()?;

        self.expect(Token::Assign)?;
        let from = self.expr()?;

        let direction = match self.next()?.into_inner() {
            Token::Keyword(Keyword::To) => Direction::Up,
            Token::Keyword(Keyword::Downto) => Direction::Down,
            _ => return self.fail(ParserError::Syntax),
        };

        let to = self.expr()?;
        self.keyword(Keyword::Do)?;
        let body = Box::new(self.statement()?);

        Ok(Statement::For {
            variable,
            from,
            to,
            direction,
            body,
        })
    }

    fn assignment_or_call(&mut self) -> Parse<Statement> {
        let name = self.id()?;

        if self.accept(Token::Assign)? {
            let value = self.expr()?;
            Ok(Statement::Assign {
                target: name,
                value,
            })
        } else {
            let args = self.arguments()?;
            Ok(Statement::ProcedureCall {
                procedure: name,
                args,
            })
        }
    }

    /// Lista de argumentos entre paréntesis, posiblemente ausente.
    fn arguments(&mut self) -> Parse<Vec<Located<Expr>>> {
        let mut args = Vec::new();
        if !self.accept(Token::OpenParen)? || self.accept(Token::CloseParen)? {
            return Ok(args);
        }

        loop {
            args.push(self.expr()?);
            if !self.accept(Token::Comma)? {
                self.expect(Token::CloseParen)?;
                break Ok(args);
            }
        }
    }

    fn expr(&mut self) -> Parse<Located<Expr>> {
        let left = self.simple_expr()?;

        let op = match self.peek() {
            Token::RelOp(op) => *op,
            _ => return Ok(left),
        };

        self.next()?;
        let right = self.simple_expr()?;

        let location = left.location().clone();
        let kind = ExprKind::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        };

        Ok(self.make(kind, location))
    }

    fn simple_expr(&mut self) -> Parse<Located<Expr>> {
        let negate = match self.peek() {
            Token::AddOp(ArithOp::Add) => {
                self.next()?;
                false
            }

            Token::AddOp(ArithOp::Sub) => {
                self.next()?;
                true
            }

            _ => false,
        };

        let mut left = self.term()?;
        while let Token::AddOp(op) = *self.peek() {
            self.next()?;
            let right = self.term()?;
            left = self.binary(left, op, right);
        }

        // El signo afecta a toda la expresión simple, no solo al primer término
        if negate {
            left = left.map(|expr| Expr {
                negated: true,
                ..expr
            });
        }

        Ok(left)
    }

    fn term(&mut self) -> Parse<Located<Expr>> {
        let mut left = self.factor()?;
        while let Token::MulOp(op) = *self.peek() {
            self.next()?;
            let right = self.factor()?;
            left = self.binary(left, op, right);
        }

        Ok(left)
    }

    fn factor(&mut self) -> Parse<Located<Expr>> {
        let (location, token) = self.next()?.split();

        let kind = match token {
            Token::Id(id) => {
                if let Token::OpenParen = self.peek() {
                    let args = self.arguments()?;
                    ExprKind::Call {
                        function: Located::at(id, location.clone()),
                        args,
                    }
                } else {
                    ExprKind::Id(id)
                }
            }

            Token::Number(text) => ExprKind::Literal(self.number(&text)?),
            Token::Boolean(boolean) => ExprKind::Literal(Constant::Boolean(boolean)),

            Token::Tilde => {
                let factor = self.factor()?;
                return Ok(factor.map(|expr| Expr {
                    negated: true,
                    ..expr
                }));
            }

            Token::OpenParen => {
                let inner = self.expr()?;
                self.expect(Token::CloseParen)?;
                return Ok(inner);
            }

            Token::Str(_) => return self.fail(ParserError::Unsupported("string literals")),
            Token::Keyword(Keyword::Nil) => return self.fail(ParserError::Unsupported("nil")),
            _ => return self.fail(ParserError::Syntax),
        };

        Ok(self.make(kind, location))
    }

    fn binary(&mut self, left: Located<Expr>, op: ArithOp, right: Located<Expr>) -> Located<Expr> {
        let location = left.location().clone();
        let kind = ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        };

        self.make(kind, location)
    }

    /// Numera una nueva expresión.
    fn make(&mut self, kind: ExprKind, location: Location) -> Located<Expr> {
        let id = ExprId(self.expressions);
        self.expressions += 1;

        let expr = Expr {
            id,
            kind,
            negated: false,
        };

        Located::at(expr, location)
    }

    fn number(&self, text: &str) -> Parse<Constant> {
        match number(text) {
            Some(constant) => Ok(constant),
            None => self.fail(ParserError::Syntax),
        }
    }

    fn declare(&mut self, scope: ScopeId, name: &Located<Identifier>, symbol: Symbol) -> Parse<()> {
        if self.scopes.add(scope, name.val().clone(), symbol) {
            Ok(())
        } else {
            let error = ParserError::Redeclaration(name.val().clone());
            Err(Located::at(error, name.location().clone()))
        }
    }

    fn id(&mut self) -> Parse<Located<Identifier>> {
        let (location, token) = self.next()?.split();
        match token {
            Token::Id(id) => Ok(Located::at(id, location)),
            _ => self.fail(ParserError::Syntax),
        }
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(Token::Keyword(keyword))
    }

    fn expect(&mut self, token: Token) -> Parse<()> {
        match self.next()?.into_inner() {
            found if found == token => Ok(()),
            _ => self.fail(ParserError::Syntax),
        }
    }

    /// Consume el siguiente token solo si es `token`.
    fn accept(&mut self, token: Token) -> Parse<bool> {
        if *self.peek() == token {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn peek(&self) -> &Token {
        self.current.val()
    }

    fn next(&mut self) -> Parse<Located<Token>> {
        let following = match self.lexer.next() {
            Some(Ok(token)) => token,
            Some(Err(error)) => return Err(error.map(ParserError::Lexer)),
            None => Located::at(Token::Eof, self.current.location().clone()),
        };

        let token = std::mem::replace(&mut self.current, following);
        self.last_known = token.location().clone();

        Ok(token)
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Located::at(error, self.last_known.clone()))
    }
}

/// Construye una constante a partir del texto de un literal numérico.
///
/// Los dígitos se acumulan uno a la vez. Los reales juntan todos los dígitos
/// de la mantisa en un único valor y luego aplican de una vez el exponente
/// decimal neto. Retorna `None` si un literal entero no cabe en 32 bits.
fn number(text: &str) -> Option<Constant> {
    fn digits(text: &str) -> Option<i32> {
        text.bytes().try_fold(0i32, |accumulated, digit| {
            accumulated
                .checked_mul(10)?
                .checked_add(i32::from(digit - b'0'))
        })
    }

    if !text.contains(|c| c == '.' || c == 'E') {
        return digits(text).map(Constant::Integer);
    }

    let (mantissa, exponent) = match text.split_once('E') {
        Some((mantissa, exponent)) => (mantissa, Some(exponent)),
        None => (text, None),
    };

    let mut value = 0.0f64;
    let mut scale = 0i32;
    let mut fraction = false;

    for c in mantissa.chars() {
        match c.to_digit(10) {
            Some(digit) => {
                value = value * 10.0 + f64::from(digit);
                if fraction {
                    scale -= 1;
                }
            }

            None => fraction = true,
        }
    }

    if let Some(exponent) = exponent {
        let exponent = match exponent.strip_prefix('-') {
            Some(magnitude) => -digits(magnitude)?,
            None => digits(exponent.trim_start_matches('+'))?,
        };

        scale = scale.checked_add(exponent)?;
    }

    let value = if scale < 0 {
        value / 10f64.powi(-scale)
    } else {
        value * 10f64.powi(scale)
    };

    Some(Constant::Real(value))
}

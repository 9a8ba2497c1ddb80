//! Revisión estática.
//!
//! Resuelve el tipo de cada expresión de un [`Program`] y revisa cada
//! sentencia contra las declaraciones visibles desde ella. Los tipos se
//! guardan en una tabla lateral indexada por [`ExprId`], cada entrada se
//! calcula a lo sumo una vez. La generación de código lee la tabla en vez de inferir de nuevo.

use thiserror::Error;

use crate::{
    ast::{ArithOp, Expr, ExprId, ExprKind, Function, Program, RelOp, Statement, Type},
    backend::BackendError,
    lex::Identifier,
    scope::{ScopeId, Scopes, Signature, Variable},
    source::Located,
};

pub type Semantic<T> = Result<T, Located<SemanticError>>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("Undeclared identifier `{0}`")]
    UndeclaredIdentifier(Identifier),

    #[error("Undeclared function `{0}`")]
    UndeclaredFunction(Identifier),

    #[error("Type mismatch: expected `{expected}`, found `{found}`")]
    TypeMismatch { expected: Type, found: Type },

    #[error("Invalid operand of type `{ty}` for `{op}`")]
    InvalidOperandType { op: String, ty: Type },

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    #[error("Function `{function}` takes {expected} argument(s), {found} were given")]
    ArityMismatch {
        function: Identifier,
        expected: usize,
        found: usize,
    },

    #[error("Parameter `{0}` is passed by reference and requires a variable")]
    IllegalReferenceArgument(Identifier),

    #[error("Cannot convert `{from}` to `{to}`")]
    IllegalCast { from: Type, to: Type },

    #[error("Loop variable must be an integer, found `{0}`")]
    InvalidLoopVariableType(Type),

    #[error("Cannot assign to constant `{0}`")]
    AssignToConstant(Identifier),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Tipo de una expresión.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub ty: Type,

    /// La expresión nombra un parámetro por referencia.
    pub is_ref: bool,
}

impl Resolved {
    fn value(ty: Type) -> Self {
        Resolved { ty, is_ref: false }
    }
}

/// Tipos resueltos de todas las expresiones de un programa.
#[derive(Debug)]
pub struct Types(Vec<Option<Resolved>>);

impl Types {
    pub fn get(&self, id: ExprId) -> Option<Resolved> {
        self.0.get(id.index()).copied().flatten()
    }
}

/// Revisa un programa completo.
pub fn check(program: &Program) -> Semantic<Types> {
    let mut checker = Checker {
        scopes: &program.scopes,
        types: vec![None; program.expressions],
    };

    checker.function(&program.root)?;
    Ok(Types(checker.types))
}

/// Si existe una conversión implícita entre dos tipos.
pub fn castable(from: Type, to: Type) -> bool {
    from != Type::Void && to != Type::Void
}

struct Checker<'a> {
    scopes: &'a Scopes,
    types: Vec<Option<Resolved>>,
}

impl<'a> Checker<'a> {
    fn function(&mut self, function: &Function) -> Semantic<()> {
        self.statement(function.scope, &function.body)?;
        for nested in &function.nested {
            self.function(nested)?;
        }

        Ok(())
    }

    fn statement(&mut self, scope: ScopeId, statement: &Located<Statement>) -> Semantic<()> {
        match statement.val() {
            Statement::Sequence(statements) => {
                for statement in statements {
                    self.statement(scope, statement)?;
                }
            }

            Statement::Assign { target, value } => {
                let variable = self.variable(scope, target)?;
                if variable.is_const() {
                    let error = SemanticError::AssignToConstant(target.val().clone());
                    return Err(Located::at(error, target.location().clone()));
                }

                self.convertible(scope, value, variable.ty)?;
            }

            Statement::ProcedureCall { procedure, args } => {
                self.call(scope, procedure, args)?;
            }

            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                self.convertible(scope, condition, Type::Boolean)?;
                self.statement(scope, then)?;
                if let Some(otherwise) = otherwise {
                    self.statement(scope, otherwise)?;
                }
            }

            Statement::While { condition, body } | Statement::Repeat { body, condition } => {
                self.convertible(scope, condition, Type::Boolean)?;
                self.statement(scope, body)?;
            }

            Statement::For {
                variable,
                from,
                to,
                body,
                ..
            } => {
                let found = self.variable(scope, variable)?;
                if found.ty != Type::Integer {
                    let error = SemanticError::InvalidLoopVariableType(found.ty);
                    return Err(Located::at(error, variable.location().clone()));
                } else if found.is_const() {
                    let error = SemanticError::AssignToConstant(variable.val().clone());
                    return Err(Located::at(error, variable.location().clone()));
                }

                self.convertible(scope, from, Type::Integer)?;
                self.convertible(scope, to, Type::Integer)?;
                self.statement(scope, body)?;
            }

            Statement::Empty => (),
        }

        Ok(())
    }

    fn variable(&self, scope: ScopeId, name: &Located<Identifier>) -> Semantic<&'a Variable> {
        let scopes: &'a Scopes = self.scopes;
        match scopes.lookup::<Variable>(scope, name.val()) {
            Some((_, variable)) => Ok(variable),
            None => {
                let error = SemanticError::UndeclaredIdentifier(name.val().clone());
                Err(Located::at(error, name.location().clone()))
            }
        }
    }

    /// Infiere `expr` y revisa que pueda convertirse implícitamente a `to`.
    fn convertible(&mut self, scope: ScopeId, expr: &Located<Expr>, to: Type) -> Semantic<()> {
        let from = self.infer(scope, expr)?.ty;
        if castable(from, to) {
            Ok(())
        } else {
            let error = SemanticError::IllegalCast { from, to };
            Err(Located::at(error, expr.location().clone()))
        }
    }

    fn call(
        &mut self,
        scope: ScopeId,
        name: &Located<Identifier>,
        args: &[Located<Expr>],
    ) -> Semantic<Type> {
        let scopes: &'a Scopes = self.scopes;
        let signature = match scopes.lookup::<Signature>(scope, name.val()) {
            Some((_, signature)) => signature,
            None => {
                let error = SemanticError::UndeclaredFunction(name.val().clone());
                return Err(Located::at(error, name.location().clone()));
            }
        };

        if args.len() != signature.parameters.len() {
            let error = SemanticError::ArityMismatch {
                function: name.val().clone(),
                expected: signature.parameters.len(),
                found: args.len(),
            };

            return Err(Located::at(error, name.location().clone()));
        }

        for (arg, parameter) in args.iter().zip(&signature.parameters) {
            if !parameter.by_ref {
                self.convertible(scope, arg, parameter.ty)?;
                continue;
            }

            let illegal = || {
                let error = SemanticError::IllegalReferenceArgument(parameter.name.val().clone());
                Located::at(error, arg.location().clone())
            };

            let target = match &arg.val().kind {
                ExprKind::Id(id) if !arg.val().negated => id,
                _ => return Err(illegal()),
            };

            let variable = match scopes.lookup::<Variable>(scope, target) {
                Some((_, variable)) => variable,
                None => {
                    let error = SemanticError::UndeclaredIdentifier(target.clone());
                    return Err(Located::at(error, arg.location().clone()));
                }
            };

            if variable.is_const() {
                return Err(illegal());
            }

            // Una referencia nunca es destino de una conversión implícita
            let found = self.infer(scope, arg)?.ty;
            if found != parameter.ty {
                let error = SemanticError::IllegalCast {
                    from: found,
                    to: parameter.ty,
                };

                return Err(Located::at(error, arg.location().clone()));
            }
        }

        Ok(signature.return_type)
    }

    fn infer(&mut self, scope: ScopeId, expr: &Located<Expr>) -> Semantic<Resolved> {
        let id = expr.val().id;
        if let Some(resolved) = self.types[id.index()] {
            return Ok(resolved);
        }

        let fail = |error: SemanticError| -> Semantic<Resolved> {
            Err(Located::at(error, expr.location().clone()))
        };

        let resolved = match &expr.val().kind {
            ExprKind::Id(name) => match self.scopes.lookup::<Variable>(scope, name) {
                Some((_, variable)) => Resolved {
                    ty: variable.ty,
                    is_ref: variable.is_ref(),
                },

                None => return fail(SemanticError::UndeclaredIdentifier(name.clone())),
            },

            ExprKind::Literal(constant) => Resolved::value(constant.ty()),

            ExprKind::Binary { left, op, right } => {
                let left = self.infer(scope, left)?.ty;
                let right = self.infer(scope, right)?.ty;

                let invalid = [left, right].into_iter().find(|&ty| {
                    ty == Type::Void || (op.is_integral() && ty != Type::Integer)
                });

                if let Some(ty) = invalid {
                    let op = op.to_string();
                    return fail(SemanticError::InvalidOperandType { op, ty });
                }

                match op {
                    ArithOp::Div => Resolved::value(Type::Real),
                    _ => Resolved::value(left.best(right)),
                }
            }

            ExprKind::Compare { left, op, right } => {
                if let RelOp::In = op {
                    return fail(SemanticError::UnsupportedFeature("set membership"));
                }

                let left = self.infer(scope, left)?.ty;
                let right = self.infer(scope, right)?.ty;

                if let Some(ty) = [left, right].into_iter().find(|&ty| ty == Type::Void) {
                    let op = op.to_string();
                    return fail(SemanticError::InvalidOperandType { op, ty });
                }

                Resolved::value(Type::Boolean)
            }

            ExprKind::Call { function, args } => {
                Resolved::value(self.call(scope, function, args)?)
            }
        };

        self.types[id.index()] = Some(resolved);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, parse, source};

    fn program(text: &str) -> Program {
        let (start, stream) = source::consume(text.as_bytes(), "<test>");
        parse::parse(Lexer::new(start, stream)).unwrap()
    }

    fn check_str(text: &str) -> Semantic<Types> {
        check(&program(text))
    }

    fn error(text: &str) -> SemanticError {
        check_str(text).unwrap_err().into_inner()
    }

    /// Tipo de la única expresión asignada por la primera sentencia.
    fn assigned(text: &str) -> Type {
        let program = program(text);
        let types = check(&program).unwrap();

        let statements = match program.root.body.val() {
            Statement::Sequence(statements) => statements,
            _ => panic!("root body is not a sequence"),
        };

        match statements[0].val() {
            Statement::Assign { value, .. } => types.get(value.val().id).unwrap().ty,
            _ => panic!("expected an assignment"),
        }
    }

    const DECLS: &str = "var i, j: integer; r: real; b: Boolean; c: char;";

    fn with_decls(statement: &str) -> String {
        format!("{} begin {} end.", DECLS, statement)
    }

    #[test]
    fn mixed_arithmetic_promotes_to_real() {
        assert_eq!(assigned(&with_decls("r := i + r")), Type::Real);
        assert_eq!(assigned(&with_decls("r := r * 2")), Type::Real);
        assert_eq!(assigned(&with_decls("i := i - j")), Type::Integer);
        assert_eq!(assigned(&with_decls("i := c + i")), Type::Integer);
        assert_eq!(assigned(&with_decls("c := c + b")), Type::Char);
    }

    #[test]
    fn real_division_is_always_real() {
        assert_eq!(assigned("const c = 5; var r: real; begin r := c / 2 end."), Type::Real);
    }

    #[test]
    fn integral_operators_require_integers() {
        assert_eq!(assigned(&with_decls("i := i div j")), Type::Integer);
        assert_eq!(assigned(&with_decls("i := i mod 3")), Type::Integer);
        assert_eq!(assigned(&with_decls("i := i and j")), Type::Integer);
        assert_eq!(assigned(&with_decls("i := i or 1")), Type::Integer);

        for statement in ["i := r div 2", "i := 2 mod r", "i := i and r", "i := r or i", "i := b or i"] {
            assert!(
                matches!(error(&with_decls(statement)), SemanticError::InvalidOperandType { .. }),
                "accepted: {}",
                statement
            );
        }
    }

    #[test]
    fn comparisons_are_boolean() {
        assert_eq!(assigned(&with_decls("b := i < r")), Type::Boolean);
        assert!(matches!(
            error(&with_decls("b := i in j")),
            SemanticError::UnsupportedFeature(_)
        ));
    }

    #[test]
    fn negation_keeps_the_type() {
        assert_eq!(assigned(&with_decls("r := -r")), Type::Real);
        assert_eq!(assigned(&with_decls("i := ~i")), Type::Integer);
    }

    #[test]
    fn void_operands_are_rejected() {
        let text = "var i: integer; procedure p; begin end; begin i := p(1) + 1 end.";
        assert!(matches!(error(text), SemanticError::ArityMismatch { .. }));

        let text = "var i: integer; procedure p; begin end; begin i := p() + 1 end.";
        assert!(matches!(
            error(text),
            SemanticError::InvalidOperandType { ty: Type::Void, .. }
        ));

        let text = "var i: integer; procedure p; begin end; begin i := p() end.";
        assert!(matches!(error(text), SemanticError::IllegalCast { .. }));
    }

    #[test]
    fn undeclared_names_are_reported() {
        assert!(matches!(
            error("var x: integer; begin x := foo(1) end."),
            SemanticError::UndeclaredFunction(_)
        ));

        assert!(matches!(
            error("begin foo(1) end."),
            SemanticError::UndeclaredFunction(_)
        ));

        assert!(matches!(
            error("var x: integer; begin x := y end."),
            SemanticError::UndeclaredIdentifier(_)
        ));
    }

    #[test]
    fn calls_are_checked_against_signatures() {
        let decls = "var x: integer; r: real;
                     procedure swap(var a, b: integer); begin end;";

        let run = |body: &str| error(&format!("{} begin {} end.", decls, body));

        assert!(matches!(
            run("swap(x)"),
            SemanticError::ArityMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));

        assert!(matches!(run("swap(x, 1)"), SemanticError::IllegalReferenceArgument(_)));
        assert!(matches!(run("swap(x, x + 1)"), SemanticError::IllegalReferenceArgument(_)));
        assert!(matches!(run("swap(x, -x)"), SemanticError::IllegalReferenceArgument(_)));
        assert!(matches!(
            run("swap(x, r)"),
            SemanticError::IllegalCast {
                from: Type::Real,
                to: Type::Integer
            }
        ));
        assert!(check_str(&format!("{} begin swap(x, x) end.", decls)).is_ok());
    }

    #[test]
    fn statements_are_checked() {
        assert!(matches!(
            error("var r: real; begin for r := 1 to 2 do end."),
            SemanticError::InvalidLoopVariableType(Type::Real)
        ));

        assert!(matches!(
            error("const k = 1; begin k := 2 end."),
            SemanticError::AssignToConstant(_)
        ));
    }

    #[test]
    fn enclosing_locals_are_invisible() {
        let text = "function outer: integer;
                    var v: integer;
                    function inner: integer;
                    begin inner := v end;
                    begin outer := inner() end;
                    begin end.";

        assert!(matches!(error(text), SemanticError::UndeclaredIdentifier(_)));

        let text = "var g: integer;
                    function outer: integer;
                    const k = 2;
                    function inner: integer;
                    begin inner := g + k end;
                    begin outer := inner() end;
                    begin end.";

        assert!(check_str(text).is_ok());
    }

    #[test]
    fn recursion_resolves_through_the_parent() {
        let text = "function fact(n: integer): integer;
                    begin
                      if n <= 1 then fact := 1 else fact := n * fact(n - 1)
                    end;
                    begin end.";

        assert!(check_str(text).is_ok());
    }

    #[test]
    fn every_expression_is_typed() {
        let program = program(&with_decls("if i < 2 then r := (i + 1) * r; b := ~b"));
        let types = check(&program).unwrap();

        for id in 0..program.expressions {
            assert!(types.get(ExprId(id)).is_some(), "untyped expression {}", id);
        }
    }
}

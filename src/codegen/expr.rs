use super::{machine_type, Context};
use crate::{
    ast::{ArithOp, Constant, Expr, ExprKind, Program, RelOp, Type},
    backend::{Backend, IntOp, Predicate, RealOp, Ty},
    lex::Identifier,
    scope::Signature,
    semantic::{Semantic, SemanticError},
    source::{Located, Location},
};

impl<'a, B: Backend> Context<'a, B> {
    /// Traduce una expresión y convierte su valor a `to`.
    pub(super) fn expr_as(&mut self, expr: &Located<Expr>, to: Type) -> Semantic<B::Value> {
        let (value, from) = self.expr(expr)?;
        self.cast(value, from, to, expr.location())
    }

    /// Traduce una llamada, produciendo su resultado salvo que sea un procedimiento.
    pub(super) fn call(
        &mut self,
        name: &Located<Identifier>,
        args: &[Located<Expr>],
    ) -> Semantic<Option<B::Value>> {
        let program: &'a Program = self.program;
        let found = program
            .scopes
            .lookup::<Signature>(self.scope, name.val())
            .and_then(|(_, signature)| {
                let handle = self.functions.get(&signature.scope)?;
                Some((signature, *handle))
            });

        let (signature, handle) = match found {
            Some(found) => found,
            None => {
                let error = SemanticError::UndeclaredFunction(name.val().clone());
                return Err(Located::at(error, name.location().clone()));
            }
        };

        if signature.parameters.len() != args.len() {
            let error = SemanticError::ArityMismatch {
                function: name.val().clone(),
                expected: signature.parameters.len(),
                found: args.len(),
            };

            return Err(Located::at(error, name.location().clone()));
        }

        let mut values = Vec::with_capacity(args.len());
        for (arg, parameter) in args.iter().zip(&signature.parameters) {
            if !parameter.by_ref {
                values.push(self.expr_as(arg, parameter.ty)?);
                continue;
            }

            let illegal = || {
                let error = SemanticError::IllegalReferenceArgument(parameter.name.val().clone());
                Located::at(error, arg.location().clone())
            };

            let target = match &arg.val().kind {
                ExprKind::Id(id) if !arg.val().negated => {
                    Located::at(id.clone(), arg.location().clone())
                }

                _ => return Err(illegal()),
            };

            let (variable, address) = self.place(&target)?;
            if variable.is_const() {
                return Err(illegal());
            } else if variable.ty != parameter.ty {
                let error = SemanticError::IllegalCast {
                    from: variable.ty,
                    to: parameter.ty,
                };

                return Err(Located::at(error, arg.location().clone()));
            }

            values.push(address);
        }

        Ok(self.backend.call(handle, &values))
    }

    fn expr(&mut self, expr: &Located<Expr>) -> Semantic<(B::Value, Type)> {
        let ty = self.type_of(expr)?;
        let fail = |error: SemanticError| Err(Located::at(error, expr.location().clone()));

        let value = match &expr.val().kind {
            ExprKind::Literal(Constant::Integer(integer)) => self.backend.const_int(Ty::I32, *integer),
            ExprKind::Literal(Constant::Real(real)) => self.backend.const_real(*real),
            ExprKind::Literal(Constant::Boolean(boolean)) => self.backend.const_bool(*boolean),

            ExprKind::Id(name) => {
                let name = Located::at(name.clone(), expr.location().clone());
                let (variable, address) = self.place(&name)?;

                match machine_type(variable.ty) {
                    Some(machine) => self.backend.load(machine, address),
                    None => {
                        let op = String::from("load");
                        return fail(SemanticError::InvalidOperandType { op, ty: variable.ty });
                    }
                }
            }

            ExprKind::Binary { left, op, right } => {
                let lhs = self.expr_as(left, ty)?;
                let rhs = self.expr_as(right, ty)?;

                match (ty, real_op(*op), int_op(*op)) {
                    (Type::Real, Some(op), _) => self.backend.real_binary(op, lhs, rhs),
                    (ty, _, Some(op)) if ty != Type::Real && ty != Type::Void => {
                        self.backend.int_binary(op, lhs, rhs)
                    }

                    (ty, _, _) => {
                        let op = op.to_string();
                        return fail(SemanticError::InvalidOperandType { op, ty });
                    }
                }
            }

            ExprKind::Compare { left, op, right } => {
                let predicate = match predicate(*op) {
                    Some(predicate) => predicate,
                    None => return fail(SemanticError::UnsupportedFeature("set membership")),
                };

                let best = self.type_of(left)?.best(self.type_of(right)?);
                let lhs = self.expr_as(left, best)?;
                let rhs = self.expr_as(right, best)?;

                match best {
                    Type::Real => self.backend.real_compare(predicate, lhs, rhs),
                    Type::Boolean => self.backend.int_compare(predicate, lhs, rhs, false),
                    _ => self.backend.int_compare(predicate, lhs, rhs, true),
                }
            }

            ExprKind::Call { function, args } => match self.call(function, args)? {
                Some(value) => value,
                None => {
                    let op = function.val().to_string();
                    return fail(SemanticError::InvalidOperandType { op, ty: Type::Void });
                }
            },
        };

        let value = if expr.val().negated {
            let zero = match ty {
                Type::Real => self.backend.const_real(0.0),
                Type::Boolean => self.backend.const_bool(false),
                Type::Char => self.backend.const_int(Ty::I8, 0),
                _ => self.backend.const_int(Ty::I32, 0),
            };

            match ty {
                Type::Real => self.backend.real_binary(RealOp::Sub, zero, value),
                _ => self.backend.int_binary(IntOp::Sub, zero, value),
            }
        } else {
            value
        };

        Ok((value, ty))
    }

    /// Conversión implícita.
    fn cast(
        &mut self,
        value: B::Value,
        from: Type,
        to: Type,
        location: &Location,
    ) -> Semantic<B::Value> {
        if from == to {
            return Ok(value);
        }

        let (from_ty, to_ty) = match (machine_type(from), machine_type(to)) {
            (Some(from_ty), Some(to_ty)) => (from_ty, to_ty),
            _ => {
                let error = SemanticError::IllegalCast { from, to };
                return Err(Located::at(error, location.clone()));
            }
        };

        let value = match (from, to) {
            (Type::Real, Type::Boolean) => self.backend.is_nonzero(value, from_ty),
            (Type::Real, _) => self.backend.real_to_int(value, to_ty),
            (Type::Boolean, Type::Real) => self.backend.int_to_real(value, false),
            (_, Type::Real) => self.backend.int_to_real(value, true),
            (_, Type::Boolean) => self.backend.is_nonzero(value, from_ty),
            (Type::Boolean, _) => self.backend.int_cast(value, to_ty, false),
            _ => self.backend.int_cast(value, to_ty, true),
        };

        Ok(value)
    }

    fn type_of(&self, expr: &Located<Expr>) -> Semantic<Type> {
        match self.types.get(expr.val().id) {
            Some(resolved) => Ok(resolved.ty),
            None => {
                let error = SemanticError::UnsupportedFeature("untyped expression");
                Err(Located::at(error, expr.location().clone()))
            }
        }
    }
}

fn real_op(op: ArithOp) -> Option<RealOp> {
    match op {
        ArithOp::Add => Some(RealOp::Add),
        ArithOp::Sub => Some(RealOp::Sub),
        ArithOp::Mul => Some(RealOp::Mul),
        ArithOp::Div => Some(RealOp::Div),
        ArithOp::IntDiv | ArithOp::Mod | ArithOp::And | ArithOp::Or => None,
    }
}

fn int_op(op: ArithOp) -> Option<IntOp> {
    match op {
        ArithOp::Add => Some(IntOp::Add),
        ArithOp::Sub => Some(IntOp::Sub),
        ArithOp::Mul => Some(IntOp::Mul),
        ArithOp::IntDiv => Some(IntOp::SDiv),
        ArithOp::Mod => Some(IntOp::SRem),
        ArithOp::And => Some(IntOp::And),
        ArithOp::Or => Some(IntOp::Or),
        ArithOp::Div => None,
    }
}

fn predicate(op: RelOp) -> Option<Predicate> {
    match op {
        RelOp::Eq => Some(Predicate::Eq),
        RelOp::Ne => Some(Predicate::Ne),
        RelOp::Lt => Some(Predicate::Lt),
        RelOp::Le => Some(Predicate::Le),
        RelOp::Gt => Some(Predicate::Gt),
        RelOp::Ge => Some(Predicate::Ge),
        RelOp::In => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        backend::{IntOp, Predicate},
        codegen::{generate, ENTRY_POINT},
        ir::{self, Builder, Instruction, Operand},
        lex::Lexer,
        parse, source,
    };

    /// Instrucciones del bloque de entrada de la raíz.
    fn entry(text: &str) -> Vec<Instruction> {
        let (start, stream) = source::consume(text.as_bytes(), "<test>");
        let program = parse::parse(Lexer::new(start, stream)).unwrap();
        let module: ir::Module = generate(&program, Builder::new()).unwrap();

        let root = module.function(ENTRY_POINT).unwrap();
        module[root].blocks[0].instructions.clone()
    }

    #[test]
    fn integer_division_is_signed() {
        let code = entry("var i: integer; begin i := i div 2 end.");
        assert!(code
            .iter()
            .any(|instruction| matches!(instruction, Instruction::Int { op: IntOp::SDiv, .. })));
    }

    #[test]
    fn mixed_operands_are_widened_to_real() {
        let code = entry("var i: integer; r: real; begin r := i + r end.");
        assert!(code
            .iter()
            .any(|instruction| matches!(instruction, Instruction::IntToReal { signed: true, .. })));

        assert!(code.iter().any(|instruction| matches!(instruction, Instruction::Real { .. })));
    }

    #[test]
    fn boolean_comparisons_are_unsigned() {
        let code = entry("var a, b, c: Boolean; begin c := a < b end.");
        assert!(code.iter().any(|instruction| matches!(
            instruction,
            Instruction::IntCompare {
                predicate: Predicate::Lt,
                signed: false,
                ..
            }
        )));
    }

    #[test]
    fn numbers_become_booleans_through_a_zero_test() {
        let code = entry("var b: Boolean; r: real; begin b := r end.");
        assert!(code
            .iter()
            .any(|instruction| matches!(instruction, Instruction::IsNonZero { .. })));
    }

    #[test]
    fn negation_subtracts_from_zero() {
        let code = entry("var i: integer; begin i := -i end.");
        assert!(code.iter().any(|instruction| matches!(
            instruction,
            Instruction::Int {
                op: IntOp::Sub,
                lhs: Operand::Const(ir::Immediate::I32(0)),
                ..
            }
        )));
    }

    #[test]
    fn references_pass_addresses() {
        let code = entry(
            "var x: integer;
             procedure inc(var n: integer); begin n := n + 1 end;
             begin inc(x) end.",
        );

        let call = code
            .iter()
            .find_map(|instruction| match instruction {
                Instruction::Call { args, .. } => Some(args.clone()),
                _ => None,
            })
            .unwrap();

        assert_eq!(call, [Operand::Global(ir::GlobalId(0))]);
    }
}

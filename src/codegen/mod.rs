//! Traducción hacia un [`Backend`].
//!
//! La generación corre después de [`semantic::check`] y lee los tipos resueltos
//! de su tabla. Cada función se genera en dos fases: primero se declaran los
//! encabezados de todas las funciones anidadas directamente en ella, luego se
//! traduce su cuerpo, y después se genera cada función anidada en orden. Así
//! toda función puede llamarse desde cualquier lugar donde su nombre sea
//! visible, sin importar el orden de declaración.
//!
//! El almacenamiento se asigna una vez por símbolo. Locales y constantes del
//! scope raíz, así como las constantes de cualquier scope, viven en slots
//! globales. Todo lo demás vive en el stack frame de su función. Los valores
//! nunca cruzan bloques, lo que deba sobrevivir a un salto se recarga desde
//! su slot.

use std::collections::HashMap;

use crate::{
    ast::{self, Direction, Program, Statement, Type},
    backend::{Backend, IntOp, ParamType, Predicate, Ty},
    lex::Identifier,
    scope::{ScopeId, Variable},
    semantic::{self, Semantic, SemanticError, Types},
    source::{Located, Location},
};

mod expr;

/// Nombre del módulo para programas sin encabezado `program`.
pub const DEFAULT_NAME: &str = "main";

/// Nombre de la función raíz dentro del módulo.
///
/// Ningún identificador puede ser vacío, por lo que este nombre nunca
/// colisiona con una función del programa.
pub const ENTRY_POINT: &str = "";

/// Revisa y traduce un programa completo.
///
/// Cualquier error aborta la generación, nunca se produce un módulo parcial.
pub fn generate<B: Backend>(program: &Program, mut backend: B) -> Semantic<B::Module> {
    let types = semantic::check(program)?;

    let name = program.name.as_ref().map_or(DEFAULT_NAME, |name| name.as_ref());
    backend.create_module(name);

    let root = declare(&mut backend, &program.root, ENTRY_POINT)?;
    let mut context = Context {
        program,
        types: &types,
        backend,
        storage: HashMap::new(),
        functions: HashMap::new(),
        scope: program.scopes.root(),
        function: root,
    };

    context.function(&program.root, root)?;
    Ok(context.backend.finish())
}

/// Tipo de máquina de un tipo de valor, nada para [`Type::Void`].
pub fn machine_type(ty: Type) -> Option<Ty> {
    match ty {
        Type::Real => Some(Ty::F64),
        Type::Integer => Some(Ty::I32),
        Type::Char => Some(Ty::I8),
        Type::Boolean => Some(Ty::Bool),
        Type::Void => None,
    }
}

fn declare<B: Backend>(
    backend: &mut B,
    function: &ast::Function,
    name: &str,
) -> Semantic<B::Function> {
    let parameters = function
        .parameters
        .iter()
        .map(|parameter| {
            let ty = storage_type(parameter.ty, parameter.name.location())?;
            Ok(ParamType {
                ty,
                by_ref: parameter.by_ref,
            })
        })
        .collect::<Semantic<Vec<_>>>()?;

    backend
        .declare_function(name, &parameters, machine_type(function.return_type))
        .map_err(|error| Located::at(error.into(), function.location.clone()))
}

fn storage_type(ty: Type, location: &Location) -> Semantic<Ty> {
    machine_type(ty).ok_or_else(|| {
        let error = SemanticError::InvalidOperandType {
            op: String::from("storage"),
            ty,
        };

        Located::at(error, location.clone())
    })
}

struct Context<'a, B: Backend> {
    program: &'a Program,
    types: &'a Types,
    backend: B,

    /// Slot de cada símbolo asignado hasta el momento.
    storage: HashMap<(ScopeId, Identifier), B::Value>,

    /// Funciones declaradas, por su propio scope.
    functions: HashMap<ScopeId, B::Function>,

    /// Scope de la función en traducción.
    scope: ScopeId,
    function: B::Function,
}

impl<'a, B: Backend> Context<'a, B> {
    fn function(&mut self, function: &ast::Function, handle: B::Function) -> Semantic<()> {
        let mut nested = Vec::with_capacity(function.nested.len());
        for inner in &function.nested {
            let inner_handle = declare(&mut self.backend, inner, inner.name.as_ref())?;
            self.functions.insert(inner.scope, inner_handle);
            nested.push((inner, inner_handle));
        }

        self.body(function, handle)?;
        for (inner, inner_handle) in nested {
            self.function(inner, inner_handle)?;
        }

        Ok(())
    }

    fn body(&mut self, function: &ast::Function, handle: B::Function) -> Semantic<()> {
        self.scope = function.scope;
        self.function = handle;

        let entry = self.backend.create_block(handle, "entry");
        self.backend.set_insertion_point(entry);

        for (index, parameter) in function.parameters.iter().enumerate() {
            let ty = ParamType {
                ty: storage_type(parameter.ty, parameter.name.location())?,
                by_ref: parameter.by_ref,
            };

            let slot = self
                .backend
                .create_stack_slot(ty.passed(), parameter.name.val().as_ref());

            let incoming = self.backend.param_value(handle, index);
            self.backend.store(incoming, slot);
            self.storage
                .insert((function.scope, parameter.name.val().clone()), slot);
        }

        let scopes = &self.program.scopes;
        let is_root = scopes.is_root(function.scope);

        for local in &function.locals {
            let ty = storage_type(local.ty, local.name.location())?;
            let name = local.name.val();

            let slot = if is_root {
                self.backend
                    .create_global_slot(name.as_ref(), ty, local.value, local.value.is_some())
            } else if local.value.is_some() {
                let qualified = format!("{}.{}", scopes.qualified_name(function.scope), name);
                self.backend.create_global_slot(&qualified, ty, local.value, true)
            } else {
                self.backend.create_stack_slot(ty, name.as_ref())
            };

            self.storage.insert((function.scope, name.clone()), slot);
        }

        let result = match machine_type(function.return_type) {
            Some(ty) => {
                let slot = self.backend.create_stack_slot(ty, function.name.as_ref());
                self.storage
                    .insert((function.scope, function.name.clone()), slot);

                Some((ty, slot))
            }

            None => None,
        };

        self.statement(&function.body)?;

        let value = result.map(|(ty, slot)| self.backend.load(ty, slot));
        self.backend.ret(value);

        self.backend
            .verify_function(handle)
            .map_err(|error| Located::at(error.into(), function.location.clone()))
    }

    fn statement(&mut self, statement: &Located<Statement>) -> Semantic<()> {
        match statement.val() {
            Statement::Sequence(statements) => {
                for statement in statements {
                    self.statement(statement)?;
                }
            }

            Statement::Assign { target, value } => {
                let (variable, address) = self.place(target)?;
                if variable.is_const() {
                    let error = SemanticError::AssignToConstant(target.val().clone());
                    return Err(Located::at(error, target.location().clone()));
                }

                let value = self.expr_as(value, variable.ty)?;
                self.backend.store(value, address);
            }

            Statement::ProcedureCall { procedure, args } => {
                self.call(procedure, args)?;
            }

            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.expr_as(condition, Type::Boolean)?;

                let then_block = self.backend.create_block(self.function, "then");
                let else_block = self.backend.create_block(self.function, "else");
                let merge = self.backend.create_block(self.function, "merge");
                self.backend.cond_branch(condition, then_block, else_block);

                self.backend.set_insertion_point(then_block);
                self.statement(then)?;
                self.backend.branch(merge);

                self.backend.set_insertion_point(else_block);
                if let Some(otherwise) = otherwise {
                    self.statement(otherwise)?;
                }

                self.backend.branch(merge);
                self.backend.set_insertion_point(merge);
            }

            Statement::While { condition, body } => {
                let cond = self.backend.create_block(self.function, "cond");
                let body_block = self.backend.create_block(self.function, "body");
                let after = self.backend.create_block(self.function, "after");
                self.backend.branch(cond);

                self.backend.set_insertion_point(cond);
                let condition = self.expr_as(condition, Type::Boolean)?;
                self.backend.cond_branch(condition, body_block, after);

                self.backend.set_insertion_point(body_block);
                self.statement(body)?;
                self.backend.branch(cond);

                self.backend.set_insertion_point(after);
            }

            Statement::Repeat { body, condition } => {
                let body_block = self.backend.create_block(self.function, "body");
                let cond = self.backend.create_block(self.function, "cond");
                let after = self.backend.create_block(self.function, "after");
                self.backend.branch(body_block);

                self.backend.set_insertion_point(body_block);
                self.statement(body)?;
                self.backend.branch(cond);

                // Itera mientras sea falso
                self.backend.set_insertion_point(cond);
                let condition = self.expr_as(condition, Type::Boolean)?;
                self.backend.cond_branch(condition, after, body_block);

                self.backend.set_insertion_point(after);
            }

            Statement::For {
                variable,
                from,
                to,
                direction,
                body,
            } => self.for_loop(variable, from, to, *direction, body)?,

            Statement::Empty => (),
        }

        Ok(())
    }

    fn for_loop(
        &mut self,
        variable: &Located<Identifier>,
        from: &Located<ast::Expr>,
        to: &Located<ast::Expr>,
        direction: Direction,
        body: &Located<Statement>,
    ) -> Semantic<()> {
        let (found, address) = self.place(variable)?;
        if found.ty != Type::Integer {
            let error = SemanticError::InvalidLoopVariableType(found.ty);
            return Err(Located::at(error, variable.location().clone()));
        } else if found.is_const() {
            let error = SemanticError::AssignToConstant(variable.val().clone());
            return Err(Located::at(error, variable.location().clone()));
        }

        let (predicate, step) = match direction {
            Direction::Up => (Predicate::Le, IntOp::Add),
            Direction::Down => (Predicate::Ge, IntOp::Sub),
        };

        let initial = self.expr_as(from, Type::Integer)?;
        self.backend.store(initial, address);

        let cond = self.backend.create_block(self.function, "cond");
        let body_block = self.backend.create_block(self.function, "body");
        let after = self.backend.create_block(self.function, "after");
        self.backend.branch(cond);

        // El límite se evalúa de nuevo antes de cada iteración
        self.backend.set_insertion_point(cond);
        let bound = self.expr_as(to, Type::Integer)?;
        let (_, address) = self.place(variable)?;
        let current = self.backend.load(Ty::I32, address);
        let test = self.backend.int_compare(predicate, current, bound, true);
        self.backend.cond_branch(test, body_block, after);

        self.backend.set_insertion_point(body_block);
        self.statement(body)?;

        let (_, address) = self.place(variable)?;
        let current = self.backend.load(Ty::I32, address);
        let one = self.backend.const_int(Ty::I32, 1);
        let next = self.backend.int_binary(step, current, one);
        self.backend.store(next, address);
        self.backend.branch(cond);

        self.backend.set_insertion_point(after);
        Ok(())
    }

    /// Resuelve una variable a la dirección de su almacenamiento.
    ///
    /// Las variables por referencia se desreferencian una vez, así que el
    /// resultado siempre apunta al valor mismo. La dirección solo es válida en
    /// el bloque actual.
    fn place(&mut self, name: &Located<Identifier>) -> Semantic<(&'a Variable, B::Value)> {
        let program: &'a Program = self.program;
        let found = program
            .scopes
            .lookup::<Variable>(self.scope, name.val())
            .and_then(|(scope, variable)| {
                let slot = self.storage.get(&(scope, name.val().clone()))?;
                Some((variable, *slot))
            });

        let (variable, slot) = match found {
            Some(found) => found,
            None => {
                let error = SemanticError::UndeclaredIdentifier(name.val().clone());
                return Err(Located::at(error, name.location().clone()));
            }
        };

        let address = if variable.is_ref() {
            self.backend.load(Ty::Ptr, slot)
        } else {
            slot
        };

        Ok((variable, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::BackendError,
        ir::{self, Builder, Instruction, Machine, Value},
        lex::Lexer,
        parse, source,
    };

    fn program(text: &str) -> Program {
        let (start, stream) = source::consume(text.as_bytes(), "<test>");
        parse::parse(Lexer::new(start, stream)).unwrap()
    }

    fn module(text: &str) -> ir::Module {
        generate(&program(text), Builder::new()).unwrap()
    }

    fn error(text: &str) -> SemanticError {
        generate(&program(text), Builder::new())
            .unwrap_err()
            .into_inner()
    }

    #[test]
    fn module_is_named_after_the_program() {
        let module = module("program demo; begin end.");
        assert_eq!(module.name, "demo");
        assert!(module.function("demo").is_none());
        assert!(module.function(ENTRY_POINT).is_some());

        let module = self::module("begin end.");
        assert_eq!(module.name, DEFAULT_NAME);
        assert_eq!(module[module.function(ENTRY_POINT).unwrap()].ret, Some(Ty::I32));
    }

    #[test]
    fn storage_classes() {
        let module = module(
            "const k = 3;
             var g: integer;
             function f(a: real; var b: integer): char;
             const j = 2.5;
             var l: Boolean;
             begin end;
             begin end.",
        );

        let globals: Vec<_> = module.globals.iter().map(|global| global.name.as_str()).collect();
        assert_eq!(globals, ["k", "g", "program.f.j"]);
        assert!(module.globals[0].is_const);
        assert!(!module.globals[1].is_const);

        let f = &module[module.function("f").unwrap()];
        assert_eq!(
            f.parameters,
            [
                ParamType {
                    ty: Ty::F64,
                    by_ref: false
                },
                ParamType {
                    ty: Ty::I32,
                    by_ref: true
                }
            ]
        );

        let slots: Vec<_> = f.slots.iter().map(|slot| (slot.name.as_str(), slot.ty)).collect();
        assert_eq!(slots, [("a", Ty::F64), ("b", Ty::Ptr), ("l", Ty::Bool), ("f", Ty::I8)]);
        assert_eq!(f.ret, Some(Ty::I8));
    }

    #[test]
    fn procedures_return_nothing() {
        let module = module("procedure p; begin end; begin p() end.");
        let p = &module[module.function("p").unwrap()];

        assert_eq!(p.ret, None);
        assert_eq!(p.blocks[0].instructions, [Instruction::Return(None)]);
    }

    #[test]
    fn every_function_verifies() {
        let module = module(
            "var i, n: integer;
             function odd(x: integer): Boolean;
             begin odd := x mod 2 = 1 end;
             begin
               n := 0;
               for i := 1 to 10 do
                 if odd(i) then n := n + i else
                   while n > 100 do n := n - 1;
               repeat n := n - 1 until n < 0
             end.",
        );

        for index in 0..module.functions.len() {
            assert_eq!(ir::verify(&module, ir::FunctionId(index as u32)), Ok(()));
        }
    }

    #[test]
    fn siblings_may_call_each_other_in_any_order() {
        let module = module(
            "var r: integer;
             function even(n: integer): Boolean;
             begin if n = 0 then even := true else even := odd(n - 1) end;
             function odd(n: integer): Boolean;
             begin if n = 0 then odd := false else odd := even(n - 1) end;
             begin if odd(7) then r := 1 else r := 2 end.",
        );

        let mut machine = Machine::new(&module);
        machine.call(ENTRY_POINT, &[]).unwrap();
        assert_eq!(machine.global("r"), Some(Value::I32(1)));
    }

    #[test]
    fn root_never_clashes_with_user_functions() {
        let module = module(
            "program demo;
             var r, s: integer;
             function main: integer; begin main := 7 end;
             function demo: integer; begin demo := 8 end;
             begin r := main(); s := demo() end.",
        );

        assert_eq!(module.name, "demo");

        let mut machine = Machine::new(&module);
        assert_eq!(machine.call(ENTRY_POINT, &[]), Ok(Some(Value::I32(0))));
        assert_eq!(machine.call("main", &[]), Ok(Some(Value::I32(7))));
        assert_eq!(machine.global("r"), Some(Value::I32(7)));
        assert_eq!(machine.global("s"), Some(Value::I32(8)));
    }

    #[test]
    fn duplicate_function_names_are_rejected_late() {
        let text = "function f: integer;
                      function g: integer; begin g := 1 end;
                    begin f := g() end;
                    function h: integer;
                      function g: integer; begin g := 2 end;
                    begin h := g() end;
                    begin end.";

        assert!(matches!(
            error(text),
            SemanticError::Backend(BackendError::Redeclaration(name)) if name == "g"
        ));
    }

    #[test]
    fn check_errors_abort_generation() {
        assert!(matches!(
            error("begin foo(1) end."),
            SemanticError::UndeclaredFunction(_)
        ));
    }
}

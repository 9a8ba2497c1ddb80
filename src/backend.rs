//! Interfaz de generación de código.
//!
//! [`crate::codegen`] nunca construye instrucciones por sí mismo. En su lugar
//! controla una implementación de [`Backend`], que es dueña del módulo en
//! construcción y decide cómo se representan funciones, bloques y valores. La
//! implementación en memoria de [`crate::ir`] es la que usan el driver y las pruebas.

use thiserror::Error;

use crate::ast::Constant;

/// Tipo de valor a nivel de máquina.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ty {
    Bool,
    I8,
    I32,
    F64,

    /// Dirección de un slot de stack o global.
    Ptr,
}

/// Cómo recibe una función uno de sus argumentos.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ParamType {
    /// Tipo de la variable, aunque lo que se pase sea su dirección.
    pub ty: Ty,
    pub by_ref: bool,
}

impl ParamType {
    /// Tipo del valor que realmente se pasa.
    pub fn passed(&self) -> Ty {
        if self.by_ref {
            Ty::Ptr
        } else {
            self.ty
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IntOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    And,
    Or,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RealOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Predicado de comparación, compartido por ambos dominios numéricos.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Function `{0}` is defined more than once in this module")]
    Redeclaration(String),

    #[error("Malformed function `{function}`: {reason}")]
    Verification { function: String, reason: String },
}

/// Capacidades requeridas para traducir un programa.
///
/// Las instrucciones se agregan al bloque seleccionado por la última llamada
/// a [`Backend::set_insertion_point`]. Los slots de stack pertenecen a la
/// función dueña de ese bloque.
pub trait Backend {
    type Function: Copy;
    type Block: Copy;
    type Value: Copy;
    type Module;

    fn create_module(&mut self, name: &str);

    /// Consume el backend, produciendo el módulo terminado.
    fn finish(self) -> Self::Module;

    fn declare_function(
        &mut self,
        name: &str,
        parameters: &[ParamType],
        ret: Option<Ty>,
    ) -> Result<Self::Function, BackendError>;

    /// Valor entrante de un parámetro.
    fn param_value(&mut self, function: Self::Function, index: usize) -> Self::Value;

    fn create_block(&mut self, function: Self::Function, name: &str) -> Self::Block;

    fn set_insertion_point(&mut self, block: Self::Block);

    /// Almacenamiento local al frame de la función actual, inicializado en cero.
    fn create_stack_slot(&mut self, ty: Ty, name: &str) -> Self::Value;

    /// Almacenamiento que vive tanto como el módulo.
    fn create_global_slot(
        &mut self,
        name: &str,
        ty: Ty,
        init: Option<Constant>,
        is_const: bool,
    ) -> Self::Value;

    fn load(&mut self, ty: Ty, address: Self::Value) -> Self::Value;

    fn store(&mut self, value: Self::Value, address: Self::Value);

    fn const_int(&mut self, ty: Ty, value: i32) -> Self::Value;

    fn const_real(&mut self, value: f64) -> Self::Value;

    fn const_bool(&mut self, value: bool) -> Self::Value;

    fn int_binary(&mut self, op: IntOp, lhs: Self::Value, rhs: Self::Value) -> Self::Value;

    fn real_binary(&mut self, op: RealOp, lhs: Self::Value, rhs: Self::Value) -> Self::Value;

    fn int_compare(
        &mut self,
        predicate: Predicate,
        lhs: Self::Value,
        rhs: Self::Value,
        signed: bool,
    ) -> Self::Value;

    /// Comparación ordenada, falsa si algún operando es NaN.
    fn real_compare(&mut self, predicate: Predicate, lhs: Self::Value, rhs: Self::Value)
        -> Self::Value;

    fn int_to_real(&mut self, value: Self::Value, signed: bool) -> Self::Value;

    /// Trunca hacia cero.
    fn real_to_int(&mut self, value: Self::Value, ty: Ty) -> Self::Value;

    /// Extiende con signo o con ceros, o trunca.
    fn int_cast(&mut self, value: Self::Value, ty: Ty, signed: bool) -> Self::Value;

    /// Booleano que es verdadero si `value`, de tipo `ty`, no es cero.
    fn is_nonzero(&mut self, value: Self::Value, ty: Ty) -> Self::Value;

    fn branch(&mut self, target: Self::Block);

    fn cond_branch(&mut self, condition: Self::Value, then: Self::Block, otherwise: Self::Block);

    /// Retorna el resultado de la llamada, salvo que el llamado no retorne nada.
    fn call(&mut self, function: Self::Function, args: &[Self::Value]) -> Option<Self::Value>;

    fn ret(&mut self, value: Option<Self::Value>);

    /// Revisa la solidez estructural de una función terminada.
    fn verify_function(&mut self, function: Self::Function) -> Result<(), BackendError>;
}

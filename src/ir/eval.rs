//! Intérprete de referencia.

use std::fmt::{self, Display};

use thiserror::Error;

use super::{FunctionId, GlobalId, Immediate, Instruction, Label, Module, Operand, Reg, Slot};
use crate::{
    ast::Constant,
    backend::{IntOp, Predicate, RealOp, Ty},
};

/// Límite por defecto de instrucciones ejecutadas.
pub const DEFAULT_BUDGET: u64 = 10_000_000;

/// Límite de llamadas anidadas.
const MAX_DEPTH: usize = 1024;

#[non_exhaustive]
#[derive(Error, Debug, PartialEq)]
pub enum EvalError {
    #[error("Function `{0}` does not exist")]
    UnknownFunction(String),

    #[error("Function `{function}` expects {expected} argument(s)")]
    BadArguments { function: String, expected: usize },

    #[error("Integer division by zero")]
    DivisionByZero,

    #[error("Execution exceeded {0} steps")]
    OutOfSteps(u64),

    #[error("Call stack overflow")]
    StackOverflow,

    #[error("Malformed module: {0}")]
    Malformed(String),
}

/// Un valor en tiempo de ejecución.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I32(i32),
    F64(f64),
    Address(Address),
}

impl Value {
    fn zero(ty: Ty) -> Self {
        match ty {
            Ty::Bool => Value::Bool(false),
            Ty::I8 => Value::I8(0),
            Ty::I32 => Value::I32(0),
            Ty::F64 => Value::F64(0.0),
            Ty::Ptr => Value::Address(Address::Null),
        }
    }

    /// Vista entera, con los booleanos como 0 o 1.
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Bool(boolean) => Some(i64::from(boolean)),
            Value::I8(integer) => Some(i64::from(integer)),
            Value::I32(integer) => Some(i64::from(integer)),
            Value::F64(_) | Value::Address(_) => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match *self {
            Value::F64(real) => Some(real),
            _ => None,
        }
    }

    /// Reconstruye un valor entero del mismo ancho, truncando `integer`.
    fn with_width_of(&self, integer: i64) -> Value {
        match self {
            Value::Bool(_) => Value::Bool(integer & 1 != 0),
            Value::I8(_) => Value::I8(integer as i8),
            _ => Value::I32(integer as i32),
        }
    }

    /// Vista entera, extendida con ceros.
    fn as_unsigned(&self) -> Option<i64> {
        match *self {
            Value::I8(integer) => Some(i64::from(integer as u8)),
            Value::I32(integer) => Some(i64::from(integer as u32)),
            _ => self.as_int(),
        }
    }
}

impl From<Constant> for Value {
    fn from(constant: Constant) -> Self {
        match constant {
            Constant::Integer(integer) => Value::I32(integer),
            Constant::Real(real) => Value::F64(real),
            Constant::Boolean(boolean) => Value::Bool(boolean),
        }
    }
}

impl From<Immediate> for Value {
    fn from(immediate: Immediate) -> Self {
        match immediate {
            Immediate::Bool(boolean) => Value::Bool(boolean),
            Immediate::I8(integer) => Value::I8(integer),
            Immediate::I32(integer) => Value::I32(integer),
            Immediate::F64(real) => Value::F64(real),
        }
    }
}

impl Display for Value {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(boolean) => write!(fmt, "{}", boolean),
            Value::I8(integer) => write!(fmt, "{}", integer),
            Value::I32(integer) => write!(fmt, "{}", integer),
            Value::F64(real) => write!(fmt, "{}", real),
            Value::Address(address) => write!(fmt, "{:?}", address),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Address {
    Null,
    Global(u32),
    Slot { frame: usize, slot: u32 },
}

/// Ejecuta funciones de un [`Module`].
///
/// Las globales conservan sus valores entre llamadas.
pub struct Machine<'m> {
    module: &'m Module,
    globals: Vec<Value>,
    frames: Vec<Vec<Value>>,
    steps: u64,
    budget: u64,
}

impl<'m> Machine<'m> {
    pub fn new(module: &'m Module) -> Self {
        let globals = module
            .globals
            .iter()
            .map(|global| global.init.map_or_else(|| Value::zero(global.ty), Value::from))
            .collect();

        Machine {
            module,
            globals,
            frames: Vec::new(),
            steps: 0,
            budget: DEFAULT_BUDGET,
        }
    }

    /// Limita la cantidad de instrucciones ejecutadas por todas las llamadas juntas.
    pub fn with_budget(self, budget: u64) -> Self {
        Machine { budget, ..self }
    }

    /// Valor actual de un slot global.
    pub fn global(&self, name: &str) -> Option<Value> {
        let GlobalId(id) = self.module.global(name)?;
        self.globals.get(id as usize).copied()
    }

    /// Llama a una función por nombre.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
        let function = self
            .module
            .function(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_owned()))?;

        let expected = self.module[function].parameters.len();
        if expected != args.len() {
            return Err(EvalError::BadArguments {
                function: name.to_owned(),
                expected,
            });
        }

        self.run(function, args.to_vec())
    }

    fn run(&mut self, id: FunctionId, args: Vec<Value>) -> Result<Option<Value>, EvalError> {
        if self.frames.len() >= MAX_DEPTH {
            return Err(EvalError::StackOverflow);
        }

        let function = &self.module[id];
        self.frames
            .push(function.slots.iter().map(|slot| Value::zero(slot.ty)).collect());

        let result = self.execute(id, &args);
        self.frames.pop();

        result
    }

    fn execute(&mut self, id: FunctionId, args: &[Value]) -> Result<Option<Value>, EvalError> {
        let module = self.module;
        let function = &module[id];
        let mut registers = vec![None; function.registers as usize];
        let mut label = Label(0);

        loop {
            let block = function
                .blocks
                .get(label.0 as usize)
                .ok_or_else(|| malformed("branch to a missing block"))?;

            for instruction in &block.instructions {
                self.steps += 1;
                if self.steps > self.budget {
                    return Err(EvalError::OutOfSteps(self.budget));
                }

                let read = |operand: &Operand| -> Result<Value, EvalError> {
                    match *operand {
                        Operand::Reg(Reg(reg)) => registers
                            .get(reg as usize)
                            .copied()
                            .flatten()
                            .ok_or_else(|| malformed("read of an undefined register")),

                        Operand::Const(immediate) => Ok(Value::from(immediate)),
                        Operand::Global(GlobalId(global)) => Ok(Value::Address(Address::Global(global))),
                        Operand::Slot(Slot(slot)) => Ok(Value::Address(Address::Slot {
                            frame: self.frames.len() - 1,
                            slot,
                        })),

                        Operand::Param(index) => args
                            .get(index as usize)
                            .copied()
                            .ok_or_else(|| malformed("missing argument")),
                    }
                };

                let (dest, value) = match instruction {
                    Instruction::Load { dest, address, .. } => {
                        (*dest, Some(self.load(read(address)?)?))
                    }

                    Instruction::Store { value, address } => {
                        let value = read(value)?;
                        let address = read(address)?;
                        self.store(value, address)?;
                        continue;
                    }

                    Instruction::Int { dest, op, lhs, rhs } => {
                        (*dest, Some(int_op(*op, read(lhs)?, read(rhs)?)?))
                    }

                    Instruction::Real { dest, op, lhs, rhs } => {
                        (*dest, Some(real_op(*op, read(lhs)?, read(rhs)?)?))
                    }

                    Instruction::IntCompare {
                        dest,
                        predicate,
                        lhs,
                        rhs,
                        signed,
                    } => {
                        let (lhs, rhs) = (read(lhs)?, read(rhs)?);
                        let (lhs, rhs) = if *signed {
                            (lhs.as_int(), rhs.as_int())
                        } else {
                            (lhs.as_unsigned(), rhs.as_unsigned())
                        };

                        let (lhs, rhs) = lhs.zip(rhs).ok_or_else(|| malformed("integer compare"))?;
                        (*dest, Some(Value::Bool(compare(*predicate, lhs, rhs))))
                    }

                    Instruction::RealCompare {
                        dest,
                        predicate,
                        lhs,
                        rhs,
                    } => {
                        let lhs = read(lhs)?.as_real();
                        let rhs = read(rhs)?.as_real();
                        let (lhs, rhs) = lhs.zip(rhs).ok_or_else(|| malformed("real compare"))?;

                        // Las comparaciones ordenadas son falsas ante NaN, `<>` incluido
                        let result = !lhs.is_nan() && !rhs.is_nan() && compare(*predicate, lhs, rhs);
                        (*dest, Some(Value::Bool(result)))
                    }

                    Instruction::IntToReal {
                        dest,
                        value,
                        signed,
                    } => {
                        let value = read(value)?;
                        let integer = if *signed {
                            value.as_int()
                        } else {
                            value.as_unsigned()
                        };

                        let integer = integer.ok_or_else(|| malformed("int to real"))?;
                        (*dest, Some(Value::F64(integer as f64)))
                    }

                    Instruction::RealToInt { dest, value, ty } => {
                        let real = read(value)?.as_real().ok_or_else(|| malformed("real to int"))?;
                        let value = Value::zero(*ty).with_width_of(real.trunc() as i64);
                        (*dest, Some(value))
                    }

                    Instruction::IntCast {
                        dest,
                        value,
                        ty,
                        signed,
                    } => {
                        let value = read(value)?;
                        let integer = if *signed {
                            value.as_int()
                        } else {
                            value.as_unsigned()
                        };

                        let integer = integer.ok_or_else(|| malformed("integer cast"))?;
                        (*dest, Some(Value::zero(*ty).with_width_of(integer)))
                    }

                    Instruction::IsNonZero { dest, value, .. } => {
                        let value = read(value)?;
                        let nonzero = match value.as_real() {
                            Some(real) => real != 0.0,
                            None => value.as_int().ok_or_else(|| malformed("nonzero test"))? != 0,
                        };

                        (*dest, Some(Value::Bool(nonzero)))
                    }

                    Instruction::Call {
                        dest,
                        function,
                        args,
                    } => {
                        let args = args.iter().map(read).collect::<Result<Vec<_>, _>>()?;
                        let result = self.run(*function, args)?;

                        match dest {
                            Some(dest) => (*dest, result),
                            None => continue,
                        }
                    }

                    Instruction::Branch(target) => {
                        label = *target;
                        break;
                    }

                    Instruction::CondBranch {
                        condition,
                        then,
                        otherwise,
                    } => {
                        let condition = read(condition)?
                            .as_int()
                            .ok_or_else(|| malformed("non-integer condition"))?;

                        label = if condition != 0 { *then } else { *otherwise };
                        break;
                    }

                    Instruction::Return(value) => {
                        return value.as_ref().map(read).transpose();
                    }
                };

                let Reg(dest) = dest;
                match registers.get_mut(dest as usize) {
                    Some(register) => *register = value,
                    None => return Err(malformed("register out of range")),
                }
            }
        }
    }

    fn load(&self, address: Value) -> Result<Value, EvalError> {
        let value = match address {
            Value::Address(Address::Global(global)) => self.globals.get(global as usize),
            Value::Address(Address::Slot { frame, slot }) => self
                .frames
                .get(frame)
                .and_then(|frame| frame.get(slot as usize)),

            _ => None,
        };

        value.copied().ok_or_else(|| malformed("load from an invalid address"))
    }

    fn store(&mut self, value: Value, address: Value) -> Result<(), EvalError> {
        let target = match address {
            Value::Address(Address::Global(global)) => self.globals.get_mut(global as usize),
            Value::Address(Address::Slot { frame, slot }) => self
                .frames
                .get_mut(frame)
                .and_then(|frame| frame.get_mut(slot as usize)),

            _ => None,
        };

        match target {
            Some(target) => {
                *target = value;
                Ok(())
            }

            None => Err(malformed("store to an invalid address")),
        }
    }
}

fn malformed(what: &str) -> EvalError {
    EvalError::Malformed(what.to_owned())
}

fn int_op(op: IntOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    let (a, b) = lhs
        .as_int()
        .zip(rhs.as_int())
        .ok_or_else(|| malformed("integer operands"))?;

    let result = match op {
        IntOp::Add => a.wrapping_add(b),
        IntOp::Sub => a.wrapping_sub(b),
        IntOp::Mul => a.wrapping_mul(b),
        IntOp::And => a & b,
        IntOp::Or => a | b,
        IntOp::SDiv | IntOp::SRem if b == 0 => return Err(EvalError::DivisionByZero),
        IntOp::SDiv => a.wrapping_div(b),
        IntOp::SRem => a.wrapping_rem(b),
    };

    Ok(lhs.with_width_of(result))
}

fn real_op(op: RealOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    let (a, b) = lhs
        .as_real()
        .zip(rhs.as_real())
        .ok_or_else(|| malformed("real operands"))?;

    let result = match op {
        RealOp::Add => a + b,
        RealOp::Sub => a - b,
        RealOp::Mul => a * b,
        RealOp::Div => a / b,
    };

    Ok(Value::F64(result))
}

fn compare<T: PartialOrd>(predicate: Predicate, lhs: T, rhs: T) -> bool {
    match predicate {
        Predicate::Eq => lhs == rhs,
        Predicate::Ne => lhs != rhs,
        Predicate::Lt => lhs < rhs,
        Predicate::Le => lhs <= rhs,
        Predicate::Gt => lhs > rhs,
        Predicate::Ge => lhs >= rhs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{Backend, ParamType},
        ir::Builder,
    };

    /// `f(a) = a / d` con `d` global, más un llamador que pasa 7.
    fn divider() -> Module {
        let mut builder = Builder::new();
        builder.create_module("test");

        let param = ParamType {
            ty: Ty::I32,
            by_ref: false,
        };

        let f = builder.declare_function("f", &[param], Some(Ty::I32)).unwrap();
        let entry = builder.create_block(f, "entry");
        builder.set_insertion_point(entry);

        let d = builder.create_global_slot("d", Ty::I32, Some(Constant::Integer(2)), false);
        let a = builder.param_value(f, 0);
        let divisor = builder.load(Ty::I32, d);
        let quotient = builder.int_binary(IntOp::SDiv, a, divisor);
        builder.ret(Some(quotient));

        builder.finish()
    }

    #[test]
    fn calls_return_values() {
        let module = divider();
        let mut machine = Machine::new(&module);

        assert_eq!(machine.call("f", &[Value::I32(7)]), Ok(Some(Value::I32(3))));
        assert_eq!(machine.global("d"), Some(Value::I32(2)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let mut module = divider();
        module.globals[0].init = Some(Constant::Integer(0));

        let mut machine = Machine::new(&module);
        assert_eq!(machine.call("f", &[Value::I32(7)]), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn bad_calls_are_rejected() {
        let module = divider();
        let mut machine = Machine::new(&module);

        assert!(matches!(machine.call("g", &[]), Err(EvalError::UnknownFunction(_))));
        assert!(matches!(machine.call("f", &[]), Err(EvalError::BadArguments { .. })));
    }

    #[test]
    fn budget_bounds_execution() {
        let mut builder = Builder::new();
        builder.create_module("test");

        let spin = builder.declare_function("spin", &[], None).unwrap();
        let entry = builder.create_block(spin, "entry");
        builder.set_insertion_point(entry);
        builder.branch(entry);

        let module = builder.finish();
        let mut machine = Machine::new(&module).with_budget(100);
        assert_eq!(machine.call("spin", &[]), Err(EvalError::OutOfSteps(100)));
    }

    #[test]
    fn integer_arithmetic_wraps_at_its_width() {
        assert_eq!(
            int_op(IntOp::Add, Value::I32(i32::MAX), Value::I32(1)),
            Ok(Value::I32(i32::MIN))
        );

        assert_eq!(int_op(IntOp::Sub, Value::I8(0), Value::I8(1)), Ok(Value::I8(-1)));
        assert_eq!(int_op(IntOp::SRem, Value::I32(-7), Value::I32(2)), Ok(Value::I32(-1)));
    }
}

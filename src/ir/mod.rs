//! Representación intermedia en memoria.
//!
//! Un [`Module`] contiene slots globales y funciones. Las funciones se forman
//! de bloques básicos con nombre, cada uno una lista de [`Instruction`]s que
//! debe terminar en exactamente un terminador. Los valores viven en registros
//! virtuales, que solo tienen sentido dentro del bloque que los define. Lo que
//! deba sobrevivir a un salto pasa por un slot.
//!
//! [`Builder`] implementa [`Backend`] para esta representación, [`verify`]
//! revisa su estructura y [`Machine`] la ejecuta.

use crate::{
    ast::Constant,
    backend::{Backend, BackendError, IntOp, ParamType, Predicate, RealOp, Ty},
};

mod eval;
mod verify;

pub use eval::{Address, EvalError, Machine, Value, DEFAULT_BUDGET};
pub use verify::verify;

/// Registro virtual, numerado por función.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reg(pub u32);

/// Slot de stack, numerado por función.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Slot(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

/// Índice de un bloque dentro de su función.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// Valor inmediato.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Immediate {
    Bool(bool),
    I8(i8),
    I32(i32),
    F64(f64),
}

/// Entrada de una instrucción.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Operand {
    Reg(Reg),
    Const(Immediate),

    /// Dirección de un slot de stack.
    Slot(Slot),

    /// Dirección de un slot global.
    Global(GlobalId),

    /// Argumento entrante.
    Param(u32),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Load {
        dest: Reg,
        ty: Ty,
        address: Operand,
    },

    Store {
        value: Operand,
        address: Operand,
    },

    Int {
        dest: Reg,
        op: IntOp,
        lhs: Operand,
        rhs: Operand,
    },

    Real {
        dest: Reg,
        op: RealOp,
        lhs: Operand,
        rhs: Operand,
    },

    IntCompare {
        dest: Reg,
        predicate: Predicate,
        lhs: Operand,
        rhs: Operand,
        signed: bool,
    },

    RealCompare {
        dest: Reg,
        predicate: Predicate,
        lhs: Operand,
        rhs: Operand,
    },

    IntToReal {
        dest: Reg,
        value: Operand,
        signed: bool,
    },

    RealToInt {
        dest: Reg,
        value: Operand,
        ty: Ty,
    },

    IntCast {
        dest: Reg,
        value: Operand,
        ty: Ty,
        signed: bool,
    },

    IsNonZero {
        dest: Reg,
        value: Operand,
        ty: Ty,
    },

    Call {
        dest: Option<Reg>,
        function: FunctionId,
        args: Vec<Operand>,
    },

    Branch(Label),

    CondBranch {
        condition: Operand,
        then: Label,
        otherwise: Label,
    },

    Return(Option<Operand>),
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Branch(_) | Instruction::CondBranch { .. } | Instruction::Return(_)
        )
    }

    /// Registro escrito por esta instrucción, si lo hay.
    pub fn dest(&self) -> Option<Reg> {
        use Instruction::*;

        match self {
            Load { dest, .. }
            | Int { dest, .. }
            | Real { dest, .. }
            | IntCompare { dest, .. }
            | RealCompare { dest, .. }
            | IntToReal { dest, .. }
            | RealToInt { dest, .. }
            | IntCast { dest, .. }
            | IsNonZero { dest, .. } => Some(*dest),

            Call { dest, .. } => *dest,
            Store { .. } | Branch(_) | CondBranch { .. } | Return(_) => None,
        }
    }

    /// Operandos leídos por esta instrucción.
    pub fn operands(&self) -> Vec<Operand> {
        use Instruction::*;

        match self {
            Load { address, .. } => vec![*address],
            Store { value, address } => vec![*value, *address],

            Int { lhs, rhs, .. }
            | Real { lhs, rhs, .. }
            | IntCompare { lhs, rhs, .. }
            | RealCompare { lhs, rhs, .. } => vec![*lhs, *rhs],

            IntToReal { value, .. }
            | RealToInt { value, .. }
            | IntCast { value, .. }
            | IsNonZero { value, .. } => vec![*value],

            Call { args, .. } => args.clone(),
            CondBranch { condition, .. } => vec![*condition],
            Return(value) => value.iter().copied().collect(),
            Branch(_) => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Global {
    pub name: String,
    pub ty: Ty,
    pub init: Option<Constant>,
    pub is_const: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StackSlot {
    pub name: String,
    pub ty: Ty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub name: String,
    pub instructions: Vec<Instruction>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<ParamType>,
    pub ret: Option<Ty>,
    pub slots: Vec<StackSlot>,

    /// El primer bloque es el punto de entrada.
    pub blocks: Vec<Block>,
    pub registers: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Module {
    pub name: String,
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|function| function.name == name)
            .map(|index| FunctionId(index as u32))
    }

    pub fn global(&self, name: &str) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|global| global.name == name)
            .map(|index| GlobalId(index as u32))
    }
}

impl std::ops::Index<FunctionId> for Module {
    type Output = Function;

    fn index(&self, FunctionId(id): FunctionId) -> &Function {
        &self.functions[id as usize]
    }
}

/// Referencia a un bloque de alguna función.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockRef {
    pub function: FunctionId,
    pub label: Label,
}

/// Construye un [`Module`].
#[derive(Default)]
pub struct Builder {
    module: Module,
    cursor: Option<BlockRef>,
}

impl Builder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Agrega una instrucción en el punto de inserción.
    ///
    /// Las instrucciones emitidas sin punto de inserción se descartan, la
    /// generación de código siempre selecciona un bloque antes de emitir.
    fn push(&mut self, instruction: Instruction) {
        if let Some(BlockRef {
            function: FunctionId(function),
            label: Label(label),
        }) = self.cursor
        {
            let function = &mut self.module.functions[function as usize];
            function.blocks[label as usize].instructions.push(instruction);
        }
    }

    fn current(&mut self) -> Option<&mut Function> {
        let FunctionId(id) = self.cursor?.function;
        self.module.functions.get_mut(id as usize)
    }

    fn reg(&mut self) -> Reg {
        match self.current() {
            Some(function) => {
                let reg = Reg(function.registers);
                function.registers += 1;
                reg
            }

            None => Reg(0),
        }
    }

    fn emit<F>(&mut self, build: F) -> Operand
    where
        F: FnOnce(Reg) -> Instruction,
    {
        let dest = self.reg();
        self.push(build(dest));
        Operand::Reg(dest)
    }
}

impl Backend for Builder {
    type Function = FunctionId;
    type Block = BlockRef;
    type Value = Operand;
    type Module = Module;

    fn create_module(&mut self, name: &str) {
        self.module = Module {
            name: name.to_owned(),
            ..Default::default()
        };

        self.cursor = None;
    }

    fn finish(self) -> Module {
        self.module
    }

    fn declare_function(
        &mut self,
        name: &str,
        parameters: &[ParamType],
        ret: Option<Ty>,
    ) -> Result<FunctionId, BackendError> {
        if self.module.function(name).is_some() {
            return Err(BackendError::Redeclaration(name.to_owned()));
        }

        let id = FunctionId(self.module.functions.len() as u32);
        self.module.functions.push(Function {
            name: name.to_owned(),
            parameters: parameters.to_vec(),
            ret,
            slots: Vec::new(),
            blocks: Vec::new(),
            registers: 0,
        });

        Ok(id)
    }

    fn param_value(&mut self, _function: FunctionId, index: usize) -> Operand {
        Operand::Param(index as u32)
    }

    fn create_block(&mut self, FunctionId(function): FunctionId, name: &str) -> BlockRef {
        let blocks = &mut self.module.functions[function as usize].blocks;
        let label = Label(blocks.len() as u32);

        blocks.push(Block {
            name: format!("{}{}", name, label.0),
            instructions: Vec::new(),
        });

        BlockRef {
            function: FunctionId(function),
            label,
        }
    }

    fn set_insertion_point(&mut self, block: BlockRef) {
        self.cursor = Some(block);
    }

    fn create_stack_slot(&mut self, ty: Ty, name: &str) -> Operand {
        match self.current() {
            Some(function) => {
                let slot = Slot(function.slots.len() as u32);
                function.slots.push(StackSlot {
                    name: name.to_owned(),
                    ty,
                });

                Operand::Slot(slot)
            }

            None => Operand::Slot(Slot(u32::MAX)),
        }
    }

    fn create_global_slot(
        &mut self,
        name: &str,
        ty: Ty,
        init: Option<Constant>,
        is_const: bool,
    ) -> Operand {
        let id = GlobalId(self.module.globals.len() as u32);
        self.module.globals.push(Global {
            name: name.to_owned(),
            ty,
            init,
            is_const,
        });

        Operand::Global(id)
    }

    fn load(&mut self, ty: Ty, address: Operand) -> Operand {
        self.emit(|dest| Instruction::Load { dest, ty, address })
    }

    fn store(&mut self, value: Operand, address: Operand) {
        self.push(Instruction::Store { value, address });
    }

    fn const_int(&mut self, ty: Ty, value: i32) -> Operand {
        Operand::Const(match ty {
            Ty::Bool => Immediate::Bool(value & 1 != 0),
            Ty::I8 => Immediate::I8(value as i8),
            Ty::F64 => Immediate::F64(f64::from(value)),
            Ty::I32 | Ty::Ptr => Immediate::I32(value),
        })
    }

    fn const_real(&mut self, value: f64) -> Operand {
        Operand::Const(Immediate::F64(value))
    }

    fn const_bool(&mut self, value: bool) -> Operand {
        Operand::Const(Immediate::Bool(value))
    }

    fn int_binary(&mut self, op: IntOp, lhs: Operand, rhs: Operand) -> Operand {
        self.emit(|dest| Instruction::Int { dest, op, lhs, rhs })
    }

    fn real_binary(&mut self, op: RealOp, lhs: Operand, rhs: Operand) -> Operand {
        self.emit(|dest| Instruction::Real { dest, op, lhs, rhs })
    }

    fn int_compare(&mut self, predicate: Predicate, lhs: Operand, rhs: Operand, signed: bool) -> Operand {
        self.emit(|dest| Instruction::IntCompare {
            dest,
            predicate,
            lhs,
            rhs,
            signed,
        })
    }

    fn real_compare(&mut self, predicate: Predicate, lhs: Operand, rhs: Operand) -> Operand {
        self.emit(|dest| Instruction::RealCompare {
            dest,
            predicate,
            lhs,
            rhs,
        })
    }

    fn int_to_real(&mut self, value: Operand, signed: bool) -> Operand {
        self.emit(|dest| Instruction::IntToReal {
            dest,
            value,
            signed,
        })
    }

    fn real_to_int(&mut self, value: Operand, ty: Ty) -> Operand {
        self.emit(|dest| Instruction::RealToInt { dest, value, ty })
    }

    fn int_cast(&mut self, value: Operand, ty: Ty, signed: bool) -> Operand {
        self.emit(|dest| Instruction::IntCast {
            dest,
            value,
            ty,
            signed,
        })
    }

    fn is_nonzero(&mut self, value: Operand, ty: Ty) -> Operand {
        self.emit(|dest| Instruction::IsNonZero { dest, value, ty })
    }

    fn branch(&mut self, target: BlockRef) {
        self.push(Instruction::Branch(target.label));
    }

    fn cond_branch(&mut self, condition: Operand, then: BlockRef, otherwise: BlockRef) {
        self.push(Instruction::CondBranch {
            condition,
            then: then.label,
            otherwise: otherwise.label,
        });
    }

    fn call(&mut self, function: FunctionId, args: &[Operand]) -> Option<Operand> {
        let returns = self.module[function].ret.is_some();
        let dest = if returns { Some(self.reg()) } else { None };

        self.push(Instruction::Call {
            dest,
            function,
            args: args.to_vec(),
        });

        dest.map(Operand::Reg)
    }

    fn ret(&mut self, value: Option<Operand>) {
        self.push(Instruction::Return(value));
    }

    fn verify_function(&mut self, function: FunctionId) -> Result<(), BackendError> {
        verify(&self.module, function).map_err(|reason| BackendError::Verification {
            function: self.module[function].name.clone(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_names_are_unique() {
        let mut builder = Builder::new();
        builder.create_module("test");

        assert!(builder.declare_function("f", &[], None).is_ok());
        assert!(matches!(
            builder.declare_function("f", &[], Some(Ty::I32)),
            Err(BackendError::Redeclaration(name)) if name == "f"
        ));
    }

    #[test]
    fn instructions_go_to_the_insertion_point() {
        let mut builder = Builder::new();
        builder.create_module("test");

        let f = builder.declare_function("f", &[], Some(Ty::I32)).unwrap();
        let entry = builder.create_block(f, "entry");
        let exit = builder.create_block(f, "exit");

        builder.set_insertion_point(entry);
        let slot = builder.create_stack_slot(Ty::I32, "x");
        let one = builder.const_int(Ty::I32, 1);
        builder.store(one, slot);
        builder.branch(exit);

        builder.set_insertion_point(exit);
        let x = builder.load(Ty::I32, slot);
        builder.ret(Some(x));

        assert!(builder.verify_function(f).is_ok());

        let module = builder.finish();
        let function = &module[f];
        assert_eq!(function.slots.len(), 1);
        assert_eq!(function.registers, 1);
        assert_eq!(function.blocks[0].name, "entry0");
        assert_eq!(function.blocks[0].instructions.len(), 2);
        assert_eq!(
            function.blocks[1].instructions,
            [
                Instruction::Load {
                    dest: Reg(0),
                    ty: Ty::I32,
                    address: Operand::Slot(Slot(0)),
                },
                Instruction::Return(Some(Operand::Reg(Reg(0)))),
            ]
        );
    }
}

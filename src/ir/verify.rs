use std::collections::HashSet;

use super::{FunctionId, GlobalId, Instruction, Label, Module, Operand, Reg, Slot};

/// Revisa la estructura de una función.
///
/// Todo bloque debe ser no vacío y terminar en su único terminador, los
/// destinos de saltos y los slots deben existir, las llamadas deben coincidir
/// con la firma del llamado y todo registro debe definirse antes en el bloque que lo usa.
pub fn verify(module: &Module, FunctionId(id): FunctionId) -> Result<(), String> {
    let function = module
        .functions
        .get(id as usize)
        .ok_or_else(|| format!("no function with id {}", id))?;

    if function.blocks.is_empty() {
        return Err(String::from("function has no blocks"));
    }

    let mut defined_anywhere = HashSet::new();

    for block in &function.blocks {
        let fail = |message: String| Err(format!("in block `{}`: {}", block.name, message));

        let (last, body) = match block.instructions.split_last() {
            Some(split) => split,
            None => return fail(String::from("empty block")),
        };

        if !last.is_terminator() {
            return fail(String::from("missing terminator"));
        } else if body.iter().any(Instruction::is_terminator) {
            return fail(String::from("terminator before the end of the block"));
        }

        let mut defined = HashSet::new();
        for instruction in &block.instructions {
            for operand in instruction.operands() {
                let valid = match operand {
                    Operand::Reg(reg) => defined.contains(&reg),
                    Operand::Const(_) => true,
                    Operand::Slot(Slot(slot)) => (slot as usize) < function.slots.len(),
                    Operand::Global(GlobalId(global)) => (global as usize) < module.globals.len(),
                    Operand::Param(index) => (index as usize) < function.parameters.len(),
                };

                if !valid {
                    return fail(format!("invalid operand {:?}", operand));
                }
            }

            match instruction {
                Instruction::Branch(target) => check_label(*target, function.blocks.len())
                    .or_else(|message| fail(message))?,

                Instruction::CondBranch { then, otherwise, .. } => {
                    check_label(*then, function.blocks.len()).or_else(|message| fail(message))?;
                    check_label(*otherwise, function.blocks.len())
                        .or_else(|message| fail(message))?;
                }

                Instruction::Call {
                    dest,
                    function: FunctionId(callee),
                    args,
                } => {
                    let callee = match module.functions.get(*callee as usize) {
                        Some(callee) => callee,
                        None => return fail(format!("call to unknown function {}", callee)),
                    };

                    if callee.parameters.len() != args.len() {
                        return fail(format!("wrong argument count for `{}`", callee.name));
                    } else if callee.ret.is_some() != dest.is_some() {
                        return fail(format!("result of `{}` is mishandled", callee.name));
                    }
                }

                Instruction::Return(value) => {
                    if value.is_some() != function.ret.is_some() {
                        return fail(String::from("return does not match the signature"));
                    }
                }

                _ => (),
            }

            if let Some(dest @ Reg(index)) = instruction.dest() {
                if index >= function.registers || !defined_anywhere.insert(dest) {
                    return fail(format!("register {} is defined twice or out of range", index));
                }

                defined.insert(dest);
            }
        }
    }

    Ok(())
}

fn check_label(Label(label): Label, blocks: usize) -> Result<(), String> {
    if (label as usize) < blocks {
        Ok(())
    } else {
        Err(format!("branch to nonexistent block {}", label))
    }
}

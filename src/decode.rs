//! Bytecode decoding into the label-based instruction list.

use std::collections::BTreeSet;

use anyhow::{Context, Result};

use crate::classfile::code::CodeAttribute;
use crate::classfile::pool::{ConstantPool, PoolEntry};
use crate::classfile::read_u16 as read_u16_cursor;
use crate::ir::{
    CallKind, CallSite, Constant, FieldKind, FieldSite, Handler, Insn, Instruction, Label,
    LineNumber, LocalVariable, MethodBody,
};
use crate::opcodes;

/// Decode a Code attribute into a rewritable method body.
pub(crate) fn decode_method(code: &CodeAttribute, pool: &ConstantPool) -> Result<MethodBody> {
    let instructions = decode_instructions(&code.code, pool)?;
    let code_len = code.code.len() as u32;

    let mut handlers = Vec::with_capacity(code.exception_table.len());
    for entry in &code.exception_table {
        let catch_type = if entry.catch_type == 0 {
            None
        } else {
            Some(
                pool.class_name(entry.catch_type)
                    .context("resolve handler catch type")?,
            )
        };
        handlers.push(Handler {
            start: Label(entry.start_pc as u32),
            end: Label(entry.end_pc as u32),
            handler: Label(entry.handler_pc as u32),
            catch_type,
        });
    }

    let mut line_numbers = Vec::new();
    let mut local_variables = Vec::new();
    let mut local_variable_types = Vec::new();
    for attribute in &code.attributes {
        let name = pool.utf8(attribute.name_index)?;
        match name.as_str() {
            "LineNumberTable" => line_numbers.extend(
                parse_line_numbers(&attribute.info).context("parse LineNumberTable")?,
            ),
            "LocalVariableTable" => local_variables.extend(
                parse_local_variables(&attribute.info).context("parse LocalVariableTable")?,
            ),
            "LocalVariableTypeTable" => local_variable_types.extend(
                parse_local_variables(&attribute.info)
                    .context("parse LocalVariableTypeTable")?,
            ),
            _ => {}
        }
    }

    let mut labels = BTreeSet::new();
    for inst in &instructions {
        labels.extend(branch_labels(&inst.insn));
    }
    for handler in &handlers {
        labels.insert(handler.start);
        labels.insert(handler.end);
        labels.insert(handler.handler);
    }
    for line in &line_numbers {
        labels.insert(line.start);
    }
    for variable in local_variables.iter().chain(local_variable_types.iter()) {
        labels.insert(variable.start);
        labels.insert(variable.end);
    }

    let mut insns = Vec::with_capacity(instructions.len() + labels.len());
    for inst in instructions {
        if labels.contains(&Label(inst.offset)) {
            insns.push(Insn::Label(Label(inst.offset)));
        }
        insns.push(inst.insn);
    }
    if labels.contains(&Label(code_len)) {
        insns.push(Insn::Label(Label(code_len)));
    }

    Ok(MethodBody {
        insns,
        handlers,
        line_numbers,
        local_variables,
        local_variable_types,
        max_locals: code.max_locals,
        next_label: code_len + 1,
    })
}

/// Decode raw bytecode. Branch targets become labels holding absolute offsets.
pub(crate) fn decode_instructions(code: &[u8], pool: &ConstantPool) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let (insn, length) = decode_one(code, offset, pool)
            .with_context(|| format!("decode opcode 0x{opcode:02x} at offset {offset}"))?;
        instructions.push(Instruction {
            offset: offset as u32,
            opcode,
            insn,
        });
        offset += length;
    }
    Ok(instructions)
}

fn decode_one(code: &[u8], offset: usize, pool: &ConstantPool) -> Result<(Insn, usize)> {
    let opcode = code[offset];
    let decoded = match opcode {
        opcodes::ACONST_NULL => (Insn::Constant(Constant::Null), 1),
        opcodes::ICONST_M1..=opcodes::ICONST_5 => (
            Insn::Constant(Constant::Int(opcode as i32 - opcodes::ICONST_0 as i32)),
            1,
        ),
        opcodes::LCONST_0 | opcodes::LCONST_1 => (
            Insn::Constant(Constant::Long((opcode - opcodes::LCONST_0) as i64)),
            1,
        ),
        opcodes::FCONST_0..=opcodes::FCONST_2 => (
            Insn::Constant(Constant::Float((opcode - opcodes::FCONST_0) as f32)),
            1,
        ),
        opcodes::DCONST_0 | opcodes::DCONST_1 => (
            Insn::Constant(Constant::Double((opcode - opcodes::DCONST_0) as f64)),
            1,
        ),
        opcodes::BIPUSH => (
            Insn::Constant(Constant::Int(read_u8(code, offset + 1)? as i8 as i32)),
            2,
        ),
        opcodes::SIPUSH => (
            Insn::Constant(Constant::Int(read_i16(code, offset + 1)? as i32)),
            3,
        ),
        opcodes::LDC => (
            Insn::Constant(pooled_constant(pool, read_u8(code, offset + 1)? as u16)?),
            2,
        ),
        opcodes::LDC_W | opcodes::LDC2_W => (
            Insn::Constant(pooled_constant(pool, read_u16(code, offset + 1)?)?),
            3,
        ),
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => (
            Insn::Var {
                opcode,
                slot: read_u8(code, offset + 1)? as u16,
            },
            2,
        ),
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let relative = opcode - opcodes::ILOAD_0;
            (
                Insn::Var {
                    opcode: opcodes::ILOAD + relative / 4,
                    slot: (relative % 4) as u16,
                },
                1,
            )
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let relative = opcode - opcodes::ISTORE_0;
            (
                Insn::Var {
                    opcode: opcodes::ISTORE + relative / 4,
                    slot: (relative % 4) as u16,
                },
                1,
            )
        }
        opcodes::IINC => (
            Insn::Iinc {
                slot: read_u8(code, offset + 1)? as u16,
                increment: read_u8(code, offset + 2)? as i8 as i16,
            },
            3,
        ),
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => (
            Insn::Jump {
                opcode,
                target: relative_label(offset, read_i16(code, offset + 1)? as i32)?,
            },
            3,
        ),
        opcodes::GOTO_W | opcodes::JSR_W => (
            Insn::Jump {
                opcode: if opcode == opcodes::GOTO_W {
                    opcodes::GOTO
                } else {
                    opcodes::JSR
                },
                target: relative_label(offset, read_i32(code, offset + 1)?)?,
            },
            5,
        ),
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let default = relative_label(offset, read_i32(code, base)?)?;
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let count = high
                .checked_sub(low)
                .and_then(|v| v.checked_add(1))
                .filter(|count| *count >= 0)
                .context("invalid tableswitch range")?;
            let mut targets = Vec::with_capacity(count as usize);
            for index in 0..count as usize {
                targets.push(relative_label(offset, read_i32(code, base + 12 + index * 4)?)?);
            }
            let length = base + 12 + count as usize * 4 - offset;
            (
                Insn::TableSwitch {
                    low,
                    high,
                    default,
                    targets,
                },
                length,
            )
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let default = relative_label(offset, read_i32(code, base)?)?;
            let npairs = read_i32(code, base + 4)?;
            if npairs < 0 {
                anyhow::bail!("negative lookupswitch pair count");
            }
            let mut pairs = Vec::with_capacity(npairs as usize);
            for index in 0..npairs as usize {
                let at = base + 8 + index * 8;
                let key = read_i32(code, at)?;
                pairs.push((key, relative_label(offset, read_i32(code, at + 4)?)?));
            }
            let length = base + 8 + npairs as usize * 8 - offset;
            (Insn::LookupSwitch { default, pairs }, length)
        }
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            let member = pool.member_ref(read_u16(code, offset + 1)?)?;
            let kind = match opcode {
                opcodes::GETSTATIC => FieldKind::GetStatic,
                opcodes::PUTSTATIC => FieldKind::PutStatic,
                opcodes::GETFIELD => FieldKind::GetField,
                _ => FieldKind::PutField,
            };
            (
                Insn::Field(FieldSite {
                    kind,
                    owner: member.owner,
                    name: member.name,
                    descriptor: member.descriptor,
                }),
                3,
            )
        }
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
            let member = pool.member_ref(read_u16(code, offset + 1)?)?;
            let (kind, length) = match opcode {
                opcodes::INVOKEVIRTUAL => (CallKind::Virtual, 3),
                opcodes::INVOKESPECIAL => (CallKind::Special, 3),
                opcodes::INVOKESTATIC => (CallKind::Static, 3),
                _ => (CallKind::Interface, 5),
            };
            (
                Insn::Method(CallSite {
                    kind,
                    owner: member.owner,
                    name: member.name,
                    descriptor: member.descriptor,
                    interface: member.interface,
                }),
                length,
            )
        }
        opcodes::INVOKEDYNAMIC => {
            let index = read_u16(code, offset + 1)?;
            (
                Insn::InvokeDynamic {
                    index,
                    descriptor: pool.dynamic_descriptor(index)?,
                },
                5,
            )
        }
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => (
            Insn::Type {
                opcode,
                class: pool.class_name(read_u16(code, offset + 1)?)?,
            },
            3,
        ),
        opcodes::NEWARRAY => (Insn::NewArray(read_u8(code, offset + 1)?), 2),
        opcodes::MULTIANEWARRAY => (
            Insn::MultiANewArray {
                class: pool.class_name(read_u16(code, offset + 1)?)?,
                dims: read_u8(code, offset + 3)?,
            },
            4,
        ),
        opcodes::WIDE => {
            let modified = read_u8(code, offset + 1)?;
            let slot = read_u16(code, offset + 2)?;
            match modified {
                opcodes::IINC => (
                    Insn::Iinc {
                        slot,
                        increment: read_i16(code, offset + 4)?,
                    },
                    6,
                ),
                opcodes::ILOAD..=opcodes::ALOAD
                | opcodes::ISTORE..=opcodes::ASTORE
                | opcodes::RET => (
                    Insn::Var {
                        opcode: modified,
                        slot,
                    },
                    4,
                ),
                other => anyhow::bail!("invalid wide opcode 0x{other:02x}"),
            }
        }
        opcodes::NOP
        | opcodes::IALOAD..=opcodes::SALOAD
        | opcodes::IASTORE..=opcodes::LXOR
        | opcodes::I2L..=opcodes::DCMPG
        | opcodes::IRETURN..=opcodes::RETURN
        | opcodes::ARRAYLENGTH
        | opcodes::ATHROW
        | opcodes::MONITORENTER
        | opcodes::MONITOREXIT => (Insn::Simple(opcode), 1),
        other => anyhow::bail!("unsupported opcode 0x{other:02x}"),
    };
    if offset + decoded.1 > code.len() {
        anyhow::bail!("instruction runs past end of code");
    }
    Ok(decoded)
}

fn pooled_constant(pool: &ConstantPool, index: u16) -> Result<Constant> {
    let constant = match pool.get(index)? {
        PoolEntry::Integer(value) => Constant::Int(*value),
        PoolEntry::Float(bits) => Constant::Float(f32::from_bits(*bits)),
        PoolEntry::Long(value) => Constant::Long(*value),
        PoolEntry::Double(bits) => Constant::Double(f64::from_bits(*bits)),
        // Literals without an exact `String` form keep their pool entry.
        PoolEntry::String { string_index } => match pool.utf8_exact(*string_index)? {
            Some(value) => Constant::String(value),
            None => Constant::Pooled {
                index,
                descriptor: "Ljava/lang/String;".to_string(),
            },
        },
        PoolEntry::Class { name_index } => match pool.utf8_exact(*name_index)? {
            Some(name) => Constant::Class(name),
            None => Constant::Pooled {
                index,
                descriptor: "Ljava/lang/Class;".to_string(),
            },
        },
        PoolEntry::MethodType { .. } => Constant::Pooled {
            index,
            descriptor: "Ljava/lang/invoke/MethodType;".to_string(),
        },
        PoolEntry::MethodHandle { .. } => Constant::Pooled {
            index,
            descriptor: "Ljava/lang/invoke/MethodHandle;".to_string(),
        },
        PoolEntry::Dynamic { .. } => Constant::Pooled {
            index,
            descriptor: pool.dynamic_descriptor(index)?,
        },
        other => anyhow::bail!("constant pool entry {index} is not loadable: {other:?}"),
    };
    Ok(constant)
}

/// Labels an instruction can transfer control to.
pub(crate) fn branch_labels(insn: &Insn) -> Vec<Label> {
    match insn {
        Insn::Jump { target, .. } => vec![*target],
        Insn::TableSwitch {
            default, targets, ..
        } => std::iter::once(*default)
            .chain(targets.iter().copied())
            .collect(),
        Insn::LookupSwitch { default, pairs } => std::iter::once(*default)
            .chain(pairs.iter().map(|(_, label)| *label))
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_line_numbers(info: &[u8]) -> Result<Vec<LineNumber>> {
    let mut offset = 0usize;
    let count = read_u16_cursor(info, &mut offset)?;
    let mut lines = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let start = read_u16_cursor(info, &mut offset)?;
        let line = read_u16_cursor(info, &mut offset)?;
        lines.push(LineNumber {
            start: Label(start as u32),
            line,
        });
    }
    Ok(lines)
}

fn parse_local_variables(info: &[u8]) -> Result<Vec<LocalVariable>> {
    let mut offset = 0usize;
    let count = read_u16_cursor(info, &mut offset)?;
    let mut variables = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let start = read_u16_cursor(info, &mut offset)? as u32;
        let length = read_u16_cursor(info, &mut offset)? as u32;
        variables.push(LocalVariable {
            start: Label(start),
            end: Label(start + length),
            name_index: read_u16_cursor(info, &mut offset)?,
            descriptor_index: read_u16_cursor(info, &mut offset)?,
            slot: read_u16_cursor(info, &mut offset)?,
        });
    }
    Ok(variables)
}

fn relative_label(offset: usize, delta: i32) -> Result<Label> {
    let target = offset as i64 + delta as i64;
    if target < 0 || target > u32::MAX as i64 {
        anyhow::bail!("branch target {} out of range", target);
    }
    Ok(Label(target as u32))
}

/// Alignment bytes after a switch opcode at `offset`.
pub(crate) fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u8(code: &[u8], offset: usize) -> Result<u8> {
    code.get(offset)
        .copied()
        .with_context(|| format!("bytecode truncated at {offset}"))
}

fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let bytes = code
        .get(offset..offset + 2)
        .with_context(|| format!("bytecode truncated at {offset}"))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    Ok(read_u16(code, offset)? as i16)
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let bytes = code
        .get(offset..offset + 4)
        .with_context(|| format!("bytecode truncated at {offset}"))?;
    Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_forms_are_normalized() {
        let pool = ConstantPool::new();
        let code = [
            opcodes::ICONST_M1,
            opcodes::BIPUSH,
            0xfe,
            opcodes::ISTORE_0 + 2,
            opcodes::ALOAD_0 + 1,
            opcodes::WIDE,
            opcodes::IINC,
            0x01,
            0x00,
            0xff,
            0x9c,
            opcodes::RETURN,
        ];

        let insns: Vec<Insn> = decode_instructions(&code, &pool)
            .expect("decode")
            .into_iter()
            .map(|inst| inst.insn)
            .collect();

        assert_eq!(
            insns,
            vec![
                Insn::Constant(Constant::Int(-1)),
                Insn::Constant(Constant::Int(-2)),
                Insn::Var {
                    opcode: opcodes::ISTORE,
                    slot: 2
                },
                Insn::Var {
                    opcode: opcodes::ALOAD,
                    slot: 1
                },
                Insn::Iinc {
                    slot: 256,
                    increment: -100
                },
                Insn::Simple(opcodes::RETURN),
            ]
        );
    }

    #[test]
    fn branch_targets_become_labels() {
        let pool = ConstantPool::new();
        let code = vec![
            opcodes::ICONST_0,
            opcodes::IFEQ,
            0x00,
            0x04,
            opcodes::NOP,
            opcodes::RETURN,
        ];
        let attribute = CodeAttribute {
            max_stack: 1,
            max_locals: 0,
            code,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };

        let body = decode_method(&attribute, &pool).expect("decode");

        assert_eq!(
            body.insns[1],
            Insn::Jump {
                opcode: opcodes::IFEQ,
                target: Label(5)
            }
        );
        assert_eq!(body.insns[3], Insn::Label(Label(5)));
        assert_eq!(body.next_label, 7);
    }

    #[test]
    fn ldc_resolves_pool_constants() {
        let mut pool = ConstantPool::new();
        let string = pool.add_string("hello").expect("string");
        let double = pool.add_double(2.5).expect("double");
        let code = [
            opcodes::LDC,
            string as u8,
            opcodes::LDC2_W,
            0,
            double as u8,
            opcodes::POP2,
            opcodes::POP,
            opcodes::RETURN,
        ];

        let insns = decode_instructions(&code, &pool).expect("decode");

        assert_eq!(
            insns[0].insn,
            Insn::Constant(Constant::String("hello".to_string()))
        );
        assert_eq!(insns[1].insn, Insn::Constant(Constant::Double(2.5)));
        assert_eq!(insns[2].offset, 5);
    }

    #[test]
    fn truncated_instruction_is_an_error() {
        let pool = ConstantPool::new();
        assert!(decode_instructions(&[opcodes::SIPUSH, 0x01], &pool).is_err());
        assert!(decode_instructions(&[0xca], &pool).is_err());
    }

    #[test]
    fn switch_padding_aligns_to_four() {
        assert_eq!(padding(0), 3);
        assert_eq!(padding(3), 0);
        assert_eq!(padding(5), 2);
    }
}

//! Re-assembly of a rewritten method body into a `Code` attribute.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};

use crate::cfg::build_cfg;
use crate::classfile::code::{CodeAttribute, ExceptionEntry};
use crate::classfile::pool::ConstantPool;
use crate::classfile::{AttributeInfo, write_u16};
use crate::decode::{decode_instructions, padding};
use crate::descriptor::MethodDescriptor;
use crate::error::WeaveError;
use crate::frames::{self, HandlerRange, MethodContext};
use crate::hierarchy::ClassHierarchy;
use crate::ir::{CallKind, Constant, Insn, Label, LocalVariable, MethodBody};
use crate::opcodes;

const MAX_CODE_LENGTH: usize = 65535;
const FIRST_STACK_MAP_VERSION: u16 = 50;

/// Method facts needed to lay out code and compute frames.
pub(crate) struct AssembleContext<'a> {
    pub(crate) owner: &'a str,
    pub(crate) name: &'a str,
    pub(crate) descriptor: &'a MethodDescriptor,
    pub(crate) is_static: bool,
    pub(crate) major_version: u16,
    pub(crate) hierarchy: &'a dyn ClassHierarchy,
}

enum Encoded {
    Label(Label),
    Bytes(Vec<u8>),
    Jump {
        opcode: u8,
        target: Label,
    },
    TableSwitch {
        low: i32,
        high: i32,
        default: Label,
        targets: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        pairs: Vec<(i32, Label)>,
    },
}

/// Lay out `body`, adding any constants it needs to `pool`, and recompute
/// `max_stack`, `max_locals` and the StackMapTable.
pub(crate) fn assemble_method(
    body: &MethodBody,
    pool: &mut ConstantPool,
    context: &AssembleContext<'_>,
) -> Result<CodeAttribute> {
    let method_id = format!("{}.{}{}", context.owner, context.name, context.descriptor);
    let encoded = body
        .insns
        .iter()
        .map(|insn| encode(insn, pool))
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("encode instructions of {method_id}"))?;

    let (offsets, labels, wide, code_len) = layout(&encoded)?;
    if code_len > MAX_CODE_LENGTH {
        return Err(WeaveError::CodeTooLarge(method_id).into());
    }
    let mut code = emit(&encoded, &offsets, &labels, &wide)?;

    let label_offset = |label: &Label| -> Result<u32> {
        labels
            .get(label)
            .copied()
            .with_context(|| format!("label {} is never placed in {}", label.0, method_id))
    };

    let mut handlers = Vec::new();
    for handler in &body.handlers {
        let start = label_offset(&handler.start)?;
        let end = label_offset(&handler.end)?;
        if start >= end {
            continue;
        }
        handlers.push(HandlerRange {
            start,
            end,
            handler: label_offset(&handler.handler)?,
            catch_type: handler.catch_type.clone(),
        });
    }

    let max_locals = compute_max_locals(body, context);
    let instructions = decode_instructions(&code, pool)?;
    let entries: Vec<ExceptionEntry> = handlers
        .iter()
        .map(|handler| ExceptionEntry {
            start_pc: handler.start as u16,
            end_pc: handler.end as u16,
            handler_pc: handler.handler as u16,
            catch_type: 0,
        })
        .collect();
    let cfg = build_cfg(code.len() as u32, &instructions, &entries)?;
    let frame_context = MethodContext {
        owner: context.owner,
        name: context.name,
        descriptor: context.descriptor,
        is_static: context.is_static,
        hierarchy: context.hierarchy,
    };
    let analysis = frames::analyze(&cfg, &handlers, &frame_context, max_locals)
        .with_context(|| format!("compute frames of {method_id}"))?;

    for (start, end) in &analysis.unreachable {
        let (start, end) = (*start as usize, *end as usize);
        for byte in &mut code[start..end - 1] {
            *byte = opcodes::NOP;
        }
        code[end - 1] = opcodes::ATHROW;
        handlers = exclude_range(handlers, start as u32, end as u32);
    }

    let mut exception_table = Vec::with_capacity(handlers.len());
    for handler in &handlers {
        let catch_type = match &handler.catch_type {
            Some(name) => pool.add_class(name)?,
            None => 0,
        };
        exception_table.push(ExceptionEntry {
            start_pc: handler.start as u16,
            end_pc: handler.end as u16,
            handler_pc: handler.handler as u16,
            catch_type,
        });
    }

    let mut attributes = Vec::new();
    if !body.line_numbers.is_empty() {
        let mut info = Vec::new();
        write_u16(&mut info, body.line_numbers.len() as u16);
        for line in &body.line_numbers {
            write_u16(&mut info, label_offset(&line.start)? as u16);
            write_u16(&mut info, line.line);
        }
        attributes.push(AttributeInfo {
            name_index: pool.add_utf8("LineNumberTable")?,
            info,
        });
    }
    for (name, variables) in [
        ("LocalVariableTable", &body.local_variables),
        ("LocalVariableTypeTable", &body.local_variable_types),
    ] {
        if variables.is_empty() {
            continue;
        }
        attributes.push(AttributeInfo {
            name_index: pool.add_utf8(name)?,
            info: encode_local_variables(variables, &label_offset)?,
        });
    }
    if context.major_version >= FIRST_STACK_MAP_VERSION && !analysis.frames.is_empty() {
        let info = frames::encode_stack_map(&analysis, pool)?;
        attributes.push(AttributeInfo {
            name_index: pool.add_utf8("StackMapTable")?,
            info,
        });
    }

    Ok(CodeAttribute {
        max_stack: analysis.max_stack,
        max_locals,
        code,
        exception_table,
        attributes,
    })
}

fn encode(insn: &Insn, pool: &mut ConstantPool) -> Result<Encoded> {
    let bytes = match insn {
        Insn::Label(label) => return Ok(Encoded::Label(*label)),
        Insn::Jump { opcode, target } => {
            return Ok(Encoded::Jump {
                opcode: *opcode,
                target: *target,
            });
        }
        Insn::TableSwitch {
            low,
            high,
            default,
            targets,
        } => {
            return Ok(Encoded::TableSwitch {
                low: *low,
                high: *high,
                default: *default,
                targets: targets.clone(),
            });
        }
        Insn::LookupSwitch { default, pairs } => {
            let mut pairs = pairs.clone();
            pairs.sort_by_key(|(key, _)| *key);
            return Ok(Encoded::LookupSwitch {
                default: *default,
                pairs,
            });
        }
        Insn::Simple(opcode) => vec![*opcode],
        Insn::Constant(constant) => encode_constant(constant, pool)?,
        Insn::Var { opcode, slot } => encode_var(*opcode, *slot),
        Insn::Iinc { slot, increment } => {
            if *slot < 256 && i8::try_from(*increment).is_ok() {
                vec![opcodes::IINC, *slot as u8, *increment as i8 as u8]
            } else {
                let mut bytes = vec![opcodes::WIDE, opcodes::IINC];
                bytes.extend_from_slice(&slot.to_be_bytes());
                bytes.extend_from_slice(&increment.to_be_bytes());
                bytes
            }
        }
        Insn::Field(field) => {
            let index = pool.add_field_ref(&field.owner, &field.name, &field.descriptor)?;
            with_u16(field.kind.opcode(), index)
        }
        Insn::Method(call) => {
            let index =
                pool.add_method_ref(&call.owner, &call.name, &call.descriptor, call.interface)?;
            let mut bytes = with_u16(call.kind.opcode(), index);
            if call.kind == CallKind::Interface {
                let descriptor = MethodDescriptor::parse(&call.descriptor)?;
                bytes.push((descriptor.argument_slots() + 1) as u8);
                bytes.push(0);
            }
            bytes
        }
        Insn::InvokeDynamic { index, .. } => {
            let mut bytes = with_u16(opcodes::INVOKEDYNAMIC, *index);
            bytes.extend_from_slice(&[0, 0]);
            bytes
        }
        Insn::Type { opcode, class } => with_u16(*opcode, pool.add_class(class)?),
        Insn::NewArray(atype) => vec![opcodes::NEWARRAY, *atype],
        Insn::MultiANewArray { class, dims } => {
            let mut bytes = with_u16(opcodes::MULTIANEWARRAY, pool.add_class(class)?);
            bytes.push(*dims);
            bytes
        }
    };
    Ok(Encoded::Bytes(bytes))
}

fn encode_constant(constant: &Constant, pool: &mut ConstantPool) -> Result<Vec<u8>> {
    let bytes = match constant {
        Constant::Null => vec![opcodes::ACONST_NULL],
        Constant::Int(value) => match *value {
            -1..=5 => vec![(opcodes::ICONST_0 as i32 + value) as u8],
            value if i8::try_from(value).is_ok() => vec![opcodes::BIPUSH, value as i8 as u8],
            value if i16::try_from(value).is_ok() => {
                with_u16(opcodes::SIPUSH, value as i16 as u16)
            }
            value => ldc(pool.add_integer(value)?),
        },
        Constant::Long(value) => match *value {
            0 | 1 => vec![opcodes::LCONST_0 + *value as u8],
            value => with_u16(opcodes::LDC2_W, pool.add_long(value)?),
        },
        Constant::Float(value) => {
            let bits = value.to_bits();
            if bits == 0.0f32.to_bits() {
                vec![opcodes::FCONST_0]
            } else if bits == 1.0f32.to_bits() {
                vec![opcodes::FCONST_1]
            } else if bits == 2.0f32.to_bits() {
                vec![opcodes::FCONST_2]
            } else {
                ldc(pool.add_float(*value)?)
            }
        }
        Constant::Double(value) => {
            let bits = value.to_bits();
            if bits == 0.0f64.to_bits() {
                vec![opcodes::DCONST_0]
            } else if bits == 1.0f64.to_bits() {
                vec![opcodes::DCONST_1]
            } else {
                with_u16(opcodes::LDC2_W, pool.add_double(*value)?)
            }
        }
        Constant::String(value) => ldc(pool.add_string(value)?),
        Constant::Class(name) => ldc(pool.add_class(name)?),
        Constant::Pooled { index, descriptor } => {
            if descriptor == "J" || descriptor == "D" {
                with_u16(opcodes::LDC2_W, *index)
            } else {
                ldc(*index)
            }
        }
    };
    Ok(bytes)
}

fn ldc(index: u16) -> Vec<u8> {
    if index < 256 {
        vec![opcodes::LDC, index as u8]
    } else {
        with_u16(opcodes::LDC_W, index)
    }
}

fn encode_var(opcode: u8, slot: u16) -> Vec<u8> {
    if opcode != opcodes::RET && slot <= 3 {
        let short = if opcodes::is_load(opcode) {
            opcodes::ILOAD_0 + (opcode - opcodes::ILOAD) * 4
        } else {
            opcodes::ISTORE_0 + (opcode - opcodes::ISTORE) * 4
        };
        return vec![short + slot as u8];
    }
    if slot < 256 {
        return vec![opcode, slot as u8];
    }
    let mut bytes = vec![opcodes::WIDE, opcode];
    bytes.extend_from_slice(&slot.to_be_bytes());
    bytes
}

fn with_u16(opcode: u8, value: u16) -> Vec<u8> {
    let [high, low] = value.to_be_bytes();
    vec![opcode, high, low]
}

type Layout = (Vec<usize>, HashMap<Label, u32>, HashSet<usize>, usize);

/// Assign offsets, widening branches whose displacement does not fit in 16 bits
/// until the layout is stable.
fn layout(encoded: &[Encoded]) -> Result<Layout> {
    let mut wide = HashSet::new();
    loop {
        let mut offsets = Vec::with_capacity(encoded.len());
        let mut labels = HashMap::new();
        let mut offset = 0usize;
        for (index, item) in encoded.iter().enumerate() {
            offsets.push(offset);
            offset += match item {
                Encoded::Label(label) => {
                    labels.insert(*label, offset as u32);
                    0
                }
                Encoded::Bytes(bytes) => bytes.len(),
                Encoded::Jump { opcode, .. } => jump_size(*opcode, wide.contains(&index)),
                Encoded::TableSwitch { targets, .. } => {
                    1 + padding(offset) + 12 + 4 * targets.len()
                }
                Encoded::LookupSwitch { pairs, .. } => 1 + padding(offset) + 8 + 8 * pairs.len(),
            };
        }

        let mut changed = false;
        for (index, item) in encoded.iter().enumerate() {
            if let Encoded::Jump { target, .. } = item {
                if wide.contains(&index) {
                    continue;
                }
                let target = *labels
                    .get(target)
                    .with_context(|| format!("jump to unplaced label {}", target.0))?;
                let delta = target as i64 - offsets[index] as i64;
                if i16::try_from(delta).is_err() {
                    wide.insert(index);
                    changed = true;
                }
            }
        }
        if !changed {
            return Ok((offsets, labels, wide, offset));
        }
    }
}

fn jump_size(opcode: u8, wide: bool) -> usize {
    match (opcode, wide) {
        (_, false) => 3,
        (opcodes::GOTO | opcodes::JSR, true) => 5,
        (_, true) => 8,
    }
}

fn emit(
    encoded: &[Encoded],
    offsets: &[usize],
    labels: &HashMap<Label, u32>,
    wide: &HashSet<usize>,
) -> Result<Vec<u8>> {
    let mut code = Vec::new();
    let target_of = |label: &Label| -> Result<i64> {
        labels
            .get(label)
            .map(|offset| *offset as i64)
            .with_context(|| format!("branch to unplaced label {}", label.0))
    };
    for (index, item) in encoded.iter().enumerate() {
        let offset = offsets[index] as i64;
        match item {
            Encoded::Label(_) => {}
            Encoded::Bytes(bytes) => code.extend_from_slice(bytes),
            Encoded::Jump { opcode, target } => {
                let target = target_of(target)?;
                if !wide.contains(&index) {
                    code.push(*opcode);
                    code.extend_from_slice(&((target - offset) as i16).to_be_bytes());
                } else if *opcode == opcodes::GOTO || *opcode == opcodes::JSR {
                    code.push(if *opcode == opcodes::GOTO {
                        opcodes::GOTO_W
                    } else {
                        opcodes::JSR_W
                    });
                    code.extend_from_slice(&((target - offset) as i32).to_be_bytes());
                } else {
                    code.push(invert_condition(*opcode)?);
                    code.extend_from_slice(&8i16.to_be_bytes());
                    code.push(opcodes::GOTO_W);
                    code.extend_from_slice(&((target - offset - 3) as i32).to_be_bytes());
                }
            }
            Encoded::TableSwitch {
                low,
                high,
                default,
                targets,
            } => {
                code.push(opcodes::TABLESWITCH);
                code.resize(code.len() + padding(offset as usize), 0);
                code.extend_from_slice(&((target_of(default)? - offset) as i32).to_be_bytes());
                code.extend_from_slice(&low.to_be_bytes());
                code.extend_from_slice(&high.to_be_bytes());
                for target in targets {
                    code.extend_from_slice(&((target_of(target)? - offset) as i32).to_be_bytes());
                }
            }
            Encoded::LookupSwitch { default, pairs } => {
                code.push(opcodes::LOOKUPSWITCH);
                code.resize(code.len() + padding(offset as usize), 0);
                code.extend_from_slice(&((target_of(default)? - offset) as i32).to_be_bytes());
                code.extend_from_slice(&(pairs.len() as i32).to_be_bytes());
                for (key, target) in pairs {
                    code.extend_from_slice(&key.to_be_bytes());
                    code.extend_from_slice(&((target_of(target)? - offset) as i32).to_be_bytes());
                }
            }
        }
    }
    Ok(code)
}

fn invert_condition(opcode: u8) -> Result<u8> {
    let inverted = match opcode {
        opcodes::IFEQ..=opcodes::IF_ACMPNE => {
            if (opcode - opcodes::IFEQ) % 2 == 0 {
                opcode + 1
            } else {
                opcode - 1
            }
        }
        opcodes::IFNULL => opcodes::IFNONNULL,
        opcodes::IFNONNULL => opcodes::IFNULL,
        other => anyhow::bail!("cannot invert branch opcode 0x{other:02x}"),
    };
    Ok(inverted)
}

fn compute_max_locals(body: &MethodBody, context: &AssembleContext<'_>) -> u16 {
    let mut max = context.descriptor.argument_slots() + if context.is_static { 0 } else { 1 };
    for insn in &body.insns {
        let used = match insn {
            Insn::Var { opcode, slot } => {
                let size = match *opcode {
                    opcodes::LLOAD | opcodes::DLOAD | opcodes::LSTORE | opcodes::DSTORE => 2,
                    _ => 1,
                };
                slot.saturating_add(size)
            }
            Insn::Iinc { slot, .. } => slot.saturating_add(1),
            _ => 0,
        };
        max = max.max(used);
    }
    max.max(body.max_locals)
}

fn encode_local_variables(
    variables: &[LocalVariable],
    label_offset: &dyn Fn(&Label) -> Result<u32>,
) -> Result<Vec<u8>> {
    let mut info = Vec::new();
    write_u16(&mut info, variables.len() as u16);
    for variable in variables {
        let start = label_offset(&variable.start)?;
        let end = label_offset(&variable.end)?;
        write_u16(&mut info, start as u16);
        write_u16(&mut info, end.saturating_sub(start) as u16);
        write_u16(&mut info, variable.name_index);
        write_u16(&mut info, variable.descriptor_index);
        write_u16(&mut info, variable.slot);
    }
    Ok(info)
}

/// Remove `[start, end)` from every handler range, splitting ranges that straddle it.
fn exclude_range(handlers: Vec<HandlerRange>, start: u32, end: u32) -> Vec<HandlerRange> {
    let mut result = Vec::with_capacity(handlers.len());
    for handler in handlers {
        if handler.end <= start || end <= handler.start {
            result.push(handler);
            continue;
        }
        if handler.start < start {
            result.push(HandlerRange {
                end: start,
                ..handler.clone()
            });
        }
        if end < handler.end {
            result.push(HandlerRange {
                start: end,
                ..handler
            });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::pool::ConstantPool;
    use crate::decode::decode_method;
    use crate::hierarchy::DefaultHierarchy;
    use crate::ir::Handler;

    fn body(insns: Vec<Insn>, max_locals: u16) -> MethodBody {
        MethodBody {
            insns,
            handlers: Vec::new(),
            line_numbers: Vec::new(),
            local_variables: Vec::new(),
            local_variable_types: Vec::new(),
            max_locals,
            next_label: 0,
        }
    }

    fn assemble(body: &MethodBody, descriptor: &str, pool: &mut ConstantPool) -> Result<CodeAttribute> {
        let descriptor = MethodDescriptor::parse(descriptor)?;
        let hierarchy = DefaultHierarchy::new();
        let context = AssembleContext {
            owner: "demo/Sample",
            name: "run",
            descriptor: &descriptor,
            is_static: true,
            major_version: 52,
            hierarchy: &hierarchy,
        };
        assemble_method(body, pool, &context)
    }

    #[test]
    fn picks_compact_encodings() {
        let mut pool = ConstantPool::new();
        let method = body(
            vec![
                Insn::Constant(Constant::Int(5)),
                Insn::Constant(Constant::Int(100)),
                Insn::Constant(Constant::Int(1000)),
                Insn::Constant(Constant::Int(100_000)),
                Insn::Simple(opcodes::IADD),
                Insn::Simple(opcodes::IADD),
                Insn::Simple(opcodes::IADD),
                Insn::Var {
                    opcode: opcodes::ISTORE,
                    slot: 1,
                },
                Insn::Simple(opcodes::RETURN),
            ],
            0,
        );

        let code = assemble(&method, "()V", &mut pool).expect("assemble");

        assert_eq!(&code.code[0..6], &[opcodes::ICONST_5, opcodes::BIPUSH, 100, opcodes::SIPUSH, 0x03, 0xe8]);
        assert_eq!(code.code[6], opcodes::LDC);
        assert_eq!(code.code[11], opcodes::ISTORE_0 + 1);
        assert_eq!(code.max_stack, 4);
        assert_eq!(code.max_locals, 2);
    }

    #[test]
    fn far_conditional_jump_is_widened() {
        let mut pool = ConstantPool::new();
        let target = Label(1);
        let mut insns = vec![
            Insn::Constant(Constant::Int(0)),
            Insn::Jump {
                opcode: opcodes::IFEQ,
                target,
            },
        ];
        insns.extend(std::iter::repeat_n(Insn::Simple(opcodes::NOP), 40_000));
        insns.push(Insn::Label(target));
        insns.push(Insn::Simple(opcodes::RETURN));
        let method = body(insns, 0);

        let code = assemble(&method, "()V", &mut pool).expect("assemble");

        assert_eq!(code.code[1], opcodes::IFNE);
        assert_eq!(&code.code[2..4], &[0, 8]);
        assert_eq!(code.code[4], opcodes::GOTO_W);
        let delta = i32::from_be_bytes([code.code[5], code.code[6], code.code[7], code.code[8]]);
        assert_eq!(delta, 40_005);
        let decoded = decode_method(&code, &pool).expect("decode");
        assert!(decoded.insns.iter().any(|insn| matches!(
            insn,
            Insn::Jump {
                opcode: opcodes::GOTO,
                ..
            }
        )));
    }

    #[test]
    fn oversized_method_is_rejected() {
        let mut pool = ConstantPool::new();
        let mut insns: Vec<Insn> = std::iter::repeat_n(Insn::Simple(opcodes::NOP), 70_000).collect();
        insns.push(Insn::Simple(opcodes::RETURN));
        let method = body(insns, 0);

        let error = assemble(&method, "()V", &mut pool).expect_err("too large");

        assert!(matches!(
            error.downcast_ref::<WeaveError>(),
            Some(WeaveError::CodeTooLarge(_))
        ));
    }

    #[test]
    fn dead_code_becomes_nop_athrow_and_leaves_handlers() {
        let mut pool = ConstantPool::new();
        let start = Label(1);
        let end = Label(2);
        let handler = Label(3);
        let mut method = body(
            vec![
                Insn::Label(start),
                Insn::Simple(opcodes::RETURN),
                Insn::Constant(Constant::Int(1)),
                Insn::Simple(opcodes::POP),
                Insn::Simple(opcodes::RETURN),
                Insn::Label(end),
                Insn::Label(handler),
                Insn::Simple(opcodes::ATHROW),
            ],
            0,
        );
        method.handlers.push(Handler {
            start,
            end,
            handler,
            catch_type: None,
        });

        let code = assemble(&method, "()V", &mut pool).expect("assemble");

        assert_eq!(
            &code.code[1..4],
            &[opcodes::NOP, opcodes::NOP, opcodes::ATHROW]
        );
        assert_eq!(code.exception_table.len(), 1);
        assert_eq!(code.exception_table[0].start_pc, 0);
        assert_eq!(code.exception_table[0].end_pc, 1);
        assert!(code.attributes.iter().any(|attribute| pool
            .utf8(attribute.name_index)
            .map(|name| name == "StackMapTable")
            .unwrap_or(false)));
    }

    #[test]
    fn old_class_versions_get_no_stack_map() {
        let mut pool = ConstantPool::new();
        let target = Label(1);
        let method = body(
            vec![
                Insn::Jump {
                    opcode: opcodes::GOTO,
                    target,
                },
                Insn::Label(target),
                Insn::Simple(opcodes::RETURN),
            ],
            0,
        );
        let descriptor = MethodDescriptor::parse("()V").expect("descriptor");
        let hierarchy = DefaultHierarchy::new();
        let context = AssembleContext {
            owner: "demo/Sample",
            name: "run",
            descriptor: &descriptor,
            is_static: true,
            major_version: 49,
            hierarchy: &hierarchy,
        };

        let code = assemble_method(&method, &mut pool, &context).expect("assemble");

        assert!(code.attributes.is_empty());
    }

    #[test]
    fn literal_with_unpaired_surrogate_keeps_its_pool_entry() {
        // #1 Utf8 "\u{D800}" (a lone high surrogate), #2 String -> #1
        let pool_bytes = [0x00, 0x03, 0x01, 0x00, 0x03, 0xED, 0xA0, 0x80, 0x08, 0x00, 0x01];
        let mut offset = 0;
        let mut pool = ConstantPool::parse(&pool_bytes, &mut offset).expect("pool");
        let original = CodeAttribute {
            max_stack: 1,
            max_locals: 0,
            code: vec![opcodes::LDC, 2, opcodes::POP, opcodes::RETURN],
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };
        let mut method = decode_method(&original, &pool).expect("decode");
        method.insns.insert(0, Insn::Simple(opcodes::POP));
        method.insns.insert(0, Insn::Constant(Constant::Int(42)));

        let code = assemble(&method, "()V", &mut pool).expect("assemble");

        assert_eq!(&code.code[3..5], &[opcodes::LDC, 2]);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn wide_slots_use_wide_prefix() {
        assert_eq!(encode_var(opcodes::ALOAD, 2), vec![opcodes::ALOAD_0 + 2]);
        assert_eq!(encode_var(opcodes::DSTORE, 9), vec![opcodes::DSTORE, 9]);
        assert_eq!(
            encode_var(opcodes::LLOAD, 300),
            vec![opcodes::WIDE, opcodes::LLOAD, 0x01, 0x2c]
        );
    }

    #[test]
    fn invert_condition_pairs() {
        assert_eq!(invert_condition(opcodes::IFEQ).expect("ifeq"), opcodes::IFNE);
        assert_eq!(invert_condition(opcodes::IFLE).expect("ifle"), opcodes::IFGT);
        assert_eq!(
            invert_condition(opcodes::IF_ACMPNE).expect("acmpne"),
            opcodes::IF_ACMPEQ
        );
        assert_eq!(invert_condition(opcodes::IFNULL).expect("ifnull"), opcodes::IFNONNULL);
    }
}

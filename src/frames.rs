//! Type-level data flow over assembled bytecode, producing stack map frames and
//! `max_stack`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{Context, Result};

use crate::classfile::pool::ConstantPool;
use crate::classfile::write_u16;
use crate::descriptor::MethodDescriptor;
use crate::error::WeaveError;
use crate::hierarchy::{ClassHierarchy, common_super_class};
use crate::ir::{CallKind, Constant, ControlFlowGraph, EdgeKind, FieldKind, Insn, Instruction};
use crate::opcodes;

const OBJECT: &str = "java/lang/Object";
const THROWABLE: &str = "java/lang/Throwable";

/// Verification type of one local slot or stack word. Long and double values take
/// two words, the second being `Top`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    Uninitialized(u32),
    Object(String),
}

impl VerificationType {
    fn is_wide(&self) -> bool {
        matches!(self, VerificationType::Long | VerificationType::Double)
    }

    fn from_descriptor(descriptor: &str) -> Option<Self> {
        let value = match descriptor.as_bytes().first()? {
            b'Z' | b'B' | b'C' | b'S' | b'I' => VerificationType::Integer,
            b'F' => VerificationType::Float,
            b'J' => VerificationType::Long,
            b'D' => VerificationType::Double,
            b'L' => VerificationType::Object(
                descriptor
                    .get(1..descriptor.len().saturating_sub(1))
                    .unwrap_or(OBJECT)
                    .to_string(),
            ),
            b'[' => VerificationType::Object(descriptor.to_string()),
            _ => return None,
        };
        Some(value)
    }
}

/// Locals and operand stack at one instruction boundary, one entry per word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Frame {
    pub(crate) locals: Vec<VerificationType>,
    pub(crate) stack: Vec<VerificationType>,
}

impl Frame {
    fn push(&mut self, value: VerificationType) {
        let wide = value.is_wide();
        self.stack.push(value);
        if wide {
            self.stack.push(VerificationType::Top);
        }
    }

    fn push_descriptor(&mut self, descriptor: &str) {
        if let Some(value) = VerificationType::from_descriptor(descriptor) {
            self.push(value);
        }
    }

    fn pop(&mut self) -> Result<VerificationType> {
        self.stack.pop().context("operand stack underflow")
    }

    fn pop_words(&mut self, count: usize) -> Result<()> {
        if self.stack.len() < count {
            anyhow::bail!("operand stack underflow");
        }
        self.stack.truncate(self.stack.len() - count);
        Ok(())
    }

    fn pop_descriptor(&mut self, descriptor: &str) -> Result<()> {
        match VerificationType::from_descriptor(descriptor) {
            Some(value) if value.is_wide() => self.pop_words(2),
            Some(_) => self.pop_words(1),
            None => Ok(()),
        }
    }

    fn load(&self, slot: u16) -> Result<VerificationType> {
        self.locals
            .get(slot as usize)
            .cloned()
            .with_context(|| format!("load from slot {slot} beyond max_locals"))
    }

    fn store(&mut self, slot: u16, value: VerificationType) {
        let slot = slot as usize;
        let wide = value.is_wide();
        let needed = slot + if wide { 2 } else { 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, VerificationType::Top);
        }
        if slot > 0 && self.locals[slot - 1].is_wide() {
            self.locals[slot - 1] = VerificationType::Top;
        }
        self.locals[slot] = value;
        if wide {
            self.locals[slot + 1] = VerificationType::Top;
        }
    }

    fn replace_all(&mut self, from: &VerificationType, to: &VerificationType) {
        for value in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if value == from {
                *value = to.clone();
            }
        }
    }
}

/// Method facts the analysis needs.
pub(crate) struct MethodContext<'a> {
    pub(crate) owner: &'a str,
    pub(crate) name: &'a str,
    pub(crate) descriptor: &'a MethodDescriptor,
    pub(crate) is_static: bool,
    pub(crate) hierarchy: &'a dyn ClassHierarchy,
}

/// Exception handler range with resolved catch type.
#[derive(Clone, Debug)]
pub(crate) struct HandlerRange {
    pub(crate) start: u32,
    pub(crate) end: u32,
    pub(crate) handler: u32,
    pub(crate) catch_type: Option<String>,
}

#[derive(Debug)]
pub(crate) struct Analysis {
    pub(crate) initial: Frame,
    /// Frames the StackMapTable must carry, keyed by offset.
    pub(crate) frames: BTreeMap<u32, Frame>,
    /// `[start, end)` ranges of blocks no path reaches.
    pub(crate) unreachable: Vec<(u32, u32)>,
    pub(crate) max_stack: u16,
}

pub(crate) fn initial_frame(context: &MethodContext<'_>, max_locals: u16) -> Frame {
    let mut frame = Frame {
        locals: Vec::new(),
        stack: Vec::new(),
    };
    let mut slot = 0u16;
    if !context.is_static {
        let receiver = if context.name == "<init>" && context.owner != OBJECT {
            VerificationType::UninitializedThis
        } else {
            VerificationType::Object(context.owner.to_string())
        };
        frame.store(0, receiver);
        slot = 1;
    }
    for parameter in context.descriptor.parameters() {
        if let Some(value) = VerificationType::from_descriptor(parameter.descriptor()) {
            frame.store(slot, value);
        }
        slot += parameter.size();
    }
    if frame.locals.len() < max_locals as usize {
        frame.locals.resize(max_locals as usize, VerificationType::Top);
    }
    frame
}

/// Propagate verification types through every reachable block.
pub(crate) fn analyze(
    cfg: &ControlFlowGraph,
    handlers: &[HandlerRange],
    context: &MethodContext<'_>,
    max_locals: u16,
) -> Result<Analysis> {
    let initial = initial_frame(context, max_locals);
    let block_index: HashMap<u32, usize> = cfg
        .blocks
        .iter()
        .enumerate()
        .map(|(index, block)| (block.start_offset, index))
        .collect();
    let mut successors: HashMap<u32, Vec<u32>> = HashMap::new();
    for edge in &cfg.edges {
        if edge.kind != EdgeKind::Exception {
            successors.entry(edge.from).or_default().push(edge.to);
        }
    }

    let mut entries: BTreeMap<u32, Frame> = BTreeMap::new();
    let mut worklist = BTreeSet::new();
    let mut max_stack = 0usize;
    if !cfg.blocks.is_empty() {
        entries.insert(0, initial.clone());
        worklist.insert(0u32);
    }

    while let Some(start) = worklist.pop_first() {
        let index = *block_index
            .get(&start)
            .with_context(|| format!("no block starts at offset {start}"))?;
        let block = &cfg.blocks[index];
        let mut frame = entries
            .get(&start)
            .cloned()
            .context("missing entry frame")?;
        for inst in &block.instructions {
            for handler in handlers
                .iter()
                .filter(|handler| handler.start <= inst.offset && inst.offset < handler.end)
            {
                let caught = handler.catch_type.as_deref().unwrap_or(THROWABLE);
                let handler_frame = Frame {
                    locals: frame.locals.clone(),
                    stack: vec![VerificationType::Object(caught.to_string())],
                };
                max_stack = max_stack.max(1);
                merge_into(
                    &mut entries,
                    &mut worklist,
                    handler.handler,
                    handler_frame,
                    context.hierarchy,
                )?;
            }
            execute(&mut frame, inst, context)
                .with_context(|| format!("at offset {} in {}", inst.offset, context.name))?;
            max_stack = max_stack.max(frame.stack.len());
        }
        if let Some(targets) = successors.get(&start) {
            for target in targets {
                merge_into(
                    &mut entries,
                    &mut worklist,
                    *target,
                    frame.clone(),
                    context.hierarchy,
                )?;
            }
        }
    }

    let mut frames = BTreeMap::new();
    let mut unreachable = Vec::new();
    let mut after_dead = false;
    for block in &cfg.blocks {
        match entries.get(&block.start_offset) {
            // code after a dead block is entered only by a jump once the dead
            // block ends in athrow
            Some(entry) if block.needs_frame || after_dead => {
                frames.insert(block.start_offset, entry.clone());
                after_dead = false;
            }
            Some(_) => {}
            None => {
                after_dead = true;
                unreachable.push((block.start_offset, block.end_offset));
                frames.insert(
                    block.start_offset,
                    Frame {
                        locals: Vec::new(),
                        stack: vec![VerificationType::Object(THROWABLE.to_string())],
                    },
                );
                max_stack = max_stack.max(1);
            }
        }
    }

    Ok(Analysis {
        initial,
        frames,
        unreachable,
        max_stack: u16::try_from(max_stack).context("max_stack exceeds 65535")?,
    })
}

fn merge_into(
    entries: &mut BTreeMap<u32, Frame>,
    worklist: &mut BTreeSet<u32>,
    target: u32,
    incoming: Frame,
    hierarchy: &dyn ClassHierarchy,
) -> Result<()> {
    match entries.get_mut(&target) {
        None => {
            entries.insert(target, incoming);
            worklist.insert(target);
        }
        Some(existing) => {
            if existing.stack.len() != incoming.stack.len() {
                anyhow::bail!(
                    "inconsistent stack height at offset {}: {} vs {}",
                    target,
                    existing.stack.len(),
                    incoming.stack.len()
                );
            }
            let mut changed = false;
            let width = existing.locals.len().max(incoming.locals.len());
            existing.locals.resize(width, VerificationType::Top);
            for (index, value) in existing.locals.iter_mut().enumerate() {
                let other = incoming
                    .locals
                    .get(index)
                    .unwrap_or(&VerificationType::Top);
                let merged = merge_type(hierarchy, value, other);
                if merged != *value {
                    *value = merged;
                    changed = true;
                }
            }
            for (value, other) in existing.stack.iter_mut().zip(incoming.stack.iter()) {
                let merged = merge_type(hierarchy, value, other);
                if merged != *value {
                    *value = merged;
                    changed = true;
                }
            }
            if changed {
                worklist.insert(target);
            }
        }
    }
    Ok(())
}

fn merge_type(
    hierarchy: &dyn ClassHierarchy,
    left: &VerificationType,
    right: &VerificationType,
) -> VerificationType {
    if left == right {
        return left.clone();
    }
    match (left, right) {
        (VerificationType::Null, VerificationType::Object(name))
        | (VerificationType::Object(name), VerificationType::Null) => {
            VerificationType::Object(name.clone())
        }
        (VerificationType::Object(left), VerificationType::Object(right)) => {
            VerificationType::Object(common_super_class(hierarchy, left, right))
        }
        _ => VerificationType::Top,
    }
}

fn execute(frame: &mut Frame, inst: &Instruction, context: &MethodContext<'_>) -> Result<()> {
    match &inst.insn {
        Insn::Label(_) => {}
        Insn::Simple(opcode) => execute_simple(frame, *opcode)?,
        Insn::Constant(constant) => {
            let value = match constant {
                Constant::Null => VerificationType::Null,
                Constant::Int(_) => VerificationType::Integer,
                Constant::Long(_) => VerificationType::Long,
                Constant::Float(_) => VerificationType::Float,
                Constant::Double(_) => VerificationType::Double,
                Constant::String(_) => VerificationType::Object("java/lang/String".to_string()),
                Constant::Class(_) => VerificationType::Object("java/lang/Class".to_string()),
                Constant::Pooled { descriptor, .. } => {
                    VerificationType::from_descriptor(descriptor)
                        .context("invalid dynamic constant descriptor")?
                }
            };
            frame.push(value);
        }
        Insn::Var { opcode, slot } => match *opcode {
            opcodes::ILOAD => frame.push(VerificationType::Integer),
            opcodes::LLOAD => frame.push(VerificationType::Long),
            opcodes::FLOAD => frame.push(VerificationType::Float),
            opcodes::DLOAD => frame.push(VerificationType::Double),
            opcodes::ALOAD => {
                let value = frame.load(*slot)?;
                frame.push(value);
            }
            opcodes::ISTORE => {
                frame.pop()?;
                frame.store(*slot, VerificationType::Integer);
            }
            opcodes::LSTORE => {
                frame.pop_words(2)?;
                frame.store(*slot, VerificationType::Long);
            }
            opcodes::FSTORE => {
                frame.pop()?;
                frame.store(*slot, VerificationType::Float);
            }
            opcodes::DSTORE => {
                frame.pop_words(2)?;
                frame.store(*slot, VerificationType::Double);
            }
            opcodes::ASTORE => {
                let value = frame.pop()?;
                frame.store(*slot, value);
            }
            _ => {
                return Err(WeaveError::UnsupportedSubroutine(context.name.to_string()).into());
            }
        },
        Insn::Iinc { slot, .. } => frame.store(*slot, VerificationType::Integer),
        Insn::Field(field) => {
            match field.kind {
                FieldKind::GetStatic => {}
                FieldKind::GetField => {
                    frame.pop()?;
                }
                FieldKind::PutStatic => frame.pop_descriptor(&field.descriptor)?,
                FieldKind::PutField => {
                    frame.pop_descriptor(&field.descriptor)?;
                    frame.pop()?;
                }
            }
            if field.kind.is_get() {
                frame.push_descriptor(&field.descriptor);
            }
        }
        Insn::Method(call) => {
            let descriptor = MethodDescriptor::parse(&call.descriptor)?;
            frame.pop_words(descriptor.argument_slots() as usize)?;
            if call.kind != CallKind::Static {
                let receiver = frame.pop()?;
                if call.kind == CallKind::Special && call.name == "<init>" {
                    let initialized = match &receiver {
                        VerificationType::UninitializedThis => {
                            VerificationType::Object(context.owner.to_string())
                        }
                        _ => VerificationType::Object(call.owner.clone()),
                    };
                    if matches!(
                        receiver,
                        VerificationType::UninitializedThis | VerificationType::Uninitialized(_)
                    ) {
                        frame.replace_all(&receiver, &initialized);
                    }
                }
            }
            frame.push_descriptor(descriptor.return_type().descriptor());
        }
        Insn::InvokeDynamic { descriptor, .. } => {
            let descriptor = MethodDescriptor::parse(descriptor)?;
            frame.pop_words(descriptor.argument_slots() as usize)?;
            frame.push_descriptor(descriptor.return_type().descriptor());
        }
        Insn::Type { opcode, class } => match *opcode {
            opcodes::NEW => frame.push(VerificationType::Uninitialized(inst.offset)),
            opcodes::ANEWARRAY => {
                frame.pop()?;
                let element = if class.starts_with('[') {
                    class.clone()
                } else {
                    format!("L{class};")
                };
                frame.push(VerificationType::Object(format!("[{element}")));
            }
            opcodes::CHECKCAST => {
                frame.pop()?;
                frame.push(VerificationType::Object(class.clone()));
            }
            _ => {
                frame.pop()?;
                frame.push(VerificationType::Integer);
            }
        },
        Insn::NewArray(atype) => {
            frame.pop()?;
            let descriptor = match atype {
                4 => "[Z",
                5 => "[C",
                6 => "[F",
                7 => "[D",
                8 => "[B",
                9 => "[S",
                10 => "[I",
                11 => "[J",
                other => anyhow::bail!("invalid newarray type {other}"),
            };
            frame.push(VerificationType::Object(descriptor.to_string()));
        }
        Insn::MultiANewArray { class, dims } => {
            frame.pop_words(*dims as usize)?;
            frame.push(VerificationType::Object(class.clone()));
        }
        Insn::Jump { opcode, .. } => match *opcode {
            opcodes::GOTO => {}
            opcodes::IFEQ..=opcodes::IFLE | opcodes::IFNULL | opcodes::IFNONNULL => {
                frame.pop()?;
            }
            opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => frame.pop_words(2)?,
            _ => {
                return Err(WeaveError::UnsupportedSubroutine(context.name.to_string()).into());
            }
        },
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
            frame.pop()?;
        }
    }
    Ok(())
}

fn execute_simple(frame: &mut Frame, opcode: u8) -> Result<()> {
    use VerificationType::{Double, Float, Integer, Long};

    match opcode {
        opcodes::NOP | opcodes::RETURN => {}
        opcodes::IALOAD | opcodes::BALOAD | opcodes::CALOAD | opcodes::SALOAD => {
            frame.pop_words(2)?;
            frame.push(Integer);
        }
        opcodes::LALOAD => {
            frame.pop_words(2)?;
            frame.push(Long);
        }
        opcodes::FALOAD => {
            frame.pop_words(2)?;
            frame.push(Float);
        }
        opcodes::DALOAD => {
            frame.pop_words(2)?;
            frame.push(Double);
        }
        opcodes::AALOAD => {
            frame.pop()?;
            let array = frame.pop()?;
            let element = match array {
                VerificationType::Object(name) if name.starts_with('[') => {
                    VerificationType::from_descriptor(&name[1..])
                        .unwrap_or(VerificationType::Object(OBJECT.to_string()))
                }
                VerificationType::Null => VerificationType::Null,
                _ => VerificationType::Object(OBJECT.to_string()),
            };
            frame.push(element);
        }
        opcodes::IASTORE
        | opcodes::FASTORE
        | opcodes::AASTORE
        | opcodes::BASTORE
        | opcodes::CASTORE
        | opcodes::SASTORE => frame.pop_words(3)?,
        opcodes::LASTORE | opcodes::DASTORE => frame.pop_words(4)?,
        opcodes::POP => frame.pop_words(1)?,
        opcodes::POP2 => frame.pop_words(2)?,
        opcodes::DUP => {
            let value = frame.pop()?;
            frame.stack.push(value.clone());
            frame.stack.push(value);
        }
        opcodes::DUP_X1 => {
            let first = frame.pop()?;
            let second = frame.pop()?;
            frame.stack.extend([first.clone(), second, first]);
        }
        opcodes::DUP_X2 => {
            let first = frame.pop()?;
            let second = frame.pop()?;
            let third = frame.pop()?;
            frame.stack.extend([first.clone(), third, second, first]);
        }
        opcodes::DUP2 => {
            let first = frame.pop()?;
            let second = frame.pop()?;
            frame
                .stack
                .extend([second.clone(), first.clone(), second, first]);
        }
        opcodes::DUP2_X1 => {
            let first = frame.pop()?;
            let second = frame.pop()?;
            let third = frame.pop()?;
            frame
                .stack
                .extend([second.clone(), first.clone(), third, second, first]);
        }
        opcodes::DUP2_X2 => {
            let first = frame.pop()?;
            let second = frame.pop()?;
            let third = frame.pop()?;
            let fourth = frame.pop()?;
            frame
                .stack
                .extend([second.clone(), first.clone(), fourth, third, second, first]);
        }
        opcodes::SWAP => {
            let first = frame.pop()?;
            let second = frame.pop()?;
            frame.stack.extend([first, second]);
        }
        // add, sub, mul, div, rem: int, long, float, double in rotation
        opcodes::IADD..=opcodes::DREM => match (opcode - opcodes::IADD) % 4 {
            0 => {
                frame.pop_words(2)?;
                frame.push(Integer);
            }
            1 => {
                frame.pop_words(4)?;
                frame.push(Long);
            }
            2 => {
                frame.pop_words(2)?;
                frame.push(Float);
            }
            _ => {
                frame.pop_words(4)?;
                frame.push(Double);
            }
        },
        opcodes::INEG => {
            frame.pop_words(1)?;
            frame.push(Integer);
        }
        opcodes::LNEG => {
            frame.pop_words(2)?;
            frame.push(Long);
        }
        opcodes::FNEG => {
            frame.pop_words(1)?;
            frame.push(Float);
        }
        opcodes::DNEG => {
            frame.pop_words(2)?;
            frame.push(Double);
        }
        opcodes::ISHL | opcodes::ISHR | opcodes::IUSHR => {
            frame.pop_words(2)?;
            frame.push(Integer);
        }
        opcodes::LSHL | opcodes::LSHR | opcodes::LUSHR => {
            frame.pop_words(3)?;
            frame.push(Long);
        }
        opcodes::IAND | opcodes::IOR | opcodes::IXOR => {
            frame.pop_words(2)?;
            frame.push(Integer);
        }
        opcodes::LAND | opcodes::LOR | opcodes::LXOR => {
            frame.pop_words(4)?;
            frame.push(Long);
        }
        opcodes::I2L | opcodes::F2L => {
            frame.pop_words(1)?;
            frame.push(Long);
        }
        opcodes::I2F => {
            frame.pop_words(1)?;
            frame.push(Float);
        }
        opcodes::I2D | opcodes::F2D => {
            frame.pop_words(1)?;
            frame.push(Double);
        }
        opcodes::L2I | opcodes::D2I => {
            frame.pop_words(2)?;
            frame.push(Integer);
        }
        opcodes::L2F | opcodes::D2F => {
            frame.pop_words(2)?;
            frame.push(Float);
        }
        opcodes::L2D => {
            frame.pop_words(2)?;
            frame.push(Double);
        }
        opcodes::D2L => {
            frame.pop_words(2)?;
            frame.push(Long);
        }
        opcodes::F2I | opcodes::I2B | opcodes::I2C | opcodes::I2S | opcodes::ARRAYLENGTH => {
            frame.pop_words(1)?;
            frame.push(Integer);
        }
        opcodes::FCMPL | opcodes::FCMPG => {
            frame.pop_words(2)?;
            frame.push(Integer);
        }
        opcodes::LCMP | opcodes::DCMPL | opcodes::DCMPG => {
            frame.pop_words(4)?;
            frame.push(Integer);
        }
        opcodes::IRETURN
        | opcodes::FRETURN
        | opcodes::ARETURN
        | opcodes::ATHROW
        | opcodes::MONITORENTER
        | opcodes::MONITOREXIT => frame.pop_words(1)?,
        opcodes::LRETURN | opcodes::DRETURN => frame.pop_words(2)?,
        other => anyhow::bail!("unexpected operand-free opcode 0x{other:02x}"),
    }
    Ok(())
}

/// Encode a StackMapTable payload, choosing the most compact frame kinds.
pub(crate) fn encode_stack_map(analysis: &Analysis, pool: &mut ConstantPool) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_u16(&mut out, analysis.frames.len() as u16);
    let mut previous_locals = compress(&analysis.initial.locals, true);
    let mut previous_offset: Option<u32> = None;
    for (offset, frame) in &analysis.frames {
        let delta = match previous_offset {
            None => *offset,
            Some(previous) => offset - previous - 1,
        };
        let delta = u16::try_from(delta).context("frame offset delta exceeds 65535")?;
        let locals = compress(&frame.locals, true);
        let stack = compress(&frame.stack, false);
        let same_locals = locals == previous_locals;
        if stack.is_empty() && same_locals {
            if delta < 64 {
                out.push(delta as u8);
            } else {
                out.push(251);
                write_u16(&mut out, delta);
            }
        } else if stack.len() == 1 && same_locals {
            if delta < 64 {
                out.push(64 + delta as u8);
            } else {
                out.push(247);
                write_u16(&mut out, delta);
            }
            write_type(&mut out, &stack[0], pool)?;
        } else if stack.is_empty()
            && locals.len() < previous_locals.len()
            && previous_locals.len() - locals.len() <= 3
            && previous_locals[..locals.len()] == locals[..]
        {
            out.push((251 - (previous_locals.len() - locals.len())) as u8);
            write_u16(&mut out, delta);
        } else if stack.is_empty()
            && locals.len() > previous_locals.len()
            && locals.len() - previous_locals.len() <= 3
            && locals[..previous_locals.len()] == previous_locals[..]
        {
            out.push((251 + (locals.len() - previous_locals.len())) as u8);
            write_u16(&mut out, delta);
            for value in &locals[previous_locals.len()..] {
                write_type(&mut out, value, pool)?;
            }
        } else {
            out.push(255);
            write_u16(&mut out, delta);
            write_u16(&mut out, locals.len() as u16);
            for value in &locals {
                write_type(&mut out, value, pool)?;
            }
            write_u16(&mut out, stack.len() as u16);
            for value in &stack {
                write_type(&mut out, value, pool)?;
            }
        }
        previous_locals = locals;
        previous_offset = Some(*offset);
    }
    Ok(out)
}

/// Collapse word lists into frame entries: the `Top` after a long or double is
/// implied, and trailing unused locals are dropped.
fn compress(words: &[VerificationType], trim: bool) -> Vec<VerificationType> {
    let mut end = words.len();
    if trim {
        while end > 0 && words[end - 1] == VerificationType::Top {
            end -= 1;
        }
    }
    let mut entries = Vec::with_capacity(end);
    let mut index = 0;
    while index < end {
        let value = &words[index];
        entries.push(value.clone());
        index += if value.is_wide() { 2 } else { 1 };
    }
    entries
}

fn write_type(out: &mut Vec<u8>, value: &VerificationType, pool: &mut ConstantPool) -> Result<()> {
    match value {
        VerificationType::Top => out.push(0),
        VerificationType::Integer => out.push(1),
        VerificationType::Float => out.push(2),
        VerificationType::Double => out.push(3),
        VerificationType::Long => out.push(4),
        VerificationType::Null => out.push(5),
        VerificationType::UninitializedThis => out.push(6),
        VerificationType::Object(name) => {
            out.push(7);
            write_u16(out, pool.add_class(name)?);
        }
        VerificationType::Uninitialized(offset) => {
            out.push(8);
            write_u16(out, u16::try_from(*offset).context("uninitialized offset")?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use crate::decode::decode_instructions;
    use crate::hierarchy::DefaultHierarchy;

    fn analyze_code(
        code: &[u8],
        descriptor: &str,
        is_static: bool,
        handlers: &[HandlerRange],
        max_locals: u16,
    ) -> Result<Analysis> {
        let pool = ConstantPool::new();
        let instructions = decode_instructions(code, &pool)?;
        let entries: Vec<_> = handlers
            .iter()
            .map(|handler| crate::classfile::code::ExceptionEntry {
                start_pc: handler.start as u16,
                end_pc: handler.end as u16,
                handler_pc: handler.handler as u16,
                catch_type: 0,
            })
            .collect();
        let cfg = build_cfg(code.len() as u32, &instructions, &entries)?;
        let descriptor = MethodDescriptor::parse(descriptor)?;
        let hierarchy = DefaultHierarchy::new();
        let context = MethodContext {
            owner: "demo/Sample",
            name: "run",
            descriptor: &descriptor,
            is_static,
            hierarchy: &hierarchy,
        };
        analyze(&cfg, handlers, &context, max_locals)
    }

    #[test]
    fn branch_target_gets_frame_with_merged_locals() {
        // iload_0; ifeq L; iconst_1; ireturn; L: iconst_0; ireturn
        let code = [0x1a, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac];
        let analysis = analyze_code(&code, "(Z)I", true, &[], 1).expect("analyze");

        assert_eq!(analysis.max_stack, 1);
        let frame = analysis.frames.get(&6).expect("frame at branch target");
        assert_eq!(frame.locals, vec![VerificationType::Integer]);
        assert!(frame.stack.is_empty());
        assert!(analysis.unreachable.is_empty());
    }

    #[test]
    fn wide_values_count_two_stack_words() {
        // lload_0; lload_0; ladd; lreturn
        let code = [0x1e, 0x1e, 0x61, 0xad];
        let analysis = analyze_code(&code, "(J)J", true, &[], 2).expect("analyze");

        assert_eq!(analysis.max_stack, 4);
    }

    #[test]
    fn dead_block_is_reported_with_throwable_frame() {
        // return; nop; return
        let code = [0xb1, 0x00, 0xb1];
        let analysis = analyze_code(&code, "()V", true, &[], 0).expect("analyze");

        assert_eq!(analysis.unreachable, vec![(1, 3)]);
        let frame = analysis.frames.get(&1).expect("dead frame");
        assert!(frame.locals.is_empty());
        assert_eq!(
            frame.stack,
            vec![VerificationType::Object(THROWABLE.to_string())]
        );
    }

    #[test]
    fn handler_frame_holds_caught_type() {
        // aload_0; athrow; astore_1; return
        let code = [0x2a, 0xbf, 0x4c, 0xb1];
        let handlers = [HandlerRange {
            start: 0,
            end: 2,
            handler: 2,
            catch_type: Some("java/lang/RuntimeException".to_string()),
        }];
        let analysis =
            analyze_code(&code, "(Ljava/lang/Throwable;)V", true, &handlers, 2).expect("analyze");

        let frame = analysis.frames.get(&2).expect("handler frame");
        assert_eq!(
            frame.stack,
            vec![VerificationType::Object(
                "java/lang/RuntimeException".to_string()
            )]
        );
    }

    #[test]
    fn jsr_is_rejected() {
        // jsr +3; return
        let code = [0xa8, 0x00, 0x03, 0xb1];
        let error = analyze_code(&code, "()V", true, &[], 1).expect_err("jsr");

        assert!(
            error
                .chain()
                .any(|cause| cause.downcast_ref::<WeaveError>().is_some())
        );
    }

    #[test]
    fn constructor_receiver_starts_uninitialized() {
        let descriptor = MethodDescriptor::parse("()V").expect("descriptor");
        let hierarchy = DefaultHierarchy::new();
        let context = MethodContext {
            owner: "demo/Sample",
            name: "<init>",
            descriptor: &descriptor,
            is_static: false,
            hierarchy: &hierarchy,
        };

        let frame = initial_frame(&context, 1);

        assert_eq!(frame.locals, vec![VerificationType::UninitializedThis]);
    }

    #[test]
    fn encodes_compact_frame_kinds() {
        let initial = Frame {
            locals: vec![VerificationType::Integer],
            stack: Vec::new(),
        };
        let mut frames = BTreeMap::new();
        frames.insert(3, initial.clone());
        frames.insert(
            10,
            Frame {
                locals: vec![
                    VerificationType::Integer,
                    VerificationType::Long,
                    VerificationType::Top,
                ],
                stack: Vec::new(),
            },
        );
        frames.insert(
            12,
            Frame {
                locals: vec![VerificationType::Integer],
                stack: vec![VerificationType::Integer],
            },
        );
        let analysis = Analysis {
            initial,
            frames,
            unreachable: Vec::new(),
            max_stack: 1,
        };
        let mut pool = ConstantPool::new();

        let bytes = encode_stack_map(&analysis, &mut pool).expect("encode");

        assert_eq!(
            bytes,
            vec![
                0, 3, // three entries
                3, // same_frame at 3
                252, 0, 6, 4, // append_frame [long] at 10
                255, 0, 1, 0, 1, 1, 0, 1, 1, // full_frame [int] [int] at 12
            ]
        );
    }
}

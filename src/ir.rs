//! Label-based instruction representation used while rewriting a method body.

use crate::opcodes;

/// Position marker in an instruction list. Decoded labels carry the original
/// bytecode offset; labels allocated during rewriting start past the end of code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Label(pub(crate) u32);

/// One instruction with symbolic operands.
///
/// Short forms (`iload_0`, `iconst_1`, `goto_w`, `wide`) are normalized on decode
/// and re-chosen by the assembler.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Insn {
    Label(Label),
    /// Instruction without operands (arithmetic, array access, stack shuffles,
    /// returns, `athrow`, monitors, `arraylength`, `nop`).
    Simple(u8),
    /// Any literal push, from `aconst_null` to `ldc2_w`.
    Constant(Constant),
    /// Typed load/store (`iload`..`astore`) or `ret`.
    Var { opcode: u8, slot: u16 },
    Iinc { slot: u16, increment: i16 },
    Field(FieldSite),
    Method(CallSite),
    InvokeDynamic { index: u16, descriptor: String },
    /// `new`, `anewarray`, `checkcast`, `instanceof`.
    Type { opcode: u8, class: String },
    NewArray(u8),
    MultiANewArray { class: String, dims: u8 },
    /// Conditional and unconditional branches, including `jsr`.
    Jump { opcode: u8, target: Label },
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

impl Insn {
    pub(crate) fn invoke_static(owner: &str, name: &str, descriptor: &str) -> Self {
        Insn::Method(CallSite {
            kind: CallKind::Static,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            interface: false,
        })
    }

    /// Opcode this instruction is emitted with in its long form.
    pub(crate) fn opcode(&self) -> Option<u8> {
        match self {
            Insn::Label(_) => None,
            Insn::Simple(opcode) | Insn::Var { opcode, .. } | Insn::Type { opcode, .. } => {
                Some(*opcode)
            }
            Insn::Jump { opcode, .. } => Some(*opcode),
            Insn::Constant(_) => Some(opcodes::LDC),
            Insn::Iinc { .. } => Some(opcodes::IINC),
            Insn::Field(field) => Some(field.kind.opcode()),
            Insn::Method(call) => Some(call.kind.opcode()),
            Insn::InvokeDynamic { .. } => Some(opcodes::INVOKEDYNAMIC),
            Insn::NewArray(_) => Some(opcodes::NEWARRAY),
            Insn::MultiANewArray { .. } => Some(opcodes::MULTIANEWARRAY),
            Insn::TableSwitch { .. } => Some(opcodes::TABLESWITCH),
            Insn::LookupSwitch { .. } => Some(opcodes::LOOKUPSWITCH),
        }
    }
}

/// Literal value pushed by a constant instruction.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Constant {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Class(String),
    /// Method type, method handle or dynamic constant, kept by pool index with the
    /// descriptor of the value it pushes.
    Pooled { index: u16, descriptor: String },
}

impl Constant {
    /// Equality on the pushed value; floating point compares raw bits.
    pub(crate) fn same_value(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Float(left), Constant::Float(right)) => left.to_bits() == right.to_bits(),
            (Constant::Double(left), Constant::Double(right)) => {
                left.to_bits() == right.to_bits()
            }
            _ => self == other,
        }
    }
}

/// Call instruction operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CallSite {
    pub(crate) kind: CallKind,
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    /// Whether the pool entry is an `InterfaceMethodref`.
    pub(crate) interface: bool,
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

impl CallKind {
    pub(crate) fn opcode(self) -> u8 {
        match self {
            CallKind::Virtual => opcodes::INVOKEVIRTUAL,
            CallKind::Interface => opcodes::INVOKEINTERFACE,
            CallKind::Special => opcodes::INVOKESPECIAL,
            CallKind::Static => opcodes::INVOKESTATIC,
        }
    }
}

/// Field access operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FieldSite {
    pub(crate) kind: FieldKind,
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FieldKind {
    GetStatic,
    PutStatic,
    GetField,
    PutField,
}

impl FieldKind {
    pub(crate) fn opcode(self) -> u8 {
        match self {
            FieldKind::GetStatic => opcodes::GETSTATIC,
            FieldKind::PutStatic => opcodes::PUTSTATIC,
            FieldKind::GetField => opcodes::GETFIELD,
            FieldKind::PutField => opcodes::PUTFIELD,
        }
    }

    pub(crate) fn is_static(self) -> bool {
        matches!(self, FieldKind::GetStatic | FieldKind::PutStatic)
    }

    pub(crate) fn is_get(self) -> bool {
        matches!(self, FieldKind::GetStatic | FieldKind::GetField)
    }
}

/// Exception handler with label bounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Handler {
    pub(crate) start: Label,
    pub(crate) end: Label,
    pub(crate) handler: Label,
    pub(crate) catch_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LineNumber {
    pub(crate) start: Label,
    pub(crate) line: u16,
}

/// Row of a LocalVariableTable or LocalVariableTypeTable. Name and descriptor
/// (or signature) stay as pool indices since the pool is append-only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LocalVariable {
    pub(crate) start: Label,
    pub(crate) end: Label,
    pub(crate) name_index: u16,
    pub(crate) descriptor_index: u16,
    pub(crate) slot: u16,
}

/// Decoded method body ready for rewriting and re-assembly.
#[derive(Clone, Debug)]
pub(crate) struct MethodBody {
    pub(crate) insns: Vec<Insn>,
    pub(crate) handlers: Vec<Handler>,
    pub(crate) line_numbers: Vec<LineNumber>,
    pub(crate) local_variables: Vec<LocalVariable>,
    pub(crate) local_variable_types: Vec<LocalVariable>,
    pub(crate) max_locals: u16,
    pub(crate) next_label: u32,
}

/// Instruction decoded at a known bytecode offset. Branch labels are raw offsets.
#[derive(Clone, Debug)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    pub(crate) insn: Insn,
}

/// Basic block graph for method bytecode.
#[derive(Clone, Debug)]
pub(crate) struct ControlFlowGraph {
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) edges: Vec<FlowEdge>,
}

/// Basic block covering a range of bytecode offsets.
#[derive(Clone, Debug)]
pub(crate) struct BasicBlock {
    pub(crate) start_offset: u32,
    pub(crate) end_offset: u32,
    pub(crate) instructions: Vec<Instruction>,
    /// Whether the verifier needs a stack map frame at `start_offset`.
    pub(crate) needs_frame: bool,
}

/// Edge between basic blocks.
#[derive(Clone, Debug)]
pub(crate) struct FlowEdge {
    pub(crate) from: u32,
    pub(crate) to: u32,
    pub(crate) kind: EdgeKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum EdgeKind {
    FallThrough,
    Branch,
    Exception,
}

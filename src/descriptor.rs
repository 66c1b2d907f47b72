//! Method and field descriptor model.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::TypeDescriptor as ParsedType;

use crate::ir::{CallKind, CallSite, Insn};
use crate::opcodes;

/// Primitive family of a value, which decides its slot width and opcode family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Float,
    Long,
    Double,
    Reference,
}

/// One parsed value type such as `I`, `J` or `Ljava/lang/String;`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    descriptor: String,
    kind: ValueKind,
}

impl TypeDescriptor {
    /// Parse a single field descriptor (or `V`), rejecting trailing input.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let parsed = ParsedType::from_str(descriptor)
            .with_context(|| format!("invalid type descriptor {descriptor:?}"))?;
        let parsed = Self::from_parsed(&parsed)
            .with_context(|| format!("invalid type descriptor {descriptor:?}"))?;
        if parsed.descriptor != descriptor {
            anyhow::bail!("trailing characters in type descriptor {descriptor:?}");
        }
        Ok(parsed)
    }

    fn from_parsed(parsed: &ParsedType) -> Result<Self> {
        let kind = match parsed {
            ParsedType::Void => ValueKind::Void,
            ParsedType::Boolean => ValueKind::Boolean,
            ParsedType::Byte => ValueKind::Byte,
            ParsedType::Char => ValueKind::Char,
            ParsedType::Short => ValueKind::Short,
            ParsedType::Integer => ValueKind::Int,
            ParsedType::Float => ValueKind::Float,
            ParsedType::Long => ValueKind::Long,
            ParsedType::Double => ValueKind::Double,
            ParsedType::Object(name) => {
                if name.is_empty() {
                    anyhow::bail!("empty class name");
                }
                ValueKind::Reference
            }
            ParsedType::Array(element, _) => {
                if **element == ParsedType::Void {
                    anyhow::bail!("array of void");
                }
                Self::from_parsed(element)?;
                ValueKind::Reference
            }
        };
        Ok(Self {
            descriptor: parsed.to_string(),
            kind,
        })
    }

    /// Descriptor for a class given in internal (`a/b/C`) or array (`[I`) form.
    pub fn object(internal_name: &str) -> Self {
        let descriptor = if internal_name.starts_with('[') {
            internal_name.to_string()
        } else {
            format!("L{internal_name};")
        };
        Self {
            descriptor,
            kind: ValueKind::Reference,
        }
    }

    pub(crate) fn void() -> Self {
        Self {
            descriptor: "V".to_string(),
            kind: ValueKind::Void,
        }
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Slots this value occupies: 2 for long and double, 0 for void, otherwise 1.
    pub fn size(&self) -> u16 {
        match self.kind {
            ValueKind::Void => 0,
            ValueKind::Long | ValueKind::Double => 2,
            _ => 1,
        }
    }

    pub fn is_void(&self) -> bool {
        self.kind == ValueKind::Void
    }

    pub fn is_reference(&self) -> bool {
        self.kind == ValueKind::Reference
    }

    /// Internal class name for object and array types.
    pub(crate) fn internal_name(&self) -> Option<&str> {
        if self.kind != ValueKind::Reference {
            return None;
        }
        if self.descriptor.starts_with('[') {
            Some(&self.descriptor)
        } else {
            Some(&self.descriptor[1..self.descriptor.len() - 1])
        }
    }

    pub(crate) fn load_opcode(&self) -> u8 {
        match self.kind {
            ValueKind::Long => opcodes::LLOAD,
            ValueKind::Float => opcodes::FLOAD,
            ValueKind::Double => opcodes::DLOAD,
            ValueKind::Reference => opcodes::ALOAD,
            _ => opcodes::ILOAD,
        }
    }

    pub(crate) fn store_opcode(&self) -> u8 {
        match self.kind {
            ValueKind::Long => opcodes::LSTORE,
            ValueKind::Float => opcodes::FSTORE,
            ValueKind::Double => opcodes::DSTORE,
            ValueKind::Reference => opcodes::ASTORE,
            _ => opcodes::ISTORE,
        }
    }

    pub(crate) fn return_opcode(&self) -> u8 {
        match self.kind {
            ValueKind::Void => opcodes::RETURN,
            ValueKind::Long => opcodes::LRETURN,
            ValueKind::Float => opcodes::FRETURN,
            ValueKind::Double => opcodes::DRETURN,
            ValueKind::Reference => opcodes::ARETURN,
            _ => opcodes::IRETURN,
        }
    }

    pub(crate) fn emit_load(&self, slot: u16) -> Insn {
        Insn::Var {
            opcode: self.load_opcode(),
            slot,
        }
    }

    pub(crate) fn emit_store(&self, slot: u16) -> Insn {
        Insn::Var {
            opcode: self.store_opcode(),
            slot,
        }
    }

    pub(crate) fn emit_return(&self) -> Insn {
        Insn::Simple(self.return_opcode())
    }

    /// Instructions turning an `Object` on the stack into a value of this type.
    ///
    /// Primitives are cast to their box class and unboxed.
    pub(crate) fn emit_checked_cast(&self) -> Vec<Insn> {
        if let Some((box_class, unbox)) = self.box_class() {
            return vec![
                Insn::Type {
                    opcode: opcodes::CHECKCAST,
                    class: box_class.to_string(),
                },
                Insn::Method(CallSite {
                    kind: CallKind::Virtual,
                    owner: box_class.to_string(),
                    name: unbox.to_string(),
                    descriptor: format!("(){}", self.descriptor),
                    interface: false,
                }),
            ];
        }
        match self.internal_name() {
            Some("java/lang/Object") | None => Vec::new(),
            Some(name) => vec![Insn::Type {
                opcode: opcodes::CHECKCAST,
                class: name.to_string(),
            }],
        }
    }

    fn box_class(&self) -> Option<(&'static str, &'static str)> {
        match self.kind {
            ValueKind::Boolean => Some(("java/lang/Boolean", "booleanValue")),
            ValueKind::Byte => Some(("java/lang/Byte", "byteValue")),
            ValueKind::Char => Some(("java/lang/Character", "charValue")),
            ValueKind::Short => Some(("java/lang/Short", "shortValue")),
            ValueKind::Int => Some(("java/lang/Integer", "intValue")),
            ValueKind::Float => Some(("java/lang/Float", "floatValue")),
            ValueKind::Long => Some(("java/lang/Long", "longValue")),
            ValueKind::Double => Some(("java/lang/Double", "doubleValue")),
            ValueKind::Void | ValueKind::Reference => None,
        }
    }

    /// Whether a typed store opcode can hold a value of this type.
    pub(crate) fn accepts_store(&self, opcode: u8) -> bool {
        match opcode {
            opcodes::ISTORE => matches!(
                self.kind,
                ValueKind::Boolean
                    | ValueKind::Byte
                    | ValueKind::Char
                    | ValueKind::Short
                    | ValueKind::Int
            ),
            opcodes::LSTORE => self.kind == ValueKind::Long,
            opcodes::FSTORE => self.kind == ValueKind::Float,
            opcodes::DSTORE => self.kind == ValueKind::Double,
            opcodes::ASTORE => self.kind == ValueKind::Reference,
            _ => false,
        }
    }

    /// Default value type for a typed load/store opcode.
    pub(crate) fn for_var_opcode(opcode: u8) -> Self {
        let (descriptor, kind) = match opcode {
            opcodes::LSTORE | opcodes::LLOAD => ("J", ValueKind::Long),
            opcodes::FSTORE | opcodes::FLOAD => ("F", ValueKind::Float),
            opcodes::DSTORE | opcodes::DLOAD => ("D", ValueKind::Double),
            opcodes::ASTORE | opcodes::ALOAD => ("Ljava/lang/Object;", ValueKind::Reference),
            _ => ("I", ValueKind::Int),
        };
        Self {
            descriptor: descriptor.to_string(),
            kind,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor)
    }
}

/// Parsed `(params)return` method descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    descriptor: String,
    parameters: Vec<TypeDescriptor>,
    return_type: TypeDescriptor,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let parsed = jdescriptor::MethodDescriptor::from_str(descriptor)
            .with_context(|| format!("parse method descriptor {descriptor:?}"))?;
        if parsed.to_string() != descriptor {
            anyhow::bail!("trailing characters in method descriptor {descriptor:?}");
        }
        let mut parameters = Vec::with_capacity(parsed.parameter_types().len());
        for parameter in parsed.parameter_types() {
            let parameter = TypeDescriptor::from_parsed(parameter)
                .with_context(|| format!("invalid parameter in {descriptor:?}"))?;
            if parameter.is_void() {
                anyhow::bail!("void parameter in method descriptor {descriptor:?}");
            }
            parameters.push(parameter);
        }
        let return_type = TypeDescriptor::from_parsed(parsed.return_type())
            .with_context(|| format!("invalid return type in {descriptor:?}"))?;
        Ok(Self {
            descriptor: descriptor.to_string(),
            parameters,
            return_type,
        })
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn parameters(&self) -> &[TypeDescriptor] {
        &self.parameters
    }

    pub fn return_type(&self) -> &TypeDescriptor {
        &self.return_type
    }

    /// Total local slots taken by the parameters, excluding any receiver.
    pub fn argument_slots(&self) -> u16 {
        self.parameters.iter().map(TypeDescriptor::size).sum()
    }

    /// Local slot of parameter `index`, accounting for wide parameters and the
    /// receiver slot of instance methods.
    pub fn parameter_slot(&self, index: usize, is_static: bool) -> Option<u16> {
        if index >= self.parameters.len() {
            return None;
        }
        let preceding: u16 = self.parameters[..index]
            .iter()
            .map(TypeDescriptor::size)
            .sum();
        Some(preceding + if is_static { 0 } else { 1 })
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor)
    }
}

/// (name, descriptor) key identifying a method inside one class.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSignature {
    pub name: String,
    pub descriptor: String,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.descriptor)
    }
}

/// Build `(` + optional `L<receiver>;` + params + `)` + return.
pub fn synthesize_descriptor<'a>(
    receiver: Option<&str>,
    parameters: impl IntoIterator<Item = &'a TypeDescriptor>,
    return_descriptor: &str,
) -> String {
    let mut descriptor = String::from("(");
    if let Some(receiver) = receiver {
        descriptor.push_str(TypeDescriptor::object(receiver).descriptor());
    }
    for parameter in parameters {
        descriptor.push_str(parameter.descriptor());
    }
    descriptor.push(')');
    descriptor.push_str(return_descriptor);
    descriptor
}

/// Convert a dotted class name into internal form.
pub fn internal_name(name: &str) -> String {
    name.replace('.', "/")
}

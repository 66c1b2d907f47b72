//! Layout of the signal object returned by inject and invoke hooks.

use anyhow::Result;

use crate::descriptor::{TypeDescriptor, internal_name};
use crate::ir::{Constant, FieldKind, FieldSite, Insn};
use crate::opcodes;
use crate::transformer::CodeWriter;

pub const DEFAULT_CALLBACK_CLASS: &str = "io/github/brqnko/bytekin/injection/CallbackInfo";

const FIELD_CANCELLED: &str = "cancelled";
const FIELD_RETURN_VALUE: &str = "returnValue";
const FIELD_MODIFY_ARGS: &str = "modifyArgs";

/// JVM class whose public fields `cancelled:Z`, `returnValue:Ljava/lang/Object;`
/// and `modifyArgs:[Ljava/lang/Object;` the rewritten code reads after a hook call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackLayout {
    class_name: String,
}

impl Default for CallbackLayout {
    fn default() -> Self {
        Self {
            class_name: DEFAULT_CALLBACK_CLASS.to_string(),
        }
    }
}

impl CallbackLayout {
    /// Use another class with the same three fields. Dotted names are accepted.
    pub fn new(class_name: &str) -> Self {
        Self {
            class_name: internal_name(class_name),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// `L<class>;`, the return descriptor of every inject and invoke hook.
    pub fn descriptor(&self) -> String {
        format!("L{};", self.class_name)
    }

    fn field(&self, name: &str, descriptor: &str) -> Insn {
        Insn::Field(FieldSite {
            kind: FieldKind::GetField,
            owner: self.class_name.clone(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    /// Store the hook result into a fresh local and return its slot.
    pub(crate) fn store_result(&self, writer: &mut CodeWriter) -> Result<u16> {
        let slot = writer.allocate_local(1)?;
        writer.emit(Insn::Var {
            opcode: opcodes::ASTORE,
            slot,
        });
        Ok(slot)
    }

    /// `if (cb.cancelled) return (T) cb.returnValue;`
    pub(crate) fn emit_cancel_check(
        &self,
        writer: &mut CodeWriter,
        callback_slot: u16,
        return_type: &TypeDescriptor,
    ) {
        let resume = writer.new_label();
        writer.emit(Insn::Var {
            opcode: opcodes::ALOAD,
            slot: callback_slot,
        });
        writer.emit(self.field(FIELD_CANCELLED, "Z"));
        writer.emit(Insn::Jump {
            opcode: opcodes::IFEQ,
            target: resume,
        });
        if !return_type.is_void() {
            writer.emit(Insn::Var {
                opcode: opcodes::ALOAD,
                slot: callback_slot,
            });
            writer.emit(self.field(FIELD_RETURN_VALUE, "Ljava/lang/Object;"));
            writer.emit_all(return_type.emit_checked_cast());
        }
        writer.emit(return_type.emit_return());
        writer.place(resume);
    }

    /// Push the operands of an intercepted call: `cb.modifyArgs[i]` cast to each
    /// parameter type when the array is non-null, else the values saved in
    /// `original_slots`.
    pub(crate) fn emit_call_arguments(
        &self,
        writer: &mut CodeWriter,
        callback_slot: u16,
        parameters: &[TypeDescriptor],
        original_slots: &[u16],
    ) {
        let use_original = writer.new_label();
        let call = writer.new_label();
        writer.emit(Insn::Var {
            opcode: opcodes::ALOAD,
            slot: callback_slot,
        });
        writer.emit(self.field(FIELD_MODIFY_ARGS, "[Ljava/lang/Object;"));
        writer.emit(Insn::Jump {
            opcode: opcodes::IFNULL,
            target: use_original,
        });
        for (index, parameter) in parameters.iter().enumerate() {
            writer.emit(Insn::Var {
                opcode: opcodes::ALOAD,
                slot: callback_slot,
            });
            writer.emit(self.field(FIELD_MODIFY_ARGS, "[Ljava/lang/Object;"));
            writer.emit(Insn::Constant(Constant::Int(index as i32)));
            writer.emit(Insn::Simple(opcodes::AALOAD));
            writer.emit_all(parameter.emit_checked_cast());
        }
        writer.emit(Insn::Jump {
            opcode: opcodes::GOTO,
            target: call,
        });
        writer.place(use_original);
        for (parameter, slot) in parameters.iter().zip(original_slots) {
            writer.emit(parameter.emit_load(*slot));
        }
        writer.place(call);
    }
}

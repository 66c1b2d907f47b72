//! Method transformers and the extension points the pipeline drives.

mod constant;
mod inject;
mod invoke;
mod redirect;
mod variable;

use anyhow::Result;

use crate::callback::CallbackLayout;
use crate::classfile::ACC_STATIC;
use crate::descriptor::MethodDescriptor;
use crate::error::WeaveError;
use crate::ir::{CallSite, Constant, FieldSite, Insn, Label};

pub(crate) use constant::ConstantTransformer;
pub(crate) use inject::InjectTransformer;
pub(crate) use invoke::InvokeTransformer;
pub(crate) use redirect::RedirectTransformer;
pub(crate) use variable::{VariableOptions, VariableTransformer};

/// Mutable state one transformer keeps while visiting one method.
#[derive(Clone, Debug, Default)]
pub(crate) struct PassState {
    /// Matching sites seen so far.
    pub(crate) occurrences: usize,
    /// Whether a single-fire rewrite already happened.
    pub(crate) applied: bool,
    /// Scratch locals holding call operands between the before and after hooks.
    pub(crate) arg_slots: Vec<u16>,
}

/// The method being visited.
pub(crate) struct MethodScope<'a> {
    pub(crate) owner: &'a str,
    pub(crate) name: &'a str,
    pub(crate) descriptor: &'a MethodDescriptor,
    pub(crate) access: u16,
    pub(crate) callback: &'a CallbackLayout,
}

impl MethodScope<'_> {
    pub(crate) fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }

    /// `owner.name(descriptor)`, used in error messages.
    pub(crate) fn id(&self) -> String {
        format!("{}.{}{}", self.owner, self.name, self.descriptor)
    }

    /// Push the receiver (instance methods) and every parameter from its slot.
    pub(crate) fn emit_load_arguments(&self, writer: &mut CodeWriter) {
        let mut slot = 0u16;
        if !self.is_static() {
            writer.emit(Insn::Var {
                opcode: crate::opcodes::ALOAD,
                slot: 0,
            });
            slot = 1;
        }
        for parameter in self.descriptor.parameters() {
            writer.emit(parameter.emit_load(slot));
            slot += parameter.size();
        }
    }
}

/// Output buffer for one method visit.
pub(crate) struct CodeWriter {
    out: Vec<Insn>,
    next_label: u32,
    max_locals: u16,
}

impl CodeWriter {
    pub(crate) fn new(next_label: u32, max_locals: u16) -> Self {
        Self {
            out: Vec::new(),
            next_label,
            max_locals,
        }
    }

    pub(crate) fn emit(&mut self, insn: Insn) {
        self.out.push(insn);
    }

    pub(crate) fn emit_all(&mut self, insns: impl IntoIterator<Item = Insn>) {
        self.out.extend(insns);
    }

    pub(crate) fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    pub(crate) fn place(&mut self, label: Label) {
        self.out.push(Insn::Label(label));
    }

    /// Reserve `size` fresh local slots past every slot in use.
    pub(crate) fn allocate_local(&mut self, size: u16) -> Result<u16> {
        let slot = self.max_locals;
        self.max_locals = slot.checked_add(size).ok_or(WeaveError::TooManyLocals)?;
        Ok(slot)
    }

    /// Instructions, next free label and `max_locals`.
    pub(crate) fn finish(self) -> (Vec<Insn>, u32, u16) {
        (self.out, self.next_label, self.max_locals)
    }
}

/// Extension points of the method pipeline. Every hook defaults to doing
/// nothing; a `transform_*` hook returning `true` claims the instruction.
pub(crate) trait MethodTransformer {
    fn before_code(
        &self,
        _scope: &MethodScope<'_>,
        _state: &mut PassState,
        _writer: &mut CodeWriter,
    ) -> Result<()> {
        Ok(())
    }

    /// Called before each operand-free instruction.
    fn before_insn(
        &self,
        _scope: &MethodScope<'_>,
        _state: &mut PassState,
        _writer: &mut CodeWriter,
        _opcode: u8,
    ) -> Result<()> {
        Ok(())
    }

    fn before_method_insn(
        &self,
        _scope: &MethodScope<'_>,
        _state: &mut PassState,
        _writer: &mut CodeWriter,
        _call: &CallSite,
    ) -> Result<()> {
        Ok(())
    }

    fn after_method_insn(
        &self,
        _scope: &MethodScope<'_>,
        _state: &mut PassState,
        _writer: &mut CodeWriter,
        _call: &CallSite,
    ) -> Result<()> {
        Ok(())
    }

    fn before_field_insn(
        &self,
        _scope: &MethodScope<'_>,
        _state: &mut PassState,
        _writer: &mut CodeWriter,
        _field: &FieldSite,
    ) -> Result<()> {
        Ok(())
    }

    fn after_field_insn(
        &self,
        _scope: &MethodScope<'_>,
        _state: &mut PassState,
        _writer: &mut CodeWriter,
        _field: &FieldSite,
    ) -> Result<()> {
        Ok(())
    }

    fn transform_method_insn(
        &self,
        _scope: &MethodScope<'_>,
        _state: &mut PassState,
        _writer: &mut CodeWriter,
        _call: &CallSite,
    ) -> Result<bool> {
        Ok(false)
    }

    fn transform_field_insn(
        &self,
        _scope: &MethodScope<'_>,
        _state: &mut PassState,
        _writer: &mut CodeWriter,
        _field: &FieldSite,
    ) -> Result<bool> {
        Ok(false)
    }

    fn transform_constant(
        &self,
        _scope: &MethodScope<'_>,
        _state: &mut PassState,
        _writer: &mut CodeWriter,
        _constant: &Constant,
    ) -> Result<bool> {
        Ok(false)
    }

    fn transform_var_insn(
        &self,
        _scope: &MethodScope<'_>,
        _state: &mut PassState,
        _writer: &mut CodeWriter,
        _opcode: u8,
        _slot: u16,
    ) -> Result<bool> {
        Ok(false)
    }
}

/// The five rewrite kinds, built once by the registry and shared read-only.
#[derive(Clone, Debug)]
pub(crate) enum Transformer {
    Inject(InjectTransformer),
    Invoke(InvokeTransformer),
    Redirect(RedirectTransformer),
    ModifyConstant(ConstantTransformer),
    ModifyVariable(VariableTransformer),
}

impl Transformer {
    fn inner(&self) -> &dyn MethodTransformer {
        match self {
            Transformer::Inject(transformer) => transformer,
            Transformer::Invoke(transformer) => transformer,
            Transformer::Redirect(transformer) => transformer,
            Transformer::ModifyConstant(transformer) => transformer,
            Transformer::ModifyVariable(transformer) => transformer,
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Transformer::Inject(_) => "inject",
            Transformer::Invoke(_) => "invoke",
            Transformer::Redirect(_) => "redirect",
            Transformer::ModifyConstant(_) => "modify_constant",
            Transformer::ModifyVariable(_) => "modify_variable",
        }
    }
}

impl MethodTransformer for Transformer {
    fn before_code(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
    ) -> Result<()> {
        self.inner().before_code(scope, state, writer)
    }

    fn before_insn(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        opcode: u8,
    ) -> Result<()> {
        self.inner().before_insn(scope, state, writer, opcode)
    }

    fn before_method_insn(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        call: &CallSite,
    ) -> Result<()> {
        self.inner().before_method_insn(scope, state, writer, call)
    }

    fn after_method_insn(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        call: &CallSite,
    ) -> Result<()> {
        self.inner().after_method_insn(scope, state, writer, call)
    }

    fn before_field_insn(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        field: &FieldSite,
    ) -> Result<()> {
        self.inner().before_field_insn(scope, state, writer, field)
    }

    fn after_field_insn(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        field: &FieldSite,
    ) -> Result<()> {
        self.inner().after_field_insn(scope, state, writer, field)
    }

    fn transform_method_insn(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        call: &CallSite,
    ) -> Result<bool> {
        self.inner().transform_method_insn(scope, state, writer, call)
    }

    fn transform_field_insn(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        field: &FieldSite,
    ) -> Result<bool> {
        self.inner().transform_field_insn(scope, state, writer, field)
    }

    fn transform_constant(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        constant: &Constant,
    ) -> Result<bool> {
        self.inner().transform_constant(scope, state, writer, constant)
    }

    fn transform_var_insn(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        opcode: u8,
        slot: u16,
    ) -> Result<bool> {
        self.inner()
            .transform_var_insn(scope, state, writer, opcode, slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_allocates_past_existing_locals() {
        let mut writer = CodeWriter::new(40, 3);

        assert_eq!(writer.allocate_local(2).expect("slot"), 3);
        assert_eq!(writer.allocate_local(1).expect("slot"), 5);
        assert_eq!(writer.new_label(), Label(40));
        assert_eq!(writer.new_label(), Label(41));
        let (insns, next_label, max_locals) = writer.finish();
        assert!(insns.is_empty());
        assert_eq!(next_label, 42);
        assert_eq!(max_locals, 6);
    }

    #[test]
    fn writer_refuses_slots_past_the_local_limit() {
        let mut writer = CodeWriter::new(0, u16::MAX - 1);

        assert_eq!(writer.allocate_local(1).expect("last slot"), u16::MAX - 1);
        let error = writer.allocate_local(2).expect_err("no room for a wide value");

        assert_eq!(
            error.downcast_ref::<WeaveError>(),
            Some(&WeaveError::TooManyLocals)
        );
        assert_eq!(writer.finish().2, u16::MAX);
    }

    #[test]
    fn scope_loads_receiver_then_parameters() {
        let descriptor = MethodDescriptor::parse("(JLjava/lang/String;)V").expect("descriptor");
        let callback = CallbackLayout::default();
        let scope = MethodScope {
            owner: "demo/Sample",
            name: "run",
            descriptor: &descriptor,
            access: 0,
            callback: &callback,
        };
        let mut writer = CodeWriter::new(0, 4);

        scope.emit_load_arguments(&mut writer);
        let (insns, _, _) = writer.finish();

        assert_eq!(
            insns,
            vec![
                Insn::Var {
                    opcode: crate::opcodes::ALOAD,
                    slot: 0
                },
                Insn::Var {
                    opcode: crate::opcodes::LLOAD,
                    slot: 1
                },
                Insn::Var {
                    opcode: crate::opcodes::ALOAD,
                    slot: 3
                },
            ]
        );
        assert_eq!(scope.id(), "demo/Sample.run(JLjava/lang/String;)V");
    }
}

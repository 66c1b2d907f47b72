use anyhow::{Context, Result};

use super::{CodeWriter, MethodScope, MethodTransformer, PassState};
use crate::descriptor::{MethodDescriptor, synthesize_descriptor};
use crate::ir::{CallSite, Insn};
use crate::request::{HookRef, MemberRef, Shift};

/// Calls a hook around every call to one method inside the target body.
#[derive(Clone, Debug)]
pub(crate) struct InvokeTransformer {
    hook: HookRef,
    call: MemberRef,
    call_descriptor: MethodDescriptor,
    shift: Shift,
}

impl InvokeTransformer {
    pub(crate) fn new(hook: HookRef, call: MemberRef, shift: Shift) -> Result<Self> {
        let call_descriptor = MethodDescriptor::parse(&call.descriptor)
            .with_context(|| format!("intercepted call {}.{}", call.owner, call.name))?;
        Ok(Self {
            hook,
            call,
            call_descriptor,
            shift,
        })
    }

    fn matches(&self, call: &CallSite) -> bool {
        call.owner == self.call.owner
            && call.name == self.call.name
            && call.descriptor == self.call.descriptor
    }

    /// Hook call with the target's receiver and parameters followed by the saved
    /// call operands, then the cancel check. Returns the callback slot.
    fn emit_hook(&self, scope: &MethodScope<'_>, writer: &mut CodeWriter, arg_slots: &[u16]) -> Result<u16> {
        let receiver = (!scope.is_static()).then_some(scope.owner);
        let descriptor = synthesize_descriptor(
            receiver,
            scope
                .descriptor
                .parameters()
                .iter()
                .chain(self.call_descriptor.parameters()),
            &scope.callback.descriptor(),
        );
        scope.emit_load_arguments(writer);
        for (parameter, slot) in self.call_descriptor.parameters().iter().zip(arg_slots) {
            writer.emit(parameter.emit_load(*slot));
        }
        writer.emit(Insn::invoke_static(
            &self.hook.owner,
            &self.hook.name,
            &descriptor,
        ));
        let callback_slot = scope.callback.store_result(writer)?;
        scope
            .callback
            .emit_cancel_check(writer, callback_slot, scope.descriptor.return_type());
        Ok(callback_slot)
    }
}

impl MethodTransformer for InvokeTransformer {
    fn before_method_insn(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        call: &CallSite,
    ) -> Result<()> {
        if !self.matches(call) {
            return Ok(());
        }
        let parameters = self.call_descriptor.parameters();
        let slots = parameters
            .iter()
            .map(|parameter| writer.allocate_local(parameter.size()))
            .collect::<Result<Vec<u16>>>()?;
        for (parameter, slot) in parameters.iter().zip(&slots).rev() {
            writer.emit(parameter.emit_store(*slot));
        }

        match self.shift {
            Shift::Before => {
                let callback_slot = self.emit_hook(scope, writer, &slots)?;
                scope
                    .callback
                    .emit_call_arguments(writer, callback_slot, parameters, &slots);
            }
            Shift::After => {
                for (parameter, slot) in parameters.iter().zip(&slots) {
                    writer.emit(parameter.emit_load(*slot));
                }
            }
        }
        state.arg_slots = slots;
        Ok(())
    }

    fn after_method_insn(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        call: &CallSite,
    ) -> Result<()> {
        if self.shift == Shift::After && self.matches(call) {
            let slots = std::mem::take(&mut state.arg_slots);
            self.emit_hook(scope, writer, &slots)?;
        }
        Ok(())
    }
}

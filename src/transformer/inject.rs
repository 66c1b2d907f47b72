use anyhow::Result;

use super::{CodeWriter, MethodScope, MethodTransformer, PassState};
use crate::descriptor::synthesize_descriptor;
use crate::ir::Insn;
use crate::opcodes;
use crate::request::{HookRef, InjectAt};

/// Calls a hook at method entry or before every return.
#[derive(Clone, Debug)]
pub(crate) struct InjectTransformer {
    hook: HookRef,
    at: InjectAt,
}

impl InjectTransformer {
    pub(crate) fn new(hook: HookRef, at: InjectAt) -> Self {
        Self { hook, at }
    }

    fn emit_hook(&self, scope: &MethodScope<'_>, writer: &mut CodeWriter) -> Result<()> {
        let receiver = (!scope.is_static()).then_some(scope.owner);
        let descriptor = synthesize_descriptor(
            receiver,
            scope.descriptor.parameters(),
            &scope.callback.descriptor(),
        );
        scope.emit_load_arguments(writer);
        writer.emit(Insn::invoke_static(
            &self.hook.owner,
            &self.hook.name,
            &descriptor,
        ));
        let callback_slot = scope.callback.store_result(writer)?;
        scope
            .callback
            .emit_cancel_check(writer, callback_slot, scope.descriptor.return_type());
        Ok(())
    }
}

impl MethodTransformer for InjectTransformer {
    fn before_code(
        &self,
        scope: &MethodScope<'_>,
        _state: &mut PassState,
        writer: &mut CodeWriter,
    ) -> Result<()> {
        if self.at == InjectAt::Head {
            self.emit_hook(scope, writer)?;
        }
        Ok(())
    }

    fn before_insn(
        &self,
        scope: &MethodScope<'_>,
        _state: &mut PassState,
        writer: &mut CodeWriter,
        opcode: u8,
    ) -> Result<()> {
        if self.at == InjectAt::Return && opcodes::is_return(opcode) {
            self.emit_hook(scope, writer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackLayout;
    use crate::descriptor::MethodDescriptor;
    use crate::ir::CallSite;

    fn hook_calls(insns: &[Insn]) -> Vec<&CallSite> {
        insns
            .iter()
            .filter_map(|insn| match insn {
                Insn::Method(call) if call.owner == "demo/Hooks" => Some(call),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn head_passes_receiver_and_parameters() {
        let descriptor = MethodDescriptor::parse("(I)Ljava/lang/String;").expect("descriptor");
        let callback = CallbackLayout::default();
        let scope = MethodScope {
            owner: "demo/Sample",
            name: "label",
            descriptor: &descriptor,
            access: crate::classfile::ACC_PUBLIC,
            callback: &callback,
        };
        let transformer = InjectTransformer::new(HookRef::new("demo.Hooks", "onLabel"), InjectAt::Head);
        let mut writer = CodeWriter::new(10, 2);
        let mut state = PassState::default();

        transformer
            .before_code(&scope, &mut state, &mut writer)
            .expect("before_code");
        let (insns, _, max_locals) = writer.finish();

        let calls = hook_calls(&insns);
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].descriptor,
            "(Ldemo/Sample;I)Lio/github/brqnko/bytekin/injection/CallbackInfo;"
        );
        assert_eq!(
            insns[3],
            Insn::Var {
                opcode: opcodes::ASTORE,
                slot: 2
            }
        );
        assert_eq!(max_locals, 3);
        assert!(insns.contains(&Insn::Type {
            opcode: opcodes::CHECKCAST,
            class: "java/lang/String".to_string()
        }));
        assert!(insns.contains(&Insn::Simple(opcodes::ARETURN)));
    }

    #[test]
    fn return_fires_only_before_returns() {
        let descriptor = MethodDescriptor::parse("()V").expect("descriptor");
        let callback = CallbackLayout::default();
        let scope = MethodScope {
            owner: "demo/Sample",
            name: "run",
            descriptor: &descriptor,
            access: crate::classfile::ACC_STATIC,
            callback: &callback,
        };
        let transformer = InjectTransformer::new(HookRef::new("demo/Hooks", "onReturn"), InjectAt::Return);
        let mut writer = CodeWriter::new(10, 0);
        let mut state = PassState::default();

        transformer
            .before_code(&scope, &mut state, &mut writer)
            .expect("before_code");
        transformer
            .before_insn(&scope, &mut state, &mut writer, opcodes::IADD)
            .expect("iadd");
        transformer
            .before_insn(&scope, &mut state, &mut writer, opcodes::RETURN)
            .expect("return");
        let (insns, _, _) = writer.finish();

        let calls = hook_calls(&insns);
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].descriptor,
            "()Lio/github/brqnko/bytekin/injection/CallbackInfo;"
        );
    }
}

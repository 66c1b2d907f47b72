use anyhow::{Context, Result};

use super::{CodeWriter, MethodScope, MethodTransformer, PassState};
use crate::descriptor::{MethodDescriptor, TypeDescriptor, synthesize_descriptor};
use crate::ir::{CallKind, CallSite, FieldSite, Insn};
use crate::request::{HookRef, MemberRef, RedirectKind};

/// Replaces one call or field access with a static hook call.
#[derive(Clone, Debug)]
pub(crate) struct RedirectTransformer {
    hook: HookRef,
    kind: RedirectKind,
    member: MemberRef,
    ordinal: Option<usize>,
}

impl RedirectTransformer {
    pub(crate) fn new(
        hook: HookRef,
        kind: RedirectKind,
        member: MemberRef,
        ordinal: Option<usize>,
    ) -> Result<Self> {
        match kind {
            RedirectKind::Method => {
                MethodDescriptor::parse(&member.descriptor)
                    .with_context(|| format!("redirected method {}.{}", member.owner, member.name))?;
            }
            RedirectKind::FieldGet | RedirectKind::FieldSet => {
                TypeDescriptor::parse(&member.descriptor)
                    .with_context(|| format!("redirected field {}.{}", member.owner, member.name))?;
            }
        }
        Ok(Self {
            hook,
            kind,
            member,
            ordinal,
        })
    }

    fn matches(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        owner == self.member.owner && name == self.member.name && descriptor == self.member.descriptor
    }

    /// Count the match and report whether this occurrence is the one to replace.
    fn claim(&self, state: &mut PassState) -> bool {
        let occurrence = state.occurrences;
        state.occurrences += 1;
        if state.applied || occurrence != self.ordinal.unwrap_or(0) {
            return false;
        }
        state.applied = true;
        true
    }

    fn emit_hook(&self, writer: &mut CodeWriter, descriptor: &str) {
        writer.emit(Insn::invoke_static(
            &self.hook.owner,
            &self.hook.name,
            descriptor,
        ));
    }
}

fn method_hook_descriptor(call: &CallSite) -> Result<String> {
    if call.kind == CallKind::Static {
        return Ok(call.descriptor.clone());
    }
    let descriptor = MethodDescriptor::parse(&call.descriptor)?;
    Ok(synthesize_descriptor(
        Some(&call.owner),
        descriptor.parameters(),
        descriptor.return_type().descriptor(),
    ))
}

fn field_hook_descriptor(field: &FieldSite) -> String {
    let receiver = if field.kind.is_static() {
        String::new()
    } else {
        TypeDescriptor::object(&field.owner).descriptor().to_string()
    };
    if field.kind.is_get() {
        format!("({receiver}){}", field.descriptor)
    } else {
        format!("({receiver}{})V", field.descriptor)
    }
}

impl MethodTransformer for RedirectTransformer {
    fn transform_method_insn(
        &self,
        _scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        call: &CallSite,
    ) -> Result<bool> {
        if self.kind != RedirectKind::Method
            || !self.matches(&call.owner, &call.name, &call.descriptor)
            || !self.claim(state)
        {
            return Ok(false);
        }
        self.emit_hook(writer, &method_hook_descriptor(call)?);
        Ok(true)
    }

    fn transform_field_insn(
        &self,
        _scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        field: &FieldSite,
    ) -> Result<bool> {
        let wanted = match self.kind {
            RedirectKind::Method => return Ok(false),
            RedirectKind::FieldGet => field.kind.is_get(),
            RedirectKind::FieldSet => !field.kind.is_get(),
        };
        if !wanted
            || !self.matches(&field.owner, &field.name, &field.descriptor)
            || !self.claim(state)
        {
            return Ok(false);
        }
        self.emit_hook(writer, &field_hook_descriptor(field));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackLayout;
    use crate::classfile::ACC_STATIC;
    use crate::ir::FieldKind;

    fn scope_parts() -> (MethodDescriptor, CallbackLayout) {
        (
            MethodDescriptor::parse("()V").expect("descriptor"),
            CallbackLayout::default(),
        )
    }

    fn call(kind: CallKind) -> CallSite {
        CallSite {
            kind,
            owner: "demo/Target".to_string(),
            name: "compute".to_string(),
            descriptor: "(IJ)Ljava/lang/String;".to_string(),
            interface: false,
        }
    }

    fn field(kind: FieldKind) -> FieldSite {
        FieldSite {
            kind,
            owner: "demo/Target".to_string(),
            name: "count".to_string(),
            descriptor: "I".to_string(),
        }
    }

    #[test]
    fn hook_descriptors_follow_site_shape() {
        assert_eq!(
            method_hook_descriptor(&call(CallKind::Static)).expect("static"),
            "(IJ)Ljava/lang/String;"
        );
        assert_eq!(
            method_hook_descriptor(&call(CallKind::Virtual)).expect("virtual"),
            "(Ldemo/Target;IJ)Ljava/lang/String;"
        );
        assert_eq!(field_hook_descriptor(&field(FieldKind::GetStatic)), "()I");
        assert_eq!(
            field_hook_descriptor(&field(FieldKind::GetField)),
            "(Ldemo/Target;)I"
        );
        assert_eq!(field_hook_descriptor(&field(FieldKind::PutStatic)), "(I)V");
        assert_eq!(
            field_hook_descriptor(&field(FieldKind::PutField)),
            "(Ldemo/Target;I)V"
        );
    }

    #[test]
    fn unset_ordinal_claims_first_match_only() {
        let (descriptor, callback) = scope_parts();
        let scope = MethodScope {
            owner: "demo/Sample",
            name: "run",
            descriptor: &descriptor,
            access: ACC_STATIC,
            callback: &callback,
        };
        let transformer = RedirectTransformer::new(
            HookRef::new("demo/Hooks", "compute"),
            RedirectKind::Method,
            MemberRef::new("demo/Target", "compute", "(IJ)Ljava/lang/String;"),
            None,
        )
        .expect("transformer");
        let mut state = PassState::default();
        let mut writer = CodeWriter::new(0, 0);
        let site = call(CallKind::Virtual);

        let claims: Vec<bool> = (0..3)
            .map(|_| {
                transformer
                    .transform_method_insn(&scope, &mut state, &mut writer, &site)
                    .expect("transform")
            })
            .collect();

        assert_eq!(claims, vec![true, false, false]);
        assert_eq!(state.occurrences, 3);
    }

    #[test]
    fn ordinal_selects_zero_based_match() {
        let (descriptor, callback) = scope_parts();
        let scope = MethodScope {
            owner: "demo/Sample",
            name: "run",
            descriptor: &descriptor,
            access: ACC_STATIC,
            callback: &callback,
        };
        let transformer = RedirectTransformer::new(
            HookRef::new("demo/Hooks", "readCount"),
            RedirectKind::FieldGet,
            MemberRef::new("demo/Target", "count", "I"),
            Some(1),
        )
        .expect("transformer");
        let mut state = PassState::default();
        let mut writer = CodeWriter::new(0, 0);

        let put = transformer
            .transform_field_insn(&scope, &mut state, &mut writer, &field(FieldKind::PutField))
            .expect("put");
        let first = transformer
            .transform_field_insn(&scope, &mut state, &mut writer, &field(FieldKind::GetField))
            .expect("first");
        let second = transformer
            .transform_field_insn(&scope, &mut state, &mut writer, &field(FieldKind::GetField))
            .expect("second");

        assert!(!put);
        assert!(!first);
        assert!(second);
        let (insns, _, _) = writer.finish();
        assert_eq!(
            insns,
            vec![Insn::invoke_static("demo/Hooks", "readCount", "(Ldemo/Target;)I")]
        );
    }
}

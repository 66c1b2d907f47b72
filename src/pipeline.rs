//! Single forward pass over one method's instructions.

use anyhow::Result;

use crate::ir::{Insn, MethodBody};
use crate::opcodes;
use crate::transformer::{CodeWriter, MethodScope, MethodTransformer, PassState, Transformer};

/// Run `transformers` over `body` in list order.
///
/// Call, field, constant and variable instructions go to the first transformer
/// that claims them; unclaimed call and field sites get every before and after
/// hook around the original. Each transformer starts with fresh [`PassState`].
pub(crate) fn rewrite_method(
    body: MethodBody,
    scope: &MethodScope<'_>,
    transformers: &[Transformer],
) -> Result<MethodBody> {
    let mut states = vec![PassState::default(); transformers.len()];
    let arguments = scope.descriptor.argument_slots() + if scope.is_static() { 0 } else { 1 };
    let mut writer = CodeWriter::new(body.next_label, body.max_locals.max(arguments));

    for (transformer, state) in transformers.iter().zip(states.iter_mut()) {
        transformer.before_code(scope, state, &mut writer)?;
    }

    let MethodBody {
        insns,
        handlers,
        line_numbers,
        local_variables,
        local_variable_types,
        ..
    } = body;

    for insn in insns {
        match insn {
            Insn::Simple(opcode) => {
                for (transformer, state) in transformers.iter().zip(states.iter_mut()) {
                    transformer.before_insn(scope, state, &mut writer, opcode)?;
                }
                writer.emit(insn);
            }
            Insn::Method(ref call) => {
                if claim(transformers, &mut states, |transformer, state| {
                    transformer.transform_method_insn(scope, state, &mut writer, call)
                })? {
                    continue;
                }
                for (transformer, state) in transformers.iter().zip(states.iter_mut()) {
                    transformer.before_method_insn(scope, state, &mut writer, call)?;
                }
                writer.emit(insn.clone());
                for (transformer, state) in transformers.iter().zip(states.iter_mut()) {
                    transformer.after_method_insn(scope, state, &mut writer, call)?;
                }
            }
            Insn::Field(ref field) => {
                if claim(transformers, &mut states, |transformer, state| {
                    transformer.transform_field_insn(scope, state, &mut writer, field)
                })? {
                    continue;
                }
                for (transformer, state) in transformers.iter().zip(states.iter_mut()) {
                    transformer.before_field_insn(scope, state, &mut writer, field)?;
                }
                writer.emit(insn.clone());
                for (transformer, state) in transformers.iter().zip(states.iter_mut()) {
                    transformer.after_field_insn(scope, state, &mut writer, field)?;
                }
            }
            Insn::Constant(ref constant) => {
                if !claim(transformers, &mut states, |transformer, state| {
                    transformer.transform_constant(scope, state, &mut writer, constant)
                })? {
                    writer.emit(insn);
                }
            }
            Insn::Var { opcode, slot } if opcode != opcodes::RET => {
                if !claim(transformers, &mut states, |transformer, state| {
                    transformer.transform_var_insn(scope, state, &mut writer, opcode, slot)
                })? {
                    writer.emit(insn);
                }
            }
            other => writer.emit(other),
        }
    }

    let (insns, next_label, max_locals) = writer.finish();
    Ok(MethodBody {
        insns,
        handlers,
        line_numbers,
        local_variables,
        local_variable_types,
        max_locals,
        next_label,
    })
}

/// Offer a site to each transformer in order until one claims it.
fn claim(
    transformers: &[Transformer],
    states: &mut [PassState],
    mut offer: impl FnMut(&Transformer, &mut PassState) -> Result<bool>,
) -> Result<bool> {
    for (transformer, state) in transformers.iter().zip(states.iter_mut()) {
        if offer(transformer, state)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackLayout;
    use crate::classfile::ACC_STATIC;
    use crate::descriptor::MethodDescriptor;
    use crate::ir::{CallKind, CallSite, Constant};
    use crate::request::{ConstantValue, HookRef, InjectAt, MemberRef, RedirectKind, Shift};
    use crate::transformer::{
        ConstantTransformer, InjectTransformer, InvokeTransformer, RedirectTransformer,
    };

    fn body(insns: Vec<Insn>) -> MethodBody {
        MethodBody {
            insns,
            handlers: Vec::new(),
            line_numbers: Vec::new(),
            local_variables: Vec::new(),
            local_variable_types: Vec::new(),
            max_locals: 0,
            next_label: 100,
        }
    }

    fn target_call() -> Insn {
        Insn::Method(CallSite {
            kind: CallKind::Static,
            owner: "demo/Target".to_string(),
            name: "compute".to_string(),
            descriptor: "()I".to_string(),
            interface: false,
        })
    }

    fn rewrite(insns: Vec<Insn>, transformers: &[Transformer]) -> MethodBody {
        let descriptor = MethodDescriptor::parse("()V").expect("descriptor");
        let callback = CallbackLayout::default();
        let scope = MethodScope {
            owner: "demo/Sample",
            name: "run",
            descriptor: &descriptor,
            access: ACC_STATIC,
            callback: &callback,
        };
        rewrite_method(body(insns), &scope, transformers).expect("rewrite")
    }

    fn redirect() -> Transformer {
        Transformer::Redirect(
            RedirectTransformer::new(
                HookRef::new("demo/Hooks", "compute"),
                RedirectKind::Method,
                MemberRef::new("demo/Target", "compute", "()I"),
                None,
            )
            .expect("redirect"),
        )
    }

    fn invoke() -> Transformer {
        Transformer::Invoke(
            InvokeTransformer::new(
                HookRef::new("demo/Hooks", "around"),
                MemberRef::new("demo/Target", "compute", "()I"),
                Shift::Before,
            )
            .expect("invoke"),
        )
    }

    fn count_calls(body: &MethodBody, name: &str) -> usize {
        body.insns
            .iter()
            .filter(|insn| matches!(insn, Insn::Method(call) if call.name == name))
            .count()
    }

    #[test]
    fn empty_transformer_list_keeps_instructions() {
        let insns = vec![
            Insn::Constant(Constant::Int(1)),
            Insn::Var {
                opcode: opcodes::ISTORE,
                slot: 0,
            },
            Insn::Simple(opcodes::RETURN),
        ];

        let rewritten = rewrite(insns.clone(), &[]);

        assert_eq!(rewritten.insns, insns);
        assert_eq!(rewritten.next_label, 100);
    }

    #[test]
    fn claimed_site_skips_later_transformers_and_hooks() {
        let rewritten = rewrite(
            vec![target_call(), Insn::Simple(opcodes::POP), Insn::Simple(opcodes::RETURN)],
            &[redirect(), invoke()],
        );

        assert_eq!(count_calls(&rewritten, "compute"), 1);
        assert_eq!(count_calls(&rewritten, "around"), 0);
        assert!(matches!(&rewritten.insns[0], Insn::Method(call) if call.owner == "demo/Hooks"));
    }

    #[test]
    fn unclaimed_site_gets_before_hooks() {
        let rewritten = rewrite(
            vec![target_call(), Insn::Simple(opcodes::POP), Insn::Simple(opcodes::RETURN)],
            &[invoke()],
        );

        assert_eq!(count_calls(&rewritten, "around"), 1);
        assert_eq!(count_calls(&rewritten, "compute"), 1);
        assert!(rewritten.max_locals >= 1);
    }

    #[test]
    fn return_hooks_fire_at_each_return() {
        let inject = Transformer::Inject(InjectTransformer::new(
            HookRef::new("demo/Hooks", "onReturn"),
            InjectAt::Return,
        ));
        let target = crate::ir::Label(1);
        let rewritten = rewrite(
            vec![
                Insn::Constant(Constant::Int(0)),
                Insn::Jump {
                    opcode: opcodes::IFEQ,
                    target,
                },
                Insn::Simple(opcodes::RETURN),
                Insn::Label(target),
                Insn::Simple(opcodes::RETURN),
            ],
            &[inject],
        );

        assert_eq!(count_calls(&rewritten, "onReturn"), 2);
    }

    #[test]
    fn each_visit_starts_from_fresh_counters() {
        let constant = Transformer::ModifyConstant(
            ConstantTransformer::new(HookRef::new("demo/Hooks", "swap"), &ConstantValue::Int(9), Some(0))
                .expect("constant"),
        );
        let insns = vec![
            Insn::Constant(Constant::Int(9)),
            Insn::Simple(opcodes::POP),
            Insn::Simple(opcodes::RETURN),
        ];
        let transformers = [constant];

        let first = rewrite(insns.clone(), &transformers);
        let second = rewrite(insns, &transformers);

        assert_eq!(count_calls(&first, "swap"), 1);
        assert_eq!(count_calls(&second, "swap"), 1);
    }
}

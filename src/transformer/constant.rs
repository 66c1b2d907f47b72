use anyhow::Result;

use super::{CodeWriter, MethodScope, MethodTransformer, PassState};
use crate::error::WeaveError;
use crate::ir::{Constant, Insn};
use crate::request::{ConstantValue, HookRef};

/// Passes matching literal pushes through a `(T)T` hook.
#[derive(Clone, Debug)]
pub(crate) struct ConstantTransformer {
    hook: HookRef,
    target: Constant,
    hook_descriptor: String,
    ordinal: Option<usize>,
}

impl ConstantTransformer {
    pub(crate) fn new(hook: HookRef, value: &ConstantValue, ordinal: Option<usize>) -> Result<Self> {
        let (target, descriptor) = normalize(value)?;
        Ok(Self {
            hook,
            target,
            hook_descriptor: format!("({descriptor}){descriptor}"),
            ordinal,
        })
    }
}

/// Literal as the JVM pushes it, plus the value descriptor the hook sees.
fn normalize(value: &ConstantValue) -> Result<(Constant, &'static str)> {
    let normalized = match value {
        ConstantValue::Int(value) => (Constant::Int(*value), "I"),
        ConstantValue::Short(value) => (Constant::Int(i32::from(*value)), "I"),
        ConstantValue::Byte(value) => (Constant::Int(i32::from(*value)), "I"),
        ConstantValue::Boolean(value) => (Constant::Int(i32::from(*value)), "I"),
        ConstantValue::Char(value) => {
            let code = u32::from(*value);
            if code > 0xffff {
                return Err(WeaveError::UnsupportedConstant(format!(
                    "char {value:?} outside the basic multilingual plane"
                ))
                .into());
            }
            (Constant::Int(code as i32), "C")
        }
        ConstantValue::Long(value) => (Constant::Long(*value), "J"),
        ConstantValue::Float(value) => (Constant::Float(*value), "F"),
        ConstantValue::Double(value) => (Constant::Double(*value), "D"),
        ConstantValue::String(value) => (Constant::String(value.clone()), "Ljava/lang/String;"),
        ConstantValue::Null => {
            return Err(WeaveError::UnsupportedConstant("null".to_string()).into());
        }
        ConstantValue::Class(name) => {
            return Err(WeaveError::UnsupportedConstant(format!("class literal {name}")).into());
        }
    };
    Ok(normalized)
}

impl MethodTransformer for ConstantTransformer {
    fn transform_constant(
        &self,
        _scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        constant: &Constant,
    ) -> Result<bool> {
        if !constant.same_value(&self.target) {
            return Ok(false);
        }
        let occurrence = state.occurrences;
        state.occurrences += 1;
        if self.ordinal.is_some_and(|ordinal| ordinal != occurrence) {
            return Ok(false);
        }
        writer.emit(Insn::Constant(constant.clone()));
        writer.emit(Insn::invoke_static(
            &self.hook.owner,
            &self.hook.name,
            &self.hook_descriptor,
        ));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackLayout;
    use crate::classfile::ACC_STATIC;
    use crate::descriptor::MethodDescriptor;

    fn apply(transformer: &ConstantTransformer, constants: &[Constant]) -> (Vec<bool>, Vec<Insn>) {
        let descriptor = MethodDescriptor::parse("()V").expect("descriptor");
        let callback = CallbackLayout::default();
        let scope = MethodScope {
            owner: "demo/Sample",
            name: "run",
            descriptor: &descriptor,
            access: ACC_STATIC,
            callback: &callback,
        };
        let mut state = PassState::default();
        let mut writer = CodeWriter::new(0, 0);
        let claims = constants
            .iter()
            .map(|constant| {
                transformer
                    .transform_constant(&scope, &mut state, &mut writer, constant)
                    .expect("transform")
            })
            .collect();
        (claims, writer.finish().0)
    }

    fn hook() -> HookRef {
        HookRef::new("demo/Hooks", "swap")
    }

    #[test]
    fn unset_ordinal_wraps_every_match() {
        let transformer =
            ConstantTransformer::new(hook(), &ConstantValue::Int(7), None).expect("transformer");

        let (claims, insns) = apply(
            &transformer,
            &[Constant::Int(7), Constant::Int(8), Constant::Int(7), Constant::Int(7)],
        );

        assert_eq!(claims, vec![true, false, true, true]);
        assert_eq!(insns.len(), 6);
        assert_eq!(insns[1], Insn::invoke_static("demo/Hooks", "swap", "(I)I"));
    }

    #[test]
    fn ordinal_wraps_only_that_match() {
        let transformer = ConstantTransformer::new(hook(), &ConstantValue::String("hi".to_string()), Some(1))
            .expect("transformer");
        let hi = Constant::String("hi".to_string());

        let (claims, insns) = apply(&transformer, &[hi.clone(), hi.clone(), hi]);

        assert_eq!(claims, vec![false, true, false]);
        assert_eq!(
            insns[1],
            Insn::invoke_static("demo/Hooks", "swap", "(Ljava/lang/String;)Ljava/lang/String;")
        );
    }

    #[test]
    fn floating_point_matches_by_bits() {
        let transformer =
            ConstantTransformer::new(hook(), &ConstantValue::Double(0.0), None).expect("transformer");

        let (claims, _) = apply(&transformer, &[Constant::Double(-0.0), Constant::Double(0.0)]);

        assert_eq!(claims, vec![false, true]);
    }

    #[test]
    fn narrow_kinds_match_int_pushes() {
        let transformer =
            ConstantTransformer::new(hook(), &ConstantValue::Char('A'), None).expect("transformer");

        let (claims, insns) = apply(&transformer, &[Constant::Int(65)]);

        assert_eq!(claims, vec![true]);
        assert_eq!(insns[1], Insn::invoke_static("demo/Hooks", "swap", "(C)C"));
        let boolean = ConstantTransformer::new(hook(), &ConstantValue::Boolean(true), None)
            .expect("transformer");
        assert_eq!(apply(&boolean, &[Constant::Int(1)]).0, vec![true]);
    }

    #[test]
    fn null_and_class_literals_are_rejected() {
        for value in [ConstantValue::Null, ConstantValue::Class("a/B".to_string())] {
            let error = ConstantTransformer::new(hook(), &value, None).expect_err("unsupported");
            assert!(matches!(
                error.downcast_ref::<WeaveError>(),
                Some(WeaveError::UnsupportedConstant(_))
            ));
        }
    }
}

//! Per-class table of method transformers and the class-level rewrite driver.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::assemble::{AssembleContext, assemble_method};
use crate::callback::CallbackLayout;
use crate::classfile::code::CodeAttribute;
use crate::classfile::{ACC_ABSTRACT, ACC_NATIVE, ClassFile};
use crate::decode::decode_method;
use crate::descriptor::{MethodDescriptor, MethodSignature};
use crate::hierarchy::{ClassHierarchy, ClassScopedHierarchy, DefaultHierarchy, LayeredHierarchy};
use crate::pipeline::rewrite_method;
use crate::transformer::{MethodScope, Transformer};

/// Transformers of one class keyed by method (name, descriptor).
///
/// Immutable once built; one table may rewrite many copies of its class
/// concurrently.
#[derive(Clone)]
pub struct ClassDispatchTable {
    class_name: String,
    methods: HashMap<MethodSignature, Vec<Transformer>>,
    callback: CallbackLayout,
    hierarchy: Arc<dyn ClassHierarchy>,
}

impl std::fmt::Debug for ClassDispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDispatchTable")
            .field("class_name", &self.class_name)
            .field("methods", &self.methods)
            .field("callback", &self.callback)
            .finish_non_exhaustive()
    }
}

impl ClassDispatchTable {
    pub(crate) fn new(
        class_name: &str,
        callback: CallbackLayout,
        hierarchy: Arc<dyn ClassHierarchy>,
    ) -> Self {
        Self {
            class_name: class_name.to_string(),
            methods: HashMap::new(),
            callback,
            hierarchy,
        }
    }

    pub(crate) fn add(&mut self, signature: MethodSignature, transformer: Transformer) {
        self.methods.entry(signature).or_default().push(transformer);
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Methods with at least one transformer, sorted.
    pub fn signatures(&self) -> Vec<&MethodSignature> {
        let mut signatures: Vec<_> = self.methods.keys().collect();
        signatures.sort();
        signatures
    }

    /// Number of transformers registered for `signature`.
    pub fn transformer_count(&self, signature: &MethodSignature) -> usize {
        self.methods.get(signature).map_or(0, Vec::len)
    }

    /// Rewrite every registered method of the class in `bytes`.
    pub fn transform(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        self.transform_with_report(bytes).map(|(bytes, _)| bytes)
    }

    /// Like [`transform`](Self::transform), also returning the rewritten methods.
    /// Input bytes come back unchanged when no method was rewritten.
    pub fn transform_with_report(&self, bytes: &[u8]) -> Result<(Vec<u8>, Vec<MethodSignature>)> {
        self.transform_with_classes(bytes, &DefaultHierarchy::empty())
    }

    /// Like [`transform_with_report`](Self::transform_with_report), resolving
    /// superclasses through `classes` before the table's own hierarchy.
    pub fn transform_with_classes(
        &self,
        bytes: &[u8],
        classes: &dyn ClassHierarchy,
    ) -> Result<(Vec<u8>, Vec<MethodSignature>)> {
        if self.methods.is_empty() {
            return Ok((bytes.to_vec(), Vec::new()));
        }
        let mut class = ClassFile::parse(bytes).context("parse class file")?;
        let class_name = class.name()?;
        let super_name = class.super_name()?;
        let layered = LayeredHierarchy {
            first: classes,
            second: self.hierarchy.as_ref(),
        };
        let hierarchy = ClassScopedHierarchy {
            name: &class_name,
            super_name: super_name.as_deref(),
            is_interface: class.is_interface(),
            fallback: &layered,
        };

        let mut rewritten = Vec::new();
        for index in 0..class.methods.len() {
            let method = &class.methods[index];
            let name = class.member_name(method)?;
            let descriptor = class.member_descriptor(method)?;
            let signature = MethodSignature::new(name, descriptor);
            let Some(transformers) = self.methods.get(&signature) else {
                continue;
            };
            if method.access_flags & (ACC_ABSTRACT | ACC_NATIVE) != 0 {
                debug!(class = %class_name, method = %signature, "skipping method without code");
                continue;
            }
            let Some(code_index) = class.find_attribute(&method.attributes, "Code") else {
                continue;
            };
            let access = method.access_flags;

            let code = CodeAttribute::parse(&class.methods[index].attributes[code_index].info)
                .with_context(|| format!("parse Code of {class_name}.{signature}"))?;
            let body = decode_method(&code, &class.constant_pool)
                .with_context(|| format!("decode {class_name}.{signature}"))?;
            let method_descriptor = MethodDescriptor::parse(&signature.descriptor)?;
            let scope = MethodScope {
                owner: &class_name,
                name: &signature.name,
                descriptor: &method_descriptor,
                access,
                callback: &self.callback,
            };
            let body = rewrite_method(body, &scope, transformers)
                .with_context(|| format!("rewrite {class_name}.{signature}"))?;
            let context = AssembleContext {
                owner: &class_name,
                name: &signature.name,
                descriptor: &method_descriptor,
                is_static: scope.is_static(),
                major_version: class.major_version,
                hierarchy: &hierarchy,
            };
            let code = assemble_method(&body, &mut class.constant_pool, &context)
                .with_context(|| format!("assemble {class_name}.{signature}"))?;
            class.methods[index].attributes[code_index].info = code.to_bytes();
            debug!(
                class = %class_name,
                method = %signature,
                transformers = transformers.len(),
                "rewrote method"
            );
            rewritten.push(signature);
        }

        if rewritten.is_empty() {
            return Ok((bytes.to_vec(), rewritten));
        }
        Ok((class.to_bytes(), rewritten))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{ACC_PUBLIC, ACC_STATIC};
    use crate::fixtures::ClassBuilder;
    use crate::hierarchy::DefaultHierarchy;
    use crate::ir::{Constant, Insn};
    use crate::opcodes;
    use crate::request::{ConstantValue, HookRef};
    use crate::transformer::ConstantTransformer;

    fn table() -> ClassDispatchTable {
        ClassDispatchTable::new(
            "demo/Sample",
            CallbackLayout::default(),
            Arc::new(DefaultHierarchy::new()),
        )
    }

    fn sample() -> Vec<u8> {
        ClassBuilder::new("demo/Sample")
            .method(
                "answer",
                "()I",
                ACC_PUBLIC | ACC_STATIC,
                vec![
                    Insn::Constant(Constant::Int(42)),
                    Insn::Simple(opcodes::IRETURN),
                ],
            )
            .method(
                "other",
                "()I",
                ACC_PUBLIC | ACC_STATIC,
                vec![
                    Insn::Constant(Constant::Int(42)),
                    Insn::Simple(opcodes::IRETURN),
                ],
            )
            .build()
    }

    fn swap_constant() -> Transformer {
        Transformer::ModifyConstant(
            ConstantTransformer::new(HookRef::new("demo/Hooks", "swap"), &ConstantValue::Int(42), None)
                .expect("transformer"),
        )
    }

    #[test]
    fn empty_table_returns_input() {
        let bytes = sample();

        let output = table().transform(&bytes).expect("transform");

        assert_eq!(output, bytes);
    }

    #[test]
    fn unmatched_signature_returns_input() {
        let bytes = sample();
        let mut table = table();
        table.add(MethodSignature::new("missing", "()V"), swap_constant());

        let (output, rewritten) = table.transform_with_report(&bytes).expect("transform");

        assert_eq!(output, bytes);
        assert!(rewritten.is_empty());
    }

    #[test]
    fn only_registered_method_changes() {
        let bytes = sample();
        let mut table = table();
        table.add(MethodSignature::new("answer", "()I"), swap_constant());

        let (output, rewritten) = table.transform_with_report(&bytes).expect("transform");

        assert_eq!(rewritten, vec![MethodSignature::new("answer", "()I")]);
        let before = ClassFile::parse(&bytes).expect("before");
        let after = ClassFile::parse(&output).expect("after");
        assert_eq!(before.methods[1].attributes, after.methods[1].attributes);
        assert_ne!(before.methods[0].attributes, after.methods[0].attributes);
        assert!(jclassfile::class_file::parse(&output).is_ok());
    }

    #[test]
    fn signatures_are_sorted() {
        let mut table = table();
        table.add(MethodSignature::new("b", "()V"), swap_constant());
        table.add(MethodSignature::new("a", "()V"), swap_constant());
        table.add(MethodSignature::new("a", "()V"), swap_constant());

        let names: Vec<_> = table.signatures().into_iter().map(|s| s.name.as_str()).collect();

        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(table.transformer_count(&MethodSignature::new("a", "()V")), 2);
    }
}

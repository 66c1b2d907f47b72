//! Binding of symbolic modification requests to per-class dispatch tables.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::callback::CallbackLayout;
use crate::descriptor::{MethodSignature, internal_name};
use crate::dispatch::ClassDispatchTable;
use crate::hierarchy::{ClassHierarchy, DefaultHierarchy};
use crate::logging::{Logger, TracingLogger};
use crate::mapping::{IdentityMapping, MappingProvider};
use crate::request::{
    ClassDefinition, ConstantModification, DeclarationSource, HookRef, Injection, Invocation, MemberRef,
    MethodTarget, ModificationRequest, RedirectKind, RedirectRequest, VariableModification,
};
use crate::transformer::{
    ConstantTransformer, InjectTransformer, InvokeTransformer, RedirectTransformer, Transformer,
    VariableOptions, VariableTransformer,
};

/// Dispatch tables for every class with at least one registered modification.
#[derive(Clone, Debug, Default)]
pub struct TransformRegistry {
    tables: HashMap<String, ClassDispatchTable>,
}

impl TransformRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Rewrite `bytes` of `class_name`; classes without a table come back unchanged.
    pub fn transform(&self, class_name: &str, bytes: &[u8]) -> Result<Vec<u8>> {
        self.transform_with_report(class_name, bytes)
            .map(|(bytes, _)| bytes)
    }

    pub fn transform_with_report(
        &self,
        class_name: &str,
        bytes: &[u8],
    ) -> Result<(Vec<u8>, Vec<MethodSignature>)> {
        self.transform_with_classes(class_name, bytes, &DefaultHierarchy::empty())
    }

    /// Rewrite with `classes` (typically the classes of the same jar or
    /// directory) consulted first when merging reference types.
    pub fn transform_with_classes(
        &self,
        class_name: &str,
        bytes: &[u8],
        classes: &dyn ClassHierarchy,
    ) -> Result<(Vec<u8>, Vec<MethodSignature>)> {
        match self.table(class_name) {
            Some(table) => table
                .transform_with_classes(bytes, classes)
                .with_context(|| format!("transform {}", internal_name(class_name))),
            None => Ok((bytes.to_vec(), Vec::new())),
        }
    }

    /// Dispatch table for a class given in dotted or internal form.
    pub fn table(&self, class_name: &str) -> Option<&ClassDispatchTable> {
        self.tables.get(&internal_name(class_name))
    }

    /// Registered class names in internal form, sorted.
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Collects requests, then resolves them through the mapping provider in
/// [`build`](Self::build).
pub struct RegistryBuilder {
    mapping: Box<dyn MappingProvider>,
    logger: Arc<dyn Logger>,
    hierarchy: Arc<dyn ClassHierarchy>,
    callback: CallbackLayout,
    registrations: Vec<Registration>,
}

enum Registration {
    Definition(ClassDefinition),
    Request(ModificationRequest),
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            mapping: Box::new(IdentityMapping),
            logger: Arc::new(TracingLogger),
            hierarchy: Arc::new(DefaultHierarchy::new()),
            callback: CallbackLayout::default(),
            registrations: Vec::new(),
        }
    }
}

impl RegistryBuilder {
    pub fn mapping(mut self, mapping: Box<dyn MappingProvider>) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn hierarchy(mut self, hierarchy: Arc<dyn ClassHierarchy>) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    pub fn callback(mut self, callback: CallbackLayout) -> Self {
        self.callback = callback;
        self
    }

    /// Register one hook container. When two definitions target the same
    /// runtime class after mapping, the earlier one wins and the later one is
    /// skipped with a warning in [`build`](Self::build).
    pub fn definition(mut self, definition: ClassDefinition) -> Self {
        self.registrations.push(Registration::Definition(definition));
        self
    }

    pub fn definitions(self, source: &dyn DeclarationSource) -> Result<Self> {
        let definitions = source.definitions().context("load class definitions")?;
        Ok(definitions
            .into_iter()
            .fold(self, |builder, definition| builder.definition(definition)))
    }

    pub fn inject(self, injection: Injection) -> Self {
        self.request(ModificationRequest::Inject(injection))
    }

    pub fn invoke(self, invocation: Invocation) -> Self {
        self.request(ModificationRequest::Invoke(invocation))
    }

    pub fn redirect(self, redirect: RedirectRequest) -> Self {
        self.request(ModificationRequest::Redirect(redirect))
    }

    pub fn modify_constant(self, modification: ConstantModification) -> Self {
        self.request(ModificationRequest::ModifyConstant(modification))
    }

    pub fn modify_variable(self, modification: VariableModification) -> Self {
        self.request(ModificationRequest::ModifyVariable(modification))
    }

    pub fn request(mut self, request: ModificationRequest) -> Self {
        self.registrations.push(Registration::Request(request));
        self
    }

    /// Resolve every request and build one transformer per request, in
    /// registration order.
    pub fn build(self) -> Result<TransformRegistry> {
        let resolver = Resolver {
            mapping: self.mapping.as_ref(),
            logger: self.logger.as_ref(),
        };
        let mut defined_classes = HashSet::new();
        let mut requests = Vec::new();
        for registration in &self.registrations {
            match registration {
                Registration::Request(request) => requests.push(request),
                Registration::Definition(definition) => {
                    let target = resolver.runtime_class(&definition.target_class);
                    if !defined_classes.insert(target.clone()) {
                        self.logger.log(&format!(
                            "class {} is already defined; skipping definition from {}",
                            target,
                            internal_name(&definition.hook_class)
                        ));
                        continue;
                    }
                    requests.extend(&definition.requests);
                }
            }
        }

        let mut tables: HashMap<String, ClassDispatchTable> = HashMap::new();
        for request in requests {
            let target = resolver.method_target(request.target());
            let transformer = resolver
                .transformer(request)
                .with_context(|| {
                    format!(
                        "build {} transformer for {}.{}{}",
                        request.kind_name(),
                        target.class,
                        target.name,
                        target.descriptor
                    )
                })?;
            debug!(
                class = %target.class,
                method = %target.name,
                kind = transformer.kind_name(),
                "registered transformer"
            );
            tables
                .entry(target.class.clone())
                .or_insert_with(|| {
                    ClassDispatchTable::new(
                        &target.class,
                        self.callback.clone(),
                        Arc::clone(&self.hierarchy),
                    )
                })
                .add(MethodSignature::new(target.name, target.descriptor), transformer);
        }
        Ok(TransformRegistry { tables })
    }
}

struct Resolver<'a> {
    mapping: &'a dyn MappingProvider,
    logger: &'a dyn Logger,
}

impl Resolver<'_> {
    fn resolved(&self, what: &str, symbolic: &str, value: Option<String>) -> String {
        value.unwrap_or_else(|| {
            self.logger
                .log(&format!("no mapping for {what} {symbolic}; using it unchanged"));
            symbolic.to_string()
        })
    }

    /// Mapped class name without the unresolved-name warning.
    fn runtime_class(&self, name: &str) -> String {
        let name = internal_name(name);
        match self.mapping.class_name(&name) {
            Some(mapped) => internal_name(&mapped),
            None => name,
        }
    }

    fn class(&self, name: &str) -> String {
        let name = internal_name(name);
        let mapped = self.mapping.class_name(&name);
        internal_name(&self.resolved("class", &name, mapped))
    }

    fn method_target(&self, target: &MethodTarget) -> MethodTarget {
        let owner = internal_name(&target.class);
        let name = self
            .mapping
            .method_name(&owner, &target.name, &target.descriptor);
        let descriptor = self
            .mapping
            .method_descriptor(&owner, &target.name, &target.descriptor);
        MethodTarget {
            class: self.class(&owner),
            name: self.resolved("method", &format!("{owner}.{}", target.name), name),
            descriptor: self.resolved(
                "method descriptor",
                &format!("{owner}.{}{}", target.name, target.descriptor),
                descriptor,
            ),
        }
    }

    fn method_member(&self, member: &MemberRef) -> MemberRef {
        let target = self.method_target(&MethodTarget {
            class: member.owner.clone(),
            name: member.name.clone(),
            descriptor: member.descriptor.clone(),
        });
        MemberRef {
            owner: target.class,
            name: target.name,
            descriptor: target.descriptor,
        }
    }

    fn field_member(&self, member: &MemberRef) -> MemberRef {
        let owner = internal_name(&member.owner);
        let name = self
            .mapping
            .field_name(&owner, &member.name, &member.descriptor);
        let descriptor = self
            .mapping
            .field_descriptor(&owner, &member.name, &member.descriptor);
        MemberRef {
            owner: self.class(&owner),
            name: self.resolved("field", &format!("{owner}.{}", member.name), name),
            descriptor: self.resolved(
                "field descriptor",
                &format!("{owner}.{}:{}", member.name, member.descriptor),
                descriptor,
            ),
        }
    }

    fn transformer(&self, request: &ModificationRequest) -> Result<Transformer> {
        let transformer = match request {
            ModificationRequest::Inject(request) => Transformer::Inject(InjectTransformer::new(
                hook(&request.hook),
                request.at,
            )),
            ModificationRequest::Invoke(request) => Transformer::Invoke(InvokeTransformer::new(
                hook(&request.hook),
                self.method_member(&request.call),
                request.shift,
            )?),
            ModificationRequest::Redirect(request) => {
                let member = match request.kind {
                    RedirectKind::Method => self.method_member(&request.member),
                    RedirectKind::FieldGet | RedirectKind::FieldSet => {
                        self.field_member(&request.member)
                    }
                };
                Transformer::Redirect(RedirectTransformer::new(
                    hook(&request.hook),
                    request.kind,
                    member,
                    request.ordinal,
                )?)
            }
            ModificationRequest::ModifyConstant(request) => {
                Transformer::ModifyConstant(ConstantTransformer::new(
                    hook(&request.hook),
                    &request.constant,
                    request.ordinal,
                )?)
            }
            ModificationRequest::ModifyVariable(request) => {
                Transformer::ModifyVariable(VariableTransformer::new(
                    hook(&request.hook),
                    VariableOptions {
                        at: request.at,
                        ordinal: request.ordinal,
                        index: request.index,
                        variable_descriptor: request.variable_descriptor.clone(),
                        args_only: request.args_only,
                        capture_self: request.capture_self,
                    },
                )?)
            }
        };
        Ok(transformer)
    }
}

/// Hook owners name user code and are never remapped.
fn hook(hook: &HookRef) -> HookRef {
    HookRef::new(&hook.owner, &hook.name)
}

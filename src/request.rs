//! Symbolic modification requests, before mapping resolution.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::descriptor::internal_name;

/// Method whose body is rewritten.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodTarget {
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodTarget {
    pub fn new(class: &str, name: &str, descriptor: &str) -> Self {
        Self {
            class: internal_name(class),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

/// Static routine invoked by the rewritten code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRef {
    pub owner: String,
    pub name: String,
}

impl HookRef {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: internal_name(owner),
            name: name.to_string(),
        }
    }
}

/// Method or field referenced by an instruction inside the target body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MemberRef {
    pub fn new(owner: &str, name: &str, descriptor: &str) -> Self {
        Self {
            owner: internal_name(owner),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectAt {
    Head,
    Return,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shift {
    Before,
    After,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectKind {
    Method,
    FieldGet,
    FieldSet,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableAt {
    Head,
    Store,
}

/// Literal matched by a constant modification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantValue {
    Int(i32),
    Short(i16),
    Byte(i8),
    Boolean(bool),
    Char(char),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Null,
    Class(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Injection {
    pub target: MethodTarget,
    pub hook: HookRef,
    pub at: InjectAt,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub target: MethodTarget,
    pub hook: HookRef,
    pub call: MemberRef,
    pub shift: Shift,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RedirectRequest {
    pub target: MethodTarget,
    pub hook: HookRef,
    pub kind: RedirectKind,
    pub member: MemberRef,
    #[serde(default)]
    pub ordinal: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstantModification {
    pub target: MethodTarget,
    pub hook: HookRef,
    pub constant: ConstantValue,
    #[serde(default)]
    pub ordinal: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableModification {
    pub target: MethodTarget,
    pub hook: HookRef,
    pub at: VariableAt,
    #[serde(default)]
    pub ordinal: Option<usize>,
    #[serde(default)]
    pub index: Option<u16>,
    #[serde(default)]
    pub variable_descriptor: Option<String>,
    #[serde(default = "default_args_only")]
    pub args_only: bool,
    #[serde(default)]
    pub capture_self: bool,
}

fn default_args_only() -> bool {
    true
}

/// One requested rewrite of one target method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModificationRequest {
    Inject(Injection),
    Invoke(Invocation),
    Redirect(RedirectRequest),
    ModifyConstant(ConstantModification),
    ModifyVariable(VariableModification),
}

impl ModificationRequest {
    pub fn target(&self) -> &MethodTarget {
        match self {
            ModificationRequest::Inject(request) => &request.target,
            ModificationRequest::Invoke(request) => &request.target,
            ModificationRequest::Redirect(request) => &request.target,
            ModificationRequest::ModifyConstant(request) => &request.target,
            ModificationRequest::ModifyVariable(request) => &request.target,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ModificationRequest::Inject(_) => "inject",
            ModificationRequest::Invoke(_) => "invoke",
            ModificationRequest::Redirect(_) => "redirect",
            ModificationRequest::ModifyConstant(_) => "modify_constant",
            ModificationRequest::ModifyVariable(_) => "modify_variable",
        }
    }
}

/// Every modification one hook container declares against one target class.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassDefinition {
    pub target_class: String,
    pub hook_class: String,
    pub requests: Vec<ModificationRequest>,
}

/// Supplies class definitions for the declarative registration path.
pub trait DeclarationSource {
    fn definitions(&self) -> Result<Vec<ClassDefinition>>;
}

impl DeclarationSource for Vec<ClassDefinition> {
    fn definitions(&self) -> Result<Vec<ClassDefinition>> {
        Ok(self.clone())
    }
}

//! JSON configuration: mappings, hierarchy hints and declarative hook definitions.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use jsonschema::JSONSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::callback::CallbackLayout;
use crate::descriptor::internal_name;
use crate::hierarchy::DefaultHierarchy;
use crate::mapping::{IdentityMapping, MappingProvider, TableMapping};
use crate::registry::RegistryBuilder;
use crate::request::{
    ClassDefinition, ConstantModification, ConstantValue, DeclarationSource, HookRef, InjectAt,
    Injection, Invocation, MemberRef, MethodTarget, ModificationRequest, RedirectKind,
    RedirectRequest, Shift, VariableAt, VariableModification,
};

const SCHEMA: &str = include_str!("../schema/weave-config.schema.json");

/// Parsed configuration file.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WeaveConfig {
    #[serde(default)]
    pub callback_class: Option<String>,
    #[serde(default)]
    pub mappings: Option<TableMapping>,
    /// `class -> superclass` entries for stack map merging.
    #[serde(default)]
    pub hierarchy: BTreeMap<String, String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub definitions: Vec<DefinitionConfig>,
}

/// One hook container and the modifications it declares against `target`.
#[derive(Clone, Debug, Deserialize)]
pub struct DefinitionConfig {
    pub target: String,
    pub hooks: String,
    pub modifications: Vec<ModificationConfig>,
}

/// Fields every modification carries.
#[derive(Clone, Debug, Deserialize)]
pub struct HookSite {
    pub method: String,
    pub descriptor: String,
    pub hook: String,
    #[serde(default)]
    pub hook_owner: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModificationConfig {
    Inject {
        #[serde(flatten)]
        site: HookSite,
        at: InjectAt,
    },
    Invoke {
        #[serde(flatten)]
        site: HookSite,
        call_owner: String,
        call_name: String,
        call_descriptor: String,
        shift: Shift,
    },
    Redirect {
        #[serde(flatten)]
        site: HookSite,
        #[serde(rename = "type")]
        redirect_type: RedirectKind,
        owner: String,
        name: String,
        member_descriptor: String,
        #[serde(default)]
        ordinal: Option<usize>,
    },
    ModifyConstant {
        #[serde(flatten)]
        site: HookSite,
        constant: ConstantValue,
        #[serde(default)]
        ordinal: Option<usize>,
    },
    ModifyVariable {
        #[serde(flatten)]
        site: HookSite,
        target: VariableAt,
        #[serde(default)]
        ordinal: Option<usize>,
        #[serde(default)]
        index: Option<u16>,
        #[serde(default)]
        variable_descriptor: Option<String>,
        #[serde(default = "default_args_only")]
        args_only: bool,
        #[serde(default)]
        capture_self: bool,
    },
}

fn default_args_only() -> bool {
    true
}

impl WeaveConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("invalid configuration {}", path.display()))
    }

    /// Parse and validate against the embedded schema before deserializing.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).context("failed to parse configuration JSON")?;
        validate(&value)?;
        serde_json::from_value(value).context("failed to deserialize configuration")
    }

    pub fn callback_layout(&self) -> CallbackLayout {
        self.callback_class
            .as_deref()
            .map(CallbackLayout::new)
            .unwrap_or_default()
    }

    pub fn class_hierarchy(&self) -> DefaultHierarchy {
        let mut hierarchy = DefaultHierarchy::new();
        for (name, super_name) in &self.hierarchy {
            hierarchy.insert(name, super_name);
        }
        for name in &self.interfaces {
            hierarchy.insert_interface(name);
        }
        hierarchy
    }

    pub fn mapping(&self) -> Box<dyn MappingProvider> {
        match &self.mappings {
            Some(table) => Box::new(table.clone().normalized()),
            None => Box::new(IdentityMapping),
        }
    }

    /// Builder carrying this configuration's mapping, hierarchy, callback layout
    /// and definitions. Explicit requests may still be added.
    pub fn registry_builder(&self) -> Result<RegistryBuilder> {
        RegistryBuilder::default()
            .mapping(self.mapping())
            .hierarchy(Arc::new(self.class_hierarchy()))
            .callback(self.callback_layout())
            .definitions(self)
    }
}

impl DeclarationSource for WeaveConfig {
    fn definitions(&self) -> Result<Vec<ClassDefinition>> {
        Ok(self.definitions.iter().map(DefinitionConfig::to_definition).collect())
    }
}

impl DefinitionConfig {
    fn to_definition(&self) -> ClassDefinition {
        ClassDefinition {
            target_class: internal_name(&self.target),
            hook_class: internal_name(&self.hooks),
            requests: self
                .modifications
                .iter()
                .map(|modification| modification.to_request(&self.target, &self.hooks))
                .collect(),
        }
    }
}

impl HookSite {
    fn target(&self, class: &str) -> MethodTarget {
        MethodTarget::new(class, &self.method, &self.descriptor)
    }

    fn hook(&self, default_owner: &str) -> HookRef {
        HookRef::new(self.hook_owner.as_deref().unwrap_or(default_owner), &self.hook)
    }
}

impl ModificationConfig {
    fn to_request(&self, class: &str, hooks: &str) -> ModificationRequest {
        match self {
            ModificationConfig::Inject { site, at } => ModificationRequest::Inject(Injection {
                target: site.target(class),
                hook: site.hook(hooks),
                at: *at,
            }),
            ModificationConfig::Invoke {
                site,
                call_owner,
                call_name,
                call_descriptor,
                shift,
            } => ModificationRequest::Invoke(Invocation {
                target: site.target(class),
                hook: site.hook(hooks),
                call: MemberRef::new(call_owner, call_name, call_descriptor),
                shift: *shift,
            }),
            ModificationConfig::Redirect {
                site,
                redirect_type,
                owner,
                name,
                member_descriptor,
                ordinal,
            } => ModificationRequest::Redirect(RedirectRequest {
                target: site.target(class),
                hook: site.hook(hooks),
                kind: *redirect_type,
                member: MemberRef::new(owner, name, member_descriptor),
                ordinal: *ordinal,
            }),
            ModificationConfig::ModifyConstant {
                site,
                constant,
                ordinal,
            } => ModificationRequest::ModifyConstant(ConstantModification {
                target: site.target(class),
                hook: site.hook(hooks),
                constant: constant.clone(),
                ordinal: *ordinal,
            }),
            ModificationConfig::ModifyVariable {
                site,
                target,
                ordinal,
                index,
                variable_descriptor,
                args_only,
                capture_self,
            } => ModificationRequest::ModifyVariable(VariableModification {
                target: site.target(class),
                hook: site.hook(hooks),
                at: *target,
                ordinal: *ordinal,
                index: *index,
                variable_descriptor: variable_descriptor.clone(),
                args_only: *args_only,
                capture_self: *capture_self,
            }),
        }
    }
}

fn validate(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(SCHEMA).context("failed to parse configuration schema")?;
    let compiled = JSONSchema::compile(&schema)
        .map_err(|err| anyhow::anyhow!("failed to compile configuration schema: {err}"))?;
    if let Err(errors) = compiled.validate(value) {
        let messages: Vec<String> = errors
            .map(|error| format!("{}: {}", error.instance_path, error))
            .collect();
        anyhow::bail!("configuration does not match schema: {}", messages.join("; "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::ClassHierarchy;

    const SAMPLE: &str = r#"{
        "callback_class": "com.example.Signal",
        "mappings": {
            "classes": {"com.example.Game": "a"},
            "methods": {"com/example/Game.tick()V": "b"}
        },
        "hierarchy": {"com.example.Boss": "com.example.Enemy"},
        "definitions": [
            {
                "target": "com.example.Game",
                "hooks": "com.example.GameHooks",
                "modifications": [
                    {"kind": "inject", "method": "tick", "descriptor": "()V",
                     "hook": "onTick", "at": "head"},
                    {"kind": "modify_constant", "method": "tick", "descriptor": "()V",
                     "hook": "speed", "hook_owner": "com.example.Tuning",
                     "constant": {"float": 1.5}, "ordinal": 0},
                    {"kind": "redirect", "method": "tick", "descriptor": "()V",
                     "hook": "now", "type": "method", "owner": "java.lang.System",
                     "name": "nanoTime", "member_descriptor": "()J"},
                    {"kind": "modify_variable", "method": "damage", "descriptor": "(I)V",
                     "hook": "clamp", "target": "head", "ordinal": 0}
                ]
            }
        ]
    }"#;

    #[test]
    fn sample_config_parses_into_requests() {
        let config = WeaveConfig::from_json_str(SAMPLE).expect("config");

        let definitions = config.definitions().expect("definitions");

        assert_eq!(definitions.len(), 1);
        let definition = &definitions[0];
        assert_eq!(definition.target_class, "com/example/Game");
        assert_eq!(definition.hook_class, "com/example/GameHooks");
        assert_eq!(definition.requests.len(), 4);
        let ModificationRequest::Inject(inject) = &definition.requests[0] else {
            panic!("expected inject, got {:?}", definition.requests[0]);
        };
        assert_eq!(inject.hook, HookRef::new("com/example/GameHooks", "onTick"));
        assert_eq!(inject.at, InjectAt::Head);
        let ModificationRequest::ModifyConstant(constant) = &definition.requests[1] else {
            panic!("expected modify_constant, got {:?}", definition.requests[1]);
        };
        assert_eq!(constant.hook.owner, "com/example/Tuning");
        assert_eq!(constant.constant, ConstantValue::Float(1.5));
        let ModificationRequest::ModifyVariable(variable) = &definition.requests[3] else {
            panic!("expected modify_variable, got {:?}", definition.requests[3]);
        };
        assert!(variable.args_only);
        assert_eq!(variable.target.name, "damage");
    }

    #[test]
    fn ambient_settings_are_exposed() {
        let config = WeaveConfig::from_json_str(SAMPLE).expect("config");

        assert_eq!(config.callback_layout().class_name(), "com/example/Signal");
        assert_eq!(
            config.class_hierarchy().super_class("com/example/Boss").as_deref(),
            Some("com/example/Enemy")
        );
        let mapping = config.mapping();
        assert_eq!(mapping.class_name("com/example/Game").as_deref(), Some("a"));
        assert_eq!(
            mapping.method_name("com/example/Game", "tick", "()V").as_deref(),
            Some("b")
        );
    }

    #[test]
    fn registry_builder_uses_mapped_names() {
        let config = WeaveConfig::from_json_str(SAMPLE).expect("config");

        let registry = config
            .registry_builder()
            .expect("builder")
            .build()
            .expect("registry");

        assert_eq!(registry.class_names(), vec!["a"]);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = WeaveConfig::from_json_str("{}").expect("config");

        assert!(config.definitions.is_empty());
        assert_eq!(config.callback_layout(), CallbackLayout::default());
        assert!(config.registry_builder().expect("builder").build().expect("build").is_empty());
    }

    #[test]
    fn schema_rejects_unknown_fields_and_missing_kind_fields() {
        let unknown = WeaveConfig::from_json_str(r#"{"callbacks": "x"}"#);
        let missing_at = WeaveConfig::from_json_str(
            r#"{"definitions": [{"target": "a.B", "hooks": "a.H", "modifications": [
                {"kind": "inject", "method": "run", "descriptor": "()V", "hook": "h"}
            ]}]}"#,
        );
        let bad_ordinal = WeaveConfig::from_json_str(
            r#"{"definitions": [{"target": "a.B", "hooks": "a.H", "modifications": [
                {"kind": "modify_constant", "method": "run", "descriptor": "()V",
                 "hook": "h", "constant": {"int": 1}, "ordinal": -1}
            ]}]}"#,
        );

        let message = format!("{:#}", unknown.expect_err("unknown field"));
        assert!(message.contains("does not match schema"), "{message}");
        assert!(missing_at.is_err());
        assert!(bad_ordinal.is_err());
    }

    #[test]
    fn from_path_reports_the_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("weave.json");
        fs::write(&path, "{not json").expect("write config");

        let error = WeaveConfig::from_path(&path).expect_err("invalid json");

        assert!(format!("{error:#}").contains("weave.json"));
    }
}

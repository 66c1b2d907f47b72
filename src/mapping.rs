//! Translation of symbolic (source-level) names into the names found in the
//! class files being rewritten.

use std::collections::HashMap;

use serde::Deserialize;

use crate::descriptor::internal_name;

/// Resolves class, method and field names. `None` means the name is unknown; the
/// registry then logs a warning and keeps the symbolic name.
///
/// `owner` is always the symbolic owner class in internal form.
pub trait MappingProvider: Send + Sync {
    fn class_name(&self, name: &str) -> Option<String>;

    fn method_name(&self, owner: &str, name: &str, descriptor: &str) -> Option<String>;

    fn method_descriptor(&self, owner: &str, name: &str, descriptor: &str) -> Option<String>;

    fn field_name(&self, owner: &str, name: &str, descriptor: &str) -> Option<String>;

    fn field_descriptor(&self, owner: &str, name: &str, descriptor: &str) -> Option<String>;
}

/// Every name maps to itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityMapping;

impl MappingProvider for IdentityMapping {
    fn class_name(&self, name: &str) -> Option<String> {
        Some(internal_name(name))
    }

    fn method_name(&self, _owner: &str, name: &str, _descriptor: &str) -> Option<String> {
        Some(name.to_string())
    }

    fn method_descriptor(&self, _owner: &str, _name: &str, descriptor: &str) -> Option<String> {
        Some(descriptor.to_string())
    }

    fn field_name(&self, _owner: &str, name: &str, _descriptor: &str) -> Option<String> {
        Some(name.to_string())
    }

    fn field_descriptor(&self, _owner: &str, _name: &str, descriptor: &str) -> Option<String> {
        Some(descriptor.to_string())
    }
}

/// Explicit rename tables; anything not listed maps to itself.
///
/// Method keys are `owner.name(descriptor)` and field keys `owner.name:descriptor`,
/// both with the symbolic owner in internal form. Descriptors are rewritten by
/// renaming every class they mention.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableMapping {
    #[serde(default)]
    classes: HashMap<String, String>,
    #[serde(default)]
    methods: HashMap<String, String>,
    #[serde(default)]
    fields: HashMap<String, String>,
}

impl TableMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, from: &str, to: &str) -> Self {
        self.classes.insert(internal_name(from), internal_name(to));
        self
    }

    pub fn with_method(mut self, owner: &str, name: &str, descriptor: &str, to: &str) -> Self {
        self.methods
            .insert(format!("{}.{name}{descriptor}", internal_name(owner)), to.to_string());
        self
    }

    pub fn with_field(mut self, owner: &str, name: &str, descriptor: &str, to: &str) -> Self {
        self.fields
            .insert(format!("{}.{name}:{descriptor}", internal_name(owner)), to.to_string());
        self
    }

    /// Normalize keys and values loaded from configuration to internal form.
    pub(crate) fn normalized(self) -> Self {
        let classes = self
            .classes
            .into_iter()
            .map(|(from, to)| (internal_name(&from), internal_name(&to)))
            .collect();
        Self {
            classes,
            methods: self.methods,
            fields: self.fields,
        }
    }

    fn rename_class(&self, name: &str) -> String {
        let name = internal_name(name);
        self.classes.get(&name).cloned().unwrap_or(name)
    }

    fn remap_descriptor(&self, descriptor: &str) -> String {
        let mut out = String::with_capacity(descriptor.len());
        let mut rest = descriptor;
        while let Some(start) = rest.find('L') {
            out.push_str(&rest[..=start]);
            let tail = &rest[start + 1..];
            match tail.find(';') {
                Some(end) => {
                    out.push_str(&self.rename_class(&tail[..end]));
                    out.push(';');
                    rest = &tail[end + 1..];
                }
                None => {
                    rest = tail;
                    break;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl MappingProvider for TableMapping {
    fn class_name(&self, name: &str) -> Option<String> {
        Some(self.rename_class(name))
    }

    fn method_name(&self, owner: &str, name: &str, descriptor: &str) -> Option<String> {
        let key = format!("{}.{name}{descriptor}", internal_name(owner));
        Some(self.methods.get(&key).cloned().unwrap_or_else(|| name.to_string()))
    }

    fn method_descriptor(&self, _owner: &str, _name: &str, descriptor: &str) -> Option<String> {
        Some(self.remap_descriptor(descriptor))
    }

    fn field_name(&self, owner: &str, name: &str, descriptor: &str) -> Option<String> {
        let key = format!("{}.{name}:{descriptor}", internal_name(owner));
        Some(self.fields.get(&key).cloned().unwrap_or_else(|| name.to_string()))
    }

    fn field_descriptor(&self, _owner: &str, _name: &str, descriptor: &str) -> Option<String> {
        Some(self.remap_descriptor(descriptor))
    }
}

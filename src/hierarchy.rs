//! Class hierarchy lookups used when merging reference types in stack map frames.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::descriptor::internal_name;

const OBJECT: &str = "java/lang/Object";

/// Resolves superclasses of classes referenced by rewritten code.
pub trait ClassHierarchy: Send + Sync {
    /// Direct superclass in internal form, or `None` when unknown.
    fn super_class(&self, name: &str) -> Option<String>;

    fn is_interface(&self, _name: &str) -> bool {
        false
    }
}

/// Table-backed hierarchy seeded with common JDK types.
#[derive(Clone, Debug)]
pub struct DefaultHierarchy {
    supers: HashMap<String, String>,
    interfaces: HashSet<String>,
}

impl Default for DefaultHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultHierarchy {
    pub fn new() -> Self {
        let mut hierarchy = Self::empty();
        hierarchy.insert_lang_types();
        hierarchy
    }

    /// Hierarchy without the built-in JDK types.
    pub fn empty() -> Self {
        Self {
            supers: HashMap::new(),
            interfaces: HashSet::new(),
        }
    }

    /// Record `name extends super_name`. Dotted names are accepted.
    pub fn insert(&mut self, name: &str, super_name: &str) {
        self.supers
            .insert(internal_name(name), internal_name(super_name));
    }

    pub fn insert_interface(&mut self, name: &str) {
        let name = internal_name(name);
        self.supers.insert(name.clone(), OBJECT.to_string());
        self.interfaces.insert(name);
    }

    pub fn with_class(mut self, name: &str, super_name: &str) -> Self {
        self.insert(name, super_name);
        self
    }

    fn insert_lang_types(&mut self) {
        for (name, super_name) in [
            ("java/lang/String", OBJECT),
            ("java/lang/Class", OBJECT),
            ("java/lang/Number", OBJECT),
            ("java/lang/Boolean", OBJECT),
            ("java/lang/Character", OBJECT),
            ("java/lang/Byte", "java/lang/Number"),
            ("java/lang/Short", "java/lang/Number"),
            ("java/lang/Integer", "java/lang/Number"),
            ("java/lang/Long", "java/lang/Number"),
            ("java/lang/Float", "java/lang/Number"),
            ("java/lang/Double", "java/lang/Number"),
            ("java/lang/StringBuilder", "java/lang/AbstractStringBuilder"),
            ("java/lang/AbstractStringBuilder", OBJECT),
            ("java/lang/Throwable", OBJECT),
            ("java/lang/Exception", "java/lang/Throwable"),
            ("java/lang/Error", "java/lang/Throwable"),
            ("java/lang/RuntimeException", "java/lang/Exception"),
            ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
            ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
            ("java/lang/NullPointerException", "java/lang/RuntimeException"),
            ("java/lang/ClassCastException", "java/lang/RuntimeException"),
            ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
            ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
            (
                "java/lang/ArrayIndexOutOfBoundsException",
                "java/lang/IndexOutOfBoundsException",
            ),
            ("java/lang/UnsupportedOperationException", "java/lang/RuntimeException"),
            ("java/io/IOException", "java/lang/Exception"),
            ("java/lang/ReflectiveOperationException", "java/lang/Exception"),
            ("java/lang/InterruptedException", "java/lang/Exception"),
            ("java/util/AbstractCollection", OBJECT),
            ("java/util/AbstractList", "java/util/AbstractCollection"),
            ("java/util/ArrayList", "java/util/AbstractList"),
            ("java/util/AbstractMap", OBJECT),
            ("java/util/HashMap", "java/util/AbstractMap"),
        ] {
            self.supers.insert(name.to_string(), super_name.to_string());
        }
        for name in [
            "java/lang/Runnable",
            "java/lang/CharSequence",
            "java/lang/Comparable",
            "java/lang/Iterable",
            "java/util/Collection",
            "java/util/List",
            "java/util/Map",
            "java/util/Set",
        ] {
            self.insert_interface(name);
        }
    }
}

impl ClassHierarchy for DefaultHierarchy {
    fn super_class(&self, name: &str) -> Option<String> {
        self.supers.get(name).cloned()
    }

    fn is_interface(&self, name: &str) -> bool {
        self.interfaces.contains(name)
    }
}

/// Asks `first`, then `second` for classes `first` does not know.
pub(crate) struct LayeredHierarchy<'a> {
    pub(crate) first: &'a dyn ClassHierarchy,
    pub(crate) second: &'a dyn ClassHierarchy,
}

impl ClassHierarchy for LayeredHierarchy<'_> {
    fn super_class(&self, name: &str) -> Option<String> {
        self.first
            .super_class(name)
            .or_else(|| self.second.super_class(name))
    }

    fn is_interface(&self, name: &str) -> bool {
        if self.first.super_class(name).is_some() {
            return self.first.is_interface(name);
        }
        self.second.is_interface(name)
    }
}

/// Puts the class under transform in front of another resolver.
pub(crate) struct ClassScopedHierarchy<'a> {
    pub(crate) name: &'a str,
    pub(crate) super_name: Option<&'a str>,
    pub(crate) is_interface: bool,
    pub(crate) fallback: &'a dyn ClassHierarchy,
}

impl ClassHierarchy for ClassScopedHierarchy<'_> {
    fn super_class(&self, name: &str) -> Option<String> {
        if name == self.name {
            return self.super_name.map(str::to_string);
        }
        self.fallback.super_class(name)
    }

    fn is_interface(&self, name: &str) -> bool {
        if name == self.name {
            return self.is_interface;
        }
        self.fallback.is_interface(name)
    }
}

/// Nearest common superclass of two internal names or array descriptors.
///
/// Falls back to `java/lang/Object` whenever the chain cannot be resolved.
pub(crate) fn common_super_class(hierarchy: &dyn ClassHierarchy, left: &str, right: &str) -> String {
    if left == right {
        return left.to_string();
    }
    if left.starts_with('[') || right.starts_with('[') {
        return common_array_type(hierarchy, left, right);
    }
    if hierarchy.is_interface(left) || hierarchy.is_interface(right) {
        return OBJECT.to_string();
    }

    let mut ancestors = HashSet::new();
    ancestors.insert(left.to_string());
    let mut current = left.to_string();
    while let Some(parent) = hierarchy.super_class(&current) {
        if !ancestors.insert(parent.clone()) {
            break;
        }
        current = parent;
    }
    let left_complete = current == OBJECT;

    let mut current = right.to_string();
    loop {
        if ancestors.contains(&current) {
            return current;
        }
        match hierarchy.super_class(&current) {
            Some(parent) => current = parent,
            None => break,
        }
    }
    if !left_complete || current != OBJECT {
        debug!(left, right, "unresolved common superclass, using java/lang/Object");
    }
    OBJECT.to_string()
}

fn common_array_type(hierarchy: &dyn ClassHierarchy, left: &str, right: &str) -> String {
    let (Some(left_element), Some(right_element)) =
        (left.strip_prefix('['), right.strip_prefix('['))
    else {
        return OBJECT.to_string();
    };
    let element_name = |element: &str| -> Option<String> {
        if element.starts_with('[') {
            Some(element.to_string())
        } else {
            element
                .strip_prefix('L')
                .and_then(|rest| rest.strip_suffix(';'))
                .map(str::to_string)
        }
    };
    match (element_name(left_element), element_name(right_element)) {
        (Some(left_name), Some(right_name)) => {
            let common = common_super_class(hierarchy, &left_name, &right_name);
            if common.starts_with('[') {
                format!("[{common}")
            } else {
                format!("[L{common};")
            }
        }
        _ => OBJECT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nearest_shared_ancestor() {
        let hierarchy = DefaultHierarchy::new();

        assert_eq!(
            common_super_class(
                &hierarchy,
                "java/lang/IllegalArgumentException",
                "java/lang/NullPointerException"
            ),
            "java/lang/RuntimeException"
        );
        assert_eq!(
            common_super_class(&hierarchy, "java/lang/Integer", "java/lang/Long"),
            "java/lang/Number"
        );
    }

    #[test]
    fn unknown_classes_fall_back_to_object() {
        let hierarchy = DefaultHierarchy::new();

        assert_eq!(
            common_super_class(&hierarchy, "com/example/A", "com/example/B"),
            "java/lang/Object"
        );
    }

    #[test]
    fn user_entries_and_class_scope_are_consulted() {
        let hierarchy = DefaultHierarchy::new().with_class("com.example.Child", "com.example.Base");
        let scoped = ClassScopedHierarchy {
            name: "com/example/Other",
            super_name: Some("com/example/Base"),
            is_interface: false,
            fallback: &hierarchy,
        };

        assert_eq!(
            common_super_class(&scoped, "com/example/Child", "com/example/Other"),
            "com/example/Base"
        );
    }

    #[test]
    fn layered_lookup_prefers_the_first_hierarchy() {
        let mut input = DefaultHierarchy::empty();
        input.insert("demo/A", "demo/Base");
        input.insert("demo/B", "demo/Base");
        input.insert("demo/Base", "java/lang/Object");
        input.insert_interface("demo/Shape");
        let fallback = DefaultHierarchy::new();
        let layered = LayeredHierarchy {
            first: &input,
            second: &fallback,
        };

        assert_eq!(common_super_class(&layered, "demo/A", "demo/B"), "demo/Base");
        assert_eq!(
            layered.super_class("java/lang/Integer").as_deref(),
            Some("java/lang/Number")
        );
        assert!(layered.is_interface("demo/Shape"));
        assert!(layered.is_interface("java/util/List"));
        assert!(DefaultHierarchy::empty().super_class("java/lang/String").is_none());
    }

    #[test]
    fn reference_arrays_merge_by_element() {
        let hierarchy = DefaultHierarchy::new();

        assert_eq!(
            common_super_class(&hierarchy, "[Ljava/lang/Integer;", "[Ljava/lang/Long;"),
            "[Ljava/lang/Number;"
        );
        assert_eq!(
            common_super_class(&hierarchy, "[I", "[J"),
            "java/lang/Object"
        );
    }

    #[test]
    fn interfaces_merge_to_object() {
        let hierarchy = DefaultHierarchy::new();

        assert_eq!(
            common_super_class(&hierarchy, "java/util/List", "java/util/ArrayList"),
            "java/lang/Object"
        );
    }
}

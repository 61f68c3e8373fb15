//! Hierarchical YAML2DA documents and their merge semantics.
//!
//! A [`Document`] is a YAML mapping plus the identifier other documents use
//! to depend on it. Field order follows the YAML insertion order, which is
//! what makes path-tree packing deterministic.

use serde_yaml::{Mapping, Value};

use crate::schema::MergeMode;

pub const YAML_TYPE: &str = "yamlType";
pub const GENERATE_OUTPUT: &str = "generateOutput";
pub const IMPORTS: &str = "imports";
pub const INHERITS: &str = "inherits";
pub const ID: &str = "id";
pub const IDENTIFIER: &str = "identifier";
pub const VARIANTS: &str = "variants";

/// Field names that carry metadata and can never be used as a column alias.
pub const RESERVED_FIELDS: [&str; 7] = [
    YAML_TYPE,
    GENERATE_OUTPUT,
    IMPORTS,
    INHERITS,
    ID,
    IDENTIFIER,
    VARIANTS,
];

/// `yamlType` of schema definition documents.
pub const SCHEMA_TYPE: &str = "schema";

pub fn is_reserved_field(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name)
}

fn is_reserved_key(key: &Value) -> bool {
    key.as_str().map_or(false, is_reserved_field)
}

/// One hierarchical unit of authoring input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    identifier: String,
    fields: Mapping,
}

impl Document {
    /// Create a document. An explicit `identifier` field wins over
    /// `default_identifier`.
    pub fn new(default_identifier: impl Into<String>, fields: Mapping) -> Self {
        let identifier = fields
            .get(IDENTIFIER)
            .and_then(scalar_text)
            .unwrap_or_else(|| default_identifier.into());
        Self { identifier, fields }
    }

    /// Wrap a parsed YAML value. Returns `None` unless the value is a mapping.
    pub fn from_value(default_identifier: impl Into<String>, value: Value) -> Option<Self> {
        match value {
            Value::Mapping(fields) => Some(Self::new(default_identifier, fields)),
            _ => None,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn set_identifier(&mut self, identifier: impl Into<String>) {
        self.identifier = identifier.into();
    }

    /// The document's `yamlType`, if any.
    pub fn type_name(&self) -> Option<&str> {
        self.fields.get(YAML_TYPE).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(Value::String(field.into()), value.into())
    }

    pub fn fields(&self) -> &Mapping {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Mapping {
        &mut self.fields
    }

    pub fn into_fields(self) -> Mapping {
        self.fields
    }

    pub fn to_value(&self) -> Value {
        Value::Mapping(self.fields.clone())
    }

    /// Whether the document asks to be written out on export.
    pub fn generate_output(&self) -> bool {
        self.fields
            .get(GENERATE_OUTPUT)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Row id of this document, if it has an integer `id`.
    pub fn row_id(&self) -> Option<usize> {
        self.fields.get(ID).and_then(row_id)
    }

    /// Identifiers this document depends on under the given merge mode.
    ///
    /// A single string is accepted as a one-element list.
    pub fn dependencies(&self, mode: MergeMode) -> Vec<String> {
        match self.fields.get(mode.dependency_field()) {
            Some(Value::Sequence(items)) => items.iter().filter_map(scalar_text).collect(),
            Some(value) => scalar_text(value).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Inheritance merge: fill every field missing here (or null) from
    /// `defaults`. Existing fields are never overwritten.
    pub fn apply_defaults(&mut self, defaults: &Document) {
        for (key, value) in defaults.fields.iter() {
            if is_reserved_key(key) {
                continue;
            }
            let missing = self.fields.get(key).map_or(true, Value::is_null);
            if missing {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }

    /// Composition merge: deep-merge `source` into this document.
    pub fn import_from(&mut self, source: &Document) {
        for (key, value) in source.fields.iter() {
            if is_reserved_key(key) {
                continue;
            }
            match self.fields.get_mut(key) {
                Some(existing) => merge_value(existing, value),
                None => {
                    self.fields.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Append `source` as a variant, dropping every field whose value equals
    /// this document's.
    pub fn push_variant(&mut self, source: &Document) {
        let variant: Mapping = source
            .fields
            .iter()
            .filter(|(key, value)| self.fields.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        match self.fields.get_mut(VARIANTS) {
            Some(Value::Sequence(variants)) => variants.push(Value::Mapping(variant)),
            _ => {
                self.fields.insert(
                    Value::String(VARIANTS.to_string()),
                    Value::Sequence(vec![Value::Mapping(variant)]),
                );
            }
        }
    }
}

/// Deep merge used by composition. Sequences are unioned, mappings merged
/// recursively, and a non-container destination is left alone.
fn merge_value(destination: &mut Value, source: &Value) {
    match (destination, source) {
        (Value::Mapping(dest), Value::Mapping(src)) => {
            for (key, value) in src.iter() {
                match dest.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        dest.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Sequence(dest), Value::Sequence(src)) => {
            for item in src {
                if !dest.contains(item) {
                    dest.push(item.clone());
                }
            }
        }
        (Value::Sequence(dest), scalar) if is_scalar(scalar) => {
            if !dest.contains(scalar) {
                dest.push(scalar.clone());
            }
        }
        _ => {}
    }
}

pub fn is_scalar(value: &Value) -> bool {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => true,
        Value::Tagged(tagged) => is_scalar(&tagged.value),
        _ => false,
    }
}

/// Text of a scalar as it appears in a table cell. Booleans become `1`/`0`.
/// Returns `None` for null and containers.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(if *flag { "1" } else { "0" }.to_string()),
        Value::Tagged(tagged) => scalar_text(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

/// Interpret a value as a row id: a non-negative integer, an integral float,
/// or a string holding one.
pub fn row_id(value: &Value) -> Option<usize> {
    match value {
        Value::Number(number) => {
            if let Some(id) = number.as_u64() {
                usize::try_from(id).ok()
            } else {
                number
                    .as_f64()
                    .filter(|id| id.is_finite() && *id >= 0.0 && id.fract() == 0.0)
                    .map(|id| id as usize)
            }
        }
        Value::String(text) => text.trim().parse::<usize>().ok(),
        Value::Tagged(tagged) => row_id(&tagged.value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(identifier: &str, yaml: &str) -> Document {
        Document::from_value(identifier, serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    #[test]
    fn test_explicit_identifier_wins() {
        let document = doc("filename", "identifier: custom\nx: 1");
        assert_eq!(document.identifier(), "custom");

        let document = doc("filename", "x: 1");
        assert_eq!(document.identifier(), "filename");
    }

    #[test]
    fn test_apply_defaults_keeps_own_fields() {
        let parent = doc("a", "x: 1\ny: 2\nid: 7");
        let mut child = doc("b", "inherits: [a]\nx: 2\nz: ~");
        child.apply_defaults(&parent);

        assert_eq!(child.get("x"), Some(&Value::from(2)));
        assert_eq!(child.get("y"), Some(&Value::from(2)));
        assert!(child.get("z").unwrap().is_null());
        assert_eq!(child.get("id"), None);
    }

    #[test]
    fn test_apply_defaults_fills_null_fields() {
        let parent = doc("a", "x: 1");
        let mut child = doc("b", "x: ~");
        child.apply_defaults(&parent);
        assert_eq!(child.get("x"), Some(&Value::from(1)));
    }

    #[test]
    fn test_import_unions_sequences() {
        let source = doc("b", "tags: [2, 1]");
        let mut destination = doc("a", "imports: [b]\ntags: [1]");
        destination.import_from(&source);

        let tags: Value = serde_yaml::from_str("[1, 2]").unwrap();
        assert_eq!(destination.get("tags"), Some(&tags));
    }

    #[test]
    fn test_import_merges_nested_mappings_without_overwrite() {
        let source = doc("b", "yamlType: x\nlevels:\n  1:\n    grants:\n      A: 5\n      B: 6\n");
        let mut destination = doc("a", "levels:\n  1:\n    grants:\n      A: 4\n");
        destination.import_from(&source);

        let expected: Value = serde_yaml::from_str("1:\n  grants:\n    A: 4\n    B: 6\n").unwrap();
        assert_eq!(destination.get("levels"), Some(&expected));
        assert_eq!(destination.get("yamlType"), None);
    }

    #[test]
    fn test_import_adds_scalar_to_sequence() {
        let source = doc("b", "feats:\n  A: 6");
        let mut destination = doc("a", "feats:\n  A: [5]");
        destination.import_from(&source);

        let expected: Value = serde_yaml::from_str("A: [5, 6]").unwrap();
        assert_eq!(destination.get("feats"), Some(&expected));
    }

    #[test]
    fn test_push_variant_drops_equal_fields() {
        let mut target = doc("a", "yamlType: spells\nid: 1\nlabel: x\nvalue: 1");
        let source = doc("b", "yamlType: spells\nid: 2\nlabel: x\nvalue: 2");
        target.push_variant(&source);

        let expected: Value = serde_yaml::from_str("- id: 2\n  value: 2").unwrap();
        assert_eq!(target.get("variants"), Some(&expected));
    }

    #[test]
    fn test_row_id() {
        assert_eq!(row_id(&Value::from(5)), Some(5));
        assert_eq!(row_id(&Value::from(5.0)), Some(5));
        assert_eq!(row_id(&Value::from(5.5)), None);
        assert_eq!(row_id(&Value::from(-1)), None);
        assert_eq!(row_id(&Value::from("12")), Some(12));
        assert_eq!(row_id(&Value::from("twelve")), None);
        assert_eq!(row_id(&Value::Null), None);
    }

    #[test]
    fn test_dependencies_accepts_single_string() {
        let document = doc("a", "inherits: base");
        assert_eq!(document.dependencies(MergeMode::Inheritance), vec!["base"]);
        assert!(document.dependencies(MergeMode::Composition).is_empty());
    }
}

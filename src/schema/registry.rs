//! Schema registry: compiled type handlers keyed by type name.
//!
//! The registry is built explicitly (`Registry::new()` followed by
//! [`Registry::register_defaults`] and any user schemas) and is read-only
//! afterwards, so one instance can be shared across threads.

use indexmap::IndexMap;
use serde_yaml::Value;

use crate::document::{Document, IDENTIFIER};
use crate::error::{EngineError, Result};
use crate::pack::PackedTable;
use crate::resolver::{self, ResolutionContext};
use crate::schema::{IndexedHandler, MergeMode, Schema, SchemaDef, TreeHandler};
use crate::table::Table;
use crate::unpack::UnpackOptions;

/// Type names no schema may claim.
pub const RESERVED_TYPE_NAMES: [&str; 3] = ["load", "schema", "unknown"];

/// Identifier of the built-in schema bundle; user registration ignores it.
pub const DEFAULT_SCHEMAS_IDENTIFIER: &str = "defaultSchemas";

const DEFAULT_SCHEMAS: &str = include_str!("../../schemas/default_schemas.yml");

/// The four operations every registered type supports.
///
/// `validate` and `post_load` are shared by every schema-driven type;
/// `pack` and `unpack` differ between the id-indexed and path-tree engines.
pub trait TypeHandler: Send + Sync {
    fn schema(&self) -> &Schema;

    fn type_name(&self) -> &str {
        &self.schema().type_name
    }

    fn merge_mode(&self) -> MergeMode {
        self.schema().merge_mode
    }

    fn label_field(&self) -> Option<&str> {
        self.schema().label_field.as_deref()
    }

    /// Whether `table` has this type's column layout (or explicit type tag).
    fn validate(&self, table: &Table) -> bool {
        self.schema().accepts(table)
    }

    /// Merge a document with its already-resolved dependencies and store it.
    fn post_load(&self, document: Document, context: &mut ResolutionContext) -> Result<()> {
        resolver::post_load(self.schema(), document, context)
    }

    /// Flatten resolved documents into a table.
    fn pack(&self, documents: &[Document]) -> Result<PackedTable>;

    /// Rebuild documents from a table.
    fn unpack(&self, table: &Table, options: &UnpackOptions) -> Result<Vec<Document>>;
}

/// Registry of type handlers, scanned in registration order.
pub struct Registry {
    handlers: IndexMap<String, Box<dyn TypeHandler>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: IndexMap::new(),
        }
    }

    /// Register the built-in schemas shipped with the crate.
    pub fn register_defaults(&mut self) -> Result<bool> {
        let definition: SchemaDef =
            serde_yaml::from_str(DEFAULT_SCHEMAS).map_err(|e| EngineError::SchemaShape {
                schema: DEFAULT_SCHEMAS_IDENTIFIER.to_string(),
                reason: e.to_string(),
            })?;
        let mut staged = Vec::new();
        stage(&definition, &mut staged)?;
        self.commit(staged);
        Ok(true)
    }

    /// Register a parsed schema definition, a bundle, or a sequence of either.
    ///
    /// Returns whether at least one type was registered. The built-in bundle
    /// is never reloaded through here.
    pub fn register(&mut self, definition: &Value) -> Result<bool> {
        match definition {
            Value::Sequence(items) => {
                let definitions = items.iter().map(parse_definition).collect::<Result<Vec<_>>>()?;
                self.register_all(definitions)
            }
            _ => self.register_schema(parse_definition(definition)?),
        }
    }

    /// Register a schema document, naming it after the document when it has
    /// no explicit identifier.
    pub fn register_document(&mut self, document: &Document) -> Result<bool> {
        let mut definition: SchemaDef = serde_yaml::from_value(document.to_value()).map_err(|e| {
            EngineError::SchemaShape {
                schema: document.identifier().to_string(),
                reason: e.to_string(),
            }
        })?;
        definition
            .identifier
            .get_or_insert_with(|| document.identifier().to_string());
        self.register_schema(definition)
    }

    pub fn register_schema(&mut self, definition: SchemaDef) -> Result<bool> {
        self.register_all(vec![definition])
    }

    /// Compile every definition before touching the registry: one failure
    /// leaves it unchanged.
    fn register_all(&mut self, definitions: Vec<SchemaDef>) -> Result<bool> {
        let mut staged = Vec::new();
        let mut loaded = false;
        for definition in &definitions {
            if definition.identifier.as_deref() == Some(DEFAULT_SCHEMAS_IDENTIFIER) {
                tracing::warn!("Ignoring user copy of {}", DEFAULT_SCHEMAS_IDENTIFIER);
                continue;
            }
            loaded |= stage(definition, &mut staged)?;
        }
        self.commit(staged);
        Ok(loaded)
    }

    fn commit(&mut self, staged: Vec<(String, Box<dyn TypeHandler>)>) {
        for (type_name, handler) in staged {
            if self.handlers.insert(type_name.clone(), handler).is_some() {
                tracing::debug!("Replaced schema {}", type_name);
            } else {
                tracing::debug!("Registered schema {}", type_name);
            }
        }
    }

    /// Look up a handler by type name.
    pub fn get(&self, type_name: &str) -> Option<&dyn TypeHandler> {
        self.handlers.get(type_name).map(|handler| handler.as_ref())
    }

    /// Like [`Registry::get`], but fails with [`EngineError::UnknownType`].
    pub fn handler(&self, type_name: &str) -> Result<&dyn TypeHandler> {
        self.get(type_name).ok_or_else(|| EngineError::UnknownType {
            type_name: type_name.to_string(),
        })
    }

    /// First registered type whose validator accepts the table.
    pub fn validate(&self, table: &Table) -> Option<&str> {
        self.detect(table, &[]).map(|handler| handler.type_name())
    }

    /// Like [`Registry::validate`], restricted to `filter` when it is not empty.
    pub fn detect(&self, table: &Table, filter: &[String]) -> Option<&dyn TypeHandler> {
        self.handlers
            .values()
            .map(|handler| handler.as_ref())
            .filter(|handler| filter.is_empty() || filter.iter().any(|name| name == handler.type_name()))
            .find(|handler| handler.validate(table))
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.handlers.contains_key(type_name)
    }

    /// Registered type names, in registration order.
    pub fn type_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn parse_definition(value: &Value) -> Result<SchemaDef> {
    serde_yaml::from_value(value.clone()).map_err(|e| EngineError::SchemaShape {
        schema: value
            .get(IDENTIFIER)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        reason: e.to_string(),
    })
}

/// Compile a definition and its nested bundle into `staged`.
fn stage(definition: &SchemaDef, staged: &mut Vec<(String, Box<dyn TypeHandler>)>) -> Result<bool> {
    let mut loaded = false;

    if let Some(type_name) = &definition.type_name {
        if RESERVED_TYPE_NAMES.contains(&type_name.as_str()) {
            return Err(EngineError::ReservedName {
                type_name: type_name.clone(),
            });
        }
        let mut schema = Schema::compile(definition)?;
        let handler: Box<dyn TypeHandler> = match schema.tree.take() {
            Some(tree) => Box::new(TreeHandler::new(schema, tree)),
            None => Box::new(IndexedHandler::new(schema)),
        };
        staged.push((type_name.clone(), handler));
        loaded = true;
    }

    for child in &definition.schemas {
        loaded |= stage(child, staged)?;
    }

    if !loaded {
        return Err(EngineError::SchemaShape {
            schema: definition.identifier.clone().unwrap_or_default(),
            reason: "schema has no type".to_string(),
        });
    }
    Ok(loaded)
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_register_defaults() {
        let mut registry = Registry::new();
        assert!(registry.register_defaults().unwrap());
        assert_eq!(registry.type_names(), vec!["cls_feat", "race_feat"]);
        assert_eq!(registry.get("cls_feat").unwrap().merge_mode(), MergeMode::Composition);
    }

    #[test]
    fn test_register_bundle() {
        let mut registry = Registry::new();
        let loaded = registry
            .register(&yaml(
                "identifier: bundle\nschemas:\n  - typeName: spells\n    columns: { Label: label }\n  - schemas:\n      - typeName: skills\n        columns: { Name: name }\n",
            ))
            .unwrap();

        assert!(loaded);
        assert_eq!(registry.type_names(), vec!["spells", "skills"]);
        assert!(registry.has_type("skills"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_sequence() {
        let mut registry = Registry::new();
        let loaded = registry
            .register(&yaml(
                "- typeName: spells\n  columns: { Label: label }\n- typeName: skills\n  columns: { Name: name }\n",
            ))
            .unwrap();

        assert!(loaded);
        assert_eq!(registry.type_names(), vec!["spells", "skills"]);
    }

    #[test]
    fn test_failed_bundle_registers_nothing() {
        let mut registry = Registry::new();
        let result = registry.register(&yaml(
            "schemas:\n  - typeName: spells\n    columns: { Label: label }\n  - typeName: load\n    columns: { A: a }\n",
        ));
        assert!(matches!(result, Err(EngineError::ReservedName { type_name }) if type_name == "load"));
        assert!(registry.is_empty());

        let result = registry.register(&yaml(
            "- typeName: spells\n  columns: { Label: label }\n- identifier: broken\n  columns: { A: a }\n",
        ));
        assert!(matches!(result, Err(EngineError::SchemaShape { schema, .. }) if schema == "broken"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reserved_type_name() {
        let mut registry = Registry::new();
        let result = registry.register(&yaml("typeName: schema\ncolumns: { A: a }\n"));
        assert!(matches!(result, Err(EngineError::ReservedName { type_name }) if type_name == "schema"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_schema_without_type() {
        let mut registry = Registry::new();
        let result = registry.register(&yaml("identifier: empty\ncolumns: { A: a }\n"));
        assert!(matches!(result, Err(EngineError::SchemaShape { schema, .. }) if schema == "empty"));
    }

    #[test]
    fn test_default_bundle_ignored() {
        let mut registry = Registry::new();
        let loaded = registry
            .register(&yaml("identifier: defaultSchemas\ntypeName: spells\ncolumns: { A: a }\n"))
            .unwrap();
        assert!(!loaded);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_document_uses_identifier() {
        let mut registry = Registry::new();
        let fields = match yaml("yamlType: schema\ncolumns: { A: a }\n") {
            Value::Mapping(fields) => fields,
            _ => unreachable!(),
        };
        let result = registry.register_document(&Document::new("spells_schema", fields));
        assert!(matches!(result, Err(EngineError::SchemaShape { schema, .. }) if schema == "spells_schema"));
    }

    #[test]
    fn test_validate_scans_in_registration_order() {
        let mut registry = Registry::new();
        registry
            .register(&yaml("typeName: wide\ncolumns: { A: a, B: b }\n"))
            .unwrap();
        registry
            .register(&yaml("typeName: narrow\ncolumns: { A: a }\n"))
            .unwrap();

        let wide = Table::new(vec!["A".into(), "B".into()]);
        let narrow = Table::new(vec!["A".into()]);
        assert_eq!(registry.validate(&wide), Some("wide"));
        assert_eq!(registry.validate(&narrow), Some("narrow"));
        assert_eq!(registry.validate(&Table::new(vec!["C".into()])), None);

        let filter = vec!["narrow".to_string()];
        assert_eq!(registry.detect(&wide, &filter).map(|h| h.type_name()), Some("narrow"));
    }

    #[test]
    fn test_replacing_keeps_position() {
        let mut registry = Registry::new();
        registry.register(&yaml("typeName: a\ncolumns: { A: a }\n")).unwrap();
        registry.register(&yaml("typeName: b\ncolumns: { B: b }\n")).unwrap();
        registry.register(&yaml("typeName: a\ncolumns: { C: c }\n")).unwrap();

        assert_eq!(registry.type_names(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().schema().column_names(), vec!["C"]);
    }

    #[test]
    fn test_unknown_type() {
        let registry = Registry::new();
        assert!(matches!(registry.handler("spells"), Err(EngineError::UnknownType { .. })));
    }
}

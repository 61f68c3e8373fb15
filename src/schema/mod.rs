//! Declarative schema definitions and their compiled form.
//!
//! Schemas are ordinary YAML documents with `yamlType: schema`:
//!
//! ```yaml
//! yamlType: schema
//! typeName: spells
//! labelField: label
//! columns:
//!   Label: label
//!   Level:
//!     alias: level
//!     minimum: 0
//!     maximum: 9
//!   School:
//!     alias: school
//!     map: { abjuration: A, conjuration: C }
//! ```
//!
//! A definition may also be a bundle of nested definitions under `schemas`.
//! Composite (multi-file) types add a `tree` describing how one document
//! expands into many rows; see [`TreeSegmentDef`].

pub mod column;
pub mod handlers;
pub mod registry;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::document::{is_reserved_field, scalar_text, Document, IMPORTS, INHERITS};
use crate::error::{EngineError, Result};
use crate::table::{Row, Table};

pub use column::{Column, PathPart, ReconstructionPath};
pub use handlers::{IndexedHandler, TreeHandler};
pub use registry::{Registry, TypeHandler, RESERVED_TYPE_NAMES};

/// How a type resolves its declared dependencies and how it packs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// One document per row; `inherits` supplies defaults.
    Inheritance,
    /// Many sibling documents merged by `imports`; packed through a path tree.
    Composition,
}

impl MergeMode {
    pub fn dependency_field(self) -> &'static str {
        match self {
            MergeMode::Inheritance => INHERITS,
            MergeMode::Composition => IMPORTS,
        }
    }
}

// ===========================================================================
// Definitions (as written in YAML)
// ===========================================================================

/// A schema definition or a bundle of them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDef {
    pub identifier: Option<String>,
    pub type_name: Option<String>,
    pub label_field: Option<String>,
    #[serde(default)]
    pub columns: IndexMap<String, ColumnDef>,
    #[serde(default)]
    pub critical_columns: Vec<String>,
    pub critical_column: Option<String>,
    /// Columns whose presence disqualifies a table during type detection.
    #[serde(default)]
    pub forbidden_columns: Vec<String>,
    #[serde(default)]
    pub multiple_files: bool,
    pub tree: Option<Vec<TreeSegmentDef>>,
    #[serde(default)]
    pub constants: Mapping,
    #[serde(default)]
    pub schemas: Vec<SchemaDef>,
}

/// A column written either as its alias or as a full spec.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ColumnDef {
    Alias(String),
    Spec(ColumnSpecDef),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpecDef {
    pub alias: Option<String>,
    #[serde(default)]
    pub map: Mapping,
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, alias = "string")]
    pub no_coerce: bool,
    pub path: Option<String>,
}

/// One segment of a path tree.
///
/// The first segment names the root field. Middle segments are key layers,
/// the last one is the leaf:
///
/// ```yaml
/// tree:
///   - levels                      # root field
///   - column: GrantedOnLevel      # level keys, remapped
///     mapping:
///       always: 1
///       epic: { field: epicFrom, default: 21 }
///   - List                        # keys written straight to List
///   - FeatLabel
///   - FeatIndex                   # leaf value column
/// ```
///
/// A leaf may also be `{ tuple: { part: Column, ... } }`, in which case the
/// leaf value is a mapping whose parts go to their own columns.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TreeSegmentDef {
    Column(String),
    Tuple {
        tuple: IndexMap<String, TuplePartDef>,
    },
    Mapped {
        column: String,
        #[serde(default)]
        mapping: Mapping,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TuplePartDef {
    Column(String),
    Mapped {
        column: String,
        #[serde(default)]
        mapping: Mapping,
    },
}

// ===========================================================================
// Compiled schema
// ===========================================================================

/// A value-mapping entry of a tree layer.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingEntry {
    Static(Value),
    /// Read `field` from the document being packed, falling back to `default`.
    Computed { field: String, default: Option<Value> },
}

/// Maps a layer key (or leaf value) onto one output column.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapper {
    /// Index into [`Schema::columns`].
    pub column: usize,
    pub mapping: IndexMap<String, MappingEntry>,
}

impl Mapper {
    /// Cell text for `key`: the layer mapping first, then the column's own
    /// map, then the key itself. `None` if `key` is not a scalar.
    pub fn apply(&self, key: &Value, column: &Column, document: &Document) -> Option<Option<String>> {
        let text = scalar_text(key)?;
        let cell = match self.mapping.get(&text) {
            Some(MappingEntry::Static(value)) => scalar_text(value),
            Some(MappingEntry::Computed { field, default }) => document
                .get(field)
                .filter(|value| !value.is_null())
                .or(default.as_ref())
                .and_then(scalar_text),
            None => column.encode(key),
        };
        Some(cell)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
    Value(Mapper),
    Tuple(Vec<(String, Mapper)>),
}

/// Compiled path tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeSpec {
    pub root: String,
    pub layers: Vec<Mapper>,
    pub leaf: Leaf,
}

impl TreeSpec {
    /// Length of every complete path: the root plus one key per layer.
    pub fn depth(&self) -> usize {
        self.layers.len() + 1
    }
}

/// A compiled schema: the accessor table every handler works from.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub type_name: String,
    pub label_field: Option<String>,
    pub merge_mode: MergeMode,
    pub columns: Vec<Column>,
    pub forbidden_columns: Vec<String>,
    /// `(column index, cell)` pairs written into every path-tree row stub.
    pub constants: Vec<(usize, String)>,
    pub tree: Option<TreeSpec>,
}

impl Schema {
    /// Compile a leaf definition. The definition must carry a `typeName`.
    pub fn compile(definition: &SchemaDef) -> Result<Self> {
        let type_name = definition.type_name.clone().ok_or_else(|| EngineError::SchemaShape {
            schema: definition.identifier.clone().unwrap_or_default(),
            reason: "definition has no typeName".to_string(),
        })?;
        let shape_error = |reason: String| EngineError::SchemaShape {
            schema: type_name.clone(),
            reason,
        };

        let mut columns = Vec::with_capacity(definition.columns.len());
        for (name, column_def) in &definition.columns {
            let column = compile_column(name, column_def).map_err(&shape_error)?;
            if is_reserved_field(&column.alias) {
                return Err(EngineError::ColumnAliasConflict {
                    type_name: type_name.clone(),
                    alias: column.alias,
                });
            }
            columns.push(column);
        }

        let mut critical = definition.critical_columns.clone();
        critical.extend(definition.critical_column.clone());
        for name in &critical {
            let column = columns
                .iter_mut()
                .find(|column| &column.name == name)
                .ok_or_else(|| shape_error(format!("critical column {name} is not declared")))?;
            column.critical = true;
        }

        let mut constants = Vec::new();
        for (name, value) in &definition.constants {
            let name = scalar_text(name).unwrap_or_default();
            let index = column_position(&columns, &name)
                .ok_or_else(|| shape_error(format!("constant column {name} is not declared")))?;
            constants.extend(scalar_text(value).map(|cell| (index, cell)));
        }

        let merge_mode = if definition.multiple_files || definition.tree.is_some() {
            MergeMode::Composition
        } else {
            MergeMode::Inheritance
        };

        let tree = match &definition.tree {
            Some(segments) => Some(compile_tree(segments, &mut columns).map_err(&shape_error)?),
            None if merge_mode == MergeMode::Composition => {
                return Err(shape_error("multiple-file schemas need a tree".to_string()));
            }
            None => None,
        };

        let aliases: Vec<&str> = columns.iter().map(|column| column.alias.as_str()).collect();
        for column in &columns {
            if let Some(path) = &column.path {
                if let Some(missing) = path.references().find(|alias| !aliases.contains(alias)) {
                    return Err(shape_error(format!(
                        "path {} references unknown alias {missing}",
                        path.as_str()
                    )));
                }
            }
        }

        Ok(Self {
            type_name,
            label_field: definition.label_field.clone(),
            merge_mode,
            columns,
            forbidden_columns: definition.forbidden_columns.clone(),
            constants,
            tree,
        })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    /// Whether a table's layout belongs to this type.
    pub fn accepts(&self, table: &Table) -> bool {
        match &table.yaml_type {
            Some(tag) => tag == &self.type_name,
            None => {
                self.columns
                    .iter()
                    .filter(|column| !column.optional)
                    .all(|column| table.has_column(&column.name))
                    && !self.forbidden_columns.iter().any(|name| table.has_column(name))
            }
        }
    }

    /// A fresh row holding only the schema constants.
    pub fn row_stub(&self) -> Row {
        let mut row = vec![None; self.columns.len()];
        for (index, cell) in &self.constants {
            row[*index] = Some(cell.clone());
        }
        row
    }
}

fn column_position(columns: &[Column], name: &str) -> Option<usize> {
    columns.iter().position(|column| column.name == name)
}

fn compile_column(name: &str, definition: &ColumnDef) -> std::result::Result<Column, String> {
    let spec = match definition {
        ColumnDef::Alias(alias) => return Ok(Column::new(name, alias.as_str())),
        ColumnDef::Spec(spec) => spec,
    };

    let mut column = Column::new(name, spec.alias.as_deref().unwrap_or(name));
    for (key, value) in &spec.map {
        let key = scalar_text(key).ok_or_else(|| format!("column {name} has a non-scalar map key"))?;
        column.add_mapping(key, value.clone());
    }
    column.minimum = spec.minimum.unwrap_or(i64::MIN);
    column.maximum = spec.maximum.unwrap_or(i64::MAX);
    if column.minimum > column.maximum {
        return Err(format!("column {name} has minimum above maximum"));
    }
    column.critical = spec.critical;
    column.optional = spec.optional;
    column.no_coerce = spec.no_coerce;
    column.path = spec
        .path
        .as_deref()
        .map(ReconstructionPath::parse)
        .transpose()?;
    Ok(column)
}

fn compile_mapping(
    mapping: &Mapping,
    column: &mut Column,
) -> std::result::Result<IndexMap<String, MappingEntry>, String> {
    let mut compiled = IndexMap::new();
    for (key, value) in mapping {
        let key = scalar_text(key)
            .ok_or_else(|| format!("tree mapping for {} has a non-scalar key", column.name))?;
        let entry = match value {
            Value::Mapping(computed) if computed.contains_key("field") => {
                let field = computed
                    .get("field")
                    .and_then(scalar_text)
                    .ok_or_else(|| format!("tree mapping {key} has a non-scalar field"))?;
                let default = computed.get("default").filter(|value| !value.is_null()).cloned();
                if let Some(default) = &default {
                    column.add_reverse(default, key.as_str());
                }
                MappingEntry::Computed { field, default }
            }
            other => {
                column.add_reverse(other, key.as_str());
                MappingEntry::Static(other.clone())
            }
        };
        compiled.insert(key, entry);
    }
    Ok(compiled)
}

fn compile_mapper(
    column_name: &str,
    mapping: &Mapping,
    columns: &mut [Column],
) -> std::result::Result<Mapper, String> {
    let index = column_position(columns, column_name)
        .ok_or_else(|| format!("tree column {column_name} is not declared"))?;
    let mapping = compile_mapping(mapping, &mut columns[index])?;
    Ok(Mapper {
        column: index,
        mapping,
    })
}

fn compile_tree(
    segments: &[TreeSegmentDef],
    columns: &mut [Column],
) -> std::result::Result<TreeSpec, String> {
    let (root, rest) = match segments.split_first() {
        Some((TreeSegmentDef::Column(root), rest)) if !rest.is_empty() => (root.clone(), rest),
        Some((TreeSegmentDef::Column(_), _)) => {
            return Err("tree needs a root field and a leaf".to_string())
        }
        Some(_) => return Err("tree must start with a root field name".to_string()),
        None => return Err("tree is empty".to_string()),
    };
    let (leaf_def, layer_defs) = rest
        .split_last()
        .ok_or_else(|| "tree needs a leaf".to_string())?;

    let empty = Mapping::new();
    let mut layers = Vec::with_capacity(layer_defs.len());
    for segment in layer_defs {
        let mapper = match segment {
            TreeSegmentDef::Column(name) => compile_mapper(name, &empty, columns)?,
            TreeSegmentDef::Mapped { column, mapping } => compile_mapper(column, mapping, columns)?,
            TreeSegmentDef::Tuple { .. } => {
                return Err("only the last tree segment may be a tuple".to_string())
            }
        };
        layers.push(mapper);
    }

    let mut prefix = vec![PathPart::Key(root.clone())];
    prefix.extend(
        layers
            .iter()
            .map(|layer| PathPart::Reference(columns[layer.column].alias.clone())),
    );
    let leaf = match leaf_def {
        TreeSegmentDef::Column(name) => Leaf::Value(compile_mapper(name, &empty, columns)?),
        TreeSegmentDef::Mapped { column, mapping } => Leaf::Value(compile_mapper(column, mapping, columns)?),
        TreeSegmentDef::Tuple { tuple } => {
            let mut parts = Vec::with_capacity(tuple.len());
            for (part, definition) in tuple {
                let mapper = match definition {
                    TuplePartDef::Column(name) => compile_mapper(name, &empty, columns)?,
                    TuplePartDef::Mapped { column, mapping } => compile_mapper(column, mapping, columns)?,
                };
                parts.push((part.clone(), mapper));
            }
            Leaf::Tuple(parts)
        }
    };

    // Leaf columns without an explicit path write back to where they came from.
    match &leaf {
        Leaf::Value(mapper) => {
            let column = &mut columns[mapper.column];
            if column.path.is_none() {
                column.path = Some(ReconstructionPath::new(prefix.clone(), None));
            }
        }
        Leaf::Tuple(parts) => {
            for (part, mapper) in parts {
                let column = &mut columns[mapper.column];
                if column.path.is_none() {
                    column.path = Some(ReconstructionPath::new(prefix.clone(), Some(part.clone())));
                }
            }
        }
    }

    Ok(TreeSpec {
        root,
        layers,
        leaf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(yaml: &str) -> SchemaDef {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_compile_columns() {
        let schema = Schema::compile(&definition(
            "typeName: spells\nlabelField: label\ncolumns:\n  Label: label\n  Level:\n    alias: level\n    maximum: 9\n  Notes: {}\n",
        ))
        .unwrap();

        assert_eq!(schema.merge_mode, MergeMode::Inheritance);
        assert_eq!(schema.column_names(), vec!["Label", "Level", "Notes"]);
        assert_eq!(schema.columns[0].alias, "label");
        assert_eq!(schema.columns[1].maximum, 9);
        assert_eq!(schema.columns[2].alias, "Notes");
        assert!(schema.tree.is_none());
    }

    #[test]
    fn test_reserved_alias_rejected() {
        let result = Schema::compile(&definition("typeName: spells\ncolumns:\n  Type: yamlType\n"));
        assert!(matches!(result, Err(EngineError::ColumnAliasConflict { alias, .. }) if alias == "yamlType"));

        let result = Schema::compile(&definition("typeName: spells\ncolumns:\n  id: {}\n"));
        assert!(matches!(result, Err(EngineError::ColumnAliasConflict { .. })));
    }

    #[test]
    fn test_bad_bounds_rejected() {
        let result = Schema::compile(&definition(
            "typeName: spells\ncolumns:\n  Level:\n    minimum: 5\n    maximum: 1\n",
        ));
        assert!(matches!(result, Err(EngineError::SchemaShape { .. })));
    }

    #[test]
    fn test_composition_needs_tree() {
        let result = Schema::compile(&definition("typeName: feats\nmultipleFiles: true\ncolumns:\n  A: a\n"));
        assert!(matches!(result, Err(EngineError::SchemaShape { .. })));
    }

    #[test]
    fn test_tree_derives_paths() {
        let schema = Schema::compile(&definition(
            "typeName: feats\ncolumns:\n  Label: label\n  Kind:\n    alias: kind\n  Index: index\ntree:\n  - feats\n  - column: Kind\n    mapping: { normal: 0, bonus: 1 }\n  - Label\n  - Index\n",
        ))
        .unwrap();

        assert_eq!(schema.merge_mode, MergeMode::Composition);
        let tree = schema.tree.as_ref().unwrap();
        assert_eq!(tree.root, "feats");
        assert_eq!(tree.depth(), 3);
        assert_eq!(
            schema.columns[2].path.as_ref().unwrap().as_str(),
            "feats.[kind].[label]"
        );
        assert_eq!(schema.columns[1].decode("1"), Value::from("bonus"));
    }

    #[test]
    fn test_root_leaf_tree() {
        let schema = Schema::compile(&definition(
            "typeName: bonus_feats\ncolumns:\n  Index: index\ntree: [feats, Index]\n",
        ))
        .unwrap();

        let tree = schema.tree.as_ref().unwrap();
        assert!(tree.layers.is_empty());
        assert_eq!(tree.depth(), 1);
        assert_eq!(schema.columns[0].path.as_ref().unwrap().as_str(), "feats");

        let result = Schema::compile(&definition("typeName: bonus_feats\ncolumns:\n  Index: index\ntree: [feats]\n"));
        assert!(matches!(result, Err(EngineError::SchemaShape { .. })));
    }

    #[test]
    fn test_tree_rejects_unknown_column() {
        let result = Schema::compile(&definition(
            "typeName: feats\ncolumns:\n  Label: label\ntree:\n  - feats\n  - Label\n  - Missing\n",
        ));
        assert!(matches!(result, Err(EngineError::SchemaShape { .. })));
    }

    #[test]
    fn test_path_references_checked() {
        let result = Schema::compile(&definition(
            "typeName: feats\ncolumns:\n  Index:\n    path: feats.[nope]\n",
        ));
        assert!(matches!(result, Err(EngineError::SchemaShape { .. })));
    }

    #[test]
    fn test_accepts_layout() {
        let schema = Schema::compile(&definition(
            "typeName: spells\ncolumns:\n  Label: label\n  Extra:\n    optional: true\nforbiddenColumns: [List]\n",
        ))
        .unwrap();

        assert!(schema.accepts(&Table::new(vec!["Label".into()])));
        assert!(!schema.accepts(&Table::new(vec!["Other".into()])));
        assert!(!schema.accepts(&Table::new(vec!["Label".into(), "List".into()])));

        let mut tagged = Table::new(vec![]);
        tagged.yaml_type = Some("spells".into());
        assert!(schema.accepts(&tagged));
        tagged.yaml_type = Some("feats".into());
        assert!(!schema.accepts(&tagged));
    }

    #[test]
    fn test_constants_fill_stub() {
        let schema = Schema::compile(&definition(
            "typeName: feats\ncolumns:\n  Label: label\n  Index: index\n  OnMenu:\n    optional: true\nconstants:\n  OnMenu: 0\ntree:\n  - feats\n  - Label\n  - Index\n",
        ))
        .unwrap();
        assert_eq!(schema.row_stub(), vec![None, None, Some("0".to_string())]);
    }
}

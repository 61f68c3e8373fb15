//! Rebuilding documents from table rows.
//!
//! Every row first goes through [`read_rows`]: critical columns are checked,
//! cells are coerced, clamped and reverse-mapped, and rows left without any
//! value are skipped as padding. The result then becomes either one document
//! per row ([`unpack_rows`]) or a single composite document rebuilt from
//! reconstruction paths ([`unpack_composite`]).

use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};

use crate::document::{is_reserved_field, scalar_text, Document, GENERATE_OUTPUT, ID, YAML_TYPE};
use crate::error::{EngineError, Result};
use crate::schema::{ReconstructionPath, Schema};
use crate::table::Table;

/// Caller options for unpacking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackOptions {
    /// Keep null cells as explicit `~` fields.
    pub print_nulls: bool,
    /// Name per-row documents `{id}_{label}` instead of `{label}_{id}`.
    pub label_invert: bool,
    /// Identifier of a composite document; defaults to the type name.
    pub name: Option<String>,
}

/// One decoded table row: alias -> value, plus its position.
#[derive(Debug, Clone, PartialEq)]
pub struct UnpackedRow {
    pub id: usize,
    pub values: IndexMap<String, Value>,
}

/// Decode every non-padding row of `table`.
pub fn read_rows(schema: &Schema, table: &Table, options: &UnpackOptions) -> Vec<UnpackedRow> {
    let indices: Vec<Option<usize>> = schema
        .columns
        .iter()
        .map(|column| table.column_index(&column.name))
        .collect();

    let mut rows = Vec::new();
    for id in 0..table.row_count() {
        let cell = |index: Option<usize>| index.and_then(|index| table.cell(id, index));

        let missing_critical = schema
            .columns
            .iter()
            .zip(&indices)
            .any(|(column, index)| column.critical && cell(*index).is_none());
        if missing_critical {
            continue;
        }

        let mut values = IndexMap::new();
        for (column, index) in schema.columns.iter().zip(&indices) {
            match cell(*index) {
                Some(raw) => {
                    values.insert(column.alias.clone(), column.decode(raw));
                }
                None if options.print_nulls => {
                    values.insert(column.alias.clone(), Value::Null);
                }
                None => {}
            }
        }
        if values.values().all(Value::is_null) {
            continue;
        }
        rows.push(UnpackedRow { id, values });
    }
    rows
}

/// File stem of a per-row document.
pub fn row_stem(id: usize, label: Option<&str>, digits: usize, label_invert: bool) -> String {
    let padded = format!("{id:0digits$}");
    match label {
        Some(label) if label_invert => format!("{padded}_{label}"),
        Some(label) => format!("{label}_{padded}"),
        None => padded,
    }
}

/// One document per row, tagged with the schema's type.
pub fn unpack_rows(schema: &Schema, table: &Table, options: &UnpackOptions) -> Result<Vec<Document>> {
    let rows = read_rows(schema, table, options);
    let digits = rows.len().to_string().len();

    let documents = rows
        .into_iter()
        .map(|row| {
            let mut fields = Mapping::new();
            fields.insert(YAML_TYPE.into(), schema.type_name.as_str().into());
            fields.insert(ID.into(), Value::from(row.id as u64));
            for (alias, value) in row.values {
                fields.insert(Value::String(alias), value);
            }

            let label = schema
                .label_field
                .as_deref()
                .and_then(|field| fields.get(field))
                .and_then(scalar_text);
            let stem = row_stem(row.id, label.as_deref(), digits, options.label_invert);
            Document::new(stem, fields)
        })
        .collect::<Vec<_>>();

    tracing::debug!("Unpacked {} {} rows", documents.len(), schema.type_name);
    Ok(documents)
}

/// Rebuild one composite document by replaying every column's
/// reconstruction path for every row.
pub fn unpack_composite(schema: &Schema, table: &Table, options: &UnpackOptions) -> Result<Document> {
    let rows = read_rows(schema, table, options);
    let mut tree = Mapping::new();

    for row in &rows {
        for column in &schema.columns {
            let Some(path) = &column.path else {
                continue;
            };
            let Some(value) = row.values.get(&column.alias).filter(|value| !value.is_null()) else {
                continue;
            };
            let Some(keys) = path.resolve(&row.values) else {
                continue;
            };
            write_path(schema, &mut tree, path, &keys, value.clone())?;
        }
    }

    let mut fields = Mapping::new();
    fields.insert(YAML_TYPE.into(), schema.type_name.as_str().into());
    fields.insert(GENERATE_OUTPUT.into(), Value::Bool(true));
    fields.extend(tree);

    let identifier = options.name.clone().unwrap_or_else(|| schema.type_name.clone());
    tracing::debug!("Rebuilt {} from {} rows", identifier, rows.len());
    Ok(Document::new(identifier, fields))
}

fn write_path(
    schema: &Schema,
    tree: &mut Mapping,
    path: &ReconstructionPath,
    keys: &[Value],
    value: Value,
) -> Result<()> {
    let conflict = || EngineError::PathConflict {
        type_name: schema.type_name.clone(),
        path: path.as_str().to_string(),
    };

    let Some((last, parents)) = keys.split_last() else {
        return Ok(());
    };
    if let Some(top) = keys.first().and_then(scalar_text) {
        if is_reserved_field(&top) {
            return Err(EngineError::ColumnAliasConflict {
                type_name: schema.type_name.clone(),
                alias: top,
            });
        }
    }

    let mut node = tree;
    for key in parents {
        node = match node
            .entry(key.clone())
            .or_insert_with(|| Value::Mapping(Mapping::new()))
        {
            Value::Mapping(child) => child,
            _ => return Err(conflict()),
        };
    }

    let slot = node.entry(last.clone()).or_insert(Value::Null);
    match &path.tuple_part {
        None if slot.is_mapping() => Err(conflict()),
        None => {
            aggregate(slot, value);
            Ok(())
        }
        Some(part) => fill_tuple(slot, part, value).ok_or_else(conflict),
    }
}

/// Repeated writes: a scalar becomes a sequence, values already present
/// are skipped.
fn aggregate(existing: &mut Value, value: Value) {
    match existing {
        Value::Null => *existing = value,
        Value::Sequence(items) => {
            if !items.contains(&value) {
                items.push(value);
            }
        }
        _ if *existing == value => {}
        _ => {
            let first = std::mem::take(existing);
            *existing = Value::Sequence(vec![first, value]);
        }
    }
}

fn tuple_with(part: &str, value: Value) -> Value {
    let mut tuple = Mapping::new();
    tuple.insert(part.into(), value);
    Value::Mapping(tuple)
}

/// Put `part` into the first tuple missing it, or start a new tuple.
/// `None` if the slot holds a scalar.
fn fill_tuple(slot: &mut Value, part: &str, value: Value) -> Option<()> {
    match slot {
        Value::Null => *slot = tuple_with(part, value),
        Value::Mapping(tuple) if !tuple.contains_key(part) => {
            tuple.insert(part.into(), value);
        }
        Value::Mapping(_) => {
            let first = std::mem::take(slot);
            *slot = Value::Sequence(vec![first, tuple_with(part, value)]);
        }
        Value::Sequence(items) => {
            let open = items
                .iter()
                .position(|item| matches!(item, Value::Mapping(tuple) if !tuple.contains_key(part)));
            match open {
                Some(index) => {
                    if let Value::Mapping(tuple) = &mut items[index] {
                        tuple.insert(part.into(), value);
                    }
                }
                None => items.push(tuple_with(part, value)),
            }
        }
        _ => return None,
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDef;

    fn schema(yaml: &str) -> Schema {
        let definition: SchemaDef = serde_yaml::from_str(yaml).unwrap();
        Schema::compile(&definition).unwrap()
    }

    fn table(columns: &[&str], rows: &[&[Option<&str>]]) -> Table {
        Table::with_rows(
            columns.iter().map(|column| column.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|cell| cell.map(str::to_string)).collect())
                .collect(),
        )
    }

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    const SPELLS: &str = "typeName: spells\nlabelField: label\ncolumns:\n  Label:\n    alias: label\n    critical: true\n  Value:\n    alias: value\n    maximum: 10\n  Notes: notes\n";

    #[test]
    fn test_clamps_to_maximum() {
        let rows = read_rows(
            &schema(SPELLS),
            &table(&["Label", "Value", "Notes"], &[&[Some("a"), Some("15"), None]]),
            &UnpackOptions::default(),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values.get("value"), Some(&Value::from(10)));
        assert!(!rows[0].values.contains_key("notes"));
    }

    #[test]
    fn test_missing_critical_skips_row() {
        let rows = read_rows(
            &schema(SPELLS),
            &table(
                &["Label", "Value", "Notes"],
                &[&[None, Some("1"), Some("x")], &[Some("b"), None, None], &[None, None, None]],
            ),
            &UnpackOptions::default(),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
    }

    #[test]
    fn test_print_nulls_keeps_fields() {
        let options = UnpackOptions {
            print_nulls: true,
            ..Default::default()
        };
        let rows = read_rows(
            &schema(SPELLS),
            &table(&["Label", "Value"], &[&[Some("a"), None]]),
            &options,
        );
        assert_eq!(rows[0].values.get("value"), Some(&Value::Null));
        assert_eq!(rows[0].values.get("notes"), Some(&Value::Null));
    }

    #[test]
    fn test_row_stem() {
        assert_eq!(row_stem(7, Some("fire"), 3, false), "fire_007");
        assert_eq!(row_stem(7, Some("fire"), 3, true), "007_fire");
        assert_eq!(row_stem(42, None, 1, false), "42");
    }

    #[test]
    fn test_unpack_rows_builds_documents() {
        let documents = unpack_rows(
            &schema(SPELLS),
            &table(
                &["Label", "Value", "Notes"],
                &[&[Some("fire"), Some("3"), None], &[None, None, None], &[Some("ice"), Some("1"), Some("cold")]],
            ),
            &UnpackOptions::default(),
        )
        .unwrap();

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].identifier(), "fire_0");
        assert_eq!(documents[1].identifier(), "ice_2");
        assert_eq!(
            documents[1].to_value(),
            yaml("yamlType: spells\nid: 2\nlabel: ice\nvalue: 1\nnotes: cold\n")
        );
    }

    const FEATS: &str = "typeName: feats\nmultipleFiles: true\ncolumns:\n  Label:\n    alias: label\n    noCoerce: true\n  Kind:\n    alias: kind\n  Index: index\ntree:\n  - feats\n  - column: Kind\n    mapping: { unlocks: 0, grants: 3 }\n  - Label\n  - Index\n";

    #[test]
    fn test_composite_aggregates_repeated_paths() {
        let document = unpack_composite(
            &schema(FEATS),
            &table(
                &["Label", "Kind", "Index"],
                &[
                    &[Some("Alertness"), Some("3"), Some("5")],
                    &[Some("Toughness"), Some("0"), Some("6")],
                    &[Some("Toughness"), Some("0"), Some("7")],
                    &[Some("Toughness"), Some("0"), Some("6")],
                ],
            ),
            &UnpackOptions::default(),
        )
        .unwrap();

        assert_eq!(document.identifier(), "feats");
        assert_eq!(
            document.to_value(),
            yaml("yamlType: feats\ngenerateOutput: true\nfeats:\n  grants:\n    Alertness: 5\n  unlocks:\n    Toughness: [6, 7]\n")
        );
    }

    #[test]
    fn test_composite_fills_tuples() {
        let schema = schema(
            "typeName: skills\ncolumns:\n  Label: label\n  Index: index\n  Bonus:\n    alias: bonus\n    map: { 'yes': 1, 'no': 0 }\ntree:\n  - skills\n  - Label\n  - tuple:\n      index: Index\n      bonus: Bonus\n",
        );
        let options = UnpackOptions {
            name: Some("rogue".into()),
            ..Default::default()
        };
        let document = unpack_composite(
            &schema,
            &table(
                &["Label", "Index", "Bonus"],
                &[
                    &[Some("Hide"), Some("3"), Some("1")],
                    &[Some("Search"), Some("7"), Some("0")],
                    &[Some("Search"), Some("8"), None],
                ],
            ),
            &options,
        )
        .unwrap();

        assert_eq!(document.identifier(), "rogue");
        assert_eq!(
            document.get("skills"),
            Some(&yaml("Hide: { index: 3, bonus: 'yes' }\nSearch:\n  - { index: 7, bonus: 'no' }\n  - { index: 8 }\n"))
        );
    }

    #[test]
    fn test_composite_root_leaf_tree() {
        let document = unpack_composite(
            &schema("typeName: bonus_feats\ncolumns:\n  Index: index\ntree: [feats, Index]\n"),
            &table(&["Index"], &[&[Some("5")], &[Some("6")]]),
            &UnpackOptions::default(),
        )
        .unwrap();
        assert_eq!(document.get("feats"), Some(&yaml("[5, 6]")));
    }

    #[test]
    fn test_composite_reserved_key() {
        let schema = schema(
            "typeName: stats\ncolumns:\n  Label:\n    alias: label\n    noCoerce: true\n  Value:\n    alias: value\n    path: '[label]'\n",
        );
        let result = unpack_composite(
            &schema,
            &table(&["Label", "Value"], &[&[Some("variants"), Some("3")]]),
            &UnpackOptions::default(),
        );
        assert_eq!(
            result.unwrap_err(),
            EngineError::ColumnAliasConflict {
                type_name: "stats".into(),
                alias: "variants".into(),
            }
        );
    }

    #[test]
    fn test_composite_path_conflict() {
        let schema = schema(
            "typeName: stats\ncolumns:\n  Label: label\n  A:\n    alias: a\n    path: stats.[label]\n  B:\n    alias: b\n    path: stats.[label].deep\n",
        );
        let result = unpack_composite(
            &schema,
            &table(&["Label", "A", "B"], &[&[Some("x"), Some("1"), Some("2")]]),
            &UnpackOptions::default(),
        );
        assert!(matches!(result, Err(EngineError::PathConflict { path, .. }) if path == "stats.[label].deep"));
    }

    #[test]
    fn test_composite_skips_missing_reference() {
        let document = unpack_composite(
            &schema(FEATS),
            &table(&["Label", "Kind", "Index"], &[&[None, Some("3"), Some("5")]]),
            &UnpackOptions::default(),
        )
        .unwrap();
        assert_eq!(document.get("feats"), None);
    }
}

//! Flattening resolved documents into tables.
//!
//! Id-indexed packing writes one row per document (or variant) at its `id`.
//! Path-tree packing expands one composite document into many rows by
//! walking nested mappings in insertion order.

use serde_yaml::{Mapping, Value};

use crate::document::{is_scalar, row_id, scalar_text, Document, ID, VARIANTS};
use crate::error::{EngineError, Result};
use crate::schema::{Leaf, Mapper, Schema, TreeSpec};
use crate::table::{Cell, Row, Table};

/// Highest row id an id-indexed table may use.
pub const MAX_ROW_ID: usize = 1_048_575;

/// A packed table and the counts reported alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedTable {
    pub table: Table,
    /// Rows written by documents.
    pub row_count: usize,
    /// All-null rows filling id gaps.
    pub padding_count: usize,
    /// Highest row id, `None` for an empty table.
    pub last_id: Option<usize>,
}

impl PackedTable {
    fn new(table: Table, row_count: usize) -> Self {
        let last_id = table.rows.len().checked_sub(1);
        let padding_count = table.rows.len() - row_count;
        Self {
            table,
            row_count,
            padding_count,
            last_id,
        }
    }
}

// ===========================================================================
// Id-indexed packing
// ===========================================================================

/// Pack documents into rows indexed by `id`, overlaying variants on their
/// parent row and padding id gaps with all-null rows.
pub fn pack_indexed(schema: &Schema, documents: &[Document]) -> Result<PackedTable> {
    let width = schema.columns.len();
    let root: Row = vec![None; width];
    let mut slots: Vec<Option<Row>> = Vec::new();

    for document in documents {
        overlay(schema, document.fields(), &root, &mut slots)?;
    }

    let row_count = slots.iter().filter(|slot| slot.is_some()).count();
    let rows = slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| vec![None; width]))
        .collect();
    let packed = PackedTable::new(Table::with_rows(schema.column_names(), rows), row_count);

    tracing::debug!(
        "Packed {}: {} rows, {} padding",
        schema.type_name,
        packed.row_count,
        packed.padding_count
    );
    Ok(packed)
}

fn overlay(schema: &Schema, node: &Mapping, parent: &[Cell], slots: &mut Vec<Option<Row>>) -> Result<()> {
    let mut row = Vec::with_capacity(schema.columns.len());
    for (index, column) in schema.columns.iter().enumerate() {
        let cell = match node.get(column.alias.as_str()) {
            Some(value) if !value.is_null() => {
                let cell = column.encode(value).ok_or_else(|| EngineError::LeafShape {
                    type_name: schema.type_name.clone(),
                    path: column.alias.clone(),
                    expected: "a scalar",
                })?;
                Some(cell)
            }
            _ => parent[index].clone(),
        };
        row.push(cell);
    }

    if let Some(id) = node.get(ID).and_then(row_id) {
        let len = id
            .checked_add(1)
            .filter(|_| id <= MAX_ROW_ID)
            .ok_or_else(|| EngineError::RowIdOutOfRange {
                type_name: schema.type_name.clone(),
                id,
                limit: MAX_ROW_ID,
            })?;
        if slots.len() < len {
            slots.resize(len, None);
        }
        if slots[id].is_some() {
            return Err(EngineError::DuplicateRowId {
                type_name: schema.type_name.clone(),
                id,
            });
        }
        slots[id] = Some(row.clone());
    }

    match node.get(VARIANTS) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Sequence(variants)) => {
            for variant in variants {
                match variant {
                    Value::Mapping(variant) => overlay(schema, variant, &row, slots)?,
                    _ => {
                        return Err(EngineError::LeafShape {
                            type_name: schema.type_name.clone(),
                            path: VARIANTS.to_string(),
                            expected: "a mapping",
                        })
                    }
                }
            }
            Ok(())
        }
        Some(_) => Err(EngineError::LeafShape {
            type_name: schema.type_name.clone(),
            path: VARIANTS.to_string(),
            expected: "a sequence of mappings",
        }),
    }
}

// ===========================================================================
// Path-tree packing
// ===========================================================================

/// Pack composite documents by enumerating every path of their tree.
///
/// Rows follow document order, then mapping insertion order at each level.
pub fn pack_tree(schema: &Schema, tree: &TreeSpec, documents: &[Document]) -> Result<PackedTable> {
    let mut rows = Vec::new();
    for document in documents {
        let root = match document.get(&tree.root) {
            Some(root) if !root.is_null() => root,
            _ => continue,
        };
        let mut walk = TreeWalk {
            schema,
            tree,
            document,
            rows: &mut rows,
        };
        walk.descend(root, &mut Vec::new())?;
    }

    let row_count = rows.len();
    tracing::debug!("Packed {}: {} rows", schema.type_name, row_count);
    Ok(PackedTable::new(Table::with_rows(schema.column_names(), rows), row_count))
}

struct TreeWalk<'a> {
    schema: &'a Schema,
    tree: &'a TreeSpec,
    document: &'a Document,
    rows: &'a mut Vec<Row>,
}

impl TreeWalk<'_> {
    /// `keys` holds the layer keys below the root field.
    fn descend(&mut self, node: &Value, keys: &mut Vec<Value>) -> Result<()> {
        if keys.len() == self.tree.layers.len() {
            return self.leaf(node, keys);
        }
        match node {
            Value::Null => Ok(()),
            Value::Mapping(children) => {
                for (key, child) in children {
                    keys.push(key.clone());
                    self.descend(child, keys)?;
                    keys.pop();
                }
                Ok(())
            }
            _ => Err(self.depth_mismatch(keys, keys.len() + 1)),
        }
    }

    fn leaf(&mut self, node: &Value, keys: &[Value]) -> Result<()> {
        let stub = self.stub(keys)?;
        let tree = self.tree;
        match &tree.leaf {
            Leaf::Value(mapper) => match node {
                Value::Null => Ok(()),
                Value::Mapping(_) => Err(self.depth_mismatch(keys, keys.len() + 2)),
                Value::Sequence(items) => {
                    for item in items {
                        if !is_scalar(item) {
                            return Err(self.leaf_shape(keys, "a scalar or sequence of scalars"));
                        }
                        self.push_value(&stub, mapper, item, keys)?;
                    }
                    Ok(())
                }
                scalar => self.push_value(&stub, mapper, scalar, keys),
            },
            Leaf::Tuple(parts) => match node {
                Value::Null => Ok(()),
                Value::Mapping(tuple) => self.push_tuple(&stub, parts, tuple, keys),
                Value::Sequence(items) => {
                    for item in items {
                        match item {
                            Value::Mapping(tuple) => self.push_tuple(&stub, parts, tuple, keys)?,
                            _ => return Err(self.leaf_shape(keys, "a mapping or sequence of mappings")),
                        }
                    }
                    Ok(())
                }
                _ => Err(self.leaf_shape(keys, "a mapping or sequence of mappings")),
            },
        }
    }

    /// Constants, then one cell per layer key.
    fn stub(&self, keys: &[Value]) -> Result<Row> {
        let mut row = self.schema.row_stub();
        for (layer, key) in self.tree.layers.iter().zip(keys) {
            row[layer.column] = self.apply(layer, key, keys)?;
        }
        Ok(row)
    }

    fn push_value(&mut self, stub: &[Cell], mapper: &Mapper, value: &Value, keys: &[Value]) -> Result<()> {
        let mut row = stub.to_vec();
        row[mapper.column] = self.apply(mapper, value, keys)?;
        self.rows.push(row);
        Ok(())
    }

    fn push_tuple(
        &mut self,
        stub: &[Cell],
        parts: &[(String, Mapper)],
        tuple: &Mapping,
        keys: &[Value],
    ) -> Result<()> {
        let mut row = stub.to_vec();
        for (part, mapper) in parts {
            if let Some(value) = tuple.get(part.as_str()).filter(|value| !value.is_null()) {
                row[mapper.column] = self.apply(mapper, value, keys)?;
            }
        }
        self.rows.push(row);
        Ok(())
    }

    fn apply(&self, mapper: &Mapper, value: &Value, keys: &[Value]) -> Result<Cell> {
        let column = &self.schema.columns[mapper.column];
        mapper
            .apply(value, column, self.document)
            .ok_or_else(|| self.leaf_shape(keys, "a scalar"))
    }

    fn path(&self, keys: &[Value]) -> String {
        let mut path = self.tree.root.clone();
        for key in keys {
            path.push('.');
            path.push_str(&scalar_text(key).unwrap_or_else(|| "?".to_string()));
        }
        path
    }

    fn depth_mismatch(&self, keys: &[Value], found: usize) -> EngineError {
        EngineError::TreeDepthMismatch {
            type_name: self.schema.type_name.clone(),
            path: self.path(keys),
            expected: self.tree.depth(),
            found,
        }
    }

    fn leaf_shape(&self, keys: &[Value], expected: &'static str) -> EngineError {
        EngineError::LeafShape {
            type_name: self.schema.type_name.clone(),
            path: self.path(keys),
            expected,
        }
    }
}

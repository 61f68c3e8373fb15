//! The two generic type handlers compiled from schema data.

use crate::document::Document;
use crate::error::Result;
use crate::pack::{self, PackedTable};
use crate::schema::{Schema, TreeSpec, TypeHandler};
use crate::table::Table;
use crate::unpack::{self, UnpackOptions};

/// One document (plus variants) per row, keyed by `id`.
#[derive(Debug, Clone)]
pub struct IndexedHandler {
    schema: Schema,
}

impl IndexedHandler {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }
}

impl TypeHandler for IndexedHandler {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn pack(&self, documents: &[Document]) -> Result<PackedTable> {
        pack::pack_indexed(&self.schema, documents)
    }

    fn unpack(&self, table: &Table, options: &UnpackOptions) -> Result<Vec<Document>> {
        unpack::unpack_rows(&self.schema, table, options)
    }
}

/// One composite document flattened through a path tree.
#[derive(Debug, Clone)]
pub struct TreeHandler {
    schema: Schema,
    tree: TreeSpec,
}

impl TreeHandler {
    pub fn new(schema: Schema, tree: TreeSpec) -> Self {
        Self { schema, tree }
    }

    pub fn tree(&self) -> &TreeSpec {
        &self.tree
    }
}

impl TypeHandler for TreeHandler {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Packs every given document into one table, rows in document order.
    fn pack(&self, documents: &[Document]) -> Result<PackedTable> {
        pack::pack_tree(&self.schema, &self.tree, documents)
    }

    fn unpack(&self, table: &Table, options: &UnpackOptions) -> Result<Vec<Document>> {
        unpack::unpack_composite(&self.schema, table, options).map(|document| vec![document])
    }
}

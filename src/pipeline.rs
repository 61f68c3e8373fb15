//! Export and import drivers over in-memory documents and tables.
//!
//! Export: group documents by `yamlType`, resolve each group, pack it.
//! Import: detect a table's type, unpack it.

use indexmap::IndexMap;

use crate::document::{Document, SCHEMA_TYPE};
use crate::error::{EngineError, Result};
use crate::pack::PackedTable;
use crate::resolver::{self, ResolutionContext};
use crate::schema::{MergeMode, Registry};
use crate::table::Table;
use crate::unpack::UnpackOptions;

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// A composition document with this identifier is always exported.
    pub project_identifier: Option<String>,
}

/// One table produced by an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedTable {
    /// Output name: the type name for per-row types, the document identifier
    /// for composite ones.
    pub name: String,
    pub type_name: String,
    pub packed: PackedTable,
}

/// The documents rebuilt from one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Imported {
    pub type_name: String,
    pub merge_mode: MergeMode,
    pub documents: Vec<Document>,
}

/// Group documents by `yamlType`, keeping first-seen type order. Documents
/// without a type are dropped.
pub fn group_by_type(documents: Vec<Document>) -> IndexMap<String, Vec<Document>> {
    let mut groups: IndexMap<String, Vec<Document>> = IndexMap::new();
    for document in documents {
        match document.type_name().map(str::to_string) {
            Some(type_name) => groups.entry(type_name).or_default().push(document),
            None => tracing::debug!("Skipping untyped document {}", document.identifier()),
        }
    }
    groups
}

/// Register every `yamlType: schema` document of `groups`.
///
/// Returns the number of schema documents that registered a type.
pub fn register_schemas(registry: &mut Registry, groups: &IndexMap<String, Vec<Document>>) -> Result<usize> {
    let mut registered = 0;
    for document in groups.get(SCHEMA_TYPE).into_iter().flatten() {
        if registry.register_document(document)? {
            registered += 1;
        }
    }
    Ok(registered)
}

/// Resolve and pack every group that has a registered type.
///
/// Nothing is returned unless every group packs cleanly.
pub fn export(
    registry: &Registry,
    groups: IndexMap<String, Vec<Document>>,
    options: &ExportOptions,
) -> Result<Vec<ExportedTable>> {
    let mut context = ResolutionContext::new();
    let mut tables = Vec::new();

    for (type_name, documents) in groups {
        if type_name == SCHEMA_TYPE {
            continue;
        }
        let Some(handler) = registry.get(&type_name) else {
            tracing::warn!("No schema loaded for type {}, skipping {} files", type_name, documents.len());
            continue;
        };

        resolver::resolve(handler, documents, &mut context)?;
        let resolved = context.take(&type_name);

        match handler.merge_mode() {
            MergeMode::Inheritance => {
                let packed = handler.pack(&resolved)?;
                tracing::info!("Packed {} ({} rows)", type_name, packed.row_count);
                tables.push(ExportedTable {
                    name: type_name.clone(),
                    type_name,
                    packed,
                });
            }
            MergeMode::Composition => {
                let outputs = resolved.iter().filter(|document| {
                    document.generate_output()
                        || options.project_identifier.as_deref() == Some(document.identifier())
                });
                for document in outputs {
                    let packed = handler.pack(std::slice::from_ref(document))?;
                    tracing::info!("Packed {} ({} rows)", document.identifier(), packed.row_count);
                    tables.push(ExportedTable {
                        name: document.identifier().to_string(),
                        type_name: type_name.clone(),
                        packed,
                    });
                }
            }
        }
    }

    Ok(tables)
}

/// Detect the table's type (among `filter`, if not empty) and unpack it.
/// `None` if no registered type accepts the table.
pub fn import(
    registry: &Registry,
    table: &Table,
    filter: &[String],
    options: &UnpackOptions,
) -> Result<Option<Imported>> {
    let Some(handler) = registry.detect(table, filter) else {
        return Ok(None);
    };
    let documents = handler.unpack(table, options)?;
    tracing::info!("Unpacked {} documents of type {}", documents.len(), handler.type_name());

    Ok(Some(Imported {
        type_name: handler.type_name().to_string(),
        merge_mode: handler.merge_mode(),
        documents,
    }))
}

/// Append every source to the target's `variants`, keeping only the fields
/// that differ from the target.
pub fn merge_into_variants(registry: &Registry, target: &mut Document, sources: &[Document]) -> Result<()> {
    let type_name = target.type_name().ok_or_else(|| EngineError::UnknownType {
        type_name: target.identifier().to_string(),
    })?;
    let handler = registry.handler(type_name)?;
    if handler.merge_mode() != MergeMode::Inheritance {
        return Err(EngineError::NotMergeable {
            type_name: type_name.to_string(),
        });
    }

    for source in sources {
        target.push_variant(source);
    }
    Ok(())
}

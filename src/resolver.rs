//! Dependency resolution for documents of one type.
//!
//! Documents are resolved in breadth-first batches: each pass picks the
//! documents whose declared dependencies are already resolved and merges them
//! in input order. A pass that makes no progress ends resolution; whatever is
//! left is reported as unresolved, whether its dependencies are missing or
//! part of a cycle.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::document::Document;
use crate::error::{EngineError, Result};
use crate::schema::{MergeMode, Schema, TypeHandler};

/// Resolved documents of one export, keyed by type then identifier.
///
/// Built fresh for each export and dropped afterwards.
#[derive(Debug, Default)]
pub struct ResolutionContext {
    files: HashMap<String, IndexMap<String, Document>>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, type_name: &str, identifier: &str) -> bool {
        self.files
            .get(type_name)
            .map_or(false, |documents| documents.contains_key(identifier))
    }

    pub fn get(&self, type_name: &str, identifier: &str) -> Option<&Document> {
        self.files.get(type_name)?.get(identifier)
    }

    /// Store a resolved document. Fails if its identifier is already taken.
    pub fn insert(&mut self, type_name: &str, document: Document) -> Result<()> {
        let documents = self.files.entry(type_name.to_string()).or_default();
        if documents.contains_key(document.identifier()) {
            return Err(EngineError::DuplicateIdentifier {
                type_name: type_name.to_string(),
                identifier: document.identifier().to_string(),
            });
        }
        documents.insert(document.identifier().to_string(), document);
        Ok(())
    }

    /// Resolved documents of a type, in resolution order.
    pub fn documents<'a>(&'a self, type_name: &str) -> impl Iterator<Item = &'a Document> + 'a {
        self.files
            .get(type_name)
            .into_iter()
            .flat_map(|documents| documents.values())
    }

    /// Remove and return the resolved documents of a type.
    pub fn take(&mut self, type_name: &str) -> Vec<Document> {
        self.files
            .remove(type_name)
            .map(|documents| documents.into_values().collect())
            .unwrap_or_default()
    }
}

/// Merge `document` with its resolved dependencies and store it in `context`.
///
/// Every dependency must already be in the context.
pub fn post_load(schema: &Schema, mut document: Document, context: &mut ResolutionContext) -> Result<()> {
    let type_name = schema.type_name.as_str();
    if context.contains(type_name, document.identifier()) {
        return Err(EngineError::DuplicateIdentifier {
            type_name: type_name.to_string(),
            identifier: document.identifier().to_string(),
        });
    }

    for dependency in document.dependencies(schema.merge_mode) {
        let source = context
            .get(type_name, &dependency)
            .ok_or_else(|| EngineError::UnresolvedDependency {
                type_name: type_name.to_string(),
                dependencies: vec![dependency.clone()],
            })?;
        match schema.merge_mode {
            MergeMode::Inheritance => document.apply_defaults(source),
            MergeMode::Composition => document.import_from(source),
        }
    }

    context.insert(type_name, document)
}

/// Resolve all documents of the handler's type into `context`.
pub fn resolve(
    handler: &dyn TypeHandler,
    documents: Vec<Document>,
    context: &mut ResolutionContext,
) -> Result<()> {
    let type_name = handler.type_name().to_string();
    let mode = handler.merge_mode();

    {
        let mut seen = HashSet::new();
        for document in &documents {
            if !seen.insert(document.identifier()) {
                return Err(EngineError::DuplicateIdentifier {
                    type_name,
                    identifier: document.identifier().to_string(),
                });
            }
        }
    }

    let mut remaining = documents;
    let mut batch = 0;
    while !remaining.is_empty() {
        let (ready, pending): (Vec<Document>, Vec<Document>) =
            remaining.into_iter().partition(|document| {
                document
                    .dependencies(mode)
                    .iter()
                    .all(|dependency| context.contains(&type_name, dependency))
            });
        remaining = pending;
        if ready.is_empty() {
            break;
        }

        batch += 1;
        tracing::debug!("Resolving {} batch {} ({} documents)", type_name, batch, ready.len());
        for document in ready {
            handler.post_load(document, context)?;
        }
    }

    if remaining.is_empty() {
        return Ok(());
    }

    let mut unresolved: Vec<String> = Vec::new();
    for document in &remaining {
        for dependency in document.dependencies(mode) {
            if !context.contains(&type_name, &dependency) && !unresolved.contains(&dependency) {
                unresolved.push(dependency);
            }
        }
    }
    Err(EngineError::UnresolvedDependency {
        type_name,
        dependencies: unresolved,
    })
}

//! Error types for the mapping engine and its file-side collaborators.
//!
//! [`EngineError`] covers everything the engine itself can raise. Every
//! variant aborts the current operation; nothing is retried internally.
//! [`LoadError`] wraps the engine errors together with the I/O and codec
//! failures raised by the loader, the table codecs and the CLI.

use std::path::PathBuf;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by schema registration, dependency resolution, packing and
/// unpacking.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// A schema tried to claim one of the registry's reserved type names.
    #[error("failed to load schema: {type_name} is a reserved keyword")]
    ReservedName { type_name: String },

    /// A schema definition is malformed.
    #[error("schema {schema} is malformed: {reason}")]
    SchemaShape { schema: String, reason: String },

    /// Two documents of the same type share an identifier.
    #[error(
        "{type_name} identifier {identifier} is declared twice; files without an explicit \
         \"identifier\" field use their lowercased filename as an identifier"
    )]
    DuplicateIdentifier {
        type_name: String,
        identifier: String,
    },

    /// Documents remain whose dependencies could not be satisfied.
    ///
    /// Missing and circular dependencies are reported the same way.
    #[error(
        "one or more dependencies of type {type_name} were not found; either they do not \
         exist, or there is a circular dependency somewhere. Unresolved dependencies: \
         {dependencies:?}"
    )]
    UnresolvedDependency {
        type_name: String,
        dependencies: Vec<String>,
    },

    /// Two documents or variants claimed the same row.
    #[error("attempted to write to {type_name} row ID {id} twice; each row ID must occur only once")]
    DuplicateRowId { type_name: String, id: usize },

    /// A row id beyond the largest table the packer will build.
    #[error("{type_name} row ID {id} is out of range; the highest allowed row ID is {limit}")]
    RowIdOutOfRange {
        type_name: String,
        id: usize,
        limit: usize,
    },

    /// A path-tree branch does not have the declared depth.
    #[error("{type_name} path {path} has depth {found}, but the schema tree declares depth {expected}")]
    TreeDepthMismatch {
        type_name: String,
        path: String,
        expected: usize,
        found: usize,
    },

    /// A value cannot be written to a table cell.
    #[error("{type_name} value at {path} is not {expected}")]
    LeafShape {
        type_name: String,
        path: String,
        expected: &'static str,
    },

    /// A column alias (or a computed top-level key) collides with a reserved field.
    #[error("{type_name} alias {alias} collides with a reserved field name")]
    ColumnAliasConflict { type_name: String, alias: String },

    /// A reconstruction path runs through a value that is not a mapping.
    #[error("{type_name} path {path} passes through a value that is not a mapping")]
    PathConflict { type_name: String, path: String },

    /// No schema is registered for the requested type.
    #[error("no schema was loaded for the file type \"{type_name}\"")]
    UnknownType { type_name: String },

    /// Composition types cannot take variants.
    #[error("schema \"{type_name}\" is not safe to merge")]
    NotMergeable { type_name: String },
}

/// Errors raised while reading documents, talking to the table codec, or
/// driving the engine from the command line.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("table codec failed on {path}: {detail}")]
    Codec { path: PathBuf, detail: String },

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl LoadError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LoadError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn yaml(path: impl Into<PathBuf>, source: serde_yaml::Error) -> Self {
        LoadError::Yaml {
            path: path.into(),
            source,
        }
    }
}

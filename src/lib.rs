//! # yaml2da: Schema-Driven YAML2DA <-> 2DA Conversion
//!
//! yaml2da converts between hand-editable YAML2DA documents and the indexed
//! 2DA tables a game engine reads. The conversion is driven entirely by
//! declarative schemas.
//!
//! ## Features
//!
//! - **Schema registry**: Compile YAML schema definitions into type handlers
//! - **Dependency resolution**: `inherits` (defaults) and `imports` (deep merge) between documents
//! - **Id-indexed packing**: One row per document, with nested `variants` overlaying their parent row
//! - **Path-tree packing**: Flatten one composite document into many rows
//! - **Unpacking**: Rebuild documents from tables with coercion, clamping and value maps
//!
//! ## Example: Per-Row Schema
//!
//! ```yaml
//! yamlType: schema
//! typeName: spells
//! labelField: label
//! columns:
//!   Label: label
//!   Innate:
//!     alias: innateLevel
//!     minimum: 0
//!     maximum: 9
//! ```
//!
//! ```yaml
//! yamlType: spells
//! id: 12
//! label: Fireball
//! innateLevel: 3
//! variants:
//!   - id: 13
//!     label: Fireball_Empowered
//! ```
//!
//! ## Example: Composite Schema
//!
//! ```yaml
//! yamlType: schema
//! typeName: race_feat
//! multipleFiles: true
//! columns:
//!   FeatLabel: { alias: label, noCoerce: true }
//!   FeatIndex: { alias: index, critical: true }
//! tree: [feats, FeatLabel, FeatIndex]
//! ```
//!
//! ```yaml
//! yamlType: race_feat
//! generateOutput: true
//! feats:
//!   Darkvision: 228
//!   Immunity_Sleep: [235, 236]
//! ```

// Core engine
pub mod document;
pub mod error;
pub mod pack;
pub mod pipeline;
pub mod resolver;
pub mod schema;
pub mod table;
pub mod unpack;

// File-side collaborators
pub mod codec;
pub mod loader;

// Re-export key types
pub use codec::{Nwn2daCodec, TableCodec, YamlCodec};
pub use document::Document;
pub use error::{EngineError, LoadError, Result};
pub use pack::PackedTable;
pub use pipeline::{ExportOptions, ExportedTable, Imported};
pub use resolver::ResolutionContext;
pub use schema::{MergeMode, Registry, Schema, SchemaDef, TypeHandler};
pub use table::{Cell, Row, Table};
pub use unpack::UnpackOptions;

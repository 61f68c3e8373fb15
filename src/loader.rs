//! YAML2DA document loading and writing.
//!
//! Documents are discovered recursively under the given paths. A document's
//! identifier defaults to its lowercased file stem.

use std::fs;
use std::path::{Path, PathBuf};

use crate::document::{Document, SCHEMA_TYPE};
use crate::error::LoadError;

/// Whether `path` has a `.yml` or `.yaml` extension (any case).
pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map_or(false, |extension| {
            extension.eq_ignore_ascii_case("yml") || extension.eq_ignore_ascii_case("yaml")
        })
}

/// Lowercased file stem, used as the default document identifier.
pub fn file_identifier(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Every file under `paths` (recursing into directories) that matches
/// `accept`, sorted within each directory.
pub fn discover_files<P, F>(paths: &[P], accept: F) -> Result<Vec<PathBuf>, LoadError>
where
    P: AsRef<Path>,
    F: Fn(&Path) -> bool,
{
    let mut files = Vec::new();
    for path in paths {
        collect_files(path.as_ref(), &accept, &mut files)?;
    }
    Ok(files)
}

fn collect_files(path: &Path, accept: &dyn Fn(&Path) -> bool, files: &mut Vec<PathBuf>) -> Result<(), LoadError> {
    let metadata = fs::metadata(path).map_err(|e| LoadError::io(path, e))?;
    if metadata.is_file() {
        if accept(path) {
            files.push(path.to_path_buf());
        }
        return Ok(());
    }

    let mut entries = fs::read_dir(path)
        .map_err(|e| LoadError::io(path, e))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LoadError::io(path, e))?;
    entries.sort();

    for entry in entries {
        collect_files(&entry, accept, files)?;
    }
    Ok(())
}

/// Read one document. `None` if the file does not hold a YAML mapping.
pub fn read_document(path: &Path) -> Result<Option<Document>, LoadError> {
    let content = fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
    let value: serde_yaml::Value = serde_yaml::from_str(&content).map_err(|e| LoadError::yaml(path, e))?;
    Ok(Document::from_value(file_identifier(path), value))
}

/// Read every YAML document under `paths`.
///
/// With a non-empty `filter`, only documents of those types (and schema
/// documents) are kept.
pub fn read_documents<P: AsRef<Path>>(paths: &[P], filter: &[String]) -> Result<Vec<Document>, LoadError> {
    let mut documents = Vec::new();
    for path in discover_files(paths, is_yaml_file)? {
        let Some(document) = read_document(&path)? else {
            tracing::debug!("Skipping {}: not a mapping", path.display());
            continue;
        };
        let keep = filter.is_empty()
            || document
                .type_name()
                .map_or(false, |type_name| type_name == SCHEMA_TYPE || filter.iter().any(|f| f == type_name));
        if keep {
            documents.push(document);
        }
    }
    tracing::debug!("Loaded {} documents", documents.len());
    Ok(documents)
}

/// Write a document as YAML, creating parent directories.
pub fn write_document(document: &Document, path: &Path) -> Result<(), LoadError> {
    let content = serde_yaml::to_string(document.fields()).map_err(|e| LoadError::yaml(path, e))?;
    write_file(path, &content)
}

pub(crate) fn write_file(path: &Path, content: &str) -> Result<(), LoadError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| LoadError::io(parent, e))?;
        }
    }
    fs::write(path, content).map_err(|e| LoadError::io(path, e))
}

/// Strip characters that are not allowed in file names.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>'))
        .collect();
    let cleaned = cleaned.trim_end_matches(['.', ' ']);
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

//! In-memory table value exchanged with the external 2DA codec.
//!
//! A table is an ordered list of column names and an ordered list of rows.
//! Each cell is a string or null; a row whose cells are all null is padding.
//! Row position is the row id.

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;

use crate::document::scalar_text;

/// A single table cell.
pub type Cell = Option<String>;

/// One table row, aligned with [`Table::columns`].
pub type Row = Vec<Cell>;

/// Marker the 2DA format uses for an empty cell.
pub const NULL_MARKER: &str = "****";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Table {
    /// Explicit type tag; when present, type detection only compares it.
    #[serde(rename = "yamlType", default, skip_serializing_if = "Option::is_none")]
    pub yaml_type: Option<String>,
    pub columns: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_rows")]
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            yaml_type: None,
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            yaml_type: None,
            columns,
            rows,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// A row with every cell null.
    pub fn padding_row(&self) -> Row {
        vec![None; self.columns.len()]
    }

    pub fn is_padding(row: &[Cell]) -> bool {
        row.iter().all(Option::is_none)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Cell text at `row`/`column`, or `None` for null and out-of-range.
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }
}

/// Codecs may emit numbers as YAML numbers and empty cells as `****`;
/// both are normalised into string-or-null cells.
fn deserialize_rows<'de, D>(deserializer: D) -> Result<Vec<Row>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Option<Vec<Value>>> = Deserialize::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|row| {
            row.unwrap_or_default()
                .iter()
                .map(|cell| scalar_text(cell).filter(|text| text != NULL_MARKER))
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_normalises_cells() {
        let yaml = "columns: [Label, Value]\nrows:\n  - [a, 1]\n  - ['****', ~]\n  - ~\n";
        let table: Table = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(table.columns, vec!["Label", "Value"]);
        assert_eq!(table.rows[0], vec![Some("a".to_string()), Some("1".to_string())]);
        assert_eq!(table.rows[1], vec![None, None]);
        assert!(table.rows[2].is_empty());
        assert!(Table::is_padding(&table.rows[1]));
        assert_eq!(table.yaml_type, None);
    }

    #[test]
    fn test_explicit_type_tag() {
        let table: Table = serde_yaml::from_str("yamlType: spells\ncolumns: [Label]\n").unwrap();
        assert_eq!(table.yaml_type.as_deref(), Some("spells"));
        assert!(table.rows.is_empty());
    }

    #[test]
    fn test_cell_lookup() {
        let table = Table::with_rows(
            vec!["A".into(), "B".into()],
            vec![vec![Some("x".into()), None]],
        );
        assert_eq!(table.column_index("B"), Some(1));
        assert_eq!(table.cell(0, 0), Some("x"));
        assert_eq!(table.cell(0, 1), None);
        assert_eq!(table.cell(3, 0), None);
        assert_eq!(table.padding_row(), vec![None, None]);
    }
}

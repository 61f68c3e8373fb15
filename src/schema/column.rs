//! Compiled column accessors.
//!
//! Every schema column compiles once, at registration, into a [`Column`]:
//! alias, forward and reverse value maps, clamp bounds and an optional
//! reconstruction path. Packing and unpacking only ever go through these.

use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde_yaml::Value;

use crate::document::scalar_text;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Output column name in the table.
    pub name: String,
    /// Document field the column reads from and writes to.
    pub alias: String,
    /// Forward value map: document value text -> table value.
    pub map: IndexMap<String, Value>,
    /// Reverse value map: table value text -> document value.
    pub reverse: IndexMap<String, Value>,
    pub minimum: i64,
    pub maximum: i64,
    pub critical: bool,
    pub optional: bool,
    pub no_coerce: bool,
    pub path: Option<ReconstructionPath>,
}

impl Column {
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
            map: IndexMap::new(),
            reverse: IndexMap::new(),
            minimum: i64::MIN,
            maximum: i64::MAX,
            critical: false,
            optional: false,
            no_coerce: false,
            path: None,
        }
    }

    /// Register a forward mapping and its reverse. The first reverse entry
    /// for a given table value wins.
    pub fn add_mapping(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(text) = scalar_text(&value) {
            self.reverse.entry(text).or_insert_with(|| Value::String(key.clone()));
        }
        self.map.entry(key).or_insert(value);
    }

    /// Register a reverse-only mapping, used by computed tree mappings whose
    /// forward value depends on the document.
    pub fn add_reverse(&mut self, table_value: &Value, key: impl Into<String>) {
        if let Some(text) = scalar_text(table_value) {
            self.reverse
                .entry(text)
                .or_insert_with(|| Value::String(key.into()));
        }
    }

    /// Cell text for a document value, after the forward map. `None` if the
    /// value is not a scalar.
    pub fn encode(&self, value: &Value) -> Option<String> {
        let text = scalar_text(value)?;
        match self.map.get(&text) {
            Some(mapped) => scalar_text(mapped),
            None => Some(text),
        }
    }

    /// Document value for a cell: coerce, clamp, then reverse-map.
    pub fn decode(&self, raw: &str) -> Value {
        let value = if self.no_coerce {
            Value::String(raw.to_string())
        } else {
            coerce(raw)
        };
        let value = self.clamp(value);
        scalar_text(&value)
            .and_then(|text| self.reverse.get(&text).cloned())
            .unwrap_or(value)
    }

    pub fn clamp(&self, value: Value) -> Value {
        let clamped = match &value {
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Some(Value::from(integer.clamp(self.minimum, self.maximum))),
                None => number
                    .as_f64()
                    .map(|float| Value::from(float.clamp(self.minimum as f64, self.maximum as f64))),
            },
            _ => None,
        };
        clamped.unwrap_or(value)
    }
}

/// Parse a cell as an integer, then as a finite float; otherwise keep the text.
pub fn coerce(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Value::from(integer);
    }
    match trimmed.parse::<f64>() {
        Ok(float) if float.is_finite() => Value::from(float),
        _ => Value::String(raw.to_string()),
    }
}

/// One segment of a reconstruction path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPart {
    /// A literal mapping key.
    Key(String),
    /// `[alias]`: the current row's value for another column.
    Reference(String),
}

/// Where an unpacked cell is written in a composite document, e.g.
/// `levels.[GrantedOnLevel].[List].[FeatLabel]` or `feats.[FeatLabel].#index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructionPath {
    pub parts: Vec<PathPart>,
    /// Set when the path ends in `#part`: the cell fills one part of a tuple.
    pub tuple_part: Option<String>,
    raw: String,
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\[([^\[\]]+)\]$").expect("reference pattern is valid"))
}

fn tuple_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^#([^#.\[\]]+)$").expect("tuple pattern is valid"))
}

impl ReconstructionPath {
    pub fn new(parts: Vec<PathPart>, tuple_part: Option<String>) -> Self {
        let mut raw = parts
            .iter()
            .map(|part| match part {
                PathPart::Key(key) => key.clone(),
                PathPart::Reference(alias) => format!("[{alias}]"),
            })
            .collect::<Vec<_>>()
            .join(".");
        if let Some(part) = &tuple_part {
            raw.push_str(&format!(".#{part}"));
        }
        Self {
            parts,
            tuple_part,
            raw,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let segments: Vec<&str> = raw.split('.').collect();
        let mut parts = Vec::new();
        let mut tuple_part = None;

        for (index, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(format!("path {raw} has an empty segment"));
            }
            if let Some(captures) = tuple_pattern().captures(segment) {
                if index + 1 != segments.len() {
                    return Err(format!("path {raw} has a tuple part before its end"));
                }
                tuple_part = Some(captures[1].to_string());
            } else if let Some(captures) = reference_pattern().captures(segment) {
                parts.push(PathPart::Reference(captures[1].to_string()));
            } else if segment.contains(['[', ']', '#']) {
                return Err(format!("path {raw} has a malformed segment {segment}"));
            } else {
                parts.push(PathPart::Key(segment.to_string()));
            }
        }

        if parts.is_empty() {
            return Err(format!("path {raw} names no key"));
        }
        Ok(Self {
            parts,
            tuple_part,
            raw: raw.to_string(),
        })
    }

    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            PathPart::Reference(alias) => Some(alias.as_str()),
            PathPart::Key(_) => None,
        })
    }

    /// Concrete keys for one row. `None` if a referenced value is missing.
    pub fn resolve(&self, row: &IndexMap<String, Value>) -> Option<Vec<Value>> {
        self.parts
            .iter()
            .map(|part| match part {
                PathPart::Key(key) => Some(Value::String(key.clone())),
                PathPart::Reference(alias) => row.get(alias).filter(|value| !value.is_null()).cloned(),
            })
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce() {
        assert_eq!(coerce("12"), Value::from(12));
        assert_eq!(coerce(" 1.5 "), Value::from(1.5));
        assert_eq!(coerce("abc"), Value::from("abc"));
        assert_eq!(coerce("NaN"), Value::from("NaN"));
        assert_eq!(coerce("inf"), Value::from("inf"));
    }

    #[test]
    fn test_decode_clamps() {
        let mut column = Column::new("Value", "value");
        column.maximum = 10;
        column.minimum = 0;

        assert_eq!(column.decode("15"), Value::from(10));
        assert_eq!(column.decode("-3"), Value::from(0));
        assert_eq!(column.decode("10.5"), Value::from(10.0));
        assert_eq!(column.decode("7"), Value::from(7));
    }

    #[test]
    fn test_decode_no_coerce() {
        let mut column = Column::new("Label", "label");
        column.no_coerce = true;
        assert_eq!(column.decode("0042"), Value::from("0042"));
    }

    #[test]
    fn test_mapping_round_trip() {
        let mut column = Column::new("List", "list");
        column.add_mapping("unlocks", Value::from(0));
        column.add_mapping("grants", Value::from(3));

        assert_eq!(column.encode(&Value::from("grants")), Some("3".to_string()));
        assert_eq!(column.encode(&Value::from("other")), Some("other".to_string()));
        assert_eq!(column.decode("3"), Value::from("grants"));
        assert_eq!(column.decode("9"), Value::from(9));
    }

    #[test]
    fn test_encode_rejects_containers() {
        let column = Column::new("Value", "value");
        assert_eq!(column.encode(&Value::Sequence(vec![])), None);
        assert_eq!(column.encode(&Value::Bool(true)), Some("1".to_string()));
    }

    #[test]
    fn test_parse_path() {
        let path = ReconstructionPath::parse("levels.[Level].[List].[Label]").unwrap();
        assert_eq!(
            path.parts,
            vec![
                PathPart::Key("levels".into()),
                PathPart::Reference("Level".into()),
                PathPart::Reference("List".into()),
                PathPart::Reference("Label".into()),
            ]
        );
        assert_eq!(path.tuple_part, None);
        assert_eq!(path.references().collect::<Vec<_>>(), vec!["Level", "List", "Label"]);

        let path = ReconstructionPath::parse("feats.[Label].#index").unwrap();
        assert_eq!(path.tuple_part.as_deref(), Some("index"));
        assert_eq!(path, ReconstructionPath::new(
            vec![PathPart::Key("feats".into()), PathPart::Reference("Label".into())],
            Some("index".into()),
        ));
    }

    #[test]
    fn test_parse_path_errors() {
        assert!(ReconstructionPath::parse("a..b").is_err());
        assert!(ReconstructionPath::parse("a.#x.b").is_err());
        assert!(ReconstructionPath::parse("#x").is_err());
        assert!(ReconstructionPath::parse("a.[b").is_err());
    }

    #[test]
    fn test_resolve_skips_missing_reference() {
        let path = ReconstructionPath::parse("feats.[label]").unwrap();
        let mut row = IndexMap::new();
        assert_eq!(path.resolve(&row), None);

        row.insert("label".to_string(), Value::from("Alertness"));
        assert_eq!(
            path.resolve(&row),
            Some(vec![Value::from("feats"), Value::from("Alertness")])
        );
    }
}

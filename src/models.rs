use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field added to every consolidated row naming the entity code that produced it.
pub const ORIGIN_FIELD: &str = "AGREGADO_ORIGEM";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_url: String,
    pub indicators: Vec<String>,
    pub timeout_secs: u64,
    pub credentials_file: String,
    pub output_directory: Option<String>,
    // Optional filter overrides, otherwise the defaults of each selector apply
    pub stage: Option<String>,
    pub discipline: Option<String>,
    pub network: Option<String>,
    pub api_headers: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let mut api_headers = BTreeMap::new();
        api_headers.insert("Content-Type".to_string(), "application/json".to_string());

        Self {
            api_url: "https://example.com/spaece/api/consulta".to_string(),
            indicators: Vec::new(),
            timeout_secs: 30,
            credentials_file: "credentials.toml".to_string(),
            output_directory: Some("output".to_string()),
            stage: None,
            discipline: None,
            network: None,
            api_headers,
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content)?;
        Ok(())
    }
}

pub type Row = Map<String, Value>;

/// Ordered rows plus the union of their field names in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// A table without rows or without a single column carries no data.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn has_columns(&self, names: &[&str]) -> bool {
        names.iter().all(|name| self.has_column(name))
    }

    /// Set `name` to `value` on every row.
    pub fn set_column(&mut self, name: &str, value: Value) {
        for row in &mut self.rows {
            row.insert(name.to_string(), value.clone());
        }
        if !self.has_column(name) {
            self.columns.push(name.to_string());
        }
    }

    /// Append the rows of `other`, extending the column list with unseen names.
    pub fn append(&mut self, other: Table) {
        for column in other.columns {
            if !self.has_column(&column) {
                self.columns.push(column);
            }
        }
        self.rows.extend(other.rows);
    }

    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&Row) -> bool,
    {
        self.rows.retain(f);
    }

    /// Text of `column` in the first row, if present and not blank.
    pub fn first_text(&self, column: &str) -> Option<String> {
        self.rows
            .first()
            .and_then(|row| row.get(column))
            .and_then(cell_text)
            .filter(|text| !text.trim().is_empty())
    }

    /// Distinct non-missing text values of `column`, in order of appearance.
    pub fn distinct_texts(&self, column: &str) -> Vec<String> {
        let mut values: Vec<String> = Vec::new();
        for row in &self.rows {
            if let Some(text) = row.get(column).and_then(cell_text) {
                if !values.contains(&text) {
                    values.push(text);
                }
            }
        }
        values
    }
}

/// Markers the API uses for absent measurements.
const MISSING_MARKERS: &[&str] = &["-", "N/A", "n/a", "", "NULL", "null", "None"];

/// Render a cell as text. `null` is missing; strings come back as-is.
pub fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn is_missing(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Numeric value of a cell, treating the API's missing markers and
/// unparseable text as absent.
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if MISSING_MARKERS.contains(&trimmed) {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
        }
        _ => None,
    }
}

pub fn row_number(row: &Row, column: &str) -> Option<f64> {
    row.get(column).and_then(parse_number)
}

pub fn row_text(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(cell_text)
}

/// Administrative level of an entity as reported in `TP_ENTIDADE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    State,
    Regional,
    Municipality,
    School,
}

impl EntityKind {
    /// Display order used by every view.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::State,
        EntityKind::Regional,
        EntityKind::Municipality,
        EntityKind::School,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            EntityKind::State => "01",
            EntityKind::Regional => "02",
            EntityKind::Municipality => "11",
            EntityKind::School => "03",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::State => "Ceará",
            EntityKind::Regional => "CREDE",
            EntityKind::Municipality => "Município",
            EntityKind::School => "Escola",
        }
    }

    /// Accepts `"01"` as well as numeric `1` or `1.0` coming from the JSON payload.
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        let padded = match code.parse::<f64>() {
            Ok(n) if n.is_finite() && n >= 0.0 && n.fract() == 0.0 => format!("{:02}", n as u64),
            _ => code.to_string(),
        };
        EntityKind::ALL.into_iter().find(|kind| kind.code() == padded)
    }

    pub fn of_row(row: &Row) -> Option<Self> {
        row_text(row, "TP_ENTIDADE").and_then(|code| Self::from_code(&code))
    }
}

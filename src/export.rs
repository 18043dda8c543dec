use crate::models::{cell_text, Table};
use anyhow::{Context, Result};
use csv::Writer;
use serde_json::Value;
use std::io;
use std::path::Path;

/// A view ready to be written out: display headers and one value per header in each row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ExportTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Every column of `table`, absent fields left empty.
    pub fn from_table(table: &Table) -> Self {
        let rows = table
            .rows
            .iter()
            .map(|row| {
                table
                    .columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self {
            headers: table.columns.clone(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn render(value: &Value) -> String {
    cell_text(value).unwrap_or_default()
}

pub fn write_csv<W: io::Write>(writer: W, table: &ExportTable) -> Result<()> {
    let mut writer = Writer::from_writer(writer);
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(render))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_csv_file(path: &Path, table: &ExportTable) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    write_csv(file, table).with_context(|| format!("Failed to write CSV: {}", path.display()))
}

#[cfg(test)]
pub fn to_csv_string(table: &ExportTable) -> Result<String> {
    let mut buffer = Vec::new();
    write_csv(&mut buffer, table)?;
    Ok(String::from_utf8(buffer)?)
}

/// Parse CSV back into text cells; empty cells come back as `null`.
#[cfg(test)]
pub fn read_csv<R: io::Read>(reader: R) -> Result<ExportTable> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = reader.headers()?.iter().map(str::to_string).collect();
    let mut table = ExportTable::new(headers);
    for record in reader.records() {
        let record = record?;
        table.rows.push(
            record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        Value::Null
                    } else {
                        Value::String(field.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(table)
}

#[cfg(test)]
pub fn read_csv_file(path: &Path) -> Result<ExportTable> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    read_csv(file)
}

//! CSV rendering of export-filter results.
//!
//! The vendor's native file export returns a ZIP archive that cannot be
//! opened, so files are built locally from the JSON rows instead.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::Path;

use serde_json::Value;

use crate::error::Result;
use crate::types::Entity;

/// Column order: every key that appears in any row, in first-seen order.
pub fn columns(rows: &[Entity]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for row in rows {
        for key in row.keys() {
            if seen.insert(key.as_str()) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn cell(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(v) => v.to_string(),
    }
}

/// Write `rows` as CSV with a header line. Writes nothing for no rows.
pub fn write_csv<W: io::Write>(rows: &[Entity], writer: W) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let headers = columns(rows);
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&headers)?;
    for row in rows {
        wtr.write_record(headers.iter().map(|h| cell(row.get(h))))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write `rows` to `path`, creating or truncating the file.
pub fn write_csv_file(rows: &[Entity], path: &Path) -> Result<()> {
    let file = File::create(path)?;
    write_csv(rows, file)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn row(value: Value) -> Entity {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn header_is_union_in_first_seen_order() {
        let rows = vec![
            row(json!({"Name": "Ann", "Age": 30})),
            row(json!({"Name": "Bo", "City": "Eugene"})),
        ];
        assert_eq!(columns(&rows), vec!["Name", "Age", "City"]);
    }

    #[test]
    fn renders_cells() {
        let rows = vec![
            row(json!({"Name": "Ann, Jr.", "Age": 30, "Active": true, "Notes": null})),
            row(json!({"Name": "Bo", "Tags": ["a", "b"]})),
        ];
        let mut out = Vec::new();
        write_csv(&rows, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "Name,Age,Active,Notes,Tags\n\"Ann, Jr.\",30,true,,\nBo,,,,\"[\"\"a\"\",\"\"b\"\"]\"\n"
        );
    }

    #[test]
    fn no_rows_writes_nothing() {
        let mut out = Vec::new();
        write_csv(&[], &mut out).unwrap();
        assert!(out.is_empty());
    }
}

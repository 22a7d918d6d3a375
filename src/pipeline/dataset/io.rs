use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::table::Dataset;
use super::DatasetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    #[default]
    Csv,
    /// A JSON array of row objects.
    Json,
    /// One JSON object per line.
    Jsonl,
}

impl TableFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Jsonl => "jsonl",
        }
    }

    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        ext.parse()
            .map_err(|_| DatasetError::UnsupportedFormat(path.display().to_string()))
    }
}

impl std::fmt::Display for TableFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TableFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            other => Err(format!("unknown table format '{other}' (expected csv, json or jsonl)")),
        }
    }
}

// ═══════════════════════════════════════════
// Reading
// ═══════════════════════════════════════════

/// Read a headed CSV table. Every row must have the header's width.
pub fn read_csv<R: Read>(reader: R) -> Result<Dataset, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let columns = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut dataset = Dataset::new(columns)?;

    for record in reader.records() {
        let record = record?;
        dataset.push_row(record.iter().map(str::to_string).collect())?;
    }
    Ok(dataset)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn dataset_from_objects(objects: Vec<Map<String, Value>>) -> Result<Dataset, DatasetError> {
    let mut columns: Vec<String> = Vec::new();
    for object in &objects {
        for key in object.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut dataset = Dataset::new(columns.clone())?;
    for object in &objects {
        let row = columns
            .iter()
            .map(|c| object.get(c).map(cell_text).unwrap_or_default())
            .collect();
        dataset.push_row(row)?;
    }
    Ok(dataset)
}

/// Read a JSON array of objects. Missing keys become empty cells.
pub fn read_json<R: Read>(reader: R) -> Result<Dataset, DatasetError> {
    let objects: Vec<Map<String, Value>> = serde_json::from_reader(reader)?;
    dataset_from_objects(objects)
}

/// Read one JSON object per non-blank line.
pub fn read_jsonl<R: Read>(mut reader: R) -> Result<Dataset, DatasetError> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    let objects = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(serde_json::from_str::<Map<String, Value>>)
        .collect::<Result<Vec<_>, _>>()?;
    dataset_from_objects(objects)
}

pub fn read_table(path: &Path, format: TableFormat) -> Result<Dataset, DatasetError> {
    let reader = BufReader::new(File::open(path)?);
    match format {
        TableFormat::Csv => read_csv(reader),
        TableFormat::Json => read_json(reader),
        TableFormat::Jsonl => read_jsonl(reader),
    }
}

// ═══════════════════════════════════════════
// Writing
// ═══════════════════════════════════════════

pub fn write_csv<W: Write>(dataset: &Dataset, writer: W) -> Result<(), DatasetError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(dataset.columns())?;
    for row in dataset.rows() {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn row_object(columns: &[String], row: &[String]) -> Map<String, Value> {
    columns
        .iter()
        .zip(row)
        .map(|(c, v)| (c.clone(), Value::String(v.clone())))
        .collect()
}

pub fn write_json<W: Write>(dataset: &Dataset, writer: W) -> Result<(), DatasetError> {
    let records: Vec<Value> = dataset
        .rows()
        .iter()
        .map(|row| Value::Object(row_object(dataset.columns(), row)))
        .collect();
    serde_json::to_writer_pretty(writer, &records)?;
    Ok(())
}

pub fn write_jsonl<W: Write>(dataset: &Dataset, mut writer: W) -> Result<(), DatasetError> {
    for row in dataset.rows() {
        serde_json::to_writer(&mut writer, &row_object(dataset.columns(), row))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_table(dataset: &Dataset, path: &Path, format: TableFormat) -> Result<(), DatasetError> {
    let mut writer = BufWriter::new(File::create(path)?);
    match format {
        TableFormat::Csv => write_csv(dataset, &mut writer)?,
        TableFormat::Json => write_json(dataset, &mut writer)?,
        TableFormat::Jsonl => write_jsonl(dataset, &mut writer)?,
    }
    writer.flush()?;
    tracing::info!(
        path = %path.display(),
        format = %format,
        rows = dataset.len(),
        "Wrote result table"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_keeps_quoted_newlines_and_commas() {
        let input = "id,Report Text\n1,\"Findings: mass, 2 cm.\nImpression: benign.\"\n";
        let ds = read_csv(input.as_bytes()).unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!(
            ds.get(0, "Report Text"),
            Some("Findings: mass, 2 cm.\nImpression: benign.")
        );
    }

    #[test]
    fn csv_headers_are_trimmed() {
        let ds = read_csv("id , Report Text\n1,x\n".as_bytes()).unwrap();
        assert!(ds.has_column("Report Text"));
    }

    #[test]
    fn ragged_csv_is_an_error() {
        assert!(read_csv("a,b\n1\n".as_bytes()).is_err());
    }

    #[test]
    fn csv_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let ds = Dataset::from_rows(
            vec!["id".into(), "text".into()],
            vec![vec!["1".into(), "a, \"quoted\" value".into()]],
        )
        .unwrap();

        write_table(&ds, &path, TableFormat::Csv).unwrap();
        let back = read_table(&path, TableFormat::Csv).unwrap();
        assert_eq!(back, ds);
    }

    #[test]
    fn json_input_stringifies_values() {
        let input = r#"[{"id": 1, "text": "benign", "flag": true}, {"id": 2, "text": null}]"#;
        let ds = read_json(input.as_bytes()).unwrap();
        assert_eq!(ds.get(0, "id"), Some("1"));
        assert_eq!(ds.get(0, "flag"), Some("true"));
        assert_eq!(ds.get(1, "text"), Some(""));
        assert_eq!(ds.get(1, "flag"), Some(""), "missing key becomes empty cell");
    }

    #[test]
    fn json_input_keeps_column_order() {
        let input = r#"[{"zeta": "1", "Report Text": "benign", "alpha": "x"}, {"mid": "m", "alpha": "y"}]"#;
        let ds = read_json(input.as_bytes()).unwrap();
        assert_eq!(ds.columns(), ["zeta", "Report Text", "alpha", "mid"]);

        let lines = "{\"b\": 1, \"a\": 2}\n{\"c\": 3}\n";
        let ds = read_jsonl(lines.as_bytes()).unwrap();
        assert_eq!(ds.columns(), ["b", "a", "c"]);

        let mut out = Vec::new();
        write_jsonl(&ds, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("{\"b\":\"1\",\"a\":\"2\",\"c\":\"\"}"));
    }

    #[test]
    fn jsonl_writes_one_object_per_line() {
        let ds = Dataset::from_rows(
            vec!["id".into()],
            vec![vec!["1".into()], vec!["2".into()]],
        )
        .unwrap();
        let mut out = Vec::new();
        write_jsonl(&ds, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "{\"id\":\"1\"}\n{\"id\":\"2\"}\n");

        let back = read_jsonl(text.as_bytes()).unwrap();
        assert_eq!(back, ds);
    }

    #[test]
    fn json_output_is_array_of_records() {
        let ds = Dataset::from_rows(vec!["id".into()], vec![vec!["7".into()]]).unwrap();
        let mut out = Vec::new();
        write_json(&ds, &mut out).unwrap();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed, serde_json::json!([{"id": "7"}]));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(TableFormat::from_path(Path::new("a/b.CSV")).unwrap(), TableFormat::Csv);
        assert_eq!(TableFormat::from_path(Path::new("x.jsonl")).unwrap(), TableFormat::Jsonl);
        assert!(TableFormat::from_path(Path::new("x.xlsx")).is_err());
    }
}

use crate::config::{DatasetSource, Encoding};
use crate::error::{FleetError, Result};
use crate::types::{Dataset, Value, VehicleRecord};
use csv::ReaderBuilder;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub total_rows: usize,
    pub loaded_rows: usize,
    pub parse_errors: usize,
    pub missing_columns: Vec<String>,
}

// Datasets are immutable once loaded, so every caller can share one copy
// per file and encoding for the lifetime of the process.
static CACHE: Lazy<Mutex<HashMap<(PathBuf, Encoding), (Arc<Dataset>, LoadReport)>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Decode raw file bytes. Latin-1 maps every byte to the code point of the
/// same value, so it cannot fail.
pub fn decode(path: &Path, bytes: Vec<u8>, encoding: Encoding) -> Result<String> {
    let mut text = match encoding {
        Encoding::Utf8 => String::from_utf8(bytes).map_err(|e| FleetError::Parse {
            path: path.to_path_buf(),
            message: format!(
                "not valid UTF-8 at byte {} (try latin1 encoding)",
                e.utf8_error().valid_up_to()
            ),
        })?,
        Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
    };
    if text.starts_with('\u{feff}') {
        text.remove(0);
    }
    Ok(text)
}

/// Parse CSV text into a dataset. Rows that the CSV reader rejects are
/// counted and skipped; a file without a usable header is fatal.
pub fn parse_dataset(
    name: &str,
    path: &Path,
    text: &str,
    expected: &[&str],
) -> Result<(Dataset, LoadReport)> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| FleetError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(FleetError::Parse {
            path: path.to_path_buf(),
            message: "missing header row".to_string(),
        });
    }

    let mut total_rows = 0usize;
    let mut parse_errors = 0usize;
    let mut records = Vec::new();
    for result in rdr.records() {
        total_rows += 1;
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                debug!("{}: skipping row {}: {}", name, total_rows, e);
                parse_errors += 1;
                continue;
            }
        };
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let mut rec = VehicleRecord::new(total_rows);
        for (i, h) in headers.iter().enumerate() {
            if h.is_empty() {
                continue;
            }
            // Short rows in a flexible file leave trailing fields missing.
            let v = row.get(i).map(Value::parse).unwrap_or(Value::Missing);
            rec = rec.with(h, v);
        }
        records.push(rec);
    }

    let dataset = Dataset::new(
        name,
        headers.into_iter().filter(|h| !h.is_empty()).collect(),
        records,
    );
    let missing_columns = dataset.missing_columns(expected);
    if !missing_columns.is_empty() {
        warn!("{}: missing columns {:?}", name, missing_columns);
    }
    if parse_errors > 0 {
        warn!("{}: {} rows skipped due to parse errors", name, parse_errors);
    }
    let report = LoadReport {
        total_rows,
        loaded_rows: dataset.len(),
        parse_errors,
        missing_columns,
    };
    Ok((dataset, report))
}

pub fn load_dataset(
    name: &str,
    path: &Path,
    source: &DatasetSource,
    expected: &[&str],
) -> Result<(Dataset, LoadReport)> {
    let bytes = std::fs::read(path)?;
    let text = decode(path, bytes, source.encoding)?;
    let (dataset, report) = parse_dataset(name, path, &text, expected)?;
    info!(
        "{}: {} rows loaded from {} ({} skipped)",
        name,
        report.loaded_rows,
        path.display(),
        report.parse_errors
    );
    Ok((dataset, report))
}

/// Read-through cache over `load_dataset`, keyed by path and encoding.
/// `missing_columns` is checked against this caller's `expected` list.
pub fn load_cached(
    name: &str,
    path: &Path,
    source: &DatasetSource,
    expected: &[&str],
) -> Result<(Arc<Dataset>, LoadReport)> {
    let key = (path.to_path_buf(), source.encoding);
    let cached = {
        let cache = CACHE.lock().unwrap_or_else(|p| p.into_inner());
        cache.get(&key).cloned()
    };
    if let Some((ds, mut report)) = cached {
        debug!("{}: cache hit for {}", name, path.display());
        report.missing_columns = ds.missing_columns(expected);
        return Ok((ds, report));
    }
    let (dataset, report) = load_dataset(name, path, source, expected)?;
    let dataset = Arc::new(dataset);
    let mut cache = CACHE.lock().unwrap_or_else(|p| p.into_inner());
    cache.insert(key, (Arc::clone(&dataset), report.clone()));
    Ok((dataset, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f
    }

    #[test]
    fn parses_mixed_columns_and_reports_missing() {
        let text = "OEM_Make,MS_VehicleCategoryCode,LHL_CO2_gkm\nScania,N3,812.5\nIVECO,N3,\n";
        let (ds, report) = parse_dataset(
            "long_haul",
            Path::new("mem.csv"),
            text,
            &["OEM_Make", "LHL_CO2_gkm", "LHR_CO2_gkm"],
        )
        .unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.records[0].number("LHL_CO2_gkm"), Some(812.5));
        assert_eq!(ds.records[1].get("LHL_CO2_gkm"), Some(&Value::Missing));
        assert_eq!(ds.records[1].row, 2);
        assert_eq!(report.missing_columns, vec!["LHR_CO2_gkm"]);
    }

    #[test]
    fn numeric_looking_keys_group_by_cell_text() {
        let text = "cat,co2\n07,1\n7,2\n7.0,3\n7,4\n";
        let (ds, _) = parse_dataset("t", Path::new("mem.csv"), text, &[]).unwrap();
        let s = crate::engine::group_and_summarize(&ds.records, &["cat"], &["co2"]).unwrap();
        let keys: Vec<String> = s.groups.iter().map(|g| g.key.to_string()).collect();
        assert_eq!(keys, vec!["07", "7", "7.0"]);
        assert_eq!(s.groups[1].count, 2);
    }

    #[test]
    fn short_rows_fill_missing() {
        let text = "a,b,c\n1,2\n";
        let (ds, _) = parse_dataset("t", Path::new("mem.csv"), text, &[]).unwrap();
        assert_eq!(ds.records[0].get("c"), Some(&Value::Missing));
    }

    #[test]
    fn latin1_file_decodes() {
        // "Misión" with ó encoded as 0xF3
        let f = write_file(b"OEM_Make,Misi\xf3n\nMAN,Regional\n");
        let source = DatasetSource {
            file: f.path().to_path_buf(),
            encoding: Encoding::Latin1,
        };
        let (ds, _) = load_dataset("regional", f.path(), &source, &[]).unwrap();
        assert!(ds.has_column("Misión"));
        assert_eq!(ds.records[0].text("Misión").as_deref(), Some("Regional"));
    }

    #[test]
    fn latin1_bytes_as_utf8_is_a_parse_error() {
        let f = write_file(b"OEM_Make,Misi\xf3n\nMAN,Regional\n");
        let source = DatasetSource {
            file: f.path().to_path_buf(),
            encoding: Encoding::Utf8,
        };
        assert!(matches!(
            load_dataset("regional", f.path(), &source, &[]),
            Err(FleetError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let source = DatasetSource {
            file: PathBuf::from("does-not-exist.csv"),
            encoding: Encoding::Utf8,
        };
        assert!(matches!(
            load_dataset("x", Path::new("does-not-exist.csv"), &source, &[]),
            Err(FleetError::Io(_))
        ));
    }

    #[test]
    fn bom_is_stripped() {
        let text = decode(Path::new("x"), b"\xef\xbb\xbfa,b\n".to_vec(), Encoding::Utf8).unwrap();
        assert_eq!(text, "a,b\n");
    }

    #[test]
    fn cache_returns_shared_dataset() {
        let f = write_file(b"OEM_Make,R_CO2_gkm\nVolvo,700\n");
        let source = DatasetSource {
            file: f.path().to_path_buf(),
            encoding: Encoding::Utf8,
        };
        let (a, _) = load_cached("urban", f.path(), &source, &[]).unwrap();
        let (b, _) = load_cached("urban", f.path(), &source, &[]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cache_separates_encodings_and_expected_columns() {
        let f = write_file(b"OEM_Make,Misi\xf3n\nMAN,Regional\n");
        let latin1 = DatasetSource {
            file: f.path().to_path_buf(),
            encoding: Encoding::Latin1,
        };
        let utf8 = DatasetSource {
            file: f.path().to_path_buf(),
            encoding: Encoding::Utf8,
        };
        let (ds, report) = load_cached("regional", f.path(), &latin1, &["OEM_Make"]).unwrap();
        assert!(ds.has_column("Misión"));
        assert!(report.missing_columns.is_empty());

        let (_, report) = load_cached("regional", f.path(), &latin1, &["OEM_Model"]).unwrap();
        assert_eq!(report.missing_columns, vec!["OEM_Model"]);

        assert!(matches!(
            load_cached("regional", f.path(), &utf8, &[]),
            Err(FleetError::Parse { .. })
        ));
    }
}

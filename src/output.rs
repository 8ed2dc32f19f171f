use crate::error::Result;
use crate::types::{DatasetStatus, DatasetStatusRow, Report, ReportTable};
use crate::util::format_int;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::{builder::Builder, settings::Style, Table, Tabled};

pub fn write_csv(path: &Path, table: &ReportTable) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(&table.headers)?;
    for r in &table.rows {
        wtr.write_record(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

/// Export every table of a report as `<dataset>_<table>.csv` under `dir`.
pub fn write_report(dir: &Path, report: &Report) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(report.tables.len());
    for t in &report.tables {
        let path = dir.join(format!("{}_{}.csv", report.dataset, t.id));
        write_csv(&path, t)?;
        written.push(path);
    }
    Ok(written)
}

pub fn render_table(table: &ReportTable, max_rows: usize) -> String {
    let mut builder = Builder::default();
    builder.push_record(table.headers.iter().cloned());
    for r in table.rows.iter().take(max_rows) {
        builder.push_record(r.iter().cloned());
    }
    builder.build().with(Style::markdown()).to_string()
}

pub fn preview_table(table: &ReportTable, max_rows: usize) {
    println!("{}", table.title);
    println!();
    if table.rows.is_empty() {
        println!("(no rows)\n");
        return;
    }
    println!("{}", render_table(table, max_rows));
    if table.rows.len() > max_rows {
        println!(
            "({} of {} rows shown)",
            format_int(max_rows),
            format_int(table.rows.len())
        );
    }
    println!();
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().cloned().take(max_rows).collect();
    if slice.is_empty() {
        println!("(no rows)\n");
        return;
    }
    let table_str = Table::new(slice).with(Style::markdown()).to_string();
    println!("{}\n", table_str);
}

/// Console rendering of a whole report: an explicit notice when the dataset
/// could not be loaded, otherwise tables, findings and warnings.
pub fn print_report(report: &Report, max_rows: usize) {
    println!("== {} ==\n", report.dataset);
    if let DatasetStatus::Unavailable(reason) = &report.status {
        println!("Dataset unavailable: {}\n", reason);
        return;
    }
    println!(
        "{} rows loaded.",
        format_int(report.rows)
    );
    if !report.missing_columns.is_empty() {
        println!("Missing columns: {}", report.missing_columns.join(", "));
    }
    println!();
    for t in &report.tables {
        preview_table(t, max_rows);
    }
    if !report.findings.is_empty() {
        println!("Findings\n");
        preview_table_rows(&report.findings, report.findings.len());
    }
    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for w in &report.warnings {
            println!("  - {}", w);
        }
        println!();
    }
}

pub fn status_rows(reports: &[Report]) -> Vec<DatasetStatusRow> {
    reports
        .iter()
        .map(|r| DatasetStatusRow {
            dataset: r.dataset.clone(),
            status: match &r.status {
                DatasetStatus::Available => "available".to_string(),
                DatasetStatus::Unavailable(_) => "unavailable".to_string(),
            },
            rows: format_int(r.rows),
            tables: r.tables.len(),
            warnings: r.warnings.len(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ReportTable {
        let mut t = ReportTable::new("fuel", "Fuel cost", &["Make", "Cost"]);
        t.push(vec!["Isuzu".to_string(), "1,020.00".to_string()]);
        t.push(vec!["Volvo".to_string(), "1,410.50".to_string()]);
        t
    }

    #[test]
    fn render_table_is_markdown_and_truncates() {
        let s = render_table(&table(), 1);
        assert!(s.contains("| Make"));
        assert!(s.contains("Isuzu"));
        assert!(!s.contains("Volvo"));
    }

    #[test]
    fn write_report_exports_each_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Report::new("urban", 2);
        report.tables.push(table());
        let paths = write_report(dir.path(), &report).unwrap();
        assert_eq!(paths, vec![dir.path().join("urban_fuel.csv")]);
        let text = std::fs::read_to_string(&paths[0]).unwrap();
        assert_eq!(text, "Make,Cost\nIsuzu,\"1,020.00\"\nVolvo,\"1,410.50\"\n");
    }

    #[test]
    fn status_rows_flag_unavailable_datasets() {
        let reports = vec![
            Report::new("urban", 1200),
            Report::unavailable("regional", "No such file".to_string()),
        ];
        let rows = status_rows(&reports);
        assert_eq!(rows[0].rows, "1,200");
        assert_eq!(rows[1].status, "unavailable");
    }
}

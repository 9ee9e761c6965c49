//! Reading wide-format source sheets.
//!
//! A source holds one variable: row 0 lists entities from column 1 onward and
//! column 0 lists periods from row 1 onward. Workbooks are read with calamine,
//! CSV files with the `csv` crate. Either way the sheet is loaded into a
//! [`RawTable`] grid and the file handle is released before returning.

use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{PanelError, Result};

/// One named input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Variable name the sheet's values are tagged with.
    pub name: String,
    pub path: PathBuf,
    /// Worksheet to read; the first sheet when unset. Ignored for CSV.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
}

impl SourceSpec {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            sheet: None,
        }
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    /// Parses a `NAME=PATH` command-line pair.
    pub fn parse_pair(pair: &str) -> Result<Self> {
        let (name, path) = pair.split_once('=').ok_or_else(|| {
            PanelError::InvalidArgument(format!("expected NAME=PATH, got '{}'", pair))
        })?;
        let (name, path) = (name.trim(), path.trim());
        if name.is_empty() || path.is_empty() {
            return Err(PanelError::InvalidArgument(format!(
                "expected NAME=PATH, got '{}'",
                pair
            )));
        }
        Ok(Self::new(name, path))
    }
}

/// A single spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Builds a cell from raw CSV text. Blank text is `Empty`.
    pub fn from_text(text: &str) -> Self {
        if text.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(text.to_string())
        }
    }

    /// Numeric view of the cell. Unparseable text and non-finite numbers are missing.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Cell::Number(v) => Some(*v),
            Cell::Text(s) => s.trim().parse::<f64>().ok(),
            Cell::Empty => None,
        };
        value.filter(|v| v.is_finite())
    }

    /// Trimmed text view of the cell, used for entity labels.
    pub fn label(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Number(v) => format_number(*v),
            Cell::Text(s) => s.trim().to_string(),
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::String(s) => Cell::from_text(s),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(dt) => Cell::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::from_text(s),
            Data::Error(_) | Data::Empty => Cell::Empty,
        }
    }
}

pub(crate) fn format_number(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 {
        format!("{:.0}", v)
    } else {
        v.to_string()
    }
}

/// One input sheet as a rectangular-ish grid of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    /// Where the table came from; empty for in-memory tables.
    pub path: PathBuf,
    /// Declared variable name.
    pub variable: String,
    pub rows: Vec<Vec<Cell>>,
}

impl RawTable {
    pub fn new(variable: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            path: PathBuf::new(),
            variable: variable.into(),
            rows,
        }
    }

    /// Builds a table from text cells, the way a CSV reader would see them.
    pub fn from_strings(variable: impl Into<String>, rows: &[&[&str]]) -> Self {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|s| Cell::from_text(s)).collect())
            .collect();
        Self::new(variable, rows)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Width of the widest row; ragged rows read as `Empty` past their end.
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        const EMPTY: &Cell = &Cell::Empty;
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(EMPTY)
    }

    /// Fails unless there is at least one entity column and one period row.
    pub fn check_shape(&self) -> Result<()> {
        let (rows, cols) = (self.height(), self.width());
        if rows < 2 || cols < 2 {
            return Err(PanelError::MalformedTable {
                path: self.path.display().to_string(),
                rows,
                cols,
            });
        }
        Ok(())
    }
}

/// Reads one source into a [`RawTable`], dispatching on the file extension.
pub fn read_table(spec: &SourceSpec) -> Result<RawTable> {
    let path = spec.path.as_path();
    if !path.exists() {
        return Err(PanelError::FileNotFound(path.display().to_string()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let rows = match extension.as_str() {
        "csv" => read_csv_rows(path)?,
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => read_workbook_rows(path, spec.sheet.as_deref())?,
        _ => return Err(PanelError::UnsupportedFormat(path.display().to_string())),
    };

    let table = RawTable {
        path: path.to_path_buf(),
        variable: spec.name.clone(),
        rows,
    };
    table.check_shape()?;
    info!(
        variable = %spec.name,
        path = %path.display(),
        periods = table.height() - 1,
        entities = table.width() - 1,
        "read source"
    );
    Ok(table)
}

fn read_csv_rows(path: &Path) -> Result<Vec<Vec<Cell>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(Cell::from_text).collect());
    }
    debug!(path = %path.display(), rows = rows.len(), "decoded csv");
    Ok(rows)
}

fn read_workbook_rows(path: &Path, sheet: Option<&str>) -> Result<Vec<Vec<Cell>>> {
    let mut workbook = open_workbook_auto(path)?;
    let range = match sheet {
        Some(name) => workbook
            .worksheet_range(name)
            .map_err(|e| PanelError::SheetNotFound(format!("{}: {}", name, e)))?,
        None => workbook.worksheet_range_at(0).ok_or_else(|| {
            PanelError::SheetNotFound(format!("{}: workbook has no sheets", path.display()))
        })??,
    };
    let rows = range
        .rows()
        .map(|row| row.iter().map(Cell::from).collect())
        .collect();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{ExcelDateTime, ExcelDateTimeType};
    use std::io::Write;

    #[test]
    fn test_cell_numeric_view() {
        assert_eq!(Cell::Number(2.5).as_f64(), Some(2.5));
        assert_eq!(Cell::Text(" 3.25 ".to_string()).as_f64(), Some(3.25));
        assert_eq!(Cell::Text("..".to_string()).as_f64(), None);
        assert_eq!(Cell::Text("NaN".to_string()).as_f64(), None);
        assert_eq!(Cell::Number(f64::NAN).as_f64(), None);
        assert_eq!(Cell::Empty.as_f64(), None);
    }

    #[test]
    fn test_cell_label() {
        assert_eq!(Cell::Text("  China ".to_string()).label(), "China");
        assert_eq!(Cell::Number(2000.0).label(), "2000");
        assert_eq!(Cell::Number(1.5).label(), "1.5");
        assert_eq!(Cell::Empty.label(), "");
    }

    #[test]
    fn test_from_calamine_data() {
        assert_eq!(Cell::from(&Data::Int(7)), Cell::Number(7.0));
        assert_eq!(Cell::from(&Data::Float(0.5)), Cell::Number(0.5));
        assert_eq!(Cell::from(&Data::String("  ".to_string())), Cell::Empty);
        assert_eq!(Cell::from(&Data::Empty), Cell::Empty);
        let date = ExcelDateTime::new(43831.0, ExcelDateTimeType::DateTime, false);
        assert_eq!(Cell::from(&Data::DateTime(date)), Cell::Number(43831.0));
    }

    fn write_workbook(path: &Path) {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let gwg = workbook.add_worksheet();
        gwg.set_name("GWG").unwrap();
        gwg.write_string(0, 1, " Chile ").unwrap();
        gwg.write_string(0, 2, "Peru").unwrap();
        gwg.write_number(1, 0, 2000.0).unwrap();
        gwg.write_number(1, 1, 0.12).unwrap();
        gwg.write_string(1, 2, "..").unwrap();
        gwg.write_string(2, 0, "2001").unwrap();
        gwg.write_number(2, 2, 0.25).unwrap();
        let fdi = workbook.add_worksheet();
        fdi.set_name("FDI").unwrap();
        fdi.write_string(0, 1, "Kenya").unwrap();
        fdi.write_number(1, 0, 1999.0).unwrap();
        fdi.write_number(1, 1, 4.5).unwrap();
        workbook.save(path).unwrap();
    }

    #[test]
    fn test_read_workbook_first_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.xlsx");
        write_workbook(&path);

        let table = read_table(&SourceSpec::new("GWG", &path)).unwrap();
        assert_eq!(table.height(), 3);
        assert_eq!(table.width(), 3);
        assert_eq!(table.cell(0, 1).label(), "Chile");
        assert_eq!(table.cell(1, 0), &Cell::Number(2000.0));
        assert_eq!(table.cell(1, 1).as_f64(), Some(0.12));
        assert_eq!(table.cell(1, 2).as_f64(), None);
        assert_eq!(table.cell(2, 0).as_f64(), Some(2001.0));
        assert_eq!(table.cell(2, 1), &Cell::Empty);
    }

    #[test]
    fn test_read_workbook_named_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.xlsx");
        write_workbook(&path);

        let table = read_table(&SourceSpec::new("FDI", &path).with_sheet("FDI")).unwrap();
        assert_eq!(table.variable, "FDI");
        assert_eq!(table.cell(0, 1).label(), "Kenya");
        assert_eq!(table.cell(1, 0).label(), "1999");
        assert_eq!(table.cell(1, 1), &Cell::Number(4.5));

        let missing = read_table(&SourceSpec::new("HDI", &path).with_sheet("HDI"));
        assert!(matches!(missing, Err(PanelError::SheetNotFound(name)) if name.starts_with("HDI")));
    }

    #[test]
    fn test_ragged_rows_read_as_empty() {
        let table = RawTable::from_strings("X", &[&["", "A", "B"], &["2000", "1"]]);
        assert_eq!(table.width(), 3);
        assert_eq!(table.cell(1, 2), &Cell::Empty);
        assert_eq!(table.cell(9, 9), &Cell::Empty);
    }

    #[test]
    fn test_check_shape() {
        let only_header = RawTable::from_strings("X", &[&["", "A", "B"]]);
        assert!(matches!(
            only_header.check_shape(),
            Err(PanelError::MalformedTable { rows: 1, cols: 3, .. })
        ));
        let only_periods = RawTable::from_strings("X", &[&["year"], &["2000"]]);
        assert!(only_periods.check_shape().is_err());
    }

    #[test]
    fn test_parse_pair() {
        let spec = SourceSpec::parse_pair("GWG = data/gwg.csv").unwrap();
        assert_eq!(spec.name, "GWG");
        assert_eq!(spec.path, PathBuf::from("data/gwg.csv"));
        assert!(SourceSpec::parse_pair("GWG").is_err());
        assert!(SourceSpec::parse_pair("=x.csv").is_err());
    }

    #[test]
    fn test_read_csv_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fdi.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, ",Germany, France").unwrap();
        writeln!(file, "2000,1.5,2.5").unwrap();
        writeln!(file, "2001,,3").unwrap();
        drop(file);

        let table = read_table(&SourceSpec::new("FDI", &path)).unwrap();
        assert_eq!(table.variable, "FDI");
        assert_eq!(table.height(), 3);
        assert_eq!(table.width(), 3);
        assert_eq!(table.cell(0, 2).label(), "France");
        assert_eq!(table.cell(2, 1), &Cell::Empty);
    }

    #[test]
    fn test_read_missing_file() {
        let result = read_table(&SourceSpec::new("FDI", "does/not/exist.xlsx"));
        assert!(matches!(result, Err(PanelError::FileNotFound(_))));
    }

    #[test]
    fn test_read_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fdi.txt");
        std::fs::write(&path, "x").unwrap();
        let result = read_table(&SourceSpec::new("FDI", &path));
        assert!(matches!(result, Err(PanelError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_read_malformed_csv_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hdi.csv");
        std::fs::write(&path, ",Germany,France\n").unwrap();
        let result = read_table(&SourceSpec::new("HDI", &path));
        assert!(matches!(result, Err(PanelError::MalformedTable { .. })));
    }
}

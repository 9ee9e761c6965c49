//! Panel-data preparation for cross-country studies of foreign direct
//! investment (FDI) and the gender wage gap (GWG).
//!
//! Each input sheet holds one variable in wide layout: the first row lists
//! countries, the first column lists years. The pipeline reshapes every sheet
//! to long format, outer-joins them on `(entity, time)`, then closes gaps per
//! country by linear interpolation plus forward/backward fill. Rows that are
//! still incomplete afterwards are dropped, so downstream estimators never see
//! a missing tracked value.
//!
//! # Example
//!
//! ```ignore
//! use gwg_panel::{PanelBuilder, SourceSpec};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let results = PanelBuilder::new(vec![
//!         SourceSpec::new("GWG", "data/GWG.xlsx"),
//!         SourceSpec::new("FDI", "data/FDI.xlsx"),
//!         SourceSpec::new("GDP_PC", "data/GDP_per_Capita.xlsx"),
//!     ])
//!     .run()?;
//!
//!     results.summary();
//!     let df = results.filled().panel().to_dataframe();
//!     println!("{}", df);
//!     Ok(())
//! }
//! ```

use comfy_table::{Cell as TableCell, Table};
use getset::Getters;
use polars::prelude::PolarsError;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub mod diagnostics;
pub mod fallback;
pub mod fill;
pub mod manifest;
pub mod panel;
pub mod reshape;
pub mod simulate;
pub mod source;
pub mod transform;

pub use crate::diagnostics::{correlation_matrix, CorrelationMatrix, MissingSummary, PanelOverview};
pub use crate::fallback::{fit_with_fallback, FallbackError, Fitted, PanelEstimator, RankCheck};
pub use crate::fill::{FillReport, FilledPanel, GapFiller};
pub use crate::manifest::Manifest;
pub use crate::panel::{merge, Panel, Period, SortOrder};
pub use crate::reshape::{reshape, LongRecord, LongTable};
pub use crate::simulate::{simulate, SimulationConfig};
pub use crate::source::{read_table, Cell, RawTable, SourceSpec};
pub use crate::transform::{derive_lag, standardize, LagPolicy, LagSpec};

/// Error type for the `gwg_panel` library.
#[derive(Error, Debug)]
pub enum PanelError {
    /// A source path does not exist.
    #[error("File not found: {0}")]
    FileNotFound(String),
    /// The source file extension is not a spreadsheet or CSV format we read.
    #[error("Unsupported source format: {0}")]
    UnsupportedFormat(String),
    /// The workbook could not be opened or decoded.
    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),
    /// The requested sheet is absent from the workbook.
    #[error("Sheet not found: {0}")]
    SheetNotFound(String),
    /// A source lacks an entity header row or a period column.
    #[error("Malformed table {path}: need at least 2 rows and 2 columns, got {rows}x{cols}")]
    MalformedTable {
        path: String,
        rows: usize,
        cols: usize,
    },
    /// Two sources declare the same variable name.
    #[error("Duplicate variable: {0}")]
    DuplicateVariable(String),
    /// A named variable is not a column of the panel.
    #[error("Column not found: {0}")]
    ColumnNotFound(String),
    /// A configuration value is out of range or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for panel operations.
pub type Result<T> = std::result::Result<T, PanelError>;

#[derive(Debug, Clone)]
enum Source {
    File(SourceSpec),
    Table(RawTable),
}

impl Source {
    fn load(&self) -> Result<RawTable> {
        match self {
            Source::File(spec) => read_table(spec),
            Source::Table(table) => Ok(table.clone()),
        }
    }
}

/// The main entry point for configuring and running the panel pipeline.
///
/// Sources are merged in the order they are given; that order also fixes the
/// column order of the resulting panel.
#[derive(Debug, Clone)]
pub struct PanelBuilder {
    sources: Vec<Source>,
    sort_order: SortOrder,
    lag: Option<LagSpec>,
    standardize: Vec<String>,
}

impl PanelBuilder {
    /// Creates a builder over an ordered list of file sources.
    pub fn new(sources: Vec<SourceSpec>) -> Self {
        Self::with_sources(sources.into_iter().map(Source::File).collect())
    }

    /// Creates a builder over tables that are already in memory.
    ///
    /// Each table's `variable` names its column in the panel.
    pub fn from_tables(tables: Vec<RawTable>) -> Self {
        Self::with_sources(tables.into_iter().map(Source::Table).collect())
    }

    /// Creates a builder from a parsed run manifest.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut builder = Self::new(manifest.sources.clone());
        builder
            .sort_order(manifest.sort)
            .standardize(&manifest.standardize);
        if let Some(lag) = &manifest.lag {
            builder.lag(lag.clone());
        }
        builder
    }

    fn with_sources(sources: Vec<Source>) -> Self {
        Self {
            sources,
            sort_order: SortOrder::default(),
            lag: None,
            standardize: Vec::new(),
        }
    }

    /// Sets the row order of the merged panel.
    pub fn sort_order(&mut self, order: SortOrder) -> &mut Self {
        self.sort_order = order;
        self
    }

    /// Derives a lagged copy of one variable after gap filling.
    pub fn lag(&mut self, spec: LagSpec) -> &mut Self {
        self.lag = Some(spec);
        self
    }

    /// Replaces the named variables with their z-scores as the final step.
    pub fn standardize<S: AsRef<str>>(&mut self, variables: &[S]) -> &mut Self {
        self.standardize = variables.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// Runs read, reshape, merge, fill and the configured derived columns.
    pub fn run(&self) -> Result<PanelResults> {
        if self.sources.is_empty() {
            return Err(PanelError::InvalidArgument(
                "at least one source is required".to_string(),
            ));
        }

        let mut long_tables = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let table = source.load()?;
            let variable = match source {
                Source::File(spec) => spec.name.clone(),
                Source::Table(t) => t.variable.clone(),
            };
            long_tables.push(reshape(&table, &variable)?);
        }

        let panel = merge(long_tables, self.sort_order)?;
        info!(
            rows = panel.len(),
            variables = panel.variables().len(),
            sort = ?self.sort_order,
            "merged panel"
        );
        let missing_before = MissingSummary::from_panel(&panel);

        let tracked = panel.variables().to_vec();
        let (mut filled, fill_report) = GapFiller::new(&tracked).fill(&panel)?;
        if !fill_report.dropped_entities().is_empty() {
            warn!(
                entities = ?fill_report.dropped_entities(),
                "entities dropped by completeness filter"
            );
        }

        if let Some(spec) = &self.lag {
            filled = derive_lag(&filled, spec)?;
        }
        if !self.standardize.is_empty() {
            filled = standardize(&filled, &self.standardize)?;
        }

        let missing_after = MissingSummary::from_panel(filled.panel());
        let overview = PanelOverview::from_panel(filled.panel());
        info!(
            rows = filled.panel().len(),
            entities = overview.entities().len(),
            periods = overview.periods().len(),
            "filled panel ready"
        );

        Ok(PanelResults {
            panel,
            filled,
            fill_report,
            missing_before,
            missing_after,
            overview,
        })
    }
}

/// Holds everything the pipeline produced in one run.
#[derive(Debug, Getters, Serialize)]
#[getset(get = "pub")]
pub struct PanelResults {
    /// The merged panel before gap filling.
    #[serde(skip)]
    panel: Panel,
    /// The gap-filled, completeness-filtered panel handed to estimators.
    filled: FilledPanel,
    /// What the gap filler imputed and dropped.
    fill_report: FillReport,
    /// Missing counts of the merged panel.
    missing_before: MissingSummary,
    /// Missing counts of the filled panel (all zero for tracked variables).
    missing_after: MissingSummary,
    /// Unique entities and periods of the filled panel.
    overview: PanelOverview,
}

impl PanelResults {
    /// Prints a formatted summary of the run to the console.
    pub fn summary(&self) {
        println!("Panel Builder Results");
        println!("========================================");
        println!("Merged rows:  {}", self.panel.len());
        println!("Filled rows:  {}", self.filled.panel().len());
        println!("Sort order:   {}", self.panel.sort_order());
        println!();

        println!("Missing Values (merged)");
        println!("{}", self.missing_before.to_table());
        println!("\nMissing Values (filled)");
        println!("{}", self.missing_after.to_table());

        let mut imputed = Table::new();
        imputed.set_header(vec!["Variable", "Imputed"]);
        for (variable, count) in self.fill_report.imputed() {
            imputed.add_row(vec![TableCell::new(variable), TableCell::new(count)]);
        }
        println!("\nGap Filling");
        println!("{}", imputed);
        println!(
            "Rows dropped: {} ({} entities removed entirely)",
            self.fill_report.dropped_rows().len(),
            self.fill_report.dropped_entities().len()
        );

        println!();
        self.overview.summary();
    }

    /// Exports the results to a JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

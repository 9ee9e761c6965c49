//! Pre-regression summaries: missing counts, coverage, and correlations.
use comfy_table::{Cell, Table};
use getset::Getters;
use serde::Serialize;

use crate::panel::{Panel, Period};
use crate::{PanelError, Result};

/// Missing values of one variable.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct MissingCount {
    variable: String,
    missing: usize,
}

/// Per-variable missing counts of a panel.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct MissingSummary {
    rows: usize,
    counts: Vec<MissingCount>,
}

impl MissingSummary {
    pub fn from_panel(panel: &Panel) -> Self {
        let counts = panel
            .missing_counts()
            .into_iter()
            .map(|(variable, missing)| MissingCount { variable, missing })
            .collect();
        Self {
            rows: panel.len(),
            counts,
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|c| c.missing).sum()
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.set_header(vec!["Variable", "Missing", "Share"]);
        for count in &self.counts {
            let share = if self.rows == 0 {
                0.0
            } else {
                count.missing as f64 / self.rows as f64
            };
            table.add_row(vec![
                Cell::new(&count.variable),
                Cell::new(count.missing),
                Cell::new(format!("{:.1}%", share * 100.0)),
            ]);
        }
        table
    }
}

/// Coverage of a panel: which entities and periods it holds.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct PanelOverview {
    rows: usize,
    entities: Vec<String>,
    periods: Vec<f64>,
}

impl PanelOverview {
    pub fn from_panel(panel: &Panel) -> Self {
        Self {
            rows: panel.len(),
            entities: panel.entities(),
            periods: panel.periods(),
        }
    }

    /// Whether every entity has a row for every period.
    pub fn is_balanced(&self) -> bool {
        self.rows == self.entities.len() * self.periods.len()
    }

    pub fn summary(&self) {
        println!(
            "Panel: {} rows, {} entities, {} periods ({})",
            self.rows,
            self.entities.len(),
            self.periods.len(),
            if self.is_balanced() { "balanced" } else { "unbalanced" }
        );
        println!("Unique entities: {}", self.entities.join(", "));
        let periods: Vec<String> = self
            .periods
            .iter()
            .map(|p| Period::from(*p).to_string())
            .collect();
        println!("Unique periods: {}", periods.join(", "));
    }
}

/// Pairwise Pearson correlations.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct CorrelationMatrix {
    variables: Vec<String>,
    /// Row-major, `NaN` where a pair has fewer than two joint observations
    /// or a constant side.
    values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.variables.iter().position(|v| v == a)?;
        let j = self.variables.iter().position(|v| v == b)?;
        Some(self.values[i][j])
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        let mut header = vec![String::new()];
        header.extend(self.variables.iter().cloned());
        table.set_header(header);
        for (name, row) in self.variables.iter().zip(&self.values) {
            let mut cells = vec![Cell::new(name)];
            cells.extend(row.iter().map(|v| {
                if v.is_nan() {
                    Cell::new("NA")
                } else {
                    Cell::new(format!("{:.4}", v))
                }
            }));
            table.add_row(cells);
        }
        table
    }
}

fn pearson(x: &[Option<f64>], y: &[Option<f64>]) -> f64 {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in &pairs {
        sxy += (a - mean_x) * (b - mean_y);
        sxx += (a - mean_x).powi(2);
        syy += (b - mean_y).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    sxy / (sxx * syy).sqrt()
}

/// Correlates the named variables over rows where both sides are observed.
pub fn correlation_matrix<S: AsRef<str>>(panel: &Panel, variables: &[S]) -> Result<CorrelationMatrix> {
    let columns = variables
        .iter()
        .map(|v| {
            panel
                .column(v.as_ref())
                .ok_or_else(|| PanelError::ColumnNotFound(v.as_ref().to_string()))
        })
        .collect::<Result<Vec<Vec<Option<f64>>>>>()?;

    let k = columns.len();
    let mut values = vec![vec![f64::NAN; k]; k];
    for i in 0..k {
        for j in i..k {
            let r = if i == j {
                if pearson(&columns[i], &columns[i]).is_nan() {
                    f64::NAN
                } else {
                    1.0
                }
            } else {
                pearson(&columns[i], &columns[j])
            };
            values[i][j] = r;
            values[j][i] = r;
        }
    }

    Ok(CorrelationMatrix {
        variables: variables.iter().map(|v| v.as_ref().to_string()).collect(),
        values,
    })
}

//! Columns derived from a filled panel: per-entity lags and z-scores.
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fill::{FilledPanel, GapFiller};
use crate::panel::{sort_frame, Panel, SortOrder, ENTITY_COLUMN};
use crate::{PanelError, Result};

/// What to do with the leading gap a lag creates in every entity's series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LagPolicy {
    /// Gap-fill the lag column like any other tracked variable, so the first
    /// period takes the earliest lagged value.
    #[default]
    Fill,
    /// Keep the leading gap; the completeness filter then drops the first
    /// `periods` rows of each entity.
    LeaveMissing,
}

fn default_periods() -> usize {
    1
}

/// A lagged copy of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LagSpec {
    pub source: String,
    #[serde(default = "default_periods")]
    pub periods: usize,
    /// Defaults to `<source>_LAG<periods>`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub policy: LagPolicy,
}

impl LagSpec {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            periods: 1,
            name: None,
            policy: LagPolicy::default(),
        }
    }

    pub fn periods(mut self, periods: usize) -> Self {
        self.periods = periods;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn policy(mut self, policy: LagPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn column_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}_LAG{}", self.source, self.periods))
    }
}

/// Adds a lag column shifted by position within each entity's time-ordered
/// series, then restores the completeness invariant under `spec.policy`.
pub fn derive_lag(filled: &FilledPanel, spec: &LagSpec) -> Result<FilledPanel> {
    if spec.periods == 0 {
        return Err(PanelError::InvalidArgument(
            "lag periods must be at least 1".to_string(),
        ));
    }
    let panel = filled.panel();
    panel.require_column(&spec.source)?;
    let name = spec.column_name();
    if panel.has_variable(&name) {
        return Err(PanelError::DuplicateVariable(name));
    }

    let by_entity = sort_frame(panel.frame().clone(), SortOrder::EntityTime, panel.variables())?;
    let shifted = by_entity
        .lazy()
        .with_column(
            col(spec.source.as_str())
                .shift(lit(spec.periods as i64))
                .over([col(ENTITY_COLUMN)])
                .alias(name.as_str()),
        )
        .collect()?;

    let mut variables = panel.variables().to_vec();
    variables.push(name.clone());
    let frame = sort_frame(shifted, panel.sort_order(), &variables)?;
    let lagged = Panel::from_frame(frame, variables, panel.sort_order());

    let mut tracked = filled.tracked().to_vec();
    tracked.push(name.clone());
    match spec.policy {
        LagPolicy::Fill => {
            let (result, report) = GapFiller::new(&tracked).fill(&lagged)?;
            info!(
                lag = %name,
                imputed = report.imputed().get(&name).copied().unwrap_or(0),
                dropped = report.dropped_rows().len(),
                "derived lag column"
            );
            Ok(result)
        }
        LagPolicy::LeaveMissing => {
            let frame = lagged.frame().drop_nulls(Some(std::slice::from_ref(&name)))?;
            let dropped = lagged.len() - frame.height();
            info!(lag = %name, dropped, "dropped rows with leading lag gap");
            let kept = Panel::from_frame(frame, lagged.variables().to_vec(), lagged.sort_order());
            Ok(FilledPanel::from_parts(kept, tracked))
        }
    }
}

/// Replaces the named columns with z-scores using the population standard
/// deviation. A constant column becomes all zeros.
pub fn standardize<S: AsRef<str>>(filled: &FilledPanel, variables: &[S]) -> Result<FilledPanel> {
    let panel = filled.panel();
    let mut exprs = Vec::with_capacity(variables.len());
    for variable in variables {
        let name = variable.as_ref();
        panel.require_column(name)?;
        let centred = col(name) - col(name).mean();
        let sd = col(name).std(0);
        exprs.push(
            when(sd.clone().gt(lit(0.0)))
                .then(centred.clone() / sd)
                .otherwise(centred)
                .alias(name),
        );
    }
    let frame = panel.frame().clone().lazy().with_columns(exprs).collect()?;
    let scaled = Panel::from_frame(frame, panel.variables().to_vec(), panel.sort_order());
    Ok(FilledPanel::from_parts(scaled, filled.tracked().to_vec()))
}

//! Per-entity gap filling and the completeness filter.
//!
//! For every (entity, variable) series, ordered by period:
//!
//! 1. interior gaps are interpolated linearly between the nearest observed
//!    neighbours, weighted by period distance;
//! 2. the first observed value is carried backward over leading gaps;
//! 3. the last observed value is carried forward over trailing gaps.
//!
//! Step 1 differs from pandas' `interpolate(method="linear")`, which ignores
//! the index and spaces observations evenly. The two agree on consecutive
//! years; on uneven spacing (say 2000, 2001, 2004) this module weights by the
//! year gap and pandas does not.
//!
//! A series with no observed value stays missing. Afterwards every row with a
//! missing period or a missing tracked value is dropped with polars'
//! `drop_nulls`, which can shrink the sample; [`FillReport`] records exactly
//! what went.

use std::collections::{BTreeMap, BTreeSet};

use getset::Getters;
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::panel::{f64_values, sort_frame, str_values, Panel, Period, SortOrder, ENTITY_COLUMN, TIME_COLUMN};
use crate::Result;

/// Interpolates interior gaps in place. Returns the number of values filled.
///
/// `times` must be strictly increasing and as long as `values`.
pub fn interpolate_series(times: &[f64], values: &mut [Option<f64>]) -> usize {
    debug_assert_eq!(times.len(), values.len());
    let observed: Vec<usize> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|_| i))
        .collect();

    let mut filled = 0;
    for pair in observed.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if hi - lo < 2 {
            continue;
        }
        let (t0, t1) = (times[lo], times[hi]);
        let (v0, v1) = match (values[lo], values[hi]) {
            (Some(a), Some(b)) => (a, b),
            _ => continue,
        };
        let span = t1 - t0;
        for i in lo + 1..hi {
            let weight = if span > 0.0 {
                (times[i] - t0) / span
            } else {
                (i - lo) as f64 / (hi - lo) as f64
            };
            values[i] = Some(v0 + (v1 - v0) * weight);
            filled += 1;
        }
    }
    filled
}

/// Carries the first observed value backward and the last forward.
/// Returns the number of values filled.
pub fn fill_boundaries(values: &mut [Option<f64>]) -> usize {
    let first = values.iter().position(Option::is_some);
    let last = values.iter().rposition(Option::is_some);
    let (first, last) = match (first, last) {
        (Some(f), Some(l)) => (f, l),
        _ => return 0,
    };

    let (head, tail) = (values[first], values[last]);
    let mut filled = 0;
    for v in &mut values[..first] {
        *v = head;
        filled += 1;
    }
    for v in &mut values[last + 1..] {
        *v = tail;
        filled += 1;
    }
    filled
}

/// Interpolation followed by boundary propagation.
pub fn fill_series(times: &[f64], values: &mut [Option<f64>]) -> usize {
    interpolate_series(times, values) + fill_boundaries(values)
}

/// A panel with no missing period and no missing tracked value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilledPanel {
    panel: Panel,
    tracked: Vec<String>,
}

impl FilledPanel {
    pub fn panel(&self) -> &Panel {
        &self.panel
    }

    /// The variables the completeness invariant covers.
    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }

    pub fn into_panel(self) -> Panel {
        self.panel
    }

    pub(crate) fn from_parts(panel: Panel, tracked: Vec<String>) -> Self {
        Self { panel, tracked }
    }
}

impl AsRef<Panel> for FilledPanel {
    fn as_ref(&self) -> &Panel {
        &self.panel
    }
}

/// What the gap filler changed.
#[derive(Debug, Clone, Default, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct FillReport {
    /// Values imputed per tracked variable.
    imputed: BTreeMap<String, usize>,
    /// Row count before the completeness filter.
    rows_before: usize,
    /// Keys removed by the completeness filter.
    dropped_rows: Vec<(String, Period)>,
    /// Entities that lost every row.
    dropped_entities: Vec<String>,
}

/// Fills gaps in a fixed list of tracked variables.
#[derive(Debug, Clone)]
pub struct GapFiller {
    tracked: Vec<String>,
}

impl GapFiller {
    pub fn new<S: AsRef<str>>(tracked: &[S]) -> Self {
        Self {
            tracked: tracked.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }

    /// Fills every tracked series, then drops incomplete rows.
    pub fn fill(&self, panel: &Panel) -> Result<(FilledPanel, FillReport)> {
        for name in &self.tracked {
            panel.require_column(name)?;
        }
        let variables = panel.variables();

        // One frame per entity, each ordered by period with undated rows last.
        let by_entity = sort_frame(panel.frame().clone(), SortOrder::EntityTime, variables)?;
        let parts = by_entity.partition_by_stable([ENTITY_COLUMN], true)?;

        let mut report = FillReport {
            rows_before: panel.len(),
            ..FillReport::default()
        };
        let mut imputed: BTreeMap<String, usize> =
            self.tracked.iter().map(|name| (name.clone(), 0)).collect();
        let mut stacked: Option<DataFrame> = None;
        for mut part in parts {
            let entity = str_values(&part, ENTITY_COLUMN)?
                .into_iter()
                .next()
                .unwrap_or_default();
            let times: Vec<f64> = f64_values(&part, TIME_COLUMN)?
                .into_iter()
                .map_while(|t| t)
                .collect();
            for name in &self.tracked {
                let mut values = f64_values(&part, name)?;
                let n = fill_series(&times, &mut values[..times.len()]);
                if n > 0 {
                    part.with_column(Series::new(name.as_str().into(), values))?;
                    debug!(variable = %name, entity = %entity, filled = n, "filled series");
                }
                if let Some(count) = imputed.get_mut(name) {
                    *count += n;
                }
            }
            match stacked.as_mut() {
                Some(acc) => {
                    acc.vstack_mut(&part)?;
                }
                None => stacked = Some(part),
            }
        }
        report.imputed = imputed;

        let working = match stacked {
            Some(frame) => sort_frame(frame, panel.sort_order(), variables)?,
            None => panel.frame().clone(),
        };

        let incomplete = self
            .tracked
            .iter()
            .fold(col(TIME_COLUMN).is_null(), |acc, name| {
                acc.or(col(name.as_str()).is_null())
            });
        let dropped = working.clone().lazy().filter(incomplete).collect()?;
        report.dropped_rows = str_values(&dropped, ENTITY_COLUMN)?
            .into_iter()
            .zip(f64_values(&dropped, TIME_COLUMN)?)
            .map(|(entity, time)| (entity, Period::new(time)))
            .collect();

        let mut subset = vec![TIME_COLUMN.to_string()];
        subset.extend(self.tracked.iter().cloned());
        let complete = working.drop_nulls(Some(subset.as_slice()))?;
        let filled = Panel::from_frame(complete, variables.to_vec(), panel.sort_order());

        let before: BTreeSet<String> = panel.entities().into_iter().collect();
        let after: BTreeSet<String> = filled.entities().into_iter().collect();
        report.dropped_entities = before.difference(&after).cloned().collect();

        info!(
            imputed = report.imputed.values().sum::<usize>(),
            dropped_rows = report.dropped_rows.len(),
            dropped_entities = report.dropped_entities.len(),
            "gap filling complete"
        );
        Ok((FilledPanel::from_parts(filled, self.tracked.clone()), report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::{merge, SortOrder};
    use crate::reshape::{LongRecord, LongTable};
    use crate::PanelError;

    fn series(entity: &str, variable: &str, start: f64, values: &[Option<f64>]) -> LongTable {
        LongTable::new(
            variable,
            values
                .iter()
                .enumerate()
                .map(|(i, v)| LongRecord {
                    entity: entity.to_string(),
                    time: Some(start + i as f64),
                    value: *v,
                })
                .collect(),
        )
    }

    #[test]
    fn test_interpolate_interior_gap() {
        let times = [2000.0, 2001.0, 2002.0];
        let mut values = [Some(1.0), None, Some(3.0)];
        assert_eq!(interpolate_series(&times, &mut values), 1);
        assert_eq!(values, [Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_interpolation_weights_by_period_distance() {
        let times = [2000.0, 2001.0, 2004.0];
        let mut values = [Some(0.0), None, Some(8.0)];
        interpolate_series(&times, &mut values);
        assert_eq!(values[1], Some(2.0));
    }

    #[test]
    fn test_interpolation_leaves_edges() {
        let times = [1.0, 2.0, 3.0, 4.0];
        let mut values = [None, Some(1.0), Some(2.0), None];
        assert_eq!(interpolate_series(&times, &mut values), 0);
        assert_eq!(values, [None, Some(1.0), Some(2.0), None]);
    }

    #[test]
    fn test_boundary_fill() {
        let times = [1.0, 2.0, 3.0, 4.0];
        let mut values = [None, None, Some(5.0), None];
        assert_eq!(fill_series(&times, &mut values), 3);
        assert_eq!(values, [Some(5.0); 4]);
    }

    #[test]
    fn test_all_missing_series_untouched() {
        let times = [1.0, 2.0, 3.0];
        let mut values = [None, None, None];
        assert_eq!(fill_series(&times, &mut values), 0);
        assert_eq!(values, [None, None, None]);
    }

    #[test]
    fn test_fill_drops_entity_without_observations() {
        let a = series("A", "GWG", 2000.0, &[Some(0.1), None, Some(0.3)]);
        let mut b = series("B", "GWG", 2000.0, &[None, None, None]);
        b.records.extend(a.records.clone());
        let panel = merge(vec![b], SortOrder::EntityTime).unwrap();

        let (filled, report) = GapFiller::new(&["GWG"]).fill(&panel).unwrap();
        assert_eq!(filled.panel().entities(), vec!["A".to_string()]);
        assert_eq!(filled.panel().len(), 3);
        let gwg = filled.panel().column("GWG").unwrap();
        assert!((gwg[1].unwrap() - 0.2).abs() < 1e-12);
        assert_eq!(report.dropped_entities(), &vec!["B".to_string()]);
        assert_eq!(report.dropped_rows().len(), 3);
        assert_eq!(report.imputed()["GWG"], 1);
    }

    #[test]
    fn test_series_are_independent_per_entity() {
        let mut table = series("A", "FDI", 2000.0, &[Some(1.0), None]);
        table
            .records
            .extend(series("B", "FDI", 2000.0, &[None, Some(7.0)]).records);
        let panel = merge(vec![table], SortOrder::TimeEntity).unwrap();

        let (filled, _) = GapFiller::new(&["FDI"]).fill(&panel).unwrap();
        let p = filled.panel();
        assert_eq!(p.value(p.find("A", 2001.0).unwrap(), "FDI"), Some(1.0));
        assert_eq!(p.value(p.find("B", 2000.0).unwrap(), "FDI"), Some(7.0));
    }

    #[test]
    fn test_rows_without_period_are_dropped() {
        let mut table = series("A", "HDI", 2000.0, &[Some(0.7)]);
        table.records.push(LongRecord {
            entity: "A".to_string(),
            time: None,
            value: Some(0.9),
        });
        let panel = merge(vec![table], SortOrder::TimeEntity).unwrap();
        let (filled, report) = GapFiller::new(&["HDI"]).fill(&panel).unwrap();
        assert_eq!(filled.panel().len(), 1);
        assert!(report.dropped_rows()[0].1.is_missing());
        assert!(report.dropped_entities().is_empty());
    }

    #[test]
    fn test_unknown_tracked_variable() {
        let panel = merge(vec![series("A", "GWG", 2000.0, &[Some(1.0)])], SortOrder::TimeEntity).unwrap();
        let result = GapFiller::new(&["FDI"]).fill(&panel);
        assert!(matches!(result, Err(PanelError::ColumnNotFound(name)) if name == "FDI"));
    }

    #[test]
    fn test_untracked_columns_pass_through() {
        let gwg = series("A", "GWG", 2000.0, &[Some(1.0), Some(2.0)]);
        let note = series("A", "NOTE", 2000.0, &[None, Some(5.0)]);
        let panel = merge(vec![gwg, note], SortOrder::TimeEntity).unwrap();
        let (filled, _) = GapFiller::new(&["GWG"]).fill(&panel).unwrap();
        assert_eq!(filled.panel().column("NOTE").unwrap(), &[None, Some(5.0)]);
        assert_eq!(filled.tracked(), &["GWG".to_string()]);
    }
}

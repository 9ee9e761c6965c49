//! The merged `(entity, time)` panel and the outer-join merger that builds it.
//!
//! Sources are joined with a polars full join on the key columns and sorted
//! with `sort_by_exprs`; the panel keeps the resulting frame.
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::path::Path;

use comfy_table::{Cell, Table};
use polars::prelude::*;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, warn};

use crate::reshape::LongTable;
use crate::source::format_number;
use crate::{PanelError, Result};

/// Column names reserved for the panel key in exported frames.
pub const ENTITY_COLUMN: &str = "entity";
pub const TIME_COLUMN: &str = "time";

/// The time half of a panel key.
///
/// Wraps an optional number with a total order so it can key maps. Missing
/// periods compare equal to each other and sort after every parsed period.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Period(Option<f64>);

impl Period {
    pub fn new(value: Option<f64>) -> Self {
        Period(value)
    }

    pub fn value(&self) -> Option<f64> {
        self.0
    }

    pub fn is_missing(&self) -> bool {
        self.0.is_none()
    }
}

impl From<f64> for Period {
    fn from(value: f64) -> Self {
        Period(Some(value))
    }
}

impl Ord for Period {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0, other.0) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

impl PartialOrd for Period {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Period {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Period {}

impl Hash for Period {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.map(f64::to_bits).hash(state);
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{}", format_number(v)),
            None => write!(f, "NA"),
        }
    }
}

/// Row order of a merged panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// By period, then entity.
    #[default]
    TimeEntity,
    /// By entity, then period.
    EntityTime,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SortOrder::TimeEntity => write!(f, "time, entity"),
            SortOrder::EntityTime => write!(f, "entity, time"),
        }
    }
}

/// Panel data keyed by `(entity, period)` with one nullable column per
/// tracked variable.
///
/// Backed by a polars [`DataFrame`] laid out as `entity` (str), `time` (f64,
/// null when the label did not parse), then the variables in merge order.
#[derive(Debug, Clone)]
pub struct Panel {
    frame: DataFrame,
    variables: Vec<String>,
    order: SortOrder,
}

impl PartialEq for Panel {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
            && self.variables == other.variables
            && self.frame.equals_missing(&other.frame)
    }
}

impl Serialize for Panel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let entities: Vec<&str> = (0..self.len()).map(|r| self.entity(r)).collect();
        let periods: Vec<Option<f64>> = (0..self.len()).map(|r| self.period(r).value()).collect();
        let columns: Vec<(&str, Vec<Option<f64>>)> = self
            .variables
            .iter()
            .map(|v| (v.as_str(), self.column(v).unwrap_or_default()))
            .collect();
        let mut state = serializer.serialize_struct("Panel", 3)?;
        state.serialize_field("entities", &entities)?;
        state.serialize_field("periods", &periods)?;
        state.serialize_field("columns", &columns)?;
        state.end()
    }
}

/// A borrowed view of one panel row.
#[derive(Debug, Clone, Copy)]
pub struct PanelRow<'a> {
    pub entity: &'a str,
    pub period: Period,
    panel: &'a Panel,
    index: usize,
}

impl PanelRow<'_> {
    pub fn value(&self, variable: &str) -> Option<f64> {
        self.panel.value(self.index, variable)
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.panel
            .variables
            .iter()
            .map(|v| self.panel.value(self.index, v))
            .collect()
    }
}

impl Panel {
    pub(crate) fn from_frame(frame: DataFrame, variables: Vec<String>, order: SortOrder) -> Self {
        Self {
            frame,
            variables,
            order,
        }
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn sort_order(&self) -> SortOrder {
        self.order
    }

    /// The underlying frame.
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn entity(&self, row: usize) -> &str {
        self.frame
            .column(ENTITY_COLUMN)
            .ok()
            .and_then(|c| c.str().ok())
            .and_then(|ca| ca.get(row))
            .unwrap_or_default()
    }

    pub fn period(&self, row: usize) -> Period {
        Period::new(
            self.frame
                .column(TIME_COLUMN)
                .ok()
                .and_then(|c| c.f64().ok())
                .and_then(|ca| ca.get(row)),
        )
    }

    /// Unique entities, sorted.
    pub fn entities(&self) -> Vec<String> {
        let unique: BTreeSet<String> = str_values(&self.frame, ENTITY_COLUMN)
            .unwrap_or_default()
            .into_iter()
            .collect();
        unique.into_iter().collect()
    }

    /// Unique parsed periods, ascending.
    pub fn periods(&self) -> Vec<f64> {
        let unique: BTreeSet<Period> = f64_values(&self.frame, TIME_COLUMN)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .map(Period::from)
            .collect();
        unique.into_iter().filter_map(|p| p.value()).collect()
    }

    pub fn column(&self, variable: &str) -> Option<Vec<Option<f64>>> {
        if !self.has_variable(variable) {
            return None;
        }
        f64_values(&self.frame, variable).ok()
    }

    pub fn value(&self, row: usize, variable: &str) -> Option<f64> {
        if !self.has_variable(variable) {
            return None;
        }
        self.frame.column(variable).ok()?.f64().ok()?.get(row)
    }

    /// Looks up the row for a key.
    pub fn find(&self, entity: &str, period: impl Into<Period>) -> Option<usize> {
        let period = period.into();
        (0..self.len()).find(|&r| self.entity(r) == entity && self.period(r) == period)
    }

    pub fn rows(&self) -> impl Iterator<Item = PanelRow<'_>> {
        (0..self.len()).map(move |index| PanelRow {
            entity: self.entity(index),
            period: self.period(index),
            panel: self,
            index,
        })
    }

    /// Missing values per variable, in column order.
    pub fn missing_counts(&self) -> Vec<(String, usize)> {
        self.variables
            .iter()
            .map(|name| {
                let missing = self.frame.column(name).map(|c| c.null_count()).unwrap_or(0);
                (name.clone(), missing)
            })
            .collect()
    }

    pub(crate) fn has_variable(&self, variable: &str) -> bool {
        self.variables.iter().any(|v| v == variable)
    }

    pub(crate) fn require_column(&self, variable: &str) -> Result<()> {
        if self.has_variable(variable) {
            Ok(())
        } else {
            Err(PanelError::ColumnNotFound(variable.to_string()))
        }
    }

    /// A copy of the frame for consumers: `entity`, `time`, then one `f64`
    /// column per variable.
    pub fn to_dataframe(&self) -> DataFrame {
        self.frame.clone()
    }

    /// Writes the panel as CSV through polars.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut df = self.frame.clone();
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
        Ok(())
    }

    /// A table of the first `n` rows for console output.
    pub fn preview(&self, n: usize) -> Table {
        let mut table = Table::new();
        let mut header = vec![ENTITY_COLUMN.to_string(), TIME_COLUMN.to_string()];
        header.extend(self.variables.iter().cloned());
        table.set_header(header);
        for row in self.rows().take(n) {
            let mut cells = vec![Cell::new(row.entity), Cell::new(row.period)];
            cells.extend(row.values().into_iter().map(|v| match v {
                Some(v) => Cell::new(format!("{:.4}", v)),
                None => Cell::new("NA"),
            }));
            table.add_row(cells);
        }
        table
    }
}

pub(crate) fn f64_values(frame: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    Ok(frame.column(name)?.f64()?.into_iter().collect())
}

pub(crate) fn str_values(frame: &DataFrame, name: &str) -> Result<Vec<String>> {
    Ok(frame
        .column(name)?
        .str()?
        .into_iter()
        .map(|s| s.unwrap_or_default().to_string())
        .collect())
}

/// Sorts a panel frame by its key in `order`. Variables break the remaining
/// ties so rows sharing a missing period still land in a fixed order.
pub(crate) fn sort_frame(frame: DataFrame, order: SortOrder, variables: &[String]) -> Result<DataFrame> {
    let mut by = match order {
        SortOrder::TimeEntity => vec![col(TIME_COLUMN), col(ENTITY_COLUMN)],
        SortOrder::EntityTime => vec![col(ENTITY_COLUMN), col(TIME_COLUMN)],
    };
    by.extend(variables.iter().map(|v| col(v.as_str())));
    let sorted = frame
        .lazy()
        .sort_by_exprs(
            by,
            SortMultipleOptions::default()
                .with_nulls_last(true)
                .with_maintain_order(true),
        )
        .collect()?;
    Ok(sorted)
}

/// One source as a three-column frame. Repeated parsed keys keep their first
/// value; records without a period are all kept.
fn long_frame(source: LongTable) -> Result<DataFrame> {
    let mut seen: HashSet<(String, Period)> = HashSet::with_capacity(source.len());
    let mut entities = Vec::with_capacity(source.len());
    let mut times = Vec::with_capacity(source.len());
    let mut values = Vec::with_capacity(source.len());
    let mut duplicates = 0usize;
    for record in source.records {
        let period = Period::new(record.time);
        if !period.is_missing() && !seen.insert((record.entity.clone(), period)) {
            duplicates += 1;
            continue;
        }
        entities.push(record.entity);
        times.push(record.time);
        values.push(record.value);
    }
    if duplicates > 0 {
        warn!(variable = %source.variable, duplicates, "duplicate keys in source; kept first");
    }
    let frame = DataFrame::new(vec![
        Column::new(ENTITY_COLUMN.into(), entities),
        Column::new(TIME_COLUMN.into(), times),
        Column::new(source.variable.as_str().into(), values),
    ])?;
    Ok(frame)
}

/// Outer-joins long tables on `(entity, period)` in the order given.
///
/// Every key present in any source survives; variables a source does not
/// cover are missing for that key. Missing periods never match each other,
/// so every record without a period becomes its own row. Rows are then
/// sorted by `order`.
pub fn merge(sources: Vec<LongTable>, order: SortOrder) -> Result<Panel> {
    let mut variables: Vec<String> = Vec::with_capacity(sources.len());
    let mut joined: Option<LazyFrame> = None;

    for source in sources {
        if source.variable == ENTITY_COLUMN || source.variable == TIME_COLUMN {
            return Err(PanelError::InvalidArgument(format!(
                "'{}' is reserved for the panel key",
                source.variable
            )));
        }
        if variables.contains(&source.variable) {
            return Err(PanelError::DuplicateVariable(source.variable));
        }
        variables.push(source.variable.clone());
        debug!(variable = %source.variable, records = source.len(), "outer-joining source");

        let frame = long_frame(source)?.lazy();
        joined = Some(match joined {
            None => frame,
            Some(acc) => acc.join(
                frame,
                [col(ENTITY_COLUMN), col(TIME_COLUMN)],
                [col(ENTITY_COLUMN), col(TIME_COLUMN)],
                JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
            ),
        });
    }

    let frame = match joined {
        Some(lf) => {
            let mut columns = vec![col(ENTITY_COLUMN), col(TIME_COLUMN)];
            columns.extend(variables.iter().map(|v| col(v.as_str())));
            lf.select(columns).collect()?
        }
        None => DataFrame::new(vec![
            Column::new(ENTITY_COLUMN.into(), Vec::<String>::new()),
            Column::new(TIME_COLUMN.into(), Vec::<Option<f64>>::new()),
        ])?,
    };
    let frame = sort_frame(frame, order, &variables)?;
    debug!(rows = frame.height(), variables = variables.len(), "merged panel frame");
    Ok(Panel::from_frame(frame, variables, order))
}

//! Wide-to-long conversion of a single source table.
use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::panel::Period;
use crate::source::{Cell, RawTable};
use crate::Result;

/// One observation of one variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongRecord {
    pub entity: String,
    /// `None` when the period label did not parse as a number.
    pub time: Option<f64>,
    pub value: Option<f64>,
}

/// The long-format records of one variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongTable {
    pub variable: String,
    pub records: Vec<LongRecord>,
}

impl LongTable {
    pub fn new(variable: impl Into<String>, records: Vec<LongRecord>) -> Self {
        Self {
            variable: variable.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn parse_period(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Number(v) if v.is_finite() => Some(*v),
        Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Converts a wide table into one record per interior cell.
///
/// Records come out entity by entity, each in sheet row order. Unparseable
/// periods are kept as `None`, one record per cell; unparseable values become
/// missing. If a parsed (entity, period) label repeats, the first occurrence
/// wins.
pub fn reshape(table: &RawTable, variable: &str) -> Result<LongTable> {
    table.check_shape()?;

    let entities: Vec<String> = (1..table.width()).map(|c| table.cell(0, c).label()).collect();
    let periods: Vec<Option<f64>> = (1..table.height())
        .map(|r| parse_period(table.cell(r, 0)))
        .collect();

    let unparsed = periods.iter().filter(|p| p.is_none()).count();
    if unparsed > 0 {
        debug!(variable, unparsed, "period labels failed numeric parse");
    }

    let mut seen = HashSet::with_capacity(entities.len() * periods.len());
    let mut records = Vec::with_capacity(entities.len() * periods.len());
    let mut duplicates = 0usize;
    for (c, entity) in entities.iter().enumerate() {
        for (r, time) in periods.iter().enumerate() {
            if time.is_some() && !seen.insert((entity.as_str(), Period::new(*time))) {
                duplicates += 1;
                continue;
            }
            records.push(LongRecord {
                entity: entity.clone(),
                time: *time,
                value: table.cell(r + 1, c + 1).as_f64(),
            });
        }
    }

    if duplicates > 0 {
        warn!(variable, duplicates, "repeated entity/period labels; kept first occurrence");
    }
    debug!(variable, records = records.len(), "reshaped to long format");
    Ok(LongTable::new(variable, records))
}

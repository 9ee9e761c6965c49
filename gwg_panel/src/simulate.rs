//! Synthetic wide-format sources for trying the pipeline without real data.
use std::path::Path;

use rand::prelude::*;
use tracing::info;

use crate::source::{Cell, RawTable};
use crate::{PanelError, Result};

/// Variables and the uniform ranges they are drawn from.
pub const SIMULATED_VARIABLES: [(&str, f64, f64); 6] = [
    ("FDI", 0.0, 5.0),
    ("GDP_PC", 10_000.0, 50_000.0),
    ("TAW", 1_000.0, 5_000.0),
    ("HDI", 0.7, 1.0),
    ("FERT", 1.2, 3.5),
    ("GWG", 0.0, 0.5),
];

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub entities: usize,
    pub start_year: i32,
    pub end_year: i32,
    pub seed: u64,
    /// Probability that any single cell is left blank.
    pub missing_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            entities: 20,
            start_year: 2000,
            end_year: 2024,
            seed: 42,
            missing_rate: 0.0,
        }
    }
}

/// Draws one wide table per simulated variable. Same config, same tables.
pub fn simulate(config: &SimulationConfig) -> Result<Vec<RawTable>> {
    if config.entities == 0 {
        return Err(PanelError::InvalidArgument(
            "simulation needs at least one entity".to_string(),
        ));
    }
    if config.end_year < config.start_year {
        return Err(PanelError::InvalidArgument(format!(
            "end year {} is before start year {}",
            config.end_year, config.start_year
        )));
    }
    if !(0.0..1.0).contains(&config.missing_rate) {
        return Err(PanelError::InvalidArgument(format!(
            "missing rate must be in [0, 1), got {}",
            config.missing_rate
        )));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut header = vec![Cell::Empty];
    header.extend((1..=config.entities).map(|i| Cell::Text(format!("Country_{}", i))));

    let tables: Vec<RawTable> = SIMULATED_VARIABLES
        .iter()
        .map(|&(name, lo, hi)| {
            let mut rows = vec![header.clone()];
            for year in config.start_year..=config.end_year {
                let mut row = vec![Cell::Number(year as f64)];
                for _ in 0..config.entities {
                    if rng.gen::<f64>() < config.missing_rate {
                        row.push(Cell::Empty);
                    } else {
                        row.push(Cell::Number(rng.gen_range(lo..hi)));
                    }
                }
                rows.push(row);
            }
            RawTable::new(name, rows)
        })
        .collect();

    info!(
        entities = config.entities,
        years = config.end_year - config.start_year + 1,
        seed = config.seed,
        "simulated sources"
    );
    Ok(tables)
}

/// Writes a table back out in the wide CSV layout the reader expects.
pub fn write_wide_csv(table: &RawTable, path: &Path) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_path(path)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(Cell::label))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reshape::reshape;
    use crate::source::{read_table, SourceSpec};

    #[test]
    fn test_simulation_shape_and_ranges() {
        let config = SimulationConfig {
            entities: 3,
            start_year: 2000,
            end_year: 2004,
            ..SimulationConfig::default()
        };
        let tables = simulate(&config).unwrap();
        assert_eq!(tables.len(), SIMULATED_VARIABLES.len());
        for (table, (name, lo, hi)) in tables.iter().zip(SIMULATED_VARIABLES) {
            assert_eq!(table.variable, name);
            assert_eq!(table.height(), 6);
            assert_eq!(table.width(), 4);
            let long = reshape(table, name).unwrap();
            assert!(long
                .records
                .iter()
                .all(|r| r.value.map_or(false, |v| v >= lo && v < hi)));
        }
    }

    #[test]
    fn test_simulation_is_seeded() {
        let config = SimulationConfig::default();
        assert_eq!(simulate(&config).unwrap(), simulate(&config).unwrap());
        let other = SimulationConfig {
            seed: 7,
            ..SimulationConfig::default()
        };
        assert_ne!(simulate(&config).unwrap(), simulate(&other).unwrap());
    }

    #[test]
    fn test_missing_rate_blanks_cells() {
        let config = SimulationConfig {
            missing_rate: 0.5,
            ..SimulationConfig::default()
        };
        let tables = simulate(&config).unwrap();
        let blanks = tables[0]
            .rows
            .iter()
            .skip(1)
            .flat_map(|r| r.iter().skip(1))
            .filter(|c| **c == Cell::Empty)
            .count();
        assert!(blanks > 0);
    }

    #[test]
    fn test_invalid_config() {
        let config = SimulationConfig {
            end_year: 1990,
            ..SimulationConfig::default()
        };
        assert!(simulate(&config).is_err());
        let config = SimulationConfig {
            missing_rate: 1.0,
            ..SimulationConfig::default()
        };
        assert!(simulate(&config).is_err());
    }

    #[test]
    fn test_wide_csv_round_trip_through_reader() {
        let dir = tempfile::tempdir().unwrap();
        let tables = simulate(&SimulationConfig {
            entities: 2,
            start_year: 2010,
            end_year: 2011,
            ..SimulationConfig::default()
        })
        .unwrap();
        let path = dir.path().join("GWG.csv");
        write_wide_csv(&tables[5], &path).unwrap();

        let read = read_table(&SourceSpec::new("GWG", &path)).unwrap();
        assert_eq!(read.cell(0, 2).label(), "Country_2");
        assert_eq!(read.cell(2, 0).as_f64(), Some(2011.0));
        let drawn = tables[5].cell(1, 1).as_f64().unwrap();
        let parsed = read.cell(1, 1).as_f64().unwrap();
        assert_eq!(drawn, parsed);
    }
}

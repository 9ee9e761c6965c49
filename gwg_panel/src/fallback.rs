//! Ordered configuration fallback for estimators that consume a panel.
//!
//! Estimation itself lives outside this crate. Callers implement
//! [`PanelEstimator`] for their estimator and pass an ordered list of
//! configurations, typically strict rank checking first and relaxed second.
//! Each attempt returns a typed result; the first success wins.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::fill::FilledPanel;

/// An estimator that can be fitted on a filled panel under a configuration.
pub trait PanelEstimator {
    type Config: fmt::Debug;
    type Output;
    type Error: fmt::Display + fmt::Debug;

    fn fit(&self, panel: &FilledPanel, config: &Self::Config) -> Result<Self::Output, Self::Error>;
}

/// The first successful fit and the position of the configuration that produced it.
#[derive(Debug)]
pub struct Fitted<O> {
    pub output: O,
    pub attempt: usize,
}

/// Every configuration failed; failures are in attempt order.
#[derive(Debug, Error)]
#[error("{}", describe_failures(.failures))]
pub struct FallbackError<E: fmt::Display> {
    pub failures: Vec<E>,
}

fn describe_failures<E: fmt::Display>(failures: &[E]) -> String {
    if failures.is_empty() {
        return "no estimator configurations were given".to_string();
    }
    let mut message = format!("all {} configurations failed", failures.len());
    for (i, e) in failures.iter().enumerate() {
        message.push_str(&format!("; attempt {}: {}", i + 1, e));
    }
    message
}

/// Rank checking tiers for linear estimators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankCheck {
    /// Reject rank-deficient designs.
    Strict,
    /// Let the estimator drop or absorb collinear columns.
    Relaxed,
}

impl RankCheck {
    /// Strict first, then relaxed.
    pub fn tiers() -> [RankCheck; 2] {
        [RankCheck::Strict, RankCheck::Relaxed]
    }
}

/// Tries each configuration in order and returns the first success.
pub fn fit_with_fallback<T: PanelEstimator>(
    estimator: &T,
    panel: &FilledPanel,
    configs: &[T::Config],
) -> Result<Fitted<T::Output>, FallbackError<T::Error>> {
    let mut failures = Vec::new();
    for (attempt, config) in configs.iter().enumerate() {
        match estimator.fit(panel, config) {
            Ok(output) => {
                if attempt > 0 {
                    info!(attempt, ?config, "estimator succeeded after fallback");
                }
                return Ok(Fitted { output, attempt });
            }
            Err(e) => {
                warn!(attempt, ?config, error = %e, "estimator configuration failed");
                failures.push(e);
            }
        }
    }
    Err(FallbackError { failures })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill::GapFiller;
    use crate::panel::{merge, SortOrder};
    use crate::reshape::{LongRecord, LongTable};

    /// Fails under strict rank checking whenever two tracked columns are identical.
    struct DuplicateColumnCheck;

    impl PanelEstimator for DuplicateColumnCheck {
        type Config = RankCheck;
        type Output = usize;
        type Error = String;

        fn fit(&self, panel: &FilledPanel, config: &RankCheck) -> Result<usize, String> {
            let p = panel.panel();
            let cols: Vec<Vec<Option<f64>>> = panel
                .tracked()
                .iter()
                .filter_map(|v| p.column(v))
                .collect();
            let collinear = cols
                .iter()
                .enumerate()
                .any(|(i, a)| cols[i + 1..].iter().any(|b| a == b));
            match config {
                RankCheck::Strict if collinear => Err("design matrix is rank deficient".to_string()),
                _ => Ok(p.len()),
            }
        }
    }

    fn panel(x: &[f64], y: &[f64]) -> FilledPanel {
        let table = |name: &str, values: &[f64]| {
            LongTable::new(
                name,
                values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| LongRecord {
                        entity: "A".to_string(),
                        time: Some(2000.0 + i as f64),
                        value: Some(*v),
                    })
                    .collect(),
            )
        };
        let merged = merge(vec![table("X", x), table("Y", y)], SortOrder::TimeEntity).unwrap();
        GapFiller::new(&["X", "Y"]).fill(&merged).unwrap().0
    }

    #[test]
    fn test_strict_succeeds_first() {
        let p = panel(&[1.0, 2.0], &[3.0, 5.0]);
        let fitted = fit_with_fallback(&DuplicateColumnCheck, &p, &RankCheck::tiers()).unwrap();
        assert_eq!(fitted.attempt, 0);
        assert_eq!(fitted.output, 2);
    }

    #[test]
    fn test_relaxed_after_strict_failure() {
        let p = panel(&[1.0, 2.0], &[1.0, 2.0]);
        let fitted = fit_with_fallback(&DuplicateColumnCheck, &p, &RankCheck::tiers()).unwrap();
        assert_eq!(fitted.attempt, 1);
    }

    #[test]
    fn test_all_failures_reported_in_order() {
        let p = panel(&[1.0, 2.0], &[1.0, 2.0]);
        let err = fit_with_fallback(&DuplicateColumnCheck, &p, &[RankCheck::Strict, RankCheck::Strict])
            .unwrap_err();
        assert_eq!(err.failures.len(), 2);
        assert!(err.to_string().starts_with("all 2 configurations failed"));
    }

    #[test]
    fn test_no_configurations() {
        let p = panel(&[1.0], &[2.0]);
        let err = fit_with_fallback(&DuplicateColumnCheck, &p, &[]).unwrap_err();
        assert!(err.failures.is_empty());
        assert_eq!(err.to_string(), "no estimator configurations were given");
        let source: &dyn std::error::Error = &err;
        assert!(source.source().is_none());
    }
}

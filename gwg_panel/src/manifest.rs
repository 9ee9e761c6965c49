//! JSON run manifests: the ordered list of sources plus pipeline options.
//!
//! ```json
//! {
//!   "sources": [
//!     { "name": "GWG", "path": "GWG.xlsx" },
//!     { "name": "FDI", "path": "FDI_STOCK.xlsx", "sheet": "Data" }
//!   ],
//!   "sort": "entity_time",
//!   "lag": { "source": "FDI", "policy": "fill" },
//!   "output_csv": "panel.csv"
//! }
//! ```
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::panel::SortOrder;
use crate::source::SourceSpec;
use crate::transform::LagSpec;
use crate::{PanelError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Sources in merge order.
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub sort: SortOrder,
    #[serde(default)]
    pub lag: Option<LagSpec>,
    #[serde(default)]
    pub standardize: Vec<String>,
    #[serde(default)]
    pub output_csv: Option<PathBuf>,
    #[serde(default)]
    pub output_json: Option<PathBuf>,
}

impl Manifest {
    /// Parses a manifest from JSON text. Paths are taken as written.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(json)?;
        if manifest.sources.is_empty() {
            return Err(PanelError::InvalidArgument(
                "manifest lists no sources".to_string(),
            ));
        }
        Ok(manifest)
    }

    /// Reads a manifest file, resolving relative paths against its directory.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PanelError::FileNotFound(path.display().to_string()));
        }
        let mut manifest = Self::from_json_str(&fs::read_to_string(path)?)?;
        if let Some(base) = path.parent() {
            manifest.resolve_paths(base);
        }
        Ok(manifest)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &Path| {
            if p.is_relative() {
                base.join(p)
            } else {
                p.to_path_buf()
            }
        };
        for source in &mut self.sources {
            source.path = resolve(&source.path);
        }
        self.output_csv = self.output_csv.as_deref().map(resolve);
        self.output_json = self.output_json.as_deref().map(resolve);
    }
}

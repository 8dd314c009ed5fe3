//! Result collection, per-tool statistics and JSON export.

use crate::calibration::{round3, round4};
use crate::errors::ExportError;
use crate::types::ToolOffsetResult;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Flat export record. Field names match the published result format.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub tool: u32,
    pub cycle: u32,
    pub mpp: f64,
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
}

impl From<&ToolOffsetResult> for ResultRecord {
    fn from(result: &ToolOffsetResult) -> Self {
        Self {
            tool: result.tool,
            cycle: result.cycle,
            mpp: round4(result.mpp),
            x: round3(result.x),
            y: round3(result.y),
        }
    }
}

/// Summary statistics of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisStatistics {
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub range: f64,
}

impl AxisStatistics {
    /// `None` for an empty slice.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            max,
            min,
            std_dev: variance.sqrt(),
            range: max - min,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ToolStatistics {
    pub tool: u32,
    pub samples: usize,
    pub x: AxisStatistics,
    pub y: AxisStatistics,
    pub mean_mpp: f64,
}

/// Append-only collection of per-tool, per-cycle results.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    results: Vec<ToolOffsetResult>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: ToolOffsetResult) {
        self.results.push(result);
    }

    /// Drop everything, at the start of a new session.
    pub fn clear(&mut self) {
        self.results.clear();
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[ToolOffsetResult] {
        &self.results
    }

    pub fn records(&self) -> Vec<ResultRecord> {
        self.results.iter().map(ResultRecord::from).collect()
    }

    /// Tool ids in ascending order.
    pub fn tools(&self) -> Vec<u32> {
        let mut tools: Vec<u32> = self.results.iter().map(|r| r.tool).collect();
        tools.sort_unstable();
        tools.dedup();
        tools
    }

    pub fn stats_for(&self, tool: u32) -> Option<ToolStatistics> {
        let rows: Vec<&ToolOffsetResult> = self.results.iter().filter(|r| r.tool == tool).collect();
        let xs: Vec<f64> = rows.iter().map(|r| r.x).collect();
        let ys: Vec<f64> = rows.iter().map(|r| r.y).collect();
        let x = AxisStatistics::from_values(&xs)?;
        let y = AxisStatistics::from_values(&ys)?;
        let mean_mpp = rows.iter().map(|r| r.mpp).sum::<f64>() / rows.len() as f64;
        Some(ToolStatistics {
            tool,
            samples: rows.len(),
            x,
            y,
            mean_mpp,
        })
    }

    pub fn summary(&self) -> Vec<ToolStatistics> {
        self.tools()
            .into_iter()
            .filter_map(|tool| self.stats_for(tool))
            .collect()
    }

    /// Human-readable summary table.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<5} {:>3} {:>4} {:>9} {:>9} {:>9} {:>9} {:>9}  {:>7}",
            "tool", "n", "axis", "mean", "max", "min", "stdev", "range", "mpp"
        );
        for stats in self.summary() {
            for (axis, s) in [("X", stats.x), ("Y", stats.y)] {
                let _ = writeln!(
                    out,
                    "T{:<4} {:>3} {:>4} {:>9.3} {:>9.3} {:>9.3} {:>9.3} {:>9.3}  {:>7.4}",
                    stats.tool,
                    stats.samples,
                    axis,
                    s.mean,
                    s.max,
                    s.min,
                    s.std_dev,
                    s.range,
                    stats.mean_mpp
                );
            }
        }
        out
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        serde_json::to_string_pretty(&self.records())
            .map_err(|e| ExportError::Format(e.to_string()))
    }

    /// Rebuild a collection from exported records. Elapsed times are not part
    /// of the export and come back as zero.
    pub fn from_json(json: &str) -> Result<Self, ExportError> {
        let records: Vec<ResultRecord> =
            serde_json::from_str(json).map_err(|e| ExportError::Format(e.to_string()))?;
        Ok(Self {
            results: records
                .into_iter()
                .map(|r| ToolOffsetResult {
                    tool: r.tool,
                    cycle: r.cycle,
                    mpp: r.mpp,
                    x: r.x,
                    y: r.y,
                    elapsed: Duration::ZERO,
                })
                .collect(),
        })
    }

    pub fn export<P: AsRef<Path>>(&self, path: P) -> Result<(), ExportError> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|e| ExportError::Io(e.to_string()))?;
        log::info!("Exported {} result(s) to {:?}", self.len(), path);
        Ok(())
    }

    pub fn import<P: AsRef<Path>>(path: P) -> Result<Self, ExportError> {
        let contents =
            fs::read_to_string(path.as_ref()).map_err(|e| ExportError::Io(e.to_string()))?;
        Self::from_json(&contents)
    }
}

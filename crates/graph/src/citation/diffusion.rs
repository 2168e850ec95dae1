//! Labeled diffusion over time
//!
//! Flow follows edge direction. The flow of a category into window `t`
//! counts edges `citing -> cited` whose citing end carries the category and
//! was published before `t`, and whose cited end was published within `t`.
//! It is normalized by every edge into `t`, i.e. every edge whose cited end
//! falls within `t`. Endpoints without a publication year are skipped.

use super::CitationGraph;
use serde::{Deserialize, Serialize};
use spillscope_common::errors::{AppError, Result};
use spillscope_common::models::{CanonicalKey, IntentCategory};
use std::collections::BTreeMap;
use std::fmt;

/// Inclusive range of publication years
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: i32,
    pub end: i32,
}

impl TimeWindow {
    pub fn new(start: i32, end: i32) -> Result<Self> {
        if start > end {
            return Err(AppError::validation(format!(
                "time window start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn year(year: i32) -> Self {
        Self {
            start: year,
            end: year,
        }
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.start..=self.end).contains(&year)
    }

    /// Consecutive windows of `width` years covering `first..=last`
    pub fn sequence(first: i32, last: i32, width: i32) -> Vec<TimeWindow> {
        let width = width.max(1);
        let mut windows = Vec::new();
        let mut start = first;
        while start <= last {
            windows.push(TimeWindow {
                start,
                end: (start + width - 1).min(last),
            });
            start += width;
        }
        windows
    }

    /// Windows spanning every dated node of the graph
    pub fn covering(graph: &CitationGraph, width: i32) -> Vec<TimeWindow> {
        let years = graph.nodes().filter_map(|n| n.year);
        let (min, max) = years.fold((i32::MAX, i32::MIN), |(lo, hi), y| (lo.min(y), hi.max(y)));
        if min > max {
            return Vec::new();
        }
        Self::sequence(min, max, width)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Flow value of one category into one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffusionPoint {
    pub category: IntentCategory,
    pub window: TimeWindow,
    /// Edges from earlier labeled work into the window
    pub crossing_edges: usize,
    /// Every edge whose cited end lies in the window
    pub window_edges: usize,
    /// crossing / window edges, 0 when the window has no edges
    pub flow: f64,
}

/// Diffusion series for `category` over `windows`, in window order
pub fn diffusion(
    graph: &CitationGraph,
    labels: &BTreeMap<CanonicalKey, IntentCategory>,
    category: IntentCategory,
    windows: &[TimeWindow],
) -> Vec<DiffusionPoint> {
    // Dated edges only, in edge order
    let dated: Vec<(i32, i32, &CanonicalKey)> = graph
        .edges()
        .filter_map(|edge| {
            let citing_year = graph.year(&edge.citing)?;
            let cited_year = graph.year(&edge.cited)?;
            let citing = graph.node(&edge.citing).map(|n| &n.key)?;
            Some((citing_year, cited_year, citing))
        })
        .collect();

    windows
        .iter()
        .map(|window| {
            let mut crossing_edges = 0;
            let mut window_edges = 0;
            for (citing_year, cited_year, citing) in &dated {
                if !window.contains(*cited_year) {
                    continue;
                }
                window_edges += 1;
                if *citing_year < window.start && labels.get(*citing) == Some(&category) {
                    crossing_edges += 1;
                }
            }
            let flow = if window_edges == 0 {
                0.0
            } else {
                crossing_edges as f64 / window_edges as f64
            };
            DiffusionPoint {
                category,
                window: *window,
                crossing_edges,
                window_edges,
                flow,
            }
        })
        .collect()
}

/// Label name used for unlabeled nodes in the flow matrix
pub const UNLABELED: &str = "unlabeled";

/// Citing category -> cited category -> edge count
pub type FlowMatrix = BTreeMap<String, BTreeMap<String, usize>>;

/// Count every edge by the categories of its endpoints
pub fn flow_matrix(
    graph: &CitationGraph,
    labels: &BTreeMap<CanonicalKey, IntentCategory>,
) -> FlowMatrix {
    let name = |key: &CanonicalKey| {
        labels
            .get(key)
            .map(|c| c.as_str())
            .unwrap_or(UNLABELED)
            .to_string()
    };

    let mut matrix = FlowMatrix::new();
    for edge in graph.edges() {
        *matrix
            .entry(name(&edge.citing))
            .or_default()
            .entry(name(&edge.cited))
            .or_default() += 1;
    }
    matrix
}

/// Share of capability-use citations that land on safety-use work
pub fn spillover_score(matrix: &FlowMatrix) -> f64 {
    let Some(from_capability) = matrix.get(IntentCategory::CapabilityUse.as_str()) else {
        return 0.0;
    };
    let total: usize = from_capability.values().sum();
    if total == 0 {
        return 0.0;
    }
    let to_safety = from_capability
        .get(IntentCategory::SafetyUse.as_str())
        .copied()
        .unwrap_or(0);
    to_safety as f64 / total as f64
}

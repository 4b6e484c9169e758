//! Semantic Merger (induction stage 3)
//!
//! Iteratively merges adjacent segments that share semantic intent. Each
//! pass scores every adjacent pair; pairs above the merge threshold
//! combine (actions concatenated, order preserved). Passes repeat until a
//! full pass makes no merge or the iteration cap is reached, so the loop
//! always terminates and the segment count never increases.
//!
//! Similarity is a weighted sum of kind-histogram overlap (cosine), shared
//! application context, and temporal adjacency.

use super::action::{Segment, Workflow};
use super::segment;
use super::writer::WorkflowWriter;
use crate::time::Duration;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Semantic merge thresholds and feature weights
#[derive(Debug, Clone)]
pub struct SemanticMergeConfig {
    /// Adjacent pairs scoring above this merge
    pub merge_threshold: f64,
    /// Hard cap on fixed-point passes
    pub max_passes: u32,
    /// Gap that zeroes the adjacency feature
    pub gap_scale: Duration,
    /// Weight of kind-histogram overlap
    pub histogram_weight: f64,
    /// Weight of shared application context
    pub app_weight: f64,
    /// Weight of temporal adjacency
    pub adjacency_weight: f64,
}

impl Default for SemanticMergeConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.55,
            max_passes: 8,
            gap_scale: Duration::from_millis(5000),
            histogram_weight: 0.5,
            app_weight: 0.3,
            adjacency_weight: 0.2,
        }
    }
}

/// A proposed merge of two adjacent segments (report-only mode)
#[derive(Debug, Clone, PartialEq)]
pub struct MergeProposal {
    /// Earlier segment
    pub left: Uuid,
    /// Later segment
    pub right: Uuid,
    /// Similarity score
    pub score: f64,
}

/// Outcome of the fixed-point merge loop
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Final segments, count ≤ input count
    pub segments: Vec<Segment>,
    /// Passes executed
    pub passes: u32,
    /// Total merges applied
    pub merges: u32,
}

/// Iterative pairwise segment merger
#[derive(Debug, Default)]
pub struct SemanticMerger {
    config: SemanticMergeConfig,
}

impl SemanticMerger {
    pub fn new(config: SemanticMergeConfig) -> Self {
        Self { config }
    }

    /// Similarity score for an adjacent pair, in [0, 1]
    pub fn similarity(&self, earlier: &Segment, later: &Segment) -> f64 {
        let histogram = cosine(&earlier.kind_histogram(), &later.kind_histogram());

        let app = match (earlier.dominant_app(), later.dominant_app()) {
            (Some(a), Some(b)) if a == b => 1.0,
            (None, None) => 0.5, // both unknown: weak evidence either way
            _ => 0.0,
        };

        let gap = later.started_at().duration_since(earlier.ended_at());
        let adjacency =
            1.0 - (gap.as_millis() as f64 / self.config.gap_scale.as_millis().max(1) as f64).min(1.0);

        self.config.histogram_weight * histogram
            + self.config.app_weight * app
            + self.config.adjacency_weight * adjacency
    }

    /// Score every adjacent pair without applying anything
    pub fn proposals(&self, segments: &[Segment]) -> Vec<MergeProposal> {
        segments
            .windows(2)
            .map(|pair| MergeProposal {
                left: pair[0].id,
                right: pair[1].id,
                score: self.similarity(&pair[0], &pair[1]),
            })
            .collect()
    }

    /// Run the fixed-point merge loop.
    pub fn merge(&self, segments: Vec<Segment>) -> MergeOutcome {
        let mut segments = segments;
        let mut passes = 0u32;
        let mut merges = 0u32;

        loop {
            passes += 1;
            let mut progressed = false;
            let mut out: Vec<Segment> = Vec::with_capacity(segments.len());

            for segment in segments {
                if let Some(last) = out.last_mut() {
                    let score = self.similarity(last, &segment);
                    if score > self.config.merge_threshold {
                        debug!(score, "merging adjacent segments");
                        last.absorb(segment);
                        progressed = true;
                        merges += 1;
                        continue;
                    }
                }
                out.push(segment);
            }

            segments = out;
            if !progressed || passes >= self.config.max_passes {
                break;
            }
        }

        MergeOutcome {
            segments,
            passes,
            merges,
        }
    }
}

fn cosine(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Run the induce stage: load the segments, merge (or only propose when
/// `auto` is off), and write both workflow artifacts.
pub fn run(data_dir: &Path, config: SemanticMergeConfig, auto: bool) -> crate::Result<Workflow> {
    let segment_set = segment::load(data_dir, "induce")?;
    let input_count = segment_set.segments.len();

    let merger = SemanticMerger::new(config);
    let segments = if auto {
        let outcome = merger.merge(segment_set.segments);
        info!(
            input = input_count,
            output = outcome.segments.len(),
            passes = outcome.passes,
            merges = outcome.merges,
            "semantic merge complete"
        );
        outcome.segments
    } else {
        for proposal in merger.proposals(&segment_set.segments) {
            info!(
                left = %proposal.left,
                right = %proposal.right,
                score = proposal.score,
                "proposed merge (re-run with --auto to apply)"
            );
        }
        segment_set.segments
    };

    let workflow = Workflow::new(segments);
    WorkflowWriter::new().write(&workflow, data_dir)?;
    Ok(workflow)
}

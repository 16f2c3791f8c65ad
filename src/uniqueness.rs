//! Comparative-advantage scoring of a local unit's entities against the
//! combined volumes of every local unit.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::Entity;

/// Stand-in world share for entities the baseline has never seen, so their
/// score is large but finite.
pub const MIN_WORLD_SHARE: f64 = 1e-5;

/// Summed volumes per entity name over all local units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalBaseline {
    pub volume_by_name: HashMap<String, u64>,
    pub total_volume: u64,
    /// Local units whose snapshot could not be read; they add nothing.
    pub skipped: Vec<String>,
}

impl GlobalBaseline {
    pub fn volume_of(&self, name: &str) -> u64 {
        self.volume_by_name.get(name).copied().unwrap_or(0)
    }

    /// Share of all works that belong to `name`; an empty baseline treats
    /// everything as average.
    pub fn world_share(&self, name: &str) -> f64 {
        if self.total_volume == 0 {
            return 1.0;
        }
        self.volume_of(name) as f64 / self.total_volume as f64
    }

    fn add(&mut self, entities: &[Entity]) {
        for entity in entities {
            *self.volume_by_name.entry(entity.name.clone()).or_insert(0) += entity.volume;
            self.total_volume += entity.volume;
        }
    }
}

/// First pass: accumulate every local unit's all-time snapshot by entity name.
///
/// Names are the join key because the same entity may carry different IDs
/// in different snapshots. A unit whose snapshot failed to load is logged,
/// recorded in [`GlobalBaseline::skipped`] and otherwise ignored.
pub fn compute_global_baseline<I, C>(units: I) -> GlobalBaseline
where
    I: IntoIterator<Item = (C, Result<Vec<Entity>>)>,
    C: Into<String>,
{
    let mut baseline = GlobalBaseline::default();
    for (code, snapshot) in units {
        let code = code.into();
        match snapshot {
            Ok(entities) => baseline.add(&entities),
            Err(err) => {
                warn!(country = %code, "leaving unit out of the baseline: {err}");
                baseline.skipped.push(code);
            }
        }
    }
    debug!(
        names = baseline.volume_by_name.len(),
        total = baseline.total_volume,
        "global baseline built"
    );
    baseline
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniquenessScore {
    pub country: String,
    pub id: String,
    pub name: String,
    pub volume: u64,
    pub score: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Second pass: score each entity of one local unit against the baseline.
///
/// `score = (volume / local total) / (global volume / global total)`,
/// rounded to two decimals and sorted highest first. A unit without any
/// volume scores zero throughout.
pub fn compute_uniqueness_scores(
    country: &str,
    snapshot: &[Entity],
    baseline: &GlobalBaseline,
) -> Vec<UniquenessScore> {
    let local_total: u64 = snapshot.iter().map(|entity| entity.volume).sum();
    let mut scores: Vec<UniquenessScore> = snapshot
        .iter()
        .map(|entity| {
            let country_share = if local_total == 0 {
                0.0
            } else {
                entity.volume as f64 / local_total as f64
            };
            let world_share = baseline.world_share(&entity.name).max(MIN_WORLD_SHARE);
            UniquenessScore {
                country: country.to_string(),
                id: entity.id.clone(),
                name: entity.name.clone(),
                volume: entity.volume,
                score: round2(country_share / world_share),
            }
        })
        .collect();
    scores.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.name.cmp(&b.name))
    });
    scores
}

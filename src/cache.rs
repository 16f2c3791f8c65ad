use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{info, warn};

use crate::cohort::{Cohort, TopFunder};
use crate::error::{Error, Result};
use crate::series::TimeSeries;
use crate::store::SnapshotStore;
use crate::uniqueness::{
    compute_global_baseline, compute_uniqueness_scores, GlobalBaseline, UniquenessScore,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountrySnapshot {
    pub cohort: Cohort,
    pub series: TimeSeries,
    /// Every cohort entity, highest score first.
    pub scores: Vec<UniquenessScore>,
    /// Top funder per cohort entity, empty unless funders were crawled.
    pub funders: Vec<TopFunder>,
}

/// Everything one analytics run derives from the snapshot store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshots {
    pub countries: BTreeMap<String, CountrySnapshot>,
    pub baseline: GlobalBaseline,
    pub built_at: String,
}

impl Snapshots {
    /// Load every stored country and score it against the others.
    ///
    /// Countries without a readable cohort are left out and do not count
    /// towards the baseline. A missing series or funder file reads as
    /// an empty one.
    pub fn build(store: &SnapshotStore) -> Result<Self> {
        let mut loaded = Vec::new();
        let mut units = Vec::new();
        for code in store.countries()? {
            match store.load_cohort(&code) {
                Ok(cohort) => {
                    units.push((code.clone(), Ok(cohort.members.clone())));
                    loaded.push((code, cohort));
                }
                Err(err) => units.push((code, Err(err))),
            }
        }
        let baseline = compute_global_baseline(units);

        let mut countries = BTreeMap::new();
        for (code, cohort) in loaded {
            let series = store.load_series(&code).unwrap_or_else(|err| {
                warn!(country = %code, "no series loaded: {err}");
                TimeSeries::default()
            });
            let funders = match store.load_funders(&code) {
                Ok(funders) => funders,
                Err(Error::MissingSnapshot(_)) => Vec::new(),
                Err(err) => {
                    warn!(country = %code, "no funders loaded: {err}");
                    Vec::new()
                }
            };
            let scores = compute_uniqueness_scores(&code, &cohort.members, &baseline);
            countries.insert(
                code,
                CountrySnapshot {
                    cohort,
                    series,
                    scores,
                    funders,
                },
            );
        }
        info!(
            countries = countries.len(),
            skipped = baseline.skipped.len(),
            "snapshots built"
        );
        Ok(Self {
            countries,
            baseline,
            built_at: chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        })
    }

    pub fn country(&self, code: &str) -> Option<&CountrySnapshot> {
        self.countries.get(code)
    }
}

/// Holds the latest [`Snapshots`] until someone asks for a rebuild.
///
/// Nothing is reloaded behind the caller's back: the data only changes
/// through [`SnapshotCache::rebuild`].
pub struct SnapshotCache {
    store: SnapshotStore,
    current: RwLock<Option<Arc<Snapshots>>>,
}

impl SnapshotCache {
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            store,
            current: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn get(&self) -> Option<Arc<Snapshots>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rebuild from the store. On failure the previous snapshots stay.
    pub fn rebuild(&self) -> Result<Arc<Snapshots>> {
        let snapshots = Arc::new(Snapshots::build(&self.store)?);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshots.clone());
        Ok(snapshots)
    }

    /// The cached snapshots, building them on first use.
    pub fn get_or_build(&self) -> Result<Arc<Snapshots>> {
        match self.get() {
            Some(snapshots) => Ok(snapshots),
            None => self.rebuild(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dimension, Entity};

    fn seeded() -> (tempfile::TempDir, SnapshotStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), Dimension::Subfield);
        store
            .save_cohort(
                &Cohort::new(
                    "US",
                    Dimension::Subfield,
                    vec![
                        Entity::new("1", "Optics", 600),
                        Entity::new("2", "Nanotech", 200),
                    ],
                ),
                "now",
            )
            .unwrap();
        store
            .save_cohort(
                &Cohort::new(
                    "DE",
                    Dimension::Subfield,
                    vec![
                        Entity::new("1", "Optics", 400),
                        Entity::new("2", "Nanotech", 300),
                    ],
                ),
                "now",
            )
            .unwrap();
        (dir, store)
    }

    #[test]
    fn build_scores_every_country() {
        let (_dir, store) = seeded();
        let snapshots = Snapshots::build(&store).unwrap();
        assert_eq!(snapshots.baseline.total_volume, 1500);
        let de = snapshots.country("DE").unwrap();
        assert_eq!(de.scores[0].name, "Nanotech");
        assert!(de.series.is_empty());
        assert!(de.funders.is_empty());
    }

    #[test]
    fn stored_funders_are_loaded() {
        let (_dir, store) = seeded();
        let funders = vec![TopFunder {
            entity: Entity::new("1", "Optics", 0),
            funder: Entity::new("F9", "DFG", 120),
        }];
        store.save_funders("DE", &funders, "now").unwrap();
        let snapshots = Snapshots::build(&store).unwrap();
        assert_eq!(snapshots.country("DE").unwrap().funders, funders);
        assert!(snapshots.country("US").unwrap().funders.is_empty());
    }

    #[test]
    fn unreadable_country_is_skipped() {
        let (dir, store) = seeded();
        std::fs::create_dir_all(dir.path().join("FR")).unwrap();
        let snapshots = Snapshots::build(&store).unwrap();
        assert!(snapshots.country("FR").is_none());
        assert_eq!(snapshots.baseline.skipped, ["FR"]);
    }

    #[test]
    fn cache_changes_only_on_rebuild() {
        let (_dir, store) = seeded();
        let cache = SnapshotCache::new(store.clone());
        assert!(cache.get().is_none());
        let first = cache.get_or_build().unwrap();
        assert_eq!(first.countries.len(), 2);

        let members = vec![Entity::new("9", "Optics", 1)];
        store
            .save_cohort(&Cohort::new("JP", Dimension::Subfield, members), "now")
            .unwrap();
        assert_eq!(cache.get_or_build().unwrap().countries.len(), 2);
        assert_eq!(cache.rebuild().unwrap().countries.len(), 3);
        assert_eq!(cache.get().unwrap().countries.len(), 3);
    }
}

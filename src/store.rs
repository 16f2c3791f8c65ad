use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cohort::{Cohort, TopFunder};
use crate::error::{Error, Result};
use crate::model::{Dimension, Entity, Period};
use crate::series::TimeSeries;
use crate::uniqueness::UniquenessScore;

#[derive(Debug, Serialize, Deserialize)]
struct CohortRow {
    id: String,
    name: String,
    volume: u64,
    #[serde(default)]
    fetch_date: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct YearlyRow {
    year: Period,
    id: String,
    name: String,
    volume: u64,
    country: String,
    #[serde(default)]
    fetch_date: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScoreRow {
    id: String,
    name: String,
    volume: u64,
    score: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunderRow {
    entity_id: String,
    entity_name: String,
    funder_id: String,
    funder_name: String,
    volume: u64,
    fetch_date: String,
}

/// CSV snapshots, one directory per country under `root`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    dimension: Dimension,
}

fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.is_file() {
        return Err(Error::MissingSnapshot(path.to_path_buf()));
    }
    let mut reader = csv::ReaderBuilder::new().from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>, dimension: Dimension) -> Self {
        Self {
            root: root.into(),
            dimension,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn country_dir(&self, country: &str) -> PathBuf {
        self.root.join(country)
    }

    fn cohort_path(&self, country: &str) -> PathBuf {
        self.country_dir(country)
            .join(format!("top_{}_all_time.csv", self.dimension.plural()))
    }

    fn series_path(&self, country: &str) -> PathBuf {
        self.country_dir(country)
            .join(format!("yearly_{}.csv", self.dimension.plural()))
    }

    fn scores_path(&self, country: &str) -> PathBuf {
        self.country_dir(country)
            .join(format!("uniqueness_{}.csv", self.dimension.plural()))
    }

    fn funders_path(&self, country: &str) -> PathBuf {
        self.country_dir(country)
            .join(format!("funders_{}.csv", self.dimension.plural()))
    }

    /// Codes of every country with a directory under the root, sorted.
    pub fn countries(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut countries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                countries.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        countries.sort();
        Ok(countries)
    }

    pub fn save_cohort(&self, cohort: &Cohort, fetch_date: &str) -> Result<()> {
        write_rows(
            &self.cohort_path(&cohort.country),
            cohort.members.iter().map(|member| CohortRow {
                id: member.id.clone(),
                name: member.name.clone(),
                volume: member.volume,
                fetch_date: fetch_date.to_string(),
            }),
        )
    }

    pub fn load_cohort(&self, country: &str) -> Result<Cohort> {
        let rows: Vec<CohortRow> = read_rows(&self.cohort_path(country))?;
        Ok(Cohort::new(
            country,
            self.dimension,
            rows.into_iter()
                .map(|row| Entity::new(row.id, row.name, row.volume))
                .collect(),
        ))
    }

    pub fn save_series(&self, country: &str, series: &TimeSeries, fetch_date: &str) -> Result<()> {
        write_rows(
            &self.series_path(country),
            series.rows().map(|(year, entity)| YearlyRow {
                year,
                id: entity.id.clone(),
                name: entity.name.clone(),
                volume: entity.volume,
                country: country.to_string(),
                fetch_date: fetch_date.to_string(),
            }),
        )
    }

    pub fn load_series(&self, country: &str) -> Result<TimeSeries> {
        let rows: Vec<YearlyRow> = read_rows(&self.series_path(country))?;
        let rows = rows
            .into_iter()
            .map(|row| (row.year, Entity::new(row.id, row.name, row.volume)));
        Ok(TimeSeries::from_rows(rows))
    }

    pub fn save_scores(&self, country: &str, scores: &[UniquenessScore]) -> Result<()> {
        write_rows(
            &self.scores_path(country),
            scores.iter().map(|score| ScoreRow {
                id: score.id.clone(),
                name: score.name.clone(),
                volume: score.volume,
                score: score.score,
            }),
        )
    }

    #[cfg(test)]
    pub(crate) fn load_scores(&self, country: &str) -> Result<Vec<UniquenessScore>> {
        let rows: Vec<ScoreRow> = read_rows(&self.scores_path(country))?;
        Ok(rows
            .into_iter()
            .map(|row| UniquenessScore {
                country: country.to_string(),
                id: row.id,
                name: row.name,
                volume: row.volume,
                score: row.score,
            })
            .collect())
    }

    pub fn save_funders(
        &self,
        country: &str,
        funders: &[TopFunder],
        fetch_date: &str,
    ) -> Result<()> {
        write_rows(
            &self.funders_path(country),
            funders.iter().map(|top| FunderRow {
                entity_id: top.entity.id.clone(),
                entity_name: top.entity.name.clone(),
                funder_id: top.funder.id.clone(),
                funder_name: top.funder.name.clone(),
                volume: top.funder.volume,
                fetch_date: fetch_date.to_string(),
            }),
        )
    }

    pub fn load_funders(&self, country: &str) -> Result<Vec<TopFunder>> {
        let rows: Vec<FunderRow> = read_rows(&self.funders_path(country))?;
        Ok(rows
            .into_iter()
            .map(|row| TopFunder {
                entity: Entity::new(row.entity_id, row.entity_name, 0),
                funder: Entity::new(row.funder_id, row.funder_name, row.volume),
            })
            .collect())
    }

    /// The all-time cohort, or its volumes in `year`.
    ///
    /// A country never crawled year by year has no data for any year, which
    /// reads as an empty slice rather than an error.
    pub fn load_entities(&self, country: &str, year: Option<Period>) -> Result<Vec<Entity>> {
        let Some(year) = year else {
            return Ok(self.load_cohort(country)?.members);
        };
        match self.load_series(country) {
            Ok(series) => Ok(series
                .slice(year)
                .map(<[Entity]>::to_vec)
                .unwrap_or_default()),
            Err(Error::MissingSnapshot(_)) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }
}

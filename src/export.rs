use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::Period;
use crate::store::SnapshotStore;

/// How many cohort entries each country contributes.
const EXPORT_TOP: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopEntry {
    pub name: String,
    pub total_works: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub year: Period,
    pub volume: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryExport {
    pub country_code: String,
    pub country_name: String,
    pub top_subfields: Vec<TopEntry>,
    pub trends: BTreeMap<String, Vec<TrendPoint>>,
}

/// Collect the front-end document for one country, `None` without a cohort.
pub fn export_country(store: &SnapshotStore, code: &str) -> Option<CountryExport> {
    let cohort = match store.load_cohort(code) {
        Ok(cohort) if !cohort.is_empty() => cohort,
        Ok(_) => return None,
        Err(err) => {
            debug!(country = %code, "not exported: {err}");
            return None;
        }
    };
    let top: Vec<TopEntry> = cohort
        .members
        .iter()
        .take(EXPORT_TOP)
        .map(|member| TopEntry {
            name: member.name.clone(),
            total_works: member.volume,
        })
        .collect();

    let mut trends = BTreeMap::new();
    if let Ok(series) = store.load_series(code) {
        for entry in &top {
            let points = series
                .trend(&entry.name)
                .into_iter()
                .map(|(year, volume)| TrendPoint { year, volume })
                .collect();
            trends.insert(entry.name.clone(), points);
        }
    }

    Some(CountryExport {
        country_code: code.to_string(),
        country_name: code.to_string(),
        top_subfields: top,
        trends,
    })
}

pub fn export_all(store: &SnapshotStore) -> Result<BTreeMap<String, CountryExport>> {
    let mut all = BTreeMap::new();
    for code in store.countries()? {
        if let Some(export) = export_country(store, &code) {
            all.insert(code, export);
        }
    }
    Ok(all)
}

/// Write [`export_all`] as pretty JSON to `out`, returning the country count.
pub fn write_export(store: &SnapshotStore, out: &Path) -> Result<usize> {
    let all = export_all(store)?;
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(out, serde_json::to_string_pretty(&all)?)?;
    info!(countries = all.len(), out = %out.display(), "export written");
    Ok(all.len())
}

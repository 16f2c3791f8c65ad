use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Datelike;
use tracing::{error, info, warn};

use crate::cache::Snapshots;
use crate::cohort::{lock_cohort, top_funder, Scope};
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::model::Period;
use crate::openalex::AggregationSource;
use crate::series::build_time_series;
use crate::store::SnapshotStore;
use crate::uniqueness::UniquenessScore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlOptions {
    pub top_n: usize,
    pub start: Period,
    pub end: Period,
    pub domain: Option<String>,
    /// Also look up the top funder of every cohort entity.
    pub funders: bool,
}

impl CrawlOptions {
    /// The `years_back` years before the current one, plus the current one.
    pub fn years_back(top_n: usize, years_back: u32) -> Self {
        let end = chrono::Local::now().year();
        Self {
            top_n,
            start: end - years_back as i32,
            end,
            domain: None,
            funders: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountryOutcome {
    NoData,
    Crawled { periods: usize, failed_periods: usize },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub crawled: Vec<String>,
    pub no_data: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// The sweep stopped early on request.
    pub interrupted: bool,
}

pub fn fetch_date() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Lock one country's cohort, build its yearly series and persist both.
pub async fn crawl_country<S: AggregationSource>(
    fetcher: &Fetcher<S>,
    store: &SnapshotStore,
    country: &str,
    options: &CrawlOptions,
    fetch_date: &str,
) -> Result<CountryOutcome> {
    let scope = Scope::new(country, store.dimension()).with_domain(options.domain.clone());
    let cohort = lock_cohort(fetcher, &scope, options.top_n).await;
    if cohort.is_empty() {
        return Ok(CountryOutcome::NoData);
    }
    store.save_cohort(&cohort, fetch_date)?;

    // Older files may hold entities of a previous cohort, so both are
    // rewritten even when empty.
    let series = build_time_series(fetcher, &scope, &cohort, options.start, options.end).await;
    store.save_series(country, &series, fetch_date)?;

    if options.funders {
        let mut funders = Vec::new();
        for member in &cohort.members {
            if let Some(top) = top_funder(fetcher, &scope, member).await {
                funders.push(top);
            }
        }
        store.save_funders(country, &funders, fetch_date)?;
    }

    Ok(CountryOutcome::Crawled {
        periods: series.periods.len(),
        failed_periods: series.failures.len(),
    })
}

/// Crawl every country in turn.
///
/// `stop` is checked between countries, so an interrupted sweep keeps what
/// it already saved. One country failing never ends the sweep.
pub async fn crawl<S: AggregationSource>(
    fetcher: &Fetcher<S>,
    store: &SnapshotStore,
    countries: &[String],
    options: &CrawlOptions,
    stop: &AtomicBool,
) -> CrawlReport {
    let mut report = CrawlReport::default();
    let fetch_date = fetch_date();
    for (i, country) in countries.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            warn!(remaining = countries.len() - i, "stopping");
            report.interrupted = true;
            break;
        }
        info!(country = %country, "[{}/{}] processing", i + 1, countries.len());
        match crawl_country(fetcher, store, country, options, &fetch_date).await {
            Ok(CountryOutcome::NoData) => report.no_data.push(country.clone()),
            Ok(CountryOutcome::Crawled {
                periods,
                failed_periods,
            }) => {
                info!(country = %country, periods, failed_periods, "saved");
                report.crawled.push(country.clone());
            }
            Err(err) => {
                error!(country = %country, "skipping: {err}");
                report.failed.push((country.clone(), err.to_string()));
            }
        }
    }
    report
}

/// Score every stored country against the rest and persist its top `top`.
pub fn run_uniqueness(
    store: &SnapshotStore,
    top: usize,
) -> Result<BTreeMap<String, Vec<UniquenessScore>>> {
    let snapshots = Snapshots::build(store)?;
    let mut written = BTreeMap::new();
    for (code, snapshot) in snapshots.countries {
        let scores: Vec<UniquenessScore> = snapshot.scores.into_iter().take(top).collect();
        store.save_scores(&code, &scores)?;
        written.insert(code, scores);
    }
    Ok(written)
}

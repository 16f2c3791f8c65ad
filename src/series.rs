use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cohort::{Cohort, Scope};
use crate::fetch::{Fetched, Fetcher};
use crate::model::{Entity, Period};
use crate::openalex::AggregationSource;

/// A period whose query failed and was left out of the series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodFailure {
    pub period: Period,
    pub reason: String,
}

/// Per-period volumes of a locked cohort.
///
/// A period is absent when there was no data for it, which is not the same
/// as the cohort having zero works in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub periods: BTreeMap<Period, Vec<Entity>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<PeriodFailure>,
}

impl TimeSeries {
    pub fn slice(&self, period: Period) -> Option<&[Entity]> {
        self.periods.get(&period).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// `(period, volume)` points for one entity name, oldest first.
    pub fn trend(&self, name: &str) -> Vec<(Period, u64)> {
        self.periods
            .iter()
            .filter_map(|(period, entities)| {
                entities
                    .iter()
                    .find(|entity| entity.name == name)
                    .map(|entity| (*period, entity.volume))
            })
            .collect()
    }

    /// Flatten into `(period, entity)` rows, oldest period first.
    pub fn rows(&self) -> impl Iterator<Item = (Period, &Entity)> {
        self.periods
            .iter()
            .flat_map(|(period, entities)| {
                entities.iter().map(move |entity| (*period, entity))
            })
    }

    pub fn from_rows(rows: impl IntoIterator<Item = (Period, Entity)>) -> Self {
        let mut periods = BTreeMap::<Period, Vec<Entity>>::new();
        for (period, entity) in rows {
            periods.entry(period).or_default().push(entity);
        }
        Self {
            periods,
            failures: Vec::new(),
        }
    }
}

/// Query each period in `start..=end` for the volumes of the cohort's
/// members only.
///
/// Groups outside the cohort are discarded. Periods with nothing left, and
/// periods whose fetch failed, are omitted; the failures are recorded.
pub async fn build_time_series<S: AggregationSource>(
    fetcher: &Fetcher<S>,
    scope: &Scope,
    cohort: &Cohort,
    start: Period,
    end: Period,
) -> TimeSeries {
    let mut series = TimeSeries::default();
    if cohort.is_empty() {
        return series;
    }
    let members = cohort.id_set();
    for period in start..=end {
        let query = scope
            .query()
            .period(period)
            .restrict(cohort.dimension, cohort.ids());
        let groups = match fetcher.fetch(&query).await {
            Fetched::Groups(groups) => groups,
            Fetched::Empty => continue,
            Fetched::Failed(err) => {
                warn!(country = %scope.country, period, "omitting period: {err}");
                series.failures.push(PeriodFailure {
                    period,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        let kept: Vec<Entity> = groups
            .into_iter()
            .filter(|group| members.contains(group.id.as_str()))
            .collect();
        if kept.is_empty() {
            debug!(country = %scope.country, period, "no cohort entities in period");
            continue;
        }
        series.periods.insert(period, kept);
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fetch::testing::ScriptedSource;
    use crate::fetch::RetryPolicy;
    use crate::model::Dimension;

    fn year_of(query: &crate::openalex::GroupQuery) -> Period {
        let years = query.filter_values("publication_year").unwrap();
        years[0].parse().unwrap()
    }

    fn cohort() -> Cohort {
        Cohort::new(
            "US",
            Dimension::Subfield,
            vec![
                Entity::new("A", "Alpha", 300),
                Entity::new("B", "Beta", 200),
                Entity::new("C", "Gamma", 100),
            ],
        )
    }

    #[tokio::test]
    async fn discards_entities_outside_cohort() {
        let source = ScriptedSource::new(|query| {
            Ok(match year_of(query) {
                2020 => vec![Entity::new("B", "Beta", 7), Entity::new("D", "Delta", 99)],
                _ => vec![],
            })
        });
        let fetcher = Fetcher::with_policy(source, RetryPolicy::immediate(2));
        let scope = Scope::new("US", Dimension::Subfield);
        let series = build_time_series(&fetcher, &scope, &cohort(), 2019, 2021).await;

        assert_eq!(series.periods.len(), 1);
        assert_eq!(series.slice(2020), Some(&[Entity::new("B", "Beta", 7)][..]));
        assert_eq!(series.slice(2019), None);
        assert!(series.failures.is_empty());
    }

    #[tokio::test]
    async fn every_period_query_is_restricted_to_cohort() {
        let source = ScriptedSource::returning(vec![Entity::new("A", "Alpha", 1)]);
        let fetcher = Fetcher::with_policy(source, RetryPolicy::immediate(2));
        let scope = Scope::new("US", Dimension::Subfield);
        let series = build_time_series(&fetcher, &scope, &cohort(), 2000, 2004).await;

        assert_eq!(series.periods.len(), 5);
        for query in fetcher.source().seen() {
            assert_eq!(
                query.filter_values("topics.subfield.id"),
                Some(&["A".to_string(), "B".to_string(), "C".to_string()][..])
            );
        }
        for (_, entity) in series.rows() {
            assert!(cohort().contains(&entity.id));
        }
    }

    #[tokio::test]
    async fn failed_period_is_omitted_and_loop_continues() {
        let source = ScriptedSource::returning(vec![Entity::new("C", "Gamma", 4)])
            .failing_first([Error::Status(503)]);
        let fetcher = Fetcher::with_policy(source, RetryPolicy::immediate(2));
        let scope = Scope::new("US", Dimension::Subfield);
        let series = build_time_series(&fetcher, &scope, &cohort(), 2010, 2012).await;

        let periods: Vec<_> = series.periods.keys().copied().collect();
        assert_eq!(periods, [2011, 2012]);
        assert_eq!(series.failures.len(), 1);
        assert_eq!(series.failures[0].period, 2010);
    }

    #[tokio::test]
    async fn empty_cohort_issues_no_queries() {
        let source = ScriptedSource::returning(vec![]);
        let fetcher = Fetcher::with_policy(source, RetryPolicy::immediate(2));
        let empty = Cohort::new("XX", Dimension::Subfield, vec![]);
        let scope = Scope::new("XX", Dimension::Subfield);
        let series = build_time_series(&fetcher, &scope, &empty, 2000, 2020).await;
        assert!(series.is_empty());
        assert_eq!(fetcher.source().calls(), 0);
    }

    #[test]
    fn trend_follows_one_name() {
        let series = TimeSeries::from_rows([
            (2021, Entity::new("A", "Alpha", 2)),
            (2020, Entity::new("A", "Alpha", 1)),
            (2020, Entity::new("B", "Beta", 5)),
        ]);
        assert_eq!(series.trend("Alpha"), [(2020, 1), (2021, 2)]);
        assert_eq!(series.trend("Beta"), [(2020, 5)]);
    }
}

use std::cmp::Reverse;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fetch::Fetcher;
use crate::model::{Dimension, Entity};
use crate::openalex::{AggregationSource, GroupQuery, Grouping};

/// Which local unit and entity kind a computation runs over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub country: String,
    pub dimension: Dimension,
    /// Restrict to one top-level domain, e.g. `3` for Physical Sciences.
    pub domain: Option<String>,
}

impl Scope {
    pub fn new(country: impl Into<String>, dimension: Dimension) -> Self {
        Self {
            country: country.into(),
            dimension,
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }

    /// Works of this country, grouped by the scope's dimension.
    pub fn query(&self) -> GroupQuery {
        GroupQuery::entities(self.dimension)
            .country(self.country.clone())
            .domain(self.domain.as_deref())
    }
}

/// The top entities of a local unit by all-time volume.
///
/// Once locked, a cohort decides which entities every later time-sliced
/// query may report for that unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cohort {
    pub country: String,
    pub dimension: Dimension,
    /// Ranked, highest all-time volume first.
    pub members: Vec<Entity>,
}

impl Cohort {
    pub fn new(country: impl Into<String>, dimension: Dimension, members: Vec<Entity>) -> Self {
        Self {
            country: country.into(),
            dimension,
            members,
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.members
            .iter()
            .map(|member| member.id.as_str())
            .collect()
    }

    pub fn id_set(&self) -> HashSet<&str> {
        self.members
            .iter()
            .map(|member| member.id.as_str())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|member| member.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }
}

/// Sort by volume, highest first, and keep the first `top_n`.
///
/// Equal volumes are ordered by name and then by ID so the result does not
/// depend on the order the source enumerated its groups in.
pub fn rank(mut entities: Vec<Entity>, top_n: usize) -> Vec<Entity> {
    entities.sort_by(|a, b| {
        Reverse(a.volume)
            .cmp(&Reverse(b.volume))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    entities.truncate(top_n);
    entities
}

/// Lock the cohort of `scope` from its all-time volumes.
pub async fn lock_cohort<S: AggregationSource>(
    fetcher: &Fetcher<S>,
    scope: &Scope,
    top_n: usize,
) -> Cohort {
    let groups = fetcher.fetch(&scope.query()).await.into_groups();
    if groups.is_empty() {
        info!(country = %scope.country, dimension = %scope.dimension, "no data");
    }
    Cohort::new(scope.country.clone(), scope.dimension, rank(groups, top_n))
}

/// Countries with the most works overall, as `(code, name, works)` entities.
pub async fn top_local_units<S: AggregationSource>(
    fetcher: &Fetcher<S>,
    limit: usize,
) -> Vec<Entity> {
    let groups = fetcher
        .fetch(&GroupQuery::new(Grouping::Countries))
        .await
        .into_groups();
    rank(groups, limit)
}

/// The funder behind most of a country's works on one cohort entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopFunder {
    pub entity: Entity,
    pub funder: Entity,
}

/// Find the top funder for `entity` within `scope`, if any funder is recorded.
///
/// The first funder reported wins a tie.
pub async fn top_funder<S: AggregationSource>(
    fetcher: &Fetcher<S>,
    scope: &Scope,
    entity: &Entity,
) -> Option<TopFunder> {
    let query = GroupQuery::entities(Dimension::Funder)
        .country(scope.country.clone())
        .restrict(scope.dimension, [entity.id.clone()]);
    let mut best: Option<Entity> = None;
    for funder in fetcher.fetch(&query).await.into_groups() {
        if best.as_ref().map_or(true, |top| funder.volume > top.volume) {
            best = Some(funder);
        }
    }
    best.map(|funder| TopFunder {
        entity: entity.clone(),
        funder,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fetch::testing::ScriptedSource;
    use crate::fetch::RetryPolicy;

    fn fetcher(source: ScriptedSource) -> Fetcher<ScriptedSource> {
        Fetcher::with_policy(source, RetryPolicy::immediate(3))
    }

    #[test]
    fn rank_breaks_ties_by_name() {
        let ranked = rank(
            vec![
                Entity::new("3", "Zoology", 10),
                Entity::new("1", "Optics", 50),
                Entity::new("2", "Acoustics", 10),
            ],
            10,
        );
        let names: Vec<_> = ranked.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Optics", "Acoustics", "Zoology"]);
    }

    #[tokio::test]
    async fn lock_cohort_keeps_top_n() {
        let source = ScriptedSource::returning(vec![
            Entity::new("A", "Alpha", 5),
            Entity::new("B", "Beta", 30),
            Entity::new("C", "Gamma", 20),
            Entity::new("D", "Delta", 1),
        ]);
        let fetcher = fetcher(source);
        let scope = Scope::new("US", Dimension::Subfield).with_domain(Some("3".into()));
        let cohort = lock_cohort(&fetcher, &scope, 2).await;
        assert_eq!(cohort.ids(), ["B", "C"]);
        assert_eq!(cohort.country, "US");

        let seen = fetcher.source().seen();
        assert_eq!(
            seen[0].filter_param().as_deref(),
            Some("authorships.institutions.country_code:US,topics.domain.id:3")
        );
    }

    #[tokio::test]
    async fn lock_cohort_with_fewer_entities_than_top_n() {
        let source = ScriptedSource::returning(vec![Entity::new("A", "Alpha", 5)]);
        let cohort = lock_cohort(&fetcher(source), &Scope::new("IS", Dimension::Topic), 10).await;
        assert_eq!(cohort.len(), 1);
    }

    #[tokio::test]
    async fn failed_lookup_yields_empty_cohort() {
        let source = ScriptedSource::returning(vec![]).failing_first([Error::Status(500)]);
        let scope = Scope::new("US", Dimension::Subfield);
        let cohort = lock_cohort(&fetcher(source), &scope, 10).await;
        assert!(cohort.is_empty());
    }

    #[tokio::test]
    async fn top_local_units_ranks_every_country() {
        let source = ScriptedSource::returning(vec![
            Entity::new("DE", "Germany", 300),
            Entity::new("US", "United States", 900),
            Entity::new("GB", "United Kingdom", 300),
            Entity::new("CN", "China", 800),
        ]);
        let fetcher = fetcher(source);
        let units = top_local_units(&fetcher, 3).await;
        let codes: Vec<_> = units.iter().map(|unit| unit.id.as_str()).collect();
        assert_eq!(codes, ["US", "CN", "DE"]);

        let seen = fetcher.source().seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].grouping(), Grouping::Countries);
        assert_eq!(seen[0].filter_param(), None);
    }

    #[tokio::test]
    async fn top_funder_prefers_first_on_ties() {
        let source = ScriptedSource::returning(vec![
            Entity::new("F1", "National Science Foundation", 40),
            Entity::new("F2", "Department of Energy", 40),
            Entity::new("F3", "NASA", 12),
        ]);
        let fetcher = fetcher(source);
        let scope = Scope::new("US", Dimension::Subfield);
        let entity = Entity::new("3107", "Atomic and Molecular Physics", 500);
        let top = top_funder(&fetcher, &scope, &entity).await.unwrap();
        assert_eq!(top.funder.id, "F1");
        assert_eq!(top.entity, entity);
        assert_eq!(
            fetcher.source().seen()[0].filter_param().as_deref(),
            Some("authorships.institutions.country_code:US,topics.subfield.id:3107")
        );
    }

    #[tokio::test]
    async fn top_funder_none_without_funders() {
        let fetcher = fetcher(ScriptedSource::returning(vec![]));
        let scope = Scope::new("US", Dimension::Subfield);
        let entity = Entity::new("3107", "Atomic and Molecular Physics", 500);
        assert!(top_funder(&fetcher, &scope, &entity).await.is_none());
    }
}

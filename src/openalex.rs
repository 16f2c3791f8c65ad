use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use leaky_bucket::RateLimiter;
use serde::Deserialize;
use tokio::time;
use tracing::debug;

use endpoints::WORKS;

use crate::error::{Error, Result};
use crate::model::{short_id, Dimension, Entity, Period};

const MAX_GROUPS_PER_CALL: usize = 200;
// polite pool allows 10 req/s when a mailto is given
const RATE_LIMIT_COUNT: usize = 10;
const RATE_LIMIT_PERIOD: time::Duration = time::Duration::from_millis(1000);

const COUNTRY_KEY: &str = "authorships.institutions.country_code";
const DOMAIN_KEY: &str = "topics.domain.id";
const YEAR_KEY: &str = "publication_year";

const ENV_EMAIL: &str = "OPENALEX_EMAIL";

/// Anything that can answer a grouped count query over works.
#[async_trait]
pub trait AggregationSource: Send + Sync {
    async fn group(&self, query: &GroupQuery) -> Result<Vec<Entity>>;
}

/// What the works are bucketed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    Entities(Dimension),
    Countries,
}

impl Grouping {
    pub fn key(&self) -> &'static str {
        match self {
            Grouping::Entities(dimension) => dimension.key(),
            Grouping::Countries => COUNTRY_KEY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Filter {
    key: &'static str,
    values: Vec<String>,
}

impl Display for Filter {
    /// `key:value` with alternatives joined by `|`.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.key, self.values.join("|"))
    }
}

/// A grouped count query: one bucket per distinct value of `grouping`
/// among the works that pass every filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupQuery {
    grouping: Grouping,
    filters: Vec<Filter>,
}

impl GroupQuery {
    pub fn new(grouping: Grouping) -> Self {
        Self {
            grouping,
            filters: Vec::new(),
        }
    }

    pub fn entities(dimension: Dimension) -> Self {
        Self::new(Grouping::Entities(dimension))
    }

    pub fn country(self, code: impl Into<String>) -> Self {
        self.filter(COUNTRY_KEY, vec![code.into()])
    }

    pub fn domain(self, domain: Option<&str>) -> Self {
        match domain {
            Some(domain) => self.filter(DOMAIN_KEY, vec![domain.to_string()]),
            None => self,
        }
    }

    pub fn period(self, year: Period) -> Self {
        self.filter(YEAR_KEY, vec![year.to_string()])
    }

    /// Keep only works tagged with one of `ids` in `dimension`.
    pub fn restrict<I, S>(self, dimension: Dimension, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter(dimension.key(), ids.into_iter().map(Into::into).collect())
    }

    fn filter(mut self, key: &'static str, values: Vec<String>) -> Self {
        self.filters.push(Filter { key, values });
        self
    }

    pub fn grouping(&self) -> Grouping {
        self.grouping
    }

    /// The value of the `filter` query parameter, `None` when unfiltered.
    pub fn filter_param(&self) -> Option<String> {
        if self.filters.is_empty() {
            return None;
        }
        Some(
            self.filters
                .iter()
                .map(|filter| filter.to_string())
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// The values a filter on `key` accepts, if the query has one.
    pub fn filter_values(&self, key: &str) -> Option<&[String]> {
        self.filters
            .iter()
            .find(|filter| filter.key == key)
            .map(|filter| filter.values.as_slice())
    }
}

#[derive(Debug, Deserialize)]
struct GroupByResponse {
    group_by: Vec<RawGroup>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    key: Option<String>,
    key_display_name: Option<String>,
    count: u64,
}

/// Client for the OpenAlex works API.
pub struct OpenAlex {
    base_uri: String,
    mailto: Option<String>,
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl OpenAlex {
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
            mailto: None,
            client: reqwest::Client::new(),
            limiter: RateLimiter::builder()
                .initial(RATE_LIMIT_COUNT)
                .max(RATE_LIMIT_COUNT)
                .refill(RATE_LIMIT_COUNT)
                .interval(RATE_LIMIT_PERIOD)
                .build(),
        }
    }

    /// Use the polite pool if `OPENALEX_EMAIL` is set to something.
    pub fn from_env(base_uri: impl Into<String>) -> Self {
        let mailto = match std::env::var(ENV_EMAIL) {
            Ok(email) if !email.trim().is_empty() => Some(email),
            _ => None,
        };
        Self::new(base_uri).with_mailto(mailto)
    }

    pub fn with_mailto(mut self, mailto: Option<String>) -> Self {
        self.mailto = mailto;
        self
    }

    fn params(&self, query: &GroupQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("group_by", query.grouping().key().to_string()),
            ("per-page", MAX_GROUPS_PER_CALL.to_string()),
        ];
        if let Some(filter) = query.filter_param() {
            params.push(("filter", filter));
        }
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.clone()));
        }
        params
    }
}

#[async_trait]
impl AggregationSource for OpenAlex {
    async fn group(&self, query: &GroupQuery) -> Result<Vec<Entity>> {
        self.limiter.acquire_one().await;
        debug!(
            group_by = query.grouping().key(),
            filter = query.filter_param().unwrap_or_default(),
            "GET {WORKS}"
        );
        let response = self
            .client
            .get(format!("{}{}", self.base_uri, WORKS))
            .query(&self.params(query))
            .send()
            .await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited);
        }
        if !status.is_success() {
            // no point in awaiting an invalid body
            return Err(Error::Status(status.as_u16()));
        }
        let body = response.text().await?;
        parse_groups(body)
    }
}

/// Decode a `group_by` response, dropping buckets without a key or a name.
pub fn parse_groups(body: String) -> Result<Vec<Entity>> {
    let response = match serde_json::from_str::<GroupByResponse>(&body) {
        Ok(response) => response,
        Err(err) => return Err(Error::Decode(err, body)),
    };
    Ok(response
        .group_by
        .into_iter()
        .filter_map(|group| match (group.key, group.key_display_name) {
            (Some(key), Some(name)) if !key.is_empty() && !name.is_empty() => {
                Some(Entity::new(short_id(&key), name, group.count))
            }
            _ => None,
        })
        .collect())
}

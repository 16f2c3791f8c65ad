//! Serves the stored snapshots as JSON.
//!
//! Everything is derived once from the snapshot directory and held in a
//! [`SnapshotCache`]; a crawl that writes new snapshots shows up only after
//! `POST /api/reload`.

#[macro_use]
extern crate rocket;

use std::path::PathBuf;
use std::sync::Arc;

use rocket::{http::Status, serde::json::Json, Build, Rocket, State};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use landscape::cache::{CountrySnapshot, SnapshotCache, Snapshots};
use landscape::cohort::TopFunder;
use landscape::graph::{build_graph, GraphOptions, SimilarityGraph};
use landscape::series::TimeSeries;
use landscape::store::SnapshotStore;
use landscape::uniqueness::UniquenessScore;
use landscape::{Dimension, Entity, Period};

const ENV_DATA_DIR: &str = "LANDSCAPE_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_TOP: usize = 5;

type ApiResult<T> = Result<Json<T>, Status>;

#[derive(Serialize)]
struct Index {
    service: &'static str,
    version: &'static str,
    endpoints: Vec<String>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    countries: usize,
    baseline_total: u64,
    built_at: String,
}

#[derive(Serialize)]
struct CohortBody {
    count: usize,
    data: Vec<Entity>,
}

#[derive(Serialize)]
struct SearchHit {
    country: String,
    id: String,
    name: String,
    volume: u64,
}

#[derive(Serialize)]
struct Reloaded {
    status: &'static str,
    countries: usize,
}

fn snapshots(cache: &SnapshotCache) -> Result<Arc<Snapshots>, Status> {
    cache.get_or_build().map_err(|err| {
        error!("snapshots unavailable: {err}");
        Status::ServiceUnavailable
    })
}

fn country<'a>(snapshots: &'a Snapshots, code: &str) -> Result<&'a CountrySnapshot, Status> {
    snapshots
        .country(&code.to_ascii_uppercase())
        .ok_or(Status::NotFound)
}

#[get("/")]
fn index() -> Json<Index> {
    let per_country = [
        endpoints::COHORT,
        endpoints::TRENDS,
        endpoints::UNIQUENESS,
        endpoints::GRAPH,
        endpoints::FUNDERS,
    ];
    let mut listed: Vec<String> = [
        endpoints::HEALTH,
        endpoints::COUNTRIES,
        endpoints::SEARCH,
        endpoints::RELOAD,
    ]
    .into_iter()
    .map(String::from)
    .collect();
    listed.extend(
        per_country
            .into_iter()
            .map(|resource| endpoints::country_resource("<code>", resource)),
    );
    Json(Index {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        endpoints: listed,
    })
}

// Mounted at HEALTH
#[get("/")]
fn health(cache: &State<SnapshotCache>) -> ApiResult<Health> {
    let snapshots = snapshots(cache)?;
    Ok(Json(Health {
        status: "ok",
        countries: snapshots.countries.len(),
        baseline_total: snapshots.baseline.total_volume,
        built_at: snapshots.built_at.clone(),
    }))
}

// The rest of the country routes are mounted at COUNTRIES.
#[get("/")]
fn countries(cache: &State<SnapshotCache>) -> ApiResult<Vec<String>> {
    Ok(Json(snapshots(cache)?.countries.keys().cloned().collect()))
}

#[get("/<code>/cohort")]
fn cohort(code: &str, cache: &State<SnapshotCache>) -> ApiResult<CohortBody> {
    let snapshots = snapshots(cache)?;
    let members = &country(&snapshots, code)?.cohort.members;
    Ok(Json(CohortBody {
        count: members.len(),
        data: members.clone(),
    }))
}

#[get("/<code>/trends")]
fn trends(code: &str, cache: &State<SnapshotCache>) -> ApiResult<TimeSeries> {
    let snapshots = snapshots(cache)?;
    Ok(Json(country(&snapshots, code)?.series.clone()))
}

#[get("/<code>/uniqueness?<top>")]
fn uniqueness(
    code: &str,
    top: Option<usize>,
    cache: &State<SnapshotCache>,
) -> ApiResult<Vec<UniquenessScore>> {
    let snapshots = snapshots(cache)?;
    let scores = &country(&snapshots, code)?.scores;
    Ok(Json(
        scores
            .iter()
            .take(top.unwrap_or(DEFAULT_TOP))
            .cloned()
            .collect(),
    ))
}

/// Empty unless the country was crawled with funders.
#[get("/<code>/funders")]
fn funders(code: &str, cache: &State<SnapshotCache>) -> ApiResult<Vec<TopFunder>> {
    let snapshots = snapshots(cache)?;
    Ok(Json(country(&snapshots, code)?.funders.clone()))
}

/// The all-time cohort, or one year's slice of it; a year without data
/// gives an empty graph.
#[get("/<code>/graph?<year>&<threshold>")]
fn graph(
    code: &str,
    year: Option<Period>,
    threshold: Option<f64>,
    cache: &State<SnapshotCache>,
) -> ApiResult<SimilarityGraph> {
    let mut options = GraphOptions::default();
    if let Some(threshold) = threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Status::BadRequest);
        }
        options = options.with_threshold(threshold);
    }
    let snapshots = snapshots(cache)?;
    let snapshot = country(&snapshots, code)?;
    let entities = match year {
        Some(year) => snapshot.series.slice(year).unwrap_or_default(),
        None => snapshot.cohort.members.as_slice(),
    };
    Ok(Json(build_graph(entities, &options)))
}

// Mounted at SEARCH
#[get("/?<q>")]
fn search(q: Option<&str>, cache: &State<SnapshotCache>) -> ApiResult<Vec<SearchHit>> {
    let needle = q.map(str::trim).unwrap_or_default().to_lowercase();
    if needle.is_empty() {
        return Err(Status::BadRequest);
    }
    let snapshots = snapshots(cache)?;
    let hits = snapshots
        .countries
        .iter()
        .flat_map(|(code, snapshot)| {
            snapshot
                .cohort
                .members
                .iter()
                .map(move |member| (code, member))
        })
        .filter(|(_, member)| member.name.to_lowercase().contains(&needle))
        .map(|(code, member)| SearchHit {
            country: code.clone(),
            id: member.id.clone(),
            name: member.name.clone(),
            volume: member.volume,
        })
        .collect();
    Ok(Json(hits))
}

// Mounted at RELOAD
#[post("/")]
fn reload(cache: &State<SnapshotCache>) -> ApiResult<Reloaded> {
    let snapshots = cache.rebuild().map_err(|err| {
        error!("reload failed: {err}");
        Status::InternalServerError
    })?;
    info!(countries = snapshots.countries.len(), "reloaded");
    Ok(Json(Reloaded {
        status: "reloaded",
        countries: snapshots.countries.len(),
    }))
}

fn rocket(cache: SnapshotCache) -> Rocket<Build> {
    rocket::build()
        .manage(cache)
        .mount(endpoints::INDEX, routes![index])
        .mount(endpoints::HEALTH, routes![health])
        .mount(
            endpoints::COUNTRIES,
            routes![countries, cohort, trends, uniqueness, graph, funders],
        )
        .mount(endpoints::SEARCH, routes![search])
        .mount(endpoints::RELOAD, routes![reload])
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();

    let data_dir = std::env::var(ENV_DATA_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
    info!(data_dir = %data_dir.display(), "serving snapshots");
    let cache = SnapshotCache::new(SnapshotStore::new(data_dir, Dimension::default()));
    if let Err(err) = cache.rebuild() {
        warn!("starting without snapshots: {err}");
    }

    rocket(cache).ignite().await?.launch().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use landscape::cohort::Cohort;
    use rocket::local::blocking::Client;
    use serde_json::Value;

    fn client() -> (tempfile::TempDir, Client) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), Dimension::Subfield);
        store
            .save_cohort(
                &Cohort::new(
                    "US",
                    Dimension::Subfield,
                    vec![
                        Entity::new("1", "Quantum Physics", 600),
                        Entity::new("2", "Quantum Computing", 200),
                    ],
                ),
                "now",
            )
            .unwrap();
        store
            .save_series(
                "US",
                &TimeSeries::from_rows([(2021, Entity::new("1", "Quantum Physics", 50))]),
                "now",
            )
            .unwrap();
        store
            .save_funders(
                "US",
                &[TopFunder {
                    entity: Entity::new("1", "Quantum Physics", 0),
                    funder: Entity::new("F1", "National Science Foundation", 42),
                }],
                "now",
            )
            .unwrap();
        store
            .save_cohort(
                &Cohort::new(
                    "DE",
                    Dimension::Subfield,
                    vec![
                        Entity::new("1", "Quantum Physics", 400),
                        Entity::new("3", "Soil Science", 300),
                    ],
                ),
                "now",
            )
            .unwrap();
        let client = Client::tracked(rocket(SnapshotCache::new(store))).unwrap();
        (dir, client)
    }

    fn get_json(client: &Client, uri: &str) -> Value {
        let response = client.get(uri.to_string()).dispatch();
        assert_eq!(response.status(), Status::Ok, "GET {uri}");
        response.into_json().unwrap()
    }

    #[test]
    fn health_reports_loaded_countries() {
        let (_dir, client) = client();
        let health = get_json(&client, endpoints::HEALTH);
        assert_eq!(health["status"], "ok");
        assert_eq!(health["countries"], 2);
        assert_eq!(health["baseline_total"], 1500);
    }

    #[test]
    fn countries_are_sorted() {
        let (_dir, client) = client();
        assert_eq!(
            get_json(&client, endpoints::COUNTRIES),
            serde_json::json!(["DE", "US"])
        );
    }

    #[test]
    fn cohort_of_unknown_country_is_not_found() {
        let (_dir, client) = client();
        let uri = endpoints::country_resource("us", endpoints::COHORT);
        let cohort = get_json(&client, &uri);
        assert_eq!(cohort["count"], 2);
        assert_eq!(cohort["data"][0]["name"], "Quantum Physics");

        let response = client
            .get(endpoints::country_resource("FR", endpoints::COHORT))
            .dispatch();
        assert_eq!(response.status(), Status::NotFound);
    }

    #[test]
    fn trends_are_keyed_by_year() {
        let (_dir, client) = client();
        let uri = endpoints::country_resource("US", endpoints::TRENDS);
        let trends = get_json(&client, &uri);
        assert_eq!(trends["periods"]["2021"][0]["volume"], 50);
    }

    #[test]
    fn uniqueness_honours_top() {
        let (_dir, client) = client();
        let base = endpoints::country_resource("DE", endpoints::UNIQUENESS);
        let scores = get_json(&client, &format!("{base}?top=1"));
        assert_eq!(scores.as_array().unwrap().len(), 1);
        assert_eq!(scores[0]["name"], "Soil Science");
    }

    #[test]
    fn graph_links_similar_names() {
        let (_dir, client) = client();
        let base = endpoints::country_resource("US", endpoints::GRAPH);
        let graph = get_json(&client, &base);
        assert_eq!(graph["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(graph["edges"].as_array().unwrap().len(), 1);

        let past = get_json(&client, &format!("{base}?year=1999"));
        assert!(past["nodes"].as_array().unwrap().is_empty());

        let response = client.get(format!("{base}?threshold=2")).dispatch();
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[test]
    fn funders_are_served() {
        let (_dir, client) = client();
        let uri = endpoints::country_resource("US", endpoints::FUNDERS);
        let funders = get_json(&client, &uri);
        assert_eq!(funders.as_array().unwrap().len(), 1);
        assert_eq!(funders[0]["entity"]["name"], "Quantum Physics");
        assert_eq!(funders[0]["funder"]["id"], "F1");

        let uri = endpoints::country_resource("DE", endpoints::FUNDERS);
        assert_eq!(get_json(&client, &uri), serde_json::json!([]));

        let response = client
            .get(endpoints::country_resource("FR", endpoints::FUNDERS))
            .dispatch();
        assert_eq!(response.status(), Status::NotFound);
    }

    #[test]
    fn search_matches_across_countries() {
        let (_dir, client) = client();
        let hits = get_json(&client, &format!("{}?q=QUANTUM%20phys", endpoints::SEARCH));
        assert_eq!(hits.as_array().unwrap().len(), 2);

        let blank = format!("{}?q=%20", endpoints::SEARCH);
        let response = client.get(blank).dispatch();
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[test]
    fn reload_picks_up_new_snapshots() {
        let (dir, client) = client();
        let listed = |client: &Client| get_json(client, endpoints::COUNTRIES);
        assert_eq!(listed(&client).as_array().unwrap().len(), 2);

        let members = vec![Entity::new("4", "Robotics", 9)];
        SnapshotStore::new(dir.path(), Dimension::Subfield)
            .save_cohort(&Cohort::new("JP", Dimension::Subfield, members), "now")
            .unwrap();
        assert_eq!(listed(&client).as_array().unwrap().len(), 2);

        let response = client.post(endpoints::RELOAD).dispatch();
        assert_eq!(response.status(), Status::Ok);
        let reloaded: Value = response.into_json().unwrap();
        assert_eq!(reloaded["countries"], 3);
    }
}

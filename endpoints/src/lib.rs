//! Paths shared by the analytics CLI and the web service.

pub const OPENALEX_BASE_URI: &str = "https://api.openalex.org";
/// Grouped aggregate queries are issued against this resource.
pub const WORKS: &str = "/works";

pub const INDEX: &str = "/";
pub const API: &str = "/api";
pub const HEALTH: &str = "/api/health";
pub const COUNTRIES: &str = "/api/countries";
pub const SEARCH: &str = "/api/search";
pub const RELOAD: &str = "/api/reload";

/// Per-country resources, relative to [`COUNTRIES`]`/<code>`.
pub const COHORT: &str = "cohort";
pub const TRENDS: &str = "trends";
pub const UNIQUENESS: &str = "uniqueness";
pub const GRAPH: &str = "graph";
pub const FUNDERS: &str = "funders";

/// Build the path of a per-country resource, e.g. `/api/countries/US/graph`.
pub fn country_resource(code: &str, resource: &str) -> String {
    format!("{COUNTRIES}/{code}/{resource}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn country_resource_path() {
        assert_eq!(country_resource("US", GRAPH), "/api/countries/US/graph");
    }
}

//! Comparative research-landscape analytics over OpenAlex.
//!
//! A country's top entities are locked into a [`cohort::Cohort`] from
//! all-time volumes, followed year by year with [`series::build_time_series`],
//! scored against every other country with [`uniqueness`] and drawn as a
//! [`graph::SimilarityGraph`].

pub mod cache;
pub mod cohort;
pub mod error;
pub mod export;
pub mod fetch;
pub mod graph;
pub mod model;
pub mod openalex;
pub mod pipeline;
pub mod series;
pub mod store;
pub mod uniqueness;

pub use error::{Error, Result};
pub use model::{Dimension, Entity, Period};

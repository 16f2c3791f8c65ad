use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A publication year.
pub type Period = i32;

/// A named statistical unit together with its work count for one
/// local unit and period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub volume: u64,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, volume: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            volume,
        }
    }
}

/// What kind of entity works are grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    #[default]
    Subfield,
    Topic,
    Field,
    Funder,
}

impl Dimension {
    /// The works attribute grouped on, which is also the attribute an ID
    /// disjunction filters on.
    pub fn key(&self) -> &'static str {
        match self {
            Dimension::Subfield => "topics.subfield.id",
            Dimension::Topic => "topics.id",
            Dimension::Field => "topics.field.id",
            Dimension::Funder => "grants.funder",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            Dimension::Subfield => "subfields",
            Dimension::Topic => "topics",
            Dimension::Field => "fields",
            Dimension::Funder => "funders",
        }
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Dimension::Subfield => write!(f, "subfield"),
            Dimension::Topic => write!(f, "topic"),
            Dimension::Field => write!(f, "field"),
            Dimension::Funder => write!(f, "funder"),
        }
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().trim_end_matches('s') {
            "subfield" => Ok(Dimension::Subfield),
            "topic" => Ok(Dimension::Topic),
            "field" => Ok(Dimension::Field),
            "funder" => Ok(Dimension::Funder),
            _ => Err(format!("unknown dimension `{s}`")),
        }
    }
}

/// Strip an OpenAlex URI down to its trailing identifier.
///
/// `https://openalex.org/subfields/1706` becomes `1706`; bare keys such as
/// country codes pass through untouched.
pub fn short_id(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

//! Telemetry dataset identifiers shared by the provider client, checkpoints, and the HTTP surface.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A telemetry dataset pulled from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Gps,
    Can,
    Fuel,
    /// Distance travelled per backfill window; history only.
    Distance,
}

impl Dataset {
    /// Datasets that maintain a latest-state row per vehicle, in pull order.
    pub const LATEST: [Dataset; 3] = [Dataset::Gps, Dataset::Can, Dataset::Fuel];

    /// Datasets walked by the historical backfill.
    pub const HISTORY: [Dataset; 4] = [
        Dataset::Gps,
        Dataset::Can,
        Dataset::Fuel,
        Dataset::Distance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Gps => "gps",
            Dataset::Can => "can",
            Dataset::Fuel => "fuel",
            Dataset::Distance => "distance",
        }
    }

    /// Provider endpoint returning the most recent snapshot, if the dataset has one.
    pub fn latest_endpoint(&self) -> Option<&'static str> {
        match self {
            Dataset::Gps => Some("gps-latest"),
            Dataset::Can => Some("can-latest"),
            Dataset::Fuel => Some("fuel-latest"),
            Dataset::Distance => None,
        }
    }

    /// Provider endpoint returning readings for a time range.
    pub fn history_endpoint(&self) -> &'static str {
        match self {
            Dataset::Gps => "gps-history",
            Dataset::Can => "can-history",
            Dataset::Fuel => "fuel-history",
            Dataset::Distance => "distance-history",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown dataset name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown dataset '{0}'; expected one of: gps, can, fuel, distance")]
pub struct UnknownDataset(pub String);

impl FromStr for Dataset {
    type Err = UnknownDataset;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gps" => Ok(Dataset::Gps),
            "can" | "battery" => Ok(Dataset::Can),
            "fuel" => Ok(Dataset::Fuel),
            "distance" => Ok(Dataset::Distance),
            other => Err(UnknownDataset(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_names_case_insensitively() {
        assert_eq!("GPS".parse::<Dataset>(), Ok(Dataset::Gps));
        assert_eq!("battery".parse::<Dataset>(), Ok(Dataset::Can));
        assert_eq!(" fuel ".parse::<Dataset>(), Ok(Dataset::Fuel));
        assert!("odometer".parse::<Dataset>().is_err());
    }

    #[test]
    fn distance_has_no_latest_endpoint() {
        assert_eq!(Dataset::Distance.latest_endpoint(), None);
        assert_eq!(Dataset::Distance.history_endpoint(), "distance-history");
        assert!(Dataset::LATEST.iter().all(|d| d.latest_endpoint().is_some()));
    }
}

//! Data standards an exchange set can target.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The output format family a job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataStandard {
    /// S-100 family products.
    S100,
    /// S-63 encrypted ENC products.
    S63,
    /// S-57 unencrypted ENC products.
    S57,
}

impl DataStandard {
    /// Every supported standard.
    pub const ALL: [Self; 3] = [Self::S100, Self::S63, Self::S57];

    /// Lower-case identifier used in queue names and table partitions.
    #[must_use]
    pub fn slug(&self) -> &'static str {
        match self {
            Self::S100 => "s100",
            Self::S63 => "s63",
            Self::S57 => "s57",
        }
    }

    /// Whether requests may carry a product filter expression.
    #[must_use]
    pub fn supports_filter(&self) -> bool {
        matches!(self, Self::S100)
    }
}

impl fmt::Display for DataStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S100 => write!(f, "S100"),
            Self::S63 => write!(f, "S63"),
            Self::S57 => write!(f, "S57"),
        }
    }
}

/// Raised when a data standard name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown data standard '{0}'")]
pub struct UnknownDataStandard(pub String);

impl FromStr for DataStandard {
    type Err = UnknownDataStandard;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "s100" => Ok(Self::S100),
            "s63" => Ok(Self::S63),
            "s57" => Ok(Self::S57),
            _ => Err(UnknownDataStandard(s.to_string())),
        }
    }
}

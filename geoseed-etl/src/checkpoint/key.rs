//! Structured progress keys
//!
//! Each unit of resumable work has a typed key. The string form is what the
//! ledger file stores and what operators grep for:
//!
//! | Key                                   | String                  |
//! |---------------------------------------|-------------------------|
//! | `Boundary { country, adm }`           | `NZL-ADM1`              |
//! | `PopulationCountry { country }`       | `NZL`                   |
//! | `PopulationLevel { country, level }`  | `NZL:adm2`              |
//! | `PopulationChunk { .., chunk }`       | `NZL:adm2:chunk3`       |
//! | `RasterTiles { country }`             | `rasters:NZL`           |
//!
//! `adm` is the source ADM number (0-5); `level` is the stored adm_level.

use geoseed_common::Error;
use std::fmt;
use std::str::FromStr;

/// Ledger section a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Boundaries,
    Population,
    RasterTiles,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKey {
    Boundary { country: String, adm: u8 },
    PopulationCountry { country: String },
    PopulationLevel { country: String, level: i64 },
    PopulationChunk { country: String, level: i64, chunk: usize },
    RasterTiles { country: String },
}

impl TaskKey {
    pub fn boundary(country: &str, adm: u8) -> Self {
        TaskKey::Boundary {
            country: country.to_uppercase(),
            adm,
        }
    }

    pub fn population_country(country: &str) -> Self {
        TaskKey::PopulationCountry {
            country: country.to_uppercase(),
        }
    }

    pub fn population_level(country: &str, level: i64) -> Self {
        TaskKey::PopulationLevel {
            country: country.to_uppercase(),
            level,
        }
    }

    pub fn population_chunk(country: &str, level: i64, chunk: usize) -> Self {
        TaskKey::PopulationChunk {
            country: country.to_uppercase(),
            level,
            chunk,
        }
    }

    pub fn raster_tiles(country: &str) -> Self {
        TaskKey::RasterTiles {
            country: country.to_uppercase(),
        }
    }

    pub fn section(&self) -> Section {
        match self {
            TaskKey::Boundary { .. } => Section::Boundaries,
            TaskKey::PopulationCountry { .. }
            | TaskKey::PopulationLevel { .. }
            | TaskKey::PopulationChunk { .. } => Section::Population,
            TaskKey::RasterTiles { .. } => Section::RasterTiles,
        }
    }

    pub fn country(&self) -> &str {
        match self {
            TaskKey::Boundary { country, .. }
            | TaskKey::PopulationCountry { country }
            | TaskKey::PopulationLevel { country, .. }
            | TaskKey::PopulationChunk { country, .. }
            | TaskKey::RasterTiles { country } => country,
        }
    }

    /// Stored adm_level this key covers, if it is level-specific
    pub fn level(&self) -> Option<i64> {
        match self {
            TaskKey::Boundary { adm, .. } => Some(i64::from(*adm) + 1),
            TaskKey::PopulationLevel { level, .. } | TaskKey::PopulationChunk { level, .. } => {
                Some(*level)
            }
            TaskKey::PopulationCountry { .. } | TaskKey::RasterTiles { .. } => None,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKey::Boundary { country, adm } => write!(f, "{}-ADM{}", country, adm),
            TaskKey::PopulationCountry { country } => write!(f, "{}", country),
            TaskKey::PopulationLevel { country, level } => write!(f, "{}:adm{}", country, level),
            TaskKey::PopulationChunk {
                country,
                level,
                chunk,
            } => write!(f, "{}:adm{}:chunk{}", country, level, chunk),
            TaskKey::RasterTiles { country } => write!(f, "rasters:{}", country),
        }
    }
}

fn parse_prefixed<T: FromStr>(part: &str, prefix: &str, key: &str) -> Result<T, Error> {
    part.strip_prefix(prefix)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| Error::Ledger(format!("malformed progress key '{}'", key)))
}

fn valid_country(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}

impl FromStr for TaskKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || Error::Ledger(format!("malformed progress key '{}'", s));

        if let Some(country) = s.strip_prefix("rasters:") {
            if !valid_country(country) {
                return Err(malformed());
            }
            return Ok(TaskKey::raster_tiles(country));
        }

        if let Some((country, adm)) = s.split_once("-ADM") {
            if !valid_country(country) {
                return Err(malformed());
            }
            let adm: u8 = adm.parse().map_err(|_| malformed())?;
            return Ok(TaskKey::boundary(country, adm));
        }

        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [country] if valid_country(country) => Ok(TaskKey::population_country(country)),
            [country, level] if valid_country(country) => Ok(TaskKey::population_level(
                country,
                parse_prefixed(level, "adm", s)?,
            )),
            [country, level, chunk] if valid_country(country) => Ok(TaskKey::population_chunk(
                country,
                parse_prefixed(level, "adm", s)?,
                parse_prefixed(chunk, "chunk", s)?,
            )),
            _ => Err(malformed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_forms() {
        assert_eq!(TaskKey::boundary("nzl", 1).to_string(), "NZL-ADM1");
        assert_eq!(TaskKey::population_country("NZL").to_string(), "NZL");
        assert_eq!(TaskKey::population_level("NZL", 3).to_string(), "NZL:adm3");
        assert_eq!(TaskKey::population_chunk("NZL", 3, 12).to_string(), "NZL:adm3:chunk12");
        assert_eq!(TaskKey::raster_tiles("NZL").to_string(), "rasters:NZL");
    }

    #[test]
    fn test_parse_every_kind() {
        for text in ["USA-ADM0", "USA", "USA:adm2", "USA:adm2:chunk0", "rasters:USA"] {
            let key: TaskKey = text.parse().unwrap();
            assert_eq!(key.to_string(), text);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for text in ["", "US", "USA:level2", "USA:adm2:part1", "rasters:", "USA-ADMx", "started_at"] {
            assert!(text.parse::<TaskKey>().is_err(), "accepted '{}'", text);
        }
    }

    #[test]
    fn test_boundary_key_maps_to_stored_level() {
        assert_eq!(TaskKey::boundary("FRA", 0).level(), Some(1));
        assert_eq!(TaskKey::boundary("FRA", 4).level(), Some(5));
        assert_eq!(TaskKey::population_country("FRA").level(), None);
    }
}

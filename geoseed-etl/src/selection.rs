//! Country / level scope of a run
//!
//! Levels are given as source ADM numbers (0-5) on the command line; the
//! store holds them as `adm + 1`.

use crate::checkpoint::ResetScope;
use std::collections::BTreeSet;

/// Highest ADM number published by the boundary dataset
pub const MAX_ADM: u8 = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Upper-case ISO3 codes; `None` = every country found
    pub countries: Option<BTreeSet<String>>,
    /// Source ADM numbers; `None` = all
    pub adm_levels: Option<BTreeSet<u8>>,
}

impl Selection {
    pub fn new(countries: &[String], adm_levels: &[u8]) -> Self {
        let countries: BTreeSet<String> = countries
            .iter()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect();
        let adm_levels: BTreeSet<u8> = adm_levels.iter().copied().collect();
        Self {
            countries: (!countries.is_empty()).then_some(countries),
            adm_levels: (!adm_levels.is_empty()).then_some(adm_levels),
        }
    }

    pub fn includes_country(&self, iso3: &str) -> bool {
        self.countries
            .as_ref()
            .map_or(true, |set| set.contains(&iso3.to_uppercase()))
    }

    pub fn includes_adm(&self, adm: u8) -> bool {
        self.adm_levels.as_ref().map_or(true, |set| set.contains(&adm))
    }

    /// Stored level filter for Phase 2
    pub fn includes_level(&self, level: i64) -> bool {
        match u8::try_from(level - 1) {
            Ok(adm) => self.includes_adm(adm),
            Err(_) => false,
        }
    }

    /// ADM numbers to import, ascending
    pub fn adm_list(&self) -> Vec<u8> {
        (0..=MAX_ADM).filter(|adm| self.includes_adm(*adm)).collect()
    }

    pub fn country_list(&self) -> Option<Vec<String>> {
        self.countries.as_ref().map(|set| set.iter().cloned().collect())
    }

    /// Shallowest stored level in scope
    pub fn min_level(&self) -> i64 {
        self.adm_levels
            .as_ref()
            .and_then(|set| set.iter().next())
            .map_or(1, |adm| i64::from(*adm) + 1)
    }

    /// Ledger keys cleared by a fresh run of this selection
    pub fn reset_scope(&self) -> ResetScope {
        ResetScope {
            countries: self.countries.clone(),
            min_level: self.adm_levels.as_ref().map(|_| self.min_level()),
        }
    }

    /// Arguments reproducing this selection for a worker process
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(countries) = &self.countries {
            args.push("--countries".to_string());
            args.push(countries.iter().cloned().collect::<Vec<_>>().join(","));
        }
        if let Some(levels) = &self.adm_levels {
            args.push("--adm-levels".to_string());
            args.push(
                levels
                    .iter()
                    .map(u8::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }
        args
    }
}

//! URL-safe jurisdiction slugs
//!
//! Pattern: `{iso3_lower}-{adm_level}-{sanitized_name}`, e.g.
//! `("FRA", 2, "Île-de-France")` → `fra-2-ile-de-france`.

use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// Sanitize a display name into a slug fragment
///
/// NFKD-decompose, drop non-ASCII code points (combining marks go with
/// them), lowercase, collapse every run of non-alphanumerics into one `-`,
/// trim leading and trailing `-`. Empty results become `unknown`.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.nfkd().filter(char::is_ascii) {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }

    if out.is_empty() {
        "unknown".to_string()
    } else {
        out
    }
}

/// Base slug before collision suffixes
pub fn slugify(iso3: &str, adm_level: i64, name: &str) -> String {
    format!("{}-{}-{}", iso3.to_lowercase(), adm_level, sanitize_name(name))
}

/// Hands out unique slugs within one import unit
///
/// Collisions get `-2`, `-3`, ... in the order features are offered, so
/// re-importing the same file yields the same slugs.
#[derive(Debug, Default)]
pub struct SlugAllocator {
    taken: HashSet<String>,
}

impl SlugAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, iso3: &str, adm_level: i64, name: &str) -> String {
        let base = slugify(iso3, adm_level, name);
        let mut slug = base.clone();
        let mut count = 2;
        while self.taken.contains(&slug) {
            slug = format!("{}-{}", base, count);
            count += 1;
        }
        self.taken.insert(slug.clone());
        slug
    }
}

//! Hierarchy repair
//!
//! Re-attaches jurisdictions that were inserted without a parent. For each
//! (country, level) group the candidate parents are the country's rows one
//! level up. The parent is the candidate sharing the most area with the
//! orphan; when nothing overlaps (slivers, coastline mismatches) the
//! candidate with the nearest centroid is used. Levels are never skipped: a
//! group whose country has nothing one level up stays unresolved.

use crate::db::jurisdictions::{self, JurisdictionShape};
use crate::geometry::{self, BboxIndex};
use crate::selection::Selection;
use crate::utils::retry_on_lock;
use geoseed_common::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Outcome for one (country, level) group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupReport {
    pub iso_code: String,
    pub adm_level: i64,
    pub orphans: u64,
    pub spatial: u64,
    pub centroid: u64,
    pub unresolved: u64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub groups: Vec<GroupReport>,
}

impl RepairReport {
    pub fn attached(&self) -> u64 {
        self.groups.iter().map(|g| g.spatial + g.centroid).sum()
    }

    pub fn unresolved(&self) -> u64 {
        self.groups.iter().map(|g| g.unresolved).sum()
    }

    pub fn display_string(&self) -> String {
        let spatial: u64 = self.groups.iter().map(|g| g.spatial).sum();
        let centroid: u64 = self.groups.iter().map(|g| g.centroid).sum();
        format!(
            "{} groups, {} attached by overlap, {} by nearest centroid, {} still orphaned",
            self.groups.len(),
            spatial,
            centroid,
            self.unresolved()
        )
    }
}

pub struct HierarchyRepair<'a> {
    pool: &'a SqlitePool,
    page_size: i64,
    max_lock_wait_ms: u64,
}

impl<'a> HierarchyRepair<'a> {
    pub fn new(pool: &'a SqlitePool, page_size: usize, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            page_size: page_size.max(1) as i64,
            max_lock_wait_ms,
        }
    }

    /// Repair every orphan group in scope
    ///
    /// National rows without a parent are attached to `earth_id`.
    pub async fn run(&self, earth_id: &str, selection: &Selection) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        let groups = jurisdictions::orphan_groups(self.pool).await?;

        for group in groups {
            if !selection.includes_country(&group.iso_code)
                || !selection.includes_level(group.adm_level)
            {
                continue;
            }

            let mut entry = GroupReport {
                iso_code: group.iso_code.clone(),
                adm_level: group.adm_level,
                orphans: group.count as u64,
                ..GroupReport::default()
            };

            if group.adm_level == 1 {
                entry.spatial =
                    jurisdictions::attach_nationals_to_root(self.pool, &entry.iso_code, earth_id)
                        .await?;
            } else {
                self.repair_group(&mut entry).await?;
            }

            info!(
                country = %entry.iso_code,
                level = entry.adm_level,
                orphans = entry.orphans,
                spatial = entry.spatial,
                centroid = entry.centroid,
                unresolved = entry.unresolved,
                "Repaired orphan group"
            );
            report.groups.push(entry);
        }

        info!("Hierarchy repair complete: {}", report.display_string());
        Ok(report)
    }

    async fn repair_group(&self, entry: &mut GroupReport) -> Result<()> {
        let candidates = jurisdictions::fetch_all_shapes(
            self.pool,
            &entry.iso_code,
            entry.adm_level - 1,
            self.page_size,
        )
        .await?;
        if candidates.is_empty() {
            warn!(
                country = %entry.iso_code,
                level = entry.adm_level,
                "No rows one level up, orphans left unresolved"
            );
            entry.unresolved = entry.orphans;
            entry.reason = Some(format!("no level {} rows", entry.adm_level - 1));
            return Ok(());
        }

        let index = BboxIndex::build(candidates.iter().map(|c| c.bbox));
        let mut after_id = String::new();

        loop {
            let page = jurisdictions::fetch_orphans_page(
                self.pool,
                &entry.iso_code,
                entry.adm_level,
                &after_id,
                self.page_size,
            )
            .await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id.clone();

            for orphan in &page {
                match choose_parent(orphan, &candidates, &index) {
                    Some((parent, ParentMatch::Overlap)) => {
                        self.attach(orphan, parent).await?;
                        entry.spatial += 1;
                    }
                    Some((parent, ParentMatch::NearestCentroid)) => {
                        self.attach(orphan, parent).await?;
                        entry.centroid += 1;
                    }
                    None => {
                        warn!(id = %orphan.id, name = %orphan.name, "Orphan has no usable parent");
                        entry.unresolved += 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn attach(&self, orphan: &JurisdictionShape, parent: &JurisdictionShape) -> Result<()> {
        retry_on_lock("set parent", self.max_lock_wait_ms, || {
            jurisdictions::set_parent(self.pool, &orphan.id, &parent.id)
        })
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParentMatch {
    Overlap,
    NearestCentroid,
}

fn choose_parent<'c>(
    orphan: &JurisdictionShape,
    candidates: &'c [JurisdictionShape],
    index: &BboxIndex,
) -> Option<(&'c JurisdictionShape, ParentMatch)> {
    let hits = index.candidates(&orphan.bbox);
    if let Some((i, _)) = geometry::largest_overlap(
        &orphan.geometry,
        hits.into_iter().map(|i| (i, &candidates[i].geometry)),
    ) {
        return Some((&candidates[i], ParentMatch::Overlap));
    }

    let target = orphan.centroid?;
    geometry::nearest_centroid(
        target,
        candidates
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.centroid.map(|p| (i, p))),
    )
    .map(|i| (&candidates[i], ParentMatch::NearestCentroid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Bbox;
    use geo::MultiPolygon;

    fn shape(id: &str, x0: f64, y0: f64, size: f64) -> JurisdictionShape {
        let geometry = MultiPolygon::new(vec![Bbox::new(x0, y0, x0 + size, y0 + size).to_polygon()]);
        JurisdictionShape {
            id: id.to_string(),
            name: id.to_string(),
            adm_level: 2,
            bbox: Bbox::of(&geometry).unwrap(),
            centroid: geometry::centroid(&geometry),
            geometry,
        }
    }

    #[test]
    fn test_largest_overlap_wins() {
        let candidates = vec![shape("a", 0.0, 0.0, 2.0), shape("b", 2.0, 0.0, 2.0)];
        let index = BboxIndex::build(candidates.iter().map(|c| c.bbox));
        // 0.5 wide in a, 1.0 wide in b
        let orphan = shape("o", 1.5, 0.5, 1.5);
        let (parent, how) = choose_parent(&orphan, &candidates, &index).unwrap();
        assert_eq!(parent.id, "b");
        assert_eq!(how, ParentMatch::Overlap);
    }

    #[test]
    fn test_exact_tie_keeps_first() {
        let candidates = vec![shape("a", 0.0, 0.0, 2.0), shape("b", 2.0, 0.0, 2.0)];
        let index = BboxIndex::build(candidates.iter().map(|c| c.bbox));
        let orphan = shape("o", 1.0, 0.0, 2.0);
        assert_eq!(choose_parent(&orphan, &candidates, &index).unwrap().0.id, "a");
    }

    #[test]
    fn test_nearest_centroid_when_nothing_overlaps() {
        let candidates = vec![shape("far", 50.0, 50.0, 1.0), shape("near", 5.0, 5.0, 1.0)];
        let index = BboxIndex::build(candidates.iter().map(|c| c.bbox));
        let orphan = shape("o", 7.0, 7.0, 0.5);
        let (parent, how) = choose_parent(&orphan, &candidates, &index).unwrap();
        assert_eq!(parent.id, "near");
        assert_eq!(how, ParentMatch::NearestCentroid);
    }
}

//! Watershed partitioning of the compact heightfield into regions

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use super::compact::CompactHeightField;

/// Region id for spans that belong to no region.
pub const NO_REGION: u16 = 0;

/// Partition walkable spans into regions, writing `region` on every span.
/// Returns the number of regions kept.
///
/// Flooding starts at the spans furthest from any edge and descends two
/// distance levels at a time. At each level existing regions grow for up to
/// `iteration_count` rounds before new regions are seeded. Regions smaller
/// than `min_region_area` spans are merged into their largest neighbour or
/// discarded when isolated.
pub fn build_regions(
    chf: &mut CompactHeightField,
    distances: &[u16],
    iteration_count: usize,
    min_region_area: usize,
) -> usize {
    let n = chf.span_count();
    let mut regions = vec![NO_REGION; n];
    let mut region_dist = vec![0u32; n];
    let max_dist = distances.iter().copied().max().unwrap_or(0);

    let mut next_region: u16 = 1;
    let mut level = (max_dist.saturating_add(1)) & !1;
    while level > 0 {
        level = level.saturating_sub(2);
        expand_regions(chf, distances, &mut regions, &mut region_dist, level, iteration_count);

        for i in 0..n {
            if distances[i] < level || regions[i] != NO_REGION {
                continue;
            }
            if flood_region(chf, distances, &mut regions, &mut region_dist, i, level, next_region) {
                next_region = next_region.saturating_add(1);
            }
        }
    }
    expand_regions(chf, distances, &mut regions, &mut region_dist, 0, usize::MAX);

    let kept = merge_and_filter(chf, &mut regions, min_region_area);
    for (span, region) in chf.spans.iter_mut().zip(&regions) {
        span.region = *region;
    }
    debug!(seeded = next_region - 1, kept, "Built navmesh regions");
    kept
}

fn expand_regions(
    chf: &CompactHeightField,
    distances: &[u16],
    regions: &mut [u16],
    region_dist: &mut [u32],
    level: u16,
    max_iterations: usize,
) {
    let mut pending: Vec<usize> = (0..regions.len())
        .filter(|&i| regions[i] == NO_REGION && distances[i] >= level)
        .collect();

    let mut iteration = 0;
    while !pending.is_empty() && iteration < max_iterations {
        let mut assigned = Vec::new();
        for &i in &pending {
            let mut best: Option<(u32, u16)> = None;
            for dir in 0..4 {
                let Some(a) = chf.neighbour(i, dir) else {
                    continue;
                };
                if regions[a] == NO_REGION {
                    continue;
                }
                let candidate = (region_dist[a] + 2, regions[a]);
                if best.map_or(true, |b| candidate < b) {
                    best = Some(candidate);
                }
            }
            if let Some((d, r)) = best {
                assigned.push((i, r, d));
            }
        }
        if assigned.is_empty() {
            break;
        }
        for &(i, r, d) in &assigned {
            regions[i] = r;
            region_dist[i] = d;
        }
        pending.retain(|&i| regions[i] == NO_REGION);
        iteration += 1;
    }
}

/// Grow a new region from `seed` over spans at or above `level`. A span that
/// borders a different region is left for expansion so regions never touch
/// through a flood. Returns false if nothing was claimed.
fn flood_region(
    chf: &CompactHeightField,
    distances: &[u16],
    regions: &mut [u16],
    region_dist: &mut [u32],
    seed: usize,
    level: u16,
    region: u16,
) -> bool {
    let mut queue = VecDeque::from([seed]);
    regions[seed] = region;
    region_dist[seed] = 0;
    let mut claimed = 0usize;

    while let Some(i) = queue.pop_front() {
        let touches_other = (0..4).any(|dir| {
            chf.neighbour(i, dir)
                .is_some_and(|a| regions[a] != NO_REGION && regions[a] != region)
        });
        if touches_other {
            regions[i] = NO_REGION;
            continue;
        }
        claimed += 1;
        for dir in 0..4 {
            let Some(a) = chf.neighbour(i, dir) else {
                continue;
            };
            if regions[a] == NO_REGION && distances[a] >= level {
                regions[a] = region;
                region_dist[a] = 0;
                queue.push_back(a);
            }
        }
    }
    claimed > 0
}

/// Merge undersized regions into their largest neighbour, drop isolated ones
/// and renumber the survivors densely from 1.
fn merge_and_filter(chf: &CompactHeightField, regions: &mut [u16], min_region_area: usize) -> usize {
    loop {
        let mut area: BTreeMap<u16, usize> = BTreeMap::new();
        let mut neighbours: BTreeMap<u16, BTreeSet<u16>> = BTreeMap::new();
        for (i, &r) in regions.iter().enumerate() {
            if r == NO_REGION {
                continue;
            }
            *area.entry(r).or_default() += 1;
            for dir in 0..4 {
                if let Some(a) = chf.neighbour(i, dir) {
                    let other = regions[a];
                    if other != NO_REGION && other != r {
                        neighbours.entry(r).or_default().insert(other);
                    }
                }
            }
        }

        let small = area
            .iter()
            .filter(|(_, &count)| count < min_region_area)
            .map(|(&r, &count)| (count, r))
            .min();
        let Some((_, victim)) = small else {
            break;
        };

        let target = neighbours
            .get(&victim)
            .and_then(|set| set.iter().map(|&r| (area[&r], std::cmp::Reverse(r))).max())
            .map(|(_, std::cmp::Reverse(r))| r)
            .unwrap_or(NO_REGION);
        for r in regions.iter_mut().filter(|r| **r == victim) {
            *r = target;
        }
    }

    let mut remap: BTreeMap<u16, u16> = BTreeMap::new();
    for &r in regions.iter() {
        if r != NO_REGION {
            let next = remap.len() as u16 + 1;
            remap.entry(r).or_insert(next);
        }
    }
    for r in regions.iter_mut() {
        if *r != NO_REGION {
            *r = remap[r];
        }
    }
    remap.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::Aabb;
    use crate::math::Vec3;
    use crate::navmesh::distance::{box_blur, distance_field};
    use crate::navmesh::heightfield::{HeightField, Span};

    fn grid(cells: &[(usize, usize)], width: usize, depth: usize) -> CompactHeightField {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::new(width as f64, 10.0, depth as f64));
        let mut field = HeightField::new(bounds, 1.0, 1.0);
        for &(x, z) in cells {
            field.add_span(x, z, Span { min: 0, max: 1, walkable: true });
        }
        CompactHeightField::build(&field, 2, 1)
    }

    fn rect(x0: usize, x1: usize, z0: usize, z1: usize) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for z in z0..z1 {
            for x in x0..x1 {
                out.push((x, z));
            }
        }
        out
    }

    #[test]
    fn every_span_of_a_square_lands_in_a_region() {
        let mut chf = grid(&rect(0, 10, 0, 10), 10, 10);
        let dist = box_blur(&chf, &distance_field(&chf));
        let count = build_regions(&mut chf, &dist, 8, 4);
        assert!(count >= 1);
        assert!(chf.spans.iter().all(|s| s.region != NO_REGION));
    }

    #[test]
    fn disconnected_islands_get_separate_regions() {
        let mut cells = rect(0, 5, 0, 5);
        cells.extend(rect(8, 13, 0, 5));
        let mut chf = grid(&cells, 13, 5);
        let dist = box_blur(&chf, &distance_field(&chf));
        let count = build_regions(&mut chf, &dist, 8, 4);
        assert_eq!(count, 2);
        let left = chf.spans[chf.cell(0, 0).index].region;
        let right = chf.spans[chf.cell(12, 4).index].region;
        assert_ne!(left, right);
    }

    #[test]
    fn tiny_isolated_region_is_discarded() {
        let mut cells = rect(0, 6, 0, 6);
        cells.push((9, 0));
        let mut chf = grid(&cells, 10, 6);
        let dist = box_blur(&chf, &distance_field(&chf));
        let count = build_regions(&mut chf, &dist, 8, 4);
        assert_eq!(count, 1);
        assert_eq!(chf.spans[chf.cell(9, 0).index].region, NO_REGION);
    }
}

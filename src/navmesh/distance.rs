//! Distance-to-edge field over the compact heightfield

use super::compact::CompactHeightField;

/// Chebyshev distance (in cells) from every span to the nearest span that is
/// missing a neighbour connection.
pub fn distance_field(chf: &CompactHeightField) -> Vec<u16> {
    let n = chf.span_count();
    let mut dist = vec![u16::MAX; n];
    for (i, span) in chf.spans.iter().enumerate() {
        if span.connections.iter().any(Option::is_none) {
            dist[i] = 0;
        }
    }

    // Forward pass: (-1,0), (-1,-1), (0,-1), (1,-1).
    for i in 0..n {
        relax(chf, &mut dist, i, 0, Some(3));
        relax(chf, &mut dist, i, 3, Some(2));
    }
    // Backward pass: (1,0), (1,1), (0,1), (-1,1).
    for i in (0..n).rev() {
        relax(chf, &mut dist, i, 2, Some(1));
        relax(chf, &mut dist, i, 1, Some(0));
    }
    dist
}

/// Relax `i` against its neighbour in `dir` and, when given, the diagonal
/// reached by stepping `dir` then `turn`.
fn relax(chf: &CompactHeightField, dist: &mut [u16], i: usize, dir: usize, turn: Option<usize>) {
    let Some(a) = chf.neighbour(i, dir) else {
        return;
    };
    let via = dist[a].saturating_add(1);
    if via < dist[i] {
        dist[i] = via;
    }
    if let Some(turn) = turn {
        if let Some(b) = chf.neighbour(a, turn) {
            let via = dist[b].saturating_add(1);
            if via < dist[i] {
                dist[i] = via;
            }
        }
    }
}

/// 3×3 box blur. Missing neighbours contribute the centre value.
pub fn box_blur(chf: &CompactHeightField, dist: &[u16]) -> Vec<u16> {
    let mut out = vec![0u16; dist.len()];
    for i in 0..dist.len() {
        let centre = dist[i] as u32;
        let mut sum = centre;
        for dir in 0..4 {
            match chf.neighbour(i, dir) {
                Some(a) => {
                    sum += dist[a] as u32;
                    let diagonal = chf.neighbour(a, (dir + 1) % 4);
                    sum += diagonal.map(|b| dist[b] as u32).unwrap_or(centre);
                }
                None => sum += centre * 2,
            }
        }
        out[i] = ((sum + 4) / 9) as u16;
    }
    out
}

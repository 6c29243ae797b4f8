pub mod volume;

use rayon::prelude::*;

use crate::config::CoreConfig;
use crate::error::ReconstructionError;
use crate::io::input::{Contour, ContourPoint, Structure};
pub use volume::{BoundaryFace, FaceNormal, Volume};

/// Rings with less shoelace area than this cannot enclose a voxel and
/// are treated as degenerate input.
const DEGENERATE_AREA_MM2: f64 = 1e-3;

/// Builds a voxel solid from a structure's per-slice rings.
///
/// Slices are sorted by z. Each voxel layer between the first and last
/// slice plane is filled from the bracketing rings: directly from the
/// nearer slice when the gap is tight, by pointwise interpolation of
/// arc-length-resampled rings when the gap exceeds the configured
/// threshold (wide-gap extrusion would produce stair-step artifacts).
/// Disjoint rings on one slice are unioned into the same solid.
///
/// Deterministic: identical contours and config produce an identical
/// voxel block.
pub fn reconstruct(
    structure: &Structure,
    config: &CoreConfig,
) -> Result<Volume, ReconstructionError> {
    if structure.contours.is_empty() {
        return Err(ReconstructionError::EmptyStructure {
            name: structure.name.clone(),
        });
    }
    for contour in &structure.contours {
        if contour.is_degenerate(DEGENERATE_AREA_MM2) {
            return Err(ReconstructionError::DegenerateContour {
                name: structure.name.clone(),
                z: contour.z(),
                points: contour.points.len(),
                area: contour.area(),
            });
        }
    }

    let slices = structure.slices();
    if slices.len() < 2 {
        return Err(ReconstructionError::TooFewSlices {
            name: structure.name.clone(),
            slices: slices.len(),
        });
    }

    let (sx, sy, sz) = (
        config.voxel_spacing_mm,
        config.voxel_spacing_mm,
        config.voxel_spacing_z_mm,
    );

    // world bounding box over all rings, padded by one voxel
    let mut min = (f64::INFINITY, f64::INFINITY);
    let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for contour in &structure.contours {
        let (lo, hi) = contour.bounding_box();
        min.0 = min.0.min(lo.0);
        min.1 = min.1.min(lo.1);
        max.0 = max.0.max(hi.0);
        max.1 = max.1.max(hi.1);
    }
    let z_lo = slices[0].0;
    let z_hi = slices[slices.len() - 1].0;

    let i0 = (min.0 / sx).floor() as i64 - 1;
    let j0 = (min.1 / sy).floor() as i64 - 1;
    let i1 = (max.0 / sx).ceil() as i64 + 1;
    let j1 = (max.1 / sy).ceil() as i64 + 1;
    let nx = (i1 - i0) as usize;
    let ny = (j1 - j0) as usize;

    // layers whose center falls between the first and last slice plane
    let k0 = (z_lo / sz - 0.5).ceil() as i64;
    let k1 = (z_hi / sz - 0.5).floor() as i64;
    if k1 < k0 {
        return Err(ReconstructionError::TooFewSlices {
            name: structure.name.clone(),
            slices: slices.len(),
        });
    }
    let nz = (k1 - k0 + 1) as usize;

    let layers: Vec<Vec<bool>> = (k0..=k1)
        .into_par_iter()
        .map(|gk| {
            let zc = (gk as f64 + 0.5) * sz;
            let rings = rings_for_layer(&slices, zc, config);
            rasterize_rings(&rings, i0, nx, j0, ny, sx, sy)
        })
        .collect();

    let mut data = Vec::with_capacity(nx * ny * nz);
    for layer in layers {
        data.extend(layer);
    }

    Ok(Volume {
        name: structure.name.clone(),
        spacing: (sx, sy, sz),
        offset: (i0, j0, k0),
        dims: (nx, ny, nz),
        data,
    })
}

/// Picks or synthesizes the rings covering one voxel layer at height `zc`.
fn rings_for_layer(slices: &[(f64, Vec<&Contour>)], zc: f64, config: &CoreConfig) -> Vec<Contour> {
    // bracketing slice pair
    let upper = slices.partition_point(|(z, _)| *z <= zc);
    let (below, above) = if upper == 0 {
        (0, 0)
    } else if upper >= slices.len() {
        (slices.len() - 1, slices.len() - 1)
    } else {
        (upper - 1, upper)
    };

    let (z_a, rings_a) = (&slices[below].0, &slices[below].1);
    let (z_b, rings_b) = (&slices[above].0, &slices[above].1);
    let gap = z_b - z_a;

    let nearest = if (zc - z_a).abs() <= (z_b - zc).abs() {
        rings_a
    } else {
        rings_b
    };

    if below == above || gap <= config.interpolation_threshold_mm {
        return nearest.iter().map(|c| (*c).clone()).collect();
    }

    // ring pairing across slices is only well defined when the counts
    // agree; a lobe appearing or vanishing falls back to the nearest
    // slice
    if rings_a.len() != rings_b.len() {
        return nearest.iter().map(|c| (*c).clone()).collect();
    }

    let t = (zc - z_a) / gap;
    let mut a_sorted: Vec<&Contour> = rings_a.to_vec();
    let mut b_sorted: Vec<&Contour> = rings_b.to_vec();
    let by_centroid = |a: &&Contour, b: &&Contour| {
        (a.centroid.0, a.centroid.1)
            .partial_cmp(&(b.centroid.0, b.centroid.1))
            .unwrap_or(std::cmp::Ordering::Equal)
    };
    a_sorted.sort_by(by_centroid);
    b_sorted.sort_by(by_centroid);

    a_sorted
        .iter()
        .zip(b_sorted.iter())
        .map(|(a, b)| interpolate_rings(a, b, t, zc, config.ring_resample_points))
        .collect()
}

/// Pointwise linear interpolation between two rings resampled to the
/// same point count, at fraction `t` of the way from `a` to `b`.
fn interpolate_rings(a: &Contour, b: &Contour, t: f64, zc: f64, n: usize) -> Contour {
    let ra = a.resample_closed(n);
    let rb = b.resample_closed(n);

    let points = ra
        .points
        .iter()
        .zip(rb.points.iter())
        .map(|(pa, pb)| ContourPoint {
            slice_index: pa.slice_index,
            ring_index: pa.ring_index,
            point_index: pa.point_index,
            x: pa.x + (pb.x - pa.x) * t,
            y: pa.y + (pb.y - pa.y) * t,
            z: zc,
        })
        .collect();

    Contour::new(a.slice_index, a.ring_index, points)
}

/// Even-odd scanline rasterization of a set of rings onto one voxel
/// layer. Each ring is filled independently; rings are unioned, which is
/// the behavior the structure set semantics require for disjoint lobes.
fn rasterize_rings(
    rings: &[Contour],
    i0: i64,
    nx: usize,
    j0: i64,
    ny: usize,
    sx: f64,
    sy: f64,
) -> Vec<bool> {
    let mut mask = vec![false; nx * ny];

    for ring in rings {
        let pts = &ring.points;
        let n = pts.len();
        if n < 3 {
            continue;
        }

        for j in 0..ny {
            let yc = (j0 + j as i64) as f64 * sy + sy / 2.0;

            // x positions where the scanline crosses ring edges,
            // half-open vertex rule so shared vertices count once
            let mut crossings: Vec<f64> = Vec::new();
            for e in 0..n {
                let p1 = &pts[e];
                let p2 = &pts[(e + 1) % n];
                if (p1.y <= yc) != (p2.y <= yc) {
                    let x = p1.x + (yc - p1.y) * (p2.x - p1.x) / (p2.y - p1.y);
                    crossings.push(x);
                }
            }
            crossings.sort_by(|a, b| a.partial_cmp(b).unwrap());

            for pair in crossings.chunks(2) {
                if pair.len() < 2 {
                    break;
                }
                let (xa, xb) = (pair[0], pair[1]);
                // voxel centers inside (xa, xb)
                let mut i = ((xa / sx) - 0.5).ceil() as i64 - i0;
                loop {
                    if i < 0 {
                        i = 0;
                    }
                    if i as usize >= nx {
                        break;
                    }
                    let xc = (i0 + i) as f64 * sx + sx / 2.0;
                    if xc >= xb {
                        break;
                    }
                    if xc > xa {
                        mask[i as usize + nx * j] = true;
                    }
                    i += 1;
                }
            }
        }
    }

    mask
}

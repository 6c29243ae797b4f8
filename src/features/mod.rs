use std::collections::BTreeMap;
use std::f64::consts::PI;

use nalgebra::Vector2;

use crate::config::CoreConfig;
use crate::error::GeometryError;
use crate::io::input::StructureRole;
use crate::reconstruct::{BoundaryFace, FaceNormal, Volume};

/// The four in-plane ray directions, in LPS patient coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardinalDirection {
    Anterior,
    Posterior,
    Left,
    Right,
}

impl CardinalDirection {
    pub const ALL: [CardinalDirection; 4] = [
        CardinalDirection::Anterior,
        CardinalDirection::Posterior,
        CardinalDirection::Left,
        CardinalDirection::Right,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CardinalDirection::Anterior => "anterior",
            CardinalDirection::Posterior => "posterior",
            CardinalDirection::Left => "left",
            CardinalDirection::Right => "right",
        }
    }

    /// Unit direction in the axial plane. Anterior is -y, posterior +y,
    /// patient left +x, patient right -x.
    fn vector(&self) -> Vector2<f64> {
        match self {
            CardinalDirection::Anterior => Vector2::new(0.0, -1.0),
            CardinalDirection::Posterior => Vector2::new(0.0, 1.0),
            CardinalDirection::Left => Vector2::new(1.0, 0.0),
            CardinalDirection::Right => Vector2::new(-1.0, 0.0),
        }
    }
}

/// Centroid-to-body-surface distances along the cardinal directions, mm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardinalDistances {
    pub anterior: f64,
    pub posterior: f64,
    pub left: f64,
    pub right: f64,
}

/// Which computation produced the contact surface area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactPath {
    /// Target boundary faces against the OAR within the tolerance band.
    Standard,
    /// SIB target fully enclosed: the enclosing volume's boundary area
    /// coincident with the SIB solid.
    SibEnclosure,
}

/// Spatial relationship of one target against one OAR (or, for an SIB
/// target, against its enclosing target). Write-once; built as an atomic
/// unit by `extract`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePair {
    pub target_name: String,
    pub oar_name: String,
    pub target_volume_mm3: f64,
    pub cardinal_distances: CardinalDistances,
    /// |target ∩ oar| / |target|, in [0,1]. Target-relative: swapping
    /// the arguments changes the denominator.
    pub overlap_fraction: f64,
    pub contact_area_mm2: f64,
    pub contact_path: ContactPath,
    /// Per-axial-slice contact-angle coverage, ascending slice order.
    pub axial_profile: Vec<f64>,
    /// Per-sagittal-column contact-angle coverage, ascending column
    /// order.
    pub sagittal_profile: Vec<f64>,
    /// Reduced parameter vectors, attached after the reduction step.
    /// NaN components mean the profile had too few samples.
    pub axial_params: Vec<f64>,
    pub sagittal_params: Vec<f64>,
}

impl FeaturePair {
    pub fn attach_reduced(&mut self, axial: Vec<f64>, sagittal: Vec<f64>) {
        self.axial_params = axial;
        self.sagittal_params = sagittal;
    }
}

/// Computes the full spatial feature set for one (target, oar) volume
/// pair against the patient body surface.
///
/// The SIB branch is selected here, by role and enclosure, not by the
/// caller: when the target is an SIB target and is (within tolerance)
/// fully inside the paired volume, the contact area switches to the
/// enclosing volume's boundary coincident with the SIB solid.
pub fn extract(
    target: &Volume,
    target_role: StructureRole,
    oar: &Volume,
    body: &Volume,
    config: &CoreConfig,
) -> Result<FeaturePair, GeometryError> {
    if target.is_empty() {
        return Err(GeometryError::EmptyVolume {
            name: target.name.clone(),
        });
    }
    if oar.is_empty() {
        return Err(GeometryError::EmptyVolume {
            name: oar.name.clone(),
        });
    }

    let centroid = target.centroid();
    let cardinal_distances = cardinal_distances(centroid, body)?;

    let overlap_fraction = overlap(target, oar);

    let enclosed = overlap_fraction >= config.enclosure_tolerance;
    let (contact_faces, contact_path) = if target_role == StructureRole::SibTarget && enclosed {
        (
            coincident_boundary(oar, target, config.contact_tolerance_mm),
            ContactPath::SibEnclosure,
        )
    } else {
        (
            contact_boundary(target, oar, config.contact_tolerance_mm),
            ContactPath::Standard,
        )
    };
    let contact_area_mm2 = contact_faces.iter().map(|f| f.area).sum();

    // angle profiles are measured around the centroid of whichever
    // volume owns the contact faces
    let profile_center = match contact_path {
        ContactPath::Standard => centroid,
        ContactPath::SibEnclosure => oar.centroid(),
    };
    let axial_profile = axial_contact_profile(&contact_faces, profile_center, target.spacing.2);
    let sagittal_profile =
        sagittal_contact_profile(&contact_faces, profile_center, target.spacing.0);

    Ok(FeaturePair {
        target_name: target.name.clone(),
        oar_name: oar.name.clone(),
        target_volume_mm3: target.volume_mm3(),
        cardinal_distances,
        overlap_fraction,
        contact_area_mm2,
        contact_path,
        axial_profile,
        sagittal_profile,
        axial_params: Vec::new(),
        sagittal_params: Vec::new(),
    })
}

/// Target-relative volumetric overlap in [0,1].
pub fn overlap(target: &Volume, oar: &Volume) -> f64 {
    let target_voxels = target.voxel_count();
    if target_voxels == 0 {
        return 0.0;
    }
    target.intersection_count(oar) as f64 / target_voxels as f64
}

/// Distance from `origin` to the body boundary along each cardinal
/// direction, within the axial plane of the origin.
pub fn cardinal_distances(
    origin: (f64, f64, f64),
    body: &Volume,
) -> Result<CardinalDistances, GeometryError> {
    let (cx, cy, cz) = origin;
    if !body.contains_point(cx, cy, cz) {
        return Err(GeometryError::CentroidOutsideBody {
            x: cx,
            y: cy,
            z: cz,
        });
    }

    let mut out = [0.0f64; 4];
    for (slot, dir) in CardinalDirection::ALL.iter().enumerate() {
        out[slot] = ray_to_surface(origin, *dir, body)?;
    }
    Ok(CardinalDistances {
        anterior: out[0],
        posterior: out[1],
        left: out[2],
        right: out[3],
    })
}

/// Marches from `origin` along `dir` until the body ends, then refines
/// the crossing by bisection. The crossing must fall inside the body's
/// stored block; an exit at the block edge means the surface was never
/// crossed.
fn ray_to_surface(
    origin: (f64, f64, f64),
    dir: CardinalDirection,
    body: &Volume,
) -> Result<f64, GeometryError> {
    let v = dir.vector();
    let (cx, cy, cz) = origin;
    let step = body.spacing.0.min(body.spacing.1) / 4.0;

    // block extent in world coordinates
    let lo = (
        body.offset.0 as f64 * body.spacing.0,
        body.offset.1 as f64 * body.spacing.1,
    );
    let hi = (
        (body.offset.0 + body.dims.0 as i64) as f64 * body.spacing.0,
        (body.offset.1 + body.dims.1 as i64) as f64 * body.spacing.1,
    );

    let max_extent = (hi.0 - lo.0) + (hi.1 - lo.1);
    let mut t_in = 0.0;
    let mut t = step;
    loop {
        let x = cx + v.x * t;
        let y = cy + v.y * t;
        if !body.contains_point(x, y, cz) {
            // exit exactly at the block edge means the solid ran out of
            // grid, not that we crossed its surface
            if x <= lo.0 || x >= hi.0 || y <= lo.1 || y >= hi.1 {
                return Err(GeometryError::RayOutOfBounds {
                    direction: dir.as_str(),
                });
            }
            break;
        }
        t_in = t;
        t += step;
        if t > max_extent {
            return Err(GeometryError::RayOutOfBounds {
                direction: dir.as_str(),
            });
        }
    }

    // bisection between the last inside and first outside sample
    let mut t_out = t_in + step;
    for _ in 0..20 {
        let mid = (t_in + t_out) / 2.0;
        if body.contains_point(cx + v.x * mid, cy + v.y * mid, cz) {
            t_in = mid;
        } else {
            t_out = mid;
        }
    }
    Ok((t_in + t_out) / 2.0)
}

/// Boundary faces of `solid` whose immediate outside lies within
/// `tol_mm` of the `other` solid: the standard contact surface.
fn contact_boundary(solid: &Volume, other: &Volume, tol_mm: f64) -> Vec<BoundaryFace> {
    solid
        .boundary_faces()
        .into_iter()
        .filter(|face| {
            let (gi, gj, gk) = face.outside;
            other.get_global(gi, gj, gk) || other.occupied_near(gi, gj, gk, tol_mm)
        })
        .collect()
}

/// Boundary faces of `enclosing` whose inside voxel lies within
/// `tol_mm` of the `inner` solid: the SIB-enclosure contact surface.
fn coincident_boundary(enclosing: &Volume, inner: &Volume, tol_mm: f64) -> Vec<BoundaryFace> {
    enclosing
        .boundary_faces()
        .into_iter()
        .filter(|face| {
            let (gi, gj, gk) = inside_voxel(face);
            inner.get_global(gi, gj, gk) || inner.occupied_near(gi, gj, gk, tol_mm)
        })
        .collect()
}

fn inside_voxel(face: &BoundaryFace) -> (i64, i64, i64) {
    let (gi, gj, gk) = face.outside;
    match face.normal {
        FaceNormal::XNeg => (gi + 1, gj, gk),
        FaceNormal::XPos => (gi - 1, gj, gk),
        FaceNormal::YNeg => (gi, gj + 1, gk),
        FaceNormal::YPos => (gi, gj - 1, gk),
        FaceNormal::ZNeg => (gi, gj, gk + 1),
        FaceNormal::ZPos => (gi, gj, gk - 1),
    }
}

/// Angular coverage of a set of directions: 2π minus the largest
/// circular gap between consecutive angles. Zero for fewer than two
/// samples.
fn circular_coverage(mut angles: Vec<f64>) -> f64 {
    if angles.len() < 2 {
        return 0.0;
    }
    for a in angles.iter_mut() {
        *a = a.rem_euclid(2.0 * PI);
    }
    angles.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let mut max_gap = 2.0 * PI - (angles.last().unwrap() - angles.first().unwrap());
    for w in angles.windows(2) {
        max_gap = max_gap.max(w[1] - w[0]);
    }
    2.0 * PI - max_gap
}

/// Per-axial-slice contact angle: angular coverage of the contact face
/// centers around the profile center, one sample per slice with any
/// contact, ordered bottom to top.
fn axial_contact_profile(
    faces: &[BoundaryFace],
    center: (f64, f64, f64),
    sz: f64,
) -> Vec<f64> {
    let mut by_layer: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for face in faces {
        let layer = (face.center.2 / sz).floor() as i64;
        let angle = (face.center.1 - center.1).atan2(face.center.0 - center.0);
        by_layer.entry(layer).or_default().push(angle);
    }
    by_layer.into_values().map(circular_coverage).collect()
}

/// Per-sagittal-column contact angle in the y-z plane, ordered right to
/// left.
fn sagittal_contact_profile(
    faces: &[BoundaryFace],
    center: (f64, f64, f64),
    sx: f64,
) -> Vec<f64> {
    let mut by_column: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for face in faces {
        let column = (face.center.0 / sx).floor() as i64;
        let angle = (face.center.2 - center.2).atan2(face.center.1 - center.1);
        by_column.entry(column).or_default().push(angle);
    }
    by_column.into_values().map(circular_coverage).collect()
}

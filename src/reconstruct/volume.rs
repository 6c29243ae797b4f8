/// Axis and direction of a boundary face normal, pointing out of the
/// solid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceNormal {
    XNeg,
    XPos,
    YNeg,
    YPos,
    ZNeg,
    ZPos,
}

/// One exposed voxel face on the boundary of a volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryFace {
    /// World coordinates of the face center, mm.
    pub center: (f64, f64, f64),
    pub normal: FaceNormal,
    /// Face area in mm^2.
    pub area: f64,
    /// Global lattice index of the voxel just outside the face.
    pub outside: (i64, i64, i64),
}

/// A voxelized solid on a world-aligned lattice. Voxel (I, J, K) in
/// global lattice coordinates covers [I*sx, (I+1)*sx) x [J*sy, (J+1)*sy)
/// x [K*sz, (K+1)*sz); because every Volume of a run shares the same
/// spacing, any two of them are voxelwise comparable through global
/// indices. Built once by the reconstructor, never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub name: String,
    /// (sx, sy, sz) in mm.
    pub spacing: (f64, f64, f64),
    /// Global lattice index of local voxel (0, 0, 0).
    pub offset: (i64, i64, i64),
    /// (nx, ny, nz).
    pub dims: (usize, usize, usize),
    /// Row-major occupancy, x fastest.
    pub data: Vec<bool>,
}

impl Volume {
    pub(crate) fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.dims.0 * (j + self.dims.1 * k)
    }

    /// Occupancy at a local index.
    pub fn get_local(&self, i: usize, j: usize, k: usize) -> bool {
        self.data[self.idx(i, j, k)]
    }

    /// Occupancy at a global lattice index; anything outside the stored
    /// block is empty.
    pub fn get_global(&self, gi: i64, gj: i64, gk: i64) -> bool {
        let i = gi - self.offset.0;
        let j = gj - self.offset.1;
        let k = gk - self.offset.2;
        if i < 0
            || j < 0
            || k < 0
            || i as usize >= self.dims.0
            || j as usize >= self.dims.1
            || k as usize >= self.dims.2
        {
            return false;
        }
        self.get_local(i as usize, j as usize, k as usize)
    }

    /// Global lattice index of the voxel containing a world point.
    pub fn lattice_index(&self, x: f64, y: f64, z: f64) -> (i64, i64, i64) {
        (
            (x / self.spacing.0).floor() as i64,
            (y / self.spacing.1).floor() as i64,
            (z / self.spacing.2).floor() as i64,
        )
    }

    /// Point-in-volume test in world coordinates.
    pub fn contains_point(&self, x: f64, y: f64, z: f64) -> bool {
        let (gi, gj, gk) = self.lattice_index(x, y, z);
        self.get_global(gi, gj, gk)
    }

    /// World-space center of a global lattice voxel.
    pub fn voxel_center(&self, gi: i64, gj: i64, gk: i64) -> (f64, f64, f64) {
        (
            (gi as f64 + 0.5) * self.spacing.0,
            (gj as f64 + 0.5) * self.spacing.1,
            (gk as f64 + 0.5) * self.spacing.2,
        )
    }

    pub fn voxel_count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    pub fn voxel_volume_mm3(&self) -> f64 {
        self.spacing.0 * self.spacing.1 * self.spacing.2
    }

    /// Enclosed volume in mm^3.
    pub fn volume_mm3(&self) -> f64 {
        self.voxel_count() as f64 * self.voxel_volume_mm3()
    }

    pub fn volume_cc(&self) -> f64 {
        self.volume_mm3() / 1000.0
    }

    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|&v| v)
    }

    /// Centroid of the solid in world mm.
    pub fn centroid(&self) -> (f64, f64, f64) {
        let mut sum = (0.0, 0.0, 0.0);
        let mut count = 0usize;
        for k in 0..self.dims.2 {
            for j in 0..self.dims.1 {
                for i in 0..self.dims.0 {
                    if self.get_local(i, j, k) {
                        let c = self.voxel_center(
                            self.offset.0 + i as i64,
                            self.offset.1 + j as i64,
                            self.offset.2 + k as i64,
                        );
                        sum.0 += c.0;
                        sum.1 += c.1;
                        sum.2 += c.2;
                        count += 1;
                    }
                }
            }
        }
        let n = count.max(1) as f64;
        (sum.0 / n, sum.1 / n, sum.2 / n)
    }

    /// World-space bounding box (min, max) of the occupied voxels.
    pub fn bounding_box(&self) -> ((f64, f64, f64), (f64, f64, f64)) {
        let mut min = (f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for k in 0..self.dims.2 {
            for j in 0..self.dims.1 {
                for i in 0..self.dims.0 {
                    if self.get_local(i, j, k) {
                        let gi = self.offset.0 + i as i64;
                        let gj = self.offset.1 + j as i64;
                        let gk = self.offset.2 + k as i64;
                        min.0 = min.0.min(gi as f64 * self.spacing.0);
                        min.1 = min.1.min(gj as f64 * self.spacing.1);
                        min.2 = min.2.min(gk as f64 * self.spacing.2);
                        max.0 = max.0.max((gi + 1) as f64 * self.spacing.0);
                        max.1 = max.1.max((gj + 1) as f64 * self.spacing.1);
                        max.2 = max.2.max((gk + 1) as f64 * self.spacing.2);
                    }
                }
            }
        }
        (min, max)
    }

    /// All exposed voxel faces with their outward normals.
    pub fn boundary_faces(&self) -> Vec<BoundaryFace> {
        let (sx, sy, sz) = self.spacing;
        let face_areas = [sy * sz, sy * sz, sx * sz, sx * sz, sx * sy, sx * sy];
        let normals = [
            FaceNormal::XNeg,
            FaceNormal::XPos,
            FaceNormal::YNeg,
            FaceNormal::YPos,
            FaceNormal::ZNeg,
            FaceNormal::ZPos,
        ];
        let steps: [(i64, i64, i64); 6] = [
            (-1, 0, 0),
            (1, 0, 0),
            (0, -1, 0),
            (0, 1, 0),
            (0, 0, -1),
            (0, 0, 1),
        ];

        let mut faces = Vec::new();
        for k in 0..self.dims.2 {
            for j in 0..self.dims.1 {
                for i in 0..self.dims.0 {
                    if !self.get_local(i, j, k) {
                        continue;
                    }
                    let gi = self.offset.0 + i as i64;
                    let gj = self.offset.1 + j as i64;
                    let gk = self.offset.2 + k as i64;
                    let center = self.voxel_center(gi, gj, gk);
                    for f in 0..6 {
                        let (di, dj, dk) = steps[f];
                        if self.get_global(gi + di, gj + dj, gk + dk) {
                            continue;
                        }
                        faces.push(BoundaryFace {
                            center: (
                                center.0 + di as f64 * sx / 2.0,
                                center.1 + dj as f64 * sy / 2.0,
                                center.2 + dk as f64 * sz / 2.0,
                            ),
                            normal: normals[f],
                            area: face_areas[f],
                            outside: (gi + di, gj + dj, gk + dk),
                        });
                    }
                }
            }
        }
        faces
    }

    /// Total exposed-face area in mm^2.
    pub fn surface_area_mm2(&self) -> f64 {
        self.boundary_faces().iter().map(|f| f.area).sum()
    }

    /// Number of voxels shared with another volume on the common global
    /// lattice. Both volumes must come from the same run configuration.
    pub fn intersection_count(&self, other: &Volume) -> usize {
        debug_assert_eq!(self.spacing, other.spacing);

        // restrict to the overlap of both index blocks
        let lo = (
            self.offset.0.max(other.offset.0),
            self.offset.1.max(other.offset.1),
            self.offset.2.max(other.offset.2),
        );
        let hi = (
            (self.offset.0 + self.dims.0 as i64).min(other.offset.0 + other.dims.0 as i64),
            (self.offset.1 + self.dims.1 as i64).min(other.offset.1 + other.dims.1 as i64),
            (self.offset.2 + self.dims.2 as i64).min(other.offset.2 + other.dims.2 as i64),
        );

        let mut count = 0usize;
        for gk in lo.2..hi.2 {
            for gj in lo.1..hi.1 {
                for gi in lo.0..hi.0 {
                    if self.get_global(gi, gj, gk) && other.get_global(gi, gj, gk) {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    /// True when any occupied voxel of `self` lies within `tol_mm` of
    /// the center of the given global lattice voxel.
    pub fn occupied_near(&self, gi: i64, gj: i64, gk: i64, tol_mm: f64) -> bool {
        let ri = (tol_mm / self.spacing.0).ceil() as i64;
        let rj = (tol_mm / self.spacing.1).ceil() as i64;
        let rk = (tol_mm / self.spacing.2).ceil() as i64;
        let center = self.voxel_center(gi, gj, gk);
        for dk in -rk..=rk {
            for dj in -rj..=rj {
                for di in -ri..=ri {
                    if !self.get_global(gi + di, gj + dj, gk + dk) {
                        continue;
                    }
                    let c = self.voxel_center(gi + di, gj + dj, gk + dk);
                    let d2 = (c.0 - center.0).powi(2)
                        + (c.1 - center.1).powi(2)
                        + (c.2 - center.2).powi(2);
                    if d2 <= tol_mm * tol_mm {
                        return true;
                    }
                }
            }
        }
        false
    }
}

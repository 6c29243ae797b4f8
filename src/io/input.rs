use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Utility: detect whether the file uses comma or tab as delimiter.
fn detect_delimiter<P: AsRef<Path>>(path: P) -> Result<u8> {
    let file = File::open(&path).with_context(|| {
        format!(
            "failed to open file for delimiter sniffing: {:?}",
            path.as_ref()
        )
    })?;
    let mut reader = BufReader::new(file);
    let mut first_line = String::new();
    reader
        .read_line(&mut first_line)
        .with_context(|| "failed to read first line for delimiter detection")?;

    let tabs = first_line.matches('\t').count();
    let commas = first_line.matches(',').count();

    if tabs > commas {
        Ok(b'\t')
    } else {
        Ok(b',')
    }
}

/// One vertex of a contour ring, in patient (LPS) coordinates:
/// +x left, +y posterior, +z superior, millimetres.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct ContourPoint {
    pub slice_index: u32,
    pub ring_index: u32,

    #[serde(default, skip_deserializing)]
    pub point_index: u32,

    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl ContourPoint {
    /// Reads contour points from a headerless CSV/TSV table with columns
    /// slice_index, ring_index, x, y, z.
    pub fn read_contour_data<P: AsRef<Path> + std::fmt::Debug>(
        path: P,
    ) -> Result<Vec<ContourPoint>> {
        let delim = detect_delimiter(&path)?;
        let file = File::open(path)?;
        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .delimiter(delim)
            .from_reader(file);

        let mut points = Vec::new();
        for result in rdr.records() {
            match result {
                Ok(record) => match record.deserialize(None) {
                    Ok(point) => points.push(point),
                    Err(e) => eprintln!("Skipping invalid record: {:?}", e),
                },
                Err(e) => eprintln!("Skipping invalid row: {:?}", e),
            }
        }

        Ok(points)
    }

    /// Euclidean distance in mm.
    pub fn distance_to(&self, other: &ContourPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// A closed ring on one axial slice. The first and last point are treated
/// as connected even when the last point does not literally repeat the
/// first.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub slice_index: u32,
    pub ring_index: u32,
    pub points: Vec<ContourPoint>,
    pub centroid: (f64, f64, f64),
}

impl Contour {
    pub fn new(slice_index: u32, ring_index: u32, points: Vec<ContourPoint>) -> Self {
        let centroid = Self::compute_centroid(&points);
        Contour {
            slice_index,
            ring_index,
            points,
            centroid,
        }
    }

    pub fn compute_centroid(points: &[ContourPoint]) -> (f64, f64, f64) {
        if points.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let (sum_x, sum_y, sum_z) = points.iter().fold((0.0, 0.0, 0.0), |(sx, sy, sz), p| {
            (sx + p.x, sy + p.y, sz + p.z)
        });
        let n = points.len() as f64;
        (sum_x / n, sum_y / n, sum_z / n)
    }

    /// Slice position of the ring. All points of one contour share it.
    pub fn z(&self) -> f64 {
        self.centroid.2
    }

    /// Shoelace area of the ring in mm^2.
    pub fn area(&self) -> f64 {
        let n = self.points.len();
        let mut area = 0.0;
        for i in 0..n {
            let p1 = &self.points[i];
            let p2 = &self.points[(i + 1) % n];
            area += p1.x * p2.y - p2.x * p1.y;
        }
        0.5 * area.abs()
    }

    /// A ring is degenerate when it cannot enclose anything: fewer than
    /// 3 points, or collinear points with near-zero area.
    pub fn is_degenerate(&self, area_eps: f64) -> bool {
        self.points.len() < 3 || self.area() < area_eps
    }

    pub fn bounding_box(&self) -> ((f64, f64), (f64, f64)) {
        let mut min = (f64::INFINITY, f64::INFINITY);
        let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in &self.points {
            min.0 = min.0.min(p.x);
            min.1 = min.1.min(p.y);
            max.0 = max.0.max(p.x);
            max.1 = max.1.max(p.y);
        }
        (min, max)
    }

    /// Resamples the ring to `n` points at uniform arc length, starting
    /// from the vertex closest to angle 0 around the centroid. Two rings
    /// resampled this way correspond index-to-index, which is what the
    /// inter-slice interpolation relies on.
    pub fn resample_closed(&self, n: usize) -> Contour {
        assert!(n >= 3, "resample target must keep the ring closed");
        let pts = &self.points;
        let len = pts.len();

        let (cx, cy, _) = self.centroid;
        let angle_of = |i: usize| {
            let t = (pts[i].y - cy).atan2(pts[i].x - cx);
            t.rem_euclid(2.0 * PI)
        };
        let start = (0..len)
            .min_by(|&a, &b| angle_of(a).partial_cmp(&angle_of(b)).unwrap())
            .unwrap_or(0);

        // cumulative arc length over the closed ring
        let mut cum = Vec::with_capacity(len + 1);
        cum.push(0.0);
        let mut total = 0.0;
        for i in 0..len {
            let a = &pts[(start + i) % len];
            let b = &pts[(start + i + 1) % len];
            total += a.distance_to(b);
            cum.push(total);
        }

        let mut out = Vec::with_capacity(n);
        for k in 0..n {
            let target = total * (k as f64) / (n as f64);
            let seg = match cum.binary_search_by(|c| c.partial_cmp(&target).unwrap()) {
                Ok(i) => i.min(len - 1),
                Err(i) => i.saturating_sub(1).min(len - 1),
            };
            let a = &pts[(start + seg) % len];
            let b = &pts[(start + seg + 1) % len];
            let seg_len = cum[seg + 1] - cum[seg];
            let t = if seg_len > 0.0 {
                (target - cum[seg]) / seg_len
            } else {
                0.0
            };
            out.push(ContourPoint {
                slice_index: self.slice_index,
                ring_index: self.ring_index,
                point_index: k as u32,
                x: a.x + (b.x - a.x) * t,
                y: a.y + (b.y - a.y) * t,
                z: a.z,
            });
        }

        Contour::new(self.slice_index, self.ring_index, out)
    }
}

/// Clinical role of a structure in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureRole {
    Target,
    SibTarget,
    Oar,
    /// The patient outline. Exactly one per structure set; cardinal
    /// distances are measured against it.
    Body,
}

impl StructureRole {
    pub fn is_target(&self) -> bool {
        matches!(self, StructureRole::Target | StructureRole::SibTarget)
    }
}

/// A named anatomical region with its per-slice contour rings. Owned by
/// the upstream structure-set import; the core only reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub name: String,
    pub role: StructureRole,
    /// Sorted by slice z, then ring index. Disjoint rings on one slice
    /// (two lobes) appear as separate contours with the same slice_index.
    pub contours: Vec<Contour>,
}

impl Structure {
    /// Groups a flat point table into rings and builds the structure.
    pub fn from_points(name: &str, role: StructureRole, points: Vec<ContourPoint>) -> Self {
        let mut groups: BTreeMap<(u32, u32), Vec<ContourPoint>> = BTreeMap::new();
        for p in points {
            groups
                .entry((p.slice_index, p.ring_index))
                .or_default()
                .push(p);
        }

        let mut contours: Vec<Contour> = groups
            .into_iter()
            .map(|((slice, ring), mut pts)| {
                for (i, p) in pts.iter_mut().enumerate() {
                    p.point_index = i as u32;
                }
                Contour::new(slice, ring, pts)
            })
            .collect();

        contours.sort_by(|a, b| {
            a.z()
                .partial_cmp(&b.z())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.ring_index.cmp(&b.ring_index))
        });

        Structure {
            name: name.to_string(),
            role,
            contours,
        }
    }

    /// Reads one structure from a contour-point table on disk.
    pub fn from_csv<P: AsRef<Path> + std::fmt::Debug>(
        name: &str,
        role: StructureRole,
        path: P,
    ) -> Result<Self> {
        let points = ContourPoint::read_contour_data(&path)
            .with_context(|| format!("failed to read contour table {:?}", path))?;
        if points.is_empty() {
            bail!("contour table {:?} was empty", path);
        }
        Ok(Self::from_points(name, role, points))
    }

    /// Contours grouped by distinct slice z, ascending.
    pub fn slices(&self) -> Vec<(f64, Vec<&Contour>)> {
        let mut out: Vec<(f64, Vec<&Contour>)> = Vec::new();
        for c in &self.contours {
            match out.last_mut() {
                Some((z, group)) if (c.z() - *z).abs() < 1e-6 => group.push(c),
                _ => out.push((c.z(), vec![c])),
            }
        }
        out
    }
}

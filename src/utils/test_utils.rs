use std::f64::consts::PI;

use crate::io::input::{Contour, ContourPoint, Structure, StructureRole};
use crate::io::templates::{PrescriptionTemplate, RoiSlot};

/// Generates a circular contour ring for testing.
pub fn generate_circle_contour(
    radius: f64,
    center: (f64, f64),
    z: f64,
    num_points: usize,
    slice_index: u32,
) -> Contour {
    let mut points = Vec::with_capacity(num_points);
    for i in 0..num_points {
        let theta = 2.0 * PI * (i as f64) / (num_points as f64);
        points.push(ContourPoint {
            slice_index,
            ring_index: 0,
            point_index: i as u32,
            x: center.0 + radius * theta.cos(),
            y: center.1 + radius * theta.sin(),
            z,
        });
    }
    Contour::new(slice_index, 0, points)
}

/// Builds a sphere as a stack of circular slices, the way an RT
/// structure set delivers one.
pub fn generate_sphere_structure(
    name: &str,
    role: StructureRole,
    center: (f64, f64, f64),
    radius: f64,
    slice_spacing: f64,
    points_per_ring: usize,
) -> Structure {
    let mut contours = Vec::new();
    let mut slice_index = 0u32;
    // walk slice planes from pole to pole, keeping rings that are wide
    // enough not to be degenerate
    let n_steps = (2.0 * radius / slice_spacing).floor() as i64;
    for k in 0..=n_steps {
        let z = center.2 - radius + k as f64 * slice_spacing;
        let dz = z - center.2;
        let r2 = radius * radius - dz * dz;
        if r2 <= 0.25 {
            continue;
        }
        let r = r2.sqrt();
        contours.push(generate_circle_contour(
            r,
            (center.0, center.1),
            z,
            points_per_ring,
            slice_index,
        ));
        slice_index += 1;
    }
    Structure {
        name: name.to_string(),
        role,
        contours,
    }
}

/// Builds an axis-aligned box as a stack of rectangular slices.
pub fn generate_box_structure(
    name: &str,
    role: StructureRole,
    center: (f64, f64, f64),
    size: (f64, f64, f64),
    slice_spacing: f64,
) -> Structure {
    let (hx, hy, hz) = (size.0 / 2.0, size.1 / 2.0, size.2 / 2.0);
    let mut contours = Vec::new();
    let n_steps = (size.2 / slice_spacing).round() as i64;
    for k in 0..=n_steps {
        let z = center.2 - hz + k as f64 * slice_spacing;
        let corners = [
            (center.0 - hx, center.1 - hy),
            (center.0 + hx, center.1 - hy),
            (center.0 + hx, center.1 + hy),
            (center.0 - hx, center.1 + hy),
        ];
        let points = corners
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| ContourPoint {
                slice_index: k as u32,
                ring_index: 0,
                point_index: i as u32,
                x,
                y,
                z,
            })
            .collect();
        contours.push(Contour::new(k as u32, 0, points));
    }
    Structure {
        name: name.to_string(),
        role,
        contours,
    }
}

/// A cylinder standing in for the patient outline in feature tests.
pub fn generate_body_structure(
    center: (f64, f64, f64),
    radius: f64,
    height: f64,
    slice_spacing: f64,
) -> Structure {
    let mut contours = Vec::new();
    let n_steps = (height / slice_spacing).round() as i64;
    for k in 0..=n_steps {
        let z = center.2 - height / 2.0 + k as f64 * slice_spacing;
        contours.push(generate_circle_contour(
            radius,
            (center.0, center.1),
            z,
            64,
            k as u32,
        ));
    }
    Structure {
        name: "BODY".to_string(),
        role: StructureRole::Body,
        contours,
    }
}

fn slot(name: &str, role: StructureRole, constraint: &str) -> RoiSlot {
    RoiSlot {
        canonical_name: name.to_string(),
        role,
        constraint: constraint.to_string(),
        volume_range_cc: None,
        aliases: Vec::new(),
    }
}

/// Small prostate template used across matcher tests.
pub fn prostate_template() -> PrescriptionTemplate {
    PrescriptionTemplate {
        name: "Prostate 60/20".to_string(),
        version: 1,
        slots: vec![
            slot("PTV", StructureRole::Target, "D95 >= 60Gy"),
            slot("Rectum", StructureRole::Oar, "V60 <= 3%"),
            slot("Bladder", StructureRole::Oar, "V60 <= 5%"),
        ],
    }
}

/// Head-and-neck template with an SIB boost slot.
pub fn head_neck_template() -> PrescriptionTemplate {
    PrescriptionTemplate {
        name: "Head and Neck 70/54".to_string(),
        version: 1,
        slots: vec![
            slot("PTV_high", StructureRole::SibTarget, "D95 >= 70Gy"),
            slot("PTV_low", StructureRole::Target, "D95 >= 54Gy"),
            slot("Parotid_L", StructureRole::Oar, "Dmean <= 26Gy"),
            slot("Parotid_R", StructureRole::Oar, "Dmean <= 26Gy"),
            slot("SpinalCord", StructureRole::Oar, "Dmax <= 45Gy"),
        ],
    }
}

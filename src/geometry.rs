// src/geometry.rs
//
// Joint angle at a vertex from three 2D points, via the dot product:
// cos(θ) = (ba · bc) / (|ba| × |bc|)

/// Angle in degrees at `b` between the rays `b→a` and `b→c`.
///
/// Degenerate input (zero-length vector, NaN/Inf coordinate) yields 0.0
/// rather than failing; downstream phase logic treats 0.0 as "below".
pub fn joint_angle(a: [f32; 2], b: [f32; 2], c: [f32; 2]) -> f32 {
    let finite = [a, b, c]
        .iter()
        .all(|p| p[0].is_finite() && p[1].is_finite());
    if !finite {
        return 0.0;
    }

    let ba = (a[0] - b[0], a[1] - b[1]);
    let bc = (c[0] - b[0], c[1] - b[1]);

    let norm_ba = (ba.0 * ba.0 + ba.1 * ba.1).sqrt();
    let norm_bc = (bc.0 * bc.0 + bc.1 * bc.1).sqrt();
    if norm_ba == 0.0 || norm_bc == 0.0 {
        return 0.0;
    }

    let dot = ba.0 * bc.0 + ba.1 * bc.1;
    let cos_angle = (dot / (norm_ba * norm_bc)).clamp(-1.0, 1.0);
    cos_angle.acos().to_degrees()
}

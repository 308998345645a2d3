use crate::types::{from_xyzw, Vec3};

/// Eyes relative to the neck pivot, meters (up, forward is -Z).
const NECK_OFFSET: [f64; 3] = [0.0, 0.075, -0.08];

/// Approximate head position from orientation alone by pivoting the eyes
/// around a point at the base of the neck. `factor` is clamped to `[0, 1]`;
/// the identity orientation maps to the origin.
pub fn apply_neck_model(orientation: [f32; 4], factor: f64) -> [f32; 3] {
    let factor = factor.clamp(0.0, 1.0);
    let rotation = from_xyzw(
        orientation[0] as f64,
        orientation[1] as f64,
        orientation[2] as f64,
        orientation[3] as f64,
    );
    let offset = Vec3::from(NECK_OFFSET);
    let position = (rotation * offset - offset) * factor;
    [position.x as f32, position.y as f32, position.z as f32]
}

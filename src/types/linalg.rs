//! Rotation algebra aliases and helpers for the head tracker
//!
//! Every rotation is an `f64` unit quaternion. Host-facing arrays use the
//! `[x, y, z, w]` component order, nalgebra stores `(w, i, j, k)`, so all
//! conversions go through the helpers below.

use nalgebra::{Quaternion, Unit, UnitQuaternion, Vector3, Vector4};

pub type Rotation = UnitQuaternion<f64>;
pub type Vec3 = Vector3<f64>;

/// Raw quaternion components in `[x, y, z, w]` order.
pub type QuatXyzw = Vector4<f64>;

/// Build a rotation from `[x, y, z, w]` components. Normalizes.
pub fn from_xyzw(x: f64, y: f64, z: f64, w: f64) -> Rotation {
    UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z))
}

/// Like [`from_xyzw`] but refuses quaternions too close to zero to normalize.
pub fn try_from_xyzw(q: &QuatXyzw) -> Option<Rotation> {
    UnitQuaternion::try_new(Quaternion::new(q[3], q[0], q[1], q[2]), 1e-12)
}

/// Rotation as `[x, y, z, w]` components.
pub fn to_xyzw(rotation: &Rotation) -> QuatXyzw {
    let q = rotation.quaternion();
    QuatXyzw::new(q.i, q.j, q.k, q.w)
}

pub fn from_axis_angle(axis: Vec3, angle: f64) -> Rotation {
    match Unit::try_new(axis, 1e-12) {
        Some(axis) => UnitQuaternion::from_axis_angle(&axis, angle),
        None => UnitQuaternion::identity(),
    }
}

/// Yaw about +Y, then pitch about +X, then roll about +Z:
/// `R = Ry(yaw) * Rx(pitch) * Rz(roll)`.
pub fn from_yaw_pitch_roll(yaw: f64, pitch: f64, roll: f64) -> Rotation {
    let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw);
    let pitch = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), pitch);
    let roll = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), roll);
    yaw * pitch * roll
}

/// Rotation described by the rotation vector `v` (axis * angle).
pub fn from_rotation_vector(v: &Vec3) -> Rotation {
    UnitQuaternion::from_scaled_axis(*v)
}

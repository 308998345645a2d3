pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Timestamps are nanoseconds on one monotonic clock shared by every caller.
pub type TimestampNs = i64;

pub const NANOS_PER_SEC: f64 = 1e9;

pub fn nanos_to_secs(ns: TimestampNs) -> f64 {
    ns as f64 / NANOS_PER_SEC
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccelerometerData {
    pub timestamp: TimestampNs,
    /// m/s², device sensor frame
    pub data: [f64; 3],
}

impl AccelerometerData {
    pub fn new(timestamp: TimestampNs, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp, data: [x, y, z] }
    }

    pub fn vector(&self) -> Vec3 {
        Vec3::from(self.data)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GyroscopeData {
    pub timestamp: TimestampNs,
    /// rad/s, device sensor frame
    pub data: [f64; 3],
}

impl GyroscopeData {
    pub fn new(timestamp: TimestampNs, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp, data: [x, y, z] }
    }

    pub fn vector(&self) -> Vec3 {
        Vec3::from(self.data)
    }

    /// Same timestamp, zero angular velocity.
    pub fn at_rest(&self) -> Self {
        Self { timestamp: self.timestamp, data: [0.0; 3] }
    }
}

/// One pose sample from an external 6DoF tracker.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SixDofData {
    pub timestamp: TimestampNs,
    pub position: [f32; 3],
    /// `[x, y, z, w]`
    pub orientation: [f32; 4],
}

/// Device rotation-lock state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewportOrientation {
    LandscapeLeft,
    LandscapeRight,
    Portrait,
    PortraitUpsideDown,
}

impl ViewportOrientation {
    pub const ALL: [ViewportOrientation; 4] = [
        ViewportOrientation::LandscapeLeft,
        ViewportOrientation::LandscapeRight,
        ViewportOrientation::Portrait,
        ViewportOrientation::PortraitUpsideDown,
    ];

    /// Host ordinal (0 = landscape left .. 3 = portrait upside down).
    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        match ordinal {
            0 => Some(Self::LandscapeLeft),
            1 => Some(Self::LandscapeRight),
            2 => Some(Self::Portrait),
            3 => Some(Self::PortraitUpsideDown),
            _ => None,
        }
    }
}

/// Head pose handed to the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: [f32; 3],
    /// `[x, y, z, w]`
    pub orientation: [f32; 4],
}

impl Pose {
    pub fn rotation(&self) -> Rotation {
        let o = self.orientation;
        from_xyzw(o[0] as f64, o[1] as f64, o[2] as f64, o[3] as f64)
    }
}

//! Head tracking for stereo rendering: an IMU orientation filter fused with an
//! optional external 6DoF stream, with a neck-model fallback.

pub mod buffers;
pub mod error;
pub mod filters;
pub mod frames;
pub mod head_tracker;
pub mod neck_model;
pub mod recording;
pub mod sensors;
pub mod types;

pub use error::{TrackerError, TrackerResult};
pub use head_tracker::{HeadTracker, PoseEstimate, PoseSource, TrackerConfig};
pub use types::{
    AccelerometerData, GyroscopeData, Pose, SixDofData, TimestampNs, ViewportOrientation,
};

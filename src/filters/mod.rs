pub mod ekf;

pub use ekf::{EkfConfig, PoseState, RotationState, SensorFusion, SensorFusionEkf};

//! Per-frame head pose for stereo rendering
//!
//! Sensor callbacks feed the orientation filter continuously. Each rendered
//! frame asks for a pose: the filter's prediction is taken into display space,
//! remembered in the rotation buffer, and then either aligned with a fresh
//! external 6DoF stream (yaw-only drift correction, extrapolated position) or
//! approximated with the neck model on top of the last known 6DoF position.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::buffers::{PositionData, RotationData, POSITION_SAMPLES, ROTATION_SAMPLES};
use crate::error::{TrackerError, TrackerResult};
use crate::filters::{EkfConfig, RotationState, SensorFusion, SensorFusionEkf};
use crate::frames;
use crate::neck_model::apply_neck_model;
use crate::sensors::{NullSensorProducer, SensorCallback, SensorEventProducer};
use crate::types::{
    to_xyzw, try_from_xyzw, AccelerometerData, GyroscopeData, Pose, QuatXyzw, Rotation,
    TimestampNs, Vec3, ViewportOrientation,
};

// ===== Configuration =====

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub rotation_samples: usize,
    pub position_samples: usize,
    /// Max gap between the filter state and the newest 6DoF sample before the
    /// external stream counts as lost.
    pub max_six_dof_time_difference_ns: i64,
    pub neck_model_factor: f64,
    pub ekf: EkfConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            rotation_samples: ROTATION_SAMPLES,
            position_samples: POSITION_SAMPLES,
            max_six_dof_time_difference_ns: 200_000_000,
            neck_model_factor: 1.0,
            ekf: EkfConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn from_json_file(path: &Path) -> TrackerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        if self.rotation_samples < 2 || self.position_samples < 2 {
            return Err(TrackerError::Config(format!(
                "buffers need at least 2 samples (rotation {}, position {})",
                self.rotation_samples, self.position_samples
            )));
        }
        if self.max_six_dof_time_difference_ns <= 0 {
            return Err(TrackerError::Config(format!(
                "max_six_dof_time_difference_ns must be positive, got {}",
                self.max_six_dof_time_difference_ns
            )));
        }
        if !self.neck_model_factor.is_finite() {
            return Err(TrackerError::Config("neck_model_factor must be finite".into()));
        }
        self.ekf.validate()
    }
}

// ===== Output =====

/// Which branch produced a pose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoseSource {
    /// Inertial rotation aligned to a fresh 6DoF stream, extrapolated 6DoF position.
    SixDof,
    /// Inertial rotation, neck-model position (plus last known 6DoF position).
    NeckModel,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseEstimate {
    pub pose: Pose,
    pub source: PoseSource,
}

fn rotation_to_f32(rotation: &Rotation) -> [f32; 4] {
    let q = to_xyzw(rotation);
    [q[0] as f32, q[1] as f32, q[2] as f32, q[3] as f32]
}

// ===== Shared state =====

struct TrackerState {
    is_tracking: bool,
    sensor_fusion: Box<dyn SensorFusion>,
    latest_gyroscope_data: GyroscopeData,

    rotation_data: RotationData,
    position_data: PositionData,
    /// Yaw-only misalignment between the filter frame and the 6DoF frame.
    difference_to_six_dof: Rotation,

    /// None until the first pose query.
    viewport_orientation: Option<ViewportOrientation>,

    max_six_dof_time_difference_ns: i64,
    neck_model_factor: f64,
}

impl TrackerState {
    fn new(config: &TrackerConfig, sensor_fusion: Box<dyn SensorFusion>) -> Self {
        Self {
            is_tracking: false,
            sensor_fusion,
            latest_gyroscope_data: GyroscopeData::default(),
            rotation_data: RotationData::rotations(config.rotation_samples),
            position_data: PositionData::positions(config.position_samples),
            difference_to_six_dof: Rotation::identity(),
            viewport_orientation: None,
            max_six_dof_time_difference_ns: config.max_six_dof_time_difference_ns,
            neck_model_factor: config.neck_model_factor,
        }
    }

    fn on_accelerometer_data(&mut self, event: &AccelerometerData) {
        if !self.is_tracking {
            return;
        }
        self.sensor_fusion.process_accelerometer_sample(event);
    }

    fn on_gyroscope_data(&mut self, event: &GyroscopeData) {
        if !self.is_tracking {
            return;
        }
        self.latest_gyroscope_data = *event;
        self.sensor_fusion.process_gyroscope_sample(event);
    }

    /// Filter prediction taken from sensor space into display space.
    fn display_rotation(&self, viewport: ViewportOrientation, timestamp: TimestampNs) -> Rotation {
        let predicted = self.sensor_fusion.predict_rotation(timestamp);
        frames::sensor_to_display(viewport) * predicted * frames::ekf_to_head_tracker(viewport)
    }

    fn six_dof_is_fresh(&self, filter_timestamp: TimestampNs) -> bool {
        match self.position_data.latest_timestamp() {
            Some(six_dof_timestamp) => {
                filter_timestamp - six_dof_timestamp < self.max_six_dof_time_difference_ns
            }
            None => false,
        }
    }

    fn get_pose(&mut self, timestamp: TimestampNs, viewport: ViewportOrientation) -> PoseEstimate {
        let latest_rotation_state = self.sensor_fusion.latest_rotation_state();
        let rotation = self.display_rotation(viewport, timestamp);

        if let Some(previous) = self.viewport_orientation {
            if previous != viewport {
                log::debug!("viewport changed {:?} -> {:?}", previous, viewport);
                self.sensor_fusion.rotate_sensor_space_to_start_space_transformation(
                    &frames::viewport_change_compensation(previous, viewport),
                );
            }
        }
        self.viewport_orientation = Some(viewport);

        // Looked up later by add_six_dof_data at the external sample's time.
        self.rotation_data.add_sample(rotation, timestamp);

        if self.six_dof_is_fresh(latest_rotation_state.timestamp) {
            let corrected = rotation * self.difference_to_six_dof.inverse();
            let position = self
                .position_data
                .extrapolated_for_timestamp(timestamp)
                .unwrap_or_else(Vec3::zeros);
            PoseEstimate {
                pose: Pose {
                    position: [position.x as f32, position.y as f32, position.z as f32],
                    orientation: rotation_to_f32(&corrected),
                },
                source: PoseSource::SixDof,
            }
        } else {
            let orientation = rotation_to_f32(&rotation);
            let mut position = apply_neck_model(orientation, self.neck_model_factor);
            // Keep the last absolute position rather than snapping to the origin.
            if let Some(last_known) = self.position_data.latest_data() {
                position[0] += last_known.x as f32;
                position[1] += last_known.y as f32;
                position[2] += last_known.z as f32;
            }
            PoseEstimate {
                pose: Pose { position, orientation },
                source: PoseSource::NeckModel,
            }
        }
    }

    fn add_six_dof_data(&mut self, timestamp: TimestampNs, position: [f32; 3], orientation: [f32; 4]) {
        self.position_data.add_sample(
            Vec3::new(position[0] as f64, position[1] as f64, position[2] as f64),
            timestamp,
        );

        if !(self.position_data.is_valid() && self.rotation_data.is_valid()) {
            return;
        }

        let inertial = match self.rotation_data.interpolated_for_timestamp(timestamp) {
            Some(rotation) => rotation,
            None => return,
        };
        // Only the yaw-carrying components of the external orientation.
        let yaw_components = QuatXyzw::new(0.0, orientation[1] as f64, 0.0, orientation[3] as f64);
        let external_yaw = match try_from_xyzw(&yaw_components) {
            Some(rotation) => rotation,
            None => {
                log::warn!("6DoF orientation at {} ns carries no yaw component", timestamp);
                return;
            }
        };

        let difference = inertial * external_yaw.inverse();
        let mut q = to_xyzw(&difference);
        q[0] = 0.0;
        q[2] = 0.0;
        match try_from_xyzw(&q) {
            Some(yaw_only) => {
                self.difference_to_six_dof = yaw_only;
                log::debug!(
                    "drift correction {:.2} deg at {} ns",
                    yaw_only.angle().to_degrees(),
                    timestamp
                );
            }
            None => log::warn!("degenerate drift correction at {} ns, keeping previous", timestamp),
        }
    }
}

fn lock_state(state: &Mutex<TrackerState>) -> MutexGuard<'_, TrackerState> {
    state.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        log::error!("head tracker state lock poisoned, recovering");
        poisoned.into_inner()
    })
}

// ===== Orchestrator =====

/// Owns the filter, both sensor producers and the 6DoF fusion state.
///
/// Sensor callbacks run on producer threads and the pose query runs on the
/// render thread; all shared state sits behind one mutex.
pub struct HeadTracker {
    state: Arc<Mutex<TrackerState>>,
    accel_sensor: Box<dyn SensorEventProducer<AccelerometerData>>,
    gyro_sensor: Box<dyn SensorEventProducer<GyroscopeData>>,
}

impl HeadTracker {
    pub fn new(
        config: &TrackerConfig,
        sensor_fusion: Box<dyn SensorFusion>,
        accel_sensor: Box<dyn SensorEventProducer<AccelerometerData>>,
        gyro_sensor: Box<dyn SensorEventProducer<GyroscopeData>>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::new(config, sensor_fusion))),
            accel_sensor,
            gyro_sensor,
        }
    }

    /// EKF filter and producers that never deliver; the host drives the
    /// `on_*_data` callbacks itself.
    pub fn with_config(config: &TrackerConfig) -> Self {
        Self::new(
            config,
            Box::new(SensorFusionEkf::new(config.ekf.clone())),
            Box::new(NullSensorProducer::default()),
            Box::new(NullSensorProducer::default()),
        )
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        lock_state(&self.state)
    }

    pub fn resume(&mut self) {
        self.lock().is_tracking = true;
        self.register_callbacks();
        log::info!("head tracking resumed");
    }

    pub fn pause(&mut self) {
        if !self.lock().is_tracking {
            return;
        }

        // Producers first: their threads may be waiting on the state lock.
        self.unregister_callbacks();

        let mut state = self.lock();
        // Zero angular velocity stops the prediction instead of letting it run stale.
        let event = state.latest_gyroscope_data.at_rest();
        state.on_gyroscope_data(&event);
        state.is_tracking = false;
        log::info!("head tracking paused");
    }

    /// Re-zero the filter. Buffers and drift correction are kept.
    pub fn recenter(&self) {
        self.lock().sensor_fusion.reset();
        log::info!("head tracker recentered");
    }

    pub fn get_pose(&self, timestamp: TimestampNs, viewport: ViewportOrientation) -> Pose {
        self.get_pose_estimate(timestamp, viewport).pose
    }

    pub fn get_pose_estimate(
        &self,
        timestamp: TimestampNs,
        viewport: ViewportOrientation,
    ) -> PoseEstimate {
        self.lock().get_pose(timestamp, viewport)
    }

    pub fn add_six_dof_data(&self, timestamp: TimestampNs, position: [f32; 3], orientation: [f32; 4]) {
        self.lock().add_six_dof_data(timestamp, position, orientation);
    }

    pub fn on_accelerometer_data(&self, event: &AccelerometerData) {
        self.lock().on_accelerometer_data(event);
    }

    pub fn on_gyroscope_data(&self, event: &GyroscopeData) {
        self.lock().on_gyroscope_data(event);
    }

    pub fn is_tracking(&self) -> bool {
        self.lock().is_tracking
    }

    pub fn drift_correction(&self) -> Rotation {
        self.lock().difference_to_six_dof
    }

    pub fn latest_rotation_state(&self) -> RotationState {
        self.lock().sensor_fusion.latest_rotation_state()
    }

    fn register_callbacks(&mut self) {
        let weak = Arc::downgrade(&self.state);
        let on_accel: SensorCallback<AccelerometerData> = Arc::new(move |event: &AccelerometerData| {
            if let Some(state) = weak.upgrade() {
                lock_state(&state).on_accelerometer_data(event);
            }
        });
        if let Err(e) = self.accel_sensor.start_sensor_polling(on_accel) {
            log::error!("failed to start accelerometer: {}", e);
        }

        let weak = Arc::downgrade(&self.state);
        let on_gyro: SensorCallback<GyroscopeData> = Arc::new(move |event: &GyroscopeData| {
            if let Some(state) = weak.upgrade() {
                lock_state(&state).on_gyroscope_data(event);
            }
        });
        if let Err(e) = self.gyro_sensor.start_sensor_polling(on_gyro) {
            log::error!("failed to start gyroscope: {}", e);
        }
    }

    fn unregister_callbacks(&mut self) {
        self.accel_sensor.stop_sensor_polling();
        self.gyro_sensor.stop_sensor_polling();
    }
}

impl Default for HeadTracker {
    fn default() -> Self {
        Self::with_config(&TrackerConfig::default())
    }
}

impl Drop for HeadTracker {
    fn drop(&mut self) {
        self.unregister_callbacks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::PoseState;
    use crate::sensors::ChannelSensorProducer;
    use crate::types::{from_xyzw, from_yaw_pitch_roll};
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;
    use std::time::{Duration, Instant};
    use ViewportOrientation::*;

    const MS: i64 = 1_000_000;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[derive(Default)]
    struct ScriptLog {
        resets: usize,
        start_space_rotations: Vec<Rotation>,
        gyro_samples: usize,
        accel_samples: usize,
    }

    /// Filter stand-in with a fixed rotation; gyro samples only move its clock.
    struct ScriptedFusion {
        rotation: Rotation,
        timestamp: TimestampNs,
        log: Arc<Mutex<ScriptLog>>,
    }

    impl ScriptedFusion {
        fn new(rotation: Rotation) -> (Self, Arc<Mutex<ScriptLog>>) {
            let log = Arc::new(Mutex::new(ScriptLog::default()));
            let fusion = Self { rotation, timestamp: 0, log: Arc::clone(&log) };
            (fusion, log)
        }
    }

    impl SensorFusion for ScriptedFusion {
        fn process_accelerometer_sample(&mut self, _sample: &AccelerometerData) {
            self.log.lock().unwrap().accel_samples += 1;
        }

        fn process_gyroscope_sample(&mut self, sample: &GyroscopeData) {
            self.timestamp = sample.timestamp;
            self.log.lock().unwrap().gyro_samples += 1;
        }

        fn predict_rotation(&self, _timestamp: TimestampNs) -> Rotation {
            self.rotation
        }

        fn latest_rotation_state(&self) -> RotationState {
            RotationState {
                sensor_from_start_rotation: self.rotation,
                sensor_from_start_rotation_velocity: Vec3::zeros(),
                timestamp: self.timestamp,
            }
        }

        fn latest_pose_state(&self) -> PoseState {
            PoseState { position: Vec3::zeros(), rotation: self.rotation, timestamp: self.timestamp }
        }

        fn reset(&mut self) {
            self.log.lock().unwrap().resets += 1;
        }

        fn rotate_sensor_space_to_start_space_transformation(&mut self, rotation: &Rotation) {
            self.log.lock().unwrap().start_space_rotations.push(*rotation);
        }
    }

    fn scripted_tracker(rotation: Rotation) -> (HeadTracker, Arc<Mutex<ScriptLog>>) {
        let (fusion, log) = ScriptedFusion::new(rotation);
        let tracker = HeadTracker::new(
            &TrackerConfig::default(),
            Box::new(fusion),
            Box::new(NullSensorProducer::default()),
            Box::new(NullSensorProducer::default()),
        );
        (tracker, log)
    }

    fn tick(tracker: &HeadTracker, timestamp: TimestampNs) {
        tracker.on_gyroscope_data(&GyroscopeData::new(timestamp, 0.0, 0.0, 0.0));
    }

    /// (yaw, pitch, roll) of the world-from-head rotation, YXZ order.
    fn world_yaw_pitch_roll(orientation: [f32; 4]) -> (f64, f64, f64) {
        let head_from_world = from_xyzw(
            orientation[0] as f64,
            orientation[1] as f64,
            orientation[2] as f64,
            orientation[3] as f64,
        );
        let m = head_from_world.inverse().to_rotation_matrix();
        let m = m.matrix();
        let pitch = (-m[(1, 2)]).clamp(-1.0, 1.0).asin();
        let yaw = m[(0, 2)].atan2(m[(2, 2)]);
        let roll = m[(1, 0)].atan2(m[(1, 1)]);
        (yaw, pitch, roll)
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = TrackerConfig::default();
        assert_eq!(config.rotation_samples, 10);
        assert_eq!(config.position_samples, 3);
        assert_eq!(config.max_six_dof_time_difference_ns, 200_000_000);
        assert!(config.validate().is_ok());

        let bad = TrackerConfig { position_samples: 1, ..TrackerConfig::default() };
        assert!(bad.validate().is_err());
        let bad = TrackerConfig { max_six_dof_time_difference_ns: 0, ..TrackerConfig::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_rejects_bad_ekf_bounds() {
        let path = std::env::temp_dir().join(format!("tracker_config_{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "ekf": { "max_prediction_secs": -0.1 } }"#).unwrap();
        let loaded = TrackerConfig::from_json_file(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(loaded, Err(TrackerError::Config(_))));

        for ekf in [
            EkfConfig { max_prediction_secs: f64::NAN, ..EkfConfig::default() },
            EkfConfig { max_gyro_dt_secs: 0.0, ..EkfConfig::default() },
            EkfConfig { gyro_noise: -1.0, ..EkfConfig::default() },
            EkfConfig { initial_covariance: f64::INFINITY, ..EkfConfig::default() },
        ] {
            let config = TrackerConfig { ekf, ..TrackerConfig::default() };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_bad_prediction_horizon_does_not_panic_pose_query() {
        // Built in code, so validation never ran
        let config = TrackerConfig {
            ekf: EkfConfig { max_prediction_secs: -0.1, ..EkfConfig::default() },
            ..TrackerConfig::default()
        };
        let tracker = HeadTracker::with_config(&config);
        let pose = tracker.get_pose(0, Portrait);
        assert!(pose.orientation.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config: TrackerConfig =
            serde_json::from_str(r#"{ "neck_model_factor": 0.5, "ekf": { "gyro_noise": 0.02 } }"#)
                .unwrap();
        assert_eq!(config.neck_model_factor, 0.5);
        assert_eq!(config.rotation_samples, 10);
        assert_eq!(config.ekf.gyro_noise, 0.02);
        assert_eq!(config.ekf.max_prediction_secs, EkfConfig::default().max_prediction_secs);
    }

    #[test]
    fn test_pose_before_any_data_uses_neck_model() {
        let tracker = HeadTracker::default();
        let estimate = tracker.get_pose_estimate(0, Portrait);
        assert_eq!(estimate.source, PoseSource::NeckModel);
        let expected = apply_neck_model(estimate.pose.orientation, 1.0);
        assert_eq!(estimate.pose.position, expected);
    }

    #[test]
    fn test_display_rotation_composes_frame_tables() {
        let filter_rotation = from_yaw_pitch_roll(0.2, -0.1, 0.3);
        let (tracker, _) = scripted_tracker(filter_rotation);
        let pose = tracker.get_pose(0, LandscapeLeft);

        let expected = frames::sensor_to_display(LandscapeLeft)
            * filter_rotation
            * frames::ekf_to_head_tracker(LandscapeLeft);
        assert!(pose.rotation().angle_to(&expected) < 1e-6);
    }

    #[test]
    fn test_callbacks_ignored_while_paused() {
        let (mut tracker, log) = scripted_tracker(Rotation::identity());
        tracker.on_gyroscope_data(&GyroscopeData::new(0, 1.0, 0.0, 0.0));
        tracker.on_accelerometer_data(&AccelerometerData::new(0, 0.0, 0.0, 9.81));
        assert_eq!(log.lock().unwrap().gyro_samples, 0);
        assert_eq!(log.lock().unwrap().accel_samples, 0);

        tracker.resume();
        assert!(tracker.is_tracking());
        tracker.on_gyroscope_data(&GyroscopeData::new(0, 1.0, 0.0, 0.0));
        tracker.on_accelerometer_data(&AccelerometerData::new(0, 0.0, 0.0, 9.81));
        assert_eq!(log.lock().unwrap().gyro_samples, 1);
        assert_eq!(log.lock().unwrap().accel_samples, 1);
    }

    #[test]
    fn test_pause_injects_zero_velocity_once() {
        let (mut tracker, log) = scripted_tracker(Rotation::identity());
        tracker.resume();
        tick(&tracker, 10 * MS);
        tracker.pause();
        assert!(!tracker.is_tracking());
        assert_eq!(log.lock().unwrap().gyro_samples, 2);

        // Second pause is a no-op
        tracker.pause();
        assert_eq!(log.lock().unwrap().gyro_samples, 2);
    }

    #[test]
    fn test_pause_freezes_rotation() {
        init_logging();
        let mut tracker = HeadTracker::default();
        tracker.resume();
        for i in 0..=2 {
            tracker.on_gyroscope_data(&GyroscopeData::new(i * 10 * MS, 0.3, 0.0, 1.0));
        }
        tracker.pause();

        let at_pause = tracker.get_pose(20 * MS, LandscapeLeft);
        let later = tracker.get_pose(500 * MS, LandscapeLeft);
        assert!(at_pause.rotation().angle_to(&later.rotation()) < 1e-6);

        // Samples after pause do not reach the filter
        tracker.on_gyroscope_data(&GyroscopeData::new(30 * MS, 0.0, 0.0, 5.0));
        let after = tracker.get_pose(600 * MS, LandscapeLeft);
        assert!(at_pause.rotation().angle_to(&after.rotation()) < 1e-6);
    }

    #[test]
    fn test_viewport_change_compensates_once() {
        init_logging();
        let (tracker, log) = scripted_tracker(Rotation::identity());
        tracker.get_pose(0, LandscapeLeft);
        tracker.get_pose(MS, LandscapeLeft);
        assert!(log.lock().unwrap().start_space_rotations.is_empty());

        tracker.get_pose(2 * MS, Portrait);
        tracker.get_pose(3 * MS, Portrait);
        let log = log.lock().unwrap();
        assert_eq!(log.start_space_rotations.len(), 1);
        let expected = frames::viewport_change_compensation(LandscapeLeft, Portrait);
        assert!(log.start_space_rotations[0].angle_to(&expected) < 1e-12);
    }

    /// Equal up to quaternion sign.
    fn assert_same_orientation(a: [f32; 4], b: [f32; 4]) {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let sign = if dot < 0.0 { -1.0 } else { 1.0 };
        for i in 0..4 {
            assert_relative_eq!(a[i], sign * b[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_viewport_change_keeps_observed_orientation() {
        init_logging();
        let mut tracker = HeadTracker::default();
        tracker.resume();

        // Upright in portrait, then turned a quarter about the screen normal
        // into landscape left over 100 ms.
        tracker.on_accelerometer_data(&AccelerometerData::new(0, 0.0, 9.81, 0.0));
        tracker.on_gyroscope_data(&GyroscopeData::new(0, 0.0, 0.0, FRAC_PI_2 / 0.1));
        let before = tracker.get_pose(0, Portrait);

        tracker.on_gyroscope_data(&GyroscopeData::new(100 * MS, 0.0, 0.0, 0.0));
        tracker.get_pose(100 * MS, LandscapeLeft);
        let after = tracker.get_pose(100 * MS, LandscapeLeft);
        assert_same_orientation(after.orientation, before.orientation);

        // Compensation happened on the switching frame only
        let steady = tracker.get_pose(100 * MS, LandscapeLeft);
        assert_same_orientation(steady.orientation, after.orientation);
    }

    #[test]
    fn test_first_frame_never_compensates() {
        let (tracker, log) = scripted_tracker(Rotation::identity());
        tracker.get_pose(0, PortraitUpsideDown);
        assert!(log.lock().unwrap().start_space_rotations.is_empty());
    }

    #[test]
    fn test_freshness_threshold() {
        let (mut tracker, _) = scripted_tracker(Rotation::identity());
        tracker.resume();
        tracker.add_six_dof_data(-10 * MS, [0.0; 3], [0.0, 0.0, 0.0, 1.0]);
        tracker.add_six_dof_data(0, [0.0; 3], [0.0, 0.0, 0.0, 1.0]);

        tick(&tracker, 199_999_999);
        let fresh = tracker.get_pose_estimate(199_999_999, Portrait);
        assert_eq!(fresh.source, PoseSource::SixDof);

        tick(&tracker, 200_000_001);
        let stale = tracker.get_pose_estimate(200_000_001, Portrait);
        assert_eq!(stale.source, PoseSource::NeckModel);
    }

    #[test]
    fn test_single_six_dof_sample_is_not_enough() {
        let (mut tracker, _) = scripted_tracker(Rotation::identity());
        tracker.resume();
        tracker.add_six_dof_data(0, [1.0, 1.0, 1.0], [0.0, 0.0, 0.0, 1.0]);
        tick(&tracker, MS);
        let estimate = tracker.get_pose_estimate(MS, Portrait);
        assert_eq!(estimate.source, PoseSource::NeckModel);
        // No valid 6DoF history yet, so no absolute offset either
        assert_eq!(estimate.pose.position, apply_neck_model(estimate.pose.orientation, 1.0));
    }

    #[test]
    fn test_fresh_path_extrapolates_position() {
        let (mut tracker, _) = scripted_tracker(Rotation::identity());
        tracker.resume();
        tracker.add_six_dof_data(0, [0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]);
        tracker.add_six_dof_data(100 * MS, [1.0, 0.0, -2.0], [0.0, 0.0, 0.0, 1.0]);
        tick(&tracker, 100 * MS);

        let estimate = tracker.get_pose_estimate(150 * MS, Portrait);
        assert_eq!(estimate.source, PoseSource::SixDof);
        assert_relative_eq!(estimate.pose.position[0], 1.5, epsilon = 1e-6);
        assert_relative_eq!(estimate.pose.position[2], -3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_tracking_loss_keeps_last_absolute_position() {
        let (mut tracker, _) = scripted_tracker(from_yaw_pitch_roll(0.4, 0.1, 0.0));
        tracker.resume();
        tracker.add_six_dof_data(0, [0.5, 1.5, -1.0], [0.0, 0.0, 0.0, 1.0]);
        tracker.add_six_dof_data(10 * MS, [1.0, 2.0, 3.0], [0.0, 0.0, 0.0, 1.0]);

        tick(&tracker, 10 * MS + 250 * MS);
        let estimate = tracker.get_pose_estimate(260 * MS, LandscapeRight);
        assert_eq!(estimate.source, PoseSource::NeckModel);

        let neck = apply_neck_model(estimate.pose.orientation, 1.0);
        let last = [1.0f32, 2.0, 3.0];
        for i in 0..3 {
            assert_relative_eq!(estimate.pose.position[i], neck[i] + last[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_drift_correction_is_yaw_only() {
        init_logging();
        // Filter rotation chosen so the display rotation (head-from-world)
        // is the inverse of Ry(0.3) Rx(0.2) Rz(0.1).
        let viewport = Portrait;
        let world_from_head = from_yaw_pitch_roll(0.3, 0.2, 0.1);
        let display = world_from_head.inverse();
        let filter_rotation = frames::sensor_to_display(viewport).inverse()
            * display
            * frames::ekf_to_head_tracker(viewport).inverse();
        let (mut tracker, _) = scripted_tracker(filter_rotation);
        tracker.resume();

        tracker.get_pose(0, viewport);
        tracker.get_pose(10 * MS, viewport);
        let before = tracker.get_pose(10 * MS, viewport);

        // External orientation differs in all three axes
        let external = from_yaw_pitch_roll(0.8, -0.3, 0.4).inverse();
        let q = to_xyzw(&external);
        let external = [q[0] as f32, q[1] as f32, q[2] as f32, q[3] as f32];
        tracker.add_six_dof_data(0, [0.0; 3], external);
        tracker.add_six_dof_data(10 * MS, [0.0; 3], external);

        let drift = tracker.drift_correction();
        assert!(drift.i.abs() < 1e-12 && drift.k.abs() < 1e-12);
        assert_relative_eq!(drift.quaternion().norm(), 1.0, epsilon = 1e-12);
        assert!(drift.angle() > 1e-3);

        tick(&tracker, 10 * MS);
        let after = tracker.get_pose_estimate(10 * MS, viewport);
        assert_eq!(after.source, PoseSource::SixDof);

        let (yaw0, pitch0, roll0) = world_yaw_pitch_roll(before.orientation);
        let (yaw1, pitch1, roll1) = world_yaw_pitch_roll(after.pose.orientation);
        assert_relative_eq!(pitch0, 0.2, epsilon = 1e-5);
        assert_relative_eq!(roll0, 0.1, epsilon = 1e-5);
        assert_relative_eq!(pitch1, pitch0, epsilon = 1e-5);
        assert_relative_eq!(roll1, roll0, epsilon = 1e-5);
        assert!((yaw1 - yaw0).abs() > 1e-3);
    }

    #[test]
    fn test_degenerate_six_dof_orientation_keeps_previous_drift() {
        let (tracker, _) = scripted_tracker(Rotation::identity());
        tracker.get_pose(0, Portrait);
        tracker.get_pose(10 * MS, Portrait);
        // Pure 180 degree roll: no y/w components to build a yaw from
        tracker.add_six_dof_data(0, [0.0; 3], [0.0, 0.0, 1.0, 0.0]);
        tracker.add_six_dof_data(10 * MS, [0.0; 3], [0.0, 0.0, 1.0, 0.0]);
        assert_relative_eq!(tracker.drift_correction().angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_recenter_keeps_six_dof_state() {
        let (mut tracker, log) = scripted_tracker(from_yaw_pitch_roll(0.5, 0.0, 0.0));
        tracker.resume();
        tracker.get_pose(0, Portrait);
        tracker.get_pose(10 * MS, Portrait);
        tracker.add_six_dof_data(0, [0.0; 3], [0.0, 0.0, 0.0, 1.0]);
        tracker.add_six_dof_data(10 * MS, [0.0; 3], [0.0, 0.0, 0.0, 1.0]);
        tick(&tracker, 10 * MS);
        let drift = tracker.drift_correction();

        tracker.recenter();
        assert_eq!(log.lock().unwrap().resets, 1);
        assert!(tracker.drift_correction().angle_to(&drift) < 1e-12);
        let estimate = tracker.get_pose_estimate(20 * MS, Portrait);
        assert_eq!(estimate.source, PoseSource::SixDof);
    }

    #[test]
    fn test_producers_drive_the_filter() {
        init_logging();
        let accel = ChannelSensorProducer::<AccelerometerData>::new("accel", 64);
        let gyro = ChannelSensorProducer::<GyroscopeData>::new("gyro", 64);
        let gyro_tx = gyro.sender();
        let mut tracker = HeadTracker::new(
            &TrackerConfig::default(),
            Box::new(SensorFusionEkf::default()),
            Box::new(accel),
            Box::new(gyro),
        );
        tracker.resume();

        gyro_tx.try_send(GyroscopeData::new(42 * MS, 0.0, 0.0, 0.0)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while tracker.latest_rotation_state().timestamp != 42 * MS {
            assert!(Instant::now() < deadline, "gyro sample never delivered");
            std::thread::sleep(Duration::from_millis(1));
        }

        tracker.pause();
        assert!(!tracker.is_tracking());
    }
}

//! Orientation EKF over gyroscope + accelerometer
//!
//! State: `sensor_from_start` rotation (maps start-frame vectors into the
//! sensor frame) with a 3x3 error covariance on a left-multiplied small
//! rotation. Gyroscope samples propagate, accelerometer samples correct tilt
//! against gravity. Yaw is unobservable here and only drifts; external 6DoF
//! data corrects it one level up, in the head tracker.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::types::{
    from_axis_angle, from_rotation_vector, nanos_to_secs, AccelerometerData, GyroscopeData,
    Rotation, TimestampNs, Vec3,
};

const G: f64 = 9.81; // m/s²

/// Gravity direction in the start frame.
fn start_up() -> Vec3 {
    Vec3::z()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EkfConfig {
    /// Gyroscope noise density [rad/s/√Hz]
    pub gyro_noise: f64,
    /// Accelerometer direction noise [rad]
    pub accel_noise: f64,
    /// Initial tilt uncertainty [rad²]
    pub initial_covariance: f64,
    /// Accelerometer samples further than this from 1 g are treated as motion [m/s²]
    pub accel_gate: f64,
    /// Upper bound on a single gyro integration step [s]
    pub max_gyro_dt_secs: f64,
    /// Upper bound on forward prediction [s]
    pub max_prediction_secs: f64,
}

impl EkfConfig {
    /// Every field must be finite; noise may be zero, step bounds must be positive.
    pub fn validate(&self) -> TrackerResult<()> {
        let non_negative = [
            ("gyro_noise", self.gyro_noise),
            ("accel_noise", self.accel_noise),
            ("initial_covariance", self.initial_covariance),
            ("accel_gate", self.accel_gate),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(TrackerError::Config(format!(
                    "ekf.{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        let positive = [
            ("max_gyro_dt_secs", self.max_gyro_dt_secs),
            ("max_prediction_secs", self.max_prediction_secs),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(TrackerError::Config(format!(
                    "ekf.{} must be finite and positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for EkfConfig {
    fn default() -> Self {
        Self {
            gyro_noise: 0.01,
            accel_noise: 0.5,
            initial_covariance: 0.1,
            accel_gate: 3.0,
            max_gyro_dt_secs: 0.1,
            max_prediction_secs: 0.2,
        }
    }
}

/// Latest filtered rotation.
#[derive(Clone, Copy, Debug)]
pub struct RotationState {
    pub sensor_from_start_rotation: Rotation,
    /// Angular velocity in the sensor frame [rad/s]
    pub sensor_from_start_rotation_velocity: Vec3,
    pub timestamp: TimestampNs,
}

/// Latest filtered pose. Position stays zero for an inertial-only filter.
#[derive(Clone, Copy, Debug)]
pub struct PoseState {
    pub position: Vec3,
    pub rotation: Rotation,
    pub timestamp: TimestampNs,
}

/// Contract between the head tracker and its orientation filter.
pub trait SensorFusion: Send {
    fn process_accelerometer_sample(&mut self, sample: &AccelerometerData);

    fn process_gyroscope_sample(&mut self, sample: &GyroscopeData);

    /// Rotation at `timestamp`, projected from the last integrated sample.
    fn predict_rotation(&self, timestamp: TimestampNs) -> Rotation;

    fn latest_rotation_state(&self) -> RotationState;

    fn latest_pose_state(&self) -> PoseState;

    /// Re-zero the reference frame: the current orientation becomes identity.
    fn reset(&mut self);

    /// Re-express the start frame by `rotation`.
    fn rotate_sensor_space_to_start_space_transformation(&mut self, rotation: &Rotation);
}

pub struct SensorFusionEkf {
    config: EkfConfig,
    sensor_from_start: Rotation,
    covariance: Matrix3<f64>,
    angular_velocity: Vec3,
    state_timestamp: Option<TimestampNs>,
    initialized: bool,

    gyro_updates: u64,
    accel_updates: u64,
}

impl SensorFusionEkf {
    pub fn new(config: EkfConfig) -> Self {
        let covariance = Matrix3::identity() * config.initial_covariance;
        Self {
            config,
            sensor_from_start: Rotation::identity(),
            covariance,
            angular_velocity: Vec3::zeros(),
            state_timestamp: None,
            initialized: false,
            gyro_updates: 0,
            accel_updates: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn update_counts(&self) -> (u64, u64) {
        (self.gyro_updates, self.accel_updates)
    }

    /// Rotation advanced by `angular_velocity` for `dt` seconds.
    fn integrate(rotation: &Rotation, angular_velocity: &Vec3, dt: f64) -> Rotation {
        from_rotation_vector(&(-angular_velocity * dt)) * rotation
    }

    /// Level the filter so start-frame up maps onto the measured gravity.
    fn initialize_from_gravity(&mut self, measured_up: &Vec3) {
        self.sensor_from_start = Rotation::rotation_between(&start_up(), measured_up)
            .unwrap_or_else(|| from_axis_angle(Vec3::x(), std::f64::consts::PI));
        self.covariance = Matrix3::identity() * self.config.initial_covariance;
        self.initialized = true;
        log::debug!("EKF initialized from gravity {:?}", measured_up.as_slice());
    }
}

impl Default for SensorFusionEkf {
    fn default() -> Self {
        Self::new(EkfConfig::default())
    }
}

impl SensorFusion for SensorFusionEkf {
    fn process_accelerometer_sample(&mut self, sample: &AccelerometerData) {
        let accel = sample.vector();
        let magnitude = accel.norm();
        if magnitude < 1e-3 {
            return;
        }
        let measured_up = accel / magnitude;

        if !self.initialized {
            self.initialize_from_gravity(&measured_up);
            return;
        }

        if (magnitude - G).abs() > self.config.accel_gate {
            return;
        }

        // Innovation: small rotation taking predicted up onto measured up,
        // expressed in the sensor frame.
        let predicted_up = self.sensor_from_start * start_up();
        let axis = predicted_up.cross(&measured_up);
        let sin_angle = axis.norm();
        let angle = sin_angle.atan2(predicted_up.dot(&measured_up));
        let innovation = if sin_angle > 1e-12 {
            axis * (angle / sin_angle)
        } else {
            Vec3::zeros()
        };

        let r = Matrix3::identity() * self.config.accel_noise.powi(2);
        let s_inv = match (self.covariance + r).try_inverse() {
            Some(inv) => inv,
            None => return,
        };
        let gain = self.covariance * s_inv;
        let correction = gain * innovation;

        self.sensor_from_start = from_rotation_vector(&correction) * self.sensor_from_start;
        self.sensor_from_start.renormalize();
        self.covariance = (Matrix3::identity() - gain) * self.covariance;
        self.accel_updates += 1;
    }

    fn process_gyroscope_sample(&mut self, sample: &GyroscopeData) {
        if let Some(prev) = self.state_timestamp {
            let dt_ns = sample.timestamp - prev;
            if dt_ns < 0 {
                log::warn!(
                    "gyroscope sample out of order: {} ns before filter state",
                    -dt_ns
                );
                self.angular_velocity = sample.vector();
                return;
            }
            let dt = nanos_to_secs(dt_ns).min(self.config.max_gyro_dt_secs);
            if dt > 0.0 {
                self.sensor_from_start =
                    Self::integrate(&self.sensor_from_start, &self.angular_velocity, dt);
                self.sensor_from_start.renormalize();
                self.covariance += Matrix3::identity() * (self.config.gyro_noise.powi(2) * dt);
            }
        }
        self.angular_velocity = sample.vector();
        self.state_timestamp = Some(sample.timestamp);
        self.gyro_updates += 1;
    }

    fn predict_rotation(&self, timestamp: TimestampNs) -> Rotation {
        let base = self.state_timestamp.unwrap_or(timestamp);
        // max/min rather than clamp: a bad horizon must not panic on the render path.
        let dt = nanos_to_secs(timestamp - base)
            .min(self.config.max_prediction_secs)
            .max(0.0);
        Self::integrate(&self.sensor_from_start, &self.angular_velocity, dt)
    }

    fn latest_rotation_state(&self) -> RotationState {
        RotationState {
            sensor_from_start_rotation: self.sensor_from_start,
            sensor_from_start_rotation_velocity: self.angular_velocity,
            timestamp: self.state_timestamp.unwrap_or(0),
        }
    }

    fn latest_pose_state(&self) -> PoseState {
        PoseState {
            position: Vec3::zeros(),
            rotation: self.sensor_from_start,
            timestamp: self.state_timestamp.unwrap_or(0),
        }
    }

    fn reset(&mut self) {
        self.sensor_from_start = Rotation::identity();
        self.covariance = Matrix3::identity() * self.config.initial_covariance;
        self.initialized = false;
        log::debug!("EKF reset, waiting for gravity");
    }

    fn rotate_sensor_space_to_start_space_transformation(&mut self, rotation: &Rotation) {
        self.sensor_from_start *= rotation;
        self.sensor_from_start.renormalize();
    }
}

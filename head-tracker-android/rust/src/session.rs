use crate::error::{HeadTrackerJniError, JResult};
use crossbeam::channel::{Sender, TrySendError};
use head_tracker_rs::filters::SensorFusionEkf;
use head_tracker_rs::sensors::ChannelSensorProducer;
use head_tracker_rs::{
    AccelerometerData, GyroscopeData, HeadTracker, TimestampNs, TrackerConfig,
    ViewportOrientation,
};

/// Floats in a pose handed to Kotlin: position xyz, then orientation xyzw.
pub const POSE_FLOATS: usize = 7;

const SENSOR_QUEUE_CAPACITY: usize = 500;

/// One tracker plus the queues Android sensor listeners push into.
pub struct TrackerSession {
    tracker: HeadTracker,
    accel_tx: Sender<AccelerometerData>,
    gyro_tx: Sender<GyroscopeData>,
    dropped_samples: u64,
}

impl TrackerSession {
    pub fn new(config: &TrackerConfig) -> Self {
        let accel = ChannelSensorProducer::<AccelerometerData>::new("accel", SENSOR_QUEUE_CAPACITY);
        let gyro = ChannelSensorProducer::<GyroscopeData>::new("gyro", SENSOR_QUEUE_CAPACITY);
        let accel_tx = accel.sender();
        let gyro_tx = gyro.sender();

        let tracker = HeadTracker::new(
            config,
            Box::new(SensorFusionEkf::new(config.ekf.clone())),
            Box::new(accel),
            Box::new(gyro),
        );

        TrackerSession { tracker, accel_tx, gyro_tx, dropped_samples: 0 }
    }

    pub fn resume(&mut self) {
        self.tracker.resume();
    }

    pub fn pause(&mut self) {
        self.tracker.pause();
    }

    pub fn recenter(&self) {
        self.tracker.recenter();
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker.is_tracking()
    }

    pub fn get_pose(&self, timestamp: TimestampNs, viewport_ordinal: i32) -> JResult<[f32; POSE_FLOATS]> {
        let viewport = ViewportOrientation::from_ordinal(viewport_ordinal).ok_or_else(|| {
            HeadTrackerJniError::InvalidArgument(format!(
                "viewport orientation ordinal {} out of range",
                viewport_ordinal
            ))
        })?;

        let pose = self.tracker.get_pose(timestamp, viewport);
        let [px, py, pz] = pose.position;
        let [qx, qy, qz, qw] = pose.orientation;
        Ok([px, py, pz, qx, qy, qz, qw])
    }

    pub fn add_six_dof_data(
        &self,
        timestamp: TimestampNs,
        position: &[f32],
        orientation: &[f32],
    ) -> JResult<()> {
        let position: [f32; 3] = position.try_into().map_err(|_| {
            HeadTrackerJniError::InvalidArgument(format!(
                "position needs 3 floats, got {}",
                position.len()
            ))
        })?;
        let orientation: [f32; 4] = orientation.try_into().map_err(|_| {
            HeadTrackerJniError::InvalidArgument(format!(
                "orientation needs 4 floats, got {}",
                orientation.len()
            ))
        })?;

        self.tracker.add_six_dof_data(timestamp, position, orientation);
        Ok(())
    }

    pub fn push_accelerometer_sample(&mut self, sample: AccelerometerData) -> JResult<()> {
        let result = self.accel_tx.try_send(sample);
        self.handle_send(result, "accelerometer")
    }

    pub fn push_gyroscope_sample(&mut self, sample: GyroscopeData) -> JResult<()> {
        let result = self.gyro_tx.try_send(sample);
        self.handle_send(result, "gyroscope")
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    /// A full queue drops the sample; the filter tolerates gaps.
    fn handle_send<T>(&mut self, result: Result<(), TrySendError<T>>, sensor: &str) -> JResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped_samples += 1;
                if self.dropped_samples % 100 == 1 {
                    log::warn!("{} queue full, {} samples dropped", sensor, self.dropped_samples);
                }
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(HeadTrackerJniError::Internal(format!(
                "{} queue disconnected",
                sensor
            ))),
        }
    }
}

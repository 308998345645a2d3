//! Recorded sessions: raw sensor streams, 6DoF samples and the frame times a
//! renderer asked for. Replaying one drives a [`HeadTracker`] exactly as the
//! live callbacks would, in timestamp order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::head_tracker::{HeadTracker, PoseEstimate, PoseSource};
use crate::types::{
    AccelerometerData, GyroscopeData, SixDofData, TimestampNs, ViewportOrientation,
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRequest {
    pub timestamp: TimestampNs,
    pub viewport: ViewportOrientation,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRecording {
    pub accelerometer: Vec<AccelerometerData>,
    pub gyroscope: Vec<GyroscopeData>,
    pub six_dof: Vec<SixDofData>,
    pub frames: Vec<FrameRequest>,
}

/// One replay step. Variant order breaks timestamp ties: sensors feed the
/// filter before a 6DoF sample is fused, and both land before a frame at the
/// same instant is rendered.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SessionEvent {
    Accelerometer(AccelerometerData),
    Gyroscope(GyroscopeData),
    SixDof(SixDofData),
    Frame(FrameRequest),
}

impl SessionEvent {
    pub fn timestamp(&self) -> TimestampNs {
        match self {
            SessionEvent::Accelerometer(s) => s.timestamp,
            SessionEvent::Gyroscope(s) => s.timestamp,
            SessionEvent::SixDof(s) => s.timestamp,
            SessionEvent::Frame(f) => f.timestamp,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SessionEvent::Accelerometer(_) => 0,
            SessionEvent::Gyroscope(_) => 1,
            SessionEvent::SixDof(_) => 2,
            SessionEvent::Frame(_) => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub frames: usize,
    pub fused_frames: usize,
    pub fallback_frames: usize,
    pub final_drift_yaw_deg: f64,
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

impl SessionRecording {
    /// Load a `.json` or `.json.gz` recording.
    pub fn load(path: &Path) -> TrackerResult<Self> {
        let file = File::open(path)?;
        let recording: SessionRecording = if is_gzip(path) {
            serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
        } else {
            serde_json::from_reader(BufReader::new(file))?
        };
        recording.validate()?;
        log::info!(
            "loaded {}: {} accel, {} gyro, {} 6DoF, {} frames",
            path.display(),
            recording.accelerometer.len(),
            recording.gyroscope.len(),
            recording.six_dof.len(),
            recording.frames.len()
        );
        Ok(recording)
    }

    pub fn from_reader<R: Read>(reader: R) -> TrackerResult<Self> {
        let recording: SessionRecording = serde_json::from_reader(reader)?;
        recording.validate()?;
        Ok(recording)
    }

    pub fn save(&self, path: &Path) -> TrackerResult<()> {
        let file = File::create(path)?;
        if is_gzip(path) {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            serde_json::to_writer(&mut encoder, self)?;
            encoder.finish()?.flush()?;
        } else {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> TrackerResult<()> {
        let non_finite = self.accelerometer.iter().any(|s| s.data.iter().any(|v| !v.is_finite()))
            || self.gyroscope.iter().any(|s| s.data.iter().any(|v| !v.is_finite()))
            || self.six_dof.iter().any(|s| {
                s.position.iter().chain(s.orientation.iter()).any(|v| !v.is_finite())
            });
        if non_finite {
            return Err(TrackerError::Recording("non-finite sensor value".into()));
        }
        Ok(())
    }

    /// All streams merged by timestamp. Order within a stream is preserved.
    pub fn events(&self) -> Vec<SessionEvent> {
        let mut events: Vec<SessionEvent> = self
            .accelerometer
            .iter()
            .copied()
            .map(SessionEvent::Accelerometer)
            .chain(self.gyroscope.iter().copied().map(SessionEvent::Gyroscope))
            .chain(self.six_dof.iter().copied().map(SessionEvent::SixDof))
            .chain(self.frames.iter().copied().map(SessionEvent::Frame))
            .collect();
        // Stable, so equal keys keep their recorded order.
        events.sort_by_key(|e| (e.timestamp(), e.rank()));
        events
    }

    /// Feed every event to `tracker`, calling `on_pose` for each frame.
    /// The tracker must be resumed for sensor samples to reach the filter.
    pub fn replay<F>(&self, tracker: &HeadTracker, mut on_pose: F) -> ReplaySummary
    where
        F: FnMut(&FrameRequest, &PoseEstimate),
    {
        let mut summary = ReplaySummary::default();
        for event in self.events() {
            match event {
                SessionEvent::Accelerometer(sample) => tracker.on_accelerometer_data(&sample),
                SessionEvent::Gyroscope(sample) => tracker.on_gyroscope_data(&sample),
                SessionEvent::SixDof(sample) => {
                    tracker.add_six_dof_data(sample.timestamp, sample.position, sample.orientation)
                }
                SessionEvent::Frame(frame) => {
                    let estimate = tracker.get_pose_estimate(frame.timestamp, frame.viewport);
                    summary.frames += 1;
                    match estimate.source {
                        PoseSource::SixDof => summary.fused_frames += 1,
                        PoseSource::NeckModel => summary.fallback_frames += 1,
                    }
                    on_pose(&frame, &estimate);
                }
            }
        }

        let drift = tracker.drift_correction();
        // Yaw-only, so the signed angle about +Y is 2*atan2(y, w).
        summary.final_drift_yaw_deg = (2.0 * drift.j.atan2(drift.w)).to_degrees();
        summary
    }
}

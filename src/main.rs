use std::f64::consts::PI;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::Parser;
use tokio::time::{interval, Duration};

use head_tracker_rs::sensors::ChannelSensorProducer;
use head_tracker_rs::filters::SensorFusionEkf;
use head_tracker_rs::{
    AccelerometerData, GyroscopeData, HeadTracker, PoseSource, TimestampNs, TrackerConfig,
    ViewportOrientation,
};

#[derive(Parser, Debug)]
#[command(name = "head_tracker")]
#[command(about = "Live head tracking demo on a simulated IMU and 6DoF stream", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(long, default_value = "10")]
    duration: u64,

    /// Tracker config JSON (defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop the 6DoF stream after this many seconds to exercise the fallback
    #[arg(long)]
    six_dof_secs: Option<f64>,

    /// Viewport ordinal: 0 landscape left, 1 landscape right, 2 portrait, 3 portrait upside down
    #[arg(long, default_value = "0")]
    viewport: i32,

    /// Peak head yaw of the simulated sweep, degrees
    #[arg(long, default_value = "30.0")]
    yaw_amplitude_deg: f64,

    /// Constant gyro bias, rad/s (drift the 6DoF stream has to correct)
    #[arg(long, default_value = "0.02")]
    gyro_bias: f64,
}

const IMU_PERIOD_MS: u64 = 5;
const SIX_DOF_PERIOD_MS: u64 = 33;
const RENDER_PERIOD_MS: u64 = 16;
const SWEEP_PERIOD_SECS: f64 = 4.0;

/// Simulated head motion: sinusoidal yaw about the vertical axis.
#[derive(Clone, Copy)]
struct YawSweep {
    amplitude: f64,
}

impl YawSweep {
    fn angle(&self, t: f64) -> f64 {
        self.amplitude * (2.0 * PI * t / SWEEP_PERIOD_SECS).sin()
    }

    fn rate(&self, t: f64) -> f64 {
        self.amplitude * (2.0 * PI / SWEEP_PERIOD_SECS) * (2.0 * PI * t / SWEEP_PERIOD_SECS).cos()
    }
}

fn elapsed_ns(start: Instant) -> TimestampNs {
    start.elapsed().as_nanos() as TimestampNs
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let viewport = ViewportOrientation::from_ordinal(args.viewport)
        .ok_or_else(|| anyhow!("invalid viewport ordinal {}", args.viewport))?;
    let config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };

    println!("[{}] Head Tracker Starting", ts_now());
    println!("  Duration: {} seconds (0=until Ctrl-C)", args.duration);
    println!("  Viewport: {:?}", viewport);
    match args.six_dof_secs {
        Some(secs) => println!("  6DoF stream: first {:.1} s", secs),
        None => println!("  6DoF stream: whole session"),
    }

    let accel = ChannelSensorProducer::<AccelerometerData>::new("accel", 512);
    let gyro = ChannelSensorProducer::<GyroscopeData>::new("gyro", 512);
    let accel_tx = accel.sender();
    let gyro_tx = gyro.sender();

    let mut tracker = HeadTracker::new(
        &config,
        Box::new(SensorFusionEkf::new(config.ekf.clone())),
        Box::new(accel),
        Box::new(gyro),
    );
    tracker.resume();
    let tracker = Arc::new(Mutex::new(tracker));

    let start = Instant::now();
    let sweep = YawSweep { amplitude: args.yaw_amplitude_deg.to_radians() };

    // IMU at 200 Hz: device upright, turning about its vertical (sensor Y) axis.
    let gyro_bias = args.gyro_bias;
    let imu_task = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(IMU_PERIOD_MS));
        let mut dropped = 0u64;
        loop {
            ticker.tick().await;
            let ts = elapsed_ns(start);
            let t = ts as f64 * 1e-9;
            let accel_ok = accel_tx.try_send(AccelerometerData::new(ts, 0.0, 9.81, 0.0)).is_ok();
            let gyro_ok = gyro_tx
                .try_send(GyroscopeData::new(ts, 0.0, sweep.rate(t) + gyro_bias, 0.0))
                .is_ok();
            if !(accel_ok && gyro_ok) {
                dropped += 1;
                if dropped % 200 == 1 {
                    log::warn!("IMU queue full, {} ticks dropped", dropped);
                }
            }
        }
    });

    // 6DoF at ~30 Hz: ground-truth yaw plus a slow sway.
    let six_dof_tracker = Arc::clone(&tracker);
    let six_dof_until = args.six_dof_secs;
    let six_dof_task = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(SIX_DOF_PERIOD_MS));
        loop {
            ticker.tick().await;
            let ts = elapsed_ns(start);
            let t = ts as f64 * 1e-9;
            if six_dof_until.map_or(false, |until| t > until) {
                log::info!("6DoF stream stopped at {:.2} s", t);
                break;
            }
            let half_yaw = 0.5 * sweep.angle(t);
            let position = [(0.05 * (0.5 * t).sin()) as f32, 1.6, 0.0];
            let orientation = [0.0, half_yaw.sin() as f32, 0.0, half_yaw.cos() as f32];
            match six_dof_tracker.lock() {
                Ok(tracker) => tracker.add_six_dof_data(ts, position, orientation),
                Err(_) => break,
            }
        }
    });

    // Render loop at ~60 Hz
    let mut ticker = interval(Duration::from_millis(RENDER_PERIOD_MS));
    let deadline = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let mut frames = 0u64;
    let mut fused = 0u64;
    let mut last_report = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
            _ = ticker.tick() => {}
        }
        if deadline.map_or(false, |d| start.elapsed() >= d) {
            println!("[{}] Duration reached, stopping...", ts_now());
            break;
        }

        let ts = elapsed_ns(start);
        let estimate = match tracker.lock() {
            Ok(tracker) => tracker.get_pose_estimate(ts, viewport),
            Err(_) => return Err(anyhow!("tracker lock poisoned")),
        };
        frames += 1;
        if estimate.source == PoseSource::SixDof {
            fused += 1;
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            let p = estimate.pose.position;
            let q = estimate.pose.orientation;
            log::info!(
                "t={:.1}s {:?} pos=({:.3}, {:.3}, {:.3}) quat=({:.3}, {:.3}, {:.3}, {:.3})",
                ts as f64 * 1e-9,
                estimate.source,
                p[0], p[1], p[2],
                q[0], q[1], q[2], q[3]
            );
            last_report = Instant::now();
        }
    }

    imu_task.abort();
    six_dof_task.abort();

    let drift_deg = match tracker.lock() {
        Ok(mut tracker) => {
            tracker.pause();
            tracker.drift_correction().angle().to_degrees()
        }
        Err(_) => return Err(anyhow!("tracker lock poisoned")),
    };

    println!("\n=== Final Stats ===");
    println!("Frames: {}", frames);
    println!("Fused frames: {}", fused);
    println!("Fallback frames: {}", frames - fused);
    println!("Drift correction: {:.2} deg", drift_deg);

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

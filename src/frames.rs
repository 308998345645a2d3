//! Coordinate-frame tables keyed by viewport orientation
//!
//! Built once on first use and immutable afterwards. Lookups go through
//! `match` rather than the enum's ordinal.

use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_2, PI};
use std::sync::OnceLock;

use nalgebra::UnitQuaternion;

use crate::types::{from_xyzw, from_yaw_pitch_roll, Rotation, ViewportOrientation};

struct FrameTables {
    sensor_to_display: [Rotation; 4],
    ekf_to_head_tracker: [Rotation; 4],
    /// `[current][new]`
    viewport_change: [[Rotation; 4]; 4],
}

fn slot(orientation: ViewportOrientation) -> usize {
    match orientation {
        ViewportOrientation::LandscapeLeft => 0,
        ViewportOrientation::LandscapeRight => 1,
        ViewportOrientation::Portrait => 2,
        ViewportOrientation::PortraitUpsideDown => 3,
    }
}

fn tables() -> &'static FrameTables {
    static TABLES: OnceLock<FrameTables> = OnceLock::new();
    TABLES.get_or_init(build_tables)
}

fn build_tables() -> FrameTables {
    let s = FRAC_1_SQRT_2;

    // Rotation about +Z by pi/2, -pi/2, 0 and pi.
    let sensor_to_display = [
        from_xyzw(0.0, 0.0, s, s),
        from_xyzw(0.0, 0.0, -s, s),
        from_xyzw(0.0, 0.0, 0.0, 1.0),
        from_xyzw(0.0, 0.0, 1.0, 0.0),
    ];

    // Yaw/pitch/roll of (-pi/2, 0, -pi/2), (pi/2, 0, pi/2),
    // (pi/2, pi/2, pi/2) and (-pi/2, -pi/2, -pi/2).
    let ekf_to_head_tracker = [
        from_xyzw(0.5, -0.5, -0.5, 0.5),
        from_xyzw(0.5, 0.5, 0.5, 0.5),
        from_xyzw(s, 0.0, 0.0, s),
        from_xyzw(0.0, -s, -s, 0.0),
    ];

    // Only roll changes between viewports:
    //
    // | current \ new | LL    | LR    | P     | PUD   |
    // |---------------|-------|-------|-------|-------|
    // | LL            | 0     | pi    | -pi/2 | pi/2  |
    // | LR            | pi    | 0     | pi/2  | -pi/2 |
    // | P             | pi/2  | -pi/2 | 0     | pi    |
    // | PUD           | -pi/2 | pi/2  | pi    | 0     |
    let roll = |angle: f64| from_yaw_pitch_roll(0.0, 0.0, angle);
    let id = UnitQuaternion::identity();
    let viewport_change = [
        [id, roll(PI), roll(-FRAC_PI_2), roll(FRAC_PI_2)],
        [roll(PI), id, roll(FRAC_PI_2), roll(-FRAC_PI_2)],
        [roll(FRAC_PI_2), roll(-FRAC_PI_2), id, roll(PI)],
        [roll(-FRAC_PI_2), roll(FRAC_PI_2), roll(PI), id],
    ];

    FrameTables {
        sensor_to_display,
        ekf_to_head_tracker,
        viewport_change,
    }
}

/// Sensor space to display space for the given viewport.
pub fn sensor_to_display(orientation: ViewportOrientation) -> Rotation {
    tables().sensor_to_display[slot(orientation)]
}

/// Filter (EKF) space to head-tracker space for the given viewport.
pub fn ekf_to_head_tracker(orientation: ViewportOrientation) -> Rotation {
    tables().ekf_to_head_tracker[slot(orientation)]
}

/// Start-space correction applied when the viewport goes from `current` to `new`.
pub fn viewport_change_compensation(
    current: ViewportOrientation,
    new: ViewportOrientation,
) -> Rotation {
    tables().viewport_change[slot(current)][slot(new)]
}

use crate::error::{throw_java_exception, HeadTrackerJniError, JResult};
use crate::session::{TrackerSession, POSE_FLOATS};
use head_tracker_rs::{AccelerometerData, GyroscopeData, TrackerConfig};
use jni::objects::{JClass, JFloatArray};
use jni::sys::{jfloat, jfloatArray, jint, jlong};
use jni::JNIEnv;
use std::sync::{Mutex, Once};

// Global tracker - stored as static to persist across JNI calls
lazy_static::lazy_static! {
    static ref GLOBAL_TRACKER: Mutex<Option<TrackerSession>> = Mutex::new(None);
}

static LOGGER: Once = Once::new();

fn init_logging() {
    LOGGER.call_once(|| {
        #[cfg(target_os = "android")]
        {
            if android_log::init("HeadTracker").is_err() {
                return;
            }
            log::set_max_level(log::LevelFilter::Info);
        }
    });
}

/// Run `f` against the live tracker. Errors with `NotCreated` before `nativeCreate`.
fn with_tracker<R>(f: impl FnOnce(&mut TrackerSession) -> JResult<R>) -> JResult<R> {
    let mut guard = GLOBAL_TRACKER.lock().map_err(|_| {
        HeadTrackerJniError::Internal("Failed to acquire global tracker lock".to_string())
    })?;
    match guard.as_mut() {
        Some(session) => f(session),
        None => Err(HeadTrackerJniError::NotCreated),
    }
}

fn report<T>(env: &mut JNIEnv, result: JResult<T>, on_error: T) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            log::error!("{}", e);
            let _ = throw_java_exception(env, &e);
            on_error
        }
    }
}

fn read_float_array(env: &mut JNIEnv, array: &JFloatArray) -> JResult<Vec<jfloat>> {
    if array.is_null() {
        return Err(HeadTrackerJniError::InvalidArgument("null float array".to_string()));
    }
    let len = env.get_array_length(array)? as usize;
    let mut buf = vec![0.0; len];
    env.get_float_array_region(array, 0, &mut buf)?;
    Ok(buf)
}

/// JNI: Create the tracker (replacing any existing one)
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_headtracker_HeadTrackerJni_nativeCreate(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    init_logging();
    let result = create_impl().map(|_| 0);
    report(&mut env, result, -1)
}

fn create_impl() -> JResult<()> {
    let mut guard = GLOBAL_TRACKER.lock().map_err(|_| {
        HeadTrackerJniError::Internal("Failed to acquire global tracker lock".to_string())
    })?;
    if guard.is_some() {
        log::warn!("nativeCreate called twice, replacing tracker");
    }
    // Old tracker stops its sensor threads on drop.
    *guard = Some(TrackerSession::new(&TrackerConfig::default()));
    log::info!("head tracker created");
    Ok(())
}

/// JNI: Destroy the tracker. No-op if none exists.
#[no_mangle]
pub extern "C" fn Java_com_example_headtracker_HeadTrackerJni_nativeDestroy(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = destroy_impl().map(|_| 0);
    report(&mut env, result, -1)
}

fn destroy_impl() -> JResult<()> {
    let session = {
        let mut guard = GLOBAL_TRACKER.lock().map_err(|_| {
            HeadTrackerJniError::Internal("Failed to acquire global tracker lock".to_string())
        })?;
        guard.take()
    };
    if session.is_some() {
        log::info!("head tracker destroyed");
    }
    Ok(())
}

/// JNI: Resume tracking (registers sensor callbacks)
#[no_mangle]
pub extern "C" fn Java_com_example_headtracker_HeadTrackerJni_nativeResume(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_tracker(|session| {
        session.resume();
        Ok(0)
    });
    report(&mut env, result, -1)
}

/// JNI: Pause tracking. Pose queries keep working and return a frozen orientation.
#[no_mangle]
pub extern "C" fn Java_com_example_headtracker_HeadTrackerJni_nativePause(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_tracker(|session| {
        session.pause();
        Ok(0)
    });
    report(&mut env, result, -1)
}

/// JNI: Recenter the orientation filter
#[no_mangle]
pub extern "C" fn Java_com_example_headtracker_HeadTrackerJni_nativeRecenter(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_tracker(|session| {
        session.recenter();
        Ok(0)
    });
    report(&mut env, result, -1)
}

/// JNI: Pose for a frame
/// Parameters: timestamp (ns, sensor clock), viewport orientation ordinal
/// Returns: float[7] = position xyz, orientation xyzw; null on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_headtracker_HeadTrackerJni_nativeGetPose(
    mut env: JNIEnv,
    _class: JClass,
    timestamp_ns: jlong,
    viewport_orientation: jint,
) -> jfloatArray {
    let result = get_pose_impl(&mut env, timestamp_ns, viewport_orientation);
    report(&mut env, result, std::ptr::null_mut())
}

fn get_pose_impl(env: &mut JNIEnv, timestamp_ns: i64, viewport_orientation: i32) -> JResult<jfloatArray> {
    let pose = with_tracker(|session| session.get_pose(timestamp_ns, viewport_orientation))?;
    let array = env.new_float_array(POSE_FLOATS as i32)?;
    env.set_float_array_region(&array, 0, &pose)?;
    Ok(array.into_raw())
}

/// JNI: Feed one external 6DoF sample
/// Parameters: timestamp (ns), position float[3], orientation float[4] (xyzw)
#[no_mangle]
pub extern "C" fn Java_com_example_headtracker_HeadTrackerJni_nativeAddSixDoFData<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    timestamp_ns: jlong,
    position: JFloatArray<'local>,
    orientation: JFloatArray<'local>,
) -> jint {
    let result = add_six_dof_impl(&mut env, timestamp_ns, &position, &orientation).map(|_| 0);
    report(&mut env, result, -1)
}

fn add_six_dof_impl(
    env: &mut JNIEnv,
    timestamp_ns: i64,
    position: &JFloatArray,
    orientation: &JFloatArray,
) -> JResult<()> {
    let position = read_float_array(env, position)?;
    let orientation = read_float_array(env, orientation)?;
    with_tracker(|session| session.add_six_dof_data(timestamp_ns, &position, &orientation))
}

/// JNI: Push accelerometer sample
/// Parameters: x, y, z (m/s², device frame), timestamp (ns, sensor clock)
#[no_mangle]
pub extern "C" fn Java_com_example_headtracker_HeadTrackerJni_nativePushAccelerometerSample(
    mut env: JNIEnv,
    _class: JClass,
    x: jfloat,
    y: jfloat,
    z: jfloat,
    timestamp_ns: jlong,
) -> jint {
    let sample = AccelerometerData::new(timestamp_ns, x as f64, y as f64, z as f64);
    let result = with_tracker(|session| session.push_accelerometer_sample(sample)).map(|_| 0);
    report(&mut env, result, -1)
}

/// JNI: Push gyroscope sample
/// Parameters: x, y, z (rad/s, device frame), timestamp (ns, sensor clock)
#[no_mangle]
pub extern "C" fn Java_com_example_headtracker_HeadTrackerJni_nativePushGyroscopeSample(
    mut env: JNIEnv,
    _class: JClass,
    x: jfloat,
    y: jfloat,
    z: jfloat,
    timestamp_ns: jlong,
) -> jint {
    let sample = GyroscopeData::new(timestamp_ns, x as f64, y as f64, z as f64);
    let result = with_tracker(|session| session.push_gyroscope_sample(sample)).map(|_| 0);
    report(&mut env, result, -1)
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test owns the global: the lifecycle steps must run in order.
    #[test]
    fn test_global_lifecycle() {
        assert_eq!(destroy_impl(), Ok(()));
        assert_eq!(
            with_tracker(|session| session.get_pose(0, 0)).unwrap_err(),
            HeadTrackerJniError::NotCreated
        );

        create_impl().unwrap();
        with_tracker(|session| {
            session.resume();
            Ok(())
        })
        .unwrap();
        let pose = with_tracker(|session| session.get_pose(0, 0)).unwrap();
        assert_eq!(pose.len(), POSE_FLOATS);
        assert!(matches!(
            with_tracker(|session| session.get_pose(0, 9)),
            Err(HeadTrackerJniError::InvalidArgument(_))
        ));

        destroy_impl().unwrap();
        let after = with_tracker(|session| {
            session.recenter();
            Ok(())
        });
        assert_eq!(after, Err(HeadTrackerJniError::NotCreated));
    }
}

// Head Tracker Android JNI Library
// Exposes the Rust head tracker to Kotlin via JNI

pub mod android_jni;
pub mod error;
pub mod session;

pub use error::{HeadTrackerJniError, JResult};
pub use session::{TrackerSession, POSE_FLOATS};

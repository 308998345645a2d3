use jni::JNIEnv;
use thiserror::Error;

/// Head tracker JNI error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeadTrackerJniError {
    #[error("Head tracker not created")]
    NotCreated,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("JNI error: {0}")]
    JniError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for JNI operations
pub type JResult<T> = Result<T, HeadTrackerJniError>;

impl From<jni::errors::Error> for HeadTrackerJniError {
    fn from(e: jni::errors::Error) -> Self {
        HeadTrackerJniError::JniError(e.to_string())
    }
}

/// Throw Java exception from Rust error
pub fn throw_java_exception(env: &mut JNIEnv, error: &HeadTrackerJniError) -> JResult<()> {
    let exception_class = match error {
        HeadTrackerJniError::NotCreated => "java/lang/IllegalStateException",
        HeadTrackerJniError::InvalidArgument(_) => "java/lang/IllegalArgumentException",
        HeadTrackerJniError::JniError(_) | HeadTrackerJniError::Internal(_) => {
            "java/lang/RuntimeException"
        }
    };

    // A pending exception (e.g. from a failed array access) takes precedence.
    if env.exception_check().unwrap_or(false) {
        return Ok(());
    }

    env.throw_new(exception_class, error.to_string())
        .map_err(|_| HeadTrackerJniError::JniError("Failed to throw exception".to_string()))?;

    Ok(())
}

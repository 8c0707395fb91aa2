use crate::host::{InputSink, InputSource};
use crate::Result;
use std::sync::Arc;

#[cfg(feature = "rdev")]
pub mod desktop;

/// The host capabilities a session runs against
#[derive(Clone)]
pub struct Backend {
    pub source: Arc<dyn InputSource>,
    pub sink: Arc<dyn InputSink>,
}

/// Create the input backend for the current build
pub fn create_backend() -> Result<Backend> {
    #[cfg(feature = "rdev")]
    {
        Ok(Backend {
            source: desktop::DesktopInput::shared(),
            sink: Arc::new(desktop::DesktopSink::new()),
        })
    }
    #[cfg(not(feature = "rdev"))]
    {
        Err(crate::TinytaskError::UnsupportedPlatform(
            "built without a desktop input backend; rebuild with the `rdev` feature".to_string(),
        ))
    }
}

//! Central error handling for geodrape
//!
//! Provides a unified RenderError enum with consistent categorization
//! shared by the translator, the picker and the terrain pipeline.

/// Centralized error type for all core operations
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Device error: {0}")]
    Device(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Readback error: {0}")]
    Readback(String),

    #[error("Coordinate conversion error: {0}")]
    Conversion(String),

    #[error("Identity space exhausted: {0} features already registered")]
    IdentityExhausted(u32),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Short category prefix used in log lines
    pub fn category(&self) -> &'static str {
        match self {
            RenderError::Device(_) => "Device",
            RenderError::Upload(_) => "Upload",
            RenderError::Render(_) => "Render",
            RenderError::Readback(_) => "Readback",
            RenderError::Conversion(_) => "Conversion",
            RenderError::IdentityExhausted(_) => "Identity",
            RenderError::Config(_) => "Config",
            RenderError::Io(_) => "IO",
        }
    }

    /// Convenience constructors for common error types
    pub fn device<T: ToString>(msg: T) -> Self {
        RenderError::Device(msg.to_string())
    }

    pub fn upload<T: ToString>(msg: T) -> Self {
        RenderError::Upload(msg.to_string())
    }

    pub fn render<T: ToString>(msg: T) -> Self {
        RenderError::Render(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        RenderError::Readback(msg.to_string())
    }

    pub fn conversion<T: ToString>(msg: T) -> Self {
        RenderError::Conversion(msg.to_string())
    }

    pub fn config<T: ToString>(msg: T) -> Self {
        RenderError::Config(msg.to_string())
    }
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> Self {
        RenderError::Config(err.to_string())
    }
}

/// Result type alias for core operations
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_prefixes() {
        assert_eq!(RenderError::device("x").category(), "Device");
        assert_eq!(RenderError::conversion("bad lat").category(), "Conversion");
        assert_eq!(RenderError::IdentityExhausted(3).category(), "Identity");
    }

    #[test]
    fn test_display_includes_message() {
        let err = RenderError::readback("map failed");
        assert_eq!(err.to_string(), "Readback error: map failed");
    }
}

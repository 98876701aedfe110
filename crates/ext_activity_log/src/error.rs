//! Error type shared by every part of the activity log extension.

// ============================================================================
// Error Types (Error codes 9900-9999)
// ============================================================================

/// Error codes for activity log operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ActivityErrorCode {
    /// Monitoring was started while extensions are already watched
    AlreadyRunning = 9901,
    /// Router received a request type it has no handler for
    UnknownRequestType = 9902,
    /// No loaded-log set registered for a tab
    NotFound = 9903,
    /// Save/load file content is malformed
    Parse = 9904,
    /// Download subsystem reported a failure
    Save = 9905,
    /// Host capability call failed
    Host = 9906,
    /// Request parameters are missing or malformed
    InvalidParams = 9907,
    /// Configuration could not be read or is invalid
    Config = 9908,
}

/// Activity log extension errors
#[derive(Debug, thiserror::Error, deno_error::JsError)]
pub enum ActivityError {
    #[error("[{code}] Monitor already running: {message}")]
    #[class(generic)]
    AlreadyRunning { code: u32, message: String },

    #[error("[{code}] Unknown request type: {request_type}")]
    #[class(generic)]
    UnknownRequestType { code: u32, request_type: String },

    #[error("[{code}] Not found: {message}")]
    #[class(generic)]
    NotFound { code: u32, message: String },

    #[error("[{code}] Parse error: {message}")]
    #[class(generic)]
    Parse { code: u32, message: String },

    #[error("[{code}] Save failed: {message}")]
    #[class(generic)]
    Save { code: u32, message: String },

    #[error("[{code}] Host error: {message}")]
    #[class(generic)]
    Host { code: u32, message: String },

    #[error("[{code}] Invalid params: {message}")]
    #[class(generic)]
    InvalidParams { code: u32, message: String },

    #[error("[{code}] Config error: {message}")]
    #[class(generic)]
    Config { code: u32, message: String },
}

impl ActivityError {
    pub fn already_running(message: impl Into<String>) -> Self {
        Self::AlreadyRunning {
            code: ActivityErrorCode::AlreadyRunning as u32,
            message: message.into(),
        }
    }

    pub fn unknown_request_type(request_type: impl Into<String>) -> Self {
        Self::UnknownRequestType {
            code: ActivityErrorCode::UnknownRequestType as u32,
            request_type: request_type.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            code: ActivityErrorCode::NotFound as u32,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            code: ActivityErrorCode::Parse as u32,
            message: message.into(),
        }
    }

    pub fn save(message: impl Into<String>) -> Self {
        Self::Save {
            code: ActivityErrorCode::Save as u32,
            message: message.into(),
        }
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::Host {
            code: ActivityErrorCode::Host as u32,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            code: ActivityErrorCode::InvalidParams as u32,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            code: ActivityErrorCode::Config as u32,
            message: message.into(),
        }
    }

    /// Numeric code carried by every variant.
    pub fn code(&self) -> u32 {
        match self {
            Self::AlreadyRunning { code, .. }
            | Self::UnknownRequestType { code, .. }
            | Self::NotFound { code, .. }
            | Self::Parse { code, .. }
            | Self::Save { code, .. }
            | Self::Host { code, .. }
            | Self::InvalidParams { code, .. }
            | Self::Config { code, .. } => *code,
        }
    }
}

impl From<toml::de::Error> for ActivityError {
    fn from(e: toml::de::Error) -> Self {
        Self::config(e.to_string())
    }
}

impl From<serde_json::Error> for ActivityError {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_params(e.to_string())
    }
}

impl From<std::io::Error> for ActivityError {
    fn from(e: std::io::Error) -> Self {
        Self::config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ActivityErrorCode::AlreadyRunning as u32, 9901);
        assert_eq!(ActivityErrorCode::UnknownRequestType as u32, 9902);
        assert_eq!(ActivityErrorCode::NotFound as u32, 9903);
        assert_eq!(ActivityErrorCode::Parse as u32, 9904);
        assert_eq!(ActivityErrorCode::Save as u32, 9905);
    }

    #[test]
    fn test_error_display() {
        let err = ActivityError::unknown_request_type("frobnicate");
        assert!(err.to_string().contains("9902"));
        assert!(err.to_string().contains("frobnicate"));

        let err = ActivityError::save("NETWORK_FAILED");
        assert_eq!(err.code(), 9905);
        assert!(err.to_string().contains("NETWORK_FAILED"));
    }
}

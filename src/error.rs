//! Ошибки работы с ускорителем

use thiserror::Error;

/// Ошибка одной из возможностей устройства
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("device allocation failed: {0}")]
    Allocation(String),
    #[error("host/device transfer failed: {0}")]
    Transfer(String),
    #[error("kernel launch rejected: {0}")]
    Launch(String),
    #[error("kernel execution failed: {0}")]
    Execution(String),
    #[error("device query failed: {0}")]
    Query(String),
}

impl DeviceError {
    /// Ошибки запроса свойств не прерывают работу, все остальные фатальны
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DeviceError::Query(_))
    }
}

/// Несовпадение размеров матриц на стороне хоста
#[derive(Error, Debug, Clone, PartialEq)]
#[error("matrix shape mismatch: {0}")]
pub struct ShapeError(pub String);

pub type Result<T> = std::result::Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_query_errors_are_recoverable() {
        assert!(!DeviceError::Query("no name".into()).is_fatal());
        assert!(DeviceError::Allocation("out of memory".into()).is_fatal());
        assert!(DeviceError::Transfer("short copy".into()).is_fatal());
        assert!(DeviceError::Launch("block too large".into()).is_fatal());
        assert!(DeviceError::Execution("fault".into()).is_fatal());
    }

    #[test]
    fn test_display_names_the_failed_capability() {
        let err = DeviceError::Allocation("1024 bytes".into());
        assert_eq!(err.to_string(), "device allocation failed: 1024 bytes");
    }

    #[test]
    fn test_shape_error_display() {
        let err = ShapeError("4x4 * 3x3".into());
        assert_eq!(err.to_string(), "matrix shape mismatch: 4x4 * 3x3");
    }
}

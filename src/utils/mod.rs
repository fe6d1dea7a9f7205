//! Device parsing and Candle error conversion helpers.

use crate::core::{ProcessingStage, SpotterError};
use candle_core::Device;

/// Parses a device string and creates a Candle [`Device`].
///
/// # Supported formats
///
/// - `"cpu"` → CPU device
/// - `"cuda"` or `"gpu"` → CUDA device 0
/// - `"cuda:N"` → CUDA device N (e.g., `"cuda:1"`)
///
/// # Errors
///
/// Returns an error if the device string is invalid, CUDA is requested but
/// the `cuda` feature is not enabled, or CUDA device creation fails.
pub fn parse_device(device_str: &str) -> Result<Device, SpotterError> {
    let device_str = device_str.to_lowercase();
    match device_str.as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => {
            #[cfg(feature = "cuda")]
            {
                Device::new_cuda(0).map_err(|e| SpotterError::ConfigError {
                    message: format!("Failed to create CUDA device: {}", e),
                })
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(cuda_not_enabled())
            }
        }
        s if s.starts_with("cuda:") => {
            #[cfg(feature = "cuda")]
            {
                let ordinal: usize = s.strip_prefix("cuda:").unwrap().parse().map_err(|_| {
                    SpotterError::ConfigError {
                        message: format!("Invalid CUDA device ordinal in '{}'", s),
                    }
                })?;
                Device::new_cuda(ordinal).map_err(|e| SpotterError::ConfigError {
                    message: format!("Failed to create CUDA device {}: {}", ordinal, e),
                })
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(cuda_not_enabled())
            }
        }
        _ => Err(SpotterError::ConfigError {
            message: format!(
                "Unknown device: '{}'. Use 'cpu', 'cuda', or 'cuda:N'",
                device_str
            ),
        }),
    }
}

#[cfg(not(feature = "cuda"))]
fn cuda_not_enabled() -> SpotterError {
    SpotterError::ConfigError {
        message: "CUDA support not enabled. Compile with --features cuda".to_string(),
    }
}

/// Convert a Candle error to a SpotterError for inference operations.
pub fn candle_to_spot_inference(
    model_name: &str,
    context: impl Into<String>,
    err: candle_core::Error,
) -> SpotterError {
    SpotterError::Inference {
        model_name: model_name.to_string(),
        context: context.into(),
        source: Box::new(err),
    }
}

/// Convert a Candle error to a SpotterError for processing operations.
pub fn candle_to_spot_processing(
    kind: ProcessingStage,
    context: impl Into<String>,
    err: candle_core::Error,
) -> SpotterError {
    SpotterError::Processing {
        kind,
        context: context.into(),
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_cpu() {
        assert!(matches!(parse_device("cpu"), Ok(Device::Cpu)));
        assert!(matches!(parse_device("CPU"), Ok(Device::Cpu)));
    }

    #[test]
    fn test_parse_device_unknown() {
        assert!(parse_device("npu").is_err());
    }
}

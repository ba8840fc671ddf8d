use std::fmt;

use crate::backend::{DeviceStatus, KernelId};

pub type Result<T> = std::result::Result<T, DispatchError>;

/// One rejected `set_kernel_arg` call inside a bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindFailure {
    pub stage: &'static str,
    pub kernel: KernelId,
    pub index: u32,
    pub status: DeviceStatus,
}

impl fmt::Display for BindFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (kernel {}) arg {}: {}",
            self.stage, self.kernel.0, self.index, self.status
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{call} failed: {status}")]
    Device {
        call: &'static str,
        status: DeviceStatus,
    },

    #[error("{} kernel argument bind(s) failed: {}", .failures.len(), join_failures(.failures))]
    BindFailed { failures: Vec<BindFailure> },

    #[error("failed to allocate {bytes} bytes for {what}: {status}")]
    ResourceExhausted {
        what: &'static str,
        bytes: u64,
        status: DeviceStatus,
    },

    #[error("work item does not fit algorithm '{algorithm}': {reason}")]
    ProtocolMismatch { algorithm: String, reason: String },

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl DispatchError {
    pub(crate) fn device(call: &'static str, status: DeviceStatus) -> Self {
        Self::Device { call, status }
    }

    pub(crate) fn mismatch(algorithm: &str, reason: impl Into<String>) -> Self {
        Self::ProtocolMismatch {
            algorithm: algorithm.to_string(),
            reason: reason.into(),
        }
    }

    /// Status code a C-style caller would have seen for this failure.
    pub fn status(&self) -> Option<DeviceStatus> {
        match self {
            Self::Device { status, .. } | Self::ResourceExhausted { status, .. } => Some(*status),
            Self::BindFailed { failures } => failures.first().map(|failure| failure.status),
            Self::ProtocolMismatch { .. } | Self::LockPoisoned(_) => None,
        }
    }
}

fn join_failures(failures: &[BindFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_failed_lists_every_failure() {
        let err = DispatchError::BindFailed {
            failures: vec![
                BindFailure {
                    stage: "blake",
                    kernel: KernelId(0),
                    index: 1,
                    status: DeviceStatus(-38),
                },
                BindFailure {
                    stage: "echo",
                    kernel: KernelId(10),
                    index: 2,
                    status: DeviceStatus(-51),
                },
            ],
        };
        let message = err.to_string();
        assert!(message.starts_with("2 kernel argument bind(s) failed"));
        assert!(message.contains("blake (kernel 0) arg 1"));
        assert!(message.contains("echo (kernel 10) arg 2"));
        assert_eq!(err.status(), Some(DeviceStatus(-38)));
    }

    #[test]
    fn protocol_mismatch_has_no_device_status() {
        let err = DispatchError::mismatch("tribus", "missing 128-byte midstate");
        assert_eq!(err.status(), None);
        assert!(format!("{err}").contains("tribus"));
    }
}

//! Error types for the discovery, probing and alerting engine.
//!
//! Probe and resolution paths never surface errors: an unreachable host is
//! `false`, an unresolvable name is `None`. The variants here cover malformed
//! input, the concurrent-sweep conflict and store failures.

/// Errors returned by `lancontrol-core` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input could not be normalized to six hex byte pairs.
    #[error("invalid hardware address: {0}")]
    InvalidMac(String),

    /// Input is not a usable IPv4 address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Input is not a sweepable CIDR range.
    #[error("invalid address range: {0}")]
    InvalidRange(String),

    /// A full sweep is already running; the request is rejected, not queued.
    #[error("a network sweep is already in progress")]
    ScanInProgress,

    /// No device with this id exists in the store.
    #[error("device {0} not found")]
    DeviceNotFound(u64),

    /// A system tool or kernel table the operation needs is missing or
    /// refused the request.
    #[error("{source_name} unavailable: {detail}")]
    Unavailable {
        source_name: &'static str,
        detail: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure reported by the device store.
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

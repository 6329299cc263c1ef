use std::fmt;

/// Opaque identifier correlating an issued asynchronous operation with its completion.
///
/// The device layer picks the value (typically the address or index of its per-operation
/// descriptor); the bridge only compares tokens for equality.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationToken(pub usize);

impl fmt::Display for OperationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Outcome of one completed asynchronous operation, as reported by the completion port.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CompletionRecord {
    /// Number of bytes the operation transferred.
    pub bytes_transferred: u64,
    /// Platform error code, 0 on success.
    pub error_code: u32,
    /// Token of the operation that completed.
    pub token: OperationToken,
}

impl CompletionRecord {
    /// Creates a new completion record.
    pub fn new(bytes_transferred: u64, error_code: u32, token: OperationToken) -> Self {
        Self { bytes_transferred, error_code, token }
    }

    /// Returns true if the platform reported no error.
    pub fn is_success(&self) -> bool {
        self.error_code == 0
    }
}

use crate::device::DeviceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("Partition or block not found")]
    NotFound,

    #[error("Partition image does not start with the KATANA_FLASH____ magic")]
    CorruptImage,

    #[error("Partition length mismatch: device reports {expected} bytes, image has {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Invalid rewrite range: {initial_len} bytes requested for a {len} byte partition")]
    InvalidRange { initial_len: usize, len: usize },

    #[error("Partition {0} cannot be erased or rewritten")]
    InvalidPartition(u8),

    #[error("Could not allocate a {0} byte partition buffer")]
    AllocationFailure(usize),

    #[error("Invalid partition length: {0} (must be a multiple of 64 with room for header and bitmap)")]
    InvalidLength(usize),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FlashError>;

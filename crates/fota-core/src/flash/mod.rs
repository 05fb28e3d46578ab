//! Flash device abstraction.
//!
//! Defines the `FlashDevice` trait for the raw flash driver the update
//! pipeline writes through, allowing different implementations (on-target
//! driver bindings, in-memory simulation for host testing).

use thiserror::Error;

pub mod block;
pub mod sim;

pub use block::{BlockWriter, BLOCK_SIZE};
pub use sim::SimFlash;

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("Access out of bounds: offset=0x{offset:08X} len={len}")]
    OutOfBounds { offset: usize, len: usize },

    #[error("Write to non-erased region at offset 0x{offset:08X}")]
    NotErased { offset: usize },

    #[error("Write protection is enabled")]
    WriteProtected,

    #[error("Verify mismatch at offset 0x{offset:08X}, index {index}")]
    VerifyMismatch { offset: usize, index: usize },

    #[error("Flash I/O failed: {0}")]
    Io(String),
}

/// Abstract raw flash driver interface.
///
/// Erase and write must be bracketed by `set_write_protection(false)` /
/// `set_write_protection(true)` by the caller, matching the driver contract
/// of the target platform.
pub trait FlashDevice: Send {
    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Erase the region `[offset, offset + len)`.
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError>;

    /// Write `data` starting at `offset`. The region must have been erased.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError>;

    /// Enable or disable write protection.
    fn set_write_protection(&mut self, enable: bool);

    /// Total device capacity in bytes.
    fn capacity(&self) -> usize;
}

/// Fixed flash regions used by the update pipeline.
///
/// The application state region holds the persisted update counter pair;
/// the secondary bank is the download target and must be sized equal to
/// the primary application image.
#[derive(Debug, Clone, Copy)]
pub struct FlashLayout {
    /// Offset of the application state region.
    pub state_offset: usize,
    /// Size of the application state region.
    pub state_size: usize,
    /// Offset of the secondary image bank.
    pub bank_offset: usize,
    /// Size of the secondary image bank.
    pub bank_size: usize,
}

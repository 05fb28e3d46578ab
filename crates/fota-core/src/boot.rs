//! Bootloader collaborator interface.
//!
//! The bank-swap mechanism itself lives in the bootloader; the update
//! client only marks the secondary bank for swap, confirms the running
//! image after a successful boot, and reads bank headers for version
//! reporting.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::flash::{FlashDevice, FlashError};

/// Magic value at the start of a bootable image header.
pub const IMAGE_MAGIC: u32 = 0x96f3b83d;

/// Byte offset of the version field within the image header.
const VERSION_OFFSET: usize = 20;

/// Minimum header prefix needed to extract magic and version.
const HEADER_PREFIX_LEN: usize = 28;

#[derive(Error, Debug)]
pub enum BootError {
    #[error("No valid image header found")]
    InvalidImage,

    #[error("Flash access failed: {0}")]
    Flash(#[from] FlashError),

    #[error("Bootloader request failed: {0}")]
    RequestFailed(String),
}

/// Semantic version from an image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u16,
    pub build_num: u32,
}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}+{}",
            self.major, self.minor, self.revision, self.build_num
        )
    }
}

/// Parse the version out of the image header at `offset`, if the magic
/// checks out.
pub fn read_image_version(
    flash: &mut dyn FlashDevice,
    offset: usize,
) -> Result<ImageVersion, BootError> {
    let mut raw = [0u8; HEADER_PREFIX_LEN];
    flash.read(offset, &mut raw)?;

    if LittleEndian::read_u32(&raw[0..4]) != IMAGE_MAGIC {
        return Err(BootError::InvalidImage);
    }

    Ok(ImageVersion {
        major: raw[VERSION_OFFSET],
        minor: raw[VERSION_OFFSET + 1],
        revision: LittleEndian::read_u16(&raw[VERSION_OFFSET + 2..VERSION_OFFSET + 4]),
        build_num: LittleEndian::read_u32(&raw[VERSION_OFFSET + 4..VERSION_OFFSET + 8]),
    })
}

/// Abstract bootloader interface.
///
/// Production implementations bind the target's boot vector and image
/// trailer handling; tests record the calls.
pub trait Bootloader: Send {
    /// Read the image header at the given bank offset.
    fn read_bank_header(&mut self, offset: usize) -> Result<ImageVersion, BootError>;

    /// Whether the currently running image has been confirmed good.
    fn is_image_confirmed(&mut self) -> bool;

    /// Confirm the currently running image, ending a pending swap.
    fn confirm_image(&mut self) -> Result<(), BootError>;

    /// Mark the secondary bank for swap on the next boot.
    fn request_upgrade(&mut self) -> Result<(), BootError>;

    /// Invalidate the secondary bank contents.
    fn erase_secondary_bank(&mut self) -> Result<(), BootError>;
}

/// Platform restart hook, used for both the post-install handoff to the
/// bootloader and the fail-safe reboot.
pub trait Reboot: Send {
    fn reboot(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::SimFlash;

    #[test]
    fn test_read_image_version() {
        let mut flash = SimFlash::new(0x1000);
        let mut header = [0u8; HEADER_PREFIX_LEN];
        LittleEndian::write_u32(&mut header[0..4], IMAGE_MAGIC);
        header[20] = 1;
        header[21] = 4;
        LittleEndian::write_u16(&mut header[22..24], 9);
        LittleEndian::write_u32(&mut header[24..28], 77);

        flash.set_write_protection(false);
        flash.write(0x200, &header).unwrap();
        flash.set_write_protection(true);

        let version = read_image_version(&mut flash, 0x200).unwrap();
        assert_eq!(
            version,
            ImageVersion {
                major: 1,
                minor: 4,
                revision: 9,
                build_num: 77
            }
        );
        assert_eq!(version.to_string(), "1.4.9+77");
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut flash = SimFlash::new(0x1000);
        assert!(matches!(
            read_image_version(&mut flash, 0),
            Err(BootError::InvalidImage)
        ));
    }
}

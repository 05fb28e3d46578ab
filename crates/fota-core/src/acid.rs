//! Persisted update counter pair.
//!
//! A fixed 8-byte record of two little-endian signed 32-bit action
//! identifiers lives in the application state flash region: `current` is
//! the action id of the image confirmed running, `update` the action id
//! most recently attempted. It is the only durable state surviving a
//! reboot, and the basis for judging update outcomes across them.

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::flash::{FlashDevice, FlashError, FlashLayout};

/// Sentinel for "no action id recorded".
pub const ACID_UNSET: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAcid {
    pub current: i32,
    pub update: i32,
}

impl DeviceAcid {
    pub const RECORD_SIZE: usize = 8;

    fn from_bytes(raw: &[u8]) -> Self {
        Self {
            current: LittleEndian::read_i32(&raw[0..4]),
            update: LittleEndian::read_i32(&raw[4..8]),
        }
    }

    fn to_bytes(self) -> [u8; Self::RECORD_SIZE] {
        let mut raw = [0u8; Self::RECORD_SIZE];
        LittleEndian::write_i32(&mut raw[0..4], self.current);
        LittleEndian::write_i32(&mut raw[4..8], self.update);
        raw
    }
}

/// Which field of the record to overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcidField {
    Current,
    Update,
}

/// Reader/writer for the counter record in the application state region.
pub struct AcidStore {
    offset: usize,
    size: usize,
}

impl AcidStore {
    pub fn new(layout: &FlashLayout) -> Self {
        Self {
            offset: layout.state_offset,
            size: layout.state_size,
        }
    }

    pub fn read(&self, flash: &mut dyn FlashDevice) -> Result<DeviceAcid, FlashError> {
        let mut raw = [0u8; DeviceAcid::RECORD_SIZE];
        flash.read(self.offset, &mut raw)?;
        Ok(DeviceAcid::from_bytes(&raw))
    }

    /// Overwrite one field via read-modify-write.
    ///
    /// The store has no partial-update primitive: the whole region is
    /// erased and the full record rewritten. A power loss between the
    /// erase and the rewrite loses the record; this matches the persisted
    /// layout contract and is deliberately not papered over here.
    pub fn write_field(
        &self,
        flash: &mut dyn FlashDevice,
        field: AcidField,
        value: i32,
    ) -> Result<(), FlashError> {
        let mut acid = self.read(flash)?;
        match field {
            AcidField::Current => acid.current = value,
            AcidField::Update => acid.update = value,
        }

        flash.set_write_protection(false);
        let erased = flash.erase(self.offset, self.size);
        flash.set_write_protection(true);
        erased?;

        flash.set_write_protection(false);
        let written = flash.write(self.offset, &acid.to_bytes());
        flash.set_write_protection(true);
        written?;

        debug!(current = acid.current, update = acid.update, "ACID record updated");
        Ok(())
    }
}

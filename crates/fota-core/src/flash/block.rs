//! Block-buffered flash writer with read-back verification.
//!
//! Incoming byte ranges are staged into a fixed-size block buffer; whenever
//! the buffer would overflow, one full block is written out and read back
//! for a byte compare. A final call with `finished` pads the remainder with
//! zeros and flushes it. One writer instance serves one install.

use tracing::error;

use super::{FlashDevice, FlashError};

/// Flash write granularity of the staging buffer.
pub const BLOCK_SIZE: usize = 512;

pub struct BlockWriter {
    buf: [u8; BLOCK_SIZE],
    /// Valid bytes currently staged; always < BLOCK_SIZE between calls.
    fill: usize,
    /// Logical bytes written to flash so far, excluding padding.
    written: usize,
    /// Latched after a write or verify failure; further calls are refused.
    failed: bool,
}

impl BlockWriter {
    pub fn new() -> Self {
        Self {
            buf: [0u8; BLOCK_SIZE],
            fill: 0,
            written: 0,
            failed: false,
        }
    }

    /// Total logical bytes written to flash, excluding zero padding.
    pub fn bytes_written(&self) -> usize {
        self.written
    }

    /// Stage `data` for writing at `offset + bytes_written`, flushing full
    /// blocks as the staging buffer fills. When `finished` is set, any
    /// partial remainder is zero-padded to a full block and written out.
    pub fn write(
        &mut self,
        flash: &mut dyn FlashDevice,
        offset: usize,
        data: &[u8],
        finished: bool,
    ) -> Result<(), FlashError> {
        if self.failed {
            return Err(FlashError::Io("writer halted after previous failure".into()));
        }

        // Flush whenever a full block's worth is available, so the staged
        // count stays strictly below BLOCK_SIZE between calls.
        let mut processed = 0;
        while data.len() - processed >= BLOCK_SIZE - self.fill {
            let take = BLOCK_SIZE - self.fill;
            self.buf[self.fill..].copy_from_slice(&data[processed..processed + take]);

            self.flush_block(flash, offset)?;
            self.written += BLOCK_SIZE;
            processed += take;
            self.fill = 0;
        }

        if processed < data.len() {
            let rest = data.len() - processed;
            self.buf[self.fill..self.fill + rest].copy_from_slice(&data[processed..]);
            self.fill += rest;
        }

        if finished && self.fill > 0 {
            self.buf[self.fill..].fill(0);
            self.flush_block(flash, offset)?;
            self.written += self.fill;
            self.fill = 0;
        }

        Ok(())
    }

    /// Write the staging buffer as one full block and verify it by reading
    /// the same region back. The write offset accounts only for logical
    /// bytes, so a padded final block starts where the last one ended.
    fn flush_block(
        &mut self,
        flash: &mut dyn FlashDevice,
        offset: usize,
    ) -> Result<(), FlashError> {
        let block_offset = offset + self.written;

        flash.set_write_protection(false);
        let result = flash.write(block_offset, &self.buf);
        flash.set_write_protection(true);
        if let Err(e) = result {
            error!(offset = format!("0x{:08X}", block_offset), error = %e, "flash write failed");
            self.failed = true;
            return Err(e);
        }

        if let Err(e) = self.verify_block(flash, block_offset) {
            self.failed = true;
            return Err(e);
        }

        Ok(())
    }

    fn verify_block(
        &self,
        flash: &mut dyn FlashDevice,
        block_offset: usize,
    ) -> Result<(), FlashError> {
        let mut check = [0u8; BLOCK_SIZE];
        flash.read(block_offset, &mut check)?;

        for (index, (written, read)) in self.buf.iter().zip(check.iter()).enumerate() {
            if written != read {
                error!(
                    offset = format!("0x{:08X}", block_offset),
                    index, "read-back verify failed"
                );
                return Err(FlashError::VerifyMismatch {
                    offset: block_offset,
                    index,
                });
            }
        }
        Ok(())
    }
}

impl Default for BlockWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::SimFlash;

    const BANK: usize = 0x1000;

    fn erased_flash() -> SimFlash {
        SimFlash::new(0x4000)
    }

    #[test]
    fn test_small_writes_stay_staged() {
        let mut flash = erased_flash();
        let mut writer = BlockWriter::new();

        writer.write(&mut flash, BANK, &[0xAA; 100], false).unwrap();
        writer.write(&mut flash, BANK, &[0xBB; 100], false).unwrap();

        // Nothing flushed yet: less than one block staged.
        assert_eq!(writer.bytes_written(), 0);
        assert_eq!(flash.contents(BANK, 4), &[0xFF; 4]);
    }

    #[test]
    fn test_full_blocks_flushed_and_counted() {
        let mut flash = erased_flash();
        let mut writer = BlockWriter::new();

        let data = vec![0x5A; BLOCK_SIZE * 2 + 10];
        writer.write(&mut flash, BANK, &data, false).unwrap();

        assert_eq!(writer.bytes_written(), BLOCK_SIZE * 2);
        assert_eq!(flash.contents(BANK, BLOCK_SIZE * 2), &data[..BLOCK_SIZE * 2]);
        // The 10-byte remainder is staged, not written.
        assert_eq!(flash.contents(BANK + BLOCK_SIZE * 2, 10), &[0xFF; 10]);
    }

    #[test]
    fn test_finish_pads_and_excludes_padding_from_count() {
        let mut flash = erased_flash();
        let mut writer = BlockWriter::new();

        writer.write(&mut flash, BANK, &[0x11; 700], false).unwrap();
        writer.write(&mut flash, BANK, &[0x22; 44], true).unwrap();

        // 700 + 44 logical bytes; padding does not count.
        assert_eq!(writer.bytes_written(), 744);
        assert_eq!(flash.contents(BANK, BLOCK_SIZE), &[0x11; BLOCK_SIZE][..]);
        assert_eq!(flash.contents(BANK + 700, 44), &[0x22; 44][..]);
        // Pad bytes after the logical end are zero.
        assert_eq!(flash.contents(BANK + 744, BLOCK_SIZE * 2 - 744), &vec![0u8; BLOCK_SIZE * 2 - 744][..]);
    }

    #[test]
    fn test_finish_with_empty_stage_writes_nothing() {
        let mut flash = erased_flash();
        let mut writer = BlockWriter::new();

        let data = vec![0x33; BLOCK_SIZE];
        writer.write(&mut flash, BANK, &data, false).unwrap();
        writer.write(&mut flash, BANK, &[], true).unwrap();

        assert_eq!(writer.bytes_written(), BLOCK_SIZE);
    }

    #[test]
    fn test_verify_mismatch_halts_session() {
        let mut flash = erased_flash();
        let mut writer = BlockWriter::new();

        flash.inject_read_fault(BANK + 17, 0x80);

        let data = vec![0x44; BLOCK_SIZE + 1];
        let err = writer.write(&mut flash, BANK, &data, false).unwrap_err();
        assert!(matches!(err, FlashError::VerifyMismatch { index: 17, .. }));

        // The session is halted: even a clean follow-up write is refused.
        flash.clear_read_fault();
        assert!(writer.write(&mut flash, BANK, &[0x55; 4], false).is_err());
    }

    #[test]
    fn test_accumulated_count_over_mixed_writes() {
        let mut flash = erased_flash();
        let mut writer = BlockWriter::new();

        let chunks: [&[u8]; 4] = [&[1; 333], &[2; 512], &[3; 7], &[4; 129]];
        for chunk in &chunks[..3] {
            writer.write(&mut flash, BANK, chunk, false).unwrap();
        }
        writer.write(&mut flash, BANK, chunks[3], true).unwrap();

        assert_eq!(writer.bytes_written(), 333 + 512 + 7 + 129);
    }
}

//! In-memory simulated NOR flash for host runs and unit testing.
//!
//! Models the properties the update pipeline depends on: erased bytes read
//! as 0xFF, writes are only legal into erased regions, and erase/write
//! require write protection to be lifted first. A read-fault hook allows
//! tests to corrupt the read-back path and exercise verify failures.

use super::{FlashDevice, FlashError};

pub struct SimFlash {
    mem: Vec<u8>,
    write_protected: bool,
    /// Fault injection: XOR this mask into the byte at the given absolute
    /// offset on every read.
    read_fault: Option<(usize, u8)>,
}

impl SimFlash {
    pub fn new(capacity: usize) -> Self {
        Self {
            mem: vec![0xFF; capacity],
            write_protected: true,
            read_fault: None,
        }
    }

    /// Corrupt the read-back path: reads covering `offset` will see the
    /// stored byte XORed with `mask`.
    pub fn inject_read_fault(&mut self, offset: usize, mask: u8) {
        self.read_fault = Some((offset, mask));
    }

    pub fn clear_read_fault(&mut self) {
        self.read_fault = None;
    }

    /// Direct view of the backing memory, for test assertions.
    pub fn contents(&self, offset: usize, len: usize) -> &[u8] {
        &self.mem[offset..offset + len]
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<(), FlashError> {
        if len > self.mem.len() || offset > self.mem.len() - len {
            return Err(FlashError::OutOfBounds { offset, len });
        }
        Ok(())
    }
}

impl FlashDevice for SimFlash {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check_bounds(offset, buf.len())?;
        buf.copy_from_slice(&self.mem[offset..offset + buf.len()]);
        if let Some((fault_offset, mask)) = self.read_fault {
            if fault_offset >= offset && fault_offset < offset + buf.len() {
                buf[fault_offset - offset] ^= mask;
            }
        }
        Ok(())
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError> {
        self.check_bounds(offset, len)?;
        if self.write_protected {
            return Err(FlashError::WriteProtected);
        }
        self.mem[offset..offset + len].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        self.check_bounds(offset, data.len())?;
        if self.write_protected {
            return Err(FlashError::WriteProtected);
        }
        for (i, &byte) in data.iter().enumerate() {
            if self.mem[offset + i] != 0xFF {
                return Err(FlashError::NotErased { offset: offset + i });
            }
            self.mem[offset + i] = byte;
        }
        Ok(())
    }

    fn set_write_protection(&mut self, enable: bool) {
        self.write_protected = enable;
    }

    fn capacity(&self) -> usize {
        self.mem.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_erased_as_ff() {
        let mut flash = SimFlash::new(1024);
        let mut buf = [0u8; 16];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 16]);
    }

    #[test]
    fn test_write_requires_unprotect() {
        let mut flash = SimFlash::new(1024);
        assert!(matches!(
            flash.write(0, b"data"),
            Err(FlashError::WriteProtected)
        ));

        flash.set_write_protection(false);
        flash.write(0, b"data").unwrap();
        flash.set_write_protection(true);

        let mut buf = [0u8; 4];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"data");
    }

    #[test]
    fn test_rewrite_without_erase_fails() {
        let mut flash = SimFlash::new(1024);
        flash.set_write_protection(false);
        flash.write(0, b"aa").unwrap();
        assert!(matches!(
            flash.write(0, b"bb"),
            Err(FlashError::NotErased { .. })
        ));
        flash.erase(0, 16).unwrap();
        flash.write(0, b"bb").unwrap();
    }

    #[test]
    fn test_read_fault_injection() {
        let mut flash = SimFlash::new(1024);
        flash.set_write_protection(false);
        flash.write(8, &[0x55; 8]).unwrap();

        flash.inject_read_fault(10, 0x01);
        let mut buf = [0u8; 8];
        flash.read(8, &mut buf).unwrap();
        assert_eq!(buf[1], 0x55);
        assert_eq!(buf[2], 0x54);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut flash = SimFlash::new(64);
        let mut buf = [0u8; 16];
        assert!(matches!(
            flash.read(56, &mut buf),
            Err(FlashError::OutOfBounds { .. })
        ));
    }
}

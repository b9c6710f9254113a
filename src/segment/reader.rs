//! Segment Reader
//!
//! Exact byte-range access to one segment file.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{DriftError, Result};

use super::SegmentId;

/// Read handle on a single segment file
///
/// The length is captured at open time; every range handed out by the index
/// was fully written before it was published, so it lies inside that length.
pub struct SegmentReader {
    id: SegmentId,
    file: File,
    len: u64,
}

impl SegmentReader {
    /// Open a segment file for reading
    pub fn open(path: &Path, id: SegmentId) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { id, file, len })
    }

    /// Segment id this reader is bound to
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// File length at open time
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the file was empty at open time
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read exactly `size` bytes starting at `offset`
    ///
    /// A single `read` may return fewer bytes than asked, so this loops.
    pub fn read_range(&mut self, offset: u64, size: u32) -> Result<Vec<u8>> {
        self.check_range(offset, size)?;
        self.file.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(DriftError::invariant(format!(
                        "segment {} ended after {} of {} bytes at offset {}",
                        self.id, filled, size, offset
                    )))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(buf)
    }

    /// Copy exactly `size` bytes starting at `offset` into `dst`
    ///
    /// Loops until the whole range has moved; one copy call may move less.
    pub fn transfer_range<W: Write + ?Sized>(
        &mut self,
        offset: u64,
        size: u32,
        dst: &mut W,
    ) -> Result<()> {
        self.check_range(offset, size)?;
        self.file.seek(SeekFrom::Start(offset))?;

        let mut remaining = u64::from(size);
        while remaining > 0 {
            let copied = io::copy(&mut (&mut self.file).take(remaining), dst)?;
            if copied == 0 {
                return Err(DriftError::invariant(format!(
                    "segment {} ended with {} bytes left to copy from offset {}",
                    self.id, remaining, offset
                )));
            }
            remaining -= copied;
        }

        Ok(())
    }

    fn check_range(&self, offset: u64, size: u32) -> Result<()> {
        let end = offset.checked_add(u64::from(size));
        match end {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(DriftError::invariant(format!(
                "range {}+{} exceeds segment {} length {}",
                offset, size, self.id, self.len
            ))),
        }
    }
}

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::{Buffer, BufferError};

/// Sequential reads over a plain (not chunk-compressed) component file.
///
/// Keeps a growable scratch so `read_bytes` can hand out one contiguous
/// borrowed slice regardless of the request size.
pub struct UncompressedBuffer {
    path: PathBuf,
    reader: BufReader<File>,
    scratch: Vec<u8>,
    /// Logical cursor, tracked so `duplicate` can reopen at the same spot.
    position: u64,
    eof: bool,
}

impl UncompressedBuffer {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BufferError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            scratch: Vec::new(),
            position: 0,
            eof: false,
        })
    }

    /// An independent handle over the same file at the same position.
    pub fn duplicate(&self) -> Result<Self, BufferError> {
        let mut dup = Self::open(&self.path)?;
        dup.seek(self.position as i64);
        dup.eof = self.eof;
        Ok(dup)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Buffer for UncompressedBuffer {
    fn read_bytes(&mut self, n: usize) -> Option<&[u8]> {
        if self.scratch.len() < n {
            self.scratch.resize(n, 0);
        }
        match self.reader.read_exact(&mut self.scratch[..n]) {
            Ok(()) => {
                self.position += n as u64;
                Some(&self.scratch[..n])
            }
            Err(_) => {
                self.eof = true;
                None
            }
        }
    }

    fn skip_bytes(&mut self, n: usize) {
        if self.reader.seek_relative(n as i64).is_ok() {
            self.position += n as u64;
        } else {
            self.eof = true;
        }
    }

    fn seek(&mut self, position: i64) {
        match self.reader.seek(SeekFrom::Start(position as u64)) {
            Ok(pos) => {
                self.position = pos;
                self.eof = false;
            }
            Err(_) => self.eof = true,
        }
    }

    fn is_eof(&self) -> bool {
        self.eof
    }
}

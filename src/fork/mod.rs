//! File Fork Domain
//!
//! Positioned reads against an already-open track file, plus the layout of the
//! audio data inside it.

pub mod aifc;

pub use aifc::{locate_ssnd, open_track};

use std::io::{self, Read, Seek, SeekFrom};

/// Positioned reads against an open file fork
///
/// `read_at` fills as much of `buf` as the fork holds from `offset` on. A
/// count shorter than `buf.len()` means the end of the fork was reached.
pub trait ForkReader: Send {
    /// Read into `buf` starting at absolute byte `offset`
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: Read + Seek + Send> ForkReader for T {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

/// Where the PCM audio lives inside a track file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackLayout {
    /// Absolute offset of the first audio byte
    pub data_offset: u64,
    /// Number of audio bytes
    pub data_length: u64,
}

impl TrackLayout {
    /// Layout for a fork that is nothing but audio data
    pub fn raw(data_length: u64) -> Self {
        TrackLayout {
            data_offset: 0,
            data_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_at_full_and_short() {
        let mut fork = Cursor::new((0u8..100).collect::<Vec<u8>>());

        let mut buf = [0u8; 10];
        assert_eq!(fork.read_at(20, &mut buf).unwrap(), 10);
        assert_eq!(buf[0], 20);
        assert_eq!(buf[9], 29);

        let mut tail = [0xFFu8; 10];
        assert_eq!(fork.read_at(95, &mut tail).unwrap(), 5);
        assert_eq!(&tail[..5], &[95, 96, 97, 98, 99]);
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let mut fork = Cursor::new(vec![1u8; 8]);
        let mut buf = [0u8; 4];
        assert_eq!(fork.read_at(64, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_raw_layout() {
        let layout = TrackLayout::raw(4704);
        assert_eq!(layout.data_offset, 0);
        assert_eq!(layout.data_length, 4704);
    }
}

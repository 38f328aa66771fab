//! File reader with an optional read-ahead ring buffer in front of it.
//!
//! The reader pulls large spans from the file into the ring and serves
//! decoder reads from there, growing the ring toward the number of bytes
//! still left in the file (bounded by the ring's own max). Seeking resets
//! the ring; callers that want the look-ahead warm again call `prefill`.

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::Rc;

use crate::ringbuffer::RingBuffer;
use crate::AudioError;

pub type SharedRing = Rc<RefCell<RingBuffer>>;

pub struct CachedReader {
    file: File,
    ring: Option<SharedRing>,
    pos: u64,
    file_size: u64,
}

impl CachedReader {
    pub fn open(
        path: &Path,
        ring: Option<SharedRing>,
        file_size: u64,
    ) -> Result<CachedReader, AudioError> {
        let file = File::open(path)?;
        if let Some(rb) = &ring {
            rb.borrow_mut().reset();
        }
        Ok(CachedReader {
            file,
            ring,
            pos: 0,
            file_size,
        })
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn bytes_left(&self) -> u64 {
        self.file_size.saturating_sub(self.pos)
    }

    /// Reposition the file and drop the buffered look-ahead.
    pub fn seek_to(&mut self, pos: u64) -> Result<(), AudioError> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.pos = pos;
        if let Some(rb) = &self.ring {
            rb.borrow_mut().reset();
        }
        Ok(())
    }

    /// Grow the ring toward the bytes still left in the file.
    fn ensure_target(&self) {
        let Some(rb) = &self.ring else { return };
        let mut rb = rb.borrow_mut();

        let remaining = self.bytes_left() as usize;
        let target = remaining.min(rb.max());
        let live = rb.len();
        if target > live {
            let _ = rb.ensure_write(target - live);
        }
    }

    /// Fill the ring to capacity from the current file position.
    pub fn prefill(&mut self) {
        let Some(ring) = self.ring.clone() else {
            return;
        };
        self.ensure_target();

        loop {
            let mut rb = ring.borrow_mut();
            if rb.len() >= rb.capacity() {
                break;
            }
            let span = rb.write_span();
            if span.is_empty() {
                break;
            }
            let got = match self.file.read(span) {
                Ok(n) => n,
                Err(_) => break,
            };
            if got == 0 {
                break;
            }
            if rb.produce(got).is_err() {
                break;
            }
        }
    }

    /// Read up to `out.len()` bytes, going through the ring when present.
    pub fn read_some(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let Some(ring) = self.ring.clone() else {
            let n = self.file.read(out)?;
            self.pos += n as u64;
            return Ok(n);
        };

        self.ensure_target();

        let mut off = 0;
        while off < out.len() {
            let mut rb = ring.borrow_mut();

            let take = {
                let have = rb.peek();
                if have.is_empty() {
                    0
                } else {
                    let take = (out.len() - off).min(have.len());
                    out[off..off + take].copy_from_slice(&have[..take]);
                    take
                }
            };
            if take > 0 {
                rb.consume(take);
                off += take;
                continue;
            }

            if rb.ensure_write(1).is_err() {
                break;
            }
            let span = rb.write_span();
            if span.is_empty() {
                // Free space exists but is fragmented away; force a grow.
                let half = rb.capacity() / 2;
                if rb.ensure_write(half).is_err() {
                    break;
                }
                continue;
            }
            let got = self.file.read(span)?;
            if got == 0 {
                break;
            }
            if rb.produce(got).is_err() {
                break;
            }
        }

        self.pos += off as u64;
        Ok(off)
    }

    /// Read exactly `out.len()` bytes or fail with `IoShortRead`.
    pub fn read_exact_buf(&mut self, out: &mut [u8]) -> Result<(), AudioError> {
        let mut off = 0;
        while off < out.len() {
            let n = self.read_some(&mut out[off..])?;
            if n == 0 {
                return Err(AudioError::IoShortRead);
            }
            off += n;
        }
        Ok(())
    }
}

impl Read for CachedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read_some(buf)
    }
}

impl Seek for CachedReader {
    /// Seek clamps into `[0, file_size]`, resets the ring and refills it, the
    /// same contract the decoder-facing virtual I/O layer needs.
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let base = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(d) => self.pos as i64 + d,
            SeekFrom::End(d) => self.file_size as i64 + d,
        };
        let new_pos = base.clamp(0, self.file_size as i64) as u64;

        self.file.seek(SeekFrom::Start(new_pos))?;
        self.pos = new_pos;
        if self.ring.is_some() {
            if let Some(rb) = &self.ring {
                rb.borrow_mut().reset();
            }
            self.prefill();
        }
        Ok(self.pos)
    }
}

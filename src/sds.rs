//! Stream Data Buffer (SDS) — word-quantized, single-writer / multi-reader
//! ring buffer (SPEC_FULL.md §4.1). Used for live microphone capture.
//!
//! Cursors are word indices (`u64`), monotonically increasing; the ring
//! position is always `cursor % data_size_words`. Word-sized cursor updates
//! are done under a single buffer mutex rather than lock-free atomics — the
//! teacher's concurrency primitives are `std::sync::Mutex`-based throughout
//! (see `crypto/ack_state.rs`, `crypto/replay_cache.rs`), and the invariant
//! that matters here (oldest-cursor recomputation races with backward seeks)
//! is naturally satisfied by a single lock rather than a finer-grained one.

use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdsError {
    #[error("would block")]
    WouldBlock,
    #[error("reader overrun")]
    Overrun,
    #[error("closed")]
    Closed,
    #[error("writer replaced")]
    WriterReplaced,
    #[error("a writer already exists")]
    WriterExists,
    #[error("a reader already exists at that id")]
    ReaderExists,
    #[error("too many readers")]
    TooManyReaders,
    #[error("unknown reader id")]
    UnknownReader,
    #[error("invalid word size")]
    InvalidWordSize,
}

pub type Result<T> = std::result::Result<T, SdsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterPolicy {
    Nonblockable,
    Nonblocking,
    AllOrNothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderPolicy {
    Nonblocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekReference {
    Absolute,
    BeforeReads,
    AfterWrites,
}

struct ReaderState {
    enabled: bool,
    cursor: u64,
    close_index: Option<u64>,
}

struct Inner {
    data: Vec<u8>,
    word_size: usize,
    data_size_words: u64,
    write_start_cursor: u64,
    write_end_cursor: u64,
    oldest_unconsumed_cursor: u64,
    writer_generation: u64,
    writer_alive: bool,
    writer_closed: bool,
    readers: Vec<ReaderState>,
    max_readers: usize,
}

impl Inner {
    fn word_index(&self, cursor: u64) -> u64 {
        cursor % self.data_size_words
    }

    /// `oldestUnconsumedCursor` is the slowest enabled reader's cursor,
    /// clamped up to the physical floor of the ring (`writeStartCursor -
    /// dataSize`): data older than that floor has already been overwritten
    /// regardless of what any reader's own cursor says. A reader whose
    /// cursor sits below the clamped floor is, by definition, in overrun —
    /// its next read reports `SdsError::Overrun` rather than being silently
    /// fast-forwarded.
    fn recompute_oldest_unconsumed(&mut self) {
        let min = self
            .readers
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.cursor)
            .min()
            .unwrap_or(self.write_start_cursor);
        let floor = self.write_start_cursor.saturating_sub(self.data_size_words);
        self.oldest_unconsumed_cursor = min.max(floor);
    }

    fn copy_into_ring(&mut self, start_cursor: u64, bytes: &[u8]) {
        let words = bytes.len() / self.word_size;
        let mut word_idx = self.word_index(start_cursor);
        let mut src = 0usize;
        for _ in 0..words {
            let dst = (word_idx as usize) * self.word_size;
            self.data[dst..dst + self.word_size].copy_from_slice(&bytes[src..src + self.word_size]);
            src += self.word_size;
            word_idx = (word_idx + 1) % self.data_size_words;
        }
    }

    fn copy_from_ring(&self, start_cursor: u64, words: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity((words as usize) * self.word_size);
        let mut word_idx = self.word_index(start_cursor);
        for _ in 0..words {
            let src = (word_idx as usize) * self.word_size;
            out.extend_from_slice(&self.data[src..src + self.word_size]);
            word_idx = (word_idx + 1) % self.data_size_words;
        }
        out
    }
}

/// Shared buffer handle. Create writers/readers from this.
pub struct StreamDataBuffer {
    inner: Arc<Mutex<Inner>>,
}

impl StreamDataBuffer {
    /// `word_size` in bytes (1-65535), `data_size_words` is the ring capacity
    /// in words, `max_readers` bounds concurrent reader handles.
    pub fn new(word_size: usize, data_size_words: u64, max_readers: usize) -> Result<Self> {
        if word_size == 0 || word_size > 65535 {
            return Err(SdsError::InvalidWordSize);
        }
        let inner = Inner {
            data: vec![0u8; word_size * data_size_words as usize],
            word_size,
            data_size_words,
            write_start_cursor: 0,
            write_end_cursor: 0,
            oldest_unconsumed_cursor: 0,
            writer_generation: 0,
            writer_alive: false,
            writer_closed: false,
            readers: Vec::new(),
            max_readers,
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    pub fn word_size(&self) -> usize {
        self.inner.lock().unwrap().word_size
    }

    pub fn create_writer(&self, policy: WriterPolicy, force_replace: bool) -> Result<Writer> {
        let mut g = self.inner.lock().unwrap();
        if g.writer_alive && !force_replace {
            return Err(SdsError::WriterExists);
        }
        g.writer_generation += 1;
        g.writer_alive = true;
        g.writer_closed = false;
        Ok(Writer {
            inner: self.inner.clone(),
            policy,
            generation: g.writer_generation,
        })
    }

    /// `id = None` auto-assigns the next free reader slot.
    pub fn create_reader(
        &self,
        id: Option<usize>,
        _policy: ReaderPolicy,
        start_with_new_data: bool,
        force_replace: bool,
    ) -> Result<Reader> {
        let mut g = self.inner.lock().unwrap();
        let start_cursor = if start_with_new_data {
            g.write_start_cursor
        } else {
            g.oldest_unconsumed_cursor
        };
        let idx = match id {
            Some(i) => {
                if i >= g.max_readers {
                    return Err(SdsError::TooManyReaders);
                }
                while g.readers.len() <= i {
                    g.readers.push(ReaderState {
                        enabled: false,
                        cursor: 0,
                        close_index: None,
                    });
                }
                if g.readers[i].enabled && !force_replace {
                    return Err(SdsError::ReaderExists);
                }
                i
            }
            None => {
                if let Some(i) = g.readers.iter().position(|r| !r.enabled) {
                    i
                } else if g.readers.len() < g.max_readers {
                    g.readers.push(ReaderState {
                        enabled: false,
                        cursor: 0,
                        close_index: None,
                    });
                    g.readers.len() - 1
                } else {
                    return Err(SdsError::TooManyReaders);
                }
            }
        };
        g.readers[idx] = ReaderState {
            enabled: true,
            cursor: start_cursor,
            close_index: None,
        };
        g.recompute_oldest_unconsumed();
        Ok(Reader {
            inner: self.inner.clone(),
            id: idx,
        })
    }
}

pub struct Writer {
    inner: Arc<Mutex<Inner>>,
    policy: WriterPolicy,
    generation: u64,
}

impl Writer {
    fn is_live(&self, g: &Inner) -> bool {
        g.writer_alive && g.writer_generation == self.generation
    }

    /// Write whole words from `data`. Returns words actually written.
    pub fn write(&self, data: &[u8]) -> Result<u64> {
        let mut g = self.inner.lock().unwrap();
        if !self.is_live(&g) {
            return Err(SdsError::WriterReplaced);
        }
        let word_size = g.word_size;
        let requested_words = (data.len() / word_size) as u64;
        if requested_words == 0 {
            return Ok(0);
        }

        // Free space before the writer would have to stomp on data some
        // reader hasn't consumed yet.
        let in_flight = g.write_end_cursor - g.oldest_unconsumed_cursor;
        let free = g.data_size_words.saturating_sub(in_flight);

        let words_to_write = match self.policy {
            WriterPolicy::Nonblockable => requested_words,
            WriterPolicy::Nonblocking => requested_words.min(free),
            WriterPolicy::AllOrNothing => {
                if requested_words > free {
                    return Err(SdsError::WouldBlock);
                }
                requested_words
            }
        };

        let start = g.write_end_cursor;
        g.write_end_cursor = start + words_to_write;
        let bytes = &data[..(words_to_write as usize) * word_size];
        g.copy_into_ring(start, bytes);
        g.write_start_cursor = g.write_end_cursor;
        g.recompute_oldest_unconsumed();
        Ok(words_to_write)
    }

    pub fn close(&self) {
        let mut g = self.inner.lock().unwrap();
        if self.is_live(&g) {
            g.writer_closed = true;
        }
    }

    pub fn tell(&self) -> u64 {
        self.inner.lock().unwrap().write_start_cursor
    }
}

pub struct Reader {
    inner: Arc<Mutex<Inner>>,
    id: usize,
}

impl Reader {
    /// Read up to `max_words` worth of bytes (`buf.len()` must be a multiple
    /// of the word size). Returns the bytes actually read.
    pub fn read(&self, max_words: u64) -> Result<Vec<u8>> {
        let mut g = self.inner.lock().unwrap();
        let word_size = g.word_size;
        let oldest = g.oldest_unconsumed_cursor;
        let write_start = g.write_start_cursor;
        let r = &g.readers[self.id];
        if !r.enabled {
            return Err(SdsError::Closed);
        }
        let cursor = r.cursor;
        if let Some(close_idx) = r.close_index {
            if cursor >= close_idx {
                return Err(SdsError::Closed);
            }
        }
        if cursor < oldest {
            return Err(SdsError::Overrun);
        }
        if cursor >= write_start {
            if g.writer_closed {
                return Err(SdsError::Closed);
            }
            return Err(SdsError::WouldBlock);
        }
        let available = write_start - cursor;
        let mut words = available.min(max_words);
        if let Some(close_idx) = r.close_index {
            words = words.min(close_idx.saturating_sub(cursor));
        }
        let out = g.copy_from_ring(cursor, words);
        g.readers[self.id].cursor = cursor + words;
        Ok(out)
    }

    pub fn seek(&self, offset: i64, reference: SeekReference) -> Result<u64> {
        let mut g = self.inner.lock().unwrap();
        let base = match reference {
            SeekReference::Absolute => 0,
            SeekReference::BeforeReads => g.readers[self.id].cursor,
            SeekReference::AfterWrites => g.write_start_cursor,
        };
        let new_cursor = (base as i64 + offset).max(0) as u64;
        if !g.readers[self.id].enabled {
            return Err(SdsError::Closed);
        }
        g.readers[self.id].cursor = new_cursor;
        // Backward seeks can only ever move the oldest-unconsumed cursor
        // backward or leave it unchanged; recomputing here under the same
        // lock that the writer uses to advance it prevents the writer from
        // relying on a stale minimum while a reader is mid-seek.
        g.recompute_oldest_unconsumed();
        Ok(new_cursor)
    }

    pub fn tell(&self, reference: SeekReference) -> Result<u64> {
        let g = self.inner.lock().unwrap();
        Ok(match reference {
            SeekReference::Absolute | SeekReference::BeforeReads => g.readers[self.id].cursor,
            SeekReference::AfterWrites => g.write_start_cursor,
        })
    }

    pub fn close(&self, offset: i64, reference: SeekReference) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let base = match reference {
            SeekReference::Absolute => 0,
            SeekReference::BeforeReads => g.readers[self.id].cursor,
            SeekReference::AfterWrites => g.write_start_cursor,
        };
        let close_index = (base as i64 + offset).max(0) as u64;
        g.readers[self.id].close_index = Some(close_index);
        Ok(())
    }

    pub fn disable(&self) {
        let mut g = self.inner.lock().unwrap();
        g.readers[self.id].enabled = false;
        g.recompute_oldest_unconsumed();
    }
}

//! Regulator: rate-limited, size-bounded outbound aggregator (SPEC_FULL.md §4.2).
//!
//! Chunks are opaque byte blobs carrying a known size; the regulator batches
//! the longest queued prefix whose cumulative size fits under
//! `max_message_size` and hands each chunk in the batch to a caller-supplied
//! emit callback, exactly one callback invocation per chunk.

use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegulatorError {
    #[error("chunk size {size} exceeds max message size {max}")]
    ChunkTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, RegulatorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitMode {
    Trickle,
    Burst,
}

pub struct RegulatorBuffer {
    max_message_size: usize,
    queue: Mutex<VecDeque<Vec<u8>>>,
}

impl RegulatorBuffer {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, chunk: Vec<u8>) -> Result<()> {
        if chunk.len() > self.max_message_size {
            return Err(RegulatorError::ChunkTooLarge {
                size: chunk.len(),
                max: self.max_message_size,
            });
        }
        self.queue.lock().unwrap().push_back(chunk);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove everything, invoking `on_discard` once per discarded chunk.
    /// There is no destroy-less variant: an explicit callback is required so
    /// callers can't silently leak whatever a chunk owns on their side.
    pub fn clear(&self, mut on_discard: impl FnMut(Vec<u8>)) {
        let mut q = self.queue.lock().unwrap();
        while let Some(chunk) = q.pop_front() {
            on_discard(chunk);
        }
    }

    /// Longest queued prefix whose cumulative size fits `max_message_size`.
    /// Does not remove anything from the queue.
    fn peek_batch_len(&self, q: &VecDeque<Vec<u8>>) -> usize {
        let mut total = 0usize;
        let mut count = 0usize;
        for chunk in q.iter() {
            if total + chunk.len() > self.max_message_size {
                break;
            }
            total += chunk.len();
            count += 1;
        }
        count
    }

    /// Emit one batch (if any is queued). `emit` is called once per chunk in
    /// FIFO order with `(chunk, remaining_bytes, remaining_chunks)` —
    /// `remaining_*` both reach zero on the last chunk of the batch. If
    /// `emit` returns `false` for a chunk, that chunk (and everything after
    /// it) stays queued and the batch stops there, to be retried next tick.
    pub fn emit_one_batch(&self, mut emit: impl FnMut(&[u8], usize, usize) -> bool) -> bool {
        let mut q = self.queue.lock().unwrap();
        let batch_len = self.peek_batch_len(&q);
        if batch_len == 0 {
            return false;
        }
        let batch: Vec<Vec<u8>> = q.iter().take(batch_len).cloned().collect();
        let total_bytes: usize = batch.iter().map(|c| c.len()).sum();

        let mut remaining_bytes = total_bytes;
        let mut remaining_chunks = batch.len();
        let mut delivered = 0usize;
        for chunk in &batch {
            remaining_bytes -= chunk.len();
            remaining_chunks -= 1;
            if !emit(chunk, remaining_bytes, remaining_chunks) {
                break;
            }
            delivered += 1;
        }
        for _ in 0..delivered {
            q.pop_front();
        }
        delivered > 0 || batch_len == 0
    }
}

/// Drives `RegulatorBuffer` on a tick cadence in one of the two emit modes.
pub struct Regulator {
    mode: EmitMode,
}

impl Regulator {
    pub fn new(mode: EmitMode) -> Self {
        Self { mode }
    }

    /// Call once per `publishRate` tick. Returns the number of batches
    /// emitted this tick (0 or 1 for TRICKLE; as many as were ready for
    /// BURST).
    pub fn tick(&self, buffer: &RegulatorBuffer, mut emit: impl FnMut(&[u8], usize, usize) -> bool) -> usize {
        match self.mode {
            EmitMode::Trickle => {
                if buffer.emit_one_batch(&mut emit) {
                    1
                } else {
                    0
                }
            }
            EmitMode::Burst => {
                let mut emitted = 0;
                while buffer.emit_one_batch(&mut emit) {
                    emitted += 1;
                }
                emitted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_json_event_emission() {
        // §8 scenario 1: max_message_size=200, chunks {50,51,52}, one batch.
        let buf = RegulatorBuffer::new(200);
        buf.enqueue(vec![0u8; 50]).unwrap();
        buf.enqueue(vec![0u8; 51]).unwrap();
        buf.enqueue(vec![0u8; 52]).unwrap();

        let reg = Regulator::new(EmitMode::Trickle);
        let mut seen = Vec::new();
        let emitted = reg.tick(&buf, |chunk, remaining_bytes, remaining_chunks| {
            seen.push((chunk.len(), remaining_bytes, remaining_chunks));
            true
        });
        assert_eq!(emitted, 1);
        assert_eq!(seen, vec![(50, 103, 2), (51, 52, 1), (52, 0, 0)]);
        assert!(buf.is_empty());
    }

    #[test]
    fn batch_never_exceeds_max_size() {
        let buf = RegulatorBuffer::new(100);
        for _ in 0..5 {
            buf.enqueue(vec![0u8; 40]).unwrap();
        }
        let reg = Regulator::new(EmitMode::Burst);
        let mut batches = Vec::new();
        let mut cur = 0usize;
        reg.tick(&buf, |chunk, _rb, rc| {
            cur += chunk.len();
            if rc == 0 {
                batches.push(cur);
                cur = 0;
            }
            true
        });
        for b in batches {
            assert!(b <= 100);
        }
    }

    #[test]
    fn failed_chunk_stays_queued_for_retry() {
        let buf = RegulatorBuffer::new(100);
        buf.enqueue(vec![1u8; 10]).unwrap();
        buf.enqueue(vec![2u8; 10]).unwrap();

        let reg = Regulator::new(EmitMode::Trickle);
        // First chunk fails -> nothing delivered, both remain queued.
        let emitted = reg.tick(&buf, |_chunk, _rb, _rc| false);
        assert_eq!(emitted, 0);
        assert_eq!(buf.len(), 2);

        // Retry succeeds.
        let emitted = reg.tick(&buf, |_chunk, _rb, _rc| true);
        assert_eq!(emitted, 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn chunk_larger_than_max_is_rejected() {
        let buf = RegulatorBuffer::new(10);
        assert!(buf.enqueue(vec![0u8; 11]).is_err());
    }

    #[test]
    fn burst_emits_back_to_back() {
        let buf = RegulatorBuffer::new(20);
        for _ in 0..6 {
            buf.enqueue(vec![0u8; 10]).unwrap();
        }
        let reg = Regulator::new(EmitMode::Burst);
        let emitted = reg.tick(&buf, |_c, _rb, _rc| true);
        assert_eq!(emitted, 3);
        assert!(buf.is_empty());
    }
}

//! Sequencer: per-topic inbound reordering window with a single timeout
//! (SPEC_FULL.md §4.4).

use std::collections::VecDeque;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerError {
    #[error("sequence window overflow")]
    WindowOverflow,
}

pub type Result<T> = std::result::Result<T, SequencerError>;

enum Slot {
    Empty,
    Filled(Vec<u8>),
}

/// Caller-supplied reactions to a sequencer's progress.
pub trait SequencerSink {
    /// Invoked once per sequence number, strictly ascending, in order.
    fn on_sequenced(&mut self, buf: Vec<u8>);
    /// Invoked when the deferred timeout fires and the head is still missing.
    fn on_timeout(&mut self);
}

pub struct Sequencer {
    max_slots: u32,
    base_seq: u32,
    slots: VecDeque<Slot>,
    timer_armed: bool,
}

impl Sequencer {
    pub fn new(max_slots: u32, starting_sequence_number: u32) -> Self {
        let mut slots = VecDeque::with_capacity(max_slots as usize);
        for _ in 0..max_slots {
            slots.push_back(Slot::Empty);
        }
        Self {
            max_slots,
            base_seq: starting_sequence_number,
            slots,
            timer_armed: false,
        }
    }

    pub fn base_sequence_number(&self) -> u32 {
        self.base_seq
    }

    /// Advance `base_seq` by one and rotate the window so physical index 0
    /// always holds the new `base_seq`'s slot. Every other slot's relative
    /// distance from `base_seq` is preserved automatically by the rotation,
    /// so a slot written while a given number was still the base stays
    /// reachable after the base moves past it.
    fn advance_base(&mut self) {
        self.base_seq = self.base_seq.wrapping_add(1);
        self.slots.pop_front();
        self.slots.push_back(Slot::Empty);
    }

    /// `buf`'s first four bytes (little-endian) are the plain sequence
    /// number. Returns `true` if a new deferred timer should be armed by the
    /// caller (host schedules it via the task pool); the sequencer itself
    /// does not own a clock.
    pub fn write(&mut self, seq: u32, buf: Vec<u8>, sink: &mut dyn SequencerSink) -> Result<bool> {
        // Distance forward from base_seq, wrapping over the u32 sequence
        // space. A small delta means seq is at or ahead of base_seq within
        // (or past) the window; a huge delta (>= u32::MAX/2) means seq is
        // actually behind base_seq — a stale duplicate.
        let delta = seq.wrapping_sub(self.base_seq);
        if delta >= u32::MAX / 2 {
            return Ok(false); // stale duplicate: seq < base_seq
        }
        if delta >= self.max_slots {
            return Err(SequencerError::WindowOverflow);
        }

        if seq == self.base_seq {
            sink.on_sequenced(buf);
            self.advance_base();
            self.drain_contiguous(sink);
            let should_arm = !self.timer_armed && self.has_pending();
            return Ok(should_arm);
        }

        self.slots[delta as usize] = Slot::Filled(buf);
        let should_arm = !self.timer_armed;
        if should_arm {
            self.timer_armed = true;
        }
        Ok(should_arm)
    }

    fn drain_contiguous(&mut self, sink: &mut dyn SequencerSink) {
        while matches!(self.slots.front(), Some(Slot::Filled(_))) {
            if let Some(Slot::Filled(buf)) = self.slots.pop_front() {
                sink.on_sequenced(buf);
                self.base_seq = self.base_seq.wrapping_add(1);
                self.slots.push_back(Slot::Empty);
            }
        }
    }

    fn has_pending(&self) -> bool {
        self.slots.iter().any(|s| matches!(s, Slot::Filled(_)))
    }

    /// Call when the deferred timer armed by `write` fires.
    pub fn on_timer_fire(&mut self, sink: &mut dyn SequencerSink) {
        self.timer_armed = false;
        if matches!(self.slots.front(), Some(Slot::Empty)) {
            sink.on_timeout();
        }
    }

    /// Cancel the timer bookkeeping (used when the gap resolves some other way).
    pub fn cancel_timer(&mut self) {
        self.timer_armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        sequenced: Vec<u32>,
        timeouts: u32,
    }

    impl Recorder {
        fn seq_from(buf: &[u8]) -> u32 {
            u32::from_le_bytes(buf[0..4].try_into().unwrap())
        }
    }

    impl SequencerSink for Recorder {
        fn on_sequenced(&mut self, buf: Vec<u8>) {
            self.sequenced.push(Self::seq_from(&buf));
        }
        fn on_timeout(&mut self) {
            self.timeouts += 1;
        }
    }

    fn buf_for(seq: u32) -> Vec<u8> {
        let mut v = seq.to_le_bytes().to_vec();
        v.extend_from_slice(b"payload");
        v
    }

    #[test]
    fn scenario_out_of_order_delivery() {
        // §8 scenario 2: writes [2,0,1,3] -> onSequenced 0,1,2,3, no timeout.
        let mut seq = Sequencer::new(4, 0);
        let mut rec = Recorder::default();
        for s in [2u32, 0, 1, 3] {
            seq.write(s, buf_for(s), &mut rec).unwrap();
        }
        assert_eq!(rec.sequenced, vec![0, 1, 2, 3]);
        assert_eq!(rec.timeouts, 0);
    }

    #[test]
    fn scenario_timeout_fires() {
        // §8 scenario 3: write only [1,2], timer fires -> onTimeout once, no onSequenced.
        let mut seq = Sequencer::new(4, 0);
        let mut rec = Recorder::default();
        seq.write(1, buf_for(1), &mut rec).unwrap();
        seq.write(2, buf_for(2), &mut rec).unwrap();
        seq.on_timer_fire(&mut rec);
        assert_eq!(rec.sequenced, Vec::<u32>::new());
        assert_eq!(rec.timeouts, 1);
    }

    #[test]
    fn stale_duplicate_is_discarded() {
        let mut seq = Sequencer::new(4, 5);
        let mut rec = Recorder::default();
        seq.write(3, buf_for(3), &mut rec).unwrap();
        assert!(rec.sequenced.is_empty());
    }

    #[test]
    fn window_overflow_errors() {
        let mut seq = Sequencer::new(4, 0);
        let mut rec = Recorder::default();
        assert_eq!(
            seq.write(10, buf_for(10), &mut rec).unwrap_err(),
            SequencerError::WindowOverflow
        );
    }

    #[test]
    fn full_permutation_any_order_ascending() {
        let n = 8u32;
        let mut seq = Sequencer::new(n, 0);
        let mut rec = Recorder::default();
        // reverse order permutation
        for s in (0..n).rev() {
            seq.write(s, buf_for(s), &mut rec).unwrap();
        }
        let expected: Vec<u32> = (0..n).collect();
        assert_eq!(rec.sequenced, expected);
    }
}

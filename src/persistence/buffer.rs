//! # Save buffer.
//!
//! Keeps the latest snapshot per key and reports when a flush is due: on the
//! first save, then on every `size`-th save after it.

use std::collections::BTreeMap;

use serde_json::Value;

use super::store::StateKey;

#[derive(Debug)]
pub struct StateSaveBuffer {
    size: usize,
    counter: usize,
    pending: BTreeMap<StateKey, Value>,
}

impl StateSaveBuffer {
    /// `size` is clamped to at least 1 (flush on every save).
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            counter: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Buffers `data` under `key`, replacing any older snapshot. Returns true when a flush is due.
    pub fn save(&mut self, key: StateKey, data: Value) -> bool {
        self.pending.insert(key, data);
        let due = self.counter == 0;
        self.counter = (self.counter + 1) % self.size;
        due
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns all buffered snapshots and clears the buffer.
    pub fn drain(&mut self) -> Vec<(StateKey, Value)> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::StateKind;

    #[test]
    fn flushes_first_then_every_nth() {
        let mut buf = StateSaveBuffer::new(3);
        let key = StateKey::new(StateKind::Service, "web");
        let due: Vec<bool> = (0..7)
            .map(|i| buf.save(key.clone(), Value::from(i)))
            .collect();
        assert_eq!(due, [true, false, false, true, false, false, true]);

        // One entry per key, latest wins.
        let drained = buf.drain();
        assert_eq!(drained, vec![(key, Value::from(6))]);
        assert!(buf.is_empty());
    }
}

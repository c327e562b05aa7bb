// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//
// Plot buffers shared between an engine and the display.
//
// The engine owns a `PlotBuffer` and is its only writer. Any number of
// `PlotData` handles may read it from other threads without locking. Each
// sample is stored as the bits of an `f32` in an atomic, so individual reads
// are never torn, but a snapshot taken while the engine is writing may mix
// samples from before and after a wraparound. The display tolerates this;
// it is a weak-consistency guarantee, not a bug.
//

use std::sync::{
    atomic::{AtomicU32, AtomicUsize, Ordering},
    Arc,
};

/// Number of points in the scope capture ring and the generator preview.
pub const PLOT_POINTS: usize = 1024;

struct Shared {
    samples: Box<[AtomicU32]>,
    head: AtomicUsize,
}

/// The writable side of a fixed-length plot buffer.
pub struct PlotBuffer {
    shared: Arc<Shared>,
    head: usize,
}

impl PlotBuffer {
    /// Creates a zeroed buffer of the given length.
    pub fn new(len: usize) -> PlotBuffer {
        assert!(len > 0, "plot buffers must hold at least one point");
        PlotBuffer {
            shared: Arc::new(Shared {
                samples: (0..len).map(|_| AtomicU32::new(0.0f32.to_bits())).collect(),
                head: AtomicUsize::new(0),
            }),
            head: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.shared.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.samples.is_empty()
    }

    /// The next slot to be overwritten.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Writes `value` at the head and advances it. Returns the slot written.
    pub fn push(&mut self, value: f32) -> usize {
        let slot = self.head;
        self.shared.samples[slot].store(value.to_bits(), Ordering::Relaxed);
        self.head = (slot + 1) % self.len();
        self.shared.head.store(self.head, Ordering::Release);
        slot
    }

    /// Overwrites the buffer from the start, leaving the head untouched.
    pub fn fill_from(&mut self, values: &[f32]) {
        for (slot, value) in self.shared.samples.iter().zip(values) {
            slot.store(value.to_bits(), Ordering::Relaxed);
        }
        self.shared.head.store(self.head, Ordering::Release);
    }

    /// Returns a read handle onto this buffer.
    pub fn reader(&self) -> PlotData {
        PlotData {
            shared: self.shared.clone(),
        }
    }
}

/// A lock-free read handle onto a plot buffer. See the module documentation
/// for the consistency guarantees.
#[derive(Clone)]
pub struct PlotData {
    shared: Arc<Shared>,
}

impl PlotData {
    pub fn len(&self) -> usize {
        self.shared.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.samples.is_empty()
    }

    /// The writer's head as of the last write.
    pub fn head(&self) -> usize {
        self.shared.head.load(Ordering::Acquire)
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.shared
            .samples
            .get(index)
            .map(|sample| f32::from_bits(sample.load(Ordering::Relaxed)))
    }

    /// Copies the buffer into `out`, returning the number of points copied.
    pub fn copy_into(&self, out: &mut [f32]) -> usize {
        let mut copied = 0;
        for (dst, sample) in out.iter_mut().zip(self.shared.samples.iter()) {
            *dst = f32::from_bits(sample.load(Ordering::Relaxed));
            copied += 1;
        }
        copied
    }

    /// Copies the whole buffer in storage order.
    pub fn snapshot(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.len()];
        self.copy_into(&mut out);
        out
    }
}

impl std::fmt::Debug for PlotData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PlotData({} points, head {})", self.len(), self.head())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_wraps_head() {
        let mut buffer = PlotBuffer::new(4);
        let reader = buffer.reader();
        for i in 0..6 {
            let slot = buffer.push(i as f32);
            assert_eq!(slot, i % 4);
        }
        assert_eq!(buffer.head(), 2);
        assert_eq!(reader.head(), 2);
        assert_eq!(reader.snapshot(), vec![4.0, 5.0, 2.0, 3.0]);
        assert_eq!(reader.len(), 4);
    }

    #[test]
    fn test_fill_from_keeps_length() {
        let mut buffer = PlotBuffer::new(3);
        let reader = buffer.reader();
        buffer.fill_from(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(reader.snapshot(), vec![1.0, 2.0, 3.0]);

        buffer.fill_from(&[9.0]);
        assert_eq!(reader.snapshot(), vec![9.0, 2.0, 3.0]);
        assert_eq!(reader.get(3), None);
    }

    #[test]
    fn test_reader_on_another_thread() {
        let mut buffer = PlotBuffer::new(PLOT_POINTS);
        let reader = buffer.reader();
        let handle = std::thread::spawn(move || {
            let mut seen = 0;
            while seen < 100 {
                let snapshot = reader.snapshot();
                assert_eq!(snapshot.len(), PLOT_POINTS);
                assert!(reader.head() < PLOT_POINTS);
                assert!(snapshot.iter().all(|v| (0.0..=1.0).contains(v)));
                seen += 1;
            }
        });
        for i in 0..10 * PLOT_POINTS {
            buffer.push((i % 2) as f32);
        }
        handle.join().unwrap();
    }
}

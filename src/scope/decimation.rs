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
// Decimation keeps every `skip`-th device frame and drops the rest. The
// position within the stride carries over from one region to the next, so
// the kept samples stay evenly spaced across ticks.
//

/// The decimation state of the scope.
#[derive(Debug, Clone)]
pub struct Decimation {
    sample_rate: u32,
    skip: usize,
    /// Index of the next kept frame, relative to the start of the next region.
    offset: usize,
}

impl Decimation {
    /// Creates an undecimated state for the given device sample rate.
    pub fn new(sample_rate: u32) -> Decimation {
        Decimation {
            sample_rate,
            skip: 1,
            offset: 0,
        }
    }

    /// Frames advanced per kept sample. Always at least one.
    pub fn skip(&self) -> usize {
        self.skip
    }

    /// The sample rate of the kept samples.
    pub fn effective_sample_rate(&self) -> f64 {
        f64::from(self.sample_rate) / self.skip as f64
    }

    /// Chooses the skip so that a ring of `points` kept samples spans twice
    /// `visible_width` device samples. The skip is truncated toward zero, so
    /// the span is only approximately what was asked for. Returns the skip.
    pub fn recompute(&mut self, visible_width: f32, points: usize) -> usize {
        let skip = if visible_width.is_finite() && visible_width > 0.0 && points > 0 {
            // fs / (points * fs / (2 * width)) reduces to 2 * width / points.
            (2.0 * f64::from(visible_width) / points as f64).trunc() as usize
        } else {
            1
        };
        let skip = skip.max(1);
        if skip != self.skip {
            self.skip = skip;
            self.offset = 0;
        }
        self.skip
    }

    /// The time covered by `points` kept samples, in seconds.
    pub fn span(&self, points: usize) -> f64 {
        points as f64 / self.effective_sample_rate()
    }

    /// Display bounds in seconds, symmetric around zero.
    pub fn bounds(&self, points: usize) -> (f32, f32) {
        let half = (self.span(points) / 2.0) as f32;
        (-half, half)
    }

    /// Calls `keep` with the index of every kept frame in a region of `frames`
    /// frames, in order. Returns the number of frames kept.
    pub fn for_each_kept(&mut self, frames: usize, mut keep: impl FnMut(usize)) -> usize {
        let mut index = self.offset;
        let mut kept = 0;
        while index < frames {
            keep(index);
            kept += 1;
            index += self.skip;
        }
        self.offset = index - frames;
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_for_half_ring_width() {
        let mut decimation = Decimation::new(48000);
        assert_eq!(decimation.recompute(512.0, 1024), 1);
        assert_eq!(decimation.effective_sample_rate(), 48000.0);
        let (low, high) = decimation.bounds(1024);
        assert_eq!(low, -high);
        assert!((f64::from(high) - 1024.0 / 48000.0 / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_skip_truncates() {
        let mut decimation = Decimation::new(48000);
        // 2 * 1500 / 1024 = 2.93
        assert_eq!(decimation.recompute(1500.0, 1024), 2);
        assert_eq!(decimation.effective_sample_rate(), 24000.0);
        assert_eq!(decimation.recompute(4800.0, 1024), 9);
        assert!((decimation.span(1024) - 1024.0 * 9.0 / 48000.0).abs() < 1e-12);
    }

    #[test]
    fn test_exact_multiples_of_half_ring() {
        for rate in [44100, 48000] {
            let mut decimation = Decimation::new(rate);
            for k in 1..=256 {
                let width = (k * 512) as f32;
                assert_eq!(
                    decimation.recompute(width, 1024),
                    k,
                    "{}Hz width {}",
                    rate,
                    width
                );
                assert_eq!(
                    decimation.effective_sample_rate(),
                    f64::from(rate) / k as f64
                );
            }
        }
    }

    #[test]
    fn test_skip_never_below_one() {
        let mut decimation = Decimation::new(44100);
        for width in [0.0, -5.0, 1.0, 100.0, f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            assert!(decimation.recompute(width, 1024) >= 1, "width {}", width);
            let (low, high) = decimation.bounds(1024);
            assert_eq!(low, -high);
            assert!(high > 0.0);
        }
    }

    #[test]
    fn test_kept_frames_are_evenly_spaced_across_regions() {
        let mut decimation = Decimation::new(48000);
        decimation.recompute(2048.0, 1024); // skip 4

        let mut kept = Vec::new();
        let mut start = 0;
        for frames in [3, 1, 6, 2, 10] {
            decimation.for_each_kept(frames, |i| kept.push(start + i));
            start += frames;
        }
        assert_eq!(kept, vec![0, 4, 8, 12, 16, 20]);
    }

    #[test]
    fn test_region_without_kept_frame() {
        let mut decimation = Decimation::new(48000);
        decimation.recompute(4096.0, 1024); // skip 8
        assert_eq!(decimation.for_each_kept(1, |_| {}), 1);
        let mut calls = 0;
        assert_eq!(decimation.for_each_kept(5, |_| calls += 1), 0);
        assert_eq!(calls, 0);
        assert_eq!(decimation.for_each_kept(3, |i| assert_eq!(i, 2)), 1);
    }

    #[test]
    fn test_skip_change_restarts_stride() {
        let mut decimation = Decimation::new(48000);
        decimation.recompute(4096.0, 1024);
        decimation.for_each_kept(3, |_| {});
        decimation.recompute(512.0, 1024);
        let mut kept = Vec::new();
        decimation.for_each_kept(3, |i| kept.push(i));
        assert_eq!(kept, vec![0, 1, 2]);
    }
}

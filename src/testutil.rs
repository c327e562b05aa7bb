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
use std::{
    f32::consts::PI,
    thread,
    time::{Duration, Instant},
};

use crate::audio::mock::{self, CaptureDevice, Clock, PlaybackDevice};
use crate::audio::StreamFormat;

/// Calculate RMS (Root Mean Square) of a signal
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|&x| x * x).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// The largest absolute sample value.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0, |peak, sample| peak.max(sample.abs()))
}

/// Generates `frames` samples of a mono sine starting at phase zero.
pub fn sine(frequency: f32, amplitude: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
    (0..frames)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * PI * frequency * t).sin()
        })
        .collect()
}

/// A manual-clock loopback pair at 48kHz.
pub fn manual_loopback(channels: u16, buffer_frames: usize) -> (PlaybackDevice, CaptureDevice) {
    let format = StreamFormat::new(48000, channels).expect("valid format");
    mock::loopback(format, buffer_frames, Clock::Manual)
}

/// Wait for the given predicate to return true or fail.
pub fn eventually<F>(mut predicate: F, error_msg: &str)
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let mut tick = Duration::from_millis(5);
    let timeout = Duration::from_secs(3);
    let max_tick = Duration::from_millis(50);

    loop {
        if start.elapsed() > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }

        thread::sleep(tick);
        tick = std::cmp::min(tick * 2, max_tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_helpers() {
        let signal = sine(1000.0, 2.0, 48000, 480);
        assert!((rms(&signal) - 2.0 / 2f32.sqrt()).abs() < 1e-3);
        assert!((peak(&signal) - 2.0).abs() < 1e-3);
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(peak(&[-3.0, 1.0]), 3.0);
    }
}

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

use std::{error::Error, fmt, time::Duration};

/// The direction a device stream moves audio in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Audio flows from the generator to the speakers or line out.
    Playback,
    /// Audio flows from the microphone or line in to the scope.
    Capture,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Playback => "playback",
            Direction::Capture => "capture",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The format a device stream was opened with. Samples exchanged with the
/// engines are always interleaved f32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels per frame
    pub channels: u16,
}

impl StreamFormat {
    /// Creates a new StreamFormat
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, Box<dyn Error>> {
        if sample_rate == 0 {
            return Err("Sample rate must be greater than 0".into());
        }
        if channels == 0 {
            return Err("Channel count must be greater than 0".into());
        }

        Ok(StreamFormat {
            sample_rate,
            channels,
        })
    }

    /// Returns the number of whole frames that fit into the given duration.
    pub fn frames_in(&self, duration: Duration) -> usize {
        (duration.as_nanos() * u128::from(self.sample_rate) / 1_000_000_000) as usize
    }

    /// Returns the number of interleaved samples in the given number of frames.
    pub fn samples_in(&self, frames: usize) -> usize {
        frames * usize::from(self.channels)
    }
}

impl Default for StreamFormat {
    /// Creates a default stream format (48kHz, stereo)
    fn default() -> Self {
        StreamFormat {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

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
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// How the scope decides where the display should be anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// Anchor on rising crossings of the trigger level.
    #[default]
    Trigger,
    /// Follow the write head continuously.
    Rolling,
}

impl AcquisitionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AcquisitionMode::Trigger => "trigger",
            AcquisitionMode::Rolling => "rolling",
        }
    }
}

impl FromStr for AcquisitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trigger" | "edge" => Ok(AcquisitionMode::Trigger),
            "rolling" | "roll" => Ok(AcquisitionMode::Rolling),
            _ => Err(format!("unsupported acquisition mode: {}", s)),
        }
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Evaluates the trigger condition for each kept sample.
#[derive(Debug, Clone)]
pub struct TriggerDetector {
    mode: AcquisitionMode,
    level: f32,
    last: f32,
}

impl TriggerDetector {
    pub fn new(mode: AcquisitionMode, level: f32) -> TriggerDetector {
        TriggerDetector {
            mode,
            level,
            last: 0.0,
        }
    }

    pub fn mode(&self) -> AcquisitionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: AcquisitionMode) {
        self.mode = mode;
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn set_level(&mut self, level: f32) {
        self.level = level;
    }

    /// The previous kept sample.
    pub fn last(&self) -> f32 {
        self.last
    }

    /// Evaluates `value`, just written at `slot` of a ring of `points` slots,
    /// and returns the display position to report, if any.
    ///
    /// In trigger mode a rising crossing (`last < level <= value`) reports the
    /// slot shifted by half the ring so that the crossing sits in the middle
    /// of the display. In rolling mode every sample reports its own slot.
    pub fn evaluate(&mut self, slot: usize, value: f32, points: usize) -> Option<usize> {
        let position = match self.mode {
            AcquisitionMode::Trigger => {
                let rising = self.last < self.level && value >= self.level;
                rising.then(|| (slot + points / 2) % points)
            }
            AcquisitionMode::Rolling => Some(slot),
        };
        self.last = value;
        position
    }
}

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

use super::format::Direction;

/// Errors raised at the audio device boundary. Initialization errors are
/// fatal for the engine that owns the device; I/O errors are fatal for the
/// engine instance that hit them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("unable to open {direction} device: {reason}")]
    Init { direction: Direction, reason: String },

    #[error("no {direction} device found with name {name}")]
    NotFound { direction: Direction, name: String },

    #[error("{direction} device failed during {operation}: {reason}")]
    Io {
        direction: Direction,
        operation: &'static str,
        reason: String,
    },

    #[error("{direction} device is unavailable after an earlier failure")]
    Unavailable { direction: Direction },
}

impl DeviceError {
    pub fn init(direction: Direction, reason: impl ToString) -> DeviceError {
        DeviceError::Init {
            direction,
            reason: reason.to_string(),
        }
    }

    pub fn io(direction: Direction, operation: &'static str, reason: impl ToString) -> DeviceError {
        DeviceError::Io {
            direction,
            operation,
            reason: reason.to_string(),
        }
    }

    /// Returns true if the error happened while opening the device.
    pub fn is_init(&self) -> bool {
        matches!(self, DeviceError::Init { .. } | DeviceError::NotFound { .. })
    }

    /// The direction of the device that raised the error.
    pub fn direction(&self) -> Direction {
        match self {
            DeviceError::Init { direction, .. }
            | DeviceError::NotFound { direction, .. }
            | DeviceError::Io { direction, .. }
            | DeviceError::Unavailable { direction } => *direction,
        }
    }
}

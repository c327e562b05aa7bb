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
use std::fmt;

use tracing::{error, info};

use crate::config;

pub mod cpal;
pub mod error;
pub mod format;
pub mod mock;
pub mod thread_priority;

pub use error::DeviceError;
pub use format::{Direction, StreamFormat};

/// The playback side of the audio device boundary. The generator polls it
/// once per tick for free space and writes into a claimed region.
///
/// The claim/commit pair is the only synchronization point with the audio
/// subsystem: a claimed region belongs to the caller until it is committed,
/// and nothing may touch it afterwards.
pub trait PlaybackDevice: fmt::Display {
    /// The format the stream was opened with.
    fn format(&self) -> StreamFormat;

    /// The size of the device buffer in frames.
    fn buffer_frames(&self) -> usize;

    /// Starts the stream. Starting a running stream is a no-op.
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Stops the stream. Stopping a stopped stream is a no-op.
    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Returns the number of frames that can be written without blocking.
    fn available_free_frames(&mut self) -> Result<usize, DeviceError>;

    /// Claims room for `frames` interleaved frames.
    fn claim_write_region(&mut self, frames: usize) -> Result<&mut [f32], DeviceError>;

    /// Hands the first `frames` frames of the claimed region to the device.
    fn commit_write_region(&mut self, frames: usize) -> Result<(), DeviceError>;
}

/// The capture side of the audio device boundary. The scope drains it once
/// per tick.
pub trait CaptureDevice: fmt::Display {
    /// The format the stream was opened with.
    fn format(&self) -> StreamFormat;

    /// The size of the device buffer in frames.
    fn buffer_frames(&self) -> usize;

    /// Starts the stream. Starting a running stream is a no-op.
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Stops the stream. Stopping a stopped stream is a no-op.
    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Returns the number of captured frames waiting to be read.
    fn available_captured_frames(&mut self) -> Result<usize, DeviceError>;

    /// Claims every captured frame as one interleaved region.
    fn claim_read_region(&mut self) -> Result<&[f32], DeviceError>;

    /// Returns the claimed region to the device. `frames` must match the
    /// size of the claimed region.
    fn release_read_region(&mut self, frames: usize) -> Result<(), DeviceError>;
}

/// A device known to the audio host.
pub struct DeviceInfo {
    pub name: String,
    pub host: String,
    pub direction: Direction,
    pub max_channels: u16,
    pub default_format: Option<StreamFormat>,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({}, {})",
            self.name, self.max_channels, self.direction, self.host
        )?;
        if let Some(format) = self.default_format {
            write!(f, " [default {}]", format)?;
        }
        Ok(())
    }
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<DeviceInfo>, Box<dyn std::error::Error>> {
    cpal::list_devices()
}

/// Opens the playback device described by the given configuration.
pub fn open_playback(config: &config::Audio) -> Result<Box<dyn PlaybackDevice>, DeviceError> {
    if config.device().starts_with("mock") {
        return Ok(Box::new(mock::PlaybackDevice::open(config)?));
    }

    Ok(Box::new(cpal::PlaybackDevice::open(config)?))
}

/// Opens the capture device described by the given configuration.
pub fn open_capture(config: &config::Audio) -> Result<Box<dyn CaptureDevice>, DeviceError> {
    if config.device().starts_with("mock") {
        return Ok(Box::new(mock::CaptureDevice::open(config)?));
    }

    Ok(Box::new(cpal::CaptureDevice::open(config)?))
}

/// The result of opening both sides of the instrument.
pub struct OpenedDevices {
    pub playback: Option<Result<Box<dyn PlaybackDevice>, DeviceError>>,
    pub capture: Option<Result<Box<dyn CaptureDevice>, DeviceError>>,
}

/// Opens the configured playback and capture devices. When both sides name
/// the mock loopback device, the two mocks are wired together so that the
/// scope sees what the generator plays.
pub fn open_devices(
    output: Option<&config::Audio>,
    input: Option<&config::Audio>,
) -> OpenedDevices {
    if let (Some(output), Some(input)) = (output, input) {
        if output.device() == mock::LOOPBACK_DEVICE && input.device() == mock::LOOPBACK_DEVICE {
            info!("Wiring mock playback into mock capture.");
            let (playback, capture) = match mock::loopback_from_config(output) {
                Ok((playback, capture)) => (
                    Ok(Box::new(playback) as Box<dyn PlaybackDevice>),
                    Ok(Box::new(capture) as Box<dyn CaptureDevice>),
                ),
                Err(e) => {
                    error!(
                        err = %e,
                        device = mock::LOOPBACK_DEVICE,
                        "Unable to open loopback devices"
                    );
                    (Err(e.clone()), Err(e))
                }
            };
            return OpenedDevices {
                playback: Some(playback),
                capture: Some(capture),
            };
        }
    }

    let playback = output.map(|config| {
        let result = open_playback(config);
        if let Err(e) = &result {
            error!(err = %e, device = config.device(), "Unable to open playback device");
        }
        result
    });
    let capture = input.map(|config| {
        let result = open_capture(config);
        if let Err(e) = &result {
            error!(err = %e, device = config.device(), "Unable to open capture device");
        }
        result
    });

    OpenedDevices { playback, capture }
}

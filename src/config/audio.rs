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
use std::time::Duration;

use duration_string::DurationString;
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

const DEFAULT_DEVICE: &str = "default";
const DEFAULT_BUFFER: Duration = Duration::from_millis(100);

/// A YAML representation of one side (output or input) of the audio configuration.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Audio {
    /// The audio device. "default" picks the host's default device and names
    /// starting with "mock" pick the mock backend.
    #[serde(default = "default_device")]
    device: String,

    /// How much audio the device buffers, as a duration string (default: 100ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    buffer: Option<String>,

    /// Requested sample rate in Hz (default: the device's default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,

    /// Requested channel count (default: the device's default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channels: Option<u16>,
}

fn default_device() -> String {
    DEFAULT_DEVICE.to_string()
}

impl Default for Audio {
    fn default() -> Self {
        Audio::new(DEFAULT_DEVICE)
    }
}

impl Audio {
    /// New will create a new Audio configuration.
    pub fn new(device: &str) -> Audio {
        Audio {
            device: device.to_string(),
            buffer: None,
            sample_rate: None,
            channels: None,
        }
    }

    /// Sets the device buffer as a duration string.
    pub fn with_buffer(mut self, buffer: &str) -> Audio {
        self.buffer = Some(buffer.to_string());
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Audio {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Audio {
        self.channels = Some(channels);
        self
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Returns the device buffer length (default: 100ms).
    pub fn buffer_duration(&self) -> Result<Duration, ConfigError> {
        match &self.buffer {
            Some(buffer) => parse_duration(buffer),
            None => Ok(DEFAULT_BUFFER),
        }
    }

    /// Returns the requested sample rate, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    /// Returns the requested channel count, if any.
    pub fn channels(&self) -> Option<u16> {
        self.channels
    }
}

/// Parses a duration string such as "16ms" or "2s".
pub(super) fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    DurationString::from_string(value.to_string())
        .map(Duration::from)
        .map_err(|e| ConfigError::Duration {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use config::{Config, File, FileFormat};

    use super::*;

    #[test]
    fn test_defaults() {
        let audio = Audio::new("mock-device");
        assert_eq!(audio.device(), "mock-device");
        assert_eq!(audio.buffer_duration().unwrap(), Duration::from_millis(100));
        assert_eq!(audio.sample_rate(), None);
        assert_eq!(audio.channels(), None);
        assert_eq!(Audio::default().device(), "default");
    }

    #[test]
    fn test_deserialize() {
        let yaml = r#"
            device: mock-loopback
            buffer: 20ms
            sample_rate: 44100
            channels: 1
        "#;

        let audio: Audio = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(audio.device(), "mock-loopback");
        assert_eq!(audio.buffer_duration().unwrap(), Duration::from_millis(20));
        assert_eq!(audio.sample_rate(), Some(44100));
        assert_eq!(audio.channels(), Some(1));
    }

    #[test]
    fn test_bad_buffer() {
        let audio = Audio::new("mock").with_buffer("soon");
        assert!(matches!(
            audio.buffer_duration(),
            Err(ConfigError::Duration { .. })
        ));
    }
}

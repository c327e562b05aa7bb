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
use std::{path::Path, time::Duration};

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

mod audio;
mod error;
mod settings;

pub use self::audio::Audio;
pub use self::error::ConfigError;
pub use self::settings::{GeneratorSettings, ScopeSettings, Settings};

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

/// The configuration for the instrument: both audio devices, the tick rate
/// and the starting settings of both engines.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Instrument {
    /// The playback device that carries the generator output.
    output: Audio,
    /// The capture device the scope reads.
    input: Audio,
    /// How often the engines are ticked, as a duration string (default: 16ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    tick_interval: Option<String>,
    generator: GeneratorSettings,
    scope: ScopeSettings,
}

impl Instrument {
    /// Creates an instrument configuration with the given devices and default settings.
    pub fn new(output: Audio, input: Audio) -> Instrument {
        Instrument {
            output,
            input,
            ..Default::default()
        }
    }

    /// Parse an instrument configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Instrument, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Instrument>()?)
    }

    /// Parse an instrument configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Instrument, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Instrument>()?)
    }

    /// Serialize and save the configuration to a file at the given path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let serialized = serde_yml::to_string(self)?;
        std::fs::write(path, serialized)?;
        info!(path = %path.display(), "Saved instrument configuration.");
        Ok(())
    }

    pub fn output(&self) -> &Audio {
        &self.output
    }

    pub fn input(&self) -> &Audio {
        &self.input
    }

    /// Returns the tick interval (default: 16ms).
    pub fn tick_interval(&self) -> Result<Duration, ConfigError> {
        match &self.tick_interval {
            Some(tick_interval) => audio::parse_duration(tick_interval),
            None => Ok(DEFAULT_TICK_INTERVAL),
        }
    }

    /// Returns the engine settings.
    pub fn settings(&self) -> Settings {
        Settings {
            generator: self.generator.clone(),
            scope: self.scope.clone(),
        }
    }

    /// Replaces the engine settings.
    pub fn set_settings(&mut self, settings: Settings) {
        self.generator = settings.generator;
        self.scope = settings.scope;
    }
}

#[cfg(test)]
mod tests {
    use crate::scope::AcquisitionMode;
    use crate::waveform::WaveformKind;

    use super::*;

    #[test]
    fn test_full_instrument_yaml() {
        let yaml = r#"
            output:
              device: mock-loopback
              buffer: 50ms
              sample_rate: 48000
              channels: 2
            input:
              device: mock-loopback
            tick_interval: 10ms
            generator:
              waveform: square
              frequency: 440
              amplitude: 0.5
              duty_cycle: 25
              enabled: true
            scope:
              mode: rolling
              trigger_level: 0.1
              enabled: false
              visible_width: 2048
        "#;

        let instrument = Instrument::from_yaml(yaml).unwrap();
        assert_eq!(instrument.output().device(), "mock-loopback");
        assert_eq!(
            instrument.output().buffer_duration().unwrap(),
            Duration::from_millis(50)
        );
        assert_eq!(instrument.output().channels(), Some(2));
        assert_eq!(instrument.input().device(), "mock-loopback");
        assert_eq!(instrument.input().sample_rate(), None);
        assert_eq!(instrument.tick_interval().unwrap(), Duration::from_millis(10));

        let settings = instrument.settings();
        assert_eq!(settings.generator.frequency, 440.0);
        assert_eq!(settings.generator.duty_cycle, 25.0);
        assert!(settings.generator.enabled);
        assert_eq!(settings.scope.mode, AcquisitionMode::Rolling);
        assert_eq!(settings.scope.visible_width, 2048.0);
        assert!(!settings.scope.enabled);
    }

    #[test]
    fn test_defaults() {
        let instrument = Instrument::from_yaml("tick_interval: 20ms").unwrap();
        assert_eq!(instrument.output().device(), "default");
        assert_eq!(instrument.input().device(), "default");
        assert_eq!(instrument.tick_interval().unwrap(), Duration::from_millis(20));
        assert_eq!(instrument.settings(), Settings::default());
        assert_eq!(
            Instrument::default().tick_interval().unwrap(),
            DEFAULT_TICK_INTERVAL
        );
    }

    #[test]
    fn test_unknown_waveform_is_rejected() {
        let yaml = r#"
            generator:
              waveform: noise
        "#;
        assert!(matches!(
            Instrument::from_yaml(yaml),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instrument.yaml");

        let mut instrument = Instrument::new(
            Audio::new("mock-loopback").with_buffer("40ms"),
            Audio::new("mock-loopback"),
        );
        let mut settings = instrument.settings();
        settings.generator.waveform = WaveformKind::Triangle;
        settings.scope.trigger_level = 0.75;
        instrument.set_settings(settings);
        instrument.save(&path).unwrap();

        assert_eq!(Instrument::deserialize(&path).unwrap(), instrument);
    }
}

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
// Engine settings: the persisted parameter state of the generator and the
// scope. Each settings struct lists its fields explicitly so they can be read
// and written by name, loaded from YAML and saved back.
//

use std::{fmt::Display, path::Path, str::FromStr};

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ConfigError;
use crate::scope::AcquisitionMode;
use crate::waveform::WaveformKind;

fn parse_field<T>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(field, value, e))
}

/// The generator's tunables.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GeneratorSettings {
    pub waveform: WaveformKind,
    /// Frequency in Hz.
    pub frequency: f32,
    /// Peak amplitude in volts.
    pub amplitude: f32,
    /// Duty cycle in percent.
    pub duty_cycle: f32,
    /// Whether the output stream runs.
    pub enabled: bool,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        GeneratorSettings {
            waveform: WaveformKind::Sine,
            frequency: 1000.0,
            amplitude: 1.0,
            duty_cycle: 50.0,
            enabled: false,
        }
    }
}

impl GeneratorSettings {
    pub const FIELDS: [&'static str; 5] =
        ["waveform", "frequency", "amplitude", "duty_cycle", "enabled"];

    pub fn get_field(&self, field: &str) -> Result<String, ConfigError> {
        Ok(match field {
            "waveform" => self.waveform.to_string(),
            "frequency" => self.frequency.to_string(),
            "amplitude" => self.amplitude.to_string(),
            "duty_cycle" => self.duty_cycle.to_string(),
            "enabled" => self.enabled.to_string(),
            _ => return Err(ConfigError::UnknownField(field.to_string())),
        })
    }

    pub fn set_field(&mut self, field: &str, value: &str) -> Result<(), ConfigError> {
        match field {
            "waveform" => self.waveform = parse_field(field, value)?,
            "frequency" => self.frequency = parse_field(field, value)?,
            "amplitude" => self.amplitude = parse_field(field, value)?,
            "duty_cycle" => self.duty_cycle = parse_field(field, value)?,
            "enabled" => self.enabled = parse_field(field, value)?,
            _ => return Err(ConfigError::UnknownField(field.to_string())),
        }
        Ok(())
    }
}

/// The scope's tunables.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ScopeSettings {
    pub mode: AcquisitionMode,
    pub trigger_level: f32,
    /// Whether the capture stream runs.
    pub enabled: bool,
    /// Visible plot width in device samples; drives decimation.
    pub visible_width: f32,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        ScopeSettings {
            mode: AcquisitionMode::Trigger,
            trigger_level: 0.0,
            enabled: true,
            visible_width: 512.0,
        }
    }
}

impl ScopeSettings {
    pub const FIELDS: [&'static str; 4] = ["mode", "trigger_level", "enabled", "visible_width"];

    pub fn get_field(&self, field: &str) -> Result<String, ConfigError> {
        Ok(match field {
            "mode" => self.mode.to_string(),
            "trigger_level" => self.trigger_level.to_string(),
            "enabled" => self.enabled.to_string(),
            "visible_width" => self.visible_width.to_string(),
            _ => return Err(ConfigError::UnknownField(field.to_string())),
        })
    }

    pub fn set_field(&mut self, field: &str, value: &str) -> Result<(), ConfigError> {
        match field {
            "mode" => self.mode = parse_field(field, value)?,
            "trigger_level" => self.trigger_level = parse_field(field, value)?,
            "enabled" => self.enabled = parse_field(field, value)?,
            "visible_width" => self.visible_width = parse_field(field, value)?,
            _ => return Err(ConfigError::UnknownField(field.to_string())),
        }
        Ok(())
    }
}

/// The settings of both engines, as saved to and loaded from disk.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub generator: GeneratorSettings,
    pub scope: ScopeSettings,
}

impl Settings {
    /// Parse settings from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Settings, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Settings>()?)
    }

    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Settings, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Settings>()?)
    }

    /// Serialize and save the settings to a file at the given path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let serialized = serde_yml::to_string(self)?;
        std::fs::write(path, serialized)?;
        info!(path = %path.display(), "Saved settings.");
        Ok(())
    }

    /// Every field name, qualified by its engine, e.g. "generator.frequency".
    pub fn fields() -> impl Iterator<Item = String> {
        let generator = GeneratorSettings::FIELDS
            .into_iter()
            .map(|field| format!("generator.{}", field));
        let scope = ScopeSettings::FIELDS
            .into_iter()
            .map(|field| format!("scope.{}", field));
        generator.chain(scope)
    }

    pub fn get_field(&self, field: &str) -> Result<String, ConfigError> {
        match field.split_once('.') {
            Some(("generator", name)) => self.generator.get_field(name),
            Some(("scope", name)) => self.scope.get_field(name),
            _ => Err(ConfigError::UnknownField(field.to_string())),
        }
    }

    pub fn set_field(&mut self, field: &str, value: &str) -> Result<(), ConfigError> {
        match field.split_once('.') {
            Some(("generator", name)) => self.generator.set_field(name, value),
            Some(("scope", name)) => self.scope.set_field(name, value),
            _ => Err(ConfigError::UnknownField(field.to_string())),
        }
    }

    /// Applies "field=value" overrides in order.
    pub fn apply_overrides<S: AsRef<str>>(&mut self, overrides: &[S]) -> Result<(), ConfigError> {
        for entry in overrides {
            let entry = entry.as_ref();
            let (field, value) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::invalid(entry, "", "expected field=value"))?;
            self.set_field(field.trim(), value)?;
        }
        Ok(())
    }
}

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
use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use serde::Serialize;
use sigscope::audio;
use sigscope::config::{self, Settings};
use sigscope::instrument::Instrument;
use sigscope::util::{filename_display, seconds_si};
use sigscope::waveform::{self, WaveformKind};
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A signal generator and oscilloscope for the system audio interface."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio input and output devices.
    Devices {},
    /// Lists every settable field with its default value.
    Fields {},
    /// Prints one cycle of a waveform as the preview plot would show it.
    Preview {
        /// The waveform: sine, rectangular, triangle or sawtooth.
        waveform: String,
        /// Peak amplitude in volts.
        #[arg(short, long, default_value_t = 1.0)]
        amplitude: f32,
        /// Duty cycle in percent.
        #[arg(short, long, default_value_t = 50.0)]
        duty_cycle: f32,
        /// Number of points across the cycle.
        #[arg(short, long, default_value_t = 32)]
        points: usize,
        /// Print the curve as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Runs the generator and the scope from an instrument config.
    Run {
        /// The path to the instrument config.
        config_path: String,
        /// Overrides a setting. Should be in the form <FIELD>=<VALUE>,
        /// for example generator.frequency=440.
        #[arg(short, long)]
        set: Vec<String>,
        /// How long to run for, e.g. 10s. Runs until interrupted when unset.
        #[arg(short, long)]
        duration: Option<String>,
        /// Saves the final configuration to this path.
        #[arg(long)]
        save: Option<String>,
    },
}

#[derive(Serialize)]
struct Preview {
    waveform: WaveformKind,
    amplitude: f32,
    duty_cycle: f32,
    points: Vec<f32>,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Fields {} => {
            let defaults = Settings::default();
            for field in Settings::fields() {
                println!("{} = {}", field, defaults.get_field(&field)?);
            }
        }
        Commands::Preview {
            waveform,
            amplitude,
            duty_cycle,
            points,
            json,
        } => {
            let kind: WaveformKind = waveform.parse()?;
            if points == 0 {
                return Err("at least one point is required".into());
            }
            let curve = waveform::render_preview_curve(kind, amplitude, duty_cycle, points);

            if json {
                let preview = Preview {
                    waveform: kind,
                    amplitude,
                    duty_cycle,
                    points: curve,
                };
                println!("{}", serde_json::to_string_pretty(&preview)?);
                return Ok(());
            }

            println!("{} ({} V, {}% duty):", kind, amplitude, duty_cycle);
            for (i, value) in curve.iter().enumerate() {
                println!("{:>8.4} {:>9.4}", i as f64 / points as f64, value);
            }
        }
        Commands::Run {
            config_path,
            set,
            duration,
            save,
        } => {
            let mut instrument_config =
                config::Instrument::deserialize(&PathBuf::from(&config_path))?;
            let mut settings = instrument_config.settings();
            settings.apply_overrides(&set)?;
            instrument_config.set_settings(settings);

            let duration = duration
                .map(|duration| DurationString::from_string(duration).map(Duration::from))
                .transpose()?;
            let interval = instrument_config.tick_interval()?;

            let mut instrument = Instrument::open(&instrument_config)?;
            if let Some(scope) = instrument.scope() {
                let (low, high) = scope.bounds();
                info!(
                    skip = scope.samples_to_skip(),
                    low = seconds_si(f64::from(low)),
                    high = seconds_si(f64::from(high)),
                    "Scope window."
                );
            }

            let statistics = instrument.run(interval, duration);
            println!(
                "Ran {} ticks: {} plot updates, {} triggers.",
                statistics.ticks, statistics.plot_updates, statistics.triggers
            );

            if let Some(save) = save {
                let path = PathBuf::from(save);
                instrument_config.set_settings(instrument.settings());
                instrument_config.save(&path)?;
                println!("Saved configuration to {}.", filename_display(&path));
            }
        }
    }

    Ok(())
}

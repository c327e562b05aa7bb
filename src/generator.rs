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
// The generator: keeps the playback device's buffer topped up with the
// selected waveform. Each tick asks the device how many frames are free and
// synthesizes exactly that many, continuing from the phase the previous fill
// ended on.
//

use std::time::Duration;

use tracing::{debug, error, info, span, trace, warn, Level, Span};

use crate::audio::{DeviceError, Direction, PlaybackDevice, StreamFormat};
use crate::config::GeneratorSettings;
use crate::events::Signal;
use crate::plot::{PlotBuffer, PlotData, PLOT_POINTS};
use crate::waveform::{self, PhaseAccumulator, WaveformKind, WaveformParameters};

/// Returns `value` clamped into `[min, max]`, or `None` if it is not a number.
fn sanitize(name: &'static str, value: f32, min: f32, max: f32) -> Option<f32> {
    if !value.is_finite() {
        warn!(parameter = name, value, "Ignoring non-finite value.");
        return None;
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(parameter = name, value, clamped, "Value out of range, clamping.");
    }
    Some(clamped)
}

/// The signal generator engine.
pub struct Generator {
    device: Box<dyn PlaybackDevice>,
    format: StreamFormat,
    parameters: WaveformParameters,
    phase: PhaseAccumulator,
    preview: PlotBuffer,
    preview_scratch: Vec<f32>,
    enabled: bool,
    failed: bool,

    plot_updated: Signal<()>,
    device_failed: Signal<DeviceError>,

    /// The logging span.
    span: Span,
}

impl Generator {
    /// Creates a generator on the given playback device. The device buffer is
    /// filled completely before returning so that output starts without an
    /// underrun, and the stream is started if the settings enable it.
    pub fn new(
        device: Box<dyn PlaybackDevice>,
        settings: &GeneratorSettings,
    ) -> Result<Generator, DeviceError> {
        let format = device.format();
        let mut generator = Generator {
            device,
            format,
            parameters: WaveformParameters::default(),
            phase: PhaseAccumulator::new(),
            preview: PlotBuffer::new(PLOT_POINTS),
            preview_scratch: vec![0.0; PLOT_POINTS],
            enabled: false,
            failed: false,
            plot_updated: Signal::new(),
            device_failed: Signal::new(),
            span: span!(Level::INFO, "generator"),
        };
        generator.set_waveform(settings.waveform);
        generator.set_frequency(settings.frequency);
        generator.set_amplitude(settings.amplitude);
        generator.set_duty_cycle(settings.duty_cycle);
        generator.render_preview();

        let prefilled = generator.fill()?;
        {
            let _enter = generator.span.enter();
            info!(
                device = %generator.device,
                buffer_frames = generator.device.buffer_frames(),
                prefilled,
                "Generator ready."
            );
        }

        if settings.enabled {
            generator.device.start()?;
            generator.enabled = true;
        }
        Ok(generator)
    }

    /// Starts or stops the output stream. Enabling a generator whose device
    /// failed returns `DeviceError::Unavailable`; disabling it is always fine.
    pub fn enable(&mut self, on: bool) -> Result<(), DeviceError> {
        let _enter = self.span.clone().entered();
        if self.failed {
            return match on {
                true => Err(DeviceError::Unavailable {
                    direction: Direction::Playback,
                }),
                false => Ok(()),
            };
        }
        if on == self.enabled {
            return Ok(());
        }

        let result = match on {
            true => self.device.start(),
            false => self.device.stop(),
        };
        if let Err(e) = result {
            self.fail(&e);
            return Err(e);
        }

        self.enabled = on;
        info!(enabled = on, "Generator output toggled.");
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True once the playback device has failed. A failed generator stays disabled.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn set_waveform(&mut self, kind: WaveformKind) {
        if kind == self.parameters.kind {
            return;
        }
        let _enter = self.span.clone().entered();
        debug!(waveform = %kind, "Waveform changed.");
        self.parameters.kind = kind;
        self.render_preview();
    }

    /// Sets the frequency in Hz. The phase carries on from where it is.
    pub fn set_frequency(&mut self, frequency: f32) {
        let _enter = self.span.enter();
        let Some(frequency) = sanitize("frequency", frequency, 0.0, f32::MAX) else {
            return;
        };
        if frequency == self.parameters.frequency {
            return;
        }
        if frequency > self.format.sample_rate as f32 / 2.0 {
            warn!(
                frequency,
                sample_rate = self.format.sample_rate,
                "Frequency above Nyquist, output will alias."
            );
        }
        debug!(frequency, "Frequency changed.");
        self.parameters.frequency = frequency;
    }

    /// Sets the peak amplitude in volts.
    pub fn set_amplitude(&mut self, amplitude: f32) {
        let _enter = self.span.clone().entered();
        let Some(amplitude) = sanitize("amplitude", amplitude, 0.0, f32::MAX) else {
            return;
        };
        if amplitude == self.parameters.amplitude {
            return;
        }
        debug!(amplitude, "Amplitude changed.");
        self.parameters.amplitude = amplitude;
        self.render_preview();
    }

    /// Sets the duty cycle in percent.
    pub fn set_duty_cycle(&mut self, duty_cycle: f32) {
        let _enter = self.span.clone().entered();
        let Some(duty_cycle) = sanitize("duty_cycle", duty_cycle, 0.0, 100.0) else {
            return;
        };
        if duty_cycle == self.parameters.duty_cycle {
            return;
        }
        debug!(duty_cycle, "Duty cycle changed.");
        self.parameters.duty_cycle = duty_cycle;
        self.render_preview();
    }

    pub fn waveform(&self) -> WaveformKind {
        self.parameters.kind
    }

    pub fn frequency(&self) -> f32 {
        self.parameters.frequency
    }

    pub fn amplitude(&self) -> f32 {
        self.parameters.amplitude
    }

    pub fn duty_cycle(&self) -> f32 {
        self.parameters.duty_cycle
    }

    pub fn parameters(&self) -> WaveformParameters {
        self.parameters
    }

    /// The phase the next synthesized frame starts at.
    pub fn phase(&self) -> f64 {
        self.phase.phase()
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// A read handle onto the one-cycle preview curve.
    pub fn plot_data(&self) -> PlotData {
        self.preview.reader()
    }

    /// The current tunables.
    pub fn settings(&self) -> GeneratorSettings {
        GeneratorSettings {
            waveform: self.parameters.kind,
            frequency: self.parameters.frequency,
            amplitude: self.parameters.amplitude,
            duty_cycle: self.parameters.duty_cycle,
            enabled: self.enabled,
        }
    }

    /// Applies every tunable in `settings`, including the enabled state.
    pub fn apply_settings(&mut self, settings: &GeneratorSettings) -> Result<(), DeviceError> {
        self.set_waveform(settings.waveform);
        self.set_frequency(settings.frequency);
        self.set_amplitude(settings.amplitude);
        self.set_duty_cycle(settings.duty_cycle);
        self.enable(settings.enabled)
    }

    /// Called whenever the preview curve changes.
    pub fn on_plot_updated<F: FnMut() + 'static>(&mut self, mut callback: F) {
        self.plot_updated.connect(move |_| callback());
    }

    /// Called once when the playback device fails.
    pub fn on_device_failed<F: FnMut(&DeviceError) + 'static>(&mut self, callback: F) {
        self.device_failed.connect(callback);
    }

    /// Tops up the playback buffer. A device failure disables the generator and
    /// is returned once; later ticks do nothing.
    ///
    /// The buffer is topped up even while output is disabled. A stopped stream
    /// consumes nothing, so this only fills what was freed before it stopped
    /// and output resumes without an underrun.
    pub fn tick(&mut self, _delta: Duration) -> Result<(), DeviceError> {
        if self.failed {
            return Ok(());
        }
        match self.fill() {
            Ok(frames) => {
                trace!(frames, phase = self.phase.phase(), "Filled.");
                Ok(())
            }
            Err(e) => {
                let _enter = self.span.clone().entered();
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Synthesizes every free frame of the device buffer. Returns the number of frames written.
    fn fill(&mut self) -> Result<usize, DeviceError> {
        let frames = self.device.available_free_frames()?;
        if frames == 0 {
            return Ok(0);
        }

        let channels = usize::from(self.format.channels);
        let sample_rate = f64::from(self.format.sample_rate);
        let frequency = f64::from(self.parameters.frequency);
        let WaveformParameters {
            kind,
            amplitude,
            duty_cycle,
            ..
        } = self.parameters;
        let phase = self.phase;

        let region = self.device.claim_write_region(frames)?;
        for (i, frame) in region.chunks_exact_mut(channels).enumerate() {
            let value = waveform::sample(
                kind,
                phase.ahead(i, frequency, sample_rate),
                amplitude,
                duty_cycle,
            );
            frame.fill(value);
        }
        self.device.commit_write_region(frames)?;

        self.phase.advance(frames, frequency, sample_rate);
        Ok(frames)
    }

    fn render_preview(&mut self) {
        waveform::render_preview_into(
            &mut self.preview_scratch,
            self.parameters.kind,
            self.parameters.amplitude,
            self.parameters.duty_cycle,
        );
        self.preview.fill_from(&self.preview_scratch);
        self.plot_updated.emit(&());
    }

    fn fail(&mut self, err: &DeviceError) {
        error!(
            err = %err,
            device = %self.device,
            "Playback device failed, disabling the generator."
        );
        self.failed = true;
        self.enabled = false;
        if let Err(e) = self.device.stop() {
            debug!(err = %e, "Unable to stop the failed playback device.");
        }
        self.device_failed.emit(err);
    }
}

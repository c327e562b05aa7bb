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
// cpal backend. cpal pulls and pushes audio from its own callback threads,
// while the engines poll from the tick thread. Each stream gets a lock-free
// single-producer/single-consumer ring between the two sides; its fill level
// is the backpressure signal the engines poll.
//

use std::{
    cell::UnsafeCell,
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample as _;
use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, span, warn, Level};

use super::{thread_priority, DeviceError, DeviceInfo, Direction, StreamFormat};
use crate::config;

/// Lock-free circular buffer shared between the tick thread and a cpal callback.
struct CircularBuffer {
    /// Backing buffer
    buffer: Box<[UnsafeCell<f32>]>,
    /// Capacity (must be power of 2)
    capacity: usize,
    /// Read position (consumer)
    read_pos: AtomicUsize,
    /// Write position (producer)
    write_pos: AtomicUsize,
}

// The producer only writes slots outside [read_pos, write_pos) and the
// consumer only reads slots inside it, so the two sides never alias.
unsafe impl Sync for CircularBuffer {}

impl CircularBuffer {
    fn new(capacity: usize) -> Self {
        // Round up to next power of 2 for efficient modulo
        let cap = capacity.next_power_of_two();
        Self {
            buffer: (0..cap).map(|_| UnsafeCell::new(0.0)).collect(),
            capacity: cap,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
        }
    }

    /// Get number of samples available to read
    #[inline]
    fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        if write >= read {
            write - read
        } else {
            self.capacity - read + write
        }
    }

    /// Get space available to write
    #[inline]
    fn space(&self) -> usize {
        self.capacity - self.available() - 1
    }

    #[inline]
    fn slot(&self, index: usize) -> *mut f32 {
        self.buffer[index].get()
    }

    /// Writes whole frames of interleaved samples. Returns the number of
    /// samples written, which is always a multiple of `channels`.
    fn write_frames(&self, samples: &[f32], channels: usize) -> usize {
        let to_write = (self.space().min(samples.len()) / channels) * channels;
        if to_write == 0 {
            return 0;
        }
        let write = self.write_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;

        for (offset, sample) in samples[..to_write].iter().enumerate() {
            unsafe {
                *self.slot((write + offset) & mask) = *sample;
            }
        }

        self.write_pos
            .store((write + to_write) & mask, Ordering::Release);
        to_write
    }

    /// Reads samples into `output`. Returns the number of samples read.
    fn read(&self, output: &mut [f32]) -> usize {
        let to_read = self.available().min(output.len());
        if to_read == 0 {
            return 0;
        }
        let read = self.read_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;

        for (offset, sample) in output[..to_read].iter_mut().enumerate() {
            unsafe {
                *sample = *self.slot((read + offset) & mask);
            }
        }

        self.read_pos
            .store((read + to_read) & mask, Ordering::Release);
        to_read
    }
}

fn host_devices(
    direction: Direction,
    host: &cpal::Host,
) -> Result<Vec<cpal::Device>, cpal::DevicesError> {
    Ok(match direction {
        Direction::Playback => host.output_devices()?.collect(),
        Direction::Capture => host.input_devices()?.collect(),
    })
}

/// Finds the named device, or the default host's default device for "default".
fn find_device(direction: Direction, name: &str) -> Result<cpal::Device, DeviceError> {
    if name == "default" {
        let host = cpal::default_host();
        let device = match direction {
            Direction::Playback => host.default_output_device(),
            Direction::Capture => host.default_input_device(),
        };
        return device.ok_or_else(|| DeviceError::NotFound {
            direction,
            name: name.to_string(),
        });
    }

    for host_id in cpal::available_hosts() {
        let host = cpal::host_from_id(host_id).map_err(|e| DeviceError::init(direction, e))?;
        let devices = match host_devices(direction, &host) {
            Ok(devices) => devices,
            Err(e) => {
                warn!(err = %e, host = host_id.name(), "Unable to list devices for host");
                continue;
            }
        };
        if let Some(device) = devices
            .into_iter()
            .find(|device| device.name().is_ok_and(|n| n.trim() == name))
        {
            return Ok(device);
        }
    }

    Err(DeviceError::NotFound {
        direction,
        name: name.to_string(),
    })
}

/// Picks a stream configuration, honoring the configured sample rate and
/// channel count when given and falling back to the device default.
fn choose_config(
    device: &cpal::Device,
    direction: Direction,
    config: &config::Audio,
) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    let init = |e: &dyn fmt::Display| DeviceError::init(direction, e);
    let default = match direction {
        Direction::Playback => device.default_output_config(),
        Direction::Capture => device.default_input_config(),
    }
    .map_err(|e| init(&e))?;

    let sample_rate = config.sample_rate().unwrap_or(default.sample_rate().0);
    let channels = config.channels().unwrap_or(default.channels());
    if sample_rate == default.sample_rate().0 && channels == default.channels() {
        return Ok(default);
    }

    let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Playback => device
            .supported_output_configs()
            .map_err(|e| init(&e))?
            .collect(),
        Direction::Capture => device
            .supported_input_configs()
            .map_err(|e| init(&e))?
            .collect(),
    };
    ranges
        .into_iter()
        .find(|range| {
            range.channels() == channels
                && range.min_sample_rate().0 <= sample_rate
                && sample_rate <= range.max_sample_rate().0
        })
        .map(|range| range.with_sample_rate(cpal::SampleRate(sample_rate)))
        .ok_or_else(|| {
            DeviceError::init(
                direction,
                format!(
                    "device does not support {}Hz with {} channels",
                    sample_rate, channels
                ),
            )
        })
}

fn error_callback(
    direction: Direction,
    errors: Sender<String>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        error!(%direction, err = %err, "CPAL stream error");
        let _ = errors.send(err.to_string());
    }
}

/// Builds an output stream that drains the ring, zero-filling any shortfall.
fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<CircularBuffer>,
    errors: Sender<String>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let priority = thread_priority::callback_thread_priority();
    let rt_audio = thread_priority::rt_audio_enabled();
    let mut priority_set = false;
    let mut temp: Vec<f32> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            thread_priority::configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
            temp.resize(data.len(), 0.0);
            let read = ring.read(&mut temp);
            // Zero-fill any shortfall
            temp[read..].fill(0.0);
            for (dst, &src) in data.iter_mut().zip(temp.iter()) {
                *dst = T::from_sample(src);
            }
        },
        error_callback(Direction::Playback, errors),
        None,
    )
}

/// Builds an input stream that feeds the ring, counting frames dropped on overrun.
fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<CircularBuffer>,
    overruns: Arc<AtomicUsize>,
    errors: Sender<String>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let priority = thread_priority::callback_thread_priority();
    let rt_audio = thread_priority::rt_audio_enabled();
    let mut priority_set = false;
    let channels = usize::from(config.channels);
    let mut temp: Vec<f32> = Vec::new();

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            thread_priority::configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
            temp.clear();
            temp.extend(data.iter().map(|sample| sample.to_sample::<f32>()));
            let written = ring.write_frames(&temp, channels);
            if written < temp.len() {
                overruns.fetch_add((temp.len() - written) / channels, Ordering::Relaxed);
            }
        },
        error_callback(Direction::Capture, errors),
        None,
    )
}

/// Everything needed to open a stream in one direction.
struct OpenedStream {
    name: String,
    format: StreamFormat,
    buffer_frames: usize,
    sample_format: cpal::SampleFormat,
    device: cpal::Device,
    stream_config: cpal::StreamConfig,
    ring: Arc<CircularBuffer>,
}

fn prepare(direction: Direction, config: &config::Audio) -> Result<OpenedStream, DeviceError> {
    // Suppress noisy backend output while probing devices.
    let _shh_stderr = shh::stderr().map_err(|e| DeviceError::init(direction, e))?;

    let device = find_device(direction, config.device())?;
    let name = device
        .name()
        .map_err(|e| DeviceError::init(direction, e))?;
    let supported = choose_config(&device, direction, config)?;
    let format = StreamFormat::new(supported.sample_rate().0, supported.channels())
        .map_err(|e| DeviceError::init(direction, e))?;
    let buffer = config
        .buffer_duration()
        .map_err(|e| DeviceError::init(direction, e))?;
    let buffer_frames = format.frames_in(buffer).max(1);
    let ring = Arc::new(CircularBuffer::new(format.samples_in(buffer_frames) + 1));

    Ok(OpenedStream {
        name,
        format,
        buffer_frames,
        sample_format: supported.sample_format(),
        stream_config: supported.config(),
        device,
        ring,
    })
}

fn unsupported_format(direction: Direction, format: cpal::SampleFormat) -> DeviceError {
    DeviceError::init(direction, format!("unsupported sample format {}", format))
}

fn take_stream_error(errors: &Receiver<String>, direction: Direction) -> Result<(), DeviceError> {
    match errors.try_recv() {
        Ok(reason) => Err(DeviceError::io(direction, "stream", reason)),
        Err(_) => Ok(()),
    }
}

/// A cpal output stream exposed through the poll protocol.
pub struct PlaybackDevice {
    name: String,
    format: StreamFormat,
    buffer_frames: usize,
    ring: Arc<CircularBuffer>,
    scratch: Vec<f32>,
    claimed: Option<usize>,
    running: bool,
    errors: Receiver<String>,
    stream: cpal::Stream,
}

impl PlaybackDevice {
    /// Opens the configured output device. The stream is created paused.
    pub fn open(config: &config::Audio) -> Result<PlaybackDevice, DeviceError> {
        let span = span!(Level::INFO, "open playback (cpal)");
        let _enter = span.enter();

        let direction = Direction::Playback;
        let opened = prepare(direction, config)?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let device = &opened.device;
        let stream_config = &opened.stream_config;
        let ring = opened.ring.clone();
        let stream = match opened.sample_format {
            cpal::SampleFormat::F32 => build_output::<f32>(device, stream_config, ring, tx),
            cpal::SampleFormat::I16 => build_output::<i16>(device, stream_config, ring, tx),
            cpal::SampleFormat::I32 => build_output::<i32>(device, stream_config, ring, tx),
            cpal::SampleFormat::U16 => build_output::<u16>(device, stream_config, ring, tx),
            other => return Err(unsupported_format(direction, other)),
        }
        .map_err(|e| DeviceError::init(direction, e))?;
        stream.pause().map_err(|e| DeviceError::init(direction, e))?;

        info!(
            device = opened.name,
            format = %opened.format,
            buffer_frames = opened.buffer_frames,
            "Opened playback device."
        );

        Ok(PlaybackDevice {
            name: opened.name,
            format: opened.format,
            buffer_frames: opened.buffer_frames,
            ring: opened.ring,
            scratch: Vec::new(),
            claimed: None,
            running: false,
            errors: rx,
            stream,
        })
    }

    fn free_frames(&self) -> usize {
        let queued = self.ring.available() / usize::from(self.format.channels);
        self.buffer_frames.saturating_sub(queued)
    }
}

impl super::PlaybackDevice for PlaybackDevice {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if !self.running {
            self.stream
                .play()
                .map_err(|e| DeviceError::io(Direction::Playback, "start", e))?;
            self.running = true;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        if self.running {
            self.stream
                .pause()
                .map_err(|e| DeviceError::io(Direction::Playback, "stop", e))?;
            self.running = false;
        }
        Ok(())
    }

    fn available_free_frames(&mut self) -> Result<usize, DeviceError> {
        take_stream_error(&self.errors, Direction::Playback)?;
        Ok(self.free_frames())
    }

    fn claim_write_region(&mut self, frames: usize) -> Result<&mut [f32], DeviceError> {
        take_stream_error(&self.errors, Direction::Playback)?;
        let free = self.free_frames();
        if self.claimed.is_some() || frames > free {
            return Err(DeviceError::io(
                Direction::Playback,
                "claim",
                format!("cannot claim {} frames ({} free)", frames, free),
            ));
        }
        self.claimed = Some(frames);
        self.scratch.clear();
        self.scratch.resize(self.format.samples_in(frames), 0.0);
        Ok(&mut self.scratch[..])
    }

    fn commit_write_region(&mut self, frames: usize) -> Result<(), DeviceError> {
        match self.claimed.take() {
            Some(claimed) if frames <= claimed => {
                let samples = self.format.samples_in(frames);
                let written = self
                    .ring
                    .write_frames(&self.scratch[..samples], usize::from(self.format.channels));
                if written < samples {
                    return Err(DeviceError::io(
                        Direction::Playback,
                        "commit",
                        format!("only {} of {} samples fit", written, samples),
                    ));
                }
                Ok(())
            }
            _ => Err(DeviceError::io(
                Direction::Playback,
                "commit",
                "commit does not match the claimed region",
            )),
        }
    }
}

impl fmt::Display for PlaybackDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (playback, {})", self.name, self.format)
    }
}

/// A cpal input stream exposed through the poll protocol.
pub struct CaptureDevice {
    name: String,
    format: StreamFormat,
    buffer_frames: usize,
    ring: Arc<CircularBuffer>,
    region: Vec<f32>,
    claimed: Option<usize>,
    running: bool,
    overruns: Arc<AtomicUsize>,
    errors: Receiver<String>,
    stream: cpal::Stream,
}

impl CaptureDevice {
    /// Opens the configured input device. The stream is created paused.
    pub fn open(config: &config::Audio) -> Result<CaptureDevice, DeviceError> {
        let span = span!(Level::INFO, "open capture (cpal)");
        let _enter = span.enter();

        let direction = Direction::Capture;
        let opened = prepare(direction, config)?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let overruns = Arc::new(AtomicUsize::new(0));
        let device = &opened.device;
        let stream_config = &opened.stream_config;
        let ring = opened.ring.clone();
        let counter = overruns.clone();
        let stream = match opened.sample_format {
            cpal::SampleFormat::F32 => build_input::<f32>(device, stream_config, ring, counter, tx),
            cpal::SampleFormat::I16 => build_input::<i16>(device, stream_config, ring, counter, tx),
            cpal::SampleFormat::I32 => build_input::<i32>(device, stream_config, ring, counter, tx),
            cpal::SampleFormat::U16 => build_input::<u16>(device, stream_config, ring, counter, tx),
            other => return Err(unsupported_format(direction, other)),
        }
        .map_err(|e| DeviceError::init(direction, e))?;
        stream.pause().map_err(|e| DeviceError::init(direction, e))?;

        info!(
            device = opened.name,
            format = %opened.format,
            buffer_frames = opened.buffer_frames,
            "Opened capture device."
        );

        Ok(CaptureDevice {
            name: opened.name,
            format: opened.format,
            buffer_frames: opened.buffer_frames,
            ring: opened.ring,
            region: Vec::new(),
            claimed: None,
            running: false,
            overruns,
            errors: rx,
            stream,
        })
    }
}

impl super::CaptureDevice for CaptureDevice {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if !self.running {
            self.stream
                .play()
                .map_err(|e| DeviceError::io(Direction::Capture, "start", e))?;
            self.running = true;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        if self.running {
            self.stream
                .pause()
                .map_err(|e| DeviceError::io(Direction::Capture, "stop", e))?;
            self.running = false;
        }
        Ok(())
    }

    fn available_captured_frames(&mut self) -> Result<usize, DeviceError> {
        take_stream_error(&self.errors, Direction::Capture)?;
        let dropped = self.overruns.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            warn!(frames = dropped, "Capture overrun, frames dropped.");
        }
        Ok(self.ring.available() / usize::from(self.format.channels))
    }

    fn claim_read_region(&mut self) -> Result<&[f32], DeviceError> {
        take_stream_error(&self.errors, Direction::Capture)?;
        if self.claimed.is_some() {
            return Err(DeviceError::io(
                Direction::Capture,
                "claim",
                "a region is already claimed",
            ));
        }
        let channels = usize::from(self.format.channels);
        let frames = self.ring.available() / channels;
        self.region.clear();
        self.region.resize(frames * channels, 0.0);
        let read = self.ring.read(&mut self.region);
        self.region.truncate(read);
        self.claimed = Some(read / channels);
        Ok(&self.region[..])
    }

    fn release_read_region(&mut self, frames: usize) -> Result<(), DeviceError> {
        match self.claimed.take() {
            Some(claimed) if claimed == frames => Ok(()),
            _ => Err(DeviceError::io(
                Direction::Capture,
                "release",
                "release does not match the claimed region",
            )),
        }
    }
}

impl fmt::Display for CaptureDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (capture, {})", self.name, self.format)
    }
}

/// Lists cpal devices in both directions.
pub fn list_devices() -> Result<Vec<DeviceInfo>, Box<dyn Error>> {
    // Suppress noisy output here.
    let _shh_stdout = shh::stdout()?;
    let _shh_stderr = shh::stderr()?;

    let mut devices: Vec<DeviceInfo> = Vec::new();
    for host_id in cpal::available_hosts() {
        let host = cpal::host_from_id(host_id)?;
        for direction in [Direction::Playback, Direction::Capture] {
            let host_devices = match host_devices(direction, &host) {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let (max_channels, default_config) = match direction {
                    Direction::Playback => (
                        device
                            .supported_output_configs()
                            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                            .unwrap_or(0),
                        device.default_output_config().ok(),
                    ),
                    Direction::Capture => (
                        device
                            .supported_input_configs()
                            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                            .unwrap_or(0),
                        device.default_input_config().ok(),
                    ),
                };
                if max_channels == 0 {
                    continue;
                }

                devices.push(DeviceInfo {
                    name: device.name()?,
                    host: host_id.name().to_string(),
                    direction,
                    max_channels,
                    default_format: default_config.and_then(|config| {
                        StreamFormat::new(config.sample_rate().0, config.channels()).ok()
                    }),
                })
            }
        }
    }

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

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
// Mock audio devices. They implement the same poll protocol as the cpal
// backend without touching hardware. In tests the audio clock is advanced by
// hand through the handles; when selected from a config file the clock
// follows wall time so the instrument can run end to end without a sound card.
//

use std::{
    collections::VecDeque,
    fmt,
    sync::Arc,
    time::Instant,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{DeviceError, Direction, StreamFormat};
use crate::config;

/// Device name that pairs a mock playback device with a mock capture device.
pub const LOOPBACK_DEVICE: &str = "mock-loopback";

/// Device name that always fails to open.
pub const UNAVAILABLE_DEVICE: &str = "mock-unavailable";

/// How the mock device's audio clock advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    /// Frames are only consumed or produced through the test handles.
    Manual,
    /// Frames are consumed or produced at the sample rate while running.
    Realtime,
}

/// A device operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Stop,
    Poll,
    Claim,
    Commit,
    Release,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Poll => "poll",
            Operation::Claim => "claim",
            Operation::Commit => "commit",
            Operation::Release => "release",
        }
    }
}

/// Tracks elapsed wall time in whole frames, carrying the fractional remainder.
#[derive(Debug)]
struct FrameClock {
    clock: Clock,
    last_poll: Option<Instant>,
    carry: f64,
}

impl FrameClock {
    fn new(clock: Clock) -> FrameClock {
        FrameClock {
            clock,
            last_poll: None,
            carry: 0.0,
        }
    }

    /// Returns how many frames elapsed since the previous call.
    fn elapsed_frames(&mut self, sample_rate: u32) -> usize {
        if self.clock == Clock::Manual {
            return 0;
        }
        let now = Instant::now();
        let elapsed = match self.last_poll.replace(now) {
            Some(last) => now.duration_since(last).as_secs_f64(),
            None => 0.0,
        };
        let frames = elapsed * f64::from(sample_rate) + self.carry;
        self.carry = frames.fract();
        frames as usize
    }

    fn reset(&mut self) {
        self.last_poll = None;
        self.carry = 0.0;
    }
}

fn check(
    failure: &Option<Operation>,
    direction: Direction,
    operation: Operation,
) -> Result<(), DeviceError> {
    if *failure == Some(operation) {
        return Err(DeviceError::io(
            direction,
            operation.as_str(),
            "injected mock failure",
        ));
    }
    Ok(())
}

fn format_from_config(
    config: &config::Audio,
    direction: Direction,
) -> Result<(StreamFormat, usize), DeviceError> {
    if config.device() == UNAVAILABLE_DEVICE {
        return Err(DeviceError::init(direction, "mock device is unavailable"));
    }
    let format = StreamFormat::new(
        config.sample_rate().unwrap_or(48000),
        config.channels().unwrap_or(2),
    )
    .map_err(|e| DeviceError::init(direction, e))?;
    let buffer = config
        .buffer_duration()
        .map_err(|e| DeviceError::init(direction, e))?;
    Ok((format, format.frames_in(buffer).max(1)))
}

#[derive(Debug)]
struct PlaybackState {
    running: bool,
    clock: FrameClock,
    /// Committed samples the device has not played yet.
    queue: VecDeque<f32>,
    /// Every committed sample, kept only under the manual clock.
    committed: Option<Vec<f32>>,
    claimed: Option<usize>,
    loopback: Option<Sender<Vec<f32>>>,
    failure: Option<Operation>,
    starts: usize,
    stops: usize,
}

impl PlaybackState {
    /// Plays up to `frames` queued frames, forwarding them to the loopback.
    fn consume(&mut self, frames: usize, channels: usize) -> usize {
        let samples = (frames * channels).min(self.queue.len());
        let played: Vec<f32> = self.queue.drain(..samples).collect();
        if let Some(loopback) = &self.loopback {
            if !played.is_empty() {
                // A dropped capture side simply stops listening.
                let _ = loopback.send(played);
            }
        }
        samples / channels
    }
}

/// A mock playback device.
#[derive(Debug)]
pub struct PlaybackDevice {
    name: String,
    format: StreamFormat,
    buffer_frames: usize,
    scratch: Vec<f32>,
    state: Arc<Mutex<PlaybackState>>,
}

/// A handle for inspecting and driving a mock playback device from tests.
#[derive(Clone)]
pub struct PlaybackHandle {
    channels: usize,
    state: Arc<Mutex<PlaybackState>>,
}

impl PlaybackDevice {
    /// Creates a mock playback device with the given format and buffer size.
    pub fn new(
        name: &str,
        format: StreamFormat,
        buffer_frames: usize,
        clock: Clock,
    ) -> PlaybackDevice {
        PlaybackDevice {
            name: name.to_string(),
            format,
            buffer_frames,
            scratch: Vec::new(),
            state: Arc::new(Mutex::new(PlaybackState {
                running: false,
                clock: FrameClock::new(clock),
                queue: VecDeque::new(),
                committed: (clock == Clock::Manual).then(Vec::new),
                claimed: None,
                loopback: None,
                failure: None,
                starts: 0,
                stops: 0,
            })),
        }
    }

    /// Opens a real-time mock playback device from the configuration.
    pub fn open(config: &config::Audio) -> Result<PlaybackDevice, DeviceError> {
        let (format, buffer_frames) = format_from_config(config, Direction::Playback)?;
        info!(device = config.device(), %format, buffer_frames, "Opened mock playback device.");
        Ok(PlaybackDevice::new(
            config.device(),
            format,
            buffer_frames,
            Clock::Realtime,
        ))
    }

    /// Returns a handle that shares this device's state.
    pub fn handle(&self) -> PlaybackHandle {
        PlaybackHandle {
            channels: usize::from(self.format.channels),
            state: self.state.clone(),
        }
    }

    fn free_frames(&self, state: &PlaybackState) -> usize {
        let queued = state.queue.len() / usize::from(self.format.channels);
        self.buffer_frames.saturating_sub(queued)
    }
}

impl PlaybackHandle {
    /// Simulates the hardware playing up to `frames` queued frames.
    pub fn consume(&self, frames: usize) -> usize {
        self.state.lock().consume(frames, self.channels)
    }

    /// Returns every sample committed so far (manual clock only).
    pub fn committed(&self) -> Vec<f32> {
        self.state.lock().committed.clone().unwrap_or_default()
    }

    /// Returns the number of frames waiting to be played.
    pub fn queued_frames(&self) -> usize {
        self.state.lock().queue.len() / self.channels
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Returns how many times the stream was started and stopped.
    pub fn start_stop_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.starts, state.stops)
    }

    /// Makes the given operation fail from now on.
    pub fn fail_on(&self, operation: Operation) {
        self.state.lock().failure = Some(operation);
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
        let mut state = self.state.lock();
        check(&state.failure, Direction::Playback, Operation::Start)?;
        if !state.running {
            state.running = true;
            state.starts += 1;
            state.clock.reset();
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        check(&state.failure, Direction::Playback, Operation::Stop)?;
        if state.running {
            state.running = false;
            state.stops += 1;
        }
        Ok(())
    }

    fn available_free_frames(&mut self) -> Result<usize, DeviceError> {
        let channels = usize::from(self.format.channels);
        let mut state = self.state.lock();
        check(&state.failure, Direction::Playback, Operation::Poll)?;
        let elapsed = state.clock.elapsed_frames(self.format.sample_rate);
        if state.running && elapsed > 0 {
            state.consume(elapsed, channels);
        }
        Ok(self.free_frames(&state))
    }

    fn claim_write_region(&mut self, frames: usize) -> Result<&mut [f32], DeviceError> {
        {
            let mut state = self.state.lock();
            check(&state.failure, Direction::Playback, Operation::Claim)?;
            if state.claimed.is_some() {
                return Err(DeviceError::io(
                    Direction::Playback,
                    "claim",
                    "a region is already claimed",
                ));
            }
            let free = self.free_frames(&state);
            if frames > free {
                return Err(DeviceError::io(
                    Direction::Playback,
                    "claim",
                    format!("requested {} frames but only {} are free", frames, free),
                ));
            }
            state.claimed = Some(frames);
        }

        let samples = self.format.samples_in(frames);
        self.scratch.clear();
        self.scratch.resize(samples, 0.0);
        Ok(&mut self.scratch[..])
    }

    fn commit_write_region(&mut self, frames: usize) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        check(&state.failure, Direction::Playback, Operation::Commit)?;
        match state.claimed.take() {
            Some(claimed) if frames <= claimed => {
                let samples = &self.scratch[..self.format.samples_in(frames)];
                state.queue.extend(samples.iter().copied());
                if let Some(committed) = state.committed.as_mut() {
                    committed.extend_from_slice(samples);
                }
                Ok(())
            }
            Some(claimed) => Err(DeviceError::io(
                Direction::Playback,
                "commit",
                format!("committed {} frames but only {} were claimed", frames, claimed),
            )),
            None => Err(DeviceError::io(
                Direction::Playback,
                "commit",
                "no region is claimed",
            )),
        }
    }
}

impl fmt::Display for PlaybackDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock playback, {})", self.name, self.format)
    }
}

struct CaptureState {
    running: bool,
    clock: FrameClock,
    /// Captured samples not yet claimed.
    pending: VecDeque<f32>,
    loopback: Option<Receiver<Vec<f32>>>,
    claimed: Option<usize>,
    failure: Option<Operation>,
    overrun_frames: usize,
    claims: usize,
    releases: usize,
    starts: usize,
    stops: usize,
}

impl CaptureState {
    /// Queues captured samples, dropping whatever does not fit the device buffer.
    fn capture(&mut self, samples: &[f32], capacity: usize, channels: usize) {
        let room = capacity.saturating_sub(self.pending.len());
        let accepted = (samples.len().min(room) / channels) * channels;
        self.pending.extend(samples[..accepted].iter().copied());
        self.overrun_frames += (samples.len() - accepted) / channels;
    }
}

/// A mock capture device.
pub struct CaptureDevice {
    name: String,
    format: StreamFormat,
    buffer_frames: usize,
    region: Vec<f32>,
    state: Arc<Mutex<CaptureState>>,
}

/// A handle for feeding and inspecting a mock capture device from tests.
#[derive(Clone)]
pub struct CaptureHandle {
    format: StreamFormat,
    buffer_frames: usize,
    state: Arc<Mutex<CaptureState>>,
}

impl CaptureDevice {
    /// Creates a mock capture device with the given format and buffer size.
    pub fn new(
        name: &str,
        format: StreamFormat,
        buffer_frames: usize,
        clock: Clock,
    ) -> CaptureDevice {
        CaptureDevice {
            name: name.to_string(),
            format,
            buffer_frames,
            region: Vec::new(),
            state: Arc::new(Mutex::new(CaptureState {
                running: false,
                clock: FrameClock::new(clock),
                pending: VecDeque::new(),
                loopback: None,
                claimed: None,
                failure: None,
                overrun_frames: 0,
                claims: 0,
                releases: 0,
                starts: 0,
                stops: 0,
            })),
        }
    }

    /// Opens a real-time mock capture device from the configuration. It
    /// captures silence while running.
    pub fn open(config: &config::Audio) -> Result<CaptureDevice, DeviceError> {
        let (format, buffer_frames) = format_from_config(config, Direction::Capture)?;
        info!(device = config.device(), %format, buffer_frames, "Opened mock capture device.");
        Ok(CaptureDevice::new(
            config.device(),
            format,
            buffer_frames,
            Clock::Realtime,
        ))
    }

    /// Returns a handle that shares this device's state.
    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle {
            format: self.format,
            buffer_frames: self.buffer_frames,
            state: self.state.clone(),
        }
    }

    fn capacity(&self) -> usize {
        self.format.samples_in(self.buffer_frames)
    }
}

impl CaptureHandle {
    /// Simulates the hardware capturing the given interleaved samples.
    pub fn push(&self, samples: &[f32]) {
        let capacity = self.format.samples_in(self.buffer_frames);
        self.state
            .lock()
            .capture(samples, capacity, usize::from(self.format.channels));
    }

    /// Simulates the hardware capturing a mono signal, duplicated on every channel.
    pub fn push_mono(&self, samples: &[f32]) {
        let channels = usize::from(self.format.channels);
        let interleaved: Vec<f32> = samples
            .iter()
            .flat_map(|sample| std::iter::repeat(*sample).take(channels))
            .collect();
        self.push(&interleaved);
    }

    /// Returns the number of captured frames that have not been claimed.
    pub fn pending_frames(&self) -> usize {
        self.state.lock().pending.len() / usize::from(self.format.channels)
    }

    /// Returns the number of frames dropped because the buffer was full.
    pub fn overrun_frames(&self) -> usize {
        self.state.lock().overrun_frames
    }

    /// Returns how many regions were claimed and released.
    pub fn claim_release_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.claims, state.releases)
    }

    /// Returns true while a region is claimed and not yet released.
    pub fn is_claimed(&self) -> bool {
        self.state.lock().claimed.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Returns how many times the stream was started and stopped.
    pub fn start_stop_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.starts, state.stops)
    }

    /// Makes the given operation fail from now on.
    pub fn fail_on(&self, operation: Operation) {
        self.state.lock().failure = Some(operation);
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
        let mut state = self.state.lock();
        check(&state.failure, Direction::Capture, Operation::Start)?;
        if !state.running {
            state.running = true;
            state.starts += 1;
            state.clock.reset();
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        check(&state.failure, Direction::Capture, Operation::Stop)?;
        if state.running {
            state.running = false;
            state.stops += 1;
        }
        Ok(())
    }

    fn available_captured_frames(&mut self) -> Result<usize, DeviceError> {
        let capacity = self.capacity();
        let channels = usize::from(self.format.channels);
        let mut state = self.state.lock();
        check(&state.failure, Direction::Capture, Operation::Poll)?;

        let elapsed = state.clock.elapsed_frames(self.format.sample_rate);
        let looped: Vec<Vec<f32>> = match &state.loopback {
            Some(loopback) => loopback.try_iter().collect(),
            None => Vec::new(),
        };
        if state.running {
            if state.loopback.is_some() {
                for chunk in looped {
                    state.capture(&chunk, capacity, channels);
                }
            } else if elapsed > 0 {
                state.capture(&vec![0.0; elapsed * channels], capacity, channels);
            }
        }

        Ok(state.pending.len() / channels)
    }

    fn claim_read_region(&mut self) -> Result<&[f32], DeviceError> {
        {
            let mut state = self.state.lock();
            check(&state.failure, Direction::Capture, Operation::Claim)?;
            if state.claimed.is_some() {
                return Err(DeviceError::io(
                    Direction::Capture,
                    "claim",
                    "a region is already claimed",
                ));
            }
            let channels = usize::from(self.format.channels);
            let frames = state.pending.len() / channels;
            self.region.clear();
            self.region.extend(state.pending.drain(..frames * channels));
            state.claimed = Some(frames);
            state.claims += 1;
        }
        Ok(&self.region[..])
    }

    fn release_read_region(&mut self, frames: usize) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        check(&state.failure, Direction::Capture, Operation::Release)?;
        match state.claimed.take() {
            Some(claimed) if claimed == frames => {
                state.releases += 1;
                debug!(frames, "Released mock capture region.");
                Ok(())
            }
            Some(claimed) => Err(DeviceError::io(
                Direction::Capture,
                "release",
                format!("released {} frames but {} were claimed", frames, claimed),
            )),
            None => Err(DeviceError::io(
                Direction::Capture,
                "release",
                "no region is claimed",
            )),
        }
    }
}

impl fmt::Display for CaptureDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock capture, {})", self.name, self.format)
    }
}

/// Creates a playback and capture pair where everything the playback
/// device plays shows up as captured input.
pub fn loopback(
    format: StreamFormat,
    buffer_frames: usize,
    clock: Clock,
) -> (PlaybackDevice, CaptureDevice) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let playback = PlaybackDevice::new(LOOPBACK_DEVICE, format, buffer_frames, clock);
    let capture = CaptureDevice::new(LOOPBACK_DEVICE, format, buffer_frames, clock);
    playback.state.lock().loopback = Some(tx);
    capture.state.lock().loopback = Some(rx);
    (playback, capture)
}

/// Creates a real-time loopback pair using the output configuration's format.
pub fn loopback_from_config(
    config: &config::Audio,
) -> Result<(PlaybackDevice, CaptureDevice), DeviceError> {
    let (format, buffer_frames) = format_from_config(config, Direction::Playback)?;
    Ok(loopback(format, buffer_frames, Clock::Realtime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CaptureDevice as _, PlaybackDevice as _};
    use crate::testutil;

    fn stereo() -> StreamFormat {
        StreamFormat::new(48000, 2).unwrap()
    }

    #[test]
    fn test_playback_backpressure() {
        let mut device = PlaybackDevice::new("mock", stereo(), 100, Clock::Manual);
        let handle = device.handle();
        assert_eq!(device.available_free_frames().unwrap(), 100);

        let region = device.claim_write_region(60).unwrap();
        assert_eq!(region.len(), 120);
        region.fill(0.5);
        device.commit_write_region(60).unwrap();

        assert_eq!(device.available_free_frames().unwrap(), 40);
        assert_eq!(handle.queued_frames(), 60);
        assert_eq!(handle.consume(25), 25);
        assert_eq!(device.available_free_frames().unwrap(), 65);
        assert_eq!(handle.committed(), vec![0.5; 120]);
    }

    #[test]
    fn test_playback_rejects_oversized_claims() {
        let mut device = PlaybackDevice::new("mock", stereo(), 10, Clock::Manual);
        assert!(device.claim_write_region(11).is_err());
        assert!(device.commit_write_region(1).is_err());

        device.claim_write_region(5).unwrap();
        assert!(device.claim_write_region(1).is_err());
        assert!(device.commit_write_region(6).is_err());
    }

    #[test]
    fn test_start_stop_are_idempotent() {
        let mut device = PlaybackDevice::new("mock", stereo(), 10, Clock::Manual);
        let handle = device.handle();
        device.start().unwrap();
        device.start().unwrap();
        assert!(handle.is_running());
        device.stop().unwrap();
        device.stop().unwrap();
        assert!(!handle.is_running());
        assert_eq!(handle.start_stop_counts(), (1, 1));
    }

    #[test]
    fn test_capture_claim_release() {
        let mut device = CaptureDevice::new("mock", stereo(), 8, Clock::Manual);
        let handle = device.handle();
        handle.push(&[1.0, -1.0, 2.0, -2.0, 3.0]);
        assert_eq!(device.available_captured_frames().unwrap(), 2);

        let region = device.claim_read_region().unwrap().to_vec();
        assert_eq!(region, vec![1.0, -1.0, 2.0, -2.0]);
        assert!(handle.is_claimed());
        assert!(device.release_read_region(1).is_err());

        let _ = device.claim_read_region().unwrap();
        device.release_read_region(0).unwrap();
        assert_eq!(handle.claim_release_counts(), (2, 1));
    }

    #[test]
    fn test_capture_overrun_drops_newest() {
        let mut device = CaptureDevice::new("mock", stereo(), 2, Clock::Manual);
        let handle = device.handle();
        handle.push_mono(&[1.0, 2.0, 3.0]);
        assert_eq!(device.available_captured_frames().unwrap(), 2);
        assert_eq!(handle.overrun_frames(), 1);
        assert_eq!(device.claim_read_region().unwrap(), &[1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_loopback_carries_played_audio() {
        let (mut playback, mut capture) = loopback(stereo(), 16, Clock::Manual);
        let playback_handle = playback.handle();
        capture.start().unwrap();

        let region = playback.claim_write_region(4).unwrap();
        region.copy_from_slice(&[0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.4, 0.4]);
        playback.commit_write_region(4).unwrap();
        assert_eq!(capture.available_captured_frames().unwrap(), 0);

        playback_handle.consume(3);
        assert_eq!(capture.available_captured_frames().unwrap(), 3);
        assert_eq!(
            capture.claim_read_region().unwrap(),
            &[0.1, 0.1, 0.2, 0.2, 0.3, 0.3]
        );
        capture.release_read_region(3).unwrap();
    }

    #[test]
    fn test_injected_failures() {
        let mut device = CaptureDevice::new("mock", stereo(), 8, Clock::Manual);
        device.handle().fail_on(Operation::Poll);
        let err = device.available_captured_frames().unwrap_err();
        assert_eq!(
            err,
            DeviceError::io(Direction::Capture, "poll", "injected mock failure")
        );
    }

    #[test]
    fn test_unavailable_device_fails_to_open() {
        let config = config::Audio::new(UNAVAILABLE_DEVICE);
        let err = PlaybackDevice::open(&config).unwrap_err();
        assert!(err.is_init());
        assert!(CaptureDevice::open(&config).is_err());
    }

    #[test]
    fn test_realtime_clock_drains_playback() {
        let config = config::Audio::new("mock-device")
            .with_buffer("10ms")
            .with_sample_rate(8000)
            .with_channels(1);
        let mut device = PlaybackDevice::open(&config).unwrap();
        assert_eq!(device.buffer_frames(), 80);

        let region = device.claim_write_region(80).unwrap();
        region.fill(0.25);
        device.commit_write_region(80).unwrap();
        assert_eq!(device.available_free_frames().unwrap(), 0);

        device.start().unwrap();
        testutil::eventually(
            || device.available_free_frames().unwrap() > 0,
            "Realtime mock never consumed queued frames",
        );
    }
}

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
// The scope: drains the capture device on every tick, decimates the captured
// frames into a fixed-size ring and runs the trigger detector over every
// kept sample.
//

use std::time::Duration;

use tracing::{debug, error, info, span, trace, warn, Level, Span};

use crate::audio::{CaptureDevice, DeviceError, Direction, StreamFormat};
use crate::config::ScopeSettings;
use crate::events::Signal;
use crate::plot::{PlotBuffer, PlotData, PLOT_POINTS};

mod decimation;
mod trigger;

pub use self::decimation::Decimation;
pub use self::trigger::{AcquisitionMode, TriggerDetector};

/// The acquisition engine.
pub struct Scope {
    device: Box<dyn CaptureDevice>,
    format: StreamFormat,
    ring: PlotBuffer,
    decimation: Decimation,
    trigger: TriggerDetector,
    visible_width: f32,
    enabled: bool,
    failed: bool,

    plot_updated: Signal<()>,
    triggered: Signal<usize>,
    bounds_changed: Signal<(f32, f32)>,
    device_failed: Signal<DeviceError>,

    /// The logging span.
    span: Span,
}

impl Scope {
    /// Creates a scope that reads from the given capture device. The capture
    /// stream is started right away when the settings enable the scope.
    pub fn new(
        device: Box<dyn CaptureDevice>,
        settings: &ScopeSettings,
    ) -> Result<Scope, DeviceError> {
        let format = device.format();
        let mut scope = Scope {
            device,
            format,
            ring: PlotBuffer::new(PLOT_POINTS),
            decimation: Decimation::new(format.sample_rate),
            trigger: TriggerDetector::new(settings.mode, 0.0),
            visible_width: 0.0,
            enabled: false,
            failed: false,
            plot_updated: Signal::new(),
            triggered: Signal::new(),
            bounds_changed: Signal::new(),
            device_failed: Signal::new(),
            span: span!(Level::INFO, "scope"),
        };
        scope.set_trigger_level(settings.trigger_level);
        scope.recompute_decimation(settings.visible_width);

        {
            let _enter = scope.span.enter();
            info!(device = %scope.device, "Scope ready.");
        }

        if settings.enabled {
            scope.device.start()?;
            scope.enabled = true;
        }
        Ok(scope)
    }

    /// Starts or stops capturing. Enabling a scope whose device failed returns
    /// `DeviceError::Unavailable`; disabling it is always fine.
    pub fn enable(&mut self, on: bool) -> Result<(), DeviceError> {
        let _enter = self.span.clone().entered();
        if self.failed {
            return match on {
                true => Err(DeviceError::Unavailable {
                    direction: Direction::Capture,
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
        info!(enabled = on, "Scope capture toggled.");
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True once the capture device has failed. A failed scope stays disabled.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn set_acquisition_mode(&mut self, mode: AcquisitionMode) {
        if mode == self.trigger.mode() {
            return;
        }
        let _enter = self.span.enter();
        debug!(%mode, "Acquisition mode changed.");
        self.trigger.set_mode(mode);
    }

    pub fn acquisition_mode(&self) -> AcquisitionMode {
        self.trigger.mode()
    }

    /// Sets the trigger level. Non-finite levels are ignored.
    pub fn set_trigger_level(&mut self, level: f32) {
        let _enter = self.span.enter();
        if !level.is_finite() {
            warn!(level, "Ignoring non-finite trigger level.");
            return;
        }
        if level == self.trigger.level() {
            return;
        }
        debug!(level, "Trigger level changed.");
        self.trigger.set_level(level);
    }

    pub fn trigger_level(&self) -> f32 {
        self.trigger.level()
    }

    /// Chooses the decimation so that the capture ring spans twice the given
    /// visible width (in device samples) and reports the new display bounds.
    /// Returns the chosen skip.
    pub fn recompute_decimation(&mut self, visible_width: f32) -> usize {
        let _enter = self.span.enter();
        let skip = self.decimation.recompute(visible_width, self.ring.len());
        self.visible_width = visible_width;
        let (low, high) = self.bounds();
        debug!(
            visible_width,
            skip,
            effective_sample_rate = self.decimation.effective_sample_rate(),
            low,
            high,
            "Decimation recomputed."
        );
        self.bounds_changed.emit(&(low, high));
        skip
    }

    /// Like `recompute_decimation`, with the visible width given in seconds.
    pub fn recompute_decimation_for_span(&mut self, seconds: f32) -> usize {
        self.recompute_decimation(seconds * self.format.sample_rate as f32)
    }

    /// The visible width the decimation was last computed for.
    pub fn visible_width(&self) -> f32 {
        self.visible_width
    }

    pub fn samples_to_skip(&self) -> usize {
        self.decimation.skip()
    }

    pub fn effective_sample_rate(&self) -> f64 {
        self.decimation.effective_sample_rate()
    }

    /// The display bounds in seconds, symmetric around zero.
    pub fn bounds(&self) -> (f32, f32) {
        self.decimation.bounds(self.ring.len())
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// The next ring slot to be overwritten.
    pub fn head(&self) -> usize {
        self.ring.head()
    }

    /// A read handle onto the capture ring.
    pub fn plot_data(&self) -> PlotData {
        self.ring.reader()
    }

    /// The current tunables.
    pub fn settings(&self) -> ScopeSettings {
        ScopeSettings {
            mode: self.acquisition_mode(),
            trigger_level: self.trigger_level(),
            enabled: self.enabled,
            visible_width: self.visible_width,
        }
    }

    /// Applies every tunable in `settings`, including the enabled state.
    pub fn apply_settings(&mut self, settings: &ScopeSettings) -> Result<(), DeviceError> {
        self.set_acquisition_mode(settings.mode);
        self.set_trigger_level(settings.trigger_level);
        if settings.visible_width != self.visible_width {
            self.recompute_decimation(settings.visible_width);
        }
        self.enable(settings.enabled)
    }

    /// Called once per tick with every kept sample's data written.
    pub fn on_plot_updated<F: FnMut() + 'static>(&mut self, mut callback: F) {
        self.plot_updated.connect(move |_| callback());
    }

    /// Called with the display position of every trigger.
    pub fn on_triggered<F: FnMut(usize) + 'static>(&mut self, mut callback: F) {
        self.triggered.connect(move |position| callback(*position));
    }

    /// Called with the new display bounds in seconds whenever the decimation changes.
    pub fn on_bounds_changed<F: FnMut(f32, f32) + 'static>(&mut self, mut callback: F) {
        self.bounds_changed.connect(move |(low, high)| callback(*low, *high));
    }

    /// Called once when the capture device fails.
    pub fn on_device_failed<F: FnMut(&DeviceError) + 'static>(&mut self, callback: F) {
        self.device_failed.connect(callback);
    }

    /// Drains the capture device. A device failure disables the scope and is
    /// returned once; later ticks do nothing.
    pub fn tick(&mut self, _delta: Duration) -> Result<(), DeviceError> {
        if !self.enabled || self.failed {
            return Ok(());
        }
        match self.acquire() {
            Ok(()) => Ok(()),
            Err(e) => {
                let _enter = self.span.clone().entered();
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn acquire(&mut self) -> Result<(), DeviceError> {
        let available = self.device.available_captured_frames()?;
        if available == 0 {
            return Ok(());
        }

        let channels = usize::from(self.format.channels);
        let Scope {
            device,
            ring,
            decimation,
            trigger,
            triggered,
            ..
        } = &mut *self;

        let region = device.claim_read_region()?;
        let frames = region.len() / channels;
        let points = ring.len();
        let kept = decimation.for_each_kept(frames, |index| {
            let value = region[index * channels];
            let slot = ring.push(value);
            if let Some(position) = trigger.evaluate(slot, value, points) {
                triggered.emit(&position);
            }
        });
        device.release_read_region(frames)?;

        trace!(frames, kept, head = ring.head(), "Captured.");
        self.plot_updated.emit(&());
        Ok(())
    }

    fn fail(&mut self, err: &DeviceError) {
        error!(err = %err, device = %self.device, "Capture device failed, disabling the scope.");
        self.failed = true;
        self.enabled = false;
        if let Err(e) = self.device.stop() {
            debug!(err = %e, "Unable to stop the failed capture device.");
        }
        self.device_failed.emit(err);
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::audio::mock::{self, CaptureHandle, Clock, Operation};
    use crate::testutil;

    const MS: Duration = Duration::from_millis(16);

    /// Everything a scope reported through its events.
    #[derive(Default)]
    struct Events {
        plot_updates: usize,
        triggers: Vec<usize>,
        bounds: Vec<(f32, f32)>,
        failures: Vec<DeviceError>,
    }

    fn scope_with(
        channels: u16,
        settings: &ScopeSettings,
    ) -> (Scope, CaptureHandle, Rc<RefCell<Events>>) {
        let format = StreamFormat::new(48000, channels).unwrap();
        let device = mock::CaptureDevice::new("mock", format, 48000, Clock::Manual);
        let handle = device.handle();
        let mut scope = Scope::new(Box::new(device), settings).unwrap();

        let events = Rc::new(RefCell::new(Events::default()));
        let e = events.clone();
        scope.on_plot_updated(move || e.borrow_mut().plot_updates += 1);
        let e = events.clone();
        scope.on_triggered(move |position| e.borrow_mut().triggers.push(position));
        let e = events.clone();
        scope.on_bounds_changed(move |low, high| e.borrow_mut().bounds.push((low, high)));
        let e = events.clone();
        scope.on_device_failed(move |err| e.borrow_mut().failures.push(err.clone()));
        (scope, handle, events)
    }

    fn scope() -> (Scope, CaptureHandle, Rc<RefCell<Events>>) {
        scope_with(1, &ScopeSettings::default())
    }

    fn rolling() -> ScopeSettings {
        ScopeSettings {
            mode: AcquisitionMode::Rolling,
            ..Default::default()
        }
    }

    #[test]
    fn test_enabled_at_construction() {
        let (scope, handle, _) = scope();
        assert!(scope.is_enabled());
        assert!(handle.is_running());

        let settings = ScopeSettings {
            enabled: false,
            ..Default::default()
        };
        let (scope, handle, _) = scope_with(1, &settings);
        assert!(!scope.is_enabled());
        assert!(!handle.is_running());
    }

    #[test]
    fn test_single_crossing_triggers_once() {
        let (mut scope, handle, events) = scope();
        scope.set_trigger_level(0.5);

        let mut signal = vec![0.0; 100];
        signal[40..].fill(1.0);
        handle.push_mono(&signal);
        scope.tick(MS).unwrap();

        let events = events.borrow();
        assert_eq!(events.triggers, vec![(40 + PLOT_POINTS / 2) % PLOT_POINTS]);
        assert_eq!(events.plot_updates, 1);
        assert_eq!(scope.head(), 100);
    }

    #[test]
    fn test_sine_triggers_once_per_cycle() {
        let (mut scope, handle, events) = scope();
        handle.push_mono(&testutil::sine(1000.0, 1.0, 48000, 4800));
        assert_eq!(handle.pending_frames(), 4800);

        scope.tick(MS).unwrap();
        assert_eq!(handle.pending_frames(), 0);

        // The signal starts at zero, so the first cycle has no rising crossing.
        let events = events.borrow();
        assert_eq!(events.triggers.len(), 99);
        for pair in events.triggers.windows(2) {
            let step = (pair[1] + PLOT_POINTS - pair[0]) % PLOT_POINTS;
            assert!((47..=49).contains(&step), "step {}", step);
        }
        let rms = testutil::rms(&scope.plot_data().snapshot());
        assert!((rms - 1.0 / 2f32.sqrt()).abs() < 0.02, "rms {}", rms);
    }

    #[test]
    fn test_crossing_position_wraps() {
        let (mut scope, handle, events) = scope();
        handle.push_mono(&vec![-1.0; 1000]);
        scope.tick(MS).unwrap();
        handle.push_mono(&[-1.0, -1.0, 1.0, 1.0]);
        scope.tick(MS).unwrap();

        // The crossing is written at slot 1002.
        assert_eq!(events.borrow().triggers, vec![(1002 + 512) % 1024]);
        assert_eq!(scope.head(), 1004);
    }

    #[test]
    fn test_crossing_across_ticks() {
        let (mut scope, handle, events) = scope();
        handle.push_mono(&[-0.5, -0.2]);
        scope.tick(MS).unwrap();
        handle.push_mono(&[0.3, 0.6]);
        scope.tick(MS).unwrap();
        assert_eq!(events.borrow().triggers, vec![2 + 512]);
    }

    #[test]
    fn test_rolling_reports_every_kept_sample() {
        let (mut scope, handle, events) = scope_with(1, &rolling());
        handle.push_mono(&[0.0; 10]);
        scope.tick(MS).unwrap();
        assert_eq!(events.borrow().triggers, (0..10).collect::<Vec<usize>>());

        scope.recompute_decimation(2048.0); // skip 4
        handle.push_mono(&[0.0; 10]);
        scope.tick(MS).unwrap();
        assert_eq!(events.borrow().triggers[10..], [10, 11, 12]);
    }

    #[test]
    fn test_capture_reads_first_channel() {
        let (mut scope, handle, _) = scope_with(2, &ScopeSettings::default());
        handle.push(&[0.1, 9.0, 0.2, 9.0, 0.3, 9.0]);
        scope.tick(MS).unwrap();
        let data = scope.plot_data();
        assert_eq!(&data.snapshot()[..3], &[0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_decimation_keeps_every_nth_frame() {
        let (mut scope, handle, _) = scope();
        assert_eq!(scope.recompute_decimation(1536.0), 3);
        let signal: Vec<f32> = (0..12).map(|i| i as f32).collect();
        handle.push_mono(&signal);
        scope.tick(MS).unwrap();
        assert_eq!(&scope.plot_data().snapshot()[..4], &[0.0, 3.0, 6.0, 9.0]);
        assert_eq!(scope.head(), 4);
    }

    #[test]
    fn test_ring_invariants_over_many_ticks() {
        let (mut scope, handle, _) = scope_with(1, &rolling());
        let data = scope.plot_data();
        for tick in 0..50 {
            handle.push_mono(&vec![tick as f32; 97]);
            scope.tick(MS).unwrap();
            assert_eq!(data.len(), PLOT_POINTS);
            assert!(scope.head() < PLOT_POINTS);
            assert_eq!(scope.head(), (97 * (tick + 1)) % PLOT_POINTS);
        }
    }

    #[test]
    fn test_no_frames_is_a_no_op() {
        let (mut scope, handle, events) = scope();
        scope.tick(MS).unwrap();
        assert_eq!(events.borrow().plot_updates, 0);
        assert_eq!(handle.claim_release_counts(), (0, 0));
    }

    #[test]
    fn test_region_without_kept_sample_is_still_released() {
        let (mut scope, handle, events) = scope();
        scope.recompute_decimation(4096.0); // skip 8
        handle.push_mono(&[1.0; 3]);
        scope.tick(MS).unwrap();
        assert_eq!(scope.head(), 1);

        handle.push_mono(&[1.0; 3]);
        scope.tick(MS).unwrap();
        assert_eq!(scope.head(), 1);
        assert_eq!(handle.claim_release_counts(), (2, 2));
        assert!(!handle.is_claimed());
        assert_eq!(events.borrow().plot_updates, 2);
    }

    #[test]
    fn test_disabled_scope_does_not_read() {
        let (mut scope, handle, events) = scope();
        scope.enable(false).unwrap();
        handle.push_mono(&[1.0; 16]);
        scope.tick(MS).unwrap();
        assert_eq!(events.borrow().plot_updates, 0);
        assert_eq!(handle.claim_release_counts(), (0, 0));
    }

    #[test]
    fn test_enable_is_idempotent() {
        let (mut scope, handle, _) = scope();
        scope.enable(true).unwrap();
        scope.enable(false).unwrap();
        scope.enable(false).unwrap();
        scope.enable(true).unwrap();
        assert_eq!(handle.start_stop_counts(), (2, 1));
        assert!(scope.is_enabled());
    }

    #[test]
    fn test_unity_decimation_scenario() {
        let (mut scope, _, events) = scope();
        assert_eq!(scope.recompute_decimation(512.0), 1);
        assert_eq!(scope.effective_sample_rate(), 48000.0);

        let (low, high) = *events.borrow().bounds.last().unwrap();
        assert_eq!(low, -high);
        let expected = (1024.0 / 48000.0 / 2.0) as f32;
        assert!((high - expected).abs() < 1e-7);
    }

    #[test]
    fn test_bounds_follow_the_chosen_skip() {
        let (mut scope, _, events) = scope();
        for width in [0.0, 100.0, 700.0, 3000.0, 48000.0, f32::NAN] {
            let skip = scope.recompute_decimation(width);
            assert!(skip >= 1);
            let (low, high) = *events.borrow().bounds.last().unwrap();
            assert_eq!(low, -high);
            let span = 1024.0 * skip as f64 / 48000.0;
            assert!((f64::from(high) - span / 2.0).abs() < 1e-6);
        }
        assert_eq!(scope.recompute_decimation_for_span(0.1), 9);
    }

    #[test]
    fn test_setters_store_values() {
        let (mut scope, _, _) = scope();
        scope.set_acquisition_mode(AcquisitionMode::Rolling);
        scope.set_trigger_level(-0.25);
        scope.set_trigger_level(f32::NAN);
        assert_eq!(scope.acquisition_mode(), AcquisitionMode::Rolling);
        assert_eq!(scope.trigger_level(), -0.25);

        let settings = scope.settings();
        assert_eq!(settings.mode, AcquisitionMode::Rolling);
        assert_eq!(settings.trigger_level, -0.25);
        assert!(settings.enabled);
        assert_eq!(settings.visible_width, 512.0);
    }

    #[test]
    fn test_apply_settings() {
        let (mut scope, handle, _) = scope();
        let settings = ScopeSettings {
            mode: AcquisitionMode::Rolling,
            trigger_level: 0.5,
            enabled: false,
            visible_width: 2048.0,
        };
        scope.apply_settings(&settings).unwrap();
        assert_eq!(scope.settings(), settings);
        assert_eq!(scope.samples_to_skip(), 4);
        assert!(!handle.is_running());
    }

    #[test]
    fn test_device_failure_is_reported_once() {
        let (mut scope, handle, events) = scope();
        handle.push_mono(&[0.0; 8]);
        handle.fail_on(Operation::Claim);

        let err = scope.tick(MS).unwrap_err();
        assert_eq!(err.direction(), Direction::Capture);
        assert!(scope.has_failed());
        assert!(!scope.is_enabled());

        scope.tick(MS).unwrap();
        scope.tick(MS).unwrap();
        assert_eq!(events.borrow().failures, vec![err]);
        assert_eq!(events.borrow().plot_updates, 0);

        assert_eq!(
            scope.enable(true),
            Err(DeviceError::Unavailable {
                direction: Direction::Capture
            })
        );
        assert_eq!(scope.enable(false), Ok(()));
    }

    #[test]
    fn test_release_failure_disables_scope() {
        let (mut scope, handle, events) = scope();
        handle.push_mono(&[0.0; 8]);
        handle.fail_on(Operation::Release);
        assert!(scope.tick(MS).is_err());
        assert!(scope.has_failed());
        assert_eq!(events.borrow().failures.len(), 1);
    }

    #[test]
    fn test_init_failure() {
        let format = StreamFormat::new(48000, 1).unwrap();
        let device = mock::CaptureDevice::new("mock", format, 128, Clock::Manual);
        device.handle().fail_on(Operation::Start);
        assert!(Scope::new(Box::new(device), &ScopeSettings::default()).is_err());
    }
}

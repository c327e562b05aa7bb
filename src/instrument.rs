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
// The instrument hosts both engines and drives them from one periodic tick.
//

use std::{
    cell::Cell,
    error::Error,
    rc::Rc,
    time::{Duration, Instant},
};

use tracing::{error, info, span, warn, Level};

use crate::audio::{self, CaptureDevice, DeviceError, PlaybackDevice};
use crate::config::{self, Settings};
use crate::generator::Generator;
use crate::scope::Scope;

/// Counters kept from the engines' events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub ticks: u64,
    pub plot_updates: u64,
    pub triggers: u64,
}

/// The tick host owning the generator and the scope.
pub struct Instrument {
    generator: Option<Generator>,
    scope: Option<Scope>,
    ticks: u64,
    plot_updates: Rc<Cell<u64>>,
    triggers: Rc<Cell<u64>>,
}

impl Instrument {
    /// Opens the configured devices and creates the engines. When no engine
    /// can be created, the first device error is returned.
    pub fn open(config: &config::Instrument) -> Result<Instrument, Box<dyn Error>> {
        let opened = audio::open_devices(Some(config.output()), Some(config.input()));
        let mut first_error = None;
        let playback = opened.playback.and_then(|result| {
            result
                .map_err(|e| {
                    first_error.get_or_insert(e);
                })
                .ok()
        });
        let capture = opened.capture.and_then(|result| {
            result
                .map_err(|e| {
                    first_error.get_or_insert(e);
                })
                .ok()
        });
        Instrument::new(playback, capture, &config.settings())
            .map_err(|e| first_error.map_or(e, |device_error| device_error.into()))
    }

    /// Creates the engines on whichever devices are present. An engine that
    /// cannot be created is logged and left out. Fails only when neither
    /// engine could be created.
    pub fn new(
        playback: Option<Box<dyn PlaybackDevice>>,
        capture: Option<Box<dyn CaptureDevice>>,
        settings: &Settings,
    ) -> Result<Instrument, Box<dyn Error>> {
        let span = span!(Level::INFO, "instrument");
        let _enter = span.enter();

        let generator = playback.and_then(|device| {
            Generator::new(device, &settings.generator)
                .inspect_err(|e| error!(err = %e, "Unable to create the generator."))
                .ok()
        });
        let mut scope = capture.and_then(|device| {
            Scope::new(device, &settings.scope)
                .inspect_err(|e| error!(err = %e, "Unable to create the scope."))
                .ok()
        });

        if generator.is_none() && scope.is_none() {
            return Err("no audio device could be opened".into());
        }

        let plot_updates = Rc::new(Cell::new(0));
        let triggers = Rc::new(Cell::new(0));
        if let Some(scope) = scope.as_mut() {
            let counter = plot_updates.clone();
            scope.on_plot_updated(move || counter.set(counter.get() + 1));
            let counter = triggers.clone();
            scope.on_triggered(move |_| counter.set(counter.get() + 1));
        }

        info!(
            generator = generator.is_some(),
            scope = scope.is_some(),
            "Instrument ready."
        );
        Ok(Instrument {
            generator,
            scope,
            ticks: 0,
            plot_updates,
            triggers,
        })
    }

    pub fn generator(&self) -> Option<&Generator> {
        self.generator.as_ref()
    }

    pub fn generator_mut(&mut self) -> Option<&mut Generator> {
        self.generator.as_mut()
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    pub fn scope_mut(&mut self) -> Option<&mut Scope> {
        self.scope.as_mut()
    }

    /// True while at least one engine has a working device.
    pub fn is_active(&self) -> bool {
        self.generator.as_ref().is_some_and(|g| !g.has_failed())
            || self.scope.as_ref().is_some_and(|s| !s.has_failed())
    }

    /// Ticks the generator, then the scope. Both are ticked even if the first
    /// fails; the first failure is returned.
    pub fn tick(&mut self, delta: Duration) -> Result<(), DeviceError> {
        self.ticks += 1;
        let generator = match self.generator.as_mut() {
            Some(generator) => generator.tick(delta),
            None => Ok(()),
        };
        let scope = match self.scope.as_mut() {
            Some(scope) => scope.tick(delta),
            None => Ok(()),
        };
        generator.and(scope)
    }

    /// Ticks at `interval` until `duration` has passed, or until no engine is
    /// left with a working device. Without a duration it runs until then.
    pub fn run(&mut self, interval: Duration, duration: Option<Duration>) -> Statistics {
        let span = span!(Level::INFO, "run");
        let _enter = span.enter();
        info!(?interval, ?duration, "Running instrument.");

        let start = Instant::now();
        let mut last_tick = start;
        let mut next_tick = start;
        loop {
            let now = Instant::now();
            if duration.is_some_and(|duration| now.duration_since(start) >= duration) {
                break;
            }

            if let Err(e) = self.tick(now.duration_since(last_tick)) {
                warn!(err = %e, "Engine stopped after a device failure.");
            }
            last_tick = now;
            if !self.is_active() {
                error!("No engine is left running.");
                break;
            }

            next_tick = next_deadline(next_tick, Instant::now(), interval);
            spin_sleep::sleep(next_tick.saturating_duration_since(Instant::now()));
        }

        let statistics = self.statistics();
        info!(
            ticks = statistics.ticks,
            plot_updates = statistics.plot_updates,
            triggers = statistics.triggers,
            "Instrument stopped."
        );
        statistics
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            ticks: self.ticks,
            plot_updates: self.plot_updates.get(),
            triggers: self.triggers.get(),
        }
    }

    /// The current settings of both engines. A missing engine reports defaults.
    pub fn settings(&self) -> Settings {
        Settings {
            generator: self
                .generator
                .as_ref()
                .map(Generator::settings)
                .unwrap_or_default(),
            scope: self
                .scope
                .as_ref()
                .map(Scope::settings)
                .unwrap_or_default(),
        }
    }

    /// Applies settings to whichever engines are present.
    pub fn apply_settings(&mut self, settings: &Settings) -> Result<(), DeviceError> {
        if let Some(generator) = self.generator.as_mut() {
            generator.apply_settings(&settings.generator)?;
        }
        if let Some(scope) = self.scope.as_mut() {
            scope.apply_settings(&settings.scope)?;
        }
        Ok(())
    }
}

/// The deadline of the tick after the one due at `previous`. A late tick
/// moves the schedule forward instead of queueing catch-up ticks.
fn next_deadline(previous: Instant, now: Instant, interval: Duration) -> Instant {
    previous.max(now) + interval
}

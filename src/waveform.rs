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
// Waveform synthesis. Everything here is a pure function of the waveform
// parameters and a phase expressed as a fraction of one cycle, so the same
// code drives both the audio fill path and the static preview curve.
//

use std::{f64::consts::PI, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The waveform shapes the generator can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveformKind {
    #[default]
    #[serde(alias = "sin")]
    Sine,
    #[serde(alias = "rect", alias = "square")]
    Rectangular,
    #[serde(alias = "tri")]
    Triangle,
    #[serde(alias = "saw")]
    Sawtooth,
}

impl WaveformKind {
    /// All waveform kinds, in the order a control surface would list them.
    pub const ALL: [WaveformKind; 4] = [
        WaveformKind::Sine,
        WaveformKind::Rectangular,
        WaveformKind::Triangle,
        WaveformKind::Sawtooth,
    ];

    /// Convert to string representation
    pub fn as_str(self) -> &'static str {
        match self {
            WaveformKind::Sine => "sine",
            WaveformKind::Rectangular => "rectangular",
            WaveformKind::Triangle => "triangle",
            WaveformKind::Sawtooth => "sawtooth",
        }
    }
}

impl FromStr for WaveformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sine" | "sin" => Ok(WaveformKind::Sine),
            "rectangular" | "rect" | "square" => Ok(WaveformKind::Rectangular),
            "triangle" | "tri" => Ok(WaveformKind::Triangle),
            "sawtooth" | "saw" => Ok(WaveformKind::Sawtooth),
            _ => Err(format!("unsupported waveform: {}", s)),
        }
    }
}

impl fmt::Display for WaveformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The tunable parameters of the generator. Overwritten in place by setters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformParameters {
    pub kind: WaveformKind,
    /// Frequency in Hz.
    pub frequency: f32,
    /// Peak amplitude in volts. One volt is device full scale.
    pub amplitude: f32,
    /// Duty cycle in percent, only used by the rectangular waveform.
    pub duty_cycle: f32,
}

impl Default for WaveformParameters {
    fn default() -> Self {
        WaveformParameters {
            kind: WaveformKind::Sine,
            frequency: 1000.0,
            amplitude: 1.0,
            duty_cycle: 50.0,
        }
    }
}

/// Computes a single sample of the given waveform. `phase` is the position
/// within one cycle and is expected to be in [0, 1).
pub fn sample(kind: WaveformKind, phase: f64, amplitude: f32, duty_cycle: f32) -> f32 {
    let amplitude = f64::from(amplitude);
    let value = match kind {
        WaveformKind::Sine => amplitude * (2.0 * PI * phase).sin(),
        WaveformKind::Rectangular => {
            if phase < f64::from(duty_cycle) / 100.0 {
                amplitude
            } else {
                -amplitude
            }
        }
        WaveformKind::Triangle => {
            if phase < 0.25 {
                4.0 * amplitude * phase
            } else if phase < 0.75 {
                amplitude * (2.0 - 4.0 * phase)
            } else {
                amplitude * (4.0 * phase - 4.0)
            }
        }
        WaveformKind::Sawtooth => amplitude * (2.0 * phase - 1.0),
    };
    value as f32
}

/// Renders exactly one cycle of the waveform into `output`, one point per
/// `1 / output.len()` of a cycle. Independent of any device sample rate.
pub fn render_preview_into(
    output: &mut [f32],
    kind: WaveformKind,
    amplitude: f32,
    duty_cycle: f32,
) {
    let points = output.len() as f64;
    for (i, point) in output.iter_mut().enumerate() {
        *point = sample(kind, i as f64 / points, amplitude, duty_cycle);
    }
}

/// Renders a preview curve of `points` samples spanning one full cycle.
pub fn render_preview_curve(
    kind: WaveformKind,
    amplitude: f32,
    duty_cycle: f32,
    points: usize,
) -> Vec<f32> {
    let mut curve = vec![0.0; points];
    render_preview_into(&mut curve, kind, amplitude, duty_cycle);
    curve
}

/// A running position within one waveform cycle, kept in [0, 1).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseAccumulator {
    phase: f64,
}

impl PhaseAccumulator {
    pub fn new() -> PhaseAccumulator {
        PhaseAccumulator::default()
    }

    /// The current phase as a fraction of one cycle.
    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// The phase `samples` samples ahead of the current position, wrapped into [0, 1).
    /// The multiplication happens before the division so that whole-cycle
    /// advances land exactly on a cycle boundary.
    #[inline]
    pub fn ahead(&self, samples: usize, frequency: f64, sample_rate: f64) -> f64 {
        wrap(self.phase + samples as f64 * frequency / sample_rate)
    }

    /// Advances the accumulator by `samples` samples.
    pub fn advance(&mut self, samples: usize, frequency: f64, sample_rate: f64) {
        self.phase = self.ahead(samples, frequency, sample_rate);
    }
}

/// Wraps a phase into [0, 1) by subtracting the floor.
#[inline]
fn wrap(phase: f64) -> f64 {
    let wrapped = phase - phase.floor();
    // A tiny negative input rounds up to exactly 1.0.
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < EPSILON,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_sine_closed_form() {
        assert_close(sample(WaveformKind::Sine, 0.0, 2.0, 50.0), 0.0);
        assert_close(sample(WaveformKind::Sine, 0.25, 2.0, 50.0), 2.0);
        assert_close(sample(WaveformKind::Sine, 0.5, 2.0, 50.0), 0.0);
        assert_close(sample(WaveformKind::Sine, 0.75, 2.0, 50.0), -2.0);
    }

    #[test]
    fn test_rectangular_closed_form() {
        assert_eq!(sample(WaveformKind::Rectangular, 0.0, 1.5, 50.0), 1.5);
        assert_eq!(sample(WaveformKind::Rectangular, 0.25, 1.5, 50.0), 1.5);
        assert_eq!(sample(WaveformKind::Rectangular, 0.5, 1.5, 50.0), -1.5);
        assert_eq!(sample(WaveformKind::Rectangular, 0.6, 1.5, 50.0), -1.5);
        assert_eq!(sample(WaveformKind::Rectangular, 0.75, 1.5, 50.0), -1.5);

        // Duty cycle moves the falling edge.
        assert_eq!(sample(WaveformKind::Rectangular, 0.6, 1.0, 75.0), 1.0);
        assert_eq!(sample(WaveformKind::Rectangular, 0.0, 1.0, 0.0), -1.0);
        assert_eq!(sample(WaveformKind::Rectangular, 0.999, 1.0, 100.0), 1.0);
    }

    #[test]
    fn test_triangle_closed_form() {
        assert_close(sample(WaveformKind::Triangle, 0.0, 1.0, 50.0), 0.0);
        assert_close(sample(WaveformKind::Triangle, 0.25, 1.0, 50.0), 1.0);
        assert_close(sample(WaveformKind::Triangle, 0.5, 1.0, 50.0), 0.0);
        assert_close(sample(WaveformKind::Triangle, 0.75, 1.0, 50.0), -1.0);
    }

    #[test]
    fn test_sawtooth_closed_form() {
        assert_close(sample(WaveformKind::Sawtooth, 0.0, 3.0, 50.0), -3.0);
        assert_close(sample(WaveformKind::Sawtooth, 0.25, 3.0, 50.0), -1.5);
        assert_close(sample(WaveformKind::Sawtooth, 0.5, 3.0, 50.0), 0.0);
        assert_close(sample(WaveformKind::Sawtooth, 0.75, 3.0, 50.0), 1.5);
        assert!((sample(WaveformKind::Sawtooth, 0.999, 3.0, 50.0) - 3.0).abs() < 0.01);
    }

    #[test]
    fn test_triangle_is_continuous_across_a_cycle() {
        let points = 4096;
        let step_bound = 4.0 / points as f32 + EPSILON;
        let curve = render_preview_curve(WaveformKind::Triangle, 1.0, 50.0, points);

        // Include the wrap from the last point back to the first.
        for i in 0..points {
            let next = curve[(i + 1) % points];
            assert!(
                (next - curve[i]).abs() <= step_bound,
                "jump at point {}: {} -> {}",
                i,
                curve[i],
                next
            );
        }
    }

    #[test]
    fn test_triangle_keeps_rising_through_phase_zero() {
        let before = sample(WaveformKind::Triangle, 0.99, 1.0, 50.0);
        let at = sample(WaveformKind::Triangle, 0.0, 1.0, 50.0);
        let after = sample(WaveformKind::Triangle, 0.01, 1.0, 50.0);
        assert!(before < at);
        assert!(at < after);
    }

    #[test]
    fn test_preview_curve_spans_one_cycle() {
        let curve = render_preview_curve(WaveformKind::Sine, 1.0, 50.0, 1024);
        assert_eq!(curve.len(), 1024);
        assert_close(curve[0], 0.0);
        assert_close(curve[256], 1.0);
        assert_close(curve[512], 0.0);
        assert_close(curve[768], -1.0);

        assert!(render_preview_curve(WaveformKind::Sine, 1.0, 50.0, 0).is_empty());
    }

    #[test]
    fn test_phase_accumulator_wraps_large_advances() {
        let mut phase = PhaseAccumulator::new();
        phase.advance(480, 1000.0, 48000.0);
        assert_eq!(phase.phase(), 0.0);

        phase.advance(1, 12000.0, 48000.0);
        assert_eq!(phase.phase(), 0.25);

        // Hundreds of cycles in one call still land inside [0, 1).
        phase.advance(1_000_003, 19_999.0, 44100.0);
        assert!(phase.phase() >= 0.0 && phase.phase() < 1.0);
    }

    #[test]
    fn test_phase_accumulator_zero_frequency_holds() {
        let mut phase = PhaseAccumulator::new();
        phase.advance(3, 8000.0, 48000.0);
        let held = phase.phase();
        phase.advance(10_000, 0.0, 48000.0);
        assert_eq!(phase.phase(), held);
    }

    #[test]
    fn test_wrap_never_returns_one() {
        assert_eq!(wrap(-1e-20), 0.0);
        assert_eq!(wrap(3.0), 0.0);
        assert_eq!(wrap(2.5), 0.5);
    }

    #[test]
    fn test_waveform_kind_from_str() {
        assert_eq!(WaveformKind::from_str("sine").unwrap(), WaveformKind::Sine);
        assert_eq!(WaveformKind::from_str("Square").unwrap(), WaveformKind::Rectangular);
        assert_eq!(WaveformKind::from_str("TRIANGLE").unwrap(), WaveformKind::Triangle);
        assert_eq!(WaveformKind::from_str("saw").unwrap(), WaveformKind::Sawtooth);
        assert!(WaveformKind::from_str("noise").is_err());

        for kind in WaveformKind::ALL {
            assert_eq!(WaveformKind::from_str(&kind.to_string()).unwrap(), kind);
        }
    }
}

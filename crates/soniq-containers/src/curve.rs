//! Fade and blend curves.

use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

// ═══════════════════════════════════════════════════════════════════════════════
// FADE CURVE
// ═══════════════════════════════════════════════════════════════════════════════

/// Curve shape for fades and crossfades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum FadeCurve {
    /// Linear ramp
    #[default]
    Linear = 0,
    /// Equal power (constant perceived loudness across a crossfade)
    EqualPower = 1,
    /// Cubic S-curve (slow start and end)
    SCurve = 2,
}

impl FadeCurve {
    /// Evaluate the fade-in value at position t (0.0 – 1.0)
    #[inline]
    pub fn evaluate(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => t,
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
            FadeCurve::SCurve => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
        }
    }

    /// Evaluate the fade-out value at position t
    #[inline]
    pub fn evaluate_out(&self, t: f32) -> f32 {
        match self {
            // cos/sin pair keeps a² + b² = 1 across the crossfade
            FadeCurve::EqualPower => (t.clamp(0.0, 1.0) * FRAC_PI_2).cos(),
            _ => 1.0 - self.evaluate(t),
        }
    }
}

/// Crossfade gain pair at position t: (outgoing, incoming)
#[inline]
pub fn equal_power_gains(t: f32) -> (f32, f32) {
    let angle = t.clamp(0.0, 1.0) * FRAC_PI_2;
    (angle.cos(), angle.sin())
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLEND CURVE
// ═══════════════════════════════════════════════════════════════════════════════

/// One point of a piecewise blend curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Parameter value (x)
    pub input: f32,
    /// Gain at that value (y, 0.0 – 1.0)
    pub gain: f32,
}

/// Piecewise-linear mapping from an RTPC value to a gain in [0, 1].
///
/// Values outside the point range clamp to the first/last point, so an
/// unbounded parameter still yields a defined gain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendCurve {
    /// Points sorted by `input`
    pub points: Vec<CurvePoint>,
}

impl BlendCurve {
    /// Flat unity curve
    pub fn unity() -> Self {
        Self {
            points: vec![CurvePoint { input: 0.0, gain: 1.0 }],
        }
    }

    /// Linear ramp from (in_min, 0) to (in_max, 1)
    pub fn ramp_up(in_min: f32, in_max: f32) -> Self {
        Self {
            points: vec![
                CurvePoint { input: in_min, gain: 0.0 },
                CurvePoint { input: in_max, gain: 1.0 },
            ],
        }
    }

    /// Linear ramp from (in_min, 1) to (in_max, 0)
    pub fn ramp_down(in_min: f32, in_max: f32) -> Self {
        Self {
            points: vec![
                CurvePoint { input: in_min, gain: 1.0 },
                CurvePoint { input: in_max, gain: 0.0 },
            ],
        }
    }

    /// Add a point, keeping the list sorted by input value
    pub fn add_point(&mut self, input: f32, gain: f32) {
        self.points.push(CurvePoint {
            input,
            gain: gain.clamp(0.0, 1.0),
        });
        self.points
            .sort_by(|a, b| a.input.partial_cmp(&b.input).unwrap_or(std::cmp::Ordering::Equal));
    }

    /// Evaluate the curve at the given parameter value
    pub fn evaluate(&self, value: f32) -> f32 {
        let points = &self.points;
        match points.len() {
            0 => 1.0,
            1 => points[0].gain,
            _ => {
                if value <= points[0].input {
                    return points[0].gain;
                }
                let last = points[points.len() - 1];
                if value >= last.input {
                    return last.gain;
                }
                for pair in points.windows(2) {
                    let (p0, p1) = (pair[0], pair[1]);
                    if value >= p0.input && value <= p1.input {
                        let span = p1.input - p0.input;
                        if span <= f32::EPSILON {
                            return p1.gain;
                        }
                        let t = (value - p0.input) / span;
                        return p0.gain + t * (p1.gain - p0.gain);
                    }
                }
                last.gain
            }
        }
    }
}

impl Default for BlendCurve {
    fn default() -> Self {
        Self::unity()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fade_boundaries() {
        for curve in [FadeCurve::Linear, FadeCurve::EqualPower, FadeCurve::SCurve] {
            assert_relative_eq!(curve.evaluate(0.0), 0.0, epsilon = 1e-5);
            assert_relative_eq!(curve.evaluate(1.0), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_equal_power_constant() {
        for i in 0..=20 {
            let t = i as f32 / 20.0;
            let (a, b) = equal_power_gains(t);
            assert_relative_eq!(a * a + b * b, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_blend_curve_interpolation() {
        let curve = BlendCurve::ramp_up(0.0, 1.0);
        assert_relative_eq!(curve.evaluate(0.5), 0.5, epsilon = 1e-6);
        // Out-of-range clamps
        assert_relative_eq!(curve.evaluate(-1.0), 0.0, epsilon = 1e-6);
        assert_relative_eq!(curve.evaluate(2.0), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_blend_curve_multi_segment() {
        let mut curve = BlendCurve { points: Vec::new() };
        curve.add_point(0.0, 0.0);
        curve.add_point(0.5, 1.0);
        curve.add_point(1.0, 0.0);

        assert_relative_eq!(curve.evaluate(0.25), 0.5, epsilon = 1e-6);
        assert_relative_eq!(curve.evaluate(0.5), 1.0, epsilon = 1e-6);
        assert_relative_eq!(curve.evaluate(0.75), 0.5, epsilon = 1e-6);
    }
}

//! Per-frame detection gate and position averaging.

use crate::errors::DetectionError;
use crate::types::{DetectedFeature, PixelPoint};

/// Result of passing one frame's detections through the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Exactly one feature. The miss counter is reset.
    Found(DetectedFeature),
    /// Nothing found. Carries an advisory once the miss limit is exceeded.
    Empty(Option<DetectionError>),
    /// Several candidates. Never consumed downstream.
    Ambiguous(DetectionError),
}

/// Accepts only single-feature detections and counts consecutive misses.
#[derive(Debug, Clone)]
pub struct DetectionGate {
    limit: u32,
    misses: u32,
}

impl DetectionGate {
    pub fn new(limit: u32) -> Self {
        Self { limit, misses: 0 }
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    pub fn reset(&mut self) {
        self.misses = 0;
    }

    pub fn check(&mut self, features: &[DetectedFeature]) -> GateOutcome {
        match features {
            [feature] => {
                self.misses = 0;
                GateOutcome::Found(*feature)
            }
            [] => {
                self.misses += 1;
                if self.misses > self.limit {
                    let advisory = DetectionError::Empty {
                        misses: self.misses,
                    };
                    self.misses = 0;
                    GateOutcome::Empty(Some(advisory))
                } else {
                    GateOutcome::Empty(None)
                }
            }
            many => GateOutcome::Ambiguous(DetectionError::Ambiguous { count: many.len() }),
        }
    }
}

/// Averages a fixed window of single-frame detections.
#[derive(Debug, Clone)]
pub struct PositionAverager {
    window: usize,
    sum_u: f64,
    sum_v: f64,
    sum_r: f64,
    count: usize,
}

impl PositionAverager {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            sum_u: 0.0,
            sum_v: 0.0,
            sum_r: 0.0,
            count: 0,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.window);
    }

    /// Add a detection. Returns the averaged feature once the window is full
    /// and starts a fresh window.
    pub fn push(&mut self, feature: DetectedFeature) -> Option<DetectedFeature> {
        self.sum_u += feature.center.u;
        self.sum_v += feature.center.v;
        self.sum_r += feature.radius;
        self.count += 1;
        if self.count < self.window {
            return None;
        }
        crate::assert_invariant!(
            self.count == self.window,
            "Position estimate averages exactly the configured window",
            "alignment::gate"
        );
        let n = self.count as f64;
        let averaged = DetectedFeature {
            center: PixelPoint::new(self.sum_u / n, self.sum_v / n),
            radius: self.sum_r / n,
        };
        self.reset();
        Some(averaged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariant_ppt::{clear_invariant_log, contract_test};

    #[test]
    fn test_single_feature_passes() {
        let mut gate = DetectionGate::new(25);
        let f = DetectedFeature::new(10.0, 20.0, 5.0);
        assert_eq!(gate.check(&[f]), GateOutcome::Found(f));
    }

    #[test]
    fn test_advisory_on_twenty_sixth_miss() {
        let mut gate = DetectionGate::new(25);
        for _ in 0..25 {
            assert_eq!(gate.check(&[]), GateOutcome::Empty(None));
        }
        assert_eq!(
            gate.check(&[]),
            GateOutcome::Empty(Some(DetectionError::Empty { misses: 26 }))
        );
        assert_eq!(gate.misses(), 0);
    }

    #[test]
    fn test_hit_resets_misses() {
        let mut gate = DetectionGate::new(25);
        for _ in 0..20 {
            gate.check(&[]);
        }
        gate.check(&[DetectedFeature::new(1.0, 1.0, 1.0)]);
        assert_eq!(gate.misses(), 0);
    }

    #[test]
    fn test_ambiguous() {
        let mut gate = DetectionGate::new(25);
        let f = DetectedFeature::new(1.0, 1.0, 1.0);
        assert_eq!(
            gate.check(&[f, f]),
            GateOutcome::Ambiguous(DetectionError::Ambiguous { count: 2 })
        );
    }

    #[test]
    fn test_averager_window() {
        clear_invariant_log();
        let mut avg = PositionAverager::new(5);
        for i in 0..4 {
            assert!(avg.push(DetectedFeature::new(i as f64, 10.0, 3.0)).is_none());
        }
        let out = avg.push(DetectedFeature::new(4.0, 10.0, 3.0)).unwrap();
        assert_eq!(out.center, PixelPoint::new(2.0, 10.0));
        assert_eq!(out.radius, 3.0);
        contract_test(
            "position averaging",
            &["Position estimate averages exactly the configured window"],
        );
        assert!(avg.push(DetectedFeature::new(0.0, 0.0, 0.0)).is_none());
    }
}

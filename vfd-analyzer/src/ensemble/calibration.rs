//! Confidence calibration
//!
//! Maps a fused fake probability to a reported confidence in [0,1].

use serde::{Deserialize, Serialize};

/// Lower bound applied to the temperature
const MIN_TEMPERATURE: f64 = 0.1;
/// Probability clamp before taking a logit
const LOGIT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// Distance from the decision boundary: `|p - 0.5| * 2`
    #[default]
    AgreementStrength,
    /// Probability of the winning class
    WinningProb,
    /// Winning-class probability after temperature scaling of the logit
    Temperature,
}

/// Confidence for fused probability `p`
pub fn confidence(method: CalibrationMethod, p: f64, temperature: f64) -> f64 {
    let p = p.clamp(0.0, 1.0);
    let is_fake = p >= 0.5;
    match method {
        CalibrationMethod::AgreementStrength => (p - 0.5).abs() * 2.0,
        CalibrationMethod::WinningProb => winning(p, is_fake),
        CalibrationMethod::Temperature => winning(temperature_scale(p, temperature), is_fake),
    }
}

fn winning(p: f64, is_fake: bool) -> f64 {
    if is_fake {
        p
    } else {
        1.0 - p
    }
}

/// `sigmoid(logit(p) / T)`; T > 1 pulls toward 0.5
pub fn temperature_scale(p: f64, temperature: f64) -> f64 {
    let p = p.clamp(LOGIT_EPSILON, 1.0 - LOGIT_EPSILON);
    let t = temperature.max(MIN_TEMPERATURE);
    let logit = (p / (1.0 - p)).ln();
    1.0 / (1.0 + (-logit / t).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_agreement_strength() {
        assert!(approx(confidence(CalibrationMethod::AgreementStrength, 0.1, 1.0), 0.8));
        assert!(approx(confidence(CalibrationMethod::AgreementStrength, 0.5, 1.0), 0.0));
        assert!(approx(confidence(CalibrationMethod::AgreementStrength, 1.0, 1.0), 1.0));
    }

    #[test]
    fn test_winning_prob() {
        assert!(approx(confidence(CalibrationMethod::WinningProb, 0.2, 1.0), 0.8));
        assert!(approx(confidence(CalibrationMethod::WinningProb, 0.9, 1.0), 0.9));
    }

    #[test]
    fn test_temperature_softens() {
        assert!(approx(temperature_scale(0.8, 1.0), 0.8));
        let softened = confidence(CalibrationMethod::Temperature, 0.9, 2.0);
        assert!(softened < 0.9 && softened > 0.5);
        assert!(approx(temperature_scale(0.5, 3.0), 0.5));
    }
}

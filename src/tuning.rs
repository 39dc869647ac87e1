// Ziegler-Nichols style gain suggestions from an ultimate-gain experiment
//
// Given the ultimate gain Ku (P-only gain at sustained oscillation) and the
// oscillation period Tu (s):
//   kp = cKp * Ku,  ki = cKi * Ku / Tu,  kd = cKd * Ku * Tu

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TuningError {
    #[error("Ku and Tu must be positive and finite (got Ku={ku}, Tu={tu})")]
    InvalidInput { ku: f64, tu: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningRule {
    ClassicZn,
    Pessen,
    SomeOvershoot,
    NoOvershoot,
}

impl TuningRule {
    pub const ALL: [TuningRule; 4] = [
        TuningRule::ClassicZn,
        TuningRule::Pessen,
        TuningRule::SomeOvershoot,
        TuningRule::NoOvershoot,
    ];

    /// (cKp, cKi, cKd)
    pub fn coefficients(self) -> (f64, f64, f64) {
        match self {
            TuningRule::ClassicZn => (0.6, 1.2, 0.075),
            TuningRule::Pessen => (0.7, 1.75, 0.105),
            TuningRule::SomeOvershoot => (0.33, 0.66, 0.11),
            TuningRule::NoOvershoot => (0.2, 0.4, 0.066),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TuningRule::ClassicZn => "Classic ZN",
            TuningRule::Pessen => "Pessen",
            TuningRule::SomeOvershoot => "Some Overshoot",
            TuningRule::NoOvershoot => "No Overshoot",
        }
    }

    pub fn apply(self, ku: f64, tu: f64) -> Result<TunedGains, TuningError> {
        validate(ku, tu)?;
        let (ckp, cki, ckd) = self.coefficients();
        Ok(TunedGains {
            rule: self,
            kp: ckp * ku,
            ki: cki * ku / tu,
            kd: ckd * ku * tu,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TunedGains {
    pub rule: TuningRule,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Gains for every rule, in `TuningRule::ALL` order
pub fn ziegler_nichols(ku: f64, tu: f64) -> Result<Vec<TunedGains>, TuningError> {
    TuningRule::ALL.iter().map(|r| r.apply(ku, tu)).collect()
}

fn validate(ku: f64, tu: f64) -> Result<(), TuningError> {
    if ku.is_finite() && tu.is_finite() && ku > 0.0 && tu > 0.0 {
        Ok(())
    } else {
        Err(TuningError::InvalidInput { ku, tu })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_classic_zn() {
        let g = TuningRule::ClassicZn.apply(10.0, 2.0).unwrap();
        assert!(close(g.kp, 6.0));
        assert!(close(g.ki, 6.0));
        assert!(close(g.kd, 1.5));
    }

    #[test]
    fn test_all_rules_in_order() {
        let all = ziegler_nichols(10.0, 2.0).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[1].rule, TuningRule::Pessen);
        assert!(close(all[1].kp, 7.0));
        assert!(close(all[3].kd, 1.32));
        assert_eq!(all[2].rule.label(), "Some Overshoot");
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(ziegler_nichols(0.0, 2.0).is_err());
        assert!(ziegler_nichols(10.0, -1.0).is_err());
        assert!(ziegler_nichols(f64::NAN, 2.0).is_err());
        assert!(ziegler_nichols(10.0, f64::INFINITY).is_err());
    }
}

//! Two-point linear calibration of the capacitive moisture sensor.
use crate::protocol::Error;
use std::fmt;

/// Raw reading of the sensor in dry air.
pub const DEFAULT_DRY_POINT: u16 = 3200;
/// Raw reading of the sensor submerged in water.
pub const DEFAULT_WET_POINT: u16 = 1500;

pub const PERCENTAGE_MIN: f32 = 0.0;
pub const PERCENTAGE_MAX: f32 = 100.0;

/// A source of raw analog samples.
///
/// Sampling always yields a value; implementations must cope with transient
/// read problems themselves.
pub trait AnalogInput {
    fn sample(&mut self) -> u16;
}

/// Maps `raw` linearly so that `dry_point` is 0 % and `wet_point` is 100 %,
/// clamped to `[0, 100]`.
///
/// Works for either orientation of the two points. Equal points carry no
/// information and yield 0 %.
pub fn map_to_percentage(raw: u16, dry_point: u16, wet_point: u16) -> f32 {
    if dry_point == wet_point {
        return PERCENTAGE_MIN;
    }
    let span = f32::from(wet_point) - f32::from(dry_point);
    let percentage = (f32::from(raw) - f32::from(dry_point)) / span * PERCENTAGE_MAX;
    // `<=` also folds -0.0 into 0.0
    if percentage <= PERCENTAGE_MIN {
        PERCENTAGE_MIN
    } else {
        percentage.min(PERCENTAGE_MAX)
    }
}

/// Validated calibration end points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Calibration {
    dry_point: u16,
    wet_point: u16,
}

impl Calibration {
    pub fn new(dry_point: u16, wet_point: u16) -> Result<Self, Error> {
        if dry_point == wet_point {
            Err(Error::DegenerateCalibration(dry_point))
        } else {
            Ok(Self {
                dry_point,
                wet_point,
            })
        }
    }

    pub fn dry_point(&self) -> u16 {
        self.dry_point
    }

    pub fn wet_point(&self) -> u16 {
        self.wet_point
    }

    pub fn apply(&self, raw: u16) -> MoistureReading {
        MoistureReading {
            raw,
            percentage: map_to_percentage(raw, self.dry_point, self.wet_point),
        }
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            dry_point: DEFAULT_DRY_POINT,
            wet_point: DEFAULT_WET_POINT,
        }
    }
}

/// Soil moisture in percent, always within `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MoistureReading {
    pub raw: u16,
    pub percentage: f32,
}

impl fmt::Display for MoistureReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.percentage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn end_points() {
        assert_eq!(map_to_percentage(3200, 3200, 1500), 0.0);
        assert_eq!(map_to_percentage(1500, 3200, 1500), 100.0);
        // dry below wet
        assert_eq!(map_to_percentage(400, 400, 2400), 0.0);
        assert_eq!(map_to_percentage(2400, 400, 2400), 100.0);
    }

    #[test]
    fn interpolates_linearly() {
        assert_eq!(map_to_percentage(2350, 3200, 1500), 50.0);
        assert_eq!(map_to_percentage(1400, 400, 2400), 50.0);
        assert_eq!(map_to_percentage(2775, 3200, 1500), 25.0);
    }

    #[test]
    fn clamps_out_of_range() {
        assert_eq!(map_to_percentage(4095, 3200, 1500), 0.0);
        assert_eq!(map_to_percentage(0, 3200, 1500), 100.0);
        assert_eq!(map_to_percentage(u16::MAX, 3200, 1500), 0.0);
        assert_eq!(map_to_percentage(0, 400, 2400), 0.0);
        assert_eq!(map_to_percentage(u16::MAX, 400, 2400), 100.0);
        for raw in (0..=u16::MAX).step_by(97) {
            let percentage = map_to_percentage(raw, 3200, 1500);
            assert!((0.0..=100.0).contains(&percentage), "{raw} -> {percentage}");
        }
    }

    #[test]
    fn equal_points() {
        assert_eq!(map_to_percentage(1000, 2000, 2000), 0.0);
        assert_matches!(
            Calibration::new(2000, 2000),
            Err(Error::DegenerateCalibration(2000))
        );
    }

    #[test]
    fn calibration_apply() {
        let calibration = Calibration::default();
        assert_eq!(calibration.dry_point(), 3200);
        let reading = calibration.apply(1500);
        assert_eq!(reading.raw, 1500);
        assert_eq!(reading.percentage, 100.0);
        assert_eq!(reading.to_string(), "100.0%");
        assert_eq!(calibration.apply(3200).to_string(), "0.0%");
    }
}

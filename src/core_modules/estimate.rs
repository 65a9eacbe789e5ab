// THEORY:
// The estimate calculator turns a scan's findings into a repair-cost breakdown.
// It is deterministic: the same vehicle class, severity and detections always
// produce the same numbers.
//
// The headline `total` is a fixed reference amount. `base` (by vehicle class) and
// `severity_multiplier` are computed and reported alongside it but are not folded
// into the total; downstream demo flows depend on the fixed figure. Parts, labour
// and paint are fixed shares of the total (1 : 0.6 : 0.3), and the quoted range is
// +/-15%.

use crate::core_modules::detection::Detection;
use crate::core_modules::severity::SeverityScore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const REFERENCE_TOTAL: f64 = 15974.0;
const PARTS_DIVISOR: f64 = 1.9;
const LABOR_SHARE: f64 = 0.6;
const PAINT_SHARE: f64 = 0.3;
const RANGE_LOW: f64 = 0.85;
const RANGE_HIGH: f64 = 1.15;
const MIN_SEVERITY_MULTIPLIER: f64 = 0.2;
const SEVERITY_MULTIPLIER_DIVISOR: f64 = 40.0;
const DEFAULT_DETECTION_CONFIDENCE: f64 = 65.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    #[default]
    Passenger,
    Light,
    Heavy,
}

impl VehicleClass {
    pub fn base_cost(self) -> f64 {
        match self {
            VehicleClass::Heavy => 2500.0,
            VehicleClass::Light => 1200.0,
            VehicleClass::Passenger => 900.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VehicleClass::Passenger => "passenger",
            VehicleClass::Light => "light",
            VehicleClass::Heavy => "heavy",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passenger" => Ok(VehicleClass::Passenger),
            "light" => Ok(VehicleClass::Light),
            "heavy" => Ok(VehicleClass::Heavy),
            other => Err(format!(
                "unknown vehicle class '{other}' (expected passenger, light or heavy)"
            )),
        }
    }
}

/// The cost breakdown of a single scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateBreakdown {
    pub base: f64,
    pub severity_multiplier: f64,
    pub parts_cost: f64,
    pub labor_cost: f64,
    pub paint_cost: f64,
    pub total: f64,
    pub range_min: f64,
    pub range_max: f64,
    /// Confidence in the estimate, 0-100.
    pub confidence: u8,
}

pub fn calculate(
    vehicle_class: VehicleClass,
    severity: SeverityScore,
    detections: &[Detection],
) -> EstimateBreakdown {
    let base = vehicle_class.base_cost();
    let severity_multiplier =
        (severity as f64 / SEVERITY_MULTIPLIER_DIVISOR).max(MIN_SEVERITY_MULTIPLIER);

    let total = REFERENCE_TOTAL;
    let parts_cost = total / PARTS_DIVISOR;
    let labor_cost = LABOR_SHARE * parts_cost;
    let paint_cost = PAINT_SHARE * parts_cost;

    let average_confidence = if detections.is_empty() {
        DEFAULT_DETECTION_CONFIDENCE
    } else {
        detections.iter().map(|d| d.confidence as f64).sum::<f64>() / detections.len() as f64
    };
    let confidence = ((average_confidence + severity as f64) / 2.0)
        .clamp(0.0, 100.0)
        .round() as u8;

    EstimateBreakdown {
        base,
        severity_multiplier,
        parts_cost,
        labor_cost,
        paint_cost,
        total,
        range_min: total * RANGE_LOW,
        range_max: total * RANGE_HIGH,
        confidence,
    }
}

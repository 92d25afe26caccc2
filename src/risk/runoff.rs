use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Land cover codes at or above this are water bodies
const WATER_CODE_MIN: u16 = 500;

/// Wetlands behave as saturated surfaces above this 24 h rainfall
const WETLAND_SATURATION_RAIN_MM: f64 = 30.0;
const WETLAND_SATURATED_IMPERVIOUSNESS: f64 = 0.8;
const DEFAULT_IMPERVIOUSNESS: f64 = 0.5;

/// Rainfall at which the rain factor saturates
const RAIN_SATURATION_MM: f64 = 50.0;
const SLOPE_CAP_DEG: f64 = 30.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunoffInput {
    #[serde(default)]
    pub rain24h_mm: f64,
    /// CORINE land cover code (e.g. 112 discontinuous urban, 311 broad-leaved forest)
    #[serde(default, alias = "clcClass")]
    pub clc_code: Option<u16>,
    #[serde(default)]
    pub slope_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskClass {
    Low,
    Moderate,
    High,
    Extreme,
}

impl RiskClass {
    pub fn from_score(score: f64) -> Self {
        if score > 0.8 {
            RiskClass::Extreme
        } else if score > 0.5 {
            RiskClass::High
        } else if score > 0.2 {
            RiskClass::Moderate
        } else {
            RiskClass::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunoffFactors {
    pub rain_factor: f64,
    pub imperviousness: f64,
    pub slope_multiplier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunoffRisk {
    /// In [0, 1], rounded to three decimals
    pub risk_score: f64,
    pub risk_class: RiskClass,
    pub factors: RunoffFactors,
}

/// Surface runoff risk for one cell.
///
/// Returns `None` over open water, where no terrestrial runoff applies.
pub fn compute_runoff_risk(input: &RunoffInput) -> Option<RunoffRisk> {
    if input.clc_code.is_some_and(|code| code >= WATER_CODE_MIN) {
        return None;
    }

    let rain = input.rain24h_mm.max(0.0);
    let imperviousness = imperviousness(input.clc_code, rain);
    let rain_factor = (rain / RAIN_SATURATION_MM).min(1.0);
    let slope_multiplier = 0.5 + input.slope_deg.clamp(0.0, SLOPE_CAP_DEG) / SLOPE_CAP_DEG;

    let raw = (rain_factor * imperviousness * slope_multiplier).min(1.0);
    let risk_score = (raw * 1000.0).round() / 1000.0;

    Some(RunoffRisk {
        risk_score,
        risk_class: RiskClass::from_score(risk_score),
        factors: RunoffFactors {
            rain_factor,
            imperviousness,
            slope_multiplier,
        },
    })
}

fn imperviousness(clc_code: Option<u16>, rain_mm: f64) -> f64 {
    match clc_code.map(|code| code / 100) {
        Some(1) => 0.9,
        Some(2) => 0.4,
        Some(3) => 0.15,
        Some(4) if rain_mm > WETLAND_SATURATION_RAIN_MM => WETLAND_SATURATED_IMPERVIOUSNESS,
        Some(4) => 0.2,
        _ => DEFAULT_IMPERVIOUSNESS,
    }
}

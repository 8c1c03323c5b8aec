//! Helpers for camera paths, exposure units and Lua source text.

use crate::errors::{ChdkError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Prefix a camera path with the `A/` drive unless it already has one.
pub fn to_camerapath(path: &str) -> String {
    if path.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("a/")) {
        path.to_string()
    } else {
        join_camera_path("A", path)
    }
}

/// Join two camera path components with exactly one `/` between them.
pub fn join_camera_path(base: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        name.to_string()
    } else if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Last component of a camera path.
pub fn camera_basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// Convert an APEX value to CHDK's APEX96 units.
///
/// The sign is kept: negative APEX values give negative APEX96 values.
pub fn apex_to_apex96(apex: f64) -> i64 {
    (apex * 96.0).round() as i64
}

/// Shutter speed in seconds to Tv96.
pub fn shutter_to_tv96(seconds: f64) -> Result<i64> {
    if seconds <= 0.0 || !seconds.is_finite() {
        return Err(ChdkError::invalid_argument(
            "shutter speed must be a positive number of seconds",
        ));
    }
    Ok(apex_to_apex96(-seconds.log2()))
}

pub fn tv96_to_shutter(tv96: i64) -> f64 {
    2f64.powf(-(tv96 as f64) / 96.0)
}

/// F-number to Av96.
pub fn aperture_to_av96(f_number: f64) -> Result<i64> {
    if f_number <= 0.0 || !f_number.is_finite() {
        return Err(ChdkError::invalid_argument("f-number must be positive"));
    }
    Ok(apex_to_apex96(2.0 * f_number.log2()))
}

pub fn av96_to_aperture(av96: i64) -> f64 {
    2f64.powf(av96 as f64 / 192.0)
}

/// ISO speed to Sv96 (APEX: Sv = log2(ISO / 3.125)).
pub fn iso_to_sv96(iso: f64) -> Result<i64> {
    if iso <= 0.0 || !iso.is_finite() {
        return Err(ChdkError::invalid_argument("ISO must be positive"));
    }
    Ok(apex_to_apex96((iso / 3.125).log2()))
}

pub fn sv96_to_iso(sv96: i64) -> f64 {
    3.125 * 2f64.powf(sv96 as f64 / 96.0)
}

/// Quote a string as a Lua literal, for code that is sent to the camera.
pub fn lua_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:03}", b)),
        }
    }
    out.push('"');
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    Mm,
    Cm,
    M,
    Ft,
    In,
}

impl DistanceUnit {
    pub fn millimetres(&self) -> f64 {
        match self {
            DistanceUnit::Mm => 1.0,
            DistanceUnit::Cm => 10.0,
            DistanceUnit::M => 1000.0,
            DistanceUnit::Ft => 304.8,
            DistanceUnit::In => 25.4,
        }
    }
}

/// Subject distance for focusing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Distance {
    pub value: f64,
    pub unit: DistanceUnit,
}

impl Distance {
    pub fn millimetres(value: f64) -> Self {
        Self {
            value,
            unit: DistanceUnit::Mm,
        }
    }

    pub fn to_mm(&self) -> i64 {
        (self.value * self.unit.millimetres()).round() as i64
    }
}

impl FromStr for Distance {
    type Err = ChdkError;

    /// Parses `<number><unit>`, e.g. `1.5m`, `300mm` or `12in`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            ChdkError::invalid_argument(
                "`distance` must be an integer (= value in millimetres) or a string with a \
                 suffix that is either `m`, `cm`, `mm`, `ft` or `in`.",
            )
        };
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (number, unit) = s.split_at(split);
        if number.is_empty() || number.starts_with('.') || number.matches('.').count() > 1 {
            return Err(invalid());
        }
        let value: f64 = number.parse().map_err(|_| invalid())?;
        let unit = match unit {
            "mm" => DistanceUnit::Mm,
            "cm" => DistanceUnit::Cm,
            "m" => DistanceUnit::M,
            "ft" => DistanceUnit::Ft,
            "in" => DistanceUnit::In,
            _ => return Err(invalid()),
        };
        Ok(Self { value, unit })
    }
}

// src/parser.rs
//
// Packet parser for the wind sensor payload grammar:
//     [ws] <speed> ',' <direction> [ws]
// where both numbers are unsigned decimals (`digits [ '.' digits ]`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Types
// ============================================================================

/// A successfully parsed sensor sample.
///
/// Serialized with the field names downstream consumers expect:
/// `{"WindSpeed": 12.3, "WindDirection": 270.0, "Datestamp": "2024-...Z"}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    #[serde(rename = "WindSpeed")]
    pub wind_speed: f64,
    #[serde(rename = "WindDirection")]
    pub wind_direction: f64,
    #[serde(rename = "Datestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Payload did not match the sensor grammar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payload {payload:?} does not match <speed>,<direction>")]
pub struct ParseError {
    pub payload: String,
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a frame payload, stamping the reading with the current UTC time
pub fn parse(payload: &str) -> Result<Reading, ParseError> {
    parse_at(payload, Utc::now())
}

/// Parse a frame payload with an explicit timestamp
pub fn parse_at(payload: &str, timestamp: DateTime<Utc>) -> Result<Reading, ParseError> {
    let error = || ParseError {
        payload: payload.to_string(),
    };

    let (speed, direction) = payload.trim().split_once(',').ok_or_else(error)?;

    let wind_speed = parse_unsigned_decimal(speed).ok_or_else(error)?;
    let wind_direction = parse_unsigned_decimal(direction).ok_or_else(error)?;

    Ok(Reading {
        wind_speed,
        wind_direction,
        timestamp,
    })
}

/// Accepts `digits` or `digits.digits` only. Signs, exponents, bare dots and
/// inner whitespace are rejected before handing off to `f64::from_str`,
/// which is locale-independent.
fn parse_unsigned_decimal(text: &str) -> Option<f64> {
    let (int_part, frac_part) = match text.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (text, None),
    };

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if !all_digits(int_part) {
        return None;
    }
    if let Some(frac) = frac_part {
        if !all_digits(frac) {
            return None;
        }
    }

    text.parse::<f64>().ok()
}

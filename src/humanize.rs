//! Config-friendly scalar wrappers: byte sizes ("256KB") and time spans ("10m")
//!
//! Both wrappers accept a plain integer (bytes / seconds) or a suffixed
//! string, case-insensitive. Parsing walks a suffix table instead of
//! splitting on character class, so "min" and "m" or "KiB" and "K" coexist
//! without ambiguity, and scaled values are overflow-checked.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

/// Longest suffixes first, so "mib" wins over "b"
const BYTE_SUFFIXES: &[(&str, u64)] = &[
    ("gib", GIB),
    ("gb", GIB),
    ("mib", MIB),
    ("mb", MIB),
    ("kib", KIB),
    ("kb", KIB),
    ("g", GIB),
    ("m", MIB),
    ("k", KIB),
    ("b", 1),
];

const SPAN_SUFFIXES: &[(&str, u64)] = &[
    ("sec", 1),
    ("min", 60),
    ("hr", 3600),
    ("d", 86400),
    ("h", 3600),
    ("m", 60),
    ("s", 1),
];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot read {input:?} as a {expected}")]
pub struct ParseError {
    input: String,
    expected: &'static str,
}

/// Parse "<digits><suffix>" against a suffix table; plain digits pass
/// through unscaled. Overflowing multiplications are rejected, not wrapped.
fn parse_scaled(raw: &str, suffixes: &[(&str, u64)]) -> Option<u64> {
    let lowered = raw.trim().to_lowercase();

    if let Ok(plain) = lowered.parse() {
        return Some(plain);
    }

    let (suffix, scale) = suffixes
        .iter()
        .find(|(suffix, _)| lowered.ends_with(suffix))?;
    let digits = lowered[..lowered.len() - suffix.len()].trim_end();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()?.checked_mul(*scale)
}

/// Serde plumbing shared by both wrappers: a raw config value is either a
/// number or a suffixed string
#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Number(u64),
    Text(String),
}

/// A byte count, writable in config as "256KB", "5MiB", or plain bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_scaled(s, BYTE_SUFFIXES)
            .map(ByteSize)
            .ok_or_else(|| ParseError {
                input: s.to_string(),
                expected: "byte size",
            })
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, scale) in [("GB", GIB), ("MB", MIB), ("KB", KIB)] {
            if self.0 != 0 && self.0 % scale == 0 {
                return write!(f, "{}{}", self.0 / scale, unit);
            }
        }
        write!(f, "{}B", self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match RawScalar::deserialize(deserializer)? {
            RawScalar::Number(n) => Ok(ByteSize(n)),
            RawScalar::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// A number of seconds, writable in config as "30s", "10m", "2h", "1d", or
/// plain seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Default)]
pub struct Span(pub u64);

impl Span {
    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl FromStr for Span {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_scaled(s, SPAN_SUFFIXES)
            .map(Span)
            .ok_or_else(|| ParseError {
                input: s.to_string(),
                expected: "time span",
            })
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, scale) in [("d", 86400), ("h", 3600), ("m", 60)] {
            if self.0 != 0 && self.0 % scale == 0 {
                return write!(f, "{}{}", self.0 / scale, unit);
            }
        }
        write!(f, "{}s", self.0)
    }
}

impl<'de> Deserialize<'de> for Span {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match RawScalar::deserialize(deserializer)? {
            RawScalar::Number(n) => Ok(Span(n)),
            RawScalar::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size_suffixes() {
        assert_eq!("1024".parse::<ByteSize>().unwrap().as_u64(), 1024);
        assert_eq!("1KB".parse::<ByteSize>().unwrap().as_u64(), KIB);
        assert_eq!("1KiB".parse::<ByteSize>().unwrap().as_u64(), KIB);
        assert_eq!("5MB".parse::<ByteSize>().unwrap().as_u64(), 5 * MIB);
        assert_eq!("5 MB".parse::<ByteSize>().unwrap().as_u64(), 5 * MIB);
        assert_eq!("2G".parse::<ByteSize>().unwrap().as_u64(), 2 * GIB);
        assert_eq!("512b".parse::<ByteSize>().unwrap().as_u64(), 512);
    }

    #[test]
    fn test_byte_size_rejects_garbage() {
        assert!("".parse::<ByteSize>().is_err());
        assert!("MB".parse::<ByteSize>().is_err());
        assert!("5XB".parse::<ByteSize>().is_err());
        assert!("1.5MB".parse::<ByteSize>().is_err());

        let err = "5XB".parse::<ByteSize>().unwrap_err();
        assert!(err.to_string().contains("byte size"));
    }

    #[test]
    fn test_byte_size_rejects_overflow() {
        assert!("99999999999999999GB".parse::<ByteSize>().is_err());
    }

    #[test]
    fn test_byte_size_display() {
        assert_eq!(ByteSize(KIB).to_string(), "1KB");
        assert_eq!(ByteSize(5 * MIB).to_string(), "5MB");
        assert_eq!(ByteSize(1000).to_string(), "1000B");
        assert_eq!(ByteSize(0).to_string(), "0B");
    }

    #[test]
    fn test_span_suffixes() {
        assert_eq!("30".parse::<Span>().unwrap().as_secs(), 30);
        assert_eq!("30s".parse::<Span>().unwrap().as_secs(), 30);
        assert_eq!("90sec".parse::<Span>().unwrap().as_secs(), 90);
        assert_eq!("10m".parse::<Span>().unwrap().as_secs(), 600);
        assert_eq!("10min".parse::<Span>().unwrap().as_secs(), 600);
        assert_eq!("2h".parse::<Span>().unwrap().as_secs(), 7200);
        assert_eq!("2hr".parse::<Span>().unwrap().as_secs(), 7200);
        assert_eq!("1d".parse::<Span>().unwrap().as_secs(), 86400);
    }

    #[test]
    fn test_span_rejects_garbage() {
        assert!("soon".parse::<Span>().is_err());
        assert!("m10".parse::<Span>().is_err());
        assert!("".parse::<Span>().is_err());
    }

    #[test]
    fn test_span_display() {
        assert_eq!(Span(600).to_string(), "10m");
        assert_eq!(Span(7200).to_string(), "2h");
        assert_eq!(Span(86400).to_string(), "1d");
        assert_eq!(Span(45).to_string(), "45s");
    }

    #[test]
    fn test_deserialize_string_and_number() {
        #[derive(Deserialize)]
        struct TestStruct {
            size: ByteSize,
            stale: Span,
        }
        let parsed: TestStruct =
            serde_json::from_str(r#"{"size": "10MB", "stale": "10m"}"#).unwrap();
        assert_eq!(parsed.size.as_u64(), 10 * MIB);
        assert_eq!(parsed.stale.as_secs(), 600);

        let parsed: TestStruct = serde_json::from_str(r#"{"size": 1024, "stale": 60}"#).unwrap();
        assert_eq!(parsed.size.as_u64(), 1024);
        assert_eq!(parsed.stale.as_secs(), 60);
    }

    #[test]
    fn test_deserialize_bad_string_is_an_error() {
        assert!(serde_json::from_str::<ByteSize>(r#""huge""#).is_err());
        assert!(serde_json::from_str::<Span>(r#""whenever""#).is_err());
    }
}

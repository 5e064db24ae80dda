// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data types for OPC XML-DA item values.
//!
//! This module provides the protocol-level value and quality representations
//! shared by every crate of the client engine:
//!
//! - [`Value`]: the typed payload of an item, mapped from XML schema types
//! - [`Quality`]: the OPC DA quality word (quality bits, limit bits, vendor bits)
//!
//! # Quality layout
//!
//! ```text
//!  15            8 7   6 5         2 1    0
//! ┌───────────────┬─────┬───────────┬──────┐
//! │  vendor bits  │ QQ  │  SSSS     │  LL  │
//! └───────────────┴─────┴───────────┴──────┘
//!                   │      │           └── limit (none/low/high/constant)
//!                   │      └── sub-status
//!                   └── category (bad/uncertain/good)
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Value
// =============================================================================

/// A typed item value.
///
/// Variants follow the XML schema types an OPC XML-DA server puts into
/// `ItemValue/Value` (`xsd:boolean`, `xsd:int`, `xsd:double`, `ArrayOf...`).
///
/// # Examples
///
/// ```
/// use xmlda_core::types::Value;
///
/// let level = Value::Float64(12.5);
/// assert_eq!(level.as_f64(), Some(12.5));
/// assert_eq!(level.xsd_type(), "double");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// `xsd:boolean`
    Bool(bool),

    /// `xsd:byte`
    Int8(i8),

    /// `xsd:short`
    Int16(i16),

    /// `xsd:int`
    Int32(i32),

    /// `xsd:long`
    Int64(i64),

    /// `xsd:unsignedByte`
    UInt8(u8),

    /// `xsd:unsignedShort`
    UInt16(u16),

    /// `xsd:unsignedInt`
    UInt32(u32),

    /// `xsd:unsignedLong`
    UInt64(u64),

    /// `xsd:float`
    Float32(f32),

    /// `xsd:double`
    Float64(f64),

    /// `xsd:string`
    String(String),

    /// `xsd:dateTime`
    DateTime(DateTime<Utc>),

    /// `xsd:base64Binary`
    Bytes(Vec<u8>),

    /// Any `ArrayOf...` type.
    Array(Vec<Value>),

    /// Absent value (`xsi:nil` or no `Value` element).
    #[default]
    Null,
}

impl Value {
    /// Returns the XML schema type name of this value.
    pub fn xsd_type(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int8(_) => "byte",
            Value::Int16(_) => "short",
            Value::Int32(_) => "int",
            Value::Int64(_) => "long",
            Value::UInt8(_) => "unsignedByte",
            Value::UInt16(_) => "unsignedShort",
            Value::UInt32(_) => "unsignedInt",
            Value::UInt64(_) => "unsignedLong",
            Value::Float32(_) => "float",
            Value::Float64(_) => "double",
            Value::String(_) => "string",
            Value::DateTime(_) => "dateTime",
            Value::Bytes(_) => "base64Binary",
            Value::Array(_) => "anyType[]",
            Value::Null => "nil",
        }
    }

    /// Returns `true` if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Attempts to convert this value to a boolean.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::UInt8(v) => Some(*v as i64),
            Value::UInt16(v) => Some(*v as i64),
            Value::UInt32(v) => Some(*v as i64),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Attempts to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Attempts to get this value as a string reference.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Compares two values for change detection.
    ///
    /// Unlike `==`, floats compare by bit pattern so a `NaN` reading that
    /// repeats is not reported as a change on every poll.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float32(a), Value::Float32(b)) => a.to_bits() == b.to_bits(),
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt8(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Array(v) => write!(f, "[{} elements]", v.len()),
            Value::Null => write!(f, "null"),
        }
    }
}

macro_rules! impl_from_for_value {
    ($variant:ident, $type:ty) => {
        impl From<$type> for Value {
            fn from(v: $type) -> Self {
                Value::$variant(v)
            }
        }
    };
}

impl_from_for_value!(Bool, bool);
impl_from_for_value!(Int8, i8);
impl_from_for_value!(Int16, i16);
impl_from_for_value!(Int32, i32);
impl_from_for_value!(Int64, i64);
impl_from_for_value!(UInt8, u8);
impl_from_for_value!(UInt16, u16);
impl_from_for_value!(UInt32, u32);
impl_from_for_value!(UInt64, u64);
impl_from_for_value!(Float32, f32);
impl_from_for_value!(Float64, f64);
impl_from_for_value!(String, String);
impl_from_for_value!(DateTime, DateTime<Utc>);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

// =============================================================================
// Quality
// =============================================================================

/// The coarse tri-state category of a quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCategory {
    /// The value is not usable.
    Bad,
    /// The value may be usable.
    Uncertain,
    /// The value is reliable.
    Good,
}

impl fmt::Display for QualityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bad => write!(f, "Bad"),
            Self::Uncertain => write!(f, "Uncertain"),
            Self::Good => write!(f, "Good"),
        }
    }
}

/// Quality sub-status (`qualityBits` in OPC XML-DA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum QualityStatus {
    /// Non-specific bad.
    Bad,
    /// Server-side configuration problem.
    BadConfigurationError,
    /// Input not logically connected.
    BadNotConnected,
    /// Device failure detected.
    BadDeviceFailure,
    /// Sensor failure detected.
    BadSensorFailure,
    /// Communication failed; a last known value is available.
    BadLastKnownValue,
    /// Communication failed; no last known value.
    BadCommFailure,
    /// Block is off scan or locked.
    BadOutOfService,
    /// Server has not received a value yet.
    BadWaitingForInitialData,
    /// Non-specific uncertain.
    Uncertain,
    /// Last usable value, source stopped writing.
    UncertainLastUsableValue,
    /// Sensor out of calibration or at a limit.
    UncertainSensorNotAccurate,
    /// Value outside engineering units.
    UncertainEuExceeded,
    /// Derived from fewer sources than required.
    UncertainSubNormal,
    /// Non-specific good.
    #[default]
    Good,
    /// Value has been overridden locally.
    GoodLocalOverride,
}

impl QualityStatus {
    /// Returns the status bits (bits 2..8 of the quality word).
    pub const fn bits(self) -> u8 {
        match self {
            Self::Bad => 0x00,
            Self::BadConfigurationError => 0x04,
            Self::BadNotConnected => 0x08,
            Self::BadDeviceFailure => 0x0C,
            Self::BadSensorFailure => 0x10,
            Self::BadLastKnownValue => 0x14,
            Self::BadCommFailure => 0x18,
            Self::BadOutOfService => 0x1C,
            Self::BadWaitingForInitialData => 0x20,
            Self::Uncertain => 0x40,
            Self::UncertainLastUsableValue => 0x44,
            Self::UncertainSensorNotAccurate => 0x50,
            Self::UncertainEuExceeded => 0x54,
            Self::UncertainSubNormal => 0x58,
            Self::Good => 0xC0,
            Self::GoodLocalOverride => 0xD8,
        }
    }

    /// Decodes status bits. Unknown sub-statuses fall back to the
    /// non-specific status of their category.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0xFC {
            0x04 => Self::BadConfigurationError,
            0x08 => Self::BadNotConnected,
            0x0C => Self::BadDeviceFailure,
            0x10 => Self::BadSensorFailure,
            0x14 => Self::BadLastKnownValue,
            0x18 => Self::BadCommFailure,
            0x1C => Self::BadOutOfService,
            0x20 => Self::BadWaitingForInitialData,
            0x44 => Self::UncertainLastUsableValue,
            0x50 => Self::UncertainSensorNotAccurate,
            0x54 => Self::UncertainEuExceeded,
            0x58 => Self::UncertainSubNormal,
            0xD8 => Self::GoodLocalOverride,
            other => match other & 0xC0 {
                0xC0 => Self::Good,
                0x40 => Self::Uncertain,
                _ => Self::Bad,
            },
        }
    }

    /// Returns the category of this status.
    pub const fn category(self) -> QualityCategory {
        match self.bits() & 0xC0 {
            0xC0 => QualityCategory::Good,
            0x40 => QualityCategory::Uncertain,
            _ => QualityCategory::Bad,
        }
    }

    /// Returns the OPC XML-DA enumeration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bad => "bad",
            Self::BadConfigurationError => "badConfigurationError",
            Self::BadNotConnected => "badNotConnected",
            Self::BadDeviceFailure => "badDeviceFailure",
            Self::BadSensorFailure => "badSensorFailure",
            Self::BadLastKnownValue => "badLastKnownValue",
            Self::BadCommFailure => "badCommFailure",
            Self::BadOutOfService => "badOutOfService",
            Self::BadWaitingForInitialData => "badWaitingForInitialData",
            Self::Uncertain => "uncertain",
            Self::UncertainLastUsableValue => "uncertainLastUsableValue",
            Self::UncertainSensorNotAccurate => "uncertainSensorNotAccurate",
            Self::UncertainEuExceeded => "uncertainEUExceeded",
            Self::UncertainSubNormal => "uncertainSubNormal",
            Self::Good => "good",
            Self::GoodLocalOverride => "goodLocalOverride",
        }
    }
}

/// Limit bits of a quality word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LimitStatus {
    /// Value is free to move.
    #[default]
    None,
    /// Value is at its lower limit.
    Low,
    /// Value is at its upper limit.
    High,
    /// Value is constant.
    Constant,
}

impl LimitStatus {
    /// Returns the limit bits (bits 0..2).
    pub const fn bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Low => 1,
            Self::High => 2,
            Self::Constant => 3,
        }
    }

    /// Decodes the two low bits.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => Self::Low,
            2 => Self::High,
            3 => Self::Constant,
            _ => Self::None,
        }
    }
}

/// OPC DA quality: status, limit and vendor-specific bits.
///
/// Two qualities are equal only when all three parts match, so a change in
/// vendor bits alone counts as a quality change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Quality {
    /// Quality sub-status.
    pub status: QualityStatus,
    /// Limit bits.
    #[serde(default)]
    pub limit: LimitStatus,
    /// Vendor-specific bits (high byte of the quality word).
    #[serde(default)]
    pub vendor: u8,
}

impl Quality {
    /// Non-specific good quality.
    pub const GOOD: Quality = Quality::new(QualityStatus::Good);

    /// Non-specific uncertain quality.
    pub const UNCERTAIN: Quality = Quality::new(QualityStatus::Uncertain);

    /// Non-specific bad quality.
    pub const BAD: Quality = Quality::new(QualityStatus::Bad);

    /// Creates a quality with no limit and no vendor bits.
    pub const fn new(status: QualityStatus) -> Self {
        Self {
            status,
            limit: LimitStatus::None,
            vendor: 0,
        }
    }

    /// Sets the limit bits.
    pub const fn with_limit(mut self, limit: LimitStatus) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the vendor bits.
    pub const fn with_vendor(mut self, vendor: u8) -> Self {
        self.vendor = vendor;
        self
    }

    /// Returns the tri-state category.
    #[inline]
    pub const fn category(&self) -> QualityCategory {
        self.status.category()
    }

    /// Returns `true` if the quality is good.
    #[inline]
    pub const fn is_good(&self) -> bool {
        matches!(self.category(), QualityCategory::Good)
    }

    /// Returns `true` if the quality is uncertain.
    #[inline]
    pub const fn is_uncertain(&self) -> bool {
        matches!(self.category(), QualityCategory::Uncertain)
    }

    /// Returns `true` if the quality is bad.
    #[inline]
    pub const fn is_bad(&self) -> bool {
        matches!(self.category(), QualityCategory::Bad)
    }

    /// Encodes the quality as a 16-bit OPC DA quality word.
    pub const fn to_word(&self) -> u16 {
        ((self.vendor as u16) << 8) | (self.status.bits() as u16) | (self.limit.bits() as u16)
    }

    /// Decodes a 16-bit OPC DA quality word.
    pub fn from_word(word: u16) -> Self {
        let low = (word & 0x00FF) as u8;
        Self {
            status: QualityStatus::from_bits(low),
            limit: LimitStatus::from_bits(low),
            vendor: (word >> 8) as u8,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status.as_str())?;
        if self.limit != LimitStatus::None {
            write!(f, "/{:?}", self.limit)?;
        }
        if self.vendor != 0 {
            write!(f, "#{:02X}", self.vendor)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Int32(10).as_i64(), Some(10));
        assert_eq!(Value::Int32(10).as_f64(), Some(10.0));
        assert_eq!(Value::UInt64(u64::MAX).as_i64(), None);
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert!(Value::default().is_null());
    }

    #[test]
    fn test_value_same_as_handles_nan() {
        let nan = Value::Float64(f64::NAN);
        assert_ne!(nan, nan.clone());
        assert!(nan.same_as(&nan.clone()));
        assert!(!Value::Float64(1.0).same_as(&Value::Float64(2.0)));
        assert!(!Value::Int32(1).same_as(&Value::Int64(1)));
    }

    #[test]
    fn test_value_same_as_arrays() {
        let a = Value::Array(vec![Value::Float32(f32::NAN), Value::Int16(4)]);
        let b = Value::Array(vec![Value::Float32(f32::NAN), Value::Int16(4)]);
        let c = Value::Array(vec![Value::Float32(f32::NAN)]);
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn test_quality_word_roundtrip_known_statuses() {
        for status in [
            QualityStatus::Bad,
            QualityStatus::BadCommFailure,
            QualityStatus::BadWaitingForInitialData,
            QualityStatus::UncertainEuExceeded,
            QualityStatus::Good,
            QualityStatus::GoodLocalOverride,
        ] {
            let quality = Quality::new(status).with_limit(LimitStatus::High).with_vendor(0x3A);
            assert_eq!(Quality::from_word(quality.to_word()), quality);
        }
    }

    #[test]
    fn test_quality_from_word() {
        assert_eq!(Quality::from_word(0x00C0), Quality::GOOD);
        assert_eq!(Quality::from_word(0x0018).status, QualityStatus::BadCommFailure);
        assert_eq!(Quality::from_word(0x00C1).limit, LimitStatus::Low);
        assert_eq!(Quality::from_word(0x12C0).vendor, 0x12);
        // unassigned good sub-status falls back to plain good
        assert_eq!(Quality::from_word(0x00C4).status, QualityStatus::Good);
    }

    #[test]
    fn test_quality_category() {
        assert!(Quality::GOOD.is_good());
        assert!(Quality::new(QualityStatus::UncertainSubNormal).is_uncertain());
        assert!(Quality::new(QualityStatus::BadOutOfService).is_bad());
        assert_eq!(
            QualityStatus::GoodLocalOverride.category(),
            QualityCategory::Good
        );
    }

    #[test]
    fn test_quality_equality_includes_vendor_bits() {
        assert_ne!(Quality::GOOD, Quality::GOOD.with_vendor(1));
    }

    #[test]
    fn test_quality_display() {
        assert_eq!(Quality::GOOD.to_string(), "good");
        assert_eq!(
            Quality::new(QualityStatus::UncertainEuExceeded)
                .with_limit(LimitStatus::High)
                .to_string(),
            "uncertainEUExceeded/High"
        );
        assert_eq!(Quality::BAD.with_vendor(0xAB).to_string(), "bad#AB");
    }
}

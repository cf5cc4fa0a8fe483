//! Case-insensitive typed key/value storage behind every state and instruction.

use crate::core::errors::{LockstepError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::{self, SerializeMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// The closed set of value kinds a property can hold
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

impl PropertyValue {
    pub fn kind(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "string",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Integer(_) => "integer",
            PropertyValue::Float(_) => "float",
            PropertyValue::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// JSON form used on the wire and for canonical comparison
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PropertyValue::String(s) => serde_json::Value::String(s.clone()),
            PropertyValue::Bool(b) => serde_json::Value::Bool(*b),
            PropertyValue::Integer(i) => serde_json::Value::from(*i),
            PropertyValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            PropertyValue::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }

    /// Decode a JSON scalar. Strings stay strings; timestamps are only
    /// recovered through typed reads.
    pub fn from_json(value: &serde_json::Value) -> Option<PropertyValue> {
        match value {
            serde_json::Value::String(s) => Some(PropertyValue::String(s.clone())),
            serde_json::Value::Bool(b) => Some(PropertyValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(PropertyValue::Integer(i))
                } else {
                    n.as_f64().map(PropertyValue::Float)
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "{}", s),
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Timestamp(ts) => {
                write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Integer(value as i64)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Integer(value as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        PropertyValue::Timestamp(value)
    }
}

/// Stored as timespan text, rounded to the nearest millisecond
impl From<Duration> for PropertyValue {
    fn from(value: Duration) -> Self {
        PropertyValue::String(format_timespan(value))
    }
}

/// Conversion out of a stored property value
pub trait FromProperty: Sized {
    /// Name used in conversion errors
    const EXPECTED: &'static str;

    fn from_property(value: &PropertyValue) -> Option<Self>;
}

impl FromProperty for PropertyValue {
    const EXPECTED: &'static str = "property value";

    fn from_property(value: &PropertyValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromProperty for String {
    const EXPECTED: &'static str = "string";

    fn from_property(value: &PropertyValue) -> Option<Self> {
        Some(value.to_string())
    }
}

impl FromProperty for bool {
    const EXPECTED: &'static str = "bool";

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Bool(b) => Some(*b),
            PropertyValue::String(s) => {
                let trimmed = s.trim();
                if names_match(trimmed, "true") {
                    Some(true)
                } else if names_match(trimmed, "false") {
                    Some(false)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

fn integer_of(value: &PropertyValue) -> Option<i64> {
    match value {
        PropertyValue::Integer(i) => Some(*i),
        PropertyValue::Float(f) if f.fract() == 0.0 && f.is_finite() => {
            if *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                Some(*f as i64)
            } else {
                None
            }
        }
        PropertyValue::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

macro_rules! integer_from_property {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl FromProperty for $ty {
                const EXPECTED: &'static str = $name;

                fn from_property(value: &PropertyValue) -> Option<Self> {
                    integer_of(value).and_then(|i| <$ty>::try_from(i).ok())
                }
            }
        )*
    };
}

integer_from_property!(
    i64 => "i64",
    i32 => "i32",
    u32 => "u32",
    u64 => "u64",
    usize => "usize",
);

impl FromProperty for f64 {
    const EXPECTED: &'static str = "f64";

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Integer(i) => Some(*i as f64),
            PropertyValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

impl FromProperty for DateTime<Utc> {
    const EXPECTED: &'static str = "timestamp";

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Timestamp(ts) => Some(*ts),
            PropertyValue::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            _ => None,
        }
    }
}

impl FromProperty for Duration {
    const EXPECTED: &'static str = "duration";

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Integer(secs) if *secs >= 0 => Some(Duration::from_secs(*secs as u64)),
            PropertyValue::String(s) => parse_timespan(s),
            _ => None,
        }
    }
}

/// Resolve an enumeration from its name (any casing) or its ordinal, where
/// `variants` lists every member in ordinal order.
pub(crate) fn match_variant<T: Copy>(value: &PropertyValue, variants: &[(T, &str)]) -> Option<T> {
    let ordinal = match value {
        PropertyValue::Integer(i) => Some(*i),
        PropertyValue::String(s) => {
            let text = s.trim();
            if let Some((variant, _)) = variants
                .iter()
                .find(|(_, name)| names_match(name, text))
            {
                return Some(*variant);
            }
            text.parse::<i64>().ok()
        }
        _ => None,
    }?;
    usize::try_from(ordinal)
        .ok()
        .and_then(|index| variants.get(index))
        .map(|(variant, _)| *variant)
}

/// Parse "[d.]hh:mm:ss[.fraction]" or a plain number of seconds.
pub fn parse_timespan(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('-') {
        return None;
    }
    if let Ok(secs) = text.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let (days, hours) = match parts[0].split_once('.') {
        Some((days, hours)) => (days.parse::<u64>().ok()?, hours.parse::<u64>().ok()?),
        None => (0, parts[0].parse::<u64>().ok()?),
    };
    let minutes = parts[1].parse::<u64>().ok()?;
    let seconds = parts[2].parse::<f64>().ok()?;
    if hours > 23 || minutes > 59 || !(0.0..60.0).contains(&seconds) {
        return None;
    }

    let whole = days
        .checked_mul(86_400)?
        .checked_add(hours * 3_600 + minutes * 60)?;
    Duration::from_secs(whole).checked_add(Duration::from_secs_f64(seconds))
}

/// Inverse of [`parse_timespan`]. Sub-millisecond parts are rounded to the
/// nearest millisecond.
pub fn format_timespan(duration: Duration) -> String {
    let mut total_millis = duration.as_millis();
    if duration.subsec_nanos() % 1_000_000 >= 500_000 {
        total_millis += 1;
    }
    let total = total_millis / 1_000;
    let millis = total_millis % 1_000;
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut out = if days > 0 {
        format!("{}.{:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    };
    if millis > 0 {
        out.push_str(&format!(".{:03}", millis));
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    key: String,
    value: PropertyValue,
}

fn fold_key(key: &str) -> String {
    key.to_lowercase()
}

/// Name equality under the same folding property keys use
pub(crate) fn names_match(left: &str, right: &str) -> bool {
    left == right || fold_key(left) == fold_key(right)
}

/// Case-insensitive property store. Keys keep the casing of their last write
/// for display and serialization; lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    entries: BTreeMap<String, Entry>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed read; fails when the key is absent or the value does not convert.
    pub fn get<T: FromProperty>(&self, key: &str) -> Result<T> {
        let value = self
            .try_get(key)
            .ok_or_else(|| LockstepError::missing_property(key))?;
        convert(key, value)
    }

    /// Typed read with a fallback for absent keys. A present value that does
    /// not convert is still an error.
    pub fn get_or<T: FromProperty>(&self, key: &str, default: T) -> Result<T> {
        match self.try_get(key) {
            Some(value) => convert(key, value),
            None => Ok(default),
        }
    }

    pub fn try_get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(&fold_key(key)).map(|entry| &entry.value)
    }

    pub fn set<K: Into<String>, V: Into<PropertyValue>>(&mut self, key: K, value: V) {
        let key = key.into();
        self.entries.insert(
            fold_key(&key),
            Entry {
                key,
                value: value.into(),
            },
        );
    }

    /// Builder form of [`PropertyBag::set`]
    pub fn with<K: Into<String>, V: Into<PropertyValue>>(mut self, key: K, value: V) -> Self {
        self.set(key, value);
        self
    }

    /// Merge `other` in; its values win on key collisions.
    pub fn add_range(&mut self, other: &PropertyBag) {
        for (folded, entry) in &other.entries {
            self.entries.insert(folded.clone(), entry.clone());
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.remove(&fold_key(key)).map(|entry| entry.value)
    }

    /// The casing `key` is stored under, if present
    pub fn stored_key(&self, key: &str) -> Option<&str> {
        self.entries.get(&fold_key(key)).map(|entry| entry.key.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&fold_key(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by case-folded key
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries
            .values()
            .map(|entry| (entry.key.as_str(), &entry.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|entry| entry.key.as_str())
    }

    /// Same key set, every value replaced through `f`
    pub fn map_values<F>(&self, mut f: F) -> Result<PropertyBag>
    where
        F: FnMut(&str, &PropertyValue) -> Result<PropertyValue>,
    {
        let mut entries = BTreeMap::new();
        for (folded, entry) in &self.entries {
            let value = f(&entry.key, &entry.value)?;
            entries.insert(
                folded.clone(),
                Entry {
                    key: entry.key.clone(),
                    value,
                },
            );
        }
        Ok(PropertyBag { entries })
    }

    /// JSON object keyed by the stored key casing
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

fn convert<T: FromProperty>(key: &str, value: &PropertyValue) -> Result<T> {
    T::from_property(value).ok_or_else(|| {
        LockstepError::type_conversion(key, T::EXPECTED, format!("{} {}", value.kind(), value))
    })
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for PropertyBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bag = PropertyBag::new();
        bag.extend(iter);
        bag
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> Extend<(K, V)> for PropertyBag {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}

impl Serialize for PropertyBag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in self.iter() {
            if let PropertyValue::Float(f) = value {
                if !f.is_finite() {
                    return Err(<S::Error as ser::Error>::custom(format!(
                        "property '{}' holds a non-finite float ({}) which JSON cannot carry",
                        key, f
                    )));
                }
            }
            map.serialize_entry(key, &value.to_json())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PropertyBag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct BagVisitor;

        impl<'de> Visitor<'de> for BagVisitor {
            type Value = PropertyBag;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of property names to scalar values")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<PropertyBag, E> {
                Ok(PropertyBag::new())
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<PropertyBag, A::Error> {
                let mut bag = PropertyBag::new();
                while let Some((key, raw)) = access.next_entry::<String, serde_json::Value>()? {
                    if raw.is_null() {
                        continue;
                    }
                    let value = PropertyValue::from_json(&raw).ok_or_else(|| {
                        de::Error::custom(format!("property '{}' is not a scalar value", key))
                    })?;
                    bag.set(key, value);
                }
                Ok(bag)
            }
        }

        deserializer.deserialize_any(BagVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_case_insensitive_last_write_wins() {
        let mut bag = PropertyBag::new();
        bag.set("Duration", "60");
        bag.set("DURATION", "90");

        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get::<String>("duration").unwrap(), "90");
        assert_eq!(bag.keys().collect::<Vec<_>>(), vec!["DURATION"]);
    }

    #[test]
    fn test_missing_and_default() {
        let bag = PropertyBag::new().with("Port", 5001);

        assert!(matches!(
            bag.get::<i32>("Threads"),
            Err(LockstepError::MissingProperty { ref key }) if key == "Threads"
        ));
        assert_eq!(bag.get_or("Threads", 4).unwrap(), 4);
        assert_eq!(bag.get_or("port", 0).unwrap(), 5001);
    }

    #[test]
    fn test_conversion_failure_is_reported() {
        let bag = PropertyBag::new().with("Enabled", "maybe");
        let err = bag.get::<bool>("enabled").unwrap_err();
        match err {
            LockstepError::TypeConversion { key, expected, actual } => {
                assert_eq!(key, "enabled");
                assert_eq!(expected, "bool");
                assert!(actual.contains("maybe"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Present-but-unconvertible is an error even with a default.
        assert!(bag.get_or("Enabled", true).is_err());
    }

    #[test]
    fn test_numeric_conversions() {
        let bag = PropertyBag::new()
            .with("int", 42)
            .with("float", 2.0)
            .with("fraction", 2.5)
            .with("text", " 17 ")
            .with("negative", -1);

        assert_eq!(bag.get::<i64>("int").unwrap(), 42);
        assert_eq!(bag.get::<f64>("int").unwrap(), 42.0);
        assert_eq!(bag.get::<i32>("float").unwrap(), 2);
        assert!(bag.get::<i32>("fraction").is_err());
        assert_eq!(bag.get::<u32>("text").unwrap(), 17);
        assert!(bag.get::<u32>("negative").is_err());
        assert_eq!(bag.get::<String>("int").unwrap(), "42");
    }

    #[test]
    fn test_timestamp_and_duration() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 21, 5, 40, 12).unwrap();
        let bag = PropertyBag::new()
            .with("Started", ts)
            .with("StartedText", "2024-03-21T05:40:12Z")
            .with("Period", Duration::from_secs(90))
            .with("Warmup", "1.02:03:04.5")
            .with("Seconds", 30);

        assert_eq!(bag.get::<DateTime<Utc>>("started").unwrap(), ts);
        assert_eq!(bag.get::<DateTime<Utc>>("startedtext").unwrap(), ts);
        assert_eq!(bag.get::<String>("Period").unwrap(), "00:01:30");
        assert_eq!(bag.get::<Duration>("period").unwrap(), Duration::from_secs(90));
        assert_eq!(
            bag.get::<Duration>("warmup").unwrap(),
            Duration::from_millis(((86_400 + 7_384) * 1000) + 500)
        );
        assert_eq!(bag.get::<Duration>("seconds").unwrap(), Duration::from_secs(30));
        assert!(parse_timespan("25:00:00").is_none());
        assert!(parse_timespan("-00:00:01").is_none());
    }

    #[test]
    fn test_add_range_overwrites() {
        let mut left = PropertyBag::new().with("a", 1).with("b", 2);
        let right = PropertyBag::new().with("B", 20).with("c", 30);
        left.add_range(&right);

        assert_eq!(left.len(), 3);
        assert_eq!(left.get::<i64>("b").unwrap(), 20);
        assert_eq!(left.get::<i64>("a").unwrap(), 1);
    }

    #[test]
    fn test_json_drops_nulls_and_rejects_nested() {
        let bag: PropertyBag =
            serde_json::from_str(r#"{"Protocol": null, "Port": 80, "Ratio": 1.5, "On": true}"#)
                .unwrap();
        assert_eq!(bag.len(), 3);
        assert!(!bag.contains_key("protocol"));
        assert_eq!(bag.try_get("ratio"), Some(&PropertyValue::Float(1.5)));

        let nested = serde_json::from_str::<PropertyBag>(r#"{"Disks": [1, 2]}"#);
        assert!(nested.is_err());

        let empty: PropertyBag = serde_json::from_str("null").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_oversized_timespan_is_a_conversion_error() {
        let bag = PropertyBag::new().with("Period", "300000000000000.00:00:00");
        let err = bag.get::<Duration>("period").unwrap_err();
        assert!(matches!(err, LockstepError::TypeConversion { expected: "duration", .. }));
        assert!(parse_timespan(&format!("{}.23:59:59.9", u64::MAX / 86_400)).is_none());
    }

    #[test]
    fn test_sub_millisecond_durations_round() {
        assert_eq!(format_timespan(Duration::from_micros(1_499)), "00:00:00.001");
        assert_eq!(format_timespan(Duration::from_micros(1_500)), "00:00:00.002");
        assert_eq!(format_timespan(Duration::from_micros(999_600)), "00:00:01");
        assert_eq!(format_timespan(Duration::from_nanos(400_000)), "00:00:00");
    }

    #[test]
    fn test_non_finite_float_fails_serialization() {
        let bag = PropertyBag::new().with("Ratio", f64::NAN).with("Port", 80);
        assert!(serde_json::to_string(&bag).is_err());

        let err: LockstepError = serde_json::to_string(&PropertyBag::new().with("x", f64::INFINITY))
            .unwrap_err()
            .into();
        assert_eq!(err.category(), "serialization");

        assert!(serde_json::to_string(&PropertyBag::new().with("Ratio", 0.5)).is_ok());
    }
}

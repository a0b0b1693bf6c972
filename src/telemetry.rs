//! Telemetry data model: tagged points, per-component channels, and the
//! recursive keeper that aggregates a subtree's channels into the grouped
//! `time -> [point]` structure the cycle publishes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single timestamped telemetry value. Serializes to the spec's flat
/// `{value, type, [unit]}` shape (SPEC_FULL.md §6, persisted log shape).
///
/// This can't be a plain `#[derive(Serialize, Deserialize)]` internally
/// tagged enum: serde's internal tagging merges the `type` tag into a map,
/// which only the `Unit { .. }` struct variant produces -- `String`,
/// `Boolean`, `Float`, and `Default` wrap bare primitives serde has nowhere
/// to merge the tag into, so serde_json errors on every one of them. Hand
/// the representation instead.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryValue {
    Default(serde_json::Value),
    String(String),
    Boolean(bool),
    Float(f64),
    Unit { value: f64, unit: String },
}

impl Serialize for TelemetryValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("TelemetryValue", 3)?;
        match self {
            TelemetryValue::Default(v) => {
                state.serialize_field("value", v)?;
                state.serialize_field("type", "default")?;
            }
            TelemetryValue::String(v) => {
                state.serialize_field("value", v)?;
                state.serialize_field("type", "string")?;
            }
            TelemetryValue::Boolean(v) => {
                state.serialize_field("value", v)?;
                state.serialize_field("type", "boolean")?;
            }
            TelemetryValue::Float(v) => {
                state.serialize_field("value", v)?;
                state.serialize_field("type", "float")?;
            }
            TelemetryValue::Unit { value, unit } => {
                state.serialize_field("value", value)?;
                state.serialize_field("type", "unit")?;
                state.serialize_field("unit", unit)?;
            }
        }
        state.end()
    }
}

#[derive(Deserialize)]
struct RawTelemetryValue {
    value: serde_json::Value,
    #[serde(rename = "type")]
    kind: String,
    unit: Option<String>,
}

impl<'de> Deserialize<'de> for TelemetryValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawTelemetryValue::deserialize(deserializer)?;
        match raw.kind.as_str() {
            "default" => Ok(TelemetryValue::Default(raw.value)),
            "string" => raw
                .value
                .as_str()
                .map(|s| TelemetryValue::String(s.to_string()))
                .ok_or_else(|| serde::de::Error::custom("telemetry value tagged 'string' was not a string")),
            "boolean" => raw
                .value
                .as_bool()
                .map(TelemetryValue::Boolean)
                .ok_or_else(|| serde::de::Error::custom("telemetry value tagged 'boolean' was not a bool")),
            "float" => raw
                .value
                .as_f64()
                .map(TelemetryValue::Float)
                .ok_or_else(|| serde::de::Error::custom("telemetry value tagged 'float' was not a number")),
            "unit" => {
                let value = raw
                    .value
                    .as_f64()
                    .ok_or_else(|| serde::de::Error::custom("telemetry value tagged 'unit' was not a number"))?;
                let unit = raw
                    .unit
                    .ok_or_else(|| serde::de::Error::custom("telemetry value tagged 'unit' is missing its 'unit' field"))?;
                Ok(TelemetryValue::Unit { value, unit })
            }
            other => Err(serde::de::Error::custom(format!("unrecognized telemetry value type '{other}'"))),
        }
    }
}

/// One fully-qualified, timestamped telemetry observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub name: String,
    pub timestamp: f64,
    #[serde(flatten)]
    pub value: TelemetryValue,
}

/// An append-only, per-component named channel. Cleared by [`TelemetryChannel::drain`].
#[derive(Debug, Default)]
pub struct TelemetryChannel {
    name: String,
    points: Vec<(f64, TelemetryValue)>,
}

impl TelemetryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            points: Vec::new(),
        }
    }

    pub fn push(&mut self, timestamp: f64, value: TelemetryValue) {
        self.points.push((timestamp, value));
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Empty the channel, returning points with `name` patched to the given
    /// fully-qualified dotted path.
    pub fn drain(&mut self, qualified_name: &str) -> Vec<TelemetryPoint> {
        self.points
            .drain(..)
            .map(|(timestamp, value)| TelemetryPoint {
                name: qualified_name.to_string(),
                timestamp,
                value,
            })
            .collect()
    }
}

/// Per-Component collection of named channels plus references to child
/// keepers, mirroring the component tree's own shape one level at a time.
#[derive(Debug, Default)]
pub struct TelemetryKeeper {
    name: String,
    channels: BTreeMap<String, TelemetryChannel>,
}

impl TelemetryKeeper {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: BTreeMap::new(),
        }
    }

    /// Fetch (creating on first use) the channel with the given local name.
    pub fn channel(&mut self, name: &str) -> &mut TelemetryChannel {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| TelemetryChannel::new(name))
    }

    pub fn record(&mut self, channel: &str, timestamp: f64, value: TelemetryValue) {
        self.channel(channel).push(timestamp, value);
    }

    /// Drain every channel owned directly by this keeper (not children),
    /// prefixing each point's name with `prefix + self.name + "."`.
    pub fn drain_own(&mut self, prefix: &str) -> Vec<TelemetryPoint> {
        let mut out = Vec::new();
        for channel in self.channels.values_mut() {
            if channel.is_empty() {
                continue;
            }
            let qualified = format!("{prefix}{}.{}", self.name, channel.name);
            out.extend(channel.drain(&qualified));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.channels.values().all(TelemetryChannel::is_empty)
    }
}

/// Group a flat list of points by timestamp, as the cycle publishes them.
/// Timestamps come out in ascending order; point order within a bucket is
/// unspecified (insertion order here).
pub fn group_by_timestamp(points: Vec<TelemetryPoint>) -> BTreeMap<ordered_float::OrderedF64, Vec<TelemetryPoint>> {
    let mut grouped: BTreeMap<ordered_float::OrderedF64, Vec<TelemetryPoint>> = BTreeMap::new();
    for point in points {
        grouped
            .entry(ordered_float::OrderedF64(point.timestamp))
            .or_default()
            .push(point);
    }
    grouped
}

/// One timestamp bucket, as published on the wire: the persisted log line
/// and the HTTP telemetry snapshot both serialize a list of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampBucket {
    pub timestamp: f64,
    pub points: Vec<TelemetryPoint>,
}

/// Group a flat list of points into ascending-timestamp-ordered buckets,
/// ready to publish.
pub fn bucket_by_timestamp(points: Vec<TelemetryPoint>) -> Vec<TimestampBucket> {
    group_by_timestamp(points)
        .into_iter()
        .map(|(ts, points)| TimestampBucket { timestamp: ts.0, points })
        .collect()
}

/// Minimal total-ordering wrapper for `f64` timestamps, since telemetry
/// timestamps are never NaN and we need them as `BTreeMap` keys without
/// pulling in a crate the rest of the codebase doesn't already use.
pub mod ordered_float {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct OrderedF64(pub f64);

    impl Eq for OrderedF64 {}

    impl PartialOrd for OrderedF64 {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }

    impl Ord for OrderedF64 {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_channel_and_patches_name() {
        let mut channel = TelemetryChannel::new("vcu_state");
        channel.push(1.0, TelemetryValue::String("idle".into()));
        assert!(!channel.is_empty());
        let drained = channel.drain("donatello.vcu_state");
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].name, "donatello.vcu_state");
        assert!(channel.is_empty());
    }

    #[test]
    fn keeper_prefixes_with_own_name() {
        let mut keeper = TelemetryKeeper::new("psu");
        keeper.record("pri_set_volt", 2.0, TelemetryValue::Unit { value: 16.0, unit: "volts".into() });
        let points = keeper.drain_own("donatello.");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "donatello.psu.pri_set_volt");
        assert!(keeper.is_empty());
    }

    #[test]
    fn grouping_is_ascending_by_timestamp() {
        let points = vec![
            TelemetryPoint { name: "a".into(), timestamp: 3.0, value: TelemetryValue::Boolean(true) },
            TelemetryPoint { name: "b".into(), timestamp: 1.0, value: TelemetryValue::Boolean(false) },
            TelemetryPoint { name: "c".into(), timestamp: 1.0, value: TelemetryValue::Boolean(true) },
        ];
        let grouped = group_by_timestamp(points);
        let timestamps: Vec<f64> = grouped.keys().map(|k| k.0).collect();
        assert_eq!(timestamps, vec![1.0, 3.0]);
        assert_eq!(grouped[&ordered_float::OrderedF64(1.0)].len(), 2);
    }

    #[test]
    fn bucket_by_timestamp_orders_ascending() {
        let points = vec![
            TelemetryPoint { name: "a".into(), timestamp: 3.0, value: TelemetryValue::Boolean(true) },
            TelemetryPoint { name: "b".into(), timestamp: 1.0, value: TelemetryValue::Boolean(false) },
        ];
        let buckets = bucket_by_timestamp(points);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].timestamp, 1.0);
        assert_eq!(buckets[1].timestamp, 3.0);
    }

    #[test]
    fn telemetry_point_round_trips_through_json() {
        let point = TelemetryPoint {
            name: "donatello.psu.pri_meas_volt".into(),
            timestamp: 12345.678,
            value: TelemetryValue::Unit { value: 15.98, unit: "volts".into() },
        };
        let json = serde_json::to_string(&point).unwrap();
        let parsed: TelemetryPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, point);
    }

    #[test]
    fn vcu_state_string_point_round_trips_through_json() {
        let point = TelemetryPoint {
            name: "donatello.vcu_state".into(),
            timestamp: 1.0,
            value: TelemetryValue::String("idle".into()),
        };
        let json = serde_json::to_string(&point).unwrap();
        assert_eq!(json, r#"{"name":"donatello.vcu_state","timestamp":1.0,"value":"idle","type":"string"}"#);
        let parsed: TelemetryPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, point);
    }

    #[test]
    fn output_enable_boolean_point_round_trips_through_json() {
        let point = TelemetryPoint {
            name: "donatello.psu.pri_output_enable".into(),
            timestamp: 1.0,
            value: TelemetryValue::Boolean(true),
        };
        let json = serde_json::to_string(&point).unwrap();
        let parsed: TelemetryPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, point);
    }

    #[test]
    fn float_and_default_points_round_trip_through_json() {
        let float_point = TelemetryPoint { name: "a".into(), timestamp: 1.0, value: TelemetryValue::Float(3.5) };
        let json = serde_json::to_string(&float_point).unwrap();
        assert_eq!(serde_json::from_str::<TelemetryPoint>(&json).unwrap(), float_point);

        let default_point =
            TelemetryPoint { name: "b".into(), timestamp: 1.0, value: TelemetryValue::Default(serde_json::json!([1, 2])) };
        let json = serde_json::to_string(&default_point).unwrap();
        assert_eq!(serde_json::from_str::<TelemetryPoint>(&json).unwrap(), default_point);
    }

    #[test]
    fn unrecognized_type_tag_is_rejected() {
        let json = r#"{"name":"a","timestamp":1.0,"value":1,"type":"nonsense"}"#;
        assert!(serde_json::from_str::<TelemetryPoint>(json).is_err());
    }
}

//! Typed views over provider payloads.
//!
//! Field names vary between device firmwares, so each typed field accepts a short list
//! of aliases. Electrical and odometer readings are kept as canonical decimal strings to
//! avoid float drift in storage; coordinates and speeds are `f64`. Every reading keeps
//! the record exactly as received in `raw`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use super::ProviderError;

const TIMESTAMP_KEYS: &[&str] = &["timestamp", "gpstime", "datetime"];
const ODOMETER_KEYS: &[&str] = &["odometer", "odometer_km"];

/// Epoch values at or above this are treated as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// One roster entry from `vehicle-device-mapping`.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub vehicle_no: String,
    pub device_no: String,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GpsReading {
    pub recorded_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: Option<f64>,
    pub heading: Option<f64>,
    pub ignition: Option<bool>,
    pub odometer_km: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanReading {
    pub recorded_at: DateTime<Utc>,
    pub soc_pct: Option<String>,
    pub battery_voltage: Option<String>,
    pub battery_current: Option<String>,
    pub battery_temp_c: Option<String>,
    pub odometer_km: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuelReading {
    pub recorded_at: DateTime<Utc>,
    pub fuel_level: String,
    pub unit: String,
    pub raw: Value,
}

/// Distance travelled over one requested window.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceReading {
    pub distance_km: String,
    pub raw: Value,
}

/// A timestamped record that can be built from one provider JSON object.
pub trait Reading: Sized {
    fn from_record(endpoint: &str, record: &Value) -> Result<Self, ProviderError>;
    fn recorded_at(&self) -> DateTime<Utc>;
}

impl Reading for GpsReading {
    fn from_record(endpoint: &str, record: &Value) -> Result<Self, ProviderError> {
        let obj = as_object(endpoint, record)?;
        let recorded_at = required_timestamp(endpoint, obj)?;

        let latitude = field(obj, &["latitude", "lat"])
            .and_then(to_f64)
            .filter(|v| (-90.0..=90.0).contains(v))
            .ok_or_else(|| ProviderError::malformed(endpoint, "missing or invalid latitude"))?;
        let longitude = field(obj, &["longitude", "lng", "lon"])
            .and_then(to_f64)
            .filter(|v| (-180.0..=180.0).contains(v))
            .ok_or_else(|| ProviderError::malformed(endpoint, "missing or invalid longitude"))?;

        Ok(Self {
            recorded_at,
            latitude,
            longitude,
            speed_kmh: field(obj, &["speed", "speed_kmh"]).and_then(to_f64),
            heading: field(obj, &["heading", "direction"]).and_then(to_f64),
            ignition: field(obj, &["ignition", "acc"]).and_then(to_bool),
            odometer_km: field(obj, ODOMETER_KEYS).and_then(to_decimal_string),
            raw: record.clone(),
        })
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}

impl Reading for CanReading {
    fn from_record(endpoint: &str, record: &Value) -> Result<Self, ProviderError> {
        let obj = as_object(endpoint, record)?;

        Ok(Self {
            recorded_at: required_timestamp(endpoint, obj)?,
            soc_pct: field(obj, &["soc", "soc_pct"]).and_then(to_decimal_string),
            battery_voltage: field(obj, &["battery_voltage", "voltage"])
                .and_then(to_decimal_string),
            battery_current: field(obj, &["battery_current", "current"])
                .and_then(to_decimal_string),
            battery_temp_c: field(obj, &["battery_temperature", "temperature"])
                .and_then(to_decimal_string),
            odometer_km: field(obj, ODOMETER_KEYS).and_then(to_decimal_string),
            raw: record.clone(),
        })
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}

impl Reading for FuelReading {
    fn from_record(endpoint: &str, record: &Value) -> Result<Self, ProviderError> {
        let obj = as_object(endpoint, record)?;
        let recorded_at = required_timestamp(endpoint, obj)?;
        let fuel_level = field(obj, &["fuel_level", "fuel"])
            .and_then(to_decimal_string)
            .ok_or_else(|| ProviderError::malformed(endpoint, "missing or invalid fuel level"))?;
        let unit = field(obj, &["unit"])
            .and_then(Value::as_str)
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "L".to_string());

        Ok(Self {
            recorded_at,
            fuel_level,
            unit,
            raw: record.clone(),
        })
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}

/// Parses the roster. Duplicate vehicle numbers collapse to the last entry.
pub fn parse_roster(endpoint: &str, data: &Value) -> Result<Vec<RosterEntry>, ProviderError> {
    let records = record_list(endpoint, data, &["list", "records", "vehicles"])?;
    let mut entries: Vec<RosterEntry> = Vec::with_capacity(records.len());

    for record in records {
        let obj = as_object(endpoint, record)?;
        let vehicle_no = field(obj, &["vehicleno", "vehicle_no", "vehicleNo"])
            .and_then(to_identifier)
            .ok_or_else(|| ProviderError::malformed(endpoint, "roster entry without vehicleno"))?;
        let device_no = field(obj, &["deviceno", "device_no", "deviceNo", "imei"])
            .and_then(to_identifier)
            .ok_or_else(|| {
                ProviderError::malformed(endpoint, format!("vehicle {vehicle_no} has no deviceno"))
            })?;

        let entry = RosterEntry {
            vehicle_no,
            device_no,
            raw: record.clone(),
        };
        match entries.iter_mut().find(|e| e.vehicle_no == entry.vehicle_no) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    Ok(entries)
}

/// Parses a latest-snapshot payload. A list is accepted and its newest record wins.
pub fn parse_latest<R: Reading>(endpoint: &str, data: &Value) -> Result<R, ProviderError> {
    match data {
        Value::Array(items) => {
            let mut newest: Option<R> = None;
            for item in items {
                let reading = R::from_record(endpoint, item)?;
                if newest
                    .as_ref()
                    .is_none_or(|current| reading.recorded_at() > current.recorded_at())
                {
                    newest = Some(reading);
                }
            }
            newest.ok_or_else(|| ProviderError::MissingData {
                endpoint: endpoint.to_string(),
            })
        }
        other => R::from_record(endpoint, other),
    }
}

/// Parses a history payload. One malformed record fails the whole payload.
pub fn parse_history<R: Reading>(endpoint: &str, data: &Value) -> Result<Vec<R>, ProviderError> {
    record_list(endpoint, data, &["list", "records"])?
        .into_iter()
        .map(|record| R::from_record(endpoint, record))
        .collect()
}

/// Parses `distance-history`: either one object or a list whose distances are summed.
pub fn parse_distance(endpoint: &str, data: &Value) -> Result<DistanceReading, ProviderError> {
    let distance_of = |record: &Value| -> Result<f64, ProviderError> {
        let obj = as_object(endpoint, record)?;
        field(obj, &["distance_km", "distance"])
            .and_then(to_f64)
            .filter(|d| d.is_finite() && *d >= 0.0)
            .ok_or_else(|| ProviderError::malformed(endpoint, "missing or invalid distance"))
    };

    let total = match data {
        Value::Object(obj) if !obj.contains_key("list") && !obj.contains_key("records") => {
            distance_of(data)?
        }
        _ => {
            let mut sum = 0.0;
            for record in record_list(endpoint, data, &["list", "records"])? {
                sum += distance_of(record)?;
            }
            sum
        }
    };

    Ok(DistanceReading {
        distance_km: format_decimal(total),
        raw: data.clone(),
    })
}

fn record_list<'a>(
    endpoint: &str,
    data: &'a Value,
    wrapper_keys: &[&str],
) -> Result<Vec<&'a Value>, ProviderError> {
    match data {
        Value::Array(items) => Ok(items.iter().collect()),
        Value::Object(obj) => wrapper_keys
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_array))
            .map(|items| items.iter().collect())
            .ok_or_else(|| ProviderError::malformed(endpoint, "expected a list of records")),
        _ => Err(ProviderError::malformed(
            endpoint,
            "expected a list of records",
        )),
    }
}

fn as_object<'a>(endpoint: &str, value: &'a Value) -> Result<&'a Map<String, Value>, ProviderError> {
    value
        .as_object()
        .ok_or_else(|| ProviderError::malformed(endpoint, "record is not a JSON object"))
}

fn required_timestamp(
    endpoint: &str,
    obj: &Map<String, Value>,
) -> Result<DateTime<Utc>, ProviderError> {
    field(obj, TIMESTAMP_KEYS)
        .and_then(parse_timestamp)
        .ok_or_else(|| ProviderError::malformed(endpoint, "missing or unparseable timestamp"))
}

/// First alias present with a non-null, non-blank value.
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
}

fn to_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn to_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

pub fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().and_then(|v| match v {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "on" | "true" | "yes" => Some(true),
            "0" | "off" | "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Canonical decimal text for a numeric JSON value or numeric string.
pub fn to_decimal_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().filter(|v| v.is_finite()).map(format_decimal)
            }
        }
        Value::String(s) => canonical_decimal(s.trim()),
        _ => None,
    }
}

fn format_decimal(value: f64) -> String {
    // f64 Display never uses exponent notation
    canonical_decimal(&value.to_string()).unwrap_or_else(|| "0".to_string())
}

/// Normalises `[+-]digits[.digits]` by trimming redundant zeros; rejects anything else.
pub fn canonical_decimal(text: &str) -> Option<String> {
    let (negative, unsigned) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let int_trimmed = int_part.trim_start_matches('0');
    let frac_trimmed = frac_part.trim_end_matches('0');
    let int_digits = if int_trimmed.is_empty() { "0" } else { int_trimmed };

    let mut out = String::with_capacity(text.len());
    if negative && (int_digits != "0" || !frac_trimmed.is_empty()) {
        out.push('-');
    }
    out.push_str(int_digits);
    if !frac_trimmed.is_empty() {
        out.push('.');
        out.push_str(frac_trimmed);
    }
    Some(out)
}

/// Accepts epoch seconds or milliseconds (number or digit string), RFC3339, or
/// `YYYY-MM-DD HH:MM:SS` interpreted as UTC.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .and_then(from_epoch),
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                return s.parse::<i64>().ok().and_then(from_epoch);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_in_all_supported_shapes() {
        let expected = DateTime::parse_from_rfc3339("2024-03-01T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        for value in [
            json!(1_709_281_800),
            json!(1_709_281_800_000i64),
            json!("1709281800000"),
            json!("2024-03-01T08:30:00Z"),
            json!("2024-03-01T16:30:00+08:00"),
            json!("2024-03-01 08:30:00"),
        ] {
            assert_eq!(parse_timestamp(&value), Some(expected), "value {value}");
        }
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
    }

    #[test]
    fn decimals_are_canonicalised() {
        assert_eq!(canonical_decimal("012.340").as_deref(), Some("12.34"));
        assert_eq!(canonical_decimal("-0.0").as_deref(), Some("0"));
        assert_eq!(canonical_decimal(".5").as_deref(), Some("0.5"));
        assert_eq!(canonical_decimal("1e3"), None);
        assert_eq!(to_decimal_string(&json!(52.10)).as_deref(), Some("52.1"));
        assert_eq!(to_decimal_string(&json!(400)).as_deref(), Some("400"));
    }

    #[test]
    fn gps_aliases_and_ignition_spellings() {
        let record = json!({
            "gpstime": "2024-03-01 08:30:00",
            "lat": "-6.2001",
            "lon": 106.8166,
            "speed": "42.5",
            "direction": 270,
            "ignition": "ON",
            "odometer": "12034.50"
        });
        let reading = GpsReading::from_record("gps-latest", &record).unwrap();
        assert_eq!(reading.latitude, -6.2001);
        assert_eq!(reading.longitude, 106.8166);
        assert_eq!(reading.speed_kmh, Some(42.5));
        assert_eq!(reading.heading, Some(270.0));
        assert_eq!(reading.ignition, Some(true));
        assert_eq!(reading.odometer_km.as_deref(), Some("12034.5"));
        assert_eq!(reading.raw, record);
    }

    #[test]
    fn gps_without_coordinates_is_malformed() {
        let record = json!({"timestamp": 1_709_281_800, "speed": 10});
        let err = GpsReading::from_record("gps-latest", &record).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed { .. }));
    }

    #[test]
    fn latest_list_picks_newest_record() {
        let data = json!([
            {"timestamp": 1_000_000_200, "soc": 80},
            {"timestamp": 1_000_000_500, "soc": "78.5", "voltage": "398.20"},
            {"timestamp": 1_000_000_100, "soc": 81}
        ]);
        let reading: CanReading = parse_latest("can-latest", &data).unwrap();
        assert_eq!(reading.soc_pct.as_deref(), Some("78.5"));
        assert_eq!(reading.battery_voltage.as_deref(), Some("398.2"));
    }

    #[test]
    fn fuel_unit_defaults_to_litres() {
        let reading: FuelReading =
            parse_latest("fuel-latest", &json!({"timestamp": 1_000_000_000, "fuel": 31.25}))
                .unwrap();
        assert_eq!(reading.fuel_level, "31.25");
        assert_eq!(reading.unit, "L");
    }

    #[test]
    fn history_accepts_wrapped_lists_and_rejects_bad_records() {
        let wrapped = json!({"records": [
            {"timestamp": 1_000_000_000, "fuel_level": 10, "unit": "%"},
            {"timestamp": 1_000_000_060, "fuel_level": 9.5, "unit": "%"}
        ]});
        let rows: Vec<FuelReading> = parse_history("fuel-history", &wrapped).unwrap();
        assert_eq!(rows.len(), 2);

        let broken = json!([{"timestamp": 1_000_000_000}]);
        assert!(parse_history::<FuelReading>("fuel-history", &broken).is_err());

        let empty: Vec<GpsReading> = parse_history("gps-history", &json!([])).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn roster_collapses_duplicates_and_requires_ids() {
        let data = json!([
            {"vehicleno": "B 1234 XY", "deviceno": "D-1"},
            {"vehicleno": "B 5678 XY", "deviceno": 86512},
            {"vehicleno": "B 1234 XY", "deviceno": "D-9"}
        ]);
        let roster = parse_roster("vehicle-device-mapping", &data).unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].device_no, "D-9");
        assert_eq!(roster[1].device_no, "86512");

        let missing = json!([{"deviceno": "D-1"}]);
        assert!(parse_roster("vehicle-device-mapping", &missing).is_err());
    }

    #[test]
    fn distance_sums_list_entries() {
        let data = json!({"list": [{"distance": "1.25"}, {"distance_km": 0.5}]});
        let reading = parse_distance("distance-history", &data).unwrap();
        assert_eq!(reading.distance_km, "1.75");

        let single = parse_distance("distance-history", &json!({"distance_km": 3})).unwrap();
        assert_eq!(single.distance_km, "3");
    }
}

//! One OHLCV bucket as delivered by the provider.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// One candle. End-of-day payloads carry `date`; intraday payloads carry
/// `timestamp`, `gmtoffset` and `datetime`. Every price field is nullable
/// because providers emit `null` for missing buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandleRecord {
    #[serde(default, alias = "Timestamp")]
    pub timestamp: Option<i64>,
    #[serde(default, alias = "Gmtoffset")]
    pub gmtoffset: Option<i64>,
    #[serde(
        default,
        alias = "Datetime",
        deserialize_with = "deserialize_datetime",
        serialize_with = "serialize_datetime"
    )]
    pub datetime: Option<NaiveDateTime>,
    #[serde(default, alias = "Date", deserialize_with = "deserialize_date")]
    pub date: Option<NaiveDate>,
    #[serde(default, alias = "Open")]
    pub open: Option<f64>,
    #[serde(default, alias = "High")]
    pub high: Option<f64>,
    #[serde(default, alias = "Low")]
    pub low: Option<f64>,
    #[serde(default, alias = "Close")]
    pub close: Option<f64>,
    #[serde(default, alias = "Volume")]
    pub volume: Option<f64>,
    #[serde(default, alias = "Adjusted_close", alias = "adj_close")]
    pub adjusted_close: Option<f64>,
}

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

impl CandleRecord {
    /// Fill `datetime` from `date` (midnight) when only the date is known.
    pub fn normalized(mut self) -> Self {
        if self.datetime.is_none() {
            self.datetime = self.date.and_then(|d| d.and_hms_opt(0, 0, 0));
        }
        self
    }
}

fn deserialize_datetime<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized datetime '{s}'"))),
    }
}

fn serialize_datetime<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(dt) => serializer.serialize_str(&dt.format(DATETIME_FORMATS[0]).to_string()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid date '{s}': {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_eod_json_and_derives_datetime() {
        let json = r#"{"date":"2024-01-02","open":141.0,"high":142.2,"low":140.8,
            "close":141.9,"adjusted_close":141.9,"volume":0}"#;
        let rec: CandleRecord = serde_json::from_str(json).unwrap();
        let rec = rec.normalized();

        assert_eq!(rec.date, NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(
            rec.datetime,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(rec.close, Some(141.9));
        assert_eq!(rec.volume, Some(0.0));
        assert_eq!(rec.timestamp, None);
    }

    #[test]
    fn parses_intraday_json() {
        let json = r#"{"timestamp":1704189600,"gmtoffset":0,"datetime":"2024-01-02 10:00:00",
            "open":1.1,"high":1.2,"low":1.0,"close":null,"volume":12}"#;
        let rec: CandleRecord = serde_json::from_str(json).unwrap();

        assert_eq!(rec.timestamp, Some(1_704_189_600));
        assert_eq!(rec.close, None);
        assert_eq!(rec.date, None);
        assert_eq!(
            rec.datetime,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(10, 0, 0)
        );
    }

    #[test]
    fn normalized_keeps_existing_datetime() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(9, 30, 0);
        let rec = CandleRecord {
            datetime: dt,
            date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..Default::default()
        }
        .normalized();
        assert_eq!(rec.datetime, dt);
    }

    #[test]
    fn rejects_garbage_date() {
        let json = r#"{"date":"yesterday","close":1.0}"#;
        assert!(serde_json::from_str::<CandleRecord>(json).is_err());
    }
}

//! Wire format for one temperature reading
//!
//! A record payload is UTF-8 text with fields joined by `;` in fixed
//! order: sequence counter, temperature, sensor id, origin timestamp in
//! epoch milliseconds. Producers right-pad the payload with filler to a
//! configured total length; everything after the fourth field is
//! discarded on decode. The partition key carried alongside the payload
//! is the run's origin timestamp as a decimal string and supplies the
//! reading's run id.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::thermostream::transport::RawRecord;

/// Field separator inside a record payload.
pub const FIELD_DELIMITER: char = ';';

/// Filler character appended after the last field up to the configured
/// record length.
pub const PAD_CHAR: char = 'a';

const REQUIRED_FIELDS: usize = 4;

/// One decoded temperature reading. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Producer-assigned counter, monotonic per sensor.
    pub sequence: u64,
    /// Temperature with one-tenth precision.
    pub temperature: f64,
    pub sensor_id: String,
    /// Instant the reading was captured, in epoch milliseconds.
    pub origin_timestamp_millis: u64,
    /// The producer execution this reading belongs to, taken from the
    /// record's partition key.
    pub run_id: u64,
}

/// Decode failure for a single record.
#[derive(Debug, Error)]
pub enum MalformedRecord {
    #[error("record payload is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("expected at least {expected} fields, found {found}")]
    MissingFields { expected: usize, found: usize },
    #[error("field {field} does not parse as a number: {value:?}")]
    BadNumber { field: &'static str, value: String },
}

/// Decode one raw record into a [`Reading`].
pub fn decode(record: &RawRecord) -> Result<Reading, MalformedRecord> {
    let text = std::str::from_utf8(&record.payload)?;
    let fields: Vec<&str> = text.split(FIELD_DELIMITER).collect();
    if fields.len() < REQUIRED_FIELDS {
        return Err(MalformedRecord::MissingFields {
            expected: REQUIRED_FIELDS,
            found: fields.len(),
        });
    }

    let sequence = parse_u64("sequence", fields[0])?;
    let temperature: f64 = fields[1]
        .parse()
        .map_err(|_| MalformedRecord::BadNumber {
            field: "temperature",
            value: fields[1].to_string(),
        })?;
    let sensor_id = fields[2].to_string();
    let origin_timestamp_millis = parse_u64("timestamp", fields[3])?;
    let run_id = parse_u64("partition key", &record.partition_key)?;

    Ok(Reading {
        sequence,
        temperature,
        sensor_id,
        origin_timestamp_millis,
        run_id,
    })
}

/// Encode a reading as a raw record, right-padded to `padded_len` bytes.
/// The inverse of [`decode`]; producers publish records in this shape.
pub fn encode(reading: &Reading, padded_len: usize) -> RawRecord {
    let mut payload = format!(
        "{};{};{};{}",
        reading.sequence, reading.temperature, reading.sensor_id, reading.origin_timestamp_millis
    );
    if payload.len() < padded_len {
        payload.push(FIELD_DELIMITER);
        while payload.len() < padded_len {
            payload.push(PAD_CHAR);
        }
    }
    RawRecord::new(reading.run_id.to_string(), payload.into_bytes())
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, MalformedRecord> {
    value.parse().map_err(|_| MalformedRecord::BadNumber {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wire_record() {
        let record = RawRecord::new("1000000", b"1;21.5;tempSensor1;1000000".to_vec());
        let reading = decode(&record).unwrap();
        assert_eq!(reading.sequence, 1);
        assert_eq!(reading.temperature, 21.5);
        assert_eq!(reading.sensor_id, "tempSensor1");
        assert_eq!(reading.origin_timestamp_millis, 1_000_000);
        assert_eq!(reading.run_id, 1_000_000);
    }

    #[test]
    fn test_decode_discards_padding() {
        let record = RawRecord::new("1000000", b"2;19.0;tempSensor2;1000000;aaaaaaaa".to_vec());
        let reading = decode(&record).unwrap();
        assert_eq!(reading.sequence, 2);
        assert_eq!(reading.temperature, 19.0);
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let record = RawRecord::new("1000000", b"21.5;tempSensor1".to_vec());
        let err = decode(&record).unwrap_err();
        assert!(matches!(
            err,
            MalformedRecord::MissingFields {
                expected: 4,
                found: 2
            }
        ));
    }

    #[test]
    fn test_decode_rejects_bad_temperature() {
        let record = RawRecord::new("1000000", b"1;warm;tempSensor1;1000000".to_vec());
        let err = decode(&record).unwrap_err();
        assert!(matches!(
            err,
            MalformedRecord::BadNumber {
                field: "temperature",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_rejects_bad_partition_key() {
        let record = RawRecord::new("not-a-run", b"1;21.5;tempSensor1;1000000".to_vec());
        let err = decode(&record).unwrap_err();
        assert!(matches!(
            err,
            MalformedRecord::BadNumber {
                field: "partition key",
                ..
            }
        ));
    }

    #[test]
    fn test_encode_pads_to_length() {
        let reading = Reading {
            sequence: 7,
            temperature: -3.2,
            sensor_id: "tempSensor3".to_string(),
            origin_timestamp_millis: 1_000_000,
            run_id: 1_000_000,
        };
        let record = encode(&reading, 64);
        assert_eq!(record.payload.len(), 64);
        assert_eq!(record.partition_key, "1000000");

        let decoded = decode(&record).unwrap();
        assert_eq!(decoded, reading);
    }

    #[test]
    fn test_encode_without_padding_when_already_long_enough() {
        let reading = Reading {
            sequence: 1,
            temperature: 21.5,
            sensor_id: "tempSensor1".to_string(),
            origin_timestamp_millis: 1_000_000,
            run_id: 1_000_000,
        };
        let record = encode(&reading, 0);
        assert_eq!(record.payload, b"1;21.5;tempSensor1;1000000".to_vec());
    }
}

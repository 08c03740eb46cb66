//! The standard timestamp extension (type -1).
use std::cmp::{self, Ordering};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

const NANOS_PER_SEC: u32 = 1_000_000_000;
/// Largest second value (exclusive) that still fits in the 8-byte form's
/// 34-bit field.
const EIGHT_BYTE_SECONDS_LIMIT: i64 = 1 << 34;

/// A point in time expressed as seconds and nanoseconds since the Unix
/// epoch, matching the standard msgpack timestamp extension (type -1).
///
/// Unlike [`SystemTime`], seconds may be negative (times before 1970).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Timestamp {
    seconds: i64,
    nanoseconds: u32,
}

impl Timestamp {
    /// Construct a timestamp, failing if `nanoseconds` is a billion or
    /// more.
    pub fn new(seconds: i64, nanoseconds: u32) -> Result<Timestamp> {
        if nanoseconds >= NANOS_PER_SEC {
            return Err(Error::Range(format!(
                "nanoseconds must be less than {}, got {}",
                NANOS_PER_SEC, nanoseconds
            )));
        }
        Ok(Timestamp {
            seconds,
            nanoseconds,
        })
    }

    /// Construct a timestamp from a whole number of seconds.
    pub fn from_seconds(seconds: i64) -> Timestamp {
        Timestamp {
            seconds,
            nanoseconds: 0,
        }
    }

    /// Seconds since the Unix epoch (may be negative).
    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Nanoseconds past `seconds()`. Always in `0..1_000_000_000`.
    pub fn nanoseconds(&self) -> u32 {
        self.nanoseconds
    }

    /// The current time, per [`SystemTime::now`].
    pub fn now() -> Timestamp {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp {
                seconds: d.as_secs() as i64,
                nanoseconds: d.subsec_nanos(),
            },
            Err(e) => {
                let d = e.duration();
                Timestamp::new(-(d.as_secs() as i64), 0).unwrap() - d.subsec_nanos()
            }
        }
    }

    fn fits_four_bytes(&self) -> bool {
        self.nanoseconds == 0 && self.seconds >= 0 && self.seconds <= u32::MAX as i64
    }

    fn fits_eight_bytes(&self) -> bool {
        self.seconds >= 0 && self.seconds < EIGHT_BYTE_SECONDS_LIMIT
    }

    /// Number of bytes [`Timestamp::encode_payload`] will write: 4, 8, or
    /// 12, per the narrowest-fit rule in the format's timestamp spec.
    pub(crate) fn wire_len(&self) -> usize {
        if self.fits_four_bytes() {
            4
        } else if self.fits_eight_bytes() {
            8
        } else {
            12
        }
    }

    /// Encode the extension payload (not including the marker or type-id
    /// byte) at its narrowest valid width.
    pub(crate) fn encode_payload(&self, buf: &mut Vec<u8>) {
        if self.fits_four_bytes() {
            buf.extend_from_slice(&(self.seconds as u32).to_be_bytes());
        } else if self.fits_eight_bytes() {
            let combined = ((self.nanoseconds as u64) << 34) | (self.seconds as u64);
            buf.extend_from_slice(&combined.to_be_bytes());
        } else {
            buf.extend_from_slice(&self.nanoseconds.to_be_bytes());
            buf.extend_from_slice(&self.seconds.to_be_bytes());
        }
    }

    /// Decode an extension payload of the given length, per the three
    /// forms the standard timestamp extension allows.
    pub(crate) fn decode_payload(payload: &[u8]) -> Result<Timestamp> {
        match payload.len() {
            4 => {
                let seconds = u32::from_be_bytes(payload.try_into().unwrap());
                Ok(Timestamp {
                    seconds: seconds as i64,
                    nanoseconds: 0,
                })
            }
            8 => {
                let combined = u64::from_be_bytes(payload.try_into().unwrap());
                let seconds = (combined & ((1u64 << 34) - 1)) as i64;
                let nanoseconds = (combined >> 34) as u32;
                if nanoseconds >= NANOS_PER_SEC {
                    return Err(Error::MalformedFormat(format!(
                        "8-byte timestamp nanoseconds field {} out of range",
                        nanoseconds
                    )));
                }
                Ok(Timestamp {
                    seconds,
                    nanoseconds,
                })
            }
            12 => {
                let nanoseconds = u32::from_be_bytes(payload[0..4].try_into().unwrap());
                let seconds = i64::from_be_bytes(payload[4..12].try_into().unwrap());
                if nanoseconds >= NANOS_PER_SEC {
                    return Err(Error::MalformedFormat(format!(
                        "12-byte timestamp nanoseconds field {} out of range",
                        nanoseconds
                    )));
                }
                Ok(Timestamp {
                    seconds,
                    nanoseconds,
                })
            }
            other => Err(Error::MalformedFormat(format!(
                "timestamp payload must be 4, 8, or 12 bytes, got {}",
                other
            ))),
        }
    }
}

impl std::ops::Sub<u32> for Timestamp {
    type Output = Timestamp;
    fn sub(mut self, nanoseconds: u32) -> Timestamp {
        if self.nanoseconds >= nanoseconds {
            self.nanoseconds -= nanoseconds;
        } else {
            self.nanoseconds += NANOS_PER_SEC - nanoseconds;
            self.seconds -= 1;
        }
        self
    }
}

impl cmp::Ord for Timestamp {
    fn cmp(&self, other: &Timestamp) -> Ordering {
        match self.seconds.cmp(&other.seconds) {
            Ordering::Equal => self.nanoseconds.cmp(&other.nanoseconds),
            other => other,
        }
    }
}

impl cmp::PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Timestamp) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}s since epoch", self.seconds, self.nanoseconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge_cases() -> Vec<(usize, Timestamp)> {
        vec![
            (4, Timestamp::new(0, 0).unwrap()),
            (4, Timestamp::new(1, 0).unwrap()),
            (4, Timestamp::new(u32::MAX as i64, 0).unwrap()),
            (8, Timestamp::new(1, 1).unwrap()),
            (8, Timestamp::new(u32::MAX as i64 + 1, 0).unwrap()),
            (8, Timestamp::new(EIGHT_BYTE_SECONDS_LIMIT - 1, 999_999_999).unwrap()),
            (12, Timestamp::new(-1, 0).unwrap()),
            (12, Timestamp::new(EIGHT_BYTE_SECONDS_LIMIT, 0).unwrap()),
            (12, Timestamp::new(i64::MIN, 0).unwrap()),
            (12, Timestamp::new(i64::MAX, 999_999_999).unwrap()),
        ]
    }

    #[test]
    fn narrowest_width_roundtrip() {
        for (expected_len, ts) in edge_cases() {
            let mut buf = Vec::new();
            ts.encode_payload(&mut buf);
            assert_eq!(buf.len(), expected_len, "wrong width for {:?}", ts);
            assert_eq!(ts.wire_len(), expected_len);
            let decoded = Timestamp::decode_payload(&buf).unwrap();
            assert_eq!(decoded, ts);
        }
    }

    #[test]
    fn rejects_bad_nanoseconds() {
        assert!(Timestamp::new(0, 1_000_000_000).is_err());
    }

    #[test]
    fn rejects_unsupported_payload_length() {
        assert!(Timestamp::decode_payload(&[0u8; 5]).is_err());
        assert!(Timestamp::decode_payload(&[0u8; 0]).is_err());
    }

    #[test]
    fn ordering_is_lexicographic_on_seconds_then_nanoseconds() {
        let a = Timestamp::new(5, 0).unwrap();
        let b = Timestamp::new(5, 1).unwrap();
        let c = Timestamp::new(6, 0).unwrap();
        assert!(a < b);
        assert!(b < c);
    }
}

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::fmt;
use std::time::Duration;

/// A timestamp as reported by the storage server.
///
/// The wire format is decimal seconds (`1600000000.000`), but we store
/// milliseconds internally so arithmetic and comparisons stay integral.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ServerTimestamp(pub i64);

impl ServerTimestamp {
    pub fn from_millis(ts: i64) -> Self {
        // Catch it in tests, but be lenient in production - the server
        // never hands us a negative timestamp, so just clamp.
        debug_assert!(ts >= 0, "negative timestamp: {}", ts);
        if ts >= 0 {
            Self(ts)
        } else {
            log::error!("negative timestamp: {}", ts);
            Self(0)
        }
    }

    /// Convert a seconds value (the wire form) to a timestamp. Negative
    /// and non-finite inputs clamp to zero.
    pub fn from_float_seconds(ts: f64) -> Self {
        let rf = (ts * 1000.0).round();
        if !rf.is_finite() || rf < 0.0 || rf >= i64::MAX as f64 {
            log::error!("unacceptable timestamp: {}", ts);
            ServerTimestamp(0)
        } else {
            ServerTimestamp(rf as i64)
        }
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// The wire representation: seconds with exactly three decimal
    /// places, as used for query parameters and `X-If-Unmodified-Since`.
    pub fn to_decimal_seconds_string(self) -> String {
        format!("{}.{:03}", self.0 / 1000, self.0 % 1000)
    }

    /// Returns None if `other` is later than `self` (i.e. `self - other`
    /// would be negative).
    pub fn duration_since(self, other: ServerTimestamp) -> Option<Duration> {
        let delta = self.0 - other.0;
        if delta < 0 {
            None
        } else {
            Some(Duration::from_millis(delta as u64))
        }
    }
}

impl fmt::Display for ServerTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_seconds_string())
    }
}

impl std::str::FromStr for ServerTimestamp {
    type Err = std::num::ParseFloatError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let val = s.parse::<f64>()?;
        Ok(Self::from_float_seconds(val))
    }
}

impl serde::Serialize for ServerTimestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0 as f64 / 1000.0)
    }
}

impl<'de> serde::Deserialize<'de> for ServerTimestamp {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let seconds = <f64 as serde::Deserialize<'de>>::deserialize(d)?;
        Ok(Self::from_float_seconds(seconds))
    }
}

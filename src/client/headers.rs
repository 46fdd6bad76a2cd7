/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The `X-Weave-*` response header contract, decoded into a typed
//! [`ResponseMetadata`]. Decoding is a pure function of the status and
//! headers: a missing or malformed header is `None` (or zero for the
//! timestamp), never an error.

use crate::server_timestamp::ServerTimestamp;
use crate::transport::{Headers, Response};

pub const X_WEAVE_TIMESTAMP: &str = "X-Weave-Timestamp";
pub const X_LAST_MODIFIED: &str = "X-Last-Modified";
pub const X_WEAVE_BACKOFF: &str = "X-Weave-Backoff";
pub const X_BACKOFF: &str = "X-Backoff";
pub const RETRY_AFTER: &str = "Retry-After";
pub const X_WEAVE_ALERT: &str = "X-Weave-Alert";
pub const X_WEAVE_NEXT_OFFSET: &str = "X-Weave-Next-Offset";
pub const X_WEAVE_RECORDS: &str = "X-Weave-Records";
pub const X_WEAVE_QUOTA_REMAINING: &str = "X-Weave-Quota-Remaining";
pub const X_IF_UNMODIFIED_SINCE: &str = "X-If-Unmodified-Since";
pub const X_CONFIRM_DELETE: &str = "X-Confirm-Delete";

/// Everything the server tells us out-of-band with a response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseMetadata {
    pub status: u16,
    pub alert: Option<String>,
    pub next_offset: Option<String>,
    pub records: Option<u64>,
    pub quota_remaining: Option<i64>,
    /// The server clock at response time. Zero if the header was
    /// absent, which no real server response ever is.
    pub timestamp: ServerTimestamp,
    pub last_modified: Option<ServerTimestamp>,
    pub backoff_millis: Option<u64>,
    pub retry_after_millis: Option<u64>,
}

impl ResponseMetadata {
    pub fn parse(status: u16, headers: &Headers) -> ResponseMetadata {
        ResponseMetadata {
            status,
            alert: headers.get(X_WEAVE_ALERT).map(str::to_string),
            next_offset: headers.get(X_WEAVE_NEXT_OFFSET).map(str::to_string),
            records: integer_header(headers, X_WEAVE_RECORDS),
            quota_remaining: integer_header(headers, X_WEAVE_QUOTA_REMAINING),
            timestamp: seconds_header(headers, X_WEAVE_TIMESTAMP)
                .map(|ms| ServerTimestamp::from_millis(ms as i64))
                .unwrap_or_default(),
            last_modified: seconds_header(headers, X_LAST_MODIFIED)
                .map(|ms| ServerTimestamp::from_millis(ms as i64)),
            backoff_millis: seconds_header(headers, X_WEAVE_BACKOFF)
                .or_else(|| seconds_header(headers, X_BACKOFF)),
            retry_after_millis: seconds_header(headers, RETRY_AFTER),
        }
    }

    pub fn from_response(response: &Response) -> ResponseMetadata {
        Self::parse(response.status, &response.headers)
    }

    /// The duration, in milliseconds, the server wants us to stay away.
    /// `X-Weave-Backoff` wins over `Retry-After` when both are present.
    pub fn backoff(&self) -> Option<u64> {
        self.backoff_millis.or(self.retry_after_millis)
    }
}

/// Parse a header carrying a seconds value into milliseconds.
///
/// Servers emit these as decimal strings (`"1.234"`), bare integers
/// (`30`), or quoted numerics; accept all three by parsing as a float
/// and rounding to the nearest millisecond.
fn seconds_header(headers: &Headers, name: &str) -> Option<u64> {
    parse_seconds(headers.get(name)?)
}

fn parse_seconds(value: &str) -> Option<u64> {
    let trimmed = value.trim().trim_matches('"');
    let seconds: f64 = trimmed.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        log::warn!("ignoring unparsable seconds header value {:?}", value);
        return None;
    }
    Some((seconds * 1000.0).round() as u64)
}

fn integer_header<T: std::str::FromStr>(headers: &Headers, name: &str) -> Option<T> {
    headers.get(name)?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_seconds_header_polymorphism() {
        // A decimal string, an integer, and a quoted numeric all mean
        // the same thing.
        assert_eq!(parse_seconds("1.234"), Some(1234));
        assert_eq!(parse_seconds("\"1.234\""), Some(1234));
        assert_eq!(parse_seconds("1"), Some(1000));
        assert_eq!(parse_seconds(" 30 "), Some(30_000));
        assert_eq!(parse_seconds("junk"), None);
        assert_eq!(parse_seconds("-5"), None);
        assert_eq!(parse_seconds("inf"), None);
    }

    #[test]
    fn test_parse_full() {
        let meta = ResponseMetadata::parse(
            200,
            &headers(&[
                ("X-Weave-Timestamp", "1600000000.120"),
                ("X-Last-Modified", "1599999999.500"),
                ("X-Weave-Records", "42"),
                ("X-Weave-Quota-Remaining", "-17"),
                ("X-Weave-Next-Offset", "abc123"),
                ("X-Weave-Alert", "maintenance soon"),
                ("X-Weave-Backoff", "30"),
                ("Retry-After", "60"),
            ]),
        );
        assert_eq!(meta.status, 200);
        assert_eq!(meta.timestamp, ServerTimestamp(1_600_000_000_120));
        assert_eq!(meta.last_modified, Some(ServerTimestamp(1_599_999_999_500)));
        assert_eq!(meta.records, Some(42));
        assert_eq!(meta.quota_remaining, Some(-17));
        assert_eq!(meta.next_offset.as_deref(), Some("abc123"));
        assert_eq!(meta.alert.as_deref(), Some("maintenance soon"));
        assert_eq!(meta.backoff_millis, Some(30_000));
        assert_eq!(meta.retry_after_millis, Some(60_000));
        // Backoff wins when both are present.
        assert_eq!(meta.backoff(), Some(30_000));
    }

    #[test]
    fn test_parse_absent_and_malformed() {
        let meta = ResponseMetadata::parse(
            200,
            &headers(&[
                ("X-Weave-Records", "not a number"),
                ("X-Weave-Backoff", "soon"),
            ]),
        );
        assert_eq!(meta.timestamp, ServerTimestamp(0));
        assert_eq!(meta.last_modified, None);
        assert_eq!(meta.records, None);
        assert_eq!(meta.quota_remaining, None);
        assert_eq!(meta.backoff_millis, None);
        assert_eq!(meta.backoff(), None);
    }

    #[test]
    fn test_x_backoff_fallback() {
        let meta = ResponseMetadata::parse(503, &headers(&[("X-Backoff", "15")]));
        assert_eq!(meta.backoff_millis, Some(15_000));

        let meta = ResponseMetadata::parse(503, &headers(&[("Retry-After", "10")]));
        assert_eq!(meta.backoff_millis, None);
        assert_eq!(meta.backoff(), Some(10_000));
    }

    #[test]
    fn test_parse_is_pure() {
        let h = headers(&[("X-Weave-Timestamp", "12.5")]);
        assert_eq!(ResponseMetadata::parse(200, &h), ResponseMetadata::parse(200, &h));
    }
}

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::client::ResponseMetadata;
use crate::guid::Guid;
use crate::transport::TransportError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error reported to us by the server, as distinct from a failure to
/// talk to it at all. Carries the decoded response metadata so callers
/// can see timestamps, alerts, and quota even on failures.
#[derive(Debug, Clone)]
pub enum ErrorResponse {
    /// HTTP 404
    NotFound { route: String, metadata: ResponseMetadata },
    /// HTTP 401
    Unauthorized { route: String, metadata: ResponseMetadata },
    /// HTTP 412 - the `X-If-Unmodified-Since` precondition failed.
    PreconditionFailed { route: String, metadata: ResponseMetadata },
    /// HTTP 5xx
    ServerError { route: String, status: u16, metadata: ResponseMetadata },
    /// Any other HTTP 4xx
    RequestFailed { route: String, status: u16, metadata: ResponseMetadata },
}

impl ErrorResponse {
    pub fn status(&self) -> u16 {
        match self {
            ErrorResponse::NotFound { metadata, .. }
            | ErrorResponse::Unauthorized { metadata, .. }
            | ErrorResponse::PreconditionFailed { metadata, .. }
            | ErrorResponse::ServerError { metadata, .. }
            | ErrorResponse::RequestFailed { metadata, .. } => metadata.status,
        }
    }

    pub fn route(&self) -> &str {
        match self {
            ErrorResponse::NotFound { route, .. }
            | ErrorResponse::Unauthorized { route, .. }
            | ErrorResponse::PreconditionFailed { route, .. }
            | ErrorResponse::ServerError { route, .. }
            | ErrorResponse::RequestFailed { route, .. } => route,
        }
    }

    pub fn metadata(&self) -> &ResponseMetadata {
        match self {
            ErrorResponse::NotFound { metadata, .. }
            | ErrorResponse::Unauthorized { metadata, .. }
            | ErrorResponse::PreconditionFailed { metadata, .. }
            | ErrorResponse::ServerError { metadata, .. }
            | ErrorResponse::RequestFailed { metadata, .. } => metadata,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server previously asked us to back off, and the backoff
    /// window is still open. The request was refused before any network
    /// activity. The payload is the local clock value, in milliseconds,
    /// at which requests may resume.
    #[error("Server requested backoff; requests may resume at {0} (local ms)")]
    BackoffError(u64),

    /// A transport failure with no usable response.
    #[error("Network error: {0}")]
    RequestError(String),

    /// The server answered with an error status.
    #[error("HTTP status {} during a storage request to {}", .0.status(), .0.route())]
    StorageHttpError(ErrorResponse),

    /// A successful response whose body could not be understood.
    #[error("Error parsing a record: {0}")]
    RecordParseError(String),

    /// The meta/global record failed to serialize; no request was made.
    #[error("The meta/global record could not be serialized")]
    MalformedMetaGlobal,

    /// A single record exceeds the hard per-record ceiling.
    #[error("Record {guid} is too large to upload ({size} bytes)")]
    RecordTooLarge { guid: Guid, size: usize },

    /// The accumulated record set exceeds the server's batch limits.
    #[error("Upload exceeds the server batch limits; multi-batch commits are not implemented")]
    MultiBatchUnsupported,

    #[error("Unacceptable URL: {0}")]
    UnacceptableUrl(String),

    #[error("Malformed URL: {0}")]
    MalformedUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::RequestError(e.0)
    }
}

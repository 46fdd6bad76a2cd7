/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::backoff::BackoffState;
use super::collection_client::CollectionClient;
use super::headers::{self, ResponseMetadata};
use crate::bso::{BsoEnvelope, Encrypter, Record};
use crate::error::{Error, ErrorResponse, Result};
use crate::guid::Guid;
use crate::record_types::{CryptoKeysRecord, MetaGlobalRecord};
use crate::server_timestamp::ServerTimestamp;
use crate::transport::{Backend, Request, Response};

use super::request::InfoConfiguration;

/// Attaches the `Authorization` header. The usual implementation signs
/// the request HAWK-style with keys derived from a tokenserver token;
/// the engine itself never signs anything.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, request: Request) -> Result<Request>;
}

/// A decoded success: the parsed body plus the response metadata.
#[derive(Debug, Clone)]
pub struct StorageResponse<T> {
    pub value: T,
    pub metadata: ResponseMetadata,
}

impl<T> StorageResponse<T> {
    pub fn status(&self) -> u16 {
        self.metadata.status
    }

    /// The collection's last-modified time, falling back to the server
    /// clock when the header wasn't sent.
    pub fn last_modified(&self) -> ServerTimestamp {
        self.metadata.last_modified.unwrap_or(self.metadata.timestamp)
    }
}

/// The body of `info/collections`: each collection's last-modified time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InfoCollections(HashMap<String, ServerTimestamp>);

impl InfoCollections {
    pub fn new(collections: HashMap<String, ServerTimestamp>) -> InfoCollections {
        InfoCollections(collections)
    }

    pub fn get(&self, collection: &str) -> Option<&ServerTimestamp> {
        self.0.get(collection)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServerTimestamp)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// The storage service root. Owns the authorizer and the transport
/// handle; shares the backoff state with its host.
pub struct StorageClient {
    root: Url,
    authorizer: Box<dyn Authorizer>,
    backend: Arc<dyn Backend>,
    backoff: Arc<BackoffState>,
}

impl StorageClient {
    /// `root` is the per-user service root from the token server, e.g.
    /// `https://server/1.5/<uid>`. A trailing slash is stripped and
    /// never reintroduced: the bare root names the whole storage (its
    /// DELETE is drop-user), while the slashed form names an empty
    /// collection path.
    pub fn new(
        root: Url,
        authorizer: Box<dyn Authorizer>,
        backend: Arc<dyn Backend>,
        backoff: Arc<BackoffState>,
    ) -> Result<StorageClient> {
        let mut root = root;
        if root.cannot_be_a_base() {
            return Err(Error::UnacceptableUrl(root.to_string()));
        }
        let path = root.path();
        if path.ends_with('/') && path != "/" {
            let trimmed = path.trim_end_matches('/').to_string();
            root.set_path(&trimmed);
        }
        Ok(StorageClient {
            root,
            authorizer,
            backend,
            backoff,
        })
    }

    pub fn backoff_state(&self) -> &Arc<BackoffState> {
        &self.backoff
    }

    /// Append path segments to the root, preserving the
    /// no-trailing-slash property.
    pub(crate) fn uri_for(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.root.clone();
        url.path_segments_mut()
            .map_err(|_| Error::UnacceptableUrl(self.root.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn storage_url(&self) -> Result<Url> {
        self.uri_for(&["storage"])
    }

    pub(crate) fn now_local_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    // Request constructors. Each carries the headers its method is
    // contractually required to send.

    pub(crate) fn build_get(&self, url: Url) -> Request {
        Request::get(url).header("Accept", "application/json")
    }

    pub(crate) fn build_delete(&self, url: Url) -> Request {
        Request::delete(url).header(headers::X_CONFIRM_DELETE, "1")
    }

    pub(crate) fn build_put(
        &self,
        url: Url,
        body: String,
        if_unmodified_since: Option<ServerTimestamp>,
    ) -> Request {
        let request = Request::put(url)
            .header("Content-Type", "application/json;charset=utf-8")
            .body(body);
        Self::apply_precondition(request, if_unmodified_since)
    }

    /// A newline-framed upload POST.
    pub(crate) fn build_post_lines(
        &self,
        url: Url,
        lines: &[String],
        if_unmodified_since: Option<ServerTimestamp>,
    ) -> Request {
        let request = Request::post(url)
            .header("Content-Type", "application/newlines")
            .body(lines.join("\n"));
        Self::apply_precondition(request, if_unmodified_since)
    }

    fn apply_precondition(request: Request, if_unmodified_since: Option<ServerTimestamp>) -> Request {
        match if_unmodified_since {
            None => request,
            Some(ts) => request.header(
                headers::X_IF_UNMODIFIED_SINCE,
                ts.to_decimal_seconds_string(),
            ),
        }
    }

    /// The request pipeline every operation funnels through: refuse
    /// fast under an open backoff window, authorize, send, decode the
    /// response metadata, note any new backoff, classify the status,
    /// and only then let `parse` at the body.
    pub(crate) fn exec_request<T>(
        &self,
        request: Request,
        parse: impl FnOnce(&Response) -> Result<T>,
    ) -> Result<StorageResponse<T>> {
        if let Some(until) = self.backoff.check(Self::now_local_millis()) {
            log::debug!("in backoff until {}; refusing {}", until, request.url);
            return Err(Error::BackoffError(until));
        }
        let route = format!("{} {}", request.method, request.url);
        log::trace!("issuing {}", route);
        let request = self.authorizer.authorize(request)?;
        let response = self.backend.send(request).map_err(|e| {
            log::warn!("network error during {}: {}", route, e);
            Error::from(e)
        })?;
        let metadata = ResponseMetadata::from_response(&response);
        self.note_backoff(&metadata);
        if !response.is_success() {
            if let Some(error_response) = classify_status(&route, &metadata) {
                log::info!("{} failed with status {}", route, metadata.status);
                return Err(Error::StorageHttpError(error_response));
            }
        }
        let value = parse(&response)?;
        Ok(StorageResponse { value, metadata })
    }

    fn note_backoff(&self, metadata: &ResponseMetadata) {
        if let Some(millis) = metadata.backoff() {
            let until = Self::now_local_millis().saturating_add(millis);
            log::info!("server requested backoff for {}ms", millis);
            self.backoff.note_backoff(until);
        }
    }

    // Operations against the service root.

    /// DELETE the bare root: the server drops everything it holds for
    /// this user.
    pub fn wipe_storage(&self) -> Result<StorageResponse<serde_json::Value>> {
        log::info!("wiping server storage");
        let request = self.build_delete(self.root.clone());
        self.exec_request(request, |response| {
            if response.body.is_empty() {
                Ok(serde_json::Value::Null)
            } else {
                parse_json(response)
            }
        })
    }

    pub fn get_info_collections(&self) -> Result<StorageResponse<InfoCollections>> {
        let url = self.uri_for(&["info", "collections"])?;
        self.exec_request(self.build_get(url), parse_json)
    }

    /// Fetch the server's declared limits. A 404 means the server
    /// predates `info/configuration`; it gets the documented defaults.
    pub fn get_info_configuration(&self) -> Result<StorageResponse<InfoConfiguration>> {
        let url = self.uri_for(&["info", "configuration"])?;
        match self.exec_request(self.build_get(url), parse_json) {
            Err(Error::StorageHttpError(ErrorResponse::NotFound { metadata, .. })) => {
                log::debug!("no info/configuration on this server; using defaults");
                Ok(StorageResponse {
                    value: InfoConfiguration::default(),
                    metadata,
                })
            }
            other => other,
        }
    }

    pub fn get_meta_global(&self) -> Result<StorageResponse<MetaGlobalRecord>> {
        let url = self.uri_for(&["storage", "meta", "global"])?;
        self.exec_request(self.build_get(url), |response| {
            // meta/global is an envelope whose payload string is
            // itself the JSON of the record.
            let envelope: BsoEnvelope = parse_json(response)?;
            serde_json::from_str(&envelope.payload)
                .map_err(|e| Error::RecordParseError(format!("meta/global payload: {}", e)))
        })
    }

    pub fn upload_meta_global(
        &self,
        meta_global: &MetaGlobalRecord,
        if_unmodified_since: Option<ServerTimestamp>,
    ) -> Result<StorageResponse<ServerTimestamp>> {
        let payload =
            serde_json::to_string(meta_global).map_err(|_| Error::MalformedMetaGlobal)?;
        let envelope = BsoEnvelope {
            id: "global".into(),
            modified: None,
            sortindex: None,
            ttl: None,
            payload,
        };
        let body = serde_json::to_string(&envelope).map_err(|_| Error::MalformedMetaGlobal)?;
        log::info!("uploading meta/global");
        let url = self.uri_for(&["storage", "meta", "global"])?;
        self.exec_request(self.build_put(url, body, if_unmodified_since), parse_timestamp_body)
    }

    /// Fetch `crypto/keys`. The `crypto` collection is the one place
    /// records are encrypted under the sync-key bundle rather than the
    /// bulk keys, so the host supplies the matching encrypter.
    pub fn get_crypto_keys(
        &self,
        encrypter: Box<dyn Encrypter<CryptoKeysRecord>>,
    ) -> Result<StorageResponse<Record<CryptoKeysRecord>>> {
        let crypto = self.collection_client("crypto", encrypter)?;
        crypto.get(&Guid::from("keys"))
    }

    pub fn upload_crypto_keys(
        &self,
        keys: &CryptoKeysRecord,
        encrypter: Box<dyn Encrypter<CryptoKeysRecord>>,
        if_unmodified_since: Option<ServerTimestamp>,
    ) -> Result<StorageResponse<ServerTimestamp>> {
        let crypto = self.collection_client("crypto", encrypter)?;
        log::info!("uploading crypto/keys");
        crypto.put(&Record::new("keys", keys.clone()), if_unmodified_since)
    }

    /// Factory for a typed client over `<root>/storage/<collection>`.
    pub fn collection_client<T>(
        &self,
        collection: impl Into<String>,
        encrypter: Box<dyn Encrypter<T>>,
    ) -> Result<CollectionClient<'_, T>> {
        CollectionClient::new(self, collection.into(), encrypter)
    }
}

/// HTTP-status classification for non-success responses, run after
/// backoff bookkeeping. 3xx classifies clean and falls through to the
/// body parser like a success.
fn classify_status(route: &str, metadata: &ResponseMetadata) -> Option<ErrorResponse> {
    let route = route.to_string();
    let metadata = metadata.clone();
    match metadata.status {
        status if status >= 500 => Some(ErrorResponse::ServerError { route, status, metadata }),
        404 => Some(ErrorResponse::NotFound { route, metadata }),
        401 => Some(ErrorResponse::Unauthorized { route, metadata }),
        412 => Some(ErrorResponse::PreconditionFailed { route, metadata }),
        status if status >= 400 => Some(ErrorResponse::RequestFailed { route, status, metadata }),
        _ => None,
    }
}

/// Decode a JSON body, keeping the path to the offending field in the
/// error message.
pub(crate) fn parse_json<T: DeserializeOwned>(response: &Response) -> Result<T> {
    let mut deserializer = serde_json::Deserializer::from_slice(&response.body);
    serde_path_to_error::deserialize(&mut deserializer)
        .map_err(|e| Error::RecordParseError(e.to_string()))
}

/// PUT responses are a bare decimal-seconds timestamp, not JSON.
pub(crate) fn parse_timestamp_body(response: &Response) -> Result<ServerTimestamp> {
    response
        .text()
        .trim()
        .parse()
        .map_err(|_| Error::RecordParseError(format!("timestamp body: {:?}", response.text())))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    const TS: (&str, &str) = ("X-Weave-Timestamp", "1600000000.000");

    #[test]
    fn test_root_trailing_slash_stripped() {
        let backend = TestBackend::new();
        let client = StorageClient::new(
            Url::parse("https://example.com/1.5/12345/").unwrap(),
            Box::new(TestAuthorizer),
            backend.clone() as Arc<dyn Backend>,
            Arc::new(BackoffState::new()),
        )
        .unwrap();
        backend.push_response(200, &[TS], "");
        client.wipe_storage().unwrap();
        let seen = backend.seen();
        assert_eq!(seen[0].url, "https://example.com/1.5/12345");
    }

    #[test]
    fn test_wipe_storage() {
        let backend = TestBackend::new();
        let client = test_client(&backend);
        backend.push_response(200, &[TS], "");
        let response = client.wipe_storage().unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.value, serde_json::Value::Null);
        assert_eq!(response.metadata.timestamp, ServerTimestamp(1_600_000_000_000));

        let seen = backend.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "DELETE");
        // The bare root: no trailing slash, which the server reads as
        // drop-user rather than an empty collection path.
        assert_eq!(seen[0].url, "https://example.com/1.5/12345");
        assert_eq!(seen[0].headers.get("X-Confirm-Delete"), Some("1"));
        assert_eq!(seen[0].headers.get("Authorization"), Some("Hawk test"));
    }

    #[test]
    fn test_get_info_collections() -> Result<()> {
        let backend = TestBackend::new();
        let client = test_client(&backend);
        backend.push_response(
            200,
            &[TS],
            &json!({"bookmarks": 1600000000.12, "tabs": 1599999000.5}).to_string(),
        );
        let response = client.get_info_collections()?;
        assert_eq!(
            response.value.get("bookmarks"),
            Some(&ServerTimestamp(1_600_000_000_120))
        );
        assert_eq!(response.value.get("tabs"), Some(&ServerTimestamp(1_599_999_000_500)));
        assert_eq!(response.value.get("history"), None);

        let seen = backend.seen();
        assert_eq!(seen[0].method, "GET");
        assert_eq!(seen[0].url, "https://example.com/1.5/12345/info/collections");
        assert_eq!(seen[0].headers.get("Accept"), Some("application/json"));
        Ok(())
    }

    #[test]
    fn test_get_info_configuration_404_yields_defaults() {
        let backend = TestBackend::new();
        let client = test_client(&backend);
        backend.push_response(404, &[TS], "0");
        let response = client.get_info_configuration().unwrap();
        assert_eq!(response.value, InfoConfiguration::default());
        assert_eq!(response.status(), 404);
    }

    #[test]
    fn test_get_meta_global_nested_payload() -> Result<()> {
        let backend = TestBackend::new();
        let client = test_client(&backend);
        let payload = json!({
            "syncID": "sssssssssssn",
            "storageVersion": 5,
        })
        .to_string();
        backend.push_response(
            200,
            &[TS, ("X-Last-Modified", "1599990000.000")],
            &json!({"id": "global", "modified": 1599990000.0, "payload": payload}).to_string(),
        );
        let response = client.get_meta_global()?;
        assert_eq!(response.value.sync_id, "sssssssssssn");
        assert_eq!(response.value.storage_version, 5);
        assert_eq!(response.last_modified(), ServerTimestamp(1_599_990_000_000));

        assert_eq!(
            backend.seen()[0].url,
            "https://example.com/1.5/12345/storage/meta/global"
        );
        Ok(())
    }

    #[test]
    fn test_upload_meta_global() -> Result<()> {
        let backend = TestBackend::new();
        let client = test_client(&backend);
        backend.push_response(200, &[TS], "1600000000.55");
        let meta_global = MetaGlobalRecord {
            sync_id: "sssssssssssn".into(),
            storage_version: 5,
            engines: Default::default(),
            declined: vec![],
        };
        let response =
            client.upload_meta_global(&meta_global, Some(ServerTimestamp(1_599_000_000_000)))?;
        assert_eq!(response.value, ServerTimestamp(1_600_000_000_550));

        let seen = backend.seen();
        assert_eq!(seen[0].method, "PUT");
        assert_eq!(
            seen[0].headers.get("Content-Type"),
            Some("application/json;charset=utf-8")
        );
        assert_eq!(
            seen[0].headers.get("X-If-Unmodified-Since"),
            Some("1599000000.000")
        );
        // The body is an envelope whose payload is the serialized
        // record, not the record itself.
        let body: serde_json::Value = serde_json::from_str(seen[0].body.as_deref().unwrap())?;
        assert_eq!(body["id"], "global");
        let inner: serde_json::Value = serde_json::from_str(body["payload"].as_str().unwrap())?;
        assert_eq!(inner["syncID"], "sssssssssssn");
        Ok(())
    }

    #[test]
    fn test_backoff_enforced_before_network() {
        let backend = TestBackend::new();
        let backoff = Arc::new(BackoffState::new());
        let client = test_client_with_backoff(&backend, &backoff);

        let until = StorageClient::now_local_millis() + 30_000;
        backoff.note_backoff(until);
        match client.get_info_collections() {
            Err(Error::BackoffError(t)) => assert_eq!(t, until),
            other => panic!("expected BackoffError, got {:?}", other.map(|r| r.value)),
        }
        // Nothing hit the wire.
        assert!(backend.seen().is_empty());
    }

    #[test]
    fn test_backoff_noted_from_response() {
        let backend = TestBackend::new();
        let backoff = Arc::new(BackoffState::new());
        let client = test_client_with_backoff(&backend, &backoff);

        backend.push_response(200, &[TS, ("X-Weave-Backoff", "30")], "{}");
        client.get_info_collections().unwrap();

        // The window opened; the next operation is refused pre-flight.
        let now = StorageClient::now_local_millis();
        let until = backoff.check(now).expect("backoff should be active");
        assert!(until >= now + 29_000 && until <= now + 31_000);
        assert!(matches!(
            client.wipe_storage(),
            Err(Error::BackoffError(_))
        ));
        assert_eq!(backend.seen().len(), 1);
    }

    #[test]
    fn test_backoff_noted_even_on_error_status() {
        let backend = TestBackend::new();
        let backoff = Arc::new(BackoffState::new());
        let client = test_client_with_backoff(&backend, &backoff);

        backend.push_response(503, &[("Retry-After", "60")], "");
        match client.get_info_collections() {
            Err(Error::StorageHttpError(ErrorResponse::ServerError { status, .. })) => {
                assert_eq!(status, 503)
            }
            other => panic!("expected ServerError, got {:?}", other.map(|r| r.value)),
        }
        assert!(backoff.check(StorageClient::now_local_millis()).is_some());
    }

    #[test]
    fn test_status_classification() {
        let backend = TestBackend::new();
        let client = test_client(&backend);

        backend.push_response(404, &[TS], "0");
        assert!(matches!(
            client.get_meta_global(),
            Err(Error::StorageHttpError(ErrorResponse::NotFound { .. }))
        ));

        backend.push_response(401, &[TS], "0");
        assert!(matches!(
            client.get_meta_global(),
            Err(Error::StorageHttpError(ErrorResponse::Unauthorized { .. }))
        ));

        backend.push_response(412, &[TS], "0");
        assert!(matches!(
            client.get_meta_global(),
            Err(Error::StorageHttpError(ErrorResponse::PreconditionFailed { .. }))
        ));

        backend.push_response(400, &[TS], "6");
        match client.get_meta_global() {
            Err(Error::StorageHttpError(ErrorResponse::RequestFailed { status, route, .. })) => {
                assert_eq!(status, 400);
                assert!(route.starts_with("GET "));
            }
            other => panic!("expected RequestFailed, got {:?}", other.map(|r| r.value)),
        }
    }

    #[test]
    fn test_transport_error() {
        let backend = TestBackend::new();
        let client = test_client(&backend);
        backend.push_transport_error("connection reset");
        match client.get_info_collections() {
            Err(Error::RequestError(message)) => assert_eq!(message, "connection reset"),
            other => panic!("expected RequestError, got {:?}", other.map(|r| r.value)),
        }
    }

    #[test]
    fn test_unparseable_success_body() {
        let backend = TestBackend::new();
        let client = test_client(&backend);
        backend.push_response(200, &[TS], "not json");
        assert!(matches!(
            client.get_info_collections(),
            Err(Error::RecordParseError(_))
        ));
    }
}

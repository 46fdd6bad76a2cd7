/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use url::Url;

use super::batch::BatchClient;
use super::request::{CollectionRequest, InfoConfiguration, PostResponse, RequestOrder};
use super::storage_client::{parse_json, parse_timestamp_body, StorageClient, StorageResponse};
use crate::bso::{BsoEnvelope, Encrypter, Record};
use crate::error::{Error, Result};
use crate::guid::Guid;
use crate::server_timestamp::ServerTimestamp;

/// Typed operations over a single collection at
/// `<root>/storage/<collection>`.
///
/// Borrows the storage client; owns its encrypter and the server's
/// limits. The payload type `T` is whatever the engine syncing this
/// collection stores - this layer only moves it through the envelope.
pub struct CollectionClient<'a, T> {
    client: &'a StorageClient,
    collection: String,
    collection_url: Url,
    encrypter: Box<dyn Encrypter<T>>,
    config: InfoConfiguration,
}

impl<'a, T> CollectionClient<'a, T> {
    pub(crate) fn new(
        client: &'a StorageClient,
        collection: String,
        encrypter: Box<dyn Encrypter<T>>,
    ) -> Result<CollectionClient<'a, T>> {
        let collection_url = client.uri_for(&["storage", &collection])?;
        Ok(CollectionClient {
            client,
            collection,
            collection_url,
            encrypter,
            config: InfoConfiguration::default(),
        })
    }

    /// Replace the default limits with the ones the server declared.
    pub fn with_config(mut self, config: InfoConfiguration) -> Self {
        self.config = config;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub(crate) fn config(&self) -> &InfoConfiguration {
        &self.config
    }

    fn record_url(&self, id: &Guid) -> Result<Url> {
        let mut url = self.collection_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::UnacceptableUrl(self.collection_url.to_string()))?
            .push(id.as_str());
        Ok(url)
    }

    /// The full envelope line for a record: encrypt the payload, wrap
    /// it, serialize. `None` if the encrypter refuses.
    pub fn serialize_record(&self, record: &Record<T>) -> Option<String> {
        let payload = self.encrypter.encrypt(record)?;
        let envelope = BsoEnvelope {
            id: record.id.clone(),
            modified: None,
            sortindex: record.sortindex,
            ttl: record.ttl,
            payload,
        };
        serde_json::to_string(&envelope).ok()
    }

    pub fn get(&self, id: &Guid) -> Result<StorageResponse<Record<T>>> {
        let url = self.record_url(id)?;
        let request = self.client.build_get(url);
        self.client.exec_request(request, |response| {
            let envelope: BsoEnvelope = parse_json(response)?;
            envelope
                .into_record(self.encrypter.as_ref())
                .ok_or_else(|| Error::RecordParseError(format!("record {} did not decrypt", id)))
        })
    }

    /// Fetch the records modified since `newer`. Envelopes that fail to
    /// parse or decrypt are dropped; a body that isn't a JSON array is
    /// an error.
    pub fn get_since(
        &self,
        newer: ServerTimestamp,
        order: Option<RequestOrder>,
        limit: Option<usize>,
        offset: Option<String>,
    ) -> Result<StorageResponse<Vec<Record<T>>>> {
        let mut request = CollectionRequest::new(&self.collection).full().newer_than(newer);
        if let Some(limit) = limit {
            request = request.limit(limit);
        }
        if let Some(offset) = offset {
            request = request.offset(offset);
        }
        if let Some(order) = order {
            request = request.sort_by(order);
        }
        self.fetch(&request)
    }

    /// The general form of a collection GET. The request names its own
    /// collection, so this can also serve `ids=`-style fetches built
    /// elsewhere.
    pub fn fetch(&self, request: &CollectionRequest) -> Result<StorageResponse<Vec<Record<T>>>> {
        let url = request.build_url(self.client.storage_url()?)?;
        let http_request = self.client.build_get(url);
        self.client.exec_request(http_request, |response| {
            let elements: Vec<serde_json::Value> = parse_json(response)?;
            let total = elements.len();
            let records: Vec<Record<T>> = elements
                .into_iter()
                .filter_map(|element| {
                    let envelope: BsoEnvelope = match serde_json::from_value(element) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            log::warn!("dropping malformed envelope: {}", e);
                            return None;
                        }
                    };
                    let id = envelope.id.clone();
                    let record = envelope.into_record(self.encrypter.as_ref());
                    if record.is_none() {
                        log::warn!("dropping record {} that did not decrypt", id);
                    }
                    record
                })
                .collect();
            if records.len() < total {
                log::info!(
                    "fetched {} records from {} ({} dropped)",
                    records.len(),
                    self.collection,
                    total - records.len()
                );
            }
            Ok(records)
        })
    }

    /// Upload a set of records in one newline-framed POST. Records the
    /// encrypter refuses are skipped; the batch layer is responsible
    /// for catching oversized records before they get here.
    pub fn post(
        &self,
        records: &[Record<T>],
        if_unmodified_since: Option<ServerTimestamp>,
    ) -> Result<StorageResponse<PostResponse>> {
        let lines: Vec<String> = records
            .iter()
            .filter_map(|record| {
                let line = self.serialize_record(record);
                if line.is_none() {
                    log::warn!("skipping record {} that did not serialize", record.id);
                }
                line
            })
            .collect();
        self.post_lines(&lines, if_unmodified_since, &[])
    }

    /// POST already-serialized lines, optionally with extra query
    /// parameters (the batch machinery's `batch`/`commit`).
    pub(crate) fn post_lines(
        &self,
        lines: &[String],
        if_unmodified_since: Option<ServerTimestamp>,
        query: &[(&str, &str)],
    ) -> Result<StorageResponse<PostResponse>> {
        let mut url = self.collection_url.clone();
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        let request = self.client.build_post_lines(url, lines, if_unmodified_since);
        self.client.exec_request(request, parse_json)
    }

    pub fn put(
        &self,
        record: &Record<T>,
        if_unmodified_since: Option<ServerTimestamp>,
    ) -> Result<StorageResponse<ServerTimestamp>> {
        let body = self.serialize_record(record).ok_or_else(|| {
            Error::RecordParseError(format!("record {} did not serialize", record.id))
        })?;
        let url = self.record_url(&record.id)?;
        let request = self.client.build_put(url, body, if_unmodified_since);
        self.client.exec_request(request, parse_timestamp_body)
    }

    pub fn delete_record(&self, id: &Guid) -> Result<StorageResponse<serde_json::Value>> {
        let url = self.record_url(id)?;
        let request = self.client.build_delete(url);
        self.client.exec_request(request, |response| {
            if response.body.is_empty() {
                Ok(serde_json::Value::Null)
            } else {
                parse_json(response)
            }
        })
    }

    /// Start accumulating records for a size-aware upload. The batch
    /// client is single-use: it consumes itself on commit.
    pub fn new_batch(&self) -> BatchClient<'_, T> {
        BatchClient::new(self)
    }
}

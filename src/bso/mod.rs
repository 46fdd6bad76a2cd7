/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The record envelope ("BSO") as it appears on the wire, and the typed
//! cleartext record the rest of the engine works with.
//!
//! On the wire a BSO looks like:
//! `{"id": "some-guid", "payload": "{\"title\": ...}"}` - note that
//! `payload` is a JSON *string* whose contents are themselves JSON
//! (normally ciphertext produced by the host's encrypter). We keep the
//! two layers separate: [`BsoEnvelope`] carries the opaque string,
//! [`Record`] carries the decrypted `T`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::guid::Guid;
use crate::server_timestamp::ServerTimestamp;

/// The wire envelope. `modified` is server-authoritative and never
/// uploaded; the optional fields are omitted entirely when absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BsoEnvelope {
    pub id: Guid,
    #[serde(default, skip_serializing)]
    pub modified: Option<ServerTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sortindex: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    pub payload: String,
}

impl BsoEnvelope {
    /// Decrypt into a typed record. `None` means the payload didn't
    /// decrypt or didn't parse; callers decide whether that's fatal.
    pub fn into_record<T>(self, encrypter: &dyn Encrypter<T>) -> Option<Record<T>> {
        let payload = encrypter.decrypt(&self.payload)?;
        Some(Record {
            id: self.id,
            payload,
            modified: self.modified,
            sortindex: self.sortindex,
            ttl: self.ttl,
        })
    }
}

/// A record with its cleartext payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    pub id: Guid,
    pub payload: T,
    pub modified: Option<ServerTimestamp>,
    pub sortindex: Option<i32>,
    pub ttl: Option<u32>,
}

impl<T> Record<T> {
    pub fn new(id: impl Into<Guid>, payload: T) -> Self {
        Record {
            id: id.into(),
            payload,
            modified: None,
            sortindex: None,
            ttl: None,
        }
    }

    pub fn with_sortindex(mut self, sortindex: i32) -> Self {
        self.sortindex = Some(sortindex);
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// The cryptographic seam, implemented by the host.
///
/// `encrypt` turns a cleartext record into the opaque payload string
/// for its envelope; `decrypt` reverses it. The engine treats the
/// strings as opaque UTF-8 - it only sizes, frames, and ships them.
/// Failures are `None` in both directions: an outgoing record that
/// won't encrypt is skipped or reported by the layer above, and an
/// incoming payload that won't decrypt is dropped.
pub trait Encrypter<T> {
    fn encrypt(&self, record: &Record<T>) -> Option<String>;
    fn decrypt(&self, payload: &str) -> Option<T>;
}

/// A passthrough encrypter: the cleartext payload JSON *is* the
/// envelope payload string. Used for unencrypted collections and
/// heavily by tests.
pub struct JsonEncrypter;

impl<T> Encrypter<T> for JsonEncrypter
where
    T: Serialize + DeserializeOwned,
{
    fn encrypt(&self, record: &Record<T>) -> Option<String> {
        serde_json::to_string(&record.payload).ok()
    }

    fn decrypt(&self, payload: &str) -> Option<T> {
        serde_json::from_str(payload).ok()
    }
}

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! A client-side engine for the Sync 1.5 storage protocol.
//!
//! The engine mediates between an application's local store and a
//! remote collection server holding encrypted, versioned records
//! ("BSOs") addressed by stable GUIDs. It covers the request pipeline
//! (authorization, conditional requests, response metadata, and
//! server-directed backoff), typed collection operations, and the
//! batch upload machinery with its plain multi-POST fallback.
//!
//! Three collaborators are deliberately left to the host: the
//! cryptographic envelope ([`Encrypter`]), request signing
//! ([`Authorizer`], normally HAWK over a tokenserver token), and the
//! HTTP stack itself ([`transport::Backend`]).

#![warn(rust_2018_idioms)]

mod bso;
mod client;
mod error;
mod guid;
mod record_types;
mod server_timestamp;
pub mod transport;

pub use bso::{BsoEnvelope, Encrypter, JsonEncrypter, Record};
pub use client::{
    Authorizer, BackoffState, BatchClient, CollectionClient, CollectionRequest, InfoCollections,
    InfoConfiguration, PostResponse, RequestOrder, ResponseMetadata, StorageClient,
    StorageResponse, MAX_PAYLOAD_ITEM_COUNT, MAX_PAYLOAD_SIZE_BYTES, MAX_RECORD_SIZE_BYTES,
};
pub use error::{Error, ErrorResponse, Result};
pub use guid::Guid;
pub use record_types::{CryptoKeysRecord, MetaGlobalEngine, MetaGlobalRecord};
pub use server_timestamp::ServerTimestamp;

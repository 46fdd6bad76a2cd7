/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The client half of the engine: request pipeline, storage-level and
//! collection-level operations, and the batch upload machinery.

mod backoff;
mod batch;
mod collection_client;
mod headers;
mod request;
mod storage_client;

pub use backoff::BackoffState;
pub use batch::{
    BatchClient, MAX_PAYLOAD_ITEM_COUNT, MAX_PAYLOAD_SIZE_BYTES, MAX_RECORD_SIZE_BYTES,
};
pub use collection_client::CollectionClient;
pub use headers::ResponseMetadata;
pub use request::{CollectionRequest, InfoConfiguration, PostResponse, RequestOrder};
pub use storage_client::{Authorizer, InfoCollections, StorageClient, StorageResponse};

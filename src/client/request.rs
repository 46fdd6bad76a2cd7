/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;
use crate::guid::Guid;
use crate::server_timestamp::ServerTimestamp;

/// The sort orders a collection GET can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrder {
    /// Most recently modified first.
    Newest,
    /// Least recently modified first.
    Oldest,
    /// Highest sortindex first.
    Index,
}

impl RequestOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestOrder::Newest => "newest",
            RequestOrder::Oldest => "oldest",
            RequestOrder::Index => "index",
        }
    }
}

impl fmt::Display for RequestOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A query over a collection, assembled with a consuming builder:
///
/// ```
/// # use weave_client::{CollectionRequest, RequestOrder, ServerTimestamp};
/// let request = CollectionRequest::new("bookmarks")
///     .full()
///     .newer_than(ServerTimestamp(1_600_000_000_000))
///     .limit(100)
///     .sort_by(RequestOrder::Oldest);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionRequest {
    pub collection: String,
    pub full: bool,
    pub ids: Option<Vec<Guid>>,
    pub older: Option<ServerTimestamp>,
    pub newer: Option<ServerTimestamp>,
    pub limit: Option<usize>,
    pub order: Option<RequestOrder>,
    pub offset: Option<String>,
}

impl CollectionRequest {
    pub fn new(collection: impl Into<String>) -> CollectionRequest {
        CollectionRequest {
            collection: collection.into(),
            ..Default::default()
        }
    }

    /// Fetch full records rather than just their ids.
    pub fn full(mut self) -> CollectionRequest {
        self.full = true;
        self
    }

    pub fn ids<V: Into<Guid>>(mut self, ids: impl IntoIterator<Item = V>) -> CollectionRequest {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn older_than(mut self, ts: ServerTimestamp) -> CollectionRequest {
        self.older = Some(ts);
        self
    }

    pub fn newer_than(mut self, ts: ServerTimestamp) -> CollectionRequest {
        self.newer = Some(ts);
        self
    }

    pub fn limit(mut self, n: usize) -> CollectionRequest {
        self.limit = Some(n);
        self
    }

    pub fn sort_by(mut self, order: RequestOrder) -> CollectionRequest {
        self.order = Some(order);
        self
    }

    pub fn offset(mut self, offset: impl Into<String>) -> CollectionRequest {
        self.offset = Some(offset.into());
        self
    }

    /// Build the request URL on top of `base` (the `.../storage` URL).
    pub(crate) fn build_url(&self, mut base: Url) -> Result<Url> {
        base.path_segments_mut()
            .map_err(|_| crate::error::Error::UnacceptableUrl("cannot be a base".into()))?
            .pop_if_empty()
            .push(&self.collection);
        let mut params: Vec<(&str, String)> = Vec::new();
        if self.full {
            params.push(("full", "1".into()));
        }
        if let Some(ids) = &self.ids {
            let joined = ids
                .iter()
                .map(Guid::as_str)
                .collect::<Vec<_>>()
                .join(",");
            params.push(("ids", joined));
        }
        if let Some(older) = self.older {
            params.push(("older", older.to_decimal_seconds_string()));
        }
        if let Some(newer) = self.newer {
            params.push(("newer", newer.to_decimal_seconds_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(offset) = &self.offset {
            params.push(("offset", offset.clone()));
        }
        if let Some(order) = self.order {
            params.push(("sort", order.as_str().into()));
        }
        if !params.is_empty() {
            base.query_pairs_mut().extend_pairs(params);
        }
        Ok(base)
    }
}

/// Limits declared by the server via `info/configuration`, immutable
/// for the rest of the sync session. Absent fields take the documented
/// server defaults. `max_total_records`/`max_total_bytes` bound a whole
/// batch; `max_post_records`/`max_post_bytes` bound one POST.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InfoConfiguration {
    pub max_request_bytes: usize,
    pub max_post_records: usize,
    pub max_post_bytes: usize,
    pub max_total_records: usize,
    pub max_total_bytes: usize,
}

impl Default for InfoConfiguration {
    fn default() -> InfoConfiguration {
        InfoConfiguration {
            max_request_bytes: 1_048_576,
            max_post_records: 100,
            max_post_bytes: 1_048_576,
            max_total_records: 10_000,
            max_total_bytes: 104_857_600,
        }
    }
}

/// The body of a successful upload POST.
///
/// `modified` is the server-authoritative collection timestamp;
/// `success` and `failed` partition the submitted ids (the server
/// guarantees they're disjoint). `batch` is the token granted by a
/// batching-capable server in response to `?batch=true`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostResponse {
    pub modified: ServerTimestamp,
    #[serde(default)]
    pub success: Vec<Guid>,
    #[serde(default)]
    pub failed: HashMap<Guid, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<String>,
}

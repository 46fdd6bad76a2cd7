/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The batch upload engine: pack an accumulated record set into
//! size-bounded chunks, then drive them to the server - as one POST,
//! as a server-side batch committed atomically, or as a sequence of
//! independent POSTs when the server can't batch.

use super::collection_client::CollectionClient;
use super::request::PostResponse;
use super::storage_client::StorageResponse;
use crate::bso::Record;
use crate::error::{Error, Result};
use crate::server_timestamp::ServerTimestamp;

/// The server rejects individual records above this size no matter
/// what `info/configuration` says.
pub const MAX_RECORD_SIZE_BYTES: usize = 262_140;
/// Hard ceiling on one POST body, counted as line bytes plus one per
/// line for the newline framing.
pub const MAX_PAYLOAD_SIZE_BYTES: usize = 1_000_000;
/// Hard ceiling on the number of records in one POST.
pub const MAX_PAYLOAD_ITEM_COUNT: usize = 100;

/// The output of the chunker: serialized lines grouped into chunks that
/// each fit in one POST, plus the totals the commit strategy needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Batches {
    pub chunks: Vec<Vec<String>>,
    pub total_bytes: usize,
    pub total_records: usize,
}

/// Serialize and pack `records` into POST-sized chunks.
///
/// Lines are sorted ascending by byte length before packing, so small
/// records fill chunks tightly and the largest end up with room of
/// their own; the packing is deterministic for a given input set, but
/// the original record order is not preserved.
pub(crate) fn batches_from_records<T>(
    records: &[Record<T>],
    serialize: impl Fn(&Record<T>) -> Option<String>,
) -> Result<Batches> {
    let mut decorated: Vec<(String, usize)> = Vec::with_capacity(records.len());
    let mut largest = 0;
    for record in records {
        match serialize(record) {
            None => {
                return Err(Error::RecordTooLarge {
                    guid: record.id.clone(),
                    size: largest,
                });
            }
            Some(line) => {
                let len = line.len();
                largest = largest.max(len);
                if len > MAX_RECORD_SIZE_BYTES {
                    return Err(Error::RecordTooLarge {
                        guid: record.id.clone(),
                        size: largest,
                    });
                }
                decorated.push((line, len));
            }
        }
    }

    decorated.sort_by_key(|&(_, len)| len);
    let total_bytes = decorated.iter().map(|&(_, len)| len).sum();
    let total_records = decorated.len();

    let mut chunks = Vec::new();
    let mut chunk: Vec<String> = Vec::new();
    let mut chunk_bytes = 0;
    for (line, len) in decorated {
        // The running total counts one byte per line for the newline
        // framing.
        let would_be = chunk_bytes + len + chunk.len() + 1;
        if !chunk.is_empty()
            && (would_be > MAX_PAYLOAD_SIZE_BYTES || chunk.len() >= MAX_PAYLOAD_ITEM_COUNT)
        {
            chunks.push(std::mem::take(&mut chunk));
            chunk_bytes = 0;
        }
        chunk_bytes += len;
        chunk.push(line);
    }
    if !chunk.is_empty() {
        chunks.push(chunk);
    }

    Ok(Batches {
        chunks,
        total_bytes,
        total_records,
    })
}

/// Accumulates records for one upload, then commits them. Single-use:
/// `commit` consumes the client.
pub struct BatchClient<'a, T> {
    coll: &'a CollectionClient<'a, T>,
    records: Vec<Record<T>>,
}

impl<'a, T> BatchClient<'a, T> {
    pub(crate) fn new(coll: &'a CollectionClient<'a, T>) -> BatchClient<'a, T> {
        BatchClient {
            coll,
            records: Vec::new(),
        }
    }

    pub fn add_records(&mut self, records: impl IntoIterator<Item = Record<T>>) {
        self.records.extend(records);
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Upload everything accumulated so far.
    ///
    /// `on_collection_uploaded` fires for each response the server
    /// considers a visible "collection modified" event: once with the
    /// single POST or the batch commit, or once per POST when the
    /// server can't batch. Returns the final response.
    pub fn commit(
        self,
        if_unmodified_since: Option<ServerTimestamp>,
        mut on_collection_uploaded: impl FnMut(&PostResponse),
    ) -> Result<StorageResponse<PostResponse>> {
        let batches =
            batches_from_records(&self.records, |record| self.coll.serialize_record(record))?;
        let config = self.coll.config();
        log::debug!(
            "committing {} records ({} bytes) to {} in {} chunk(s)",
            batches.total_records,
            batches.total_bytes,
            self.coll.collection(),
            batches.chunks.len()
        );

        // One chunk within the per-POST limits needs no batch protocol
        // at all. (A set within the configured POST limits can still
        // spill into a second chunk when the config exceeds the hard
        // payload ceiling; that goes through the batch path below.)
        if batches.chunks.len() <= 1
            && batches.total_records <= config.max_post_records
            && batches.total_bytes <= config.max_post_bytes
        {
            let lines = batches.chunks.first().map(Vec::as_slice).unwrap_or(&[]);
            let response = self.coll.post_lines(lines, if_unmodified_since, &[])?;
            on_collection_uploaded(&response.value);
            return Ok(response);
        }

        if batches.total_records <= config.max_total_records
            && batches.total_bytes <= config.max_total_bytes
        {
            return self.upload_batch(batches, if_unmodified_since, &mut on_collection_uploaded);
        }

        // TODO: span multiple server batches instead of refusing.
        Err(Error::MultiBatchUnsupported)
    }

    /// Drive the batch protocol: probe with the first chunk, then
    /// either ride the granted batch token through to an atomic
    /// commit, or fall back to independent POSTs.
    fn upload_batch(
        &self,
        batches: Batches,
        if_unmodified_since: Option<ServerTimestamp>,
        on_collection_uploaded: &mut dyn FnMut(&PostResponse),
    ) -> Result<StorageResponse<PostResponse>> {
        let chunks = batches.chunks;
        let count = chunks.len();

        let probe_query: &[(&str, &str)] = if count == 1 {
            // The only chunk doubles as the commit.
            &[("batch", "true"), ("commit", "true")]
        } else {
            &[("batch", "true")]
        };
        let probe = self
            .coll
            .post_lines(&chunks[0], if_unmodified_since, probe_query)?;

        let token = match &probe.value.batch {
            Some(token) => token.clone(),
            None => {
                // No token: the server doesn't batch. The probe already
                // landed chunk one, so upload the rest as plain POSTs,
                // each independently visible.
                log::debug!("server does not support batching; uploading chunks independently");
                on_collection_uploaded(&probe.value);
                let mut last = probe;
                for chunk in &chunks[1..] {
                    let response = self.coll.post_lines(chunk, if_unmodified_since, &[])?;
                    on_collection_uploaded(&response.value);
                    last = response;
                }
                return Ok(last);
            }
        };

        if count == 1 {
            // The probe carried commit=true; we're done.
            on_collection_uploaded(&probe.value);
            return Ok(probe);
        }

        log::debug!("server granted batch {}; {} chunk(s) to go", token, count - 1);
        for chunk in &chunks[1..count - 1] {
            // Intermediate responses aren't visible collection changes;
            // the pipeline has already taken their backoff headers.
            self.coll
                .post_lines(chunk, if_unmodified_since, &[("batch", token.as_str())])?;
        }

        let commit_response = self.coll.post_lines(
            &chunks[count - 1],
            if_unmodified_since,
            &[("batch", token.as_str()), ("commit", "true")],
        )?;
        on_collection_uploaded(&commit_response.value);
        Ok(commit_response)
    }
}

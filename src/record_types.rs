/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Cleartext payload shapes for the two records the storage client
//! itself understands: `meta/global` and `crypto/keys`. Everything else
//! is an opaque `T` chosen by the engine syncing that collection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::guid::Guid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetaGlobalEngine {
    pub version: usize,
    #[serde(rename = "syncID")]
    pub sync_id: Guid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetaGlobalRecord {
    #[serde(rename = "syncID")]
    pub sync_id: Guid,
    #[serde(rename = "storageVersion")]
    pub storage_version: usize,
    #[serde(default)]
    pub engines: HashMap<String, MetaGlobalEngine>,
    #[serde(default)]
    pub declined: Vec<String>,
}

/// The cleartext of the `crypto/keys` record: the default key pair and
/// per-collection overrides, all base64. Key material is opaque to us;
/// the host's encrypter is what actually uses it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CryptoKeysRecord {
    pub id: Guid,
    pub collection: String,
    pub default: [String; 2],
    #[serde(default)]
    pub collections: HashMap<String, [String; 2]>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_meta_global_wire_names() {
        let record: MetaGlobalRecord = serde_json::from_value(json!({
            "syncID": "sssssssssssn",
            "storageVersion": 5,
            "engines": {
                "bookmarks": { "version": 2, "syncID": "bbbbbbbbbbbn" },
            },
            "declined": ["forms"],
        }))
        .unwrap();
        assert_eq!(record.sync_id, "sssssssssssn");
        assert_eq!(record.storage_version, 5);
        assert_eq!(record.engines["bookmarks"].version, 2);
        assert_eq!(record.declined, vec!["forms".to_string()]);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["syncID"], "sssssssssssn");
        assert_eq!(value["storageVersion"], 5);
        assert_eq!(value["engines"]["bookmarks"]["syncID"], "bbbbbbbbbbbn");
    }

    #[test]
    fn test_meta_global_defaults() {
        let record: MetaGlobalRecord = serde_json::from_value(json!({
            "syncID": "sssssssssssn",
            "storageVersion": 5,
        }))
        .unwrap();
        assert!(record.engines.is_empty());
        assert!(record.declined.is_empty());
    }

    #[test]
    fn test_crypto_keys_roundtrip() {
        let record: CryptoKeysRecord = serde_json::from_value(json!({
            "id": "keys",
            "collection": "crypto",
            "default": ["ZGVmYXVsdC1lbmM=", "ZGVmYXVsdC1obWFj"],
            "collections": {
                "bookmarks": ["Ym9va21hcmtzLWVuYw==", "Ym9va21hcmtzLWhtYWM="],
            },
        }))
        .unwrap();
        assert_eq!(record.id, "keys");
        assert_eq!(record.default[0], "ZGVmYXVsdC1lbmM=");
        assert_eq!(record.collections["bookmarks"][1], "Ym9va21hcmtzLWhtYWM=");

        let reparsed: CryptoKeysRecord =
            serde_json::from_value(serde_json::to_value(&record).unwrap()).unwrap();
        assert_eq!(reparsed, record);
    }
}

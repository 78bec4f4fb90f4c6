//! Clipboard store (component D): `ClipboardItem` persistence with
//! encrypted-at-rest content and a TTL sweep.
//!
//! `content` is held internally as the envelope-codec textual form
//! (`b64(iv)|b64(ciphertext+tag)`) under a local, device-bound AEAD key
//! distinct from any transport session key (spec §9) — it survives process
//! restarts and is never transmitted. `get`/`items_flow` transparently
//! decrypt; a failed decryption returns the `"[Decryption Failed]"`
//! sentinel rather than erroring, so a row orphaned by a reset local key
//! cannot crash a caller that merely wants to list items.

use crate::crypto::{self, SESSION_KEY_LEN};
use crate::envelope;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

pub const DECRYPTION_FAILED_SENTINEL: &str = "[Decryption Failed]";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContentType {
    Text,
    Image,
    File,
}

/// A clipboard row with plaintext `content` — the shape callers work with.
/// The store itself persists `content` encrypted; this type never touches
/// disk directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipboardItem {
    pub id: Uuid,
    pub content: String,
    pub content_type: ContentType,
    pub timestamp: i64,
    pub ttl: i64,
    pub synced: bool,
    pub source_device_id: Option<Uuid>,
    pub hash: String,
}

impl ClipboardItem {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.timestamp + self.ttl
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct StoredRow {
    content_envelope: String,
    content_type: ContentType,
    timestamp: i64,
    ttl: i64,
    synced: bool,
    source_device_id: Option<Uuid>,
    hash: String,
}

/// On-disk form of a single row — `StoredRow` plus the id a `HashMap` key
/// would otherwise lose on serialization. Mirrors `trust.rs::FileTrustStore`'s
/// "serialize the whole table as a JSON array" persistence, the nearest
/// corpus precedent for the `clipboard_items` table (spec §6).
#[derive(Serialize, Deserialize)]
struct PersistedRow {
    id: Uuid,
    #[serde(flatten)]
    row: StoredRow,
}

pub struct ClipboardStore {
    local_key: [u8; SESSION_KEY_LEN],
    rows: Mutex<HashMap<Uuid, StoredRow>>,
    items_tx: watch::Sender<Vec<ClipboardItem>>,
    unsynced_tx: watch::Sender<Vec<ClipboardItem>>,
    persist_path: Option<PathBuf>,
}

impl ClipboardStore {
    /// In-memory only — content survives for the life of the process, never
    /// written to disk. Used by tests and by any caller that doesn't need
    /// the offline queue to survive a restart.
    pub fn new(local_key: [u8; SESSION_KEY_LEN]) -> Self {
        let (items_tx, _) = watch::channel(Vec::new());
        let (unsynced_tx, _) = watch::channel(Vec::new());
        Self {
            local_key,
            rows: Mutex::new(HashMap::new()),
            items_tx,
            unsynced_tx,
            persist_path: None,
        }
    }

    /// File-backed: the `clipboard_items` table of spec §6, write-through
    /// so every mutation is durable before the call returns. `content` on
    /// disk is always the envelope-codec ciphertext under `local_key` —
    /// never plaintext — so the file alone cannot be read without it.
    pub fn open(path: PathBuf, local_key: [u8; SESSION_KEY_LEN]) -> anyhow::Result<Self> {
        let rows = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let persisted: Vec<PersistedRow> = serde_json::from_str(&data)?;
            persisted.into_iter().map(|p| (p.id, p.row)).collect()
        } else {
            HashMap::new()
        };

        let (items_tx, _) = watch::channel(Vec::new());
        let (unsynced_tx, _) = watch::channel(Vec::new());
        let store = Self {
            local_key,
            rows: Mutex::new(rows),
            items_tx,
            unsynced_tx,
            persist_path: Some(path),
        };
        store.publish();
        Ok(store)
    }

    fn flush(&self) {
        let Some(path) = &self.persist_path else { return };
        let persisted: Vec<PersistedRow> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|(id, row)| PersistedRow { id: *id, row: row.clone() })
            .collect();

        let result = (|| -> anyhow::Result<()> {
            let data = serde_json::to_string_pretty(&persisted)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, data)?;
            Ok(())
        })();
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to flush clipboard store to disk");
        }
    }

    /// Upsert by `id`. `item.content` is the plaintext; it is sealed with
    /// the local key before it ever reaches the map.
    pub fn put(&self, item: ClipboardItem) {
        let (iv, ct) = crypto::encrypt(&self.local_key, item.content.as_bytes());
        let row = StoredRow {
            content_envelope: envelope::encode_envelope(&iv, &ct),
            content_type: item.content_type,
            timestamp: item.timestamp,
            ttl: item.ttl,
            synced: item.synced,
            source_device_id: item.source_device_id,
            hash: item.hash,
        };
        self.rows.lock().unwrap().insert(item.id, row);
        self.flush();
        self.publish();
    }

    pub fn get(&self, id: Uuid) -> Option<ClipboardItem> {
        let rows = self.rows.lock().unwrap();
        rows.get(&id).map(|row| self.decrypt_row(id, row))
    }

    /// Latest snapshot, newest first.
    pub fn items_flow(&self) -> watch::Receiver<Vec<ClipboardItem>> {
        self.items_tx.subscribe()
    }

    /// Latest snapshot where `synced == false`, oldest first.
    pub fn unsynced_flow(&self) -> watch::Receiver<Vec<ClipboardItem>> {
        self.unsynced_tx.subscribe()
    }

    /// The device-bound local AEAD key (spec §9) — distinct from any
    /// transport session key. The sync engine falls back to it when a
    /// transport has no active session key (spec §4.J outbound step 6,
    /// inbound step 2); production connections always have a session key
    /// once the handshake completes.
    pub fn local_key(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.local_key
    }

    pub fn mark_synced(&self, id: Uuid) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.synced = true;
        }
        self.flush();
        self.publish();
    }

    pub fn delete(&self, id: Uuid) -> bool {
        let removed = self.rows.lock().unwrap().remove(&id).is_some();
        if removed {
            self.flush();
            self.publish();
        }
        removed
    }

    /// Delete rows past their TTL as of `now`; returns the count deleted.
    pub fn sweep(&self, now: i64) -> usize {
        let mut rows = self.rows.lock().unwrap();
        let expired: Vec<Uuid> = rows
            .iter()
            .filter(|(_, row)| now >= row.timestamp + row.ttl)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            rows.remove(id);
        }
        let count = expired.len();
        drop(rows);
        if count > 0 {
            self.flush();
            self.publish();
        }
        count
    }

    fn decrypt_row(&self, id: Uuid, row: &StoredRow) -> ClipboardItem {
        let content = envelope::decode_envelope(&row.content_envelope)
            .and_then(|(iv, ct)| crypto::decrypt(&self.local_key, &iv, &ct).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| DECRYPTION_FAILED_SENTINEL.to_string());

        ClipboardItem {
            id,
            content,
            content_type: row.content_type,
            timestamp: row.timestamp,
            ttl: row.ttl,
            synced: row.synced,
            source_device_id: row.source_device_id,
            hash: row.hash.clone(),
        }
    }

    fn publish(&self) {
        let rows = self.rows.lock().unwrap();
        let mut items: Vec<ClipboardItem> = rows.iter().map(|(id, row)| self.decrypt_row(*id, row)).collect();
        drop(rows);

        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let _ = self.items_tx.send(items.clone());

        let mut unsynced: Vec<ClipboardItem> = items.into_iter().filter(|i| !i.synced).collect();
        unsynced.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let _ = self.unsynced_tx.send(unsynced);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(content: &str, ts: i64, ttl: i64, synced: bool) -> ClipboardItem {
        ClipboardItem {
            id: Uuid::new_v4(),
            content: content.into(),
            content_type: ContentType::Text,
            timestamp: ts,
            ttl,
            synced,
            source_device_id: None,
            hash: crypto::sha256_hex_upper(content.as_bytes()),
        }
    }

    fn store() -> ClipboardStore {
        ClipboardStore::new(crypto::fresh_session_key())
    }

    #[test]
    fn put_then_get_round_trips_plaintext() {
        let s = store();
        let it = item("hello", 1000, 60_000, false);
        let id = it.id;
        s.put(it.clone());
        let got = s.get(id).unwrap();
        assert_eq!(got.content, "hello");
        assert_eq!(got, it);
    }

    #[test]
    fn get_missing_returns_none() {
        let s = store();
        assert!(s.get(Uuid::new_v4()).is_none());
    }

    #[test]
    fn decryption_failure_returns_sentinel_not_error() {
        let s1 = store();
        let it = item("secret", 1000, 60_000, false);
        let id = it.id;
        s1.put(it);

        // Simulate a reset local key by wrapping the same ciphertext bytes
        // in a fresh store with a different key.
        let s2 = store();
        let row = s1.rows.lock().unwrap().remove(&id).unwrap();
        s2.rows.lock().unwrap().insert(id, row);
        let got = s2.get(id).unwrap();
        assert_eq!(got.content, DECRYPTION_FAILED_SENTINEL);
    }

    #[test]
    fn mark_synced_flips_flag() {
        let s = store();
        let it = item("x", 1000, 60_000, false);
        let id = it.id;
        s.put(it);
        s.mark_synced(id);
        assert!(s.get(id).unwrap().synced);
    }

    #[test]
    fn delete_removes_row() {
        let s = store();
        let it = item("x", 1000, 60_000, false);
        let id = it.id;
        s.put(it);
        assert!(s.delete(id));
        assert!(!s.delete(id));
        assert!(s.get(id).is_none());
    }

    #[test]
    fn sweep_deletes_only_expired_rows() {
        let s = store();
        let fresh = item("fresh", 1_000, 10_000, false);
        let stale = item("stale", 1_000, 500, false);
        s.put(fresh.clone());
        s.put(stale.clone());

        let deleted = s.sweep(2_000);
        assert_eq!(deleted, 1);
        assert!(s.get(fresh.id).is_some());
        assert!(s.get(stale.id).is_none());
    }

    #[test]
    fn items_flow_orders_newest_first() {
        let s = store();
        let older = item("older", 1_000, 60_000, false);
        let newer = item("newer", 2_000, 60_000, false);
        s.put(older);
        s.put(newer.clone());

        let snapshot = s.items_flow().borrow().clone();
        assert_eq!(snapshot[0].id, newer.id);
    }

    #[test]
    fn unsynced_flow_excludes_synced_and_orders_oldest_first() {
        let s = store();
        let a = item("a", 1_000, 60_000, false);
        let b = item("b", 2_000, 60_000, false);
        let c = item("c", 3_000, 60_000, true);
        s.put(a.clone());
        s.put(b.clone());
        s.put(c);

        let snapshot = s.unsynced_flow().borrow().clone();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, a.id);
        assert_eq!(snapshot[1].id, b.id);
    }

    #[test]
    fn file_backed_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clipboard_items.json");
        let key = crypto::fresh_session_key();

        let it = item("persisted", 1_000, 60_000, false);
        let id = it.id;
        {
            let s = ClipboardStore::open(path.clone(), key).unwrap();
            s.put(it.clone());
            s.mark_synced(id);
        }

        let s2 = ClipboardStore::open(path, key).unwrap();
        let got = s2.get(id).unwrap();
        assert_eq!(got.content, "persisted");
        assert!(got.synced);
    }

    #[test]
    fn file_backed_store_open_on_missing_path_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist_yet.json");
        let s = ClipboardStore::open(path, crypto::fresh_session_key()).unwrap();
        assert!(s.items_flow().borrow().is_empty());
    }

    #[test]
    fn file_backed_store_sweep_persists_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clipboard_items.json");
        let key = crypto::fresh_session_key();

        let stale = item("stale", 1_000, 500, false);
        let id = stale.id;
        {
            let s = ClipboardStore::open(path.clone(), key).unwrap();
            s.put(stale);
            s.sweep(2_000);
        }

        let s2 = ClipboardStore::open(path, key).unwrap();
        assert!(s2.get(id).is_none());
    }
}

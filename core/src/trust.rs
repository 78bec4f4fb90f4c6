//! Trust store: the paired-device registry that anchors the pinning
//! validator (4.F). `list_trusted` must be callable synchronously from the
//! middle of a TLS handshake, so every implementation here serves it from
//! an in-memory cache rather than touching disk per call.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use uuid::Uuid;

/// A paired peer. `certificateFingerprint` is the pinned TLS leaf
/// fingerprint; `publicKey` is the peer's long-term RSA public key
/// (SubjectPublicKeyInfo, base64).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    pub public_key: String,
    pub certificate_fingerprint: String,
    pub last_seen: i64,
    pub is_trusted: bool,
    pub fallback_address: Option<String>,
}

pub trait TrustStore: Send + Sync {
    fn insert(&self, device: Device) -> anyhow::Result<()>;
    fn update(&self, device: Device) -> anyhow::Result<()>;
    fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
    fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<Device>>;
    fn list(&self) -> anyhow::Result<Vec<Device>>;

    /// Synchronous, non-suspending: the set of pinned fingerprints for
    /// devices currently marked trusted. Called from inside the TLS
    /// handshake (4.F) — implementations must serve this from memory.
    fn list_trusted(&self) -> Vec<String>;

    fn touch(&self, id: Uuid, ts: i64) -> anyhow::Result<()> {
        if let Some(mut device) = self.get_by_id(id)? {
            device.last_seen = ts;
            self.update(device)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTrustStore {
    devices: RwLock<HashMap<Uuid, Device>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrustStore for MemoryTrustStore {
    fn insert(&self, device: Device) -> anyhow::Result<()> {
        self.devices.write().unwrap().insert(device.id, device);
        Ok(())
    }

    fn update(&self, device: Device) -> anyhow::Result<()> {
        self.devices.write().unwrap().insert(device.id, device);
        Ok(())
    }

    fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.devices.write().unwrap().remove(&id).is_some())
    }

    fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<Device>> {
        Ok(self.devices.read().unwrap().get(&id).cloned())
    }

    fn list(&self) -> anyhow::Result<Vec<Device>> {
        Ok(self.devices.read().unwrap().values().cloned().collect())
    }

    fn list_trusted(&self) -> Vec<String> {
        self.devices
            .read()
            .unwrap()
            .values()
            .filter(|d| d.is_trusted)
            .map(|d| d.certificate_fingerprint.clone())
            .collect()
    }
}

/// File-backed trust store (JSON array of [`Device`]), mirroring
/// `paired_devices` from the persistent state layout (spec §6). Writes go
/// through an in-memory cache with write-through to disk so reads — and in
/// particular `list_trusted` — never touch the filesystem.
pub struct FileTrustStore {
    path: PathBuf,
    cache: RwLock<HashMap<Uuid, Device>>,
}

impl FileTrustStore {
    pub fn new(path: PathBuf) -> anyhow::Result<Self> {
        let cache = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let devices: Vec<Device> = serde_json::from_str(&data)?;
            devices.into_iter().map(|d| (d.id, d)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    fn flush(&self) -> anyhow::Result<()> {
        let devices: Vec<Device> = self.cache.read().unwrap().values().cloned().collect();
        let data = serde_json::to_string_pretty(&devices)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}

impl TrustStore for FileTrustStore {
    fn insert(&self, device: Device) -> anyhow::Result<()> {
        self.cache.write().unwrap().insert(device.id, device);
        self.flush()
    }

    fn update(&self, device: Device) -> anyhow::Result<()> {
        self.cache.write().unwrap().insert(device.id, device);
        self.flush()
    }

    fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let removed = self.cache.write().unwrap().remove(&id).is_some();
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<Device>> {
        Ok(self.cache.read().unwrap().get(&id).cloned())
    }

    fn list(&self) -> anyhow::Result<Vec<Device>> {
        Ok(self.cache.read().unwrap().values().cloned().collect())
    }

    fn list_trusted(&self) -> Vec<String> {
        self.cache
            .read()
            .unwrap()
            .values()
            .filter(|d| d.is_trusted)
            .map(|d| d.certificate_fingerprint.clone())
            .collect()
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

//! clipbridge_core
//!
//! Pairing, transport, session handshake, and sync-engine primitives for
//! bridging a mobile device's clipboard to a paired PC: decode a QR trust
//! anchor, open a fingerprint-pinned transport, establish a per-connection
//! AEAD session key, and keep clipboard text flowing in both directions
//! with loop suppression and an offline TTL queue.

pub mod clipboard;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod history;
pub mod pairing;
pub mod pinning;
pub mod protocol;
pub mod session;
pub mod sweeper;
pub mod sync;
pub mod transport;
pub mod transport_serial;
pub mod transport_ws;
pub mod trust;

pub use clipboard::{ClipboardAdapter, ClipboardContent, MockClipboard};
pub use config::Config;
pub use error::{ClipError, ClipResult};
pub use history::{ClipboardItem, ClipboardStore, ContentType};
pub use pairing::{Associator, NoopAssociator, PairingManager, QrPayload};
pub use pinning::PinningVerifier;
pub use sync::{NoopNotifier, Notifier, SyncEngine};
pub use transport::{ConnectionState, OutboundTransport, StaticKeyedTransport, TextConnection};
pub use transport_ws::{PrimaryTransport, TlsIdentity};
pub use trust::{Device, FileTrustStore, MemoryTrustStore, TrustStore};

//! Manylla encrypted sync
//!
//! Keeps a family's profile data in step across devices through an
//! untrusted blob server, and hands out read-only share links.
//!
//! ## Pieces
//!
//! - [`session::SyncSession`]: enable, join, push, pull, disable, polling
//! - [`invite`]: short `XXXX-XXXX` codes that stand in for a recovery phrase
//! - [`share`]: per-recipient encrypted links with the key in the fragment
//! - [`remote`]: the blob server API (`/sync/{id}`, `/share`)
//! - [`credentials`]: what a device remembers between runs

pub mod blob;
pub mod credentials;
pub mod error;
pub mod invite;
pub mod poller;
pub mod remote;
pub mod session;
pub mod share;

pub use credentials::{
    CredentialStore, DEVICE_KEY_FILE, FileCredentialStore, MemoryCredentialStore,
    StoredCredentials, device_key_in,
};
pub use error::{SyncError, SyncErrorKind};
pub use invite::{InviteCode, InviteCodeStore, InviteLink};
pub use remote::{HttpRemote, RemoteConfig, RemoteError, RemoteStore, ShareStore};
pub use session::{EnabledSync, Invite, SessionConfig, SyncEvent, SyncSession, SyncStatus};
pub use share::{RecipientType, ShareLink, ShareLinkBuilder, ShareOptions, SharedProfile};

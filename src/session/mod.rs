//! Session identity management.
//!
//! A browsing context is identified by a [`SessionId`] that lives in
//! client-held state (a cookie in production). The core only talks to that
//! state through the [`SessionTokenStore`] capability.
//!
//! # Architecture
//!
//! - [`IdentityManager`]: get-or-create and invalidate over a token store
//! - [`MemoryTokenStore`]: in-process store for tests and tooling
//! - [`CookieTokenStore`]: per-request cookie jar adapter
//!
//! # Example
//!
//! ```rust
//! use persistent_chat::session::{IdentityManager, MemoryTokenStore};
//!
//! # tokio_test_block_on(async {
//! let tokens = MemoryTokenStore::new();
//! let identity = IdentityManager::new(&tokens);
//!
//! let id = identity.get_or_create().await.unwrap();
//! assert_eq!(id, identity.get_or_create().await.unwrap());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

mod identity;
mod jar;

pub use identity::{
    DEFAULT_TOKEN_MAX_AGE, IdentityManager, IdentityPersistenceError, MemoryTokenStore, SessionId,
    SessionTokenStore,
};
pub use jar::CookieTokenStore;

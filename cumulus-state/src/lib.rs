//! Cumulus State Management
//!
//! Persists the state of managed resources between runs, with locking so that
//! two runs never modify the same state at once.
//!
//! - **StateFile**: all managed resources, versioned by `serial` and `lineage`
//! - **StateBackend**: storage for the state file and its lock
//! - **LockInfo**: who holds the lock and until when
//!
//! # Example
//!
//! ```ignore
//! use cumulus_state::{create_backend, BackendConfig};
//!
//! let backend = create_backend(&BackendConfig::local("cumulus.state.json"))?;
//!
//! let lock = backend.acquire_lock("apply").await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//! // ... modify resources ...
//! backend.write_state(&mut state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::LockInfo;
pub use state::{ResourceState, StateFile};

//! Cumulus Core
//!
//! Provider-agnostic model for declarative infrastructure: resources and their
//! state, schemas, polling helpers, and the plan/apply pipeline.

pub mod cidr;
pub mod differ;
pub mod effect;
pub mod interpreter;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod sync;

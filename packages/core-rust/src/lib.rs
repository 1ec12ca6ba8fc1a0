//! `LeanEngine` core: object model, wire codec, query DSL and the remote
//! store client used by cloud functions.

pub mod client;
pub mod codec;
pub mod condition;
pub mod config;
pub mod error;
pub mod query;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Class, Client, ObjectRef, RefTarget, UserRef, Users};
pub use config::ClientConfig;
pub use error::{CodecError, Error, Result};
pub use query::{Query, QueryTarget};
pub use store::{AuthOption, HttpStore, Method, RemoteStore, StoreError, StoreRequest};
pub use types::{GeoPoint, Object, User, Value, USER_CLASS};

//! LeanEngine server: an HTTP gateway that runs registered cloud functions
//! and class hooks on behalf of the LeanCloud platform.

pub mod auth;
pub mod network;
pub mod service;

pub use auth::{CredentialHeaders, CredentialSet, Verifier};
pub use network::{NetworkConfig, NetworkModule, TlsConfig};
pub use service::{
    ClassHook, Dispatcher, FunctionError, FunctionOptions, FunctionRegistry,
    FunctionRegistryBuilder, FunctionRequest, FunctionResult, ServerConfig, UserResolver,
};

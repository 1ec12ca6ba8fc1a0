//! Cloud function registration and invocation.
//!
//! 1. **Registry** (`registry`): functions and class hooks, sealed at startup
//! 2. **Dispatch** (`dispatch`): path classification, credential tiers, envelopes
//! 3. **Middleware** (`middleware`): Tower layers (load shedding, timeout, metrics)
//! 4. **Executor** (`executor`): runs the handler on its own task

pub mod config;
pub mod dispatch;
pub mod executor;
pub mod invocation;
pub mod middleware;
pub mod registry;

pub use config::ServerConfig;
pub use dispatch::{CallKind, Dispatcher, InboundCall, UserResolver};
pub use executor::FunctionExecutor;
pub use invocation::{
    DispatchError, FunctionError, FunctionRequest, FunctionResult, Invocation,
    InvocationContext, RequestMeta,
};
pub use registry::{
    ClassHook, CloudFunction, FunctionDescriptor, FunctionOptions, FunctionRegistry,
    FunctionRegistryBuilder, RegistryError,
};

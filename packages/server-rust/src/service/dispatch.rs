//! Authenticated dispatch of inbound function calls.
//!
//! A call moves through `received -> authenticated -> envelope-built ->
//! executing -> completed | failed | timed-out`:
//!
//! 1. [`CallKind::parse`] classifies the request path.
//! 2. The caller's credentials are checked against the descriptor's tier.
//! 3. A [`FunctionRequest`] is built, resolving the session user if asked.
//! 4. The invocation runs through the pipeline (load shed, metrics, deadline).
//! 5. The handler's value is shaped according to the call kind.

use std::sync::Arc;

use async_trait::async_trait;
use lean_core::codec::{decode_object, decode_user, decode_value, encode_fields, encode_value, to_plain_json};
use lean_core::{Client, User, Value};
use serde_json::json;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use super::config::ServerConfig;
use super::invocation::{DispatchError, FunctionRequest, Invocation, RequestMeta};
use super::middleware::{build_invocation_pipeline, InvocationPipeline};
use super::registry::{ClassHook, FunctionDescriptor, FunctionRegistry};
use crate::auth::{CredentialHeaders, Verifier};

// ---------------------------------------------------------------------------
// CallKind
// ---------------------------------------------------------------------------

/// What an inbound path asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    /// `/<v>/functions/<name>`
    Function { name: String },
    /// `/<v>/call/<name>`
    Rpc { name: String },
    /// `/<v>/functions/<Class>/<hook>`
    ClassHook { class_name: String, hook: ClassHook },
    /// `/<v>/functions/_ops/metadatas`
    Metadata,
}

impl CallKind {
    /// Parses a request path. `<v>` is `1` or `1.1`; anything else, an empty
    /// name or an unknown hook yields `None`.
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.strip_prefix('/')?.split('/').collect();
        let (version, rest) = segments.split_first()?;
        if !matches!(*version, "1" | "1.1") {
            return None;
        }
        match rest {
            ["functions", "_ops", "metadatas"] => Some(Self::Metadata),
            ["functions", name] if !name.is_empty() => Some(Self::Function {
                name: (*name).to_string(),
            }),
            ["functions", class_name, hook] if !class_name.is_empty() => {
                Some(Self::ClassHook {
                    class_name: (*class_name).to_string(),
                    hook: ClassHook::from_path_segment(hook)?,
                })
            }
            ["call", name] if !name.is_empty() => Some(Self::Rpc {
                name: (*name).to_string(),
            }),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Function { .. } => "function",
            Self::Rpc { .. } => "rpc",
            Self::ClassHook { .. } => "hook",
            Self::Metadata => "metadata",
        }
    }
}

// ---------------------------------------------------------------------------
// UserResolver
// ---------------------------------------------------------------------------

/// Turns a session token into the user that owns it.
#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn resolve(&self, session_token: &str) -> Result<User, lean_core::Error>;
}

#[async_trait]
impl UserResolver for Client {
    async fn resolve(&self, session_token: &str) -> Result<User, lean_core::Error> {
        self.users().become_user(session_token).await
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// A parsed inbound call.
#[derive(Debug, Clone)]
pub struct InboundCall {
    pub kind: CallKind,
    pub headers: CredentialHeaders,
    /// Parsed JSON body; `None` when the body was empty.
    pub body: Option<serde_json::Value>,
    pub remote_addr: String,
    pub request_id: String,
}

/// Routes authenticated calls to registered functions.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
    verifier: Verifier,
    resolver: Option<Arc<dyn UserResolver>>,
    pipeline: InvocationPipeline,
    timeout_ms: u64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("functions", &self.registry.len())
            .field("timeout_ms", &self.timeout_ms)
            .field("resolves_users", &self.resolver.is_some())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: FunctionRegistry, verifier: Verifier, config: &ServerConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            verifier,
            resolver: None,
            pipeline: build_invocation_pipeline(config),
            timeout_ms: config.function_timeout_ms,
        }
    }

    /// Sets the resolver consulted for functions that fetch the session user.
    #[must_use]
    pub fn with_user_resolver(mut self, resolver: Arc<dyn UserResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Runs one call to completion and returns the response document.
    ///
    /// # Errors
    ///
    /// Any [`DispatchError`]; each failure is logged once here.
    pub async fn dispatch(&self, call: InboundCall) -> Result<serde_json::Value, DispatchError> {
        let kind = call.kind.label();
        let request_id = call.request_id.clone();
        let result = match call.kind.clone() {
            CallKind::Metadata => self.metadata(&call),
            CallKind::Function { name } => self.invoke_function(&name, false, call).await,
            CallKind::Rpc { name } => self.invoke_function(&name, true, call).await,
            CallKind::ClassHook { class_name, hook } => {
                self.invoke_hook(&class_name, hook, call).await
            }
        };
        if let Err(err) = &result {
            log_failure(kind, &request_id, err);
        }
        result
    }

    fn metadata(&self, call: &InboundCall) -> Result<serde_json::Value, DispatchError> {
        if !self.verifier.validate_master_key(&call.headers) {
            return Err(unauthorized("Master Key check failed", call));
        }
        Ok(json!({ "result": self.registry.names() }))
    }

    async fn invoke_function(
        &self,
        name: &str,
        rpc: bool,
        call: InboundCall,
    ) -> Result<serde_json::Value, DispatchError> {
        let descriptor = self.lookup(name)?;
        self.authorize_function(&descriptor, &call)?;

        let mut request = self.envelope(&descriptor, &call).await?;
        request.params = match call.body {
            None => Value::Null,
            Some(body) if rpc => decode_value(&body)?,
            Some(body) => Value::from(body),
        };

        let kind = if rpc { "rpc" } else { "function" };
        let value = self.execute(&descriptor, kind, &call.request_id, request).await?;
        Ok(if rpc {
            json!({ "result": encode_value(&value, true) })
        } else {
            json!({ "result": to_plain_json(&value) })
        })
    }

    async fn invoke_hook(
        &self,
        class_name: &str,
        hook: ClassHook,
        call: InboundCall,
    ) -> Result<serde_json::Value, DispatchError> {
        if !self.verifier.validate_hook_key(&call.headers) {
            return Err(unauthorized("Hook key check failed", &call));
        }
        let descriptor = self.lookup(&hook.function_name(class_name))?;

        let mut request = self.envelope(&descriptor, &call).await?;
        if let Some(body) = &call.body {
            if let Some(object) = body.get("object") {
                request.object = Some(decode_object(object, class_name)?);
            }
            if request.current_user.is_none() {
                if let Some(user) = body.get("user").filter(|u| u.is_object()) {
                    request.current_user = Some(decode_user(user)?);
                }
            }
            request.params = Value::from(body.clone());
        }

        let value = self.execute(&descriptor, "hook", &call.request_id, request).await?;
        if hook == ClassHook::BeforeSave {
            return before_save_patch(value);
        }
        Ok(json!({ "result": "ok" }))
    }

    fn lookup(&self, name: &str) -> Result<Arc<FunctionDescriptor>, DispatchError> {
        self.registry
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound {
                name: name.to_string(),
            })
    }

    /// Tier gate for direct and RPC calls.
    fn authorize_function(
        &self,
        descriptor: &FunctionDescriptor,
        call: &InboundCall,
    ) -> Result<(), DispatchError> {
        let headers = &call.headers;
        if descriptor.options.hook && !self.verifier.validate_hook_key(headers) {
            return Err(unauthorized("Hook key check failed", call));
        }
        if descriptor.options.internal
            && !self.verifier.validate_master_key(headers)
            && !self.verifier.validate_hook_key(headers)
        {
            let signature = self.verifier.validate_signature(headers);
            if !(signature.master && signature.pass) {
                return Err(unauthorized("Internal cloud function", call));
            }
        }
        if !self.verifier.validate_app_key(headers)
            && !self.verifier.validate_master_key(headers)
            && !self.verifier.validate_signature(headers).pass
        {
            return Err(unauthorized("App key check failed", call));
        }
        Ok(())
    }

    async fn envelope(
        &self,
        descriptor: &FunctionDescriptor,
        call: &InboundCall,
    ) -> Result<FunctionRequest, DispatchError> {
        let mut request = FunctionRequest::new(Value::Null);
        request.meta = RequestMeta {
            remote_addr: call.remote_addr.clone(),
        };

        if let (true, Some(token)) = (descriptor.options.fetch_user, &call.headers.session) {
            match &self.resolver {
                Some(resolver) => {
                    let user = resolver
                        .resolve(token)
                        .await
                        .map_err(DispatchError::UserResolution)?;
                    request.current_user = Some(user);
                }
                None => debug!(function = %descriptor.name, "no user resolver; session left unresolved"),
            }
            request.session_token = Some(token.clone());
        }
        Ok(request)
    }

    async fn execute(
        &self,
        descriptor: &FunctionDescriptor,
        kind: &'static str,
        request_id: &str,
        request: FunctionRequest,
    ) -> Result<Value, DispatchError> {
        let invocation = Invocation::new(
            request_id,
            descriptor.name.clone(),
            kind,
            self.timeout_ms,
            Arc::clone(&descriptor.handler),
            request,
        );
        self.pipeline.clone().oneshot(invocation).await
    }
}

fn unauthorized(reason: &str, call: &InboundCall) -> DispatchError {
    DispatchError::Unauthorized {
        reason: format!("{reason}, request from {}", call.remote_addr),
    }
}

/// A `beforeSave` hook answers with the fields to store. `Null` means no
/// changes.
fn before_save_patch(value: Value) -> Result<serde_json::Value, DispatchError> {
    let fields = match value {
        Value::Object(object) => encode_fields(&object.fields, false),
        Value::Map(map) => encode_fields(&map, false),
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(DispatchError::Internal(anyhow::anyhow!(
                "beforeSave hook must return an object, got {other:?}"
            )))
        }
    };
    Ok(serde_json::Value::Object(fields))
}

fn log_failure(kind: &'static str, request_id: &str, err: &DispatchError) {
    match err {
        DispatchError::Unauthorized { .. } | DispatchError::NotFound { .. } => {
            debug!(kind, request_id, error = %err, "call rejected");
        }
        DispatchError::Function { code, .. } => {
            info!(kind, request_id, code, error = %err, "function returned an error");
        }
        DispatchError::Timeout { .. } | DispatchError::Overloaded => {
            warn!(kind, request_id, error = %err, "call not completed");
        }
        DispatchError::Decode(_)
        | DispatchError::UserResolution(_)
        | DispatchError::Internal(_) => {
            error!(kind, request_id, error = %err, "call failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

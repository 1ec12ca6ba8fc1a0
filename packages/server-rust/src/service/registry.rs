use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::invocation::{FunctionRequest, FunctionResult};

// ---------------------------------------------------------------------------
// CloudFunction
// ---------------------------------------------------------------------------

/// A remotely callable handler.
///
/// Implemented for every `Fn(FunctionRequest) -> impl Future<Output =
/// FunctionResult>` closure, so most handlers are plain async closures.
pub trait CloudFunction: Send + Sync + 'static {
    fn call(&self, request: FunctionRequest) -> BoxFuture<'static, FunctionResult>;
}

impl<F, Fut> CloudFunction for F
where
    F: Fn(FunctionRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FunctionResult> + Send + 'static,
{
    fn call(&self, request: FunctionRequest) -> BoxFuture<'static, FunctionResult> {
        Box::pin(self(request))
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Declared options of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionOptions {
    /// Resolve the caller's session into `current_user`.
    pub fetch_user: bool,
    /// Only callable with the hook key.
    pub hook: bool,
    /// Only callable with the master key, hook key or a master signature.
    pub internal: bool,
}

impl Default for FunctionOptions {
    fn default() -> Self {
        Self {
            fetch_user: true,
            hook: false,
            internal: false,
        }
    }
}

/// Lifecycle points at which the store calls back into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassHook {
    BeforeSave,
    AfterSave,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    OnLogin,
}

impl ClassHook {
    /// Parses the hook segment of `/1.1/functions/<Class>/<hook>`.
    #[must_use]
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Some(match segment {
            "beforeSave" => Self::BeforeSave,
            "afterSave" => Self::AfterSave,
            "beforeUpdate" => Self::BeforeUpdate,
            "afterUpdate" => Self::AfterUpdate,
            "beforeDelete" => Self::BeforeDelete,
            "afterDelete" => Self::AfterDelete,
            "onLogin" => Self::OnLogin,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeSave => "beforeSave",
            Self::AfterSave => "afterSave",
            Self::BeforeUpdate => "beforeUpdate",
            Self::AfterUpdate => "afterUpdate",
            Self::BeforeDelete => "beforeDelete",
            Self::AfterDelete => "afterDelete",
            Self::OnLogin => "onLogin",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::BeforeSave => "__before_save_for_",
            Self::AfterSave => "__after_save_for_",
            Self::BeforeUpdate => "__before_update_for_",
            Self::AfterUpdate => "__after_update_for_",
            Self::BeforeDelete => "__before_delete_for_",
            Self::AfterDelete => "__after_delete_for_",
            Self::OnLogin => "__on_login_",
        }
    }

    /// Registry name of this hook on `class_name`, e.g.
    /// `__before_save_for_Todo` or `__on_login__User`.
    #[must_use]
    pub fn function_name(self, class_name: &str) -> String {
        format!("{}{class_name}", self.prefix())
    }
}

/// A registered function.
pub struct FunctionDescriptor {
    pub name: String,
    pub options: FunctionOptions,
    /// Class and hook point, for class hooks.
    pub class_hook: Option<(String, ClassHook)>,
    pub handler: Arc<dyn CloudFunction>,
}

impl std::fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("class_hook", &self.class_hook)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("cloud function {name} is already defined")]
    Duplicate { name: String },
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects function definitions before the gateway starts.
#[derive(Debug, Default)]
pub struct FunctionRegistryBuilder {
    functions: HashMap<String, Arc<FunctionDescriptor>>,
}

impl FunctionRegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, descriptor: FunctionDescriptor) -> Result<&mut Self, RegistryError> {
        if self.functions.contains_key(&descriptor.name) {
            return Err(RegistryError::Duplicate {
                name: descriptor.name,
            });
        }
        self.functions
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(self)
    }

    /// Defines a function with default options.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Duplicate`] if `name` is taken.
    pub fn define(
        &mut self,
        name: impl Into<String>,
        handler: impl CloudFunction,
    ) -> Result<&mut Self, RegistryError> {
        self.define_with(name, FunctionOptions::default(), handler)
    }

    /// # Errors
    ///
    /// [`RegistryError::Duplicate`] if `name` is taken.
    pub fn define_with(
        &mut self,
        name: impl Into<String>,
        options: FunctionOptions,
        handler: impl CloudFunction,
    ) -> Result<&mut Self, RegistryError> {
        self.insert(FunctionDescriptor {
            name: name.into(),
            options,
            class_hook: None,
            handler: Arc::new(handler),
        })
    }

    /// Registers a class hook. Hooks are only reachable with the hook key
    /// and never resolve the session themselves.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Duplicate`] if the hook is already defined.
    pub fn hook(
        &mut self,
        class_name: &str,
        hook: ClassHook,
        handler: impl CloudFunction,
    ) -> Result<&mut Self, RegistryError> {
        self.insert(FunctionDescriptor {
            name: hook.function_name(class_name),
            options: FunctionOptions {
                fetch_user: false,
                hook: true,
                internal: false,
            },
            class_hook: Some((class_name.to_string(), hook)),
            handler: Arc::new(handler),
        })
    }

    /// # Errors
    ///
    /// See [`FunctionRegistryBuilder::hook`].
    pub fn before_save(
        &mut self,
        class_name: &str,
        handler: impl CloudFunction,
    ) -> Result<&mut Self, RegistryError> {
        self.hook(class_name, ClassHook::BeforeSave, handler)
    }

    /// # Errors
    ///
    /// See [`FunctionRegistryBuilder::hook`].
    pub fn after_save(
        &mut self,
        class_name: &str,
        handler: impl CloudFunction,
    ) -> Result<&mut Self, RegistryError> {
        self.hook(class_name, ClassHook::AfterSave, handler)
    }

    /// # Errors
    ///
    /// See [`FunctionRegistryBuilder::hook`].
    pub fn before_update(
        &mut self,
        class_name: &str,
        handler: impl CloudFunction,
    ) -> Result<&mut Self, RegistryError> {
        self.hook(class_name, ClassHook::BeforeUpdate, handler)
    }

    /// # Errors
    ///
    /// See [`FunctionRegistryBuilder::hook`].
    pub fn after_update(
        &mut self,
        class_name: &str,
        handler: impl CloudFunction,
    ) -> Result<&mut Self, RegistryError> {
        self.hook(class_name, ClassHook::AfterUpdate, handler)
    }

    /// # Errors
    ///
    /// See [`FunctionRegistryBuilder::hook`].
    pub fn before_delete(
        &mut self,
        class_name: &str,
        handler: impl CloudFunction,
    ) -> Result<&mut Self, RegistryError> {
        self.hook(class_name, ClassHook::BeforeDelete, handler)
    }

    /// # Errors
    ///
    /// See [`FunctionRegistryBuilder::hook`].
    pub fn after_delete(
        &mut self,
        class_name: &str,
        handler: impl CloudFunction,
    ) -> Result<&mut Self, RegistryError> {
        self.hook(class_name, ClassHook::AfterDelete, handler)
    }

    /// Called by the store when a `_User` logs in.
    ///
    /// # Errors
    ///
    /// See [`FunctionRegistryBuilder::hook`].
    pub fn on_login(&mut self, handler: impl CloudFunction) -> Result<&mut Self, RegistryError> {
        self.hook(lean_core::USER_CLASS, ClassHook::OnLogin, handler)
    }

    /// Freezes the definitions.
    #[must_use]
    pub fn seal(self) -> FunctionRegistry {
        FunctionRegistry {
            functions: self.functions,
        }
    }
}

// ---------------------------------------------------------------------------
// FunctionRegistry
// ---------------------------------------------------------------------------

/// Read-only name -> descriptor table, shared for the process lifetime.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<FunctionDescriptor>>,
}

impl FunctionRegistry {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<FunctionDescriptor>> {
        self.functions.get(name)
    }

    /// All registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use lean_core::Value;

    use super::*;
    use crate::service::invocation::FunctionError;

    async fn ok(_request: FunctionRequest) -> FunctionResult {
        Ok(Value::from("ok"))
    }

    #[test]
    fn hook_names_use_prefixes() {
        assert_eq!(
            ClassHook::BeforeSave.function_name("Todo"),
            "__before_save_for_Todo"
        );
        assert_eq!(
            ClassHook::AfterDelete.function_name("Todo"),
            "__after_delete_for_Todo"
        );
        assert_eq!(ClassHook::OnLogin.function_name("_User"), "__on_login__User");
    }

    #[test]
    fn path_segments_round_trip() {
        for hook in [
            ClassHook::BeforeSave,
            ClassHook::AfterSave,
            ClassHook::BeforeUpdate,
            ClassHook::AfterUpdate,
            ClassHook::BeforeDelete,
            ClassHook::AfterDelete,
            ClassHook::OnLogin,
        ] {
            assert_eq!(ClassHook::from_path_segment(hook.as_str()), Some(hook));
        }
        assert_eq!(ClassHook::from_path_segment("beforeFind"), None);
    }

    #[test]
    fn sealed_registry_looks_up_by_name() {
        let mut builder = FunctionRegistryBuilder::new();
        builder
            .define("hello", ok)
            .unwrap()
            .before_save("Todo", ok)
            .unwrap()
            .on_login(ok)
            .unwrap();
        let registry = builder.seal();

        assert_eq!(registry.len(), 3);
        let hello = registry.get("hello").unwrap();
        assert_eq!(hello.options, FunctionOptions::default());
        assert!(hello.class_hook.is_none());

        let hook = registry.get("__before_save_for_Todo").unwrap();
        assert!(hook.options.hook);
        assert!(!hook.options.fetch_user);
        assert_eq!(
            hook.class_hook,
            Some(("Todo".to_string(), ClassHook::BeforeSave))
        );
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn duplicate_definitions_are_rejected() {
        let mut builder = FunctionRegistryBuilder::new();
        builder.define("hello", ok).unwrap();
        let err = builder.define("hello", ok).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { name } if name == "hello"));
    }

    #[test]
    fn names_are_sorted() {
        let mut builder = FunctionRegistryBuilder::new();
        builder
            .define("zeta", ok)
            .unwrap()
            .define("alpha", ok)
            .unwrap()
            .after_save("Todo", ok)
            .unwrap();
        assert_eq!(
            builder.seal().names(),
            vec!["__after_save_for_Todo", "alpha", "zeta"]
        );
    }

    #[tokio::test]
    async fn closures_are_cloud_functions() {
        let echo =
            |request: FunctionRequest| async move { Ok::<_, FunctionError>(request.params) };
        let result = CloudFunction::call(&echo, FunctionRequest::new(Value::from(7)))
            .await
            .unwrap();
        assert_eq!(result, Value::from(7));
    }
}

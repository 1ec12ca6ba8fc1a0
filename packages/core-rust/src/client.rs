//! SDK entry point: classes, object references and users.
//!
//! Object and user references share one code path through [`RefTarget`];
//! only the URL and the decoding of `get` differ between the two.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use crate::codec::{decode_object, decode_user, encode_fields};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::query::{Query, QueryTarget};
use crate::store::{AuthOption, HttpStore, Method, RemoteStore, StoreRequest, API_PREFIX};
use crate::types::{Object, User, Value, USER_CLASS};

/// Handle to the remote store. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn RemoteStore>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client talking HTTP to the configured server.
    ///
    /// # Errors
    ///
    /// Fails if the underlying HTTP client cannot be constructed.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self::with_store(Arc::new(HttpStore::new(config)?)))
    }

    /// Creates a client from `API_SERVER`, `APP_ID`, `APP_KEY` and
    /// `APP_MASTER_KEY`.
    ///
    /// # Errors
    ///
    /// Fails when a required variable is missing.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Creates a client over any store implementation.
    #[must_use]
    pub fn with_store(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn class(&self, name: impl Into<String>) -> Class {
        Class {
            client: self.clone(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn users(&self) -> Users {
        Users {
            client: self.clone(),
        }
    }

    pub(crate) async fn request(&self, request: StoreRequest) -> Result<serde_json::Value> {
        Ok(self.store.request(request).await?)
    }
}

// ---------------------------------------------------------------------------
// Classes and object references
// ---------------------------------------------------------------------------

/// A named class (collection) in the store.
#[derive(Debug, Clone)]
pub struct Class {
    client: Client,
    name: String,
}

impl Class {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference to an existing object of this class.
    #[must_use]
    pub fn object(&self, id: impl Into<String>) -> ObjectRef {
        ObjectRef {
            client: self.client.clone(),
            target: RefTarget::Object {
                class_name: self.name.clone(),
                id: id.into(),
            },
        }
    }

    #[must_use]
    pub fn new_query(&self) -> Query {
        Query::new(self.client.clone(), QueryTarget::Class(self.name.clone()))
    }

    /// Stores a new object built from `fields` and returns its reference.
    ///
    /// # Errors
    ///
    /// Fails on store errors or when the response carries no string
    /// `objectId`.
    pub async fn create(
        &self,
        fields: &BTreeMap<String, Value>,
        auth: &[AuthOption],
    ) -> Result<ObjectRef> {
        let request = StoreRequest::new(Method::Post, QueryTarget::Class(self.name.clone()).path())
            .with_body(serde_json::Value::Object(encode_fields(fields, false)))
            .with_auth(auth);
        let response = self.client.request(request).await?;
        let id = response
            .get("objectId")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                Error::UnexpectedResponse("create response has no string objectId".to_string())
            })?;
        Ok(self.object(id))
    }
}

/// What a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Object { class_name: String, id: String },
    User { id: String },
}

impl RefTarget {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Object { id, .. } | Self::User { id } => id,
        }
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        match self {
            Self::Object { class_name, .. } => class_name,
            Self::User { .. } => USER_CLASS,
        }
    }

    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Object { class_name, id } => format!("{API_PREFIX}/classes/{class_name}/{id}"),
            Self::User { id } => format!("{API_PREFIX}/users/{id}"),
        }
    }
}

/// Reference to one stored record.
#[derive(Debug, Clone)]
pub struct ObjectRef {
    client: Client,
    target: RefTarget,
}

impl ObjectRef {
    #[must_use]
    pub fn id(&self) -> &str {
        self.target.id()
    }

    #[must_use]
    pub fn target(&self) -> &RefTarget {
        &self.target
    }

    fn path(&self) -> Result<String> {
        if self.target.id().is_empty() {
            return Err(Error::NoReference);
        }
        Ok(self.target.path())
    }

    async fn fetch(&self, auth: &[AuthOption]) -> Result<serde_json::Value> {
        let request = StoreRequest::new(Method::Get, self.path()?).with_auth(auth);
        self.client.request(request).await
    }

    /// Loads the referenced object.
    ///
    /// # Errors
    ///
    /// [`Error::NoReference`] for an empty id, otherwise store and codec
    /// failures.
    pub async fn get(&self, auth: &[AuthOption]) -> Result<Object> {
        let response = self.fetch(auth).await?;
        Ok(decode_object(&response, self.target.class_name())?)
    }

    /// Sets a single field.
    ///
    /// # Errors
    ///
    /// See [`ObjectRef::update`].
    pub async fn set(&self, field: &str, value: impl Into<Value>, auth: &[AuthOption]) -> Result<()> {
        let fields = BTreeMap::from([(field.to_string(), value.into())]);
        self.update(&fields, auth).await
    }

    /// Writes `fields` onto the referenced object.
    ///
    /// # Errors
    ///
    /// [`Error::NoReference`] for an empty id, otherwise store failures.
    pub async fn update(&self, fields: &BTreeMap<String, Value>, auth: &[AuthOption]) -> Result<()> {
        let request = StoreRequest::new(Method::Put, self.path()?)
            .with_body(serde_json::Value::Object(encode_fields(fields, false)))
            .with_auth(auth);
        self.client.request(request).await?;
        Ok(())
    }

    /// Deletes the referenced object.
    ///
    /// # Errors
    ///
    /// [`Error::NoReference`] for an empty id, otherwise store failures.
    pub async fn destroy(&self, auth: &[AuthOption]) -> Result<()> {
        let request = StoreRequest::new(Method::Delete, self.path()?).with_auth(auth);
        self.client.request(request).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// The `_User` collection and session operations.
#[derive(Debug, Clone)]
pub struct Users {
    client: Client,
}

impl Users {
    #[must_use]
    pub fn user(&self, id: impl Into<String>) -> UserRef {
        UserRef(ObjectRef {
            client: self.client.clone(),
            target: RefTarget::User { id: id.into() },
        })
    }

    #[must_use]
    pub fn new_query(&self) -> Query {
        Query::new(self.client.clone(), QueryTarget::Users)
    }

    /// Resolves the user owning `session_token`.
    ///
    /// # Errors
    ///
    /// Fails when the store rejects the token or the record is malformed.
    pub async fn become_user(&self, session_token: &str) -> Result<User> {
        let request = StoreRequest::new(Method::Get, format!("{API_PREFIX}/users/me"))
            .with_auth(&[AuthOption::SessionToken(session_token.to_string())]);
        let response = self.client.request(request).await?;
        let mut user = decode_user(&response)?;
        if user.session_token.is_empty() {
            user.session_token = session_token.to_string();
        }
        Ok(user)
    }

    /// Logs in with username and password.
    ///
    /// # Errors
    ///
    /// Fails on bad credentials or a malformed response.
    pub async fn log_in(&self, username: &str, password: &str) -> Result<User> {
        let request = StoreRequest::new(Method::Post, format!("{API_PREFIX}/login"))
            .with_body(json!({ "username": username, "password": password }));
        let response = self.client.request(request).await?;
        Ok(decode_user(&response)?)
    }

    /// Registers a new user. `fields` are stored alongside the credentials.
    ///
    /// # Errors
    ///
    /// Fails when the store rejects the signup or the response is malformed.
    pub async fn sign_up(
        &self,
        username: &str,
        password: &str,
        fields: &BTreeMap<String, Value>,
    ) -> Result<User> {
        let mut body = encode_fields(fields, false);
        body.insert("username".to_string(), json!(username));
        body.insert("password".to_string(), json!(password));
        let request = StoreRequest::new(Method::Post, QueryTarget::Users.path())
            .with_body(serde_json::Value::Object(body));
        let response = self.client.request(request).await?;

        // The signup response only carries metadata; keep what was sent.
        let mut user = decode_user(&response)?;
        user.object.fields.extend(fields.clone());
        user.object
            .fields
            .insert("username".to_string(), Value::from(username));
        Ok(user)
    }
}

/// Reference to one `_User` record.
#[derive(Debug, Clone)]
pub struct UserRef(ObjectRef);

impl UserRef {
    #[must_use]
    pub fn id(&self) -> &str {
        self.0.id()
    }

    /// # Errors
    ///
    /// See [`ObjectRef::get`].
    pub async fn get(&self, auth: &[AuthOption]) -> Result<User> {
        let response = self.0.fetch(auth).await?;
        Ok(decode_user(&response)?)
    }

    /// # Errors
    ///
    /// See [`ObjectRef::set`].
    pub async fn set(&self, field: &str, value: impl Into<Value>, auth: &[AuthOption]) -> Result<()> {
        self.0.set(field, value, auth).await
    }

    /// # Errors
    ///
    /// See [`ObjectRef::update`].
    pub async fn update(&self, fields: &BTreeMap<String, Value>, auth: &[AuthOption]) -> Result<()> {
        self.0.update(fields, auth).await
    }

    /// # Errors
    ///
    /// See [`ObjectRef::destroy`].
    pub async fn destroy(&self, auth: &[AuthOption]) -> Result<()> {
        self.0.destroy(auth).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStore;

    #[test]
    fn ref_targets_build_paths() {
        let obj = RefTarget::Object {
            class_name: "Todo".to_string(),
            id: "t1".to_string(),
        };
        assert_eq!(obj.path(), "/1.1/classes/Todo/t1");
        let user = RefTarget::User { id: "u1".to_string() };
        assert_eq!(user.path(), "/1.1/users/u1");
        assert_eq!(user.class_name(), "_User");
    }

    #[tokio::test]
    async fn create_posts_encoded_fields() {
        let store = ScriptedStore::new();
        store.reply(json!({"objectId": "t1", "createdAt": "2020-01-01T00:00:00.000Z"}));
        let client = Client::with_store(store.clone());

        let fields = BTreeMap::from([("content".to_string(), Value::from("buy milk"))]);
        let created = client.class("Todo").create(&fields, &[]).await.unwrap();
        assert_eq!(created.id(), "t1");

        let sent = store.requests();
        assert_eq!(sent[0].method, Method::Post);
        assert_eq!(sent[0].path, "/1.1/classes/Todo");
        assert_eq!(sent[0].body, Some(json!({"content": "buy milk"})));
    }

    #[tokio::test]
    async fn create_requires_object_id() {
        let store = ScriptedStore::new();
        store.reply(json!({"createdAt": "2020-01-01T00:00:00.000Z"}));
        let err = Client::with_store(store)
            .class("Todo")
            .create(&BTreeMap::new(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn empty_reference_is_rejected_before_sending() {
        let store = ScriptedStore::new();
        let client = Client::with_store(store.clone());
        let reference = client.class("Todo").object("");

        assert!(matches!(reference.get(&[]).await, Err(Error::NoReference)));
        assert!(matches!(reference.set("a", 1, &[]).await, Err(Error::NoReference)));
        assert!(matches!(reference.destroy(&[]).await, Err(Error::NoReference)));
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn set_and_destroy_share_the_reference_path() {
        let store = ScriptedStore::new();
        store.reply(json!({"updatedAt": "2020-01-01T00:00:00.000Z"}));
        store.reply(json!({}));
        let client = Client::with_store(store.clone());
        let reference = client.users().user("u1");

        reference.set("nickname", "al", &[AuthOption::UseMasterKey]).await.unwrap();
        reference.destroy(&[]).await.unwrap();

        let sent = store.requests();
        assert_eq!(sent[0].method, Method::Put);
        assert_eq!(sent[0].path, "/1.1/users/u1");
        assert_eq!(sent[0].body, Some(json!({"nickname": "al"})));
        assert!(sent[0].use_master_key);
        assert_eq!(sent[1].method, Method::Delete);
        assert_eq!(sent[1].path, "/1.1/users/u1");
    }

    #[tokio::test]
    async fn get_decodes_object_of_reference_class() {
        let store = ScriptedStore::new();
        store.reply(json!({"objectId": "t1", "content": "x"}));
        let object = Client::with_store(store)
            .class("Todo")
            .object("t1")
            .get(&[])
            .await
            .unwrap();
        assert_eq!(object.class_name, "Todo");
        assert_eq!(object.get("content"), Some(&Value::from("x")));
    }

    #[tokio::test]
    async fn become_user_sends_session_header() {
        let store = ScriptedStore::new();
        store.reply(json!({"objectId": "u1", "username": "alice"}));
        let user = Client::with_store(store.clone())
            .users()
            .become_user("s3ss")
            .await
            .unwrap();
        assert_eq!(user.id(), "u1");
        assert_eq!(user.session_token, "s3ss");
        let sent = store.requests();
        assert_eq!(sent[0].path, "/1.1/users/me");
        assert_eq!(sent[0].session_token.as_deref(), Some("s3ss"));
    }

    #[tokio::test]
    async fn sign_up_keeps_submitted_fields() {
        let store = ScriptedStore::new();
        store.reply(json!({
            "objectId": "u9",
            "sessionToken": "tok",
            "createdAt": "2020-01-01T00:00:00.000Z",
        }));
        let fields = BTreeMap::from([("email".to_string(), Value::from("a@example.com"))]);
        let user = Client::with_store(store.clone())
            .users()
            .sign_up("alice", "pw", &fields)
            .await
            .unwrap();
        assert_eq!(user.username(), Some("alice"));
        assert_eq!(user.email(), Some("a@example.com"));
        assert_eq!(user.session_token, "tok");
        assert_eq!(store.requests()[0].path, "/1.1/users");
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        let store = ScriptedStore::new();
        store.fail(211, "Could not find user");
        let err = Client::with_store(store)
            .users()
            .log_in("alice", "bad")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Store(crate::store::StoreError::Api { code: 211, .. })
        ));
    }
}

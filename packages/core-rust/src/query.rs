//! Query builder: accumulates `where` constraints, ordering and pagination,
//! then runs one of three terminal operations against the store.

use tracing::debug;

use crate::client::Client;
use crate::codec::{decode_object, decode_user, json_type_name};
use crate::condition::{encode_condition, Operator};
use crate::error::{Error, Result};
use crate::store::{AuthOption, Method, StoreRequest, API_PREFIX};
use crate::types::{Object, User, Value, USER_CLASS};

/// What a query (or a reference) points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    /// Objects of a named class.
    Class(String),
    /// The `_User` collection, served from its own endpoint.
    Users,
}

impl QueryTarget {
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Class(name) => format!("{API_PREFIX}/classes/{name}"),
            Self::Users => format!("{API_PREFIX}/users"),
        }
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        match self {
            Self::Class(name) => name,
            Self::Users => USER_CLASS,
        }
    }
}

/// Fluent query over one [`QueryTarget`].
///
/// Every constraint method consumes and returns the builder. Constraining
/// the same field twice keeps only the latest constraint.
///
/// ```ignore
/// let todos = client
///     .class("Todo")
///     .new_query()
///     .equal_to("done", false)
///     .descending("createdAt")
///     .limit(20)
///     .find(&[])
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    client: Client,
    target: QueryTarget,
    r#where: serde_json::Map<String, serde_json::Value>,
    order: Vec<String>,
    skip: u32,
    limit: u32,
}

impl Query {
    #[must_use]
    pub fn new(client: Client, target: QueryTarget) -> Self {
        Self {
            client,
            target,
            r#where: serde_json::Map::new(),
            order: Vec::new(),
            skip: 0,
            limit: 0,
        }
    }

    #[must_use]
    pub fn target(&self) -> &QueryTarget {
        &self.target
    }

    /// The accumulated `where` map as it will be serialized.
    #[must_use]
    pub fn where_clause(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.r#where
    }

    fn constrain(mut self, key: impl Into<String>, op: Operator, value: &Value, options: &str) -> Self {
        self.r#where
            .insert(key.into(), encode_condition(op, value, options));
        self
    }

    #[must_use]
    pub fn equal_to(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constrain(key, Operator::Equal, &value.into(), "")
    }

    #[must_use]
    pub fn not_equal_to(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constrain(key, Operator::NotEqual, &value.into(), "")
    }

    #[must_use]
    pub fn greater_than(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constrain(key, Operator::GreaterThan, &value.into(), "")
    }

    #[must_use]
    pub fn greater_than_or_equal_to(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constrain(key, Operator::GreaterThanOrEqual, &value.into(), "")
    }

    #[must_use]
    pub fn less_than(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constrain(key, Operator::LessThan, &value.into(), "")
    }

    #[must_use]
    pub fn less_than_or_equal_to(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constrain(key, Operator::LessThanOrEqual, &value.into(), "")
    }

    /// Field value is one of `values` (`$in`).
    #[must_use]
    pub fn contained_in(self, key: impl Into<String>, values: impl Into<Value>) -> Self {
        self.constrain(key, Operator::In, &values.into(), "")
    }

    /// Field value is none of `values` (`$nin`).
    #[must_use]
    pub fn not_contained_in(self, key: impl Into<String>, values: impl Into<Value>) -> Self {
        self.constrain(key, Operator::NotIn, &values.into(), "")
    }

    /// Array field holds every element of `values` (`$all`).
    #[must_use]
    pub fn contains_all(self, key: impl Into<String>, values: impl Into<Value>) -> Self {
        self.constrain(key, Operator::All, &values.into(), "")
    }

    #[must_use]
    pub fn regexp(self, key: impl Into<String>, expr: &str, options: &str) -> Self {
        self.constrain(key, Operator::Regex, &Value::from(expr), options)
    }

    /// Substring match. `substring` is used as a regular expression as-is,
    /// so metacharacters in it keep their regex meaning.
    #[must_use]
    pub fn contains(self, key: impl Into<String>, substring: &str) -> Self {
        self.regexp(key, substring, "")
    }

    /// Prefix match. Like [`Query::contains`], `prefix` is not escaped.
    #[must_use]
    pub fn starts_with(self, key: impl Into<String>, prefix: &str) -> Self {
        self.regexp(key, &format!("^{prefix}"), "")
    }

    /// Replaces the sort keys. Prefix a key with `-` for descending order.
    #[must_use]
    pub fn order<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Appends an ascending sort key.
    #[must_use]
    pub fn ascending(mut self, key: &str) -> Self {
        self.order.push(key.to_string());
        self
    }

    /// Appends a descending sort key.
    #[must_use]
    pub fn descending(mut self, key: &str) -> Self {
        self.order.push(format!("-{key}"));
        self
    }

    #[must_use]
    pub fn skip(mut self, count: u32) -> Self {
        self.skip = count;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Serializes the query into request parameters.
    ///
    /// `where` is always present; `skip`/`limit` only when non-zero; `order`
    /// only when non-empty. `count` adds `count=1`; `first` forces `limit=1`.
    #[must_use]
    pub fn params(&self, count: bool, first: bool) -> Vec<(String, String)> {
        let mut params = vec![(
            "where".to_string(),
            serde_json::Value::Object(self.r#where.clone()).to_string(),
        )];
        if self.skip != 0 {
            params.push(("skip".to_string(), self.skip.to_string()));
        }
        if first {
            params.push(("limit".to_string(), "1".to_string()));
        } else if self.limit != 0 {
            params.push(("limit".to_string(), self.limit.to_string()));
        }
        if !self.order.is_empty() {
            params.push(("order".to_string(), self.order.join(",")));
        }
        if count {
            params.push(("count".to_string(), "1".to_string()));
        }
        params
    }

    async fn run(&self, count: bool, first: bool, auth: &[AuthOption]) -> Result<serde_json::Value> {
        let params = self.params(count, first);
        debug!(target_path = %self.target.path(), count, first, "running query");
        let request = StoreRequest::new(Method::Get, self.target.path())
            .with_params(params)
            .with_auth(auth);
        self.client.request(request).await
    }

    async fn results(&self, first: bool, auth: &[AuthOption]) -> Result<Vec<serde_json::Value>> {
        let mut response = self.run(false, first, auth).await?;
        match response.get_mut("results").map(serde_json::Value::take) {
            Some(serde_json::Value::Array(items)) => Ok(items),
            Some(other) => Err(Error::UnexpectedResponse(format!(
                "results should be an array but is {}",
                json_type_name(&other)
            ))),
            None => Err(Error::UnexpectedResponse(
                "response has no results field".to_string(),
            )),
        }
    }

    /// Runs the query and decodes every matching object, in store order.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, when `results` is not a list, or when an
    /// item cannot be decoded.
    pub async fn find(&self, auth: &[AuthOption]) -> Result<Vec<Object>> {
        let class_name = self.target.class_name();
        self.results(false, auth)
            .await?
            .iter()
            .map(|item| decode_object(item, class_name).map_err(Error::from))
            .collect()
    }

    /// Runs the query with `limit=1` and returns the single match.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when nothing matched, plus the failures of
    /// [`Query::find`].
    pub async fn first(&self, auth: &[AuthOption]) -> Result<Object> {
        let items = self.results(true, auth).await?;
        let item = items.first().ok_or(Error::NotFound)?;
        Ok(decode_object(item, self.target.class_name())?)
    }

    /// Like [`Query::find`] but decodes `_User` records with their tokens.
    ///
    /// # Errors
    ///
    /// See [`Query::find`].
    pub async fn find_users(&self, auth: &[AuthOption]) -> Result<Vec<User>> {
        self.results(false, auth)
            .await?
            .iter()
            .map(|item| decode_user(item).map_err(Error::from))
            .collect()
    }

    /// Like [`Query::first`] for `_User` records.
    ///
    /// # Errors
    ///
    /// See [`Query::first`].
    pub async fn first_user(&self, auth: &[AuthOption]) -> Result<User> {
        let items = self.results(true, auth).await?;
        let item = items.first().ok_or(Error::NotFound)?;
        Ok(decode_user(item)?)
    }

    /// Asks the store for the number of matches only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedResponse`] when `count` is not a
    /// non-negative number.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub async fn count(&self, auth: &[AuthOption]) -> Result<u64> {
        let response = self.run(true, false, auth).await?;
        let count = response.get("count").ok_or_else(|| {
            Error::UnexpectedResponse("response has no count field".to_string())
        })?;
        count
            .as_u64()
            .or_else(|| count.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| {
                Error::UnexpectedResponse(format!(
                    "count should be a number but is {}",
                    json_type_name(count)
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::testing::ScriptedStore;

    fn todo_query(store: &std::sync::Arc<ScriptedStore>) -> Query {
        Client::with_store(store.clone()).class("Todo").new_query()
    }

    fn offline_query() -> Query {
        todo_query(&ScriptedStore::new())
    }

    #[test]
    fn params_include_only_set_pagination() {
        let params = offline_query().params(false, false);
        assert_eq!(params, vec![("where".to_string(), "{}".to_string())]);

        let params = offline_query()
            .skip(10)
            .limit(5)
            .order(["priority", "-createdAt"])
            .params(false, false);
        assert_eq!(
            params,
            vec![
                ("where".to_string(), "{}".to_string()),
                ("skip".to_string(), "10".to_string()),
                ("limit".to_string(), "5".to_string()),
                ("order".to_string(), "priority,-createdAt".to_string()),
            ]
        );
    }

    #[test]
    fn count_and_first_modes_set_flags() {
        let query = offline_query().limit(50);
        let count = query.params(true, false);
        assert!(count.contains(&("count".to_string(), "1".to_string())));

        let first = query.params(false, true);
        assert!(first.contains(&("limit".to_string(), "1".to_string())));
        assert!(!first.contains(&("limit".to_string(), "50".to_string())));
    }

    #[test]
    fn order_keys_keep_caller_sequence() {
        let query = offline_query().ascending("b").descending("a").ascending("c");
        let params = query.params(false, false);
        assert_eq!(params.last().unwrap().1, "b,-a,c");
    }

    #[test]
    fn starts_with_and_contains_are_regex_sugar() {
        let query = offline_query()
            .starts_with("title", "a.b")
            .contains("body", "x|y");
        assert_eq!(
            query.where_clause()["title"],
            json!({"$regex": "^a.b", "$options": ""})
        );
        assert_eq!(
            query.where_clause()["body"],
            json!({"$regex": "x|y", "$options": ""})
        );
    }

    #[test]
    fn set_membership_constraints() {
        let query = offline_query()
            .contained_in("status", vec!["open", "blocked"])
            .not_contained_in("owner", vec!["bot"])
            .contains_all("tags", vec!["a", "b"]);
        let clause = query.where_clause();
        assert_eq!(clause["status"], json!({"$in": ["open", "blocked"]}));
        assert_eq!(clause["owner"], json!({"$nin": ["bot"]}));
        assert_eq!(clause["tags"], json!({"$all": ["a", "b"]}));
    }

    #[test]
    fn users_target_uses_users_endpoint() {
        assert_eq!(QueryTarget::Users.path(), "/1.1/users");
        assert_eq!(QueryTarget::Class("Todo".into()).path(), "/1.1/classes/Todo");
        assert_eq!(QueryTarget::Users.class_name(), "_User");
    }

    proptest! {
        #[test]
        fn last_constraint_on_a_field_wins(first in any::<i64>(), second in any::<i64>()) {
            let query = offline_query()
                .greater_than("score", first)
                .equal_to("score", second);
            let params = query.params(false, false);
            let where_json: serde_json::Value = serde_json::from_str(&params[0].1).unwrap();
            prop_assert_eq!(where_json, json!({"score": second}));
        }
    }

    #[tokio::test]
    async fn find_decodes_results_in_order() {
        let store = ScriptedStore::new();
        store.reply(json!({"results": [
            {"objectId": "a", "title": "one"},
            {"objectId": "b", "title": "two"},
        ]}));

        let objects = todo_query(&store).equal_to("done", false).find(&[]).await.unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].id, "a");
        assert_eq!(objects[1].get("title"), Some(&Value::from("two")));
        assert_eq!(objects[0].class_name, "Todo");

        let sent = store.requests();
        assert_eq!(sent[0].method, Method::Get);
        assert_eq!(sent[0].path, "/1.1/classes/Todo");
        assert_eq!(sent[0].param("where"), Some(r#"{"done":false}"#));
    }

    #[tokio::test]
    async fn find_with_no_matches_is_empty() {
        let store = ScriptedStore::new();
        store.reply(json!({"results": []}));
        let objects = todo_query(&store).find(&[]).await.unwrap();
        assert!(objects.is_empty());
    }

    #[tokio::test]
    async fn find_rejects_non_list_results() {
        let store = ScriptedStore::new();
        store.reply(json!({"results": {"objectId": "a"}}));
        let err = todo_query(&store).find(&[]).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn first_on_empty_results_is_not_found() {
        let store = ScriptedStore::new();
        store.reply(json!({"results": []}));
        let err = todo_query(&store).first(&[]).await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
        assert_eq!(store.requests()[0].param("limit"), Some("1"));
    }

    #[tokio::test]
    async fn first_returns_single_object() {
        let store = ScriptedStore::new();
        store.reply(json!({"results": [{"objectId": "a"}]}));
        let object = todo_query(&store).first(&[]).await.unwrap();
        assert_eq!(object.id, "a");
    }

    #[tokio::test]
    async fn count_reads_number_and_sends_flag() {
        let store = ScriptedStore::new();
        store.reply(json!({"results": [], "count": 7}));
        let count = todo_query(&store).count(&[AuthOption::UseMasterKey]).await.unwrap();
        assert_eq!(count, 7);
        let sent = store.requests();
        assert_eq!(sent[0].param("count"), Some("1"));
        assert!(sent[0].use_master_key);
    }

    #[tokio::test]
    async fn count_rejects_non_numbers() {
        let store = ScriptedStore::new();
        store.reply(json!({"count": "seven"}));
        let err = todo_query(&store).count(&[]).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn user_queries_keep_session_tokens() {
        let store = ScriptedStore::new();
        store.reply(json!({"results": [{"objectId": "u1", "sessionToken": "s", "username": "al"}]}));
        let user = Client::with_store(store.clone())
            .users()
            .new_query()
            .equal_to("username", "al")
            .first_user(&[])
            .await
            .unwrap();
        assert_eq!(user.id(), "u1");
        assert_eq!(user.session_token, "s");
        assert_eq!(store.requests()[0].path, "/1.1/users");
    }
}

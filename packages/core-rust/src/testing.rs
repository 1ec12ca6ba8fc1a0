//! In-memory [`RemoteStore`] for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::store::{RemoteStore, StoreError, StoreRequest};

/// Replies with queued responses in order and records every request.
/// Runs out of replies with an API error rather than panicking.
#[derive(Default)]
pub(crate) struct ScriptedStore {
    replies: Mutex<VecDeque<Result<serde_json::Value, StoreError>>>,
    sent: Mutex<Vec<StoreRequest>>,
}

impl ScriptedStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn reply(&self, body: serde_json::Value) {
        self.replies.lock().push_back(Ok(body));
    }

    pub(crate) fn fail(&self, code: i64, message: &str) {
        self.replies.lock().push_back(Err(StoreError::Api {
            status: 400,
            code,
            message: message.to_string(),
        }));
    }

    pub(crate) fn requests(&self) -> Vec<StoreRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl RemoteStore for ScriptedStore {
    async fn request(&self, request: StoreRequest) -> Result<serde_json::Value, StoreError> {
        self.sent.lock().push(request);
        self.replies.lock().pop_front().unwrap_or(Err(StoreError::Api {
            status: 500,
            code: 1,
            message: "no scripted reply".to_string(),
        }))
    }
}

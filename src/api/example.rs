// Example event endpoints
//
// The dispatcher records every 1000th event here; the example.json
// companion endpoints serve its cached projections.

use crate::models::CachedEntry;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::sync::{Arc, RwLock};

#[derive(Clone, Default)]
pub struct ExampleStore {
    inner: Arc<RwLock<Option<Arc<CachedEntry>>>>,
}

impl ExampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, entry: Arc<CachedEntry>) {
        *self.inner.write().expect("example lock poisoned") = Some(entry);
    }

    fn get(&self) -> Option<Arc<CachedEntry>> {
        self.inner.read().expect("example lock poisoned").clone()
    }

    pub fn full_json(&self) -> Bytes {
        self.get()
            .map(|e| e.full())
            .unwrap_or_else(|| Bytes::from_static(b"{}"))
    }

    pub fn lite_json(&self) -> Bytes {
        self.get()
            .map(|e| e.lite())
            .unwrap_or_else(|| Bytes::from_static(b"{}"))
    }

    pub fn domains_json(&self) -> Bytes {
        self.get()
            .map(|e| e.domains())
            .unwrap_or_else(|| Bytes::from_static(b"{}"))
    }
}

pub fn json_response(body: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

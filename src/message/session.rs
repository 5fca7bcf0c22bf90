//! Sessions: the ambient context threaded through session-bound letters.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::{Error, Result, SessionId};

/// Property key carrying the session id on the wire.
pub const SESSION_PROPERTY: &str = "session";

#[derive(Debug)]
struct SessionInner {
    id: SessionId,
    created_at: DateTime<Utc>,
    properties: BTreeMap<String, String>,
}

/// Shared, immutable session handle.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(SessionId::new())
    }

    pub fn with_id(id: SessionId) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                created_at: Utc::now(),
                properties: BTreeMap::new(),
            }),
        }
    }

    /// Copy of this session with one more property.
    pub fn with_property(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut properties = self.inner.properties.clone();
        properties.insert(key.into(), value.into());
        Self {
            inner: Arc::new(SessionInner {
                id: self.inner.id.clone(),
                created_at: self.inner.created_at,
                properties,
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.inner.properties.get(key).map(String::as_str)
    }

    /// Properties transmitted with session-bound frames.
    pub fn to_properties(&self) -> BTreeMap<String, String> {
        let mut properties = self.inner.properties.clone();
        properties.insert(SESSION_PROPERTY.to_string(), self.inner.id.to_string());
        properties
    }

    /// Rebuild a session from transmitted properties.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self> {
        let id = properties
            .get(SESSION_PROPERTY)
            .cloned()
            .ok_or_else(|| Error::protocol("frame without session property"))?;
        let id = SessionId::from_string(id).map_err(Error::protocol)?;
        let mut session = Self::with_id(id);
        for (key, value) in properties {
            if key != SESSION_PROPERTY {
                session = session.with_property(key.clone(), value.clone());
            }
        }
        Ok(session)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

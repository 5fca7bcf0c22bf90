//! Wire frames.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::codec::{FRAME_ERROR, FRAME_EVENT, FRAME_HELLO, FRAME_REQUEST, FRAME_RESPONSE};
use crate::address::BusPath;
use crate::message::{Response, Session};
use crate::types::{Error, InformationId};

/// A request for `name` at `path`; completed by a [`Response`] referencing
/// `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub id: InformationId,
    pub path: BusPath,
    pub name: String,
    /// Session id and session properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Arguments, encoded by the connection's protocol.
    #[serde(default)]
    pub body: Option<Vec<u8>>,
}

/// A notification for `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub path: BusPath,
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Vec<u8>>,
}

/// First frame each end sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub scheme: String,
    /// URI of the sending end's connection node.
    pub peer: String,
}

/// Report of a frame the sender could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for WireError {
    fn from(err: &Error) -> Self {
        Self {
            code: err.wire_code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(WireRequest),
    Response(Response),
    Event(WireEvent),
    Hello(Hello),
    Error(WireError),
}

impl Frame {
    pub fn frame_type(&self) -> u8 {
        match self {
            Frame::Request(_) => FRAME_REQUEST,
            Frame::Response(_) => FRAME_RESPONSE,
            Frame::Event(_) => FRAME_EVENT,
            Frame::Hello(_) => FRAME_HELLO,
            Frame::Error(_) => FRAME_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Request(_) => "request",
            Frame::Response(_) => "response",
            Frame::Event(_) => "event",
            Frame::Hello(_) => "hello",
            Frame::Error(_) => "error",
        }
    }
}

/// Session rebuilt from frame properties; a fresh session when none was sent.
pub(crate) fn session_of(properties: &BTreeMap<String, String>) -> Session {
    Session::from_properties(properties).unwrap_or_default()
}

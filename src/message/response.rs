//! Responses: the completion record of a request crossing a process boundary.

use serde::{Deserialize, Serialize};

use super::state::Outcome;
use crate::types::{Error, InformationId, SessionId};

/// Outcome code carried by a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "KO")]
    Ko,
    #[serde(rename = "CN")]
    Cn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub session: SessionId,
    /// Id of the request this response completes.
    pub reference: InformationId,
    pub code: ResponseCode,
    /// Serialized success value.
    #[serde(default)]
    pub body: Option<Vec<u8>>,
    /// Failure cause, for `KO`.
    #[serde(default)]
    pub cause: Option<String>,
}

impl Response {
    pub fn from_outcome(
        session: SessionId,
        reference: InformationId,
        outcome: &Outcome,
        body: Option<Vec<u8>>,
    ) -> Self {
        let (code, body, cause) = match outcome {
            Outcome::Successful => (ResponseCode::Ok, body, None),
            Outcome::Failed(err) => (ResponseCode::Ko, None, Some(err.to_string())),
            Outcome::Cancelled => (ResponseCode::Cn, None, None),
        };
        Self {
            session,
            reference,
            code,
            body,
            cause,
        }
    }

    /// The outcome to drive the local pending request to. The body is decoded
    /// separately by the caller.
    pub fn outcome(&self) -> Outcome {
        match self.code {
            ResponseCode::Ok => Outcome::Successful,
            ResponseCode::Ko => Outcome::Failed(Error::remote(
                self.cause
                    .clone()
                    .unwrap_or_else(|| "no cause transmitted".to_string()),
            )),
            ResponseCode::Cn => Outcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_keeps_cause_and_drops_body() {
        let response = Response::from_outcome(
            SessionId::new(),
            InformationId::new(),
            &Outcome::Failed(Error::failed("disk full")),
            Some(vec![1, 2]),
        );
        assert_eq!(response.code, ResponseCode::Ko);
        assert!(response.body.is_none());
        match response.outcome() {
            Outcome::Failed(Error::Remote(cause)) => assert!(cause.contains("disk full")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_code_serializes_as_two_letters() {
        assert_eq!(serde_json::to_string(&ResponseCode::Cn).unwrap(), "\"CN\"");
    }
}

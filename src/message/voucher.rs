//! Vouchers: requests that carry a typed result on success.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::request::Request;
use crate::types::{Error, Result};

/// Turns a transmitted success body into the voucher's typed value and
/// completes it. Used by network connections for remote vouchers.
pub type Resolver = Box<dyn FnOnce(Option<Value>) -> Result<()> + Send + 'static>;

pub struct Voucher<T> {
    request: Request,
    value: Arc<Mutex<Option<T>>>,
}

impl<T> Voucher<T> {
    pub fn new() -> Self {
        Self {
            request: Request::new(),
            value: Arc::new(Mutex::new(None)),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Store `value` and succeed.
    pub fn resolve(&self, value: T) -> Result<()> {
        {
            let mut slot = self.value.lock();
            if slot.is_some() || self.request.is_done() {
                return Err(Error::state_violation(format!(
                    "voucher {} already resolved",
                    self.request.id()
                )));
            }
            *slot = Some(value);
        }
        self.request.succeed()
    }
}

impl<T: Clone> Voucher<T> {
    /// The result value; only available after success.
    pub fn value(&self) -> Result<T> {
        if !self.request.is_successful() {
            return Err(match self.request.cause() {
                Some(cause) => cause,
                None => Error::state_violation(format!(
                    "voucher {} is {}, not successful",
                    self.request.id(),
                    self.request.state()
                )),
            });
        }
        self.value
            .lock()
            .clone()
            .ok_or_else(|| Error::internal("successful voucher without value"))
    }
}

impl<T> Voucher<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Resolver decoding a transmitted body into `T`.
    pub fn resolver(&self) -> Resolver {
        let voucher = self.clone();
        Box::new(move |body| {
            let body = body.unwrap_or(Value::Null);
            match serde_json::from_value::<T>(body) {
                Ok(value) => voucher.resolve(value),
                Err(e) => {
                    let err = Error::Serialization(format!(
                        "voucher {} body: {}",
                        voucher.request.id(),
                        e
                    ));
                    voucher.request.try_complete(super::Outcome::Failed(err.clone()));
                    Err(err)
                }
            }
        })
    }
}

impl<T> Clone for Voucher<T> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            value: self.value.clone(),
        }
    }
}

impl<T> Default for Voucher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for Voucher<T> {
    type Target = Request;

    fn deref(&self) -> &Request {
        &self.request
    }
}

impl<T> fmt::Debug for Voucher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Voucher")
            .field("id", self.request.id())
            .field("state", &self.request.state())
            .finish()
    }
}

//! Interceptors around public cache operations
//!
//! Every operation runs through the registered interceptors in order:
//! - `pre` may short-circuit with a result, skipping the operation
//! - `post` may rewrite a successful result
//! - `exception` may turn an error into a result, or pass it on
//!
//! Results travel as [`Outcome`] and are converted back to the
//! operation's return type; a mismatched variant is an invalid argument.

use crate::entry::{CasToken, EntryMetadata};
use crate::scan::ScanItem;
use bytes::Bytes;
use fscache_common::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Public operation being intercepted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    GetItem,
    GetWithToken,
    GetItems,
    HasItem,
    HasItems,
    GetMetadata,
    GetMetadatas,
    SetItem,
    SetItems,
    AddItem,
    AddItems,
    ReplaceItem,
    ReplaceItems,
    CheckAndSetItem,
    TouchItem,
    TouchItems,
    RemoveItem,
    RemoveItems,
    Find,
    Fetch,
    Clear,
    ClearByNamespace,
    Optimize,
}

impl Operation {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GetItem => "getItem",
            Self::GetWithToken => "getWithToken",
            Self::GetItems => "getItems",
            Self::HasItem => "hasItem",
            Self::HasItems => "hasItems",
            Self::GetMetadata => "getMetadata",
            Self::GetMetadatas => "getMetadatas",
            Self::SetItem => "setItem",
            Self::SetItems => "setItems",
            Self::AddItem => "addItem",
            Self::AddItems => "addItems",
            Self::ReplaceItem => "replaceItem",
            Self::ReplaceItems => "replaceItems",
            Self::CheckAndSetItem => "checkAndSetItem",
            Self::TouchItem => "touchItem",
            Self::TouchItems => "touchItems",
            Self::RemoveItem => "removeItem",
            Self::RemoveItems => "removeItems",
            Self::Find => "find",
            Self::Fetch => "fetch",
            Self::Clear => "clear",
            Self::ClearByNamespace => "clearByNamespace",
            Self::Optimize => "optimize",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments of an intercepted call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub operation: Operation,
    pub namespace: String,
    pub keys: Vec<String>,
}

impl Event {
    pub fn new<I, K>(operation: Operation, namespace: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            operation,
            namespace: namespace.to_string(),
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// The result reported when an error is suppressed
    ///
    /// Batch writes report every key as failed.
    #[must_use]
    pub fn neutral_outcome(&self) -> Outcome {
        match self.operation {
            Operation::GetItem => Outcome::Value(None),
            Operation::GetWithToken => Outcome::Tokenized(None),
            Operation::GetItems => Outcome::Values(BTreeMap::new()),
            Operation::HasItems => Outcome::Keys(Vec::new()),
            Operation::GetMetadata => Outcome::Metadata(None),
            Operation::GetMetadatas => Outcome::Metadatas(BTreeMap::new()),
            Operation::SetItems
            | Operation::AddItems
            | Operation::ReplaceItems
            | Operation::TouchItems
            | Operation::RemoveItems => Outcome::Keys(self.keys.clone()),
            Operation::Fetch => Outcome::Item(None),
            Operation::HasItem
            | Operation::SetItem
            | Operation::AddItem
            | Operation::ReplaceItem
            | Operation::CheckAndSetItem
            | Operation::TouchItem
            | Operation::RemoveItem
            | Operation::Find
            | Operation::Clear
            | Operation::ClearByNamespace
            | Operation::Optimize => Outcome::Bool(false),
        }
    }
}

/// Type-erased operation result
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Bool(bool),
    Value(Option<Bytes>),
    Tokenized(Option<(Bytes, CasToken)>),
    Values(BTreeMap<String, Bytes>),
    Keys(Vec<String>),
    Metadata(Option<EntryMetadata>),
    Metadatas(BTreeMap<String, EntryMetadata>),
    Item(Option<ScanItem>),
}

impl Outcome {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Value(_) => "value",
            Self::Tokenized(_) => "value with token",
            Self::Values(_) => "values",
            Self::Keys(_) => "keys",
            Self::Metadata(_) => "metadata",
            Self::Metadatas(_) => "metadata map",
            Self::Item(_) => "scan item",
        }
    }
}

/// Conversion between an operation's return type and [`Outcome`]
pub trait OutcomeValue: Sized {
    fn into_outcome(self) -> Outcome;
    fn from_outcome(outcome: Outcome) -> Result<Self>;
}

fn mismatch(expected: &str, got: &Outcome) -> Error {
    Error::invalid_argument(format!(
        "interceptor returned a {} result where a {expected} was expected",
        got.kind()
    ))
}

macro_rules! outcome_value {
    ($ty:ty, $variant:ident, $expected:literal) => {
        impl OutcomeValue for $ty {
            fn into_outcome(self) -> Outcome {
                Outcome::$variant(self)
            }

            fn from_outcome(outcome: Outcome) -> Result<Self> {
                match outcome {
                    Outcome::$variant(value) => Ok(value),
                    other => Err(mismatch($expected, &other)),
                }
            }
        }
    };
}

outcome_value!(bool, Bool, "bool");
outcome_value!(Option<Bytes>, Value, "value");
outcome_value!(Option<(Bytes, CasToken)>, Tokenized, "value with token");
outcome_value!(BTreeMap<String, Bytes>, Values, "values");
outcome_value!(Vec<String>, Keys, "keys");
outcome_value!(Option<EntryMetadata>, Metadata, "metadata");
outcome_value!(BTreeMap<String, EntryMetadata>, Metadatas, "metadata map");
outcome_value!(Option<ScanItem>, Item, "scan item");

/// Hook invoked around every public cache operation
pub trait Interceptor: Send + Sync {
    /// Return `Some` to skip the operation and use this result
    fn pre(&self, _event: &Event) -> Option<Outcome> {
        None
    }

    /// Inspect or replace the result of a successful operation
    fn post(&self, _event: &Event, _outcome: &mut Outcome) {}

    /// Handle a failed operation; `Ok` suppresses the error
    fn exception(&self, _event: &Event, error: Error) -> Result<Outcome> {
        Err(error)
    }
}

/// Run `op` through `interceptors`
pub fn intercept<T, F>(interceptors: &[Arc<dyn Interceptor>], event: &Event, op: F) -> Result<T>
where
    T: OutcomeValue,
    F: FnOnce() -> Result<T>,
{
    if interceptors.is_empty() {
        return op();
    }

    for interceptor in interceptors {
        if let Some(outcome) = interceptor.pre(event) {
            debug!("{} short-circuited by interceptor", event.operation);
            return T::from_outcome(outcome);
        }
    }

    match op() {
        Ok(value) => {
            let mut outcome = value.into_outcome();
            for interceptor in interceptors {
                interceptor.post(event, &mut outcome);
            }
            T::from_outcome(outcome)
        }
        Err(mut error) => {
            for interceptor in interceptors {
                match interceptor.exception(event, error) {
                    Ok(outcome) => return T::from_outcome(outcome),
                    Err(passed) => error = passed,
                }
            }
            Err(error)
        }
    }
}

type ErrorCallback = Box<dyn Fn(&Event, &Error) + Send + Sync>;

/// Interceptor that reports errors and optionally swallows them
///
/// Swallowed errors become the operation's neutral result (`false`, a
/// miss, or every key reported as failed).
pub struct ExceptionHandler {
    callback: Option<ErrorCallback>,
    throw_exceptions: bool,
}

impl ExceptionHandler {
    /// Handler that rethrows by default
    #[must_use]
    pub fn new() -> Self {
        Self {
            callback: None,
            throw_exceptions: true,
        }
    }

    /// Call `callback` with every error
    #[must_use]
    pub fn with_callback(mut self, callback: impl Fn(&Event, &Error) + Send + Sync + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Whether errors continue to the caller
    #[must_use]
    pub const fn throw_exceptions(mut self, throw: bool) -> Self {
        self.throw_exceptions = throw;
        self
    }
}

impl Default for ExceptionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExceptionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionHandler")
            .field("callback", &self.callback.is_some())
            .field("throw_exceptions", &self.throw_exceptions)
            .finish()
    }
}

impl Interceptor for ExceptionHandler {
    fn exception(&self, event: &Event, error: Error) -> Result<Outcome> {
        if let Some(callback) = &self.callback {
            callback(event, &error);
        }
        if self.throw_exceptions {
            Err(error)
        } else {
            debug!("{} error suppressed: {}", event.operation, error);
            Ok(event.neutral_outcome())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(Outcome);

    impl Interceptor for Fixed {
        fn pre(&self, _event: &Event) -> Option<Outcome> {
            Some(self.0.clone())
        }
    }

    struct Negate;

    impl Interceptor for Negate {
        fn post(&self, _event: &Event, outcome: &mut Outcome) {
            if let Outcome::Bool(value) = outcome {
                *value = !*value;
            }
        }
    }

    fn event() -> Event {
        Event::new(Operation::SetItem, "app", ["foo"])
    }

    #[test]
    fn test_no_interceptors_runs_op() {
        let result: bool = intercept(&[], &event(), || Ok(true)).unwrap();
        assert!(result);
    }

    #[test]
    fn test_pre_short_circuits() {
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![Arc::new(Fixed(Outcome::Bool(false)))];
        let ran = AtomicUsize::new(0);
        let result: bool = intercept(&interceptors, &event(), || {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
        .unwrap();
        assert!(!result);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_post_rewrites_result() {
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![Arc::new(Negate)];
        let result: bool = intercept(&interceptors, &event(), || Ok(true)).unwrap();
        assert!(!result);
    }

    #[test]
    fn test_mismatched_outcome_is_rejected() {
        let interceptors: Vec<Arc<dyn Interceptor>> =
            vec![Arc::new(Fixed(Outcome::Keys(Vec::new())))];
        let result: Result<bool> = intercept(&interceptors, &event(), || Ok(true));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_exception_handler_rethrows_and_reports() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handler = ExceptionHandler::new().with_callback(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![Arc::new(handler)];

        let result: Result<bool> =
            intercept(&interceptors, &event(), || Err(Error::runtime("disk on fire")));
        assert!(matches!(result, Err(Error::Runtime(_))));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exception_handler_suppresses() {
        let handler = ExceptionHandler::new().throw_exceptions(false);
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![Arc::new(handler)];

        let result: bool =
            intercept(&interceptors, &event(), || Err(Error::runtime("disk on fire"))).unwrap();
        assert!(!result);

        let batch = Event::new(Operation::RemoveItems, "app", ["a", "b"]);
        let failed: Vec<String> =
            intercept(&interceptors, &batch, || Err(Error::runtime("disk on fire"))).unwrap();
        assert_eq!(failed, vec!["a".to_string(), "b".to_string()]);
    }
}

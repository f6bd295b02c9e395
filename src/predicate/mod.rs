//! Predicate ordering and scoring.
//!
//! A registration (a view, a route, a subscriber) may be guarded by
//! predicates, boolean conditions evaluated against a request at dispatch
//! time. Each dispatch phase has its own [`PredicateList`] of named factories,
//! ordered by presumed evaluation cost through a [`TopologicalSorter`].
//!
//! [`PredicateList::make`] turns the predicate values supplied for one
//! registration into a [`PredicateSet`]:
//!
//! * the guards, in canonical evaluation order, cheapest first;
//! * a fingerprint identifying the guard set, so that two registrations that
//!   differ only by identical guards are recognised as the same;
//! * a priority. Every guard gets the weight `1 << (position + 1)`, the
//!   weights are ORed into a score, and the priority is
//!   `(MAX_ORDER - score) / (guards + 1)`. More guards mean a smaller
//!   priority, and smaller priorities are tried first. A registration with no
//!   guards gets `MAX_ORDER` and is tried last.
//!
//! Priorities are signed: once scores outgrow `MAX_ORDER` they turn negative
//! and keep ordering the same way.

pub mod builtin;

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;

use crate::core::{ArcStr, Blake3Hasher, Hash32};
use crate::error::{ConfigError, PredicateError};
use crate::graph::{Anchor, TopologicalSorter};

/// The priority of a registration without any guard.
pub const MAX_ORDER: i128 = 1 << 30;

/// Weights must stay positive `i128`s.
const MAX_POSITIONS: usize = 126;

/// The dispatch phase a predicate list belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateKind {
    View,
    Route,
    Subscriber,
}

impl fmt::Display for PredicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::View => write!(f, "view"),
            Self::Route => write!(f, "route"),
            Self::Subscriber => write!(f, "subscriber"),
        }
    }
}

/// What a predicate can see of a request.
pub trait Request {
    fn method(&self) -> &str;

    fn path(&self) -> &str;

    fn header(&self, name: &str) -> Option<&str>;

    fn param(&self, name: &str) -> Option<&str>;
}

/// A guard attached to a registration.
pub trait Predicate {
    /// Human readable description, e.g. `request_method = GET`.
    fn text(&self) -> String;

    /// The values contributing to the fingerprint of the predicate set.
    fn phash(&self) -> Vec<String> {
        vec![self.text()]
    }

    fn matches(&self, request: &dyn Request) -> bool;
}

/// Builds a predicate from the value supplied for it.
pub type PredicateFactory = Rc<dyn Fn(&Value) -> anyhow::Result<Box<dyn Predicate>>>;

struct Notted(Box<dyn Predicate>);

impl Predicate for Notted {
    fn text(&self) -> String {
        format!("!{}", self.0.text())
    }

    fn phash(&self) -> Vec<String> {
        self.0.phash().into_iter().map(|h| format!("!{h}")).collect()
    }

    fn matches(&self, request: &dyn Request) -> bool {
        !self.0.matches(request)
    }
}

/// One value supplied for a predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum PredicateValue {
    Is(Value),
    /// The guard passes when the predicate built from the value fails.
    Not(Value),
}

/// The predicate values of one registration, by predicate name.
///
/// A name may carry several values, each one becomes its own guard.
#[derive(Clone, Debug, Default)]
pub struct PredicateArgs(BTreeMap<ArcStr, Vec<PredicateValue>>);

impl PredicateArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<ArcStr>, value: impl Into<Value>) -> Self {
        self.push(name, PredicateValue::Is(value.into()));
        self
    }

    pub fn with_not(mut self, name: impl Into<ArcStr>, value: impl Into<Value>) -> Self {
        self.push(name, PredicateValue::Not(value.into()));
        self
    }

    pub fn push(&mut self, name: impl Into<ArcStr>, value: PredicateValue) {
        self.0.entry(name.into()).or_default().push(value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The guards computed for one registration.
pub struct PredicateSet {
    pub priority: i128,
    pub guards: Vec<Box<dyn Predicate>>,
    pub fingerprint: Hash32,
}

impl PredicateSet {
    /// True when every guard passes. Stops at the first failing one.
    pub fn matches(&self, request: &dyn Request) -> bool {
        self.guards.iter().all(|guard| guard.matches(request))
    }

    pub fn texts(&self) -> Vec<String> {
        self.guards.iter().map(|guard| guard.text()).collect()
    }
}

impl fmt::Debug for PredicateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateSet")
            .field("priority", &self.priority)
            .field("guards", &self.texts())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// The predicate factories of one dispatch phase.
#[derive(Default)]
pub struct PredicateList {
    sorter: TopologicalSorter<PredicateFactory>,
}

impl PredicateList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory. Predicates should be added in order of presumed
    /// evaluation cost; `weighs_more_than` / `weighs_less_than` override
    /// that.
    pub fn add(
        &mut self,
        name: impl Into<ArcStr>,
        factory: PredicateFactory,
        weighs_more_than: impl IntoIterator<Item = Anchor>,
        weighs_less_than: impl IntoIterator<Item = Anchor>,
    ) {
        self.sorter
            .add(name, factory, weighs_more_than, weighs_less_than);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.sorter.remove(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sorter.names()
    }

    /// Builds the guards for one registration.
    pub fn make(&self, args: PredicateArgs) -> Result<PredicateSet, ConfigError> {
        let ordered = self.sorter.sorted()?;
        let mut remaining = args.0;

        let mut hasher = Blake3Hasher::default();
        let mut score: i128 = 0;
        let mut guards: Vec<Box<dyn Predicate>> = Vec::new();

        for (position, (name, factory)) in ordered.iter().enumerate() {
            let Some(values) = remaining.remove(*name) else {
                continue;
            };

            if position >= MAX_POSITIONS {
                return Err(PredicateError::Capacity {
                    name: (*name).into(),
                    position,
                    max: MAX_POSITIONS,
                }
                .into());
            }

            for value in values {
                let (value, negated) = match value {
                    PredicateValue::Is(value) => (value, false),
                    PredicateValue::Not(value) => (value, true),
                };

                let predicate = factory(&value).map_err(|source| PredicateError::Factory {
                    name: (*name).into(),
                    source,
                })?;

                let predicate: Box<dyn Predicate> = if negated {
                    Box::new(Notted(predicate))
                } else {
                    predicate
                };

                for hash in predicate.phash() {
                    hasher.update(hash);
                }

                score |= 1i128 << (position + 1);
                guards.push(predicate);
            }
        }

        if !remaining.is_empty() {
            let names: Vec<ArcStr> = remaining.into_keys().collect();
            let suggestions = names
                .iter()
                .filter_map(|unknown| {
                    ordered
                        .iter()
                        .map(|(name, _)| *name)
                        .min_by_key(|name| strsim::levenshtein(unknown, name))
                        .filter(|name| strsim::levenshtein(unknown, name) <= 3)
                })
                .map(ArcStr::from)
                .collect();

            return Err(PredicateError::Unknown { names, suggestions }.into());
        }

        let priority = (MAX_ORDER - score) / (guards.len() as i128 + 1);

        Ok(PredicateSet {
            priority,
            guards,
            fingerprint: hasher.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::builtin::{self, TestRequest};

    fn list() -> PredicateList {
        let mut list = PredicateList::new();
        builtin::add_defaults(&mut list);
        list
    }

    #[test]
    fn test_no_guards_sorts_last() {
        let set = list().make(PredicateArgs::new()).unwrap();

        assert_eq!(set.priority, MAX_ORDER);
        assert!(set.guards.is_empty());
        assert!(set.matches(&TestRequest::get("/")));
    }

    #[test]
    fn test_more_guards_smaller_priority() {
        let list = list();

        let one = list
            .make(PredicateArgs::new().with("request_method", "GET"))
            .unwrap();
        let two = list
            .make(
                PredicateArgs::new()
                    .with("request_method", "GET")
                    .with("path_info", "/users/*"),
            )
            .unwrap();

        assert!(one.priority > two.priority);
        assert!(two.priority < MAX_ORDER);
    }

    #[test]
    fn test_canonical_order() {
        let set = list()
            .make(
                PredicateArgs::new()
                    .with("header", "X-Api")
                    .with("request_method", "POST"),
            )
            .unwrap();

        assert_eq!(set.texts(), vec!["request_method = POST", "header X-Api"]);
    }

    #[test]
    fn test_fingerprint_stable() {
        let list = list();
        let args = || {
            PredicateArgs::new()
                .with("request_method", "GET")
                .with("request_param", "page")
        };

        let a = list.make(args()).unwrap();
        let b = list.make(args()).unwrap();
        let c = list
            .make(PredicateArgs::new().with("request_method", "POST"))
            .unwrap();

        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.priority, b.priority);
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn test_negation() {
        let set = list()
            .make(PredicateArgs::new().with_not("request_method", "POST"))
            .unwrap();
        let plain = list()
            .make(PredicateArgs::new().with("request_method", "POST"))
            .unwrap();

        assert!(set.matches(&TestRequest::get("/")));
        assert!(!set.matches(&TestRequest::new("POST", "/")));
        assert_ne!(set.fingerprint, plain.fingerprint);
    }

    #[test]
    fn test_short_circuit() {
        let set = list()
            .make(
                PredicateArgs::new()
                    .with("request_method", "GET")
                    .with("path_info", "/admin/*"),
            )
            .unwrap();

        assert!(set.matches(&TestRequest::get("/admin/users")));
        assert!(!set.matches(&TestRequest::get("/public")));
        assert!(!set.matches(&TestRequest::new("DELETE", "/admin/users")));
    }

    struct Always;

    impl Predicate for Always {
        fn text(&self) -> String {
            "always".into()
        }

        fn matches(&self, _: &dyn Request) -> bool {
            true
        }
    }

    fn long_list(len: usize) -> PredicateList {
        let mut list = PredicateList::new();
        for i in 0..len {
            let factory: PredicateFactory = Rc::new(|_: &Value| -> anyhow::Result<Box<dyn Predicate>> {
                Ok(Box::new(Always))
            });
            list.add(format!("p{i}"), factory, [], []);
        }
        list
    }

    #[test]
    fn test_priority_ordering_past_max_order() {
        let list = long_list(70);

        let one = list.make(PredicateArgs::new().with("p35", true)).unwrap();
        let two = list
            .make(PredicateArgs::new().with("p35", true).with("p36", true))
            .unwrap();
        let far = list
            .make(PredicateArgs::new().with("p65", true).with("p66", true))
            .unwrap();

        assert!(one.priority > two.priority);
        assert!(two.priority > far.priority);
        assert!(one.priority < 0);
    }

    #[test]
    fn test_priority_capacity() {
        let list = long_list(130);

        let err = list
            .make(PredicateArgs::new().with("p127", true))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Predicate(PredicateError::Capacity { position: 127, .. })
        ));
    }

    #[test]
    fn test_unknown_predicate() {
        let err = list()
            .make(PredicateArgs::new().with("request_methd", "GET"))
            .unwrap_err();

        let ConfigError::Predicate(PredicateError::Unknown { names, suggestions }) = err else {
            panic!("expected an unknown predicate error, got {err:?}");
        };

        assert_eq!(names, vec![ArcStr::from("request_methd")]);
        assert_eq!(suggestions, vec![ArcStr::from("request_method")]);
    }

    #[test]
    fn test_factory_failure() {
        let err = list()
            .make(PredicateArgs::new().with("request_method", 42))
            .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Predicate(PredicateError::Factory { .. })
        ));
    }
}

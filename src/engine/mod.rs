//! Deferred configuration actions.
//!
//! Configuration units never mutate the application directly. They record
//! [`Action`]s into a ledger ([`ActionState`]); a commit then resolves the
//! ledger into a conflict-free set of winners ([`ResolverState`]) and runs
//! their effects in a stable order.
//!
//! ## Ordering
//!
//! Actions are grouped by `order`, lower groups first. Within a group,
//! winners run in the order they were recorded. Every winner of a group runs
//! before the next group is even resolved, so an effect can rely on state
//! produced by lower groups (predicate factories registered in
//! [`Phase::CONFIG1`] exist by the time default-order views compute their
//! discriminators).

mod ledger;
mod resolver;
pub(crate) mod runner;

use std::fmt;
use std::rc::Rc;

use crate::Configurator;
use crate::core::{ActionInfo, IncludePath};
use crate::discriminator::Discriminator;
use crate::introspect::Introspectable;

pub use crate::engine::ledger::ActionState;
pub use crate::engine::resolver::{ResolverState, resolve_conflicts};

/// Well-known `order` values.
///
/// Framework-level registrations that other registrations depend on run in
/// the earlier phases.
pub struct Phase;

impl Phase {
    pub const CONFIG0: i32 = -30;
    pub const CONFIG1: i32 = -20;
    pub const CONFIG2: i32 = -10;
    pub const DEFAULT: i32 = 0;
}

type EffectFn = dyn Fn(&Configurator) -> anyhow::Result<()>;

type DeferredFn = dyn Fn() -> anyhow::Result<Option<Discriminator>>;

/// The side effect of an action.
///
/// Cloning an `Effect` shares the same callable; two clones are considered
/// the same effect by the conflict resolver.
#[derive(Clone)]
pub struct Effect(Rc<EffectFn>);

impl Effect {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Configurator) -> anyhow::Result<()> + 'static,
    {
        Self(Rc::new(func))
    }

    /// True when both handles point at the same callable.
    pub fn same(&self, other: &Effect) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }

    pub(crate) fn call(&self, config: &Configurator) -> anyhow::Result<()> {
        (self.0)(config)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Effect(*)")
    }
}

/// A discriminator that is either known up front or computed when the
/// action's order group starts resolving.
#[derive(Clone)]
pub(crate) enum Key {
    Ready(Option<Discriminator>),
    Deferred(Rc<DeferredFn>),
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Ready(discriminator) => discriminator.fmt(f),
            Key::Deferred(_) => write!(f, "Deferred(*)"),
        }
    }
}

/// One recorded registration.
///
/// Records are immutable once created. The only change the engine ever makes
/// is fixing a deferred discriminator, exactly once.
#[derive(Clone, Debug)]
pub struct Action {
    pub(crate) key: Key,
    pub(crate) effect: Option<Effect>,
    pub(crate) order: i32,
    pub(crate) include_path: IncludePath,
    pub(crate) info: ActionInfo,
    pub(crate) introspectables: Vec<Introspectable>,
    pub(crate) sequence: u64,
}

impl Action {
    pub fn new(discriminator: Option<Discriminator>, info: ActionInfo) -> Self {
        Self {
            key: Key::Ready(discriminator),
            effect: None,
            order: Phase::DEFAULT,
            include_path: IncludePath::root(),
            info,
            introspectables: Vec::new(),
            sequence: 0,
        }
    }

    pub fn deferred<F>(func: F, info: ActionInfo) -> Self
    where
        F: Fn() -> anyhow::Result<Option<Discriminator>> + 'static,
    {
        Self {
            key: Key::Deferred(Rc::new(func)),
            ..Self::new(None, info)
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_include_path(mut self, include_path: IncludePath) -> Self {
        self.include_path = include_path;
        self
    }

    pub fn with_introspectable(mut self, introspectable: Introspectable) -> Self {
        self.introspectables.push(introspectable);
        self
    }

    /// The discriminator, or `None` when the action can never conflict or its
    /// discriminator is still deferred.
    pub fn discriminator(&self) -> Option<&Discriminator> {
        match &self.key {
            Key::Ready(discriminator) => discriminator.as_ref(),
            Key::Deferred(_) => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.key, Key::Deferred(_))
    }

    pub fn effect(&self) -> Option<&Effect> {
        self.effect.as_ref()
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn include_path(&self) -> &IncludePath {
        &self.include_path
    }

    pub fn info(&self) -> &ActionInfo {
        &self.info
    }

    pub fn introspectables(&self) -> &[Introspectable] {
        &self.introspectables
    }

    /// Position in the ledger, assigned when the action was recorded.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Computes a deferred discriminator. Has no effect once it is fixed.
    pub(crate) fn undefer(&mut self) -> anyhow::Result<()> {
        if let Key::Deferred(func) = &self.key {
            let discriminator = func()?;
            self.key = Key::Ready(discriminator);
        }

        Ok(())
    }

    /// Same include path and the very same effect: recording it again is
    /// harmless.
    pub(crate) fn duplicates(&self, path: &IncludePath, effect: Option<&Effect>) -> bool {
        match (&self.effect, effect) {
            (Some(a), Some(b)) => self.include_path == *path && a.same(b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefer_once() {
        let calls = Rc::new(std::cell::Cell::new(0));
        let counter = calls.clone();

        let mut action = Action::deferred(
            move || {
                counter.set(counter.get() + 1);
                Ok(Some(Discriminator::route("home")))
            },
            ActionInfo::caller(),
        );

        assert!(action.is_deferred());
        assert_eq!(action.discriminator(), None);

        action.undefer().unwrap();
        action.undefer().unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(action.discriminator(), Some(&Discriminator::route("home")));
    }

    #[test]
    fn test_effect_identity() {
        let effect = Effect::new(|_| Ok(()));
        let other = Effect::new(|_| Ok(()));

        let action = Action::new(None, ActionInfo::caller()).with_effect(effect.clone());

        assert!(effect.same(&effect.clone()));
        assert!(!effect.same(&other));
        assert!(action.duplicates(&IncludePath::root(), Some(&effect)));
        assert!(!action.duplicates(&IncludePath::new(["a"]), Some(&effect)));
        assert!(!action.duplicates(&IncludePath::root(), Some(&other)));
        assert!(!action.duplicates(&IncludePath::root(), None));
    }
}

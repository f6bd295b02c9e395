use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::core::{ActionInfo, ArcStr, IncludePath};
use crate::discriminator::Discriminator;
use crate::engine::{Action, ActionState, Effect, Phase, runner};
use crate::error::ConfigError;
use crate::graph::Anchor;
use crate::introspect::{Introspectable, IntrospectionSink, Introspector};
use crate::predicate::{PredicateArgs, PredicateFactory, PredicateKind, PredicateList, PredicateSet, builtin};
use crate::settings::Settings;

/// A named piece of configuration that can be included into a
/// [`Configurator`].
pub trait ConfigUnit {
    fn name(&self) -> &str;

    fn configure(&self, config: &Configurator) -> anyhow::Result<()>;
}

struct Shared {
    ledger: RefCell<ActionState>,
    settings: Settings,
    introspector: Option<Rc<RefCell<Introspector>>>,
    sink: Option<Rc<RefCell<dyn IntrospectionSink>>>,
    predicates: RefCell<BTreeMap<PredicateKind, PredicateList>>,
}

/// The handle configuration units record their actions through.
///
/// Clones are cheap and share the ledger, the settings, the introspection
/// sink and the predicate lists. Each handle carries its own include path,
/// which is stamped on every action recorded through it.
#[derive(Clone)]
pub struct Configurator {
    shared: Rc<Shared>,
    include_path: IncludePath,
}

impl fmt::Debug for Configurator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configurator")
            .field("include_path", &self.include_path)
            .field("settings", &self.shared.settings)
            .field("pending", &self.shared.ledger.borrow().len())
            .finish_non_exhaustive()
    }
}

impl Default for Configurator {
    fn default() -> Self {
        Self::new()
    }
}

impl Configurator {
    pub fn new() -> Self {
        Self::builder().finish()
    }

    pub fn builder() -> ConfiguratorBuilder {
        ConfiguratorBuilder::default()
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    pub fn include_path(&self) -> &IncludePath {
        &self.include_path
    }

    /// The built-in introspector, when introspection is enabled and no
    /// custom sink was configured.
    pub fn introspector(&self) -> Option<Rc<RefCell<Introspector>>> {
        self.shared.introspector.clone()
    }

    /// The configuration unit currently being included, if any.
    pub fn active_unit(&self) -> Option<ArcStr> {
        self.shared.ledger.borrow().active_unit().cloned()
    }

    /// Actions recorded and not executed yet.
    pub fn pending_actions(&self) -> Vec<Action> {
        self.shared.ledger.borrow().actions().to_vec()
    }

    pub(crate) fn ledger(&self) -> &RefCell<ActionState> {
        &self.shared.ledger
    }

    pub(crate) fn introspection_sink(&self) -> Option<Rc<RefCell<dyn IntrospectionSink>>> {
        self.shared.sink.clone()
    }

    /// A handle that does not keep the ledger alive.
    pub fn downgrade(&self) -> WeakConfigurator {
        WeakConfigurator {
            shared: Rc::downgrade(&self.shared),
            include_path: self.include_path.clone(),
        }
    }

    /// A handle on the same ledger at another include path.
    pub(crate) fn at(&self, include_path: IncludePath) -> Configurator {
        Configurator {
            shared: self.shared.clone(),
            include_path,
        }
    }

    /// Starts an action that conflicts with any other action sharing its
    /// discriminator.
    #[track_caller]
    pub fn action(&self, discriminator: Discriminator) -> ActionBuilder<'_> {
        let info = self.origin();
        ActionBuilder::new(self, Action::new(Some(discriminator), info))
    }

    /// Starts an action that never conflicts.
    #[track_caller]
    pub fn action_unkeyed(&self) -> ActionBuilder<'_> {
        let info = self.origin();
        ActionBuilder::new(self, Action::new(None, info))
    }

    /// Starts an action whose discriminator is computed when its order group
    /// starts resolving.
    ///
    /// The closure lives in the ledger until its group resolves. Capturing a
    /// clone of this configurator in it creates a reference cycle, which
    /// leaks the whole configurator if it is dropped before a successful
    /// commit. Capture a [`downgrade`](Self::downgrade)d handle instead.
    #[track_caller]
    pub fn action_deferred<F>(&self, discriminator: F) -> ActionBuilder<'_>
    where
        F: Fn() -> anyhow::Result<Option<Discriminator>> + 'static,
    {
        let info = self.origin();
        ActionBuilder::new(self, Action::deferred(discriminator, info))
    }

    #[track_caller]
    fn origin(&self) -> ActionInfo {
        ActionInfo::caller().with_unit(self.active_unit())
    }

    /// Runs a configuration unit with a configurator whose include path is
    /// extended by `name`.
    ///
    /// A unit is only ever included once per ledger, later includes of the
    /// same name do nothing.
    pub fn include<F>(&self, name: impl Into<ArcStr>, unit: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&Configurator) -> anyhow::Result<()>,
    {
        let name = name.into();

        if !self.ledger().borrow_mut().mark_included(&name) {
            tracing::debug!(unit = %name, "already included");
            return Ok(());
        }

        let span = tracing::debug_span!("include", unit = %name);
        let _enter = span.enter();

        let child = self.at(self.include_path.child(name.clone()));
        let _scope = ScopeGuard::push(self.ledger(), name.clone());

        unit(&child).map_err(|err| ConfigError::Unit(name, err))
    }

    pub fn include_unit<U>(&self, unit: &U) -> Result<(), ConfigError>
    where
        U: ConfigUnit + ?Sized,
    {
        self.include(unit.name(), |config| unit.configure(config))
    }

    /// Resolves and executes everything recorded so far.
    ///
    /// Returns the executed winners in execution order. On failure the
    /// actions that did not run stay in the ledger.
    pub fn commit(&self) -> Result<Vec<Action>, ConfigError> {
        runner::execute_actions(self)
    }

    /// Registers a predicate factory for a dispatch phase.
    ///
    /// The factory is only added once the action runs in [`Phase::CONFIG1`],
    /// so registering the same name twice is subject to conflict
    /// resolution like any other action.
    #[track_caller]
    pub fn add_predicate(
        &self,
        kind: PredicateKind,
        name: impl Into<ArcStr>,
        factory: PredicateFactory,
        weighs_more_than: Vec<Anchor>,
        weighs_less_than: Vec<Anchor>,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        let discriminator = Discriminator::predicate(kind, name.clone());
        let intr = Introspectable::new(
            "predicates",
            discriminator.clone(),
            name.to_string(),
            format!("{kind} predicate"),
        );

        self.action(discriminator)
            .order(Phase::CONFIG1)
            .introspectable(intr)
            .run(move |config| {
                config.shared.predicates.borrow_mut().entry(kind).or_default().add(
                    name.clone(),
                    factory.clone(),
                    weighs_more_than.clone(),
                    weighs_less_than.clone(),
                );
                Ok(())
            })
    }

    /// Registers the built-in predicates for a dispatch phase.
    #[track_caller]
    pub fn add_default_predicates(&self, kind: PredicateKind) -> Result<(), ConfigError> {
        self.action(Discriminator::custom("default_predicates", [kind.to_string()]))
            .order(Phase::CONFIG1)
            .run(move |config| {
                builtin::add_defaults(config.shared.predicates.borrow_mut().entry(kind).or_default());
                Ok(())
            })
    }

    /// Builds the guards for one registration from the predicates registered
    /// so far.
    pub fn make_predicates(&self, kind: PredicateKind, args: PredicateArgs) -> Result<PredicateSet, ConfigError> {
        match self.shared.predicates.borrow().get(&kind) {
            Some(list) => list.make(args),
            None => PredicateList::new().make(args),
        }
    }
}

/// A [`Configurator`] handle that does not own the ledger, for closures
/// stored inside it.
#[derive(Clone)]
pub struct WeakConfigurator {
    shared: Weak<Shared>,
    include_path: IncludePath,
}

impl WeakConfigurator {
    /// The configurator, unless it was dropped already.
    pub fn upgrade(&self) -> Option<Configurator> {
        Some(Configurator {
            shared: self.shared.upgrade()?,
            include_path: self.include_path.clone(),
        })
    }
}

impl fmt::Debug for WeakConfigurator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConfigurator")
            .field("include_path", &self.include_path)
            .finish_non_exhaustive()
    }
}

/// Pops the active unit when dropped, whichever way the include ends.
struct ScopeGuard<'a> {
    ledger: &'a RefCell<ActionState>,
}

impl<'a> ScopeGuard<'a> {
    fn push(ledger: &'a RefCell<ActionState>, unit: ArcStr) -> Self {
        ledger.borrow_mut().push_scope(unit);
        Self { ledger }
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.ledger.borrow_mut().pop_scope();
    }
}

/// Builder for a single action, see [`Configurator::action`].
#[must_use = "an action is only recorded by `run` or `record`"]
pub struct ActionBuilder<'a> {
    config: &'a Configurator,
    action: Action,
}

impl<'a> ActionBuilder<'a> {
    fn new(config: &'a Configurator, action: Action) -> Self {
        let action = action.with_include_path(config.include_path.clone());
        Self { config, action }
    }

    pub fn order(mut self, order: i32) -> Self {
        self.action = self.action.with_order(order);
        self
    }

    pub fn introspectable(mut self, introspectable: Introspectable) -> Self {
        self.action = self.action.with_introspectable(introspectable);
        self
    }

    /// Replaces the captured origin.
    pub fn info(mut self, info: ActionInfo) -> Self {
        self.action.info = info;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.action.info = self.action.info.with_description(description);
        self
    }

    /// Attaches an existing effect. Recording the same effect twice from the
    /// same include path is a harmless duplicate.
    pub fn effect(mut self, effect: Effect) -> Self {
        self.action = self.action.with_effect(effect);
        self
    }

    /// Records the action with `effect` as its side effect.
    pub fn run<F>(self, effect: F) -> Result<(), ConfigError>
    where
        F: Fn(&Configurator) -> anyhow::Result<()> + 'static,
    {
        self.effect(Effect::new(effect)).record()
    }

    /// Records the action.
    ///
    /// With autocommit the effect runs right away instead, and no conflict
    /// detection takes place.
    pub fn record(self) -> Result<(), ConfigError> {
        if self.config.settings().autocommit {
            runner::execute_action(self.config, &self.action)?;
        } else {
            self.config.ledger().borrow_mut().push(self.action);
        }

        Ok(())
    }
}

/// Builder for a [`Configurator`].
#[derive(Default)]
pub struct ConfiguratorBuilder {
    settings: Settings,
    sink: Option<Rc<RefCell<dyn IntrospectionSink>>>,
}

impl ConfiguratorBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn autocommit(mut self, autocommit: bool) -> Self {
        self.settings.autocommit = autocommit;
        self
    }

    pub fn introspection(mut self, introspection: bool) -> Self {
        self.settings.introspection = introspection;
        self
    }

    /// Uses a custom sink instead of the built-in [`Introspector`].
    pub fn introspector<S>(mut self, sink: Rc<RefCell<S>>) -> Self
    where
        S: IntrospectionSink + 'static,
    {
        self.sink = Some(sink);
        self
    }

    pub fn finish(self) -> Configurator {
        let (introspector, sink) = match (self.settings.introspection, self.sink) {
            (false, _) => (None, None),
            (true, Some(sink)) => (None, Some(sink)),
            (true, None) => {
                let introspector = Rc::new(RefCell::new(Introspector::new()));
                let sink: Rc<RefCell<dyn IntrospectionSink>> = introspector.clone();
                (Some(introspector), Some(sink))
            }
        };

        Configurator {
            shared: Rc::new(Shared {
                ledger: RefCell::new(ActionState::new()),
                settings: self.settings,
                introspector,
                sink,
                predicates: RefCell::new(BTreeMap::new()),
            }),
            include_path: IncludePath::root(),
        }
    }
}

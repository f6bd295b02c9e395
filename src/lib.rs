#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod core;
mod discriminator;
pub mod engine;
mod error;
pub mod graph;
mod introspect;
pub mod predicate;
mod settings;
mod utils;

pub use crate::config::{ActionBuilder, ConfigUnit, Configurator, ConfiguratorBuilder, WeakConfigurator};
pub use crate::core::{ActionInfo, ArcStr, Hash32, IncludePath};
pub use crate::discriminator::Discriminator;
pub use crate::engine::{Action, ActionState, Effect, Phase, ResolverState, resolve_conflicts};
pub use crate::error::*;
pub use crate::graph::{Anchor, TopologicalSorter};
pub use crate::introspect::{Entry, Introspectable, IntrospectionSink, Introspector, Relation};
pub use crate::predicate::{
    MAX_ORDER, Predicate, PredicateArgs, PredicateFactory, PredicateKind, PredicateList,
    PredicateSet, PredicateValue, Request,
};
pub use crate::settings::{Settings, asbool};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::core::{ActionInfo, ArcStr};
use crate::discriminator::Discriminator;

/// Two or more actions share a discriminator and none of them is a strict
/// refinement of the other.
///
/// Every conflict found in one resolution pass is reported together, each
/// discriminator with all of its colliding origins (at least two).
#[derive(Debug, Clone)]
pub struct ConflictError {
    pub conflicts: BTreeMap<Discriminator, Vec<ActionInfo>>,
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Conflicting configuration actions")?;

        for (discriminator, infos) in &self.conflicts {
            write!(f, "\n  For: {discriminator}")?;
            for info in infos {
                for line in info.to_string().lines() {
                    write!(f, "\n    {line}")?;
                }
            }
        }

        Ok(())
    }
}

impl std::error::Error for ConflictError {}

/// Ordering constraints of a topological sort cannot be satisfied.
///
/// `dependents` maps every name left unsorted to the names it still had to
/// precede when the sort got stuck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub dependents: BTreeMap<ArcStr, Vec<ArcStr>>,
}

impl CycleError {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dependents.keys().map(AsRef::as_ref)
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Implicit ordering cycle:")?;

        for (name, dependents) in &self.dependents {
            write!(f, "\n  {name} sorts before {}", dependents.join(", "))?;
        }

        Ok(())
    }
}

impl std::error::Error for CycleError {}

#[derive(Debug, Error)]
pub enum SortError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("'{name}' must sort relative to '{missing}', which is not registered")]
    Unsatisfied { name: ArcStr, missing: ArcStr },
}

/// Actions were recorded for an order group that already finished executing.
#[derive(Debug, Clone)]
pub struct OrderViolationError {
    /// The order of the late actions.
    pub order: i32,
    /// The order execution had already reached.
    pub min_order: i32,
    pub infos: Vec<ActionInfo>,
}

impl fmt::Display for OrderViolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Actions were added to order={} after execution had moved on to order={}. Offending actions:",
            self.order, self.min_order
        )?;

        for info in &self.infos {
            for line in info.to_string().lines() {
                write!(f, "\n  {line}")?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for OrderViolationError {}

/// An action effect (or a deferred discriminator) failed.
#[derive(Debug, Error)]
#[error("{source}\n  in:\n  {info}")]
pub struct ExecutionError {
    pub info: ActionInfo,
    #[source]
    pub source: anyhow::Error,
}

#[derive(Debug, Error)]
pub enum PredicateError {
    #[error("Unknown predicate values: {}{}", .names.join(", "), suggest(.suggestions))]
    Unknown {
        names: Vec<ArcStr>,
        suggestions: Vec<ArcStr>,
    },

    #[error("Predicate '{name}' sits at position {position}, priorities only cover {max}")]
    Capacity {
        name: ArcStr,
        position: usize,
        max: usize,
    },

    #[error("Predicate '{name}' rejected its value:\n{source}")]
    Factory {
        name: ArcStr,
        #[source]
        source: anyhow::Error,
    },
}

fn suggest(suggestions: &[ArcStr]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean {})", suggestions.join(", "))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Sort(SortError),

    #[error(transparent)]
    OrderViolation(#[from] OrderViolationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Predicate(#[from] PredicateError),

    #[error("Invalid settings:\n{0}")]
    Settings(#[from] serde_json::Error),

    #[error("Configuration unit '{0}':\n{1}")]
    Unit(ArcStr, anyhow::Error),
}

impl From<SortError> for ConfigError {
    fn from(err: SortError) -> Self {
        match err {
            SortError::Cycle(err) => ConfigError::Cycle(err),
            err => ConfigError::Sort(err),
        }
    }
}

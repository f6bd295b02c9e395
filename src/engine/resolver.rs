use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::discriminator::Discriminator;
use crate::engine::Action;
use crate::error::{ConfigError, ConflictError, ExecutionError, OrderViolationError};

/// State carried across resolution passes of one commit.
///
/// Effects may record new actions while a commit is running. Those are fed
/// back with [`extend`](Self::extend) and resolved against the same state, so
/// winners that already ran stay authoritative.
#[derive(Debug, Default)]
pub struct ResolverState {
    /// Winners that were already handed out, by discriminator.
    resolved: HashMap<Discriminator, Action>,
    /// Not yet resolved actions, by sequence.
    pending: BTreeMap<u64, Action>,
    /// The order of the last winner handed out.
    min_order: Option<i32>,
    /// Winners of the current order group, not yet handed out.
    queue: VecDeque<u64>,
    /// Lowest sequence the next added action may carry.
    next_sequence: u64,
}

impl ResolverState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds actions to the working set. The current order group is resolved
    /// again on the next call to [`next_winner`](Self::next_winner).
    ///
    /// Sequences stamped by a ledger are kept. Actions that were never
    /// recorded, or whose sequence was already handed out, are renumbered
    /// after everything added before them.
    pub fn extend(&mut self, actions: impl IntoIterator<Item = Action>) {
        for mut action in actions {
            action.sequence = action.sequence.max(self.next_sequence);
            self.next_sequence = action.sequence + 1;
            self.pending.insert(action.sequence, action);
        }

        self.queue.clear();
    }

    pub fn min_order(&self) -> Option<i32> {
        self.min_order
    }

    pub fn is_resolved(&self, discriminator: &Discriminator) -> bool {
        self.resolved.contains_key(discriminator)
    }

    /// Returns the next winner in execution order, or `None` once nothing is
    /// left to resolve.
    ///
    /// The winner counts as resolved as soon as it is returned.
    pub fn next_winner(&mut self) -> Result<Option<Action>, ConfigError> {
        loop {
            if let Some(sequence) = self.queue.pop_front() {
                let Some(action) = self.pending.remove(&sequence) else {
                    continue;
                };

                self.min_order = Some(action.order);
                if let Some(discriminator) = action.discriminator() {
                    self.resolved.insert(discriminator.clone(), action.clone());
                }

                return Ok(Some(action));
            }

            if self.pending.is_empty() {
                return Ok(None);
            }

            self.resolve_group()?;
        }
    }

    /// Everything still unresolved, in sequence order.
    pub fn into_pending(self) -> Vec<Action> {
        self.pending.into_values().collect()
    }

    /// Resolves the lowest order group left in `pending` and queues its
    /// winners. Overridden actions are dropped from `pending`.
    fn resolve_group(&mut self) -> Result<(), ConfigError> {
        let Some(order) = self.pending.values().map(|action| action.order).min() else {
            return Ok(());
        };

        if let Some(min_order) = self.min_order
            && order < min_order
        {
            let infos = self
                .pending
                .values()
                .filter(|action| action.order == order)
                .map(|action| action.info.clone())
                .collect();

            return Err(OrderViolationError {
                order,
                min_order,
                infos,
            }
            .into());
        }

        let group: Vec<u64> = self
            .pending
            .values()
            .filter(|action| action.order == order)
            .map(|action| action.sequence)
            .collect();

        // Deferred discriminators may depend on state built by lower groups,
        // so they are only computed now.
        for sequence in &group {
            if let Some(action) = self.pending.get_mut(sequence) {
                action.undefer().map_err(|source| ExecutionError {
                    info: action.info.clone(),
                    source,
                })?;
            }
        }

        let mut winners = Vec::new();
        let mut buckets: BTreeMap<Discriminator, Vec<u64>> = BTreeMap::new();

        for sequence in group {
            match self.pending[&sequence].discriminator() {
                Some(discriminator) => buckets
                    .entry(discriminator.clone())
                    .or_default()
                    .push(sequence),
                None => winners.push(sequence),
            }
        }

        let mut conflicts = BTreeMap::new();
        let mut dropped = Vec::new();

        for (discriminator, mut candidates) in buckets {
            // The shortest include path with a given prefix comes first, ties
            // are broken by recording order.
            candidates.sort_by(|a, b| {
                let a = &self.pending[a];
                let b = &self.pending[b];
                (&a.include_path, a.sequence).cmp(&(&b.include_path, b.sequence))
            });

            let Some((&first, rest)) = candidates.split_first() else {
                continue;
            };
            let winner = &self.pending[&first];

            match self.resolved.get(&discriminator) {
                Some(previous) => {
                    if winner.include_path.is_strict_extension_of(&previous.include_path)
                        || previous.duplicates(&winner.include_path, winner.effect.as_ref())
                    {
                        dropped.push(first);
                    } else {
                        conflicts
                            .entry(discriminator.clone())
                            .or_insert_with(|| vec![previous.info.clone()])
                            .push(winner.info.clone());
                    }
                }
                None => winners.push(first),
            }

            for &sequence in rest {
                let other = &self.pending[&sequence];

                if other.include_path.is_strict_extension_of(&winner.include_path)
                    || winner.duplicates(&other.include_path, other.effect.as_ref())
                {
                    dropped.push(sequence);
                } else {
                    conflicts
                        .entry(discriminator.clone())
                        .or_insert_with(|| vec![winner.info.clone()])
                        .push(other.info.clone());
                }
            }
        }

        if !conflicts.is_empty() {
            return Err(ConflictError { conflicts }.into());
        }

        for sequence in dropped {
            if let Some(action) = self.pending.remove(&sequence) {
                tracing::debug!(
                    sequence,
                    discriminator = ?action.key,
                    path = %action.include_path,
                    "action overridden"
                );
            }
        }

        winners.sort_unstable();
        self.queue = winners.into();

        Ok(())
    }
}

/// Resolves a list of actions without executing anything.
///
/// Returns the winners in execution order.
pub fn resolve_conflicts(
    actions: impl IntoIterator<Item = Action>,
) -> Result<Vec<Action>, ConfigError> {
    let mut state = ResolverState::new();
    state.extend(actions);

    let mut winners = Vec::new();
    while let Some(action) = state.next_winner()? {
        winners.push(action);
    }

    Ok(winners)
}

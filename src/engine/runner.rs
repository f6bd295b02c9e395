use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::Configurator;
use crate::engine::{Action, ResolverState};
use crate::error::{ConfigError, ExecutionError};

/// Executes every action recorded in the configurator's ledger.
///
/// The algorithm works as follows:
/// 1. Drain the ledger into the resolver state.
/// 2. Take the next winner and run its effect, then hand its introspectables
///    to the introspection sink.
/// 3. An effect may record new actions into the same ledger. Before taking
///    the next winner the ledger is drained again, and the resolver picks up
///    the new actions with the same state, so winners that already ran stay
///    authoritative.
/// 4. The loop ends once the ledger is empty and nothing is left to resolve.
///
/// Effects that already ran are never rolled back. On failure the actions
/// that did not run are put back into the ledger so they can be inspected.
pub(crate) fn execute_actions(config: &Configurator) -> Result<Vec<Action>, ConfigError> {
    let span = tracing::info_span!("commit", path = %config.include_path());
    let _enter = span.enter();

    let mut state = ResolverState::new();
    let mut executed = Vec::new();

    let result = drive(config, &mut state, &mut executed);

    match result {
        Ok(()) => {
            tracing::info!(executed = executed.len(), "commit complete");
            Ok(executed)
        }
        Err(err) => {
            let pending = state.into_pending();
            tracing::debug!(
                executed = executed.len(),
                pending = pending.len(),
                "commit failed"
            );
            config.ledger().borrow_mut().restore(pending);
            Err(err)
        }
    }
}

fn drive(
    config: &Configurator,
    state: &mut ResolverState,
    executed: &mut Vec<Action>,
) -> Result<(), ConfigError> {
    loop {
        // The borrow must end before any effect runs, effects record into
        // this very ledger.
        let fresh = config.ledger().borrow_mut().drain();
        if !fresh.is_empty() {
            state.extend(fresh);
        }

        let Some(action) = state.next_winner()? else {
            return Ok(());
        };

        execute_action(config, &action)?;
        executed.push(action);
    }
}

/// Runs one action's effect and registers its introspectables.
///
/// The effect receives a configurator positioned at the action's include
/// path, so anything it records belongs to the same unit.
pub(crate) fn execute_action(config: &Configurator, action: &Action) -> Result<(), ExecutionError> {
    tracing::trace!(
        sequence = action.sequence,
        order = action.order,
        discriminator = ?action.key,
        "executing action"
    );

    if let Some(effect) = &action.effect {
        let scoped = config.at(action.include_path.clone());

        // A panicking effect is reported like a failing one. The ledger is
        // only ever borrowed for the duration of a single call, so nothing is
        // left half-updated.
        let result = match catch_unwind(AssertUnwindSafe(|| effect.call(&scoped))) {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("effect panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("effect panicked: {s}")
                } else {
                    String::from("effect panicked with unknown payload")
                };

                Err(anyhow::anyhow!(msg))
            }
        };

        result.map_err(|source| ExecutionError {
            info: action.info.clone(),
            source,
        })?;
    }

    if let Some(sink) = config.introspection_sink() {
        let mut sink = sink.borrow_mut();
        for introspectable in &action.introspectables {
            sink.register(introspectable.clone(), &action.info);
        }
    }

    Ok(())
}

use std::collections::HashSet;

use crate::core::ArcStr;
use crate::engine::Action;

/// The ledger of recorded, not yet executed actions.
///
/// One ledger is shared by a root [`Configurator`](crate::Configurator) and
/// every configurator derived from it. Besides the actions it tracks which
/// configuration units were already included and which unit is currently
/// active.
#[derive(Debug, Default)]
pub struct ActionState {
    actions: Vec<Action>,
    /// Ledger-wide counter, never reset, so actions recorded during a commit
    /// still sort after everything recorded before it.
    next_sequence: u64,
    included: HashSet<ArcStr>,
    scopes: Vec<ArcStr>,
}

impl ActionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an action, stamping it with the next sequence number.
    pub fn push(&mut self, mut action: Action) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        action.sequence = sequence;
        tracing::debug!(
            sequence,
            order = action.order,
            discriminator = ?action.key,
            path = %action.include_path,
            "recorded action"
        );

        self.actions.push(action);
        sequence
    }

    /// Takes every action recorded so far, leaving the ledger empty.
    pub fn drain(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    /// Puts actions back after a failed commit, keeping sequence order.
    pub(crate) fn restore(&mut self, actions: impl IntoIterator<Item = Action>) {
        self.actions.extend(actions);
        self.actions.sort_by_key(|action| action.sequence);
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Marks a configuration unit as included. Returns `false` when it was
    /// already included before.
    pub(crate) fn mark_included(&mut self, unit: &ArcStr) -> bool {
        self.included.insert(unit.clone())
    }

    pub(crate) fn push_scope(&mut self, unit: ArcStr) {
        self.scopes.push(unit);
    }

    pub(crate) fn pop_scope(&mut self) -> Option<ArcStr> {
        self.scopes.pop()
    }

    /// The innermost configuration unit currently running, if any.
    pub fn active_unit(&self) -> Option<&ArcStr> {
        self.scopes.last()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ActionInfo;
    use crate::discriminator::Discriminator;

    fn action(name: &str) -> Action {
        Action::new(Some(Discriminator::route(name)), ActionInfo::caller())
    }

    #[test]
    fn test_sequence_survives_drain() {
        let mut ledger = ActionState::new();

        assert_eq!(ledger.push(action("a")), 0);
        assert_eq!(ledger.push(action("b")), 1);

        let drained = ledger.drain();
        assert_eq!(drained.len(), 2);
        assert!(ledger.is_empty());

        assert_eq!(ledger.push(action("c")), 2);
    }

    #[test]
    fn test_restore_keeps_order() {
        let mut ledger = ActionState::new();
        ledger.push(action("a"));
        ledger.push(action("b"));

        let drained = ledger.drain();
        ledger.push(action("c"));
        ledger.restore(drained);

        let sequences: Vec<_> = ledger.actions().iter().map(Action::sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_include_once() {
        let mut ledger = ActionState::new();
        let unit: ArcStr = "auth".into();

        assert!(ledger.mark_included(&unit));
        assert!(!ledger.mark_included(&unit));
    }

    #[test]
    fn test_scopes() {
        let mut ledger = ActionState::new();
        assert_eq!(ledger.active_unit(), None);

        ledger.push_scope("app".into());
        ledger.push_scope("lib".into());
        assert_eq!(ledger.active_unit().map(AsRef::as_ref), Some("lib"));
        assert_eq!(ledger.depth(), 2);

        ledger.pop_scope();
        assert_eq!(ledger.active_unit().map(AsRef::as_ref), Some("app"));
    }
}

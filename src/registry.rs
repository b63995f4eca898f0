//! The mutable collection of live entries.
//!
//! The registry is plain single-owner data. The scheduler keeps it behind its
//! one mutex, so every method here runs with exclusive access and no entry is
//! ever observed half-mutated.

use std::collections::HashSet;
use std::time::Instant;

use crate::entry::{Context, Entry, EntryConfig, EntrySnapshot, EntryState};
use crate::error::{Result, TempoError};
use crate::id::{EntryId, IdAllocator};

#[derive(Debug, Default)]
pub(crate) struct Registry {
    /// Live entries in cycle order (priority, then insertion).
    pub(crate) entries: Vec<Entry>,
    ids: IdAllocator,
    /// Ids that were pruned after reaching `Done`. Grows for the life of the
    /// scheduler: a dependent added later may still name any of them.
    pub(crate) done: HashSet<EntryId>,
}

impl Registry {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dependencies of `config` that name ids not issued yet.
    pub(crate) fn unknown_dependencies(&self, config: &EntryConfig) -> Vec<EntryId> {
        config
            .dependencies
            .iter()
            .copied()
            .filter(|dep| !self.ids.was_issued(*dep))
            .collect()
    }

    /// Assign an id and append the entry. An entry naming an id that was
    /// never issued is orphaned, even if that id is issued later.
    pub(crate) fn insert(&mut self, config: EntryConfig, now: Instant) -> EntryId {
        let orphaned = !self.unknown_dependencies(&config).is_empty();
        let id = self.ids.allocate();
        let mut entry = Entry::new(id, config, now);
        entry.orphaned = orphaned;
        self.entries.push(entry);
        id
    }

    pub(crate) fn get(&self, id: EntryId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub(crate) fn find_by_context(&self, ctx: &Context) -> Option<&Entry> {
        self.entries.iter().find(|e| e.references(ctx))
    }

    /// Returns whether the flag changed.
    pub(crate) fn pause(&mut self, id: EntryId) -> Result<bool> {
        let entry = self.live_mut(id, "pause")?;
        let changed = !entry.paused;
        entry.paused = true;
        Ok(changed)
    }

    /// Returns whether the flag changed.
    pub(crate) fn resume(&mut self, id: EntryId) -> Result<bool> {
        let entry = self.live_mut(id, "resume")?;
        let changed = entry.paused;
        entry.paused = false;
        Ok(changed)
    }

    /// Move a live entry to `Done` or `Aborted` on the caller's behalf.
    pub(crate) fn request(&mut self, id: EntryId, state: EntryState) -> Result<()> {
        let verb = match state {
            EntryState::Done => "complete",
            EntryState::Aborted => "abort",
            other => return Err(TempoError::InvalidState(format!("cannot request state {}", other))),
        };
        let entry = self.live_mut(id, verb)?;
        entry.state = state;
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: EntryId) -> Option<Entry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Remove every entry that references `ctx`; returns how many.
    pub(crate) fn remove_by_context(&mut self, ctx: &Context) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.references(ctx));
        before - self.entries.len()
    }

    /// Take all entries out, leaving ids and the done set intact.
    pub(crate) fn take_all(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn record_done(&mut self, id: EntryId) {
        self.done.insert(id);
    }

    pub(crate) fn dependencies_satisfied(done: &HashSet<EntryId>, entry: &Entry) -> bool {
        !entry.orphaned && entry.dependencies.iter().all(|dep| done.contains(dep))
    }

    pub(crate) fn snapshots(&self, now: Instant) -> Vec<EntrySnapshot> {
        self.entries.iter().map(|e| e.snapshot(now)).collect()
    }

    fn live_mut(&mut self, id: EntryId, verb: &str) -> Result<&mut Entry> {
        let entry = self.get_mut(id).ok_or(TempoError::EntryNotFound(id))?;
        if entry.state.is_terminal() {
            return Err(TempoError::InvalidState(format!(
                "cannot {} entry {} in state {}",
                verb, id, entry.state
            )));
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{NextState, PhaseHandlers};

    fn task() -> EntryConfig {
        EntryConfig::task(|_| NextState::Running)
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let mut registry = Registry::default();
        let now = Instant::now();
        let a = registry.insert(task(), now);
        let b = registry.insert(task(), now);
        assert!(a < b);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(a).is_some());
    }

    #[test]
    fn test_ids_not_reused_after_remove() {
        let mut registry = Registry::default();
        let now = Instant::now();
        let a = registry.insert(task(), now);
        registry.remove(a).unwrap();
        let b = registry.insert(task(), now);
        assert_ne!(a, b);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_pause_resume_idempotent() {
        let mut registry = Registry::default();
        let id = registry.insert(task(), Instant::now());

        assert!(registry.pause(id).unwrap());
        assert!(!registry.pause(id).unwrap());
        assert!(registry.get(id).unwrap().paused);
        assert_eq!(registry.get(id).unwrap().state, EntryState::Waiting);

        assert!(registry.resume(id).unwrap());
        assert!(!registry.resume(id).unwrap());
        assert!(!registry.get(id).unwrap().paused);
    }

    #[test]
    fn test_pause_unknown_entry() {
        let mut registry = Registry::default();
        let err = registry.pause(EntryId::new(99)).unwrap_err();
        assert!(matches!(err, TempoError::EntryNotFound(id) if id == EntryId::new(99)));
    }

    #[test]
    fn test_pause_terminal_entry_rejected() {
        let mut registry = Registry::default();
        let id = registry.insert(task(), Instant::now());
        registry.get_mut(id).unwrap().state = EntryState::Failed;
        assert!(matches!(registry.pause(id), Err(TempoError::InvalidState(_))));
    }

    #[test]
    fn test_request_complete_and_abort() {
        let mut registry = Registry::default();
        let now = Instant::now();
        let a = registry.insert(task(), now);
        let b = registry.insert(task(), now);
        registry.request(a, EntryState::Done).unwrap();
        registry.request(b, EntryState::Aborted).unwrap();
        assert_eq!(registry.get(a).unwrap().state, EntryState::Done);
        assert_eq!(registry.get(b).unwrap().state, EntryState::Aborted);
        // Already terminal.
        assert!(registry.request(a, EntryState::Aborted).is_err());
    }

    #[test]
    fn test_request_rejects_non_external_states() {
        let mut registry = Registry::default();
        let id = registry.insert(task(), Instant::now());
        assert!(matches!(
            registry.request(id, EntryState::Running),
            Err(TempoError::InvalidState(_))
        ));
    }

    #[test]
    fn test_find_and_remove_by_context() {
        let mut registry = Registry::default();
        let now = Instant::now();
        let shared = Context::new(String::from("sensor"));
        let other = Context::new(String::from("sensor"));

        let a = registry.insert(EntryConfig::phased(PhaseHandlers::new()).with_user_data(shared.clone()), now);
        registry.insert(task().with_controller(other.clone()), now);
        registry.insert(task().with_controller(shared.clone()), now);

        assert_eq!(registry.find_by_context(&shared).unwrap().id, a);
        assert_eq!(registry.remove_by_context(&shared), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.find_by_context(&shared).is_none());
        assert!(registry.find_by_context(&other).is_some());
    }

    #[test]
    fn test_dependencies_satisfied_only_by_done() {
        let mut registry = Registry::default();
        let now = Instant::now();
        let a = registry.insert(task(), now);
        let b = registry.insert(task().depends_on(a), now);

        let dependent = registry.get(b).unwrap();
        assert!(!Registry::dependencies_satisfied(&registry.done, dependent));

        registry.record_done(a);
        let dependent = registry.get(b).unwrap();
        assert!(Registry::dependencies_satisfied(&registry.done, dependent));
    }

    #[test]
    fn test_unknown_dependency_never_satisfied() {
        let mut registry = Registry::default();
        let id = registry.insert(task().depends_on(EntryId::new(1000)), Instant::now());
        let entry = registry.get(id).unwrap();
        assert!(!Registry::dependencies_satisfied(&registry.done, entry));
    }

    #[test]
    fn test_dependency_on_later_issued_id_stays_unsatisfied() {
        let mut registry = Registry::default();
        let now = Instant::now();
        let early = registry.insert(task(), now);
        assert!(registry.unknown_dependencies(&task().depends_on(early)).is_empty());

        let config = task().depends_on(early).depends_on(EntryId::new(2));
        assert_eq!(registry.unknown_dependencies(&config), vec![EntryId::new(2)]);
        let dependent = registry.insert(config, now);
        let late = registry.insert(task(), now);
        assert_eq!(late, EntryId::new(2));

        registry.record_done(early);
        registry.record_done(late);
        let entry = registry.get(dependent).unwrap();
        assert!(entry.orphaned);
        assert!(!Registry::dependencies_satisfied(&registry.done, entry));
    }

    #[test]
    fn test_snapshots_in_order() {
        let mut registry = Registry::default();
        let now = Instant::now();
        let a = registry.insert(task().with_label("a"), now);
        let b = registry.insert(task().with_label("b"), now);
        let ids: Vec<EntryId> = registry.snapshots(now).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_take_all_keeps_id_space() {
        let mut registry = Registry::default();
        let now = Instant::now();
        let a = registry.insert(task(), now);
        assert_eq!(registry.take_all().len(), 1);
        let b = registry.insert(task(), now);
        assert!(b > a);
    }
}

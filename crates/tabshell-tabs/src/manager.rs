//! Tab store
//!
//! Owns the current snapshot and applies actions strictly in dispatch
//! order. Closing or replacing a tab publishes a [`TabEvent`] carrying the
//! record that left the collection.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::state::{transition, TabAction, TabsState};
use crate::tab::TabRecord;
use crate::Result;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    /// A tab was closed.
    Deleted { index: usize, tab: TabRecord },
    /// The tab at `index` was swapped for another.
    Replaced {
        index: usize,
        old: TabRecord,
        new: TabRecord,
    },
}

pub struct TabStore {
    state: Arc<RwLock<Arc<TabsState>>>,
    events: broadcast::Sender<TabEvent>,
}

impl TabStore {
    pub fn new() -> Self {
        Self::with_state(TabsState::new())
    }

    pub fn with_state(state: TabsState) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(Arc::new(state))),
            events,
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<TabsState> {
        Arc::clone(&*self.state.read())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        self.events.subscribe()
    }

    /// Apply one action and return the resulting snapshot.
    pub fn dispatch(&self, action: TabAction) -> Result<Arc<TabsState>> {
        let name = action.name();
        let (next, event) = {
            let mut guard = self.state.write();
            let previous = Arc::clone(&*guard);
            let event = Self::event_for(&previous, &action);
            let next = transition(&previous, action).map_err(|e| {
                tracing::warn!(action = name, error = %e, "Rejected tab action");
                e
            })?;
            *guard = Arc::clone(&next);
            (next, event)
        };

        tracing::debug!(
            action = name,
            tabs = next.len(),
            selected = next.selected_index(),
            "Applied tab action"
        );

        if let Some(event) = event {
            if self.events.send(event).is_err() {
                tracing::trace!("No subscribers for tab event");
            }
        }

        Ok(next)
    }

    fn event_for(previous: &TabsState, action: &TabAction) -> Option<TabEvent> {
        match action {
            TabAction::CloseTab { index, .. } => {
                previous.get_at(*index).map(|tab| TabEvent::Deleted {
                    index: *index,
                    tab: tab.clone(),
                })
            }
            TabAction::ReplaceTab { index, tab } => {
                previous.get_at(*index).map(|old| TabEvent::Replaced {
                    index: *index,
                    old: old.clone(),
                    new: tab.clone(),
                })
            }
            _ => None,
        }
    }
}

impl Default for TabStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for TabStore {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tab::TabStatePatch;

    #[test]
    fn test_tab_store() {
        let store = TabStore::new();
        let mut events = store.subscribe();

        let first = TabRecord::webview("https://example.com").unwrap();
        let second = TabRecord::webview("https://rust-lang.org").unwrap();
        store
            .dispatch(TabAction::AddTab {
                tab: first.clone(),
                set_selected: true,
            })
            .unwrap();
        store
            .dispatch(TabAction::AddTab {
                tab: second.clone(),
                set_selected: true,
            })
            .unwrap();
        assert_eq!(store.snapshot().selected_index(), 1);

        store
            .dispatch(TabAction::UpdateTabState {
                id: first.id.clone(),
                patch: TabStatePatch::title("Example"),
            })
            .unwrap();

        let state = store
            .dispatch(TabAction::CloseTab {
                index: 0,
                new_selected_index: 0,
            })
            .unwrap();
        assert_eq!(state.len(), 1);

        match events.try_recv().unwrap() {
            TabEvent::Deleted { index, tab } => {
                assert_eq!(index, 0);
                assert_eq!(tab.id, first.id);
                assert_eq!(tab.title, "Example");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_rejected_action_keeps_snapshot() {
        let store = TabStore::new();
        let before = store.snapshot();
        assert!(store.dispatch(TabAction::SelectTab { index: 3 }).is_err());
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn test_replace_publishes_old_record() {
        let store = TabStore::new();
        let mut events = store.subscribe();
        let old = TabRecord::webview("https://old.test").unwrap();
        let new = TabRecord::internal("about:settings").unwrap();

        store
            .dispatch(TabAction::AddTab {
                tab: old.clone(),
                set_selected: true,
            })
            .unwrap();
        store
            .dispatch(TabAction::ReplaceTab {
                index: 0,
                tab: new.clone(),
            })
            .unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            TabEvent::Replaced {
                index: 0,
                old,
                new
            }
        );
    }
}

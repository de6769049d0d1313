//! Tab collection state machine
//!
//! ```text
//! (TabsState, TabAction) --transition--> TabsState'
//! ```
//!
//! Invariants held by every snapshot:
//! - `ids` has no duplicates
//! - every id in `ids` has a record in `tabs`, and `tabs` has nothing else
//! - `selected_index < ids.len()` when non-empty, otherwise `0`

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TabError;
use crate::tab::{TabId, TabRecord, TabStatePatch};
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TabsState {
    selected_index: usize,
    /// Display order
    ids: Vec<TabId>,
    tabs: HashMap<TabId, TabRecord>,
}

impl TabsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected_index(&self) -> usize {
        self.selected_index
    }

    pub fn ids(&self) -> &[TabId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TabRecord> {
        self.tabs.get(id)
    }

    pub fn get_at(&self, index: usize) -> Option<&TabRecord> {
        self.ids.get(index).and_then(|id| self.tabs.get(id))
    }

    pub fn selected(&self) -> Option<&TabRecord> {
        self.get_at(self.selected_index)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|candidate| candidate == id)
    }

    /// Records in display order.
    pub fn iter(&self) -> impl Iterator<Item = &TabRecord> {
        self.ids.iter().filter_map(|id| self.tabs.get(id))
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.ids.len() {
            Ok(())
        } else {
            Err(TabError::IndexOutOfRange {
                index,
                len: self.ids.len(),
            })
        }
    }

    /// Verify the snapshot invariants. Only ever fails on a bug in
    /// [`transition`].
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for id in &self.ids {
            if !seen.insert(id) {
                return Err(format!("duplicate id {}", id));
            }
            if !self.tabs.contains_key(id) {
                return Err(format!("id {} has no record", id));
            }
        }
        if self.tabs.len() != self.ids.len() {
            return Err("records without an id in the tab order".to_string());
        }
        if self.ids.is_empty() && self.selected_index != 0 {
            return Err("selection set on an empty tab list".to_string());
        }
        if !self.ids.is_empty() && self.selected_index >= self.ids.len() {
            return Err(format!(
                "selected index {} out of range for {} tabs",
                self.selected_index,
                self.ids.len()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TabAction {
    AddTab {
        tab: TabRecord,
        set_selected: bool,
    },
    ReplaceTab {
        index: usize,
        tab: TabRecord,
    },
    CloseTab {
        index: usize,
        new_selected_index: usize,
    },
    MoveTab {
        from_index: usize,
        to_index: usize,
    },
    SelectTab {
        index: usize,
    },
    UpdateTabState {
        id: TabId,
        patch: TabStatePatch,
    },
    /// Any action type this state machine does not handle.
    #[serde(other)]
    Unknown,
}

impl TabAction {
    pub fn name(&self) -> &'static str {
        match self {
            TabAction::AddTab { .. } => "ADD_TAB",
            TabAction::ReplaceTab { .. } => "REPLACE_TAB",
            TabAction::CloseTab { .. } => "CLOSE_TAB",
            TabAction::MoveTab { .. } => "MOVE_TAB",
            TabAction::SelectTab { .. } => "SELECT_TAB",
            TabAction::UpdateTabState { .. } => "UPDATE_TAB_STATE",
            TabAction::Unknown => "UNKNOWN",
        }
    }
}

/// Apply `action` to `state`, returning the next snapshot.
///
/// `state` is never modified. An unknown action returns the same `Arc`.
pub fn transition(state: &Arc<TabsState>, action: TabAction) -> Result<Arc<TabsState>> {
    let next = match action {
        TabAction::AddTab { tab, set_selected } => {
            if state.tabs.contains_key(&tab.id) {
                return Err(TabError::DuplicateId(tab.id));
            }

            let mut ids = state.ids.clone();
            let mut tabs = state.tabs.clone();
            let selected_index = if set_selected {
                ids.len()
            } else {
                state.selected_index
            };
            ids.push(tab.id.clone());
            tabs.insert(tab.id.clone(), tab);

            TabsState {
                selected_index,
                ids,
                tabs,
            }
        }
        TabAction::ReplaceTab { index, tab } => {
            state.check_index(index)?;
            let old_id = &state.ids[index];
            if tab.id != *old_id && state.tabs.contains_key(&tab.id) {
                return Err(TabError::DuplicateId(tab.id));
            }

            let mut ids = state.ids.clone();
            let mut tabs = state.tabs.clone();
            tabs.remove(old_id);
            ids[index] = tab.id.clone();
            tabs.insert(tab.id.clone(), tab);

            TabsState {
                selected_index: state.selected_index,
                ids,
                tabs,
            }
        }
        TabAction::CloseTab {
            index,
            new_selected_index,
        } => {
            state.check_index(index)?;

            let mut ids = state.ids.clone();
            let mut tabs = state.tabs.clone();
            let removed = ids.remove(index);
            tabs.remove(&removed);
            let selected_index = if new_selected_index < ids.len() {
                new_selected_index
            } else {
                0
            };

            TabsState {
                selected_index,
                ids,
                tabs,
            }
        }
        TabAction::MoveTab {
            from_index,
            to_index,
        } => {
            state.check_index(from_index)?;
            state.check_index(to_index)?;

            let mut ids = state.ids.clone();
            let moved = ids.remove(from_index);
            ids.insert(to_index, moved);

            TabsState {
                selected_index: to_index,
                ids,
                tabs: state.tabs.clone(),
            }
        }
        TabAction::SelectTab { index } => {
            state.check_index(index)?;

            TabsState {
                selected_index: index,
                ids: state.ids.clone(),
                tabs: state.tabs.clone(),
            }
        }
        TabAction::UpdateTabState { id, patch } => {
            let current = state
                .tabs
                .get(&id)
                .ok_or_else(|| TabError::NotFound(id.clone()))?;

            let mut tabs = state.tabs.clone();
            tabs.insert(id, patch.apply(current));

            TabsState {
                selected_index: state.selected_index,
                ids: state.ids.clone(),
                tabs,
            }
        }
        TabAction::Unknown => return Ok(Arc::clone(state)),
    };

    debug_assert_eq!(next.check_invariants(), Ok(()));
    Ok(Arc::new(next))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: &str) -> TabRecord {
        let mut record = TabRecord::webview(format!("https://{}.test", id)).unwrap();
        record.id = id.to_string();
        record
    }

    fn state_with(ids: &[&str]) -> Arc<TabsState> {
        ids.iter().fold(Arc::new(TabsState::new()), |state, id| {
            transition(
                &state,
                TabAction::AddTab {
                    tab: tab(id),
                    set_selected: false,
                },
            )
            .unwrap()
        })
    }

    #[test]
    fn test_add_tabs() {
        let mut state = Arc::new(TabsState::new());
        for n in 0..8 {
            state = transition(
                &state,
                TabAction::AddTab {
                    tab: TabRecord::webview(format!("https://{}.test", n)).unwrap(),
                    set_selected: n % 2 == 0,
                },
            )
            .unwrap();
        }

        assert_eq!(state.len(), 8);
        assert!(state.ids().iter().all(|id| state.get(id).is_some()));
        assert_eq!(state.check_invariants(), Ok(()));
        assert_eq!(state.selected_index(), 6);
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let state = state_with(&["a"]);
        let result = transition(
            &state,
            TabAction::AddTab {
                tab: tab("a"),
                set_selected: true,
            },
        );
        assert_eq!(result, Err(TabError::DuplicateId("a".to_string())));
    }

    #[test]
    fn test_close_tab_clamps_selection() {
        let state = state_with(&["a", "b", "c"]);

        let closed = transition(
            &state,
            TabAction::CloseTab {
                index: 1,
                new_selected_index: 5,
            },
        )
        .unwrap();
        assert_eq!(closed.ids(), ["a", "c"]);
        assert_eq!(closed.selected_index(), 0);
        assert!(closed.get("b").is_none());

        let closed = transition(
            &state,
            TabAction::CloseTab {
                index: 1,
                new_selected_index: 1,
            },
        )
        .unwrap();
        assert_eq!(closed.selected_index(), 1);

        // previous snapshot untouched
        assert_eq!(state.ids(), ["a", "b", "c"]);
    }

    #[test]
    fn test_close_last_tab() {
        let state = state_with(&["a"]);
        let closed = transition(
            &state,
            TabAction::CloseTab {
                index: 0,
                new_selected_index: 0,
            },
        )
        .unwrap();
        assert!(closed.is_empty());
        assert_eq!(closed.selected_index(), 0);
    }

    #[test]
    fn test_move_tab_selects_moved() {
        let state = state_with(&["a", "b", "c"]);
        let moved = transition(
            &state,
            TabAction::MoveTab {
                from_index: 0,
                to_index: 2,
            },
        )
        .unwrap();
        assert_eq!(moved.ids(), ["b", "c", "a"]);
        assert_eq!(moved.selected_index(), 2);

        let moved = transition(
            &state,
            TabAction::MoveTab {
                from_index: 2,
                to_index: 0,
            },
        )
        .unwrap();
        assert_eq!(moved.ids(), ["c", "a", "b"]);
    }

    #[test]
    fn test_replace_tab() {
        let state = state_with(&["a", "b"]);
        let replaced = transition(
            &state,
            TabAction::ReplaceTab {
                index: 1,
                tab: tab("z"),
            },
        )
        .unwrap();
        assert_eq!(replaced.ids(), ["a", "z"]);
        assert!(replaced.get("b").is_none());
        assert_eq!(replaced.selected_index(), state.selected_index());

        let result = transition(
            &state,
            TabAction::ReplaceTab {
                index: 1,
                tab: tab("a"),
            },
        );
        assert_eq!(result, Err(TabError::DuplicateId("a".to_string())));
    }

    #[test]
    fn test_update_tab_state_is_shallow_merge() {
        let state = state_with(&["a", "b"]);
        let before = state.get("a").unwrap().clone();

        let updated = transition(
            &state,
            TabAction::UpdateTabState {
                id: "a".to_string(),
                patch: TabStatePatch::loading(true),
            },
        )
        .unwrap();

        let after = updated.get("a").unwrap();
        assert!(after.is_loading);
        assert_eq!(after.url, before.url);
        assert_eq!(after.title, before.title);
        assert_eq!(after.can_go_back, before.can_go_back);
        assert_eq!(updated.ids(), state.ids());
        assert_eq!(updated.selected_index(), state.selected_index());
        assert_eq!(updated.get("b"), state.get("b"));
    }

    #[test]
    fn test_contract_violations() {
        let state = state_with(&["a", "b"]);
        assert_eq!(
            transition(&state, TabAction::SelectTab { index: 2 }),
            Err(TabError::IndexOutOfRange { index: 2, len: 2 })
        );
        assert!(transition(
            &state,
            TabAction::MoveTab {
                from_index: 0,
                to_index: 7
            }
        )
        .is_err());
        assert_eq!(
            transition(
                &state,
                TabAction::UpdateTabState {
                    id: "missing".to_string(),
                    patch: TabStatePatch::default(),
                }
            ),
            Err(TabError::NotFound("missing".to_string()))
        );
    }

    #[test]
    fn test_unknown_action_is_identity() {
        let state = state_with(&["a"]);
        let action: TabAction = serde_json::from_str(r#"{"type": "PIN_TAB", "index": 0}"#).unwrap();
        assert_eq!(action, TabAction::Unknown);

        let next = transition(&state, action).unwrap();
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn test_action_wire_format() {
        let action: TabAction =
            serde_json::from_str(r#"{"type": "SELECT_TAB", "index": 1}"#).unwrap();
        assert_eq!(action, TabAction::SelectTab { index: 1 });
        assert_eq!(action.name(), "SELECT_TAB");
    }
}

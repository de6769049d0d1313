//! Main browser state container
//!
//! Tab order, selection and per-tab state live in the [`TabStore`]. Every
//! web content tab has a [`SurfaceController`]; its notifications are folded
//! back into tab state and history here.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tabshell_history::{HistoryManager, HistorySnapshot};
use tabshell_session::RecentlyClosedCache;
use tabshell_storage::Database;
use tabshell_surface::{
    DisplayRoot, LifecycleState, MessageProxy, RenderingSurface, SurfaceController,
    SurfaceDescriptor, SurfaceNotification,
};
use tabshell_tabs::{TabAction, TabId, TabRecord, TabStatePatch, TabStore, TabsState};

use crate::config::{BackgroundPolicy, Config};
use crate::error::CoreError;
use crate::Result;

/// Host side of the rendering engine.
pub trait SurfaceFactory: Send + Sync {
    /// Create the surface for a new web content tab. The surface's label
    /// should be the tab id.
    fn create_surface(&self, tab_id: &str) -> tabshell_surface::Result<Arc<dyn RenderingSurface>>;

    /// Where the selected tab's surface is displayed.
    fn display_root(&self) -> Arc<dyn DisplayRoot>;
}

/// Main browser instance
pub struct Browser {
    config: Config,
    db: Database,
    runtime: Handle,
    tabs: TabStore,
    history: Arc<HistoryManager>,
    history_snapshot: HistorySnapshot,
    recently_closed: RecentlyClosedCache,
    proxy: Arc<MessageProxy>,
    factory: Arc<dyn SurfaceFactory>,
    /// Controllers of web content tabs
    surfaces: Arc<RwLock<HashMap<TabId, Arc<SurfaceController>>>>,
    /// Notification forwarders, one per watched surface
    watchers: Arc<RwLock<HashMap<TabId, JoinHandle<()>>>>,
    listener: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl Browser {
    /// Open storage and wire the components together.
    pub async fn open(config: Config, factory: Arc<dyn SurfaceFactory>) -> Result<Self> {
        config.validate()?;
        crate::init_logging(&config.log_filter);
        let runtime = Handle::try_current()
            .map_err(|e| CoreError::Config(format!("no async runtime: {}", e)))?;

        let db = Database::new();
        HistoryManager::register_stores(&db)?;
        RecentlyClosedCache::register_stores(&db)?;

        if config.is_in_memory() {
            db.open_in_memory().await?;
        } else {
            if let Some(parent) = config.database_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            db.open(&config.database_path).await?;
        }

        let history_snapshot = HistorySnapshot::new();
        let history = Arc::new(HistoryManager::new(
            db.clone(),
            Arc::new(history_snapshot.clone()),
        ));

        let recently_closed = RecentlyClosedCache::new(db.clone(), config.max_recently_closed);
        recently_closed.initialize().await?;

        let tabs = TabStore::new();
        let listener = recently_closed.spawn_listener(tabs.subscribe());

        tracing::info!(
            database = %config.database_path.display(),
            policy = ?config.background_policy,
            "Browser initialized"
        );

        Ok(Self {
            config,
            db,
            runtime,
            tabs,
            history,
            history_snapshot,
            recently_closed,
            proxy: Arc::new(MessageProxy::new()),
            factory,
            surfaces: Arc::new(RwLock::new(HashMap::new())),
            watchers: Arc::new(RwLock::new(HashMap::new())),
            listener: Arc::new(RwLock::new(Some(listener))),
        })
    }

    // === Tab operations ===

    /// Open a web content tab.
    pub fn open_tab(&self, url: &str, select: bool) -> Result<TabRecord> {
        validate_url(url)?;
        let tab = TabRecord::webview(url)?;
        let controller = self.create_controller(&tab, select)?;

        let previous = self.selected_id();
        self.tabs.dispatch(TabAction::AddTab {
            tab: tab.clone(),
            set_selected: select,
        })?;
        self.install_controller(&tab.id, controller)?;

        if select {
            if let Some(previous) = previous {
                self.park(&previous)?;
            }
        }

        tracing::info!(tab_id = %tab.id, url = %url, select, "Opened tab");
        Ok(tab)
    }

    /// Open a built-in page. Internal tabs have no rendering surface.
    pub fn open_internal_tab(&self, url: &str, select: bool) -> Result<TabRecord> {
        validate_url(url)?;
        let tab = TabRecord::internal(url)?;

        let previous = self.selected_id();
        self.tabs.dispatch(TabAction::AddTab {
            tab: tab.clone(),
            set_selected: select,
        })?;

        if select {
            if let Some(previous) = previous {
                self.park(&previous)?;
            }
        }

        tracing::info!(tab_id = %tab.id, url = %url, select, "Opened internal tab");
        Ok(tab)
    }

    pub fn select_tab(&self, index: usize) -> Result<()> {
        let previous = self.selected_id();
        let state = self.tabs.dispatch(TabAction::SelectTab { index })?;
        self.switch_selection(previous, &state)
    }

    /// Close the tab at `index` and return its final record.
    ///
    /// The selection stays on the same tab when possible; closing the
    /// selected tab selects its right neighbour, or the left one when it was
    /// the last.
    pub fn close_tab(&self, index: usize) -> Result<TabRecord> {
        let before = self.tabs.snapshot();
        let closed = before
            .get_at(index)
            .cloned()
            .ok_or(tabshell_tabs::TabError::IndexOutOfRange {
                index,
                len: before.len(),
            })?;

        let selected = before.selected_index();
        let new_selected_index = if index < selected {
            selected - 1
        } else if index == selected {
            if index + 1 < before.len() {
                index
            } else {
                index.saturating_sub(1)
            }
        } else {
            selected
        };

        let state = self.tabs.dispatch(TabAction::CloseTab {
            index,
            new_selected_index,
        })?;
        self.drop_controller(&closed.id);

        if index == selected {
            if let Some(next) = state.selected() {
                self.wake(&next.id)?;
            }
        }

        tracing::info!(tab_id = %closed.id, index, remaining = state.len(), "Closed tab");
        Ok(closed)
    }

    /// Move a tab; the moved tab becomes selected.
    pub fn move_tab(&self, from_index: usize, to_index: usize) -> Result<()> {
        let previous = self.selected_id();
        let state = self.tabs.dispatch(TabAction::MoveTab {
            from_index,
            to_index,
        })?;
        self.switch_selection(previous, &state)
    }

    /// Put a fresh web content tab for `url` in place of the tab at `index`.
    pub fn replace_tab(&self, index: usize, url: &str) -> Result<TabRecord> {
        validate_url(url)?;
        let before = self.tabs.snapshot();
        let old = before
            .get_at(index)
            .cloned()
            .ok_or(tabshell_tabs::TabError::IndexOutOfRange {
                index,
                len: before.len(),
            })?;

        let tab = TabRecord::webview(url)?;
        let selected = before.selected_index() == index;
        let controller = self.create_controller(&tab, selected)?;

        self.tabs.dispatch(TabAction::ReplaceTab {
            index,
            tab: tab.clone(),
        })?;
        self.drop_controller(&old.id);
        self.install_controller(&tab.id, controller)?;

        tracing::info!(old_tab_id = %old.id, tab_id = %tab.id, index, "Replaced tab");
        Ok(tab)
    }

    pub fn tabs(&self) -> Arc<TabsState> {
        self.tabs.snapshot()
    }

    pub fn tab_store(&self) -> &TabStore {
        &self.tabs
    }

    pub fn surface(&self, tab_id: &str) -> Option<Arc<SurfaceController>> {
        self.surfaces.read().get(tab_id).cloned()
    }

    // === Selected tab navigation ===

    pub fn navigate(&self, url: &str) -> Result<()> {
        validate_url(url)?;
        self.selected_controller()?.navigate(url);
        Ok(())
    }

    pub fn reload_stop(&self) -> Result<()> {
        self.selected_controller()?.reload_stop();
        Ok(())
    }

    pub fn back(&self) -> Result<bool> {
        Ok(self.selected_controller()?.back())
    }

    pub fn forward(&self) -> Result<bool> {
        Ok(self.selected_controller()?.forward())
    }

    pub fn set_zoom(&self, factor: f64) -> Result<()> {
        self.selected_controller()?.set_zoom(factor)?;
        Ok(())
    }

    // === Surface notifications ===

    /// Fold one controller notification into tab state and history.
    pub async fn handle_surface_notification(
        &self,
        tab_id: &str,
        notification: SurfaceNotification,
    ) -> Result<()> {
        let Some(current) = self.tabs.snapshot().get(tab_id).cloned() else {
            tracing::debug!(tab_id = %tab_id, "Notification for a closed tab");
            return Ok(());
        };

        match notification {
            SurfaceNotification::NavStateChanged(nav) => {
                let url_changed = !nav.url.is_empty() && nav.url != current.url;
                self.update_tab(
                    tab_id,
                    TabStatePatch {
                        can_go_back: Some(nav.can_go_back),
                        can_go_forward: Some(nav.can_go_forward),
                        is_loading: Some(nav.is_loading),
                        url: Some(nav.url.clone()),
                        ..TabStatePatch::default()
                    },
                )?;

                if url_changed {
                    self.history.add_entry(&nav.url, "").await?;
                }
            }
            SurfaceNotification::TitleChange { title } => {
                self.update_tab(tab_id, TabStatePatch::title(title.clone()))?;

                // the url placeholder is display only
                if title == current.url {
                    return Ok(());
                }
                if !self.history.update_entry_title(&current.url, &title).await? {
                    tracing::trace!(
                        tab_id = %tab_id,
                        url = %current.url,
                        "No history entry to retitle"
                    );
                }
            }
            SurfaceNotification::LoadAbort { reason } => {
                tracing::warn!(
                    tab_id = %tab_id,
                    url = %current.url,
                    reason = %reason,
                    "Load aborted"
                );
                self.update_tab(tab_id, TabStatePatch::loading(false))?;
            }
            SurfaceNotification::NewTabRequest(request) => {
                self.open_tab(&request.target_url, request.in_foreground())?;
            }
        }
        Ok(())
    }

    /// Forward a controller's notifications into
    /// [`Self::handle_surface_notification`]. Watching twice is a no-op.
    pub fn watch_surface(&self, tab_id: &str) -> Result<()> {
        let controller = self
            .surface(tab_id)
            .ok_or_else(|| CoreError::NoSurface(tab_id.to_string()))?;

        let mut watchers = self.watchers.write();
        if watchers.contains_key(tab_id) {
            return Ok(());
        }

        let mut notifications = controller.subscribe();
        drop(controller);

        let browser = self.clone();
        let id = tab_id.to_string();
        let handle = self.runtime.spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(notification) => {
                        let applied = browser.handle_surface_notification(&id, notification).await;
                        if let Err(e) = applied {
                            tracing::error!(
                                tab_id = %id,
                                error = %e,
                                "Failed to apply surface notification"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(tab_id = %id, skipped, "Surface watcher lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        watchers.insert(tab_id.to_string(), handle);
        Ok(())
    }

    /// Stop watchers, release every surface, tear down the message proxy and
    /// close the database.
    pub fn shutdown(&self) {
        for (_, handle) in self.watchers.write().drain() {
            handle.abort();
        }
        if let Some(listener) = self.listener.write().take() {
            listener.abort();
        }

        let controllers: Vec<_> = self.surfaces.write().drain().collect();
        for (tab_id, controller) in controllers {
            if let Err(e) = controller.release() {
                tracing::warn!(tab_id = %tab_id, error = %e, "Failed to release surface");
            }
        }

        let dropped = self.proxy.shutdown();
        self.db.close();
        tracing::info!(dropped_requests = dropped, "Browser shut down");
    }

    // === Accessors ===

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    /// Result set of the last history query.
    pub fn history_snapshot(&self) -> &HistorySnapshot {
        &self.history_snapshot
    }

    pub fn recently_closed(&self) -> &RecentlyClosedCache {
        &self.recently_closed
    }

    pub fn message_proxy(&self) -> &Arc<MessageProxy> {
        &self.proxy
    }

    // === Internals ===

    fn selected_id(&self) -> Option<TabId> {
        self.tabs.snapshot().selected().map(|tab| tab.id.clone())
    }

    fn selected_controller(&self) -> Result<Arc<SurfaceController>> {
        let id = self.selected_id().ok_or(CoreError::NoSelectedTab)?;
        self.surface(&id).ok_or(CoreError::NoSurface(id))
    }

    fn update_tab(&self, tab_id: &str, patch: TabStatePatch) -> Result<()> {
        self.tabs.dispatch(TabAction::UpdateTabState {
            id: tab_id.to_string(),
            patch,
        })?;
        Ok(())
    }

    fn create_controller(
        &self,
        tab: &TabRecord,
        activated: bool,
    ) -> Result<Arc<SurfaceController>> {
        let surface = self.factory.create_surface(&tab.id)?;

        let mut descriptor = SurfaceDescriptor::new(tab.url.clone())
            .with_zoom(self.config.default_zoom)
            .with_initial_state(if activated {
                LifecycleState::Activated
            } else {
                LifecycleState::Deactivated
            });
        if !self.config.partition.is_empty() {
            descriptor = descriptor.with_partition(self.config.partition.clone());
        }

        Ok(Arc::new(descriptor.finalize(surface, Arc::clone(&self.proxy))?))
    }

    fn install_controller(&self, tab_id: &str, controller: Arc<SurfaceController>) -> Result<()> {
        self.surfaces
            .write()
            .insert(tab_id.to_string(), Arc::clone(&controller));
        controller.insert_into(self.factory.display_root())?;
        self.watch_surface(tab_id)
    }

    fn drop_controller(&self, tab_id: &str) {
        if let Some(handle) = self.watchers.write().remove(tab_id) {
            handle.abort();
        }

        let controller = self.surfaces.write().remove(tab_id);
        if let Some(controller) = controller {
            if let Err(e) = controller.release() {
                tracing::warn!(tab_id = %tab_id, error = %e, "Failed to release surface");
            }
        }
    }

    fn switch_selection(&self, previous: Option<TabId>, state: &TabsState) -> Result<()> {
        let Some(next) = state.selected().map(|tab| tab.id.clone()) else {
            return Ok(());
        };
        if previous.as_deref() == Some(next.as_str()) {
            return Ok(());
        }

        if let Some(previous) = previous {
            self.park(&previous)?;
        }
        self.wake(&next)
    }

    /// Take a tab's surface out of view according to the background policy.
    fn park(&self, tab_id: &str) -> Result<()> {
        let Some(controller) = self.surface(tab_id) else {
            return Ok(());
        };
        match self.config.background_policy {
            BackgroundPolicy::Deactivate => controller.deactivate()?,
            BackgroundPolicy::Suspend => controller.suspend()?,
        }
        Ok(())
    }

    fn wake(&self, tab_id: &str) -> Result<()> {
        if let Some(controller) = self.surface(tab_id) {
            controller.activate()?;
        }
        Ok(())
    }
}

impl Clone for Browser {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            db: self.db.clone(),
            runtime: self.runtime.clone(),
            tabs: self.tabs.clone(),
            history: Arc::clone(&self.history),
            history_snapshot: self.history_snapshot.clone(),
            recently_closed: self.recently_closed.clone(),
            proxy: Arc::clone(&self.proxy),
            factory: Arc::clone(&self.factory),
            surfaces: Arc::clone(&self.surfaces),
            watchers: Arc::clone(&self.watchers),
            listener: Arc::clone(&self.listener),
        }
    }
}

/// Accept absolute urls and `about:` pages.
fn validate_url(url: &str) -> Result<()> {
    if url.starts_with("about:") {
        return Ok(());
    }
    url::Url::parse(url)
        .map(|_| ())
        .map_err(|e| CoreError::InvalidUrl(format!("{}: {}", url, e)))
}

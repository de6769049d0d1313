//! Surface controller
//!
//! One controller per tab. It moves its surface between the display root
//! and limbo, forwards navigation and normalizes raw load events into
//! [`SurfaceNotification`]s.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

use crate::error::SurfaceError;
use crate::proxy::MessageProxy;
use crate::surface::{
    CaptureParams, ClearDataOptions, ClearDataTypes, DisplayRoot, NewWindowRequest,
    RenderingSurface, ScriptDescriptor, SurfaceEvent,
};
use crate::Result;

/// Content script enabling the title side channel.
pub const TITLE_SCRIPT: &str = "resources/label.js";

/// Title reported by the content script for pages without one.
pub const NO_TITLE: &str = "[no title]";

const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Deactivated,
    Activated,
    Suspended,
}

/// Navigation status of one surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavState {
    pub can_go_back: bool,
    pub can_go_forward: bool,
    pub is_loading: bool,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SurfaceNotification {
    NavStateChanged(NavState),
    TitleChange { title: String },
    LoadAbort { reason: String },
    NewTabRequest(NewWindowRequest),
}

/// Inert description of a surface that has not been hosted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceDescriptor {
    pub url: String,
    pub partition: Option<String>,
    pub zoom_factor: f64,
    pub initial_state: LifecycleState,
}

impl SurfaceDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            partition: None,
            zoom_factor: 1.0,
            initial_state: LifecycleState::Deactivated,
        }
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn with_zoom(mut self, zoom_factor: f64) -> Self {
        self.zoom_factor = zoom_factor;
        self
    }

    pub fn with_initial_state(mut self, state: LifecycleState) -> Self {
        self.initial_state = state;
        self
    }

    /// Bind the descriptor to a host-ready surface.
    ///
    /// The partition is applied before the first navigation. The surface is
    /// not attached anywhere until [`SurfaceController::insert_into`].
    pub fn finalize(
        self,
        surface: Arc<dyn RenderingSurface>,
        proxy: Arc<MessageProxy>,
    ) -> Result<SurfaceController> {
        if !(self.zoom_factor.is_finite() && self.zoom_factor > 0.0) {
            return Err(SurfaceError::InvalidZoom(self.zoom_factor));
        }

        if let Some(partition) = &self.partition {
            surface.set_partition(partition);
        }
        surface.navigate(&self.url);
        surface.set_zoom(self.zoom_factor);

        tracing::debug!(
            surface = %surface.label(),
            url = %self.url,
            state = ?self.initial_state,
            "Surface finalized"
        );

        let (events, _rx) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Ok(SurfaceController {
            surface,
            proxy,
            inner: Mutex::new(Inner {
                lifecycle: self.initial_state,
                root: None,
                url: String::new(),
                is_loading: false,
                script_injection_attempted: false,
            }),
            events,
        })
    }
}

struct Inner {
    lifecycle: LifecycleState,
    root: Option<Arc<dyn DisplayRoot>>,
    url: String,
    is_loading: bool,
    script_injection_attempted: bool,
}

pub struct SurfaceController {
    surface: Arc<dyn RenderingSurface>,
    proxy: Arc<MessageProxy>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<SurfaceNotification>,
}

impl SurfaceController {
    pub fn label(&self) -> &str {
        self.surface.label()
    }

    pub fn surface(&self) -> &Arc<dyn RenderingSurface> {
        &self.surface
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.inner.lock().lifecycle
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceNotification> {
        self.events.subscribe()
    }

    /// Record the display root; attaches right away when already activated.
    pub fn insert_into(&self, root: Arc<dyn DisplayRoot>) -> Result<()> {
        let activated = {
            let mut inner = self.inner.lock();
            inner.root = Some(Arc::clone(&root));
            inner.lifecycle == LifecycleState::Activated
        };

        if activated {
            root.attach(&self.surface)?;
            tracing::debug!(surface = %self.label(), "Surface attached on insert");
        }
        Ok(())
    }

    pub fn activate(&self) -> Result<()> {
        let (state, root) = {
            let inner = self.inner.lock();
            (inner.lifecycle, inner.root.clone())
        };

        match state {
            LifecycleState::Activated => return Ok(()),
            LifecycleState::Deactivated => match root {
                Some(root) => root.attach(&self.surface)?,
                None => {
                    tracing::debug!(
                        surface = %self.label(),
                        "Activated before insertion, attach deferred"
                    );
                }
            },
            LifecycleState::Suspended => match self.surface.resume() {
                Ok(()) => {}
                Err(SurfaceError::Unsupported(_)) => {
                    tracing::warn!(surface = %self.label(), "Surface cannot resume");
                }
                Err(e) => return Err(e),
            },
        }

        self.inner.lock().lifecycle = LifecycleState::Activated;
        tracing::debug!(surface = %self.label(), from = ?state, "Surface activated");
        Ok(())
    }

    /// Only meaningful while activated; otherwise a no-op.
    pub fn suspend(&self) -> Result<()> {
        let state = self.lifecycle();
        if state != LifecycleState::Activated {
            tracing::debug!(surface = %self.label(), state = ?state, "Ignoring suspend");
            return Ok(());
        }

        match self.surface.suspend() {
            Ok(()) => {}
            Err(SurfaceError::Unsupported(_)) => {
                tracing::warn!(surface = %self.label(), "Surface cannot suspend");
            }
            Err(e) => return Err(e),
        }

        self.inner.lock().lifecycle = LifecycleState::Suspended;
        tracing::debug!(surface = %self.label(), "Surface suspended");
        Ok(())
    }

    pub fn deactivate(&self) -> Result<()> {
        let (state, root) = {
            let inner = self.inner.lock();
            (inner.lifecycle, inner.root.clone())
        };

        if state == LifecycleState::Deactivated {
            return Ok(());
        }
        if let Some(root) = root {
            root.detach(&self.surface)?;
        }

        self.inner.lock().lifecycle = LifecycleState::Deactivated;
        tracing::debug!(surface = %self.label(), from = ?state, "Surface deactivated");
        Ok(())
    }

    pub fn navigate(&self, url: &str) {
        tracing::debug!(surface = %self.label(), url = %url, "Navigating");
        self.surface.navigate(url);
    }

    pub fn reload_stop(&self) {
        if self.inner.lock().is_loading {
            self.surface.stop();
        } else {
            self.surface.reload();
        }
    }

    /// Returns whether the surface could go back.
    pub fn back(&self) -> bool {
        if !self.surface.can_go_back() {
            tracing::debug!(surface = %self.label(), "Nothing to go back to");
            return false;
        }
        self.surface.back();
        true
    }

    pub fn forward(&self) -> bool {
        if !self.surface.can_go_forward() {
            tracing::debug!(surface = %self.label(), "Nothing to go forward to");
            return false;
        }
        self.surface.forward();
        true
    }

    pub fn set_zoom(&self, factor: f64) -> Result<()> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(SurfaceError::InvalidZoom(factor));
        }
        self.surface.set_zoom(factor);
        Ok(())
    }

    /// Image data url of the visible region.
    pub async fn capture_visible_region(&self, params: &CaptureParams) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.surface.capture_visible_region(
            params,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await
            .map_err(|_| SurfaceError::CallbackDropped("capture_visible_region"))?
    }

    pub async fn clear_data(
        &self,
        options: &ClearDataOptions,
        types: &ClearDataTypes,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.surface.clear_data(
            options,
            types,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await.map_err(|_| SurfaceError::CallbackDropped("clear_data"))?
    }

    pub fn nav_state(&self) -> NavState {
        let (is_loading, url) = {
            let inner = self.inner.lock();
            (inner.is_loading, inner.url.clone())
        };
        NavState {
            can_go_back: self.surface.can_go_back(),
            can_go_forward: self.surface.can_go_forward(),
            is_loading,
            url,
        }
    }

    /// Feed one raw surface event through the normalizer.
    pub fn handle_event(&self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::LoadStart { url, is_top_level } => {
                if !is_top_level {
                    return;
                }
                let url_changed = {
                    let mut inner = self.inner.lock();
                    inner.is_loading = true;
                    if inner.url != url {
                        inner.url = url.clone();
                        true
                    } else {
                        false
                    }
                };
                self.emit_nav_state();
                if url_changed {
                    self.emit(SurfaceNotification::TitleChange { title: url });
                }
            }
            SurfaceEvent::LoadCommit { url, is_top_level } => {
                if !is_top_level {
                    return;
                }
                let inject = {
                    let mut inner = self.inner.lock();
                    inner.url = url;
                    !std::mem::replace(&mut inner.script_injection_attempted, true)
                };
                if inject {
                    self.inject_title_script();
                }
                self.emit_nav_state();
            }
            SurfaceEvent::LoadStop => {
                self.inner.lock().is_loading = false;
                self.emit_nav_state();
            }
            SurfaceEvent::LoadAbort {
                url,
                is_top_level,
                code,
                reason,
            } => {
                if !is_top_level {
                    tracing::warn!(
                        surface = %self.label(),
                        url = %url,
                        code,
                        reason = %reason,
                        "Subframe load aborted"
                    );
                    return;
                }
                self.inner.lock().is_loading = false;
                tracing::info!(
                    surface = %self.label(),
                    url = %url,
                    code,
                    reason = %reason,
                    "Load aborted"
                );
                self.emit(SurfaceNotification::LoadAbort { reason });
            }
            SurfaceEvent::NewWindow(request) => {
                if request.opens_tab() {
                    self.emit(SurfaceNotification::NewTabRequest(request));
                } else {
                    tracing::debug!(
                        surface = %self.label(),
                        disposition = ?request.disposition,
                        "Ignoring new window request"
                    );
                }
            }
            SurfaceEvent::PermissionRequest { permission, url } => {
                tracing::warn!(
                    surface = %self.label(),
                    permission = %permission,
                    url = %url,
                    "Permission request ignored"
                );
            }
        }
    }

    /// Drop the surface's pending content requests and detach it.
    pub fn release(&self) -> Result<()> {
        self.proxy.forget_surface(self.label());
        self.deactivate()
    }

    fn emit_nav_state(&self) {
        self.emit(SurfaceNotification::NavStateChanged(self.nav_state()));
    }

    fn emit(&self, notification: SurfaceNotification) {
        if self.events.send(notification).is_err() {
            tracing::trace!(surface = %self.label(), "No subscribers for surface notification");
        }
    }

    fn inject_title_script(&self) {
        let surface = Arc::clone(&self.surface);
        let proxy = Arc::clone(&self.proxy);
        let events = self.events.clone();

        self.surface.execute_script(
            &ScriptDescriptor::File(TITLE_SCRIPT.to_string()),
            Box::new(move |result| {
                if let Err(e) = result {
                    tracing::warn!(
                        surface = %surface.label(),
                        error = %e,
                        "Title script injection failed"
                    );
                    return;
                }

                let label = surface.label().to_string();
                let sent = proxy.send_message(
                    surface.as_ref(),
                    Value::Null,
                    Box::new(move |reply| match reply.get("title").and_then(Value::as_str) {
                        Some(title) if title != NO_TITLE => {
                            let _ = events.send(SurfaceNotification::TitleChange {
                                title: title.to_string(),
                            });
                        }
                        Some(_) => {}
                        None => tracing::warn!(surface = %label, "Title reply without a title"),
                    }),
                );
                if let Err(e) = sent {
                    tracing::warn!(
                        surface = %surface.label(),
                        error = %e,
                        "Title request not sent"
                    );
                }
            }),
        );
    }
}

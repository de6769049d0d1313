//! tabshell Rendering Surfaces
//!
//! A tab's web content is rendered by an embedded surface the host provides
//! through [`RenderingSurface`]. The [`SurfaceController`] owns that
//! surface's attach/detach lifecycle, forwards navigation commands and turns
//! raw load events into a small, stable [`SurfaceNotification`] set.
//!
//! Out-of-band requests to loaded content go through a shared
//! [`MessageProxy`] that pairs every reply with its request by correlation
//! id.

mod controller;
mod error;
mod proxy;
mod surface;

pub use controller::{
    LifecycleState, NavState, SurfaceController, SurfaceDescriptor, SurfaceNotification,
    NO_TITLE, TITLE_SCRIPT,
};
pub use error::SurfaceError;
pub use proxy::MessageProxy;
pub use surface::{
    Callback, CaptureParams, ClearDataOptions, ClearDataTypes, DisplayRoot, ImageFormat,
    NewWindowRequest, RenderingSurface, ScriptDescriptor, SurfaceEvent, WindowDisposition,
};

pub type Result<T> = std::result::Result<T, SurfaceError>;

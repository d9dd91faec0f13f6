//! # beacon-core
//!
//! Foundation types shared by every Beacon crate:
//!
//! - **Branded IDs**: [`ConnectionId`], [`EventId`] as newtypes for type safety
//! - **Principals**: [`Principal`], the authenticated identity bound to a connection
//! - **System events**: [`SystemEvent`], [`SystemEventType`], [`Payload`]
//! - **Visibility**: [`Visibility`] descriptors and their [`VisibilityKind`] keys
//! - **Errors**: verifier and processor failures via `thiserror`
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod principal;
pub mod visibility;

pub use errors::{ProcessError, VerifyError};
pub use events::{Payload, SystemEvent, SystemEventType};
pub use ids::{ConnectionId, EventId};
pub use principal::Principal;
pub use visibility::{Visibility, VisibilityKind};

//! Device-control mediator.
//!
//! The mediator owns the device transport, keeps a [`ControlDirectory`]
//! built at stream start, validates every control access and coordinates
//! flushes with the frame stream.

pub mod directory;
pub mod flush;
pub mod mediator;
pub mod validation;

pub use directory::ControlDirectory;
pub use flush::{FlushState, FlushTracker, FrameVerdict};
pub use mediator::{AppliedSet, Mediator, MediatorConfig, SharedListener};
pub use validation::{check_access, validate, Access, ValueKind};

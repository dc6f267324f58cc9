pub mod dispatcher;
pub mod registry;

pub use dispatcher::{AlertDispatcher, DispatchOutcome, DoorbellAlert, LogNotifier, PassiveNotifier};
pub use registry::{Surface, SurfaceRegistry, SurfaceToken};

pub mod controller;
pub mod estimator;
pub mod loop_worker;
pub mod state;

pub use estimator::{ActiveCallback, PresenceEstimator, WallClock};
pub use state::{Observation, PresenceParams, PresenceState, PresenceUpdate};

mod controller;
mod listener;
mod state;

pub use controller::DoorbellService;
pub use state::{ServiceState, ServiceStatus};

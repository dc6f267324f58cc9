use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ServiceState {
    /// No paired device; nothing is listening.
    #[default]
    NotConnected,
    /// Paired, waiting for the first surface to start listening.
    Idle,
    Listening,
    /// Shut down for sign-out; stays down.
    Stopped,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub device_id: Option<String>,
    pub device_active: bool,
    pub current_surface: Option<String>,
    pub last_surface_name: Option<String>,
    /// Time since listening started, in milliseconds.
    pub uptime_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_service_state_is_not_connected() {
        assert_eq!(ServiceState::default(), ServiceState::NotConnected);
        assert_eq!(
            serde_json::to_value(ServiceState::NotConnected).unwrap(),
            serde_json::json!("notConnected")
        );
    }
}

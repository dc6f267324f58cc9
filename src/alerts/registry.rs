use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use anyhow::Result;

use crate::models::KeyedEvent;

use super::dispatcher::DoorbellAlert;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// A UI screen that can receive foreground updates.
///
/// Calls arrive on whatever task produced them; implementations marshal to
/// their own UI thread and must not block.
pub trait Surface: Send + Sync {
    fn name(&self) -> &str;

    fn on_device_active(&self, active: bool);

    /// An `Err` means the alert was not shown and should go out passively.
    fn on_new_doorbell_event(&self, alert: &DoorbellAlert) -> Result<()>;

    /// Full event list, newest first.
    fn on_event_list_changed(&self, events: &[KeyedEvent]);
}

/// Proof of registration, required to clear a surface on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceToken(u64);

struct CurrentSurface {
    token: SurfaceToken,
    name: String,
    surface: Weak<dyn Surface>,
}

#[derive(Default)]
struct RegistryState {
    current: Option<CurrentSurface>,
    next_token: u64,
    last_surface_name: Option<String>,
}

/// Tracks the current surface without keeping it alive.
#[derive(Default)]
pub struct SurfaceRegistry {
    state: RwLock<RegistryState>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current surface. `None` clears it unconditionally.
    pub fn set_current(&self, surface: Option<&Arc<dyn Surface>>) -> Option<SurfaceToken> {
        let mut state = self.write();
        let Some(surface) = surface else {
            if let Some(previous) = state.current.take() {
                log_debug!("Cleared current surface {}", previous.name);
            }
            return None;
        };

        state.next_token += 1;
        let token = SurfaceToken(state.next_token);
        let name = surface.name().to_string();
        log_info!("Current surface is now {name}");

        state.last_surface_name = Some(name.clone());
        state.current = Some(CurrentSurface {
            token,
            name,
            surface: Arc::downgrade(surface),
        });
        Some(token)
    }

    /// Clears the current surface only if `token` still owns it, so a late
    /// teardown cannot evict a newer screen. Returns whether it cleared.
    pub fn release(&self, token: SurfaceToken) -> bool {
        let mut state = self.write();
        match &state.current {
            Some(current) if current.token == token => {
                log_debug!("Released surface {}", current.name);
                state.current = None;
                true
            }
            _ => false,
        }
    }

    /// The current surface, if registered and still alive.
    pub fn get_current(&self) -> Option<Arc<dyn Surface>> {
        self.read()
            .current
            .as_ref()
            .and_then(|current| current.surface.upgrade())
    }

    /// Name of the current surface, if it is still alive.
    pub fn current_name(&self) -> Option<String> {
        let state = self.read();
        let current = state.current.as_ref()?;
        (current.surface.strong_count() > 0).then(|| current.name.clone())
    }

    /// Name of the most recently registered surface, even after teardown.
    pub fn last_surface_name(&self) -> Option<String> {
        self.read().last_surface_name.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Engine wiring

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::device::loopback::{DeviceTable, LoopbackDevice};
use crate::events::{EventHub, NullSurface, RenderSurface};
use crate::manager::DisplayManager;
use crate::runtime::{Engine, EngineHandle};
use crate::store::{ConfigStore, InMemoryConfigStore};
use crate::{Config, Result};

/// Everything the binary needs to run and feed the engine
pub struct EngineParts {
    pub engine: Engine,
    pub handle: EngineHandle,
    pub devices: DeviceTable,
    pub events: EventHub,
}

/// Build an engine backed by the loopback device layer.
///
/// `store` defaults to an in-memory store seeded from `config.devices`, and
/// `surface` to a headless one.
pub fn init_engine(
    config: &Config,
    store: Option<Arc<dyn ConfigStore>>,
    surface: Option<Box<dyn RenderSurface>>,
) -> Result<EngineParts> {
    let (handle, inputs) = Engine::channel();
    let device = LoopbackDevice::new(
        &config.devices,
        Duration::from_millis(config.loopback.reply_latency_ms),
        handle.clone(),
    );
    let devices = device.table();

    let store = store.unwrap_or_else(|| Arc::new(InMemoryConfigStore::from_config(config)));
    let surface = surface.unwrap_or_else(|| Box::new(NullSurface));
    let events = EventHub::new();

    let manager = DisplayManager::new(
        config.engine.clone(),
        Box::new(device),
        store,
        surface,
        events.clone(),
        Instant::now(),
    )?;
    info!(displays = manager.display_count(), "Display manager initialized");

    Ok(EngineParts {
        engine: Engine::new(manager, inputs),
        handle,
        devices,
        events,
    })
}

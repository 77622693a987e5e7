pub mod browser_store;

mod bindings;
mod connectivity;
mod reload;

pub use bindings::{WasmOfflineQueue, WasmQueryCache};
pub use connectivity::NavigatorConnectivity;
pub use reload::{browser_query_cache, NavigationReload};

use tracing::Level;
use tracing_wasm::{ConsoleConfig, WASMLayerConfig, WASMLayerConfigBuilder};
use wasm_bindgen::prelude::*;

use crate::version::version;

fn console_log_config() -> WASMLayerConfig {
    // Debug builds keep every drain and cache decision visible in the console
    let (max_level, timings) = if cfg!(debug_assertions) {
        (Level::DEBUG, true)
    } else {
        (Level::INFO, false)
    };

    WASMLayerConfigBuilder::default()
        .set_report_logs_in_timings(timings)
        .set_max_level(max_level)
        .set_console_config(ConsoleConfig::ReportWithoutConsoleColor)
        .build()
}

#[wasm_bindgen(start)]
pub fn wasm_init() -> Result<(), JsValue> {
    #[cfg(debug_assertions)]
    console_error_panic_hook::set_once();

    tracing_wasm::set_as_global_default_with_config(console_log_config());

    let online = web_sys::window()
        .map(|window| window.navigator().on_line())
        .unwrap_or(true);
    tracing::debug!(online, "scorekeeper-sync {} ready", version());

    Ok(())
}

use std::panic;
use std::thread;

use log::error;

/// Log every panic; report and exit only for panics on the main thread.
///
/// Worker panics (rasterizer, debounced actions) are caught where they run
/// and surface as render errors, so they only get logged here. Debug builds
/// report with `better_panic`, release builds with `human_panic`.
pub fn initialize_panic_handler() {
    if cfg!(debug_assertions) {
        better_panic::install();
    } else {
        human_panic::setup_panic!();
    }

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let current = thread::current();
        let thread_name = current.name().unwrap_or("<unnamed>");
        error!("Panic on thread '{thread_name}': {panic_info}");

        if thread_name != "main" {
            return;
        }

        log::logger().flush();
        default_hook(panic_info);
        std::process::exit(1);
    }));
}

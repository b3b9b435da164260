use std::panic::PanicHookInfo;
use std::sync::Once;

use vice_mcp_config::McpConfig;

static PANIC_HOOK: Once = Once::new();

/// Initialize structured logging and install a process panic hook.
///
/// Tool handlers are isolated with `catch_unwind` on the execution thread;
/// the hook only makes sure every panic, caught or not, reaches the log.
pub fn init(config: &McpConfig) {
    vice_mcp_config::init_tracing(&config.logging);
    install_panic_hook();
}

pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if cfg!(debug_assertions) {
                previous(info);
            }
            let location = info.location().map(|loc| loc.to_string());
            let thread = std::thread::current();
            tracing::error!(
                target: "vice.mcp",
                panic = %panic_message(info),
                location = location.as_deref().unwrap_or("<unknown>"),
                thread = thread.name().unwrap_or("<unnamed>"),
                "process panicked"
            );
        }));
    });
}

fn panic_message(info: &PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_owned();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "<non-string panic payload>".to_owned()
}

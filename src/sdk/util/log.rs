use env_logger::{Builder, Env};

/// Initialises `env_logger` once. `RUST_LOG` overrides the `info` default.
pub fn init_logging() {
    let _ = Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .format_module_path(false)
        .try_init();
}

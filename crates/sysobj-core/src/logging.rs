//! Logging setup
//!
//! The runtime logs through `tracing` under the `sysobj::gc`,
//! `sysobj::types` and `sysobj::object` targets.

pub use tracing::{debug, error, info, trace, warn, Level};

/// Install a compact stderr subscriber filtered by `RUST_LOG`.
///
/// Defaults to `sysobj=debug` in debug builds and `sysobj=info` otherwise.
/// Calling it again, or after another subscriber was installed, does nothing.
pub fn init() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("sysobj=debug")
        } else {
            EnvFilter::new("sysobj=info")
        }
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        info!(target: "sysobj::types", "logging initialized twice");
    }
}

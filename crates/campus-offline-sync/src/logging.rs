//! 日志初始化
//!
//! 宿主应用可以在启动时调用一次 [`init_tracing`]；重复调用或已有全局订阅者时静默忽略。

use tracing_subscriber::EnvFilter;

/// 安装全局 tracing 订阅者，`RUST_LOG` 优先于 `debug_mode`
pub fn init_tracing(debug_mode: bool) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(debug_mode)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

fn default_level(debug_mode: bool) -> &'static str {
    if debug_mode {
        "debug"
    } else {
        "info"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_follows_debug_mode() {
        assert_eq!(default_level(true), "debug");
        assert_eq!(default_level(false), "info");
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing(true);
        assert!(!init_tracing(false));
    }
}

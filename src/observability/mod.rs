//! 可观测性：进程日志（tracing）与结构化追踪事件（TraceRecorder）

pub mod recorder;
pub mod trace;

pub use recorder::{TraceRecorder, TraceSink};
pub use trace::{TraceEvent, TraceEventKind};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化日志：默认 info，可通过 RUST_LOG 覆盖；重复调用时忽略
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_is_idempotent() {
        super::init();
        super::init();
        tracing::info!("logging initialised");
    }
}

//! Logging infrastructure: `tracing-subscriber` registry with an
//! `EnvFilter`, JSON or pretty stdout formatting, and optional file
//! rotation via `tracing-appender`, mirroring
//! `abathur::infrastructure::logging::logger`.

mod logger;

pub use logger::LoggerImpl;

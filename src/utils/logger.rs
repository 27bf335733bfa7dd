use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::Write;

/// Install the stdout logger. `RUST_LOG` wins over `level` when it is set.
pub fn setup_logging(level: LevelFilter) {
    let mut builder = Builder::new();
    builder.target(Target::Stdout).filter_level(level);

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] [{}:{}] {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.args()
        )
    });

    // A second call (tests, embedding) keeps the first logger.
    let _ = builder.try_init();
}

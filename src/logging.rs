use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// `RUST_LOG` when set, otherwise `info`.
pub fn default_filter() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

/// Installs the global logger. `level` overrides `RUST_LOG` when given.
///
/// Lines look like `[12:00:01.234 INFO  rule] PUMP BTCUSDT 1m up @ 105`; the
/// target column carries the `boot`, `cfg`, `feed`, `rule`, `sink` and `http`
/// markers.
pub fn init(level: Option<LevelFilter>) {
    let mut builder = Builder::new();
    builder.parse_filters(&default_filter());
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder
        .format(|buf, record| {
            let ts = chrono::Local::now().format("%H:%M:%S%.3f");
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                ts,
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .write_style(env_logger::WriteStyle::Auto);

    // A second init (tests, embedding) keeps the first logger.
    let _ = builder.try_init();
}

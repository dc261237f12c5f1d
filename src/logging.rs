use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

static START_TIME: OnceLock<Instant> = OnceLock::new();
static LOG_RANK: AtomicUsize = AtomicUsize::new(usize::MAX);

/// Initialize the logger with custom formatting showing elapsed time.
///
/// If verbose is true, sets log level to Info, otherwise to Warn.
/// Output format: [HH:MM:SS] [rank N] LEVEL: message
/// (the rank field is omitted until `set_log_rank` is called).
/// All output goes to stderr.
pub fn init_logger(verbose: bool) {
    START_TIME.set(Instant::now()).ok();

    let level = if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format(|buf, record| {
            let elapsed = START_TIME.get().unwrap().elapsed();
            let hours = elapsed.as_secs() / 3600;
            let minutes = (elapsed.as_secs() % 3600) / 60;
            let seconds = elapsed.as_secs() % 60;

            let rank = LOG_RANK.load(Ordering::Relaxed);
            if rank == usize::MAX {
                writeln!(
                    buf,
                    "[{:02}:{:02}:{:02}] {}: {}",
                    hours,
                    minutes,
                    seconds,
                    record.level(),
                    record.args()
                )
            } else {
                writeln!(
                    buf,
                    "[{:02}:{:02}:{:02}] [rank {}] {}: {}",
                    hours,
                    minutes,
                    seconds,
                    rank,
                    record.level(),
                    record.args()
                )
            }
        })
        .target(env_logger::Target::Stderr)
        .init();
}

/// Tag subsequent log lines with this process's communicator rank.
///
/// Useful when several ranks share a terminal; call once after the
/// communicator is constructed.
pub fn set_log_rank(rank: usize) {
    LOG_RANK.store(rank, Ordering::Relaxed);
}

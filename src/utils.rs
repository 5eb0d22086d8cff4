use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn app_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("app", "sophos", "sophos").ok_or_else(|| anyhow!("cannot resolve project dirs"))
}

pub fn ensure_data_dir() -> Result<PathBuf> {
    let dirs = app_dirs()?;
    let data_dir = dirs.data_dir().to_path_buf();
    fs::create_dir_all(&data_dir).context("create data dir")?;
    Ok(data_dir)
}

/// Console layer plus a daily-rolling file under `<data_dir>/logs`.
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init_tracing(data_dir: &Path) -> Result<WorkerGuard> {
    let logs_dir = data_dir.join("logs");
    fs::create_dir_all(&logs_dir).context("create logs dir")?;
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "sophos.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init();

    Ok(guard)
}

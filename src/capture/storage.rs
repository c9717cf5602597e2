//! Day directories under each unit root. The recorder writes into
//! `<root>/<name>/<YYYY-MM-DD>/` but never creates directories itself, so the
//! current day must exist before launch and the next day shortly before
//! midnight.

use super::error::UnitError;
use super::spec::CaptureSpec;
use chrono::{Days, Local, NaiveDate, NaiveTime, Timelike};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ROLLOVER_CHECK_INTERVAL: Duration = Duration::from_secs(295);

const ROLLOVER_HOUR: u32 = 23;
const ROLLOVER_FIRST_MINUTE: u32 = 51;
const ROLLOVER_LAST_MINUTE: u32 = 55;

pub fn day_directory(root: &Path, name: &str, date: NaiveDate) -> PathBuf {
    root.join(name).join(date.format("%Y-%m-%d").to_string())
}

pub async fn ensure_day_directory(
    spec: &CaptureSpec,
    date: NaiveDate,
) -> Result<PathBuf, UnitError> {
    let path = day_directory(&spec.storage_path, &spec.name, date);
    tokio::fs::create_dir_all(&path)
        .await
        .map_err(|source| UnitError::Storage {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

pub async fn ensure_today(spec: &CaptureSpec) -> Result<PathBuf, UnitError> {
    ensure_day_directory(spec, Local::now().date_naive()).await
}

/// `true` from 23:51:00 through 23:55:59 local time. With checks every 295 s
/// at least one check always lands inside the window.
pub fn in_rollover_window(time: NaiveTime) -> bool {
    time.hour() == ROLLOVER_HOUR
        && (ROLLOVER_FIRST_MINUTE..=ROLLOVER_LAST_MINUTE).contains(&time.minute())
}

/// Creates tomorrow's directory when `now` falls in the rollover window.
/// Returns the created path, if any.
pub async fn prepare_rollover(
    spec: &CaptureSpec,
    now: chrono::NaiveDateTime,
) -> Result<Option<PathBuf>, UnitError> {
    if !in_rollover_window(now.time()) {
        return Ok(None);
    }
    let Some(tomorrow) = now.date().checked_add_days(Days::new(1)) else {
        return Ok(None);
    };
    ensure_day_directory(spec, tomorrow).await.map(Some)
}

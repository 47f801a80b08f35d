mod config_cmd;
mod meal;
mod photo;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use meal::MealCommand;
pub use photo::PhotoCommand;
pub use sync_cmd::{SyncCommand, WatchCommand};

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use clap::ValueEnum;

use nutrisync::config::Config;
use nutrisync::db::{init_db, LocalCache};
use nutrisync::sync::{Connectivity, Liveness, RemoteClient, SyncCoordinator};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub type Coordinator = Arc<SyncCoordinator<RemoteClient>>;

/// Opens the cache and signs in with the configured credentials.
///
/// A failed initial listing is only logged: commands still work from the
/// cache when the server is unreachable or rejects the first request.
pub async fn connect(config: &Config) -> Result<Coordinator, Box<dyn std::error::Error>> {
    let pool = init_db(&config.database_path.value).await?;
    let api = Arc::new(RemoteClient::new(
        &config.server_url.value,
        config.request_timeout(),
    )?);
    let coordinator = Arc::new(SyncCoordinator::new(
        api,
        LocalCache::new(pool),
        Connectivity::new(true),
        config.page_size.value,
    ));

    let session = config.auth.session();
    if !session.is_authenticated() {
        tracing::warn!("No credentials configured; set auth.token and auth.user_id");
    }
    if let Err(e) = coordinator.set_session(session, &Liveness::new()).await {
        tracing::warn!("Initial listing failed: {}", e);
    }
    Ok(coordinator)
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM` or `YYYY-MM-DD` (noon), local time
/// unless an offset is given.
pub fn parse_date(input: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = DateTime::parse_from_rfc3339(input) {
        return Ok(date.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(12, 0, 0))
        })
        .ok_or_else(|| {
            format!(
                "Invalid date '{}'. Use YYYY-MM-DD, 'YYYY-MM-DD HH:MM' or RFC 3339.",
                input
            )
        })?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| format!("'{}' does not exist in the local time zone", input))
}

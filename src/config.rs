//! Service configuration with environment overrides
use super::eligibility::{DEFAULT_WINDOW_DAYS, EligibilityWindow, MAX_WINDOW_DAYS};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;

pub const ENV_DB_PATH: &str = "ADVANCE_DB_PATH";
pub const ENV_DB_TEMPORARY: &str = "ADVANCE_DB_TEMPORARY";
pub const ENV_ELIGIBILITY_DAYS: &str = "ADVANCE_ELIGIBILITY_DAYS";
pub const ENV_MAX_PAGE_SIZE: &str = "ADVANCE_MAX_PAGE_SIZE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub db_path: PathBuf,
    pub temporary: bool, // sled removes the files on drop
    pub eligibility_window_days: i64,
    pub max_page_size: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("advance.db"),
            temporary: false,
            eligibility_window_days: DEFAULT_WINDOW_DAYS,
            max_page_size: 100,
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by any `ADVANCE_*` variables present in the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] but reads through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DB_PATH) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(flag) = lookup(ENV_DB_TEMPORARY) {
            config.temporary = flag
                .trim()
                .parse()
                .with_context(|| format!("{ENV_DB_TEMPORARY} must be true or false"))?;
        }
        if let Some(days) = lookup(ENV_ELIGIBILITY_DAYS) {
            config.eligibility_window_days = days
                .trim()
                .parse()
                .with_context(|| format!("{ENV_ELIGIBILITY_DAYS} must be an integer"))?;
        }
        if let Some(size) = lookup(ENV_MAX_PAGE_SIZE) {
            config.max_page_size = size
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_PAGE_SIZE} must be a positive integer"))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.eligibility_window_days < 0 {
            anyhow::bail!("eligibility window cannot be negative");
        }
        if self.eligibility_window_days > MAX_WINDOW_DAYS {
            anyhow::bail!("eligibility window cannot exceed {MAX_WINDOW_DAYS} days");
        }
        if self.max_page_size == 0 {
            anyhow::bail!("max page size must be positive");
        }
        Ok(())
    }

    pub fn eligibility_window(&self) -> EligibilityWindow {
        EligibilityWindow::days(self.eligibility_window_days)
    }

    pub fn open_db(&self) -> anyhow::Result<Arc<sled::Db>> {
        let db = sled::Config::new()
            .path(&self.db_path)
            .temporary(self.temporary)
            .open()
            .with_context(|| format!("failed to open sled db at {}", self.db_path.display()))?;
        Ok(Arc::new(db))
    }
}

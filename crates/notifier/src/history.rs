//! Paginated access to the notification log.

use herald_common::error::AppError;
use herald_common::types::LogPage;

use crate::store::NotificationStore;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

pub struct NotificationHistory;

impl NotificationHistory {
    /// One page of logs, newest first. `page` is 1-based; out-of-range values
    /// are clamped rather than rejected.
    pub async fn page(
        store: &dyn NotificationStore,
        page: u32,
        limit: u32,
    ) -> Result<LogPage, AppError> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = i64::from(page - 1) * i64::from(limit);

        let (logs, total) = store.list_logs(offset, i64::from(limit)).await?;
        Ok(LogPage::new(logs, total, page, limit))
    }
}

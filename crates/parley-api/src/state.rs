use std::sync::Arc;

use parley_db::Store;
use parley_gateway::Gateway;
use parley_types::api::DEFAULT_HISTORY_LIMIT;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Arc<dyn Store>,
    pub gateway: Gateway,
    pub history: HistoryLimits,
}

/// Page sizes for `GET /api/messages`.
#[derive(Debug, Clone, Copy)]
pub struct HistoryLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_HISTORY_LIMIT,
            max_limit: 200,
        }
    }
}

impl HistoryLimits {
    /// Missing or zero means the default; anything above the max is clamped.
    pub fn resolve(&self, requested: Option<u32>) -> u32 {
        requested
            .filter(|limit| *limit > 0)
            .unwrap_or(self.default_limit)
            .min(self.max_limit)
    }
}

use crate::cache::StatsCache;

#[derive(Clone)]
pub struct AppState {
    pub cache: StatsCache,
}

impl AppState {
    pub fn new(cache: StatsCache) -> Self {
        Self { cache }
    }
}

use std::sync::Arc;

use crate::api::auth::RateLimiter;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::hitl::HitlController;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    pub hitl: Arc<HitlController>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        config: Config,
        dispatcher: Arc<Dispatcher>,
        hitl: Arc<HitlController>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher,
            hitl,
            limiter: Arc::new(limiter),
        }
    }
}

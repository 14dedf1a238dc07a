use std::sync::Arc;

use crate::config::Config;
use crate::gemini::keys::KeyManager;
use crate::gemini::ImageService;
use crate::idempotency::IdempotencyStore;
use crate::mail::EmailSender;
use crate::ratelimit::FixedWindowLimiter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub idempotency: Arc<IdempotencyStore>,
    pub keys: Arc<KeyManager>,
    pub mailer: Arc<dyn EmailSender>,
    pub images: Arc<ImageService>,
    pub limiter: Arc<FixedWindowLimiter>,
}

impl AppState {
    pub fn new(
        config: Config,
        idempotency: IdempotencyStore,
        keys: Arc<KeyManager>,
        mailer: Arc<dyn EmailSender>,
        images: ImageService,
    ) -> Self {
        let limiter = FixedWindowLimiter::new(config.rate_limit_per_minute);
        Self {
            config: Arc::new(config),
            idempotency: Arc::new(idempotency),
            keys,
            mailer,
            images: Arc::new(images),
            limiter: Arc::new(limiter),
        }
    }
}

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub log_level: String,
    pub api_key: String,
    pub gemini_api_keys: Vec<String>,
    pub gemini_model: String,
    pub gemini_timeout_ms: u64,
    pub gemini_max_images: u32,
    pub rate_limit_per_minute: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_key = env::var("API_KEY").map_err(|_| ConfigError::MissingApiKey)?;
        if api_key.len() < 10 {
            return Err(ConfigError::ApiKeyTooShort);
        }

        let gemini_api_keys: Vec<String> = env::var("GEMINI_API_KEYS")
            .map_err(|_| ConfigError::MissingProviderKeys)?
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if gemini_api_keys.is_empty() {
            return Err(ConfigError::MissingProviderKeys);
        }

        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_key,
            gemini_api_keys,
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash-preview-image-generation".to_string()),
            gemini_timeout_ms: env::var("GEMINI_TIMEOUT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .unwrap_or(30_000),
            gemini_max_images: env::var("GEMINI_MAX_IMAGES")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .unwrap_or(4),
            rate_limit_per_minute: env::var("RATE_LIMIT_PER_MINUTE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(50),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server port")]
    InvalidPort,
    #[error("API_KEY environment variable is required (min 10 chars)")]
    MissingApiKey,
    #[error("API_KEY must be at least 10 characters")]
    ApiKeyTooShort,
    #[error("GEMINI_API_KEYS environment variable is required (comma separated)")]
    MissingProviderKeys,
}

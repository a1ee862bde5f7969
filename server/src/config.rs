// Server configuration loaded from the environment

use std::str::FromStr;
use std::time::Duration;

use llm_core::{LlmProvider, RetryPolicy};
use tts_core::{VoiceSettings, DEFAULT_WS_URL};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub llm_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub llm_provider: LlmProvider,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_max_retries: u32,
    pub llm_retry_backoff_ms: u64,
    pub tts_ws_url: String,
    pub tts_voice_id: Option<String>,
    pub tts_model_id: Option<String>,
    pub tts_api_key: Option<String>,
    pub stream_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            rate_limit_per_minute: 60,
            llm_timeout_secs: 120,
            request_timeout_secs: 60,
            cors_allowed_origins: None,
            llm_provider: LlmProvider::OpenAI,
            llm_model: None,
            llm_base_url: None,
            llm_max_retries: 2,
            llm_retry_backoff_ms: 500,
            tts_ws_url: DEFAULT_WS_URL.to_string(),
            tts_voice_id: None,
            tts_model_id: None,
            tts_api_key: None,
            stream_channel_capacity: 64,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = env_opt("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Self {
            port: env_parse("PORT", defaults.port),
            rate_limit_per_minute: env_parse(
                "RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            ),
            llm_timeout_secs: env_parse("LLM_TIMEOUT_SECS", defaults.llm_timeout_secs),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            cors_allowed_origins,
            llm_provider: env_opt("LLM_PROVIDER")
                .map(|name| LlmProvider::from_name(&name))
                .unwrap_or(defaults.llm_provider),
            llm_model: env_opt("LLM_MODEL"),
            llm_base_url: env_opt("LLM_BASE_URL"),
            llm_max_retries: env_parse("LLM_MAX_RETRIES", defaults.llm_max_retries),
            llm_retry_backoff_ms: env_parse("LLM_RETRY_BACKOFF_MS", defaults.llm_retry_backoff_ms),
            tts_ws_url: env_opt("TTS_WS_URL").unwrap_or(defaults.tts_ws_url),
            tts_voice_id: env_opt("TTS_VOICE_ID"),
            tts_model_id: env_opt("TTS_MODEL_ID"),
            tts_api_key: env_opt("TTS_API_KEY"),
            stream_channel_capacity: env_parse(
                "STREAM_CHANNEL_CAPACITY",
                defaults.stream_channel_capacity,
            )
            .max(1),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn llm_model(&self) -> &str {
        self.llm_model
            .as_deref()
            .unwrap_or_else(|| self.llm_provider.default_model())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.llm_max_retries,
            base_backoff: Duration::from_millis(self.llm_retry_backoff_ms),
        }
    }

    pub fn voice_settings(&self) -> VoiceSettings {
        let mut voice = VoiceSettings::default();
        if let Some(id) = &self.tts_voice_id {
            voice.voice_id = id.clone();
        }
        if let Some(model) = &self.tts_model_id {
            voice.model_id = model.clone();
        }
        voice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8085);
        assert_eq!(config.llm_model(), "gpt-4o-mini");
        assert_eq!(config.retry_policy().max_retries, 2);
        assert_eq!(config.voice_settings().model_id, "eleven_turbo_v2_5");
        assert_eq!(config.tts_ws_url, DEFAULT_WS_URL);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig {
            llm_provider: LlmProvider::Anthropic,
            tts_voice_id: Some("voice-1".into()),
            llm_retry_backoff_ms: 20,
            ..ServerConfig::default()
        };
        assert_eq!(config.llm_model(), "claude-3-5-haiku-latest");
        assert_eq!(config.voice_settings().voice_id, "voice-1");
        assert_eq!(config.retry_policy().base_backoff, Duration::from_millis(20));
    }
}

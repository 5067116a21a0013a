use std::sync::Arc;

use secrecy::SecretString;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::CoreResult;
use crate::http_client::HttpClient;
use crate::provider::{CompletionProvider, NullProvider};
use crate::providers::openai::OpenAiCompatible;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAiCompatible,
    Null,
}

/// Build the upstream provider from configuration.
/// The real provider is wired when the configured API key variable is set;
/// otherwise the canned `null` provider answers.
pub fn build_provider(cfg: &Config) -> CoreResult<Arc<dyn CompletionProvider>> {
    let key = std::env::var(&cfg.upstream.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty());
    build_with_key(cfg, key)
}

fn build_with_key(cfg: &Config, key: Option<String>) -> CoreResult<Arc<dyn CompletionProvider>> {
    match (kind_for(key.as_deref()), key) {
        (ProviderKind::OpenAiCompatible, Some(key)) => {
            let http = HttpClient::new(&cfg.http)?;
            info!(base = %cfg.upstream.base_url, "using upstream provider");
            Ok(Arc::new(OpenAiCompatible::new(
                http,
                SecretString::new(key.into_boxed_str()),
                cfg.upstream.base_url.clone(),
                cfg.upstream.include_usage,
            )))
        }
        _ => {
            warn!(
                env = %cfg.upstream.api_key_env,
                "no API key configured, serving canned responses"
            );
            Ok(Arc::new(NullProvider))
        }
    }
}

pub fn kind_for(api_key: Option<&str>) -> ProviderKind {
    match api_key {
        Some(k) if !k.trim().is_empty() => ProviderKind::OpenAiCompatible,
        _ => ProviderKind::Null,
    }
}

//! Request pipelines behind the two routes.
//!
//! generate: validate -> quota gate -> normalize -> prompt -> upstream -> aggregate -> account
//! stream:   validate -> normalize -> prompt -> upstream, accounted when the stream ends

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};
use tracing_futures::Instrument;
use uuid::Uuid;

use crate::aggregator::{AggregateCtx, aggregate};
use crate::config::{Config, UpstreamCfg};
use crate::error::CoreResult;
use crate::model::{AggregatedResponse, ChunkUsage, FinishReason};
use crate::normalizer::{normalize_generation, normalize_stream};
use crate::prompt::{generation_messages, stream_messages};
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::provider_factory::build_provider;
use crate::quota::{InMemoryAccounts, QuotaStore, UserStore, check_quota};
use crate::stream::ChunkStream;
use crate::telemetry::{CompletionLog, emit_completion};
use crate::validation::{validate_generation, validate_stream};

pub struct Orchestrator {
    provider: Arc<dyn CompletionProvider>,
    users: Arc<dyn UserStore>,
    quota: Arc<dyn QuotaStore>,
    defaults: UpstreamCfg,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        users: Arc<dyn UserStore>,
        quota: Arc<dyn QuotaStore>,
        defaults: UpstreamCfg,
    ) -> Self {
        Self {
            provider,
            users,
            quota,
            defaults,
        }
    }

    /// Wire the configured provider with a single in-memory account.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let accounts = Arc::new(InMemoryAccounts::from_config(&cfg.quota));
        Ok(Self::new(
            build_provider(cfg)?,
            accounts.clone(),
            accounts,
            cfg.upstream.clone(),
        ))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn generate(&self, body: &Value) -> CoreResult<AggregatedResponse> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("generate", %request_id);
        self.run_generate(body, request_id).instrument(span).await
    }

    async fn run_generate(&self, body: &Value, request_id: String) -> CoreResult<AggregatedResponse> {
        let started = Instant::now();
        let req = validate_generation(body)?;
        let user = self.users.current_user().await?;
        if let Err(e) = check_quota(&user) {
            info!(user = %user.id, used = user.tokens_used, limit = user.tokens_limit, "quota gate closed");
            return Err(e);
        }
        let req = normalize_generation(req);
        if req.settings.streaming {
            debug!("streaming requested on generate, aggregating anyway");
        }
        info!(kind = ?req.kind, model = req.model.as_str(), "generation accepted");

        let model = req.model.as_str().to_string();
        let completion = CompletionRequest {
            model: model.clone(),
            messages: generation_messages(&req),
            temperature: req.settings.temperature,
            max_tokens: req.settings.max_tokens,
            request_id: request_id.clone(),
        };
        let ctx = AggregateCtx {
            requested_model: model.clone(),
            request_id: request_id.clone(),
            started,
            pricing: self.defaults.pricing,
        };
        let log = CompletionLog::new()
            .route("generate")
            .provider(self.provider.name())
            .model(&model)
            .request_id(&request_id);

        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();
        let outcome = match self.provider.stream_completion(completion, cancel).await {
            Ok(stream) => aggregate(stream, &ctx).await,
            Err(e) => Err(e),
        };

        let (resp, finish) = match outcome {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, kind = e.kind(), "generation failed");
                emit_completion(
                    log.latency_ms(started.elapsed().as_millis() as u64)
                        .error(e.kind(), &e.to_string()),
                );
                return Err(e);
            }
        };

        record_usage_best_effort(self.quota.as_ref(), &user.id, resp.usage.total_tokens).await;
        let latency = started.elapsed().as_millis() as u64;
        info!(
            chars = resp.content.len(),
            tokens = resp.usage.total_tokens,
            latency_ms = latency,
            "generation complete"
        );
        emit_completion(
            log.latency_ms(latency)
                .finish_reason_opt(finish.as_ref().map(FinishReason::as_str))
                .tokens(
                    Some(resp.usage.prompt_tokens),
                    Some(resp.usage.completion_tokens),
                    Some(resp.usage.total_tokens),
                ),
        );
        Ok(resp)
    }

    /// Open the upstream stream for `/stream`. Errors returned here happen
    /// before any frame exists; later failures arrive inside the stream.
    pub async fn stream(&self, body: &Value, cancel: CancellationToken) -> CoreResult<ChunkStream> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("stream", %request_id);
        self.open_stream(body, cancel, request_id)
            .instrument(span)
            .await
    }

    async fn open_stream(
        &self,
        body: &Value,
        cancel: CancellationToken,
        request_id: String,
    ) -> CoreResult<ChunkStream> {
        let started = Instant::now();
        let req = normalize_stream(validate_stream(body)?);
        let completion = CompletionRequest {
            model: self.defaults.default_model.clone(),
            messages: stream_messages(&req),
            temperature: self.defaults.temperature,
            max_tokens: self.defaults.max_tokens,
            request_id: request_id.clone(),
        };
        info!(model = %completion.model, "stream accepted");
        let log = CompletionLog::new()
            .route("stream")
            .provider(self.provider.name())
            .model(&completion.model)
            .request_id(&request_id);

        let upstream = match self.provider.stream_completion(completion, cancel).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, kind = e.kind(), "upstream stream failed to open");
                emit_completion(
                    log.latency_ms(started.elapsed().as_millis() as u64)
                        .error(e.kind(), &e.to_string()),
                );
                return Err(e);
            }
        };

        let accounting = Accounting {
            users: self.users.clone(),
            quota: self.quota.clone(),
            log,
            started,
        };
        Ok(accounted(upstream, accounting)
            .instrument(tracing::Span::current())
            .boxed())
    }
}

struct Accounting {
    users: Arc<dyn UserStore>,
    quota: Arc<dyn QuotaStore>,
    log: CompletionLog,
    started: Instant,
}

/// Pass chunks through untouched; on a clean end, charge the in-band usage.
fn accounted(
    upstream: ChunkStream,
    acct: Accounting,
) -> impl futures_util::Stream<Item = CoreResult<crate::model::CompletionChunk>> + Send + 'static {
    async_stream::stream! {
        let mut upstream = upstream;
        let mut usage: Option<ChunkUsage> = None;
        let mut finish: Option<FinishReason> = None;
        let mut chunks: u64 = 0;
        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => {
                    chunks += 1;
                    if chunk.usage.is_some() {
                        usage = chunk.usage;
                    }
                    if let Some(r) = chunk.finish() {
                        finish = Some(r);
                    }
                    yield Ok(chunk);
                }
                Err(e) => {
                    emit_completion(
                        acct.log
                            .clone()
                            .chunks(chunks)
                            .latency_ms(acct.started.elapsed().as_millis() as u64)
                            .error(e.kind(), &e.to_string()),
                    );
                    yield Err(e);
                    return;
                }
            }
        }

        match usage {
            Some(u) => match acct.users.current_user().await {
                Ok(user) => record_usage_best_effort(acct.quota.as_ref(), &user.id, u.total_tokens).await,
                Err(e) => warn!(error = %e, "usage not recorded: no current user"),
            },
            None => debug!("stream carried no usage, nothing to record"),
        }
        let latency = acct.started.elapsed().as_millis() as u64;
        info!(chunks, latency_ms = latency, "stream complete");
        emit_completion(
            acct.log
                .chunks(chunks)
                .latency_ms(latency)
                .finish_reason_opt(finish.as_ref().map(FinishReason::as_str))
                .tokens(
                    usage.map(|u| u.prompt_tokens),
                    usage.map(|u| u.completion_tokens),
                    usage.map(|u| u.total_tokens),
                ),
        );
    }
}

async fn record_usage_best_effort(quota: &dyn QuotaStore, user_id: &str, tokens: u64) {
    if let Err(e) = quota.record_usage(user_id, tokens).await {
        warn!(error = %e, user = user_id, tokens, "usage accounting failed");
    }
}

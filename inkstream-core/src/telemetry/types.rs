use serde::Serialize;

/// Structured completion event, one per generate or stream call.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CompletionLog {
    /// "generate" or "stream".
    pub route: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub request_id: Option<String>,
    pub latency_ms: Option<u64>,

    pub finish_reason: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,

    pub chunks: Option<u64>,
    pub tokens_prompt: Option<u64>,
    pub tokens_completion: Option<u64>,
    pub tokens_total: Option<u64>,
}

impl CompletionLog {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn route(mut self, route: &str) -> Self {
        self.route = Some(route.to_string());
        self
    }
    pub fn provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }
    pub fn model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }
    pub fn request_id(mut self, rid: &str) -> Self {
        self.request_id = Some(rid.to_string());
        self
    }
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
    pub fn chunks(mut self, n: u64) -> Self {
        self.chunks = Some(n);
        self
    }
    pub fn finish_reason_opt(mut self, reason: Option<&str>) -> Self {
        self.finish_reason = reason.map(|s| s.to_string());
        self
    }
    pub fn error(mut self, kind: &str, message: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self.error_message = Some(message.to_string());
        self
    }
    pub fn tokens(mut self, prompt: Option<u64>, completion: Option<u64>, total: Option<u64>) -> Self {
        self.tokens_prompt = prompt;
        self.tokens_completion = completion;
        self.tokens_total = total;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_log_serializes() {
        let log = CompletionLog::new()
            .route("generate")
            .provider("deepseek")
            .model("deepseek-chat")
            .request_id("req-abc")
            .latency_ms(42)
            .tokens(Some(10), Some(20), Some(30))
            .finish_reason_opt(Some("stop"));

        let as_json = serde_json::to_value(&log).unwrap();
        assert_eq!(as_json["route"], json!("generate"));
        assert_eq!(as_json["model"], json!("deepseek-chat"));
        assert_eq!(as_json["latency_ms"], json!(42));
        assert_eq!(as_json["tokens_total"], json!(30));
        assert_eq!(as_json["finish_reason"], json!("stop"));
        assert_eq!(as_json["error_kind"], json!(null));
    }

    #[test]
    fn error_sets_kind_and_message() {
        let log = CompletionLog::new().error("transport", "reset");
        assert_eq!(log.error_kind.as_deref(), Some("transport"));
        assert_eq!(log.error_message.as_deref(), Some("reset"));
    }
}

use crate::generation::{GenEvent, GenFailure, GenStream, GenerationRequest, Generator};
use crate::models::config::UpstreamConfig;
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;

/// OpenAI-compatible chat-completions provider, the product's default
/// upstream shape. Streams SSE deltas and maps each finish reason to
/// an artifact boundary.
pub struct UpstreamGenerator {
    client: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamGenerator {
    pub fn new(config: UpstreamConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    fn system_prompt(content_type: &str) -> String {
        format!(
            "You are a marketing copywriter. Produce a complete {} ready for review.",
            content_type.replace('_', " ")
        )
    }
}

impl Generator for UpstreamGenerator {
    fn generate(&self, request: &GenerationRequest) -> GenStream {
        let client = self.client.clone();
        let config = self.config.clone();
        let params = request.params.clone();

        Box::pin(async_stream::stream! {
            let body = json!({
                "model": config.model,
                "max_tokens": config.max_tokens,
                "stream": true,
                "messages": [
                    { "role": "system", "content": Self::system_prompt(&params.content_type) },
                    { "role": "user", "content": params.prompt },
                ],
            });

            let response = client
                .post(format!("{}/chat/completions", config.base_url.trim_end_matches('/')))
                .bearer_auth(&config.api_key)
                .json(&body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    yield Err(GenFailure {
                        transient: e.is_timeout() || e.is_connect(),
                        message: format!("upstream request failed: {}", e),
                    });
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                tracing::warn!("Upstream returned {}: {}", status, detail);
                yield Err(GenFailure {
                    transient: status.is_server_error() || status.as_u16() == 429,
                    message: format!("upstream status {}", status),
                });
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut pending = String::new();
            while let Some(piece) = bytes.next().await {
                let piece = match piece {
                    Ok(p) => p,
                    Err(e) => {
                        yield Err(GenFailure {
                            transient: true,
                            message: format!("upstream stream error: {}", e),
                        });
                        return;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&piece));

                while let Some(newline) = pending.find('\n') {
                    let line = pending[..newline].trim().to_string();
                    pending.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
                        tracing::debug!("Skipping unparseable upstream event");
                        continue;
                    };
                    let choice = event.get("choices").and_then(|c| c.get(0));
                    if let Some(delta) = choice
                        .and_then(|c| c.get("delta"))
                        .and_then(|d| d.get("content"))
                        .and_then(|v| v.as_str())
                    {
                        if !delta.is_empty() {
                            yield Ok(GenEvent::Delta(delta.to_string()));
                        }
                    }
                    if choice
                        .and_then(|c| c.get("finish_reason"))
                        .and_then(|v| v.as_str())
                        .is_some()
                    {
                        yield Ok(GenEvent::ArtifactEnd);
                    }
                }
            }
        })
    }
}

//! HTTP backend client — calls a Gemini-style `generateContent` REST API.
//!
//! POST {base_url}/v1beta/models/{model}:generateContent
//! Headers:
//!   x-goog-api-key: {api_key}
//!   content-type: application/json
//!
//! Text parts become `{ "text" }`, data URIs become `{ "inlineData" }` and
//! remote URLs become `{ "fileData" }`. Inline image data in the response is
//! returned as a data-URI media reference.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    BackendClient, BackendError, BackendRequest, BackendResponse, MediaRef, PromptPart, UsageInfo,
};
use crate::config::BackendConfig;
use crate::media::MediaAsset;

/// Calls the generative backend over HTTP.
pub struct HttpBackendClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpBackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn invoke(
        &self,
        request: &BackendRequest,
        timeout: Duration,
    ) -> Result<BackendResponse, BackendError> {
        let url = self.endpoint(&request.backend);
        let body = request_body(request);

        tracing::info!(
            "[HttpBackend] Calling {} ({} part(s))",
            request.backend,
            request.parts.len()
        );

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(timeout)
                } else {
                    BackendError::Transport(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(timeout)
            } else {
                BackendError::Transport(format!("failed to read response body: {}", e))
            }
        })?;

        if status.as_u16() == 429 {
            return Err(BackendError::Quota(response_text));
        }
        if !status.is_success() {
            return Err(BackendError::Upstream {
                status: status.as_u16(),
                body: response_text,
            });
        }

        let json: Value = serde_json::from_str(&response_text)
            .map_err(|e| BackendError::Malformed(format!("response is not JSON: {}", e)))?;
        parse_response(&json)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Build the JSON body for a `generateContent` call.
pub fn request_body(request: &BackendRequest) -> Value {
    let parts: Vec<Value> = request.parts.iter().map(part_to_json).collect();

    let mut body = json!({
        "contents": [
            {
                "role": "user",
                "parts": parts
            }
        ]
    });

    if let Some(ref options) = request.options {
        let mut config = serde_json::Map::new();
        if let Some(temperature) = options.temperature {
            config.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max) = options.max_output_tokens {
            config.insert("maxOutputTokens".to_string(), json!(max));
        }
        if !options.response_modalities.is_empty() {
            config.insert(
                "responseModalities".to_string(),
                json!(options.response_modalities),
            );
        }
        if !config.is_empty() {
            body["generationConfig"] = Value::Object(config);
        }
    }

    body
}

fn part_to_json(part: &PromptPart) -> Value {
    match part {
        PromptPart::Text { text } => json!({ "text": text }),
        PromptPart::Media { media_ref } => match MediaAsset::parse(&media_ref.url) {
            Ok(MediaAsset::Inline { mime_type, data }) => json!({
                "inlineData": { "mimeType": mime_type, "data": data }
            }),
            _ => {
                let mut file_data = json!({ "fileUri": media_ref.url });
                if let Some(ref content_type) = media_ref.content_type {
                    file_data["mimeType"] = json!(content_type);
                }
                json!({ "fileData": file_data })
            }
        },
    }
}

/// Extract text, media and usage from a `generateContent` response.
///
/// A response without candidates (e.g. a blocked prompt) yields an empty
/// [`BackendResponse`]; the executor decides what that means.
pub fn parse_response(json: &Value) -> Result<BackendResponse, BackendError> {
    if !json.is_object() {
        return Err(BackendError::Malformed("expected a JSON object".to_string()));
    }

    let parts = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default();

    let text = parts
        .iter()
        .filter(|part| part.get("thought").and_then(|t| t.as_bool()) != Some(true))
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(|s| s.to_string())
        .reduce(|a, b| format!("{}\n{}", a, b));

    let media = parts.iter().find_map(|part| {
        if let Some(inline) = part.get("inlineData") {
            let mime_type = inline.get("mimeType").and_then(|m| m.as_str())?;
            let data = inline.get("data").and_then(|d| d.as_str())?;
            Some(MediaRef {
                url: format!("data:{};base64,{}", mime_type, data),
                content_type: Some(mime_type.to_string()),
            })
        } else if let Some(file) = part.get("fileData") {
            let uri = file.get("fileUri").and_then(|u| u.as_str())?;
            Some(MediaRef {
                url: uri.to_string(),
                content_type: file
                    .get("mimeType")
                    .and_then(|m| m.as_str())
                    .map(|s| s.to_string()),
            })
        } else {
            None
        }
    });

    let usage = json.get("usageMetadata").map(|u| UsageInfo {
        input_tokens: u.get("promptTokenCount").and_then(|v| v.as_u64()),
        output_tokens: u.get("candidatesTokenCount").and_then(|v| v.as_u64()),
    });

    Ok(BackendResponse { text, media, usage })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GenerationOptions;

    #[test]
    fn test_request_body_maps_parts_and_options() {
        let request = BackendRequest {
            backend: "gemini-2.0-flash-preview-image-generation".to_string(),
            parts: vec![
                PromptPart::text("Change the background color to #ffcc00"),
                PromptPart::media("data:image/png;base64,iVBORw0KGgo="),
                PromptPart::media("https://cdn.example.com/reference.png"),
            ],
            options: Some(GenerationOptions {
                temperature: Some(1.0),
                max_output_tokens: None,
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            }),
        };

        let body = request_body(&request);
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "Change the background color to #ffcc00");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "iVBORw0KGgo=");
        assert_eq!(parts[2]["fileData"]["fileUri"], "https://cdn.example.com/reference.png");
        assert_eq!(body["generationConfig"]["temperature"], 1.0);
        assert_eq!(
            body["generationConfig"]["responseModalities"],
            json!(["TEXT", "IMAGE"])
        );
        assert!(body["generationConfig"].get("maxOutputTokens").is_none());
    }

    #[test]
    fn test_request_body_without_options() {
        let request = BackendRequest {
            backend: "gemini-2.0-flash".to_string(),
            parts: vec![PromptPart::text("hi")],
            options: None,
        };
        assert!(request_body(&request).get("generationConfig").is_none());
    }

    #[test]
    fn test_parse_text_and_image_response() {
        let json = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "thinking...", "thought": true },
                        { "text": "Here is your logo." },
                        { "inlineData": { "mimeType": "image/png", "data": "iVBORw0KGgo=" } }
                    ]
                }
            }],
            "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 1290 }
        });

        let response = parse_response(&json).unwrap();
        assert_eq!(response.text.as_deref(), Some("Here is your logo."));
        let media = response.media.unwrap();
        assert_eq!(media.url, "data:image/png;base64,iVBORw0KGgo=");
        assert_eq!(media.content_type.as_deref(), Some("image/png"));
        assert_eq!(response.usage.unwrap().output_tokens, Some(1290));
    }

    #[test]
    fn test_blocked_prompt_parses_as_empty() {
        let json = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let response = parse_response(&json).unwrap();
        assert!(response.is_empty());
    }

    #[test]
    fn test_non_object_is_malformed() {
        assert!(matches!(
            parse_response(&json!([1, 2])),
            Err(BackendError::Malformed(_))
        ));
    }
}

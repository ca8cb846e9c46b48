//! Vision-language model extractor.
//!
//! Sends the whole frame plus a description of each ROI to an
//! OpenAI-compatible chat-completions endpoint and asks for a bare JSON
//! object of readings. Models often wrap the JSON in prose or code fences, so
//! the first balanced `{...}` block of the reply is parsed and coerced into a
//! [`RawExtraction`]; anything else is dropped at this boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use vitalwatch_core::{Extraction, RawExtraction, Reading, Roi, Vital, VitalValue};

use crate::{ExtractError, Frame, RegionExtractor};

pub const DEFAULT_ENDPOINT: &str = "https://router.huggingface.co/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "Qwen/Qwen2.5-VL-7B-Instruct";

/// Connection settings for the inference service.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            max_tokens: 500,
            temperature: 0.1,
        }
    }
}

/// Region extractor backed by a hosted vision-language model.
pub struct ModelExtractor {
    client: reqwest::Client,
    config: ModelConfig,
}

// ── Wire types ──

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

impl ModelExtractor {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn request(&self, frame: &Frame, rois: &[Roi]) -> Result<RawExtraction, ExtractError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ExtractError::MissingCredentials)?;

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: build_prompt(rois),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: frame.to_data_uri(),
                        },
                    },
                ],
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        debug!(endpoint = %self.config.endpoint, model = %self.config.model, "sending frame to vision model");
        let resp = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExtractError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = resp.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ExtractError::EmptyResponse)?;
        debug!(raw = %content, "vision model reply");

        parse_reply(&content)
    }
}

#[async_trait]
impl RegionExtractor for ModelExtractor {
    fn name(&self) -> &str {
        "model"
    }

    async fn extract(&self, frame: &Frame, rois: &[Roi]) -> Extraction {
        match self.request(frame, rois).await {
            Ok(raw) => {
                info!(labels = raw.len(), "vision model extraction complete");
                Extraction::Values(raw)
            }
            Err(err) => {
                warn!(error = %err, "vision model extraction failed");
                Extraction::failed(err.to_string())
            }
        }
    }
}

/// Instruction text listing each ROI with percentage coordinates.
pub fn build_prompt(rois: &[Roi]) -> String {
    let regions: Vec<String> = rois
        .iter()
        .map(|roi| {
            let unit = roi
                .unit
                .as_deref()
                .map(|u| format!(", unit: {u}"))
                .unwrap_or_default();
            format!(
                "{}: located at ({:.0}%, {:.0}%) with dimensions {:.0}% x {:.0}%{unit}",
                roi.label,
                roi.x * 100.0,
                roi.y * 100.0,
                roi.width * 100.0,
                roi.height * 100.0,
            )
        })
        .collect();

    format!(
        "You are analyzing a medical patient monitor display. Extract the exact numerical \
         values for the following vital signs from their specific screen locations:\n\
         \n\
         {regions}\n\
         \n\
         Return ONLY a JSON object with keys HR, Pulse, SpO2, ABP, PAP, EtCO2, awRR. \
         Values are numbers; blood pressure readings (ABP, PAP) are strings in \
         \"systolic/diastolic/mean\" form such as \"120/80/93\". Use null for any value \
         that is not clearly visible. No explanations and no markdown.",
        regions = regions.join("\n"),
    )
}

/// Parse a model reply into readings.
pub fn parse_reply(content: &str) -> Result<RawExtraction, ExtractError> {
    let json = first_json_object(content).ok_or(ExtractError::NoJson)?;
    let value: Value = serde_json::from_str(json)?;
    coerce_extraction(&value)
}

/// Slice of the first balanced top-level `{...}` block in `text`.
///
/// Braces inside JSON string literals are ignored.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Validate a JSON object of readings into a [`RawExtraction`].
///
/// Only the seven known labels are kept. Numbers and non-empty strings are
/// values, `null` and blank strings are missing, anything else is a
/// per-label failure.
pub fn coerce_extraction(value: &Value) -> Result<RawExtraction, ExtractError> {
    let obj = value.as_object().ok_or(ExtractError::NotAnObject(json_kind(value)))?;
    let mut raw = RawExtraction::new();

    for (key, field) in obj {
        let Some(vital) = Vital::from_label(key) else {
            debug!(key = %key, "ignoring unknown key in model reply");
            continue;
        };
        let reading = match field {
            Value::Null => Reading::Missing,
            Value::Number(n) => match n.as_f64() {
                Some(f) => Reading::Value(VitalValue::Number(f)),
                None => Reading::Failed(format!("unrepresentable number {n}")),
            },
            Value::String(s) => Reading::from(Some(VitalValue::Text(s.trim().to_string()))),
            other => Reading::Failed(format!("unexpected {} value", json_kind(other))),
        };
        raw.insert(vital, reading);
    }
    Ok(raw)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::png_frame;
    use vitalwatch_core::default_rois;

    #[test]
    fn finds_json_inside_code_fence() {
        let reply = "Here you go:\n```json\n{\"HR\": 72, \"ABP\": \"120/80/93\"}\n```\nDone.";
        assert_eq!(
            first_json_object(reply),
            Some("{\"HR\": 72, \"ABP\": \"120/80/93\"}")
        );
    }

    #[test]
    fn first_block_wins_and_strings_are_skipped() {
        let reply = r#"{"note": "a } brace", "HR": 60} and {"HR": 99}"#;
        assert_eq!(
            first_json_object(reply),
            Some(r#"{"note": "a } brace", "HR": 60}"#)
        );
        let nested = r#"x {"a": {"b": 1}} y"#;
        assert_eq!(first_json_object(nested), Some(r#"{"a": {"b": 1}}"#));
    }

    #[test]
    fn no_json_object() {
        assert_eq!(first_json_object("I cannot read the monitor."), None);
        assert_eq!(first_json_object("{\"HR\": 72"), None);
        assert!(matches!(
            parse_reply("nothing here"),
            Err(ExtractError::NoJson)
        ));
    }

    #[test]
    fn coerces_known_labels_only() {
        let raw = parse_reply(
            r#"{"HR": 72, "Pulse": null, "SpO2": "97", "ABP": "120/80/93",
                "PAP": "  ", "EtCO2": true, "Temp": 37.0}"#,
        )
        .unwrap();

        assert_eq!(raw.value(Vital::Hr), Some(&VitalValue::Number(72.0)));
        assert_eq!(raw.get(Vital::Pulse), Some(&Reading::Missing));
        assert_eq!(raw.value(Vital::SpO2), Some(&VitalValue::from("97")));
        assert_eq!(raw.value(Vital::Abp), Some(&VitalValue::from("120/80/93")));
        assert_eq!(raw.get(Vital::Pap), Some(&Reading::Missing));
        assert!(matches!(raw.get(Vital::EtCo2), Some(Reading::Failed(_))));
        assert!(raw.get(Vital::AwRr).is_none());
        assert_eq!(raw.len(), 6);
    }

    #[test]
    fn array_reply_is_rejected() {
        let value: Value = serde_json::from_str("[1, 2]").unwrap();
        assert!(matches!(
            coerce_extraction(&value),
            Err(ExtractError::NotAnObject("array"))
        ));
    }

    #[test]
    fn prompt_lists_rois_as_percentages() {
        let rois = vec![Roi::new("HR", 0.78, 0.04, 0.18, 0.11).with_unit("bpm")];
        let prompt = build_prompt(&rois);
        assert!(prompt.contains("HR: located at (78%, 4%) with dimensions 18% x 11%, unit: bpm"));
        assert!(prompt.contains("systolic/diastolic/mean"));
    }

    #[test]
    fn request_body_shape() {
        let body = ChatRequest {
            model: DEFAULT_MODEL,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: "p".into() },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:image/png;base64,AA==".into(),
                        },
                    },
                ],
            }],
            max_tokens: 500,
            temperature: 0.1,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(
            json["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AA=="
        );
    }

    #[tokio::test]
    async fn missing_api_key_degrades_without_network() {
        let extractor = ModelExtractor::new(ModelConfig::default());
        let result = extractor.extract(&png_frame(8, 8), &default_rois()).await;
        match result {
            Extraction::Failed(reason) => assert!(reason.contains("API key")),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}

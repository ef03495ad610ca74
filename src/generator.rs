//! Generative augmentation: explanation and chat replies built on a shared
//! text-generation backend.
//!
//! Both operations fail soft. Whatever goes wrong in the backend, callers
//! get a short supportive string back instead of an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SYSTEM_MARKER: &str = "<|system|>\n";
const USER_MARKER: &str = "<|user|>\n";
const ASSISTANT_MARKER: &str = "<|assistant|>\n";
const END_OF_TURN: &str = "</s>\n";

/// Number of prior chat turns carried into the prompt.
pub const CHAT_HISTORY_WINDOW: usize = 4;

pub const EXPLAIN_OFFLINE: &str = "AI offline.";
pub const EXPLAIN_FALLBACK: &str = "Focus on deep breathing.";
pub const CHAT_OFFLINE: &str = "I'm offline.";
pub const CHAT_FALLBACK: &str = "I'm listening.";
pub const CHAT_ADVICE: &str = "Active Listening";

const EXPLAIN_INSTRUCTION: &str = "You are a supportive and empathetic student wellness counselor. \
Your goal is to explain stress factors clearly and offer 2 practical, non-medical tips. \
Keep your response concise (under 100 words) and encouraging.";

const CHAT_INSTRUCTION: &str = "You are MindEase, a warm, empathetic AI therapist. \
Your goal is to listen, validate feelings, and offer gentle support. \
Keep answers short (2-3 sentences). Do not be robotic.";

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Request(String),

    #[error("generation backend returned status {0}")]
    Status(u16),

    #[error("malformed generation output: {0}")]
    Malformed(String),
}

/// Sampling settings for one generation call. Sampling is on for both modes,
/// so replies differ between calls with the same prompt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodingParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub repetition_penalty: f32,
    pub do_sample: bool,
}

impl DecodingParams {
    pub const EXPLAIN: DecodingParams = DecodingParams {
        max_new_tokens: 500,
        temperature: 0.7,
        repetition_penalty: 1.2,
        do_sample: true,
    };

    pub const CHAT: DecodingParams = DecodingParams {
        max_new_tokens: 250,
        temperature: 0.8,
        repetition_penalty: 1.2,
        do_sample: true,
    };
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        params: &DecodingParams,
    ) -> Result<String, GenerationError>;
}

pub fn build_prompt(instruction: &str, user_content: &str) -> String {
    format!(
        "{SYSTEM_MARKER}{instruction}{END_OF_TURN}{USER_MARKER}{user_content}{END_OF_TURN}{ASSISTANT_MARKER}"
    )
}

pub fn explain_prompt(label: &str, factors: &[String]) -> String {
    let content = format!(
        "I am a student predicted to have '{label}'. My main stressors are: {}. \
Can you explain why this interacts and what I should do?",
        factors.join(", ")
    );
    build_prompt(EXPLAIN_INSTRUCTION, &content)
}

pub fn chat_prompt(message: &str, history: &[String]) -> String {
    let start = history.len().saturating_sub(CHAT_HISTORY_WINDOW);
    let conversation = history[start..].join("\n");
    let content = format!("Current Conversation:\n{conversation}\nUser: {message}");
    build_prompt(CHAT_INSTRUCTION, &content)
}

/// Takes whatever follows the last assistant marker. Backends that echo the
/// prompt and backends that return only the completion both work.
pub fn extract_reply(output: &str) -> Result<String, GenerationError> {
    let tail = match output.rfind(ASSISTANT_MARKER) {
        Some(index) => &output[index + ASSISTANT_MARKER.len()..],
        None => output,
    };
    let reply = tail.trim();
    if reply.is_empty() {
        return Err(GenerationError::Malformed(
            "no text after assistant marker".to_string(),
        ));
    }
    Ok(reply.to_string())
}

async fn generate_reply(
    generator: &dyn TextGenerator,
    prompt: &str,
    params: &DecodingParams,
) -> Result<String, GenerationError> {
    let output = generator.generate(prompt, params).await?;
    extract_reply(&output)
}

pub async fn explain(
    generator: Option<&dyn TextGenerator>,
    label: &str,
    factors: &[String],
) -> String {
    let Some(generator) = generator else {
        tracing::warn!("explanation requested but no generator is loaded");
        return EXPLAIN_OFFLINE.to_string();
    };

    let prompt = explain_prompt(label, factors);
    match generate_reply(generator, &prompt, &DecodingParams::EXPLAIN).await {
        Ok(reply) => reply,
        Err(err) => {
            tracing::error!(error = %err, "explanation generation failed");
            EXPLAIN_FALLBACK.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    pub advice: String,
}

pub async fn chat(
    generator: Option<&dyn TextGenerator>,
    message: &str,
    history: &[String],
) -> ChatReply {
    let reply = match generator {
        None => {
            tracing::warn!("chat requested but no generator is loaded");
            CHAT_OFFLINE.to_string()
        }
        Some(generator) => {
            let prompt = chat_prompt(message, history);
            match generate_reply(generator, &prompt, &DecodingParams::CHAT).await {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::error!(error = %err, "chat generation failed");
                    CHAT_FALLBACK.to_string()
                }
            }
        }
    };

    ChatReply {
        reply,
        advice: CHAT_ADVICE.to_string(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Ollama backend
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    raw: bool,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
    repeat_penalty: f32,
}

impl From<&DecodingParams> for GenerateOptions {
    fn from(params: &DecodingParams) -> Self {
        Self {
            num_predict: params.max_new_tokens,
            // Greedy decoding is expressed to Ollama as zero temperature.
            temperature: if params.do_sample {
                params.temperature
            } else {
                0.0
            },
            repeat_penalty: params.repetition_penalty,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TaggedModel>,
}

#[derive(Debug, Deserialize)]
struct TaggedModel {
    name: String,
}

/// Generator backed by an Ollama-compatible `/api/generate` endpoint. The
/// prompt is sent raw so the chat template above reaches the model intact.
pub struct OllamaGenerator {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Builds the client and checks that the backend serves the model.
    pub async fn connect(
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, GenerationError> {
        let generator = Self::new(base_url, model);
        let url = format!("{}/api/tags", generator.base_url);
        let response = generator
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GenerationError::Status(response.status().as_u16()));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;

        // Ollama lists models with a tag suffix, e.g. `tinyllama:latest`.
        let served = tags.models.iter().any(|m| {
            m.name == generator.model || m.name.split(':').next() == Some(generator.model.as_str())
        });
        if !served {
            return Err(GenerationError::Request(format!(
                "model {} is not available at {}",
                generator.model, generator.base_url
            )));
        }

        Ok(generator)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &DecodingParams,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            raw: true,
            stream: false,
            options: params.into(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GenerationError::Status(response.status().as_u16()));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        Ok(body.response)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    /// Records every prompt and answers from a script.
    pub(crate) struct ScriptedGenerator {
        pub prompts: Mutex<Vec<(String, DecodingParams)>>,
        pub output: Result<String, String>,
    }

    impl ScriptedGenerator {
        pub(crate) fn replying(output: &str) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                output: Ok(output.to_string()),
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                output: Err(message.to_string()),
            }
        }

        pub(crate) fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().unwrap().0.clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            prompt: &str,
            params: &DecodingParams,
        ) -> Result<String, GenerationError> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), *params));
            self.output.clone().map_err(GenerationError::Request)
        }
    }

    /// Ollama-compatible server on an ephemeral local port. `/api/generate`
    /// bodies are recorded; the reply is either text or an error status.
    pub(crate) struct StubOllama {
        pub base_url: String,
        pub requests: Arc<Mutex<Vec<Value>>>,
    }

    pub(crate) async fn spawn_stub_ollama(models: &[&str], reply: Result<&str, u16>) -> StubOllama {
        let tags = json!({
            "models": models.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>(),
        });
        let reply = reply.map(str::to_string);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        let router = Router::new()
            .route(
                "/api/tags",
                get(move || {
                    let tags = tags.clone();
                    async move { Json(tags) }
                }),
            )
            .route(
                "/api/generate",
                post(move |Json(body): Json<Value>| {
                    let recorded = recorded.clone();
                    let reply = reply.clone();
                    async move {
                        recorded.lock().unwrap().push(body);
                        match reply {
                            Ok(text) => Json(json!({ "response": text, "done": true })).into_response(),
                            Err(status) => StatusCode::from_u16(status).unwrap().into_response(),
                        }
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        StubOllama {
            base_url: format!("http://{addr}"),
            requests,
        }
    }

    fn approx(value: &Value, expected: f64) -> bool {
        value
            .as_f64()
            .is_some_and(|actual| (actual - expected).abs() < 1e-6)
    }

    fn turns(count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("turn {i}")).collect()
    }

    #[test]
    fn prompt_has_three_role_segments() {
        let prompt = build_prompt("be kind", "hello");
        assert_eq!(
            prompt,
            "<|system|>\nbe kind</s>\n<|user|>\nhello</s>\n<|assistant|>\n"
        );
    }

    #[test]
    fn explain_prompt_names_label_and_factors() {
        let factors = vec!["Poor Sleep".to_string(), "Bullying".to_string()];
        let prompt = explain_prompt("High Stress", &factors);
        assert!(prompt.contains("predicted to have 'High Stress'"));
        assert!(prompt.contains("My main stressors are: Poor Sleep, Bullying."));
        assert!(prompt.ends_with(ASSISTANT_MARKER));
    }

    #[test]
    fn chat_prompt_keeps_last_four_turns() {
        let prompt = chat_prompt("I feel tired", &turns(6));
        assert!(!prompt.contains("turn 1\n"));
        assert!(!prompt.contains("turn 2\n"));
        assert!(prompt.contains("Current Conversation:\nturn 3\nturn 4\nturn 5\nturn 6\nUser: I feel tired"));
    }

    #[test]
    fn chat_prompt_with_short_history() {
        let prompt = chat_prompt("hi", &[]);
        assert!(prompt.contains("Current Conversation:\n\nUser: hi</s>\n"));
    }

    #[test]
    fn reply_is_text_after_final_marker() {
        let output = format!("{}  Take a short walk.  \n", build_prompt("sys", "user"));
        assert_eq!(extract_reply(&output).unwrap(), "Take a short walk.");

        let doubled = "<|assistant|>\nfirst<|assistant|>\n second ";
        assert_eq!(extract_reply(doubled).unwrap(), "second");

        assert_eq!(extract_reply(" bare completion ").unwrap(), "bare completion");
    }

    #[test]
    fn empty_reply_is_malformed() {
        let output = build_prompt("sys", "user");
        assert!(matches!(
            extract_reply(&output),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn explain_uses_explain_decoding() {
        let generator = ScriptedGenerator::replying("Sleep earlier and talk to a friend.");
        let factors = vec!["Poor Sleep".to_string()];
        let reply = explain(Some(&generator), "Medium Stress", &factors).await;

        assert_eq!(reply, "Sleep earlier and talk to a friend.");
        let calls = generator.prompts.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, DecodingParams::EXPLAIN);
        assert_eq!(calls[0].1.max_new_tokens, 500);
    }

    #[tokio::test]
    async fn explain_falls_back_without_generator() {
        let reply = explain(None, "High Stress", &[]).await;
        assert_eq!(reply, EXPLAIN_OFFLINE);
    }

    #[tokio::test]
    async fn explain_falls_back_on_failure() {
        let generator = ScriptedGenerator::failing("out of memory");
        let reply = explain(Some(&generator), "High Stress", &[]).await;
        assert_eq!(reply, EXPLAIN_FALLBACK);
    }

    #[tokio::test]
    async fn chat_truncates_history_and_keeps_advice() {
        let generator = ScriptedGenerator::replying("That sounds hard.");
        let reply = chat(Some(&generator), "exams are soon", &turns(9)).await;

        assert_eq!(reply.reply, "That sounds hard.");
        assert_eq!(reply.advice, CHAT_ADVICE);
        let prompt = generator.last_prompt();
        assert!(!prompt.contains("turn 5\n"));
        assert!(prompt.contains("turn 6\nturn 7\nturn 8\nturn 9\nUser: exams are soon"));
        assert_eq!(
            generator.prompts.lock().unwrap()[0].1.max_new_tokens,
            250
        );
    }

    #[tokio::test]
    async fn chat_falls_back_without_generator_or_on_failure() {
        let offline = chat(None, "hello", &[]).await;
        assert_eq!(offline.reply, CHAT_OFFLINE);
        assert_eq!(offline.advice, CHAT_ADVICE);

        let generator = ScriptedGenerator::replying("   ");
        let empty = chat(Some(&generator), "hello", &[]).await;
        assert_eq!(empty.reply, CHAT_FALLBACK);
    }

    #[test]
    fn greedy_params_zero_the_temperature() {
        let greedy = DecodingParams {
            do_sample: false,
            ..DecodingParams::CHAT
        };
        let options = GenerateOptions::from(&greedy);
        assert_eq!(options.temperature, 0.0);
        assert_eq!(options.num_predict, 250);
        assert_eq!(options.repeat_penalty, 1.2);
    }

    #[test]
    fn base_url_is_normalised() {
        let generator = OllamaGenerator::new("http://localhost:11434/", "tinyllama");
        assert_eq!(generator.base_url, "http://localhost:11434");
        assert_eq!(generator.model(), "tinyllama");
    }

    #[tokio::test]
    async fn connect_accepts_tagged_model_name() {
        let stub = spawn_stub_ollama(&["mistral:7b", "tinyllama:latest"], Ok("hi")).await;
        let generator = OllamaGenerator::connect(stub.base_url.as_str(), "tinyllama")
            .await
            .unwrap();
        assert_eq!(generator.model(), "tinyllama");
    }

    #[tokio::test]
    async fn connect_rejects_model_the_backend_does_not_serve() {
        let stub = spawn_stub_ollama(&["mistral:7b"], Ok("hi")).await;
        let result = OllamaGenerator::connect(stub.base_url.as_str(), "tinyllama").await;
        assert!(matches!(result, Err(GenerationError::Request(_))));
    }

    #[tokio::test]
    async fn explain_sends_raw_request_with_explain_options() {
        let stub = spawn_stub_ollama(&["tinyllama"], Ok("<|assistant|>\n Breathe slowly. ")).await;
        let generator = OllamaGenerator::connect(stub.base_url.as_str(), "tinyllama")
            .await
            .unwrap();

        let factors = vec!["Poor Sleep".to_string()];
        let reply = explain(Some(&generator), "High Stress", &factors).await;
        assert_eq!(reply, "Breathe slowly.");

        let requests = stub.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let body = &requests[0];
        assert_eq!(body["model"], "tinyllama");
        assert_eq!(body["raw"], true);
        assert_eq!(body["stream"], false);
        assert!(body["prompt"]
            .as_str()
            .unwrap()
            .contains("predicted to have 'High Stress'"));
        assert_eq!(body["options"]["num_predict"], 500);
        assert!(approx(&body["options"]["temperature"], 0.7));
        assert!(approx(&body["options"]["repeat_penalty"], 1.2));
    }

    #[tokio::test]
    async fn chat_sends_chat_options() {
        let stub = spawn_stub_ollama(&["tinyllama"], Ok("I hear you.")).await;
        let generator = OllamaGenerator::new(stub.base_url.as_str(), "tinyllama");

        let reply = chat(Some(&generator), "exams", &turns(2)).await;
        assert_eq!(reply.reply, "I hear you.");

        let requests = stub.requests.lock().unwrap();
        assert_eq!(requests[0]["options"]["num_predict"], 250);
        assert!(approx(&requests[0]["options"]["temperature"], 0.8));
    }

    #[tokio::test]
    async fn backend_error_status_is_reported_and_falls_back() {
        let stub = spawn_stub_ollama(&["tinyllama"], Err(500)).await;
        let generator = OllamaGenerator::new(stub.base_url.as_str(), "tinyllama");

        let result = generator.generate("hello", &DecodingParams::CHAT).await;
        assert!(matches!(result, Err(GenerationError::Status(500))));

        let reply = chat(Some(&generator), "hello", &[]).await;
        assert_eq!(reply.reply, CHAT_FALLBACK);
    }
}

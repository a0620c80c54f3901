//! Claude API integration for the dwell tracker.
//!
//! Provides project suggestions for time entries that no rule matched:
//! - [`Client`]: a thin Messages API client
//! - [`SuggestionCache`]: a bounded memo of earlier answers
//! - [`ProjectAdvisor`]: the tracker-facing advisor combining both

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dwell_core::{AdvisorError, CategorizationAdvisor};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default request timeout for API calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROJECT_SUGGESTION_MAX_TOKENS: u32 = 50;
const PROJECT_SUGGESTION_TEMPERATURE: f32 = 0.3;
const PROJECT_SUGGESTION_SYSTEM: &str = "You are a helpful assistant that categorizes work \
    activities into projects. Respond only with the project name that best matches the \
    activity, or 'None' if no project matches.";

/// LLM client errors.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provided API key was invalid.
    #[error("invalid API key: {reason}")]
    InvalidApiKey { reason: &'static str },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// API returned an error response.
    #[error("API error: {message}")]
    Api { message: String },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Claude API client.
///
/// # Thread Safety
///
/// The client is safe to clone and share across threads. Each clone shares
/// the underlying HTTP connection pool.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    api_key: String,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new client with the given API key.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is empty or whitespace-only, or if
    /// the HTTP client fails to build.
    pub fn new(api_key: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = api_key.into();

        if api_key.is_empty() {
            return Err(LlmError::InvalidApiKey {
                reason: "API key cannot be empty",
            });
        }
        if api_key.trim().is_empty() {
            return Err(LlmError::InvalidApiKey {
                reason: "API key cannot be whitespace-only",
            });
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(LlmError::ClientBuild)?;

        Ok(Self { http, api_key })
    }

    /// Asks Claude which of the known projects an activity belongs to.
    ///
    /// Returns `None` when the model answers "None" or nothing at all.
    pub async fn suggest_project(
        &self,
        model: &str,
        input: &ProjectSuggestionRequest,
    ) -> Result<Option<String>, LlmError> {
        let request = MessageRequest {
            model: model.to_string(),
            max_tokens: PROJECT_SUGGESTION_MAX_TOKENS,
            temperature: PROJECT_SUGGESTION_TEMPERATURE,
            system: PROJECT_SUGGESTION_SYSTEM,
            messages: vec![Message {
                role: "user",
                content: build_project_prompt(input),
            }],
        };

        let response = self
            .http
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(parse_api_error(&body).unwrap_or_else(|| LlmError::Api {
                message: format!("status {status}: {body}"),
            }));
        }

        let payload: MessageResponse = serde_json::from_str(&body)
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
        let text = extract_text(payload.content)?;
        Ok(parse_project_reply(&text, &input.project_names))
    }
}

/// The activity to categorize and the projects it may belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectSuggestionRequest {
    pub window_title: String,
    pub application_name: String,
    pub project_names: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: &'static str,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
}

fn extract_text(blocks: Vec<ContentBlock>) -> Result<String, LlmError> {
    let mut pieces = Vec::new();
    for block in blocks {
        let ContentBlock::Text { text } = block;
        pieces.push(text);
    }
    if pieces.is_empty() {
        return Err(LlmError::InvalidResponse(
            "missing text content".to_string(),
        ));
    }
    Ok(pieces.join("\n"))
}

fn parse_api_error(body: &str) -> Option<LlmError> {
    #[derive(Deserialize)]
    struct ErrorPayload {
        error: ErrorDetails,
    }

    #[derive(Deserialize)]
    struct ErrorDetails {
        message: String,
    }

    serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .map(|payload| LlmError::Api {
            message: payload.error.message,
        })
}

fn build_project_prompt(input: &ProjectSuggestionRequest) -> String {
    format!(
        "Projects: [{}]. Activity: Window title '{}', Application '{}'. \
         Which project does this most likely belong to?",
        input.project_names.join(", "),
        input.window_title,
        input.application_name,
    )
}

/// Interprets the model's free-text answer.
///
/// A reply mentioning a known project becomes that project's exact name; the
/// longest mentioned name wins. Any other non-empty reply is returned trimmed.
fn parse_project_reply(text: &str, project_names: &[String]) -> Option<String> {
    let reply = text
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim_end_matches('.')
        .trim();
    if reply.is_empty() || reply.eq_ignore_ascii_case("none") {
        return None;
    }
    let lowered = reply.to_lowercase();
    let known = project_names
        .iter()
        .filter(|name| !name.trim().is_empty() && lowered.contains(&name.to_lowercase()))
        .max_by_key(|name| name.len());
    Some(known.map_or_else(|| reply.to_string(), Clone::clone))
}

/// Bounded, first-in-first-out memo of project suggestions.
///
/// Keys include the full project list, so adding or renaming a project
/// naturally bypasses stale answers.
#[derive(Debug)]
pub struct SuggestionCache {
    capacity: usize,
    entries: HashMap<ProjectSuggestionRequest, String>,
    order: VecDeque<ProjectSuggestionRequest>,
}

impl SuggestionCache {
    /// Creates a cache holding at most `capacity` answers. Zero disables it.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, key: &ProjectSuggestionRequest) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Stores an answer, evicting the oldest one when full.
    pub fn insert(&mut self, key: ProjectSuggestionRequest, suggestion: String) {
        if self.capacity == 0 {
            return;
        }
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = suggestion;
            return;
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, suggestion);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Categorization advisor backed by Claude.
#[derive(Debug)]
pub struct ProjectAdvisor {
    client: Client,
    model: String,
    cache: Mutex<SuggestionCache>,
}

impl ProjectAdvisor {
    pub fn new(client: Client, model: impl Into<String>, cache_capacity: usize) -> Self {
        Self {
            client,
            model: model.into(),
            cache: Mutex::new(SuggestionCache::new(cache_capacity)),
        }
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, SuggestionCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CategorizationAdvisor for ProjectAdvisor {
    async fn suggest_project(
        &self,
        window_title: &str,
        application_name: &str,
        known_projects: &[String],
    ) -> Result<Option<String>, AdvisorError> {
        if known_projects.is_empty() {
            return Ok(None);
        }
        let request = ProjectSuggestionRequest {
            window_title: window_title.to_string(),
            application_name: application_name.to_string(),
            project_names: known_projects.to_vec(),
        };
        let cached = self.lock_cache().get(&request).map(str::to_string);
        if cached.is_some() {
            debug!(window_title, "using cached project suggestion");
            return Ok(cached);
        }

        let suggestion = self
            .client
            .suggest_project(&self.model, &request)
            .await
            .map_err(AdvisorError::request)?;
        if let Some(suggestion) = &suggestion {
            self.lock_cache().insert(request, suggestion.clone());
        }
        Ok(suggestion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(title: &str) -> ProjectSuggestionRequest {
        ProjectSuggestionRequest {
            window_title: title.to_string(),
            application_name: "firefox".to_string(),
            project_names: vec!["Acme".to_string(), "Acme Website".to_string()],
        }
    }

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn client_rejects_empty_api_key() {
        assert!(matches!(
            Client::new(""),
            Err(LlmError::InvalidApiKey { .. })
        ));
    }

    #[test]
    fn client_rejects_whitespace_api_key() {
        assert!(matches!(
            Client::new("   "),
            Err(LlmError::InvalidApiKey { .. })
        ));
    }

    #[test]
    fn client_accepts_valid_api_key() {
        assert!(Client::new("sk-ant-api03-valid-key").is_ok());
    }

    #[test]
    fn client_debug_redacts_api_key() {
        let client = Client::new("secret-key").unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn build_project_prompt_lists_projects_and_activity() {
        let prompt = build_project_prompt(&request("Pricing - Acme"));
        assert_eq!(
            prompt,
            "Projects: [Acme, Acme Website]. Activity: Window title 'Pricing - Acme', \
             Application 'firefox'. Which project does this most likely belong to?"
        );
    }

    #[test]
    fn none_or_empty_replies_mean_no_suggestion() {
        let known = names(&["Acme"]);
        assert_eq!(parse_project_reply("None", &known), None);
        assert_eq!(parse_project_reply("  none.\n", &known), None);
        assert_eq!(parse_project_reply("", &known), None);
        assert_eq!(parse_project_reply("\"\"", &known), None);
    }

    #[test]
    fn replies_mentioning_a_project_use_its_exact_name() {
        let known = names(&["Acme", "Acme Website"]);
        assert_eq!(
            parse_project_reply("This is probably acme website.", &known),
            Some("Acme Website".to_string())
        );
        assert_eq!(
            parse_project_reply("'ACME'", &known),
            Some("Acme".to_string())
        );
        assert_eq!(
            parse_project_reply("Internal tooling", &known),
            Some("Internal tooling".to_string())
        );
    }

    #[test]
    fn parse_api_error_extracts_message() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        let err = parse_api_error(body).unwrap();
        assert_eq!(err.to_string(), "API error: invalid x-api-key");
        assert!(parse_api_error("<html>").is_none());
    }

    #[test]
    fn extract_text_joins_blocks() {
        let payload: MessageResponse =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"Acme"}]}"#).unwrap();
        assert_eq!(extract_text(payload.content).unwrap(), "Acme");
        assert!(matches!(
            extract_text(Vec::new()),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn cache_evicts_oldest_first() {
        let mut cache = SuggestionCache::new(2);
        cache.insert(request("a"), "Acme".to_string());
        cache.insert(request("b"), "Acme".to_string());
        cache.insert(request("a"), "Acme Website".to_string());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&request("a")), Some("Acme Website"));

        cache.insert(request("c"), "Acme".to_string());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&request("a")).is_none());
        assert!(cache.get(&request("b")).is_some());
        assert!(cache.get(&request("c")).is_some());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_key_includes_project_list() {
        let mut cache = SuggestionCache::new(4);
        cache.insert(request("a"), "Acme".to_string());
        let mut other = request("a");
        other.project_names.push("Internal".to_string());
        assert!(cache.get(&other).is_none());
    }

    #[test]
    fn zero_capacity_cache_stores_nothing() {
        let mut cache = SuggestionCache::new(0);
        cache.insert(request("a"), "Acme".to_string());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn advisor_skips_request_without_projects() {
        let advisor = ProjectAdvisor::new(Client::new("key").unwrap(), "model", 8);
        let suggestion = advisor.suggest_project("a", "b", &[]).await.unwrap();
        assert!(suggestion.is_none());
    }

    #[tokio::test]
    async fn advisor_answers_from_cache() {
        let advisor = ProjectAdvisor::new(Client::new("key").unwrap(), "model", 8);
        let key = request("Pricing");
        advisor.lock_cache().insert(key.clone(), "Acme Website".to_string());

        let suggestion = advisor
            .suggest_project(&key.window_title, &key.application_name, &key.project_names)
            .await
            .unwrap();
        assert_eq!(suggestion.as_deref(), Some("Acme Website"));

        advisor.clear_cache();
        assert!(advisor.lock_cache().is_empty());
    }
}

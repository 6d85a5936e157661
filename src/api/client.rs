use crate::domain::ports::ChatApi;
use crate::utils::error::{EtlError, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reqwest-backed chat-completions client. One POST per prompt, bearer
/// credential, bounded by the configured request timeout. Failures map to
/// the typed error taxonomy; retrying is left to the caller re-running the
/// job.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
    url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl ChatClient {
    pub fn new(url: String, api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EtlError::NetworkError {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            url,
            api_key,
            model,
        })
    }
}

impl ChatApi for ChatClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        tracing::debug!("POST {} ({} byte prompt)", self.url, prompt.len());
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, &body));
        }

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| EtlError::MalformedResponseError {
                    message: format!("undecodable response body: {}", e),
                })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| EtlError::MalformedResponseError {
                message: "response contains no completion text".to_string(),
            })
    }
}

fn map_transport_error(e: reqwest::Error) -> EtlError {
    if e.is_timeout() {
        EtlError::NetworkError {
            message: format!("request timed out: {}", e),
        }
    } else if e.is_connect() {
        EtlError::NetworkError {
            message: format!("connection failed: {}", e),
        }
    } else {
        EtlError::NetworkError {
            message: e.to_string(),
        }
    }
}

fn map_status_error(status: StatusCode, body: &str) -> EtlError {
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => EtlError::AuthError {
            message: format!("HTTP {}: {}", status, snippet),
        },
        StatusCode::TOO_MANY_REQUESTS => EtlError::RateLimitError {
            message: format!("HTTP {}: {}", status, snippet),
        },
        _ => EtlError::NetworkError {
            message: format!("HTTP {}: {}", status, snippet),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tokio_test::assert_ok;

    fn client_for(server: &MockServer) -> ChatClient {
        ChatClient::new(
            server.url("/v1/chat/completions"),
            "test-key".to_string(),
            "test-model".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [
                {"message": {"role": "assistant", "content": content}}
            ]
        })
    }

    #[tokio::test]
    async fn test_complete_returns_completion_text() {
        let server = MockServer::start();
        let api_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("Authorization", "Bearer test-key")
                .body_contains("test-model");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(completion_body("{\"Category\": \"Books\"}"));
        });

        let client = client_for(&server);
        let result = client.complete("Classify this").await;

        api_mock.assert();
        assert_eq!(result.unwrap(), "{\"Category\": \"Books\"}");
    }

    #[tokio::test]
    async fn test_prompt_sent_as_user_message() {
        let server = MockServer::start();
        let api_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_contains("\"role\":\"user\"")
                .body_contains("Classify widget-42");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(completion_body("ok"));
        });

        let client = client_for(&server);
        let result = client.complete("Classify widget-42").await;

        api_mock.assert();
        assert_ok!(result);
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_auth_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401).body("invalid api key");
        });

        let client = client_for(&server);
        let err = client.complete("p").await.unwrap_err();

        match err {
            EtlError::AuthError { message } => assert!(message.contains("401")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_rate_limit_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(429).body("slow down");
        });

        let client = client_for(&server);
        let err = client.complete("p").await.unwrap_err();

        assert!(matches!(err, EtlError::RateLimitError { .. }));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_network_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(500).body("boom");
        });

        let client = client_for(&server);
        let err = client.complete("p").await.unwrap_err();

        match err {
            EtlError::NetworkError { message } => {
                assert!(message.contains("500"));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbage_body_maps_to_malformed_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).body("not json at all");
        });

        let client = client_for(&server);
        let err = client.complete("p").await.unwrap_err();

        assert!(matches!(err, EtlError::MalformedResponseError { .. }));
    }

    #[tokio::test]
    async fn test_missing_completion_text_maps_to_malformed_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!({"choices": []}));
        });

        let client = client_for(&server);
        let err = client.complete("p").await.unwrap_err();

        assert!(matches!(err, EtlError::MalformedResponseError { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_maps_to_network_error() {
        // 連到一個沒有服務的埠
        let client = ChatClient::new(
            "http://127.0.0.1:9".to_string(),
            "k".to_string(),
            "m".to_string(),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = client.complete("p").await.unwrap_err();
        assert!(matches!(err, EtlError::NetworkError { .. }));
    }
}

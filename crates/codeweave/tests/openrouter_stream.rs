//! End-to-end tests of the paging engine over real HTTP + SSE.
//!
//! A bare tokio TCP listener plays the chat completions endpoint, so the
//! tests exercise request serialization, SSE decoding and status handling
//! without network access.

use std::sync::Arc;

use codeweave::OpenRouterClient;
use codeweave::context::BudgetAllocator;
use codeweave::paging::{
    BackendError, CompletionRequest, DoneReason, PagedCompletionEngine, PagingConfig,
    SessionOutcome,
};
use codeweave::profile::ProfileRegistry;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Read one HTTP request and return its body.
async fn read_request(sock: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = sock.read(&mut chunk).await.unwrap();
        if n == 0 {
            return String::new();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
            let len = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let start = pos + 4;
            if buf.len() >= start + len {
                return String::from_utf8_lossy(&buf[start..start + len]).into_owned();
            }
        }
    }
}

/// Serve one canned raw response per connection; forward request bodies.
async fn mock_endpoint(responses: Vec<String>) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for response in responses {
            let (mut sock, _) = listener.accept().await.unwrap();
            let body = read_request(&mut sock).await;
            let _ = tx.send(body);
            sock.write_all(response.as_bytes()).await.unwrap();
            sock.shutdown().await.unwrap();
        }
    });

    (format!("http://{addr}/v1/chat/completions"), rx)
}

fn sse_response(events: &[&str]) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str("data: ");
        body.push_str(event);
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n{body}"
    )
}

fn engine(endpoint: &str) -> PagedCompletionEngine {
    let client = OpenRouterClient::new("test-key").unwrap().with_endpoint(endpoint);
    let allocator = BudgetAllocator::new(Arc::new(ProfileRegistry::builtin()));
    PagedCompletionEngine::new(Arc::new(client), Arc::new(allocator), PagingConfig::default())
}

#[tokio::test]
async fn continues_across_two_http_calls() {
    let (endpoint, mut requests) = mock_endpoint(vec![
        sse_response(&[
            r#"{"choices":[{"delta":{"content":"fn main() {"}}]}"#,
            r#"{"choices":[{"delta":{"content":" [CONTINUE_NEEDED]"},"finish_reason":"stop"}]}"#,
        ]),
        sse_response(&[
            r#"{"choices":[{"delta":{"content":"println!(\"hi\"); }"},"finish_reason":"stop"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":50,"completion_tokens":6,"total_tokens":56}}"#,
        ]),
    ])
    .await;

    let request = CompletionRequest::new("openai/gpt-4o-mini", "Write hello world in Rust", 1_024);
    let (events, report) = engine(&endpoint).spawn(request).collect_all().await;
    let report = report.unwrap();

    assert_eq!(report.outcome, SessionOutcome::Done(DoneReason::Finished));
    assert_eq!(report.calls, 2);
    assert_eq!(report.text, "fn main() { println!(\"hi\"); }");
    assert!(!events.is_empty());

    let first: serde_json::Value = serde_json::from_str(&requests.recv().await.unwrap()).unwrap();
    assert_eq!(first["model"], "openai/gpt-4o-mini");
    assert_eq!(first["stream"], true);
    assert_eq!(first["max_tokens"], 1_024);
    assert_eq!(first["messages"][0]["role"], "system");
    assert_eq!(first["messages"][1]["content"], "Write hello world in Rust");

    let second: serde_json::Value = serde_json::from_str(&requests.recv().await.unwrap()).unwrap();
    let prompt = second["messages"][1]["content"].as_str().unwrap();
    assert!(prompt.starts_with("Write hello world in Rust"));
    assert!(prompt.ends_with("fn main() { "));
}

#[tokio::test]
async fn http_error_status_aborts_with_inline_error() {
    let (endpoint, _requests) = mock_endpoint(vec![
        "HTTP/1.1 429 Too Many Requests\r\ncontent-length: 12\r\nconnection: close\r\n\r\nrate limited"
            .to_string(),
    ])
    .await;

    let request = CompletionRequest::new("openai/gpt-4o-mini", "anything", 512);
    let (events, report) = engine(&endpoint).spawn(request).collect_all().await;

    assert_eq!(
        report.unwrap().outcome,
        SessionOutcome::Aborted(BackendError::Http {
            status: 429,
            body: "rate limited".into()
        })
    );
    let body: String = events.iter().filter_map(|e| e.body_chunk()).collect();
    assert_eq!(body, "\n[error] HTTP 429: rate limited\n");
}

#[tokio::test]
async fn provider_error_inside_stream_aborts() {
    let (endpoint, _requests) = mock_endpoint(vec![sse_response(&[
        r#"{"choices":[{"delta":{"content":"SELECT *"}}]}"#,
        r#"{"error":{"message":"model overloaded"}}"#,
    ])])
    .await;

    let request = CompletionRequest::new("openai/gpt-4o-mini", "a query", 512);
    let (_, report) = engine(&endpoint).spawn(request).collect_all().await;
    let report = report.unwrap();

    assert_eq!(
        report.outcome,
        SessionOutcome::Aborted(BackendError::Provider("model overloaded".into()))
    );
    assert_eq!(report.text, "SELECT *");
}

//! PROCESS stage against stubbed LLM endpoints: rate-limit recovery with
//! backoff, malformed-response fallback, and fail-fast on other errors.

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use spmedge::llm::{LlmClient, LlmConfig, LlmProvider};
use spmedge::models::{PipelineStage, StageStatus};
use spmedge::pipeline::processor::DocumentProcessor;
use spmedge::pipeline::StageContext;

use common::{env, TestEnv};

const CHAT_OK: &str = r#"{"choices":[{"message":{"content":"```json\n{\"plan\": \"west\"}\n```"}}]}"#;

/// Minimal HTTP stub returning queued (status, body) responses in order and
/// recording request arrival times. Repeats the last response when the queue
/// runs dry.
async fn stub_llm(responses: Vec<(u16, String)>) -> (SocketAddr, Arc<Mutex<Vec<Instant>>>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let times: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&times);

    tokio::spawn(async move {
        let mut queue = responses.into_iter().peekable();
        let mut last: (u16, String) = (200, CHAT_OK.to_string());
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            recorder.lock().unwrap().push(Instant::now());

            // Drain the request: headers, then content-length body bytes
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            let (header_end, content_length) = loop {
                let Ok(n) = socket.read(&mut buf).await else {
                    break (0, 0);
                };
                if n == 0 {
                    break (0, 0);
                }
                raw.extend_from_slice(&buf[..n]);
                if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                    let headers = String::from_utf8_lossy(&raw[..pos]);
                    let content_length = headers
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    break (pos + 4, content_length);
                }
            };
            while raw.len() < header_end + content_length {
                let Ok(n) = socket.read(&mut buf).await else {
                    break;
                };
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
            }

            let (status, body) = queue.next().unwrap_or_else(|| last.clone());
            if queue.peek().is_none() {
                last = (status, body.clone());
            }
            let response = format!(
                "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });

    (addr, times)
}

fn fast_config(endpoint: String) -> LlmConfig {
    LlmConfig {
        provider: LlmProvider::OpenAI,
        endpoint,
        api_key: Some("test-key".to_string()),
        min_request_interval_secs: 0.02,
        retry_base_delay_secs: 0.2,
        max_retries: 5,
        request_timeout_secs: 5,
        ..Default::default()
    }
}

/// Seed a document through CLEAN with an on-disk cleaned artifact.
fn seed_cleaned(env: &TestEnv, content: &str) -> String {
    let id = env.seed_document(
        "plan.txt",
        "b1",
        &[PipelineStage::Input, PipelineStage::Load, PipelineStage::Clean],
    );
    let ctx = env.ctx(PipelineStage::Clean);
    let short: String = id.chars().filter(|c| *c != '-').take(12).collect();
    std::fs::write(
        ctx.dirs()
            .stage_clean
            .join(format!("pipeline_clean_doc{short}_batchb1_plan.txt")),
        content,
    )
    .unwrap();
    id
}

#[tokio::test]
async fn rate_limited_requests_recover_with_backoff() {
    let env = env();
    let doc_id = seed_cleaned(&env, "Quarterly bonus on quota attainment.");

    let (addr, times) = stub_llm(vec![
        (429, r#"{"error": "rate_limit_exceeded"}"#.to_string()),
        (429, r#"{"error": "rate_limit_exceeded"}"#.to_string()),
        (200, CHAT_OK.to_string()),
    ])
    .await;

    let llm = LlmClient::new(fast_config(format!("http://{addr}")));
    let processor = DocumentProcessor::new(env.ctx(PipelineStage::Process), llm);
    let outcome = processor.process_documents(Some(1), 2).await.unwrap();
    assert_eq!(outcome.succeeded, 1);

    let record = env
        .store
        .get_pipeline_record(&doc_id, PipelineStage::Process)
        .unwrap()
        .unwrap();
    assert_eq!(record.status, StageStatus::Completed);

    // Three requests: two rate-limited, one success, with growing spacing
    let times = times.lock().unwrap();
    assert_eq!(times.len(), 3);
    let first_gap = times[1].duration_since(times[0]).as_secs_f64();
    let second_gap = times[2].duration_since(times[1]).as_secs_f64();
    // Backoff lower bounds: base*2^0*0.5 and base*2^1*0.5
    assert!(first_gap >= 0.1, "first retry gap {first_gap}");
    assert!(second_gap >= 0.2, "second retry gap {second_gap}");

    // The artifact holds the parsed structured payload
    let ctx = env.ctx(PipelineStage::Process);
    let artifact = StageContext::find_document_file(&ctx.dirs().stage_process, &doc_id)
        .expect("process artifact");
    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(artifact).unwrap()).unwrap();
    assert_eq!(parsed["structured"]["plan"], "west");
}

#[tokio::test]
async fn malformed_response_is_stored_as_raw_text() {
    let env = env();
    let doc_id = seed_cleaned(&env, "Some cleaned plan content.");

    let mut server = mockito::Server::new_async().await;
    let raw_reply = "```json\n{foo:\n```";
    let body = serde_json::json!({
        "choices": [{"message": {"content": raw_reply}}]
    });
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await;

    let llm = LlmClient::new(fast_config(server.url()));
    let processor = DocumentProcessor::new(env.ctx(PipelineStage::Process), llm);
    let outcome = processor.process_documents(Some(1), 1).await.unwrap();
    assert_eq!(outcome.succeeded, 1);

    let ctx = env.ctx(PipelineStage::Process);
    let artifact = StageContext::find_document_file(&ctx.dirs().stage_process, &doc_id)
        .expect("process artifact");
    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(artifact).unwrap()).unwrap();
    assert_eq!(parsed["structured"]["raw_text"], raw_reply);

    let record = env
        .store
        .get_pipeline_record(&doc_id, PipelineStage::Process)
        .unwrap()
        .unwrap();
    assert_eq!(record.status, StageStatus::Completed);
}

#[tokio::test]
async fn non_rate_limit_errors_fail_without_retry() {
    let env = env();
    let doc_id = seed_cleaned(&env, "Content that will not be processed.");

    let (addr, times) = stub_llm(vec![(
        500,
        r#"{"error": "internal"}"#.to_string(),
    )])
    .await;

    let llm = LlmClient::new(fast_config(format!("http://{addr}")));
    let processor = DocumentProcessor::new(env.ctx(PipelineStage::Process), llm);
    let outcome = processor.process_documents(Some(1), 1).await.unwrap();
    assert_eq!(outcome.succeeded, 0);
    assert_eq!(outcome.failed, 1);

    // No retry for non-rate-limit errors
    assert_eq!(times.lock().unwrap().len(), 1);

    let record = env
        .store
        .get_pipeline_record(&doc_id, PipelineStage::Process)
        .unwrap()
        .unwrap();
    assert_eq!(record.status, StageStatus::Failed);
    assert!(record.error_message.is_some());
}

#[tokio::test]
async fn missing_cleaned_content_fails_the_document() {
    let env = env();
    let doc_id = env.seed_document(
        "plan.txt",
        "b1",
        &[PipelineStage::Input, PipelineStage::Load, PipelineStage::Clean],
    );
    // No stage_clean artifact on disk

    let (addr, times) = stub_llm(vec![]).await;
    let llm = LlmClient::new(fast_config(format!("http://{addr}")));
    let processor = DocumentProcessor::new(env.ctx(PipelineStage::Process), llm);
    let outcome = processor.process_documents(Some(1), 1).await.unwrap();
    assert_eq!(outcome.failed, 1);

    // No LLM request was issued
    assert_eq!(times.lock().unwrap().len(), 0);

    let record = env
        .store
        .get_pipeline_record(&doc_id, PipelineStage::Process)
        .unwrap()
        .unwrap();
    assert_eq!(record.error_message.as_deref(), Some("No content found"));
}

//! REST client and fallback coordinator against a wiremock server

use chatline::fallback::AskRequest;
use chatline::{
    Dispatcher, FallbackCoordinator, FallbackError, FallbackSettings, HttpError, Message,
    MessageKind, QuestionApi, RestClient, Route, StaticToken, TokenSource,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUESTION_PATH: &str = "/api/v1/questions";

/// Token source that counts rejections
struct CountingToken {
    rejected: AtomicUsize,
}

impl TokenSource for CountingToken {
    fn token(&self) -> Option<String> {
        Some("abc".to_string())
    }

    fn on_unauthorized(&self) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }
}

fn settings(base_url: &str) -> FallbackSettings {
    FallbackSettings {
        base_url: base_url.to_string(),
        retry_delay: Duration::from_millis(10),
        request_timeout: Duration::from_secs(5),
        ..FallbackSettings::default()
    }
}

fn answer() -> serde_json::Value {
    json!({
        "conversationId": "conv-9",
        "response": "Sleep improved after the schedule change.",
        "confidenceScore": 0.82,
        "processingTime": 1.4,
        "retrievedDocuments": [{"id": "doc-1"}],
        "timestamp": "2024-05-01T12:00:00Z"
    })
}

fn request(question: &str) -> AskRequest {
    AskRequest {
        question: question.to_string(),
        conversation_id: None,
        user_id: Some("u1".to_string()),
    }
}

fn rest_client(server: &MockServer) -> RestClient {
    RestClient::new(&settings(&server.uri()), Arc::new(StaticToken::new("abc"))).unwrap()
}

#[tokio::test]
async fn test_ask_sends_body_and_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUESTION_PATH))
        .and(header("authorization", "Bearer abc"))
        .and(header_exists("x-request-id"))
        .and(body_partial_json(json!({"question": "how did I sleep?", "userId": "u1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(answer()))
        .expect(1)
        .mount(&server)
        .await;

    let answer = rest_client(&server)
        .ask(&request("how did I sleep?"))
        .await
        .unwrap();

    assert_eq!(answer.conversation_id, "conv-9");
    assert_eq!(answer.confidence_score, Some(0.82));
    assert_eq!(answer.retrieved_documents.map(|d| d.len()), Some(1));
}

#[tokio::test]
async fn test_status_codes_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"question": "auth"})))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"question": "busy"})))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"question": "down"})))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"question": "bad"})))
        .respond_with(ResponseTemplate::new(422).set_body_string("question too long"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"question": "garbled"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = rest_client(&server);

    assert_eq!(
        client.ask(&request("auth")).await,
        Err(HttpError::Auth { status: 403 })
    );
    assert_eq!(
        client.ask(&request("busy")).await,
        Err(HttpError::RateLimit {
            retry_after: Some(Duration::from_secs(7))
        })
    );
    assert_eq!(
        client.ask(&request("down")).await,
        Err(HttpError::Server {
            status: 503,
            message: "maintenance".to_string()
        })
    );
    assert_eq!(
        client.ask(&request("bad")).await,
        Err(HttpError::Validation {
            status: 422,
            message: "question too long".to_string()
        })
    );
    assert!(matches!(
        client.ask(&request("garbled")).await,
        Err(HttpError::Decode(_))
    ));
}

#[tokio::test]
async fn test_fallback_delivers_http_answer_to_subscribers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUESTION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(answer()))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = Arc::new(Dispatcher::default());
    let received = Arc::new(Mutex::new(Vec::<Message>::new()));
    let r = Arc::clone(&received);
    dispatcher.subscribe(MessageKind::Response, move |m| {
        r.lock().unwrap().push(m.clone())
    });

    let coordinator = FallbackCoordinator::new(
        settings(&server.uri()),
        Arc::new(rest_client(&server)),
        dispatcher.clone(),
    );
    let errors = Arc::new(AtomicUsize::new(0));
    let e = Arc::clone(&errors);
    coordinator.on_error(move |_| {
        e.fetch_add(1, Ordering::SeqCst);
    });

    let route = coordinator
        .send_question("x", None, Some("u1"))
        .await
        .unwrap();

    assert_eq!(route, Route::Http);
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].conversation_id(), Some("conv-9"));
    assert_eq!(
        received[0].payload()["response"],
        "Sleep improved after the schedule change."
    );
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unauthorized_is_attempted_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUESTION_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = Arc::new(CountingToken {
        rejected: AtomicUsize::new(0),
    });
    let api = RestClient::new(&settings(&server.uri()), tokens.clone()).unwrap();
    let coordinator = FallbackCoordinator::new(
        settings(&server.uri()),
        Arc::new(api),
        Arc::new(Dispatcher::default()),
    );

    let err = coordinator
        .send_question("x", None, Some("u1"))
        .await
        .unwrap_err();

    assert_eq!(err, FallbackError::ClientRequest(HttpError::Auth { status: 401 }));
    assert_eq!(tokens.rejected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_errors_use_every_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUESTION_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let coordinator = FallbackCoordinator::new(
        settings(&server.uri()),
        Arc::new(rest_client(&server)),
        Arc::new(Dispatcher::default()),
    );
    let errors = Arc::new(AtomicUsize::new(0));
    let e = Arc::clone(&errors);
    coordinator.on_error(move |_| {
        e.fetch_add(1, Ordering::SeqCst);
    });

    let err = coordinator
        .send_question("x", None, Some("u1"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FallbackError::ExhaustedRetries {
            attempts: 3,
            last: HttpError::Server { status: 500, .. }
        }
    ));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUESTION_PATH))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(QUESTION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(answer()))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = FallbackCoordinator::new(
        settings(&server.uri()),
        Arc::new(rest_client(&server)),
        Arc::new(Dispatcher::default()),
    );

    let route = coordinator
        .send_question("x", None, Some("u1"))
        .await
        .unwrap();
    assert_eq!(route, Route::Http);
}

#[tokio::test]
async fn test_unreachable_server_is_a_network_error() {
    // Bind then release a port so nothing is listening on it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let base_url = format!("http://{}", addr);
    let api = RestClient::new(&settings(&base_url), Arc::new(StaticToken::anonymous())).unwrap();
    let coordinator = FallbackCoordinator::new(
        settings(&base_url),
        Arc::new(api),
        Arc::new(Dispatcher::default()),
    );

    let err = coordinator
        .send_question("x", None, Some("u1"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FallbackError::ExhaustedRetries {
            attempts: 3,
            last: HttpError::Network(_)
        }
    ));
}

//! Integration tests against a real HTTP server using wiremock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use volley::{
    Error, Event, Factory, Part, RecordingSleeper, Response, RetryPolicy, SinkBuffer, Tries,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{basic_auth, body_json, body_string, body_string_contains, header, method, path, query_param},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

fn factory() -> (Factory, RecordingSleeper) {
    let sleeper = RecordingSleeper::new();
    let factory = Factory::builder().sleeper(sleeper.clone()).build();
    (factory, sleeper)
}

async fn received(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |requests| requests.len())
}

#[tokio::test]
async fn get_json() {
    let server = MockServer::start().await;
    let user = User {
        id: 1,
        name: "Alice".to_string(),
    };
    Mock::given(method("GET"))
        .and(path("/users/1"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&user))
        .mount(&server)
        .await;

    let (factory, _) = factory();
    let response = factory
        .request()
        .into_async()
        .base_url(server.uri())
        .accept_json()
        .with_url_parameters([("id", "1")])
        .get("/users/{id}")
        .await
        .expect("response");

    assert!(response.ok());
    assert_eq!(response.json::<User>().expect("json"), user);
    assert_eq!(response.json_get("name"), Some(&json!("Alice")));
    assert_eq!(
        response.effective_url().map(url::Url::path),
        Some("/users/1")
    );
}

#[tokio::test]
async fn post_json_form_and_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/json"))
        .and(body_json(json!({"name": "Bob"})))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/form"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("name=Bob"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("filename=\"notes.txt\""))
        .and(body_string_contains("hello world"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let (factory, _) = factory();
    let data = json!({"name": "Bob"});
    let url = |p: &str| format!("{}{p}", server.uri());

    let json = factory.request().into_async().post_with(&url("/json"), &data).await;
    assert_eq!(json.expect("json").status(), 201);

    let form = factory
        .request()
        .into_async()
        .as_form()
        .post_with(&url("/form"), &data)
        .await;
    assert_eq!(form.expect("form").status(), 201);

    let upload = factory
        .request()
        .into_async()
        .attach(Part::file("doc", "notes.txt", "hello world"))
        .post(&url("/upload"))
        .await;
    assert_eq!(upload.expect("upload").status(), 201);
}

#[tokio::test]
async fn query_auth_and_cookies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "rust"))
        .and(query_param("page", "2"))
        .and(basic_auth("user", "secret"))
        .and(header("cookie", "theme=dark"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("Set-Cookie", "session=abc; Path=/; HttpOnly"),
        )
        .mount(&server)
        .await;

    let (factory, _) = factory();
    let response = factory
        .request()
        .into_async()
        .with_basic_auth("user", "secret")
        .with_cookies([("theme", "dark")])
        .with_query_parameters([("page", "2")])
        .get_with(&format!("{}/search", server.uri()), &json!({"q": "rust"}))
        .await
        .expect("response");

    assert!(response.ok());
    assert_eq!(response.cookie("session"), Some("abc"));
}

#[tokio::test]
async fn retries_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("done"))
        .mount(&server)
        .await;

    let (factory, sleeper) = factory();
    let response = factory
        .request()
        .into_async()
        .retry(RetryPolicy::new(Tries::Backoff(vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
        ])))
        .get(&format!("{}/flaky", server.uri()))
        .await
        .expect("response");

    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "done");
    assert_eq!(received(&server).await, 3);
    assert_eq!(
        sleeper.delays(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[tokio::test]
async fn throws_after_exhausting_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("e".repeat(500)))
        .mount(&server)
        .await;

    let (factory, _) = factory();
    let err = factory
        .request()
        .into_async()
        .retry(RetryPolicy::new(Tries::Count(2)))
        .throw_on_failure()
        .get(&server.uri())
        .await
        .expect_err("exhausted");

    assert_eq!(received(&server).await, 2);
    let Error::Http(exception) = err else {
        panic!("expected an HTTP error, got {err:?}");
    };
    assert_eq!(exception.status(), 503);
    let summary = exception.summary().expect("summary");
    assert_eq!(summary, format!("{} (truncated...)", "e".repeat(120)));
}

#[tokio::test]
async fn failed_responses_are_returned_without_throwing() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid"))
        .mount(&server)
        .await;

    let (factory, _) = factory();
    let mut seen = None;
    let response = factory
        .request()
        .into_async()
        .delete(&server.uri())
        .await
        .expect("response")
        .on_error(|response| seen = Some(response.status()));

    assert!(response.client_error());
    assert_eq!(seen, Some(422));
}

#[tokio::test]
async fn follows_redirects() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .mount(&server)
        .await;

    let (factory, _) = factory();
    let response = factory
        .request()
        .into_async()
        .post_with(&format!("{}/old", server.uri()), &json!({"a": 1}))
        .await
        .expect("response");
    assert_eq!(response.text(), "moved");
    let stats = response.transfer_stats().expect("stats");
    assert_eq!(stats.redirects(), 1);
    assert_eq!(stats.effective_url().path(), "/new");

    let response = factory
        .request()
        .into_async()
        .without_redirecting()
        .post(&format!("{}/old", server.uri()))
        .await
        .expect("response");
    assert!(response.redirect());
    assert_eq!(response.header("location"), Some("/new"));
}

#[tokio::test]
async fn timeouts_are_connection_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let factory = Factory::builder()
        .sleeper(RecordingSleeper::new())
        .notifier(move |event: &Event| {
            let name = match event {
                Event::RequestSending { .. } => "sending",
                Event::ResponseReceived { .. } => "received",
                Event::ConnectionFailed { .. } => "failed",
            };
            sink.lock().expect("lock").push(name);
        })
        .build();

    let err = factory
        .request()
        .into_async()
        .timeout(Duration::from_millis(100))
        .retry(RetryPolicy::new(Tries::Count(3)))
        .get(&server.uri())
        .await
        .expect_err("timeout");

    assert!(err.is_timeout());
    assert_eq!(received(&server).await, 1, "connection failures are not retried");
    assert_eq!(*events.lock().expect("lock"), vec!["sending", "failed"]);
}

#[tokio::test]
async fn sink_and_stats() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
        .mount(&server)
        .await;

    let stats = Arc::new(Mutex::new(Vec::new()));
    let collected = Arc::clone(&stats);
    let buffer = SinkBuffer::new();
    let (factory, _) = factory();

    factory
        .request()
        .into_async()
        .sink(buffer.clone())
        .on_stats(move |stats| collected.lock().expect("lock").push(stats.status()))
        .get(&server.uri())
        .await
        .expect("response");

    assert_eq!(buffer.contents(), "payload");
    assert_eq!(*stats.lock().expect("lock"), vec![Some(200)]);
}

#[tokio::test]
async fn events_per_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let factory = Factory::builder()
        .sleeper(RecordingSleeper::new())
        .notifier(move |event: &Event| {
            if let Event::ResponseReceived { response, .. } = event {
                sink.lock().expect("lock").push(response.status());
            }
        })
        .build();

    let response = factory
        .request()
        .into_async()
        .retry(RetryPolicy::new(Tries::Count(2)).throw_on_exhaustion(false))
        .get(&server.uri())
        .await
        .expect("response");

    assert_eq!(response.status(), 500);
    assert_eq!(*events.lock().expect("lock"), vec![500, 500]);
}

#[tokio::test]
async fn fakes_never_reach_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (factory, _) = factory();
    factory.fake_url("*/missing", volley::fake::status(404));
    factory.prevent_stray_requests();

    let response = factory
        .request()
        .into_async()
        .get(&format!("{}/missing", server.uri()))
        .await
        .expect("faked");
    assert_eq!(response.status(), 404);

    let err = factory
        .request()
        .into_async()
        .get(&format!("{}/other", server.uri()))
        .await
        .expect_err("stray");
    assert!(err.is_stray_request());

    assert_eq!(received(&server).await, 0);
}

#[tokio::test]
async fn pool_collects_every_result() {
    let server = MockServer::start().await;
    for (p, status) in [("/a", 200), ("/c", 201)] {
        Mock::given(path(p))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }

    let (factory, _) = factory();
    let base = server.uri();
    let results = factory
        .pool()
        .add("a", |mut r| r.get(&format!("{base}/a")))
        .add("b", |mut r| r.get("http://127.0.0.1:1/b"))
        .add("c", |mut r| r.get(&format!("{base}/c")))
        .run()
        .await;

    let statuses: Vec<_> = results
        .iter()
        .map(|(key, result)| (key.to_string(), result.as_ref().map(Response::status).ok()))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("a".to_string(), Some(200)),
            ("b".to_string(), None),
            ("c".to_string(), Some(201)),
        ]
    );
    assert!(
        results
            .get("b")
            .is_some_and(|r| r.as_ref().is_err_and(Error::is_connection))
    );
}

#[tokio::test]
async fn pool_retries_each_entry_on_its_own() {
    let server = MockServer::start().await;
    Mock::given(path("/a"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(path("/b"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(path("/c"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (factory, _) = factory();
    let base = server.uri();
    let results = factory
        .pool()
        .add("a", |mut r| r.get(&format!("{base}/a")))
        .add("b", |r| {
            r.retry(RetryPolicy::new(Tries::Count(2)))
                .throw_on_failure()
                .get(&format!("{base}/b"))
        })
        .add("c", |mut r| r.get(&format!("{base}/c")))
        .run()
        .await;

    assert!(results.get("a").is_some_and(|r| r.as_ref().is_ok_and(Response::ok)));
    assert!(results.get("c").is_some_and(|r| r.as_ref().is_ok_and(Response::ok)));
    let Some(Err(Error::Http(exception))) = results.get("b") else {
        panic!("expected an HTTP failure for b");
    };
    assert_eq!(exception.status(), 500);
    assert_eq!(exception.summary(), Some("boom"));
    assert_eq!(received(&server).await, 4);
}

#[tokio::test]
async fn blocking_mode_on_a_blocking_thread() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/items/1"))
        .and(body_json(json!({"name": "widget"})))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/items/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .mount(&server)
        .await;

    let url = format!("{}/items/1", server.uri());
    let (factory, sleeper) = factory();
    let response = tokio::task::spawn_blocking(move || {
        factory
            .request()
            .retry(RetryPolicy::new(Tries::Count(2)).with_delay(volley::Delay::Fixed(
                Duration::from_millis(50),
            )))
            .put_with(&url, &json!({"name": "widget"}))
    })
    .await
    .expect("join")
    .expect("response");

    assert_eq!(response.json_get("id"), Some(&json!(1)));
    assert_eq!(sleeper.delays(), vec![Duration::from_millis(50)]);
    assert_eq!(received(&server).await, 2);
}

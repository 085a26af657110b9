//! HTTP-level tests for the stub server router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use std::sync::Arc;
use stubserver::{EndpointSpec, ResponseSpec, StubServer, StubServerConfig};
use tower::ServiceExt;

const HTML: &str = r#"<!DOCTYPE html>
<html>
    <body>
        <h1>My First Heading</h1>
        <p>My first paragraph.</p>
    </body>
</html>
"#;

fn testdata(name: &str) -> String {
    format!("@{}/tests/testdata/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn server(endpoints: Vec<EndpointSpec>) -> Arc<StubServer> {
    Arc::new(StubServer::new(StubServerConfig::new(endpoints)))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(server: Arc<StubServer>, request: Request<Body>) -> Response {
    server.router().oneshot(request).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_no_endpoint() {
    let response = send(server(vec![]), get("http://stubserver:8080/test")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["content-type"], "application/json");

    let payload: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(payload["error"], "not_found");
    assert_eq!(payload["message"], "didn't match with any endpoint");
}

#[tokio::test]
async fn test_send_status_code() {
    let endpoints = vec![EndpointSpec::new("PUT", "/other").with_response(ResponseSpec::new(201))];
    let response = send(server(endpoints), get("http://stubserver:8080/test")).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(body_text(response).await.is_empty());
}

#[tokio::test]
async fn test_send_data() {
    let endpoints = vec![EndpointSpec::new("GET", "/test")
        .with_response(ResponseSpec::new(200).with_data("my-data"))];
    let response = send(server(endpoints), get("/test")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "my-data");
}

#[tokio::test]
async fn test_send_data_as_template() {
    let template = concat!(
        "{{.Request.Method}} {{.Request.Host}} {{.Query.query}} ",
        r#"{{index (index .Request.Header "Content-Type") 0}}"#,
    );
    let endpoints = vec![EndpointSpec::new("PUT", "/test")
        .with_response(ResponseSpec::new(200).with_data(template))];
    let request = Request::builder()
        .method("PUT")
        .uri("http://stubserver:8080/test?query=string")
        .header("Content-Type", "application/json")
        .body(Body::empty())
        .unwrap();

    let response = send(server(endpoints), request).await;
    assert_eq!(body_text(response).await, "PUT stubserver:8080 string application/json");
}

#[tokio::test]
async fn test_send_data_template_with_form() {
    let endpoints = vec![EndpointSpec::new("POST", "/test").with_response(
        ResponseSpec::new(200)
            .with_data(r#"{{.Request.FormValue "first_name"}} {{.Request.FormValue "last_name"}}"#),
    )];
    let request = Request::builder()
        .method("POST")
        .uri("/test")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(Body::from("first_name=Ada&last_name=Lovelace"))
        .unwrap();

    let response = send(server(endpoints), request).await;
    assert_eq!(body_text(response).await, "Ada Lovelace");
}

#[tokio::test]
async fn test_send_data_template_with_json() {
    let endpoints = vec![EndpointSpec::new("POST", "/test").with_response(
        ResponseSpec::new(200).with_data("{{.JSON.user.first_name}} {{.JSON.user.last_name}}"),
    )];
    let request = Request::builder()
        .method("POST")
        .uri("/test")
        .header("Content-Type", "application/json")
        .body(Body::from(r#"{"user": {"first_name": "Ada", "last_name": "Lovelace"}}"#))
        .unwrap();

    let response = send(server(endpoints), request).await;
    assert_eq!(body_text(response).await, "Ada Lovelace");
}

#[tokio::test]
async fn test_send_data_as_file() {
    let endpoints = vec![EndpointSpec::new("GET", "/test")
        .with_response(ResponseSpec::new(201).with_data(testdata("html.golden")))];

    let response = send(server(endpoints), get("/test")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().get("content-type").is_none());
    assert_eq!(body_text(response).await, HTML);
}

#[tokio::test]
async fn test_send_data_as_file_with_headers() {
    let endpoints = vec![EndpointSpec::new("GET", "/test")
        .with_response(ResponseSpec::new(200).with_data(testdata("html_with_header.golden")))];

    let response = send(server(endpoints), get("/test")).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let headers = response.headers();
    assert_eq!(headers["date"], "Mon, 07 May 2018 19:22:13 GMT");
    assert_eq!(headers["expires"], "-1");
    assert_eq!(headers["cache-control"], "private, max-age=0");
    assert_eq!(headers["content-type"], "text/html; charset=ISO-8859-1");
    assert_eq!(headers["server"], "gws");
    assert_eq!(headers["vary"], "Accept-Encoding");
    assert_eq!(body_text(response).await, HTML);
}

#[tokio::test]
async fn test_send_data_as_file_with_template() {
    let endpoints = vec![EndpointSpec::new("GET", "/test")
        .with_response(ResponseSpec::new(200).with_data(testdata("html_with_template.golden")))];
    let request = Request::builder()
        .uri("http://stubserver:8080/test")
        .header("Accept", "application/json")
        .body(Body::empty())
        .unwrap();

    let response = send(server(endpoints), request).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["server"], "gws");
    assert_eq!(
        body_text(response).await,
        r#"<!DOCTYPE html>
<html>
    <body>
        <h1>GET stubserver:8080/test</h1>
        <p>Headers</p>
        <p>Accept: application/json</p>
    </body>
</html>
"#
    );
}

#[tokio::test]
async fn test_missing_response_file() {
    let endpoints = vec![EndpointSpec::new("GET", "/test")
        .with_response(ResponseSpec::new(200).with_data(testdata("missing.golden")))];

    let response = send(server(endpoints), get("/test")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let payload: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(payload["error"], "invalid_response");
}

#[tokio::test]
async fn test_yaml_config_end_to_end() {
    let yaml = r#"
endpoints:
  - url: /users/1
    response: generic
  - url: /users/1?field=address
    response: address
  - url: /users/1
    headers:
      X-Version: "2.0.0"
    response:
      status_code: 200
      headers:
        X-Served-By: [stub-a, stub-b]
      data: v2
"#;
    let server = Arc::new(StubServer::from_yaml(yaml).unwrap());

    let response = send(server.clone(), get("/users/1")).await;
    assert_eq!(body_text(response).await, "generic");

    let response = send(server.clone(), get("/users/1?field=address")).await;
    assert_eq!(body_text(response).await, "address");

    // The unconstrained endpoint passes the header check first.
    let request = Request::builder()
        .uri("/users/1")
        .header("X-Version", "2.0.0")
        .body(Body::empty())
        .unwrap();
    let response = send(server.clone(), request).await;
    assert_eq!(body_text(response).await, "generic");
}

#[tokio::test]
async fn test_header_constrained_endpoint_first() {
    let yaml = r#"
endpoints:
  - url: /users/1
    headers:
      X-Version: "2.0.0"
    response:
      headers:
        X-Served-By: [stub-a, stub-b]
      data: v2
  - url: /users/1
    response: generic
"#;
    let server = Arc::new(StubServer::from_yaml(yaml).unwrap());

    let request = Request::builder()
        .uri("/users/1")
        .header("x-version", "2.0.0")
        .body(Body::empty())
        .unwrap();
    let response = send(server.clone(), request).await;
    let served_by: Vec<_> = response
        .headers()
        .get_all("x-served-by")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(served_by, vec!["stub-a", "stub-b"]);
    assert_eq!(body_text(response).await, "v2");

    let response = send(server, get("/users/1")).await;
    assert_eq!(body_text(response).await, "generic");
}

#[tokio::test]
async fn test_run_until_shutdown() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = StubServer::new(StubServerConfig::default());

    // An already-completed shutdown future stops the server right away.
    server.run_until(listener, async {}).await.unwrap();
}

#[tokio::test]
async fn test_sample_config() {
    let server = Arc::new(StubServer::from_yaml(include_str!("../demos/stubserver.yaml")).unwrap());

    let response = send(server.clone(), get("/users/1?field=address")).await;
    assert!(body_text(response).await.contains("Analytical Row"));

    let request = Request::builder()
        .uri("/users/1")
        .header("X-Version", "2.0.0")
        .body(Body::empty())
        .unwrap();
    let response = send(server.clone(), request).await;
    assert!(body_text(response).await.contains(r#""version": 2"#));

    let request = Request::builder()
        .method("PUT")
        .uri("/users/42")
        .header("Content-Type", "application/json")
        .body(Body::from(r#"{"name": "Grace"}"#))
        .unwrap();
    let response = send(server, request).await;
    assert_eq!(body_text(response).await, r#"{"id": 42, "name": "Grace"}"#);
}

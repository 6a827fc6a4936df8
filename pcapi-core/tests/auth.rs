use pcapi_core::PcapiClient;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn providers_keep_server_order() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.3/pcapi/auth/providers"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"local": {}, "dropbox": {}}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let client = PcapiClient::new(&server.uri(), "1.3").unwrap();
    let providers = client.providers().await.unwrap();

    assert_eq!(providers, vec!["local", "dropbox"]);
}

#[tokio::test]
async fn login_start_reuses_previous_user() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.3/pcapi/auth/dropbox/old-user"))
        .and(query_param("async", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": "https://www.dropbox.com/1/oauth/authorize?oauth_token=abc",
            "userid": "new-user"
        })))
        .mount(&server)
        .await;

    let client = PcapiClient::new(&server.uri(), "1.3").unwrap();
    let ticket = client
        .login_start("dropbox", Some("old-user"))
        .await
        .unwrap();

    assert_eq!(ticket.userid, "new-user");
    assert!(ticket.url.unwrap().contains("oauth_token=abc"));
}

#[tokio::test]
async fn login_local_uses_username() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.3/pcapi/auth/local/alice"))
        .and(query_param("async", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "userid": "alice"
        })))
        .mount(&server)
        .await;

    let client = PcapiClient::new(&server.uri(), "1.3").unwrap();
    let ticket = client.login_local("alice").await.unwrap();

    assert_eq!(ticket.userid, "alice");
    assert!(ticket.url.is_none());
}

#[tokio::test]
async fn login_status_reports_authorisation() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.3/pcapi/auth/dropbox/user-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": 1})))
        .mount(&server)
        .await;

    let client = PcapiClient::new(&server.uri(), "1.3").unwrap();
    let status = client
        .login_status("dropbox", "user-1", false)
        .await
        .unwrap();

    assert!(status.is_authorized());
}

use serde_json::json;
use std::error::Error;
use std::sync::Arc;
use userhub_client::config::ApiConfig;
use userhub_client::services::users::{UserFilters, UserStatus};
use userhub_client::transport::ReqwestTransport;
use userhub_client::{Config, ExportFormat, TransportError, UsersFacade};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn facade_for(base_url: String) -> UsersFacade {
  let api = ApiConfig {
    base_url,
    timeout_secs: 5,
  };
  let transport = ReqwestTransport::new(&api, Some("secret".to_string())).expect("transport");
  UsersFacade::new(Config::default(), Arc::new(transport))
}

#[tokio::test]
async fn test_list_sends_query_and_token_once() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/users"))
    .and(query_param("page", "2"))
    .and(query_param("status", "active"))
    .and(header("authorization", "Bearer secret"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "data": [{"id": 11, "name": "Ana", "email": "ana@example.com", "status": "active"}],
      "total": 21
    })))
    .expect(1)
    .mount(&server)
    .await;

  let facade = facade_for(server.uri());
  let filters = UserFilters {
    page: Some(2),
    limit: Some(10),
    status: Some(UserStatus::Active),
    ..Default::default()
  };

  let page = facade.users().list(&filters).await.expect("list");
  let again = facade.users().list(&filters).await.expect("cached list");

  assert_eq!(page, again);
  assert_eq!(page.data[0].id, "11");
  assert_eq!(page.total_pages, 3);
  assert_eq!(page.page, 2);
}

#[tokio::test]
async fn test_server_error_keeps_cause() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/users/42"))
    .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
    .mount(&server)
    .await;

  let facade = facade_for(server.uri());
  let err = facade.users().get("42").await.expect_err("server error");

  assert_eq!(err.to_string(), "Falha ao carregar usuário");
  assert_eq!(err.status(), Some(500));
  let cause = err.source().expect("cause").to_string();
  assert!(cause.contains("database unavailable"), "{}", cause);
}

#[tokio::test]
async fn test_export_returns_raw_bytes() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/api/users/export"))
    .and(body_partial_json(json!({"format": "csv"})))
    .respond_with(ResponseTemplate::new(200).set_body_bytes(b"id,name\n1,Ana\n".to_vec()))
    .mount(&server)
    .await;

  let facade = facade_for(server.uri());
  let bytes = facade
    .users()
    .export(&UserFilters::default(), ExportFormat::Csv)
    .await
    .expect("export");

  assert_eq!(bytes, b"id,name\n1,Ana\n".to_vec());
}

#[tokio::test]
async fn test_delete_body_and_empty_response() {
  let server = MockServer::start().await;
  Mock::given(method("DELETE"))
    .and(path("/api/users/bulk/delete"))
    .and(body_partial_json(json!({"user_ids": ["1", "2"]})))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "processed": 2})))
    .expect(1)
    .mount(&server)
    .await;
  Mock::given(method("PATCH"))
    .and(path("/api/users/bulk/cancel/5"))
    .respond_with(ResponseTemplate::new(204))
    .mount(&server)
    .await;

  let facade = facade_for(server.uri());
  let result = facade
    .bulk()
    .delete(&userhub_client::services::bulk::BulkSelection::of(&["1", "2"]))
    .await
    .expect("bulk delete");
  facade.bulk().cancel("5").await.expect("empty body is fine");

  assert_eq!(result.processed, 2);
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
  // Nothing listens on the discard port
  let facade = facade_for("http://127.0.0.1:9".to_string());

  let err = facade.roles().list().await.expect_err("unreachable");

  assert!(matches!(err.cause(), Some(TransportError::Network(_))));
  assert_eq!(err.status(), None);
}

#[tokio::test]
async fn test_base_url_path_prefix_is_kept() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/backend/api/users/roles"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
    .expect(1)
    .mount(&server)
    .await;

  let facade = facade_for(format!("{}/backend", server.uri()));
  let roles = facade.roles().list().await.expect("roles behind a prefix");

  assert!(roles.is_empty());
}

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use userhub_client::services::bulk::{BulkSelection, BulkStatus};
use userhub_client::services::users::{NewUser, UserFilters, UserUpdate};
use userhub_client::transport::{ApiResponse, Method, MockTransport};
use userhub_client::{Config, UsersFacade};

fn facade() -> (Arc<MockTransport>, UsersFacade) {
  let mock = Arc::new(MockTransport::new());
  (mock.clone(), UsersFacade::new(Config::default(), mock))
}

fn user(id: &str) -> Value {
  json!({"id": id, "name": format!("User {}", id), "email": format!("{}@example.com", id), "status": "active"})
}

fn page(page: u32) -> UserFilters {
  UserFilters {
    page: Some(page),
    limit: Some(10),
    ..Default::default()
  }
}

#[tokio::test]
async fn test_repeated_page_is_served_from_cache() {
  let (mock, facade) = facade();
  mock.on(Method::Get, "/api/users", |request| {
    let page = request
      .query
      .as_ref()
      .and_then(|q| q.get("page"))
      .and_then(Value::as_u64)
      .unwrap_or(1);
    Ok(ApiResponse::Json(json!({"data": [user(&page.to_string())], "total": 25})))
  });

  let first = facade.users().list(&page(1)).await.expect("page 1");
  let again = facade.users().list(&page(1)).await.expect("page 1 again");
  assert_eq!(first, again);
  assert_eq!(mock.call_count(Method::Get, "/api/users"), 1);

  let second = facade.users().list(&page(2)).await.expect("page 2");
  assert_eq!(second.data[0].id, "2");
  assert_eq!(second.total_pages, 3);
  assert_eq!(mock.call_count(Method::Get, "/api/users"), 2);
}

#[tokio::test]
async fn test_concurrent_identical_reads_share_one_request() {
  let (mock, facade) = facade();
  mock.set_latency(Duration::from_millis(20));
  mock.on_json(Method::Get, "/api/users/7", user("7"));

  let (a, b, c) = futures::join!(
    facade.users().get("7"),
    facade.users().get("7"),
    facade.users().get("7")
  );

  assert_eq!(a.expect("a").id, "7");
  assert_eq!(b.expect("b").email, "7@example.com");
  assert!(c.is_ok());
  assert_eq!(mock.call_count(Method::Get, "/api/users/7"), 1);
}

#[tokio::test]
async fn test_update_drops_lists_and_details_only_for_users() {
  let (mock, facade) = facade();
  mock.on_json(Method::Get, "/api/users", json!({"data": [user("1")], "total": 1}));
  mock.on_json(Method::Get, "/api/users/1", user("1"));
  mock.on_json(Method::Put, "/api/users/1", user("1"));
  mock.on_json(Method::Get, "/api/users/roles", json!([]));

  facade.users().list(&page(1)).await.expect("list");
  facade.users().get("1").await.expect("detail");
  facade.roles().list().await.expect("roles");

  let update = UserUpdate {
    name: Some("Renamed".into()),
    ..Default::default()
  };
  facade.users().update("1", &update).await.expect("update");

  facade.users().list(&page(1)).await.expect("list");
  facade.users().get("1").await.expect("detail");
  facade.roles().list().await.expect("roles");

  assert_eq!(mock.call_count(Method::Get, "/api/users"), 2);
  assert_eq!(mock.call_count(Method::Get, "/api/users/1"), 2);
  assert_eq!(mock.call_count(Method::Get, "/api/users/roles"), 1);
}

#[tokio::test]
async fn test_bulk_delete_is_visible_in_next_listing() {
  let (mock, facade) = facade();
  let remaining = Arc::new(Mutex::new(vec!["1", "2", "3"]));

  let listing = remaining.clone();
  mock.on(Method::Get, "/api/users", move |_| {
    let ids = listing.lock().expect("lock").clone();
    let data: Vec<Value> = ids.iter().map(|id| user(id)).collect();
    Ok(ApiResponse::Json(json!({"data": data, "total": ids.len()})))
  });
  let deleting = remaining.clone();
  mock.on(Method::Delete, "/api/users/bulk/delete", move |_| {
    deleting.lock().expect("lock").retain(|id| *id == "3");
    Ok(ApiResponse::Json(json!({"success": true, "processed": 2})))
  });

  let before = facade.users().list(&page(1)).await.expect("list");
  assert_eq!(before.total, 3);

  let result = facade
    .bulk()
    .delete(&BulkSelection::of(&["1", "2"]))
    .await
    .expect("bulk delete");
  assert_eq!(result.processed, 2);

  let after = facade.users().list(&page(1)).await.expect("list");
  let ids: Vec<&str> = after.data.iter().map(|u| u.id.as_str()).collect();
  assert_eq!(ids, vec!["3"]);
  assert_eq!(after.total, 1);
}

#[tokio::test]
async fn test_cancel_forces_fresh_progress() {
  let (mock, facade) = facade();
  mock.on_json(
    Method::Get,
    "/api/users/bulk/progress/1",
    json!({"operation_id": "1", "status": "running", "progress": 40}),
  );
  mock.on_json(
    Method::Get,
    "/api/users/bulk/progress/10",
    json!({"operation_id": "10", "status": "running", "progress": 70}),
  );
  mock.on_json(Method::Patch, "/api/users/bulk/cancel/1", Value::Null);

  facade.bulk().get_progress("1").await.expect("progress");
  facade.bulk().get_progress("10").await.expect("progress");

  mock.on_json(
    Method::Get,
    "/api/users/bulk/progress/1",
    json!({"operation_id": "1", "status": "cancelled", "progress": 40}),
  );
  facade.bulk().cancel("1").await.expect("cancel");

  let progress = facade.bulk().get_progress("1").await.expect("progress");
  assert_eq!(progress.status, BulkStatus::Cancelled);
  facade.bulk().get_progress("10").await.expect("progress");

  assert_eq!(mock.call_count(Method::Get, "/api/users/bulk/progress/1"), 2);
  assert_eq!(mock.call_count(Method::Get, "/api/users/bulk/progress/10"), 1);
}

#[tokio::test]
async fn test_cancel_leaves_other_progress_reads_cached() {
  let (mock, facade) = facade();
  mock.set_latency(Duration::from_millis(50));
  mock.on_json(Method::Patch, "/api/users/bulk/cancel/1", Value::Null);
  mock.on_json(
    Method::Get,
    "/api/users/bulk/progress/10",
    json!({"operation_id": "10", "status": "running", "progress": 70}),
  );

  let cancelling = facade.bulk().cancel("1");
  let reading = async {
    tokio::time::sleep(Duration::from_millis(10)).await;
    facade.bulk().get_progress("10").await
  };
  let (cancelled, progress) = futures::join!(cancelling, reading);
  cancelled.expect("cancel");
  progress.expect("progress");

  facade.bulk().get_progress("10").await.expect("cached progress");

  assert_eq!(mock.call_count(Method::Get, "/api/users/bulk/progress/10"), 1);
}

#[tokio::test]
async fn test_invalid_input_never_reaches_the_network() {
  let (mock, facade) = facade();

  let err = facade
    .users()
    .create(&NewUser {
      name: "Ana".into(),
      email: "not-an-email".into(),
      password: "secret123".into(),
      ..Default::default()
    })
    .await
    .expect_err("invalid email");
  assert!(err.is_validation());

  let empty: [&str; 0] = [];
  let err = facade
    .bulk()
    .activate(&BulkSelection::of(&empty))
    .await
    .expect_err("empty selection");
  assert_eq!(err.to_string(), "Nenhum item informado para a operação em lote");

  assert_eq!(mock.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_watch_bulk_operation_until_completed() {
  let (mock, facade) = facade();
  let step = Arc::new(Mutex::new(0u32));
  let counter = step.clone();
  mock.on(Method::Get, "/api/users/bulk/progress/42", move |_| {
    let mut n = counter.lock().expect("lock");
    *n += 1;
    let body = if *n < 3 {
      json!({"operation_id": 42, "status": "running", "progress": *n * 30, "processed": *n, "total": 3})
    } else {
      json!({"operation_id": 42, "status": "completed", "progress": 100, "processed": 3, "total": 3})
    };
    Ok(ApiResponse::Json(body))
  });

  let mut poller = facade.watch_bulk_operation("42");
  let last = poller.wait().await.expect("terminal snapshot");

  assert_eq!(last.status, BulkStatus::Completed);
  assert_eq!(last.operation_id, "42");
  assert_eq!(last.processed, 3);
  assert_eq!(*step.lock().expect("lock"), 3);
}

#[tokio::test]
async fn test_full_sync_reports_failed_sources() {
  let (mock, facade) = facade();
  mock.on_json(Method::Get, "/api/users/stats", json!({"total_users": 1}));

  let report = facade.perform_full_sync().await;

  assert!(!report.success);
  assert_eq!(report.message, "Sincronização parcial");
  assert!(report.synced.contains(&"users"));
  assert!(!report.errors.is_empty());
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use super::Controller;
use crate::cache::{CacheEntry, CacheStorage};
use crate::error::WorkerError;
use crate::net::{FieldMap, Network, Request, Response};

const OFFLINE_MESSAGE: &str =
  "Form saved offline. It will be submitted automatically when you're back online.";

/// A form POST waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedSubmission {
  pub url: Url,
  pub method: String,
  pub fields: FieldMap,
  /// Unix milliseconds; also the cache key
  pub timestamp: i64,
}

pub fn submission_key(timestamp: i64) -> String {
  format!("form-{}", timestamp)
}

impl CacheEntry for QueuedSubmission {
  fn cache_key(&self) -> String {
    submission_key(self.timestamp)
  }
}

impl QueuedSubmission {
  pub fn queued_at(&self) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(self.timestamp)
  }

  /// Rebuild the url-encoded POST, lists expanded into repeated fields.
  pub fn to_request(&self) -> Request {
    Request::post_form(self.url.clone(), self.fields.encode())
  }
}

#[derive(Serialize)]
struct OfflineAcceptance<'a> {
  message: &'a str,
  offline: bool,
}

impl<S: CacheStorage, N: Network> Controller<S, N> {
  /// Deliver a form POST, or queue it for background replay.
  ///
  /// The page always gets an answer: the server's own 2xx response, or a 202
  /// saying the submission was saved offline.
  pub(super) async fn handle_submission(&self, request: Request) -> Result<Response, WorkerError> {
    match self.network.fetch(&request).await {
      Ok(response) if response.is_success() => return Ok(response),
      Ok(response) if !self.config.queue_rejected => {
        warn!(status = response.status, "Submission rejected by server");
        return Ok(response);
      }
      Ok(response) => {
        warn!(status = response.status, "Submission rejected by server, queueing for replay");
      }
      Err(e) => {
        info!(error = %e, "Submission failed, queueing for replay");
      }
    }

    let queued = self.enqueue(&request)?;

    if let Err(e) = self.registrar.register(&self.config.sync_tag) {
      warn!(
        key = %queued.cache_key(),
        error = %e,
        "Background sync registration failed, submission stays queued"
      );
    }

    Ok(Response::json(
      202,
      &OfflineAcceptance {
        message: OFFLINE_MESSAGE,
        offline: true,
      },
    )?)
  }

  fn enqueue(&self, request: &Request) -> Result<QueuedSubmission, WorkerError> {
    let mut submission = QueuedSubmission {
      url: request.url.clone(),
      method: request.method.to_string(),
      fields: FieldMap::parse(&request.body),
      timestamp: Utc::now().timestamp_millis(),
    };

    // Two submissions in the same millisecond must not overwrite each other
    while !self
      .storage
      .put_if_absent(&self.config.submission_cache, &submission)?
    {
      submission.timestamp += 1;
    }

    info!(
      key = %submission.cache_key(),
      fields = submission.fields.len(),
      "Queued submission"
    );
    Ok(submission)
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::{harness, harness_with, url, Outcome};
  use super::super::{EventOutcome, LifecycleEvent};
  use super::*;
  use crate::config::{Config, SyncConfig};
  use crate::net::FieldValue;

  const BODY: &str = "business_name=Acme+Co&email=owner%40acme.co&platforms=instagram&platforms=linkedin";

  async fn submit<S: CacheStorage, N: Network>(controller: &Controller<S, N>) -> Response {
    let request = Request::post_form(url("/submit"), BODY);
    match controller.dispatch(LifecycleEvent::Fetch(request)).await.unwrap() {
      EventOutcome::Respond(response) => response,
      other => panic!("unexpected outcome {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_delivered_submission_is_returned_unchanged() {
    let h = harness().ready().await;
    h.network.route(
      "POST",
      &url("/submit"),
      Outcome::Respond(Response::json(200, &serde_json::json!({"success": true})).unwrap()),
    );

    let response = submit(&h.controller).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), r#"{"success":true}"#);
    assert!(h.queued().is_empty());
    assert!(h.registrar.tags().is_empty());
  }

  #[tokio::test]
  async fn test_offline_submission_is_queued_and_accepted() {
    let h = harness().ready().await;
    h.network.set_offline(true);
    let before = Utc::now().timestamp_millis();

    let response = submit(&h.controller).await;

    assert_eq!(response.status, 202);
    assert_eq!(response.content_type(), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["offline"], true);
    assert!(body["message"].as_str().unwrap().contains("offline"));

    let queued = h.queued();
    assert_eq!(queued.len(), 1);
    let entry = &queued[0];
    assert!(entry.timestamp >= before);
    assert_eq!(entry.cache_key(), format!("form-{}", entry.timestamp));
    assert_eq!(entry.method, "POST");
    assert_eq!(entry.url, url("/submit"));
    assert_eq!(
      entry.fields.get("platforms"),
      Some(&FieldValue::Multiple(vec![
        "instagram".to_string(),
        "linkedin".to_string()
      ]))
    );
    assert_eq!(
      entry.fields.get("email"),
      Some(&FieldValue::Single("owner@acme.co".to_string()))
    );
    assert!(entry.queued_at().is_some());
    assert_eq!(h.registrar.tags(), vec!["form-sync".to_string()]);
  }

  #[tokio::test]
  async fn test_error_status_is_queued_by_default() {
    let h = harness().ready().await;
    h.network.route("POST", &url("/submit"), Outcome::Status(422));

    let response = submit(&h.controller).await;

    assert_eq!(response.status, 202);
    assert_eq!(h.queued().len(), 1);
  }

  #[tokio::test]
  async fn test_error_status_returned_when_rejections_are_not_queued() {
    let config = Config {
      sync: SyncConfig {
        queue_rejected: false,
        ..SyncConfig::default()
      },
      ..Config::default()
    };
    let h = harness_with(config).ready().await;
    h.network.route("POST", &url("/submit"), Outcome::Status(422));

    let response = submit(&h.controller).await;

    assert_eq!(response.status, 422);
    assert!(h.queued().is_empty());
  }

  #[tokio::test]
  async fn test_failed_sync_registration_still_queues() {
    let h = harness().ready().await;
    h.network.set_offline(true);
    h.registrar.set_failing(true);

    let response = submit(&h.controller).await;

    assert_eq!(response.status, 202);
    assert_eq!(h.queued().len(), 1);
    assert!(h.registrar.tags().is_empty());
  }

  #[tokio::test]
  async fn test_back_to_back_submissions_get_distinct_keys() {
    let h = harness().ready().await;
    h.network.set_offline(true);

    let (a, b) = futures::join!(submit(&h.controller), submit(&h.controller));
    let c = submit(&h.controller).await;

    assert_eq!((a.status, b.status, c.status), (202, 202, 202));
    let mut keys: Vec<String> = h.queued().iter().map(|q| q.cache_key()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 3);
  }

  #[test]
  fn test_to_request_expands_lists() {
    let submission = QueuedSubmission {
      url: url("/submit"),
      method: "POST".to_string(),
      fields: FieldMap::parse(b"interests=a&name=Jo&interests=b"),
      timestamp: 1_700_000_000_000,
    };

    let request = submission.to_request();

    assert_eq!(request.url, url("/submit"));
    assert_eq!(request.body, b"interests=a&interests=b&name=Jo");
    assert_eq!(submission.cache_key(), "form-1700000000000");
  }
}

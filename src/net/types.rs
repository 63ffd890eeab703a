use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Why the page issued a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Loading a full page
  Navigate,
  /// Sub-resource or script-initiated request
  #[default]
  Other,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub mode: RequestMode,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: Vec::new(),
      body: Vec::new(),
      mode: RequestMode::Other,
    }
  }

  /// A page navigation (GET with navigate mode).
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  /// A url-encoded form POST.
  pub fn post_form(url: Url, body: impl Into<String>) -> Self {
    Self {
      method: Method::POST,
      url,
      headers: vec![("content-type".to_string(), FORM_CONTENT_TYPE.to_string())],
      body: body.into().into_bytes(),
      mode: RequestMode::Other,
    }
  }

  /// Case-insensitive header lookup
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// A response handed back to the page, either from the network or built locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), content_type.to_string())],
      body: body.into(),
    }
  }

  pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Self, serde_json::Error> {
    Ok(Self::new(status, "application/json", serde_json::to_vec(value)?))
  }

  pub fn html(status: u16, body: impl Into<String>) -> Self {
    Self::new(status, "text/html; charset=utf-8", body.into().into_bytes())
  }

  pub fn text(status: u16, body: impl Into<String>) -> Self {
    Self::new(status, "text/plain; charset=utf-8", body.into().into_bytes())
  }

  /// Any 2xx status counts as delivered.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(n, _)| n.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_success_range() {
    assert!(Response::text(200, "ok").is_success());
    assert!(Response::text(204, "").is_success());
    assert!(!Response::text(302, "").is_success());
    assert!(!Response::text(422, "bad").is_success());
    assert!(!Response::text(503, "down").is_success());
  }

  #[test]
  fn test_header_lookup_ignores_case() {
    let response = Response {
      status: 200,
      headers: vec![("Content-Type".to_string(), "text/css".to_string())],
      body: Vec::new(),
    };
    assert_eq!(response.content_type(), Some("text/css"));
    assert_eq!(response.header("CONTENT-TYPE"), Some("text/css"));
    assert_eq!(response.header("etag"), None);
  }

  #[test]
  fn test_post_form_sets_content_type() {
    let request = Request::post_form(url("http://localhost:8000/submit"), "a=1");
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.header("content-type"), Some(FORM_CONTENT_TYPE));
    assert_eq!(request.body, b"a=1");
    assert!(!request.is_navigation());
  }

  #[test]
  fn test_navigate_is_get() {
    let request = Request::navigate(url("http://localhost:8000/"));
    assert_eq!(request.method, Method::GET);
    assert!(request.is_navigation());
  }

  #[test]
  fn test_json_response() {
    let response = Response::json(202, &serde_json::json!({"offline": true})).unwrap();
    assert_eq!(response.status, 202);
    assert_eq!(response.content_type(), Some("application/json"));
    assert_eq!(response.body_text(), r#"{"offline":true}"#);
  }
}

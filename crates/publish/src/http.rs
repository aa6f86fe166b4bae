//! Request plumbing shared by the REST publishers.

use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub(crate) const USER_AGENT: &str = concat!("stillpress/", env!("CARGO_PKG_VERSION"));
const MAX_MESSAGE_LEN: usize = 300;

pub(crate) fn client(headers: HeaderMap, timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .or_raise(|| ErrorKind::Client)
}

/// Send a request. Only a failure to get any response is an error here.
pub(crate) async fn send(request: RequestBuilder, endpoint: &str) -> Result<Response> {
    request.send().await.or_raise(|| ErrorKind::Transport(endpoint.to_string()))
}

/// Decode a successful response body.
pub(crate) async fn json<T: DeserializeOwned>(response: Response, endpoint: &str) -> Result<T> {
    response.json().await.or_raise(|| ErrorKind::Transport(endpoint.to_string()))
}

/// Turn an unexpected response into an error carrying the API's message.
pub(crate) async fn rejection(response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    rejection_from(status, &body)
}

pub(crate) fn rejection_from(status: StatusCode, body: &str) -> Error {
    Error::from(ErrorKind::Api(status.as_u16(), api_message(body)))
}

/// The human-readable part of an error body: `message`, else the first of
/// `errors[].message`, else the raw text cut short.
pub(crate) fn api_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let message = match value.get("message") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) if !other.is_null() => Some(other.to_string()),
            _ => value.pointer("/errors/0/message").and_then(|m| m.as_str()).map(str::to_string),
        };
        if let Some(message) = message {
            return message;
        }
    }
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_MESSAGE_LEN) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None if trimmed.is_empty() => "no details".to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r#"{"message":"Bad credentials","documentation_url":"x"}"#, "Bad credentials")]
    #[case(r#"{"success":false,"errors":[{"code":10000,"message":"Authentication error"}]}"#, "Authentication error")]
    #[case(r#"{"message":{"name":["has already been taken"]}}"#, r#"{"name":["has already been taken"]}"#)]
    #[case("<html>502 Bad Gateway</html>", "<html>502 Bad Gateway</html>")]
    #[case("", "no details")]
    fn test_api_message(#[case] body: &str, #[case] expected: &str) {
        assert_eq!(api_message(body), expected);
    }

    #[test]
    fn test_long_bodies_are_cut() {
        let message = api_message(&"x".repeat(1000));
        assert_eq!(message.chars().count(), MAX_MESSAGE_LEN + 1);
    }

    #[test]
    fn test_rejection_carries_status() {
        let err = rejection_from(StatusCode::UNPROCESSABLE_ENTITY, r#"{"message":"Reference update failed"}"#);
        assert!(matches!(&*err, ErrorKind::Api(422, m) if m == "Reference update failed"));
    }
}

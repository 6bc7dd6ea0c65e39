//! Request construction and response classification
//!
//! The executor knows how to put credentials and a body on the wire and how
//! to sort the response into the classes the session controller acts on. It
//! holds no session state: the controller passes in whatever bearer and CSRF
//! token are current for each attempt.

use bytes::Bytes;
use common::Secret;
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use session_auth::endpoints::http_error_message;
use session_auth::{CSRF_ERROR_CODES, CSRF_HEADER, ErrorBody, TOKEN_EXPIRED_CODE, endpoint_url};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Correlates all attempts of one logical request in backend logs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// One part of a multipart upload.
#[derive(Debug, Clone)]
pub enum UploadPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        data: Bytes,
        mime: Option<String>,
    },
}

impl UploadPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        UploadPart::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        UploadPart::File {
            name: name.into(),
            file_name: file_name.into(),
            data: data.into(),
            mime: None,
        }
    }

    /// Set the part's content type. No-op on text parts.
    pub fn with_mime(mut self, content_type: impl Into<String>) -> Self {
        if let UploadPart::File { mime, .. } = &mut self {
            *mime = Some(content_type.into());
        }
        self
    }
}

/// Request payload. `Clone` so a rejected request can be sent again.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Serialized with `Content-Type: application/json`
    Json(Value),
    /// Multipart form; the boundary content type is set by reqwest
    Multipart(Vec<UploadPart>),
}

/// One logical API call, reused across retries.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub endpoint: String,
    pub body: RequestBody,
    pub request_id: Uuid,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            body,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn is_state_changing(&self) -> bool {
        is_state_changing(&self.method)
    }
}

/// Anything except GET, HEAD and OPTIONS.
pub fn is_state_changing(method: &Method) -> bool {
    !(method == Method::GET || method == Method::HEAD || method == Method::OPTIONS)
}

/// Classified response.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 2xx with the parsed body (`Null` when empty, a string when not JSON)
    Success(Value),
    /// 403 carrying a CSRF error marker
    CsrfRejected(String),
    /// 401 that a refresh can recover
    AuthExpired(String),
    /// 401 that cannot be recovered (invalid, revoked, unknown code)
    AuthInvalid(String),
    /// Any other non-2xx
    Failed { status: u16, message: String },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::CsrfRejected(_) => "csrf_rejected",
            Outcome::AuthExpired(_) => "auth_expired",
            Outcome::AuthInvalid(_) => "auth_invalid",
            Outcome::Failed { .. } => "failed",
        }
    }
}

/// Classify a response by status code and body.
pub fn classify(status: u16, body: &str) -> Outcome {
    if (200..300).contains(&status) {
        return Outcome::Success(parse_success(body));
    }

    let error = ErrorBody::parse(body);
    let message = error
        .message()
        .map(str::to_owned)
        .unwrap_or_else(|| http_error_message(status));

    match status {
        403 if is_csrf_rejection(&error) => Outcome::CsrfRejected(message),
        401 if error.code_is(TOKEN_EXPIRED_CODE) => Outcome::AuthExpired(message),
        401 => Outcome::AuthInvalid(message),
        _ => Outcome::Failed { status, message },
    }
}

fn is_csrf_rejection(error: &ErrorBody) -> bool {
    let coded = error
        .code
        .as_deref()
        .is_some_and(|code| CSRF_ERROR_CODES.contains(&code));
    coded
        || error
            .message()
            .is_some_and(|m| m.to_ascii_lowercase().contains("csrf"))
}

fn parse_success(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_owned()))
}

fn build_form(parts: &[UploadPart]) -> Result<Form> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            UploadPart::Text { name, value } => form.text(name.clone(), value.clone()),
            UploadPart::File {
                name,
                file_name,
                data,
                mime,
            } => {
                let mut file = Part::bytes(data.to_vec()).file_name(file_name.clone());
                if let Some(mime) = mime {
                    file = file
                        .mime_str(mime)
                        .map_err(|e| Error::Encode(format!("invalid content type {mime}: {e}")))?;
                }
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}

/// Sends requests with credentials attached and classifies the responses.
#[derive(Clone)]
pub struct RequestExecutor {
    http: reqwest::Client,
    base_url: String,
}

impl RequestExecutor {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Build the wire request.
    ///
    /// The bearer header is set only when a token is given; the CSRF header
    /// only for state-changing methods.
    pub fn build(
        &self,
        request: &ApiRequest,
        bearer: Option<&Secret<String>>,
        csrf: Option<&Secret<String>>,
    ) -> Result<reqwest::Request> {
        let mut builder = self
            .http
            .request(
                request.method.clone(),
                endpoint_url(&self.base_url, &request.endpoint),
            )
            .header(REQUEST_ID_HEADER, request.request_id.to_string());

        if let Some(token) = bearer {
            builder = builder.bearer_auth(token.expose_str());
        }
        if request.is_state_changing()
            && let Some(csrf) = csrf
        {
            builder = builder.header(CSRF_HEADER, csrf.expose_str());
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        builder
            .build()
            .map_err(|e| Error::Transport(format!("building request: {e}")))
    }

    /// Send one attempt and classify the response.
    pub async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&Secret<String>>,
        csrf: Option<&Secret<String>>,
    ) -> Result<Outcome> {
        let built = self.build(request, bearer, csrf)?;
        let response = self.http.execute(built).await.map_err(|e| {
            Error::Transport(format!(
                "{} {} failed: {e}",
                request.method, request.endpoint
            ))
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("reading response body: {e}")))?;

        let outcome = classify(status, &body);
        debug!(status, outcome = outcome.label(), "response classified");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> RequestExecutor {
        RequestExecutor::new(reqwest::Client::new(), "http://api.test/")
    }

    fn header<'a>(request: &'a reqwest::Request, name: &str) -> Option<&'a str> {
        request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    // --- classification ---

    #[test]
    fn success_parses_json() {
        assert_eq!(
            classify(200, r#"{"events":[]}"#),
            Outcome::Success(serde_json::json!({"events": []}))
        );
    }

    #[test]
    fn success_with_empty_or_plain_body() {
        assert_eq!(classify(204, ""), Outcome::Success(Value::Null));
        assert_eq!(
            classify(200, "ok"),
            Outcome::Success(Value::String("ok".into()))
        );
    }

    #[test]
    fn csrf_code_on_403() {
        let body = r#"{"code":"EBADCSRFTOKEN","message":"invalid csrf token"}"#;
        assert_eq!(
            classify(403, body),
            Outcome::CsrfRejected("invalid csrf token".into())
        );
    }

    #[test]
    fn csrf_message_without_code_on_403() {
        let body = r#"{"message":"CSRF token missing"}"#;
        assert!(matches!(classify(403, body), Outcome::CsrfRejected(_)));
    }

    #[test]
    fn plain_403_is_generic_failure() {
        let body = r#"{"message":"Not your event"}"#;
        assert_eq!(
            classify(403, body),
            Outcome::Failed {
                status: 403,
                message: "Not your event".into()
            }
        );
    }

    #[test]
    fn expired_401_is_refreshable() {
        let body = r#"{"code":"TOKEN_EXPIRED","message":"jwt expired"}"#;
        assert_eq!(
            classify(401, body),
            Outcome::AuthExpired("jwt expired".into())
        );
    }

    #[test]
    fn revoked_or_uncoded_401_is_terminal() {
        let body = r#"{"code":"TOKEN_REVOKED","message":"token revoked"}"#;
        assert_eq!(
            classify(401, body),
            Outcome::AuthInvalid("token revoked".into())
        );
        assert_eq!(
            classify(401, ""),
            Outcome::AuthInvalid("HTTP error! status: 401".into())
        );
    }

    #[test]
    fn other_errors_use_server_message_or_fallback() {
        assert_eq!(
            classify(422, r#"{"message":"Title is required"}"#),
            Outcome::Failed {
                status: 422,
                message: "Title is required".into()
            }
        );
        assert_eq!(
            classify(502, "<html>bad gateway</html>"),
            Outcome::Failed {
                status: 502,
                message: "HTTP error! status: 502".into()
            }
        );
    }

    // --- request construction ---

    #[test]
    fn safe_methods_are_not_state_changing() {
        assert!(!is_state_changing(&Method::GET));
        assert!(!is_state_changing(&Method::HEAD));
        assert!(!is_state_changing(&Method::OPTIONS));
        assert!(is_state_changing(&Method::POST));
        assert!(is_state_changing(&Method::PUT));
        assert!(is_state_changing(&Method::PATCH));
        assert!(is_state_changing(&Method::DELETE));
    }

    #[test]
    fn no_authorization_without_token() {
        let request = ApiRequest::new(Method::GET, "/events", RequestBody::Empty);
        let built = executor().build(&request, None, None).unwrap();
        assert!(built.headers().get("authorization").is_none());
        assert_eq!(built.url().as_str(), "http://api.test/events");
    }

    #[test]
    fn bearer_attached_when_present() {
        let request = ApiRequest::new(Method::GET, "/events", RequestBody::Empty);
        let built = executor()
            .build(&request, Some(&Secret::from("at_1")), None)
            .unwrap();
        assert_eq!(header(&built, "authorization"), Some("Bearer at_1"));
        assert_eq!(
            header(&built, REQUEST_ID_HEADER),
            Some(request.request_id.to_string().as_str())
        );
    }

    #[test]
    fn csrf_only_on_state_changing_methods() {
        let csrf = Secret::from("csrf-1");

        let get = ApiRequest::new(Method::GET, "/events", RequestBody::Empty);
        let built = executor().build(&get, None, Some(&csrf)).unwrap();
        assert!(built.headers().get(CSRF_HEADER).is_none());

        let delete = ApiRequest::new(Method::DELETE, "/events/3", RequestBody::Empty);
        let built = executor().build(&delete, None, Some(&csrf)).unwrap();
        assert_eq!(header(&built, CSRF_HEADER), Some("csrf-1"));
    }

    #[test]
    fn json_body_sets_content_type() {
        let request = ApiRequest::new(
            Method::POST,
            "/coupons",
            RequestBody::Json(serde_json::json!({"code": "SPRING"})),
        );
        let built = executor().build(&request, None, None).unwrap();
        assert_eq!(header(&built, "content-type"), Some("application/json"));

        let bytes = built.body().and_then(|b| b.as_bytes()).unwrap();
        let sent: Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(sent["code"], "SPRING");
    }

    #[test]
    fn multipart_body_gets_boundary_content_type() {
        let request = ApiRequest::new(
            Method::POST,
            "/profile/avatar",
            RequestBody::Multipart(vec![
                UploadPart::text("caption", "headshot"),
                UploadPart::file("avatar", "me.png", vec![0x89, 0x50, 0x4e, 0x47])
                    .with_mime("image/png"),
            ]),
        );
        let built = executor().build(&request, None, None).unwrap();
        let content_type = header(&built, "content-type").unwrap();
        assert!(
            content_type.starts_with("multipart/form-data; boundary="),
            "got: {content_type}"
        );
    }

    #[test]
    fn invalid_part_mime_is_rejected() {
        let request = ApiRequest::new(
            Method::POST,
            "/upload",
            RequestBody::Multipart(vec![
                UploadPart::file("f", "a.bin", vec![1]).with_mime("not a mime"),
            ]),
        );
        assert!(matches!(
            executor().build(&request, None, None),
            Err(Error::Encode(_))
        ));
    }
}

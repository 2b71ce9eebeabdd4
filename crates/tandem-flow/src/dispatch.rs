//! Outbound dispatch to the voice provider.
//!
//! The dispatcher is a pure external call: it builds the provider
//! payload, sends it, and reports the provider's call id or failure.
//! It never touches the store and never retries; persisting the result
//! (and any retry policy) belongs to the orchestrator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use tandem_core::{CallId, PhoneNumber, ProviderCallId, TenantId};

use crate::error::{Error, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the dispatcher needs to place one call.
///
/// Assembled by the orchestrator from the call record, its service
/// record, and the tenant's settings.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Internal call id, embedded in the payload for webhook correlation.
    pub call_id: CallId,
    /// Owning tenant, embedded alongside the call id so the webhook
    /// lookup stays tenant-scoped.
    pub tenant_id: TenantId,
    /// Resolved dialing string.
    pub phone_number: PhoneNumber,
    /// Customer name, spoken by the assistant.
    pub customer_name: String,
    /// Kind of service performed.
    pub service_type: Option<String>,
    /// Advisor who handled the visit.
    pub advisor_name: Option<String>,
    /// Business location name.
    pub location_name: Option<String>,
    /// Review link offered at the end of the conversation.
    pub review_link: Option<String>,
}

/// Successful dispatch: the provider accepted the call.
#[derive(Debug, Clone)]
pub struct DispatchSuccess {
    /// Provider-assigned call id.
    pub provider_call_id: ProviderCallId,
    /// The provider's raw response body, surfaced to trigger callers.
    pub raw: Value,
}

/// Places outbound calls with the voice provider.
#[async_trait]
pub trait CallDispatcher: Send + Sync {
    /// Sends one call to the provider.
    ///
    /// # Errors
    ///
    /// Any transport error, non-2xx response, or malformed response
    /// surfaces as [`Error::Dispatch`] carrying the provider's raw
    /// error payload.
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchSuccess>;
}

/// Template variables the assistant substitutes during the call.
///
/// `call_id` and `tenant_id` ride along as strings; the provider echoes
/// them back in webhooks, which is how the reconciler correlates events
/// without trusting ordering.
#[derive(Debug, Serialize)]
struct VariableValues {
    call_id: String,
    tenant_id: String,
    customer_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    advisor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    review_link: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Customer {
    name: String,
    number: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssistantOverrides {
    variable_values: VariableValues,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderCallRequest {
    assistant_id: String,
    phone_number_id: String,
    customer: Customer,
    assistant_overrides: AssistantOverrides,
}

/// HTTP dispatcher for the provider's `POST /call` endpoint.
#[derive(Clone)]
pub struct HttpDispatcher {
    base_url: String,
    api_key: String,
    assistant_id: String,
    phone_number_id: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDispatcher")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("assistant_id", &self.assistant_id)
            .field("phone_number_id", &self.phone_number_id)
            .finish_non_exhaustive()
    }
}

impl HttpDispatcher {
    /// Creates a dispatcher with the default request timeout.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        assistant_id: impl Into<String>,
        phone_number_id: impl Into<String>,
    ) -> Self {
        Self::with_timeout(
            base_url,
            api_key,
            assistant_id,
            phone_number_id,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    /// Creates a dispatcher with a custom request timeout.
    ///
    /// The timeout bounds the whole provider exchange; hitting it is a
    /// dispatch failure, identical to any other transport error.
    #[must_use]
    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        assistant_id: impl Into<String>,
        phone_number_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            assistant_id: assistant_id.into(),
            phone_number_id: phone_number_id.into(),
            client,
        }
    }

    fn call_url(&self) -> String {
        format!("{}/call", self.base_url.trim_end_matches('/'))
    }

    fn build_payload(&self, request: &DispatchRequest) -> ProviderCallRequest {
        ProviderCallRequest {
            assistant_id: self.assistant_id.clone(),
            phone_number_id: self.phone_number_id.clone(),
            customer: Customer {
                name: request.customer_name.clone(),
                number: request.phone_number.as_str().to_string(),
            },
            assistant_overrides: AssistantOverrides {
                variable_values: VariableValues {
                    call_id: request.call_id.to_string(),
                    tenant_id: request.tenant_id.to_string(),
                    customer_name: request.customer_name.clone(),
                    service_type: request.service_type.clone(),
                    advisor_name: request.advisor_name.clone(),
                    location: request.location_name.clone(),
                    review_link: request.review_link.clone(),
                },
            },
        }
    }
}

#[async_trait]
impl CallDispatcher for HttpDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchSuccess> {
        let payload = self.build_payload(request);
        let response = self
            .client
            .post(self.call_url())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Dispatch {
                status: None,
                message: format!("provider request failed: {e}"),
                payload: None,
            })?;

        let status = response.status();
        if status.is_success() {
            let raw = response.json::<Value>().await.map_err(|e| Error::Dispatch {
                status: Some(status.as_u16()),
                message: format!("invalid provider response: {e}"),
                payload: None,
            })?;
            let provider_call_id = raw
                .get("id")
                .and_then(Value::as_str)
                .and_then(|id| ProviderCallId::new(id).ok())
                .ok_or_else(|| Error::Dispatch {
                    status: Some(status.as_u16()),
                    message: "provider response missing call id".to_string(),
                    payload: Some(raw.clone()),
                })?;
            return Ok(DispatchSuccess {
                provider_call_id,
                raw,
            });
        }

        let body = response.bytes().await.map_err(|e| Error::Dispatch {
            status: Some(status.as_u16()),
            message: format!("failed reading provider error body: {e}"),
            payload: None,
        })?;
        let parsed = serde_json::from_slice::<Value>(&body).ok();
        let message = parsed
            .as_ref()
            .and_then(|value| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| String::from_utf8_lossy(&body).to_string());
        let payload = parsed.unwrap_or_else(|| Value::String(String::from_utf8_lossy(&body).to_string()));

        Err(Error::Dispatch {
            status: Some(status.as_u16()),
            message: format!("provider rejected dispatch ({status}): {message}"),
            payload: Some(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::routing::post;
    use serde_json::json;

    use super::*;

    fn sample_request() -> DispatchRequest {
        DispatchRequest {
            call_id: CallId::from_i64(42),
            tenant_id: TenantId::new_unchecked("acme-motors"),
            phone_number: PhoneNumber::new_unchecked("+15551234567"),
            customer_name: "Jordan".to_string(),
            service_type: Some("oil change".to_string()),
            advisor_name: Some("Sam".to_string()),
            location_name: Some("Acme Motors Downtown".to_string()),
            review_link: None,
        }
    }

    async fn spawn_status_server(status: StatusCode, body: serde_json::Value) -> String {
        let app = Router::new().route(
            "/call",
            post(move || {
                let status = status;
                let body = body.clone();
                async move { (status, axum::Json(body)) }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        format!("http://{addr}")
    }

    /// Server that records the request body it receives.
    async fn spawn_capture_server(
        captured: Arc<Mutex<Option<Value>>>,
        body: serde_json::Value,
    ) -> String {
        let app = Router::new().route(
            "/call",
            post(move |axum::Json(payload): axum::Json<Value>| {
                let captured = captured.clone();
                let body = body.clone();
                async move {
                    *captured.lock().unwrap() = Some(payload);
                    (StatusCode::CREATED, axum::Json(body))
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        format!("http://{addr}")
    }

    fn dispatcher(base_url: String) -> HttpDispatcher {
        HttpDispatcher::new(base_url, "test-key", "asst_1", "phone_1")
    }

    #[tokio::test]
    async fn dispatch_returns_provider_call_id() {
        let base_url = spawn_status_server(
            StatusCode::CREATED,
            json!({ "id": "abc-123", "status": "queued" }),
        )
        .await;

        let success = dispatcher(base_url)
            .dispatch(&sample_request())
            .await
            .unwrap();
        assert_eq!(success.provider_call_id.as_str(), "abc-123");
        assert_eq!(success.raw["status"], "queued");
    }

    #[tokio::test]
    async fn dispatch_sends_camel_case_payload_with_embedded_ids() {
        let captured = Arc::new(Mutex::new(None));
        let base_url =
            spawn_capture_server(captured.clone(), json!({ "id": "abc-123" })).await;

        dispatcher(base_url)
            .dispatch(&sample_request())
            .await
            .unwrap();

        let payload = captured.lock().unwrap().clone().unwrap();
        assert_eq!(payload["assistantId"], "asst_1");
        assert_eq!(payload["phoneNumberId"], "phone_1");
        assert_eq!(payload["customer"]["name"], "Jordan");
        assert_eq!(payload["customer"]["number"], "+15551234567");

        let variables = &payload["assistantOverrides"]["variableValues"];
        assert_eq!(variables["call_id"], "42");
        assert_eq!(variables["tenant_id"], "acme-motors");
        assert_eq!(variables["customer_name"], "Jordan");
        assert_eq!(variables["location"], "Acme Motors Downtown");
        // Unset variables are omitted, not null.
        assert!(variables.get("review_link").is_none());
    }

    #[tokio::test]
    async fn non_2xx_surfaces_dispatch_error_with_payload() {
        let base_url = spawn_status_server(
            StatusCode::BAD_REQUEST,
            json!({ "message": "invalid phone number" }),
        )
        .await;

        let err = dispatcher(base_url)
            .dispatch(&sample_request())
            .await
            .unwrap_err();
        match err {
            Error::Dispatch {
                status,
                message,
                payload,
            } => {
                assert_eq!(status, Some(400));
                assert!(message.contains("invalid phone number"));
                assert_eq!(payload.unwrap()["message"], "invalid phone number");
            }
            other => panic!("expected dispatch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_without_call_id_is_a_dispatch_error() {
        let base_url =
            spawn_status_server(StatusCode::OK, json!({ "status": "queued" })).await;

        let err = dispatcher(base_url)
            .dispatch(&sample_request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dispatch { .. }));
        assert!(err.to_string().contains("missing call id"));
    }

    #[tokio::test]
    async fn transport_failure_has_no_status() {
        // Bind a listener to reserve a port, then drop it so connections fail.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let err = dispatcher(format!("http://{addr}"))
            .dispatch(&sample_request())
            .await
            .unwrap_err();
        match err {
            Error::Dispatch { status, .. } => assert_eq!(status, None),
            other => panic!("expected dispatch error, got {other:?}"),
        }
    }
}

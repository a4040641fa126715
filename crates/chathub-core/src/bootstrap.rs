//! Conversation bootstrap over plain HTTP.
//!
//! A single GET that yields the identity every later turn authenticates with.

use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::BootstrapError;
use crate::types::ConversationIdentity;

pub const DEFAULT_CREATE_URL: &str = "https://www.bing.com/turing/conversation/create";

/// Response header carrying the conversation signature.
pub const ENCRYPTED_SIGNATURE_HEADER: &str = "x-sydney-encryptedconversationsignature";

const REFERER: &str = "https://www.bing.com/search";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CreateConversationResponse {
    conversation_id: Option<String>,
    client_id: Option<String>,
    conversation_signature: Option<String>,
    encrypted_conversation_signature: Option<String>,
    result: Option<CreateResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreateResult {
    value: Option<String>,
    message: Option<String>,
}

/// Build the cookie header value for a user token.
pub fn user_cookie(user_token: &str) -> String {
    format!("_U={user_token};")
}

/// Create a new conversation and return its identity.
#[instrument(skip_all, fields(endpoint = %endpoint))]
pub async fn bootstrap(
    http: &reqwest::Client,
    endpoint: &str,
    cookie: &str,
    extra_headers: &HeaderMap,
) -> Result<ConversationIdentity, BootstrapError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(reqwest::header::REFERER, HeaderValue::from_static(REFERER));
    if let Ok(value) = HeaderValue::from_str(cookie) {
        headers.insert(COOKIE, value);
    }
    for (name, value) in extra_headers {
        headers.insert(name.clone(), value.clone());
    }

    let resp = http.get(endpoint).headers(headers).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(BootstrapError::Http {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
        });
    }

    let encrypted_header = resp
        .headers()
        .get(ENCRYPTED_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let body: CreateConversationResponse = resp.json().await?;
    if let Some(result) = &body.result {
        if let Some(value) = result.value.as_deref().filter(|v| *v != "Success") {
            return Err(BootstrapError::Rejected {
                value: value.to_string(),
                message: result.message.clone().unwrap_or_default(),
            });
        }
    }

    let conversation_id = non_empty(body.conversation_id)
        .ok_or(BootstrapError::MissingField("conversationId"))?;
    let client_id =
        non_empty(body.client_id).ok_or(BootstrapError::MissingField("clientId"))?;
    // The header value is the conversation signature echoed in every query.
    // The websocket token is the body's encrypted signature; the service has
    // stopped sending that field, so the header value stands in for it.
    let encrypted_conversation_signature = non_empty(body.encrypted_conversation_signature)
        .or_else(|| encrypted_header.clone())
        .ok_or(BootstrapError::MissingField("encryptedConversationSignature"))?;
    let conversation_signature = encrypted_header
        .or_else(|| non_empty(body.conversation_signature))
        .unwrap_or_else(|| encrypted_conversation_signature.clone());

    debug!(%conversation_id, "conversation created");
    Ok(ConversationIdentity {
        conversation_id,
        client_id,
        conversation_signature,
        encrypted_conversation_signature,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

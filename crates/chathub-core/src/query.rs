//! Outbound query construction.
//!
//! Builds the type-4 invocation frame that starts a turn. Randomness (trace
//! id, message type tie-break) comes from a caller-supplied [`Rng`] so tests
//! can seed it.

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::QueryError;
use crate::protocol::frames::frame_type;
use crate::types::ConversationIdentity;

/// Option flags sent with every query; the variant and `clgalileo` are added
/// per query.
pub const BASE_OPTION_SETS: &[&str] = &[
    "nlu_direct_response_filter",
    "deepleo",
    "disable_emoji_spoken_text",
    "responsible_ai_policy_235",
    "enablemm",
    "intmvgnd",
    "dv3sugg",
    "gencontentv3",
    "weanow",
    "iyxapbing",
    "iycapbing",
    "fluxsrtrunc",
    "fluxtrunc",
    "fluxv1",
    "rai273",
    "replaceurl",
];

/// Appended whenever the variant is not [`Variant::Galileo`].
pub const GALILEO_COMPANION_FLAG: &str = "clgalileo";

pub const ALLOWED_MESSAGE_TYPES: &[&str] = &[
    "ActionRequest",
    "Chat",
    "Context",
    "InternalSearchQuery",
    "InternalSearchResult",
    "Disengaged",
    "InternalLoaderMessage",
    "Progress",
    "RenderCardRequest",
    "AdsQuery",
    "SemanticSerp",
    "GenerateContentQuery",
    "SearchQuery",
];

const TRACE_ID_LEN: usize = 32;
const DEFAULT_LOCATION_RADIUS: &str = "1000m";

/// Conversation style.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Variant {
    Galileo,
    H3Precise,
    #[default]
    H3Imaginative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum UserMessageType {
    Chat,
    SearchQuery,
}

/// Coarse user location hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    /// Radius such as `"1000m"`.
    #[serde(default)]
    pub radius: Option<String>,
}

impl Location {
    fn to_hint(&self) -> String {
        format!(
            "lat:{};long:{};re={};",
            self.lat,
            self.lng,
            self.radius.as_deref().unwrap_or(DEFAULT_LOCATION_RADIUS)
        )
    }
}

/// Per-query settings. Defaults match the service's web client.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub is_start_of_session: bool,
    pub locale: String,
    pub market: String,
    pub region: String,
    pub location: Option<Location>,
    pub variant: Variant,
    pub invocation_id: u64,
    /// Chosen at random between `Chat` and `SearchQuery` when `None`.
    pub message_type: Option<UserMessageType>,
    pub tone: String,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            is_start_of_session: true,
            locale: "en-US".into(),
            market: "en-US".into(),
            region: "US".into(),
            location: None,
            variant: Variant::default(),
            invocation_id: 1,
            message_type: None,
            tone: "Creative".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMessage {
    pub locale: String,
    pub market: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub author: String,
    pub input_method: String,
    pub message_type: UserMessageType,
    pub text: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryArgument {
    pub source: String,
    pub options_sets: Vec<String>,
    pub allowed_message_types: Vec<String>,
    pub slice_ids: Vec<String>,
    pub trace_id: String,
    pub verbosity: String,
    pub is_start_of_session: bool,
    pub message: QueryMessage,
    pub conversation_signature: String,
    pub participant: Participant,
    pub conversation_id: String,
}

/// A fully formed type-4 invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub arguments: Vec<QueryArgument>,
    pub invocation_id: String,
    pub target: String,
    #[serde(rename = "type")]
    pub frame_type: u64,
    pub tone: String,
}

impl Query {
    pub fn prompt(&self) -> &str {
        self.arguments
            .first()
            .map(|a| a.message.text.as_str())
            .unwrap_or_default()
    }
}

/// Return one of two values at random.
pub fn pick_arg<T, R: Rng + ?Sized>(rng: &mut R, first: T, second: T) -> T {
    if rng.gen_bool(0.5) { first } else { second }
}

/// Random lowercase hex string of `len` characters.
pub fn gen_hex_str<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Result<String, QueryError> {
    if len % 2 == 1 {
        return Err(QueryError::OddHexLength(len));
    }
    let mut bytes = vec![0u8; len / 2];
    rng.fill(bytes.as_mut_slice());
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

/// Option flags for a variant.
pub fn option_sets(variant: Variant) -> Vec<String> {
    let mut sets: Vec<String> = BASE_OPTION_SETS.iter().map(|s| s.to_string()).collect();
    sets.push(variant.to_string());
    if variant != Variant::Galileo {
        sets.push(GALILEO_COMPANION_FLAG.to_string());
    }
    sets
}

/// Build the invocation frame for one prompt.
pub fn build_query<R: Rng + ?Sized>(
    prompt: &str,
    identity: &ConversationIdentity,
    options: &QueryOptions,
    rng: &mut R,
) -> Result<Query, QueryError> {
    let message_type = match options.message_type {
        Some(t) => t,
        None => pick_arg(rng, UserMessageType::Chat, UserMessageType::SearchQuery),
    };

    let message = QueryMessage {
        locale: options.locale.clone(),
        market: options.market.clone(),
        region: options.region.clone(),
        location: options.location.as_ref().map(Location::to_hint),
        author: "user".into(),
        input_method: "Keyboard".into(),
        message_type,
        text: prompt.to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    let argument = QueryArgument {
        source: "cib".into(),
        options_sets: option_sets(options.variant),
        allowed_message_types: ALLOWED_MESSAGE_TYPES.iter().map(|s| s.to_string()).collect(),
        slice_ids: Vec::new(),
        trace_id: gen_hex_str(rng, TRACE_ID_LEN)?,
        verbosity: "verbose".into(),
        is_start_of_session: options.is_start_of_session,
        message,
        conversation_signature: identity.conversation_signature.clone(),
        participant: Participant {
            id: identity.client_id.clone(),
        },
        conversation_id: identity.conversation_id.clone(),
    };

    Ok(Query {
        arguments: vec![argument],
        invocation_id: options.invocation_id.to_string(),
        target: "chat".into(),
        frame_type: frame_type::QUERY,
        tone: options.tone.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    fn identity() -> ConversationIdentity {
        ConversationIdentity {
            conversation_id: "conv-1".into(),
            client_id: "client-1".into(),
            conversation_signature: "sig-1".into(),
            encrypted_conversation_signature: "enc-1".into(),
        }
    }

    #[test]
    fn test_gen_hex_str_length_and_charset() {
        let mut rng = StdRng::seed_from_u64(7);
        for len in [0, 6, 16, 32] {
            let hex = gen_hex_str(&mut rng, len).unwrap();
            assert_eq!(hex.len(), len);
            assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_gen_hex_str_rejects_odd_length() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(gen_hex_str(&mut rng, 5), Err(QueryError::OddHexLength(5)));
    }

    #[test]
    fn test_gen_hex_str_differs_between_calls() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = gen_hex_str(&mut rng, 32).unwrap();
        let b = gen_hex_str(&mut rng, 32).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_pick_arg_returns_both_values_eventually() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            seen.insert(pick_arg(&mut rng, "foo", "bar"));
            if seen.len() == 2 {
                break;
            }
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_option_sets_per_variant() {
        let creative = option_sets(Variant::H3Imaginative);
        assert_eq!(creative.len(), BASE_OPTION_SETS.len() + 2);
        assert_eq!(&creative[creative.len() - 2..], ["h3imaginative", "clgalileo"]);

        let galileo = option_sets(Variant::Galileo);
        assert_eq!(galileo.last().map(String::as_str), Some("galileo"));
        assert!(!galileo.iter().any(|s| s == GALILEO_COMPANION_FLAG));
    }

    #[test]
    fn test_variant_parsing() {
        assert_eq!("h3precise".parse::<Variant>().unwrap(), Variant::H3Precise);
        assert_eq!("Galileo".parse::<Variant>().unwrap(), Variant::Galileo);
        assert_eq!(serde_json::to_value(Variant::H3Imaginative).unwrap(), json!("h3imaginative"));
    }

    #[test]
    fn test_build_query_defaults() {
        let mut rng = StdRng::seed_from_u64(1);
        let query = build_query("hello", &identity(), &QueryOptions::default(), &mut rng).unwrap();
        let value = serde_json::to_value(&query).unwrap();

        assert_eq!(value["type"], json!(4));
        assert_eq!(value["invocationId"], json!("1"));
        assert_eq!(value["target"], json!("chat"));
        assert_eq!(value["tone"], json!("Creative"));

        let arg = &value["arguments"][0];
        assert_eq!(arg["source"], json!("cib"));
        assert_eq!(arg["isStartOfSession"], json!(true));
        assert_eq!(arg["conversationId"], json!("conv-1"));
        assert_eq!(arg["conversationSignature"], json!("sig-1"));
        assert_eq!(arg["participant"]["id"], json!("client-1"));
        assert_eq!(arg["traceId"].as_str().map(str::len), Some(32));
        assert_eq!(arg["message"]["text"], json!("hello"));
        assert_eq!(arg["message"]["locale"], json!("en-US"));
        assert_eq!(arg["message"]["market"], json!("en-US"));
        assert_eq!(arg["message"]["region"], json!("US"));
        assert_eq!(arg["message"]["author"], json!("user"));
        assert_eq!(arg["message"]["inputMethod"], json!("Keyboard"));
        assert!(arg["message"].get("location").is_none());
        let message_type = arg["message"]["messageType"].as_str().unwrap();
        assert!(message_type == "Chat" || message_type == "SearchQuery");
        assert_eq!(query.prompt(), "hello");
    }

    #[test]
    fn test_build_query_with_overrides() {
        let mut rng = StdRng::seed_from_u64(1);
        let options = QueryOptions {
            is_start_of_session: false,
            locale: "de-DE".into(),
            market: "de-DE".into(),
            region: "DE".into(),
            location: Some(Location {
                lat: 52.5,
                lng: 13.4,
                radius: None,
            }),
            variant: Variant::Galileo,
            invocation_id: 3,
            message_type: Some(UserMessageType::SearchQuery),
            tone: "Balanced".into(),
        };
        let query = build_query("wetter", &identity(), &options, &mut rng).unwrap();
        let arg = &query.arguments[0];

        assert_eq!(query.invocation_id, "3");
        assert_eq!(query.tone, "Balanced");
        assert!(!arg.is_start_of_session);
        assert_eq!(arg.message.message_type, UserMessageType::SearchQuery);
        assert_eq!(arg.message.location.as_deref(), Some("lat:52.5;long:13.4;re=1000m;"));
        assert_eq!(arg.options_sets.last().map(String::as_str), Some("galileo"));
    }
}

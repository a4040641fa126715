//! Conversation bookkeeping.
//!
//! A [`ChatClient`] holds the user credentials; each [`Conversation`] owns one
//! server-side identity and the prompt/response history sent through it.

use std::fmt;

use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::bootstrap::{bootstrap, user_cookie};
use crate::config::Config;
use crate::error::ConversationError;
use crate::query::{Location, QueryOptions, UserMessageType, Variant, build_query};
use crate::session::{SessionConfig, StreamSession, TurnObserver};
use crate::types::{ConversationIdentity, TurnResult};

/// One prompt and, once the turn succeeded, its answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub prompt: String,
    pub response: Option<String>,
}

/// Per-message overrides and observers.
#[derive(Debug, Default)]
pub struct MessageOptions {
    pub variant: Option<Variant>,
    pub message_type: Option<UserMessageType>,
    pub location: Option<Location>,
    pub invocation_id: Option<u64>,
    pub observer: TurnObserver,
    pub cancel: Option<CancellationToken>,
}

/// Entry point holding credentials shared by all conversations.
#[derive(Clone)]
pub struct ChatClient {
    cookie: String,
    extra_headers: HeaderMap,
    http: reqwest::Client,
    create_url: String,
    session: SessionConfig,
    query_defaults: QueryOptions,
}

// The cookie carries the user token.
impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("cookie", &"<redacted>")
            .field("extra_headers", &self.extra_headers)
            .field("create_url", &self.create_url)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    pub fn new(
        user_token: &str,
        config: &Config,
        extra_headers: HeaderMap,
    ) -> Result<Self, ConversationError> {
        if user_token.trim().is_empty() {
            return Err(ConversationError::MissingUserToken);
        }
        Ok(Self {
            cookie: user_cookie(user_token),
            extra_headers,
            http: reqwest::Client::new(),
            create_url: config.create_url.clone(),
            session: config.session_config(),
            query_defaults: config.query_options(),
        })
    }

    /// A fresh conversation; the identity is created on the first message.
    pub fn new_conversation(&self) -> Conversation {
        Conversation {
            client: self.clone(),
            identity: None,
            is_session_started: false,
            exchanges: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Continue a conversation from a saved identity.
    pub fn resume_conversation(
        &self,
        identity: ConversationIdentity,
    ) -> Result<Conversation, ConversationError> {
        if !identity.is_complete() {
            return Err(ConversationError::IncompleteIdentity);
        }
        Ok(Conversation {
            identity: Some(identity),
            is_session_started: true,
            ..self.new_conversation()
        })
    }
}

#[derive(Debug)]
pub struct Conversation {
    client: ChatClient,
    identity: Option<ConversationIdentity>,
    is_session_started: bool,
    exchanges: Vec<Exchange>,
    history: Vec<TurnResult>,
}

impl Conversation {
    pub fn identity(&self) -> Option<&ConversationIdentity> {
        self.identity.as_ref()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.conversation_id.as_str())
    }

    pub fn is_session_started(&self) -> bool {
        self.is_session_started
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// Successful turn results, oldest first.
    pub fn history(&self) -> &[TurnResult] {
        &self.history
    }

    /// Send one prompt and wait for the answer.
    ///
    /// The first message of a new conversation bootstraps its identity. A
    /// failed turn keeps the prompt in [`Self::exchanges`] without a response.
    #[instrument(skip_all)]
    pub async fn send_message(
        &mut self,
        prompt: &str,
        options: MessageOptions,
    ) -> Result<TurnResult, ConversationError> {
        let is_start_of_session = !self.is_session_started;
        let identity = match (&self.identity, self.is_session_started) {
            (Some(identity), true) => identity.clone(),
            _ => {
                let identity = bootstrap(
                    &self.client.http,
                    &self.client.create_url,
                    &self.client.cookie,
                    &self.client.extra_headers,
                )
                .await?;
                debug!(conversation_id = %identity.conversation_id, "conversation started");
                self.identity = Some(identity.clone());
                identity
            }
        };

        let defaults = &self.client.query_defaults;
        let query_options = QueryOptions {
            is_start_of_session,
            variant: options.variant.unwrap_or(defaults.variant),
            message_type: options.message_type.or(defaults.message_type),
            location: options.location.or_else(|| defaults.location.clone()),
            invocation_id: options.invocation_id.unwrap_or(defaults.invocation_id),
            ..defaults.clone()
        };
        let query = build_query(prompt, &identity, &query_options, &mut rand::thread_rng())?;

        self.is_session_started = true;
        self.exchanges.push(Exchange {
            prompt: prompt.to_string(),
            response: None,
        });

        let mut session = StreamSession::new(
            self.client.session.clone(),
            identity.encrypted_conversation_signature.clone(),
        )
        .with_observer(options.observer);
        if let Some(cancel) = options.cancel {
            session = session.with_cancellation(cancel);
        }

        let result = session.run(&query).await?;
        if let Some(last) = self.exchanges.last_mut() {
            last.response = Some(result.text.clone());
        }
        self.history.push(result.clone());
        Ok(result)
    }
}

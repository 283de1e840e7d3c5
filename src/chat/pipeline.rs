use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admin::AdminConfigStore;
use crate::auth::RateLimiter;
use crate::chat::active::TypingSessions;
use crate::chat::sessions::SessionStore;
use crate::chat::usage::UsageMeter;
use crate::config::CompletionConfig;
use crate::db::models::{AdminApiConfig, ApiUsageLog, ChatSession, NewMessage, Owner, Sender, UsageStatus};
use crate::db::operations::DbOperations;
use crate::error::{AppError, UpstreamError};
use crate::proxy::{CompletionApi, CompletionParams, ImagePayload};
use crate::Result;

pub const LIMIT_NOTICE: &str = "😔 आपकी मासिक संदेश सीमा समाप्त हो गई है। कृपया अपना प्लान अपग्रेड करें। 📈";
pub const GUEST_LIMIT_NOTICE: &str = "😔 गेस्ट मैसेज समाप्त हो गए हैं! आगे चैट करने के लिए कृपया लॉगिन या रजिस्टर करें। 🔐";
pub const RATE_LIMIT_NOTICE: &str = "⏳ आप बहुत तेज़ी से संदेश भेज रहे हैं। कृपया एक मिनट बाद पुनः प्रयास करें। 🙏";
pub const CONFIG_NOTICE: &str = "🔑 API कॉन्फ़िगरेशन की समस्या है। कृपया एडमिन से संपर्क करें। 🛠️";
pub const FALLBACK_NOTICES: [&str; 3] = [
    "🙏 क्षमा करें, AI सेवा में समस्या है। एडमिन पैनल में API कॉन्फ़िगरेशन चेक करें। 🔧",
    "⚠️ OpenRouter API key सेट नहीं है। कृपया एडमिन से संपर्क करें। 🔑",
    "🤖 API कनेक्शन की समस्या है। कृपया बाद में पुनः प्रयास करें। 🔄",
];

/// Caption used when an image arrives without any text.
pub const IMAGE_CAPTION: &str = "इस चित्र के बारे में बताएं";

const COMPLETION_ENDPOINT: &str = "chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SendState {
    /// Refused by the rate limiter or the usage meter; nothing was sent.
    Rejected,
    Delivered,
    /// The upstream call was skipped or failed; a notice was stored instead.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub state: SendState,
    pub session: ChatSession,
}

/// User input for one send.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub text: String,
    pub image_url: Option<String>,
    pub image_data: Option<String>,
}

impl SendRequest {
    /// Validates the input and produces the message to store. An image with
    /// no text gets a default caption.
    fn into_message(self) -> Result<NewMessage> {
        let image_url = self.image_url.filter(|u| !u.trim().is_empty());
        let image_data = self.image_data.filter(|d| !d.trim().is_empty());

        if let Some(data) = &image_data {
            if !data.starts_with("data:image/") {
                return Err(AppError::ValidationError("image_data must be an image data URI".into()));
            }
        }

        let has_image = image_url.is_some() || image_data.is_some();
        let text = self.text.trim();
        let text = match (text.is_empty(), has_image) {
            (true, true) => IMAGE_CAPTION.to_string(),
            (true, false) => return Err(AppError::ValidationError("message must not be empty".into())),
            (false, _) => text.to_string(),
        };

        Ok(NewMessage {
            text,
            sender: Sender::User,
            image_url,
            image_data,
        })
    }
}

fn image_of(message: &NewMessage) -> Option<ImagePayload> {
    message
        .image_data
        .as_ref()
        .or(message.image_url.as_ref())
        .map(|url| ImagePayload { url: url.clone() })
}

fn fallback_notice() -> &'static str {
    FALLBACK_NOTICES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK_NOTICES[0])
}

fn estimate_tokens(text: &str) -> i64 {
    (text.chars().count() as i64 + 3) / 4
}

/// Runs one user message through limit checks, the upstream call and
/// persistence of the reply.
pub struct MessagePipeline {
    db: DbOperations,
    sessions: Arc<SessionStore>,
    usage: Arc<UsageMeter>,
    admin_config: Arc<AdminConfigStore>,
    rate_limiter: Arc<RateLimiter>,
    completion: Arc<dyn CompletionApi>,
    completion_config: CompletionConfig,
    typing: TypingSessions,
}

impl MessagePipeline {
    pub fn new(
        db: DbOperations,
        sessions: Arc<SessionStore>,
        usage: Arc<UsageMeter>,
        admin_config: Arc<AdminConfigStore>,
        rate_limiter: Arc<RateLimiter>,
        completion: Arc<dyn CompletionApi>,
        completion_config: CompletionConfig,
    ) -> Self {
        Self {
            db,
            sessions,
            usage,
            admin_config,
            rate_limiter,
            completion,
            completion_config,
            typing: TypingSessions::new(),
        }
    }

    pub fn is_typing(&self, session_id: Uuid) -> bool {
        self.typing.is_typing(session_id)
    }

    pub async fn send(&self, owner: &Owner, session_id: Uuid, request: SendRequest) -> Result<SendOutcome> {
        let message = request.into_message()?;

        // One send at a time per session; the mark clears on every exit path.
        let _typing = self.typing.start(session_id).ok_or_else(|| {
            AppError::Conflict("a reply is already being generated for this session".into())
        })?;

        self.sessions.get(owner, session_id).await?;

        let config = self.admin_config.get().await?;

        if let Some(config) = &config {
            let limit = u32::try_from(config.rate_limit).unwrap_or(u32::MAX);
            if !self.rate_limiter.check_rate_limit(&owner.to_string(), limit).await {
                warn!("Rate limit hit for {}", owner);
                return self.finish(owner, session_id, SendState::Rejected, RATE_LIMIT_NOTICE).await;
            }
        }

        if !self.usage.try_consume(owner).await? {
            let notice = if owner.is_guest() { GUEST_LIMIT_NOTICE } else { LIMIT_NOTICE };
            return self.finish(owner, session_id, SendState::Rejected, notice).await;
        }

        let image = image_of(&message);
        let text = message.text.clone();
        self.sessions.append(owner, session_id, message).await?;

        let Some(params) = config.as_ref().and_then(|c| self.params(c, image.is_some())) else {
            error!("No upstream API key configured; not calling the completion API");
            return self.finish(owner, session_id, SendState::Failed, CONFIG_NOTICE).await;
        };

        debug!("Requesting completion for session {} with model {}", session_id, params.model);
        let started = Instant::now();
        let result = match &image {
            Some(image) => self.completion.complete_with_image(&params, &text, image).await,
            None => self.completion.complete(&params, &text).await,
        };
        let elapsed_ms = started.elapsed().as_millis() as i64;

        self.log_usage(owner, &params.model, &result, elapsed_ms).await;

        match result {
            Ok(reply) => {
                info!("Delivered reply for session {} in {}ms", session_id, elapsed_ms);
                self.finish(owner, session_id, SendState::Delivered, &reply).await
            }
            Err(e) => {
                error!("Completion failed for session {}: {}", session_id, e);
                self.finish(owner, session_id, SendState::Failed, fallback_notice()).await
            }
        }
    }

    /// Request settings from the admin configuration, or `None` without a credential.
    fn params(&self, config: &AdminApiConfig, with_image: bool) -> Option<CompletionParams> {
        if !config.has_credential() {
            return None;
        }
        let model = if with_image {
            self.completion_config.vision_model.clone()
        } else {
            config.selected_model.clone()
        };
        Some(CompletionParams {
            api_key: config.api_key.clone().unwrap_or_default(),
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    async fn finish(&self, owner: &Owner, session_id: Uuid, state: SendState, bot_text: &str) -> Result<SendOutcome> {
        let session = self.sessions.append(owner, session_id, NewMessage::bot(bot_text)).await?;
        Ok(SendOutcome { state, session })
    }

    async fn log_usage(&self, owner: &Owner, model: &str, result: &std::result::Result<String, UpstreamError>, elapsed_ms: i64) {
        let (status, tokens_used, error_message) = match result {
            Ok(reply) => (UsageStatus::Success, estimate_tokens(reply), None),
            Err(UpstreamError::Timeout) => (UsageStatus::Timeout, 0, Some(UpstreamError::Timeout.to_string())),
            Err(e) => (UsageStatus::Error, 0, Some(e.to_string())),
        };

        let log = ApiUsageLog {
            id: Uuid::new_v4(),
            user_id: owner.user_id(),
            guest_id: owner.guest_id().map(str::to_owned),
            endpoint: COMPLETION_ENDPOINT.to_string(),
            model_used: model.to_string(),
            tokens_used,
            response_time_ms: elapsed_ms,
            status,
            error_message,
            created_at: Utc::now(),
        };

        if let Err(e) = self.db.insert_usage_log(&log).await {
            warn!("Failed to record API usage log: {}", e);
        }
    }
}

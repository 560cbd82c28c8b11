use async_trait::async_trait;
use npubdir_core::{ChatRef, ChatScope, ChatTransport, MessageRef, TransportError};
use teloxide::ApiError;
use teloxide::prelude::*;
use teloxide::types::{LinkPreviewOptions, MessageId, ParseMode, ThreadId};
use teloxide::RequestError;

/// Link previews would make every directory message show the first profile.
pub(crate) const fn no_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

pub(crate) const fn thread_id(thread: npubdir_core::ThreadRef) -> ThreadId {
    ThreadId(MessageId(thread.0))
}

fn classify(err: RequestError) -> TransportError {
    match err {
        RequestError::Api(ApiError::MessageNotModified) => TransportError::NotModified,
        RequestError::Api(
            ApiError::MessageToEditNotFound
            | ApiError::MessageToDeleteNotFound
            | ApiError::MessageIdInvalid,
        ) => TransportError::NotFound,
        RequestError::Api(ApiError::Unknown(ref text))
            if text.to_lowercase().contains("message to unpin not found") =>
        {
            TransportError::NotFound
        }
        other => TransportError::Failed(other.to_string()),
    }
}

/// [`ChatTransport`] over the Telegram Bot API. Messages are HTML formatted.
#[derive(Clone)]
pub struct TeloxideTransport {
    bot: Bot,
}

impl TeloxideTransport {
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TeloxideTransport {
    async fn send_message(
        &self,
        scope: ChatScope,
        text: &str,
    ) -> Result<MessageRef, TransportError> {
        let mut request = self
            .bot
            .send_message(ChatId(scope.chat.0), text)
            .parse_mode(ParseMode::Html)
            .link_preview_options(no_preview());
        if let Some(thread) = scope.thread {
            request = request.message_thread_id(thread_id(thread));
        }
        let sent = request.await.map_err(classify)?;
        Ok(MessageRef(sent.id.0))
    }

    async fn edit_message(
        &self,
        chat: ChatRef,
        message: MessageRef,
        text: &str,
    ) -> Result<(), TransportError> {
        self.bot
            .edit_message_text(ChatId(chat.0), MessageId(message.0), text)
            .parse_mode(ParseMode::Html)
            .link_preview_options(no_preview())
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn pin_message(&self, chat: ChatRef, message: MessageRef) -> Result<(), TransportError> {
        self.bot
            .pin_chat_message(ChatId(chat.0), MessageId(message.0))
            .disable_notification(true)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn unpin_message(
        &self,
        chat: ChatRef,
        message: MessageRef,
    ) -> Result<(), TransportError> {
        self.bot
            .unpin_chat_message(ChatId(chat.0))
            .message_id(MessageId(message.0))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_message(
        &self,
        chat: ChatRef,
        message: MessageRef,
    ) -> Result<(), TransportError> {
        self.bot
            .delete_message(ChatId(chat.0), MessageId(message.0))
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_api_errors() {
        assert_eq!(
            classify(RequestError::Api(ApiError::MessageNotModified)),
            TransportError::NotModified
        );
        assert_eq!(
            classify(RequestError::Api(ApiError::MessageToEditNotFound)),
            TransportError::NotFound
        );
        assert_eq!(
            classify(RequestError::Api(ApiError::Unknown(
                "Bad Request: message to unpin not found".to_string()
            ))),
            TransportError::NotFound
        );
        assert!(matches!(
            classify(RequestError::Api(ApiError::BotBlocked)),
            TransportError::Failed(_)
        ));
    }
}

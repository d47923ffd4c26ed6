//! Dispatch Executor
//!
//! Sends one message through a [`MessagingChannel`] and turns whatever the
//! channel reports into a [`DispatchRecord`]. A failing recipient never stops
//! the batch.

use super::plan::Recipient;
use super::progress::DispatchRecord;
use super::variation::MediaItem;
use crate::error::ChannelError;
use crate::utils::mask_phone;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// Outbound messaging capability (WhatsApp gateway, dry run, …).
///
/// One call is one outbound attempt; implementations must not retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    /// Channel name for logs
    fn name(&self) -> &'static str;

    async fn send_text(&self, destination: &str, body: &str) -> Result<(), ChannelError>;

    async fn send_media(
        &self,
        destination: &str,
        media: &MediaItem,
        caption: Option<String>,
    ) -> Result<(), ChannelError>;
}

/// Classified result of one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Failed(String),
}

/// What to send to one recipient, already resolved from the variation pool.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedMessage<'a> {
    pub text: &'a str,
    pub variant_index: usize,
    pub media: Option<(usize, &'a MediaItem)>,
}

#[derive(Clone)]
pub struct DispatchExecutor {
    channel: Arc<dyn MessagingChannel>,
}

impl DispatchExecutor {
    pub fn new(channel: Arc<dyn MessagingChannel>) -> Self {
        Self { channel }
    }

    pub fn channel_name(&self) -> &'static str {
        self.channel.name()
    }

    /// Exactly one channel call. Channel errors become `SendOutcome::Failed`.
    pub async fn send(
        &self,
        recipient: &Recipient,
        text: &str,
        media: Option<&MediaItem>,
    ) -> SendOutcome {
        let result = match media {
            Some(media) => {
                let caption = (!text.trim().is_empty()).then(|| text.to_string());
                self.channel
                    .send_media(&recipient.destination, media, caption)
                    .await
            }
            None => self.channel.send_text(&recipient.destination, text).await,
        };

        match result {
            Ok(()) => SendOutcome::Delivered,
            Err(e) => {
                tracing::warn!(
                    "{}: send to {} failed: {}",
                    self.channel.name(),
                    mask_phone(&recipient.destination),
                    e
                );
                SendOutcome::Failed(e.to_string())
            }
        }
    }

    /// Send and wrap the outcome into a record for the aggregator.
    pub async fn dispatch(
        &self,
        index: usize,
        recipient: &Recipient,
        message: ResolvedMessage<'_>,
    ) -> DispatchRecord {
        let media = message.media.map(|(_, item)| item);
        let outcome = self.send(recipient, message.text, media).await;
        let (success, error) = match outcome {
            SendOutcome::Delivered => (true, None),
            SendOutcome::Failed(reason) => (false, Some(reason)),
        };
        DispatchRecord {
            index,
            destination: recipient.destination.clone(),
            success,
            error,
            variant_index: message.variant_index,
            media_index: message.media.map(|(i, _)| i),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn executor(mock: MockMessagingChannel) -> DispatchExecutor {
        DispatchExecutor::new(Arc::new(mock))
    }

    fn mock_channel() -> MockMessagingChannel {
        let mut mock = MockMessagingChannel::new();
        mock.expect_name().return_const("mock");
        mock
    }

    #[tokio::test]
    async fn test_text_send_delivered() {
        let mut mock = mock_channel();
        mock.expect_send_text()
            .with(eq("5511999990000"), eq("Hi Ana"))
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_send_media().never();

        let outcome = executor(mock)
            .send(&Recipient::new("5511999990000"), "Hi Ana", None)
            .await;
        assert_eq!(outcome, SendOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_channel_error_becomes_failure() {
        let mut mock = mock_channel();
        mock.expect_send_text().times(1).returning(|_, _| {
            Err(ChannelError::Rejected {
                status: 400,
                body: "not on whatsapp".to_string(),
            })
        });

        let outcome = executor(mock).send(&Recipient::new("123"), "hello", None).await;
        assert_eq!(
            outcome,
            SendOutcome::Failed("provider rejected the message (400): not on whatsapp".to_string())
        );
    }

    #[tokio::test]
    async fn test_media_send_uses_text_as_caption() {
        let mut mock = mock_channel();
        mock.expect_send_text().never();
        mock.expect_send_media()
            .withf(|dest, media, caption| {
                dest == "42" && media.file_name == "promo.jpg" && caption.as_deref() == Some("Promo!")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let media = MediaItem::new(vec![1, 2, 3], "image/jpeg", "promo.jpg");
        let outcome = executor(mock)
            .send(&Recipient::new("42"), "Promo!", Some(&media))
            .await;
        assert_eq!(outcome, SendOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_blank_caption_omitted() {
        let mut mock = mock_channel();
        mock.expect_send_media()
            .withf(|_, _, caption| caption.is_none())
            .times(1)
            .returning(|_, _, _| Ok(()));

        let media = MediaItem::new(vec![1], "application/pdf", "menu.pdf");
        executor(mock).send(&Recipient::new("42"), "  ", Some(&media)).await;
    }

    #[tokio::test]
    async fn test_dispatch_builds_record() {
        let mut mock = mock_channel();
        mock.expect_send_media()
            .times(1)
            .returning(|_, _, _| Err(ChannelError::Transport("connection reset".to_string())));

        let media = MediaItem::new(vec![9], "image/png", "b.png");
        let record = executor(mock)
            .dispatch(
                7,
                &Recipient::new("5511"),
                ResolvedMessage {
                    text: "hi",
                    variant_index: 2,
                    media: Some((1, &media)),
                },
            )
            .await;

        assert_eq!(record.index, 7);
        assert!(!record.success);
        assert_eq!(record.variant_index, 2);
        assert_eq!(record.media_index, Some(1));
        assert_eq!(record.error.as_deref(), Some("transport error: connection reset"));
    }
}

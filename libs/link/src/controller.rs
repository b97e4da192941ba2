//! Initiator side of one negotiation level
//!
//! The foundation sends `GetVersions`, picks one version per category from
//! the offers and confirms the choice with `SetVersions`. Replies are read
//! from a channel fed by whatever owns the transport's receive side.

use crate::category::{CategoryOffer, CategoryRange, CategoryVersion, SupportedVersions};
use crate::error::{LinkError, LinkResult};
use crate::link::DEFAULT_REPLY_TIMEOUT;
use crate::protocol::{LinkMessage, NegotiationLevel};
use crate::role::level_subscriptions;
use network::MessageSink;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LinkController {
    level: NegotiationLevel,
    requests: Vec<CategoryRange>,
    reply_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationOutcome {
    pub level: NegotiationLevel,
    pub offers: Vec<CategoryOffer>,
    pub selected: Vec<CategoryVersion>,
    /// The responder's `SetVersionsReply`
    pub accepted: bool,
}

impl LinkController {
    pub fn new(level: NegotiationLevel, requests: Vec<CategoryRange>) -> Self {
        Self {
            level,
            requests,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// Request every category of the level's subscription list this side supports
    pub fn for_supported(level: NegotiationLevel, supported: &SupportedVersions) -> Self {
        let requests = level_subscriptions(level)
            .iter()
            .filter_map(|subscription| supported.range(subscription.category))
            .collect();
        Self::new(level, requests)
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn level(&self) -> NegotiationLevel {
        self.level
    }

    pub fn requests(&self) -> &[CategoryRange] {
        &self.requests
    }

    /// Highest offered version inside each requested range
    pub fn select(&self, offers: &[CategoryOffer]) -> Vec<CategoryVersion> {
        self.requests
            .iter()
            .filter_map(|request| {
                offers
                    .iter()
                    .filter(|offer| offer.category == request.category && request.contains(offer.version))
                    .map(|offer| offer.version)
                    .max()
                    .map(|version| CategoryVersion::new(request.category, version))
            })
            .collect()
    }

    pub async fn negotiate(
        &self,
        sink: &dyn MessageSink,
        replies: &mut mpsc::UnboundedReceiver<LinkMessage>,
    ) -> LinkResult<NegotiationOutcome> {
        let level = self.level;
        self.send(
            sink,
            LinkMessage::GetVersions {
                level,
                requests: self.requests.clone(),
            },
        )
        .await?;

        let offers = match self.next_reply(replies, "GetVersionsReply").await? {
            LinkMessage::GetVersionsReply { level: replied, offers } if replied == level => offers,
            other => {
                return Err(LinkError::unexpected_reply(
                    format!("GetVersionsReply@{level}"),
                    other.describe(),
                ))
            }
        };

        let selected = self.select(&offers);
        debug!(%level, offered = offers.len(), selected = selected.len(), "Versions selected");
        self.send(
            sink,
            LinkMessage::SetVersions {
                level,
                selections: selected.clone(),
            },
        )
        .await?;

        let accepted = match self.next_reply(replies, "SetVersionsReply").await? {
            LinkMessage::SetVersionsReply { level: replied, success } if replied == level => success,
            other => {
                return Err(LinkError::unexpected_reply(
                    format!("SetVersionsReply@{level}"),
                    other.describe(),
                ))
            }
        };

        info!(%level, accepted, "Level negotiation finished");
        Ok(NegotiationOutcome {
            level,
            offers,
            selected,
            accepted,
        })
    }

    async fn send(&self, sink: &dyn MessageSink, message: LinkMessage) -> LinkResult<()> {
        sink.send_message(message.encode()?).await?;
        Ok(())
    }

    async fn next_reply(
        &self,
        replies: &mut mpsc::UnboundedReceiver<LinkMessage>,
        expected: &str,
    ) -> LinkResult<LinkMessage> {
        match tokio::time::timeout(self.reply_timeout, replies.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(LinkError::NotConnected),
            Err(_) => Err(LinkError::timeout(
                format!("{expected}@{}", self.level),
                self.reply_timeout.as_millis() as u64,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{Category, Version};
    use async_trait::async_trait;
    use codec::BinaryMessage;
    use network::TransportError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<LinkMessage>>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send_message(&self, message: BinaryMessage) -> Result<(), TransportError> {
            let bytes = message.to_bytes()?;
            self.sent.lock().push(LinkMessage::decode(&bytes)?);
            Ok(())
        }
    }

    fn offer(category: Category, major: u8, minor: u8) -> CategoryOffer {
        CategoryOffer {
            category,
            version: Version::new(major, minor),
            required: false,
        }
    }

    #[test]
    fn test_select_highest_in_range() {
        let controller = LinkController::new(
            NegotiationLevel::Shell,
            vec![
                CategoryRange::new(Category::Culture, Version::new(1, 0), Version::new(1, 9)),
                CategoryRange::new(Category::ShowControl, Version::new(1, 0), Version::new(1, 0)),
            ],
        );
        let selected = controller.select(&[
            offer(Category::Culture, 2, 0),
            offer(Category::Culture, 1, 4),
            offer(Category::Culture, 1, 2),
            offer(Category::TsmControl, 1, 0),
        ]);
        assert_eq!(
            selected,
            vec![CategoryVersion::new(Category::Culture, Version::new(1, 4))]
        );
    }

    #[test]
    fn test_for_supported_requests_full_ranges() {
        let supported = SupportedVersions::default()
            .with(Category::ActionRequest, [Version::new(1, 0), Version::new(2, 1)]);
        let controller = LinkController::for_supported(NegotiationLevel::Link, &supported);
        assert_eq!(
            controller.requests(),
            &[
                CategoryRange::new(Category::ActionRequest, Version::new(1, 0), Version::new(2, 1)),
                CategoryRange::new(Category::LinkControl, Version::new(1, 0), Version::new(1, 0)),
            ]
        );
    }

    #[tokio::test]
    async fn test_negotiate_exchanges_in_order() {
        let sink = RecordingSink::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = LinkController::new(
            NegotiationLevel::Tsm,
            vec![CategoryRange::new(Category::TsmControl, Version::new(1, 0), Version::new(1, 0))],
        );

        tx.send(LinkMessage::GetVersionsReply {
            level: NegotiationLevel::Tsm,
            offers: vec![offer(Category::TsmControl, 1, 0)],
        })
        .unwrap();
        tx.send(LinkMessage::SetVersionsReply {
            level: NegotiationLevel::Tsm,
            success: true,
        })
        .unwrap();

        let outcome = controller.negotiate(&sink, &mut rx).await.unwrap();
        assert!(outcome.accepted);
        assert_eq!(outcome.selected.len(), 1);

        let sent = sink.sent.lock();
        assert!(matches!(sent[0], LinkMessage::GetVersions { level: NegotiationLevel::Tsm, .. }));
        assert!(matches!(sent[1], LinkMessage::SetVersions { level: NegotiationLevel::Tsm, .. }));
    }

    #[tokio::test]
    async fn test_reply_for_other_level_is_unexpected() {
        let sink = RecordingSink::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(LinkMessage::GetVersionsReply {
            level: NegotiationLevel::Shell,
            offers: Vec::new(),
        })
        .unwrap();

        let controller = LinkController::new(NegotiationLevel::Link, Vec::new());
        let error = controller.negotiate(&sink, &mut rx).await.unwrap_err();
        assert!(matches!(error, LinkError::UnexpectedReplyType { .. }));
    }

    #[tokio::test]
    async fn test_missing_reply_times_out() {
        let sink = RecordingSink::default();
        let (_tx, mut rx) = mpsc::unbounded_channel();
        let controller = LinkController::new(NegotiationLevel::Link, Vec::new())
            .with_reply_timeout(Duration::from_millis(20));
        let error = controller.negotiate(&sink, &mut rx).await.unwrap_err();
        assert!(matches!(error, LinkError::Timeout { .. }));
    }
}

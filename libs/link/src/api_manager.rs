//! # API Manager
//!
//! Responder side of one negotiation level. A `GetVersions` is answered
//! with offers drawn only from the level's subscriptions; a `SetVersions`
//! installs handlers for the selected versions and succeeds only when every
//! required subscription ended up installed.

use crate::category::{Category, CategoryOffer, CategoryRange, CategorySubscription, CategoryVersion, SupportedVersions};
use crate::error::{LinkError, LinkResult};
use crate::handlers::{CategoryFactory, ChannelContext, InstalledCategories};
use crate::protocol::NegotiationLevel;
use crate::role::level_subscriptions;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub struct ApiManager {
    level: NegotiationLevel,
    subscriptions: Vec<CategorySubscription>,
    supported: SupportedVersions,
    factory: Arc<dyn CategoryFactory>,
}

impl fmt::Debug for ApiManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiManager")
            .field("level", &self.level)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

/// Result of processing one `SetVersions`
#[derive(Debug)]
pub struct SetVersionsOutcome {
    pub level: NegotiationLevel,
    pub success: bool,
    /// Empty unless `success`
    pub installed: InstalledCategories,
    /// Required categories that were not installed
    pub missing: Vec<Category>,
}

impl SetVersionsOutcome {
    pub fn into_result(self) -> LinkResult<InstalledCategories> {
        if self.success {
            Ok(self.installed)
        } else {
            Err(LinkError::NegotiationFailed {
                level: self.level,
                missing: self.missing,
            })
        }
    }
}

impl ApiManager {
    pub fn new(
        level: NegotiationLevel,
        subscriptions: impl Into<Vec<CategorySubscription>>,
        supported: SupportedVersions,
        factory: Arc<dyn CategoryFactory>,
    ) -> Self {
        Self {
            level,
            subscriptions: subscriptions.into(),
            supported,
            factory,
        }
    }

    /// Manager for a level's built-in subscription list
    pub fn for_level(level: NegotiationLevel, supported: SupportedVersions, factory: Arc<dyn CategoryFactory>) -> Self {
        Self::new(level, level_subscriptions(level), supported, factory)
    }

    pub fn level(&self) -> NegotiationLevel {
        self.level
    }

    pub fn subscriptions(&self) -> &[CategorySubscription] {
        &self.subscriptions
    }

    /// Offer every supported version the initiator accepts, highest first
    pub fn handle_get_versions(&self, requests: &[CategoryRange]) -> Vec<CategoryOffer> {
        let mut offers = Vec::new();
        for subscription in &self.subscriptions {
            let Some(request) = requests.iter().find(|r| r.category == subscription.category) else {
                continue;
            };
            offers.extend(
                self.supported
                    .versions(subscription.category)
                    .iter()
                    .rev()
                    .filter(|version| request.contains(**version))
                    .map(|version| CategoryOffer {
                        category: subscription.category,
                        version: *version,
                        required: subscription.required,
                    }),
            );
        }
        debug!(level = %self.level, requested = requests.len(), offered = offers.len(), "Versions offered");
        offers
    }

    /// Install handlers for the selected versions
    pub fn handle_set_versions(&self, selections: &[CategoryVersion], context: &ChannelContext) -> SetVersionsOutcome {
        let mut installed = InstalledCategories::new();

        for selection in selections {
            let category = selection.category;
            if !self.is_subscribed(category) {
                debug!(level = %self.level, %category, "Ignoring selection of unsubscribed category");
                continue;
            }
            if !self.supported.supports(category, selection.version) {
                debug!(level = %self.level, %category, version = %selection.version, "Ignoring unsupported version");
                continue;
            }
            if installed.contains(category) {
                debug!(level = %self.level, %category, "Ignoring repeated selection");
                continue;
            }
            let channel = context.channel(self.level, category, selection.version);
            match self.factory.create(channel) {
                Some(handler) => {
                    installed.insert(handler);
                }
                None => debug!(level = %self.level, %category, "Factory declined category"),
            }
        }

        let missing: Vec<Category> = self
            .subscriptions
            .iter()
            .filter(|s| s.required && !installed.contains(s.category))
            .map(|s| s.category)
            .collect();
        let success = missing.is_empty();

        debug!(
            level = %self.level,
            success,
            installed = installed.len(),
            missing = missing.len(),
            "Versions set"
        );

        SetVersionsOutcome {
            level: self.level,
            success,
            installed: if success { installed } else { InstalledCategories::new() },
            missing,
        }
    }

    fn is_subscribed(&self, category: Category) -> bool {
        self.subscriptions.iter().any(|s| s.category == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Version;
    use crate::handlers::{CategoryChannel, CategoryHandler, CultureCategory, DefaultCategoryFactory, ReplyRouter, ShowControlCategory};
    use async_trait::async_trait;
    use codec::BinaryMessage;
    use network::{MessageSink, TransportError};
    use std::time::Duration;

    struct NullSink;

    #[async_trait]
    impl MessageSink for NullSink {
        async fn send_message(&self, _message: BinaryMessage) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn context() -> ChannelContext {
        ChannelContext::new(Arc::new(NullSink), ReplyRouter::new(), Duration::from_secs(1))
    }

    const A: Category = Category::Culture;
    const B: Category = Category::ShowControl;
    const V1: Version = Version::new(1, 0);

    fn manager(supported: SupportedVersions) -> ApiManager {
        ApiManager::new(
            NegotiationLevel::Shell,
            vec![CategorySubscription::required(A), CategorySubscription::optional(B)],
            supported,
            Arc::new(DefaultCategoryFactory),
        )
    }

    #[test]
    fn test_required_present_optional_absent_succeeds() {
        let outcome = manager(SupportedVersions::default())
            .handle_set_versions(&[CategoryVersion::new(A, V1)], &context());
        assert!(outcome.success);
        let mut installed = outcome.into_result().unwrap();
        assert!(installed.take::<CultureCategory>(A).unwrap().is_some());
        assert!(installed.take::<ShowControlCategory>(B).unwrap().is_none());
    }

    #[test]
    fn test_nothing_selected_fails_on_required() {
        let outcome = manager(SupportedVersions::default()).handle_set_versions(&[], &context());
        assert!(!outcome.success);
        assert_eq!(outcome.missing, vec![A]);
        match outcome.into_result() {
            Err(LinkError::NegotiationFailed { level, missing }) => {
                assert_eq!(level, NegotiationLevel::Shell);
                assert_eq!(missing, vec![A]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_failure_discards_installed() {
        let outcome = manager(SupportedVersions::default())
            .handle_set_versions(&[CategoryVersion::new(B, V1)], &context());
        assert!(!outcome.success);
        assert!(outcome.installed.is_empty());
    }

    #[test]
    fn test_unknown_and_unsupported_selections_ignored() {
        let outcome = manager(SupportedVersions::default()).handle_set_versions(
            &[
                CategoryVersion::new(Category::TsmControl, V1),
                CategoryVersion::new(A, Version::new(9, 0)),
                CategoryVersion::new(A, V1),
                CategoryVersion::new(A, V1),
            ],
            &context(),
        );
        assert!(outcome.success);
        assert_eq!(outcome.installed.categories(), vec![A]);
    }

    #[test]
    fn test_offers_only_subscribed_in_range_highest_first() {
        let supported = SupportedVersions::default().with(
            A,
            [Version::new(1, 0), Version::new(1, 5), Version::new(2, 0)],
        );
        let offers = manager(supported).handle_get_versions(&[
            CategoryRange::new(Category::TsmControl, V1, V1),
            CategoryRange::new(A, V1, Version::new(1, 9)),
        ]);
        assert_eq!(
            offers,
            vec![
                CategoryOffer { category: A, version: Version::new(1, 5), required: true },
                CategoryOffer { category: A, version: V1, required: true },
            ]
        );
    }

    struct DecliningFactory;

    impl CategoryFactory for DecliningFactory {
        fn create(&self, channel: CategoryChannel) -> Option<Arc<dyn CategoryHandler>> {
            if channel.category() == A {
                None
            } else {
                DefaultCategoryFactory.create(channel)
            }
        }
    }

    #[test]
    fn test_declined_required_category_fails() {
        let manager = ApiManager::new(
            NegotiationLevel::Shell,
            vec![CategorySubscription::required(A)],
            SupportedVersions::default(),
            Arc::new(DecliningFactory),
        );
        let outcome = manager.handle_set_versions(&[CategoryVersion::new(A, V1)], &context());
        assert!(!outcome.success);
    }
}

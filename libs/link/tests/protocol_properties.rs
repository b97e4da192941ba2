//! Property tests for link message decoding and version selection

use link::{
    Category, CategoryOffer, CategoryRange, LinkController, LinkMessage, NegotiationLevel, Version,
};
use proptest::prelude::*;

fn version() -> impl Strategy<Value = Version> {
    (0u8..4, 0u8..4).prop_map(|(major, minor)| Version::new(major, minor))
}

fn category() -> impl Strategy<Value = Category> {
    prop::sample::select(Category::ALL.to_vec())
}

fn offer() -> impl Strategy<Value = CategoryOffer> {
    (category(), version(), any::<bool>()).prop_map(|(category, version, required)| CategoryOffer {
        category,
        version,
        required,
    })
}

proptest! {
    #[test]
    fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = LinkMessage::decode(&bytes);
    }

    #[test]
    fn prop_truncated_messages_rejected(
        offers in prop::collection::vec(offer(), 1..8),
        cut in 1usize..8,
    ) {
        let bytes = LinkMessage::GetVersionsReply { level: NegotiationLevel::Shell, offers }
            .encode()
            .unwrap()
            .to_bytes()
            .unwrap();
        let cut = cut.min(bytes.len() - 1);
        prop_assert!(LinkMessage::decode(&bytes[..bytes.len() - cut]).is_err());
    }

    #[test]
    fn prop_selection_is_highest_offer_in_range(
        category in category(),
        bounds in (version(), version()),
        offers in prop::collection::vec(offer(), 0..16),
    ) {
        let (min, max) = if bounds.0 <= bounds.1 { bounds } else { (bounds.1, bounds.0) };
        let range = CategoryRange::new(category, min, max);
        let controller = LinkController::new(NegotiationLevel::Link, vec![range]);

        let expected = offers
            .iter()
            .filter(|offer| offer.category == category && range.contains(offer.version))
            .map(|offer| offer.version)
            .max();
        let selected = controller.select(&offers);

        match expected {
            Some(version) => {
                prop_assert_eq!(selected.len(), 1);
                prop_assert_eq!(selected[0].category, category);
                prop_assert_eq!(selected[0].version, version);
            }
            None => prop_assert!(selected.is_empty()),
        }
    }
}

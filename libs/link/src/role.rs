//! # Link Roles
//!
//! A role decides which negotiation levels follow the common `Link` level.
//! Each level has a fixed subscription list and a typed result struct; both
//! come from one [`LevelCategorySet`] implementation, so a single generic
//! routine negotiates every level.

use crate::category::CategorySubscription;
use crate::error::{LinkError, LinkResult};
use crate::handlers::*;
use crate::protocol::NegotiationLevel;
use codec::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Sub-scope hosted by an extension bin, `u8` on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InnerRole {
    System = 0,
    AscribedGame = 1,
    Tsm = 2,
    App = 3,
}

impl InnerRole {
    pub const ALL: [InnerRole; 4] = [
        InnerRole::System,
        InnerRole::AscribedGame,
        InnerRole::Tsm,
        InnerRole::App,
    ];

    pub fn level(self) -> NegotiationLevel {
        match self {
            InnerRole::System => NegotiationLevel::System,
            InnerRole::AscribedGame => NegotiationLevel::AscribedGame,
            InnerRole::Tsm => NegotiationLevel::Tsm,
            InnerRole::App => NegotiationLevel::App,
        }
    }

    pub fn from_level(level: NegotiationLevel) -> Option<Self> {
        InnerRole::ALL.into_iter().find(|inner| inner.level() == level)
    }
}

impl TryFrom<u8> for InnerRole {
    type Error = CodecError;

    fn try_from(code: u8) -> CodecResult<Self> {
        InnerRole::ALL
            .into_iter()
            .find(|inner| *inner as u8 == code)
            .ok_or_else(|| CodecError::invalid_message(format!("unknown inner role {code}")))
    }
}

impl fmt::Display for InnerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the game asks the foundation to drive after the link level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Shell,
    Coplayer { id: u8 },
    /// Composite role: one transport, one link level, several inner links
    ExtensionBin(Vec<InnerRole>),
}

impl Role {
    const SHELL: u8 = 0;
    const COPLAYER: u8 = 1;
    const EXTENSION_BIN: u8 = 2;

    pub fn code(&self) -> u8 {
        match self {
            Role::Shell => Self::SHELL,
            Role::Coplayer { .. } => Self::COPLAYER,
            Role::ExtensionBin(_) => Self::EXTENSION_BIN,
        }
    }

    /// Zero for roles other than `Coplayer`
    pub fn coplayer_id(&self) -> u8 {
        match self {
            Role::Coplayer { id } => *id,
            _ => 0,
        }
    }

    pub fn inner_roles(&self) -> &[InnerRole] {
        match self {
            Role::ExtensionBin(inner) => inner,
            _ => &[],
        }
    }

    /// Rebuild a role from its `Open` fields
    pub fn from_wire(code: u8, coplayer_id: u8, inner: Vec<InnerRole>) -> CodecResult<Self> {
        let role = match code {
            Self::SHELL => Role::Shell,
            Self::COPLAYER => Role::Coplayer { id: coplayer_id },
            Self::EXTENSION_BIN => Role::ExtensionBin(inner.clone()),
            other => return Err(CodecError::invalid_message(format!("unknown role {other}"))),
        };
        if role.inner_roles() != inner.as_slice() {
            return Err(CodecError::invalid_message(format!(
                "{} role cannot carry inner links",
                role.name()
            )));
        }
        role.validate()?;
        Ok(role)
    }

    /// An extension bin needs at least one inner link, each at most once
    pub fn validate(&self) -> CodecResult<()> {
        if let Role::ExtensionBin(inner) = self {
            if inner.is_empty() {
                return Err(CodecError::invalid_message("extension bin without inner links"));
            }
            for (i, role) in inner.iter().enumerate() {
                if inner[..i].contains(role) {
                    return Err(CodecError::invalid_message(format!(
                        "inner link {role} listed twice"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Levels negotiated after `Link`, in order
    pub fn levels(&self) -> Vec<NegotiationLevel> {
        match self {
            Role::Shell => vec![NegotiationLevel::Shell],
            Role::Coplayer { .. } => vec![NegotiationLevel::Coplayer],
            Role::ExtensionBin(inner) => inner.iter().map(|role| role.level()).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Role::Shell => "Shell",
            Role::Coplayer { .. } => "Coplayer",
            Role::ExtensionBin(_) => "ExtensionBin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Shell => f.write_str("Shell"),
            Role::Coplayer { id } => write!(f, "Coplayer({id})"),
            Role::ExtensionBin(inner) => {
                let names: Vec<String> = inner.iter().map(ToString::to_string).collect();
                write!(f, "ExtensionBin[{}]", names.join(", "))
            }
        }
    }
}

/// Typed outcome of negotiating one level
pub trait LevelCategorySet: Sized + Send + Sync + fmt::Debug + 'static {
    const LEVEL: NegotiationLevel;

    /// Subscriptions in declaration order
    fn subscriptions() -> &'static [CategorySubscription];

    /// Extract the typed handlers from a successful installation
    fn from_installed(installed: &mut InstalledCategories) -> LinkResult<Self>;
}

macro_rules! level_categories {
    (
        $(#[$doc:meta])*
        $name:ident @ $level:ident {
            required { $($req:ident: $req_ty:ident),* $(,)? }
            optional { $($opt:ident: $opt_ty:ident),* $(,)? }
        }
    ) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            $(pub $req: Arc<$req_ty>,)*
            $(pub $opt: Option<Arc<$opt_ty>>,)*
        }

        impl LevelCategorySet for $name {
            const LEVEL: NegotiationLevel = NegotiationLevel::$level;

            fn subscriptions() -> &'static [CategorySubscription] {
                const SUBSCRIPTIONS: &[CategorySubscription] = &[
                    $(CategorySubscription::required($req_ty::CATEGORY),)*
                    $(CategorySubscription::optional($opt_ty::CATEGORY),)*
                ];
                SUBSCRIPTIONS
            }

            fn from_installed(installed: &mut InstalledCategories) -> LinkResult<Self> {
                Ok(Self {
                    $($req: installed.take::<$req_ty>($req_ty::CATEGORY)?.ok_or_else(|| {
                        LinkError::internal(format!(
                            "required {} missing after successful {} negotiation",
                            $req_ty::CATEGORY,
                            Self::LEVEL
                        ))
                    })?,)*
                    $($opt: installed.take::<$opt_ty>($opt_ty::CATEGORY)?,)*
                })
            }
        }
    };
}

level_categories!(
    /// Common to every role
    LinkCategories @ Link {
        required {
            action_request: ActionRequestCategory,
            link_control: LinkControlCategory,
        }
        optional {}
    }
);

level_categories!(
    ShellCategories @ Shell {
        required {
            game_information: GameInformationCategory,
            critical_data_store: CriticalDataStoreCategory,
            tilt_control: TiltControlCategory,
        }
        optional {
            culture: CultureCategory,
            show_control: ShowControlCategory,
            system_events: SystemEventsCategory,
        }
    }
);

level_categories!(
    /// What a playing game needs from the foundation
    CoplayerCategories @ Coplayer {
        required {
            game_cycle_play: GameCyclePlayCategory,
            game_cycle_betting: GameCycleBettingCategory,
            critical_data_store: CriticalDataStoreCategory,
            tilt_control: TiltControlCategory,
        }
        optional {
            parcel_communication: ParcelCommunicationCategory,
            culture: CultureCategory,
            history_control: HistoryControlCategory,
            show_control: ShowControlCategory,
        }
    }
);

level_categories!(
    SystemCategories @ System {
        required {
            system_events: SystemEventsCategory,
        }
        optional {
            parcel_communication: ParcelCommunicationCategory,
            tilt_control: TiltControlCategory,
        }
    }
);

level_categories!(
    AscribedGameCategories @ AscribedGame {
        required {
            game_information: GameInformationCategory,
        }
        optional {
            history_control: HistoryControlCategory,
            critical_data_store: CriticalDataStoreCategory,
        }
    }
);

level_categories!(
    TsmCategories @ Tsm {
        required {
            tsm_control: TsmControlCategory,
        }
        optional {
            critical_data_store: CriticalDataStoreCategory,
        }
    }
);

level_categories!(
    AppCategories @ App {
        required {
            app_information: AppInformationCategory,
        }
        optional {
            culture: CultureCategory,
            parcel_communication: ParcelCommunicationCategory,
        }
    }
);

/// Subscription list of `level`
pub fn level_subscriptions(level: NegotiationLevel) -> &'static [CategorySubscription] {
    match level {
        NegotiationLevel::Link => LinkCategories::subscriptions(),
        NegotiationLevel::Shell => ShellCategories::subscriptions(),
        NegotiationLevel::Coplayer => CoplayerCategories::subscriptions(),
        NegotiationLevel::System => SystemCategories::subscriptions(),
        NegotiationLevel::AscribedGame => AscribedGameCategories::subscriptions(),
        NegotiationLevel::Tsm => TsmCategories::subscriptions(),
        NegotiationLevel::App => AppCategories::subscriptions(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{Category, Version};
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

    fn install(level: NegotiationLevel, categories: &[Category]) -> InstalledCategories {
        let ctx = ChannelContext::new(Arc::new(NullSink), ReplyRouter::new(), Duration::from_secs(1));
        let mut installed = InstalledCategories::new();
        for category in categories {
            let channel = ctx.channel(level, *category, Version::new(1, 0));
            installed.insert(DefaultCategoryFactory.create(channel).unwrap());
        }
        installed
    }

    #[test]
    fn test_role_levels() {
        assert_eq!(Role::Shell.levels(), vec![NegotiationLevel::Shell]);
        assert_eq!(Role::Coplayer { id: 2 }.levels(), vec![NegotiationLevel::Coplayer]);
        assert_eq!(
            Role::ExtensionBin(vec![InnerRole::Tsm, InnerRole::System]).levels(),
            vec![NegotiationLevel::Tsm, NegotiationLevel::System]
        );
    }

    #[test]
    fn test_from_wire_rejects_inconsistent_roles() {
        assert_eq!(Role::from_wire(1, 7, vec![]).unwrap(), Role::Coplayer { id: 7 });
        assert!(Role::from_wire(0, 0, vec![InnerRole::App]).is_err());
        assert!(Role::from_wire(2, 0, vec![]).is_err());
        assert!(Role::from_wire(2, 0, vec![InnerRole::App, InnerRole::App]).is_err());
        assert!(Role::from_wire(9, 0, vec![]).is_err());
    }

    #[test]
    fn test_subscriptions_list_required_first() {
        for level in NegotiationLevel::ALL {
            let subscriptions = level_subscriptions(level);
            assert!(subscriptions.first().is_some_and(|s| s.required), "{level}");
            let first_optional = subscriptions.iter().position(|s| !s.required);
            if let Some(position) = first_optional {
                assert!(subscriptions[position..].iter().all(|s| !s.required), "{level}");
            }
        }
    }

    #[test]
    fn test_optional_categories_stay_empty_when_absent() {
        let mut installed = install(
            NegotiationLevel::System,
            &[Category::SystemEvents, Category::TiltControl],
        );
        let system = SystemCategories::from_installed(&mut installed).unwrap();
        assert_eq!(system.system_events.version(), Version::new(1, 0));
        assert!(system.tilt_control.is_some());
        assert!(system.parcel_communication.is_none());
    }

    #[test]
    fn test_missing_required_is_internal_fault() {
        let mut installed = install(NegotiationLevel::Tsm, &[Category::CriticalDataStore]);
        assert!(matches!(
            TsmCategories::from_installed(&mut installed),
            Err(LinkError::Internal { .. })
        ));
    }

    #[test]
    fn test_inner_role_config_names() {
        let inner: Vec<InnerRole> = parse_inner_roles(&["system", "ascribed_game"]);
        assert_eq!(inner, vec![InnerRole::System, InnerRole::AscribedGame]);
    }

    fn parse_inner_roles(names: &[&str]) -> Vec<InnerRole> {
        use serde::de::value::{Error, StrDeserializer};
        use serde::de::IntoDeserializer;
        names
            .iter()
            .map(|name| {
                let deserializer: StrDeserializer<'_, Error> = (*name).into_deserializer();
                InnerRole::deserialize(deserializer).unwrap()
            })
            .collect()
    }
}

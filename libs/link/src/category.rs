//! # Categories and Versions
//!
//! A category is a named sub-protocol (game-cycle play, betting, critical
//! data, ...) that is negotiated independently once the base link is up.
//! Each negotiation participant declares the categories it wants as
//! [`CategorySubscription`]s and the versions it can speak as
//! [`SupportedVersions`].

use codec::{CodecError, CodecResult};
use std::collections::BTreeMap;
use std::fmt;

/// Named category, `u16` on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum Category {
    ActionRequest = 1,
    LinkControl = 2,
    GameCyclePlay = 3,
    GameCycleBetting = 4,
    CriticalDataStore = 5,
    TiltControl = 6,
    ParcelCommunication = 7,
    Culture = 8,
    ShowControl = 9,
    HistoryControl = 10,
    GameInformation = 11,
    SystemEvents = 12,
    TsmControl = 13,
    AppInformation = 14,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::ActionRequest,
        Category::LinkControl,
        Category::GameCyclePlay,
        Category::GameCycleBetting,
        Category::CriticalDataStore,
        Category::TiltControl,
        Category::ParcelCommunication,
        Category::Culture,
        Category::ShowControl,
        Category::HistoryControl,
        Category::GameInformation,
        Category::SystemEvents,
        Category::TsmControl,
        Category::AppInformation,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::ActionRequest => "ActionRequest",
            Category::LinkControl => "LinkControl",
            Category::GameCyclePlay => "GameCyclePlay",
            Category::GameCycleBetting => "GameCycleBetting",
            Category::CriticalDataStore => "CriticalDataStore",
            Category::TiltControl => "TiltControl",
            Category::ParcelCommunication => "ParcelCommunication",
            Category::Culture => "Culture",
            Category::ShowControl => "ShowControl",
            Category::HistoryControl => "HistoryControl",
            Category::GameInformation => "GameInformation",
            Category::SystemEvents => "SystemEvents",
            Category::TsmControl => "TsmControl",
            Category::AppInformation => "AppInformation",
        }
    }
}

impl TryFrom<u16> for Category {
    type Error = CodecError;

    fn try_from(code: u16) -> CodecResult<Self> {
        Category::ALL
            .into_iter()
            .find(|category| category.code() == code)
            .ok_or_else(|| CodecError::invalid_message(format!("unknown category {code}")))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Category version; ordered by major, then minor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Initiator's request: a category and the inclusive version range it accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryRange {
    pub category: Category,
    pub min: Version,
    pub max: Version,
}

impl CategoryRange {
    pub fn new(category: Category, min: Version, max: Version) -> Self {
        Self { category, min, max }
    }

    pub fn contains(&self, version: Version) -> bool {
        self.min <= version && version <= self.max
    }
}

/// One version a manager is prepared to install for a category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryOffer {
    pub category: Category,
    pub version: Version,
    pub required: bool,
}

/// Initiator's selection of one version for a category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryVersion {
    pub category: Category,
    pub version: Version,
}

impl CategoryVersion {
    pub fn new(category: Category, version: Version) -> Self {
        Self { category, version }
    }
}

/// A category a participant wants; a required one fails its level when absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorySubscription {
    pub category: Category,
    pub required: bool,
}

impl CategorySubscription {
    pub const fn required(category: Category) -> Self {
        Self {
            category,
            required: true,
        }
    }

    pub const fn optional(category: Category) -> Self {
        Self {
            category,
            required: false,
        }
    }
}

/// Versions this participant can speak, ascending per category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedVersions {
    versions: BTreeMap<Category, Vec<Version>>,
}

impl Default for SupportedVersions {
    /// Version 1.0 of every category
    fn default() -> Self {
        Self {
            versions: Category::ALL
                .into_iter()
                .map(|category| (category, vec![Version::new(1, 0)]))
                .collect(),
        }
    }
}

impl SupportedVersions {
    /// No category supported at all
    pub fn empty() -> Self {
        Self {
            versions: BTreeMap::new(),
        }
    }

    /// Replace the versions supported for `category`
    pub fn with(mut self, category: Category, versions: impl IntoIterator<Item = Version>) -> Self {
        self.set(category, versions);
        self
    }

    pub fn set(&mut self, category: Category, versions: impl IntoIterator<Item = Version>) {
        let mut versions: Vec<Version> = versions.into_iter().collect();
        versions.sort();
        versions.dedup();
        if versions.is_empty() {
            self.versions.remove(&category);
        } else {
            self.versions.insert(category, versions);
        }
    }

    /// Supported versions, ascending
    pub fn versions(&self, category: Category) -> &[Version] {
        self.versions.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn supports(&self, category: Category, version: Version) -> bool {
        self.versions(category).contains(&version)
    }

    /// Range spanning every supported version of `category`
    pub fn range(&self, category: Category) -> Option<CategoryRange> {
        let versions = self.versions(category);
        Some(CategoryRange::new(category, *versions.first()?, *versions.last()?))
    }
}

//! # Link Wire Messages
//!
//! Carried as `Application` payloads by the socket transport. Every message
//! starts with a two-byte [`LinkHeaderSegment`]:
//!
//! ```text
//! LinkHeader       : u8 Level | u8 Kind
//! Open             : u8 Role | u8 CoplayerId | u8 InnerCount | u8 InnerRole*
//! GetVersions      : u16 Count | (u16 Category | u8 MinMaj | u8 MinMin | u8 MaxMaj | u8 MaxMin)*
//! GetVersionsReply : u16 Count | (u16 Category | u8 Major | u8 Minor | bool Required)*
//! SetVersions      : u16 Count | (u16 Category | u8 Major | u8 Minor)*
//! SetVersionsReply : bool Success
//! Category         : u16 Category | u8 CategoryKind | u32 Length | Payload
//! ShutDown         : (empty)
//! ```

use crate::category::{Category, CategoryOffer, CategoryRange, CategoryVersion, Version};
use crate::role::{InnerRole, Role};
use bytes::Bytes;
use codec::{
    read_window, write_window, BinaryMessage, BlobSegment, BoolSegment, CodecError, CodecResult,
    MessageReader, Segment, U16Segment, U8Segment,
};
use std::fmt;

/// Negotiation scope, `u8` on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum NegotiationLevel {
    #[default]
    Link = 0,
    Shell = 1,
    Coplayer = 2,
    System = 3,
    AscribedGame = 4,
    Tsm = 5,
    App = 6,
}

impl NegotiationLevel {
    pub const ALL: [NegotiationLevel; 7] = [
        NegotiationLevel::Link,
        NegotiationLevel::Shell,
        NegotiationLevel::Coplayer,
        NegotiationLevel::System,
        NegotiationLevel::AscribedGame,
        NegotiationLevel::Tsm,
        NegotiationLevel::App,
    ];
}

impl TryFrom<u8> for NegotiationLevel {
    type Error = CodecError;

    fn try_from(code: u8) -> CodecResult<Self> {
        NegotiationLevel::ALL
            .into_iter()
            .find(|level| *level as u8 == code)
            .ok_or_else(|| CodecError::invalid_message(format!("unknown negotiation level {code}")))
    }
}

impl fmt::Display for NegotiationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Link message discriminator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    #[default]
    Open = 0,
    GetVersions = 1,
    GetVersionsReply = 2,
    SetVersions = 3,
    SetVersionsReply = 4,
    Category = 5,
    ShutDown = 6,
}

impl TryFrom<u8> for MessageKind {
    type Error = CodecError;

    fn try_from(code: u8) -> CodecResult<Self> {
        Ok(match code {
            0 => MessageKind::Open,
            1 => MessageKind::GetVersions,
            2 => MessageKind::GetVersionsReply,
            3 => MessageKind::SetVersions,
            4 => MessageKind::SetVersionsReply,
            5 => MessageKind::Category,
            6 => MessageKind::ShutDown,
            other => {
                return Err(CodecError::invalid_message(format!("unknown link message kind {other}")))
            }
        })
    }
}

/// What a `Category` message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CategoryMessageKind {
    Request = 0,
    Notify = 1,
    Reply = 2,
    TransactionalEvent = 3,
    NonTransactionalEvent = 4,
}

impl TryFrom<u8> for CategoryMessageKind {
    type Error = CodecError;

    fn try_from(code: u8) -> CodecResult<Self> {
        Ok(match code {
            0 => CategoryMessageKind::Request,
            1 => CategoryMessageKind::Notify,
            2 => CategoryMessageKind::Reply,
            3 => CategoryMessageKind::TransactionalEvent,
            4 => CategoryMessageKind::NonTransactionalEvent,
            other => {
                return Err(CodecError::invalid_message(format!("unknown category message kind {other}")))
            }
        })
    }
}

/// `u8 Level | u8 Kind`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkHeaderSegment {
    pub level: NegotiationLevel,
    pub kind: MessageKind,
}

impl LinkHeaderSegment {
    pub const SIZE: usize = 2;

    pub fn new(level: NegotiationLevel, kind: MessageKind) -> Self {
        Self { level, kind }
    }
}

impl Segment for LinkHeaderSegment {
    fn size(&self) -> usize {
        Self::SIZE
    }

    fn write(&self, buffer: &mut [u8], offset: usize) -> CodecResult<()> {
        let window = write_window(buffer, offset, Self::SIZE, "LinkHeaderSegment")?;
        window[0] = self.level as u8;
        window[1] = self.kind as u8;
        Ok(())
    }

    fn read(&mut self, buffer: &[u8], offset: usize) -> CodecResult<()> {
        let window = read_window(buffer, offset, Self::SIZE, "LinkHeaderSegment")?;
        let level = NegotiationLevel::try_from(window[0])?;
        let kind = MessageKind::try_from(window[1])?;
        self.level = level;
        self.kind = kind;
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "LinkHeaderSegment"
    }
}

/// Decoded link message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkMessage {
    /// Game announces the role it wants the foundation to drive
    Open { role: Role },
    GetVersions {
        level: NegotiationLevel,
        requests: Vec<CategoryRange>,
    },
    GetVersionsReply {
        level: NegotiationLevel,
        offers: Vec<CategoryOffer>,
    },
    SetVersions {
        level: NegotiationLevel,
        selections: Vec<CategoryVersion>,
    },
    SetVersionsReply {
        level: NegotiationLevel,
        success: bool,
    },
    Category {
        level: NegotiationLevel,
        category: Category,
        kind: CategoryMessageKind,
        payload: Bytes,
    },
    /// Foundation abandons the session
    ShutDown,
}

impl LinkMessage {
    pub fn level(&self) -> NegotiationLevel {
        match self {
            LinkMessage::Open { .. } | LinkMessage::ShutDown => NegotiationLevel::Link,
            LinkMessage::GetVersions { level, .. }
            | LinkMessage::GetVersionsReply { level, .. }
            | LinkMessage::SetVersions { level, .. }
            | LinkMessage::SetVersionsReply { level, .. }
            | LinkMessage::Category { level, .. } => *level,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            LinkMessage::Open { .. } => MessageKind::Open,
            LinkMessage::GetVersions { .. } => MessageKind::GetVersions,
            LinkMessage::GetVersionsReply { .. } => MessageKind::GetVersionsReply,
            LinkMessage::SetVersions { .. } => MessageKind::SetVersions,
            LinkMessage::SetVersionsReply { .. } => MessageKind::SetVersionsReply,
            LinkMessage::Category { .. } => MessageKind::Category,
            LinkMessage::ShutDown => MessageKind::ShutDown,
        }
    }

    /// Short description for diagnostics, e.g. `GetVersionsReply@Shell`
    pub fn describe(&self) -> String {
        format!("{:?}@{}", self.kind(), self.level())
    }

    pub fn encode(&self) -> CodecResult<BinaryMessage> {
        let mut message = BinaryMessage::new().with(LinkHeaderSegment::new(self.level(), self.kind()));
        match self {
            LinkMessage::Open { role } => {
                let inner = role.inner_roles();
                message
                    .append(U8Segment::new(role.code()))
                    .append(U8Segment::new(role.coplayer_id()))
                    .append(U8Segment::new(count_u8(inner.len())?));
                for inner_role in inner {
                    message.append(U8Segment::new(*inner_role as u8));
                }
            }
            LinkMessage::GetVersions { requests, .. } => {
                message.append(U16Segment::new(count_u16(requests.len())?));
                for request in requests {
                    message
                        .append(U16Segment::new(request.category.code()))
                        .append(U8Segment::new(request.min.major))
                        .append(U8Segment::new(request.min.minor))
                        .append(U8Segment::new(request.max.major))
                        .append(U8Segment::new(request.max.minor));
                }
            }
            LinkMessage::GetVersionsReply { offers, .. } => {
                message.append(U16Segment::new(count_u16(offers.len())?));
                for offer in offers {
                    message
                        .append(U16Segment::new(offer.category.code()))
                        .append(U8Segment::new(offer.version.major))
                        .append(U8Segment::new(offer.version.minor))
                        .append(BoolSegment::new(offer.required));
                }
            }
            LinkMessage::SetVersions { selections, .. } => {
                message.append(U16Segment::new(count_u16(selections.len())?));
                for selection in selections {
                    message
                        .append(U16Segment::new(selection.category.code()))
                        .append(U8Segment::new(selection.version.major))
                        .append(U8Segment::new(selection.version.minor));
                }
            }
            LinkMessage::SetVersionsReply { success, .. } => {
                message.append(BoolSegment::new(*success));
            }
            LinkMessage::Category {
                category,
                kind,
                payload,
                ..
            } => {
                message
                    .append(U16Segment::new(category.code()))
                    .append(U8Segment::new(*kind as u8))
                    .append(BlobSegment::new(payload.clone()));
            }
            LinkMessage::ShutDown => {}
        }
        Ok(message)
    }

    pub fn decode(payload: &[u8]) -> CodecResult<Self> {
        let mut reader = MessageReader::new(payload);
        let header = reader.read::<LinkHeaderSegment>()?;
        let level = header.level;

        let message = match header.kind {
            MessageKind::Open => {
                let code = reader.read::<U8Segment>()?.value;
                let coplayer_id = reader.read::<U8Segment>()?.value;
                let count = reader.read::<U8Segment>()?.value;
                let mut inner = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    inner.push(InnerRole::try_from(reader.read::<U8Segment>()?.value)?);
                }
                LinkMessage::Open {
                    role: Role::from_wire(code, coplayer_id, inner)?,
                }
            }
            MessageKind::GetVersions => {
                let count = reader.read::<U16Segment>()?.value;
                let mut requests = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let category = read_category(&mut reader)?;
                    let min = read_version(&mut reader)?;
                    let max = read_version(&mut reader)?;
                    requests.push(CategoryRange::new(category, min, max));
                }
                LinkMessage::GetVersions { level, requests }
            }
            MessageKind::GetVersionsReply => {
                let count = reader.read::<U16Segment>()?.value;
                let mut offers = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let category = read_category(&mut reader)?;
                    let version = read_version(&mut reader)?;
                    let required = reader.read::<BoolSegment>()?.value;
                    offers.push(CategoryOffer {
                        category,
                        version,
                        required,
                    });
                }
                LinkMessage::GetVersionsReply { level, offers }
            }
            MessageKind::SetVersions => {
                let count = reader.read::<U16Segment>()?.value;
                let mut selections = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let category = read_category(&mut reader)?;
                    let version = read_version(&mut reader)?;
                    selections.push(CategoryVersion::new(category, version));
                }
                LinkMessage::SetVersions { level, selections }
            }
            MessageKind::SetVersionsReply => LinkMessage::SetVersionsReply {
                level,
                success: reader.read::<BoolSegment>()?.value,
            },
            MessageKind::Category => {
                let category = read_category(&mut reader)?;
                let kind = CategoryMessageKind::try_from(reader.read::<U8Segment>()?.value)?;
                let payload = reader.read::<BlobSegment>()?.data;
                LinkMessage::Category {
                    level,
                    category,
                    kind,
                    payload,
                }
            }
            MessageKind::ShutDown => LinkMessage::ShutDown,
        };

        reader.expect_exhausted("link message")?;
        Ok(message)
    }
}

fn read_category(reader: &mut MessageReader<'_>) -> CodecResult<Category> {
    Category::try_from(reader.read::<U16Segment>()?.value)
}

fn read_version(reader: &mut MessageReader<'_>) -> CodecResult<Version> {
    let major = reader.read::<U8Segment>()?.value;
    let minor = reader.read::<U8Segment>()?.value;
    Ok(Version::new(major, minor))
}

fn count_u16(len: usize) -> CodecResult<u16> {
    u16::try_from(len).map_err(|_| CodecError::invalid_message(format!("{len} entries exceed a u16 count")))
}

fn count_u8(len: usize) -> CodecResult<u8> {
    u8::try_from(len).map_err(|_| CodecError::invalid_message(format!("{len} entries exceed a u8 count")))
}

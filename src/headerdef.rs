//! Known mail header names, both canonical (`Chat-*`) and legacy (`X-Mr*`)
//! spellings, per spec §6.

use mailparse::MailHeader;
use strum_macros::{Display, EnumIter};

/// One header this crate understands, independent of which of its aliases
/// appeared on the wire.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, EnumIter)]
#[strum(serialize_all = "kebab_case")]
pub enum HeaderDef {
    MessageId,
    Subject,
    Date,
    From_,
    To,
    Cc,
    Disposition,
    OriginalMessageId,
    AdditionalMessageIds,
    ListId,
    ListPost,
    References,
    InReplyTo,
    Precedence,
    AutoSubmitted,
    ChatVersion,
    ChatGroupId,
    ChatGroupName,
    ChatGroupNameChanged,
    ChatGroupMemberAdded,
    ChatGroupMemberRemoved,
    ChatPredecessor,
    ChatDispositionNotificationTo,
    Autocrypt,
    AutocryptPreferEncrypt,
    AutocryptSetupMessage,
}

impl HeaderDef {
    /// The canonical `Chat-*`/RFC-standard spelling of this header.
    pub fn get_headername(&self) -> String {
        self.to_string()
    }

    /// Every on-the-wire spelling that maps to this header, canonical name
    /// first. Legacy `X-Mr*` names predate the `Chat-*` rename and are still
    /// accepted on read (never written).
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            HeaderDef::MessageId => &["message-id"],
            HeaderDef::Subject => &["subject"],
            HeaderDef::Date => &["date"],
            HeaderDef::From_ => &["from"],
            HeaderDef::To => &["to"],
            HeaderDef::Cc => &["cc"],
            HeaderDef::Disposition => &["disposition"],
            HeaderDef::OriginalMessageId => &["original-message-id"],
            HeaderDef::AdditionalMessageIds => &["additional-message-ids"],
            HeaderDef::ListId => &["list-id"],
            HeaderDef::ListPost => &["list-post"],
            HeaderDef::References => &["references"],
            HeaderDef::InReplyTo => &["in-reply-to"],
            HeaderDef::Precedence => &["precedence"],
            HeaderDef::AutoSubmitted => &["auto-submitted"],
            HeaderDef::ChatVersion => &["chat-version", "x-mrversion"],
            HeaderDef::ChatGroupId => &["chat-group-id", "x-mrgroupid"],
            HeaderDef::ChatGroupName => &["chat-group-name", "x-mrgroupname"],
            HeaderDef::ChatGroupNameChanged => {
                &["chat-group-name-changed", "x-mrgroupnamechanged"]
            }
            HeaderDef::ChatGroupMemberAdded => &["chat-group-member-added", "x-mraddto"],
            HeaderDef::ChatGroupMemberRemoved => &["chat-group-member-removed", "x-mrremoveto"],
            HeaderDef::ChatPredecessor => &["chat-predecessor"],
            HeaderDef::ChatDispositionNotificationTo => {
                &["chat-disposition-notification-to", "disposition-notification-to"]
            }
            HeaderDef::Autocrypt => &["autocrypt"],
            HeaderDef::AutocryptPreferEncrypt => &["autocrypt-prefer-encrypt"],
            HeaderDef::AutocryptSetupMessage => &["autocrypt-setup-message"],
        }
    }

    /// Resolves a raw header name (any case, canonical or legacy) to the
    /// [`HeaderDef`] it maps to, if any.
    pub fn from_name(name: &str) -> Option<Self> {
        use strum::IntoEnumIterator;
        let lower = name.to_lowercase();
        HeaderDef::iter().find(|def| def.aliases().contains(&lower.as_str()))
    }
}

/// Case- and alias-insensitive lookup over a parsed header list.
pub trait HeaderDefMap {
    fn get_header_value(&self, def: HeaderDef) -> Option<String>;
}

impl HeaderDefMap for [MailHeader<'_>] {
    fn get_header_value(&self, def: HeaderDef) -> Option<String> {
        self.iter()
            .find(|h| HeaderDef::from_name(h.get_key_ref()) == Some(def))
            .map(|h| h.get_value())
    }
}

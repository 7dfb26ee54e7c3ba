//! Group resolution (spec §4.F): mapping an inbound message onto an
//! existing or newly created group chat, and applying the group-management
//! commands (`Chat-Group-Member-Added`/`-Removed`/`-Name-Changed`) it may
//! carry.

use anyhow::Result;
use mailparse::MailHeader;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::contact::{ContactResolver, Origin};
use crate::events::EventType;
use crate::headerdef::{HeaderDef, HeaderDefMap};
use crate::store::{ChatKind, Store};

pub use crate::store::Chat;

/// A just-observed group-management instruction. At most one of these is
/// acted on per message (spec §4.F "mutually exclusive, priority in this
/// order").
#[derive(Debug, Clone)]
pub enum GroupCommand {
    MemberAdded { addr: String },
    MemberRemoved { addr: String },
    NameChanged { old_name: String, new_name: String },
}

/// System-message marker a [`GroupCommand`] leaves on the message it rode
/// in on, so the classifier can render a suitable placeholder text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemMessage {
    MemberAddedToGroup,
    MemberRemovedFromGroup,
    GroupNameChanged,
}

fn header_value(headers: &[MailHeader<'_>], def: HeaderDef) -> Option<String> {
    headers.get_header_value(def)
}

/// Parses a space/comma-separated list of `<id>` tokens, as found in
/// `Message-ID`, `In-Reply-To`, and `References`.
fn message_id_tokens(value: &str) -> Vec<&str> {
    static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^>]+)>").unwrap());
    if TOKEN_RE.is_match(value) {
        TOKEN_RE
            .captures_iter(value)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect()
    } else {
        vec![value.trim()]
    }
}

/// Extracts a `grpid` from one `Gr.<grpid>.<rand>@host` message id, per
/// spec §4.F (`VALID_ID_LEN = 8`, `[A-Za-z0-9_-]`).
fn grpid_from_rfc724_mid(mid: &str) -> Option<&str> {
    static GRPID_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^Gr\.([A-Za-z0-9_-]{8})\.").unwrap());
    GRPID_RE
        .captures(mid)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn extract_grpid_from_header(headers: &[MailHeader<'_>], def: HeaderDef) -> Option<String> {
    let value = header_value(headers, def)?;
    message_id_tokens(&value)
        .into_iter()
        .find_map(grpid_from_rfc724_mid)
        .map(|s| s.to_string())
}

/// Priority chain of spec §4.F: explicit `Chat-Group-ID`/`X-MrGrpId`, then
/// the message's own `Message-ID`, then `In-Reply-To`, then `References`.
pub fn try_getting_grpid(headers: &[MailHeader<'_>]) -> Option<String> {
    if let Some(grpid) = header_value(headers, HeaderDef::ChatGroupId) {
        if !grpid.is_empty() {
            return Some(grpid);
        }
    }
    extract_grpid_from_header(headers, HeaderDef::MessageId)
        .or_else(|| extract_grpid_from_header(headers, HeaderDef::InReplyTo))
        .or_else(|| extract_grpid_from_header(headers, HeaderDef::References))
}

/// Reads the mutually-exclusive group command a message carries, if any.
pub fn group_command(headers: &[MailHeader<'_>]) -> Option<GroupCommand> {
    if let Some(addr) = header_value(headers, HeaderDef::ChatGroupMemberRemoved) {
        return Some(GroupCommand::MemberRemoved { addr });
    }
    if let Some(addr) = header_value(headers, HeaderDef::ChatGroupMemberAdded) {
        return Some(GroupCommand::MemberAdded { addr });
    }
    if header_value(headers, HeaderDef::ChatGroupNameChanged).is_some() {
        if let Some(new_name) = header_value(headers, HeaderDef::ChatGroupName) {
            if new_name.len() <= 200 {
                let old_name = header_value(headers, HeaderDef::ChatGroupNameChanged)
                    .unwrap_or_default();
                return Some(GroupCommand::NameChanged { old_name, new_name });
            }
        }
    }
    None
}

/// Outcome of resolving one message against the group resolver.
#[derive(Debug, Clone)]
pub struct GroupResolution {
    pub chat_id: u32,
    pub system_message: Option<SystemMessage>,
}

/// What the group resolver decided for one message.
#[derive(Debug, Clone)]
pub enum GroupOutcome {
    /// No grpid found, or the message didn't resolve to a group; fall
    /// through to single-chat / deaddrop resolution.
    NotAGroup,
    /// Belongs to an existing group SELF has left, and doesn't carry a
    /// `Chat-Group-Member-Added: self@x` to re-establish membership (spec
    /// §8 S6) — route straight to `CHAT_ID_TRASH`.
    Trashed,
    Resolved(GroupResolution),
}

/// Runs the group resolver for one message (spec §4.F). `from_addr` is the
/// sender's normalized address; `to_cc_addrs` are every `(name, addr)` pair
/// from the combined `To`+`Cc` lists, in the order the membership should be
/// recreated in when a group command fires.
#[allow(clippy::too_many_arguments)]
pub async fn resolve_group(
    store: &dyn Store,
    contacts: &ContactResolver,
    headers: &[MailHeader<'_>],
    from_id: u32,
    self_addr: &str,
    to_cc_addrs: &[(String, String)],
    to_count: usize,
    is_messenger: bool,
) -> Result<GroupOutcome> {
    let Some(grpid) = try_getting_grpid(headers) else {
        return Ok(GroupOutcome::NotAGroup);
    };

    let command = group_command(headers);
    let is_member_removed = matches!(command, Some(GroupCommand::MemberRemoved { .. }));
    let adds_self_back = matches!(
        &command,
        Some(GroupCommand::MemberAdded { addr }) if addr_cmp_loose(addr, self_addr)
    );

    let existing = store.lookup_chat_by_grpid(&grpid).await?;

    if existing.is_some() && store.is_group_left(&grpid).await? && !adds_self_back {
        return Ok(GroupOutcome::Trashed);
    }

    let mut just_created = false;
    let chat_id = match existing {
        Some(chat_id) if store.is_contact_in_chat(chat_id, from_id).await? => chat_id,
        Some(chat_id) => chat_id,
        None => {
            let Some(grpname) = header_value(headers, HeaderDef::ChatGroupName) else {
                return Ok(GroupOutcome::NotAGroup);
            };
            if is_member_removed {
                return Ok(GroupOutcome::NotAGroup);
            }
            just_created = true;
            store.create_group_chat(&grpid, &grpname).await?
        }
    };

    // Anti-leak heuristic (spec §4.F): a lone "Reply" outside the
    // messenger, addressed to only one To recipient, must not silently
    // fold back into the group.
    if existing.is_some() && to_count <= 1 && !is_messenger {
        return Ok(GroupOutcome::NotAGroup);
    }

    let mut system_message = None;
    let mut recreate_membership = just_created;

    match command {
        Some(GroupCommand::MemberRemoved { addr }) => {
            recreate_membership = true;
            system_message = Some(SystemMessage::MemberRemovedFromGroup);
            if addr_cmp_loose(&addr, self_addr) {
                store.mark_group_left(&grpid, true).await?;
            }
        }
        Some(GroupCommand::MemberAdded { addr }) => {
            recreate_membership = true;
            system_message = Some(SystemMessage::MemberAddedToGroup);
            if addr_cmp_loose(&addr, self_addr) {
                store.mark_group_left(&grpid, false).await?;
            } else {
                contacts.add_or_lookup(&addr, &addr, Origin::IncomingTo).await?;
            }
        }
        Some(GroupCommand::NameChanged { new_name, .. }) => {
            system_message = Some(SystemMessage::GroupNameChanged);
            store.rename_chat(chat_id, &new_name).await?;
        }
        None => {}
    }

    if recreate_membership {
        store.remove_all_members(chat_id).await?;
        let removed_addr = match &command {
            Some(GroupCommand::MemberRemoved { addr }) => Some(addr.clone()),
            _ => None,
        };
        let removal_targeted_self =
            removed_addr.as_deref().is_some_and(|a| addr_cmp_loose(a, self_addr));

        if !removal_targeted_self {
            store.add_member(chat_id, crate::constants::CONTACT_ID_SELF).await?;
        }
        for (name, addr) in to_cc_addrs {
            if let Some(removed) = &removed_addr {
                if addr_cmp_loose(addr, removed) {
                    continue;
                }
            }
            if addr_cmp_loose(addr, self_addr) {
                continue;
            }
            if let Some(id) = contacts.add_or_lookup(name, addr, Origin::IncomingTo).await? {
                store.add_member(chat_id, id).await?;
            }
        }
        // The sender is implicitly a member regardless of whether they were
        // also named in the rebuilt To/Cc list, unless this very message is
        // the one removing them.
        let sender_was_removed = match (&removed_addr, store.get_contact(from_id).await?) {
            (Some(removed), Some(sender)) => addr_cmp_loose(removed, &sender.addr),
            _ => false,
        };
        if !sender_was_removed {
            store.add_member(chat_id, from_id).await?;
        }
        store.emit(EventType::ChatModified(chat_id)).await;
    } else if matches!(system_message, Some(SystemMessage::GroupNameChanged)) {
        store.emit(EventType::ChatModified(chat_id)).await;
    } else {
        store.add_member(chat_id, from_id).await?;
    }

    Ok(GroupOutcome::Resolved(GroupResolution {
        chat_id,
        system_message,
    }))
}

fn addr_cmp_loose(a: &str, b: &str) -> bool {
    secmail_contact_tools::addr_cmp(a, b)
}

/// Looks up or creates the 1:1 chat for `contact_id`, named after
/// `display_name` (falling back to the address if empty).
pub async fn get_or_create_single_chat(
    store: &dyn Store,
    contact_id: u32,
    display_name: &str,
) -> Result<u32> {
    if let Some(chat_id) = store.lookup_single_chat(contact_id).await? {
        return Ok(chat_id);
    }
    store.create_single_chat(contact_id, display_name).await
}

pub fn is_group(chat: &Chat) -> bool {
    chat.kind == ChatKind::Group
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn header<'a>(name: &'a str, value: &'a str) -> MailHeader<'a> {
        let raw = format!("{}: {}\n", name, value);
        let bytes: &'a [u8] = Box::leak(raw.into_bytes().into_boxed_slice());
        let (header, _) = mailparse::parse_header(bytes).unwrap();
        header
    }

    #[test]
    fn test_grpid_from_rfc724_mid() {
        assert_eq!(
            grpid_from_rfc724_mid("Gr.HcxyMARj.9-uvzWPTLtV@nauta.cu"),
            Some("HcxyMARj")
        );
        assert_eq!(grpid_from_rfc724_mid("plain@host"), None);
    }

    #[test]
    fn test_try_getting_grpid_from_references() {
        let headers = vec![header(
            "References",
            "<Gr.af9e810c.gNm8dVdkZsH@example.net>",
        )];
        assert_eq!(
            try_getting_grpid(&headers).as_deref(),
            Some("af9e810c")
        );
    }

    #[test]
    fn test_try_getting_grpid_prefers_explicit_header() {
        let headers = vec![
            header("Chat-Group-ID", "abcdefgh"),
            header("References", "<Gr.zzzzzzzz.x@host>"),
        ];
        assert_eq!(try_getting_grpid(&headers).as_deref(), Some("abcdefgh"));
    }

    #[tokio::test]
    async fn test_resolve_group_creates_chat_on_first_message() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let contacts = ContactResolver::new(store.clone(), "self@example.org".to_string());
        let headers = vec![
            header("Chat-Group-ID", "abcdefgh"),
            header("Chat-Group-Name", "Friends"),
        ];
        let outcome = resolve_group(
            &*store,
            &contacts,
            &headers,
            42,
            "self@example.org",
            &[("Bob".to_string(), "bob@example.org".to_string())],
            1,
            true,
        )
        .await
        .unwrap();
        let GroupOutcome::Resolved(resolution) = outcome else {
            panic!("expected a resolved group chat");
        };
        let chat = store.get_chat(resolution.chat_id).await.unwrap().unwrap();
        assert_eq!(chat.name, "Friends");
        assert!(is_group(&chat));
    }

    #[tokio::test]
    async fn test_resolve_group_member_removed_marks_left_on_self() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let contacts = ContactResolver::new(store.clone(), "self@example.org".to_string());
        store.create_group_chat("abcdefgh", "Friends").await.unwrap();
        let headers = vec![
            header("Chat-Group-ID", "abcdefgh"),
            header("Chat-Group-Member-Removed", "self@example.org"),
        ];
        resolve_group(
            &*store,
            &contacts,
            &headers,
            42,
            "self@example.org",
            &[],
            1,
            true,
        )
        .await
        .unwrap();
        assert!(store.is_group_left("abcdefgh").await.unwrap());
    }

    #[tokio::test]
    async fn test_anti_leak_heuristic_suppresses_single_reply() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let contacts = ContactResolver::new(store.clone(), "self@example.org".to_string());
        store.create_group_chat("abcdefgh", "Friends").await.unwrap();
        let headers = vec![header("Chat-Group-ID", "abcdefgh")];
        let outcome = resolve_group(
            &*store,
            &contacts,
            &headers,
            42,
            "self@example.org",
            &[],
            1,
            false,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, GroupOutcome::NotAGroup));
    }

    #[tokio::test]
    async fn test_member_removed_then_readded_resumes_delivery() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let contacts = ContactResolver::new(store.clone(), "self@example.org".to_string());
        store.create_group_chat("abcdefgh", "Friends").await.unwrap();
        store.mark_group_left("abcdefgh", true).await.unwrap();

        let headers_plain = vec![header("Chat-Group-ID", "abcdefgh")];
        let outcome = resolve_group(
            &*store,
            &contacts,
            &headers_plain,
            42,
            "self@example.org",
            &[],
            2,
            true,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, GroupOutcome::Trashed));

        let headers_readd = vec![
            header("Chat-Group-ID", "abcdefgh"),
            header("Chat-Group-Member-Added", "self@example.org"),
        ];
        let outcome = resolve_group(
            &*store,
            &contacts,
            &headers_readd,
            42,
            "self@example.org",
            &[("Self".to_string(), "self@example.org".to_string())],
            2,
            true,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, GroupOutcome::Resolved(_)));
        assert!(!store.is_group_left("abcdefgh").await.unwrap());
    }
}

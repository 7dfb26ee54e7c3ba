//! Message Disposition Notification handling (spec §4.H): recognizing the
//! machine-readable part of an inbound MDN, matching it back to the
//! outbound message it acknowledges, and turning it into a `MSG_READ`
//! event.
//!
//! MIME classification of "this part is an MDN report" happens upstream
//! (the caller hands us only the `message/disposition-notification` body's
//! own headers); this module owns what spec §4.H calls out explicitly:
//! the `Disposition:`/`Original-Message-ID:`/`Additional-Message-IDs:`
//! fields, the self-sent guard, and dedup against repeat notifications.

use anyhow::Result;
use mailparse::MailHeader;

use crate::constants::CONTACT_ID_SELF;
use crate::events::EventType;
use crate::headerdef::{HeaderDef, HeaderDefMap};
use crate::store::Store;

/// One parsed `message/disposition-notification` body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MdnReport {
    pub original_message_id: Option<String>,
    pub additional_message_ids: Vec<String>,
}

fn strip_mid(raw: &str) -> String {
    raw.trim().trim_matches(|c| c == '<' || c == '>').to_string()
}

/// Whether an RFC 8098 `Disposition:` value counts as an acknowledged read,
/// e.g. `manual-action/MDN-sent-automatically; displayed`. Anything else
/// (`deleted`, `denied`, ...) is not a read receipt and is ignored.
fn disposition_is_displayed(value: &str) -> bool {
    value
        .rsplit(';')
        .next()
        .is_some_and(|action| action.trim().eq_ignore_ascii_case("displayed"))
}

/// Parses the machine-readable headers of an MDN part (spec §4.H). Returns
/// `None` for anything that isn't a "displayed" disposition or carries
/// neither id header — malformed or irrelevant MDNs are ignored silently
/// rather than treated as an error.
pub fn parse_disposition_notification(headers: &[MailHeader<'_>]) -> Option<MdnReport> {
    let disposition = headers.get_header_value(HeaderDef::Disposition)?;
    if !disposition_is_displayed(&disposition) {
        return None;
    }
    let original_message_id = headers
        .get_header_value(HeaderDef::OriginalMessageId)
        .map(|v| strip_mid(&v));
    let additional_message_ids = headers
        .get_header_value(HeaderDef::AdditionalMessageIds)
        .map(|v| v.split_whitespace().map(strip_mid).collect())
        .unwrap_or_default();
    if original_message_id.is_none() && additional_message_ids.is_empty() {
        return None;
    }
    Some(MdnReport {
        original_message_id,
        additional_message_ids,
    })
}

/// Applies one already-parsed MDN report: for every referenced
/// `Message-ID` that names a message we sent, records that `from_id`
/// acknowledged it and fires `MSG_READ` the first time any contact does so
/// for that message. A receipt for a message we didn't send, or a
/// duplicate from a contact who already acknowledged it, is dropped
/// without error.
pub async fn handle_mdn(store: &dyn Store, from_id: u32, report: &MdnReport) -> Result<()> {
    if from_id == CONTACT_ID_SELF {
        // A device receiving an MDN for its own sent mail is a sender bug,
        // not something to surface to the user.
        return Ok(());
    }

    let mut mids: Vec<&str> = report
        .additional_message_ids
        .iter()
        .map(|s| s.as_str())
        .collect();
    if let Some(mid) = &report.original_message_id {
        mids.push(mid);
    }

    for mid in mids {
        let Some(row) = store.rfc724_mid_exists(mid).await? else {
            continue;
        };
        if row.from_id != CONTACT_ID_SELF {
            continue;
        }
        if store.record_mdn(row.id, from_id).await? {
            store
                .emit(EventType::MsgRead {
                    chat_id: row.chat_id,
                    msg_id: row.id,
                })
                .await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::Origin;
    use crate::store::{MemoryStore, MessageState, NewMessage};

    fn header<'a>(name: &'a str, value: &'a str) -> MailHeader<'a> {
        let raw = format!("{}: {}\n", name, value);
        let bytes: &'a [u8] = Box::leak(raw.into_bytes().into_boxed_slice());
        let (header, _) = mailparse::parse_header(bytes).unwrap();
        header
    }

    #[test]
    fn test_ignores_non_displayed_disposition() {
        let headers = vec![
            header("Disposition", "manual-action/MDN-sent-automatically; deleted"),
            header("Original-Message-ID", "<m1@x>"),
        ];
        assert!(parse_disposition_notification(&headers).is_none());
    }

    #[test]
    fn test_parses_displayed_disposition() {
        let headers = vec![
            header(
                "Disposition",
                "manual-action/MDN-sent-automatically; displayed",
            ),
            header("Original-Message-ID", "<m1@x>"),
            header("Additional-Message-IDs", "<m2@x> <m3@x>"),
        ];
        let report = parse_disposition_notification(&headers).unwrap();
        assert_eq!(report.original_message_id.as_deref(), Some("m1@x"));
        assert_eq!(report.additional_message_ids, vec!["m2@x", "m3@x"]);
    }

    #[tokio::test]
    async fn test_handle_mdn_emits_msg_read_once() {
        let store = MemoryStore::new();
        let emitter = store.get_emitter();
        let bob = store
            .upsert_contact("bob@x", Some("Bob"), Origin::IncomingReplyTo)
            .await
            .unwrap();
        let chat_id = store.create_single_chat(bob, "Bob").await.unwrap();
        let msg_id = store
            .insert_message(NewMessage {
                rfc724_mid: "m1@x".to_string(),
                server_folder: "INBOX".to_string(),
                server_uid: 1,
                chat_id,
                from_id: CONTACT_ID_SELF,
                to_id: bob,
                ts: 1000,
                msg_type: "text".to_string(),
                state: MessageState::OutDelivered,
                is_msgr: true,
                text: "hi".to_string(),
                text_raw: "hi".to_string(),
                param: crate::param::Params::new(),
                bytes: 2,
            })
            .await
            .unwrap();

        let report = MdnReport {
            original_message_id: Some("m1@x".to_string()),
            additional_message_ids: vec![],
        };
        handle_mdn(&store, bob, &report).await.unwrap();
        assert_eq!(
            emitter.try_recv(),
            Some(EventType::MsgRead { chat_id, msg_id })
        );

        // A second MDN for the same message from the same contact is a
        // duplicate and must not re-fire the event.
        handle_mdn(&store, bob, &report).await.unwrap();
        assert!(emitter.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_handle_mdn_ignores_self() {
        let store = MemoryStore::new();
        let emitter = store.get_emitter();
        let report = MdnReport {
            original_message_id: Some("m1@x".to_string()),
            additional_message_ids: vec![],
        };
        handle_mdn(&store, CONTACT_ID_SELF, &report).await.unwrap();
        assert!(emitter.try_recv().is_none());
    }
}

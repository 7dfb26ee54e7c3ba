//! The message classifier (spec §4.G): turns one already-MIME-parsed
//! inbound or outbound mail into contact ids, a chat assignment, persisted
//! message rows, and the events that follow from them.
//!
//! MIME parsing itself is out of scope (spec §1) — this module consumes a
//! [`ParsedMessage`] the caller has already built from the wire bytes.

use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;
use mailparse::MailHeader;

use crate::chat::{self, GroupOutcome};
use crate::constants::{CHAT_ID_DEADDROP, CHAT_ID_LAST_SPECIAL, CHAT_ID_TO_DEADDROP, CHAT_ID_TRASH, CONTACT_ID_SELF};
use crate::contact::{ContactResolver, Origin};
use crate::events::EventType;
use crate::headerdef::{HeaderDef, HeaderDefMap};
use crate::message::synthesize_rfc724_mid;
use crate::param::Params;
use crate::store::{MessageState, NewMessage, Store};

/// One MIME body part the caller has already extracted (text, image, ...).
#[derive(Debug, Clone)]
pub struct MimePart {
    pub msg_type: String,
    pub text: String,
    pub text_raw: String,
    pub bytes: i64,
    pub param: Params,
}

/// Everything the classifier needs about one already-parsed mail.
#[derive(Debug, Clone)]
pub struct ParsedMessage<'a> {
    pub headers: Vec<MailHeader<'a>>,
    pub from_addr: String,
    pub from_name: String,
    pub to_raw: String,
    pub cc_raw: String,
    /// Present iff the transport handed us a `Return-Path:` (spec §4.G.1).
    pub return_path_present: bool,
    pub rfc724_mid: Option<String>,
    pub is_messenger: bool,
    pub sent_timestamp: i64,
    /// Whether the transport reports this message as already `\Seen`.
    pub transport_seen: bool,
    pub parts: Vec<MimePart>,
}

/// A monotonically increasing clock used to give otherwise-simultaneous
/// messages a strict ordering (spec §4.G.4, §8 invariant 8).
#[derive(Debug, Default)]
pub struct TimestampSmearer {
    last: AtomicI64,
}

/// Wall-clock seconds, for callers that feed [`receive_imf`]'s `now`
/// parameter from a live transport rather than a test fixture.
pub fn wall_clock_now() -> i64 {
    secmail_time::SystemTimeTools::now()
        .duration_since(secmail_time::SystemTimeTools::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl TimestampSmearer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A corrected "now", guaranteed to be strictly greater than the last
    /// value this smearer has handed out.
    fn smeared_now(&self, now: i64) -> i64 {
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = if last >= now { last + 1 } else { now };
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }
}

/// Timestamp fixup (spec §4.G.4): clamps `ts` to be strictly after the
/// latest fresh message in the chat from someone else, and never further
/// ahead than the smeared wall clock.
fn correct_bad_timestamp(
    smearer: &TimestampSmearer,
    ts: i64,
    now: i64,
    last_ts_in_chat_from_other: Option<i64>,
) -> i64 {
    let mut ts = ts;
    if let Some(last) = last_ts_in_chat_from_other {
        ts = ts.max(last + 1);
    }
    let now_smeared = smearer.smeared_now(now);
    ts.min(now_smeared)
}

fn header_list(headers: &[MailHeader<'_>], def: HeaderDef) -> Option<String> {
    headers.get_header_value(def)
}

fn in_reply_to_mids(headers: &[MailHeader<'_>]) -> Vec<String> {
    let Some(value) = header_list(headers, HeaderDef::InReplyTo) else {
        return Vec::new();
    };
    value
        .split_whitespace()
        .map(|tok| tok.trim_matches(|c| c == '<' || c == '>').to_string())
        .collect()
}

/// Runs the full classifier for one message and persists the result.
/// Wraps everything from contact resolution to event emission in a single
/// store transaction, so a caller that sees `Ok(())` knows either
/// everything landed or (on error) nothing did.
#[allow(clippy::too_many_arguments)]
pub async fn receive_imf(
    store: &dyn Store,
    contacts: &ContactResolver,
    self_addr: &str,
    smearer: &TimestampSmearer,
    msg: ParsedMessage<'_>,
    server_folder: &str,
    server_uid: u32,
    show_deaddrop: bool,
    now: i64,
) -> Result<()> {
    store.begin().await?;
    match receive_imf_inner(
        store,
        contacts,
        self_addr,
        smearer,
        msg,
        server_folder,
        server_uid,
        show_deaddrop,
        now,
    )
    .await
    {
        Ok(()) => {
            store.commit().await?;
            Ok(())
        }
        Err(err) => {
            store.rollback().await?;
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn receive_imf_inner(
    store: &dyn Store,
    contacts: &ContactResolver,
    self_addr: &str,
    smearer: &TimestampSmearer,
    msg: ParsedMessage<'_>,
    server_folder: &str,
    server_uid: u32,
    show_deaddrop: bool,
    now: i64,
) -> Result<()> {
    // 1. Direction.
    let incoming = msg.return_path_present && !secmail_contact_tools::addr_cmp(&msg.from_addr, self_addr);

    let from_id = if incoming {
        contacts
            .add_or_lookup(&msg.from_name, &msg.from_addr, Origin::IncomingUnknownFrom)
            .await?
            .unwrap_or(CONTACT_ID_SELF)
    } else {
        CONTACT_ID_SELF
    };

    let to_origin = if incoming {
        Origin::IncomingTo
    } else {
        Origin::OutgoingTo
    };
    let cc_origin = if incoming {
        Origin::IncomingCc
    } else {
        Origin::OutgoingCc
    };
    let to_resolved = contacts.resolve_address_list(&msg.to_raw, to_origin).await?;
    // Cc recipients are upserted as contacts as a side effect; the
    // classifier itself only routes on the To list.
    let _cc_resolved = contacts.resolve_address_list(&msg.cc_raw, cc_origin).await?;

    let mut to_cc_addrs = Vec::new();
    for tok in msg.to_raw.split(',').chain(msg.cc_raw.split(',')) {
        let tok = tok.trim();
        if tok.is_empty() {
            continue;
        }
        if let Ok(parsed) = mailparse::addrparse(tok) {
            for addr in parsed.iter() {
                if let mailparse::MailAddr::Single(single) = addr {
                    to_cc_addrs.push((
                        single.display_name.clone().unwrap_or_default(),
                        single.addr.clone(),
                    ));
                }
            }
        }
    }

    // 2. Dedup.
    let rfc724_mid = msg.rfc724_mid.clone().unwrap_or_else(|| {
        synthesize_rfc724_mid(msg.sent_timestamp, from_id, &to_resolved.contact_ids)
    });
    if let Some(existing) = store.rfc724_mid_exists(&rfc724_mid).await? {
        if existing.server_folder != server_folder || existing.server_uid != server_uid {
            store
                .update_server_uid(&rfc724_mid, server_folder, server_uid)
                .await?;
        }
        return Ok(());
    }

    // 3. Chat assignment.
    let to_id = to_resolved.contact_ids.first().copied().unwrap_or(0);
    let group_outcome = chat::resolve_group(
        store,
        contacts,
        &msg.headers,
        from_id,
        self_addr,
        &to_cc_addrs,
        to_resolved.contact_ids.len(),
        msg.is_messenger,
    )
    .await?;

    let chat_id = match group_outcome {
        GroupOutcome::Trashed => CHAT_ID_TRASH,
        GroupOutcome::Resolved(resolution) => resolution.chat_id,
        GroupOutcome::NotAGroup => {
            if incoming {
                if let Some(existing) = store.lookup_single_chat(from_id).await? {
                    existing
                } else {
                    let replies_to_known = {
                        let mut found = false;
                        for mid in in_reply_to_mids(&msg.headers) {
                            if store.rfc724_mid_exists(&mid).await?.is_some() {
                                found = true;
                                break;
                            }
                        }
                        found
                    };
                    if store.is_known_contact(from_id).await? && (msg.is_messenger || replies_to_known)
                    {
                        store
                            .create_single_chat(from_id, &msg.from_name)
                            .await?
                    } else {
                        CHAT_ID_DEADDROP
                    }
                }
            } else if to_id != 0 {
                if let Some(existing) = store.lookup_single_chat(to_id).await? {
                    existing
                } else {
                    CHAT_ID_TO_DEADDROP
                }
            } else {
                CHAT_ID_TO_DEADDROP
            }
        }
    };

    let ts = if chat_id > CHAT_ID_LAST_SPECIAL {
        let last_from_other = store
            .last_ts_in_chat_from_other_sender(chat_id, from_id)
            .await?;
        correct_bad_timestamp(smearer, msg.sent_timestamp, now, last_from_other)
    } else {
        msg.sent_timestamp
    };

    // 5. State.
    let state = if incoming {
        if msg.transport_seen {
            MessageState::InSeen
        } else {
            MessageState::InFresh
        }
    } else {
        MessageState::OutDelivered
    };

    // 6. Persist one row per MIME part.
    let mut first_msg_id = None;
    for part in &msg.parts {
        let id = store
            .insert_message(NewMessage {
                rfc724_mid: rfc724_mid.clone(),
                server_folder: server_folder.to_string(),
                server_uid,
                chat_id,
                from_id,
                to_id,
                ts,
                msg_type: part.msg_type.clone(),
                state,
                is_msgr: msg.is_messenger,
                text: part.text.clone(),
                text_raw: part.text_raw.clone(),
                param: part.param.clone(),
                bytes: part.bytes,
            })
            .await?;
        if first_msg_id.is_none() {
            first_msg_id = Some(id);
        }
    }

    // 7. Ghost fan-out: outbound, non-group, more than one recipient.
    if !incoming && chat_id != CHAT_ID_TRASH {
        let is_group_chat = if let Some(chat) = store.get_chat(chat_id).await? {
            chat::is_group(&chat)
        } else {
            false
        };
        if !is_group_chat && to_resolved.contact_ids.len() > 1 {
            if let Some(original_id) = first_msg_id {
                for &extra_to in &to_resolved.contact_ids[1..] {
                    let ghost_chat_id = chat::get_or_create_single_chat(store, extra_to, "")
                        .await?;
                    let mut ghost_param = Params::new();
                    ghost_param.set_int(crate::param::Param::GhostOriginalMsgId, original_id as i32);
                    store
                        .insert_message(NewMessage {
                            rfc724_mid: format!("{}.ghost.{}", rfc724_mid, extra_to),
                            server_folder: server_folder.to_string(),
                            server_uid,
                            chat_id: ghost_chat_id,
                            from_id,
                            to_id: extra_to,
                            ts,
                            msg_type: "text".to_string(),
                            state: MessageState::OutDelivered,
                            is_msgr: msg.is_messenger,
                            text: msg
                                .parts
                                .first()
                                .map(|p| p.text.clone())
                                .unwrap_or_default(),
                            text_raw: String::new(),
                            param: ghost_param,
                            bytes: 0,
                        })
                        .await?;
                }
            }
        }
    }

    // 8. Events.
    if let Some(msg_id) = first_msg_id {
        let fresh = state == MessageState::InFresh;
        let blocked = store
            .get_chat(chat_id)
            .await?
            .map(|c| c.blocked)
            .unwrap_or(false);
        if fresh && !blocked && (chat_id != CHAT_ID_DEADDROP || show_deaddrop) {
            store
                .emit(EventType::IncomingMsg { chat_id, msg_id })
                .await;
        } else {
            store
                .emit(EventType::MsgsChanged { chat_id, msg_id: 0 })
                .await;
        }
    }

    Ok(())
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

    fn text_part(text: &str) -> MimePart {
        MimePart {
            msg_type: "text".to_string(),
            text: text.to_string(),
            text_raw: text.to_string(),
            bytes: text.len() as i64,
            param: Params::new(),
        }
    }

    #[tokio::test]
    async fn test_scenario_s3_group_creation_from_incoming() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let contacts = ContactResolver::new(store.clone(), "self@x".to_string());
        contacts
            .add_or_lookup("Bob", "bob@x", Origin::AddressBook)
            .await
            .unwrap();

        let headers = vec![
            header("Chat-Group-ID", "abcd1234"),
            header("Chat-Group-Name", "Team"),
        ];
        let msg = ParsedMessage {
            headers,
            from_addr: "bob@x".to_string(),
            from_name: "Bob".to_string(),
            to_raw: "self@x, carol@x".to_string(),
            cc_raw: String::new(),
            return_path_present: true,
            rfc724_mid: Some("m1@x".to_string()),
            is_messenger: true,
            sent_timestamp: 1000,
            transport_seen: false,
            parts: vec![text_part("hi team")],
        };

        receive_imf(
            &*store,
            &contacts,
            "self@x",
            &TimestampSmearer::new(),
            msg,
            "INBOX",
            1,
            false,
            1000,
        )
        .await
        .unwrap();

        let chat_id = store.lookup_chat_by_grpid("abcd1234").await.unwrap().unwrap();
        let chat = store.get_chat(chat_id).await.unwrap().unwrap();
        assert_eq!(chat.name, "Team");
        assert!(store.is_contact_in_chat(chat_id, CONTACT_ID_SELF).await.unwrap());
    }

    #[tokio::test]
    async fn test_scenario_s4_dedup_on_folder_move() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let contacts = ContactResolver::new(store.clone(), "self@x".to_string());
        let emitter = store.get_emitter();

        let build = |folder: &'static str, uid: u32| ParsedMessage {
            headers: vec![],
            from_addr: "bob@x".to_string(),
            from_name: "Bob".to_string(),
            to_raw: "self@x".to_string(),
            cc_raw: String::new(),
            return_path_present: true,
            rfc724_mid: Some("dup@x".to_string()),
            is_messenger: true,
            sent_timestamp: 1000,
            transport_seen: false,
            parts: vec![text_part("hi")],
        };

        receive_imf(
            &*store,
            &contacts,
            "self@x",
            &TimestampSmearer::new(),
            build("INBOX", 7),
            "INBOX",
            7,
            false,
            1000,
        )
        .await
        .unwrap();
        while emitter.try_recv().is_some() {}

        receive_imf(
            &*store,
            &contacts,
            "self@x",
            &TimestampSmearer::new(),
            build("Archive", 13),
            "Archive",
            13,
            false,
            1000,
        )
        .await
        .unwrap();

        let row = store.rfc724_mid_exists("dup@x").await.unwrap().unwrap();
        assert_eq!(row.server_folder, "Archive");
        assert_eq!(row.server_uid, 13);
        assert!(emitter.try_recv().is_none());
    }

    #[test]
    fn test_correct_bad_timestamp_clamps_to_smeared_now() {
        let smearer = TimestampSmearer::new();
        let ts = correct_bad_timestamp(&smearer, 500, 1000, Some(900));
        assert_eq!(ts, 901);
        let ts2 = correct_bad_timestamp(&smearer, 2_000_000, 1000, None);
        assert!(ts2 <= 1001);
    }
}

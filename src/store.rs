//! The abstract persistence contract the pipeline depends on (spec §4.J),
//! plus an in-memory reference implementation.
//!
//! The pipeline only ever goes through `dyn Store` — nothing above this
//! module knows whether rows live in SQLite, Postgres, or (as here) a
//! process-local map. `MemoryStore` serializes every access behind one
//! coarse, non-reentrant lock (spec §5) and defers event delivery until
//! `commit` releases it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::contact::{Contact, Origin};
use crate::events::{EventType, Events};
use crate::param::Params;
use crate::peerstate::Peerstate;

/// Whether a chat is a 1:1 conversation or a named group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Single,
    Group,
}

/// A chat row (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: u32,
    pub kind: ChatKind,
    pub name: String,
    pub grpid: Option<String>,
    pub blocked: bool,
    pub protected: bool,
}

/// `Message.state` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    InFresh,
    InNoticed,
    InSeen,
    OutPending,
    OutDelivered,
    OutRead,
    OutError,
}

/// A message row (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: u32,
    pub rfc724_mid: String,
    pub server_folder: String,
    pub server_uid: u32,
    pub chat_id: u32,
    pub from_id: u32,
    pub to_id: u32,
    pub ts: i64,
    pub msg_type: String,
    pub state: MessageState,
    pub is_msgr: bool,
    pub text: String,
    pub text_raw: String,
    pub param: Params,
    pub bytes: i64,
}

/// Everything the classifier (spec §4.G) has assembled about one MIME part
/// it wants persisted as a message row.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub rfc724_mid: String,
    pub server_folder: String,
    pub server_uid: u32,
    pub chat_id: u32,
    pub from_id: u32,
    pub to_id: u32,
    pub ts: i64,
    pub msg_type: String,
    pub state: MessageState,
    pub is_msgr: bool,
    pub text: String,
    pub text_raw: String,
    pub param: Params,
    pub bytes: i64,
}

/// The abstract contract the classifier, group resolver, and contact
/// resolver run against. Method names mirror spec §4.J; a handful of plain
/// read accessors (`get_contact`, `get_chat`, `chat_member_ids`, ...) are
/// added because the pipeline needs them even though the spec only lists
/// the mutating operations explicitly.
#[async_trait]
pub trait Store: Send + Sync {
    /// Starts a transaction on the calling task, taking the coarse store
    /// lock. Not reentrant: calling `begin` again before `commit`/`rollback`
    /// is an error.
    async fn begin(&self) -> Result<()>;
    /// Commits the open transaction and releases the lock, then fires any
    /// events emitted while it was held.
    async fn commit(&self) -> Result<()>;
    /// Discards every change made since `begin` and releases the lock
    /// without firing events.
    async fn rollback(&self) -> Result<()>;

    async fn get_config(&self, key: &str) -> Result<Option<String>>;
    async fn set_config(&self, key: &str, value: Option<&str>) -> Result<()>;

    async fn upsert_contact(&self, addr: &str, name: Option<&str>, origin: Origin)
        -> Result<u32>;
    async fn get_contact(&self, contact_id: u32) -> Result<Option<Contact>>;
    async fn is_known_contact(&self, contact_id: u32) -> Result<bool>;
    async fn scaleup_contact_origin(&self, contact_id: u32, origin: Origin) -> Result<()>;

    async fn lookup_chat_by_grpid(&self, grpid: &str) -> Result<Option<u32>>;
    async fn create_group_chat(&self, grpid: &str, name: &str) -> Result<u32>;
    async fn get_chat(&self, chat_id: u32) -> Result<Option<Chat>>;
    async fn rename_chat(&self, chat_id: u32, name: &str) -> Result<()>;
    async fn add_member(&self, chat_id: u32, contact_id: u32) -> Result<()>;
    async fn remove_all_members(&self, chat_id: u32) -> Result<()>;
    async fn is_contact_in_chat(&self, chat_id: u32, contact_id: u32) -> Result<bool>;
    async fn chat_member_ids(&self, chat_id: u32) -> Result<Vec<u32>>;
    async fn is_group_left(&self, grpid: &str) -> Result<bool>;
    async fn mark_group_left(&self, grpid: &str, left: bool) -> Result<()>;

    /// The existing single (1:1) chat for `contact_id`, if any.
    async fn lookup_single_chat(&self, contact_id: u32) -> Result<Option<u32>>;
    /// Creates a single chat for `contact_id`, named after the contact.
    async fn create_single_chat(&self, contact_id: u32, name: &str) -> Result<u32>;

    async fn insert_message(&self, msg: NewMessage) -> Result<u32>;
    async fn rfc724_mid_exists(&self, rfc724_mid: &str) -> Result<Option<MessageRow>>;
    async fn update_server_uid(&self, rfc724_mid: &str, folder: &str, uid: u32) -> Result<()>;
    /// Most recent `ts` of a message in `chat_id` not sent by `from_id`;
    /// feeds `correct_bad_timestamp` (spec §4.G.4).
    async fn last_ts_in_chat_from_other_sender(
        &self,
        chat_id: u32,
        from_id: u32,
    ) -> Result<Option<i64>>;

    /// Queues `event` for delivery: immediately if no transaction is open,
    /// or after the enclosing `commit` otherwise (spec §4.I).
    async fn emit(&self, event: EventType);

    /// Records that `contact_id` has acknowledged `msg_id` via MDN.
    /// Returns `false` if this exact `(msg_id, contact_id)` pair was
    /// already recorded (a duplicate notification), else `true` if this is
    /// the first acknowledgement from any contact for `msg_id` (the
    /// classifier fires `MSG_READ` only on that transition).
    async fn record_mdn(&self, msg_id: u32, contact_id: u32) -> Result<bool>;

    /// The saved peerstate for `addr`, if any Autocrypt header has ever
    /// been observed from it.
    async fn get_peerstate(&self, addr: &str) -> Result<Option<Peerstate>>;
    /// Persists `peerstate` under its own `addr`, overwriting any prior row.
    async fn save_peerstate(&self, peerstate: &Peerstate) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct ContactRow {
    addr: String,
    name: Option<String>,
    origin: Origin,
}

#[derive(Debug, Clone)]
struct ChatRow {
    kind: ChatKind,
    name: String,
    grpid: Option<String>,
    blocked: bool,
    protected: bool,
}

#[derive(Debug, Clone, Default)]
struct Inner {
    contacts: HashMap<u32, ContactRow>,
    contacts_by_addr: HashMap<String, u32>,
    next_contact_id: u32,

    chats: HashMap<u32, ChatRow>,
    chats_by_grpid: HashMap<String, u32>,
    single_chat_by_contact: HashMap<u32, u32>,
    next_chat_id: u32,

    memberships: HashSet<(u32, u32)>,
    left_groups: HashSet<String>,

    messages: HashMap<u32, MessageRow>,
    messages_by_rfc724: HashMap<String, u32>,
    next_message_id: u32,
    mdns: HashSet<(u32, u32)>,

    config: HashMap<String, String>,
    peerstates: HashMap<String, Peerstate>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            next_contact_id: crate::constants::CONTACT_ID_LAST_SPECIAL + 1,
            next_chat_id: crate::constants::CHAT_ID_LAST_SPECIAL + 1,
            next_message_id: 1,
            ..Default::default()
        }
    }
}

struct TxnState {
    guard: OwnedMutexGuard<Inner>,
    snapshot: Inner,
    pending_events: Vec<EventType>,
}

/// A single-process, in-memory `Store`. Good enough to drive the pipeline
/// in tests and small deployments; not durable across restarts.
pub struct MemoryStore {
    inner: Arc<AsyncMutex<Inner>>,
    txn: AsyncMutex<Option<TxnState>>,
    events: Events,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore {
            inner: Arc::new(AsyncMutex::new(Inner::new())),
            txn: AsyncMutex::new(None),
            events: Events::new(),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_emitter(&self) -> crate::events::EventEmitter {
        self.events.get_emitter()
    }

    /// Runs `f` against the active transaction's data if one is open, else
    /// against a freshly locked, auto-committing view: events `f` queues
    /// fire immediately once `f` returns in that case.
    async fn mutate<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Inner, &mut Vec<EventType>) -> R,
    {
        let mut slot = self.txn.lock().await;
        if let Some(txn) = slot.as_mut() {
            f(&mut txn.guard, &mut txn.pending_events)
        } else {
            let mut guard = self.inner.lock().await;
            let mut events = Vec::new();
            let r = f(&mut guard, &mut events);
            drop(guard);
            for event in events {
                self.events.emit(event);
            }
            r
        }
    }

    async fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Inner) -> R,
    {
        let mut slot = self.txn.lock().await;
        if let Some(txn) = slot.as_mut() {
            f(&txn.guard)
        } else {
            let guard = self.inner.lock().await;
            f(&guard)
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<()> {
        let mut slot = self.txn.lock().await;
        if slot.is_some() {
            return Err(anyhow!("store transaction already open"));
        }
        let guard = self.inner.clone().lock_owned().await;
        let snapshot = guard.clone();
        *slot = Some(TxnState {
            guard,
            snapshot,
            pending_events: Vec::new(),
        });
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut slot = self.txn.lock().await;
        let txn = slot
            .take()
            .ok_or_else(|| anyhow!("commit with no open store transaction"))?;
        drop(txn.guard);
        for event in txn.pending_events {
            self.events.emit(event);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut slot = self.txn.lock().await;
        let mut txn = slot
            .take()
            .ok_or_else(|| anyhow!("rollback with no open store transaction"))?;
        *txn.guard = txn.snapshot;
        Ok(())
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read(|inner| inner.config.get(key).cloned()).await)
    }

    async fn set_config(&self, key: &str, value: Option<&str>) -> Result<()> {
        self.mutate(|inner, _events| {
            match value {
                Some(v) => {
                    inner.config.insert(key.to_string(), v.to_string());
                }
                None => {
                    inner.config.remove(key);
                }
            }
        })
        .await;
        Ok(())
    }

    async fn upsert_contact(
        &self,
        addr: &str,
        name: Option<&str>,
        origin: Origin,
    ) -> Result<u32> {
        let id = self
            .mutate(|inner, _events| {
                if let Some(&id) = inner.contacts_by_addr.get(addr) {
                    let row = inner.contacts.get_mut(&id).expect("indexed contact row");
                    if origin >= row.origin {
                        if let Some(name) = name {
                            if !name.is_empty() {
                                row.name = Some(name.to_string());
                            }
                        }
                    }
                    if origin > row.origin {
                        row.origin = origin;
                    }
                    id
                } else {
                    let id = inner.next_contact_id;
                    inner.next_contact_id += 1;
                    inner.contacts.insert(
                        id,
                        ContactRow {
                            addr: addr.to_string(),
                            name: name.filter(|n| !n.is_empty()).map(|n| n.to_string()),
                            origin,
                        },
                    );
                    inner.contacts_by_addr.insert(addr.to_string(), id);
                    id
                }
            })
            .await;
        Ok(id)
    }

    async fn get_contact(&self, contact_id: u32) -> Result<Option<Contact>> {
        Ok(self
            .read(|inner| {
                inner.contacts.get(&contact_id).map(|row| Contact {
                    id: contact_id,
                    addr: row.addr.clone(),
                    name: row.name.clone(),
                    origin: row.origin,
                    blocked: false,
                })
            })
            .await)
    }

    async fn is_known_contact(&self, contact_id: u32) -> Result<bool> {
        Ok(self
            .read(|inner| {
                inner
                    .contacts
                    .get(&contact_id)
                    .is_some_and(|row| row.origin.is_known())
            })
            .await)
    }

    async fn scaleup_contact_origin(&self, contact_id: u32, origin: Origin) -> Result<()> {
        self.mutate(|inner, _events| {
            if let Some(row) = inner.contacts.get_mut(&contact_id) {
                if origin > row.origin {
                    row.origin = origin;
                }
            }
        })
        .await;
        Ok(())
    }

    async fn lookup_chat_by_grpid(&self, grpid: &str) -> Result<Option<u32>> {
        Ok(self.read(|inner| inner.chats_by_grpid.get(grpid).copied()).await)
    }

    async fn create_group_chat(&self, grpid: &str, name: &str) -> Result<u32> {
        let id = self
            .mutate(|inner, _events| {
                let id = inner.next_chat_id;
                inner.next_chat_id += 1;
                inner.chats.insert(
                    id,
                    ChatRow {
                        kind: ChatKind::Group,
                        name: name.to_string(),
                        grpid: Some(grpid.to_string()),
                        blocked: false,
                        protected: false,
                    },
                );
                inner.chats_by_grpid.insert(grpid.to_string(), id);
                id
            })
            .await;
        Ok(id)
    }

    async fn get_chat(&self, chat_id: u32) -> Result<Option<Chat>> {
        Ok(self
            .read(|inner| {
                inner.chats.get(&chat_id).map(|row| Chat {
                    id: chat_id,
                    kind: row.kind,
                    name: row.name.clone(),
                    grpid: row.grpid.clone(),
                    blocked: row.blocked,
                    protected: row.protected,
                })
            })
            .await)
    }

    async fn rename_chat(&self, chat_id: u32, name: &str) -> Result<()> {
        self.mutate(|inner, events| {
            if let Some(row) = inner.chats.get_mut(&chat_id) {
                row.name = name.to_string();
                events.push(EventType::ChatModified(chat_id));
            }
        })
        .await;
        Ok(())
    }

    async fn add_member(&self, chat_id: u32, contact_id: u32) -> Result<()> {
        self.mutate(|inner, _events| {
            inner.memberships.insert((chat_id, contact_id));
        })
        .await;
        Ok(())
    }

    async fn remove_all_members(&self, chat_id: u32) -> Result<()> {
        self.mutate(|inner, _events| {
            inner.memberships.retain(|&(c, _)| c != chat_id);
        })
        .await;
        Ok(())
    }

    async fn is_contact_in_chat(&self, chat_id: u32, contact_id: u32) -> Result<bool> {
        Ok(self
            .read(|inner| inner.memberships.contains(&(chat_id, contact_id)))
            .await)
    }

    async fn chat_member_ids(&self, chat_id: u32) -> Result<Vec<u32>> {
        Ok(self
            .read(|inner| {
                inner
                    .memberships
                    .iter()
                    .filter(|&&(c, _)| c == chat_id)
                    .map(|&(_, contact_id)| contact_id)
                    .collect()
            })
            .await)
    }

    async fn is_group_left(&self, grpid: &str) -> Result<bool> {
        Ok(self.read(|inner| inner.left_groups.contains(grpid)).await)
    }

    async fn mark_group_left(&self, grpid: &str, left: bool) -> Result<()> {
        self.mutate(|inner, _events| {
            if left {
                inner.left_groups.insert(grpid.to_string());
            } else {
                inner.left_groups.remove(grpid);
            }
        })
        .await;
        Ok(())
    }

    async fn lookup_single_chat(&self, contact_id: u32) -> Result<Option<u32>> {
        Ok(self
            .read(|inner| inner.single_chat_by_contact.get(&contact_id).copied())
            .await)
    }

    async fn create_single_chat(&self, contact_id: u32, name: &str) -> Result<u32> {
        let id = self
            .mutate(|inner, _events| {
                let id = inner.next_chat_id;
                inner.next_chat_id += 1;
                inner.chats.insert(
                    id,
                    ChatRow {
                        kind: ChatKind::Single,
                        name: name.to_string(),
                        grpid: None,
                        blocked: false,
                        protected: false,
                    },
                );
                inner.single_chat_by_contact.insert(contact_id, id);
                inner.memberships.insert((id, contact_id));
                id
            })
            .await;
        Ok(id)
    }

    async fn insert_message(&self, msg: NewMessage) -> Result<u32> {
        let id = self
            .mutate(|inner, _events| {
                let id = inner.next_message_id;
                inner.next_message_id += 1;
                inner.messages_by_rfc724.insert(msg.rfc724_mid.clone(), id);
                inner.messages.insert(
                    id,
                    MessageRow {
                        id,
                        rfc724_mid: msg.rfc724_mid,
                        server_folder: msg.server_folder,
                        server_uid: msg.server_uid,
                        chat_id: msg.chat_id,
                        from_id: msg.from_id,
                        to_id: msg.to_id,
                        ts: msg.ts,
                        msg_type: msg.msg_type,
                        state: msg.state,
                        is_msgr: msg.is_msgr,
                        text: msg.text,
                        text_raw: msg.text_raw,
                        param: msg.param,
                        bytes: msg.bytes,
                    },
                );
                id
            })
            .await;
        Ok(id)
    }

    async fn rfc724_mid_exists(&self, rfc724_mid: &str) -> Result<Option<MessageRow>> {
        Ok(self
            .read(|inner| {
                inner
                    .messages_by_rfc724
                    .get(rfc724_mid)
                    .and_then(|id| inner.messages.get(id))
                    .cloned()
            })
            .await)
    }

    async fn update_server_uid(&self, rfc724_mid: &str, folder: &str, uid: u32) -> Result<()> {
        self.mutate(|inner, _events| {
            if let Some(&id) = inner.messages_by_rfc724.get(rfc724_mid) {
                if let Some(row) = inner.messages.get_mut(&id) {
                    row.server_folder = folder.to_string();
                    row.server_uid = uid;
                }
            }
        })
        .await;
        Ok(())
    }

    async fn last_ts_in_chat_from_other_sender(
        &self,
        chat_id: u32,
        from_id: u32,
    ) -> Result<Option<i64>> {
        Ok(self
            .read(|inner| {
                inner
                    .messages
                    .values()
                    .filter(|m| m.chat_id == chat_id && m.from_id != from_id)
                    .map(|m| m.ts)
                    .max()
            })
            .await)
    }

    async fn emit(&self, event: EventType) {
        self.mutate(|_inner, events| events.push(event)).await;
    }

    async fn record_mdn(&self, msg_id: u32, contact_id: u32) -> Result<bool> {
        Ok(self
            .mutate(|inner, _events| {
                if !inner.mdns.insert((msg_id, contact_id)) {
                    return false;
                }
                !inner
                    .mdns
                    .iter()
                    .any(|&(m, c)| m == msg_id && c != contact_id)
            })
            .await)
    }

    async fn get_peerstate(&self, addr: &str) -> Result<Option<Peerstate>> {
        Ok(self
            .read(|inner| inner.peerstates.get(&addr.to_lowercase()).cloned())
            .await)
    }

    async fn save_peerstate(&self, peerstate: &Peerstate) -> Result<()> {
        let peerstate = peerstate.clone();
        self.mutate(|inner, _events| {
            inner
                .peerstates
                .insert(peerstate.addr.to_lowercase(), peerstate);
        })
        .await;
        Ok(())
    }
}

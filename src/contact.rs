//! Contact resolution (spec §4.E): turning an observed `(name, addr)` pair
//! from a MIME header into a durable contact id, and address-list-wide
//! policy (RFC 2047 decoding, self-address detection, whitespace
//! normalization) on top of that.

use std::sync::Arc;

use anyhow::Result;
use encoded_words::{decode, EncodingFlag};
use mailparse::{addrparse, MailAddr};
use secmail_contact_tools::{addr_cmp, addr_normalize, may_be_valid_addr, sanitize_name_and_addr};

use crate::constants::CONTACT_ID_SELF;
use crate::store::Store;

/// A contact's provenance, used to resolve conflicting name/address
/// observations and to decide whether a contact is "known enough" to
/// auto-create a 1:1 chat with.
///
/// Ordered lowest to highest per spec §4.E; a contact's stored origin is the
/// max ever observed. This total order is the one the specification states
/// explicitly, which differs from historical Delta Chat's bitmask values —
/// see `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Origin {
    #[default]
    Unknown,
    IncomingUnknownFrom,
    IncomingUnknownCc,
    IncomingUnknownTo,
    IncomingCc,
    IncomingTo,
    IncomingReplyTo,
    OutgoingBcc,
    OutgoingCc,
    OutgoingTo,
    CreateChat,
    Internal,
    AddressBook,
    SecurejoinInvited,
    SecurejoinJoined,
    ManuallyCreated,
}

impl Origin {
    /// A contact this well-known may be offered in address-completion UIs
    /// and have a 1:1 chat auto-created for it.
    pub fn is_known(self) -> bool {
        self >= Origin::IncomingReplyTo
    }
}

/// One contact row (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: u32,
    pub addr: String,
    pub name: Option<String>,
    pub origin: Origin,
    pub blocked: bool,
}

/// Result of resolving one address-list header (`To`, `Cc`, `From`, ...)
/// against the store.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAddressList {
    pub contact_ids: Vec<u32>,
    /// Set if the list contained the account's own configured address.
    pub contains_self: bool,
}

/// Upserts one observed `(name, addr)` pair at `origin`, applying spec
/// §4.E's policy: addresses are compared case-insensitively after
/// normalization; self is recognized and skipped; an existing contact's
/// origin only ever increases, and its name is only overwritten when the
/// new observation's origin is at or above the stored one.
pub async fn add_or_lookup(
    store: &dyn Store,
    self_addr: &str,
    name: &str,
    addr: &str,
    origin: Origin,
) -> Result<Option<u32>> {
    if addr.is_empty() {
        return Ok(None);
    }
    let (name, addr) = sanitize_name_and_addr(name, addr);
    let addr = addr_normalize(&addr);
    if addr_cmp(&addr, self_addr) {
        return Ok(None);
    }
    if !may_be_valid_addr(&addr) {
        return Ok(None);
    }
    let name = if name.is_empty() { None } else { Some(name) };
    let id = store.upsert_contact(&addr, name.as_deref(), origin).await?;
    Ok(Some(id))
}

/// Decodes an RFC 2047 encoded word if `s` looks like one, else returns it
/// unchanged. Non-decodable input falls back to the raw string rather than
/// failing the whole resolution.
fn decode_display_name(s: &str) -> String {
    if s.starts_with("=?") && s.ends_with("?=") {
        decode(s, EncodingFlag::Strict).unwrap_or_else(|_| s.to_string())
    } else {
        s.to_string()
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

async fn resolve_one(
    store: &dyn Store,
    self_addr: &str,
    display_name: &str,
    addr: &str,
    origin: Origin,
    result: &mut ResolvedAddressList,
) -> Result<()> {
    let display_name = normalize_whitespace(&decode_display_name(display_name));
    if addr_cmp(addr, self_addr) {
        result.contains_self = true;
        return Ok(());
    }
    if let Some(id) = add_or_lookup(store, self_addr, &display_name, addr, origin).await? {
        result.contact_ids.push(id);
    }
    Ok(())
}

/// Resolves a full address-list header value (e.g. the raw `To:` field
/// body) into contact ids, applying `origin` to every address found.
/// Addresses equal to `self_addr` are recognized via `contains_self`
/// instead of being turned into a contact (spec §4.E `check_self`).
pub async fn resolve_address_list(
    store: &dyn Store,
    self_addr: &str,
    header_value: &str,
    origin: Origin,
) -> Result<ResolvedAddressList> {
    let mut result = ResolvedAddressList::default();
    let Ok(addrs) = addrparse(header_value) else {
        return Ok(result);
    };
    for mailaddr in addrs.iter() {
        match mailaddr {
            MailAddr::Single(single) => {
                resolve_one(
                    store,
                    self_addr,
                    single.display_name.as_deref().unwrap_or(""),
                    &single.addr,
                    origin,
                    &mut result,
                )
                .await?;
            }
            MailAddr::Group(group) => {
                for single in &group.addrs {
                    resolve_one(
                        store,
                        self_addr,
                        single.display_name.as_deref().unwrap_or(""),
                        &single.addr,
                        origin,
                        &mut result,
                    )
                    .await?;
                }
            }
        }
    }
    Ok(result)
}

/// Whether `contact_id` is the reserved self-contact.
pub fn is_self(contact_id: u32) -> bool {
    contact_id == CONTACT_ID_SELF
}

/// Convenience wrapper bundling a store handle with the account's own
/// address, so callers don't have to thread `self_addr` through every call.
#[derive(Clone)]
pub struct ContactResolver {
    store: Arc<dyn Store>,
    self_addr: String,
}

impl ContactResolver {
    pub fn new(store: Arc<dyn Store>, self_addr: String) -> Self {
        Self { store, self_addr }
    }

    pub async fn resolve_address_list(
        &self,
        header_value: &str,
        origin: Origin,
    ) -> Result<ResolvedAddressList> {
        resolve_address_list(&*self.store, &self.self_addr, header_value, origin).await
    }

    pub async fn add_or_lookup(
        &self,
        name: &str,
        addr: &str,
        origin: Origin,
    ) -> Result<Option<u32>> {
        add_or_lookup(&*self.store, &self.self_addr, name, addr, origin).await
    }
}

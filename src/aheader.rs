//! Autocrypt header parsing and rendering.
//!
//! See <https://autocrypt.org/level1.html#the-autocrypt-header>.

use std::collections::BTreeMap;
use std::{fmt, str};

use anyhow::{bail, Context as _, Error, Result};

use secmail_contact_tools::addr_cmp;

use crate::headerdef::{HeaderDef, HeaderDefMap};
use crate::key::{DcKey, SignedPublicKey};

/// The sender's stated willingness to receive encrypted mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptPreference {
    NoPreference,
    Mutual,
    /// Internal-only: never produced by [`EncryptPreference::from_str`],
    /// used when a peer's Autocrypt state needs to be torn down.
    Reset,
}

impl Default for EncryptPreference {
    fn default() -> Self {
        EncryptPreference::NoPreference
    }
}

impl fmt::Display for EncryptPreference {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            EncryptPreference::Mutual => write!(fmt, "mutual"),
            EncryptPreference::NoPreference => write!(fmt, "nopreference"),
            EncryptPreference::Reset => write!(fmt, "reset"),
        }
    }
}

impl str::FromStr for EncryptPreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mutual" => Ok(EncryptPreference::Mutual),
            "nopreference" => Ok(EncryptPreference::NoPreference),
            _ => bail!("cannot parse encryption preference {}", s),
        }
    }
}

/// A parsed `Autocrypt:` header.
#[derive(Debug, Clone)]
pub struct Aheader {
    pub addr: String,
    pub public_key: SignedPublicKey,
    pub prefer_encrypt: EncryptPreference,
}

impl Aheader {
    pub fn new(addr: String, public_key: SignedPublicKey, prefer_encrypt: EncryptPreference) -> Self {
        Aheader {
            addr,
            public_key,
            prefer_encrypt,
        }
    }

    /// Parses the `Autocrypt` header out of `headers`, if present, and
    /// checks its `addr` attribute matches the message's `From`.
    pub fn from_headers(wanted_from: &str, headers: &[mailparse::MailHeader<'_>]) -> Result<Option<Self>> {
        if let Some(value) = headers.get_header_value(HeaderDef::Autocrypt) {
            let header = Self::from_str(&value)?;
            if !addr_cmp(&header.addr, wanted_from) {
                bail!(
                    "Autocrypt header address {:?} is not {:?}",
                    header.addr,
                    wanted_from
                );
            }
            Ok(Some(header))
        } else {
            Ok(None)
        }
    }
}

impl fmt::Display for Aheader {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "addr={};", self.addr)?;
        if self.prefer_encrypt == EncryptPreference::Mutual {
            write!(fmt, " prefer-encrypt=mutual;")?;
        }

        // Inserts a space every 78 columns so RFC 5322 folding has somewhere
        // to break the line.
        let keydata = self.public_key.to_base64().chars().enumerate().fold(
            String::new(),
            |mut res, (i, c)| {
                if i % 78 == 78 - "keydata=".len() {
                    res.push(' ')
                }
                res.push(c);
                res
            },
        );
        write!(fmt, " keydata={}", keydata)
    }
}

impl str::FromStr for Aheader {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut attributes: BTreeMap<String, String> = s
            .split(';')
            .filter_map(|a| {
                let attribute: Vec<&str> = a.trim().splitn(2, '=').collect();
                match &attribute[..] {
                    [key, value] => Some((key.trim().to_string(), value.trim().to_string())),
                    _ => None,
                }
            })
            .collect();

        let addr = attributes.remove("addr").context("Autocrypt header has no addr")?;

        let public_key: SignedPublicKey = attributes
            .remove("keydata")
            .context("keydata attribute is not found")
            .and_then(|raw| SignedPublicKey::from_base64(&raw).context("autocrypt key cannot be decoded"))
            .and_then(|key| {
                key.verify()
                    .and(Ok(key))
                    .context("autocrypt key cannot be verified")
            })?;

        let prefer_encrypt = attributes
            .remove("prefer-encrypt")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default();

        // Autocrypt Level 0: unknown attributes starting with an underscore
        // are safely ignorable; anything else invalidates the header.
        if attributes.keys().any(|k| !k.starts_with('_')) {
            bail!("unknown Autocrypt attribute found");
        }

        Ok(Aheader {
            addr,
            public_key,
            prefer_encrypt,
        })
    }
}

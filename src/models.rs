//! Defines the core data structures used by the advisor crawler.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// One data row of the listing table, before its detail page is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ListingRow {
    /// The advisor's name (first cell).
    pub name: String,
    /// The advisory firm (second cell).
    pub firm: String,
    /// Registered seat text (third cell), if the cell had any text.
    pub seat: Option<String>,
    /// Absolute detail-page URL from the fourth cell's link, if present.
    pub detail_url: Option<Url>,
}

/// Whether the detail page carried an (obfuscated) email address.
///
/// Serialized with the register's own labels. Deserialization coerces any
/// other value to `No`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(from = "String")]
pub(crate) enum EmailPresence {
    #[serde(rename = "Ja")]
    Yes,
    #[default]
    #[serde(rename = "Nein")]
    No,
}

impl EmailPresence {
    /// The token the register uses for "yes".
    pub(crate) const YES_TOKEN: &'static str = "Ja";

    /// Coerces a raw flag value: only the exact yes-token maps to `Yes`.
    pub(crate) fn from_token(raw: &str) -> Self {
        if raw == Self::YES_TOKEN {
            EmailPresence::Yes
        } else {
            EmailPresence::No
        }
    }

    pub(crate) fn as_token(self) -> &'static str {
        match self {
            EmailPresence::Yes => Self::YES_TOKEN,
            EmailPresence::No => "Nein",
        }
    }
}

impl From<String> for EmailPresence {
    fn from(raw: String) -> Self {
        Self::from_token(&raw)
    }
}

impl fmt::Display for EmailPresence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// A single advisor as exported. Field order is the export column order.
///
/// Every field exists from construction; extraction steps only overwrite
/// the ones they find.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AdvisorRecord {
    pub name: String,
    pub firm: String,
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub phone: String,
    pub fax: String,
    pub email_present: EmailPresence,
    /// Opaque reference taken from the email image; not an address.
    pub email_image_id: String,
    pub website: String,
    /// Numeric identifier the register assigns, read from the detail URL.
    pub site_id: String,
    pub detail_url: String,
}

impl AdvisorRecord {
    /// Starts a record from a listing row; contact fields stay empty until
    /// the detail page is processed.
    pub(crate) fn from_listing(row: &ListingRow) -> Self {
        AdvisorRecord {
            name: row.name.clone(),
            firm: row.firm.clone(),
            detail_url: row
                .detail_url
                .as_ref()
                .map(Url::to_string)
                .unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// The outcome of fetching one URL: final address, status and body.
#[derive(Debug, Clone)]
pub(crate) struct FetchedPage {
    /// The URL after any redirects.
    pub url: Url,
    pub status: u16,
    pub body: String,
}

impl FetchedPage {
    pub(crate) fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

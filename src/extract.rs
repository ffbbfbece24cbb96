//! Field extraction for listing rows and advisor detail pages.
//!
//! Everything here is pure: HTML in, fields out. Pattern misses leave the
//! target field untouched; only structural problems are reported as errors.

use crate::error::{AppError, Result};
use crate::models::{AdvisorRecord, EmailPresence, FetchedPage, ListingRow};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Substring identifying the image the register renders email addresses into.
pub(crate) const EMAIL_IMAGE_MARKER: &str = "m2i";

/// Minimum number of cells a listing row needs to count as a data row.
pub(crate) const MIN_LISTING_CELLS: usize = 4;

static LISTING_ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.ergebnisListe > tbody > tr").unwrap());
static CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static DETAIL_REGION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.bereich").unwrap());
static EMAIL_IMAGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(&format!("img[src*=\"{}\"]", EMAIL_IMAGE_MARKER)).unwrap());
static HTTP_LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href*=\"http\"]").unwrap());

static POSTAL_PREFIX_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{5}").unwrap());
// The phone capture runs up to the next 'F' (start of "Fax"), the fax
// capture up to the next 'E' (start of "E-Mail"). Labels out of that order
// over-capture.
static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"Tel\.: ([^F]+)").unwrap());
static FAX_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"Fax: ([^E]+)").unwrap());
static IMAGE_NR_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"nr=([0-9]+)").unwrap());
static SITE_ID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"id=([0-9]+)").unwrap());

/// Normalizes a text fragment: `&nbsp;` becomes a space, the ends are
/// trimmed and inner whitespace runs collapse to one space.
pub(crate) fn clean_text(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn element_text(element: &ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

/// Parses the listing page and extracts every row after the header row.
///
/// Each entry is `Ok(None)` for a non-data row, `Ok(Some(_))` for a data row
/// and `Err(_)` for a row whose structure could not be interpreted.
pub(crate) fn parse_listing(body: &str, page_url: &Url) -> Vec<Result<Option<ListingRow>>> {
    let document = Html::parse_document(body);
    let rows: Vec<_> = document
        .select(&LISTING_ROW_SELECTOR)
        .skip(1)
        .map(|row| extract_listing_row(&row, page_url))
        .collect();
    tracing::debug!(target: "extract_task", "Listing page {} has {} rows after the header.", page_url, rows.len());
    rows
}

/// Extracts name, firm, seat and detail link from one table row.
///
/// Rows with fewer than four cells are not data rows and yield `None`.
pub(crate) fn extract_listing_row(row: &ElementRef<'_>, page_url: &Url) -> Result<Option<ListingRow>> {
    let cells: Vec<ElementRef<'_>> = row.select(&CELL_SELECTOR).collect();
    if cells.len() < MIN_LISTING_CELLS {
        return Ok(None);
    }

    let seat = element_text(&cells[2]);
    let detail_url = match cells[3]
        .select(&LINK_SELECTOR)
        .next()
        .and_then(|link| link.value().attr("href"))
    {
        Some(href) => Some(page_url.join(href.trim()).map_err(|e| {
            AppError::Extraction(format!("Cannot resolve detail link '{}': {}", href, e))
        })?),
        None => None,
    };

    Ok(Some(ListingRow {
        name: element_text(&cells[0]),
        firm: element_text(&cells[1]),
        seat: if seat.is_empty() { None } else { Some(seat) },
        detail_url,
    }))
}

/// Fills the contact fields of `record` from a fetched detail page.
///
/// `site_domain` is the register's own domain; links to it are never taken
/// as the advisor's website.
pub(crate) fn extract_detail_fields(
    record: &mut AdvisorRecord,
    page: &FetchedPage,
    site_domain: &str,
) -> Result<()> {
    let document = Html::parse_document(&page.body);
    let regions: Vec<ElementRef<'_>> = document.select(&DETAIL_REGION_SELECTOR).collect();
    if regions.is_empty() {
        return Err(AppError::Extraction(format!(
            "No contact region on detail page {}",
            page.url
        )));
    }

    let fragments: Vec<String> = regions
        .iter()
        .flat_map(|region| region.text())
        .map(clean_text)
        .filter(|t| !t.is_empty())
        .collect();
    let content = fragments.join(" ");

    if let Some((street, postal_code, city)) = find_address(&fragments) {
        if let Some(street) = street {
            record.street = street;
        }
        record.postal_code = postal_code;
        record.city = city;
    }
    if let Some(phone) = capture_clean(&PHONE_REGEX, &content) {
        record.phone = phone;
    }
    if let Some(fax) = capture_clean(&FAX_REGEX, &content) {
        record.fax = fax;
    }

    if let Some(src) = regions
        .iter()
        .find_map(|region| region.select(&EMAIL_IMAGE_SELECTOR).next())
        .map(|img| img.value().attr("src").unwrap_or_default())
    {
        record.email_present = EmailPresence::Yes;
        if let Some(nr) = capture_clean(&IMAGE_NR_REGEX, src) {
            record.email_image_id = nr;
        }
    }

    if let Some(website) = regions
        .iter()
        .flat_map(|region| region.select(&HTTP_LINK_SELECTOR))
        .filter_map(|link| link.value().attr("href"))
        .find(|href| !href.contains(site_domain))
    {
        record.website = website.trim().to_string();
    }

    if let Some(id) = capture_clean(&SITE_ID_REGEX, page.url.as_str()) {
        record.site_id = id;
    }

    tracing::debug!(target: "extract_task", "Extracted contact details for: {}", record.name);
    Ok(())
}

/// Finds the first fragment starting with five digits and returns
/// (preceding fragment as street, postal code, city).
fn find_address(fragments: &[String]) -> Option<(Option<String>, String, String)> {
    let index = fragments
        .iter()
        .position(|text| POSTAL_PREFIX_REGEX.is_match(text))?;
    let text = &fragments[index];
    let street = index.checked_sub(1).map(|i| fragments[i].clone());
    Some((street, text[..5].to_string(), text[5..].trim().to_string()))
}

fn capture_clean(regex: &Regex, haystack: &str) -> Option<String> {
    regex
        .captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| clean_text(m.as_str()))
}

//! Validation and normalization of extracted advisor records.

use crate::error::{AppError, Result};
use crate::extract::clean_text;
use crate::models::AdvisorRecord;

/// Checks a raw record and repairs what can be repaired.
///
/// Only an empty name rejects the record. A malformed postal code is
/// dropped with a warning and the website gets an explicit scheme.
pub(crate) fn validate(mut record: AdvisorRecord) -> Result<AdvisorRecord> {
    record.name = clean_text(&record.name);
    if record.name.is_empty() {
        return Err(AppError::Validation(format!(
            "Record without advisor name (detail page: {})",
            if record.detail_url.is_empty() { "unknown" } else { record.detail_url.as_str() }
        )));
    }

    for field in [
        &mut record.firm,
        &mut record.street,
        &mut record.postal_code,
        &mut record.city,
        &mut record.phone,
        &mut record.fax,
        &mut record.email_image_id,
        &mut record.website,
        &mut record.site_id,
    ] {
        *field = field.trim().to_string();
    }

    if !record.postal_code.is_empty() && !is_postal_code(&record.postal_code) {
        tracing::warn!(target: "validate_task",
            "Invalid postal code format for {}: {}",
            record.name,
            record.postal_code
        );
        record.postal_code.clear();
    }

    record.website = normalize_website(&record.website);

    Ok(record)
}

/// Exactly five ASCII digits.
pub(crate) fn is_postal_code(value: &str) -> bool {
    value.len() == 5 && value.bytes().all(|b| b.is_ascii_digit())
}

/// Prefixes `https://` when a non-empty website lacks an explicit scheme.
pub(crate) fn normalize_website(website: &str) -> String {
    if website.is_empty() || website.starts_with("http://") || website.starts_with("https://") {
        website.to_string()
    } else {
        format!("https://{}", website)
    }
}

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::AppError;

pub fn now_rfc3339_utc() -> Result<String, AppError> {
    OffsetDateTime::now_utc().format(&Rfc3339).map_err(|e| {
        AppError::new("CLOCK_FORMAT_FAILED", "Failed to format time").with_details(e.to_string())
    })
}

/// Accepts only full RFC 3339 timestamps.
pub fn is_rfc3339(s: &str) -> bool {
    OffsetDateTime::parse(s, &Rfc3339).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_rfc3339() {
        let now = now_rfc3339_utc().expect("now");
        assert!(is_rfc3339(&now));
        assert!(!is_rfc3339("2026-02-10"));
    }
}

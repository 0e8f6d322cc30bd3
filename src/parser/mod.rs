pub mod profile;
pub mod structured;

use crate::error::ExtractError;
pub use profile::ProfileRecord;

/// Two-step extraction: page HTML → ld+json document → profile record.
pub fn parse_profile(html: &str) -> Result<ProfileRecord, ExtractError> {
    let data = structured::structured_data(html)?;
    profile::refine_profile(&data)
}

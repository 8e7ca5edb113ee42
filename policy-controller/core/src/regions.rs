use std::collections::BTreeSet;

/// A deduplicated, lexicographically ordered set of region identifiers.
pub type RegionSet = BTreeSet<String>;

pub const SEPARATOR: char = ',';

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRegionFormat {
    #[error("region identifier must not be empty")]
    Empty,

    #[error("region identifier {0:?} must not contain ','")]
    ContainsSeparator(String),

    #[error("region identifier {0:?} must not contain whitespace")]
    ContainsWhitespace(String),
}

/// Encodes a set of regions as a single comma-joined value.
///
/// The output is sorted so that equal sets always encode identically.
pub fn encode<'r, I>(regions: I) -> Result<String, InvalidRegionFormat>
where
    I: IntoIterator<Item = &'r String>,
{
    let mut sorted = BTreeSet::new();
    for region in regions {
        validate(region)?;
        sorted.insert(region.as_str());
    }

    let mut value = String::new();
    for region in sorted {
        if !value.is_empty() {
            value.push(SEPARATOR);
        }
        value.push_str(region);
    }
    Ok(value)
}

/// Decodes a comma-joined value, trimming whitespace and dropping empty
/// elements.
pub fn decode(value: &str) -> RegionSet {
    value
        .split(SEPARATOR)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub fn validate(region: &str) -> Result<(), InvalidRegionFormat> {
    if region.is_empty() {
        return Err(InvalidRegionFormat::Empty);
    }
    if region.contains(SEPARATOR) {
        return Err(InvalidRegionFormat::ContainsSeparator(region.to_string()));
    }
    if region.chars().any(char::is_whitespace) {
        return Err(InvalidRegionFormat::ContainsWhitespace(region.to_string()));
    }
    Ok(())
}

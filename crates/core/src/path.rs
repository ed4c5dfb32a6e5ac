use crate::error::{HubError, HubResult};

/// Validate a single path segment (spec §6 "Naming"): non-empty, no `/`.
pub fn validate_segment(segment: &str) -> HubResult<()> {
    if segment.is_empty() {
        return Err(HubError::Malformed("path segment must not be empty".into()));
    }
    if segment.contains('/') {
        return Err(HubError::Malformed(format!(
            "path segment `{segment}` must not contain `/`"
        )));
    }
    Ok(())
}

/// Split an absolute path (`/a/b/c`) into validated segments, checking the
/// full path against `max_len`.
pub fn split_absolute(path: &str, max_len: usize) -> HubResult<Vec<String>> {
    if path.len() > max_len {
        return Err(HubError::Overflow(format!(
            "path `{path}` exceeds max length {max_len}"
        )));
    }
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        validate_segment(segment)?;
        segments.push(segment.to_string());
    }
    Ok(segments)
}

pub const OBS_PREFIX: &str = "obs";

pub fn is_under_obs(segments: &[String]) -> bool {
    segments.first().map(|s| s.as_str()) == Some(OBS_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_validates() {
        let segs = split_absolute("/a/b/c", 256).unwrap();
        assert_eq!(segs, vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_embedded_slash() {
        // Can't construct via split_absolute (slash is the separator), but
        // validate_segment must reject it directly for callers building
        // segments from other sources (e.g. a single path component).
        assert!(validate_segment("a/b").is_err());
    }

    #[test]
    fn rejects_overlong_path() {
        let long = format!("/{}", "a".repeat(300));
        assert!(matches!(
            split_absolute(&long, 256),
            Err(HubError::Overflow(_))
        ));
    }

    #[test]
    fn detects_obs_prefix() {
        assert!(is_under_obs(&["obs".to_string(), "hot".to_string()]));
        assert!(!is_under_obs(&["a".to_string()]));
    }
}

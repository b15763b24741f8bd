//! Session id normalization and device id derivation.

use crate::error::SessionError;

/// Trims `raw`, then rejects empty ids, `.`/`..`, and any path
/// separator — preventing the id from escaping `<output_dir>/<id>/`.
pub fn normalize_session_id(raw: &str) -> Result<String, SessionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return Err(SessionError::InvalidId(raw.to_string()));
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(SessionError::InvalidId(raw.to_string()));
    }
    Ok(trimmed.to_string())
}

/// `device_id` is the second `_`-separated field of `session_id`, or
/// `"unknown"` when there is no `_` at all (e.g. `cam_device42_20260101`
/// -> `device42`).
pub fn derive_device_id(session_id: &str) -> String {
    if !session_id.contains('_') {
        return "unknown".to_string();
    }
    session_id
        .splitn(3, '_')
        .nth(1)
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_dot_ids() {
        assert!(normalize_session_id("").is_err());
        assert!(normalize_session_id("  ").is_err());
        assert!(normalize_session_id(".").is_err());
        assert!(normalize_session_id("..").is_err());
    }

    #[test]
    fn rejects_path_separators() {
        assert!(normalize_session_id("a/b").is_err());
        assert!(normalize_session_id("a\\b").is_err());
    }

    #[test]
    fn trims_and_accepts_plain_ids() {
        assert_eq!(normalize_session_id("  cam1_dev_20260101  ").unwrap(), "cam1_dev_20260101");
    }

    #[test]
    fn device_id_takes_second_underscore_field() {
        assert_eq!(derive_device_id("cam_device42_20260101"), "device42");
    }

    #[test]
    fn device_id_falls_back_to_unknown() {
        assert_eq!(derive_device_id("no-underscore-here"), "unknown");
    }
}

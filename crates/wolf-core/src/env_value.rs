//! Normalization for values supplied through process environment variables.

/// Trims `raw`, strips one layer of matching single or double quotes, and
/// returns `None` when nothing is left.
///
/// Deployment tooling frequently writes `KEY="value"` verbatim into the
/// environment, so the quotes arrive as part of the value.
pub fn normalize_env_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let unquoted = strip_matching_quotes(trimmed).trim();
    if unquoted.is_empty() {
        None
    } else {
        Some(unquoted.to_string())
    }
}

fn strip_matching_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::normalize_env_value;

    #[test]
    fn unit_normalize_env_value_strips_matching_quotes() {
        assert_eq!(
            normalize_env_value("\"folder-123\""),
            Some("folder-123".to_string())
        );
        assert_eq!(
            normalize_env_value("  'persistent' "),
            Some("persistent".to_string())
        );
        assert_eq!(normalize_env_value("plain"), Some("plain".to_string()));
    }

    #[test]
    fn unit_normalize_env_value_keeps_unbalanced_quotes() {
        assert_eq!(normalize_env_value("\"abc'"), Some("\"abc'".to_string()));
        assert_eq!(normalize_env_value("\""), Some("\"".to_string()));
    }

    #[test]
    fn regression_normalize_env_value_treats_quoted_empty_as_absent() {
        assert_eq!(normalize_env_value(""), None);
        assert_eq!(normalize_env_value("   "), None);
        assert_eq!(normalize_env_value("\"\""), None);
        assert_eq!(normalize_env_value("' '"), None);
    }
}

mod gateway;
mod refresher;

pub use gateway::{GrokSettingsClient, SettingsGateway, StepResponse, generate_random_birthdate};
pub use refresher::{
    AccountSettingsRefresher, RefreshFailure, RefreshReport, RefreshSummary, RemediationStep,
    TokenLifecycle, TokenManagerLifecycle, refresh_account_settings_for_tokens,
};

/// Split a stored credential into its `(sso, sso-rw)` cookie values.
///
/// Accepted shapes:
/// - cookie-pair strings (`sso=A;sso-rw=B`, either order, whitespace tolerated;
///   a missing `sso-rw` falls back to the `sso` value);
/// - a lone `sso=A` (the rw value mirrors the sso value);
/// - a bare token `T` → `(T, T)`; an unrecognized single pair (`foo=bar`) is
///   opaque and used unchanged for both.
///
/// Returns `None` for empty input, or for a cookie string that carries no
/// `sso` value at all.
pub fn parse_sso_pair(raw: &str) -> Option<(String, String)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.contains(';') {
        let sso = extract_cookie_value(trimmed, "sso")?;
        let sso_rw = extract_cookie_value(trimmed, "sso-rw").unwrap_or_else(|| sso.clone());
        return Some((sso, sso_rw));
    }

    let sso = trimmed.strip_prefix("sso=").unwrap_or(trimmed).trim();
    if sso.is_empty() {
        return None;
    }
    Some((sso.to_string(), sso.to_string()))
}

/// The canonical stored form of a credential: its `sso` value.
pub fn normalize_sso_token(raw: &str) -> String {
    parse_sso_pair(raw).map(|(sso, _)| sso).unwrap_or_default()
}

fn extract_cookie_value(cookie_str: &str, name: &str) -> Option<String> {
    let needle = format!("{name}=");
    for part in cookie_str.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix(needle.as_str()) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_pair_splits_into_both_values() {
        assert_eq!(
            parse_sso_pair("sso=token-a;sso-rw=token-b"),
            Some(("token-a".to_string(), "token-b".to_string()))
        );
    }

    #[test]
    fn cookie_pair_order_and_whitespace_are_tolerated() {
        assert_eq!(
            parse_sso_pair(" sso-rw=token-b; sso=token-a "),
            Some(("token-a".to_string(), "token-b".to_string()))
        );
    }

    #[test]
    fn lone_sso_cookie_mirrors_into_rw() {
        assert_eq!(
            parse_sso_pair("sso=token-a"),
            Some(("token-a".to_string(), "token-a".to_string()))
        );
    }

    #[test]
    fn bare_token_is_used_for_both_sides() {
        assert_eq!(
            parse_sso_pair("token-a"),
            Some(("token-a".to_string(), "token-a".to_string()))
        );
    }

    #[test]
    fn unrecognized_pair_stays_opaque() {
        assert_eq!(
            parse_sso_pair("foo=bar"),
            Some(("foo=bar".to_string(), "foo=bar".to_string()))
        );
    }

    #[test]
    fn cookie_string_without_sso_is_rejected() {
        assert_eq!(parse_sso_pair("foo=bar; baz=qux"), None);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(parse_sso_pair("   "), None);
    }
}

//! Dynamic-content markers: per-viewer values inside shared page bodies.
//!
//! At capture time the rendered body is scanned for known markers. The
//! values stay in the cached body; only their identity (the literal string
//! found) is recorded. On every hit the marker patterns are re-run against
//! the body and each occurrence is rewritten in place with a value minted
//! for the serving viewer's session, so a token captured from one visitor
//! is never served to another. Substitution is anchored to the surrounding
//! markup; a token value appearing in unrelated prose is left alone.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// One-time security tokens embedded in links/scripts.
static SECURITY_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"name="nonce" value="([A-Za-z0-9]+)""#).expect("security token pattern")
});

/// Form anti-forgery tokens.
static FORM_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"name="csrf_token" value="([A-Za-z0-9+/=_-]+)""#).expect("form token pattern")
});

/// Viewer-identity placeholders rendered into the page chrome.
static VIEWER_FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(data-viewer-field="([a-z_]+)"[^>]*>)([^<]*)<"#).expect("viewer field pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    SecurityToken,
    FormToken,
    ViewerIdentity,
}

/// A recorded marker: the literal value found and, for identity markers,
/// the field it renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicMarker {
    pub kind: MarkerKind,
    pub token: String,
    pub field: Option<String>,
}

/// The set of per-viewer values found in a captured body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicDescriptor {
    pub markers: Vec<DynamicMarker>,
}

impl DynamicDescriptor {
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    fn has_kind(&self, kind: MarkerKind) -> bool {
        self.markers.iter().any(|m| m.kind == kind)
    }
}

/// Mints per-session replacement values at serve time.
///
/// Implemented by the host; an instance is scoped to the serving viewer's
/// session so two viewers never receive the same token.
pub trait TokenMinter: Send + Sync {
    fn mint_security_token(&self) -> String;
    fn mint_form_token(&self) -> String;
    /// Current viewer's value for an identity field; `None` leaves the
    /// captured value in place.
    fn viewer_field(&self, field: &str) -> Option<String>;
}

/// Scan a rendered body for dynamic markers.
pub fn scan(body: &str) -> DynamicDescriptor {
    let mut descriptor = DynamicDescriptor::default();

    for capture in SECURITY_TOKEN_RE.captures_iter(body) {
        push_unique(
            &mut descriptor,
            MarkerKind::SecurityToken,
            &capture[1],
            None,
        );
    }
    for capture in FORM_TOKEN_RE.captures_iter(body) {
        push_unique(&mut descriptor, MarkerKind::FormToken, &capture[1], None);
    }
    for capture in VIEWER_FIELD_RE.captures_iter(body) {
        let value = &capture[3];
        // An empty rendered value has no identity to substitute later.
        if !value.is_empty() {
            push_unique(
                &mut descriptor,
                MarkerKind::ViewerIdentity,
                value,
                Some(&capture[2]),
            );
        }
    }

    descriptor
}

fn push_unique(
    descriptor: &mut DynamicDescriptor,
    kind: MarkerKind,
    token: &str,
    field: Option<&str>,
) {
    if descriptor
        .markers
        .iter()
        .any(|m| m.kind == kind && m.token == token)
    {
        return;
    }
    descriptor.markers.push(DynamicMarker {
        kind,
        token: token.to_string(),
        field: field.map(str::to_string),
    });
}

/// Rewrite every marker occurrence with a value minted for this viewer.
///
/// Re-runs the capture patterns rather than replacing recorded token text,
/// so only values inside the marker markup are touched.
pub fn rehydrate(body: &str, descriptor: &DynamicDescriptor, minter: &dyn TokenMinter) -> String {
    let mut out = body.to_string();

    if descriptor.has_kind(MarkerKind::SecurityToken) {
        out = SECURITY_TOKEN_RE
            .replace_all(&out, |_: &Captures| {
                format!(r#"name="nonce" value="{}""#, minter.mint_security_token())
            })
            .into_owned();
    }
    if descriptor.has_kind(MarkerKind::FormToken) {
        out = FORM_TOKEN_RE
            .replace_all(&out, |_: &Captures| {
                format!(r#"name="csrf_token" value="{}""#, minter.mint_form_token())
            })
            .into_owned();
    }
    if descriptor.has_kind(MarkerKind::ViewerIdentity) {
        out = VIEWER_FIELD_RE
            .replace_all(&out, |caps: &Captures| {
                match minter.viewer_field(&caps[2]) {
                    // Empty captured values were never recorded; keep them.
                    Some(value) if !caps[3].is_empty() => format!("{}{value}<", &caps[1]),
                    _ => caps[0].to_string(),
                }
            })
            .into_owned();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMinter;

    impl TokenMinter for FixedMinter {
        fn mint_security_token(&self) -> String {
            "freshnonce99".to_string()
        }
        fn mint_form_token(&self) -> String {
            "freshcsrf".to_string()
        }
        fn viewer_field(&self, field: &str) -> Option<String> {
            (field == "name").then(|| "Bea".to_string())
        }
    }

    const BODY: &str = concat!(
        r#"<form><input type="hidden" name="nonce" value="abc123def456">"#,
        r#"<input type="hidden" name="csrf_token" value="tok_XYZ-789="></form>"#,
        r#"<span data-viewer-field="name" class="greet">Alva</span>"#,
    );

    #[test]
    fn scan_finds_all_marker_kinds() {
        let descriptor = scan(BODY);
        assert_eq!(descriptor.markers.len(), 3);

        let kinds: Vec<MarkerKind> = descriptor.markers.iter().map(|m| m.kind).collect();
        assert!(kinds.contains(&MarkerKind::SecurityToken));
        assert!(kinds.contains(&MarkerKind::FormToken));
        assert!(kinds.contains(&MarkerKind::ViewerIdentity));
    }

    #[test]
    fn scan_records_values_without_stripping_them() {
        let descriptor = scan(BODY);
        // The body itself is untouched; only identities are recorded.
        assert!(BODY.contains("abc123def456"));
        assert!(descriptor.markers.iter().any(|m| m.token == "abc123def456"));
    }

    #[test]
    fn scan_deduplicates_repeated_tokens() {
        let doubled = format!("{BODY}{BODY}");
        let descriptor = scan(&doubled);
        assert_eq!(descriptor.markers.len(), 3);
    }

    #[test]
    fn rehydrate_swaps_every_marker() {
        let descriptor = scan(BODY);
        let served = rehydrate(BODY, &descriptor, &FixedMinter);

        assert!(!served.contains("abc123def456"));
        assert!(served.contains("freshnonce99"));
        assert!(!served.contains("tok_XYZ-789="));
        assert!(served.contains("freshcsrf"));
        assert!(!served.contains("Alva"));
        assert!(served.contains("Bea"));
    }

    #[test]
    fn rehydrate_leaves_marker_values_in_prose_alone() {
        let body = concat!(
            r#"<span data-viewer-field="name">Alva</span>"#,
            r#"<p>Alva wrote this quiz. nonce value="Alva" is prose too.</p>"#,
        );
        let descriptor = scan(body);
        let served = rehydrate(body, &descriptor, &FixedMinter);

        assert!(served.contains(r#"data-viewer-field="name">Bea<"#));
        // Occurrences outside the marker markup are untouched.
        assert!(served.contains("Alva wrote this quiz"));
        assert!(served.contains(r#"nonce value="Alva" is prose"#));
    }

    #[test]
    fn unknown_viewer_field_keeps_captured_value() {
        let body = r#"<span data-viewer-field="company">Acme</span>"#;
        let descriptor = scan(body);
        let served = rehydrate(body, &descriptor, &FixedMinter);
        assert!(served.contains("Acme"));
    }

    #[test]
    fn plain_body_scans_empty() {
        let descriptor = scan("<p>hello</p>");
        assert!(descriptor.is_empty());
    }
}

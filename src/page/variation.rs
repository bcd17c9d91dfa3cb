//! Variation descriptor: the axes that make one path render differently.

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Device class derived from the user agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
    Tablet,
}

/// A host-registered variation axis evaluated per request.
pub trait VariationAxis: Send + Sync {
    fn name(&self) -> &str;
    fn value(&self, headers: &HeaderMap) -> Option<String>;
}

/// The axes that distinguish two renders of the same path.
///
/// The default descriptor (desktop, plain transport, no locale, no extra
/// axes) is "empty": it contributes nothing to the cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariationDescriptor {
    pub device: DeviceClass,
    pub secure: bool,
    pub locale: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl VariationDescriptor {
    /// Evaluate the built-in axes plus any registered extras.
    pub fn from_request(headers: &HeaderMap, axes: &[std::sync::Arc<dyn VariationAxis>]) -> Self {
        let mut descriptor = Self {
            device: detect_device(headers),
            secure: is_secure(headers),
            locale: detect_locale(headers),
            extra: BTreeMap::new(),
        };
        for axis in axes {
            if let Some(value) = axis.value(headers) {
                descriptor.extra.insert(axis.name().to_string(), value);
            }
        }
        descriptor
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn detect_device(headers: &HeaderMap) -> DeviceClass {
    let Some(ua) = header_str(headers, "user-agent") else {
        return DeviceClass::Desktop;
    };
    // Tablets advertise Mobile too, so check them first.
    if ua.contains("iPad") || ua.contains("Tablet") {
        DeviceClass::Tablet
    } else if ua.contains("Mobile") || ua.contains("Android") {
        DeviceClass::Mobile
    } else {
        DeviceClass::Desktop
    }
}

fn is_secure(headers: &HeaderMap) -> bool {
    header_str(headers, "x-forwarded-proto").is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

fn detect_locale(headers: &HeaderMap) -> Option<String> {
    let raw = header_str(headers, "accept-language")?;
    let first = raw.split(',').next()?.split(';').next()?.trim();
    if first.is_empty() || first == "*" {
        None
    } else {
        Some(first.to_ascii_lowercase())
    }
}

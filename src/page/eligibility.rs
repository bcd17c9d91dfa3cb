//! Page-cache eligibility policy.
//!
//! A page is only eligible when the request is a safe read, outside the
//! excluded paths, carries no personalized session (unless configured
//! otherwise), matches no excluded user agent, and has no query string
//! (unless explicitly allowed).

use std::fmt;

use axum::http::{HeaderMap, Method, Uri};

use crate::config::CacheConfig;

/// Why a request bypassed the page cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    UnsafeMethod,
    ExcludedPath,
    QueryString,
    PersonalizedSession,
    ExcludedUserAgent,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::UnsafeMethod => "unsafe_method",
            Self::ExcludedPath => "excluded_path",
            Self::QueryString => "query_string",
            Self::PersonalizedSession => "personalized_session",
            Self::ExcludedUserAgent => "excluded_user_agent",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct EligibilityPolicy {
    enabled: bool,
    cache_query_strings: bool,
    cache_logged_in: bool,
    excluded_paths: Vec<String>,
    session_cookies: Vec<String>,
    excluded_user_agents: Vec<String>,
}

impl EligibilityPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enable_page_cache,
            cache_query_strings: config.cache_query_strings,
            cache_logged_in: config.cache_logged_in,
            excluded_paths: config.excluded_paths.clone(),
            session_cookies: config.session_cookies.clone(),
            excluded_user_agents: config.excluded_user_agents.clone(),
        }
    }

    pub fn check(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> Result<(), SkipReason> {
        if !self.enabled {
            return Err(SkipReason::Disabled);
        }
        if method != Method::GET && method != Method::HEAD {
            return Err(SkipReason::UnsafeMethod);
        }

        let path = uri.path();
        if self
            .excluded_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return Err(SkipReason::ExcludedPath);
        }

        if !self.cache_query_strings && uri.query().is_some_and(|q| !q.is_empty()) {
            return Err(SkipReason::QueryString);
        }

        if !self.cache_logged_in && self.has_session_cookie(headers) {
            return Err(SkipReason::PersonalizedSession);
        }

        if let Some(ua) = headers.get("user-agent").and_then(|v| v.to_str().ok())
            && self
                .excluded_user_agents
                .iter()
                .any(|needle| ua.contains(needle.as_str()))
        {
            return Err(SkipReason::ExcludedUserAgent);
        }

        Ok(())
    }

    fn has_session_cookie(&self, headers: &HeaderMap) -> bool {
        let Some(cookies) = headers.get("cookie").and_then(|v| v.to_str().ok()) else {
            return false;
        };
        cookies.split(';').any(|pair| {
            let name = pair.split('=').next().unwrap_or("").trim();
            self.session_cookies.iter().any(|c| c == name)
        })
    }
}

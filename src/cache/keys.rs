//! Cache key definitions.
//!
//! Defines `PartitionKind`, the version-tagged `PartitionNames`, and the
//! `RequestKey` entries are stored under.

use std::cmp::Ordering;
use std::fmt;

use axum::http::Method;
use serde::Serialize;
use url::Url;

/// The three resource classes the cache keeps apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    /// App shell routes and icons, populated at install.
    Static,
    /// Documents, images and anything else fetched from the app origin.
    Dynamic,
    /// Responses from the backend API host.
    Api,
}

impl PartitionKind {
    pub const ALL: [PartitionKind; 3] = [
        PartitionKind::Static,
        PartitionKind::Dynamic,
        PartitionKind::Api,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionKind::Static => "static",
            PartitionKind::Dynamic => "dynamic",
            PartitionKind::Api => "api",
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live partition names: `{app}-{kind}-v{version}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
    static_name: String,
    dynamic_name: String,
    api_name: String,
}

impl PartitionNames {
    pub fn new(app_name: &str, version: &str) -> Self {
        let name = |kind: PartitionKind| format!("{app_name}-{}-v{version}", kind.as_str());
        Self {
            static_name: name(PartitionKind::Static),
            dynamic_name: name(PartitionKind::Dynamic),
            api_name: name(PartitionKind::Api),
        }
    }

    pub fn name(&self, kind: PartitionKind) -> &str {
        match kind {
            PartitionKind::Static => &self.static_name,
            PartitionKind::Dynamic => &self.dynamic_name,
            PartitionKind::Api => &self.api_name,
        }
    }

    /// Names in lookup order: static, dynamic, api.
    pub fn all(&self) -> [&str; 3] {
        [&self.static_name, &self.dynamic_name, &self.api_name]
    }

    /// Whether `name` is one of the live partitions.
    pub fn contains(&self, name: &str) -> bool {
        self.all().contains(&name)
    }
}

/// Normalized request identity: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: Method,
    url: Url,
}

impl RequestKey {
    pub fn new(method: Method, mut url: Url) -> Self {
        url.set_fragment(None);
        Self { method, url }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sweep order: URL string, then method.
    pub fn sweep_order(&self, other: &Self) -> Ordering {
        self.url
            .as_str()
            .cmp(other.url.as_str())
            .then_with(|| self.method.as_str().cmp(other.method.as_str()))
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

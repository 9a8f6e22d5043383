//! Request classification.
//!
//! An ordered list of rules; the first rule whose predicate matches picks the
//! strategy and partition. The last rule always matches.

use std::collections::HashSet;

use serde::Serialize;

use crate::cache::{CacheConfig, PartitionKind};
use crate::fetch::{CacheRequest, Destination};

/// How a routed request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    CacheFirst,
    NetworkFirst,
    /// Network-first that answers failed navigations with the offline document.
    NetworkFirstOffline,
    StaleWhileRevalidate,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::CacheFirst => "cache_first",
            StrategyKind::NetworkFirst => "network_first",
            StrategyKind::NetworkFirstOffline => "network_first_offline",
            StrategyKind::StaleWhileRevalidate => "stale_while_revalidate",
        }
    }
}

/// Paths served from the static partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticAssets {
    prefixes: Vec<String>,
    paths: HashSet<String>,
}

impl StaticAssets {
    pub fn new(
        prefixes: impl IntoIterator<Item = String>,
        paths: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            prefixes: prefixes.into_iter().collect(),
            paths: paths.into_iter().collect(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.paths.contains(path) || self.prefixes.iter().any(|prefix| path.starts_with(prefix))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePredicate {
    Destination(Destination),
    StaticAsset(StaticAssets),
    /// Host comparison ignores ASCII case.
    Host(String),
    Always,
}

impl RoutePredicate {
    pub fn matches(&self, request: &CacheRequest) -> bool {
        match self {
            RoutePredicate::Destination(destination) => request.destination == *destination,
            RoutePredicate::StaticAsset(assets) => assets.matches(request.url.path()),
            RoutePredicate::Host(host) => request
                .url
                .host_str()
                .is_some_and(|candidate| candidate.eq_ignore_ascii_case(host)),
            RoutePredicate::Always => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub name: &'static str,
    pub predicate: RoutePredicate,
    pub strategy: StrategyKind,
    pub partition: PartitionKind,
}

impl RouteRule {
    pub fn new(
        name: &'static str,
        predicate: RoutePredicate,
        strategy: StrategyKind,
        partition: PartitionKind,
    ) -> Self {
        Self {
            name,
            predicate,
            strategy,
            partition,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheRouter {
    rules: Vec<RouteRule>,
    fallback: RouteRule,
}

impl CacheRouter {
    /// The booking app's routing table:
    ///
    /// 1. documents: network-first with offline fallback, dynamic
    /// 2. images: cache-first, dynamic
    /// 3. static assets: cache-first, static
    /// 4. API host: stale-while-revalidate, api
    /// 5. anything else: network-first, dynamic
    pub fn from_config(config: &CacheConfig) -> Self {
        let assets = StaticAssets::new(
            config.static_prefixes.iter().cloned(),
            config.static_manifest.iter().cloned(),
        );
        Self::new(vec![
            RouteRule::new(
                "document",
                RoutePredicate::Destination(Destination::Document),
                StrategyKind::NetworkFirstOffline,
                PartitionKind::Dynamic,
            ),
            RouteRule::new(
                "image",
                RoutePredicate::Destination(Destination::Image),
                StrategyKind::CacheFirst,
                PartitionKind::Dynamic,
            ),
            RouteRule::new(
                "static_asset",
                RoutePredicate::StaticAsset(assets),
                StrategyKind::CacheFirst,
                PartitionKind::Static,
            ),
            RouteRule::new(
                "api",
                RoutePredicate::Host(config.api_host.clone()),
                StrategyKind::StaleWhileRevalidate,
                PartitionKind::Api,
            ),
        ])
    }

    /// `rules` are tried in order ahead of the network-first fallback.
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self {
            rules,
            fallback: RouteRule::new(
                "fallback",
                RoutePredicate::Always,
                StrategyKind::NetworkFirst,
                PartitionKind::Dynamic,
            ),
        }
    }

    /// Append a rule just ahead of the fallback.
    pub fn push(&mut self, rule: RouteRule) {
        self.rules.push(rule);
    }

    pub fn route(&self, request: &CacheRequest) -> &RouteRule {
        self.rules
            .iter()
            .find(|rule| rule.predicate.matches(request))
            .unwrap_or(&self.fallback)
    }

    /// Rules in evaluation order, fallback last.
    pub fn rules(&self) -> impl Iterator<Item = &RouteRule> {
        self.rules.iter().chain(std::iter::once(&self.fallback))
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    fn router() -> CacheRouter {
        CacheRouter::from_config(&CacheConfig {
            api_host: "api.salon.test".to_string(),
            ..Default::default()
        })
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).expect("valid url")
    }

    #[test]
    fn rule_order_is_fixed() {
        let names: Vec<&str> = router().rules().map(|rule| rule.name).collect();
        assert_eq!(
            names,
            vec!["document", "image", "static_asset", "api", "fallback"]
        );
    }

    #[test]
    fn documents_win_over_static_paths() {
        let router = router();
        let rule = router.route(&CacheRequest::document(url("https://app.test/")));
        assert_eq!(rule.strategy, StrategyKind::NetworkFirstOffline);
        assert_eq!(rule.partition, PartitionKind::Dynamic);
    }

    #[test]
    fn images_use_cache_first_dynamic() {
        let router = router();
        let rule = router.route(&CacheRequest::image(url(
            "https://api.salon.test/storage/v1/avatar.png",
        )));
        assert_eq!(rule.name, "image");
        assert_eq!(rule.strategy, StrategyKind::CacheFirst);
        assert_eq!(rule.partition, PartitionKind::Dynamic);
    }

    #[test]
    fn icons_and_manifest_paths_are_static() {
        let router = router();
        for path in ["/icons/icon-192x192.png", "/favicon.ico", "/manifest.json"] {
            let rule = router.route(&CacheRequest::get(url(&format!("https://app.test{path}"))));
            assert_eq!(rule.partition, PartitionKind::Static, "{path}");
            assert_eq!(rule.strategy, StrategyKind::CacheFirst, "{path}");
        }
    }

    #[test]
    fn api_host_matches_case_insensitively() {
        let router = router();
        let rule = router.route(&CacheRequest::get(url(
            "https://API.salon.test/rest/v1/appointments?select=*",
        )));
        assert_eq!(rule.strategy, StrategyKind::StaleWhileRevalidate);
        assert_eq!(rule.partition, PartitionKind::Api);
    }

    #[test]
    fn unmatched_falls_through_to_network_first() {
        let router = router();
        let rule = router.route(&CacheRequest::get(url("https://app.test/assets/index.js")));
        assert_eq!(rule.name, "fallback");
        assert_eq!(rule.strategy, StrategyKind::NetworkFirst);
        assert_eq!(rule.partition, PartitionKind::Dynamic);
    }

    #[test]
    fn pushed_rules_run_before_fallback() {
        let mut router = router();
        router.push(RouteRule::new(
            "fonts",
            RoutePredicate::Host("fonts.gstatic.com".to_string()),
            StrategyKind::CacheFirst,
            PartitionKind::Static,
        ));
        let rule = router.route(&CacheRequest::get(url("https://fonts.gstatic.com/s/inter.woff2")));
        assert_eq!(rule.name, "fonts");
        assert_eq!(router.rules().last().map(|rule| rule.name), Some("fallback"));
    }
}

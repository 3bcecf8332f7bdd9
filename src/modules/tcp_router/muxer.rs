//! Priority-ordered route set.

use std::sync::Arc;

use tracing::debug;

use super::error::RuleResult;
use super::rule::{parse, ConnData, MatchersTree};
use super::TcpHandler;

/// One registered route: a parsed rule bound to its handler.
struct Route {
    rule: String,
    priority: i32,
    tree: MatchersTree,
    handler: Arc<dyn TcpHandler>,
}

/// A set of routes matched in descending priority order.
///
/// Routes are validated and sorted at registration time; matching is a
/// read-only scan, so a muxer shared behind an `Arc` needs no locking.
#[derive(Default)]
pub struct Muxer {
    routes: Vec<Route>,
}

impl Muxer {
    #[must_use]
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Parse `rule` and register it with `handler`.
    ///
    /// A non-positive `priority` is replaced by the rule text length, so
    /// longer (more specific) rules outrank shorter ones by default.
    /// Ties keep registration order.
    ///
    /// # Errors
    ///
    /// Fails without modifying the route set when the rule does not
    /// parse or carries invalid matcher arguments.
    pub fn add_route(
        &mut self,
        rule: &str,
        priority: i32,
        handler: Arc<dyn TcpHandler>,
    ) -> RuleResult<()> {
        let tree = parse(rule)?;
        let priority = if priority <= 0 {
            i32::try_from(rule.len()).unwrap_or(i32::MAX)
        } else {
            priority
        };

        debug!(rule = %rule, priority, "registering route");

        self.routes.push(Route {
            rule: rule.to_string(),
            priority,
            tree,
            handler,
        });
        // Stable sort keeps registration order among equal priorities.
        self.routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    /// Return the handler of the highest-priority route matching `meta`.
    #[must_use]
    pub fn match_conn(&self, meta: &ConnData) -> Option<Arc<dyn TcpHandler>> {
        self.routes
            .iter()
            .find(|route| route.tree.matches(meta))
            .map(|route| Arc::clone(&route.handler))
    }

    #[must_use]
    pub fn has_routes(&self) -> bool {
        !self.routes.is_empty()
    }

    /// Rules in match order, highest priority first.
    #[must_use]
    pub fn rules(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.rule.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::super::stream::BoxedStream;
    use super::*;

    struct NoopHandler;

    #[async_trait::async_trait]
    impl TcpHandler for NoopHandler {
        async fn serve(&self, _conn: BoxedStream) {}
    }

    fn handler() -> Arc<dyn TcpHandler> {
        Arc::new(NoopHandler)
    }

    fn meta(server_name: &str) -> ConnData {
        let peer: SocketAddr = "10.0.0.1:4242".parse().unwrap();
        ConnData::new(server_name, peer)
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let mut muxer = Muxer::new();
        assert!(muxer.add_route("HostSNI(`*.bar`)", 0, handler()).is_err());
        assert!(!muxer.has_routes());
    }

    #[test]
    fn test_first_match_wins_on_equal_priority() {
        let mut muxer = Muxer::new();
        let first = handler();
        let second = handler();
        muxer
            .add_route("HostSNI(`foo.example`)", 10, Arc::clone(&first))
            .unwrap();
        muxer
            .add_route("HostSNI(`foo.example`)", 10, Arc::clone(&second))
            .unwrap();

        let matched = muxer.match_conn(&meta("foo.example")).unwrap();
        assert!(Arc::ptr_eq(&matched, &first));
    }

    #[test]
    fn test_explicit_priority_overrides_length() {
        let mut muxer = Muxer::new();
        let long = handler();
        let short = handler();
        // The longer rule would win by default; the explicit priority
        // flips the outcome.
        muxer
            .add_route("HostSNI(`foo.example`) || HostSNI(`foo.example`)", 0, long)
            .unwrap();
        muxer
            .add_route("HostSNI(`foo.example`)", 1000, Arc::clone(&short))
            .unwrap();

        let matched = muxer.match_conn(&meta("foo.example")).unwrap();
        assert!(Arc::ptr_eq(&matched, &short));
    }

    #[test]
    fn test_computed_priority_prefers_longer_rule() {
        let mut muxer = Muxer::new();
        let wildcard = handler();
        let specific = handler();
        muxer.add_route("HostSNI(`*`)", 0, wildcard).unwrap();
        muxer
            .add_route("HostSNI(`foo.example`)", 0, Arc::clone(&specific))
            .unwrap();

        let matched = muxer.match_conn(&meta("foo.example")).unwrap();
        assert!(Arc::ptr_eq(&matched, &specific));
        assert_eq!(
            muxer.rules(),
            vec!["HostSNI(`foo.example`)", "HostSNI(`*`)"]
        );
    }

    #[test]
    fn test_match_is_deterministic() {
        let mut muxer = Muxer::new();
        let a = handler();
        let b = handler();
        muxer.add_route("HostSNI(`a.example`)", 0, Arc::clone(&a)).unwrap();
        muxer.add_route("HostSNI(`*`)", 0, b).unwrap();

        for _ in 0..32 {
            let matched = muxer.match_conn(&meta("a.example")).unwrap();
            assert!(Arc::ptr_eq(&matched, &a));
        }
    }

    #[test]
    fn test_no_match() {
        let mut muxer = Muxer::new();
        muxer.add_route("HostSNI(`foo.example`)", 0, handler()).unwrap();
        assert!(muxer.match_conn(&meta("bar.example")).is_none());
        assert!(muxer.match_conn(&meta("")).is_none());
    }
}

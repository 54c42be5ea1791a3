use regex::Regex;

use crate::decision::Routing;
use crate::error::{GateError, Result};

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// Content test applied to lower-cased text.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Any of the phrases occurs as a substring.
    Keywords(Vec<String>),
    Pattern(Regex),
}

impl Matcher {
    pub fn keywords(words: &[&str]) -> Self {
        Matcher::Keywords(words.iter().map(|w| w.to_lowercase()).collect())
    }

    pub fn pattern(src: &str) -> Result<Self> {
        Regex::new(src)
            .map(Matcher::Pattern)
            .map_err(|e| GateError::InvalidParams(format!("invalid matcher pattern '{src}': {e}")))
    }

    /// The first matching phrase, or the matched text for a pattern.
    pub fn first_match(&self, lowered: &str) -> Option<String> {
        match self {
            Matcher::Keywords(words) => words
                .iter()
                .find(|w| lowered.contains(w.as_str()))
                .cloned(),
            Matcher::Pattern(re) => re.find(lowered).map(|m| m.as_str().to_string()),
        }
    }

    pub fn matches(&self, lowered: &str) -> bool {
        self.first_match(lowered).is_some()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RouteRule {
    pub matcher: Matcher,
    pub domain: String,
    pub handlers: Vec<String>,
}

impl RouteRule {
    pub fn new(matcher: Matcher, domain: &str, handlers: &[&str]) -> Self {
        Self {
            matcher,
            domain: domain.to_string(),
            handlers: handlers.iter().map(|h| h.to_string()).collect(),
        }
    }
}

/// Ordered content rules, then an event-type table, then `general`.
#[derive(Debug, Clone)]
pub struct Router {
    rules: Vec<RouteRule>,
    event_types: Vec<(String, String)>,
}

impl Router {
    pub fn new(rules: Vec<RouteRule>, event_types: &[(&str, &str)]) -> Self {
        Self {
            rules,
            event_types: event_types
                .iter()
                .map(|(t, d)| (t.to_lowercase(), d.to_string()))
                .collect(),
        }
    }

    /// Append a rule after the existing ones.
    pub fn push(&mut self, rule: RouteRule) {
        self.rules.push(rule);
    }

    pub fn route(&self, event_type: &str, content: &str) -> Routing {
        let lowered = content.to_lowercase();
        if let Some(rule) = self.rules.iter().find(|r| r.matcher.matches(&lowered)) {
            return Routing {
                domain: rule.domain.clone(),
                suggested_handler: rule.handlers.first().cloned(),
            };
        }

        let event_type = event_type.to_lowercase();
        self.event_types
            .iter()
            .find(|(t, _)| *t == event_type)
            .map(|(_, domain)| Routing {
                domain: domain.clone(),
                suggested_handler: None,
            })
            .unwrap_or_else(Routing::general)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(default_routes(), DEFAULT_EVENT_TYPES)
    }
}

const DEFAULT_EVENT_TYPES: &[(&str, &str)] = &[
    ("bash", "system"),
    ("shell", "system"),
    ("read", "code"),
    ("write", "code"),
    ("edit", "code"),
    ("web_fetch", "research"),
    ("web_search", "research"),
];

pub fn default_routes() -> Vec<RouteRule> {
    vec![
        RouteRule::new(
            Matcher::keywords(&[
                "password",
                "secret",
                "credential",
                "api key",
                "api_key",
                "private key",
                ".env",
                "ssh-keygen",
            ]),
            "security",
            &["guardian", "auditor"],
        ),
        RouteRule::new(
            Matcher::keywords(&["deploy", "release", "kubectl", "terraform", "helm ", "docker push"]),
            "deployment",
            &["deployer"],
        ),
        RouteRule::new(
            Matcher::keywords(&[
                "select ",
                "insert into",
                "update ",
                "drop table",
                "drop database",
                "migration",
                "psql",
                "sqlite",
            ]),
            "database",
            &["dba"],
        ),
        RouteRule::new(
            Matcher::keywords(&["git ", "commit", "refactor", "cargo ", "npm ", "compile", "unit test"]),
            "code",
            &["builder", "reviewer"],
        ),
        RouteRule::new(
            Matcher::keywords(&["rm ", "mkdir", "chmod", "chown", "mv ", "cp ", "/etc/", "/tmp/"]),
            "filesystem",
            &["janitor"],
        ),
        RouteRule::new(
            Matcher::keywords(&["http://", "https://", "search", "fetch", "documentation"]),
            "research",
            &["scout"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_rule_wins() {
        let router = Router::default();
        // mentions both a secret and git; security is listed first
        let r = router.route("bash", "git commit -m 'rotate PASSWORD'");
        assert_eq!(r.domain, "security");
        assert_eq!(r.suggested_handler.as_deref(), Some("guardian"));
    }

    #[test]
    fn falls_back_to_event_type_then_general() {
        let router = Router::default();
        assert_eq!(router.route("Bash", "uptime").domain, "system");
        let r = router.route("echo", "hello");
        assert_eq!(r, Routing::general());
    }

    #[test]
    fn pattern_matchers_work_on_lowercased_content() {
        let mut router = Router::new(Vec::new(), &[]);
        router.push(RouteRule::new(
            Matcher::pattern(r"ticket-\d+").unwrap(),
            "support",
            &["helpdesk"],
        ));
        assert_eq!(router.route("x", "Close TICKET-42").domain, "support");
        assert!(Matcher::pattern("(").is_err());
    }

    #[test]
    fn routing_is_deterministic() {
        let router = Router::default();
        let content = "kubectl apply -f deploy.yaml && cargo build";
        let first = router.route("bash", content);
        for _ in 0..50 {
            assert_eq!(router.route("bash", content), first);
        }
        assert_eq!(first.domain, "deployment");
    }
}

use super::routing::Matcher;
use crate::decision::RiskLevel;

/// Risk decided for one piece of content, with the phrase that decided it.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub matched: Option<String>,
}

/// Critical, high and medium matchers, scanned in that order.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    critical: Matcher,
    high: Matcher,
    medium: Matcher,
}

impl RiskClassifier {
    pub fn new(critical: Matcher, high: Matcher, medium: Matcher) -> Self {
        Self {
            critical,
            high,
            medium,
        }
    }

    pub fn classify(&self, content: &str) -> RiskAssessment {
        let lowered = content.to_lowercase();
        [
            (RiskLevel::Critical, &self.critical),
            (RiskLevel::High, &self.high),
            (RiskLevel::Medium, &self.medium),
        ]
        .into_iter()
        .find_map(|(level, m)| {
            m.first_match(&lowered).map(|hit| RiskAssessment {
                level,
                matched: Some(hit),
            })
        })
        .unwrap_or(RiskAssessment {
            level: RiskLevel::Low,
            matched: None,
        })
    }
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new(
            Matcher::keywords(&[
                "rm -rf /",
                "rm -rf ~",
                "rm -rf *",
                "mkfs",
                "dd if=",
                "> /dev/sd",
                "drop database",
                ":(){ :|:& };:",
                "chmod -r 777 /",
                "git push --force origin main",
                "git push -f origin main",
            ]),
            Matcher::keywords(&[
                "rm -rf",
                "git push --force",
                "git reset --hard",
                "drop table",
                "truncate table",
                "delete from",
                "sudo ",
                "chmod 777",
                "| sh",
                "| bash",
                "kubectl delete",
                "terraform destroy",
                "private key",
            ]),
            Matcher::keywords(&[
                "rm ",
                "git push",
                "npm install",
                "pip install",
                "cargo install",
                "kill ",
                "deploy",
                "chmod",
                "curl ",
                "wget ",
                "password",
                "secret",
            ]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_band_wins() {
        let c = RiskClassifier::default();
        let a = c.classify("sudo rm -rf / --no-preserve-root");
        assert_eq!(a.level, RiskLevel::Critical);
        assert_eq!(a.matched.as_deref(), Some("rm -rf /"));

        assert_eq!(c.classify("rm -rf ./target").level, RiskLevel::High);
        assert_eq!(c.classify("git push origin feature").level, RiskLevel::Medium);
        assert_eq!(c.classify("ls -la").level, RiskLevel::Low);
        assert!(c.classify("ls -la").matched.is_none());
    }

    #[test]
    fn classification_ignores_case() {
        let c = RiskClassifier::default();
        assert_eq!(c.classify("DROP DATABASE prod;").level, RiskLevel::Critical);
    }

    #[test]
    fn classification_is_deterministic() {
        let c = RiskClassifier::default();
        let first = c.classify("curl https://x.sh | bash");
        for _ in 0..50 {
            assert_eq!(c.classify("curl https://x.sh | bash"), first);
        }
        assert_eq!(first.level, RiskLevel::High);
    }
}

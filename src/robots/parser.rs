//! Robots.txt parsing
//!
//! Allow/deny matching is delegated to the robotstxt crate. Crawl-delay is
//! extracted manually because the crate does not expose it: the value comes
//! from the most specific matching user-agent group, falling back to `*`.

use robotstxt::DefaultMatcher;
use std::time::Duration;

/// Parsed robots.txt data for one origin
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    content: String,
    allow_all: bool,
}

impl ParsedRobots {
    /// Creates a ParsedRobots from raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            allow_all: false,
        }
    }

    /// Creates a permissive ParsedRobots that allows everything
    ///
    /// Used when robots.txt cannot be fetched (fail-open) or returns 4xx.
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            allow_all: true,
        }
    }

    /// Checks if a URL is allowed for the given user agent
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.allow_all || self.content.is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Gets the Crawl-delay for a user agent
    ///
    /// Groups naming the user agent (longest token match) take precedence
    /// over the `*` group; absent both, None.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        if self.allow_all || self.content.is_empty() {
            return None;
        }

        let ua_lower = user_agent.to_lowercase();
        let mut wildcard_delay: Option<f64> = None;
        let mut best_match_len = 0usize;
        let mut best_delay: Option<f64> = None;

        let mut current_agents: Vec<String> = Vec::new();
        let mut in_group_body = false;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    // Consecutive user-agent lines share one group.
                    if in_group_body {
                        current_agents.clear();
                        in_group_body = false;
                    }
                    current_agents.push(value.to_lowercase());
                }
                "crawl-delay" => {
                    in_group_body = true;
                    let Ok(delay) = value.parse::<f64>() else {
                        continue;
                    };
                    for agent in &current_agents {
                        if agent == "*" {
                            wildcard_delay = Some(delay);
                        } else if ua_lower.contains(agent.as_str())
                            && agent.len() > best_match_len
                        {
                            best_match_len = agent.len();
                            best_delay = Some(delay);
                        }
                    }
                }
                _ => {
                    in_group_body = true;
                }
            }
        }

        best_delay
            .or(wildcard_delay)
            .filter(|d| *d >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

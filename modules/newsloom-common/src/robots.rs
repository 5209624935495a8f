//! Minimal robots.txt model: user-agent groups with Allow/Disallow prefixes.
//! Longest-prefix match decides; Allow wins ties, absence of rules permits.

#[derive(Debug, Clone, Default)]
pub struct RobotsPolicy {
    /// (allow, path_prefix) rules applying to our user agent.
    rules: Vec<(bool, String)>,
}

impl RobotsPolicy {
    /// Policy used when robots.txt is missing or unreadable: allow everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse the groups matching `user_agent` (token match, case-insensitive)
    /// plus the `*` wildcard group.
    pub fn parse(body: &str, user_agent: &str) -> Self {
        let agent_token = user_agent
            .split('/')
            .next()
            .unwrap_or(user_agent)
            .to_ascii_lowercase();

        let mut rules = Vec::new();
        let mut group_agents: Vec<String> = Vec::new();
        let mut group_applies = false;
        let mut in_rules = false;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // A new agent line after rules starts a new group.
                    if in_rules {
                        group_agents.clear();
                        group_applies = false;
                        in_rules = false;
                    }
                    group_agents.push(value.to_ascii_lowercase());
                    group_applies = group_agents
                        .iter()
                        .any(|a| a == "*" || agent_token.contains(a.as_str()) || a.contains(&agent_token));
                }
                "disallow" => {
                    in_rules = true;
                    if group_applies && !value.is_empty() {
                        rules.push((false, value.to_string()));
                    }
                }
                "allow" => {
                    in_rules = true;
                    if group_applies && !value.is_empty() {
                        rules.push((true, value.to_string()));
                    }
                }
                _ => {
                    in_rules = true;
                }
            }
        }

        Self { rules }
    }

    /// Whether the path of `url` is allowed for our user agent.
    pub fn allows(&self, url: &str) -> bool {
        let path = url
            .split("://")
            .nth(1)
            .and_then(|rest| rest.find('/').map(|i| &rest[i..]))
            .unwrap_or("/");

        let mut best: Option<(usize, bool)> = None;
        for (allow, prefix) in &self.rules {
            if path.starts_with(prefix.as_str()) {
                let len = prefix.len();
                match best {
                    Some((best_len, best_allow)) => {
                        if len > best_len || (len == best_len && *allow && !best_allow) {
                            best = Some((len, *allow));
                        }
                    }
                    None => best = Some((len, *allow)),
                }
            }
        }
        best.map(|(_, allow)| allow).unwrap_or(true)
    }
}

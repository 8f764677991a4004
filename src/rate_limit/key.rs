use std::fmt;

use serde::{Deserialize, Serialize};

/// 限流 key 前缀
const RATE_LIMIT_KEY_PREFIX: &str = "rl";

/// 限流维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Ip,
    User,
    ApiKey,
}

impl Scope {
    fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Ip => "ip",
            Scope::User => "user",
            Scope::ApiKey => "api_key",
        }
    }
}

/// 限流 key：维度 + 维度标识 + 规则标识
///
/// 渲染为 `rl:{scope}:{len}:{id}:{rule}`，标识前带长度，
/// 因此标识里出现 `:` 也不会和其他 key 冲突。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    scope: Scope,
    id: String,
    rule: String,
}

impl RateLimitKey {
    pub fn new(scope: Scope, id: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            scope,
            id: id.into(),
            rule: rule.into(),
        }
    }

    pub fn global(rule: impl Into<String>) -> Self {
        Self::new(Scope::Global, "", rule)
    }

    pub fn ip(ip: &str, rule: impl Into<String>) -> Self {
        Self::new(Scope::Ip, ip, rule)
    }

    pub fn user(user_id: &str, rule: impl Into<String>) -> Self {
        Self::new(Scope::User, user_id, rule)
    }

    pub fn api_key(key_id: &str, rule: impl Into<String>) -> Self {
        Self::new(Scope::ApiKey, key_id, rule)
    }

    pub fn render(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            RATE_LIMIT_KEY_PREFIX,
            self.scope.as_str(),
            self.id.len(),
            self.id,
            self.rule
        )
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_render() {
        assert_eq!(RateLimitKey::user("u-1", "api").render(), "rl:user:3:u-1:api");
        assert_eq!(RateLimitKey::global("login").render(), "rl:global:0::login");
    }

    #[test]
    fn test_key_colons_do_not_collide() {
        let a = RateLimitKey::user("a:b", "c");
        let b = RateLimitKey::user("a", "b:c");
        assert_ne!(a.render(), b.render());
    }

    #[test]
    fn test_key_scopes_do_not_collide() {
        let ip = RateLimitKey::ip("10.0.0.1", "api");
        let user = RateLimitKey::user("10.0.0.1", "api");
        assert_ne!(ip.render(), user.render());
    }
}

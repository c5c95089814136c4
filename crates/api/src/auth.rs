use async_trait::async_trait;

/// 令牌校验契约
///
/// websocket 通道的首帧令牌交给该 trait 判定，具体后端由进程注入。
#[async_trait]
pub trait AuthOracle: Send + Sync {
    async fn validate_token(&self, token: &str) -> bool;
}

/// 与配置中的固定令牌比对
pub struct StaticTokenOracle {
    token: String,
}

impl StaticTokenOracle {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthOracle for StaticTokenOracle {
    async fn validate_token(&self, token: &str) -> bool {
        // 未配置令牌时拒绝一切连接
        !self.token.is_empty() && token == self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_oracle() {
        let oracle = StaticTokenOracle::new("secret");
        assert!(oracle.validate_token("secret").await);
        assert!(!oracle.validate_token("wrong").await);
        assert!(!oracle.validate_token("").await);
    }

    #[tokio::test]
    async fn test_empty_token_rejects_all() {
        let oracle = StaticTokenOracle::new("");
        assert!(!oracle.validate_token("").await);
        assert!(!oracle.validate_token("anything").await);
    }
}

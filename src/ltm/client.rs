//! LTM iControl REST客户端：token认证与Pool成员查询

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, SchedulerError};

/// token到期前提前刷新的余量
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// 登录后将token寿命延长到的秒数
const EXTENDED_TOKEN_TIMEOUT_SECS: u64 = 36000;

/// LTM会话token
#[derive(Debug, Clone)]
pub struct LtmToken {
    pub value: String,
    pub name: String,
    pub expires_at: Instant,
}

impl LtmToken {
    fn needs_refresh(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN >= self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: LoginTokenBody,
}

#[derive(Debug, Deserialize)]
struct LoginTokenBody {
    token: String,
    name: String,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ExtendResponse {
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MembersResponse {
    #[serde(default)]
    items: Vec<MemberItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MemberItem {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: String,
}

/// LTM API客户端。token缓存由内部互斥锁保护，
/// 并发拉取共享同一token。
pub struct LtmClient {
    base_url: String,
    username: String,
    password: String,
    client: Client,
    token: Mutex<Option<LtmToken>>,
}

impl LtmClient {
    pub fn new(host: &str, port: u16, username: &str, password: &str) -> Result<Self> {
        // 控制面普遍使用自签名证书
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url: format!("https://{host}:{port}/mgmt"),
            username: username.to_string(),
            password: password.to_string(),
            client,
            token: Mutex::new(None),
        })
    }

    /// 登录获取新token并尽力延长其寿命
    async fn login(&self) -> Result<LtmToken> {
        let login_url = format!("{}/shared/authn/login", self.base_url);
        debug!(url = %login_url, "logging in to LTM");

        let response = self
            .client
            .post(&login_url)
            .json(&json!({
                "username": self.username,
                "password": self.password,
                "loginProviderName": "tmos",
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SchedulerError::LtmAuth(format!(
                "login failed: HTTP {status}, {body}"
            )));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| SchedulerError::LtmAuth(format!("token not found in login response: {e}")))?;

        let timeout = body.token.timeout.unwrap_or(1200);
        let mut token = LtmToken {
            value: body.token.token,
            name: body.token.name,
            expires_at: Instant::now() + Duration::from_secs(timeout),
        };
        info!(token = %token.name, "obtained LTM token");

        // 延长失败不影响token可用性，仅寿命较短
        if let Some(extended) = self.extend_token_timeout(&token).await {
            token.expires_at = Instant::now() + Duration::from_secs(extended);
        }

        Ok(token)
    }

    /// 将token寿命延长到36000秒，返回服务端确认的秒数
    async fn extend_token_timeout(&self, token: &LtmToken) -> Option<u64> {
        let extend_url = format!("{}/shared/authz/tokens/{}", self.base_url, token.name);

        let result = self
            .client
            .patch(&extend_url)
            .header("X-F5-Auth-Token", &token.value)
            .json(&json!({"timeout": EXTENDED_TOKEN_TIMEOUT_SECS.to_string()}))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                let extended = response
                    .json::<ExtendResponse>()
                    .await
                    .ok()
                    .and_then(|body| body.timeout)
                    .unwrap_or(EXTENDED_TOKEN_TIMEOUT_SECS);
                info!(token = %token.name, timeout = extended, "extended LTM token timeout");
                Some(extended)
            }
            Ok(response) => {
                warn!(
                    token = %token.name,
                    status = %response.status(),
                    "failed to extend LTM token timeout"
                );
                None
            }
            Err(e) => {
                warn!(token = %token.name, "exception extending LTM token timeout: {}", e);
                None
            }
        }
    }

    /// 尽力删除LTM侧token，本地token过期时服务端可能已自行清理
    async fn delete_token(&self, token: &LtmToken) {
        let delete_url = format!("{}/shared/authz/tokens/{}", self.base_url, token.name);

        match self
            .client
            .delete(&delete_url)
            .header("X-F5-Auth-Token", &token.value)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                info!(token = %token.name, "deleted LTM token");
            }
            Ok(response) => {
                warn!(token = %token.name, status = %response.status(), "failed to delete LTM token");
            }
            Err(e) => {
                warn!(token = %token.name, "exception deleting LTM token: {}", e);
            }
        }
    }

    /// 确保持有可用token；缺失或临近过期时重新登录
    async fn ensure_token(&self) -> Result<LtmToken> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.needs_refresh() {
                return Ok(token.clone());
            }
            info!(token = %token.name, "LTM token missing or near expiry, re-logging in");
            self.delete_token(token).await;
            *cached = None;
        }

        let token = self.login().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// 丢弃当前token（收到401后调用）
    async fn invalidate_token(&self) {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.take() {
            self.delete_token(&token).await;
        }
    }

    /// 查询Pool的权威成员列表。401时丢弃token重登并重试一次。
    pub async fn get_pool_members(
        &self,
        pool_name: &str,
        partition: &str,
    ) -> Result<Vec<(String, u16)>> {
        let token = self.ensure_token().await?;
        let pool_url = format!(
            "{}/tm/ltm/pool/~{}~{}/members",
            self.base_url, partition, pool_name
        );
        debug!(url = %pool_url, "fetching pool members");

        let response = self
            .client
            .get(&pool_url)
            .header("X-F5-Auth-Token", &token.value)
            .send()
            .await?;

        let response = if response.status().as_u16() == 401 {
            info!(pool = pool_name, "LTM token rejected, re-logging in and retrying once");
            self.invalidate_token().await;
            let token = self.ensure_token().await?;
            self.client
                .get(&pool_url)
                .header("X-F5-Auth-Token", &token.value)
                .send()
                .await?
        } else {
            response
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SchedulerError::ltm_api(
                format!("failed to get pool members: {body}"),
                Some(status.as_u16()),
            ));
        }

        let body: MembersResponse = response.json().await.map_err(|e| {
            SchedulerError::ltm_api(format!("unexpected members payload: {e}"), None)
        })?;

        let members = parse_member_items(pool_name, &body.items);
        info!(pool = pool_name, count = members.len(), "fetched pool members from LTM");
        Ok(members)
    }

    /// 关停时尽力清理LTM侧token
    pub async fn shutdown(&self) {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.take() {
            self.delete_token(&token).await;
        }
    }
}

/// 解析成员条目：address为IP，端口取name字段最后一个冒号之后。
/// 字段缺失或端口非法的条目跳过并告警。
pub(crate) fn parse_member_items(pool_name: &str, items: &[MemberItem]) -> Vec<(String, u16)> {
    let mut members = Vec::with_capacity(items.len());

    for item in items {
        if item.address.is_empty() {
            warn!(pool = pool_name, "pool member missing address field");
            continue;
        }
        let port = item
            .name
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse::<u16>().ok())
            .unwrap_or(0);
        if port == 0 {
            warn!(pool = pool_name, member = %item.name, "unable to parse member port");
            continue;
        }
        members.push((item.address.clone(), port));
    }

    members
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(address: &str, name: &str) -> MemberItem {
        MemberItem {
            address: address.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_parse_member_items() {
        let items = vec![
            item("10.0.0.1", "10.0.0.1:8000"),
            item("10.0.0.2", "10.0.0.2:8001"),
        ];
        let members = parse_member_items("llm-pool", &items);
        assert_eq!(
            members,
            vec![
                ("10.0.0.1".to_string(), 8000),
                ("10.0.0.2".to_string(), 8001)
            ]
        );
    }

    #[test]
    fn test_parse_member_items_skips_malformed() {
        let items = vec![
            item("", "10.0.0.1:8000"),
            item("10.0.0.2", "no-port-here"),
            item("10.0.0.3", "10.0.0.3:notaport"),
            item("10.0.0.4", "10.0.0.4:0"),
            item("10.0.0.5", "10.0.0.5:9000"),
        ];
        let members = parse_member_items("llm-pool", &items);
        assert_eq!(members, vec![("10.0.0.5".to_string(), 9000)]);
    }

    #[test]
    fn test_token_refresh_margin() {
        let fresh = LtmToken {
            value: "t".to_string(),
            name: "n".to_string(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        };
        assert!(!fresh.needs_refresh());

        let near_expiry = LtmToken {
            value: "t".to_string(),
            name: "n".to_string(),
            expires_at: Instant::now() + Duration::from_secs(30),
        };
        assert!(near_expiry.needs_refresh());
    }
}

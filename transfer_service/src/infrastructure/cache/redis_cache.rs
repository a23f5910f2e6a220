use crate::domain::error::TransferError;
use crate::domain::gateways::{keys, CacheGateway, VersionedBalance};
use crate::domain::types::{UserId, WalletId};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// TTL de la entrada versionada de balance.
const BALANCE_ENTRY_TTL: Duration = Duration::from_secs(5 * 60);

/// Intervalo de polling al adquirir un lease.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Libera el lock solo si el token coincide con el holder actual. Corre en el
/// servidor, así el check y el delete son un solo paso atómico.
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Compare-and-swap de la entrada versionada: escribe ARGV[2] solo si la
/// versión almacenada es ARGV[1] (o si no hay entrada y ARGV[1] es "").
const CAS_BALANCE_SCRIPT: &str = r#"
local current = redis.call("GET", KEYS[1])
if current then
    if ARGV[1] == "" then
        return 0
    end
    local decoded = cjson.decode(current)
    if tostring(decoded.version) == ARGV[1] then
        redis.call("SET", KEYS[1], ARGV[2], "PX", ARGV[3])
        return 1
    end
    return 0
else
    if ARGV[1] == "" then
        redis.call("SET", KEYS[1], ARGV[2], "PX", ARGV[3])
        return 1
    end
    return 0
end
"#;

/// Gateway de cache y locks distribuidos sobre Redis.
///
/// `ConnectionManager` multiplexa y reconecta solo; clonarlo es barato y cada
/// operación toma su propio handle.
pub struct RedisCacheGateway {
    conn: ConnectionManager,
    release_lock: redis::Script,
    cas_balance: redis::Script,
}

impl RedisCacheGateway {
    pub async fn connect(redis_url: &str) -> Result<Self, TransferError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| TransferError::Cache(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| TransferError::Cache(e.to_string()))?;

        Ok(Self {
            conn,
            release_lock: redis::Script::new(RELEASE_LOCK_SCRIPT),
            cas_balance: redis::Script::new(CAS_BALANCE_SCRIPT),
        })
    }

    fn fresh_token() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }
}

#[async_trait]
impl CacheGateway for RedisCacheGateway {
    async fn get(&self, key: &str) -> Result<Option<String>, TransferError> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| TransferError::Cache(e.to_string()))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), TransferError> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl.as_secs())
            .await
            .map_err(|e| TransferError::Cache(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), TransferError> {
        let mut conn = self.conn.clone();
        conn.del(key)
            .await
            .map_err(|e| TransferError::Cache(e.to_string()))
    }

    /// SET NX PX en loop hasta adquirir o agotar el timeout. El TTL del lease
    /// es el mismo timeout: si el holder muere, el lease expira solo.
    async fn acquire_wallet_lock(
        &self,
        wallet_id: WalletId,
        timeout: Duration,
    ) -> Result<Option<String>, TransferError> {
        let key = keys::wallet_lock(wallet_id);
        let token = Self::fresh_token();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let mut conn = self.conn.clone();
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(timeout.as_millis() as u64)
                .query_async(&mut conn)
                .await
                .map_err(|e| TransferError::Cache(e.to_string()))?;

            if acquired.is_some() {
                return Ok(Some(token));
            }

            if tokio::time::Instant::now() + LOCK_POLL_INTERVAL >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn release_wallet_lock(
        &self,
        wallet_id: WalletId,
        token: &str,
    ) -> Result<bool, TransferError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_lock
            .key(keys::wallet_lock(wallet_id))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| TransferError::Cache(e.to_string()))?;

        Ok(deleted == 1)
    }

    async fn get_versioned_balance(
        &self,
        wallet_id: WalletId,
    ) -> Result<Option<VersionedBalance>, TransferError> {
        let raw = self.get(&keys::wallet_balance(wallet_id)).await?;
        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(entry) => Ok(Some(entry)),
                Err(e) => {
                    // Entrada corrupta: se descarta y el lector cae al store.
                    tracing::warn!("Discarding corrupt balance entry for {}: {}", wallet_id, e);
                    let _ = self.delete(&keys::wallet_balance(wallet_id)).await;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn put_versioned_balance(
        &self,
        wallet_id: WalletId,
        entry: &VersionedBalance,
    ) -> Result<(), TransferError> {
        let json = serde_json::to_string(entry).map_err(|e| TransferError::Cache(e.to_string()))?;
        self.set_with_ttl(&keys::wallet_balance(wallet_id), &json, BALANCE_ENTRY_TTL)
            .await
    }

    async fn cas_versioned_balance(
        &self,
        wallet_id: WalletId,
        expected_version: Option<i64>,
        entry: &VersionedBalance,
    ) -> Result<bool, TransferError> {
        let json = serde_json::to_string(entry).map_err(|e| TransferError::Cache(e.to_string()))?;
        let expected = expected_version.map(|v| v.to_string()).unwrap_or_default();

        let mut conn = self.conn.clone();
        let swapped: i64 = self
            .cas_balance
            .key(keys::wallet_balance(wallet_id))
            .arg(expected)
            .arg(json)
            .arg(BALANCE_ENTRY_TTL.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| TransferError::Cache(e.to_string()))?;

        Ok(swapped == 1)
    }

    async fn invalidate_limit_counters(&self, user_id: UserId) -> Result<(), TransferError> {
        let mut conn = self.conn.clone();
        conn.del(vec![keys::daily_limit(user_id), keys::monthly_limit(user_id)])
            .await
            .map_err(|e| TransferError::Cache(e.to_string()))
    }
}

use async_trait::async_trait;
use chrono::Utc;
use merrymaker_core::{Error, Result, Session, SessionStore};
use redis::aio::ConnectionManager;
use redis::sentinel::{SentinelClient, SentinelNodeConnectionInfo, SentinelServerType};
use redis::{AsyncCommands, Client, RedisConnectionInfo};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Non-sentinel vs. sentinel-backed Redis connection, behind one `SessionStore` impl so
/// callers never branch on `redis.useSentinel` themselves (§6 environment table). The
/// sentinel client hands back a fresh connection per call, so it's wrapped in a mutex
/// the same way the teacher guards its single-writer resources.
enum Conn {
    Direct(ConnectionManager),
    Sentinel(Mutex<SentinelClient>),
}

/// KV session store backed by Redis, fronting `rules.sessions`-shaped rows with
/// per-key TTL (§4.8). Every read re-checks `expires_at` itself and deletes the row on
/// expiry detection rather than trusting Redis's own `EXPIRE` eviction to have already
/// run, per the invariant in §8.4.
pub struct RedisSessionStore {
    conn: Conn,
    key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub nodes: Vec<String>,
    pub master: String,
    pub password: Option<String>,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| Error::fatal(anyhow::anyhow!(e)))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::transient(anyhow::anyhow!(e)))?;
        Ok(Self {
            conn: Conn::Direct(manager),
            key_prefix: "session:".to_string(),
        })
    }

    /// Switches to sentinel mode per `redis.useSentinel` (§6): `nodes` are the sentinel
    /// addresses, `master` the monitored service name.
    pub fn connect_sentinel(cfg: SentinelConfig) -> Result<Self> {
        let node_info = cfg.password.map(|password| SentinelNodeConnectionInfo {
            tls_mode: None,
            redis_connection_info: Some(RedisConnectionInfo {
                password: Some(password),
                ..Default::default()
            }),
        });
        let client = SentinelClient::build(cfg.nodes, cfg.master, node_info, SentinelServerType::Master)
            .map_err(|e| Error::fatal(anyhow::anyhow!(e)))?;
        Ok(Self {
            conn: Conn::Sentinel(Mutex::new(client)),
            key_prefix: "session:".to_string(),
        })
    }

    fn key(&self, id: Uuid) -> String {
        session_key(&self.key_prefix, id)
    }

    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        match &self.conn {
            Conn::Direct(manager) => {
                let mut manager = manager.clone();
                manager
                    .set_ex::<_, _, ()>(key, value, ttl_secs)
                    .await
                    .map_err(|e| Error::transient(anyhow::anyhow!(e)))
            }
            Conn::Sentinel(client) => {
                let mut client = client.lock().await;
                let mut conn = client
                    .get_async_connection()
                    .await
                    .map_err(|e| Error::transient(anyhow::anyhow!(e)))?;
                conn.set_ex::<_, _, ()>(key, value, ttl_secs)
                    .await
                    .map_err(|e| Error::transient(anyhow::anyhow!(e)))
            }
        }
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        match &self.conn {
            Conn::Direct(manager) => {
                let mut manager = manager.clone();
                manager.get(key).await.map_err(|e| Error::transient(anyhow::anyhow!(e)))
            }
            Conn::Sentinel(client) => {
                let mut client = client.lock().await;
                let mut conn = client
                    .get_async_connection()
                    .await
                    .map_err(|e| Error::transient(anyhow::anyhow!(e)))?;
                conn.get(key).await.map_err(|e| Error::transient(anyhow::anyhow!(e)))
            }
        }
    }

    async fn del(&self, key: &str) -> Result<()> {
        match &self.conn {
            Conn::Direct(manager) => {
                let mut manager = manager.clone();
                manager.del::<_, ()>(key).await.map_err(|e| Error::transient(anyhow::anyhow!(e)))
            }
            Conn::Sentinel(client) => {
                let mut client = client.lock().await;
                let mut conn = client
                    .get_async_connection()
                    .await
                    .map_err(|e| Error::transient(anyhow::anyhow!(e)))?;
                conn.del::<_, ()>(key).await.map_err(|e| Error::transient(anyhow::anyhow!(e)))
            }
        }
    }
}

fn session_key(prefix: &str, id: Uuid) -> String {
    format!("{prefix}{id}")
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn save(&self, session: &Session) -> Result<()> {
        let ttl = (session.expires_at - Utc::now())
            .to_std()
            .map_err(|_| Error::validation("session is already expired"))?;
        let payload = serde_json::to_string(session).map_err(|e| Error::fatal(anyhow::anyhow!(e)))?;
        self.set_ex(&self.key(session.id), payload, ttl.as_secs().max(1)).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>> {
        let key = self.key(id);
        let Some(raw) = self.get_raw(&key).await? else {
            return Ok(None);
        };
        let session: Session = serde_json::from_str(&raw).map_err(|e| Error::fatal(anyhow::anyhow!(e)))?;

        if !session.is_valid(Utc::now()) {
            self.del(&key).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.del(&self.key(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_carries_the_session_prefix() {
        let id = Uuid::nil();
        assert_eq!(session_key("session:", id), format!("session:{id}"));
    }
}

//! Redis 连接：单机与集群两种拓扑的统一封装
//!
//! 拓扑在构造时由地址数量决定一次，之后每次调用不再判断。

use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, IntoConnectionInfo, Pipeline, RedisFuture, Value};
use tracing::{info, warn};

use crate::error::{Result, TokenError};

/// Redis 连接参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedisConnectOptions {
    /// 节点地址（`host:port` 或 `redis://host:port`），多于一个时使用集群模式
    pub addrs: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 数据库编号，仅单机模式有效
    pub db: i64,
}

/// 单机或集群连接
///
/// 两种连接都是可克隆的多路复用连接，克隆成本很低。
#[derive(Clone)]
pub enum RedisConnection {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

impl RedisConnection {
    /// 按地址数量选择拓扑并建立连接
    pub async fn connect(options: &RedisConnectOptions) -> Result<Self> {
        let urls = options
            .addrs
            .iter()
            .map(|addr| addr.trim())
            .filter(|addr| !addr.is_empty())
            .map(normalize_addr)
            .collect::<Vec<_>>();

        match urls.len() {
            0 => Err(TokenError::configuration("redis address list is empty")),
            1 => Self::connect_single(&urls[0], options).await,
            _ => Self::connect_cluster(urls, options).await,
        }
    }

    async fn connect_single(url: &str, options: &RedisConnectOptions) -> Result<Self> {
        let mut info = url.into_connection_info()?;
        info.redis.db = options.db;
        if options.username.is_some() {
            info.redis.username = options.username.clone();
        }
        if options.password.is_some() {
            info.redis.password = options.password.clone();
        }

        let client = redis::Client::open(info)?;
        let manager = client.get_connection_manager().await?;
        info!(addr = url, db = options.db, "Connected to redis");
        Ok(RedisConnection::Single(manager))
    }

    async fn connect_cluster(urls: Vec<String>, options: &RedisConnectOptions) -> Result<Self> {
        if options.db != 0 {
            warn!(db = options.db, "Redis cluster only supports db 0, ignoring configured db");
        }

        let nodes = urls.len();
        let mut builder = ClusterClientBuilder::new(urls);
        if let Some(username) = options.username.clone() {
            builder = builder.username(username);
        }
        if let Some(password) = options.password.clone() {
            builder = builder.password(password);
        }

        let client = builder.build()?;
        let connection = client.get_async_connection().await?;
        info!(nodes, "Connected to redis cluster");
        Ok(RedisConnection::Cluster(connection))
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, RedisConnection::Cluster(_))
    }
}

impl ConnectionLike for RedisConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            RedisConnection::Single(conn) => conn.req_packed_command(cmd),
            RedisConnection::Cluster(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            RedisConnection::Single(conn) => conn.req_packed_commands(cmd, offset, count),
            RedisConnection::Cluster(conn) => conn.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            RedisConnection::Single(conn) => conn.get_db(),
            RedisConnection::Cluster(conn) => conn.get_db(),
        }
    }
}

fn normalize_addr(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("redis://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_addresses_get_a_scheme() {
        assert_eq!(normalize_addr("127.0.0.1:6379"), "redis://127.0.0.1:6379");
        assert_eq!(normalize_addr("rediss://cache:6380"), "rediss://cache:6380");
    }

    #[tokio::test]
    async fn empty_address_list_is_a_configuration_error() {
        let options = RedisConnectOptions {
            addrs: vec!["  ".to_string()],
            ..Default::default()
        };
        let err = RedisConnection::connect(&options).await.err().unwrap();
        assert!(matches!(err, TokenError::Configuration(_)));
    }
}

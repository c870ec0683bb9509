// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::error::ConfigError;
use crate::peer::types::{IceServerKind, ServerConfig, TransportPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

pub const ENV_SIGNALING_URL: &str = "ROOMLINK_SIGNALING_URL";
pub const ENV_ROOM: &str = "ROOMLINK_ROOM";
pub const ENV_ICE_SERVERS: &str = "ROOMLINK_ICE_SERVERS";
pub const ENV_ICE_POLICY: &str = "ROOMLINK_ICE_POLICY";

/// ICE настройки для peer link
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceConfig {
    #[serde(default = "default_ice_servers")]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub transport_policy: TransportPolicy,
    #[serde(default)]
    pub candidate_pool_size: u8,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: default_ice_servers(),
            transport_policy: TransportPolicy::All,
            candidate_pool_size: 0,
        }
    }
}

/// Дефолтные публичные STUN серверы
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: IceServerKind::Stun,
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: IceServerKind::Stun,
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

/// Тайминги keep-alive для сигнального WebSocket (в секундах)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    /// Как часто отправлять ping; должно быть меньше `pong_wait`
    pub ping_period: u64,
    /// Сколько ждать любого входящего кадра до разрыва
    pub pong_wait: u64,
    /// Время на запись одного кадра
    pub write_wait: u64,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            ping_period: 54,
            pong_wait: 60,
            write_wait: 10,
        }
    }
}

impl KeepAlive {
    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_period)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub signaling_url: String,
    pub room_id: String,
    #[serde(default)]
    pub ice: IceConfig,
    #[serde(default)]
    pub keepalive: KeepAlive,
}

impl ClientConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Собирает конфигурацию из переменных окружения
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let signaling_url = lookup(ENV_SIGNALING_URL).ok_or(ConfigError::Missing(ENV_SIGNALING_URL))?;
        let room_id = lookup(ENV_ROOM).ok_or(ConfigError::Missing(ENV_ROOM))?;

        let mut ice = IceConfig::default();
        if let Some(raw) = lookup(ENV_ICE_SERVERS) {
            ice.servers = serde_json::from_str(&raw)?;
        }
        if let Some(policy) = lookup(ENV_ICE_POLICY) {
            ice.transport_policy = match policy.trim().to_ascii_lowercase().as_str() {
                "all" => TransportPolicy::All,
                "relay" => TransportPolicy::Relay,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "{ENV_ICE_POLICY} must be `all` or `relay`, got `{other}`"
                    )))
                }
            };
        }

        let config = Self {
            signaling_url,
            room_id,
            ice,
            keepalive: KeepAlive::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signaling_url.trim().is_empty() {
            return Err(ConfigError::Invalid("signaling url cannot be empty".into()));
        }
        if self.room_id.trim().is_empty() {
            return Err(ConfigError::Invalid("room id cannot be empty".into()));
        }
        if self.keepalive.ping_period == 0 || self.keepalive.ping_period >= self.keepalive.pong_wait {
            return Err(ConfigError::Invalid(
                "ping period must be non-zero and shorter than pong wait".into(),
            ));
        }

        // Валидация серверов
        for server in &self.ice.servers {
            if server.url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "ice server `{}` has an empty url",
                    server.id
                )));
            }
            if server.r#type == IceServerKind::Turn
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::Invalid(format!(
                    "turn server `{}` requires username and credential",
                    server.id
                )));
            }
        }
        if self.ice.transport_policy == TransportPolicy::Relay
            && !self
                .ice
                .servers
                .iter()
                .any(|s| s.r#type == IceServerKind::Turn)
        {
            return Err(ConfigError::Invalid(
                "relay transport policy needs at least one turn server".into(),
            ));
        }
        Ok(())
    }
}

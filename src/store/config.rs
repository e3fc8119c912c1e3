use crate::core::{DbError, Result};

pub const URL_SCHEME: &str = "memdoc://";

/// In-memory store configuration
///
/// Similar to a MongoDB connection string, minus the network parts that an
/// in-process store has no use for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Host label (kept for display and logs)
    pub host: String,

    /// Database name
    pub database: String,

    /// Maximum number of concurrently open sessions
    pub max_sessions: usize,

    /// Generate a UUID `_id` for inserted documents that have none
    pub generate_ids: bool,
}

impl StoreConfig {
    /// Create a configuration for the given database
    pub fn new(database: &str) -> Self {
        Self {
            host: "localhost".to_string(),
            database: database.to_string(),
            max_sessions: 64,
            generate_ids: true,
        }
    }

    /// Set the host label
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the database name
    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Set the session limit
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Enable or disable `_id` generation
    pub fn generate_ids(mut self, enabled: bool) -> Self {
        self.generate_ids = enabled;
        self
    }

    /// Parse from connection string
    ///
    /// Format: `memdoc://host/database?maxSessions=16&generateIds=false`
    ///
    /// # Examples
    ///
    /// ```
    /// use docrunner::store::StoreConfig;
    ///
    /// let config = StoreConfig::from_url("memdoc://localhost/shop?maxSessions=8").unwrap();
    /// assert_eq!(config.database, "shop");
    /// assert_eq!(config.max_sessions, 8);
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| DbError::Config(format!("URL must start with '{}'", URL_SCHEME)))?;

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        let (host, database) = location
            .split_once('/')
            .ok_or_else(|| DbError::Config("Invalid host/database format".to_string()))?;

        let mut config = Self::new(database).host(host);

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| DbError::Config(format!("Invalid option '{}'", pair)))?;
            match key {
                "maxSessions" => {
                    config.max_sessions = value
                        .parse()
                        .map_err(|_| DbError::Config(format!("Invalid maxSessions '{}'", value)))?;
                }
                "generateIds" => {
                    config.generate_ids = value
                        .parse()
                        .map_err(|_| DbError::Config(format!("Invalid generateIds '{}'", value)))?;
                }
                other => return Err(DbError::Config(format!("Unknown option '{}'", other))),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Convert to connection string
    pub fn to_url(&self) -> String {
        format!(
            "{}{}/{}?maxSessions={}&generateIds={}",
            URL_SCHEME, self.host, self.database, self.max_sessions, self.generate_ids
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(DbError::Config("Host cannot be empty".to_string()));
        }

        if self.database.is_empty() {
            return Err(DbError::Config("Database name cannot be empty".to_string()));
        }

        if self
            .database
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '.' | ' ' | '"' | '$' | '\0'))
        {
            return Err(DbError::Config(format!(
                "Invalid database name '{}'",
                self.database
            )));
        }

        if self.max_sessions == 0 {
            return Err(DbError::Config("max_sessions must be > 0".to_string()));
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new("test")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.database, "test");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.max_sessions, 64);
        assert!(config.generate_ids);
    }

    #[test]
    fn test_builder_pattern() {
        let config = StoreConfig::new("shop")
            .host("db.internal")
            .max_sessions(4)
            .generate_ids(false);

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.max_sessions, 4);
        assert!(!config.generate_ids);
    }

    #[test]
    fn test_from_url() {
        let config =
            StoreConfig::from_url("memdoc://cluster0/bank?maxSessions=16&generateIds=false")
                .unwrap();

        assert_eq!(config.host, "cluster0");
        assert_eq!(config.database, "bank");
        assert_eq!(config.max_sessions, 16);
        assert!(!config.generate_ids);
    }

    #[test]
    fn test_url_round_trip() {
        let config = StoreConfig::new("shop").max_sessions(3);
        assert_eq!(StoreConfig::from_url(&config.to_url()).unwrap(), config);
    }

    #[test]
    fn test_invalid_url() {
        assert!(StoreConfig::from_url("mongodb://localhost/shop").is_err());
        assert!(StoreConfig::from_url("memdoc://localhost").is_err());
        assert!(StoreConfig::from_url("memdoc://localhost/shop?maxSessions=x").is_err());
        assert!(StoreConfig::from_url("memdoc://localhost/shop?retryWrites=true").is_err());
        assert!(StoreConfig::from_url("memdoc://localhost/sh.op").is_err());
        assert!(StoreConfig::from_url("memdoc://localhost/shop?maxSessions=0").is_err());
    }
}

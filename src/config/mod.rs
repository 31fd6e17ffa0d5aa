use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    /// Prefix the application is mounted under, e.g. `/Stampee`. Empty for the root.
    pub base_path: String,
    /// Directory holding `assets/`, uploaded images included.
    pub public_dir: PathBuf,
    pub session_cookie_name: String,
    pub session_ttl_secs: u64,
    pub session_idle_timeout_secs: u64,
    pub page_size: i64,
    pub image_max_dimension: u32,
    pub image_webp_output: bool,
    pub bcrypt_cost: u32,
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite://stampee.db".into(),
            redis_url: None,
            server_host: "0.0.0.0".into(),
            server_port: 3000,
            base_path: String::new(),
            public_dir: PathBuf::from("public"),
            session_cookie_name: "stampee_session".into(),
            session_ttl_secs: 24 * 3600,
            session_idle_timeout_secs: 30 * 60,
            page_size: 12,
            image_max_dimension: 1200,
            image_webp_output: true,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        let session_ttl = env::var("SESSION_TTL")
            .ok()
            .and_then(|v| v.trim_end_matches('h').parse::<u64>().ok())
            .unwrap_or(24);
        let idle_timeout = env::var("SESSION_IDLE_TIMEOUT")
            .ok()
            .and_then(|v| v.trim_end_matches('m').parse::<u64>().ok())
            .unwrap_or(30);

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            base_path: normalize_base_path(&env::var("BASE_PATH").unwrap_or_default()),
            public_dir: env::var("PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.public_dir),
            session_cookie_name: env::var("SESSION_COOKIE")
                .unwrap_or(defaults.session_cookie_name),
            session_ttl_secs: session_ttl * 3600,
            session_idle_timeout_secs: idle_timeout * 60,
            page_size: parse_var("PAGE_SIZE")
                .filter(|size: &i64| *size > 0)
                .unwrap_or(defaults.page_size),
            image_max_dimension: parse_var("IMAGE_MAX_DIMENSION")
                .filter(|dim: &u32| *dim > 0)
                .unwrap_or(defaults.image_max_dimension),
            image_webp_output: parse_var("IMAGE_WEBP_OUTPUT")
                .unwrap_or(defaults.image_webp_output),
            bcrypt_cost: parse_var("BCRYPT_COST").unwrap_or(defaults.bcrypt_cost),
            max_upload_bytes: parse_var::<usize>("MAX_UPLOAD_MB")
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(defaults.max_upload_bytes),
        })
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    /// Directory uploaded stamp images are written to.
    pub fn upload_dir(&self) -> PathBuf {
        self.public_dir.join("assets").join("img").join("timbres")
    }

    /// Prefixes an application path with the base path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_path, path)
    }

    pub fn cookie_path(&self) -> String {
        if self.base_path.is_empty() {
            "/".to_string()
        } else {
            self.base_path.clone()
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// `"Stampee/"` becomes `"/Stampee"`; `"/"` and `""` become `""`.
pub fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_is_normalized() {
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path("Stampee/"), "/Stampee");
        assert_eq!(normalize_base_path("/Stampee"), "/Stampee");
    }

    #[test]
    fn urls_carry_the_base_path() {
        let config = Config {
            base_path: "/Stampee".into(),
            ..Config::default()
        };
        assert_eq!(config.url("/timbres"), "/Stampee/timbres");
        assert_eq!(config.cookie_path(), "/Stampee");
        assert_eq!(Config::default().cookie_path(), "/");
    }

    #[test]
    fn upload_dir_lives_under_public_assets() {
        let config = Config {
            public_dir: PathBuf::from("/srv/public"),
            ..Config::default()
        };
        assert_eq!(
            config.upload_dir(),
            PathBuf::from("/srv/public/assets/img/timbres")
        );
    }
}

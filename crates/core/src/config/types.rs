use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub control: ControlConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub compose: ComposeConfig,
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Control channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// WebSocket URL of the control service, including any handshake query.
    pub url: String,
    /// Organization every capture is filed under.
    pub org_id: String,
    /// Bearer token used for the subscribe request and uploads.
    pub token: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

fn default_heartbeat_interval() -> u64 {
    3000
}

fn default_reconnect_delay() -> u64 {
    5000
}

/// Upload endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
    /// Remove local images once every upload for a run succeeded.
    #[serde(default = "default_true")]
    pub delete_after_upload: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_upload_timeout(),
            delete_after_upload: true,
        }
    }
}

fn default_base_url() -> String {
    "https://trellis.enklu.com:10001".to_string()
}

fn default_upload_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Capture device configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Directory the device writes captures into (watched).
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_capture_command")]
    pub command: String,
    /// Arguments; `{path}` is replaced with the output file path.
    #[serde(default = "default_capture_args")]
    pub args: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            command: default_capture_command(),
            args: default_capture_args(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("snaps")
}

fn default_capture_command() -> String {
    "gphoto2".to_string()
}

fn default_capture_args() -> Vec<String> {
    vec![
        "--capture-image-and-download".to_string(),
        "--force-overwrite".to_string(),
        "--filename={path}".to_string(),
    ]
}

/// Compose stage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComposeConfig {
    /// Root of the per-instance overlay tree (watched).
    #[serde(default = "default_overlay_dir")]
    pub overlay_dir: PathBuf,
    /// Applied to the capture before blending.
    #[serde(default)]
    pub crop: Option<CropRect>,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            overlay_dir: default_overlay_dir(),
            crop: None,
        }
    }
}

fn default_overlay_dir() -> PathBuf {
    PathBuf::from("overlays")
}

/// Crop rectangle in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Thumbnail stage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_scale_divisor")]
    pub scale_divisor: u32,
    #[serde(default = "default_quality")]
    pub quality: u8,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            scale_divisor: default_scale_divisor(),
            quality: default_quality(),
        }
    }
}

fn default_scale_divisor() -> u32 {
    4
}

fn default_quality() -> u8 {
    80
}

/// Status server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    8080
}

/// Sanitized config for API responses (token redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub control: SanitizedControlConfig,
    pub upload: UploadConfig,
    pub capture: CaptureConfig,
    pub compose: ComposeConfig,
    pub thumbnail: ThumbnailConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedControlConfig {
    pub url: String,
    pub org_id: String,
    pub token_configured: bool,
    pub heartbeat_interval_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            control: SanitizedControlConfig {
                url: config.control.url.clone(),
                org_id: config.control.org_id.clone(),
                token_configured: !config.control.token.is_empty(),
                heartbeat_interval_ms: config.control.heartbeat_interval_ms,
                reconnect_delay_ms: config.control.reconnect_delay_ms,
            },
            upload: config.upload.clone(),
            capture: config.capture.clone(),
            compose: config.compose.clone(),
            thumbnail: config.thumbnail.clone(),
            server: config.server.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[control]
url = "wss://control.example.com/socket"
org_id = "org1"
token = "secret"
"#;

    #[test]
    fn test_deserialize_minimal_applies_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.control.org_id, "org1");
        assert_eq!(config.control.heartbeat_interval_ms, 3000);
        assert_eq!(config.control.reconnect_delay_ms, 5000);
        assert_eq!(config.upload.base_url, "https://trellis.enklu.com:10001");
        assert_eq!(config.upload.timeout_secs, 10);
        assert!(config.upload.delete_after_upload);
        assert_eq!(config.capture.output_dir, PathBuf::from("snaps"));
        assert_eq!(config.capture.command, "gphoto2");
        assert!(config.compose.crop.is_none());
        assert_eq!(config.thumbnail.scale_divisor, 4);
        assert_eq!(config.thumbnail.quality, 80);
        assert!(config.server.enabled);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_deserialize_crop() {
        let toml = format!(
            "{}\n[compose]\noverlay_dir = \"/srv/overlays\"\ncrop = {{ x = 10, y = 20, width = 640, height = 480 }}\n",
            MINIMAL
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.compose.overlay_dir, PathBuf::from("/srv/overlays"));
        assert_eq!(
            config.compose.crop,
            Some(CropRect {
                x: 10,
                y: 20,
                width: 640,
                height: 480
            })
        );
    }

    #[test]
    fn test_deserialize_missing_control_fails() {
        let toml = r#"
[server]
port = 8080
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_sanitized_config_hides_token() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.control.token_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret"));
    }
}

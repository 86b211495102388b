use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Control url, org id and token are present, url is ws/wss
/// - Upload base url is http/https
/// - Timer intervals and timeouts are not 0
/// - Crop rectangle (if any) has a non-zero extent
/// - Thumbnail divisor and quality are in range
/// - Server port is not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let control = &config.control;
    if control.url.trim().is_empty() {
        return invalid("control.url cannot be empty");
    }
    if !(control.url.starts_with("ws://") || control.url.starts_with("wss://")) {
        return invalid("control.url must use the ws:// or wss:// scheme");
    }
    if control.org_id.trim().is_empty() {
        return invalid("control.org_id cannot be empty");
    }
    if control.token.trim().is_empty() {
        return invalid("control.token cannot be empty");
    }
    if control.heartbeat_interval_ms == 0 {
        return invalid("control.heartbeat_interval_ms cannot be 0");
    }
    if control.reconnect_delay_ms == 0 {
        return invalid("control.reconnect_delay_ms cannot be 0");
    }

    let upload = &config.upload;
    if !(upload.base_url.starts_with("http://") || upload.base_url.starts_with("https://")) {
        return invalid("upload.base_url must use the http:// or https:// scheme");
    }
    if upload.timeout_secs == 0 {
        return invalid("upload.timeout_secs cannot be 0");
    }

    if config.capture.command.trim().is_empty() {
        return invalid("capture.command cannot be empty");
    }

    if let Some(crop) = &config.compose.crop {
        if crop.width == 0 || crop.height == 0 {
            return invalid("compose.crop width and height must be greater than 0");
        }
    }

    if config.thumbnail.scale_divisor == 0 {
        return invalid("thumbnail.scale_divisor must be at least 1");
    }
    if config.thumbnail.quality == 0 || config.thumbnail.quality > 100 {
        return invalid("thumbnail.quality must be between 1 and 100");
    }

    if config.server.enabled && config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }

    Ok(())
}

fn invalid(message: &str) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CaptureConfig, ComposeConfig, ControlConfig, CropRect, ServerConfig, ThumbnailConfig,
        UploadConfig,
    };

    fn valid_config() -> Config {
        Config {
            control: ControlConfig {
                url: "wss://control.example.com/socket".to_string(),
                org_id: "org1".to_string(),
                token: "token".to_string(),
                heartbeat_interval_ms: 3000,
                reconnect_delay_ms: 5000,
            },
            upload: UploadConfig::default(),
            capture: CaptureConfig::default(),
            compose: ComposeConfig::default(),
            thumbnail: ThumbnailConfig::default(),
            server: ServerConfig::default(),
        }
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_http_control_url_fails() {
        let mut config = valid_config();
        config.control.url = "https://control.example.com".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_empty_token_fails() {
        let mut config = valid_config();
        config.control.token = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_reconnect_delay_fails() {
        let mut config = valid_config();
        config.control.reconnect_delay_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_crop_fails() {
        let mut config = valid_config();
        config.compose.crop = Some(CropRect {
            x: 0,
            y: 0,
            width: 0,
            height: 100,
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_thumbnail_quality_range() {
        let mut config = valid_config();
        config.thumbnail.quality = 101;
        assert!(validate_config(&config).is_err());

        config.thumbnail.quality = 100;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_port_zero_ignored_when_server_disabled() {
        let mut config = valid_config();
        config.server.port = 0;
        assert!(validate_config(&config).is_err());

        config.server.enabled = false;
        assert!(validate_config(&config).is_ok());
    }
}

//! イメージ参照の解析とレジストリ認証情報

use base64::Engine;
use bollard::auth::DockerCredentials;
use std::path::Path;

/// ~/.docker/config.json からレジストリの認証情報を取得
pub fn get_docker_credentials(registry: &str) -> Option<DockerCredentials> {
    let config_path = dirs::home_dir()?.join(".docker").join("config.json");
    credentials_from_file(&config_path, registry)
}

fn credentials_from_file(path: &Path, registry: &str) -> Option<DockerCredentials> {
    let content = std::fs::read_to_string(path).ok()?;
    let config: serde_json::Value = serde_json::from_str(&content).ok()?;

    // auths セクションから該当レジストリの auth を取り出す
    let auth_b64 = config
        .get("auths")?
        .as_object()?
        .get(registry)?
        .get("auth")?
        .as_str()?;

    // username:password 形式
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth_b64)
        .ok()?;
    let auth_str = String::from_utf8(decoded).ok()?;
    let (username, password) = auth_str.split_once(':')?;

    Some(DockerCredentials {
        username: Some(username.to_string()),
        password: Some(password.to_string()),
        serveraddress: Some(registry.to_string()),
        ..Default::default()
    })
}

/// イメージ名からレジストリを抽出
///
/// 最初の `/` より前が `.` か `:` を含む場合のみレジストリとみなす
/// (例: ghcr.io, localhost:5000)。
pub fn extract_registry(image: &str) -> Option<&str> {
    let (first, _) = image.split_once('/')?;
    if first.contains('.') || first.contains(':') {
        Some(first)
    } else {
        None
    }
}

/// イメージ名とタグを分離
///
/// "redis:7" -> ("redis", "7")、"postgres" -> ("postgres", "latest")。
/// レジストリのポート番号はタグとして扱わない。
pub fn parse_image_tag(image: &str) -> (&str, &str) {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_tag() {
        assert_eq!(parse_image_tag("redis:7"), ("redis", "7"));
        assert_eq!(parse_image_tag("postgres"), ("postgres", "latest"));
        assert_eq!(
            parse_image_tag("mongodb/mongodb-community-server:7.0"),
            ("mongodb/mongodb-community-server", "7.0")
        );
        assert_eq!(
            parse_image_tag("localhost:5000/app"),
            ("localhost:5000/app", "latest")
        );
    }

    #[test]
    fn test_extract_registry() {
        assert_eq!(extract_registry("ghcr.io/owner/repo:tag"), Some("ghcr.io"));
        assert_eq!(
            extract_registry("localhost:5000/app"),
            Some("localhost:5000")
        );
        assert_eq!(extract_registry("mongodb/mongodb-community-server"), None);
        assert_eq!(extract_registry("redis:7"), None);
    }

    #[test]
    fn test_credentials_from_config_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        let auth = base64::engine::general_purpose::STANDARD.encode("user:secret");
        std::fs::write(
            &path,
            format!(r#"{{"auths": {{"ghcr.io": {{"auth": "{}"}}}}}}"#, auth),
        )
        .unwrap();

        let creds = credentials_from_file(&path, "ghcr.io").unwrap();
        assert_eq!(creds.username.as_deref(), Some("user"));
        assert_eq!(creds.password.as_deref(), Some("secret"));
        assert!(credentials_from_file(&path, "docker.io").is_none());
    }
}

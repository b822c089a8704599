use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::ffmpeg::command::Destination;

pub struct CastConfig {
    bind_addr: String,
    ffmpeg_path: Option<PathBuf>,
    destinations_path: PathBuf,
}

impl CastConfig {
    fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("LITE_CAST_BIND").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            ffmpeg_path: std::env::var_os("LITE_CAST_FFMPEG").map(PathBuf::from),
            destinations_path: std::env::var_os("LITE_CAST_DESTINATIONS")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("destinations.json")),
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// Explicit encoder binary override; `None` falls back to the bundled
    /// path / `PATH` search.
    pub fn ffmpeg_path(&self) -> Option<&Path> {
        self.ffmpeg_path.as_deref()
    }

    pub fn destinations_path(&self) -> &Path {
        &self.destinations_path
    }
}

pub fn config() -> &'static CastConfig {
    static CONFIG: LazyLock<CastConfig> = LazyLock::new(CastConfig::from_env);
    &CONFIG
}

/// On-disk shape of the persisted destination list. Read and written whole;
/// no validation happens here beyond what serde enforces, the request
/// invariants are checked at start time.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DestinationFile {
    destinations: Vec<Destination>,
}

pub fn load_destinations(path: &Path) -> anyhow::Result<Vec<Destination>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    let file: DestinationFile = serde_json::from_str(&text)?;
    Ok(file.destinations)
}

pub fn save_destinations(path: &Path, destinations: &[Destination]) -> anyhow::Result<()> {
    let file = DestinationFile {
        destinations: destinations.to_vec(),
    };
    let text = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file() -> PathBuf {
        std::env::temp_dir().join(format!("lite-cast-dest-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let path = temp_file();
        let destinations = load_destinations(&path).unwrap();
        assert!(destinations.is_empty());
    }

    #[test]
    fn test_destination_round_trip() {
        let path = temp_file();
        let destinations = vec![
            Destination {
                url: "rtmps://live.example/app/key".to_string(),
                label: Some("primary".to_string()),
            },
            Destination::new("rtmp://backup.example/app/key2"),
        ];
        save_destinations(&path, &destinations).unwrap();

        let loaded = load_destinations(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].url, "rtmps://live.example/app/key");
        assert_eq!(loaded[0].label.as_deref(), Some("primary"));
        assert_eq!(loaded[1].label, None);

        std::fs::remove_file(&path).unwrap();
    }
}

use nanoserde::DeJson;
use tracing::{debug, warn};

/// Session configuration, read from `clhost/session_config.json` in the XDG
/// config directories.
///
/// ```json
/// {
///     "library_paths": ["/opt/rocm/lib/libOpenCL.so"],
///     "build_options": "-cl-fast-relaxed-math"
/// }
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, DeJson)]
pub struct SessionConfig {
    /// `OpenCL` libraries tried before the default search paths.
    /// default = None
    #[nserde(default)]
    pub library_paths: Option<Vec<String>>,
    /// Options passed to the compiler for every program build.
    /// default = None
    #[nserde(default)]
    pub build_options: Option<String>,
}

impl SessionConfig {
    /// Searches the XDG config directories for `clhost/session_config.json`.
    ///
    /// A missing or malformed file is not an error, defaults are used instead.
    #[must_use]
    pub fn load() -> Self {
        let file = xdg::BaseDirectories::with_prefix("clhost")
            .map_err(|e| debug!("Failed to find config directories for session_config.json, {e}"))
            .ok()
            .and_then(|dirs| dirs.find_config_file("session_config.json"))
            .and_then(|path| {
                std::fs::read_to_string(&path)
                    .map_err(|e| warn!("Failed to read {}, {e}", path.display()))
                    .ok()
            });
        match file {
            Some(file) => Self::parse(&file).unwrap_or_else(|| {
                warn!("Failed to parse session_config.json, using defaults.");
                Self::default()
            }),
            None => {
                debug!("No session config found, using defaults.");
                Self::default()
            }
        }
    }

    /// Parses a config from JSON, `None` if it is malformed.
    #[must_use]
    pub fn parse(json: &str) -> Option<Self> {
        match Self::deserialize_json(json) {
            Ok(config) => {
                debug!("Session config successfully parsed.");
                Some(config)
            }
            Err(e) => {
                debug!("Session config is malformed, {e}");
                None
            }
        }
    }
}

#[test]
fn parses_partial_config() {
    let config = SessionConfig::parse(r#"{"build_options": "-cl-std=CL1.2"}"#).unwrap();
    assert_eq!(config.build_options.as_deref(), Some("-cl-std=CL1.2"));
    assert_eq!(config.library_paths, None);
    assert_eq!(SessionConfig::parse("{}"), Some(SessionConfig::default()));
    assert_eq!(SessionConfig::parse("[1, 2"), None);
}

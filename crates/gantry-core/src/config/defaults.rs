//! Default configuration values

use super::types::Config;

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "gantry.yaml";

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "gantry.toml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".gantry.yaml";

/// Default number of concurrently running tasks
pub const DEFAULT_PARALLEL: usize = 3;

/// Default cache directory, relative to the workspace root
pub const DEFAULT_CACHE_DIRECTORY: &str = ".gantry/cache";

/// Default age after which cache entries are pruned
pub const DEFAULT_MAX_CACHE_AGE_DAYS: u64 = 7;

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_YAML,
        DEFAULT_CONFIG_TOML,
        ALT_CONFIG_FILE,
        ".gantry.toml",
    ]
}

/// Generate default configuration YAML
pub fn default_config_yaml() -> String {
    let config = Config::default();
    serde_yaml::to_string(&config).unwrap_or_else(|_| DEFAULT_CONFIG_TEMPLATE.to_string())
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Gantry workspace configuration

tasks:
  parallel: 3
  bail: false
  cache_directory: .gantry/cache
  output_style: stream

named_inputs:
  default:
    - "{projectRoot}/**/*"
  production:
    - default
    - "!{projectRoot}/**/*.test.*"

target_defaults:
  build:
    cache: true
    depends_on: ["^build"]
    inputs: ["production", "^production"]
    outputs: ["{projectRoot}/dist"]
  test:
    cache: true
    inputs: ["default", "^production"]

projects: []
"#;

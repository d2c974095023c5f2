use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

const PROJECT_CONFIG_NAME: &str = ".pairlogrc";

/// Configuration file handler for pairlog
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    /// Arguments prepended to every command line
    pub defaults: Option<String>,
}

impl ConfigFile {
    /// Find project-level .pairlogrc by walking up the directory tree
    pub fn find_project_config() -> Option<PathBuf> {
        let current = env::current_dir().ok()?;
        Self::find_project_config_from(&current)
    }

    fn find_project_config_from(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(PROJECT_CONFIG_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// User config file locations in order of preference
    pub fn get_user_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if cfg!(windows) {
            if let Ok(appdata) = env::var("APPDATA") {
                paths.push(PathBuf::from(appdata).join("pairlog").join("config.ini"));
            }
            if let Ok(userprofile) = env::var("USERPROFILE") {
                paths.push(PathBuf::from(userprofile).join(PROJECT_CONFIG_NAME));
            }
        } else {
            // $XDG_CONFIG_HOME/pairlog/config.ini, falling back to ~/.config
            let xdg_config = env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    env::var("HOME")
                        .map(|h| PathBuf::from(h).join(".config"))
                        .unwrap_or_else(|_| PathBuf::from(".config"))
                });
            paths.push(xdg_config.join("pairlog").join("config.ini"));

            if let Ok(home) = env::var("HOME") {
                paths.push(PathBuf::from(home).join(PROJECT_CONFIG_NAME));
            }
        }

        paths
    }

    /// Load configuration with precedence: project > user > none
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::get_user_config_paths()
            .into_iter()
            .find(|p| p.is_file())
        {
            config = Self::merge_configs(config, Self::load_from_path(&path)?);
        }

        if let Some(project_path) = Self::find_project_config() {
            config = Self::merge_configs(config, Self::load_from_path(&project_path)?);
        }

        Ok(config)
    }

    /// Load `custom_path` alone if given, otherwise search the usual locations
    pub fn load_with_custom_path(custom_path: Option<&str>) -> Result<Self> {
        match custom_path {
            Some(path) => Self::load_from_path(Path::new(path)),
            None => Self::load(),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(Self::parse_ini_content(&content))
    }

    /// Only the root-level `defaults` key is understood; comments start with
    /// `;` or `#`, and sections and unknown keys are ignored.
    fn parse_ini_content(content: &str) -> Self {
        let mut defaults = None;
        let mut in_root = true;

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                in_root = false;
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                if in_root && key.trim() == "defaults" {
                    defaults = Some(value.trim().to_string());
                }
            }
        }

        Self { defaults }
    }

    /// Merge two configurations, the second taking precedence
    fn merge_configs(base: Self, overlay: Self) -> Self {
        Self {
            defaults: overlay.defaults.or(base.defaults),
        }
    }

    /// Print where configuration is searched for and what is active
    pub fn show_config() {
        println!("Configuration precedence: CLI > project .pairlogrc > user config\n");

        let project_config_path = Self::find_project_config();
        let user_config_paths = Self::get_user_config_paths();

        match Self::load() {
            Ok(config) => match &config.defaults {
                Some(defaults) => println!("Active defaults:\n  defaults = {}", defaults),
                None => println!("No defaults configured."),
            },
            Err(e) => eprintln!("Error loading configuration: {:#}", e),
        }

        println!("\nConfiguration search locations (in precedence order):");
        match &project_config_path {
            Some(path) => println!("  1. Project: {} (found)", path.display()),
            None => println!("  1. Project: .pairlogrc (searched up directory tree, not found)"),
        }
        for (i, path) in user_config_paths.iter().enumerate() {
            let status = if path.is_file() { "(found)" } else { "(not found)" };
            println!("  {}. User: {} {}", i + 2, path.display(), status);
        }

        if project_config_path.is_none() && !user_config_paths.iter().any(|p| p.is_file()) {
            println!("\nExample configuration file (.pairlogrc):\n");
            println!("# Arguments applied to every pairlog command");
            println!("defaults = --threshold 10 --stats --max-pending-age 10m");
        }
    }

    /// Insert the configured defaults right after the program name, so
    /// arguments given on the command line still win.
    pub fn process_args(&self, args: Vec<String>) -> Result<Vec<String>> {
        let Some(defaults) = &self.defaults else {
            return Ok(args);
        };

        let default_args = shell_words::split(defaults)
            .context("Invalid defaults: failed to parse arguments")?;

        let mut args = args.into_iter();
        let mut result = Vec::with_capacity(default_args.len() + args.len());
        result.extend(args.next());
        result.extend(default_args);
        result.extend(args);
        Ok(result)
    }
}

/// Value following `--config-file` in the raw arguments, if present
pub fn extract_config_file_arg(args: &[String]) -> Option<String> {
    args.windows(2)
        .find(|pair| pair[0] == "--config-file")
        .map(|pair| pair[1].clone())
}

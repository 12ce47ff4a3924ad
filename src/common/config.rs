use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::layout_engine::metrics::{DEFAULT_MARGIN, DEFAULT_PADDING, DEFAULT_SPACING};
use crate::layout_engine::placement::TierOffset;

const MAX_ICON_SIZE: i32 = 512;

pub fn config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config")).join("iconplace")
}
pub fn config_file() -> PathBuf { config_dir().join("config.toml") }
pub fn profile_dir(profile: &str) -> PathBuf { config_dir().join(profile) }

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Name of the profile directory holding the saved icon positions.
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default)]
    pub layout: LayoutSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            layout: LayoutSettings::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct LayoutSettings {
    /// Fill rows first instead of columns.
    #[serde(default)]
    pub arrange_in_rows: bool,
    /// Start at the right edge and flow leftwards.
    #[serde(default)]
    pub arrange_rtl: bool,
    /// Start at the bottom edge and flow upwards.
    #[serde(default)]
    pub arrange_btt: bool,
    /// Edge length of the icon glyph in pixels; drives the cell size.
    #[serde(default = "default_icon_size")]
    pub icon_size: i32,
    /// Font description for labels, e.g. "Sans 12"; drives the text height.
    #[serde(default = "default_font")]
    pub font: String,
    #[serde(default = "default_spacing")]
    pub spacing: i32,
    #[serde(default = "default_padding")]
    pub padding: i32,
    #[serde(default = "default_margin")]
    pub margin: i32,
    /// Upper bound on candidates tried for one icon before it is placed at
    /// its first candidate regardless of overlap.
    #[serde(default = "default_max_placement_attempts")]
    pub max_placement_attempts: u32,
    #[serde(default)]
    pub tier_offset: TierOffset,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            arrange_in_rows: false,
            arrange_rtl: false,
            arrange_btt: false,
            icon_size: default_icon_size(),
            font: default_font(),
            spacing: default_spacing(),
            padding: default_padding(),
            margin: default_margin(),
            max_placement_attempts: default_max_placement_attempts(),
            tier_offset: TierOffset::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.profile.is_empty() || self.profile.contains(['/', '\\']) {
            issues.push(format!(
                "profile must be a plain directory name, got '{}'",
                self.profile
            ));
        }

        issues.extend(self.layout.validate());

        issues
    }

    pub fn auto_fix_values(&mut self) -> usize {
        let mut fixes = 0;

        if self.profile.is_empty() || self.profile.contains(['/', '\\']) {
            self.profile = default_profile();
            fixes += 1;
        }

        fixes += self.layout.auto_fix_values();

        fixes
    }
}

impl LayoutSettings {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.icon_size <= 0 || self.icon_size > MAX_ICON_SIZE {
            issues.push(format!(
                "icon_size must be between 1 and {}, got {}",
                MAX_ICON_SIZE, self.icon_size
            ));
        }

        if self.spacing < 0 {
            issues.push(format!("spacing must be non-negative, got {}", self.spacing));
        }

        if self.padding < 0 {
            issues.push(format!("padding must be non-negative, got {}", self.padding));
        }

        if self.margin < 0 {
            issues.push(format!("margin must be non-negative, got {}", self.margin));
        }

        if self.max_placement_attempts == 0 {
            issues.push("max_placement_attempts must be at least 1".to_string());
        }

        if self.tier_offset.major <= 0 || self.tier_offset.minor <= 0 {
            issues.push(format!(
                "tier_offset divisors must be positive, got {}/{}",
                self.tier_offset.major, self.tier_offset.minor
            ));
        }

        issues
    }

    pub fn auto_fix_values(&mut self) -> usize {
        let mut fixes = 0;

        if self.icon_size <= 0 || self.icon_size > MAX_ICON_SIZE {
            self.icon_size = default_icon_size();
            fixes += 1;
        }

        if self.spacing < 0 {
            self.spacing = default_spacing();
            fixes += 1;
        }

        if self.padding < 0 {
            self.padding = default_padding();
            fixes += 1;
        }

        if self.margin < 0 {
            self.margin = default_margin();
            fixes += 1;
        }

        if self.max_placement_attempts == 0 {
            self.max_placement_attempts = default_max_placement_attempts();
            fixes += 1;
        }

        if self.tier_offset.major <= 0 || self.tier_offset.minor <= 0 {
            self.tier_offset = TierOffset::default();
            fixes += 1;
        }

        fixes
    }
}

fn default_profile() -> String { "default".to_string() }

fn default_icon_size() -> i32 { 48 }

fn default_font() -> String { "Sans 12".to_string() }

fn default_spacing() -> i32 { DEFAULT_SPACING }

fn default_padding() -> i32 { DEFAULT_PADDING }

fn default_margin() -> i32 { DEFAULT_MARGIN }

fn default_max_placement_attempts() -> u32 { 4096 }

impl Config {
    pub fn read(path: &Path) -> anyhow::Result<Config> {
        let buf = std::fs::read_to_string(path)?;
        Self::parse(&buf)
    }

    /// Reads `path` if it exists, falling back to the defaults otherwise.
    pub fn read_or_default(path: &Path) -> anyhow::Result<Config> {
        if path.exists() {
            Self::read(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, toml_string.as_bytes())?;

        Ok(())
    }

    /// Validates the entire configuration and returns a list of issues found.
    pub fn validate(&self) -> Vec<String> { self.settings.validate() }

    /// Attempts to fix configuration values automatically.
    /// Returns the number of fixes applied.
    pub fn auto_fix_values(&mut self) -> usize { self.settings.auto_fix_values() }

    pub fn parse(buf: &str) -> anyhow::Result<Config> {
        let config: Config = toml::from_str(buf)?;
        Ok(config)
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for configuration files that Oxitree uses to simplify
//! the process of serialization and deserialization. File I/O is left to the
//! caller to figure out.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Tree definition layout.
///
/// Every managed tree in oxitree comes with a __definition__ file. This file
/// is a simple configuration file that details where the tree gets deployed,
/// which ordered set of sources it is assembled from, and which variables
/// are bound when rendering templates.
///
/// # General Layout
///
/// A tree definition is composed of three basic parts: settings, sources,
/// and variables. The settings section defines the destination and how it
/// should be reconciled. The source listing is ordered such that later
/// sources override earlier sources at matching relative paths. The
/// variables table is handed to the renderer for every template.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct TreeDefinition {
    /// Settings for the tree.
    pub settings: TreeSettings,

    /// Ordered listing of source roots.
    #[serde(rename = "source", default)]
    pub sources: Vec<SourceDefinition>,

    /// Variable bindings for template rendering.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl TreeDefinition {
    /// Compile exclusive ignore listing into glob patterns.
    ///
    /// Absolute entries are made relative to the destination first.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::IgnorePattern`] if any entry is not a valid
    ///   glob pattern.
    pub fn ignore_patterns(&self) -> Result<Vec<glob::Pattern>> {
        let destination = self.settings.destination.as_path();
        self.settings
            .exclusive_ignore
            .iter()
            .map(|entry| {
                let entry = Path::new(entry.as_str());
                let entry = entry.strip_prefix(destination).unwrap_or(entry);
                let entry = entry.to_string_lossy();
                let entry = entry.trim_end_matches('/');
                glob::Pattern::new(entry).map_err(|err| ConfigError::IgnorePattern {
                    source: err,
                    pattern: entry.to_string(),
                })
            })
            .collect()
    }

    /// Determine ordered search path for source roots.
    ///
    /// Relative search directories are resolved against `base`, which is
    /// usually the directory containing the tree definition file. When no
    /// search directories are configured, `base/files` is tried before
    /// `base` itself.
    pub fn search_dirs(&self, base: impl AsRef<Path>) -> Vec<PathBuf> {
        let base = base.as_ref();
        if self.settings.search_path.is_empty() {
            return vec![base.join("files"), base.to_path_buf()];
        }

        self.settings
            .search_path
            .iter()
            .map(|dir| base.join(dir))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if !self.settings.destination.is_absolute() {
            return Err(ConfigError::RelativeDestination(
                self.settings.destination.clone(),
            ));
        }

        if self.settings.template_suffix.is_empty() {
            return Err(ConfigError::EmptyTemplateSuffix);
        }

        self.ignore_patterns()?;

        Ok(())
    }
}

impl FromStr for TreeDefinition {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut definition: TreeDefinition =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on destination and source paths.
        definition.settings.destination = expand_path(&definition.settings.destination)?;
        for source in definition.sources.iter_mut() {
            source.path = shellexpand::full(source.path.as_str())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned();
        }

        definition.validate()?;

        Ok(definition)
    }
}

impl Display for TreeDefinition {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Tree configuration settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TreeSettings {
    /// Brief description of what the tree contains.
    pub description: String,

    /// Absolute path to destination root.
    pub destination: PathBuf,

    /// Permission bits for managed files.
    pub file_mode: Mode,

    /// Permission bits for managed directories.
    pub directory_mode: Mode,

    /// Numeric user id owning managed entries, left alone if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<u32>,

    /// Numeric group id owning managed entries, left alone if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,

    /// Delete destination entries that no source provides.
    pub exclusive: bool,

    /// Destination entries that exclusive mode must never delete.
    pub exclusive_ignore: Vec<String>,

    /// File name suffix marking templates.
    pub template_suffix: String,

    /// What to do about source roots that cannot be found.
    pub missing_sources: MissingSources,

    /// Rewrite existing files in case their content changed.
    pub refresh_files: bool,

    /// Directories to search for relative source roots.
    pub search_path: Vec<PathBuf>,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            description: String::new(),
            destination: PathBuf::new(),
            file_mode: Mode::FILE,
            directory_mode: Mode::DIRECTORY,
            owner: None,
            group: None,
            exclusive: false,
            exclusive_ignore: Vec::new(),
            template_suffix: DEFAULT_TEMPLATE_SUFFIX.into(),
            missing_sources: MissingSources::default(),
            refresh_files: true,
            search_path: Vec::new(),
        }
    }
}

impl TreeSettings {
    /// Ownership to enforce on managed entries.
    pub fn ownership(&self) -> Ownership {
        Ownership {
            owner: self.owner,
            group: self.group,
        }
    }
}

/// Default suffix marking renderable files.
pub const DEFAULT_TEMPLATE_SUFFIX: &str = ".j2";

/// Source root listing.
///
/// A source path ending with a separator contributes only the _contents_ of
/// the directory, otherwise the directory itself becomes an entry.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SourceDefinition {
    /// Path to source root, absolute or relative to search path.
    pub path: String,

    /// Treat source root as empty when it cannot be found.
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
}

impl SourceDefinition {
    /// Construct new required source root listing.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            optional: false,
        }
    }
}

/// Policy for source roots that cannot be located.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingSources {
    /// Missing required source root aborts reconciliation.
    #[default]
    Error,

    /// Missing source root contributes nothing.
    Skip,
}

/// Unix permission bits.
///
/// Serialized as an octal string, e.g., "0644".
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct Mode(u32);

impl Mode {
    /// Default permission bits for files.
    pub const FILE: Mode = Mode(0o644);

    /// Default permission bits for directories.
    pub const DIRECTORY: Mode = Mode(0o755);

    /// Construct new mode, discarding file type bits.
    pub const fn new(bits: u32) -> Self {
        Self(bits & 0o7777)
    }

    /// Raw permission bits.
    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Numeric ownership of managed entries.
///
/// Unset ids are never touched.
#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Ownership {
    pub owner: Option<u32>,
    pub group: Option<u32>,
}

impl Ownership {
    /// Check if there is nothing to enforce.
    pub fn is_unset(&self) -> bool {
        self.owner.is_none() && self.group.is_none()
    }

    /// Check if observed ids satisfy ownership.
    pub fn is_satisfied_by(&self, owner: u32, group: u32) -> bool {
        self.owner.map_or(true, |id| id == owner) && self.group.map_or(true, |id| id == group)
    }
}

impl Display for Ownership {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let id = |id: Option<u32>| id.map_or_else(|| "-".to_string(), |id| id.to_string());
        write!(fmt, "{}:{}", id(self.owner), id(self.group))
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let digits = data.trim();
        let digits = digits.strip_prefix("0o").unwrap_or(digits);
        match u32::from_str_radix(digits, 8) {
            Ok(bits) if !digits.is_empty() && bits <= 0o7777 => Ok(Self(bits)),
            _ => Err(ConfigError::InvalidMode(data.to_string())),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{:04o}", self.0)
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let data = String::deserialize(deserializer)?;
        data.parse().map_err(serde::de::Error::custom)
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Permission bits are not a valid octal number.
    #[error("invalid permission bits {0:?}, expected octal number like \"0644\"")]
    InvalidMode(String),

    /// Destination must be absolute.
    #[error("destination {:?} is not an absolute path", .0.display())]
    RelativeDestination(PathBuf),

    /// Template suffix cannot be empty.
    #[error("template suffix cannot be empty")]
    EmptyTemplateSuffix,

    /// Exclusive ignore entry is not a valid glob pattern.
    #[error("invalid exclusive ignore pattern {pattern:?}")]
    IgnorePattern {
        #[source]
        source: glob::PatternError,
        pattern: String,
    },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[sealed_test(env = [("BLAH", "/home/blah/blah")])]
    fn deserialize_tree_definition() -> anyhow::Result<()> {
        let result: TreeDefinition = r#"
            [settings]
            description = "blah blah blah"
            destination = "$BLAH/nginx"
            file_mode = "0640"
            owner = 1000
            exclusive = true
            exclusive_ignore = ["cache/**"]

            [[source]]
            path = "nginx/"

            [[source]]
            path = "${BLAH}/ssl.conf.j2"
            optional = true

            [variables]
            server_name = "example.org"
        "#
        .parse()?;

        let expect = TreeDefinition {
            settings: TreeSettings {
                description: "blah blah blah".into(),
                destination: PathBuf::from("/home/blah/blah/nginx"),
                file_mode: Mode::new(0o640),
                owner: Some(1000),
                exclusive: true,
                exclusive_ignore: vec!["cache/**".into()],
                ..TreeSettings::default()
            },
            sources: vec![
                SourceDefinition::new("nginx/"),
                SourceDefinition {
                    path: "/home/blah/blah/ssl.conf.j2".into(),
                    optional: true,
                },
            ],
            variables: BTreeMap::from([("server_name".into(), "example.org".into())]),
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn tree_definition_round_trips_through_display() -> anyhow::Result<()> {
        let definition = TreeDefinition {
            settings: TreeSettings {
                description: "dotfiles".into(),
                destination: PathBuf::from("/srv/tree"),
                directory_mode: Mode::new(0o700),
                missing_sources: MissingSources::Skip,
                ..TreeSettings::default()
            },
            sources: vec![SourceDefinition::new("base/"), SourceDefinition::new("host")],
            variables: BTreeMap::from([("user".into(), "blah".into())]),
        };

        let result: TreeDefinition = definition.to_string().parse()?;
        assert_eq!(result, definition);
        assert!(definition.to_string().contains(r#"directory_mode = "0700""#));

        Ok(())
    }

    #[test]
    fn reject_relative_destination() {
        let result = r#"
            [settings]
            destination = "relative/dir"
        "#
        .parse::<TreeDefinition>();

        assert!(matches!(result, Err(ConfigError::RelativeDestination(_))));
    }

    #[test]
    fn reject_empty_template_suffix() {
        let result = r#"
            [settings]
            destination = "/srv/tree"
            template_suffix = ""
        "#
        .parse::<TreeDefinition>();

        assert!(matches!(result, Err(ConfigError::EmptyTemplateSuffix)));
    }

    #[test]
    fn reject_malformed_ignore_pattern() {
        let result = r#"
            [settings]
            destination = "/srv/tree"
            exclusive_ignore = ["cache/[a-"]
        "#
        .parse::<TreeDefinition>();

        assert!(matches!(result, Err(ConfigError::IgnorePattern { .. })));
    }

    #[test]
    fn ignore_patterns_relative_to_destination() -> anyhow::Result<()> {
        let definition: TreeDefinition = r#"
            [settings]
            destination = "/srv/tree"
            exclusive_ignore = ["/srv/tree/cache/", "logs/*.log"]
        "#
        .parse()?;

        let result = definition
            .ignore_patterns()?
            .iter()
            .map(|pattern| pattern.as_str().to_string())
            .collect::<Vec<_>>();
        assert_eq!(result, vec!["cache", "logs/*.log"]);

        Ok(())
    }

    #[test]
    fn default_search_dirs() {
        let definition = TreeDefinition::default();
        let result = definition.search_dirs("/etc/oxitree");
        let expect = vec![
            PathBuf::from("/etc/oxitree/files"),
            PathBuf::from("/etc/oxitree"),
        ];
        assert_eq!(result, expect);
    }

    #[test_case(Some(0), None, "0:-"; "owner only")]
    #[test_case(None, Some(100), "-:100"; "group only")]
    #[test_case(None, None, "-:-"; "unset")]
    #[test]
    fn display_ownership(owner: Option<u32>, group: Option<u32>, expect: &str) {
        pretty_assertions::assert_eq!(Ownership { owner, group }.to_string(), expect);
    }

    #[test]
    fn ownership_satisfaction() {
        let ownership = Ownership {
            owner: Some(1000),
            group: None,
        };
        assert!(ownership.is_satisfied_by(1000, 5));
        assert!(!ownership.is_satisfied_by(0, 5));
        assert!(Ownership::default().is_satisfied_by(0, 0));
        assert!(Ownership::default().is_unset());
    }

    #[test_case("0644", 0o644; "leading zero")]
    #[test_case("755", 0o755; "no leading zero")]
    #[test_case("0o600", 0o600; "rust prefix")]
    #[test_case("1777", 0o1777; "sticky bit")]
    #[test]
    fn parse_mode(input: &str, expect: u32) {
        pretty_assertions::assert_eq!(input.parse::<Mode>().unwrap(), Mode::new(expect));
    }

    #[test_case(""; "empty")]
    #[test_case("0999"; "not octal")]
    #[test_case("77777"; "too many bits")]
    #[test]
    fn reject_invalid_mode(input: &str) {
        assert!(input.parse::<Mode>().is_err());
    }
}

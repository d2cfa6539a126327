//! Configuration store
//!
//! A fixed registry of typed keys. Values start at their compiled defaults
//! and are overlaid by a chain of TOML documents:
//!
//! ```toml
//! store = "${HOME}/secrets.kdbx"
//! include = ["conf.d/*.toml", { file = "extra.toml", required = false }]
//!
//! [credentials]
//! password_mode = "command"
//! password = ["pass", "show", "lockbox"]
//! ```
//!
//! Nested tables are flattened into dotted keys (`credentials.password_mode`).
//! Unknown keys and values of the wrong type fail the load.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Maximum include nesting below the root document
pub const MAX_INCLUDE_DEPTH: usize = 10;

const INCLUDE_KEY: &str = "include";
const FORMAT_PLACEHOLDER: &str = "%s";

/// Upper bound in seconds for the totp and clip timeouts
pub const MAX_TIMEOUT: i64 = 86_400;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown key: {0}")]
    UnknownKey(String),

    #[error("{key} must be a {expected}")]
    TypeMismatch { key: String, expected: ValueKind },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("too many nested includes at {0}")]
    IncludeDepth(String),

    #[error("required include not found: {0}")]
    MissingInclude(String),

    #[error("invalid include entry: {0}")]
    InvalidInclude(String),

    #[error("failed to read {path}: {cause}")]
    Read { path: String, cause: std::io::Error },

    #[error("failed to parse {path}: {cause}")]
    Parse { path: String, cause: toml::de::Error },
}

/// The four scalar kinds a key can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    String,
    StringArray,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "boolean",
            Self::Int => "integer",
            Self::String => "string",
            Self::StringArray => "string array",
        })
    }
}

/// A loaded configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    String(String),
    StringArray(Vec<String>),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::String(s) => f.write_str(s),
            Self::StringArray(items) => f.write_str(&items.join(" ")),
        }
    }
}

/// Compiled-in default for a key
#[derive(Debug, Clone, Copy)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Str(&'static str),
    Array(&'static [&'static str]),
}

impl DefaultValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Str(_) => ValueKind::String,
            Self::Array(_) => ValueKind::StringArray,
        }
    }

    pub fn to_value(&self) -> ConfigValue {
        match self {
            Self::Bool(b) => ConfigValue::Bool(*b),
            Self::Int(i) => ConfigValue::Int(*i),
            Self::Str(s) => ConfigValue::String((*s).to_string()),
            Self::Array(items) => {
                ConfigValue::StringArray(items.iter().map(|s| (*s).to_string()).collect())
            }
        }
    }
}

/// Extra validation applied after the type check
#[derive(Debug, Clone, Copy)]
pub enum Rule {
    Any,
    NonNegative,
    Range(i64, i64),
    OneOf(&'static [&'static str]),
    ColorWindows,
    OtpFormat,
}

impl Rule {
    fn check(&self, value: &ConfigValue) -> Result<(), String> {
        match (self, value) {
            (Self::NonNegative, ConfigValue::Int(i)) if *i < 0 => {
                Err(format!("must not be negative, got {}", i))
            }
            (Self::Range(min, max), ConfigValue::Int(i)) if !(*min..=*max).contains(i) => {
                Err(format!("must be between {} and {}, got {}", min, max, i))
            }
            (Self::OneOf(allowed), ConfigValue::String(s)) if !allowed.contains(&s.as_str()) => {
                Err(format!("'{}' is not one of: {}", s, allowed.join(", ")))
            }
            (Self::ColorWindows, ConfigValue::StringArray(items)) => {
                for item in items {
                    ColorWindow::parse(item)?;
                }
                Ok(())
            }
            (Self::OtpFormat, ConfigValue::String(s)) => {
                let count = s.matches(FORMAT_PLACEHOLDER).count();
                if count == 1 {
                    Ok(())
                } else {
                    Err(format!(
                        "format needs exactly one '{}' placeholder, found {}",
                        FORMAT_PLACEHOLDER, count
                    ))
                }
            }
            _ => Ok(()),
        }
    }
}

/// Definition of one recognized key
#[derive(Debug, Clone, Copy)]
pub struct KeyDef {
    pub name: &'static str,
    pub default: DefaultValue,
    /// `${NAME}`/`$NAME` references are substituted from the environment
    pub expand: bool,
    pub rule: Rule,
    pub description: &'static str,
}

impl KeyDef {
    pub fn kind(&self) -> ValueKind {
        self.default.kind()
    }

    /// Environment-style name, e.g. `LOCKBOX_CREDENTIALS_PASSWORD_MODE`
    pub fn env_name(&self) -> String {
        format!("LOCKBOX_{}", self.name.replace('.', "_").to_uppercase())
    }
}

/// Handle for a boolean key
#[derive(Debug, Clone, Copy)]
pub struct BoolKey(pub &'static str);

/// Handle for an integer key
#[derive(Debug, Clone, Copy)]
pub struct IntKey(pub &'static str);

/// Handle for a string key
#[derive(Debug, Clone, Copy)]
pub struct StringKey(pub &'static str);

/// Handle for a string array key
#[derive(Debug, Clone, Copy)]
pub struct ArrayKey(pub &'static str);

/// Every recognized key
pub mod keys {
    use super::{ArrayKey, BoolKey, IntKey, StringKey};

    pub const STORE: StringKey = StringKey("store");
    pub const READONLY: BoolKey = BoolKey("readonly");
    pub const STRICT: BoolKey = BoolKey("strict");
    pub const PASSWORD_MODE: StringKey = StringKey("credentials.password_mode");
    pub const PASSWORD: ArrayKey = ArrayKey("credentials.password");
    pub const KEY_FILE: StringKey = StringKey("credentials.key_file");
    pub const TOTP_TIMEOUT: IntKey = IntKey("totp.timeout");
    pub const TOTP_COLOR_WINDOWS: ArrayKey = ArrayKey("totp.color_windows");
    pub const TOTP_OTP_FORMAT: StringKey = StringKey("totp.otp_format");
    pub const TOTP_CHECK_ON_INSERT: BoolKey = BoolKey("totp.check_on_insert");
    pub const JSON_MODE: StringKey = StringKey("json.mode");
    pub const JSON_HASH_LENGTH: IntKey = IntKey("json.hash_length");
    pub const CLIP_COPY_COMMAND: ArrayKey = ArrayKey("clip.copy_command");
    pub const CLIP_PASTE_COMMAND: ArrayKey = ArrayKey("clip.paste_command");
    pub const CLIP_TIMEOUT: IntKey = IntKey("clip.timeout");
    pub const CLIP_PIDFILE: StringKey = StringKey("clip.pidfile");
    pub const FEATURE_CLIP: BoolKey = BoolKey("feature.clip");
    pub const FEATURE_TOTP: BoolKey = BoolKey("feature.totp");
    pub const FEATURE_COLOR: BoolKey = BoolKey("feature.color");
    pub const DEFAULTS_MODTIME: StringKey = StringKey("defaults.modtime");
}

pub const PASSWORD_MODES: &[&str] = &["plaintext", "command", "none", "ignore"];
pub const JSON_MODES: &[&str] = &["plaintext", "hash", "empty"];

pub const DEFAULT_OTP_FORMAT: &str =
    "otpauth://totp/lbissuer:lbaccount?algorithm=SHA1&digits=6&issuer=lbissuer&period=30&secret=%s";

/// The key registry
pub static REGISTRY: &[KeyDef] = &[
    KeyDef {
        name: "store",
        default: DefaultValue::Str(""),
        expand: true,
        rule: Rule::Any,
        description: "path to the kdbx container file",
    },
    KeyDef {
        name: "readonly",
        default: DefaultValue::Bool(false),
        expand: false,
        rule: Rule::Any,
        description: "disable every operation that writes the container",
    },
    KeyDef {
        name: "strict",
        default: DefaultValue::Bool(true),
        expand: false,
        rule: Rule::Any,
        description: "fail when a required include is missing",
    },
    KeyDef {
        name: "credentials.password_mode",
        default: DefaultValue::Str("command"),
        expand: false,
        rule: Rule::OneOf(PASSWORD_MODES),
        description: "how credentials.password is interpreted",
    },
    KeyDef {
        name: "credentials.password",
        default: DefaultValue::Array(&[]),
        expand: true,
        rule: Rule::Any,
        description: "literal password, or the command that prints it",
    },
    KeyDef {
        name: "credentials.key_file",
        default: DefaultValue::Str(""),
        expand: true,
        rule: Rule::Any,
        description: "optional key file used to unlock the container",
    },
    KeyDef {
        name: "totp.timeout",
        default: DefaultValue::Int(120),
        expand: false,
        rule: Rule::Range(1, MAX_TIMEOUT),
        description: "seconds the totp display stays open",
    },
    KeyDef {
        name: "totp.color_windows",
        default: DefaultValue::Array(&["0:5", "30:35"]),
        expand: false,
        rule: Rule::ColorWindows,
        description: "countdown ranges (start:end) rendered in red",
    },
    KeyDef {
        name: "totp.otp_format",
        default: DefaultValue::Str(DEFAULT_OTP_FORMAT),
        expand: false,
        rule: Rule::OtpFormat,
        description: "otpauth url template used for bare seeds",
    },
    KeyDef {
        name: "totp.check_on_insert",
        default: DefaultValue::Bool(true),
        expand: false,
        rule: Rule::Any,
        description: "generate one code before storing an otp seed",
    },
    KeyDef {
        name: "json.mode",
        default: DefaultValue::Str("hash"),
        expand: false,
        rule: Rule::OneOf(JSON_MODES),
        description: "how values are rendered by the json command",
    },
    KeyDef {
        name: "json.hash_length",
        default: DefaultValue::Int(1),
        expand: false,
        rule: Rule::NonNegative,
        description: "hex characters kept from each hash (0 keeps all)",
    },
    KeyDef {
        name: "clip.copy_command",
        default: DefaultValue::Array(&[]),
        expand: false,
        rule: Rule::Any,
        description: "override the detected clipboard copy command",
    },
    KeyDef {
        name: "clip.paste_command",
        default: DefaultValue::Array(&[]),
        expand: false,
        rule: Rule::Any,
        description: "override the detected clipboard paste command",
    },
    KeyDef {
        name: "clip.timeout",
        default: DefaultValue::Int(120),
        expand: false,
        rule: Rule::Range(1, MAX_TIMEOUT),
        description: "seconds before the clipboard is cleared",
    },
    KeyDef {
        name: "clip.pidfile",
        default: DefaultValue::Str(""),
        expand: true,
        rule: Rule::Any,
        description: "pidfile coordinating clipboard managers",
    },
    KeyDef {
        name: "feature.clip",
        default: DefaultValue::Bool(true),
        expand: false,
        rule: Rule::Any,
        description: "enable clipboard commands",
    },
    KeyDef {
        name: "feature.totp",
        default: DefaultValue::Bool(true),
        expand: false,
        rule: Rule::Any,
        description: "enable totp commands",
    },
    KeyDef {
        name: "feature.color",
        default: DefaultValue::Bool(true),
        expand: false,
        rule: Rule::Any,
        description: "enable terminal colors",
    },
    KeyDef {
        name: "defaults.modtime",
        default: DefaultValue::Str(""),
        expand: false,
        rule: Rule::Any,
        description: "fixed RFC 3339 modification time for writes",
    },
];

/// Look up a key definition by name
pub fn lookup(name: &str) -> Option<&'static KeyDef> {
    REGISTRY.iter().find(|def| def.name == name)
}

/// A `[start, end)` range of countdown seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorWindow {
    pub start: u32,
    pub end: u32,
}

impl ColorWindow {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (start, end) = raw
            .split_once(':')
            .ok_or_else(|| format!("color window '{}' is not start:end", raw))?;
        let start: u32 = start
            .trim()
            .parse()
            .map_err(|_| format!("invalid window start in '{}'", raw))?;
        let end: u32 = end
            .trim()
            .parse()
            .map_err(|_| format!("invalid window end in '{}'", raw))?;
        if start >= end || end > 60 {
            return Err(format!("color window '{}' must satisfy start < end <= 60", raw));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, second: u32) -> bool {
        second >= self.start && second < self.end
    }
}

/// One `include` entry
#[derive(Debug, Clone, PartialEq, Eq)]
struct IncludeSpec {
    file: String,
    required: bool,
}

/// The process configuration
///
/// Built once at startup and passed by reference to the commands.
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: BTreeMap<&'static str, ConfigValue>,
    sources: Vec<PathBuf>,
}

impl Config {
    /// Configuration holding only compiled defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a root document and its includes
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::new();
        config.load_file(path, 0)?;
        Ok(config)
    }

    /// Drop every loaded value, returning to compiled defaults
    pub fn clear(&mut self) {
        self.values.clear();
        self.sources.clear();
    }

    /// Files that contributed to this configuration, in load order
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Set a single key from a TOML value, applying expansion and validation
    pub fn set(&mut self, key: &str, value: toml::Value) -> Result<(), ConfigError> {
        let def = lookup(key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        let mismatch = || ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: def.kind(),
        };

        let converted = match (def.kind(), value) {
            (ValueKind::Bool, toml::Value::Boolean(b)) => ConfigValue::Bool(b),
            (ValueKind::Int, toml::Value::Integer(i)) => ConfigValue::Int(i),
            (ValueKind::String, toml::Value::String(s)) => {
                ConfigValue::String(if def.expand { expand(&s) } else { s })
            }
            (ValueKind::StringArray, toml::Value::Array(items)) => {
                let mut strings = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        toml::Value::String(s) => {
                            strings.push(if def.expand { expand(&s) } else { s })
                        }
                        _ => return Err(mismatch()),
                    }
                }
                ConfigValue::StringArray(strings)
            }
            _ => return Err(mismatch()),
        };

        def.rule
            .check(&converted)
            .map_err(|reason| ConfigError::InvalidValue {
                key: key.to_string(),
                reason,
            })?;

        self.values.insert(def.name, converted);
        Ok(())
    }

    fn load_file(&mut self, path: &Path, depth: usize) -> Result<(), ConfigError> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(ConfigError::IncludeDepth(path.display().to_string()));
        }

        debug!(path = %path.display(), depth, "loading config");
        let content = fs::read_to_string(path).map_err(|cause| ConfigError::Read {
            path: path.display().to_string(),
            cause,
        })?;
        let mut table: toml::Table = content.parse().map_err(|cause| ConfigError::Parse {
            path: path.display().to_string(),
            cause,
        })?;

        let includes = match table.remove(INCLUDE_KEY) {
            Some(value) => parse_includes(value)?,
            None => Vec::new(),
        };

        let mut flat = Vec::new();
        flatten("", table, &mut flat);
        for (key, value) in flat {
            self.set(&key, value)?;
        }
        self.sources.push(path.to_path_buf());

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        for include in includes {
            self.load_include(&base, &include, depth)?;
        }

        Ok(())
    }

    fn load_include(
        &mut self,
        base: &Path,
        include: &IncludeSpec,
        depth: usize,
    ) -> Result<(), ConfigError> {
        let expanded = expand(&include.file);
        let resolved = if Path::new(&expanded).is_absolute() {
            PathBuf::from(&expanded)
        } else {
            base.join(&expanded)
        };

        let matches: Vec<PathBuf> = if expanded.contains('*') {
            let pattern = resolved.to_string_lossy().to_string();
            glob::glob(&pattern)
                .map_err(|e| ConfigError::InvalidInclude(format!("{}: {}", include.file, e)))?
                .filter_map(|entry| entry.ok())
                .collect()
        } else if resolved.exists() {
            vec![resolved]
        } else {
            Vec::new()
        };

        if matches.is_empty() {
            if include.required && self.get_bool(keys::STRICT) {
                return Err(ConfigError::MissingInclude(include.file.clone()));
            }
            if include.required {
                warn!(include = %include.file, "required include not found, strict disabled");
            } else {
                debug!(include = %include.file, "optional include not found");
            }
            return Ok(());
        }

        for path in matches {
            self.load_file(&path, depth + 1)?;
        }
        Ok(())
    }

    fn value(&self, name: &str) -> Option<ConfigValue> {
        self.values
            .get(name)
            .cloned()
            .or_else(|| lookup(name).map(|def| def.default.to_value()))
    }

    pub fn get_bool(&self, key: BoolKey) -> bool {
        matches!(self.value(key.0), Some(ConfigValue::Bool(true)))
    }

    pub fn get_int(&self, key: IntKey) -> i64 {
        match self.value(key.0) {
            Some(ConfigValue::Int(i)) => i,
            _ => 0,
        }
    }

    pub fn get_string(&self, key: StringKey) -> String {
        match self.value(key.0) {
            Some(ConfigValue::String(s)) => s,
            _ => String::new(),
        }
    }

    pub fn get_string_array(&self, key: ArrayKey) -> Vec<String> {
        match self.value(key.0) {
            Some(ConfigValue::StringArray(items)) => items,
            _ => Vec::new(),
        }
    }

    /// Promote a bare seed to an otpauth URL using `totp.otp_format`
    pub fn otp_url(&self, param: &str) -> String {
        let param = param.trim();
        if param.starts_with("otpauth") {
            return param.to_string();
        }
        self.get_string(keys::TOTP_OTP_FORMAT)
            .replacen(FORMAT_PLACEHOLDER, param, 1)
    }

    /// Parsed `totp.color_windows`
    pub fn color_windows(&self) -> Vec<ColorWindow> {
        self.get_string_array(keys::TOTP_COLOR_WINDOWS)
            .iter()
            .filter_map(|raw| ColorWindow::parse(raw).ok())
            .collect()
    }

    /// Every registry key paired with its effective value
    pub fn effective(&self) -> Vec<(&'static KeyDef, ConfigValue)> {
        REGISTRY
            .iter()
            .map(|def| {
                let value = self
                    .values
                    .get(def.name)
                    .cloned()
                    .unwrap_or_else(|| def.default.to_value());
                (def, value)
            })
            .collect()
    }
}

/// Substitute `${NAME}` and `$NAME`; unset variables become empty
fn expand(value: &str) -> String {
    shellexpand::env_with_context_no_errors(value, |name| {
        Some(std::env::var(name).unwrap_or_default())
    })
    .into_owned()
}

fn flatten(prefix: &str, table: toml::Table, out: &mut Vec<(String, toml::Value)>) {
    for (key, value) in table {
        let full = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::Table(inner) => flatten(&full, inner, out),
            other => out.push((full, other)),
        }
    }
}

fn parse_includes(value: toml::Value) -> Result<Vec<IncludeSpec>, ConfigError> {
    let items = match value {
        toml::Value::Array(items) => items,
        _ => {
            return Err(ConfigError::TypeMismatch {
                key: INCLUDE_KEY.to_string(),
                expected: ValueKind::StringArray,
            })
        }
    };

    items
        .into_iter()
        .map(|item| match item {
            toml::Value::String(file) => Ok(IncludeSpec {
                file,
                required: true,
            }),
            toml::Value::Table(mut table) => {
                let file = match table.remove("file") {
                    Some(toml::Value::String(file)) => file,
                    _ => {
                        return Err(ConfigError::InvalidInclude(
                            "table entries need a 'file' string".to_string(),
                        ))
                    }
                };
                let required = match table.remove("required") {
                    None => true,
                    Some(toml::Value::Boolean(b)) => b,
                    Some(_) => {
                        return Err(ConfigError::InvalidInclude(format!(
                            "'required' must be a boolean for {}",
                            file
                        )))
                    }
                };
                if let Some(extra) = table.keys().next() {
                    return Err(ConfigError::InvalidInclude(format!(
                        "unknown field '{}' for {}",
                        extra, file
                    )));
                }
                Ok(IncludeSpec { file, required })
            }
            other => Err(ConfigError::InvalidInclude(other.to_string())),
        })
        .collect()
}

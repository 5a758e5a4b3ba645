//
// config.rs
//
// Session configuration for phpmd linting
//

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Rule categories understood by `phpmd`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ruleset {
    CleanCode,
    CodeSize,
    Controversial,
    Design,
    Naming,
    UnusedCode,
}

impl Ruleset {
    /// Every ruleset, in the order phpmd documents them
    pub const ALL: [Ruleset; 6] = [
        Ruleset::CleanCode,
        Ruleset::CodeSize,
        Ruleset::Controversial,
        Ruleset::Design,
        Ruleset::Naming,
        Ruleset::UnusedCode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ruleset::CleanCode => "cleancode",
            Ruleset::CodeSize => "codesize",
            Ruleset::Controversial => "controversial",
            Ruleset::Design => "design",
            Ruleset::Naming => "naming",
            Ruleset::UnusedCode => "unusedcode",
        }
    }
}

impl FromStr for Ruleset {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ruleset::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or(())
    }
}

impl fmt::Display for Ruleset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, de-duplicated set of rulesets passed to phpmd.
///
/// Never empty: a selection that would end up empty falls back to
/// [`Ruleset::ALL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesetSelection(Vec<Ruleset>);

impl RulesetSelection {
    /// Parse a comma separated list, silently dropping unknown entries.
    pub fn parse(list: &str) -> Self {
        let mut selected = Vec::new();
        for entry in list.split(',').map(str::trim) {
            match entry.parse::<Ruleset>() {
                Ok(ruleset) if !selected.contains(&ruleset) => selected.push(ruleset),
                Ok(_) => {}
                Err(()) => {
                    if !entry.is_empty() {
                        log::debug!("Ignoring unknown phpmd ruleset '{}'", entry);
                    }
                }
            }
        }
        if selected.is_empty() {
            Self::default()
        } else {
            Self(selected)
        }
    }

    pub fn rulesets(&self) -> &[Ruleset] {
        &self.0
    }

    /// Comma-joined form used on the phpmd command line
    pub fn joined(&self) -> String {
        self.0
            .iter()
            .map(Ruleset::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for RulesetSelection {
    fn default() -> Self {
        Self(Ruleset::ALL.to_vec())
    }
}

/// When documents are linted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Lint when a document is opened or saved
    #[default]
    OnSave,
    /// Additionally lint on every content change
    OnType,
}

/// Per-session phpmd configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PhpmdConfig {
    /// Whether linting is enabled at all
    pub enabled: bool,
    /// User-configured phpmd executable; `None` means discover it
    pub executable_path: Option<PathBuf>,
    /// Built-in rulesets to run
    pub rulesets: RulesetSelection,
    /// Custom ruleset file; replaces `rulesets` on the command line when set
    pub rulesets_file: Option<String>,
    /// Maximum number of diagnostics stored per document
    pub max_number_of_problems: usize,
    /// Which document events trigger a lint
    pub run_mode: RunMode,
    /// Quiet period between the last trigger and the phpmd invocation
    pub debounce_ms: u64,
}

impl Default for PhpmdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            executable_path: None,
            rulesets: RulesetSelection::default(),
            rulesets_file: None,
            max_number_of_problems: 100,
            run_mode: RunMode::OnSave,
            debounce_ms: 500,
        }
    }
}

impl PhpmdConfig {
    /// Third phpmd argument: the ruleset file if configured, otherwise the
    /// comma-joined ruleset list.
    pub fn rulesets_argument(&self) -> String {
        match &self.rulesets_file {
            Some(file) => file.clone(),
            None => self.rulesets.joined(),
        }
    }
}

/// Name of the settings section
pub const CONFIG_SECTION: &str = "phpmd";

/// Top-level keys of the phpmd section
const SECTION_KEYS: [&str; 3] = ["enabled", "maxNumberOfProblems", "validate"];

/// Build a [`PhpmdConfig`] from client settings.
///
/// Accepts either `{ "phpmd": { ... } }` or the bare section. Settings
/// without a `phpmd` key only count as the bare section when they carry at
/// least one phpmd key; other clients' sections yield `None`. Missing or
/// ill-typed values keep their defaults.
pub fn parse_config(settings: &serde_json::Value) -> Option<PhpmdConfig> {
    let section = match settings.get(CONFIG_SECTION) {
        Some(section) => section,
        None if SECTION_KEYS.iter().any(|key| settings.get(key).is_some()) => settings,
        None => {
            log::trace!("Settings carry no phpmd section");
            return None;
        }
    };
    parse_section(section)
}

/// Build a [`PhpmdConfig`] from the contents of the phpmd section itself,
/// as returned by a `workspace/configuration` pull.
pub fn parse_section(section: &serde_json::Value) -> Option<PhpmdConfig> {
    if !section.is_object() {
        return None;
    }

    let mut config = PhpmdConfig::default();

    if let Some(v) = section.get("enabled").and_then(|v| v.as_bool()) {
        config.enabled = v;
    }
    if let Some(v) = section.get("maxNumberOfProblems").and_then(|v| v.as_u64()) {
        if v > 0 {
            config.max_number_of_problems = v as usize;
        }
    }

    if let Some(validate) = section.get("validate") {
        if let Some(v) = validate.get("executablePath").and_then(|v| v.as_str()) {
            let v = v.trim();
            if !v.is_empty() && !v.contains('\0') {
                config.executable_path = Some(PathBuf::from(v));
            }
        }
        if let Some(v) = validate.get("rulesets").and_then(|v| v.as_str()) {
            config.rulesets = RulesetSelection::parse(v);
        }
        if let Some(v) = validate.get("rulesetsFile").and_then(|v| v.as_str()) {
            let v = v.trim();
            if !v.is_empty() {
                config.rulesets_file = Some(v.to_string());
            }
        }
        if let Some(v) = validate.get("runMode").and_then(|v| v.as_str()) {
            config.run_mode = parse_run_mode(v);
        }
        if let Some(v) = validate.get("debounceMs").and_then(|v| v.as_u64()) {
            config.debounce_ms = v;
        }
    }

    log::info!("phpmd configuration loaded from LSP settings:");
    log::info!("  enabled: {}", config.enabled);
    log::info!("  executable_path: {:?}", config.executable_path);
    log::info!("  rulesets: {}", config.rulesets.joined());
    log::info!("  rulesets_file: {:?}", config.rulesets_file);
    log::info!("  max_number_of_problems: {}", config.max_number_of_problems);
    log::info!("  run_mode: {:?}", config.run_mode);
    log::info!("  debounce_ms: {}", config.debounce_ms);

    Some(config)
}

fn parse_run_mode(s: &str) -> RunMode {
    match s.to_lowercase().as_str() {
        "ontype" | "on_type" => RunMode::OnType,
        _ => RunMode::OnSave,
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow,
  bail
};
use chrono::NaiveDate;
use chrono::format::{
  Item,
  StrftimeItems
};
use tracing::{
  debug,
  info,
  warn
};

use crate::datetime::STORAGE_DATE_FORMAT;
use crate::record::EventRecord;
use crate::service::{
  DEFAULT_DATE_FORMAT,
  DEFAULT_EVENT_CONTENT,
  DEFAULT_EVENT_NAME,
  LedgerOptions,
  default_due_date
};

const RC_ENV_VAR: &str = "MILESTONERC";
const RC_FILE_NAME: &str = ".milestonerc";

/// Every setting the rc file or an
/// override may change, with its
/// default.
const SETTINGS: &[(
  &str,
  Option<&str>
)] = &[
  ("data.location", Some("./Data")),
  ("data.file", Some("events.csv")),
  (
    "default.name",
    Some(DEFAULT_EVENT_NAME)
  ),
  (
    "default.content",
    Some(DEFAULT_EVENT_CONTENT)
  ),
  ("default.due", Some("2100-01-01")),
  ("default.command", Some("show")),
  (
    "dateformat",
    Some(DEFAULT_DATE_FORMAT)
  ),
  ("timezone", None),
  ("color", Some("on"))
];

pub fn is_known_key(
  key: &str
) -> bool {
  setting_name(key).is_some()
}

fn setting_name(
  key: &str
) -> Option<&'static str> {
  SETTINGS
    .iter()
    .map(|(name, _)| *name)
    .find(|name| *name == key)
}

/// Where a setting's value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
  Default,
  File(PathBuf),
  Override
}

impl fmt::Display for Origin {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | Origin::Default => {
        f.write_str("default")
      }
      | Origin::File(path) => {
        write!(f, "{}", path.display())
      }
      | Origin::Override => {
        f.write_str("command line")
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
  pub value: String,
  pub origin: Origin
}

#[derive(Debug, Clone)]
pub struct Config {
  settings:
    BTreeMap<&'static str, Setting>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let settings = SETTINGS
      .iter()
      .filter_map(|(key, value)| {
        value.map(|value| {
          (*key, Setting {
            value: value.to_string(),
            origin: Origin::Default
          })
        })
      })
      .collect();

    Self {
      settings,
      loaded_files: vec![]
    }
  }
}

impl Config {
  /// Defaults, then one rc file:
  /// `rcfile` if given, else
  /// `$MILESTONERC` (empty or
  /// `/dev/null` skips it), else
  /// `~/.milestonerc` when present.
  #[tracing::instrument(skip(rcfile))]
  pub fn load(
    rcfile: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::default();

    match rc_location(rcfile) {
      | Some(path) => {
        info!(rc = %path.display(), "reading rc file");
        cfg.read_rc(
          &path,
          &mut Vec::new()
        )?;
      }
      | None => {
        debug!(
          "no rc file; using defaults"
        );
      }
    }

    Ok(cfg)
  }

  /// Applies `key=value` pairs from
  /// the command line. Unknown keys
  /// are an error here, unlike in rc
  /// files.
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) -> anyhow::Result<()>
  where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (key, value) in overrides {
      if !self.set(
        key.trim(),
        value.trim(),
        Origin::Override
      ) {
        bail!(
          "unknown setting: {key}"
        );
      }
    }
    Ok(())
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<&str> {
    self
      .settings
      .get(key)
      .map(|setting| {
        setting.value.as_str()
      })
  }

  pub fn setting(
    &self,
    key: &str
  ) -> Option<&Setting> {
    self.settings.get(key)
  }

  /// All set values, sorted by key.
  pub fn settings(
    &self
  ) -> impl Iterator<
    Item = (&'static str, &Setting)
  > {
    self
      .settings
      .iter()
      .map(|(key, setting)| {
        (*key, setting)
      })
  }

  pub fn timezone(
    &self
  ) -> Option<&str> {
    self
      .get("timezone")
      .filter(|tz| !tz.trim().is_empty())
  }

  pub fn default_command(
    &self
  ) -> &str {
    self
      .get("default.command")
      .map(str::trim)
      .filter(|cmd| !cmd.is_empty())
      .unwrap_or("show")
  }

  pub fn color(
    &self
  ) -> anyhow::Result<bool> {
    let raw = self
      .get("color")
      .unwrap_or("on")
      .trim()
      .to_ascii_lowercase();
    match raw.as_str() {
      | "on" | "yes" | "true" | "1" => {
        Ok(true)
      }
      | "off" | "no" | "false"
      | "0" => Ok(false),
      | other => Err(anyhow!(
        "invalid color setting: \
         {other}"
      ))
    }
  }

  fn set(
    &mut self,
    key: &str,
    value: &str,
    origin: Origin
  ) -> bool {
    let Some(name) = setting_name(key)
    else {
      return false;
    };
    debug!(key = name, value, %origin, "setting");
    self.settings.insert(name, Setting {
      value: value.to_string(),
      origin
    });
    true
  }

  /// Reads one rc file. `chain` holds
  /// the files currently being read,
  /// so an include cycle is skipped
  /// instead of recursing forever.
  fn read_rc(
    &mut self,
    path: &Path,
    chain: &mut Vec<PathBuf>
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    if chain.contains(&path) {
      warn!(file = %path.display(), "rc include cycle; skipping");
      return Ok(());
    }

    let text = fs::read_to_string(
      &path
    )
    .with_context(|| {
      format!(
        "failed to read {}",
        path.display()
      )
    })?;
    chain.push(path.clone());
    self.loaded_files.push(path.clone());

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let line = strip_comment(raw_line);
      if line.is_empty() {
        continue;
      }
      let at = || {
        format!(
          "{}:{}",
          path.display(),
          idx + 1
        )
      };

      if let Some(target) =
        line.strip_prefix("include ")
      {
        let target =
          include_target(&path, target)
            .with_context(at)?;
        if target.exists() {
          self.read_rc(&target, chain)?;
        } else {
          warn!(include = %target.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let Some((key, value)) =
        line.split_once('=')
      else {
        bail!(
          "{}: expected key = value, \
           got {raw_line:?}",
          at()
        );
      };

      let key = key.trim();
      if !self.set(
        key,
        value.trim(),
        Origin::File(path.clone())
      ) {
        warn!(key, at = %at(), "unknown setting; ignored");
      }
    }

    chain.pop();
    Ok(())
  }
}

/// Where the ledger file lives: the
/// `--data` directory if given, else
/// `data.location`, joined with
/// `data.file`.
#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_ledger_path(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match override_dir {
    | Some(dir) => dir.to_path_buf(),
    | None => expand_tilde(Path::new(
      cfg
        .get("data.location")
        .unwrap_or(".")
    ))
  };

  let file = cfg
    .get("data.file")
    .unwrap_or("events.csv")
    .trim();
  if file.is_empty() {
    bail!("data.file cannot be empty");
  }

  Ok(dir.join(file))
}

/// Builds the service options from
/// configuration.
pub fn ledger_options(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<LedgerOptions> {
  let path = resolve_ledger_path(
    cfg,
    override_dir
  )?;
  let mut options =
    LedgerOptions::new(path);

  let due = match cfg.get("default.due")
  {
    | Some(raw) => {
      NaiveDate::parse_from_str(
        raw.trim(),
        STORAGE_DATE_FORMAT
      )
      .with_context(|| {
        format!(
          "invalid default.due: {raw}"
        )
      })?
    }
    | None => default_due_date()
  };

  options.default_record =
    EventRecord::new_pending(
      cfg
        .get("default.name")
        .unwrap_or(DEFAULT_EVENT_NAME)
        .to_string(),
      cfg
        .get("default.content")
        .unwrap_or(DEFAULT_EVENT_CONTENT)
        .to_string(),
      due
    );

  if let Some(pattern) =
    cfg.get("dateformat")
  {
    if pattern.trim().is_empty()
      || StrftimeItems::new(pattern)
        .any(|item| {
          matches!(item, Item::Error)
        })
    {
      bail!(
        "invalid dateformat: \
         {pattern:?}"
      );
    }
    options.date_format =
      pattern.to_string();
  }

  Ok(options)
}

fn rc_location(
  rcfile: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = rcfile {
    return Some(path.to_path_buf());
  }

  match std::env::var_os(RC_ENV_VAR) {
    | Some(value)
      if value.is_empty()
        || value == "/dev/null" =>
    {
      None
    }
    | Some(value) => {
      Some(PathBuf::from(value))
    }
    | None => {
      dirs::home_dir()
        .map(|home| {
          home.join(RC_FILE_NAME)
        })
        .filter(|path| path.exists())
    }
  }
}

fn strip_comment(line: &str) -> &str {
  line
    .split_once('#')
    .map_or(line, |(before, _)| before)
    .trim()
}

fn include_target(
  rc_file: &Path,
  target: &str
) -> anyhow::Result<PathBuf> {
  let target = target.trim();
  if target.is_empty() {
    bail!("include needs a path");
  }

  let path =
    expand_tilde(Path::new(target));
  if path.is_absolute() {
    return Ok(path);
  }
  Ok(
    rc_file
      .parent()
      .unwrap_or(Path::new("."))
      .join(path)
  )
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

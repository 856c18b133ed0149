//! Desktop entry files: a lossless model plus the edits applied on integration.

use std::fmt;

use appimage_utils::string::sanitize_for_path;

use crate::error::{AppImageError, Result};

pub const MAIN_GROUP: &str = "Desktop Entry";

const ACTION_GROUP_PREFIX: &str = "Desktop Action ";

/// Characters that force an Exec argument to be quoted.
const EXEC_RESERVED: &[char] = &[
    ' ', '\t', '\n', '"', '\'', '\\', '>', '<', '~', '|', '&', ';', '$', '*', '?', '#', '(',
    ')', '`',
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Blank,
    Comment(String),
    Group(String),
    Entry { key: String, value: String },
}

/// Splits `Name[de]` into (`Name`, `Some("de")`).
fn split_locale(key: &str) -> (&str, Option<&str>) {
    match key.find('[') {
        Some(open) if key.ends_with(']') => (&key[..open], Some(&key[open + 1..key.len() - 1])),
        _ => (key, None),
    }
}

fn with_locale(base: &str, locale: Option<&str>) -> String {
    match locale {
        Some(locale) => format!("{base}[{locale}]"),
        None => base.to_string(),
    }
}

/// A parsed desktop entry that preserves layout, comments and key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesktopEntry {
    lines: Vec<Line>,
}

impl DesktopEntry {
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = Vec::new();
        let mut in_group = false;

        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                lines.push(Line::Blank);
            } else if line.starts_with('#') {
                lines.push(Line::Comment(raw.to_string()));
            } else if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_group = true;
                lines.push(Line::Group(name.to_string()));
            } else if let Some((key, value)) = line.split_once('=') {
                if !in_group {
                    return Err(AppImageError::InvalidParameter(format!(
                        "desktop entry line {} precedes any group",
                        number + 1
                    )));
                }
                lines.push(Line::Entry {
                    key: key.trim_end().to_string(),
                    value: value.trim_start().to_string(),
                });
            } else {
                return Err(AppImageError::InvalidParameter(format!(
                    "desktop entry line {} is not a key-value pair: {line:?}",
                    number + 1
                )));
            }
        }

        Ok(Self { lines })
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            Line::Group(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups().any(|g| g == group)
    }

    /// Index range of the lines that belong to `group`, header excluded.
    fn group_range(&self, group: &str) -> Option<(usize, usize)> {
        let start = self
            .lines
            .iter()
            .position(|line| matches!(line, Line::Group(name) if name == group))?
            + 1;
        let end = self.lines[start..]
            .iter()
            .position(|line| matches!(line, Line::Group(_)))
            .map_or(self.lines.len(), |i| start + i);
        Some((start, end))
    }

    /// Keys of `group` in file order, localized variants included.
    pub fn keys(&self, group: &str) -> Vec<String> {
        let Some((start, end)) = self.group_range(group) else {
            return Vec::new();
        };
        self.lines[start..end]
            .iter()
            .filter_map(|line| match line {
                Line::Entry { key, .. } => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn get(&self, group: &str, key: &str) -> Option<&str> {
        let (start, end) = self.group_range(group)?;
        self.lines[start..end].iter().find_map(|line| match line {
            Line::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Sets `key` in `group`, appending the key (and the group) when missing.
    pub fn set(&mut self, group: &str, key: &str, value: &str) {
        let Some((start, end)) = self.group_range(group) else {
            if self.lines.last().is_some_and(|l| *l != Line::Blank) {
                self.lines.push(Line::Blank);
            }
            self.lines.push(Line::Group(group.to_string()));
            self.lines.push(Line::Entry {
                key: key.to_string(),
                value: value.to_string(),
            });
            return;
        };

        for line in &mut self.lines[start..end] {
            if let Line::Entry { key: k, value: v } = line {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
        }

        // after the group's last entry, ahead of trailing blank lines
        let insert_at = self.lines[start..end]
            .iter()
            .rposition(|line| !matches!(line, Line::Blank))
            .map_or(start, |i| start + i + 1);
        self.lines.insert(
            insert_at,
            Line::Entry {
                key: key.to_string(),
                value: value.to_string(),
            },
        );
    }

    /// Reads a boolean key of the main group.
    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.get(MAIN_GROUP, key)?.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    /// The unlocalized `Name` of the main group.
    pub fn name(&self) -> Result<&str> {
        self.get(MAIN_GROUP, "Name")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppImageError::NotFound("desktop entry has no Name".into()))
    }

    pub fn icon(&self) -> Option<&str> {
        self.get(MAIN_GROUP, "Icon").filter(|icon| !icon.is_empty())
    }

    /// Action identifiers listed in the main group's `Actions` key.
    pub fn actions(&self) -> Vec<String> {
        self.get(MAIN_GROUP, "Actions")
            .map(|value| {
                value
                    .split(';')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Display for DesktopEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            match line {
                Line::Blank => writeln!(f)?,
                Line::Comment(text) => writeln!(f, "{text}")?,
                Line::Group(name) => writeln!(f, "[{name}]")?,
                Line::Entry { key, value } => writeln!(f, "{key}={value}")?,
            }
        }
        Ok(())
    }
}

/// Splits an `Exec` value into arguments following the desktop entry quoting rules.
pub fn split_exec(value: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quoted = false;
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' => quoted = false,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '`' | '$' | '\\')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => current.push('\\'),
                },
                _ => current.push(c),
            }
            continue;
        }

        match c {
            ' ' | '\t' => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            '"' => {
                quoted = true;
                in_arg = true;
            }
            _ => {
                current.push(c);
                in_arg = true;
            }
        }
    }

    if quoted {
        return Err(AppImageError::StringError(format!(
            "unterminated quote in Exec value {value:?}"
        )));
    }
    if in_arg {
        args.push(current);
    }
    Ok(args)
}

/// Joins arguments into an `Exec` value, quoting where required.
pub fn join_exec<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            if !arg.is_empty() && !arg.contains(EXEC_RESERVED) {
                return arg.to_string();
            }
            let mut quoted = String::with_capacity(arg.len() + 2);
            quoted.push('"');
            for c in arg.chars() {
                if matches!(c, '"' | '`' | '$' | '\\') {
                    quoted.push('\\');
                }
                quoted.push(c);
            }
            quoted.push('"');
            quoted
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rewrites a desktop entry so it launches, and is recognisable as, one integrated AppImage.
pub struct EntryEditor<'a> {
    pub appimage_path: &'a str,
    pub vendor_prefix: &'a str,
    pub identifier: &'a str,
}

impl EntryEditor<'_> {
    /// Applies every integration edit.
    ///
    /// # Errors
    ///
    /// * [`AppImageError::InvalidParameter`] if the main group or its `Exec` key is missing.
    /// * [`AppImageError::StringError`] for unparsable `Exec` values.
    pub fn apply(&self, entry: &mut DesktopEntry) -> Result<()> {
        if !entry.has_group(MAIN_GROUP) {
            return Err(AppImageError::InvalidParameter(
                "desktop entry has no [Desktop Entry] group".into(),
            ));
        }
        if entry.get(MAIN_GROUP, "Exec").is_none() {
            return Err(AppImageError::InvalidParameter(
                "desktop entry has no Exec key".into(),
            ));
        }

        self.rewrite_exec(entry, MAIN_GROUP)?;
        entry.set(MAIN_GROUP, "TryExec", self.appimage_path);
        for action in entry.actions() {
            let group = format!("{ACTION_GROUP_PREFIX}{action}");
            if entry.get(&group, "Exec").is_some() {
                self.rewrite_exec(entry, &group)?;
            }
        }

        self.rewrite_icons(entry);
        self.append_version(entry);
        entry.set(MAIN_GROUP, "X-AppImage-Identifier", self.identifier);
        Ok(())
    }

    fn rewrite_exec(&self, entry: &mut DesktopEntry, group: &str) -> Result<()> {
        let exec = entry.get(group, "Exec").unwrap_or_default();
        let mut args = split_exec(exec)?;
        match args.first_mut() {
            Some(first) => *first = self.appimage_path.to_string(),
            None => {
                return Err(AppImageError::InvalidParameter(format!(
                    "empty Exec in [{group}]"
                )))
            }
        }
        entry.set(group, "Exec", &join_exec(&args));
        Ok(())
    }

    /// Prefixed icon name that integrated artifacts are deployed under.
    pub fn icon_name(&self, icon: &str) -> String {
        format!(
            "{}_{}_{}",
            self.vendor_prefix,
            self.identifier,
            sanitize_for_path(icon)
        )
    }

    fn rewrite_icons(&self, entry: &mut DesktopEntry) {
        let groups: Vec<String> = entry.groups().map(str::to_string).collect();
        for group in groups {
            for key in entry.keys(&group) {
                let (base, locale) = split_locale(&key);
                if base != "Icon" {
                    continue;
                }
                let old = entry.get(&group, &key).unwrap_or_default().to_string();
                entry.set(&group, &with_locale("X-AppImage-Old-Icon", locale), &old);
                entry.set(&group, &key, &self.icon_name(&old));
            }
        }
    }

    fn append_version(&self, entry: &mut DesktopEntry) {
        let Some(version) = entry
            .get(MAIN_GROUP, "X-AppImage-Version")
            .filter(|v| !v.is_empty())
            .map(str::to_string)
        else {
            return;
        };

        for key in entry.keys(MAIN_GROUP) {
            let (base, locale) = split_locale(&key);
            if base != "Name" {
                continue;
            }
            let old = entry.get(MAIN_GROUP, &key).unwrap_or_default().to_string();
            if old.contains(&version) {
                continue;
            }
            entry.set(MAIN_GROUP, &with_locale("X-AppImage-Old-Name", locale), &old);
            entry.set(MAIN_GROUP, &key, &format!("{old} ({version})"));
        }
    }
}

use std::{
    env,
    iter::Peekable,
    path::{Path, PathBuf},
    str::Chars,
};

use nix::unistd::{getuid, User};

use crate::error::{PathError, PathResult};

pub trait PathResolver {
    /// Resolves a path string that may contain environment variables.
    ///
    /// Expands `$VAR` and `${VAR}`, replaces a leading `~` with the home directory and makes
    /// relative paths absolute against the current working directory.
    ///
    /// # Errors
    ///
    /// * [`PathError::Empty`] if the path is empty
    /// * [`PathError::CurrentDir`] if the current directory cannot be determined
    /// * [`PathError::MissingEnvVar`] if a referenced variable is undefined
    /// * [`PathError::UnclosedVariable`] for `${` without a closing brace
    ///
    /// # Example
    ///
    /// ```
    /// use appimage_utils::error::PathResult;
    /// use appimage_utils::path::{PathResolver, SystemPathResolver};
    ///
    /// fn main() -> PathResult<()> {
    ///     let resolved = SystemPathResolver.resolve_path("$HOME/Applications")?;
    ///     println!("{}", resolved.display());
    ///     Ok(())
    /// }
    /// ```
    fn resolve_path(&self, path: &str) -> PathResult<PathBuf>;

    /// Returns `$HOME`, falling back to `/home/<user>` for the current uid.
    fn home_dir(&self) -> PathBuf;

    /// `$XDG_CONFIG_HOME` or `$HOME/.config`.
    fn xdg_config_home(&self) -> PathBuf;

    /// `$XDG_DATA_HOME` or `$HOME/.local/share`.
    fn xdg_data_home(&self) -> PathBuf;

    /// `$XDG_CACHE_HOME` or `$HOME/.cache`.
    fn xdg_cache_home(&self) -> PathBuf;
}

/// The default [`PathResolver`] implementation using environment variables and filesystem calls.
pub struct SystemPathResolver;

fn current_username() -> String {
    User::from_uid(getuid())
        .ok()
        .flatten()
        .map(|user| user.name)
        .or_else(|| env::var("USER").ok())
        .unwrap_or_else(|| getuid().to_string())
}

fn env_dir(var: &str) -> Option<PathBuf> {
    env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

impl PathResolver for SystemPathResolver {
    fn resolve_path(&self, path: &str) -> PathResult<PathBuf> {
        let path = path.trim();

        if path.is_empty() {
            return Err(PathError::Empty);
        }

        let path_buf = PathBuf::from(self.expand_variables(path)?);

        if path_buf.is_absolute() {
            Ok(path_buf)
        } else {
            env::current_dir()
                .map(|cwd| cwd.join(path_buf))
                .map_err(|err| PathError::CurrentDir { source: err })
        }
    }

    fn home_dir(&self) -> PathBuf {
        env_dir("HOME").unwrap_or_else(|| PathBuf::from(format!("/home/{}", current_username())))
    }

    fn xdg_config_home(&self) -> PathBuf {
        env_dir("XDG_CONFIG_HOME").unwrap_or_else(|| self.home_dir().join(".config"))
    }

    fn xdg_data_home(&self) -> PathBuf {
        env_dir("XDG_DATA_HOME").unwrap_or_else(|| self.home_dir().join(".local/share"))
    }

    fn xdg_cache_home(&self) -> PathBuf {
        env_dir("XDG_CACHE_HOME").unwrap_or_else(|| self.home_dir().join(".cache"))
    }
}

impl SystemPathResolver {
    fn expand_variables(&self, path: &str) -> PathResult<String> {
        let mut result = String::with_capacity(path.len());
        let mut chars = path.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '$' if chars.peek() == Some(&'{') => {
                    chars.next();
                    let var_name = consume_until(&mut chars, '}')?;
                    self.expand_env_var(&var_name, &mut result, path)?;
                }
                '$' => {
                    let var_name = consume_var_name(&mut chars);
                    if var_name.is_empty() {
                        result.push('$');
                    } else {
                        self.expand_env_var(&var_name, &mut result, path)?;
                    }
                }
                '~' if result.is_empty() => result.push_str(&self.home_dir().to_string_lossy()),
                _ => result.push(c),
            }
        }

        Ok(result)
    }

    fn expand_env_var(&self, var_name: &str, result: &mut String, original: &str) -> PathResult<()> {
        let value = match var_name {
            "HOME" => self.home_dir(),
            "XDG_CONFIG_HOME" => self.xdg_config_home(),
            "XDG_DATA_HOME" => self.xdg_data_home(),
            "XDG_CACHE_HOME" => self.xdg_cache_home(),
            _ => {
                let value = env::var(var_name).map_err(|_| PathError::MissingEnvVar {
                    input: original.into(),
                    var: var_name.into(),
                })?;
                result.push_str(&value);
                return Ok(());
            }
        };
        result.push_str(&value.to_string_lossy());
        Ok(())
    }
}

fn consume_until(chars: &mut Peekable<Chars>, delimiter: char) -> PathResult<String> {
    let mut var_name = String::new();

    for c in chars.by_ref() {
        if c == delimiter {
            return Ok(var_name);
        }
        var_name.push(c);
    }

    Err(PathError::UnclosedVariable {
        input: format!("${{{var_name}"),
    })
}

fn consume_var_name(chars: &mut Peekable<Chars>) -> String {
    let mut var_name = String::new();
    while let Some(c) = chars.next_if(|c| c.is_alphanumeric() || *c == '_') {
        var_name.push(c);
    }
    var_name
}

/// Prefixes a local path with `file://` unless it already carries the scheme.
///
/// No percent-encoding is applied; the result is what the thumbnail and integration
/// identities are hashed over.
pub fn path_to_uri<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref().to_string_lossy();
    if path.starts_with("file://") {
        path.into_owned()
    } else {
        format!("file://{path}")
    }
}

/// See [`PathResolver::resolve_path`].
pub fn resolve_path(path: &str) -> PathResult<PathBuf> {
    SystemPathResolver.resolve_path(path)
}

/// See [`PathResolver::home_dir`].
pub fn home_dir() -> PathBuf {
    SystemPathResolver.home_dir()
}

/// See [`PathResolver::xdg_config_home`].
pub fn xdg_config_home() -> PathBuf {
    SystemPathResolver.xdg_config_home()
}

/// See [`PathResolver::xdg_data_home`].
pub fn xdg_data_home() -> PathBuf {
    SystemPathResolver.xdg_data_home()
}

/// See [`PathResolver::xdg_cache_home`].
pub fn xdg_cache_home() -> PathBuf {
    SystemPathResolver.xdg_cache_home()
}

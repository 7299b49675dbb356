//! # Shell History
//!
//! Recent terminal activity used as context. Three backends are supported:
//! the shell's history file, an asciinema recording of the session, and the
//! scrollback of the current tmux pane(s).

use crate::config::expand_home;
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistorySource {
    #[default]
    Shell,
    Asciinema,
    Tmux,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HistoryOptions {
    /// Number of most recent lines to keep. Zero or less keeps everything.
    pub size: i64,
    pub source: HistorySource,
    /// tmux only: capture every pane of the current window.
    pub all_panes: bool,
    /// Drop the last line, which is the command line that launched us.
    /// Defaults to on for screen recordings and off for history files.
    pub exclude_current: Option<bool>,
    pub cast_file: String,
    /// Overrides `$HISTFILE` for the shell backend.
    pub history_file: Option<String>,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            size: 5,
            source: HistorySource::Shell,
            all_panes: false,
            exclude_current: None,
            cast_file: "~/.assistant.cast".to_string(),
            history_file: None,
        }
    }
}

impl HistoryOptions {
    pub fn excludes_current(&self) -> bool {
        self.exclude_current
            .unwrap_or(self.source != HistorySource::Shell)
    }
}

/// Fetches cleaned history lines and applies the size window.
pub fn recent_history(options: &HistoryOptions, size: i64, all_panes: bool) -> Result<Vec<String>> {
    let lines = match options.source {
        HistorySource::Shell => read_shell_history(options)?,
        HistorySource::Asciinema => read_asciinema_cast(&expand_home(&options.cast_file))?,
        HistorySource::Tmux => read_tmux_panes(all_panes || options.all_panes)?,
    };
    Ok(truncate(lines, size, options.excludes_current()))
}

/// Keeps the last `size` lines (all of them when `size <= 0`), after
/// optionally dropping the in-progress command line.
pub fn truncate(mut lines: Vec<String>, size: i64, exclude_current: bool) -> Vec<String> {
    if exclude_current {
        lines.pop();
    }
    if size > 0 {
        let keep = usize::try_from(size).unwrap_or(usize::MAX);
        if lines.len() > keep {
            lines.drain(..lines.len() - keep);
        }
    }
    lines
}

/// Non-empty lines with runs of whitespace collapsed to one space.
pub fn clean_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect()
}

/// Strips the `: <timestamp>:<duration>;` prefix of zsh extended history.
fn strip_zsh_prefix(line: &str) -> &str {
    if line.starts_with(": ") {
        if let Some((_, command)) = line.split_once(';') {
            return command;
        }
    }
    line
}

/// Parses a history file. Fish stores YAML-like records, everything else is
/// one command per line.
pub fn parse_history_file(contents: &str, fish: bool) -> Vec<String> {
    let commands: Vec<&str> = if fish {
        contents
            .lines()
            .filter_map(|line| line.strip_prefix("- cmd: "))
            .collect()
    } else {
        contents.lines().map(strip_zsh_prefix).collect()
    };
    clean_lines(&commands.join("\n"))
}

fn shell_history_path(options: &HistoryOptions) -> Option<PathBuf> {
    if let Some(file) = &options.history_file {
        return Some(expand_home(file));
    }
    if let Some(file) = std::env::var_os("HISTFILE").filter(|f| !f.is_empty()) {
        return Some(PathBuf::from(file));
    }
    let home = dirs::home_dir()?;
    let shell = std::env::var("SHELL").unwrap_or_default();
    let path = match Path::new(&shell).file_name().and_then(|n| n.to_str()) {
        Some("zsh") => home.join(".zsh_history"),
        Some("fish") => home.join(".local/share/fish/fish_history"),
        _ => home.join(".bash_history"),
    };
    Some(path)
}

fn read_shell_history(options: &HistoryOptions) -> Result<Vec<String>> {
    let path = shell_history_path(options).ok_or_else(|| anyhow!("No shell history file found."))?;
    let bytes = std::fs::read(&path)
        .with_context(|| format!("No shell history file found at {}", path.display()))?;
    let fish = path.ends_with("fish_history");
    Ok(parse_history_file(&String::from_utf8_lossy(&bytes), fish))
}

fn run_capture(program: &str, args: &[&str]) -> Result<String> {
    let output = match Command::new(program).args(args).output() {
        Ok(output) => output,
        Err(e) if e.kind() == ErrorKind::NotFound => bail!("No {program} program found."),
        Err(e) => return Err(e).with_context(|| format!("failed to run {program}")),
    };
    if !output.status.success() {
        bail!(
            "{program} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn read_asciinema_cast(cast_file: &Path) -> Result<Vec<String>> {
    if !cast_file.exists() {
        bail!("No asciinema cast file found at {}.", cast_file.display());
    }
    let cast = cast_file.to_string_lossy();
    let text = run_capture(
        "asciinema",
        &["convert", cast.as_ref(), "-f", "txt", "/dev/stdout"],
    )?;
    Ok(clean_lines(&text))
}

fn read_tmux_panes(all_panes: bool) -> Result<Vec<String>> {
    if std::env::var_os("TMUX").is_none() {
        bail!("Not running inside tmux.");
    }
    if !all_panes {
        return Ok(clean_lines(&run_capture(
            "tmux",
            &["capture-pane", "-p", "-J", "-S", "-"],
        )?));
    }

    let panes = run_capture("tmux", &["list-panes", "-F", "#{pane_id}"])?;
    let mut lines = Vec::new();
    for pane in panes.lines().filter(|p| !p.trim().is_empty()) {
        let text = run_capture("tmux", &["capture-pane", "-p", "-J", "-S", "-", "-t", pane])?;
        lines.extend(clean_lines(&text));
    }
    Ok(lines)
}

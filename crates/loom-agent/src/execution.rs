use crate::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_GREP_MAX_RESULTS: usize = 200;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepOptions {
    pub glob_filter: Option<String>,
    pub case_insensitive: bool,
    pub max_results: Option<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u128,
}

/// Where the built-in tools act. Paths are resolved against
/// [`ExecutionEnvironment::working_directory`] when relative.
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    /// `offset` is a 1-based line number; `limit` a line count.
    async fn read_file(
        &self,
        path: &str,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<String, ToolError>;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), ToolError>;
    async fn file_exists(&self, path: &str) -> Result<bool, ToolError>;

    async fn exec_command(
        &self,
        command: &str,
        timeout_ms: u64,
        working_dir: Option<&str>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecResult, ToolError>;

    async fn grep(
        &self,
        pattern: &str,
        path: &str,
        options: GrepOptions,
    ) -> Result<String, ToolError>;

    async fn glob(&self, pattern: &str, path: &str) -> Result<Vec<String>, ToolError>;

    fn working_directory(&self) -> &Path;
    fn platform(&self) -> &str;
}

#[derive(Clone, Debug)]
pub struct LocalExecutionEnvironment {
    working_directory: PathBuf,
    platform: String,
}

impl LocalExecutionEnvironment {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            platform: std::env::consts::OS.to_string(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.working_directory.join(candidate)
        }
    }

    fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.working_directory)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

fn io_error(action: &str, path: &Path, error: std::io::Error) -> ToolError {
    ToolError::Execution(format!("{action} {} failed: {error}", path.display()))
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && matches!(
            entry.file_name().to_str(),
            Some(".git" | "target" | "node_modules")
        )
}

#[async_trait]
impl ExecutionEnvironment for LocalExecutionEnvironment {
    async fn read_file(
        &self,
        path: &str,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<String, ToolError> {
        let resolved = self.resolve(path);
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|error| io_error("reading", &resolved, error))?;
        if offset.is_none() && limit.is_none() {
            return Ok(content);
        }
        let skip = offset.unwrap_or(1).saturating_sub(1);
        let take = limit.unwrap_or(usize::MAX);
        Ok(content
            .lines()
            .skip(skip)
            .take(take)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), ToolError> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| io_error("creating", parent, error))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|error| io_error("writing", &resolved, error))
    }

    async fn file_exists(&self, path: &str) -> Result<bool, ToolError> {
        let resolved = self.resolve(path);
        tokio::fs::try_exists(&resolved)
            .await
            .map_err(|error| io_error("checking", &resolved, error))
    }

    async fn exec_command(
        &self,
        command: &str,
        timeout_ms: u64,
        working_dir: Option<&str>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecResult, ToolError> {
        let timeout_ms = if timeout_ms == 0 {
            DEFAULT_COMMAND_TIMEOUT_MS
        } else {
            timeout_ms
        };
        let cwd = working_dir
            .map(|dir| self.resolve(dir))
            .unwrap_or_else(|| self.working_directory.clone());

        let mut process = if cfg!(windows) {
            let mut process = tokio::process::Command::new("cmd");
            process.arg("/C").arg(command);
            process
        } else {
            let mut process = tokio::process::Command::new("sh");
            process.arg("-c").arg(command);
            process
        };
        process
            .current_dir(&cwd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(env_vars) = env_vars {
            process.envs(env_vars);
        }

        let started = Instant::now();
        let child = process
            .spawn()
            .map_err(|error| ToolError::Execution(format!("spawning shell failed: {error}")))?;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait_with_output())
            .await
        {
            Ok(Ok(output)) => Ok(ExecResult {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
                timed_out: false,
                duration_ms: started.elapsed().as_millis(),
            }),
            Ok(Err(error)) => Err(ToolError::Execution(format!(
                "waiting for command failed: {error}"
            ))),
            Err(_) => Ok(ExecResult {
                stdout: String::new(),
                stderr: format!("command timed out after {timeout_ms} ms and was killed"),
                exit_code: -1,
                timed_out: true,
                duration_ms: started.elapsed().as_millis(),
            }),
        }
    }

    async fn grep(
        &self,
        pattern: &str,
        path: &str,
        options: GrepOptions,
    ) -> Result<String, ToolError> {
        let regex = regex::RegexBuilder::new(pattern)
            .case_insensitive(options.case_insensitive)
            .build()
            .map_err(|error| ToolError::Validation(format!("invalid regex: {error}")))?;
        let filter = options
            .glob_filter
            .as_deref()
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|error| ToolError::Validation(format!("invalid glob filter: {error}")))?;
        let max_results = options.max_results.unwrap_or(DEFAULT_GREP_MAX_RESULTS);
        let root = self.resolve(path);
        let env = self.clone();

        tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            let walker = walkdir::WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| !is_skipped_dir(entry));
            'files: for entry in walker.filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(filter) = &filter {
                    let name = entry.file_name().to_string_lossy();
                    let relative = env.display_path(entry.path());
                    if !filter.matches(&name) && !filter.matches(&relative) {
                        continue;
                    }
                }
                let Ok(content) = std::fs::read_to_string(entry.path()) else {
                    continue;
                };
                for (index, line) in content.lines().enumerate() {
                    if regex.is_match(line) {
                        matches.push(format!(
                            "{}:{}:{}",
                            env.display_path(entry.path()),
                            index + 1,
                            line
                        ));
                        if matches.len() >= max_results {
                            break 'files;
                        }
                    }
                }
            }
            matches.join("\n")
        })
        .await
        .map_err(|error| ToolError::Execution(format!("grep task failed: {error}")))
    }

    async fn glob(&self, pattern: &str, path: &str) -> Result<Vec<String>, ToolError> {
        let base = self.resolve(path);
        let full_pattern = base.join(pattern).to_string_lossy().into_owned();
        let env = self.clone();
        tokio::task::spawn_blocking(move || {
            let paths = glob::glob(&full_pattern)
                .map_err(|error| ToolError::Validation(format!("invalid glob pattern: {error}")))?;
            let mut matches: Vec<String> = paths
                .filter_map(Result::ok)
                .filter(|path| path.is_file())
                .map(|path| env.display_path(&path))
                .collect();
            matches.sort();
            Ok(matches)
        })
        .await
        .map_err(|error| ToolError::Execution(format!("glob task failed: {error}")))?
    }

    fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    fn platform(&self) -> &str {
        &self.platform
    }
}

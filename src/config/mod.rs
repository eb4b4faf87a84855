use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::supervisor::error::SupervisorError;

/// Default location of the daemon configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/global.toml";
/// Environment variable overriding [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_ENV: &str = "WEBCRAFT_CONFIG";

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct GlobalConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub console: ConsoleConfig,
    pub stop: StopConfig,
    pub monitor: MonitorConfig,
    pub schedule: ScheduleConfig,
    pub update: UpdateConfig,
    pub roster: RosterConfig,
    pub ipc: IpcConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Server root; working directory of the child process
    pub dir: PathBuf,
    pub java_path: String,
    pub jvm_args: Vec<String>,
    /// Server jar relative to `dir`. Autodetected when absent.
    pub jar: Option<String>,
    pub server_args: Vec<String>,
    /// Full argv override (program first). Skips the java/jar resolution.
    pub command: Option<Vec<String>>,
    pub stop_command: String,
    pub list_command: String,
    /// Issued when a player joins; `{player}` is replaced by the user name.
    pub join_command: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            java_path: "java".to_string(),
            jvm_args: vec!["-Xmx4G".to_string()],
            jar: None,
            server_args: vec!["nogui".to_string()],
            command: None,
            stop_command: "stop".to_string(),
            list_command: "list".to_string(),
            join_command: Some("replay start players {player}".to_string()),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub world_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// Restore archives must live under this directory
    pub upload_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            world_dir: PathBuf::from("world"),
            backup_dir: PathBuf::from("backups"),
            upload_dir: PathBuf::from("uploads"),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ConsoleConfig {
    pub chat_capacity: usize,
    pub output_capacity: usize,
    /// Default number of chat entries returned to pollers
    pub chat_snapshot: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            chat_capacity: 500,
            output_capacity: 2000,
            chat_snapshot: 200,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StopConfig {
    pub grace_secs: u64,
    pub terminate_secs: u64,
    pub kill_secs: u64,
    pub poll_millis: u64,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            grace_secs: 30,
            terminate_secs: 10,
            kill_secs: 5,
            poll_millis: 500,
        }
    }
}

impl StopConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn terminate_wait(&self) -> Duration {
        Duration::from_secs(self.terminate_secs)
    }

    pub fn kill_wait(&self) -> Duration {
        Duration::from_secs(self.kill_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_millis.max(1))
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    /// Trailing raw lines handed to the crash classifier
    pub crash_window: usize,
    /// How long an exit waits for the remaining output before classifying
    pub drain_millis: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3,
            crash_window: 80,
            drain_millis: 2000,
        }
    }
}

impl MonitorConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_millis)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// Weekday name as accepted by chrono ("Sun", "sunday", ...)
    pub weekday: String,
    pub hour: u32,
    pub minute: u32,
    pub window_minutes: u32,
    pub poll_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weekday: "Sun".to_string(),
            hour: 4,
            minute: 0,
            window_minutes: 5,
            poll_secs: 30,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UpdateConfig {
    pub enabled: bool,
    pub url: String,
    /// Component file relative to the server dir
    pub component_path: PathBuf,
    /// Regex matched against raw output lines; a match triggers the update task
    pub notice_pattern: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://download.geysermc.org/v2/projects/geyser/versions/latest/builds/latest/downloads/spigot"
                .to_string(),
            component_path: PathBuf::from("plugins/Geyser-Spigot.jar"),
            notice_pattern: r"(?i)there (?:is|'s) a new (?:version|build|update) of geyser available"
                .to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RosterConfig {
    pub poll_secs: u64,
    /// Roster entries with this prefix are web guests and survive reconciliation
    pub guest_prefix: String,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            poll_secs: 60,
            guest_prefix: "WebGuest".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct IpcConfig {
    pub listen: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5000".to_string(),
        }
    }
}

impl GlobalConfig {
    /// Load from `$WEBCRAFT_CONFIG` or `config/global.toml`.
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load() -> Result<Self, SupervisorError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, SupervisorError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                tracing::info!("Loading config from {}", path.display());
                Self::from_toml(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, SupervisorError> {
        let cfg: Self = toml::from_str(content)
            .map_err(|e| SupervisorError::InvalidConfig(format!("config parse error: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.console.chat_capacity == 0 || self.console.output_capacity == 0 {
            return Err(SupervisorError::InvalidConfig(
                "console capacities must be positive".into(),
            ));
        }
        if self.schedule.hour > 23 || self.schedule.minute > 59 {
            return Err(SupervisorError::InvalidConfig(format!(
                "schedule time {:02}:{:02} is out of range",
                self.schedule.hour, self.schedule.minute
            )));
        }
        if self.schedule.window_minutes == 0 || self.schedule.window_minutes > 24 * 60 {
            return Err(SupervisorError::InvalidConfig(
                "schedule.window_minutes must be between 1 and 1440".into(),
            ));
        }
        self.schedule_weekday()?;
        if let Some(argv) = &self.server.command {
            if argv.is_empty() {
                return Err(SupervisorError::InvalidConfig("server.command is empty".into()));
            }
        }
        Ok(())
    }

    pub fn schedule_weekday(&self) -> Result<chrono::Weekday, SupervisorError> {
        self.schedule.weekday.parse::<chrono::Weekday>().map_err(|_| {
            SupervisorError::InvalidConfig(format!("unknown weekday '{}'", self.schedule.weekday))
        })
    }

    pub fn world_path(&self) -> PathBuf {
        self.server.dir.join(&self.paths.world_dir)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.server.dir.join(&self.paths.backup_dir)
    }

    pub fn component_path(&self) -> PathBuf {
        self.server.dir.join(&self.update.component_path)
    }

    pub fn upload_path(&self) -> PathBuf {
        self.server.dir.join(&self.paths.upload_dir)
    }

    /// Resolve a restore archive against the upload directory.
    ///
    /// Relative paths are taken from the upload directory. The result is the
    /// canonical path of an existing file inside it; anything that resolves
    /// elsewhere (absolute paths, `..`, symlinks) is rejected.
    pub fn resolve_upload(&self, archive: &Path) -> Result<PathBuf, SupervisorError> {
        let uploads = self.upload_path();
        let candidate = uploads.join(archive);
        let missing = || SupervisorError::MissingData(candidate.display().to_string());

        let file = candidate.canonicalize().map_err(|_| missing())?;
        if !file.is_file() {
            return Err(missing());
        }
        let root = uploads
            .canonicalize()
            .map_err(|_| SupervisorError::MissingData(uploads.display().to_string()))?;
        if !file.starts_with(&root) {
            return Err(SupervisorError::InvalidConfig(format!(
                "archive {} is outside {}",
                archive.display(),
                uploads.display()
            )));
        }
        Ok(file)
    }

    /// Resolve the fixed argument vector used to spawn the server.
    pub fn command_line(&self) -> Result<(String, Vec<String>), SupervisorError> {
        if let Some(argv) = &self.server.command {
            let (program, args) = argv
                .split_first()
                .ok_or_else(|| SupervisorError::InvalidConfig("server.command is empty".into()))?;
            return Ok((program.clone(), args.to_vec()));
        }

        let jar = match &self.server.jar {
            Some(jar) => jar.clone(),
            None => find_server_jar(&self.server.dir).ok_or_else(|| {
                SupervisorError::InvalidConfig(format!(
                    "no .jar found in {}",
                    self.server.dir.display()
                ))
            })?,
        };

        let mut args = self.server.jvm_args.clone();
        args.push("-jar".to_string());
        args.push(jar);
        args.extend(self.server.server_args.iter().cloned());
        Ok((self.server.java_path.clone(), args))
    }
}

/// First `*.jar` in `dir` (sorted), returned as a file name.
pub fn find_server_jar(dir: &Path) -> Option<String> {
    let pattern = format!(
        "{}/*.jar",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let mut jars: Vec<PathBuf> = glob::glob(&pattern).ok()?.filter_map(|e| e.ok()).collect();
    jars.sort();
    jars.into_iter()
        .find(|p| p.is_file())
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
}

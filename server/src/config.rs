use clap::Parser;
use joblib::ToolConfig;
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Web console for running FSCT on uploaded point clouds
#[derive(Debug, Parser)]
#[clap(name = "fsct-server")]
pub struct Config {
    /// Address to listen on
    #[clap(long, env = "FSCT_BIND", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    /// Directory uploads are stored in. Removed on shutdown.
    #[clap(long, env = "FSCT_UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Directory holding index.html and the modules/ directory
    #[clap(long, env = "FSCT_STATIC_DIR", default_value = "templates")]
    pub static_dir: PathBuf,

    /// Working directory the tool is run from
    #[clap(long, env = "FSCT_TOOL_DIR", default_value = "/forest_tool/FSCT")]
    pub tool_dir: PathBuf,

    /// Executable that runs the tool
    #[clap(long, env = "FSCT_TOOL_PROGRAM", default_value = "python")]
    pub tool_program: String,

    /// Whitespace separated arguments placed before the uploaded file's path
    #[clap(
        long,
        env = "FSCT_TOOL_ARGS",
        default_value = "-u scripts/run.py",
        allow_hyphen_values = true
    )]
    pub tool_args: String,

    /// Program queried for GPU usage
    #[clap(long, env = "FSCT_NVIDIA_SMI", default_value = "nvidia-smi")]
    pub nvidia_smi: String,

    /// Milliseconds between GPU samples on a session
    #[clap(long, env = "FSCT_TELEMETRY_INTERVAL_MS", default_value = "500")]
    pub telemetry_interval_ms: u64,

    /// Largest accepted upload, in MiB
    #[clap(long, env = "FSCT_MAX_UPLOAD_MB", default_value = "4096")]
    pub max_upload_mb: usize,

    /// Skip the startup acknowledgement that this service is insecure
    #[clap(short = 'y', long = "yes")]
    pub accept_insecure: bool,
}

impl Config {
    pub fn tool(&self) -> ToolConfig {
        ToolConfig {
            program: self.tool_program.clone(),
            args: self
                .tool_args
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            working_dir: self.tool_dir.clone(),
        }
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fsct_install() {
        let config = Config::parse_from(["fsct-server"]);
        let tool = config.tool();
        assert_eq!(tool.program, "python");
        assert_eq!(tool.args, vec!["-u", "scripts/run.py"]);
        assert_eq!(tool.working_dir, PathBuf::from("/forest_tool/FSCT"));
        assert_eq!(config.telemetry_interval(), Duration::from_millis(500));
        assert_eq!(config.bind.port(), 5000);
        assert!(!config.accept_insecure);
    }

    #[test]
    fn tool_args_accept_leading_hyphens() {
        let config = Config::parse_from([
            "fsct-server",
            "--tool-program",
            "python3",
            "--tool-args",
            "-u -X dev run.py",
            "-y",
        ]);
        assert_eq!(config.tool().args, vec!["-u", "-X", "dev", "run.py"]);
        assert!(config.accept_insecure);
    }
}

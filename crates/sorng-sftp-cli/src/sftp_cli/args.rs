//! argv assembly for the sftp child.

use crate::sftp_cli::types::SessionConfig;
use std::path::Path;

/// `[program, -P port, -o ConnectTimeout=N, (-i key), (-v), user@host[:dir]]`
pub fn build_argv(config: &SessionConfig, identity: Option<&Path>) -> Vec<String> {
    let mut argv = vec![
        config.program.clone(),
        "-P".to_string(),
        config.port.to_string(),
    ];
    if config.timeout_secs > 0 {
        argv.push("-o".to_string());
        argv.push(format!("ConnectTimeout={}", config.timeout_secs));
    }
    if let Some(key) = identity {
        argv.push("-i".to_string());
        argv.push(key.display().to_string());
    }
    if config.debug {
        argv.push("-v".to_string());
    }
    let mut target = format!("{}@{}", config.username, config.host);
    if let Some(dir) = config.initial_remote_dir() {
        target.push(':');
        target.push_str(&dir);
    }
    argv.push(target);
    argv
}

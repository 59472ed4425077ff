use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use tokio::process::Command;

static SCP_COMMAND: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*scp(\s|$)").expect("valid scp regex"));

/// Whether an exec command line should be served by the SCP engine.
pub fn is_scp_command(command: &str) -> bool {
    SCP_COMMAND.is_match(command)
}

/// Environment for a session command, in precedence order.
///
/// Fixed `PATH` and `LANG` come first, then the client's variables, then the
/// daemon's own `HOME` and `USER`, which clients cannot override.
pub fn build_environment(stored: &HashMap<String, String>, home: &str, user: &str) -> Vec<(String, String)> {
    let mut env = vec![
        ("PATH".to_string(), "/bin:/usr/bin".to_string()),
        ("LANG".to_string(), "en_US.UTF8".to_string()),
    ];

    let mut names: Vec<_> = stored.keys().filter(|k| *k != "HOME" && *k != "USER").collect();
    names.sort();
    env.extend(names.into_iter().map(|name| (name.clone(), stored[name].clone())));

    env.push(("HOME".to_string(), home.to_string()));
    env.push(("USER".to_string(), user.to_string()));
    env
}

/// [`build_environment`] with the daemon's own `HOME` and `USER`.
pub fn session_environment(stored: &HashMap<String, String>) -> Vec<(String, String)> {
    let home = std::env::var("HOME").unwrap_or_default();
    let user = std::env::var("USER").unwrap_or_default();
    build_environment(stored, &home, &user)
}

/// Build `<shell> <args>` with exactly the computed environment.
pub fn shell_command(shell: &str, args: &[String], stored: &HashMap<String, String>) -> Command {
    let mut command = Command::new(shell);
    command.args(args).env_clear().envs(session_environment(stored));
    command
}

//! Shell command shapes run inside managed containers.
//!
//! Kept in one place so every caller (and the in-memory runtime) agrees
//! on their exact argv.

/// Heredoc delimiter used by [`append_file`].
pub const HEREDOC_DELIMITER: &str = "DOCKYARD_EOF";

/// Print a file.
pub fn cat_file(path: &str) -> Vec<String> {
    vec!["cat".to_string(), path.to_string()]
}

/// Print the last `lines` lines of a file.
pub fn tail_file(path: &str, lines: usize) -> Vec<String> {
    vec![
        "tail".to_string(),
        "-n".to_string(),
        lines.to_string(),
        path.to_string(),
    ]
}

/// Append `text` to a file, creating it when absent.
pub fn append_file(path: &str, text: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("cat >> {path} <<'{HEREDOC_DELIMITER}'\n{text}\n{HEREDOC_DELIMITER}"),
    ]
}

/// Remove everything inside `dir`, hidden entries included, keeping `dir`.
pub fn clear_dir(dir: &str) -> Vec<String> {
    let dir = dir.trim_end_matches('/');
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("rm -rf {dir}/* {dir}/.[!.]* {dir}/..?*"),
    ]
}

/// Split an [`append_file`] command back into `(path, text)`.
pub fn parse_append(cmd: &[String]) -> Option<(&str, &str)> {
    let [sh, flag, script] = cmd else {
        return None;
    };
    if sh != "sh" || flag != "-c" {
        return None;
    }
    let rest = script.strip_prefix("cat >> ")?;
    let (path, rest) = rest.split_once(" <<'")?;
    let rest = rest.strip_prefix(HEREDOC_DELIMITER)?.strip_prefix("'\n")?;
    let text = rest.strip_suffix(HEREDOC_DELIMITER)?.strip_suffix('\n')?;
    Some((path, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_round_trips_through_parser() {
        let cmd = append_file("/etc/my.cnf", "[mysqld]\ngeneral_log = 1");
        assert_eq!(
            parse_append(&cmd),
            Some(("/etc/my.cnf", "[mysqld]\ngeneral_log = 1"))
        );
        assert_eq!(parse_append(&cat_file("/etc/my.cnf")), None);
    }

    #[test]
    fn clear_dir_keeps_directory() {
        let cmd = clear_dir("/app/");
        assert_eq!(cmd[2], "rm -rf /app/* /app/.[!.]* /app/..?*");
    }

    #[test]
    fn tail_shape() {
        assert_eq!(tail_file("/var/log/x.log", 10), vec!["tail", "-n", "10", "/var/log/x.log"]);
    }
}

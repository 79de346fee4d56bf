use lazy_static::lazy_static;
use regex::Regex;

use crate::models::ProcessDescriptor;

lazy_static! {
    static ref HOME_DIR: Regex = Regex::new(r"/(?:Users|home)/[^\s/]+").unwrap();
    static ref SYSTEM_DIRS: Regex = Regex::new(
        r"(?P<lead>^|\s)(?:/usr|/opt|/bin|/sbin|/System|/Library|/Applications|/snap|/nix)(?:/[^\s/]*)*/"
    )
    .unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Stable dedup/cache key for a process: name and command with install
/// locations and user home directories stripped, truncated to `max_chars`.
pub fn text_key(name: &str, command: &str, max_chars: usize) -> String {
    let raw = if command.is_empty() || command == name {
        name.to_string()
    } else {
        format!("{name} {command}")
    };
    let homeless = HOME_DIR.replace_all(&raw, "~");
    let stripped = SYSTEM_DIRS.replace_all(&homeless, "$lead");
    let collapsed = WHITESPACE.replace_all(stripped.trim(), " ");
    collapsed.chars().take(max_chars).collect()
}

pub fn descriptor_key(descriptor: &ProcessDescriptor, max_chars: usize) -> String {
    text_key(&descriptor.name, &descriptor.command, max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_system_prefixes() {
        assert_eq!(
            text_key("node", "/usr/local/bin/node server.js", 500),
            "node node server.js"
        );
        assert_eq!(
            text_key("python3", "/opt/homebrew/bin/python3 -m http.server", 500),
            "python3 python3 -m http.server"
        );
    }

    #[test]
    fn home_directories_collapse_across_users() {
        let a = text_key("code", "/home/alice/.vscode/bin/code --wait", 500);
        let b = text_key("code", "/home/bob/.vscode/bin/code --wait", 500);
        assert_eq!(a, b);
        assert!(a.contains("~/.vscode"));
    }

    #[test]
    fn command_equal_to_name_is_not_repeated() {
        assert_eq!(text_key("Safari", "Safari", 500), "Safari");
        assert_eq!(text_key("kworker/0:1", "", 500), "kworker/0:1");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let long = "é".repeat(600);
        let key = text_key("x", &long, 500);
        assert_eq!(key.chars().count(), 500);
    }

    #[test]
    fn whitespace_is_normalized() {
        assert_eq!(text_key("sh", "sh   -c\t  true", 500), "sh sh -c true");
    }
}

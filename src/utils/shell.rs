//! Shell escaping and quoting for commands sent to remote hosts.

/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single argument for shell execution.
/// - Empty strings become `''`
/// - Strings with shell metacharacters are wrapped in single quotes
/// - Embedded single quotes are escaped
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    const SHELL_META: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", escape_single_quote_content(arg))
}

/// Quote a path for shell execution (always quotes).
pub fn quote_path(path: &str) -> String {
    format!("'{}'", escape_single_quote_content(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_arg_leaves_plain_binaries_alone() {
        assert_eq!(quote_arg("composer"), "composer");
        assert_eq!(quote_arg("node"), "node");
    }

    #[test]
    fn quote_arg_wraps_metacharacters() {
        assert_eq!(quote_arg("npm install"), "'npm install'");
        assert_eq!(quote_arg("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn quote_arg_escapes_single_quote() {
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
    }

    #[test]
    fn quote_arg_empty() {
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn quote_path_always_quotes() {
        assert_eq!(quote_path("/srv/blog/current"), "'/srv/blog/current'");
        assert_eq!(quote_path("/srv/it's/current"), "'/srv/it'\\''s/current'");
    }
}

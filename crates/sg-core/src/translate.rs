//! Dialect adaptation between PowerShell and POSIX shells.
//!
//! Three text passes run in a fixed order: paths, then environment-variable
//! tokens, then command verbs. Each pass only produces text the matching
//! pass for the same target no longer recognizes, so adapting twice for one
//! platform gives the same result as adapting once. Anything not recognized
//! is copied through untouched, quoting and brackets included.

use std::sync::OnceLock;

use regex::{Captures, Regex, RegexBuilder};
use sg_protocol::Platform;

/// Verb alias table: (POSIX, PowerShell).
pub const VERB_ALIASES: &[(&str, &str)] = &[
    ("ls", "Get-ChildItem"),
    ("cat", "Get-Content"),
    ("cp", "Copy-Item"),
    ("mv", "Move-Item"),
    ("rm", "Remove-Item"),
    ("mkdir", "New-Item -ItemType Directory"),
    ("touch", "New-Item"),
    ("pwd", "Get-Location"),
    ("cd", "Set-Location"),
    ("echo", "Write-Output"),
    ("ps", "Get-Process"),
    ("kill", "Stop-Process"),
    ("grep", "Select-String"),
    ("which", "Get-Command"),
    ("man", "Get-Help"),
    ("clear", "Clear-Host"),
    ("sleep", "Start-Sleep"),
    ("sort", "Sort-Object"),
    ("date", "Get-Date"),
];

/// Well-known variables: (POSIX, Windows).
const ENV_ALIASES: &[(&str, &str)] = &[
    ("HOME", "USERPROFILE"),
    ("USER", "USERNAME"),
    ("SHELL", "ComSpec"),
    ("TMPDIR", "TEMP"),
    ("HOSTNAME", "COMPUTERNAME"),
];

/// POSIX directories and their Windows counterparts, most specific first.
const UNIX_DIRS: &[(&str, &str)] = &[
    ("~/.config", "$env:APPDATA"),
    ("~/.local/share", "$env:LOCALAPPDATA"),
    ("~", "$env:USERPROFILE"),
    ("/var/tmp", "$env:TEMP"),
    ("/tmp", "$env:TEMP"),
    ("/usr/local/bin", "$env:ProgramFiles"),
    ("/usr/bin", "$env:ProgramFiles"),
    ("/bin", "$env:ProgramFiles"),
    ("/opt", "$env:ProgramFiles"),
    ("/etc", "$env:ProgramData"),
];

/// Windows directories and their POSIX counterparts, most specific first.
/// Matched case-insensitively.
const WINDOWS_DIRS: &[(&str, &str)] = &[
    ("$env:TEMP", "/tmp"),
    ("$env:TMP", "/tmp"),
    ("%TEMP%", "/tmp"),
    ("%TMP%", "/tmp"),
    (r"C:\Windows\Temp", "/tmp"),
    ("$env:APPDATA", "~/.config"),
    ("%APPDATA%", "~/.config"),
    ("$env:LOCALAPPDATA", "~/.local/share"),
    ("%LOCALAPPDATA%", "~/.local/share"),
    ("$env:USERPROFILE", "~"),
    ("%USERPROFILE%", "~"),
    ("$env:ProgramFiles", "/usr/local/bin"),
    ("%ProgramFiles%", "/usr/local/bin"),
    (r"C:\Program Files (x86)", "/usr/local/bin"),
    (r"C:\Program Files", "/usr/local/bin"),
    ("$env:ProgramData", "/etc"),
    ("%ProgramData%", "/etc"),
    (r"C:\ProgramData", "/etc"),
];

/// Characters that end a path token.
const PATH_END: &str = r#"\s"'|;&<>,(){}"#;

/// Compiled patterns for the three passes.
pub struct Translator {
    unix_path: Regex,
    windows_path: Regex,
    unix_home: Regex,
    unix_var: Regex,
    windows_var: Regex,
    unix_verb: Regex,
    windows_verb: Regex,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new()
    }
}

impl Translator {
    pub fn new() -> Self {
        let build = |pattern: &str, case_insensitive: bool| {
            RegexBuilder::new(pattern)
                .case_insensitive(case_insensitive)
                .multi_line(true)
                .build()
                .expect("translator pattern is valid and tested")
        };

        // `${NAME}` inside a path stays part of it despite the braces.
        let path_char = format!(r"(?:\$\{{[A-Za-z_][A-Za-z0-9_]*\}}|[^{PATH_END}])");

        Self {
            unix_path: build(
                &format!(
                    r#"(?P<pre>^|[\s"'=(,])(?P<path>(?:~|\$HOME\b|\$\{{HOME\}})(?:/{path_char}*)?|/{path_char}*)"#
                ),
                false,
            ),
            windows_path: build(
                &format!(
                    r#"(?P<pre>^|[\s"'=(,])(?P<path>(?:[a-z]:\\(?:program files(?: \(x86\))?)?|\$env:[a-z_][a-z0-9_]*|%[a-z_][a-z0-9_]*%)[^{PATH_END}]*)"#
                ),
                true,
            ),
            unix_home: build(
                &format!(r#"(?P<pre>^|[\s"'=(,])/(?P<root>home|Users)/(?P<user>[^{PATH_END}/]+)"#),
                false,
            ),
            // Upper-case names only: `$_`, `$true`, `$PSItem` and other
            // PowerShell variables are left alone.
            unix_var: build(r"\$(?:\{(?P<braced>[A-Z][A-Z0-9_]*)\}|(?P<bare>[A-Z][A-Z0-9_]*)\b)", false),
            windows_var: build(
                r"(?i:\$env:)(?P<ps>[A-Za-z_][A-Za-z0-9_]*)|%(?P<cmd>[A-Za-z_][A-Za-z0-9_]+)%",
                false,
            ),
            unix_verb: build(&verb_pattern(VERB_ALIASES.iter().map(|(u, _)| *u)), false),
            windows_verb: build(&verb_pattern(VERB_ALIASES.iter().map(|(_, w)| *w)), true),
        }
    }

    /// Adapt `command` to the dialect of `target`.
    pub fn adapt(&self, command: &str, target: Platform) -> String {
        if command.trim().is_empty() {
            return command.to_string();
        }
        let paths = self.translate_paths(command, target);
        let vars = self.translate_env_vars(&paths, target);
        self.translate_verbs(&vars, target)
    }

    pub fn translate_paths(&self, text: &str, target: Platform) -> String {
        match target {
            Platform::Windows => self
                .unix_path
                .replace_all(text, |caps: &Captures| {
                    let whole = &caps[0];
                    let path = &caps["path"];
                    if !ends_token(text, caps) || is_switch(path) {
                        return whole.to_string();
                    }
                    match unix_to_windows_path(path) {
                        Some(mapped) => format!("{}{mapped}", &caps["pre"]),
                        None => whole.to_string(),
                    }
                })
                .into_owned(),
            Platform::Linux | Platform::MacOs => {
                let converted = self
                    .windows_path
                    .replace_all(text, |caps: &Captures| {
                        match windows_to_unix_path(&caps["path"], target) {
                            Some(mapped) => format!("{}{mapped}", &caps["pre"]),
                            None => caps[0].to_string(),
                        }
                    })
                    .into_owned();
                let root = if target == Platform::MacOs { "Users" } else { "home" };
                self.unix_home
                    .replace_all(&converted, |caps: &Captures| {
                        format!("{}/{root}/{}", &caps["pre"], &caps["user"])
                    })
                    .into_owned()
            }
        }
    }

    pub fn translate_env_vars(&self, text: &str, target: Platform) -> String {
        match target {
            Platform::Windows => self
                .unix_var
                .replace_all(text, |caps: &Captures| {
                    let name = caps
                        .name("braced")
                        .or_else(|| caps.name("bare"))
                        .map_or("", |m| m.as_str());
                    format!("$env:{}", windows_var_name(name))
                })
                .into_owned(),
            Platform::Linux | Platform::MacOs => self
                .windows_var
                .replace_all(text, |caps: &Captures| {
                    let name = caps
                        .name("ps")
                        .or_else(|| caps.name("cmd"))
                        .map_or("", |m| m.as_str());
                    format!("${}", unix_var_name(name))
                })
                .into_owned(),
        }
    }

    pub fn translate_verbs(&self, text: &str, target: Platform) -> String {
        let (regex, to_windows) = match target {
            Platform::Windows => (&self.unix_verb, true),
            Platform::Linux | Platform::MacOs => (&self.windows_verb, false),
        };
        regex
            .replace_all(text, |caps: &Captures| {
                let whole = &caps[0];
                let Some(verb) = caps.name("verb") else {
                    return whole.to_string();
                };
                if !ends_token(text, caps) || in_quotes(text, verb.start()) {
                    return whole.to_string();
                }
                let mapped = if to_windows {
                    VERB_ALIASES
                        .iter()
                        .find(|(unix, _)| *unix == verb.as_str())
                        .map(|(_, win)| *win)
                } else {
                    let spoken = collapse(verb.as_str());
                    VERB_ALIASES
                        .iter()
                        .find(|(_, win)| win.eq_ignore_ascii_case(&spoken))
                        .map(|(unix, _)| *unix)
                };
                match mapped {
                    Some(m) => format!("{}{}{m}", &caps["pre"], &caps["ws"]),
                    None => whole.to_string(),
                }
            })
            .into_owned()
    }
}

/// Statement-boundary anchored alternation of `names`, longest first so
/// `New-Item -ItemType Directory` wins over `New-Item`.
fn verb_pattern<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let mut alts: Vec<String> = names
        .map(|n| regex::escape(n).replace(' ', r"\s+"))
        .collect();
    alts.sort_by_key(|a| std::cmp::Reverse(a.len()));
    format!(
        r"(?P<pre>^|\|\||&&|[|;])(?P<ws>[ \t]*)(?P<verb>{})",
        alts.join("|")
    )
}

/// The match is a whole token: followed by end of text, whitespace or a
/// statement separator.
fn ends_token(text: &str, caps: &Captures) -> bool {
    let Some(m) = caps.get(0) else {
        return false;
    };
    match text[m.end()..].chars().next() {
        None => true,
        Some(c) => {
            c.is_whitespace()
                || matches!(c, '|' | ';' | '&' | '(' | ')' | '{' | '}' | '"' | '\'' | ',' | '<' | '>')
        }
    }
}

fn in_quotes(text: &str, pos: usize) -> bool {
    let mut single = false;
    let mut double = false;
    for (i, c) in text.char_indices() {
        if i >= pos {
            break;
        }
        match c {
            '\'' if !double => single = !single,
            '"' if !single => double = !double,
            _ => {}
        }
    }
    single || double
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `/q`, `/s`, `/?`: cmd.exe switches, not paths. Anything longer is a
/// root directory.
fn is_switch(path: &str) -> bool {
    match path.strip_prefix('/') {
        Some("?") => true,
        Some(body) => body.len() == 1 && body.chars().all(|c| c.is_ascii_alphanumeric()),
        None => false,
    }
}

/// `rest` if `path` is `prefix` or `prefix` followed by a separator.
fn strip_component<'a>(path: &'a str, prefix: &str, ignore_case: bool) -> Option<&'a str> {
    let head = path.get(..prefix.len())?;
    let same = if ignore_case {
        head.eq_ignore_ascii_case(prefix)
    } else {
        head == prefix
    };
    if !same {
        return None;
    }
    let rest = &path[prefix.len()..];
    if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') {
        Some(rest)
    } else {
        None
    }
}

fn unix_to_windows_path(path: &str) -> Option<String> {
    let path = if let Some(rest) = path
        .strip_prefix("${HOME}")
        .or_else(|| path.strip_prefix("$HOME"))
    {
        format!("~{rest}")
    } else {
        path.to_string()
    };

    for (prefix, replacement) in UNIX_DIRS {
        if let Some(rest) = strip_component(&path, prefix, false) {
            return Some(format!("{replacement}{}", rest.replace('/', "\\")));
        }
    }
    for root in ["/home/", "/Users/"] {
        if let Some(rest) = path.strip_prefix(root) {
            if !rest.is_empty() {
                return Some(format!(r"C:\Users\{}", rest.replace('/', "\\")));
            }
        }
    }
    if path.starts_with('/') {
        return Some(format!("C:{}", path.replace('/', "\\")));
    }
    None
}

fn windows_to_unix_path(path: &str, target: Platform) -> Option<String> {
    for (prefix, replacement) in WINDOWS_DIRS {
        if let Some(rest) = strip_component(path, prefix, true) {
            return Some(format!("{replacement}{}", rest.replace('\\', "/")));
        }
    }

    let bytes = path.as_bytes();
    let is_drive = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && bytes[2] == b'\\';
    if !is_drive {
        // `$env:PATH` and friends are variables, not directories.
        return None;
    }

    let rest = &path[2..];
    if let Some(user_path) = strip_component(rest, r"\Users", true) {
        if user_path.len() > 1 {
            let root = if target == Platform::MacOs { "/Users" } else { "/home" };
            return Some(format!("{root}{}", user_path.replace('\\', "/")));
        }
    }
    Some(rest.replace('\\', "/"))
}

fn windows_var_name(unix: &str) -> &str {
    ENV_ALIASES
        .iter()
        .find(|(u, _)| *u == unix)
        .map_or(unix, |(_, w)| *w)
}

fn unix_var_name(windows: &str) -> &str {
    if windows.eq_ignore_ascii_case("TMP") {
        return "TMPDIR";
    }
    ENV_ALIASES
        .iter()
        .find(|(_, w)| w.eq_ignore_ascii_case(windows))
        .map_or(windows, |(u, _)| *u)
}

/// The process-wide translator.
pub fn translator() -> &'static Translator {
    static TRANSLATOR: OnceLock<Translator> = OnceLock::new();
    TRANSLATOR.get_or_init(Translator::new)
}

/// Adapt `command` for `target` with the process-wide translator.
pub fn adapt_for_platform(command: &str, target: Platform) -> String {
    translator().adapt(command, target)
}

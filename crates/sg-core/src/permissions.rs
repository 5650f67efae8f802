//! Privilege detection.
//!
//! Each permission has its own group of case-insensitive patterns, evaluated
//! independently over the whole command text. Read-only verbs have no group,
//! so a pipeline of `Get-*`/`Select-Object`/`grep` stages yields an empty set.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use sg_protocol::{Permission, PermissionSet};

const ADMIN_PATTERNS: &[&str] = &[
    // Machine-scope registry writes
    r"\b(?:set|new|remove)-itemproperty\b.*(?:\bhklm:|\bhkey_local_machine\b)",
    r"(?:\bhklm:|\bhkey_local_machine\b).*\b(?:set|new|remove)-itemproperty\b",
    r"\breg(?:\.exe)?\s+(?:add|delete|import)\s+(?:hklm|hkey_local_machine)\b",
    // Service control
    r"\b(?:start|stop|restart|set|new|remove|suspend|resume)-service\b",
    r"\bsc(?:\.exe)?\s+(?:start|stop|config|create|delete)\b",
    r"\bsystemctl\s+(?:start|stop|restart|reload|enable|disable|mask)\b",
    r"\bservice\s+\S+\s+(?:start|stop|restart|reload)\b",
    // Local users and groups
    r"\b(?:new|set|remove|enable|disable)-localuser\b",
    r"\b(?:add|remove)-localgroupmember\b",
    r"\b(?:new|remove)-localgroup\b",
    r"\b(?:useradd|userdel|usermod|groupadd|groupdel|chpasswd)\b",
    r"\bnet(?:\.exe)?\s+(?:user|localgroup)\b",
    r"\bset-executionpolicy\b",
    // Power state
    r"\b(?:stop-computer|restart-computer|shutdown|reboot|poweroff|halt)\b",
    // Explicit elevation
    r"\b(?:sudo|doas|runas)\b",
    r"-verb\s+runas\b",
];

// POSIX verbs only count in command position: line start or right after a
// statement separator.
const WRITE_PATTERNS: &[&str] = &[
    r"\b(?:new|copy|move|rename|remove)-item\b",
    r"\b(?:set|add|clear)-content\b",
    r"\bout-file\b",
    r"\b(?:set|new|remove|rename)-itemproperty\b",
    r"(?:^|[|;&(]\s*)(?:sudo\s+)?(?:cp|mv|rm|rmdir|mkdir|touch|tee|ln|chmod|chown|truncate)\b",
    // Output redirection to a file. `2>&1`, `->` and `=>` are not writes.
    r"(?:^|[^\d&>=<-])>>?\s*[^\s&>=]",
];

const EXECUTE_PATTERNS: &[&str] = &[
    r"\b(?:start-process|invoke-expression|invoke-command|start-job|invoke-item)\b",
    r"\biex\b",
    // PowerShell call operator
    r#"(?:^|[|;({]\s*)&\s*["'$\w.\\/]"#,
    // Script invocation by relative path
    r"(?:^|[|;&(]\s*)\.{1,2}[\\/]",
    r"\b(?:ba|z|da|k)?sh\s+-c\b",
    r"\b(?:pwsh|powershell|cmd)(?:\.exe)?\s+(?:-c|/c|-command|-file)\b",
    r"(?:^|[|;&(]\s*)(?:python3?|node|perl|ruby)\b",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .expect("permission pattern is valid and tested")
        })
        .collect()
}

static GROUPS: LazyLock<Vec<(Permission, Vec<Regex>)>> = LazyLock::new(|| {
    vec![
        (Permission::Admin, compile(ADMIN_PATTERNS)),
        (Permission::Write, compile(WRITE_PATTERNS)),
        (Permission::Execute, compile(EXECUTE_PATTERNS)),
    ]
});

/// Maps a command to the privilege categories it needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionAnalyzer;

impl PermissionAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Every permission whose group has at least one match. Pure; the result
    /// does not depend on letter case.
    pub fn check_permissions(&self, command: &str) -> PermissionSet {
        let mut set = PermissionSet::new();
        if command.trim().is_empty() {
            return set;
        }
        for (permission, patterns) in GROUPS.iter() {
            if patterns.iter().any(|re| re.is_match(command)) {
                tracing::trace!(permission = permission.as_str(), "permission required");
                set.insert(*permission);
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perms(command: &str) -> PermissionSet {
        PermissionAnalyzer::new().check_permissions(command)
    }

    fn set(items: &[Permission]) -> PermissionSet {
        items.iter().copied().collect()
    }

    #[test]
    fn service_control_is_admin_only() {
        assert_eq!(perms("Stop-Service -Name Spooler"), set(&[Permission::Admin]));
    }

    #[test]
    fn read_only_pipelines_need_nothing() {
        for cmd in [
            "Get-Process | Sort-Object CPU",
            "Get-ChildItem C:\\ | Where-Object { $_.Length -gt 1000 } | Select-Object Name",
            "Get-Content log.txt | Measure-Object -Line",
            "Get-Service | Format-Table -AutoSize",
            "ls -la /tmp | grep foo",
            "cat /etc/hosts | sort | uniq",
            "ps aux 2>&1 | head",
            "",
        ] {
            assert!(perms(cmd).is_empty(), "{cmd} -> {:?}", perms(cmd));
        }
    }

    #[test]
    fn write_verbs() {
        for cmd in [
            "New-Item -ItemType File notes.txt",
            "Copy-Item a.txt b.txt",
            "Get-Process | Out-File procs.txt",
            "Set-Content -Path x.txt -Value 1",
            "cp a b",
            "ls; mkdir build",
            "echo hi > out.txt",
            "echo hi>>out.txt",
        ] {
            assert!(perms(cmd).contains(Permission::Write), "{cmd}");
        }
    }

    #[test]
    fn execute_verbs() {
        for cmd in [
            "Start-Process notepad.exe",
            "Invoke-Expression $code",
            "iex (Get-Content script.ps1 -Raw)",
            "& \"C:\\tools\\run.exe\" --fast",
            ".\\deploy.ps1",
            "./build.sh --release",
            "bash -c 'echo hi'",
            "python script.py",
        ] {
            assert!(perms(cmd).contains(Permission::Execute), "{cmd}");
        }
        assert!(!perms("make && cargo build").contains(Permission::Execute));
    }

    #[test]
    fn admin_categories() {
        for cmd in [
            "Set-ItemProperty -Path HKLM:\\Software\\Foo -Name Bar -Value 1",
            "reg add HKLM\\Software\\Foo /v Bar /d 1",
            "New-LocalUser -Name svc",
            "Add-LocalGroupMember -Group Administrators -Member svc",
            "useradd deploy",
            "net user bob /add",
            "Set-ExecutionPolicy Unrestricted",
            "Restart-Computer",
            "sudo apt update",
            "Start-Process pwsh -Verb RunAs",
        ] {
            assert!(perms(cmd).contains(Permission::Admin), "{cmd}");
        }
    }

    #[test]
    fn user_scope_registry_is_not_admin() {
        let p = perms("Set-ItemProperty -Path HKCU:\\Software\\Foo -Name Bar -Value 1");
        assert_eq!(p, set(&[Permission::Write]));
    }

    #[test]
    fn groups_are_independent() {
        let p = perms("sudo cp a /etc/b && ./reload.sh");
        assert_eq!(
            p,
            set(&[Permission::Write, Permission::Execute, Permission::Admin])
        );
    }

    #[test]
    fn case_does_not_matter() {
        for cmd in [
            "Stop-Service -Name Spooler",
            "Get-Process | Sort-Object CPU",
            "echo hi > out.txt",
            "Set-ItemProperty -Path HKLM:\\Software\\Foo",
            "./build.sh",
            "rm -rf ./target",
        ] {
            assert_eq!(perms(cmd), perms(&cmd.to_uppercase()), "{cmd}");
        }
    }
}

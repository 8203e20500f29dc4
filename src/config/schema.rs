//! Static settings table.
//!
//! Every setting devbox understands is declared here with its kind, its
//! built-in default and the section it is rendered under in the template.

/// Setting names, shared by the file, the environment and `--set`.
pub mod keys {
    pub const CONTAINER_NAME: &str = "CONTAINER_NAME";
    pub const IMAGE_NAME: &str = "IMAGE_NAME";
    pub const DOCKERFILE: &str = "DOCKERFILE";
    pub const BUILD_CONTEXT: &str = "BUILD_CONTEXT";
    pub const WORKSPACE_DIR: &str = "WORKSPACE_DIR";
    pub const SHELL_COMMAND: &str = "SHELL_COMMAND";
    pub const MEMORY_LIMIT_MB: &str = "MEMORY_LIMIT_MB";
    pub const HEALTH_PROBE: &str = "HEALTH_PROBE";
    pub const HEALTH_PROBE_INTERVAL: &str = "HEALTH_PROBE_INTERVAL";

    pub const HTTP_PROXY: &str = "HTTP_PROXY";
    pub const HTTPS_PROXY: &str = "HTTPS_PROXY";
    pub const NO_PROXY: &str = "NO_PROXY";
    pub const HTTP_PORT: &str = "HTTP_PORT";
    pub const NOTEBOOK_PORT: &str = "NOTEBOOK_PORT";
    pub const DEBUG_PORT: &str = "DEBUG_PORT";
    pub const NETWORK_ISOLATION: &str = "NETWORK_ISOLATION";

    pub const BASE_REGISTRY: &str = "BASE_REGISTRY";
    pub const PIP_INDEX_URL: &str = "PIP_INDEX_URL";
    pub const NPM_REGISTRY: &str = "NPM_REGISTRY";

    pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
    pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
    pub const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
    pub const AWS_PROFILE: &str = "AWS_PROFILE";
    pub const AWS_REGION: &str = "AWS_REGION";
    pub const AWS_SHARED_CREDENTIALS_FILE: &str = "AWS_SHARED_CREDENTIALS_FILE";

    pub const GIT_USER_NAME: &str = "GIT_USER_NAME";
    pub const GIT_USER_EMAIL: &str = "GIT_USER_EMAIL";

    pub const CERT_DIR: &str = "CERT_DIR";
    pub const INSTALL_HOST_CERTS: &str = "INSTALL_HOST_CERTS";

    pub const READONLY_ROOTFS: &str = "READONLY_ROOTFS";
    pub const EXTRA_CAPABILITIES: &str = "EXTRA_CAPABILITIES";
    pub const TMPFS_SIZE: &str = "TMPFS_SIZE";
    pub const SECCOMP_PROFILE: &str = "SECCOMP_PROFILE";
}

/// How a raw string is validated and what it turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    /// Free-form text
    Text,
    /// Container or image name (`[a-zA-Z0-9][a-zA-Z0-9_.-]*`)
    Name,
    /// Text that must never be logged or displayed
    Secret,
    /// TCP port, 1-65535
    Port,
    /// true/false, yes/no, on/off, 1/0
    Bool,
    /// Unsigned integer
    Integer,
    /// Filesystem path (relative paths are taken from the project root)
    Path,
    /// Absolute URL
    Url,
    /// Proxy URL; `http://` is assumed when the scheme is missing
    ProxyUrl,
    /// Comma-separated list
    List,
    /// Byte size with optional k/m/g suffix
    Size,
}

impl std::fmt::Display for SettingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SettingKind::Text => "text",
            SettingKind::Name => "name",
            SettingKind::Secret => "secret",
            SettingKind::Port => "port",
            SettingKind::Bool => "boolean",
            SettingKind::Integer => "integer",
            SettingKind::Path => "path",
            SettingKind::Url => "URL",
            SettingKind::ProxyUrl => "proxy URL",
            SettingKind::List => "list",
            SettingKind::Size => "size",
        };
        write!(f, "{}", name)
    }
}

/// Declaration of one setting.
#[derive(Debug)]
pub struct Setting {
    pub name: &'static str,
    pub kind: SettingKind,
    /// Built-in default; empty means "unset" and is only allowed for optional settings
    pub default: &'static str,
    pub optional: bool,
    /// Also read from the bare environment variable name (and aliases), not only `DEVBOX_<NAME>`
    pub ambient: bool,
    pub aliases: &'static [&'static str],
    pub section: Section,
    pub description: &'static str,
}

/// Template section a setting is rendered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Section {
    Container,
    Network,
    Registry,
    Credentials,
    Git,
    Certificates,
    Security,
}

impl Section {
    pub const ALL: [Section; 7] = [
        Section::Container,
        Section::Network,
        Section::Registry,
        Section::Credentials,
        Section::Git,
        Section::Certificates,
        Section::Security,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Section::Container => "Container",
            Section::Network => "Network and ports",
            Section::Registry => "Registries",
            Section::Credentials => "Cloud credentials",
            Section::Git => "Git identity",
            Section::Certificates => "Certificates",
            Section::Security => "Security",
        }
    }
}

const fn required(
    name: &'static str,
    kind: SettingKind,
    default: &'static str,
    section: Section,
    description: &'static str,
) -> Setting {
    Setting {
        name,
        kind,
        default,
        optional: false,
        ambient: false,
        aliases: &[],
        section,
        description,
    }
}

const fn optional(
    name: &'static str,
    kind: SettingKind,
    section: Section,
    description: &'static str,
) -> Setting {
    Setting {
        name,
        kind,
        default: "",
        optional: true,
        ambient: false,
        aliases: &[],
        section,
        description,
    }
}

const fn ambient(mut setting: Setting, aliases: &'static [&'static str]) -> Setting {
    setting.ambient = true;
    setting.aliases = aliases;
    setting
}

use keys::*;

/// All settings in template order.
pub static SETTINGS: &[Setting] = &[
    required(CONTAINER_NAME, SettingKind::Name, "devbox", Section::Container,
        "Name of the managed container"),
    required(IMAGE_NAME, SettingKind::Name, "devbox", Section::Container,
        "Repository name of the built image; the tag is derived from the build inputs"),
    required(DOCKERFILE, SettingKind::Path, "container/Dockerfile", Section::Container,
        "Dockerfile used by `devbox build`"),
    required(BUILD_CONTEXT, SettingKind::Path, "container", Section::Container,
        "Build context directory"),
    optional(WORKSPACE_DIR, SettingKind::Path, Section::Container,
        "Host directory mounted at /workspace (default: .devbox/workspace)"),
    required(SHELL_COMMAND, SettingKind::Text, "/bin/bash", Section::Container,
        "Command started by `devbox shell`"),
    required(MEMORY_LIMIT_MB, SettingKind::Integer, "0", Section::Container,
        "Memory limit in MiB, 0 for no limit"),
    required(HEALTH_PROBE, SettingKind::Bool, "false", Section::Container,
        "Run a background resource probe inside the container"),
    required(HEALTH_PROBE_INTERVAL, SettingKind::Integer, "60", Section::Container,
        "Seconds between health probe samples"),
    ambient(optional(HTTP_PROXY, SettingKind::ProxyUrl, Section::Network,
        "Proxy for HTTP traffic during build and inside the container"), &["http_proxy"]),
    ambient(optional(HTTPS_PROXY, SettingKind::ProxyUrl, Section::Network,
        "Proxy for HTTPS traffic during build and inside the container"), &["https_proxy"]),
    ambient(optional(NO_PROXY, SettingKind::Text, Section::Network,
        "Comma-separated hosts that bypass the proxy"), &["no_proxy"]),
    required(HTTP_PORT, SettingKind::Port, "8080", Section::Network,
        "Host port for the http service"),
    required(NOTEBOOK_PORT, SettingKind::Port, "8888", Section::Network,
        "Host port for the notebook service"),
    required(DEBUG_PORT, SettingKind::Port, "5678", Section::Network,
        "Host port for the debugger"),
    required(NETWORK_ISOLATION, SettingKind::Bool, "false", Section::Network,
        "Attach the container to an internal network with no outbound access"),
    optional(BASE_REGISTRY, SettingKind::Text, Section::Registry,
        "Registry host that base images are pulled from (build argument)"),
    ambient(optional(PIP_INDEX_URL, SettingKind::Url, Section::Registry,
        "Python package index (build argument)"), &[]),
    ambient(optional(NPM_REGISTRY, SettingKind::Url, Section::Registry,
        "npm registry (build argument)"), &["npm_config_registry"]),
    ambient(optional(AWS_ACCESS_KEY_ID, SettingKind::Text, Section::Credentials,
        "Access key id; takes precedence over AWS_PROFILE"), &[]),
    ambient(optional(AWS_SECRET_ACCESS_KEY, SettingKind::Secret, Section::Credentials,
        "Secret access key"), &[]),
    ambient(optional(AWS_SESSION_TOKEN, SettingKind::Secret, Section::Credentials,
        "Session token for temporary credentials"), &[]),
    ambient(optional(AWS_PROFILE, SettingKind::Text, Section::Credentials,
        "Named profile from ~/.aws/config or ~/.aws/credentials"), &[]),
    ambient(required(AWS_REGION, SettingKind::Text, "us-east-1", Section::Credentials,
        "Region for the inference backend"), &["AWS_DEFAULT_REGION"]),
    ambient(optional(AWS_SHARED_CREDENTIALS_FILE, SettingKind::Path, Section::Credentials,
        "Credential file mounted read-only (default: ~/.aws/credentials)"), &[]),
    ambient(optional(GIT_USER_NAME, SettingKind::Text, Section::Git,
        "Author and committer name inside the container"), &["GIT_AUTHOR_NAME"]),
    ambient(optional(GIT_USER_EMAIL, SettingKind::Text, Section::Git,
        "Author and committer email inside the container"), &["GIT_AUTHOR_EMAIL"]),
    optional(CERT_DIR, SettingKind::Path, Section::Certificates,
        "Directory of extra CA certificates (.pem, .crt, .cer, .der)"),
    required(INSTALL_HOST_CERTS, SettingKind::Bool, "true", Section::Certificates,
        "Copy the host trust store into the container"),
    required(READONLY_ROOTFS, SettingKind::Bool, "true", Section::Security,
        "Mount the root filesystem read-only"),
    optional(EXTRA_CAPABILITIES, SettingKind::List, Section::Security,
        "Default capabilities to re-enable, e.g. CHOWN,FOWNER"),
    required(TMPFS_SIZE, SettingKind::Size, "256m", Section::Security,
        "Size of each writable tmpfs mount"),
    optional(SECCOMP_PROFILE, SettingKind::Path, Section::Security,
        "Custom seccomp profile (JSON)"),
];

/// Find a setting by name.
pub fn lookup(name: &str) -> Option<&'static Setting> {
    SETTINGS.iter().find(|s| s.name == name)
}

//! Kubeward CLI.
//!
//! Two halves: offline tooling that links `kubeward-core` directly (key
//! generation, credential checks, one-shot node queries, playbook runs),
//! and a thin HTTP client for a running Kubeward server.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use kubeward_core::executor::{AnsiblePlaybookExecutor, PlaybookExecutor, PlaybookRun};
use kubeward_core::keyring::{self, KeyProviderConfig};
use kubeward_core::kube::{ClusterQueryEngine, NodeInfo, NodeSummary, TlsPolicy};
use kubeward_core::registry::validate_credentials;
use kubeward_core::secrets::CredentialKind;
use kubeward_core::{AuthType, EncryptionKey};

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

// ── CLI structure ────────────────────────────────────────────────────

/// Kubeward: encrypted cluster credentials and node introspection.
#[derive(Parser)]
#[command(
    name = "kubeward",
    version,
    about = "Kubeward CLI: manage cluster credentials, query nodes, run playbooks",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         KUBEWARD_ADDR             Server address (default: http://127.0.0.1:8300)\n  \
         KUBEWARD_USER             User id sent as X-User-Id\n  \
         KUBEWARD_ENCRYPTION_KEY   Master key for `fingerprint`\n\n\
         {DIM}Examples:{RESET}\n  \
         kubeward keygen --out ./encryption.key\n  \
         kubeward validate --type kubeconfig ~/.kube/config\n  \
         kubeward nodes --type kubeconfig ~/.kube/config\n  \
         kubeward cluster register --name prod --type kubeconfig ~/.kube/config"
    ),
)]
struct Cli {
    /// Kubeward server address.
    #[arg(long, env = "KUBEWARD_ADDR", default_value = "http://127.0.0.1:8300")]
    addr: String,

    /// User id for server requests.
    #[arg(long, env = "KUBEWARD_USER")]
    user: Option<String>,

    /// Log debug output to stderr.
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new master key.
    Keygen {
        /// Write the key to this file (0600, must not exist) instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the fingerprint of a master key.
    Fingerprint {
        /// Key file to read; otherwise the key comes from KUBEWARD_ENCRYPTION_KEY.
        #[arg(long)]
        file: Option<PathBuf>,
        /// The encoded key.
        #[arg(long, env = "KUBEWARD_ENCRYPTION_KEY", hide_env_values = true)]
        key: Option<String>,
    },
    /// Check a kubeconfig or token without storing anything.
    Validate {
        /// Credential type.
        #[arg(long = "type", value_name = "TYPE")]
        auth_type: AuthType,
        /// Credential file, or `-` for stdin.
        input: String,
    },
    /// Query a cluster's nodes directly with kubectl.
    Nodes {
        #[arg(long = "type", value_name = "TYPE")]
        auth_type: AuthType,
        /// Credential file, or `-` for stdin.
        input: String,
        /// API server URL (required for tokens).
        #[arg(long)]
        api_server: Option<String>,
        /// kubectl binary.
        #[arg(long, default_value = "kubectl")]
        kubectl: PathBuf,
        /// Query timeout in seconds.
        #[arg(long, default_value = "30")]
        timeout: u64,
        /// Skip TLS verification for token clusters.
        #[arg(long)]
        insecure_skip_tls_verify: bool,
        /// Print the raw node list as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run an Ansible playbook.
    Playbook {
        /// Playbook file.
        playbook: PathBuf,
        /// Inventory file.
        #[arg(long, short)]
        inventory: PathBuf,
        /// SSH private key file.
        #[arg(long)]
        private_key: Option<PathBuf>,
        /// Extra variables as a JSON object.
        #[arg(long)]
        extra_vars: Option<String>,
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        skip_tags: Option<String>,
        /// Only check the playbook syntax.
        #[arg(long)]
        syntax_check: bool,
        /// ansible-playbook binary.
        #[arg(long, default_value = "ansible-playbook")]
        ansible_playbook: PathBuf,
        /// Run timeout in seconds.
        #[arg(long, default_value = "3600")]
        timeout: u64,
    },
    /// Show server health.
    Status,
    /// Registered cluster operations (server).
    Cluster {
        #[command(subcommand)]
        action: ClusterCommands,
    },
    /// Master key operations (server).
    Key {
        #[command(subcommand)]
        action: KeyCommands,
    },
    /// Stored SSH key operations (server).
    SshKey {
        #[command(subcommand)]
        action: SshKeyCommands,
    },
    /// Stored credential operations (server).
    Credential {
        #[command(subcommand)]
        action: CredentialCommands,
    },
}

#[derive(Subcommand)]
enum ClusterCommands {
    /// List your clusters.
    List,
    /// Register a cluster.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long = "type", value_name = "TYPE")]
        auth_type: AuthType,
        /// Credential file, or `-` for stdin.
        input: String,
        #[arg(long)]
        api_server: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Show one cluster.
    Show { id: String },
    /// Query a cluster's nodes.
    Nodes { id: String },
    /// Refresh a cluster's node counts.
    Refresh { id: String },
    /// Show a cluster's health.
    Health { id: String },
    /// Print or save a cluster's kubeconfig.
    Kubeconfig {
        id: String,
        /// Write to this file (0600) instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show credential diagnostics.
    Diagnostics { id: String },
    /// Rename or describe a cluster.
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Set a cluster's API server URL.
    SetApiServer { id: String, url: String },
    /// Replace a cluster's credential after a key change.
    Migrate {
        id: String,
        /// Credential file, or `-` for stdin.
        input: String,
    },
    /// Delete a cluster.
    Delete { id: String },
}

#[derive(Subcommand)]
enum SshKeyCommands {
    /// List your SSH keys.
    List,
    /// Store an SSH key pair.
    Add {
        #[arg(long)]
        name: String,
        /// Private key file, or `-` for stdin.
        #[arg(long)]
        private_key: String,
        /// Public key file.
        #[arg(long)]
        public_key: PathBuf,
        #[arg(long, env = "KUBEWARD_SSH_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
    },
    /// Print a key's public half, or save its private half.
    Show {
        id: String,
        /// Write the private key to this file (0600).
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete an SSH key.
    Delete { id: String },
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// List your credentials.
    List,
    /// Store a credential.
    Add {
        #[arg(long)]
        name: String,
        /// ssh_password, api_token, vault_password or cloud_access_key.
        #[arg(long = "type", value_name = "TYPE")]
        kind: CredentialKind,
        #[arg(long)]
        username: Option<String>,
        #[arg(long, env = "KUBEWARD_CREDENTIAL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Show a credential, including its secret.
    Show { id: String },
    /// Delete a credential.
    Delete { id: String },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Show the active key fingerprint.
    Status,
    /// Rotate the server's master key.
    Rotate {
        /// Key file holding the new key.
        #[arg(long)]
        file: PathBuf,
        /// Re-encrypt stored credentials from the old key.
        #[arg(long)]
        reencrypt: bool,
        #[arg(long, env = "KUBEWARD_ADMIN_TOKEN", hide_env_values = true)]
        admin_token: String,
    },
}

// ── Pretty output helpers ────────────────────────────────────────────

fn header(title: &str) {
    println!("{BOLD}{CYAN}{title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<22}{RESET} {value}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn warning(msg: &str) {
    println!("{YELLOW}{BOLD}⚠{RESET} {YELLOW}{msg}{RESET}");
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("-")
}

fn num_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn print_json(value: &Value) {
    if value.is_null() {
        return;
    }
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to format JSON: {e}"),
    }
}

fn print_cluster(cluster: &Value) {
    header(&format!("Cluster {}", str_field(cluster, "name")));
    kv_line("ID", str_field(cluster, "id"));
    kv_line("Auth type", str_field(cluster, "auth_type"));
    kv_line("API server", str_field(cluster, "api_server"));
    kv_line("Status", str_field(cluster, "status"));
    kv_line("Masters", &num_field(cluster, "master_count").to_string());
    kv_line("Workers", &num_field(cluster, "worker_count").to_string());
    kv_line("Description", str_field(cluster, "description"));
    kv_line("Updated", str_field(cluster, "updated_at"));
}

fn print_node_table(nodes: &[NodeInfo]) {
    println!(
        "  {BOLD}{:<28} {:<8} {:<22} {:<12} {:<16}{RESET}",
        "NAME", "READY", "ROLES", "VERSION", "INTERNAL-IP"
    );
    for node in nodes {
        let ready = if node.is_ready() {
            format!("{GREEN}{:<8}{RESET}", node.ready)
        } else {
            format!("{RED}{:<8}{RESET}", node.ready)
        };
        println!(
            "  {:<28} {ready} {:<22} {:<12} {:<16}",
            node.name,
            node.roles.join(","),
            node.kubelet_version,
            node.internal_ip
        );
    }
}

fn print_summary(summary: &NodeSummary) {
    kv_line("Nodes", &summary.total.to_string());
    kv_line("Masters", &summary.masters.to_string());
    kv_line("Workers", &summary.workers.to_string());
    kv_line("Ready", &summary.ready.to_string());
    kv_line("Health", summary.health().as_str());
}

// ── HTTP client ──────────────────────────────────────────────────────

struct Client {
    http: reqwest::Client,
    addr: String,
    user: Option<String>,
}

impl Client {
    fn new(addr: String, user: Option<String>) -> Self {
        let http = reqwest::Client::new();
        let addr = addr.trim_end_matches('/').to_owned();
        Self { http, addr, user }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.addr)
    }

    fn identified(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let user = self
            .user
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no user id; set KUBEWARD_USER or pass --user"))?;
        Ok(req.header("X-User-Id", user))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value> {
        let resp = self.identified(req)?.send().await.context("request failed")?;
        handle_response(resp).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.send(self.http.get(self.url(path))).await
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let resp = self
            .identified(self.http.get(self.url(path)))?
            .send()
            .await
            .context("request failed")?;
        let status = resp.status();
        let body = resp.text().await.context("failed to read response body")?;
        if !status.is_success() {
            bail!("{}", error_message(status, &body));
        }
        Ok(body)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(self.http.post(self.url(path)).json(body)).await
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(self.http.put(self.url(path)).json(body)).await
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(self.http.patch(self.url(path)).json(body)).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        self.send(self.http.delete(self.url(path))).await
    }

    async fn get_no_auth(&self, path: &str) -> Result<Value> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }
}

/// Prefer the server's `message` field over the raw body.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    match parsed.as_ref().and_then(|v| v.get("message")).and_then(Value::as_str) {
        Some(message) => format!("server returned {status}: {message}"),
        None => format!("server returned {status}: {body}"),
    }
}

async fn handle_response(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if status == reqwest::StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    let body = resp.text().await.context("failed to read response body")?;
    if !status.is_success() {
        bail!("{}", error_message(status, &body));
    }
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).context("failed to parse response JSON")
}

// ── Input helpers ────────────────────────────────────────────────────

/// Read a file, or stdin for `-`.
fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(input).with_context(|| format!("failed to read {input}"))
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

// ── Command dispatch ─────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let client = Client::new(cli.addr, cli.user);

    match run(client, cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

async fn run(client: Client, cmd: Commands) -> Result<ExitCode> {
    match cmd {
        Commands::Keygen { out } => cmd_keygen(out.as_deref()).map(|()| ExitCode::SUCCESS),
        Commands::Fingerprint { file, key } => {
            cmd_fingerprint(file.as_deref(), key.as_deref()).map(|()| ExitCode::SUCCESS)
        }
        Commands::Validate { auth_type, input } => cmd_validate(auth_type, &input),
        Commands::Nodes {
            auth_type,
            input,
            api_server,
            kubectl,
            timeout,
            insecure_skip_tls_verify,
            json,
        } => {
            let tls = if insecure_skip_tls_verify {
                TlsPolicy::InsecureSkipVerify
            } else {
                TlsPolicy::Verify
            };
            let engine = ClusterQueryEngine::kubectl(kubectl, Duration::from_secs(timeout), tls);
            cmd_nodes(&engine, auth_type, &input, api_server.as_deref(), json).await
        }
        Commands::Playbook {
            playbook,
            inventory,
            private_key,
            extra_vars,
            tags,
            skip_tags,
            syntax_check,
            ansible_playbook,
            timeout,
        } => {
            let executor =
                AnsiblePlaybookExecutor::new(ansible_playbook, Duration::from_secs(timeout));
            if syntax_check {
                return cmd_syntax_check(&executor, &playbook).await;
            }
            let run = PlaybookRun {
                playbook: read_file(&playbook)?,
                inventory: read_file(&inventory)?,
                private_key: private_key.as_deref().map(read_file).transpose()?,
                extra_vars: parse_extra_vars(extra_vars.as_deref())?,
                tags,
                skip_tags,
            };
            cmd_playbook(&executor, &run).await
        }
        Commands::Status => cmd_status(&client).await.map(|()| ExitCode::SUCCESS),
        Commands::Cluster { action } => cmd_cluster(&client, action).await.map(|()| ExitCode::SUCCESS),
        Commands::Key { action } => cmd_key(&client, action).await.map(|()| ExitCode::SUCCESS),
        Commands::SshKey { action } => cmd_ssh_key(&client, action).await.map(|()| ExitCode::SUCCESS),
        Commands::Credential { action } => {
            cmd_credential(&client, action).await.map(|()| ExitCode::SUCCESS)
        }
    }
}

// ── Offline commands ─────────────────────────────────────────────────

fn cmd_keygen(out: Option<&Path>) -> Result<()> {
    let key = EncryptionKey::generate();
    match out {
        Some(path) => {
            keyring::write_key_file(path, &key)
                .with_context(|| format!("failed to write key to {}", path.display()))?;
            success(&format!("Key written to {}", path.display()));
            kv_line("Fingerprint", &key.fingerprint());
        }
        None => {
            // Bare key on stdout so it can be piped into a secret store.
            println!("{}", key.to_encoded().as_str());
            eprintln!("{DIM}fingerprint: {}{RESET}", key.fingerprint());
        }
    }
    Ok(())
}

fn cmd_fingerprint(file: Option<&Path>, key: Option<&str>) -> Result<()> {
    let key = match (file, key) {
        (Some(path), _) => {
            let config = KeyProviderConfig {
                local_paths: vec![path.to_path_buf()],
                ..KeyProviderConfig::default()
            };
            config
                .resolve()
                .with_context(|| format!("no usable key in {}", path.display()))?
                .key
        }
        (None, Some(encoded)) => keyring::parse_key(encoded, "KUBEWARD_ENCRYPTION_KEY")?,
        (None, None) => bail!("no key given; pass --file or set KUBEWARD_ENCRYPTION_KEY"),
    };
    println!("{}", key.fingerprint());
    Ok(())
}

fn cmd_validate(auth_type: AuthType, input: &str) -> Result<ExitCode> {
    let data = read_input(input)?;
    let result = validate_credentials(&data, auth_type);

    if result.valid {
        success(&format!("Valid {auth_type} credential"));
        if let Some(name) = &result.cluster_name {
            kv_line("Cluster", name);
        }
        if let Some(api) = &result.api_server {
            kv_line("API server", api);
        }
        Ok(ExitCode::SUCCESS)
    } else {
        warning(&format!(
            "Invalid {auth_type} credential: {}",
            result.error.as_deref().unwrap_or("unknown error")
        ));
        Ok(ExitCode::FAILURE)
    }
}

async fn cmd_nodes(
    engine: &ClusterQueryEngine,
    auth_type: AuthType,
    input: &str,
    api_server: Option<&str>,
    as_json: bool,
) -> Result<ExitCode> {
    let payload = read_input(input)?;
    let nodes = engine
        .list_nodes(&payload, auth_type, api_server)
        .await
        .context("node query failed")?;

    if as_json {
        print_json(&serde_json::to_value(&nodes).context("failed to encode nodes")?);
        return Ok(ExitCode::SUCCESS);
    }

    let summary = NodeSummary::from_nodes(&nodes);
    header("Cluster nodes");
    print_summary(&summary);
    println!();
    print_node_table(&nodes);
    Ok(ExitCode::SUCCESS)
}

fn parse_extra_vars(raw: Option<&str>) -> Result<serde_json::Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(serde_json::Map::new());
    };
    match serde_json::from_str(raw).context("--extra-vars is not valid JSON")? {
        Value::Object(map) => Ok(map),
        _ => bail!("--extra-vars must be a JSON object"),
    }
}

async fn cmd_syntax_check(executor: &AnsiblePlaybookExecutor, playbook: &Path) -> Result<ExitCode> {
    let check = executor.syntax_check(&read_file(playbook)?).await;
    if check.ok {
        success("Playbook syntax OK");
        Ok(ExitCode::SUCCESS)
    } else {
        warning(&format!("Playbook syntax check failed: {}", check.message.trim()));
        Ok(ExitCode::FAILURE)
    }
}

async fn cmd_playbook(executor: &AnsiblePlaybookExecutor, run: &PlaybookRun) -> Result<ExitCode> {
    let output = executor.run(run).await;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    if output.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(u8::try_from(output.exit_code).ok().filter(|c| *c != 0).unwrap_or(1)))
    }
}

// ── Server commands ──────────────────────────────────────────────────

async fn cmd_status(client: &Client) -> Result<()> {
    let resp = client.get_no_auth("/v1/sys/health").await?;
    header("Kubeward server");
    kv_line("Address", &client.addr);
    kv_line("Status", str_field(&resp, "status"));
    kv_line("Version", str_field(&resp, "version"));
    Ok(())
}

#[allow(clippy::too_many_lines)]
async fn cmd_cluster(client: &Client, action: ClusterCommands) -> Result<()> {
    match action {
        ClusterCommands::List => {
            let resp = client.get("/v1/clusters").await?;
            let clusters = resp.as_array().cloned().unwrap_or_default();
            if clusters.is_empty() {
                warning("No clusters registered");
                return Ok(());
            }
            println!(
                "  {BOLD}{:<38} {:<24} {:<11} {:>7} {:>7}  {:<10}{RESET}",
                "ID", "NAME", "AUTH", "MASTERS", "WORKERS", "STATUS"
            );
            for c in &clusters {
                println!(
                    "  {:<38} {:<24} {:<11} {:>7} {:>7}  {:<10}",
                    str_field(c, "id"),
                    str_field(c, "name"),
                    str_field(c, "auth_type"),
                    num_field(c, "master_count"),
                    num_field(c, "worker_count"),
                    str_field(c, "status"),
                );
            }
        }
        ClusterCommands::Register {
            name,
            auth_type,
            input,
            api_server,
            description,
        } => {
            let body = json!({
                "name": name,
                "auth_type": auth_type,
                "auth_data": read_input(&input)?,
                "api_server": api_server,
                "description": description,
            });
            let resp = client.post("/v1/clusters", &body).await?;
            success("Cluster registered");
            print_cluster(&resp);
        }
        ClusterCommands::Show { id } => {
            print_cluster(&client.get(&format!("/v1/clusters/{id}")).await?);
        }
        ClusterCommands::Nodes { id } => {
            let resp = client.get(&format!("/v1/clusters/{id}/nodes")).await?;
            print_nodes_response(&resp);
        }
        ClusterCommands::Refresh { id } => {
            let resp = client
                .post(&format!("/v1/clusters/{id}/refresh"), &json!({}))
                .await?;
            success("Node counts refreshed");
            print_nodes_response(&resp);
        }
        ClusterCommands::Health { id } => {
            let resp = client.get(&format!("/v1/clusters/{id}/health")).await?;
            header(&format!("Health of {}", str_field(&resp, "name")));
            kv_line("Health", str_field(&resp, "health"));
            kv_line("Status", str_field(&resp, "status"));
            if let Some(summary) = resp.get("summary").filter(|s| !s.is_null()) {
                kv_line(
                    "Ready",
                    &format!("{}/{}", num_field(summary, "ready"), num_field(summary, "total")),
                );
            }
        }
        ClusterCommands::Kubeconfig { id, out } => {
            let doc = client.get_text(&format!("/v1/clusters/{id}/kubeconfig")).await?;
            match out {
                Some(path) => {
                    write_private(&path, &doc)?;
                    success(&format!("Kubeconfig written to {}", path.display()));
                }
                None => print!("{doc}"),
            }
        }
        ClusterCommands::Diagnostics { id } => {
            print_json(&client.get(&format!("/v1/clusters/{id}/diagnostics")).await?);
        }
        ClusterCommands::Update {
            id,
            name,
            description,
        } => {
            let resp = client
                .patch(
                    &format!("/v1/clusters/{id}"),
                    &json!({ "name": name, "description": description }),
                )
                .await?;
            success("Cluster updated");
            print_cluster(&resp);
        }
        ClusterCommands::SetApiServer { id, url } => {
            client
                .put(
                    &format!("/v1/clusters/{id}/api-server"),
                    &json!({ "api_server": url }),
                )
                .await?;
            success(&format!("API server set to {url}"));
        }
        ClusterCommands::Migrate { id, input } => {
            client
                .post(
                    &format!("/v1/clusters/{id}/credentials"),
                    &json!({ "auth_data": read_input(&input)? }),
                )
                .await?;
            success("Credentials re-encrypted under the active key");
        }
        ClusterCommands::Delete { id } => {
            client.delete(&format!("/v1/clusters/{id}")).await?;
            success(&format!("Cluster {id} deleted"));
        }
    }
    Ok(())
}

fn print_nodes_response(resp: &Value) {
    let live = resp.get("live").and_then(Value::as_bool).unwrap_or(false);
    header("Cluster nodes");
    if !live {
        let message = resp
            .get("error")
            .map_or("-", |e| str_field(e, "message"));
        warning(&format!("Live query failed, showing stored counts: {message}"));
    }
    kv_line("Nodes", &num_field(resp, "total_nodes").to_string());
    kv_line("Masters", &num_field(resp, "master_nodes").to_string());
    kv_line("Workers", &num_field(resp, "worker_nodes").to_string());
    if live {
        kv_line("Ready", &num_field(resp, "ready_nodes").to_string());
        let nodes: Vec<NodeInfo> = resp
            .get("nodes")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        println!();
        print_node_table(&nodes);
    }
}

async fn cmd_key(client: &Client, action: KeyCommands) -> Result<()> {
    match action {
        KeyCommands::Status => {
            let resp = client.get("/v1/sys/key").await?;
            kv_line("Fingerprint", str_field(&resp, "fingerprint"));
        }
        KeyCommands::Rotate {
            file,
            reencrypt,
            admin_token,
        } => {
            let key = read_file(&file)?;
            let req = client
                .http
                .post(client.url("/v1/sys/key/rotate"))
                .header("X-Admin-Token", admin_token)
                .json(&json!({ "key": key.trim(), "reencrypt": reencrypt }));
            let resp = client.send(req).await?;
            if resp.get("rotated").and_then(Value::as_bool) != Some(true) {
                bail!("server rejected the key; the previous key is still active");
            }
            success("Master key rotated");
            kv_line("Fingerprint", str_field(&resp, "fingerprint"));
            if let Some(migration) = resp.get("migration") {
                for (label, section) in [("Clusters", "clusters"), ("Secrets", "secrets")] {
                    let Some(report) = migration.get(section) else {
                        continue;
                    };
                    kv_line(
                        label,
                        &format!(
                            "{} migrated, {} already current",
                            num_field(report, "migrated"),
                            num_field(report, "already_current")
                        ),
                    );
                    let failed = report
                        .get("failed")
                        .and_then(Value::as_array)
                        .map_or(0, Vec::len);
                    if failed > 0 {
                        warning(&format!("{failed} {section} record(s) could not be migrated"));
                    }
                }
            } else {
                warning("Stored credentials were not re-encrypted; use --reencrypt or migrate them");
            }
            warning("Persist the new key in the server's configuration before it restarts");
        }
    }
    Ok(())
}

async fn cmd_ssh_key(client: &Client, action: SshKeyCommands) -> Result<()> {
    match action {
        SshKeyCommands::List => {
            let resp = client.get("/v1/ssh-keys").await?;
            let keys = resp.as_array().cloned().unwrap_or_default();
            if keys.is_empty() {
                warning("No SSH keys stored");
                return Ok(());
            }
            println!("  {BOLD}{:<38} {:<24} {:<26}{RESET}", "ID", "NAME", "CREATED");
            for k in &keys {
                println!(
                    "  {:<38} {:<24} {:<26}",
                    str_field(k, "id"),
                    str_field(k, "name"),
                    str_field(k, "created_at"),
                );
            }
        }
        SshKeyCommands::Add {
            name,
            private_key,
            public_key,
            passphrase,
        } => {
            let body = json!({
                "name": name,
                "private_key": read_input(&private_key)?,
                "public_key": read_file(&public_key)?.trim(),
                "passphrase": passphrase,
            });
            let resp = client.post("/v1/ssh-keys", &body).await?;
            success("SSH key stored");
            kv_line("ID", str_field(&resp, "id"));
            kv_line("Name", str_field(&resp, "name"));
        }
        SshKeyCommands::Show { id, out } => {
            let resp = client.get(&format!("/v1/ssh-keys/{id}")).await?;
            header("SSH key");
            kv_line("ID", str_field(&resp, "id"));
            kv_line("Name", str_field(&resp, "name"));
            kv_line("Public key", str_field(&resp, "public_key"));
            if let Some(path) = out {
                write_private(&path, str_field(&resp, "private_key"))?;
                success(&format!("Private key written to {}", path.display()));
            }
        }
        SshKeyCommands::Delete { id } => {
            client.delete(&format!("/v1/ssh-keys/{id}")).await?;
            success(&format!("SSH key {id} deleted"));
        }
    }
    Ok(())
}

async fn cmd_credential(client: &Client, action: CredentialCommands) -> Result<()> {
    match action {
        CredentialCommands::List => {
            let resp = client.get("/v1/credentials").await?;
            let creds = resp.as_array().cloned().unwrap_or_default();
            if creds.is_empty() {
                warning("No credentials stored");
                return Ok(());
            }
            println!("  {BOLD}{:<38} {:<24} {:<18}{RESET}", "ID", "NAME", "TYPE");
            for c in &creds {
                println!(
                    "  {:<38} {:<24} {:<18}",
                    str_field(c, "id"),
                    str_field(c, "name"),
                    str_field(c, "credential_type"),
                );
            }
        }
        CredentialCommands::Add {
            name,
            kind,
            username,
            password,
        } => {
            let body = json!({
                "name": name,
                "credential_type": kind,
                "username": username,
                "password": password,
            });
            let resp = client.post("/v1/credentials", &body).await?;
            success("Credential stored");
            kv_line("ID", str_field(&resp, "id"));
        }
        CredentialCommands::Show { id } => {
            let resp = client.get(&format!("/v1/credentials/{id}")).await?;
            header("Credential");
            kv_line("ID", str_field(&resp, "id"));
            kv_line("Name", str_field(&resp, "name"));
            kv_line("Type", str_field(&resp, "credential_type"));
            kv_line("Username", str_field(&resp, "username"));
            kv_line("Password", str_field(&resp, "password"));
        }
        CredentialCommands::Delete { id } => {
            client.delete(&format!("/v1/credentials/{id}")).await?;
            success(&format!("Credential {id} deleted"));
        }
    }
    Ok(())
}

/// Write `contents` to a new owner-only file.
fn write_private(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write as _;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))
}

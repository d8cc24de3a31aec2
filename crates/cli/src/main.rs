//! Command line client for dokhub.

mod api_client;

use anyhow::{Context, Result};
use api_client::{
    ApiClient, CreateOrgRequest, CreateShareRequest, FileInfo, FileQuery, MemberInfo, OrgInfo,
    UploadOptions, guess_content_type,
};
use clap::{Args, Parser, Subcommand};
use dokhub_core::policy::SNIFF_LEN;
use dokhub_core::{FileCandidate, UploadMetadata, UploadPolicy, ValidationReport, classify};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "dokhub")]
#[command(about = "Command line client for the dokhub document hub")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct GlobalArgs {
    /// Server API URL
    #[arg(long, env = "DOKHUB_SERVER", default_value = DEFAULT_SERVER, global = true)]
    server: String,

    /// API token
    #[arg(long, env = "DOKHUB_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Retries for connection failures and 5xx responses
    #[arg(long, env = "DOKHUB_RETRIES", default_value_t = 3, global = true)]
    retries: u32,
}

/// Metadata flags shared by `validate` and `upload`.
#[derive(Args, Clone, Default)]
struct MetadataArgs {
    /// Course code, e.g. TDT4100
    #[arg(long)]
    course_code: Option<String>,

    /// Comma-separated tags
    #[arg(long)]
    tags: Option<String>,

    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    semester: Option<String>,

    #[arg(long)]
    subject: Option<String>,
}

impl MetadataArgs {
    fn to_metadata(&self) -> UploadMetadata {
        UploadMetadata {
            description: self.description.clone(),
            semester: self.semester.clone(),
            subject: self.subject.clone(),
            course_code: self.course_code.clone(),
            tags: self.tags.clone(),
            ..UploadMetadata::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check files against the upload rules without contacting the server
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        metadata: MetadataArgs,
    },
    /// Upload one or more files
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Upload into an organization
        #[arg(long)]
        org: Option<String>,

        /// Target folder (default: uploads)
        #[arg(long)]
        folder: Option<String>,

        /// Mark the files as public
        #[arg(long)]
        public: bool,

        #[command(flatten)]
        metadata: MetadataArgs,
    },
    /// File commands
    Files {
        #[command(subcommand)]
        command: FileCommands,
    },
    /// Share link commands
    Share {
        #[command(subcommand)]
        command: ShareCommands,
    },
    /// Organization commands
    Orgs {
        #[command(subcommand)]
        command: OrgCommands,
    },
    /// Show the identity behind the token
    Whoami,
}

#[derive(Subcommand)]
enum FileCommands {
    /// List your files, or an organization's
    List {
        #[arg(long)]
        org: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        course_code: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show one file
    Show { id: String },
    /// Download a file
    Download {
        id: String,
        /// Output path (default: the file's name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a file
    Delete { id: String },
}

#[derive(Subcommand)]
enum ShareCommands {
    /// Create a time-limited share link
    Create {
        file_id: String,
        /// Validity in hours
        #[arg(long)]
        hours: Option<i64>,
        #[arg(long)]
        purpose: Option<String>,
    },
    /// Revoke a share link
    Revoke { share_id: String },
}

#[derive(Subcommand)]
enum OrgCommands {
    /// Create an organization
    Create {
        #[arg(long)]
        name: String,
        /// klasse, prosjektgruppe, emne or studiegruppe
        #[arg(long = "type")]
        org_type: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        course_code: Option<String>,
        #[arg(long)]
        max_members: Option<u32>,
        #[arg(long)]
        public: bool,
    },
    /// List your organizations
    List,
    /// Join an organization with its code
    Join { code: String },
    /// List members of an organization
    Members {
        org_id: String,
        #[arg(long)]
        role: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { global, command } = Cli::parse();

    match command {
        Commands::Validate { files, metadata } => {
            handle_validate_command(&files, &metadata, global.json).await
        }
        Commands::Upload {
            files,
            org,
            folder,
            public,
            metadata,
        } => {
            let options = UploadOptions {
                name: None,
                org_id: org,
                folder,
                description: metadata.description,
                semester: metadata.semester,
                subject: metadata.subject,
                course_code: metadata.course_code,
                tags: metadata.tags,
                is_public: public,
            };
            handle_upload_command(&files, &options, &global).await
        }
        Commands::Files { command } => handle_file_command(command, &global).await,
        Commands::Share { command } => handle_share_command(command, &global).await,
        Commands::Orgs { command } => handle_org_command(command, &global).await,
        Commands::Whoami => handle_whoami_command(&global).await,
    }
}

fn normalize_base_url(url: &str) -> Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("server URL must start with http:// or https://");
    }
    Ok(url.trim_end_matches('/').to_string())
}

fn get_api_client(global: &GlobalArgs) -> Result<ApiClient> {
    let base_url = normalize_base_url(&global.server)?;
    let client = ApiClient::new(&base_url, global.token.as_deref())?;
    Ok(client.with_retry(global.retries, RETRY_DELAY))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

fn local_file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("not a file: {}", path.display()))
}

/// One file's local validation result.
#[derive(Debug, Serialize)]
struct LocalCheck {
    name: String,
    size: u64,
    category: String,
    tags: Vec<String>,
    course_code: Option<String>,
}

#[derive(Debug, Serialize)]
struct LocalReport {
    #[serde(flatten)]
    report: ValidationReport,
    files: Vec<LocalCheck>,
}

/// Run the upload policy over local files: batch rules, per-file rules and
/// a content sniff of each file's leading bytes.
async fn validate_local(
    policy: &UploadPolicy,
    files: &[PathBuf],
    metadata: &UploadMetadata,
) -> Result<LocalReport> {
    let mut candidates = Vec::with_capacity(files.len());
    let mut checks = Vec::with_capacity(files.len());
    let mut sniff_errors = Vec::new();

    for path in files {
        let name = local_file_name(path)?;
        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?
            .len();

        let mut head = Vec::with_capacity(SNIFF_LEN);
        tokio::fs::File::open(path)
            .await?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .await?;
        if let Err(e) = policy.check_content(&name, &head) {
            sniff_errors.push(format!("{name}: {e}"));
        }

        let classification = classify(&name, metadata);
        candidates.push(FileCandidate::new(
            name.as_str(),
            size,
            Some(guess_content_type(&name)),
        ));
        checks.push(LocalCheck {
            name,
            size,
            category: classification.category.as_str().to_string(),
            tags: classification.tags,
            course_code: classification.course_code,
        });
    }

    let mut report = policy.validate_batch(&candidates);
    if !sniff_errors.is_empty() {
        report.is_valid = false;
        report.errors.extend(sniff_errors);
    }
    Ok(LocalReport {
        report,
        files: checks,
    })
}

fn print_report(report: &LocalReport) {
    for file in &report.files {
        println!(
            "{}  {}  {}{}",
            file.name,
            format_bytes(file.size),
            file.category,
            file.course_code
                .as_deref()
                .map(|c| format!("  {c}"))
                .unwrap_or_default()
        );
        if !file.tags.is_empty() {
            println!("    tags: {}", file.tags.join(", "));
        }
    }
    for error in &report.report.errors {
        eprintln!("✗ {error}");
    }
}

async fn handle_validate_command(
    files: &[PathBuf],
    metadata: &MetadataArgs,
    json: bool,
) -> Result<()> {
    let report = validate_local(&UploadPolicy::default(), files, &metadata.to_metadata()).await?;
    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    if !report.report.is_valid {
        anyhow::bail!("{} problem(s) found", report.report.errors.len());
    }
    if !json {
        println!("✓ {} file(s) valid", report.files.len());
    }
    Ok(())
}

/// Per-file upload outcome.
#[derive(Debug, Serialize)]
struct UploadOutcome {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<FileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn handle_upload_command(
    files: &[PathBuf],
    options: &UploadOptions,
    global: &GlobalArgs,
) -> Result<()> {
    let client = get_api_client(global)?;

    let capabilities = client
        .capabilities()
        .await
        .context("failed to fetch server capabilities")?;
    let policy = UploadPolicy {
        max_file_size: capabilities.max_file_size,
        max_files_per_batch: capabilities.max_files_per_batch,
        allowed_extensions: capabilities.allowed_extensions.into_iter().collect(),
        ..UploadPolicy::default()
    };
    let metadata = UploadMetadata {
        description: options.description.clone(),
        semester: options.semester.clone(),
        subject: options.subject.clone(),
        course_code: options.course_code.clone(),
        tags: options.tags.clone(),
        is_public: options.is_public,
        folder: options.folder.clone(),
    };

    let report = validate_local(&policy, files, &metadata).await?;
    if !report.report.is_valid {
        for error in &report.report.errors {
            eprintln!("✗ {error}");
        }
        anyhow::bail!("upload aborted: {} problem(s) found", report.report.errors.len());
    }

    let mut outcomes = Vec::with_capacity(files.len());
    for path in files {
        if !global.json {
            println!("Uploading {}...", path.display());
        }
        let key = Uuid::new_v4().to_string();
        let outcome = match client.upload_file(path, options, &key).await {
            Ok(response) => {
                if !global.json {
                    println!(
                        "✓ {} ({}, {}) -> {}",
                        response.file.name,
                        format_bytes(response.file.size_bytes),
                        response.file.category,
                        response.file.file_id
                    );
                }
                UploadOutcome {
                    path: path.display().to_string(),
                    file: Some(response.file),
                    error: None,
                }
            }
            Err(e) => {
                if !global.json {
                    eprintln!("✗ {}: {e}", path.display());
                }
                UploadOutcome {
                    path: path.display().to_string(),
                    file: None,
                    error: Some(e.to_string()),
                }
            }
        };
        outcomes.push(outcome);
    }

    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    if global.json {
        print_json(&outcomes)?;
    } else if files.len() > 1 {
        println!("\nDone: {} uploaded, {failed} failed", files.len() - failed);
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} upload(s) failed", files.len());
    }
    Ok(())
}

fn print_file(file: &FileInfo) {
    println!("ID:          {}", file.file_id);
    println!("Name:        {}", file.name);
    println!("Size:        {}", format_bytes(file.size_bytes));
    println!("Category:    {}", file.category);
    if let Some(content_type) = &file.content_type {
        println!("Type:        {content_type}");
    }
    if let Some(code) = &file.course_code {
        println!("Course:      {code}");
    }
    if !file.tags.is_empty() {
        println!("Tags:        {}", file.tags.join(", "));
    }
    if let Some(description) = &file.description {
        println!("Description: {description}");
    }
    if let Some(org_id) = &file.org_id {
        println!("Org:         {org_id}");
    }
    println!("Folder:      {}", file.folder);
    println!("SHA-256:     {}", file.sha256);
    println!(
        "Downloads:   {}  Shares: {}",
        file.download_count, file.share_count
    );
    println!("Created:     {}", file.created_at);
}

async fn handle_file_command(command: FileCommands, global: &GlobalArgs) -> Result<()> {
    let client = get_api_client(global)?;

    match command {
        FileCommands::List {
            org,
            category,
            course_code,
            tag,
            limit,
        } => {
            let response = client
                .list_files(&FileQuery {
                    org_id: org,
                    category,
                    course_code,
                    tag,
                    limit,
                })
                .await?;
            if global.json {
                return print_json(&response.files);
            }
            if response.files.is_empty() {
                println!("No files found");
            }
            for file in &response.files {
                println!(
                    "{}  {:>10}  {:<12} {}",
                    file.file_id,
                    format_bytes(file.size_bytes),
                    file.category,
                    file.name
                );
            }
        }
        FileCommands::Show { id } => {
            let file = client.get_file(&id).await?;
            if global.json {
                return print_json(&file);
            }
            print_file(&file);
        }
        FileCommands::Download { id, output } => {
            let dest = match output {
                Some(path) => path,
                None => {
                    let file = client.get_file(&id).await?;
                    // Only the final component; the name is server-controlled.
                    PathBuf::from(local_file_name(Path::new(&file.name))?)
                }
            };
            let written = client.download_file(&id, &dest).await?;
            if global.json {
                return print_json(&serde_json::json!({
                    "path": dest.display().to_string(),
                    "bytes": written,
                }));
            }
            println!("✓ Saved {} ({})", dest.display(), format_bytes(written));
        }
        FileCommands::Delete { id } => {
            client.delete_file(&id).await?;
            if !global.json {
                println!("✓ Deleted file {id}");
            }
        }
    }

    Ok(())
}

/// Share URLs are relative unless the server knows its public address.
fn absolute_share_url(base_url: &str, signed_url: &str) -> String {
    if signed_url.starts_with("http://") || signed_url.starts_with("https://") {
        signed_url.to_string()
    } else {
        format!("{}{signed_url}", base_url.trim_end_matches('/'))
    }
}

async fn handle_share_command(command: ShareCommands, global: &GlobalArgs) -> Result<()> {
    let client = get_api_client(global)?;

    match command {
        ShareCommands::Create {
            file_id,
            hours,
            purpose,
        } => {
            let mut share = client
                .create_share(&CreateShareRequest {
                    file_id,
                    expiration_hours: hours,
                    purpose,
                })
                .await?;
            share.signed_url = absolute_share_url(client.base_url().as_str(), &share.signed_url);
            if global.json {
                return print_json(&share);
            }
            println!("{}", share.message);
            println!("URL:        {}", share.signed_url);
            println!("Valid for:  {}", share.valid_for);
            println!("Expires:    {}", share.expires_at);
            println!("Share ID:   {}", share.share_id);
        }
        ShareCommands::Revoke { share_id } => {
            let share = client.revoke_share(&share_id).await?;
            if global.json {
                return print_json(&share);
            }
            println!(
                "✓ Revoked share {} (accessed {} time(s))",
                share.share_id, share.access_count
            );
        }
    }

    Ok(())
}

fn print_org(org: &OrgInfo) {
    println!(
        "{}  {:<14} {}  code={}{}",
        org.org_id,
        org.org_type,
        org.name,
        org.org_code,
        org.role
            .as_deref()
            .map(|r| format!("  role={r}"))
            .unwrap_or_default()
    );
}

fn print_member(member: &MemberInfo) {
    println!(
        "{}  {:<10} {:<10} {}",
        member.user_id,
        member.role,
        member.status,
        member
            .display_name
            .as_deref()
            .or(member.username.as_deref())
            .unwrap_or("-")
    );
}

async fn handle_org_command(command: OrgCommands, global: &GlobalArgs) -> Result<()> {
    let client = get_api_client(global)?;

    match command {
        OrgCommands::Create {
            name,
            org_type,
            description,
            course_code,
            max_members,
            public,
        } => {
            let org = client
                .create_org(&CreateOrgRequest {
                    name,
                    org_type,
                    description,
                    course_code,
                    max_members,
                    is_public: public,
                })
                .await?;
            if global.json {
                return print_json(&org);
            }
            println!("✓ Created organization {} ({})", org.name, org.org_id);
            println!("Join code: {}", org.org_code);
        }
        OrgCommands::List => {
            let orgs = client.list_orgs().await?;
            if global.json {
                return print_json(&orgs);
            }
            if orgs.is_empty() {
                println!("You are not a member of any organization");
            }
            orgs.iter().for_each(print_org);
        }
        OrgCommands::Join { code } => {
            let org = client.join_org(&code).await?;
            if global.json {
                return print_json(&org);
            }
            println!(
                "✓ Joined {} as {}",
                org.name,
                org.role.as_deref().unwrap_or("member")
            );
        }
        OrgCommands::Members { org_id, role } => {
            let members = client.list_members(&org_id, role.as_deref()).await?;
            if global.json {
                return print_json(&members);
            }
            members.iter().for_each(print_member);
        }
    }

    Ok(())
}

async fn handle_whoami_command(global: &GlobalArgs) -> Result<()> {
    let client = get_api_client(global)?;
    let whoami = client.whoami().await?;

    if global.json {
        return print_json(&whoami);
    }
    println!("User:    {} ({})", whoami.username, whoami.user_id);
    if let Some(display_name) = &whoami.display_name {
        println!("Name:    {display_name}");
    }
    println!("Role:    {}", whoami.role);
    println!("Token:   {}", whoami.token_id);
    println!("Scopes:  {}", whoami.scopes.join(", "));
    match &whoami.expires_at {
        Some(expires_at) => println!("Expires: {expires_at}"),
        None => println!("Expires: never"),
    }
    if let Some(key) = &whoami.signing_key_name {
        println!("Signing: {key}");
    }
    Ok(())
}

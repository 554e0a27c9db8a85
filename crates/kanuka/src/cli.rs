//! Command-line surface.

use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use kanuka::access::{self, AccessError, GrantOptions, GrantTarget, Target};
use kanuka::core::PublicKey;
use kanuka::{Config, KanukaError};
use serde::Serialize;

/// Share project secrets between devices
#[derive(Parser, Debug)]
#[command(name = "kanuka")]
#[command(about = "Share encrypted project secrets between team members' devices")]
#[command(version)]
pub struct Cli {
    /// Project directory (default: current directory)
    #[arg(short, long, global = true, env = "KANUKA_PROJECT")]
    pub project: Option<PathBuf>,

    /// Your email; required the first time
    #[arg(long, global = true, env = "KANUKA_EMAIL")]
    pub email: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a project here with this device as its first member
    Init {
        /// Display name (default: directory name)
        name: Option<String>,
    },

    /// Generate a key pair for this device and request access
    Create {
        /// Device name (default: from your settings)
        #[arg(long)]
        device: Option<String>,

        /// Replace an existing key pair or request
        #[arg(long)]
        force: bool,
    },

    /// Give a device access to the project
    #[command(visible_alias = "register")]
    Grant(GrantArgs),

    /// Remove a device's access
    Revoke(RevokeArgs),

    /// Replace this device's key pair, or the project's content key
    Rotate {
        /// Rotate the content key for every device and re-encrypt all files
        #[arg(long)]
        content_key: bool,

        #[arg(long)]
        dry_run: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show members, requests and secret files
    Status,

    /// Check that the registry and the key files agree
    Verify,

    /// Fix what `verify` reports, where possible
    Repair {
        #[arg(long)]
        dry_run: bool,

        #[arg(short, long)]
        yes: bool,
    },

    /// Encrypt secret files (default: every .env file in the project)
    Encrypt { files: Vec<PathBuf> },

    /// Decrypt secret files (default: every .env*.kanuka file in the project)
    Decrypt { files: Vec<PathBuf> },

    /// Write the project's shared state to a .tar.gz archive
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Unpack an archive produced by `export`
    Import {
        archive: PathBuf,

        /// Replace an existing project
        #[arg(long)]
        force: bool,

        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
pub struct GrantArgs {
    /// Email, device UUID or public key / access record path
    #[arg(required_unless_present = "public_key", conflicts_with = "public_key")]
    pub target: Option<String>,

    /// Device name: narrows an email, or names a --public-key device
    #[arg(long)]
    pub device: Option<String>,

    /// Grant a PEM public key received out of band
    #[arg(long, requires = "user_email")]
    pub public_key: Option<PathBuf>,

    /// Owner of --public-key
    #[arg(long, value_name = "EMAIL")]
    pub user_email: Option<String>,

    /// Replace an existing access record
    #[arg(long)]
    pub force: bool,

    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct RevokeArgs {
    /// Email, device UUID or public key / access record path
    pub target: String,

    /// Narrow an email to one device
    #[arg(long)]
    pub device: Option<String>,

    #[arg(long)]
    pub dry_run: bool,

    #[arg(short, long)]
    pub yes: bool,
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env(cli.project.clone())?;
    let json = cli.json;
    let mut ctx = config.context(cli.email.as_deref())?;

    match cli.command {
        Command::Init { name } => {
            let name = match name {
                Some(name) => name,
                None => default_project_name(config.project_root()),
            };
            let report = access::init_project(&mut ctx, &name)?;
            emit(json, &report, || {
                format!(
                    "✓ Created project {} ({})\n  device {} fingerprint {}",
                    report.name, report.project, report.device, report.fingerprint
                )
            })
        }

        Command::Create { device, force } => {
            let report = access::request_access(&mut ctx, device.as_deref(), force)?;
            let email = ctx.identity().map(|u| u.email.clone()).unwrap_or_default();
            emit(json, &report, || {
                let mut out = format!(
                    "✓ Requested access as device {} ({})\n  fingerprint {}",
                    report.device, report.device_name, report.fingerprint
                );
                if let Some(old) = report.replaced {
                    out.push_str(&format!("\n  replaced earlier request {}", old));
                }
                out.push_str(&format!(
                    "\n  Commit .kanuka/ and ask a member to run: kanuka grant {}",
                    email
                ));
                out
            })
        }

        Command::Grant(args) => {
            let target = grant_target(&args)?;
            let options = GrantOptions {
                force: args.force,
                dry_run: args.dry_run,
            };
            let report = access::grant(&ctx, &target, options)?;
            emit(json, &report, || {
                if report.applied {
                    format!(
                        "✓ Granted {} ({}, {})\n  fingerprint {}",
                        report.email, report.device_name, report.device, report.fingerprint
                    )
                } else {
                    format!(
                        "Would grant {} ({}, {}):\n{}",
                        report.email, report.device_name, report.device, report.plan
                    )
                }
            })
        }

        Command::Revoke(args) => {
            let target = Target::parse(&args.target, args.device.as_deref());
            if !args.dry_run {
                let planned = access::plan_revoke(&ctx, &target)?;
                confirm(
                    args.yes,
                    &format!(
                        "Revoke device {} ({})?",
                        planned.device,
                        planned.email.as_deref().unwrap_or("unregistered")
                    ),
                )?;
            }
            let report = access::revoke(&ctx, &target, args.dry_run)?;
            emit(json, &report, || {
                let who = format!(
                    "{} ({}, {})",
                    report.email.as_deref().unwrap_or("unknown"),
                    report.device_name.as_deref().unwrap_or("unnamed"),
                    report.device
                );
                let mut out = if report.applied {
                    format!("✓ Revoked {}", who)
                } else {
                    format!("Would revoke {}:\n{}", who, report.plan.to_string().trim_end())
                };
                for warning in &report.warnings {
                    out.push_str(&format!("\n⚠ {}", warning));
                }
                out.push_str(&format!(
                    "\n  {} user(s) on {} device(s) {} access",
                    report.remaining_users,
                    report.remaining_devices,
                    if report.applied { "keep" } else { "would keep" }
                ));
                if report.rotation_recommended() {
                    out.push_str(
                        "\n  The content key was not rotated. Run `kanuka rotate --content-key` \
                         so the revoked device cannot read future secrets.",
                    );
                }
                out
            })
        }

        Command::Rotate {
            content_key: true,
            dry_run,
            yes,
        } => {
            if !dry_run {
                confirm(
                    yes,
                    "Rotate the content key and re-encrypt every secret file?",
                )?;
            }
            let report = access::rotate_content_key(&ctx, dry_run)?;
            emit(json, &report, || {
                if report.applied {
                    format!(
                        "✓ Rotated content key: {} access record(s), {} secret file(s)",
                        report.devices, report.files
                    )
                } else {
                    format!("Would rotate the content key:\n{}", report.plan)
                }
            })
        }

        Command::Rotate {
            content_key: false,
            dry_run,
            yes: _,
        } => {
            let report = access::rotate_self(&ctx, dry_run)?;
            emit(json, &report, || {
                let mut out = match &report.new_fingerprint {
                    Some(new) if report.applied => format!(
                        "✓ Rotated key pair for device {}\n  old {}\n  new {}",
                        report.device, report.old_fingerprint, new
                    ),
                    _ => format!(
                        "Would rotate key pair for device {}:\n{}",
                        report.device, report.plan
                    ),
                };
                for warning in &report.warnings {
                    out.push_str(&format!("\n⚠ {}", warning));
                }
                out
            })
        }

        Command::Status => {
            let report = kanuka::status(&ctx)?;
            emit(json, &report, || report.to_string().trim_end().to_string())
        }

        Command::Verify => {
            let report = access::verify(&ctx)?;
            emit(json, &report, || {
                if report.is_consistent() {
                    format!(
                        "✓ Project is consistent ({} device(s), {} pending)",
                        report.devices, report.pending
                    )
                } else {
                    let mut out = format!("Found {} issue(s):", report.issues.len());
                    for issue in &report.issues {
                        out.push_str(&format!("\n  - {}", issue));
                    }
                    out
                }
            })?;
            report.into_result()?;
            Ok(())
        }

        Command::Repair { dry_run, yes } => {
            if !dry_run {
                let planned = access::repair(&ctx, true)?;
                if !planned.plan.is_empty() {
                    confirm(yes, &format!("Apply these changes?\n{}", planned.plan))?;
                }
            }
            let report = access::repair(&ctx, dry_run)?;
            emit(json, &report, || {
                let mut out = if report.plan.is_empty() {
                    "✓ Nothing to repair".to_string()
                } else if report.applied {
                    format!("✓ Repaired:\n{}", report.plan.to_string().trim_end())
                } else {
                    format!("Would repair:\n{}", report.plan.to_string().trim_end())
                };
                if !report.unresolved.is_empty() {
                    out.push_str("\nLeft for you to resolve:");
                    for issue in &report.unresolved {
                        out.push_str(&format!("\n  - {}", issue));
                    }
                }
                out
            })
        }

        Command::Encrypt { files } => {
            let report = kanuka::encrypt(&ctx, &files)?;
            emit(json, &report, || secrets_summary("Encrypted", &report))
        }

        Command::Decrypt { files } => {
            let report = kanuka::decrypt(&ctx, &files)?;
            emit(json, &report, || secrets_summary("Decrypted", &report))
        }

        Command::Export { output } => {
            let output = output.unwrap_or_else(default_export_path);
            let report = kanuka::export(&ctx, &output)?;
            emit(json, &report, || {
                format!(
                    "✓ Exported {} file(s) to {}",
                    report.files.len(),
                    report.path.display()
                )
            })
        }

        Command::Import {
            archive,
            force,
            yes,
        } => {
            if force && ctx.layout().has_kanuka_dir() {
                confirm(yes, "Replace the existing .kanuka directory?")?;
            }
            let report = kanuka::import(config.project_root(), &archive, force)
                .with_context(|| format!("importing {}", archive.display()))?;
            emit(json, &report, || {
                let mut out = format!(
                    "✓ Imported project {} ({}): {} device(s), {} secret file(s)",
                    report.name,
                    report.project,
                    report.devices,
                    report.secret_files.len()
                );
                for skipped in &report.skipped {
                    out.push_str(&format!("\n  skipped {}", skipped.display()));
                }
                out
            })
        }
    }
}

fn grant_target(args: &GrantArgs) -> Result<GrantTarget, KanukaError> {
    match (&args.public_key, &args.target) {
        (Some(path), _) => {
            let pem = fs::read_to_string(path)
                .map_err(|e| kanuka::store::StoreError::io(path, e))?;
            let key = PublicKey::from_pem(&pem)?;
            let email = args.user_email.clone().ok_or_else(|| {
                AccessError::InvalidOperation("--public-key needs --user-email".into())
            })?;
            Ok(GrantTarget::PublicKey {
                key,
                email,
                device_name: args.device.clone().unwrap_or_else(|| "device".to_string()),
            })
        }
        (None, Some(target)) => Ok(GrantTarget::Known(Target::parse(
            target,
            args.device.as_deref(),
        ))),
        (None, None) => Err(AccessError::InvalidOperation(
            "name a device to grant, or pass --public-key".into(),
        )
        .into()),
    }
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce() -> String) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut stdout, value)?;
        writeln!(stdout)?;
    } else {
        writeln!(stdout, "{}", human())?;
    }
    Ok(())
}

/// Ask on the terminal unless `yes`. Without a terminal `--yes` is required.
fn confirm(yes: bool, prompt: &str) -> Result<(), KanukaError> {
    if yes {
        return Ok(());
    }
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Err(AccessError::InvalidOperation(format!(
            "{} (re-run with --yes to confirm)",
            prompt.lines().next().unwrap_or(prompt)
        ))
        .into());
    }

    eprint!("{} [y/N] ", prompt);
    let _ = io::stderr().flush();
    let mut answer = String::new();
    stdin
        .lock()
        .read_line(&mut answer)
        .map_err(|e| KanukaError::Config(format!("cannot read answer: {}", e)))?;
    match answer.trim() {
        "y" | "Y" | "yes" => Ok(()),
        _ => Err(KanukaError::Aborted),
    }
}

fn secrets_summary(verb: &str, report: &kanuka::SecretsReport) -> String {
    let mut out = format!("✓ {} {} file(s)", verb, report.files.len());
    for file in &report.files {
        out.push_str(&format!("\n  {}", file.plaintext.display()));
    }
    out
}

fn default_project_name(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .as_deref()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .unwrap_or("project")
        .to_string()
}

fn default_export_path() -> PathBuf {
    PathBuf::from(format!(
        "kanuka-export-{}.tar.gz",
        chrono::Utc::now().format("%Y%m%d-%H%M%S")
    ))
}

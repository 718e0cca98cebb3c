//! stmgr CLI application.
//!
//! Command-line interface for creating, signing, inspecting and verifying OS
//! packages, issuing signing certificates and provisioning host configuration.

use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use stmgr::cert::x509_signing::subject_name;
use stmgr::error::{Result, StmgrError};
use stmgr::keygen::{issue, IssueOptions};
use stmgr::ospkg::builder::{build, BuildOptions};
use stmgr::ospkg::show::describe;
use stmgr::ospkg::signer::sign;
use stmgr::ospkg::verifier::{load_trust_pool, verify_package};
use stmgr::provision::{write_host_config, ConfigTarget, HostConfig, NetworkMode};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stmgr")]
#[command(about = "System Transparency manager: OS packages, keys and host configuration", long_about = None)]
struct Cli {
    /// Increase log verbosity (logs go to stderr)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, sign, inspect and verify OS packages
    #[command(subcommand)]
    Ospkg(OspkgCommands),

    /// Generate keys and certificates for signing OS packages
    #[command(subcommand)]
    Keygen(KeygenCommands),

    /// Provision a node for System Transparency
    #[command(subcommand)]
    Provision(ProvisionCommands),
}

#[derive(Subcommand)]
enum OspkgCommands {
    /// Create an OS package from the provided operating system files
    Create {
        /// Output path. A directory or a file name; the archive (.zip) and
        /// descriptor (.json) share its base name. Defaults to
        /// system-transparency-os-package
        #[arg(long)]
        out: Option<PathBuf>,

        /// Short description of the boot configuration. Defaults to
        /// 'System Transparency OS package <kernel>'
        #[arg(long)]
        label: Option<String>,

        /// URL of the OS package archive in network boot mode
        #[arg(long)]
        url: Option<String>,

        /// Operating system kernel
        #[arg(long)]
        kernel: Option<PathBuf>,

        /// Operating system initramfs
        #[arg(long)]
        initramfs: Option<PathBuf>,

        /// Kernel command line
        #[arg(long)]
        cmdline: Option<String>,
    },

    /// Sign an OS package with a private key
    Sign {
        /// Private key for signing
        #[arg(long)]
        key: PathBuf,

        /// Certificate corresponding to the private key
        #[arg(long)]
        cert: PathBuf,

        /// OS package archive or descriptor file. Both need to be present
        #[arg(long)]
        ospkg: PathBuf,
    },

    /// Print an OS package's metadata, entries and signers
    Show {
        /// OS package archive or descriptor file
        #[arg(long)]
        ospkg: PathBuf,
    },

    /// Verify an OS package against trusted root certificates
    Verify {
        /// OS package archive or descriptor file
        #[arg(long)]
        ospkg: PathBuf,

        /// Trusted root certificate(s) in PEM format
        #[arg(long = "root-cert", alias = "rootCert", required = true)]
        root_certs: Vec<PathBuf>,

        /// Number of distinct valid signatures required
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        threshold: u32,
    },
}

#[derive(Subcommand)]
enum KeygenCommands {
    /// Generate an ED25519 key and certificate for signing OS packages
    Certificate {
        /// Root certificate in PEM format to sign the new certificate.
        /// Ignored with --is-ca
        #[arg(long, alias = "rootCert")]
        root_cert: Option<PathBuf>,

        /// Root key in PEM format to sign the new certificate. Ignored with --is-ca
        #[arg(long, alias = "rootKey")]
        root_key: Option<PathBuf>,

        /// Generate a self-signed root certificate
        #[arg(long, alias = "isCA")]
        is_ca: bool,

        /// Date formatted as RFC 822. Defaults to time of creation
        #[arg(long, alias = "validFrom")]
        valid_from: Option<String>,

        /// Date formatted as RFC 822. Defaults to time of creation + 72h
        #[arg(long, alias = "validUntil")]
        valid_until: Option<String>,

        /// Output certificate file. Defaults to cert.pem, or rootcert.pem with --is-ca
        #[arg(long, alias = "certOut")]
        cert_out: Option<PathBuf>,

        /// Output key file. Defaults to key.pem, or rootkey.pem with --is-ca
        #[arg(long, alias = "keyOut")]
        key_out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ProvisionCommands {
    /// Write a host configuration
    Hostconfig(HostconfigArgs),
}

#[derive(Args)]
struct HostconfigArgs {
    /// Store the host configuration in efivarfs instead of a file
    #[arg(long)]
    efi: bool,

    /// Output file when not using --efi
    #[arg(long, conflicts_with = "efi")]
    out: Option<PathBuf>,

    /// Host configuration version
    #[arg(long, default_value_t = stmgr::provision::HOST_CONFIG_VERSION)]
    version: u32,

    /// network_mode: static or dhcp
    #[arg(long, alias = "addrMode")]
    addr_mode: Option<NetworkMode>,

    /// host_ip in CIDR notation
    #[arg(long, alias = "hostIP")]
    host_ip: Option<String>,

    /// gateway
    #[arg(long)]
    gateway: Option<String>,

    /// dns
    #[arg(long)]
    dns: Option<String>,

    /// network_interface
    #[arg(long)]
    interface: Option<String>,

    /// provisioning_urls, comma separated
    #[arg(long, value_delimiter = ',')]
    urls: Option<Vec<String>>,

    /// identity
    #[arg(long)]
    id: Option<String>,

    /// authentication
    #[arg(long)]
    auth: Option<String>,

    /// network_interfaces to bond, comma separated
    #[arg(long, value_delimiter = ',')]
    interfaces: Option<Vec<String>>,

    /// bonding_mode
    #[arg(long, alias = "bondingMode")]
    bonding_mode: Option<String>,

    /// bond_name
    #[arg(long, alias = "bondName")]
    bond_name: Option<String>,

    /// Custom KEY=VALUE entries
    #[arg(long, value_parser = parse_key_value)]
    custom: Vec<(String, String)>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("ERROR: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default = if verbose > 0 { "stmgr=debug" } else { "stmgr=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Ospkg(cmd) => handle_ospkg_command(cmd),
        Commands::Keygen(cmd) => handle_keygen_command(cmd),
        Commands::Provision(ProvisionCommands::Hostconfig(args)) => handle_hostconfig(args),
    }
}

fn handle_ospkg_command(cmd: OspkgCommands) -> Result<()> {
    match cmd {
        OspkgCommands::Create {
            out,
            label,
            url,
            kernel,
            initramfs,
            cmdline,
        } => {
            let paths = build(&BuildOptions {
                out,
                label,
                url,
                kernel,
                initramfs,
                cmdline,
            })?;

            println!("Created OS package:");
            println!("  Archive:    {}", paths.archive.display());
            println!("  Descriptor: {}", paths.descriptor.display());
            Ok(())
        }

        OspkgCommands::Sign { key, cert, ospkg } => {
            let descriptor = sign(&key, &cert, &ospkg)?;
            println!("Signed OS package: {}", descriptor.display());
            Ok(())
        }

        OspkgCommands::Show { ospkg } => {
            print!("{}", describe(&ospkg)?);
            Ok(())
        }

        OspkgCommands::Verify {
            ospkg,
            root_certs,
            threshold,
        } => {
            let roots = load_trust_pool(&root_certs)?;
            let report = verify_package(&ospkg, &roots, threshold as usize)?;

            for cert in &report.valid_signers {
                println!("valid signer:   {}", subject_name(cert));
            }
            for failure in &report.failures {
                println!("rejected [{}]:   {}", failure.index, failure.error);
            }

            if report.valid {
                println!(
                    "OS package verified: {} of {} required signatures",
                    report.valid_signers.len(),
                    threshold
                );
                Ok(())
            } else {
                Err(StmgrError::ThresholdNotMet {
                    valid: report.valid_signers.len(),
                    required: report.threshold,
                })
            }
        }
    }
}

fn handle_keygen_command(cmd: KeygenCommands) -> Result<()> {
    match cmd {
        KeygenCommands::Certificate {
            root_cert,
            root_key,
            is_ca,
            valid_from,
            valid_until,
            cert_out,
            key_out,
        } => {
            let files = issue(&IssueOptions {
                is_ca,
                root_cert,
                root_key,
                valid_from,
                valid_until,
                cert_out,
                key_out,
            })?;

            let kind = if is_ca { "root certificate" } else { "certificate" };
            println!("Created {}: {}", kind, files.certificate.display());
            println!("Private key: {}", files.key.display());
            Ok(())
        }
    }
}

fn handle_hostconfig(args: HostconfigArgs) -> Result<()> {
    let config = HostConfig {
        version: args.version,
        network_mode: args.addr_mode,
        host_ip: args.host_ip,
        gateway: args.gateway,
        dns: args.dns,
        network_interface: args.interface,
        provisioning_urls: args.urls,
        identity: args.id,
        authentication: args.auth,
        timestamp: Some(Utc::now().timestamp()),
        network_interfaces: args.interfaces,
        bonding_mode: args.bonding_mode,
        bond_name: args.bond_name,
        custom: args.custom.into_iter().collect::<BTreeMap<_, _>>(),
    };

    let target = if args.efi {
        ConfigTarget::default_efi()
    } else {
        args.out
            .map(ConfigTarget::File)
            .unwrap_or_else(ConfigTarget::default_file)
    };

    write_host_config(&config, &target)?;

    match target {
        ConfigTarget::File(path) => println!("Wrote host configuration: {}", path.display()),
        ConfigTarget::Efi { .. } => println!(
            "Wrote host configuration to EFI variable {}",
            stmgr::provision::EFI_VARIABLE_NAME
        ),
    }
    Ok(())
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

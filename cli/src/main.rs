use std::borrow::Cow;
use std::path::PathBuf;

use anyhow::Context as AnyhowContext;
use clap::{Parser, Subcommand};
use flexi_logger::{FileSpec, LevelFilter, LogSpecification, Logger, LoggerHandle, WriteMode};

use afap::ids::Uid;
use afap::service::SHELL_UID;
use afap::version::STATE_FORMAT_VERSION;
use afap::{CallerIdentity, Context, DefaultContext};

mod device;
mod parsers;

mod access;
use access::{CheckAccess, GetFlags, GetState};

mod update;
use update::{Deny, Grant, UpdateFlags};

mod revoke;
use revoke::RevokeSelf;

mod list;
use list::{ListAgents, ListTargets};

mod allowlist;
use allowlist::SetAllowlist;

mod lifecycle;
use lifecycle::{PackageUninstalled, RemoveAppId, RemoveUser};

mod dump;
use dump::Dump;

const SIMPLE_VERSION_STRING: &'static str =
    include!(concat!(env!("OUT_DIR"), "/simple_version_string"));
const VERSION_STRING: &'static str = include!(concat!(env!("OUT_DIR"), "/version_string"));

#[derive(Parser)]
#[command(name = "afap")]
#[command(version(SIMPLE_VERSION_STRING))]
#[command(long_version(VERSION_STRING))]
struct Cli {
    /// `-e`, `--log-stderr`: Flag value, when enabled will cause logs to be output to `stderr`
    /// instead of a log file. Disabled by default (logs go to a file by default)
    #[arg(short = 'e', long, help = "Log to stderr instead of a file", action = clap::ArgAction::SetTrue, default_value_t = false)]
    log_stderr: bool,

    /// `-f`, `--log-file`: Path to desired log output file location. Optional, defaults to
    /// `$AFAP_HOME/afap.log`
    #[arg(short = 'f', long, help = "Send log output to the given file")]
    log_file: Option<PathBuf>,

    /// `-s`, `--log-spec`: Debug options for [flexi_logger](https://docs.rs/flexi_logger/latest/flexi_logger/struct.LogSpecification.html)
    #[arg(short = 's', long, help = "Log spec for flexi_logger")]
    log_spec: Option<String>,

    /// `-l`, `--log-level`: Set the desired log verbosity. Defaults to 0, all values are listed
    /// below:
    ///
    /// | Value | Log Level |
    /// | ----- | --------- |
    /// | **0** | **Warn** |
    /// | 1 | Info |
    /// | 2 | Debug |
    /// | 3 | Trace |
    #[arg(
        short = 'l',
        long,
        help = "Set the log level, 0 = warn, 1 = info, etc",
        long_help = None,
        default_value_t = 0
    )]
    log_level: u8,

    /// `--caller-uid`: The uid the request is made as. Defaults to the shell
    /// uid, which holds every permission.
    #[arg(long, help = "Make requests as the given uid", default_value_t = SHELL_UID)]
    caller_uid: Uid,

    /// The command being called. See [Commands] for the implemented options
    #[command(subcommand)]
    command: Commands,
}

/// The currently implemented commands
#[derive(Subcommand)]
enum Commands {
    /// Display the full version string and exit
    #[command()]
    Version,

    /// Print whether an agent is granted, denied or can't request access to a
    /// target
    #[command()]
    GetState(GetState),

    /// Print whether an agent may execute a target's app functions
    #[command()]
    CheckAccess(CheckAccess),

    /// Print the stored access flags of an agent and target
    #[command()]
    GetFlags(GetFlags),

    /// Change the access flags within a mask
    #[command()]
    UpdateFlags(UpdateFlags),

    /// Grant an agent access to a target
    #[command()]
    Grant(Grant),

    /// Deny an agent access to a target
    #[command()]
    Deny(Deny),

    /// Give up an agent's own access to a target
    #[command()]
    RevokeSelf(RevokeSelf),

    /// List the packages that can act as agents
    #[command()]
    ListAgents(ListAgents),

    /// List the packages that expose app functions
    #[command()]
    ListTargets(ListTargets),

    /// Replace or inspect the agent allowlist
    #[command()]
    SetAllowlist(SetAllowlist),

    /// Drop all access of a package that was uninstalled for a user
    #[command()]
    PackageUninstalled(PackageUninstalled),

    /// Drop all access involving an app id
    #[command()]
    RemoveAppId(RemoveAppId),

    /// Drop everything stored for a user
    #[command()]
    RemoveUser(RemoveUser),

    /// Print every stored access entry
    #[command()]
    Dump(Dump),
}

impl Cli {
    fn configure_loggers(&self, ctx: &DefaultContext) -> anyhow::Result<LoggerHandle> {
        let log_spec = match &self.log_spec {
            Some(s) => {
                LogSpecification::parse(s).with_context(|| format!("parsing log spec {}", s))?
            }
            None => {
                if self.log_level > 0 {
                    let lvl = if self.log_level == 1 {
                        LevelFilter::Info
                    } else if self.log_level == 2 {
                        LevelFilter::Debug
                    } else {
                        LevelFilter::Trace
                    };
                    LogSpecification::builder()
                        .module("afap", lvl)
                        .module("afap_cli", lvl)
                        .build()
                } else {
                    LogSpecification::env().with_context(|| "getting log spec from env")?
                }
            }
        };

        let mut logger = Logger::with(log_spec);

        if !self.log_stderr {
            let path = match &self.log_file {
                Some(v) => {
                    if v.is_absolute() {
                        Some(Cow::Borrowed(v))
                    } else {
                        let full_path = std::env::current_dir()?.join(v);
                        Some(Cow::Owned(full_path))
                    }
                }
                None => ctx.get_log_file().map(Cow::Owned).ok(),
            };

            if let Some(p) = &path {
                logger = logger
                    .log_to_file(
                        FileSpec::try_from(p.as_ref()).with_context(|| "creating filespec")?,
                    )
                    .append()
                    .write_mode(WriteMode::BufferAndFlush);
            }
        }

        Ok(logger.start().with_context(|| "starting logger")?)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = &cli.command {
        println!(
            "{}\nlibrary {}, state format {}",
            VERSION_STRING,
            afap::VERSION,
            STATE_FORMAT_VERSION
        );
        return Ok(());
    }

    let ctx = DefaultContext::new();

    let log_handle = cli.configure_loggers(&ctx)?;

    let caller = CallerIdentity::new(cli.caller_uid, std::process::id() as i32);
    log::debug!("running as uid {}", caller.uid);

    let res = match cli.command {
        Commands::GetState(c) => c.run(&ctx, &caller),
        Commands::CheckAccess(c) => c.run(&ctx, &caller),
        Commands::GetFlags(c) => c.run(&ctx, &caller),
        Commands::UpdateFlags(c) => c.run(&ctx, &caller),
        Commands::Grant(c) => c.run(&ctx, &caller),
        Commands::Deny(c) => c.run(&ctx, &caller),
        Commands::RevokeSelf(c) => c.run(&ctx, &caller),
        Commands::ListAgents(c) => c.run(&ctx, &caller),
        Commands::ListTargets(c) => c.run(&ctx, &caller),
        Commands::SetAllowlist(c) => c.run(&ctx, &caller),
        Commands::PackageUninstalled(c) => c.run(&ctx, &caller),
        Commands::RemoveAppId(c) => c.run(&ctx, &caller),
        Commands::RemoveUser(c) => c.run(&ctx, &caller),
        Commands::Dump(c) => c.run(&ctx, &caller),

        Commands::Version => panic!("unreachable"),
    };

    if let Err(e) = &res {
        log::error!("{:#}", e);
    }
    log_handle.flush();
    res
}

//! Command implementations and shared invocation setup

pub mod down;
pub mod render;
pub mod slots;
pub mod up;

use clap::Args;
use miette::{miette, IntoDiagnostic, Result, WrapErr};
use std::path::PathBuf;
use std::time::Duration;

use berth_core::{parse_set_vars, RenderContext, Stack, Vars};
use berth_engine::{load_stack, RenderFilters};
use berth_store::{KubectlBackend, MemoryBackend, SlotBackend};

/// Flags shared by every subcommand
#[derive(Args, Clone, Debug)]
pub struct GlobalOpts {
    /// Stack descriptor path
    #[arg(long, global = true, default_value = "berth.yaml")]
    pub stack: PathBuf,

    /// Environment class (e.g. ai, staging)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    /// Additional .env-style files, merged in order
    #[arg(long = "env-file", global = true)]
    pub env_files: Vec<PathBuf>,

    /// Inline variable overrides (KEY=value), highest precedence
    #[arg(long = "set", global = true)]
    pub set: Vec<String>,

    /// Render only these infrastructure groups / services
    #[arg(long, global = true)]
    pub only: Vec<String>,

    /// Skip these infrastructure groups / services
    #[arg(long, global = true)]
    pub skip: Vec<String>,

    /// Override the target namespace (bypasses the pattern)
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Preferred slot number (0 = first free)
    #[arg(long, global = true, default_value_t = 0)]
    pub slot: u32,

    /// Issue number to associate with the slot
    #[arg(long, global = true, default_value_t = 0)]
    pub issue: u64,

    /// Pull request number to associate with the slot
    #[arg(long, global = true, default_value_t = 0)]
    pub pr: u64,

    /// Render and plan only; no cluster calls, in-memory slot store
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Per-call timeout for external tools, in seconds
    #[arg(long, global = true, default_value_t = 30)]
    pub timeout: u64,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

impl GlobalOpts {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// The environment name, required by slot-bound commands
    pub fn require_env(&self) -> Result<String> {
        self.env
            .clone()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| miette!("an environment is required; pass --env <name>"))
    }
}

/// Loaded invocation state shared by the commands
pub struct Session {
    pub stack: Stack,
    pub ctx: RenderContext,
    pub filters: RenderFilters,
}

impl Session {
    /// Build the variable table, load the descriptor and derive the context
    pub fn open(opts: &GlobalOpts) -> Result<Self> {
        let mut base = Vars::from_process_env();
        for file in &opts.env_files {
            base.merge_env_file(file)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to load env file {}", file.display()))?;
        }
        let overrides = parse_set_vars(&opts.set)
            .into_diagnostic()
            .wrap_err("failed to parse --set overrides")?;

        let (stack, vars) = load_stack(&opts.stack, &base, &overrides)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to load stack from {}", opts.stack.display()))?;

        let project_root = opts
            .stack
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let ctx = RenderContext::new(
            opts.env.clone().unwrap_or_default(),
            project_root,
            vars,
        )
        .with_slot(opts.slot)
        .with_namespace(opts.namespace.clone().unwrap_or_default());

        Ok(Self {
            stack,
            ctx,
            filters: RenderFilters::new(&opts.only, &opts.skip),
        })
    }

    /// The slot store backing this invocation; in-memory under --dry-run
    pub fn backend(&self, opts: &GlobalOpts) -> Box<dyn SlotBackend> {
        if opts.dry_run {
            Box::new(MemoryBackend::new())
        } else {
            Box::new(
                KubectlBackend::new(&self.stack.state.namespace)
                    .with_timeout(opts.call_timeout()),
            )
        }
    }
}

//! hashlet-fs CLI
//!
//! Runs the hash chain generator and exposes it:
//! - `mount`: as a read-only FUSE filesystem (requires the `fuse` feature)
//! - `watch`: as a stream of digests on stdout
//! - `verify`: replays the chain from genesis to check a published digest

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hashlet_fs::chain::{replay_from_genesis, Salt, Sha256Digest};
use hashlet_fs::signal::{install_signal_handlers, ShutdownSignal};
use hashlet_fs::{ChainConfig, ChainHandle, ChainSnapshot, HashletError, HashletResult};

#[derive(Parser)]
#[command(name = "hashlet-fs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A self-extending SHA-256 hash chain served as a read-only filesystem")]
#[command(long_about = "hashlet-fs - hash chain filesystem\n\n\
    A background thread extends a SHA-256 chain: each link hashes the previous\n\
    link's hex digest followed by a fixed salt. The latest link and a bounded\n\
    history are readable as files.\n\n\
    Examples:\n\
      hashlet-fs mount /mnt/chain\n\
      hashlet-fs watch --count 10\n\
      hashlet-fs verify --sequence 1 --digest 387b0ab6...")]
pub struct Cli {
    #[command(flatten)]
    pub chain: ChainArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Chain parameters; flags override values from `--config`
#[derive(Args)]
pub struct ChainArgs {
    /// JSON config file (initial_nonce, salt, interval_ms, history_capacity, stall_factor)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Nonce of the genesis link [default: 0]
    #[arg(long, global = true, value_name = "NONCE")]
    pub nonce: Option<String>,

    /// Salt appended to every nonce [default: blossom]
    #[arg(long, global = true, value_name = "SALT")]
    pub salt: Option<String>,

    /// Milliseconds between links [default: 100]
    #[arg(short, long, global = true, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Links kept under /history [default: 64]
    #[arg(long, global = true, value_name = "N")]
    pub history: Option<usize>,
}

impl ChainArgs {
    fn resolve(&self) -> HashletResult<ChainConfig> {
        let mut config = match &self.config {
            Some(path) => ChainConfig::load(path)?,
            None => ChainConfig::default(),
        };
        if let Some(nonce) = &self.nonce {
            config.initial_nonce = nonce.clone();
        }
        if let Some(salt) = &self.salt {
            config.salt = salt.clone();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.interval_ms = interval_ms;
        }
        if let Some(history) = self.history {
            config.history_capacity = history;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mount the chain as a read-only filesystem
    #[command(long_about = "Mount the chain as a read-only filesystem\n\n\
        The generator starts before the mount and is stopped after unmount.\n\
        SIGINT, SIGTERM or SIGHUP unmounts cleanly.\n\n\
        Example:\n\
          hashlet-fs mount /mnt/chain\n\
          cat /mnt/chain/current")]
    Mount {
        /// Directory to mount on
        #[arg(value_name = "MOUNTPOINT")]
        mountpoint: PathBuf,

        /// Allow other users to read the mount
        #[arg(long)]
        allow_other: bool,

        /// Filesystem name shown in mount output
        #[arg(long, default_value = "hashlet", value_name = "NAME")]
        fsname: String,
    },

    /// Print each new digest as it is published
    Watch {
        /// Stop after this many links
        #[arg(short = 'n', long, value_name = "N")]
        count: Option<u64>,

        /// Prefix each digest with its sequence number
        #[arg(short, long)]
        verbose: bool,
    },

    /// Recompute the chain from genesis and check or print a link
    Verify {
        /// Sequence number of the link
        #[arg(short, long, value_name = "N")]
        sequence: u64,

        /// Expected hex digest; printed when omitted
        #[arg(short, long, value_name = "HEX")]
        digest: Option<String>,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> HashletResult<()> {
    let cli = Cli::parse();
    let config = cli.chain.resolve()?;

    match cli.command {
        Commands::Mount {
            mountpoint,
            allow_other,
            fsname,
        } => run_mount(&config, mountpoint, allow_other, fsname),
        Commands::Watch { count, verbose } => run_watch(&config, count, verbose),
        Commands::Verify { sequence, digest } => run_verify(&config, sequence, digest),
    }
}

#[cfg(feature = "fuse")]
fn run_mount(
    config: &ChainConfig,
    mountpoint: PathBuf,
    allow_other: bool,
    fsname: String,
) -> HashletResult<()> {
    use hashlet_fs::{spawn_mount, HashletFS, MountOptions};

    let shutdown = Arc::new(ShutdownSignal::new());
    install_signal_handlers(Arc::clone(&shutdown))?;

    let handle = ChainHandle::spawn(config)?;
    let fs = HashletFS::new(Arc::clone(handle.store()));
    let options = MountOptions {
        allow_other,
        fsname,
        ..Default::default()
    };
    let session = spawn_mount(fs, &mountpoint, options)?;
    info!(mountpoint = %mountpoint.display(), "mounted");

    let mut stalled = false;
    while !shutdown.wait_timeout(supervision_period(config)) {
        if !handle.is_running() {
            warn!("generator stopped; unmounting");
            break;
        }
        if session.guard.is_finished() {
            info!("filesystem unmounted externally");
            break;
        }
        match handle.check_liveness() {
            Err(_) => stalled = true,
            Ok(()) if stalled => {
                info!("generator recovered");
                stalled = false;
            }
            Ok(()) => {}
        }
    }

    drop(session);
    let last = handle.shutdown()?;
    info!(
        sequence = last,
        signal = shutdown.signal_name(),
        "unmounted and generator stopped"
    );
    Ok(())
}

#[cfg(not(feature = "fuse"))]
fn run_mount(
    _config: &ChainConfig,
    _mountpoint: PathBuf,
    _allow_other: bool,
    _fsname: String,
) -> HashletResult<()> {
    Err(HashletError::InvalidConfig(
        "mount requires hashlet-fs built with --features fuse".into(),
    ))
}

fn run_watch(config: &ChainConfig, count: Option<u64>, verbose: bool) -> HashletResult<()> {
    let shutdown = Arc::new(ShutdownSignal::new());
    install_signal_handlers(Arc::clone(&shutdown))?;

    let handle = ChainHandle::spawn(config)?;
    let store = Arc::clone(handle.store());
    let mut stdout = io::stdout().lock();
    let mut cursor = WatchCursor::new(count, verbose);

    while cursor.write_new(&store.read(), &mut stdout)? {
        if !handle.is_running() || shutdown.wait_timeout(config.interval()) {
            break;
        }
    }

    let last = handle.shutdown()?;
    info!(
        printed = cursor.printed,
        missed = cursor.missed,
        sequence = last,
        "watch finished"
    );
    Ok(())
}

/// Position of the `watch` output in the chain
struct WatchCursor {
    next_sequence: u64,
    printed: u64,
    /// Links evicted from the history before they could be printed
    missed: u64,
    count: Option<u64>,
    verbose: bool,
}

impl WatchCursor {
    fn new(count: Option<u64>, verbose: bool) -> Self {
        WatchCursor {
            next_sequence: 0,
            printed: 0,
            missed: 0,
            count,
            verbose,
        }
    }

    fn is_done(&self) -> bool {
        self.count.is_some_and(|n| self.printed >= n)
    }

    /// Print every retained link of `snap` not printed yet
    ///
    /// Returns `false` once output should stop: `count` links were printed
    /// or the reader went away.
    fn write_new<W: Write>(&mut self, snap: &ChainSnapshot, out: &mut W) -> HashletResult<bool> {
        if self.is_done() {
            return Ok(false);
        }

        let (oldest, _) = snap.history_range();
        if self.next_sequence < oldest {
            let missed = oldest - self.next_sequence;
            warn!(missed, "output fell behind the history window");
            self.missed += missed;
            self.next_sequence = oldest;
        }

        let from = self.next_sequence;
        for link in snap.history().filter(|l| l.sequence >= from) {
            let line = if self.verbose {
                writeln!(out, "{} {}", link.sequence, link.digest_hex())
            } else {
                writeln!(out, "{}", link.digest_hex())
            };
            if !keep_writing(line)? {
                return Ok(false);
            }
            self.next_sequence = link.sequence + 1;
            self.printed += 1;
            if self.is_done() {
                break;
            }
        }

        if !keep_writing(out.flush())? {
            return Ok(false);
        }
        Ok(!self.is_done())
    }
}

/// A closed pipe ends output quietly; other write errors are returned
fn keep_writing(result: io::Result<()>) -> HashletResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn run_verify(config: &ChainConfig, sequence: u64, digest: Option<String>) -> HashletResult<()> {
    let salt = Salt::new(config.salt.as_bytes());
    let link = replay_from_genesis(config.initial_nonce.as_bytes(), &salt, &Sha256Digest, sequence)?;
    let actual = link.digest_hex();

    match digest {
        None => println!("{}", actual),
        Some(expected) if expected.eq_ignore_ascii_case(&actual) => {
            println!("OK {} {}", sequence, actual);
        }
        Some(expected) => {
            return Err(HashletError::ChainBroken {
                sequence,
                reason: format!("expected {}, chain produces {}", expected, actual),
            });
        }
    }
    Ok(())
}

/// How often the mount loop checks generator health
#[cfg(feature = "fuse")]
fn supervision_period(config: &ChainConfig) -> std::time::Duration {
    config.interval().max(std::time::Duration::from_millis(250))
}

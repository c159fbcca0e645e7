//! Demo host: a single-threaded task loop driving a native loop through
//! the bridge.
//!
//! The host:
//! 1. Resolves the startup argv for its role
//! 2. Prepares the bridge and runs the startup pump
//! 3. Runs its own task loop until the native loop stops
//! 4. Tears the bridge down
//!
//! Usage: tandem [--secondary] [--ticks N] [--interval-ms N] [--info] [args...]

use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tandem::startup;
use tandem::{BridgeConfig, HostQueue, LoopBridge, Role, ScriptRuntime};

/// Stand-in for an embedded script engine: logs context switches and idle
/// notifications.
#[derive(Default)]
struct LoggingRuntime {
    idle: AtomicU32,
}

impl ScriptRuntime for LoggingRuntime {
    fn enter_context(&self) {
        log::trace!("runtime: enter context");
    }

    fn exit_context(&self) {
        log::trace!("runtime: exit context");
    }

    fn idle_notification(&self) {
        let n = self.idle.fetch_add(1, Ordering::Relaxed) + 1;
        log::info!("runtime: idle notification #{}", n);
    }
}

struct Options {
    role: Role,
    ticks: u32,
    interval: Duration,
    info: bool,
    passthrough: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Options, Box<dyn Error>> {
    let mut opts = Options {
        role: Role::Primary,
        ticks: 5,
        interval: Duration::from_millis(200),
        info: false,
        passthrough: Vec::new(),
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--secondary" => opts.role = Role::Secondary,
            "--info" => opts.info = true,
            "--ticks" => {
                let value = iter.next().ok_or("--ticks needs a value")?;
                opts.ticks = value.parse()?;
            }
            "--interval-ms" => {
                let value = iter.next().ok_or("--interval-ms needs a value")?;
                let ms: u64 = value.parse()?;
                if ms == 0 {
                    return Err("--interval-ms must be positive".into());
                }
                opts.interval = Duration::from_millis(ms);
            }
            _ => opts.passthrough.push(arg.clone()),
        }
    }
    Ok(opts)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let opts = parse_args(&args)?;
    let exe = std::env::current_exe()?;
    let config = BridgeConfig::from_env(opts.role);

    let mut argv = vec![args.first().cloned().unwrap_or_else(|| "tandem".to_string())];
    argv.extend(opts.passthrough.iter().cloned());
    let argv = startup::startup_argv(argv, &exe, opts.role)?;

    if opts.info {
        println!("=== tandem host ===");
        println!("Role:            {:?}", config.role);
        println!("Idle Interval:   {:?}", config.idle_interval);
        println!("Keep Alive:      {}", config.keep_alive);
        println!("Poller Thread:   {}", config.thread_name);
        println!("Resources:       {:?}", startup::resources_dir(&exe, opts.role));
        println!("Startup Argv:    {:?}", argv);
        return Ok(());
    }

    log::info!("starting as {:?} with argv {:?}", opts.role, argv);

    let host = HostQueue::new();
    let runtime = Arc::new(LoggingRuntime::default());
    let mut bridge = LoopBridge::with_new_loop(config, host.clone(), runtime)?;
    let native = bridge.native().clone();

    // Heartbeat on the native loop; stops it after the requested ticks.
    let ticks = opts.ticks;
    let started = Instant::now();
    let mut count = 0u32;
    native
        .lock()
        .map_err(|_| "native loop lock poisoned")?
        .add_timer(opts.interval, Some(opts.interval), move |lp| {
            count += 1;
            log::info!("tick {}/{} at {:?}", count, ticks, started.elapsed());
            if count >= ticks {
                lp.stop();
            }
        });

    bridge.prepare_message_loop()?;
    let first = bridge.run_message_loop()?;
    log::debug!("startup pump: {:?}", first);

    host.run();

    bridge.shutdown()?;
    let stats = bridge.stats();
    log::info!(
        "done: {} polls, {} pumps ({} drained, {} stopped), {} host tasks",
        stats.polls,
        stats.pumps_run,
        stats.drained,
        stats.stopped,
        host.executed()
    );
    Ok(())
}

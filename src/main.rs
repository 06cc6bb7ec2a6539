// BBO-RX — ULTRA LOW LATENCY BBO RECEIVER
// Critical path: NIC -> AF_XDP -> BBO parser -> shared memory.
// Target: P99/P50 ratio < 2.5x, receive-to-publish under ~100ns on a
// pinned, isolated core.
//
// Everything in this file is cold: argument parsing, privilege setup,
// signal handlers, the optional stats thread. The hot loop lives in
// rx::receiver and never comes back here until shutdown.

use std::sync::atomic::Ordering;
use std::time::Duration;

use bbo_rx::nic::xdp::{enable_promiscuous, XdpPort};
use bbo_rx::rx::receiver::{self, Config, Receiver, Stats};
use bbo_rx::engine::clock::TscClock;

extern "C" fn signal_handler(_sig: i32) {
    // One atomic store; async-signal-safe.
    receiver::request_stop();
}

/// Lock current and future pages into RAM so the hot path never faults.
fn setup_memory_locking() {
    if unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) } != 0 {
        eprintln!("[BBO-RX] WARNING: mlockall failed (run as root for best performance)");
    } else {
        eprintln!("[BBO-RX] Memory locked (no page faults during operation)");
    }
}

/// Best-effort switch of every core's cpufreq governor to performance.
fn setup_cpu_governor() {
    let Ok(entries) = std::fs::read_dir("/sys/devices/system/cpu") else { return };
    let mut switched = 0u32;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with("cpu") || !name[3..].bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let path = entry.path().join("cpufreq/scaling_governor");
        if std::fs::write(&path, "performance\n").is_ok() {
            switched += 1;
        }
    }
    if switched > 0 {
        eprintln!("[BBO-RX] CPU governor set to performance on {} cores", switched);
    } else {
        eprintln!("[BBO-RX] WARNING: could not set performance governor");
    }
}

/// Pin the calling thread to one logical CPU.
fn pin_to_core(core_id: i32) {
    if core_id < 0 {
        return;
    }
    unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut cpuset);
        libc::CPU_SET(core_id as usize, &mut cpuset);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpuset) == 0 {
            eprintln!("[BBO-RX] Pinned to CPU core {}", core_id);
        } else {
            eprintln!("[BBO-RX] WARNING: failed to pin to core {}", core_id);
        }
    }
}

fn print_usage(prog: &str) {
    println!(
        "bbo-rx - ultra low latency BBO receiver\n\
         \n\
         Usage: {} [-i <iface>] -- [OPTIONS]\n\
         \n\
         Substrate options (before --):\n\
         \x20 -i, --iface <name>     Network interface to bind AF_XDP on (default: eth0)\n\
         \n\
         Options (after --):\n\
         \x20 -p, --port <id>        NIC port ID (default: 0)\n\
         \x20 -q, --queue <id>       RX queue ID (default: 0)\n\
         \x20 -u, --udp-port <port>  UDP port to listen on (default: 12345)\n\
         \x20 -c, --core <id>        CPU core to pin to (default: none)\n\
         \x20 -s, --shm <name>       Shared memory name (default: gateway)\n\
         \x20 -w, --warmup <count>   Warm-up packet count (default: 1000)\n\
         \x20 -n, --no-warmup        Skip warm-up phase\n\
         \x20 -b, --benchmark        Enable benchmark mode (stats every 5s)\n\
         \x20 -h, --help             Show this help\n\
         \n\
         Example:\n\
         \x20 sudo {} -i enp9s0 -- -u 5000 -c 14\n",
        prog, prog
    );
}

/// Consume an option's value argument, parsing it as T. Logs on a missing
/// or malformed value so the caller can just bail out.
fn take_value<T: std::str::FromStr>(args: &[String], i: &mut usize, opt: &str) -> Option<T> {
    *i += 1;
    let parsed = args.get(*i).and_then(|v| v.parse().ok());
    if parsed.is_none() {
        eprintln!("Invalid or missing value for {}", opt);
    }
    parsed
}

struct Options {
    iface: String,
    config: Config,
    pin_core: i32,
    warmup_count: u32,
    skip_warmup: bool,
    benchmark_mode: bool,
}

/// Parse argv. Substrate arguments precede the `--` separator, application
/// options follow it. Returns None after printing usage; `exit_code` tells
/// the caller whether that was help (0) or an error (1).
fn parse_args(args: &[String], exit_code: &mut i32) -> Option<Options> {
    let mut opts = Options {
        iface: "eth0".to_string(),
        config: Config::default(),
        pin_core: -1,
        warmup_count: 1000,
        skip_warmup: false,
        benchmark_mode: false,
    };

    let separator = args.iter().position(|a| a == "--").unwrap_or(args.len());

    let mut i = 1;
    while i < separator {
        match args[i].as_str() {
            "-i" | "--iface" => {
                i += 1;
                if i < separator {
                    opts.iface = args[i].clone();
                }
            }
            "-h" | "--help" => {
                print_usage(&args[0]);
                *exit_code = 0;
                return None;
            }
            other if !other.starts_with('-') => {
                opts.iface = other.to_string();
            }
            other => {
                eprintln!("Unknown substrate option: {}", other);
                print_usage(&args[0]);
                *exit_code = 1;
                return None;
            }
        }
        i += 1;
    }

    let mut i = separator + 1;
    while i < args.len() {
        let opt = args[i].as_str();
        match opt {
            "-p" | "--port" => {
                opts.config.port_id = take_value(args, &mut i, opt)?;
            }
            "-q" | "--queue" => {
                opts.config.queue_id = take_value(args, &mut i, opt)?;
            }
            "-u" | "--udp-port" => {
                opts.config.udp_port = take_value(args, &mut i, opt)?;
            }
            "-c" | "--core" => {
                opts.pin_core = take_value(args, &mut i, opt)?;
            }
            "-s" | "--shm" => {
                opts.config.shm_name = take_value(args, &mut i, opt)?;
            }
            "-w" | "--warmup" => {
                opts.warmup_count = take_value(args, &mut i, opt)?;
            }
            "-n" | "--no-warmup" => {
                opts.skip_warmup = true;
            }
            "-b" | "--benchmark" => {
                opts.benchmark_mode = true;
            }
            "-h" | "--help" => {
                print_usage(&args[0]);
                *exit_code = 0;
                return None;
            }
            other => {
                eprintln!("Unknown option: {}", other);
                print_usage(&args[0]);
                *exit_code = 1;
                return None;
            }
        }
        i += 1;
    }

    Some(opts)
}

fn print_counters(stats: &Stats) {
    println!("=== Receiver statistics ===");
    println!("  Packets received:  {}", stats.packets_received.load(Ordering::Relaxed));
    println!("  Packets processed: {}", stats.packets_processed.load(Ordering::Relaxed));
    println!("  Parse errors:      {}", stats.parse_errors.load(Ordering::Relaxed));
    println!("  Ring buffer full:  {}", stats.ring_buffer_full.load(Ordering::Relaxed));
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut exit_code = 1;
    let Some(opts) = parse_args(&args, &mut exit_code) else {
        std::process::exit(exit_code);
    };

    println!("=== bbo-rx: ultra low latency BBO receiver ===");
    println!("Configuration:");
    println!("  Interface:    {}", opts.iface);
    println!("  NIC port:     {}", opts.config.port_id);
    println!("  RX queue:     {}", opts.config.queue_id);
    println!("  UDP port:     {}", opts.config.udp_port);
    println!("  Shared mem:   {}", opts.config.shm_name);
    println!("  Warm-up:      {} ({} packets)",
        if opts.skip_warmup { "disabled" } else { "enabled" }, opts.warmup_count);
    println!("  Benchmark:    {}", if opts.benchmark_mode { "enabled" } else { "disabled" });
    println!();

    setup_memory_locking();
    setup_cpu_governor();
    pin_to_core(opts.pin_core);

    // Handlers armed before any long-running phase so a Ctrl+C during
    // calibration or warm-up still shuts down cleanly.
    unsafe {
        libc::signal(libc::SIGINT, signal_handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, signal_handler as *const () as libc::sighandler_t);
    }

    let Some(clock) = TscClock::calibrate() else {
        eprintln!("[BBO-RX] Error: TSC calibration failed");
        std::process::exit(1);
    };

    println!("Initializing AF_XDP on {} queue {}...", opts.iface, opts.config.queue_id);
    let Some(port) = XdpPort::create(&opts.iface, opts.config.queue_id as u32) else {
        eprintln!("[BBO-RX] Error: failed to bind the receive port");
        std::process::exit(1);
    };
    enable_promiscuous(&opts.iface);

    let Some(mut receiver) = Receiver::new(opts.config, clock, port) else {
        eprintln!("[BBO-RX] Error: failed to map the shared-memory ring");
        std::process::exit(1);
    };

    if !opts.skip_warmup {
        receiver.warm_up(opts.warmup_count);
    }

    receiver.print_stats();

    println!();
    println!("Starting ultra low latency polling loop...");
    println!("Press Ctrl+C to stop");
    println!();

    let stats_thread = if opts.benchmark_mode {
        let stats = receiver.stats_handle();
        Some(std::thread::spawn(move || {
            while receiver::is_running() {
                std::thread::sleep(Duration::from_secs(5));
                if receiver::is_running() {
                    print_counters(&stats);
                }
            }
        }))
    } else {
        None
    };

    receiver.poll_loop();

    if let Some(handle) = stats_thread {
        let _ = handle.join();
    }

    println!();
    println!("=== Final statistics ===");
    receiver.print_stats();
}

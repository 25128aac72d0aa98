// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! pc-demo: small programs running on the proto-coro runtime.

mod demos;
mod http;
mod output;

use std::env;
use std::process;

use proto_coro::Config;

const DEFAULT_PORT: u16 = 3333;

fn main() {
    env_logger::init();
    output::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "steps" => demos::run_steps(),
        "calls" => demos::run_calls(),
        "yield-sleep" => demos::run_yield_sleep(Config::from_env().workers()),
        "http" => {
            let port = match args.get(2) {
                None => DEFAULT_PORT,
                Some(p) => match p.parse::<u16>() {
                    Ok(port) => port,
                    Err(_) => {
                        eprintln!("{}: invalid port '{}'", output::error_label(), p);
                        eprintln!("Usage: pc-demo http [port]");
                        process::exit(1);
                    }
                },
            };
            http::run(port, Config::from_env().workers());
        }
        "help" | "--help" | "-h" => print_usage(),
        "version" | "--version" | "-V" => {
            println!("pc-demo {}", env!("CARGO_PKG_VERSION"));
        }
        other => {
            eprintln!("{}: unknown command '{}'", output::error_label(), other);
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("pc-demo {} - stackless coroutines on a thread pool", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: pc-demo <command> [args]");
    println!();
    println!("Commands:");
    println!("  steps         Drive a three-step coroutine by hand");
    println!("  calls         Drive five nested calls by hand");
    println!("  yield-sleep   Yield, then sleep 100ms, on the event loop");
    println!("  http [port]   Serve request heads (default port {DEFAULT_PORT})");
    println!("  help          Show this help");
    println!("  version       Show version");
    println!();
    println!("Environment:");
    println!("  PROTO_CORO_WORKERS   worker threads (default: one per CPU)");
    println!("  RUST_LOG             log filter, e.g. proto_coro=debug");
}

use std::process::ExitCode;

use mio::Poll;
use proxy_log::info;

use sni_table_proxy::config;
use sni_table_proxy::error::Result;
use sni_table_proxy::reactor::Server;

struct Args {
    config_path: String,
    test_only: bool,
    verbose: bool,
}

fn parse_args() -> Result<Args> {
    let mut config_path = None;
    let mut test_only = false;
    let mut verbose = false;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                config_path = Some(iter.next().ok_or("-c/--config requires a path argument")?);
            }
            "-t" | "--test" => test_only = true,
            "-v" | "--verbose" => verbose = true,
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unrecognized argument '{}'", other).into()),
        }
    }

    Ok(Args {
        config_path: config_path.unwrap_or_else(|| "./sniproxy.conf".to_string()),
        test_only,
        verbose,
    })
}

fn print_usage() {
    println!("usage: proxyd [-c <config>] [-t] [-v]");
    println!("  -c, --config <path>   path to the proxy config file (default ./sniproxy.conf)");
    println!("  -t, --test            parse and print the config, then exit");
    println!("  -v, --verbose         enable trace-level logging");
}

fn run() -> Result<()> {
    let args = parse_args()?;
    if args.verbose {
        std::env::set_var("RUST_LOG", "trace");
    }

    let source = std::fs::read_to_string(&args.config_path)
        .map_err(|e| format!("failed to read config '{}': {}", args.config_path, e))?;
    let cfg = config::parse_str(&source)?;

    if args.test_only {
        config::print_config(&cfg);
        return Ok(());
    }

    let mut poll = Poll::new()?;
    let mut server = Server::new(&cfg, &poll)?;
    info!(
        "sni-table-proxy started: {} listener(s), pid {}",
        server.listener_count(),
        std::process::id()
    );

    server.run(&mut poll)
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:?}", e);
            ExitCode::FAILURE
        }
    }
}

use mcastd::conf::Configuration;
use mcastd::proxy::{Proxy, ProxyOptions};
use mcastd::sys::check_kernel;

use getopts::Options;

use std::process::ExitCode;

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help");
    opts.optflag("r", "reset-rp-filter", "disable the reverse path filter on the configured interfaces");
    opts.optflag("d", "debug", "log debug messages");
    opts.optflag("s", "status", "print the proxy status periodically");
    opts.optflagmulti("v", "verbose", "be verbose (twice for trace logging)");
    opts.optopt("f", "file", "configuration file", "PATH");
    opts.optflag("c", "check-kernel", "check the kernel features and exit");

    let matches = match opts.parse(&args[1..]) {
        Ok(matches) => matches,
        Err(err) => {
            eprintln!("{}", err);
            print_usage(&program, &opts);
            return ExitCode::FAILURE;
        }
    };

    if matches.opt_present("h") {
        print_usage(&program, &opts);
        return ExitCode::SUCCESS;
    }

    let level = if matches.opt_present("d") || matches.opt_count("v") >= 2 {
        "trace"
    } else if matches.opt_count("v") == 1 {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config_path = matches
        .opt_str("f")
        .unwrap_or_else(|| "mcastd.conf".to_string());

    if matches.opt_present("c") {
        let family = match Configuration::load(&config_path) {
            Ok(cfg) => cfg.protocol().family(),
            Err(_) => mcastd::AddrFamily::V4,
        };
        check_kernel(family);
        return ExitCode::SUCCESS;
    }

    // SAFETY: geteuid has no preconditions
    if unsafe { libc::geteuid() } != 0 {
        eprintln!("mcastd needs root to open raw sockets and program the MFIB");
        return ExitCode::FAILURE;
    }

    let options = ProxyOptions {
        config_path,
        reset_rp_filter: matches.opt_present("r"),
        print_status: matches.opt_present("s"),
    };

    match Proxy::run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

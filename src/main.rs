extern crate bngen;
extern crate env_logger;
extern crate libc;
extern crate serde_json;

#[macro_use]
extern crate log;

use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use bngen::config::Config;
use bngen::Stack;

static TEARDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_signal: libc::c_int) {
    TEARDOWN_SIGNAL.store(true, Ordering::Relaxed);
}

fn main() {
    env_logger::init();

    let path = match env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: bngen <config.json>");
            process::exit(1);
        }
    };

    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let mut stack = match Stack::new(config) {
        Ok(stack) => stack,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    if let Err(e) = stack.start() {
        error!("failed to start: {}", e);
        process::exit(1);
    }

    let handler = handle_signal as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
    let ctx = stack.ctx().clone();
    thread::spawn(move || {
        loop {
            if TEARDOWN_SIGNAL.load(Ordering::Relaxed) {
                info!("teardown requested");
                ctx.request_teardown();
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
    });

    stack.run();

    match serde_json::to_string_pretty(&stack.stream_report()) {
        Ok(report) => println!("{}", report),
        Err(e) => error!("failed to render stream report: {}", e),
    }
}

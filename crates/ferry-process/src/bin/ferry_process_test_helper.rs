//! Stand-in runtime used by the integration tests.
//!
//! Invoked like the real runtime (`--inspect-wait=HOST:PORT script`), it prints
//! an inspector banner for that address and then "runs" the script: each line
//! of the script file is a directive such as `stderr-line text` or
//! `sleep-ms 200`. The same directives are accepted as `--flag value` pairs.

use std::{
    env, fs,
    io::{self, Read, Write},
    process, thread,
    time::Duration,
};

fn parse_u64(value: &str, flag: &str) -> u64 {
    value.trim().parse().unwrap_or_else(|_| {
        eprintln!("invalid u64 for {flag}: {value}");
        process::exit(2);
    })
}

fn print_banner(addr: &str) {
    let mut err = io::stderr().lock();
    let _ = writeln!(err, "--------------------- Bun Inspector ---------------------");
    let _ = writeln!(err, "Listening:");
    let _ = writeln!(err, "  ws://{addr}/t3sth3lp3r");
    let _ = writeln!(err, "Inspect in browser:");
    let _ = writeln!(err, "  https://debug.bun.sh/#{addr}/t3sth3lp3r");
    let _ = writeln!(err, "--------------------- Bun Inspector ---------------------");
    let _ = err.flush();
}

fn run_directive(name: &str, value: &str) {
    match name {
        "stderr-line" => {
            eprintln!("{value}");
        }
        "stdout-line" => {
            println!("{value}");
        }
        "print-env" => match env::var(value) {
            Ok(found) => eprintln!("{value}={found}"),
            Err(_) => eprintln!("{value} unset"),
        },
        "echo-stdin" => {
            let mut input = String::new();
            let _ = io::stdin().read_to_string(&mut input);
            print!("{input}");
            let _ = io::stdout().flush();
        }
        "sleep-ms" => thread::sleep(Duration::from_millis(parse_u64(value, name))),
        "exit-code" => process::exit(parse_u64(value, name) as i32),
        other => {
            eprintln!("unknown directive: {other}");
            process::exit(2);
        }
    }
}

fn run_script(path: &str) {
    let Ok(text) = fs::read_to_string(path) else {
        eprintln!("error: cannot read {path}");
        process::exit(1);
    };
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (name, value) = line.split_once(' ').unwrap_or((line, ""));
        run_directive(name, value);
    }
}

fn main() {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if let Some(addr) = arg.strip_prefix("--inspect-wait=") {
            print_banner(addr);
            continue;
        }
        match arg.as_str() {
            "--echo-stdin" => run_directive("echo-stdin", ""),
            "--stderr-line" | "--stdout-line" | "--print-env" | "--sleep-ms" | "--exit-code" => {
                let value = args.next().unwrap_or_default();
                run_directive(&arg[2..], &value);
            }
            // Sandbox-style arguments the helper may see when it wraps itself.
            "--" | "--cwd" | "--config" => {}
            other if other.ends_with(".ts") || other.ends_with(".js") => run_script(other),
            _ => {}
        }
    }
}

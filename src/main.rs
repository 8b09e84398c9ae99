use clap::Parser;
use tinto::{exit_code, run_with_args, Args};

fn main() {
    let args = Args::parse();
    if let Err(err) = run_with_args(args) {
        eprintln!("error: {:#}", err);
        std::process::exit(exit_code(&err));
    }
}

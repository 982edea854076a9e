//! `arcd`: parse, run, and turn any error into an exit status

fn main() {
    if let Err(error) = arcdiscvist::cli::run() {
        eprintln!("{}", error);
        std::process::exit(error.exit_code());
    }
}

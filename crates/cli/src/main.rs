use std::process::ExitCode;

fn main() -> ExitCode {
    underwrite_cli::run()
}

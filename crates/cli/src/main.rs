use std::process::ExitCode;

fn main() -> ExitCode {
    permitly_cli::run()
}

use std::process::ExitCode;

fn main() -> ExitCode {
    kitwright_cli::run()
}

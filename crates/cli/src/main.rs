use std::process::ExitCode;

fn main() -> ExitCode {
    botforge_cli::run()
}

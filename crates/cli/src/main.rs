use std::process::ExitCode;

fn main() -> ExitCode {
    crmbot_cli::run()
}

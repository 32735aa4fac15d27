//! NeuroGuide relay server binary.
//! Run with: cargo run --bin neuroguide-server

use std::process::ExitCode;

use neuroguide_relay::start;

fn main() -> ExitCode {
    start::run()
}

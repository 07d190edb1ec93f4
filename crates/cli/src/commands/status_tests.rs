use super::*;
use clap::Parser;

#[derive(Parser)]
struct Harness {
    #[command(flatten)]
    args: StatusArgs,
}

#[test]
fn parses_run_id_positional() {
    let harness = Harness::parse_from(["status", "run-123"]);
    assert_eq!(harness.args.run_id, "run-123");
}

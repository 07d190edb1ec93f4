use super::*;
use clap::Parser;

#[derive(Parser)]
struct Harness {
    #[command(flatten)]
    args: CancelArgs,
}

#[test]
fn parses_run_id_positional() {
    let harness = Harness::parse_from(["cancel", "run-456"]);
    assert_eq!(harness.args.run_id, "run-456");
}

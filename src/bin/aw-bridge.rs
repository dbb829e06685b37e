//! `aw-bridge` - agent-watch turn bridge

fn main() -> anyhow::Result<()> {
    aw_bridge::cli::main()
}

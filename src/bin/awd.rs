//! `awd` - agent-watch daemon

fn main() -> anyhow::Result<()> {
    awd::cli::main()
}

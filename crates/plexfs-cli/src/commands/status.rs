use plexfs_config::{FuseOp, UnionConfig};

pub fn run(config: &UnionConfig) -> Result<(), Box<dyn std::error::Error>> {
    let config = config.effective();

    println!("plexfs Status");
    println!("=============");
    println!();

    println!("Branches:");
    for branch in &config.branches {
        let min_free = branch
            .min_free_space
            .map(|b| format!(", minfreespace={b}"))
            .unwrap_or_default();
        println!("  {} [{}{}]", branch.path, branch.mode.tag(), min_free);
    }
    println!();

    println!("Control entry: {}", config.control_file);
    println!("Global minfreespace: {}", config.min_free_space);
    println!(
        "Move on ENOSPC: {}",
        if config.move_on_enospc { "yes" } else { "no" }
    );
    println!();

    println!("Policies:");
    for op in FuseOp::ALL {
        println!(
            "  {:<12} {:<8} {}",
            op.name(),
            format!("({})", op.category().name()),
            config.policy_for(op).name()
        );
    }

    Ok(())
}

use plexfs_config::{default_policy, Category, Policy};

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    for category in Category::ALL {
        println!("{}:", category.name());
        for policy in Policy::ALL {
            if !policy.valid_for(category) {
                continue;
            }
            let marker = if policy == default_policy(category) {
                " (default)"
            } else {
                ""
            };
            println!("  {}{}", policy.name(), marker);
        }
        println!();
    }
    Ok(())
}

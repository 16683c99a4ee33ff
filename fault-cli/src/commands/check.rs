//! Show the validated config.

use fault_core::Config;

/// Run the check command. The config was already validated on load.
pub fn run(config: &Config) {
    println!("=== agent-failure config ===");
    println!();
    println!("Scenario:");
    println!("  Service:        {}", config.scenario.service);
    println!("  Log tag:        {}", config.scenario.log_tag);
    println!("  Grace:          {}s", config.scenario.grace_secs);
    println!("  Expected code:  {}", config.scenario.expected_error_code);
    println!("  Shutdown text:  {}", config.scenario.shutdown_marker);
    println!(
        "  Files:          {} then {} (job {})",
        config.scenario.first_file, config.scenario.second_file, config.scenario.job_id
    );
    println!();
    println!("Clients ({}):", config.hosts.clients.len());
    for host in &config.hosts.clients {
        println!("  {}", host);
    }
    println!();
    println!("Workload:");
    println!(
        "  {} ({}), ppn={}, api={}",
        config.workload.mpirun.display(),
        config.workload.mpi_type,
        config.workload.ppn,
        config.workload.api
    );
    println!();
    println!("Pool:");
    println!("  size={} group={}", config.pool.size, config.pool.server_group);
    println!();
    println!("Config OK");
}

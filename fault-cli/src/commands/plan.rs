//! Print the commands a run would issue.

use fault_core::inject::SystemdOverSsh;
use fault_core::ior::MpirunIor;
use fault_core::journal::JournalctlOverSsh;
use fault_core::provision::DmgProvisioner;
use fault_core::ssh::SshTarget;
use fault_core::{Config, JobRunner, TimeWindow};
use std::sync::Arc;

/// Run the plan command.
pub fn run(config: &Config) {
    let scenario = &config.scenario;
    let hosts = &config.hosts;

    let provisioner = DmgProvisioner::from_config(&config.pool);
    let ior = MpirunIor::new(config.workload.clone());
    let runner = JobRunner::new(Arc::new(ior.clone()), provisioner.resource());
    let services = SystemdOverSsh::from_config(hosts);
    let journal = JournalctlOverSsh::from_config(hosts);

    let request = |file: &str| runner.request(scenario.job_id, file, &hosts.clients);
    let remote = |cmd: &str| {
        for host in &hosts.clients {
            let target =
                SshTarget::new(host.as_str(), hosts.ssh_user.clone(), hosts.ssh_timeout_secs);
            println!("  ssh {}: {}", target.destination(), cmd);
        }
    };

    println!("1. Provision");
    for line in provisioner.command_lines() {
        println!("  {}", line);
    }

    println!("2. Workload {} (background)", scenario.job_id);
    println!("  {}", ior.command_line(&request(&scenario.first_file)));

    println!("3. Wait {}s", scenario.grace_secs);

    println!("4. Stop {}", scenario.service);
    remote(&services.unit_command("stop", &scenario.service));

    println!(
        "5. Expect '{}' in workload {} error",
        scenario.expected_error_code, scenario.job_id
    );

    println!(
        "6. Expect '{}' in journal of {}",
        scenario.shutdown_marker, hosts.clients[0]
    );
    remote(&journal.command(&scenario.log_tag, &TimeWindow::open().close()));

    println!("7. Restart {}", scenario.service);
    remote(&services.unit_command("start", &scenario.service));

    println!("8. Workload {} (recovery), expect no errors", scenario.job_id);
    println!("  {}", ior.command_line(&request(&scenario.second_file)));

    println!("9. Release");
    for line in provisioner.release_command_lines() {
        println!("  {}", line);
    }
}

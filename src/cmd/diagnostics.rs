//! Diagnostics command: reports whether a container engine is reachable,
//! the one fatal startup precondition for the daemon proper.

use anyhow::Result;
use bollard::Docker;

pub async fn run() -> Result<()> {
    println!("Clowdy Daemon Diagnostics");
    println!("=========================\n");

    println!("Container Engine:");
    println!("-----------------");

    match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.version().await {
            Ok(version) => {
                println!("  reachable: yes");
                println!("  engine version: {}", version.version.unwrap_or_default());
                println!("  api version: {}", version.api_version.unwrap_or_default());
                println!(
                    "  os/arch: {}/{}",
                    version.os.unwrap_or_default(),
                    version.arch.unwrap_or_default()
                );

                match docker.info().await {
                    Ok(info) => {
                        println!("  containers: {}", info.containers.unwrap_or(0));
                        println!("  images: {}", info.images.unwrap_or(0));
                        println!("  storage driver: {}", info.driver.unwrap_or_default());
                    }
                    Err(e) => println!("  warning: could not fetch engine info: {e}"),
                }
            }
            Err(e) => {
                println!("  reachable: no");
                println!("  error: {e}");
            }
        },
        Err(e) => {
            println!("  reachable: no");
            println!("  error: {e}");
            println!("  a reachable container engine is required to run the daemon.");
        }
    }

    println!("\nDiagnostics complete.");
    Ok(())
}

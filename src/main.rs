use stress_test::{stress_test_convergence, stress_test_scaling};
use tracing_subscriber::EnvFilter;

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = rt.block_on(async_main()) {
        eprintln!("stress test failed: {err}");
        std::process::exit(1);
    }
}

async fn async_main() -> Result<(), rowsync_sdk::EngineError> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ASYNC REPLICATION STRESS TESTS                   ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: small scale
    let stats = stress_test_convergence(4, 100, 40).await?;
    stats.print();

    // Test 2: medium scale
    let stats = stress_test_convergence(10, 300, 200).await?;
    stats.print();

    // Test 3: scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(12, 4).await?;

    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}

use goose::prelude::*;
use rand::Rng;

/// Drives a running loadkit instance with a mix of workload requests.
///
/// Useful for checking that an autoscaler reacts to the pressure the server
/// generates:
/// - CPU burns of varying length (the main scaling signal)
/// - Memory allocations of varying size
/// - Idle delays, which hold connections without using CPU
/// - Health checks
///
/// # Usage
/// ```bash
/// cd loadtest
/// cargo run --release -- --host http://localhost:8480 --users 10 --hatch-rate 2 --run-time 60s
/// ```

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("MixedWorkload")
                .register_transaction(transaction!(burn_cpu).set_weight(10)?)
                .register_transaction(transaction!(allocate_memory).set_weight(5)?)
                .register_transaction(transaction!(idle_delay).set_weight(3)?)
                .register_transaction(transaction!(health_check).set_weight(1)?),
        )
        .register_scenario(
            scenario!("Saturation")
                .register_transaction(transaction!(burn_all_cores).set_weight(1)?),
        )
        .execute()
        .await?;

    Ok(())
}

/// Single-core burn between 50ms and 500ms.
async fn burn_cpu(user: &mut GooseUser) -> TransactionResult {
    // Generate random parameters before await to satisfy Send bounds
    let url = {
        let mut rng = rand::thread_rng();
        format!("/cpu?duration={}ms", rng.gen_range(50..500))
    };

    let _goose = user.get(&url).await?;
    Ok(())
}

/// Allocation between 1MB and 64MB, held briefly so it shows up in RSS.
async fn allocate_memory(user: &mut GooseUser) -> TransactionResult {
    let url = {
        let mut rng = rand::thread_rng();
        format!("/memory?size={}MB&hold=200ms", rng.gen_range(1..64))
    };

    let _goose = user.get(&url).await?;
    Ok(())
}

/// Holds a connection open without using CPU.
async fn idle_delay(user: &mut GooseUser) -> TransactionResult {
    let url = {
        let mut rng = rand::thread_rng();
        format!("/time?duration={}ms", rng.gen_range(100..1000))
    };

    let _goose = user.get(&url).await?;
    Ok(())
}

/// Occupies every core of the target for one second.
async fn burn_all_cores(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/cpu?duration=1s&parallel=true").await?;
    Ok(())
}

async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}

use hetla_solver::{
    BackendConfig, BackendDescriptor, ConjugateGradient, IterativeSolver, Jacobi, LocalMatrix,
    Migrate, Solver, SolverError, Vector,
};
use std::time::Instant;

/// b[i] = sin(i / n)
fn create_sin_vector(n: usize) -> Vec<f32> {
    (0..n).map(|i| (i as f32 / n as f32).sin()).collect()
}

/// Solves the 5-point Laplace system of a `size x size` grid with
/// Jacobi-preconditioned CG. Set `HETLA_ACCELERATOR=wgpu` to run on the GPU.
#[tokio::main]
async fn main() -> Result<(), SolverError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu", log::LevelFilter::Off)
        .init();

    let backend = BackendDescriptor::init(BackendConfig::from_env()?).await?;

    let size = 256;
    let n = size * size;
    log::info!("Setting up {}x{} Laplace grid ({} unknowns)...", size, size, n);
    let mut a = LocalMatrix::<f32>::laplace2d(&backend, "A", size);
    let mut b = Vector::from_slice(&backend, "b", &create_sin_vector(n));
    let mut x: Vector<f32> = Vector::with_size(&backend, "x", n);

    if let Some(device) = backend.accelerator() {
        log::info!("Moving operator and vectors to {}", device.name());
        a.move_to_accelerator();
        b.move_to_accelerator();
        x.move_to_accelerator();
    }

    let mut cg = ConjugateGradient::with_params(1e-5, 5 * size);
    cg.set_preconditioner(Box::new(Jacobi::new()));
    cg.set_operator(&a);
    cg.build();

    if let Some(device) = backend.accelerator() {
        device.reset_transfer_stats();
    }
    let start_time = Instant::now();
    let report = cg.solve(&b, &mut x);
    let duration = start_time.elapsed();

    if let Some(device) = backend.accelerator() {
        let stats = device.transfer_stats();
        log::info!("Transfer stats:");
        log::info!("  Bytes host -> device: {}", stats.bytes_to_device);
        log::info!("  Bytes device -> host: {}", stats.bytes_from_device);
    }

    log::info!("Solver finished: {:?}", report.status);
    log::info!("  Iterations: {}", report.iterations);
    log::info!(
        "  Residual: {:.6e} -> {:.6e}",
        report.initial_residual,
        report.final_residual
    );
    log::info!("  Time elapsed: {:?}", duration);
    Ok(())
}

use substruct::{PreconditionerKind, SolverSettings, SolverStrategy};

mod one_dimensional;

/// Every strategy, with the iterative ones tightly converged.
fn all_strategy_settings() -> Vec<SolverSettings> {
    [
        SolverStrategy::DirectFull,
        SolverStrategy::DirectStaticCond,
        SolverStrategy::IterativeFull,
        SolverStrategy::IterativeStaticCond,
    ]
    .into_iter()
    .map(|strategy| {
        SolverSettings::default()
            .with_strategy(strategy)
            .with_preconditioner(PreconditionerKind::Diagonal)
            .with_tolerance(1e-12)
    })
    .collect()
}

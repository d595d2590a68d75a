use substruct::condensation::CondensationError;
use substruct::{ErrorCategory, LinSysError, PreconditionerKind, SolverSettings, SolverStrategy};

#[test]
fn default_settings() {
    let settings = SolverSettings::default();
    assert_eq!(settings.strategy, SolverStrategy::DirectStaticCond);
    assert_eq!(settings.preconditioner, PreconditionerKind::Diagonal);
    assert_eq!(settings.tolerance, 1e-9);
    assert_eq!(settings.max_iterations, 5000);
}

#[test]
fn settings_deserialize_with_defaults() {
    let settings: SolverSettings =
        serde_json::from_str(r#"{ "strategy": "IterativeStaticCond", "tolerance": 1e-6 }"#).unwrap();
    assert_eq!(
        settings,
        SolverSettings::default()
            .with_strategy(SolverStrategy::IterativeStaticCond)
            .with_tolerance(1e-6)
    );

    let json = serde_json::to_string(&settings.clone().with_preconditioner(PreconditionerKind::BlockDiagonal)).unwrap();
    let parsed: SolverSettings = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.preconditioner, PreconditionerKind::BlockDiagonal);
    assert_eq!(parsed.max_iterations, 5000);
}

#[test]
fn strategy_properties() {
    assert!(SolverStrategy::DirectFull.is_direct());
    assert!(!SolverStrategy::DirectFull.is_static_cond());
    assert!(SolverStrategy::IterativeStaticCond.is_static_cond());
    assert!(!SolverStrategy::IterativeFull.is_direct());
}

#[test]
fn error_categories() {
    let not_converged = LinSysError::NotConverged {
        iterations: 10,
        relative_residual: 0.5,
    };
    assert_eq!(not_converged.category(), ErrorCategory::Convergence);
    assert!(not_converged.to_string().contains("10 iterations"));

    let condensation = LinSysError::Condensation {
        element: 3,
        source: CondensationError::SingularInterior,
    };
    assert_eq!(condensation.category(), ErrorCategory::Numerical);
    assert!(std::error::Error::source(&condensation).is_some());

    let element = LinSysError::ElementMatrix {
        element: 0,
        source: eyre::eyre!("bad element"),
    };
    assert_eq!(element.category(), ErrorCategory::Configuration);
}
